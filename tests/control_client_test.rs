//! ControlClient 集成测试：用 axum 模拟 aria2 的 /jsonrpc 端点

use std::sync::{Arc, Mutex};
use std::time::Duration;

use aria2_sidecar::rpc::{ControlClient, TaskStatus};
use aria2_sidecar::EngineError;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

type Responder = Arc<dyn Fn(&Value) -> (StatusCode, String) + Send + Sync>;

async fn jsonrpc(State(responder): State<Responder>, Json(req): Json<Value>) -> (StatusCode, String) {
    if req["method"] == "test.slow" {
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
    responder(&req)
}

/// 启动模拟引擎，返回 endpoint
async fn mock_engine(
    responder: impl Fn(&Value) -> (StatusCode, String) + Send + Sync + 'static,
) -> String {
    let responder: Responder = Arc::new(responder);
    let app = Router::new()
        .route("/jsonrpc", post(jsonrpc))
        .with_state(responder);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/jsonrpc")
}

fn ok(req: &Value, result: Value) -> (StatusCode, String) {
    let body = json!({"jsonrpc": "2.0", "id": req["id"].clone(), "result": result});
    (StatusCode::OK, body.to_string())
}

fn client(endpoint: String) -> ControlClient {
    ControlClient::with_endpoint(endpoint, Duration::from_secs(5))
}

#[tokio::test]
async fn test_add_uri_sends_uri_and_options() {
    let endpoint = mock_engine(|req| {
        assert_eq!(req["jsonrpc"], "2.0");
        assert_eq!(req["method"], "aria2.addUri");
        assert_eq!(req["params"][0], json!(["https://example.test/file.bin"]));
        assert_eq!(req["params"][1], json!({"dir": "/tmp", "out": "file.bin"}));
        ok(req, json!("2089b05ecca3d829"))
    })
    .await;

    let gid = client(endpoint)
        .add_uri("https://example.test/file.bin", "/tmp", "file.bin")
        .await
        .unwrap();
    assert_eq!(gid, "2089b05ecca3d829");
}

#[tokio::test]
async fn test_add_uri_omits_empty_options() {
    let endpoint = mock_engine(|req| {
        assert_eq!(req["params"][1], json!({}));
        ok(req, json!("gid-1"))
    })
    .await;

    let gid = client(endpoint)
        .add_uri("https://example.test/file.bin", "", "")
        .await
        .unwrap();
    assert_eq!(gid, "gid-1");
}

#[tokio::test]
async fn test_ids_round_trip_and_are_unique() {
    let seen = Arc::new(Mutex::new(Vec::<String>::new()));
    let recorder = seen.clone();
    let endpoint = mock_engine(move |req| {
        recorder
            .lock()
            .unwrap()
            .push(req["id"].as_str().unwrap().to_string());
        ok(req, json!({"echo": req["id"].clone()}))
    })
    .await;
    let c = client(endpoint);

    let first = c.call("aria2.getVersion", vec![]).await.unwrap();
    let second = c.call("aria2.getVersion", vec![]).await.unwrap();

    let ids = seen.lock().unwrap().clone();
    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);
    assert_eq!(first["echo"], json!(ids[0]));
    assert_eq!(second["echo"], json!(ids[1]));
}

#[tokio::test]
async fn test_foreign_id_still_parses() {
    let endpoint = mock_engine(|_req| {
        let body = json!({"jsonrpc": "2.0", "id": "someone-else", "result": "OK"});
        (StatusCode::OK, body.to_string())
    })
    .await;

    let result = client(endpoint).call("aria2.saveSession", vec![]).await.unwrap();
    assert_eq!(result, json!("OK"));
}

#[tokio::test]
async fn test_engine_error_is_protocol_error() {
    let endpoint = mock_engine(|req| {
        let body = json!({
            "jsonrpc": "2.0",
            "id": req["id"].clone(),
            "error": {"code": 1, "message": "GID 0000000000000001 is not found"}
        });
        (StatusCode::BAD_REQUEST, body.to_string())
    })
    .await;

    let err = client(endpoint).tell_status("0000000000000001").await.unwrap_err();
    match err {
        EngineError::Protocol { code, message } => {
            assert_eq!(code, 1);
            assert_eq!(message, "GID 0000000000000001 is not found");
        }
        other => panic!("Expected Protocol error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_body_is_transport_error() {
    let endpoint = mock_engine(|_req| (StatusCode::OK, "<html>proxy error</html>".to_string())).await;

    let err = client(endpoint).tell_status("g").await.unwrap_err();
    assert!(matches!(err, EngineError::Transport(_)), "{err:?}");
}

#[tokio::test]
async fn test_connection_refused_is_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let err = ControlClient::new(port, Duration::from_secs(1))
        .add_uri("https://example.test/file.bin", "", "")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Transport(_)), "{err:?}");
}

#[tokio::test]
async fn test_call_timeout_is_transport_error() {
    let endpoint = mock_engine(|req| ok(req, json!("late"))).await;

    let c = ControlClient::with_endpoint(endpoint, Duration::from_millis(200));
    let err = c.call("test.slow", vec![]).await.unwrap_err();
    assert!(matches!(err, EngineError::Transport(_)), "{err:?}");
}

#[tokio::test]
async fn test_unexpected_result_shape_is_decode_error() {
    let endpoint = mock_engine(|req| ok(req, json!(42))).await;

    let err = client(endpoint).tell_status("g").await.unwrap_err();
    assert!(matches!(err, EngineError::Decode(_)), "{err:?}");
}

#[tokio::test]
async fn test_tell_status_decodes_task() {
    let endpoint = mock_engine(|req| {
        assert_eq!(req["method"], "aria2.tellStatus");
        assert_eq!(req["params"], json!(["2089b05ecca3d829"]));
        ok(
            req,
            json!({
                "gid": "2089b05ecca3d829",
                "status": "error",
                "totalLength": "34896138",
                "completedLength": "0",
                "downloadSpeed": "0",
                "errorCode": "3",
                "errorMessage": "Resource not found",
                "files": []
            }),
        )
    })
    .await;

    let status = client(endpoint).tell_status("2089b05ecca3d829").await.unwrap();
    assert_eq!(status.status, TaskStatus::Error);
    assert_eq!(status.error_code.as_deref(), Some("3"));
    assert_eq!(status.error_message.as_deref(), Some("Resource not found"));
    assert_eq!(status.total_bytes(), Some(34_896_138));
}

#[tokio::test]
async fn test_concurrent_calls_share_one_client() {
    let endpoint = mock_engine(|req| ok(req, req["params"][0].clone())).await;
    let c = client(endpoint);

    let calls: Vec<_> = (0..8)
        .map(|i| {
            let c = c.clone();
            tokio::spawn(async move { c.call("aria2.tellStatus", vec![json!(format!("g{i}"))]).await })
        })
        .collect();
    for (i, handle) in calls.into_iter().enumerate() {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result, json!(format!("g{i}")));
    }
}
