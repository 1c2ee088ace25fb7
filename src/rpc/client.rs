//! aria2 JSON-RPC 客户端
//!
//! 每次调用是一次独立的 HTTP POST 到 `http://127.0.0.1:<port>/jsonrpc`，带单次超时；
//! 本层不做重试。reqwest::Client 内部是 Arc，可在多个轮询任务间共享。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::core::{EngineError, Result};
use crate::rpc::types::{DownloadStatus, JsonRpcRequest, JsonRpcResponse};
use crate::rpc::EngineRpc;

pub const METHOD_ADD_URI: &str = "aria2.addUri";
pub const METHOD_TELL_STATUS: &str = "aria2.tellStatus";

/// 控制通道客户端：无每次调用的可变状态，Clone 代价低
#[derive(Debug, Clone)]
pub struct ControlClient {
    http: Client,
    endpoint: String,
}

impl ControlClient {
    /// 连接本机 `port` 上的 aria2 RPC
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self::with_endpoint(format!("http://127.0.0.1:{port}/jsonrpc"), timeout)
    }

    pub fn with_endpoint(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// 发送一次 JSON-RPC 调用，返回原始 result
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let id = uuid::Uuid::new_v4().to_string();
        let request = JsonRpcRequest::new(method, params, id.clone());

        tracing::debug!(method, id = %id, "rpc call");

        // aria2 对被拒绝的调用返回 4xx/5xx 但仍带 JSON 信封，因此不按 HTTP 状态码判断
        let resp = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::Transport(format!("{method}: {e}")))?;
        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| EngineError::Transport(format!("{method}: failed to read body: {e}")))?;

        let envelope: JsonRpcResponse = serde_json::from_slice(&body).map_err(|e| {
            EngineError::Transport(format!("{method}: malformed response (HTTP {status}): {e}"))
        })?;

        match envelope.id.as_ref() {
            Some(Value::String(echoed)) if *echoed == id => {}
            other => {
                tracing::warn!(method, sent = %id, received = ?other, "rpc response id mismatch");
            }
        }

        if let Some(err) = envelope.error {
            tracing::debug!(method, code = err.code, message = %err.message, "rpc error");
            return Err(EngineError::Protocol {
                code: err.code,
                message: err.message,
            });
        }

        envelope
            .result
            .ok_or_else(|| EngineError::Decode(format!("{method}: response has neither result nor error")))
    }

    async fn call_typed<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T> {
        let raw = self.call(method, params).await?;
        serde_json::from_value(raw).map_err(|e| EngineError::Decode(format!("{method}: {e}")))
    }

    /// aria2.addUri：提交一个 URI，返回 gid
    ///
    /// `dir` / `out` 为空时不传，由 aria2 使用默认目录与服务器给出的文件名。
    pub async fn add_uri(&self, uri: &str, dir: &str, out: &str) -> Result<String> {
        let mut options = serde_json::Map::new();
        if !dir.is_empty() {
            options.insert("dir".to_string(), json!(dir));
        }
        if !out.is_empty() {
            options.insert("out".to_string(), json!(out));
        }
        self.call_typed(METHOD_ADD_URI, vec![json!([uri]), Value::Object(options)])
            .await
    }

    /// aria2.tellStatus：查询任务状态
    pub async fn tell_status(&self, gid: &str) -> Result<DownloadStatus> {
        self.call_typed(METHOD_TELL_STATUS, vec![json!(gid)]).await
    }
}

#[async_trait]
impl EngineRpc for ControlClient {
    async fn submit_download(&self, uri: &str, dir: &str, out: &str) -> Result<String> {
        self.add_uri(uri, dir, out).await
    }

    async fn query_status(&self, gid: &str) -> Result<DownloadStatus> {
        self.tell_status(gid).await
    }
}
