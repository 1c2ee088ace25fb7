//! JSON-RPC 信封与 aria2 任务状态结构

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC 2.0 请求
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub method: String,
    pub params: Vec<Value>,
    pub id: String,
}

impl JsonRpcRequest {
    pub fn new(method: &str, params: Vec<Value>, id: String) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.to_string(),
            params,
            id,
        }
    }
}

/// JSON-RPC 2.0 响应：result 与 error 二选一
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    /// aria2 原样回显请求 id
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

/// 任务状态（aria2 的 status 字段）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Waiting,
    Active,
    Paused,
    Error,
    Complete,
    Removed,
}

impl TaskStatus {
    /// complete / error / removed 之后不会再有状态变化
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Error | TaskStatus::Removed)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FileEntry {
    #[serde(default)]
    pub path: String,
}

/// aria2.tellStatus 返回的任务对象；数值字段均为十进制字符串
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadStatus {
    #[serde(default)]
    pub gid: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub total_length: String,
    #[serde(default)]
    pub completed_length: String,
    #[serde(default)]
    pub download_speed: String,
    #[serde(default)]
    pub piece_length: String,
    #[serde(default)]
    pub num_pieces: String,
    #[serde(default)]
    pub connections: String,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

fn parse_u64(s: &str) -> Option<u64> {
    s.trim().parse().ok()
}

impl DownloadStatus {
    pub fn total_bytes(&self) -> Option<u64> {
        parse_u64(&self.total_length)
    }

    pub fn completed_bytes(&self) -> Option<u64> {
        parse_u64(&self.completed_length)
    }

    /// 字节/秒
    pub fn speed_bytes(&self) -> Option<u64> {
        parse_u64(&self.download_speed)
    }

    /// 完成比例 [0, 1]；总大小未知（0 或缺失）时为 None
    pub fn progress(&self) -> Option<f64> {
        let total = self.total_bytes().filter(|t| *t > 0)?;
        let done = self.completed_bytes().unwrap_or(0).min(total);
        Some(done as f64 / total as f64)
    }

    /// 第一个非空的产出文件路径
    pub fn first_file(&self) -> Option<PathBuf> {
        self.files
            .first()
            .filter(|f| !f.path.is_empty())
            .map(|f| PathBuf::from(&f.path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let req = JsonRpcRequest::new(
            "aria2.tellStatus",
            vec![Value::String("2089b05ecca3d829".into())],
            "42".to_string(),
        );
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(
            v,
            serde_json::json!({
                "jsonrpc": "2.0",
                "method": "aria2.tellStatus",
                "params": ["2089b05ecca3d829"],
                "id": "42"
            })
        );
    }

    #[test]
    fn test_status_from_engine_json() {
        let status: DownloadStatus = serde_json::from_value(serde_json::json!({
            "gid": "2089b05ecca3d829",
            "status": "active",
            "totalLength": "10000",
            "completedLength": "2500",
            "downloadSpeed": "1048576",
            "pieceLength": "1048576",
            "numPieces": "1",
            "connections": "4",
            "files": [{"path": "/tmp/file.bin", "index": "1"}]
        }))
        .unwrap();

        assert_eq!(status.status, TaskStatus::Active);
        assert!(!status.status.is_terminal());
        assert_eq!(status.progress(), Some(0.25));
        assert_eq!(status.speed_bytes(), Some(1_048_576));
        assert_eq!(status.first_file(), Some(PathBuf::from("/tmp/file.bin")));
        assert!(status.error_code.is_none());
    }

    #[test]
    fn test_progress_unknown_total() {
        let status: DownloadStatus = serde_json::from_value(serde_json::json!({
            "gid": "a", "status": "waiting", "totalLength": "0", "completedLength": "0"
        }))
        .unwrap();
        assert_eq!(status.progress(), None);
        assert_eq!(status.first_file(), None);
    }

    #[test]
    fn test_terminal_states() {
        for (raw, terminal) in [
            ("waiting", false),
            ("active", false),
            ("paused", false),
            ("error", true),
            ("complete", true),
            ("removed", true),
        ] {
            let s: TaskStatus = serde_json::from_value(Value::String(raw.into())).unwrap();
            assert_eq!(s.is_terminal(), terminal, "{raw}");
        }
    }

    #[test]
    fn test_empty_path_is_not_an_output_file() {
        let status: DownloadStatus = serde_json::from_value(serde_json::json!({
            "gid": "a", "status": "complete", "files": [{"path": ""}]
        }))
        .unwrap();
        assert_eq!(status.first_file(), None);
    }
}
