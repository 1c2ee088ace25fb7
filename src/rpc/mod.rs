//! 控制通道：JSON-RPC 信封、aria2 客户端与下载编排使用的 trait

pub mod client;
pub mod types;

use async_trait::async_trait;

use crate::core::Result;

pub use client::ControlClient;
pub use types::{DownloadStatus, FileEntry, JsonRpcError, JsonRpcRequest, JsonRpcResponse, TaskStatus};

/// 下载编排所需的最小 RPC 子集：提交与查询
#[async_trait]
pub trait EngineRpc: Send + Sync {
    /// 提交下载，返回引擎分配的任务 id
    async fn submit_download(&self, uri: &str, dir: &str, out: &str) -> Result<String>;

    async fn query_status(&self, gid: &str) -> Result<DownloadStatus>;
}
