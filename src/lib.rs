//! aria2-sidecar - 以子进程方式托管 aria2c，并提供带进度回调的下载 API
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、端口探测、aria2c 可执行文件准备、进程监管
//! - **rpc**: JSON-RPC 信封、aria2 状态结构与控制客户端
//! - **download**: 下载编排（确保运行 → 提交 → 轮询到终态）
//! - **observability**: tracing 日志初始化

pub mod config;
pub mod core;
pub mod download;
pub mod observability;
pub mod rpc;

pub use crate::core::{EngineError, ProcessSupervisor, Result};
pub use download::{DownloadRequest, Downloader};
pub use rpc::{ControlClient, DownloadStatus, TaskStatus};
