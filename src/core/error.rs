//! 引擎错误类型
//!
//! 覆盖子进程启动、RPC 传输 / 协议 / 解析失败、以及任务自身失败（由 aria2 报告的 errorCode/errorMessage）。

use thiserror::Error;

/// 监管器、控制客户端与下载编排过程中可能出现的错误
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("aria2c is already running")]
    AlreadyRunning,

    /// 无法准备可执行文件（平台不支持、占位文件、拷贝失败等）
    #[error("Provision error: {0}")]
    Provision(String),

    #[error("Failed to launch aria2c: {0}")]
    Launch(String),

    #[error("RPC port {port} not ready after {timeout_ms}ms")]
    ReadinessTimeout { port: u16, timeout_ms: u64 },

    /// 生命周期上下文已取消（监管器被停止或子进程退出）
    #[error("Engine lifecycle cancelled")]
    Cancelled,

    /// Stop 时结束子进程失败；状态仍会被标记为已停止
    #[error("Failed to kill aria2c: {0}")]
    Terminate(String),

    #[error("No free port at or above {0}")]
    NoFreePort(u16),

    /// 无法完成 HTTP 交换：连接被拒、超时、响应体不是合法 JSON-RPC 信封
    #[error("Transport error: {0}")]
    Transport(String),

    /// aria2 拒绝了调用
    #[error("JSON-RPC error {code}: {message}")]
    Protocol { code: i64, message: String },

    /// 信封合法，但 result 不是预期形状
    #[error("Decode error: {0}")]
    Decode(String),

    /// 下载任务本身失败
    #[error("Download failed (code {code}): {message}")]
    Task { code: String, message: String },

    #[error("Download {0} was removed")]
    TaskRemoved(String),

    #[error("Download {0} completed without reporting an output file")]
    NoOutputFile(String),

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl From<config::ConfigError> for EngineError {
    fn from(e: config::ConfigError) -> Self {
        EngineError::Config(e.to_string())
    }
}
