//! 对外下载 API：提交 + 轮询 + 进度回调

pub mod orchestrator;

pub use orchestrator::{DownloadRequest, Downloader};
