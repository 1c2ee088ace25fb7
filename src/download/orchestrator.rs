//! 下载编排：确保 aria2c 运行 → addUri → 按固定间隔 tellStatus 直到终态
//!
//! 每个下载是一个独立的阻塞式 async 调用，多个下载可以并发地共享同一个监管器与 RPC 客户端。
//! 同一下载内回调严格按轮询顺序触发；生命周期令牌取消（Stop 或子进程退出）时返回 Cancelled。

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::provision::{BinaryProvisioner, BundledBinary, FixedBinary};
use crate::core::{EngineError, EngineHost, ProcessSupervisor, Result, SupervisorConfig};
use crate::rpc::{DownloadStatus, EngineRpc, TaskStatus};

/// 一次下载请求；dir / out 为空时由 aria2 决定
#[derive(Debug, Clone, Default)]
pub struct DownloadRequest {
    pub uri: String,
    pub dir: String,
    pub out: String,
}

impl DownloadRequest {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Default::default()
        }
    }

    pub fn dir(mut self, dir: impl Into<String>) -> Self {
        self.dir = dir.into();
        self
    }

    pub fn out(mut self, out: impl Into<String>) -> Self {
        self.out = out.into();
        self
    }
}

/// 对外的下载入口
pub struct Downloader {
    host: Arc<dyn EngineHost>,
    poll_interval: Duration,
}

impl Downloader {
    pub fn new(host: Arc<dyn EngineHost>, poll_interval: Duration) -> Self {
        Self {
            host,
            poll_interval,
        }
    }

    /// 按配置构造 ProcessSupervisor 并包装为 Downloader
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let provisioner = provisioner_from_config(cfg)?;
        let supervisor = ProcessSupervisor::new(
            SupervisorConfig::from_sections(&cfg.engine, cfg.rpc.timeout_secs),
            provisioner,
        );
        Ok(Self::new(
            Arc::new(supervisor),
            Duration::from_millis(cfg.download.poll_interval_ms),
        ))
    }

    /// 下载 `request.uri`，每次轮询调用 `on_progress`，返回最终文件路径
    ///
    /// 回调 panic 会被捕获并记录，不会中断轮询。
    pub async fn download<F>(&self, request: &DownloadRequest, mut on_progress: F) -> Result<PathBuf>
    where
        F: FnMut(&DownloadStatus) + Send,
    {
        let session = self.host.ensure_running().await?;
        let gid = session
            .rpc
            .submit_download(&request.uri, &request.dir, &request.out)
            .await?;
        tracing::info!(gid = %gid, uri = %request.uri, port = session.port, "download submitted");

        monitor_download(
            session.rpc.as_ref(),
            &gid,
            self.poll_interval,
            &session.lifecycle,
            &mut on_progress,
        )
        .await
    }

    /// 停止共享的 aria2c
    pub async fn shutdown(&self) -> Result<()> {
        self.host.stop().await
    }
}

fn provisioner_from_config(cfg: &AppConfig) -> Result<Arc<dyn BinaryProvisioner>> {
    let engine = &cfg.engine;
    if let Some(path) = &engine.binary_path {
        return Ok(Arc::new(FixedBinary::new(path)));
    }
    let Some(bundle_dir) = &engine.bundle_dir else {
        return Err(EngineError::Config(
            "either engine.binary_path or engine.bundle_dir must be set".to_string(),
        ));
    };
    let bundled = match &engine.install_dir {
        Some(install_dir) => BundledBinary::new(bundle_dir, install_dir),
        None => BundledBinary::with_default_install_dir(bundle_dir)?,
    };
    Ok(Arc::new(bundled))
}

/// 轮询直到终态或生命周期取消
async fn monitor_download<F>(
    rpc: &dyn EngineRpc,
    gid: &str,
    interval: Duration,
    lifecycle: &CancellationToken,
    on_progress: &mut F,
) -> Result<PathBuf>
where
    F: FnMut(&DownloadStatus) + Send,
{
    // 首次查询在一个间隔之后；interval 不接受 0
    let interval = interval.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = lifecycle.cancelled() => return Err(EngineError::Cancelled),
            _ = ticker.tick() => {}
        }

        let status = tokio::select! {
            biased;
            _ = lifecycle.cancelled() => return Err(EngineError::Cancelled),
            status = rpc.query_status(gid) => status?,
        };

        notify(on_progress, &status);

        match status.status {
            TaskStatus::Complete => {
                tracing::info!(gid, "download complete");
                return status
                    .first_file()
                    .ok_or_else(|| EngineError::NoOutputFile(gid.to_string()));
            }
            TaskStatus::Error => {
                let code = status.error_code.unwrap_or_default();
                let message = status.error_message.unwrap_or_default();
                tracing::warn!(gid, code = %code, message = %message, "download failed");
                return Err(EngineError::Task { code, message });
            }
            TaskStatus::Removed => return Err(EngineError::TaskRemoved(gid.to_string())),
            TaskStatus::Waiting | TaskStatus::Active | TaskStatus::Paused => {}
        }
    }
}

fn notify<F: FnMut(&DownloadStatus)>(on_progress: &mut F, status: &DownloadStatus) {
    if std::panic::catch_unwind(AssertUnwindSafe(|| on_progress(status))).is_err() {
        tracing::warn!(gid = %status.gid, "progress callback panicked, polling continues");
    }
}
