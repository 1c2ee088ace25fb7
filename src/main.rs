//! aria2-sidecar 示例入口
//!
//! 用法：`aria2-sidecar <URI> [DIR] [OUT]`
//! 加载配置、初始化日志，下载一个 URI 并逐次打印进度与速度；完成或 Ctrl+C 时停止 aria2c。

use std::time::Instant;

use anyhow::Context;
use aria2_sidecar::config::load_config;
use aria2_sidecar::{observability, DownloadRequest, DownloadStatus, Downloader};

fn print_progress(status: &DownloadStatus, started: Instant) {
    println!("status: {:?} (elapsed {:.1?})", status.status, started.elapsed());
    if let Some(progress) = status.progress() {
        println!(
            "progress: {:.2}% ({}/{})",
            progress * 100.0,
            status.completed_length,
            status.total_length
        );
    }
    match status.speed_bytes() {
        Some(speed) => println!("speed: {:.2} MB/s", speed as f64 / (1024.0 * 1024.0)),
        None if !status.download_speed.is_empty() => println!("speed: {}/s", status.download_speed),
        None => {}
    }
    if let Some(msg) = status.error_message.as_deref().filter(|m| !m.is_empty()) {
        println!("error: {msg}");
    }
    println!("---");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let mut args = std::env::args().skip(1);
    let uri = args.next().context("usage: aria2-sidecar <URI> [DIR] [OUT]")?;
    let request = DownloadRequest::new(uri)
        .dir(args.next().unwrap_or_default())
        .out(args.next().unwrap_or_default());

    let cfg = load_config(None).context("Failed to load config")?;
    let downloader = Downloader::from_config(&cfg).context("Failed to set up aria2c")?;

    let started = Instant::now();
    let result = tokio::select! {
        r = downloader.download(&request, |s| print_progress(s, started)) => Some(r),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, stopping aria2c");
            None
        }
    };

    if let Err(e) = downloader.shutdown().await {
        tracing::warn!(error = %e, "aria2c did not stop cleanly");
    }

    match result {
        Some(r) => {
            let path = r.context("Download failed")?;
            println!("saved to {}", path.display());
        }
        None => println!("interrupted"),
    }
    Ok(())
}
