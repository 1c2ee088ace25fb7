//! aria2c 进程监管：启动、就绪等待、退出监测、停止
//!
//! 状态机 Stopped → Starting → Running → Stopped。
//! - `start_lock`（异步锁）串行化 Start / EnsureRunning，就绪等待期间持有
//! - `state`（同步锁）只做短暂的状态切换，从不跨 await 持有；Stop 与退出监测只用它，
//!   因此 Stop 可以取消一个正在等待就绪的 Start，监测任务回调也不会和 Start/Stop 死锁
//! - 子进程由监测任务独占：它等待子进程退出，或收到 Stop 的 kill 请求后结束子进程
//!
//! 每次 Start 分配新的 generation，过期的监测任务不会误停新进程。

use std::net::Ipv4Addr;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::EngineSection;
use crate::core::port::find_available_port;
use crate::core::provision::BinaryProvisioner;
use crate::core::{EngineError, Result};
use crate::rpc::{ControlClient, EngineRpc};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// 监管器参数（aria2c 的命令行参数是固定的，不在此列）
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// 端口探测起点
    pub base_port: u16,
    /// 等待 RPC 端口可连接的总时长
    pub ready_timeout: Duration,
    /// 就绪探测间隔
    pub probe_interval: Duration,
    /// 单次探测的连接超时
    pub dial_timeout: Duration,
    /// 每次 RPC 调用的超时
    pub rpc_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            base_port: 6800,
            ready_timeout: Duration::from_secs(10),
            probe_interval: Duration::from_millis(100),
            dial_timeout: Duration::from_secs(1),
            rpc_timeout: Duration::from_secs(10),
        }
    }
}

impl SupervisorConfig {
    pub fn from_sections(engine: &EngineSection, rpc_timeout_secs: u64) -> Self {
        Self {
            base_port: engine.base_port,
            ready_timeout: Duration::from_millis(engine.ready_timeout_ms),
            probe_interval: Duration::from_millis(engine.probe_interval_ms),
            dial_timeout: Duration::from_millis(engine.dial_timeout_ms),
            rpc_timeout: Duration::from_secs(rpc_timeout_secs),
        }
    }
}

/// aria2c 固定启动参数
pub fn build_args(port: u16) -> Vec<String> {
    vec![
        format!("--rpc-listen-port={port}"),
        "--disk-cache=64M".into(),
        // 无法续传时不强制失败
        "--always-resume=false".into(),
        // 0: 所有 URI 都不支持续传时才从头下载
        "--max-resume-failure-tries=0".into(),
        "--enable-rpc=true".into(),
        "--rpc-listen-all=true".into(),
        "--continue=true".into(),
        "--max-connection-per-server=16".into(),
        "--min-split-size=1M".into(),
        "--split=64".into(),
        "--optimize-concurrent-downloads=true".into(),
        "--log-level=error".into(),
        "--http-accept-gzip=true".into(),
        "--content-disposition-default-utf8=true".into(),
        "--check-certificate=false".into(),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorPhase {
    Stopped,
    Starting,
    Running,
}

/// 一次成功启动对应的会话：RPC 客户端 + 生命周期令牌
///
/// 令牌在 Stop 或子进程退出时取消，所有依赖该进程的轮询随之结束。
#[derive(Clone)]
pub struct EngineSession {
    pub port: u16,
    pub rpc: Arc<dyn EngineRpc>,
    pub lifecycle: CancellationToken,
}

impl std::fmt::Debug for EngineSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSession")
            .field("port", &self.port)
            .field("cancelled", &self.lifecycle.is_cancelled())
            .finish()
    }
}

/// 下载编排对引擎宿主的依赖
#[async_trait]
pub trait EngineHost: Send + Sync {
    /// 已运行则直接返回当前会话，否则启动
    async fn ensure_running(&self) -> Result<EngineSession>;

    async fn stop(&self) -> Result<()>;
}

type KillReply = oneshot::Sender<std::io::Result<()>>;

/// 监管器持有的子进程句柄：真正的 Child 在监测任务里
struct ProcessHandle {
    pid: Option<u32>,
    kill_tx: oneshot::Sender<KillReply>,
}

struct SupervisorState {
    phase: SupervisorPhase,
    port: Option<u16>,
    process: Option<ProcessHandle>,
    client: Option<ControlClient>,
    lifecycle: CancellationToken,
    generation: u64,
}

impl SupervisorState {
    fn new() -> Self {
        Self {
            phase: SupervisorPhase::Stopped,
            port: None,
            process: None,
            client: None,
            lifecycle: CancellationToken::new(),
            generation: 0,
        }
    }

    /// 标记为 Stopped 并取消生命周期；返回之前持有的子进程句柄（如有）
    fn mark_stopped(&mut self) -> Option<ProcessHandle> {
        self.phase = SupervisorPhase::Stopped;
        self.port = None;
        self.client = None;
        self.lifecycle.cancel();
        self.process.take()
    }

    fn session(&self) -> Option<EngineSession> {
        match (self.phase, self.port, &self.client) {
            (SupervisorPhase::Running, Some(port), Some(client)) => Some(EngineSession {
                port,
                rpc: Arc::new(client.clone()),
                lifecycle: self.lifecycle.clone(),
            }),
            _ => None,
        }
    }
}

fn lock_state(state: &Mutex<SupervisorState>) -> MutexGuard<'_, SupervisorState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// aria2c 单实例监管器
pub struct ProcessSupervisor {
    config: SupervisorConfig,
    provisioner: Arc<dyn BinaryProvisioner>,
    state: Arc<Mutex<SupervisorState>>,
    start_lock: tokio::sync::Mutex<()>,
}

impl ProcessSupervisor {
    pub fn new(config: SupervisorConfig, provisioner: Arc<dyn BinaryProvisioner>) -> Self {
        Self {
            config,
            provisioner,
            state: Arc::new(Mutex::new(SupervisorState::new())),
            start_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn phase(&self) -> SupervisorPhase {
        lock_state(&self.state).phase
    }

    pub fn is_running(&self) -> bool {
        self.phase() == SupervisorPhase::Running
    }

    /// 当前 RPC 端口（仅 Running 时有值）
    pub fn port(&self) -> Option<u16> {
        lock_state(&self.state).port
    }

    pub fn pid(&self) -> Option<u32> {
        lock_state(&self.state).process.as_ref().and_then(|p| p.pid)
    }

    /// 当前会话（仅 Running 时有值）
    pub fn session(&self) -> Option<EngineSession> {
        lock_state(&self.state).session()
    }

    /// 启动 aria2c；已运行时返回 AlreadyRunning
    pub async fn start(&self) -> Result<EngineSession> {
        let _serial = self.start_lock.lock().await;
        self.start_serialized().await
    }

    /// 已运行则复用，否则启动
    pub async fn ensure_running(&self) -> Result<EngineSession> {
        let _serial = self.start_lock.lock().await;
        if let Some(session) = self.session() {
            return Ok(session);
        }
        self.start_serialized().await
    }

    /// 停止 aria2c，幂等
    ///
    /// 状态总是先被标记为 Stopped；kill 失败时返回 Terminate 供调用方记录。
    pub async fn stop(&self) -> Result<()> {
        let handle = {
            let mut st = lock_state(&self.state);
            if st.phase != SupervisorPhase::Stopped {
                tracing::info!(port = ?st.port, "stopping aria2c");
            }
            st.mark_stopped()
        };
        let Some(handle) = handle else {
            return Ok(());
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        if handle.kill_tx.send(reply_tx).is_err() {
            // 监测任务已结束：子进程已退出
            return Ok(());
        }
        match reply_rx.await {
            Ok(Ok(())) => {
                tracing::info!(pid = ?handle.pid, "aria2c killed");
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::warn!(pid = ?handle.pid, error = %e, "failed to kill aria2c");
                Err(EngineError::Terminate(e.to_string()))
            }
            // 监测任务先看到了退出
            Err(_) => Ok(()),
        }
    }

    /// 调用方需持有 start_lock
    async fn start_serialized(&self) -> Result<EngineSession> {
        let (lifecycle, generation) = {
            let mut st = lock_state(&self.state);
            if st.phase == SupervisorPhase::Running {
                return Err(EngineError::AlreadyRunning);
            }
            st.phase = SupervisorPhase::Starting;
            st.generation += 1;
            st.lifecycle = CancellationToken::new();
            (st.lifecycle.clone(), st.generation)
        };

        match self.launch(&lifecycle).await {
            Ok((child, port)) => self.commit(child, port, lifecycle, generation).await,
            Err(e) => {
                tracing::error!(error = %e, "aria2c start failed");
                let mut st = lock_state(&self.state);
                if st.generation == generation {
                    st.mark_stopped();
                }
                Err(e)
            }
        }
    }

    async fn launch(&self, lifecycle: &CancellationToken) -> Result<(Child, u16)> {
        let binary = self.provisioner.provision()?;
        let port = find_available_port(self.config.base_port)?;

        let mut cmd = Command::new(&binary);
        cmd.args(build_args(port))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);

        let mut child = cmd
            .spawn()
            .map_err(|e| EngineError::Launch(format!("{}: {e}", binary.display())))?;
        tracing::info!(pid = ?child.id(), port, binary = %binary.display(), "aria2c spawned");

        if let Err(e) = self.wait_for_rpc(&mut child, port, lifecycle).await {
            if let Err(kill_err) = child.kill().await {
                tracing::debug!(error = %kill_err, "kill after failed start");
            }
            return Err(e);
        }
        Ok((child, port))
    }

    /// 以固定间隔尝试连接 RPC 端口，直到成功、超时、取消或子进程提前退出
    async fn wait_for_rpc(
        &self,
        child: &mut Child,
        port: u16,
        lifecycle: &CancellationToken,
    ) -> Result<()> {
        let deadline = tokio::time::sleep(self.config.ready_timeout);
        tokio::pin!(deadline);
        let mut ticker = tokio::time::interval(self.config.probe_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = lifecycle.cancelled() => return Err(EngineError::Cancelled),
                _ = &mut deadline => {
                    return Err(EngineError::ReadinessTimeout {
                        port,
                        timeout_ms: self.config.ready_timeout.as_millis() as u64,
                    });
                }
                status = child.wait() => {
                    let detail = match status {
                        Ok(s) => s.to_string(),
                        Err(e) => e.to_string(),
                    };
                    return Err(EngineError::Launch(format!(
                        "aria2c exited before RPC port {port} was ready ({detail})"
                    )));
                }
                _ = ticker.tick() => {
                    let dial = TcpStream::connect((Ipv4Addr::LOCALHOST, port));
                    if let Ok(Ok(_conn)) = tokio::time::timeout(self.config.dial_timeout, dial).await {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// 就绪后登记为 Running 并交给监测任务；若期间已被 Stop 则结束子进程
    async fn commit(
        &self,
        mut child: Child,
        port: u16,
        lifecycle: CancellationToken,
        generation: u64,
    ) -> Result<EngineSession> {
        {
            let mut st = lock_state(&self.state);
            if !lifecycle.is_cancelled() && st.generation == generation {
                let pid = child.id();
                let client = ControlClient::new(port, self.config.rpc_timeout);
                let (kill_tx, kill_rx) = oneshot::channel();
                tokio::spawn(watch_process(child, kill_rx, Arc::clone(&self.state), generation));

                st.phase = SupervisorPhase::Running;
                st.port = Some(port);
                st.client = Some(client.clone());
                st.process = Some(ProcessHandle { pid, kill_tx });
                tracing::info!(pid = ?pid, port, "aria2c RPC ready");

                return Ok(EngineSession {
                    port,
                    rpc: Arc::new(client),
                    lifecycle,
                });
            }
        }

        if let Err(e) = child.kill().await {
            tracing::debug!(error = %e, "kill after cancelled start");
        }
        Err(EngineError::Cancelled)
    }
}

#[async_trait]
impl EngineHost for ProcessSupervisor {
    async fn ensure_running(&self) -> Result<EngineSession> {
        ProcessSupervisor::ensure_running(self).await
    }

    async fn stop(&self) -> Result<()> {
        ProcessSupervisor::stop(self).await
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        // 丢弃句柄会让监测任务结束子进程
        let _ = lock_state(&self.state).mark_stopped();
    }
}

enum WatchEvent {
    Exited(std::io::Result<ExitStatus>),
    KillRequested(Option<KillReply>),
}

/// 独占子进程：等待退出并回写状态，或执行 Stop 发来的 kill
async fn watch_process(
    mut child: Child,
    mut kill_rx: oneshot::Receiver<KillReply>,
    state: Arc<Mutex<SupervisorState>>,
    generation: u64,
) {
    let event = tokio::select! {
        status = child.wait() => WatchEvent::Exited(status),
        // Err: 句柄被丢弃（监管器已销毁）
        reply = &mut kill_rx => WatchEvent::KillRequested(reply.ok()),
    };

    match event {
        WatchEvent::Exited(status) => {
            // 先关闭 kill 通道，正在等待回复的 Stop 会立即返回
            drop(kill_rx);
            let mut st = lock_state(&state);
            if st.generation == generation && st.phase == SupervisorPhase::Running {
                tracing::warn!(status = ?status, "aria2c exited unexpectedly");
                let _ = st.mark_stopped();
            }
        }
        WatchEvent::KillRequested(reply) => {
            let result = child.kill().await;
            if let Some(reply) = reply {
                let _ = reply.send(result);
            }
        }
    }
}
