//! 端口探测：从基准端口向上寻找可监听的端口
//!
//! 探测时短暂 bind 然后立即释放。探测与 aria2c 真正 bind 之间存在竞态窗口
//! （其他进程可能抢先占用），这是已知限制：此时子进程会在就绪前退出，Start 返回 Launch 错误，
//! 下次 Start 会重新探测。

use std::net::{Ipv4Addr, TcpListener};

use crate::core::{EngineError, Result};

/// 返回 >= `base` 的第一个可 bind 的端口
///
/// aria2c 以 `--rpc-listen-all=true` 监听所有网卡，因此在 0.0.0.0 上探测。
pub fn find_available_port(base: u16) -> Result<u16> {
    let mut port = base;
    loop {
        if is_port_free(port) {
            return Ok(port);
        }
        tracing::debug!(port, "port in use, trying next");
        port = port.checked_add(1).ok_or(EngineError::NoFreePort(base))?;
    }
}

fn is_port_free(port: u16) -> bool {
    // listener 在作用域结束时释放
    TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).is_ok()
}
