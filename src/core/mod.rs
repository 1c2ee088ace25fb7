//! 核心层：错误、端口探测、可执行文件准备、aria2c 进程监管

pub mod error;
pub mod port;
pub mod provision;
pub mod supervisor;

pub use error::{EngineError, Result};
pub use port::find_available_port;
pub use provision::{default_install_dir, BinaryProvisioner, BundledBinary, FixedBinary};
pub use supervisor::{
    build_args, EngineHost, EngineSession, ProcessSupervisor, SupervisorConfig, SupervisorPhase,
};
