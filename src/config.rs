//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `ARIA2_SIDECAR__*` 覆盖（双下划线表示嵌套，如 `ARIA2_SIDECAR__ENGINE__BASE_PORT=16800`）。
//! aria2c 的命令行参数是固定的，不在配置范围内。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub rpc: RpcSection,
    #[serde(default)]
    pub download: DownloadSection,
}

/// [engine] 段：可执行文件来源、端口起点、就绪等待
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// 端口探测起点
    pub base_port: u16,
    /// 直接使用的 aria2c 路径；设置后忽略 bundle_dir
    pub binary_path: Option<PathBuf>,
    /// 存放 aria2c-linux / aria2c-darwin / aria2c.exe 的目录
    pub bundle_dir: Option<PathBuf>,
    /// 安装目录，未设置时用平台用户数据目录下的 aria2/
    pub install_dir: Option<PathBuf>,
    pub ready_timeout_ms: u64,
    pub probe_interval_ms: u64,
    pub dial_timeout_ms: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            base_port: 6800,
            binary_path: None,
            bundle_dir: None,
            install_dir: None,
            ready_timeout_ms: 10_000,
            probe_interval_ms: 100,
            dial_timeout_ms: 1_000,
        }
    }
}

/// [rpc] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RpcSection {
    /// 单次 JSON-RPC 调用超时（秒）
    pub timeout_secs: u64,
}

impl Default for RpcSection {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

/// [download] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadSection {
    /// 状态轮询间隔（毫秒）
    pub poll_interval_ms: u64,
}

impl Default for DownloadSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
        }
    }
}

/// 从 config 目录加载配置，环境变量 ARIA2_SIDECAR__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 ARIA2_SIDECAR__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("ARIA2_SIDECAR")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
