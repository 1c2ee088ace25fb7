//! aria2c 可执行文件准备
//!
//! - `FixedBinary`：直接使用给定路径（必须存在）
//! - `BundledBinary`：从随应用分发的目录中，按平台拷贝 aria2c 到用户数据目录；已存在则复用

use std::path::{Path, PathBuf};

use crate::core::{EngineError, Result};

/// 保证本机存在可运行的 aria2c，并返回其路径
pub trait BinaryProvisioner: Send + Sync {
    fn provision(&self) -> Result<PathBuf>;
}

/// 使用固定路径的 aria2c
#[derive(Debug, Clone)]
pub struct FixedBinary {
    path: PathBuf,
}

impl FixedBinary {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl BinaryProvisioner for FixedBinary {
    fn provision(&self) -> Result<PathBuf> {
        if self.path.is_file() {
            Ok(self.path.clone())
        } else {
            Err(EngineError::Provision(format!(
                "aria2c not found at {}",
                self.path.display()
            )))
        }
    }
}

/// 按平台从 bundle 目录拷贝 aria2c 到安装目录
#[derive(Debug, Clone)]
pub struct BundledBinary {
    bundle_dir: PathBuf,
    install_dir: PathBuf,
}

/// 当前平台的 (bundle 内文件名, 安装后文件名)
fn platform_names() -> Result<(&'static str, &'static str)> {
    match std::env::consts::OS {
        "windows" => Ok(("aria2c.exe", "aria2c.exe")),
        "linux" => Ok(("aria2c-linux", "aria2c")),
        "macos" => Ok(("aria2c-darwin", "aria2c")),
        other => Err(EngineError::Provision(format!("Unsupported platform: {other}"))),
    }
}

impl BundledBinary {
    pub fn new(bundle_dir: impl Into<PathBuf>, install_dir: impl Into<PathBuf>) -> Self {
        Self {
            bundle_dir: bundle_dir.into(),
            install_dir: install_dir.into(),
        }
    }

    /// 安装目录使用平台默认的用户数据目录
    pub fn with_default_install_dir(bundle_dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::new(bundle_dir, default_install_dir()?))
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }
}

impl BinaryProvisioner for BundledBinary {
    fn provision(&self) -> Result<PathBuf> {
        let (bundled_name, installed_name) = platform_names()?;
        let target = self.install_dir.join(installed_name);
        if target.is_file() {
            return Ok(target);
        }

        let source = self.bundle_dir.join(bundled_name);
        let data = std::fs::read(&source).map_err(|e| {
            EngineError::Provision(format!("Failed to read {}: {e}", source.display()))
        })?;
        // 未下载真实二进制时 bundle 里只有占位文件
        if data.len() <= 2 {
            return Err(EngineError::Provision(format!(
                "{} is a placeholder, fetch the real aria2c binary first",
                source.display()
            )));
        }

        std::fs::create_dir_all(&self.install_dir).map_err(|e| {
            EngineError::Provision(format!(
                "Failed to create {}: {e}",
                self.install_dir.display()
            ))
        })?;
        std::fs::write(&target, &data).map_err(|e| {
            EngineError::Provision(format!("Failed to write {}: {e}", target.display()))
        })?;
        make_executable(&target)?;

        tracing::info!(path = %target.display(), "aria2c installed");
        Ok(target)
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .map_err(|e| EngineError::Provision(format!("chmod {}: {e}", path.display())))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// 平台默认的用户数据目录下的 `aria2` 子目录
///
/// - Windows: `%LOCALAPPDATA%\aria2`（缺失时回退到 `~\AppData\Local`）
/// - macOS: `~/Library/Application Support/aria2`
/// - Linux: `$XDG_DATA_HOME/aria2`，否则 `~/.local/share/aria2`
pub fn default_install_dir() -> Result<PathBuf> {
    let non_empty = |key: &str| std::env::var_os(key).filter(|v| !v.is_empty()).map(PathBuf::from);
    let home = || {
        non_empty("HOME")
            .or_else(|| non_empty("USERPROFILE"))
            .ok_or_else(|| EngineError::Provision("Cannot determine home directory".to_string()))
    };

    let base = match std::env::consts::OS {
        "windows" => match non_empty("LOCALAPPDATA") {
            Some(dir) => dir,
            None => home()?.join("AppData").join("Local"),
        },
        "macos" => home()?.join("Library").join("Application Support"),
        "linux" => match non_empty("XDG_DATA_HOME") {
            Some(dir) => dir,
            None => home()?.join(".local").join("share"),
        },
        other => return Err(EngineError::Provision(format!("Unsupported platform: {other}"))),
    };
    Ok(base.join("aria2"))
}
