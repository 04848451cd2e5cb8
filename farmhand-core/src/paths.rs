use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub const ROOT_ENV: &str = "FARMHAND_ROOT";
pub const IMPORT_ROOT_ENV: &str = "CHIA_ROOT";
pub const DEFAULT_CONFIG_FILE: &str = "farmhand.yaml";
pub const DAEMON_CONFIG_FILE: &str = "config.yaml";
pub const LOG_FILE: &str = "farmhand.log";

/// `$FARMHAND_ROOT`, or `~/.farmhand/mainnet`.
pub fn root_path() -> Result<PathBuf, ConfigError> {
    if let Some(root) = std::env::var_os(ROOT_ENV) {
        return Ok(expand_home(Path::new(&root)));
    }
    let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
    Ok(default_root_at(&home))
}

pub fn default_root_at(home: &Path) -> PathBuf {
    home.join(".farmhand").join("mainnet")
}

/// Root of an existing daemon install whose config is imported on first run:
/// `$CHIA_ROOT`, or `~/.chia/mainnet`.
pub fn import_root() -> Option<PathBuf> {
    if let Some(root) = std::env::var_os(IMPORT_ROOT_ENV) {
        return Some(expand_home(Path::new(&root)));
    }
    dirs::home_dir().map(|home| default_import_root_at(&home))
}

pub fn default_import_root_at(home: &Path) -> PathBuf {
    home.join(".chia").join("mainnet")
}

/// `farmhand.yaml` directly under the root, unless overridden with `-c`.
pub fn farmer_config_path(root: &Path) -> PathBuf {
    root.join(DEFAULT_CONFIG_FILE)
}

pub fn daemon_config_dir(root: &Path) -> PathBuf {
    root.join("config")
}

pub fn daemon_config_path(root: &Path) -> PathBuf {
    daemon_config_dir(root).join(DAEMON_CONFIG_FILE)
}

/// Certificates the daemon's config points at by default.
pub fn ssl_dir(root: &Path) -> PathBuf {
    daemon_config_dir(root).join("ssl")
}

pub fn logs_dir(root: &Path) -> PathBuf {
    root.join("log")
}

pub fn log_file_path(root: &Path) -> PathBuf {
    logs_dir(root).join(LOG_FILE)
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}
