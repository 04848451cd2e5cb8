//! Persistence of the farmer config (`farmhand.yaml`).
//!
//! # API pattern
//!
//! Every function takes the file path explicitly; callers resolve it from the
//! CLI (`-c/--config`) so tests can point at a `TempDir`.

use std::path::Path;

use crate::error::{io_err, parse_err, ConfigError};
use crate::types::FarmerConfig;

/// Whether a farmer config file exists at `path`.
pub fn has_config(path: &Path) -> bool {
    path.exists()
}

/// Load the farmer config, writing the defaults first if the file is absent.
///
/// Returns `ConfigError::Parse` (with line/column) if the YAML is malformed.
pub fn load_or_create_at(path: &Path) -> Result<FarmerConfig, ConfigError> {
    if !path.exists() {
        save_at(path, &FarmerConfig::default())?;
    }
    load_at(path)
}

/// Load the farmer config from `path`.
pub fn load_at(path: &Path) -> Result<FarmerConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    // An empty file is a valid, all-defaults config.
    if contents.trim().is_empty() {
        return Ok(FarmerConfig::default());
    }
    serde_yaml::from_str(&contents).map_err(|e| parse_err(path, e))
}

/// Atomically save the farmer config to `path`.
///
/// Write flow: serialize → `<name>.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(path: &Path, config: &FarmerConfig) -> Result<(), ConfigError> {
    let yaml = serde_yaml::to_string(config)?;
    write_atomic(path, &yaml)
}

pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "config.yaml".to_string());
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));

    std::fs::write(&tmp_path, contents).map_err(|e| io_err(&tmp_path, e))?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("farmhand.yaml");
        assert!(!has_config(&path));

        let config = load_or_create_at(&path).expect("load");
        assert_eq!(config, FarmerConfig::default());
        assert!(has_config(&path));
    }

    #[test]
    fn save_then_load_keeps_edits() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("farmhand.yaml");
        let mut config = FarmerConfig::default();
        config.harvester_num_threads = 4;
        config.tuning.chiapos_max_cores = Some("12".to_string());
        save_at(&path, &config).expect("save");

        let loaded = load_at(&path).expect("load");
        assert_eq!(loaded.harvester_num_threads, 4);
        assert_eq!(loaded.tuning.chiapos_max_cores.as_deref(), Some("12"));
    }

    #[test]
    fn atomic_write_cleans_up_tmp() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("farmhand.yaml");
        save_at(&path, &FarmerConfig::default()).expect("save");
        assert!(!dir.path().join("farmhand.yaml.tmp").exists());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }
    }

    #[test]
    fn empty_file_loads_as_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("farmhand.yaml");
        std::fs::write(&path, "\n").expect("write");
        assert_eq!(load_at(&path).expect("load"), FarmerConfig::default());
    }
}
