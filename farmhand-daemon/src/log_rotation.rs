//! Size-based rotation of the wrapper's own log file.
//!
//! Runs once at startup, before the file is opened for appending:
//! `farmhand.log` → `farmhand.log.1` → … → `farmhand.log.N`, oldest dropped.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Rotate `log_path` when it has reached `max_bytes`.
///
/// Keeps `max_backups` numbered copies; with zero backups the oversized log
/// is simply removed. Returns whether a rotation happened. A missing log is
/// not an error.
pub fn rotate_if_needed(log_path: &Path, max_bytes: u64, max_backups: usize) -> io::Result<bool> {
    let size = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if size < max_bytes {
        return Ok(false);
    }
    if max_backups == 0 {
        fs::remove_file(log_path)?;
        return Ok(true);
    }

    remove_if_exists(&backup_path(log_path, max_backups))?;
    for n in (1..max_backups).rev() {
        let from = backup_path(log_path, n);
        if from.exists() {
            fs::rename(&from, backup_path(log_path, n + 1))?;
        }
    }
    fs::rename(log_path, backup_path(log_path, 1))?;
    Ok(true)
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

/// `farmhand.log` + 2 → `farmhand.log.2`.
fn backup_path(base: &Path, n: usize) -> PathBuf {
    let mut name = base.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{n}"));
    base.with_file_name(name)
}
