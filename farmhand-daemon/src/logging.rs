use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{io_err, DaemonError};
use crate::log_rotation::rotate_if_needed;

/// The wrapper's own log file and its rotation limits.
#[derive(Debug, Clone)]
pub struct LogFile {
    pub path: PathBuf,
    pub max_bytes: u64,
    pub max_backups: usize,
}

/// Map a config `log_level` (Python-style names) to a tracing directive.
pub fn level_directive(log_level: &str) -> &'static str {
    match log_level.trim().to_ascii_uppercase().as_str() {
        "NOTSET" | "TRACE" => "trace",
        "DEBUG" => "debug",
        "WARNING" | "WARN" => "warn",
        "ERROR" | "CRITICAL" => "error",
        _ => "info",
    }
}

/// Install the global subscriber: stdout plus, when given, an append-only
/// log file rotated beforehand. `RUST_LOG` overrides `log_level`.
///
/// A second call in the same process leaves the first subscriber in place.
pub fn init_tracing(log_level: &str, log_file: Option<&LogFile>) -> Result<(), DaemonError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_directive(log_level)));

    let mut rotation = None;
    let file_layer = match log_file {
        Some(log) => {
            if let Some(dir) = log.path.parent() {
                fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
            }
            rotation = Some(rotate_if_needed(&log.path, log.max_bytes, log.max_backups));
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log.path)
                .map_err(|e| io_err(&log.path, e))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .with(file_layer)
        .try_init()
        .is_ok();
    if !installed {
        tracing::debug!("tracing subscriber already installed");
    }

    if let (Some(log), Some(rotated)) = (log_file, rotation) {
        match rotated {
            Ok(true) => tracing::info!(path = %log.path.display(), "log file rotated"),
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(path = %log.path.display(), error = %err, "log rotation failed")
            }
        }
    }
    Ok(())
}
