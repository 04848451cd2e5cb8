use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Error surface for the relay, the daemon client and lifecycle supervision.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Config(#[from] farmhand_core::ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("daemon unavailable at {endpoint} after {attempts} connection attempts")]
    DaemonUnavailable { endpoint: String, attempts: u32 },

    #[error("no daemon binary configured; set `daemon_binary` in the farmer config")]
    NoDaemonBinary,

    #[error("failed to spawn daemon {binary}: {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("keyring unlock failed: {0}")]
    Keyring(String),

    #[error("daemon did not confirm shutdown within {0:?}")]
    ShutdownTimedOut(Duration),

    #[error("interrupted by stop request")]
    Interrupted,

    #[error("signal handler failed: {0}")]
    Signal(String),

    #[error("invalid lifecycle transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: crate::lifecycle::LifecycleState,
        to: crate::lifecycle::LifecycleState,
    },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
