//! Error types for farmhand-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from configuration handling.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure (permission denied, read-only fs, etc.).
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load, with the location reported by serde_yaml.
    #[error("failed to parse {path}{location}: {source}")]
    Parse {
        path: PathBuf,
        location: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None` and `$FARMHAND_ROOT` is unset.
    #[error("cannot determine home directory; set $HOME or $FARMHAND_ROOT")]
    HomeNotFound,

    /// The daemon config did not exist at the expected path.
    #[error("daemon config not found at {path}")]
    NotFound { path: PathBuf },

    /// A key the wrapper relies on is missing or has the wrong shape.
    #[error("daemon config key '{key}' is missing or not a {expected}")]
    InvalidKey { key: String, expected: &'static str },

    /// A payout address that is not a bech32m-encoded puzzle hash.
    #[error("invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn parse_err(path: impl Into<PathBuf>, source: serde_yaml::Error) -> ConfigError {
    let location = source
        .location()
        .map(|loc| format!(" (line={}, column={})", loc.line(), loc.column()))
        .unwrap_or_default();
    ConfigError::Parse {
        path: path.into(),
        location,
        source,
    }
}
