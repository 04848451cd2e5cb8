pub mod init;
pub mod run;
pub mod status;
pub mod stop;

use std::future::Future;
use std::path::PathBuf;

use anyhow::{Context, Result};

use farmhand_core::{farmer_config, paths, DaemonConfig, FarmerConfig};
use farmhand_daemon::{DaemonConnection, DaemonConnector, WebSocketConnector};

/// Where this invocation reads and writes its files.
#[derive(Debug, Clone)]
pub struct FarmPaths {
    pub root: PathBuf,
    pub config: PathBuf,
}

impl FarmPaths {
    pub fn resolve(config: Option<PathBuf>) -> Result<Self> {
        let root = paths::root_path().context("could not determine farmhand root directory")?;
        let config = config.unwrap_or_else(|| paths::farmer_config_path(&root));
        Ok(Self { root, config })
    }

    /// Farmer config if present, defaults otherwise. Never writes.
    pub fn farmer_config(&self) -> Result<FarmerConfig> {
        if !farmer_config::has_config(&self.config) {
            return Ok(FarmerConfig::default());
        }
        farmer_config::load_at(&self.config)
            .with_context(|| format!("failed to load {}", self.config.display()))
    }

    /// Control socket of the daemon this root is configured for.
    pub fn daemon_connector(&self) -> Result<WebSocketConnector> {
        let daemon = DaemonConfig::load_at(&self.root)
            .context("failed to load daemon config; run `farmhand init` first")?;
        let endpoint = daemon
            .endpoint()
            .context("daemon config has no usable endpoint")?;
        Ok(WebSocketConnector::new(endpoint, daemon.tls_files(&self.root)))
    }
}

/// Run one future on a throwaway single-threaded runtime.
pub fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    Ok(runtime.block_on(future))
}

/// `Ok(None)` when no daemon answers.
pub async fn connect(connector: &WebSocketConnector) -> Result<Option<DaemonConnection>> {
    connector
        .connect()
        .await
        .with_context(|| format!("failed to connect to daemon at {}", connector.describe()))
}
