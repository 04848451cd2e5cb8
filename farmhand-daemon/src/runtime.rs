use std::path::PathBuf;
use std::time::Duration;

use farmhand_core::{ensure_configs, paths, services_for_groups};

use crate::error::{io_err, DaemonError};
use crate::launcher::ProcessLauncher;
use crate::lifecycle::{
    platform_trigger, spawn_shutdown_trigger, Controller, ControllerOptions, RunSummary,
};
use crate::logging::{init_tracing, LogFile};
use crate::protocol::WebSocketConnector;
use crate::relay;
use crate::supervisor::{RetryPolicy, TerminalPassphrase};

/// A blocked passphrase prompt can't be cancelled; don't wait on it at exit.
const BLOCKING_SHUTDOWN_GRACE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub root: PathBuf,
    pub config_path: PathBuf,
}

/// Run the wrapper on a single-threaded runtime until it has shut down.
pub fn start_blocking(options: RunOptions) -> Result<RunSummary, DaemonError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    let result = runtime.block_on(run(options));
    runtime.shutdown_timeout(BLOCKING_SHUTDOWN_GRACE);
    result
}

/// Reconcile configs, start logging and the relay, then hand over to the
/// lifecycle controller.
pub async fn run(options: RunOptions) -> Result<RunSummary, DaemonError> {
    let RunOptions { root, config_path } = options;
    let (config, daemon_config) = ensure_configs(&root, &config_path)?;

    init_tracing(
        &config.log_level,
        Some(&LogFile {
            path: paths::log_file_path(&root),
            max_bytes: config.log_max_bytes_rotation,
            max_backups: config.log_max_files_rotation,
        }),
    )?;
    tracing::info!(
        root = %root.display(),
        config = %config_path.display(),
        "farmhand starting"
    );

    let endpoint = daemon_config.endpoint()?;
    let tls = daemon_config.tls_files(&root);
    if tls.is_none() {
        tracing::debug!("no daemon certificate configured, using a plain control socket");
    }
    let relay = relay::serve(&config.syslog_host, config.syslog_port).await?;
    tracing::info!(addr = %relay.local_addr(), "syslog relay listening");

    let services = services_for_groups(&config.service_groups());
    let options = ControllerOptions {
        services,
        retry: RetryPolicy::from_timeout(Duration::from_secs(config.daemon_start_timeout_secs)),
        shutdown_timeout: Duration::from_secs(config.shutdown_timeout_secs),
    };
    let launcher = ProcessLauncher::from_config(&root, &config);
    if launcher.is_none() {
        tracing::debug!("no daemon_binary configured, can only attach to a running daemon");
    }
    let (controller, stop_tx) = Controller::new(
        WebSocketConnector::new(endpoint, tls),
        launcher,
        TerminalPassphrase::default(),
        options,
    );
    let mut controller = controller.with_relay(relay);
    let trigger = spawn_shutdown_trigger(platform_trigger()?, stop_tx);

    let result = controller.run().await;
    trigger.abort();
    match &result {
        Ok(summary) => {
            let failed = summary.started.iter().filter(|r| r.is_failure()).count();
            tracing::info!(
                services = summary.started.len(),
                failed,
                started_by_us = summary.started_by_us,
                shutdown_timed_out = summary.shutdown_timed_out,
                "farmhand stopped"
            );
        }
        Err(err) => tracing::error!(error = %err, "farmhand stopped with error"),
    }
    result
}
