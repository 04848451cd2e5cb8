//! `farmhand stop`

use std::time::Duration;

use anyhow::{Context, Result};

use farmhand_daemon::supervisor::request_exit;
use farmhand_daemon::{DaemonConnector, DaemonControl};

use super::{block_on, connect, FarmPaths};

pub fn run(paths: &FarmPaths) -> Result<()> {
    let config = paths.farmer_config()?;
    let connector = paths.daemon_connector()?;
    let timeout = Duration::from_secs(config.shutdown_timeout_secs);

    block_on(async {
        let Some(mut connection) = connect(&connector).await? else {
            println!("daemon is not running ({})", connector.describe());
            return Ok(());
        };
        let reply = request_exit(&mut connection, timeout)
            .await
            .context("failed to stop daemon")?;
        // The daemon may already have dropped the connection.
        let _ = connection.close().await;

        if reply.success {
            println!("daemon stopped");
        } else {
            println!("daemon did not confirm exit");
        }
        for service in reply.services_stopped {
            println!("  stopped {service}");
        }
        Ok::<_, anyhow::Error>(())
    })?
}
