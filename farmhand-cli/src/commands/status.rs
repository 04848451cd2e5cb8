//! `farmhand status` — daemon and service visibility.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use farmhand_core::{services_for_groups, ServiceName};
use farmhand_daemon::{DaemonConnector, DaemonControl, WebSocketConnector};

use super::{block_on, connect, FarmPaths};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    running: bool,
    endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    keyring_locked: Option<bool>,
    services: Vec<ServiceStatus>,
}

#[derive(Debug, Serialize)]
struct ServiceStatus {
    service: String,
    running: bool,
}

#[derive(Tabled)]
struct ServiceRow {
    #[tabled(rename = "service")]
    service: String,
    #[tabled(rename = "state")]
    state: &'static str,
}

impl StatusArgs {
    pub fn run(self, paths: &FarmPaths) -> Result<()> {
        let config = paths.farmer_config()?;
        let connector = paths.daemon_connector()?;
        let services = services_for_groups(&config.service_groups());

        let report = block_on(query(&connector, &services))??;
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize status JSON")?
            );
        } else {
            print_table(&report);
        }
        Ok(())
    }
}

async fn query(connector: &WebSocketConnector, services: &[ServiceName]) -> Result<StatusReport> {
    let mut report = StatusReport {
        running: false,
        endpoint: connector.describe(),
        keyring_locked: None,
        services: Vec::new(),
    };
    let Some(mut connection) = connect(connector).await? else {
        return Ok(report);
    };
    report.running = true;
    report.keyring_locked = Some(
        connection
            .is_keyring_locked()
            .await
            .context("keyring status query failed")?,
    );
    for service in services {
        let running = connection
            .is_running(service)
            .await
            .with_context(|| format!("status query for {service} failed"))?;
        report.services.push(ServiceStatus {
            service: service.0.clone(),
            running,
        });
    }
    connection.close().await.context("failed to close daemon connection")?;
    Ok(report)
}

fn print_table(report: &StatusReport) {
    if !report.running {
        println!("daemon is not running ({})", report.endpoint);
        return;
    }
    let keyring = match report.keyring_locked {
        Some(true) => "locked".yellow().to_string(),
        _ => "unlocked".green().to_string(),
    };
    println!(
        "farmhand v{} | daemon {} at {} | keyring {}",
        env!("CARGO_PKG_VERSION"),
        "running".green(),
        report.endpoint,
        keyring,
    );
    let rows: Vec<ServiceRow> = report
        .services
        .iter()
        .map(|s| ServiceRow {
            service: s.service.clone(),
            state: if s.running { "running" } else { "stopped" },
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}
