//! `farmhand init`

use anyhow::{Context, Result};
use colored::Colorize;

use farmhand_core::paths::daemon_config_path;
use farmhand_core::{ensure_configs, services_for_groups};

use super::FarmPaths;

pub fn run(paths: &FarmPaths) -> Result<()> {
    let (farmer, daemon) = ensure_configs(&paths.root, &paths.config)
        .with_context(|| format!("failed to prepare configs under {}", paths.root.display()))?;
    let endpoint = daemon.endpoint().context("daemon config has no usable endpoint")?;

    println!("{} farmer config: {}", "✓".green(), paths.config.display());
    println!(
        "{} daemon config: {}",
        "✓".green(),
        daemon_config_path(&paths.root).display()
    );
    println!("  daemon endpoint: {endpoint}");
    println!("  syslog relay:    {}:{}", farmer.syslog_host, farmer.syslog_port);
    let services: Vec<String> = services_for_groups(&farmer.service_groups())
        .into_iter()
        .map(|s| s.0)
        .collect();
    println!("  services:        {}", services.join(", "));
    if farmer.daemon_binary.is_none() {
        println!(
            "  {} no daemon_binary set; `farmhand run` can only attach to a running daemon",
            "!".yellow()
        );
    }
    Ok(())
}
