//! `farmhand run` — the long-running foreground process.

use anyhow::{Context, Result};

use farmhand_daemon::{start_blocking, RunOptions};

use super::FarmPaths;

pub fn run(paths: &FarmPaths) -> Result<()> {
    let summary = start_blocking(RunOptions {
        root: paths.root.clone(),
        config_path: paths.config.clone(),
    })
    .context("farmhand exited with error")?;

    let failed: Vec<_> = summary
        .started
        .iter()
        .filter(|r| r.is_failure())
        .map(|r| r.service.0.as_str())
        .collect();
    if !failed.is_empty() {
        eprintln!("services that failed to start: {}", failed.join(", "));
    }
    if summary.shutdown_timed_out {
        eprintln!("daemon did not confirm exit before the shutdown timeout");
    }
    Ok(())
}
