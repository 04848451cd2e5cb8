//! Spawning the daemon process.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use farmhand_core::{DaemonTuning, FarmerConfig};

use crate::error::DaemonError;

/// Variable the daemon reads its root directory from.
pub const ROOT_ENV_VAR: &str = "CHIA_ROOT";

/// Default wait for the daemon's first line of output.
pub const READINESS_TIMEOUT: Duration = Duration::from_secs(5);

/// Environment for the daemon process.
///
/// Only configured keys produce a variable; an unset key must leave the
/// daemon's own default in place rather than override it with an empty value.
pub fn env_overlay(root: &Path, tuning: &DaemonTuning) -> Vec<(&'static str, String)> {
    let mut env = vec![(ROOT_ENV_VAR, root.display().to_string())];
    if let Some(hosts) = tuning.recompute_hosts.joined() {
        env.push(("CHIAPOS_RECOMPUTE_HOST", hosts));
    }
    let optional = [
        ("CHIAPOS_MAX_CORES", &tuning.chiapos_max_cores),
        ("CHIAPOS_MAX_CUDA_DEVICES", &tuning.chiapos_max_cuda_devices),
        ("CHIAPOS_MAX_OPENCL_DEVICES", &tuning.chiapos_max_opencl_devices),
        ("CHIAPOS_MAX_GPU_DEVICES", &tuning.chiapos_max_gpu_devices),
        ("CHIAPOS_OPENCL_PLATFORM", &tuning.chiapos_opencl_platform),
        ("CHIAPOS_MIN_GPU_LOG_ENTRIES", &tuning.chiapos_min_gpu_log_entries),
        ("CUDA_VISIBLE_DEVICES", &tuning.cuda_visible_devices),
    ];
    for (name, value) in optional {
        if let Some(value) = value {
            env.push((name, value.clone()));
        }
    }
    env
}

/// Starts the daemon and waits until it is plausibly listening.
pub trait DaemonLauncher: Send + Sync {
    fn launch(&self) -> impl Future<Output = Result<(), DaemonError>> + Send;
}

/// A missing launcher only matters once nothing is listening.
impl<L: DaemonLauncher> DaemonLauncher for Option<L> {
    async fn launch(&self) -> Result<(), DaemonError> {
        match self {
            Some(launcher) => launcher.launch().await,
            None => Err(DaemonError::NoDaemonBinary),
        }
    }
}

/// Launches the configured daemon binary as a child process.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    pub binary: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(&'static str, String)>,
    pub readiness_timeout: Duration,
}

impl ProcessLauncher {
    /// `None` when no `daemon_binary` is configured.
    pub fn from_config(root: &Path, config: &FarmerConfig) -> Option<Self> {
        let binary = config.daemon_binary.clone()?;
        Some(Self {
            binary,
            args: config.daemon_args.clone(),
            env: env_overlay(root, &config.tuning),
            readiness_timeout: READINESS_TIMEOUT,
        })
    }

    /// The binary's directory, which is also the daemon's working directory.
    fn working_dir(&self) -> Option<&Path> {
        self.binary.parent().filter(|p| !p.as_os_str().is_empty())
    }
}

impl DaemonLauncher for ProcessLauncher {
    async fn launch(&self) -> Result<(), DaemonError> {
        let mut command = Command::new(&self.binary);
        command
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (*k, v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(false);
        if let Some(dir) = self.working_dir() {
            command.current_dir(dir);
        }
        #[cfg(windows)]
        {
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            command.creation_flags(CREATE_NEW_PROCESS_GROUP | CREATE_NO_WINDOW);
        }

        let mut child = command.spawn().map_err(|source| DaemonError::Spawn {
            binary: self.binary.clone(),
            source,
        })?;
        tracing::info!(binary = %self.binary.display(), pid = ?child.id(), "started daemon");

        match child.stdout.take() {
            Some(stdout) => {
                let mut lines = BufReader::new(stdout).lines();
                match tokio::time::timeout(self.readiness_timeout, lines.next_line()).await {
                    Ok(Ok(Some(line))) => tracing::debug!(%line, "daemon readiness line"),
                    Ok(Ok(None)) => tracing::warn!("daemon closed stdout before reporting readiness"),
                    Ok(Err(err)) => tracing::warn!(error = %err, "reading daemon stdout failed"),
                    Err(_) => tracing::debug!(
                        timeout = ?self.readiness_timeout,
                        "no readiness line from daemon, continuing"
                    ),
                }
                // Keep draining so the daemon never blocks on a full pipe.
                tokio::spawn(async move {
                    while let Ok(Some(line)) = lines.next_line().await {
                        tracing::trace!(target: "daemon", %line, "daemon stdout");
                    }
                });
            }
            None => tokio::time::sleep(Duration::from_secs(1)).await,
        }

        // The daemon outlives this handle; reap it in the background if it exits.
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => tracing::info!(%status, "daemon process exited"),
                Err(err) => tracing::warn!(error = %err, "waiting on daemon process failed"),
            }
        });
        Ok(())
    }
}
