//! Domain types for the farmhand configuration.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.
//! All types are serializable/deserializable via serde + serde_yaml.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed name for a daemon-managed service (e.g. `chia_farmer`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceName(pub String);

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ServiceName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ServiceName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Tuning
// ---------------------------------------------------------------------------

/// Recompute hosts may be written as a single comma-separated string or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecomputeHosts {
    One(String),
    Many(Vec<String>),
}

impl Default for RecomputeHosts {
    fn default() -> Self {
        RecomputeHosts::Many(Vec::new())
    }
}

impl RecomputeHosts {
    /// Value for the recompute host variable, `None` when nothing is configured.
    pub fn joined(&self) -> Option<String> {
        match self {
            RecomputeHosts::One(host) if host.is_empty() => None,
            RecomputeHosts::One(host) => Some(host.clone()),
            RecomputeHosts::Many(hosts) if hosts.is_empty() => None,
            RecomputeHosts::Many(hosts) => Some(hosts.join(",")),
        }
    }
}

/// Device and performance knobs handed to the daemon through its environment.
///
/// Each key is optional. An absent key must not produce an environment
/// variable at all, so the daemon keeps its own default.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DaemonTuning {
    #[serde(default)]
    pub recompute_hosts: RecomputeHosts,
    #[serde(default, deserialize_with = "scalar_string", skip_serializing_if = "Option::is_none")]
    pub chiapos_max_cores: Option<String>,
    #[serde(default, deserialize_with = "scalar_string", skip_serializing_if = "Option::is_none")]
    pub chiapos_max_cuda_devices: Option<String>,
    #[serde(default, deserialize_with = "scalar_string", skip_serializing_if = "Option::is_none")]
    pub chiapos_max_opencl_devices: Option<String>,
    #[serde(default, deserialize_with = "scalar_string", skip_serializing_if = "Option::is_none")]
    pub chiapos_max_gpu_devices: Option<String>,
    #[serde(default, deserialize_with = "scalar_string", skip_serializing_if = "Option::is_none")]
    pub chiapos_opencl_platform: Option<String>,
    #[serde(default, deserialize_with = "scalar_string", skip_serializing_if = "Option::is_none")]
    pub chiapos_min_gpu_log_entries: Option<String>,
    #[serde(default, deserialize_with = "scalar_string", skip_serializing_if = "Option::is_none")]
    pub cuda_visible_devices: Option<String>,
}

/// Accepts strings, numbers and booleans; `null` becomes `None`.
fn scalar_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Option::<serde_yaml::Value>::deserialize(deserializer)? {
        None | Some(serde_yaml::Value::Null) => Ok(None),
        Some(serde_yaml::Value::String(s)) => Ok(Some(s)),
        Some(serde_yaml::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(serde_yaml::Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "expected a scalar value, found {other:?}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Farmer config
// ---------------------------------------------------------------------------

/// The user-facing `farmhand.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FarmerConfig {
    #[serde(default)]
    pub plot_directories: Vec<PathBuf>,
    #[serde(default = "default_plot_refresh_interval")]
    pub plot_refresh_interval_seconds: u64,
    #[serde(default = "default_harvester_threads")]
    pub harvester_num_threads: u32,
    #[serde(default)]
    pub farmer_reward_address: String,
    #[serde(default)]
    pub pool_payout_address: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_loopback")]
    pub listen_host: String,
    #[serde(default = "default_true")]
    pub enable_harvester: bool,

    #[serde(flatten)]
    pub tuning: DaemonTuning,

    /// Daemon executable. There is no download step; it must be provided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daemon_binary: Option<PathBuf>,
    #[serde(default = "default_daemon_args")]
    pub daemon_args: Vec<String>,

    #[serde(default = "default_loopback")]
    pub syslog_host: String,
    #[serde(default = "default_syslog_port")]
    pub syslog_port: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_node_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_node_port: Option<u16>,

    #[serde(default = "default_start_timeout")]
    pub daemon_start_timeout_secs: u64,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    #[serde(default = "default_log_max_bytes")]
    pub log_max_bytes_rotation: u64,
    #[serde(default = "default_log_max_files")]
    pub log_max_files_rotation: usize,
}

pub const DEFAULT_SYSLOG_PORT: u16 = 11514;

fn default_plot_refresh_interval() -> u64 {
    3600
}
fn default_harvester_threads() -> u32 {
    30
}
fn default_log_level() -> String {
    "INFO".to_string()
}
fn default_loopback() -> String {
    "127.0.0.1".to_string()
}
fn default_true() -> bool {
    true
}
fn default_daemon_args() -> Vec<String> {
    vec!["run_daemon".to_string(), "--wait-for-unlock".to_string()]
}
fn default_syslog_port() -> u16 {
    DEFAULT_SYSLOG_PORT
}
fn default_start_timeout() -> u64 {
    30
}
fn default_shutdown_timeout() -> u64 {
    10
}
fn default_log_max_bytes() -> u64 {
    50 * 1024 * 1024
}
fn default_log_max_files() -> usize {
    7
}

impl Default for FarmerConfig {
    fn default() -> Self {
        Self {
            plot_directories: Vec::new(),
            plot_refresh_interval_seconds: default_plot_refresh_interval(),
            harvester_num_threads: default_harvester_threads(),
            farmer_reward_address: String::new(),
            pool_payout_address: String::new(),
            log_level: default_log_level(),
            listen_host: default_loopback(),
            enable_harvester: true,
            tuning: DaemonTuning::default(),
            daemon_binary: None,
            daemon_args: default_daemon_args(),
            syslog_host: default_loopback(),
            syslog_port: DEFAULT_SYSLOG_PORT,
            upstream_node_host: None,
            upstream_node_port: None,
            daemon_start_timeout_secs: default_start_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            log_max_bytes_rotation: default_log_max_bytes(),
            log_max_files_rotation: default_log_max_files(),
        }
    }
}

impl FarmerConfig {
    /// Service groups started by `run`, in start order.
    pub fn service_groups(&self) -> Vec<&'static str> {
        let mut groups = vec!["farmer-only"];
        if self.enable_harvester {
            groups.push("harvester");
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: FarmerConfig = serde_yaml::from_str("{}").expect("parse");
        assert_eq!(config, FarmerConfig::default());
        assert_eq!(config.syslog_port, 11514);
        assert_eq!(config.daemon_args, ["run_daemon", "--wait-for-unlock"]);
    }

    #[test]
    fn numeric_tuning_values_are_stringified() {
        let config: FarmerConfig =
            serde_yaml::from_str("chiapos_max_cores: 8\ncuda_visible_devices: \"0,1\"\n")
                .expect("parse");
        assert_eq!(config.tuning.chiapos_max_cores.as_deref(), Some("8"));
        assert_eq!(config.tuning.cuda_visible_devices.as_deref(), Some("0,1"));
        assert_eq!(config.tuning.chiapos_max_gpu_devices, None);
    }

    #[test]
    fn tuning_rejects_nested_values() {
        let err = serde_yaml::from_str::<FarmerConfig>("chiapos_max_cores: [1, 2]\n");
        assert!(err.is_err());
    }

    #[test]
    fn recompute_hosts_accepts_string_or_list() {
        let single: FarmerConfig =
            serde_yaml::from_str("recompute_hosts: 10.0.0.5\n").expect("parse");
        assert_eq!(single.tuning.recompute_hosts.joined().as_deref(), Some("10.0.0.5"));

        let many: FarmerConfig =
            serde_yaml::from_str("recompute_hosts: [a, b]\n").expect("parse");
        assert_eq!(many.tuning.recompute_hosts.joined().as_deref(), Some("a,b"));

        assert_eq!(RecomputeHosts::default().joined(), None);
    }

    #[test]
    fn service_groups_follow_harvester_flag() {
        let mut config = FarmerConfig::default();
        assert_eq!(config.service_groups(), ["farmer-only", "harvester"]);
        config.enable_harvester = false;
        assert_eq!(config.service_groups(), ["farmer-only"]);
    }
}
