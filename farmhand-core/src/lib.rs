//! farmhand core library — configuration types, persistence, errors.
//!
//! - [`types`] — farmer config, daemon tuning, service names
//! - [`farmer_config`] — load / save of the farmer YAML file
//! - [`daemon_config`] — consistency patching of the daemon's own config
//! - [`service_groups`] — group name → service names
//! - [`address`] — reward address → puzzle hash
//! - [`paths`] — root directory layout

pub mod address;
pub mod daemon_config;
pub mod error;
pub mod farmer_config;
pub mod paths;
pub mod service_groups;
pub mod types;

pub use daemon_config::{
    ensure_configs, ensure_configs_importing, DaemonConfig, DaemonEndpoint, DaemonTlsFiles,
};
pub use error::ConfigError;
pub use service_groups::services_for_groups;
pub use types::{DaemonTuning, FarmerConfig, RecomputeHosts, ServiceName};
