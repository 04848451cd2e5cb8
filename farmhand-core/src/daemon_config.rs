//! The daemon's own `config.yaml`, kept consistent with the farmer config.
//!
//! The file belongs to the daemon and carries many keys this tool never reads,
//! so it is handled as an untyped [`serde_yaml::Value`] tree. Only the keys
//! listed in [`DaemonConfig::ensure_consistent`] are ever rewritten.

use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};

use crate::address::decode_puzzle_hash;
use crate::error::{io_err, parse_err, ConfigError};
use crate::farmer_config::{self, write_atomic};
use crate::paths::{self, daemon_config_path, ssl_dir};
use crate::types::FarmerConfig;

pub const DAEMON_PORT: u16 = 55470;
pub const FARMER_PORT: u16 = 28447;
pub const FARMER_RPC_PORT: u16 = 28559;
pub const HARVESTER_PORT: u16 = 28448;
pub const HARVESTER_RPC_PORT: u16 = 28560;
pub const WALLET_RPC_PORT: u16 = 29256;

/// Where the daemon's control connection listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonEndpoint {
    pub host: String,
    pub port: u16,
}

impl std::fmt::Display for DaemonEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Client certificate, key and CA for the daemon's TLS control socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonTlsFiles {
    pub ca_cert: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    root: Value,
}

impl DaemonConfig {
    pub fn from_value(root: Value) -> Self {
        Self { root }
    }

    pub fn as_value(&self) -> &Value {
        &self.root
    }

    /// Minimal document with every section the wrapper manages.
    pub fn skeleton() -> Self {
        let yaml = format!(
            "\
self_hostname: 127.0.0.1
daemon_port: {DAEMON_PORT}
logging:
  log_level: INFO
  log_stdout: false
  log_syslog: false
farmer:
  port: {FARMER_PORT}
  rpc_port: {FARMER_RPC_PORT}
  xch_target_address: ''
  harvester_peer:
    host: 127.0.0.1
    port: {HARVESTER_PORT}
  full_node_peer:
    host: 127.0.0.1
    port: 8444
harvester:
  port: {HARVESTER_PORT}
  rpc_port: {HARVESTER_RPC_PORT}
  num_threads: 30
  plot_directories: []
  farmer_peer:
    host: 127.0.0.1
    port: {FARMER_PORT}
pool:
  xch_target_address: ''
wallet:
  rpc_port: {WALLET_RPC_PORT}
daemon_ssl:
  private_crt: config/ssl/daemon/private_daemon.crt
  private_key: config/ssl/daemon/private_daemon.key
private_ssl_ca:
  crt: config/ssl/ca/private_ca.crt
  key: config/ssl/ca/private_ca.key
"
        );
        // Static literal, see `skeleton_parses_and_has_endpoint`.
        Self::from_value(serde_yaml::from_str(&yaml).unwrap_or(Value::Mapping(Mapping::new())))
    }

    pub fn load_at(root_path: &Path) -> Result<Self, ConfigError> {
        let path = daemon_config_path(root_path);
        if !path.exists() {
            return Err(ConfigError::NotFound { path });
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        let root: Value = serde_yaml::from_str(&contents).map_err(|e| parse_err(&path, e))?;
        if !root.is_mapping() {
            return Err(ConfigError::InvalidKey {
                key: "<root>".to_string(),
                expected: "mapping",
            });
        }
        Ok(Self { root })
    }

    pub fn save_at(&self, root_path: &Path) -> Result<(), ConfigError> {
        let yaml = serde_yaml::to_string(&self.root)?;
        write_atomic(&daemon_config_path(root_path), &yaml)
    }

    /// `self_hostname:daemon_port`.
    pub fn endpoint(&self) -> Result<DaemonEndpoint, ConfigError> {
        let host = self
            .get(&["self_hostname"])
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("self_hostname", "string"))?
            .to_string();
        let port = self
            .get(&["daemon_port"])
            .and_then(Value::as_u64)
            .and_then(|p| u16::try_from(p).ok())
            .ok_or_else(|| invalid("daemon_port", "port number"))?;
        Ok(DaemonEndpoint { host, port })
    }

    /// TLS material for the control socket, resolved against `root_path`.
    /// `None` when the config names no daemon certificate, which means the
    /// socket is plain.
    pub fn tls_files(&self, root_path: &Path) -> Option<DaemonTlsFiles> {
        let file = |path: &[&str]| {
            self.get(path)
                .and_then(Value::as_str)
                .map(|rel| root_path.join(rel))
        };
        Some(DaemonTlsFiles {
            ca_cert: file(&["private_ssl_ca", "crt"])?,
            cert: file(&["daemon_ssl", "private_crt"])?,
            key: file(&["daemon_ssl", "private_key"])?,
        })
    }

    pub fn farmer_target_address(&self) -> Option<&str> {
        self.get(&["farmer", "xch_target_address"])
            .and_then(Value::as_str)
    }

    /// Make sure `farmer.xch_target_address` and `pool.xch_target_address` exist.
    pub fn ensure_target_address_keys(&mut self) -> bool {
        let mut changed = false;
        for section in ["farmer", "pool"] {
            if self.get(&[section, "xch_target_address"]).is_none() {
                changed |= self.set(&[section, "xch_target_address"], Value::from(""));
            }
        }
        changed
    }

    /// Rewrite every managed key that disagrees with `farmer`.
    ///
    /// Returns `true` when anything changed and the file needs saving. Fails
    /// only when pools are configured and the payout address does not decode.
    pub fn ensure_consistent(&mut self, farmer: &FarmerConfig) -> Result<bool, ConfigError> {
        let mut changed = self.ensure_target_address_keys();
        changed |= self.ensure_ports();
        changed |= self.ensure_upstream_node(farmer);
        changed |= self.ensure_logging(farmer);

        if let Some(wallet) = self.get_mut(&["wallet"]).and_then(Value::as_mapping_mut) {
            for key in ["full_node_peer", "full_node_peers"] {
                changed |= wallet.remove(key).is_some();
            }
        }
        changed |= self.set(&["self_hostname"], Value::from(farmer.listen_host.as_str()));
        changed |= self.set(
            &["harvester", "num_threads"],
            Value::from(farmer.harvester_num_threads),
        );
        changed |= self.set(
            &["harvester", "plot_directories"],
            Value::Sequence(
                farmer
                    .plot_directories
                    .iter()
                    .map(|p| Value::from(p.display().to_string()))
                    .collect(),
            ),
        );
        if self.get(&["harvester", "plots_refresh_parameter"]).is_some() {
            changed |= self.set(
                &["harvester", "plots_refresh_parameter", "interval_seconds"],
                Value::from(farmer.plot_refresh_interval_seconds),
            );
        }
        let reward = Value::from(farmer.farmer_reward_address.as_str());
        changed |= self.set(&["farmer", "xch_target_address"], reward.clone());
        changed |= self.set(&["pool", "xch_target_address"], reward);
        changed |= self.set(&["wallet", "connect_to_unknown_peers"], Value::Bool(true));
        changed |= self.ensure_pool_payout(farmer)?;
        Ok(changed)
    }

    /// Point every plot NFT pool at the payout address's puzzle hash.
    fn ensure_pool_payout(&mut self, farmer: &FarmerConfig) -> Result<bool, ConfigError> {
        let Some(pools) = self
            .get_mut(&["pool", "pool_list"])
            .and_then(Value::as_sequence_mut)
        else {
            return Ok(false);
        };
        if pools.is_empty() || farmer.pool_payout_address.is_empty() {
            return Ok(false);
        }
        let puzzle_hash = Value::from(decode_puzzle_hash(&farmer.pool_payout_address)?);
        let key = Value::from("payout_instructions");
        let mut changed = false;
        for pool in pools.iter_mut().filter_map(Value::as_mapping_mut) {
            if pool.get(&key) != Some(&puzzle_hash) {
                pool.insert(key.clone(), puzzle_hash.clone());
                changed = true;
            }
        }
        Ok(changed)
    }

    fn ensure_ports(&mut self) -> bool {
        let ports: [(&[&str], u16); 8] = [
            (&["daemon_port"], DAEMON_PORT),
            (&["farmer", "harvester_peer", "port"], HARVESTER_PORT),
            (&["farmer", "port"], FARMER_PORT),
            (&["farmer", "rpc_port"], FARMER_RPC_PORT),
            (&["harvester", "farmer_peer", "port"], FARMER_PORT),
            (&["harvester", "port"], HARVESTER_PORT),
            (&["harvester", "rpc_port"], HARVESTER_RPC_PORT),
            (&["wallet", "rpc_port"], WALLET_RPC_PORT),
        ];
        let mut changed = false;
        for (path, port) in ports {
            changed |= self.set(path, Value::from(port));
        }
        changed
    }

    fn ensure_upstream_node(&mut self, farmer: &FarmerConfig) -> bool {
        let mut changed = false;
        if let Some(host) = farmer.upstream_node_host.as_deref() {
            changed |= self.set(&["farmer", "full_node_peer", "host"], Value::from(host));
        }
        if let Some(port) = farmer.upstream_node_port {
            changed |= self.set(&["farmer", "full_node_peer", "port"], Value::from(port));
        }
        changed
    }

    fn ensure_logging(&mut self, farmer: &FarmerConfig) -> bool {
        let wanted: [(&str, Value); 5] = [
            ("log_level", Value::from(farmer.log_level.as_str())),
            ("log_stdout", Value::Bool(false)),
            ("log_syslog", Value::Bool(true)),
            ("log_syslog_host", Value::from(farmer.syslog_host.as_str())),
            ("log_syslog_port", Value::from(farmer.syslog_port)),
        ];
        let mut changed = false;
        for (key, value) in wanted {
            changed |= self.set(&["logging", key], value);
        }
        changed
    }

    fn get(&self, path: &[&str]) -> Option<&Value> {
        path.iter().try_fold(&self.root, |node, key| node.get(*key))
    }

    fn get_mut(&mut self, path: &[&str]) -> Option<&mut Value> {
        path.iter()
            .try_fold(&mut self.root, |node, key| node.get_mut(*key))
    }

    /// Set `path` to `value`, creating intermediate mappings. Returns whether
    /// the stored value changed.
    fn set(&mut self, path: &[&str], value: Value) -> bool {
        let Some((last, parents)) = path.split_last() else {
            return false;
        };
        let mut node = &mut self.root;
        for key in parents {
            if !node.is_mapping() {
                *node = Value::Mapping(Mapping::new());
            }
            let Some(map) = node.as_mapping_mut() else {
                return false;
            };
            node = map
                .entry(Value::from(*key))
                .or_insert_with(|| Value::Mapping(Mapping::new()));
        }
        if !node.is_mapping() {
            *node = Value::Mapping(Mapping::new());
        }
        let Some(map) = node.as_mapping_mut() else {
            return false;
        };
        let key = Value::from(*last);
        if map.get(&key) == Some(&value) {
            return false;
        }
        map.insert(key, value);
        true
    }
}

/// Seed a freshly created farmer config from the daemon config, and fill empty
/// reward/payout addresses from the daemon's target address.
///
/// Returns `true` when `farmer` changed.
pub fn seed_from_daemon_config(
    farmer: &mut FarmerConfig,
    daemon: &DaemonConfig,
    first_creation: bool,
) -> bool {
    let mut changed = false;
    let target = daemon.farmer_target_address().unwrap_or_default().to_string();

    if first_creation {
        if let Some(dirs) = daemon
            .get(&["harvester", "plot_directories"])
            .and_then(Value::as_sequence)
        {
            farmer.plot_directories = dirs
                .iter()
                .filter_map(Value::as_str)
                .map(PathBuf::from)
                .collect();
        }
        if let Some(threads) = daemon
            .get(&["harvester", "num_threads"])
            .and_then(Value::as_u64)
            .and_then(|t| u32::try_from(t).ok())
        {
            farmer.harvester_num_threads = threads;
        }
        farmer.farmer_reward_address = target.clone();
        farmer.pool_payout_address = target.clone();
        changed = true;
    }

    if farmer.farmer_reward_address.is_empty() && !target.is_empty() {
        farmer.farmer_reward_address = target.clone();
        changed = true;
    }
    if farmer.pool_payout_address.is_empty() && !target.is_empty() {
        farmer.pool_payout_address = target;
        changed = true;
    }
    changed
}

/// Bring both config files into agreement.
///
/// On first run the daemon config comes from an existing install under
/// [`paths::import_root`] when there is one, otherwise from
/// [`DaemonConfig::skeleton`]. A default farmer config is created when none
/// exists. Whichever side changed is saved. Returns both configs.
pub fn ensure_configs(
    root_path: &Path,
    config_path: &Path,
) -> Result<(FarmerConfig, DaemonConfig), ConfigError> {
    ensure_configs_importing(root_path, config_path, paths::import_root().as_deref())
}

/// [`ensure_configs`] with the install to import from given explicitly.
pub fn ensure_configs_importing(
    root_path: &Path,
    config_path: &Path,
    import_root: Option<&Path>,
) -> Result<(FarmerConfig, DaemonConfig), ConfigError> {
    let mut daemon = if daemon_config_path(root_path).exists() {
        DaemonConfig::load_at(root_path)?
    } else {
        let initial = match import_root
            .filter(|source| *source != root_path && daemon_config_path(source).exists())
        {
            Some(source) => import_install(source, root_path)?,
            None => DaemonConfig::skeleton(),
        };
        initial.save_at(root_path)?;
        initial
    };

    let first_creation = !farmer_config::has_config(config_path);
    let mut farmer = farmer_config::load_or_create_at(config_path)?;
    if seed_from_daemon_config(&mut farmer, &daemon, first_creation) {
        farmer_config::save_at(config_path, &farmer)?;
    }

    if daemon.ensure_consistent(&farmer)? {
        daemon.save_at(root_path)?;
    }
    Ok((farmer, daemon))
}

/// Load the daemon config of the install at `source` and copy its
/// certificates under `root_path`, where the copied config expects them.
fn import_install(source: &Path, root_path: &Path) -> Result<DaemonConfig, ConfigError> {
    let config = DaemonConfig::load_at(source)?;
    let certificates = ssl_dir(source);
    if certificates.is_dir() {
        copy_dir(&certificates, &ssl_dir(root_path))?;
    }
    Ok(config)
}

fn copy_dir(from: &Path, to: &Path) -> Result<(), ConfigError> {
    std::fs::create_dir_all(to).map_err(|e| io_err(to, e))?;
    for entry in std::fs::read_dir(from).map_err(|e| io_err(from, e))? {
        let entry = entry.map_err(|e| io_err(from, e))?;
        let source = entry.path();
        let target = to.join(entry.file_name());
        if entry.file_type().map_err(|e| io_err(&source, e))?.is_dir() {
            copy_dir(&source, &target)?;
        } else {
            std::fs::copy(&source, &target).map_err(|e| io_err(&target, e))?;
        }
    }
    Ok(())
}

fn invalid(key: &str, expected: &'static str) -> ConfigError {
    ConfigError::InvalidKey {
        key: key.to_string(),
        expected,
    }
}
