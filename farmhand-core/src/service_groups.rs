//! Service groups understood by the daemon.
//!
//! A group is a user-facing name (`farmer-only`, `harvester`, …) that expands
//! to one or more daemon service names.

use crate::types::ServiceName;

/// Expansion table, in the order the daemon expects services to come up.
const GROUPS: &[(&str, &[&str])] = &[
    (
        "all",
        &[
            "chia_harvester",
            "chia_timelord_launcher",
            "chia_timelord",
            "chia_farmer",
            "chia_full_node",
            "chia_wallet",
            "chia_data_layer",
            "chia_data_layer_http",
        ],
    ),
    ("daemon", &[]),
    (
        "farmer",
        &["chia_harvester", "chia_farmer", "chia_full_node", "chia_wallet"],
    ),
    ("farmer-no-wallet", &["chia_harvester", "chia_farmer", "chia_full_node"]),
    ("farmer-only", &["chia_farmer"]),
    ("timelord", &["chia_timelord_launcher", "chia_timelord", "chia_full_node"]),
    ("timelord-only", &["chia_timelord"]),
    ("timelord-launcher-only", &["chia_timelord_launcher"]),
    ("wallet", &["chia_wallet"]),
    ("node", &["chia_full_node"]),
    ("harvester", &["chia_harvester"]),
    ("introducer", &["chia_introducer"]),
    ("simulator", &["chia_full_node_simulator"]),
    ("crawler", &["chia_crawler"]),
    ("seeder", &["chia_crawler", "chia_seeder"]),
    ("seeder-only", &["chia_seeder"]),
    ("data", &["chia_wallet", "chia_data_layer"]),
    ("data_layer_http", &["chia_data_layer_http"]),
];

/// Services belonging to `group`, or `None` for an unknown group.
pub fn services_for_group(group: &str) -> Option<&'static [&'static str]> {
    GROUPS
        .iter()
        .find(|(name, _)| *name == group)
        .map(|(_, services)| *services)
}

/// Expand `groups` into service names, de-duplicated in first-seen order.
///
/// Unknown names are treated as service names so callers can start a single
/// service directly.
pub fn services_for_groups<S: AsRef<str>>(groups: &[S]) -> Vec<ServiceName> {
    let mut out: Vec<ServiceName> = Vec::new();
    for group in groups {
        let group = group.as_ref();
        let expanded: Vec<&str> = match services_for_group(group) {
            Some(services) => services.to_vec(),
            None => vec![group],
        };
        for service in expanded {
            if !out.iter().any(|s| s.0 == service) {
                out.push(ServiceName::from(service));
            }
        }
    }
    out
}
