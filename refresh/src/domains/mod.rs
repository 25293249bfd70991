//! The built-in snapshot domains. Every builder reads through the
//! [`ClusterState`](crate::informers::ClusterState) capability trait, tags
//! each row with its cluster id and sorts deterministically so checksums are
//! stable across runs and informer event orderings.

#[cfg(test)]
pub(crate) mod testutil;

pub mod config;
pub mod crds;
pub mod events;
pub mod helm;
pub mod logs;
pub mod network;
pub mod nodes;
pub mod rbac;
pub mod storage;
pub mod workloads;

use crate::config::RefreshConfig;
use crate::error::Error;
use crate::logs::LogStreamManager;
use crate::registry::{DomainConfig, DomainRegistry};
use std::sync::Arc;

pub const WORKLOADS_DOMAIN: &str = "namespace-workloads";
pub const PODS_DOMAIN: &str = "namespace-pods";
pub const NODES_DOMAIN: &str = "nodes";
pub const CONFIG_DOMAIN: &str = "namespace-config";
pub const NETWORK_DOMAIN: &str = "namespace-network";
pub const STORAGE_DOMAIN: &str = "namespace-storage";
pub const RBAC_DOMAIN: &str = "namespace-rbac";
pub const CRDS_DOMAIN: &str = "crds";
pub const HELM_DOMAIN: &str = "helm-releases";

/// Registers every built-in domain.
pub fn register_all(
    registry: &Arc<DomainRegistry>,
    logs_manager: &Arc<LogStreamManager>,
    config: &RefreshConfig,
) -> Result<(), Error> {
    registry.register(DomainConfig::new(
        WORKLOADS_DOMAIN,
        Arc::new(workloads::WorkloadsBuilder),
    ))?;
    registry.register(DomainConfig::new(
        PODS_DOMAIN,
        Arc::new(workloads::PodsBuilder),
    ))?;
    registry.register(DomainConfig::new(NODES_DOMAIN, Arc::new(nodes::NodesBuilder)))?;
    registry.register(DomainConfig::new(
        CONFIG_DOMAIN,
        Arc::new(config::ConfigBuilder::new(config.config_snapshot_limit)),
    ))?;
    registry.register(DomainConfig::new(
        NETWORK_DOMAIN,
        Arc::new(network::NetworkBuilder),
    ))?;
    registry.register(DomainConfig::new(
        STORAGE_DOMAIN,
        Arc::new(storage::StorageBuilder),
    ))?;
    registry.register(DomainConfig::new(RBAC_DOMAIN, Arc::new(rbac::RbacBuilder)))?;
    registry.register(DomainConfig::new(CRDS_DOMAIN, Arc::new(crds::CrdsBuilder)))?;
    registry.register(DomainConfig::new(
        HELM_DOMAIN,
        Arc::new(helm::HelmReleasesBuilder),
    ))?;
    registry.register(DomainConfig::new(
        crate::events::EVENTS_DOMAIN,
        Arc::new(events::EventsBuilder),
    ))?;
    registry.register(DomainConfig::new(
        crate::logs::LOGS_DOMAIN,
        Arc::new(logs::LogsBuilder::new(Arc::clone(logs_manager))),
    ))?;
    Ok(())
}

/// Canonical ordering for payload rows: cluster, namespace, name, kind.
pub(crate) fn sort_items(items: &mut [serde_json::Value]) {
    let key = |v: &serde_json::Value| {
        (
            v.get("cluster")
                .and_then(|s| s.as_str())
                .unwrap_or_default()
                .to_string(),
            v.get("namespace")
                .and_then(|s| s.as_str())
                .unwrap_or_default()
                .to_string(),
            v.get("name")
                .and_then(|s| s.as_str())
                .unwrap_or_default()
                .to_string(),
            v.get("kind")
                .and_then(|s| s.as_str())
                .unwrap_or_default()
                .to_string(),
        )
    };
    items.sort_by(|a, b| key(a).cmp(&key(b)));
}

/// Collapses a secondary listing failure into a warning; the build goes on
/// with what it has.
pub(crate) fn best_effort<T>(
    result: Result<T, Error>,
    what: &str,
    warnings: &mut Vec<String>,
) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warnings.push(format!("{what}: skipped ({e})"));
            None
        }
    }
}
