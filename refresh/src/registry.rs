//! The domain registry: maps domain names to their snapshot builders and
//! dispatches manual-refresh requests.

use crate::cluster::ClusterHandle;
use crate::error::Error;
use crate::scope::NormalizedScope;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Everything a builder needs for one build: the parsed scope and the
/// resolved target clusters.
pub struct BuildRequest<'a> {
    pub domain: &'a str,
    pub scope: &'a NormalizedScope,
    pub clusters: &'a [ClusterHandle],
    /// End-to-end cache bypass; builders holding derived state honor it.
    pub bypass_cache: bool,
}

/// A builder's output before the snapshot service wraps it in an envelope.
#[derive(Debug, Clone, Default)]
pub struct DomainPayload {
    pub payload: serde_json::Value,
    pub item_count: usize,
    /// Set when the payload was truncated; carries the pre-truncation count.
    pub total_items: Option<usize>,
    pub truncated: bool,
    /// Best-effort failures that did not abort the build.
    pub warnings: Vec<String>,
}

impl DomainPayload {
    pub fn new(payload: serde_json::Value, item_count: usize) -> Self {
        Self {
            payload,
            item_count,
            ..Default::default()
        }
    }
}

/// One registered domain. `build` produces the payload; `manual_refresh`
/// runs domain-specific invalidation before a cache-bypassed rebuild and
/// returns a version hint (0 when it has none).
#[async_trait]
pub trait SnapshotBuilder: Send + Sync {
    async fn build(&self, req: &BuildRequest<'_>) -> Result<DomainPayload, Error>;

    async fn manual_refresh(&self, _req: &BuildRequest<'_>) -> Result<u64, Error> {
        Ok(0)
    }
}

#[derive(Clone)]
pub struct DomainConfig {
    pub name: String,
    pub builder: Arc<dyn SnapshotBuilder>,
}

impl DomainConfig {
    pub fn new(name: &str, builder: Arc<dyn SnapshotBuilder>) -> Self {
        Self {
            name: name.to_string(),
            builder,
        }
    }
}

/// Registered at startup, never mutated afterwards; reads vastly outnumber
/// writes so a RwLock fits.
#[derive(Default)]
pub struct DomainRegistry {
    domains: RwLock<HashMap<String, DomainConfig>>,
}

impl DomainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, config: DomainConfig) -> Result<(), Error> {
        let mut domains = self.domains.write().unwrap();
        if domains.contains_key(&config.name) {
            return Err(Error::DuplicateDomain(config.name));
        }
        domains.insert(config.name.clone(), config);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<DomainConfig> {
        self.domains.read().unwrap().get(name).cloned()
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.domains.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Dispatches to the registered manual-refresh hook.
    pub async fn manual_refresh(&self, req: &BuildRequest<'_>) -> Result<u64, Error> {
        let config = self
            .get(req.domain)
            .ok_or_else(|| Error::UnknownDomain(req.domain.to_string()))?;
        config.builder.manual_refresh(req).await
    }
}
