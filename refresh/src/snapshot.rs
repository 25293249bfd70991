//! The snapshot service: routes `(domain, scope)` to the registered builder,
//! versions and checksums the result, and serves repeats from a short-TTL
//! cache. Failed builds are negatively cached for an even shorter window and
//! never served as successes.

use crate::cluster::ClusterSet;
use crate::config::RefreshConfig;
use crate::error::{self, Error};
use crate::registry::{BuildRequest, DomainRegistry};
use crate::scope;
use porthole_types::{Snapshot, SnapshotStats, unix_millis};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::debug;

const LOG_TARGET: &str = "refresh::snapshot";

/// Hex-encoded SHA-256 of the canonical payload rendering, truncated. JSON
/// object keys serialize in sorted order and builders sort their collections,
/// so equal payloads hash equally across runs.
fn checksum(canonical: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

/// Per-request build options. The default consults the cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    /// Skip the snapshot cache entirely and rebuild; used by manual refresh
    /// so a user-requested rebuild can never be answered from stale state.
    pub bypass_cache: bool,
}

impl BuildOptions {
    pub fn bypass() -> Self {
        Self { bypass_cache: true }
    }
}

type CacheKey = (String, String);

struct CacheEntry {
    snapshot: Snapshot,
    inserted_at: Instant,
}

#[derive(Default)]
struct VersionRecord {
    version: u64,
    checksum: String,
}

pub struct SnapshotService {
    registry: Arc<DomainRegistry>,
    clusters: Arc<ClusterSet>,
    config: RefreshConfig,
    cache: Mutex<HashMap<CacheKey, CacheEntry>>,
    // Version history outlives cache eviction so versions stay monotone.
    versions: Mutex<HashMap<CacheKey, VersionRecord>>,
    failures: Mutex<HashMap<CacheKey, (String, Instant)>>,
}

impl SnapshotService {
    pub fn new(
        registry: Arc<DomainRegistry>,
        clusters: Arc<ClusterSet>,
        config: RefreshConfig,
    ) -> Self {
        Self {
            registry,
            clusters,
            config,
            cache: Mutex::new(HashMap::new()),
            versions: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Builds (or serves from cache) the snapshot for `(domain, scope)`.
    pub async fn build(
        &self,
        domain: &str,
        raw_scope: &str,
        opts: &BuildOptions,
    ) -> Result<Snapshot, Error> {
        let normalized = scope::normalize(raw_scope)?;
        let key: CacheKey = (domain.to_string(), normalized.key.clone());

        if !opts.bypass_cache {
            if let Some(snapshot) = self.cached(&key) {
                return Ok(snapshot);
            }
            if let Some(message) = self.cached_failure(&key) {
                return Err(Error::message(message));
            }
        }

        let config = self
            .registry
            .get(domain)
            .ok_or_else(|| Error::UnknownDomain(domain.to_string()))?;
        let handles = self.clusters.resolve(&normalized.clusters)?;

        let build_started = Instant::now();
        let build_started_unix = unix_millis();
        let request = BuildRequest {
            domain,
            scope: &normalized,
            clusters: &handles,
            bypass_cache: opts.bypass_cache,
        };

        let payload = match config.builder.build(&request).await {
            Ok(payload) => payload,
            Err(err) => {
                // RBAC refusals get attributed to the domain; everything else
                // bubbles with the build context attached.
                let err = match error::denied_details(&err) {
                    Some((_, resource)) => error::wrap_permission_denied(err, domain, &resource),
                    None => err.context(format!("build {domain}")),
                };
                self.failures
                    .lock()
                    .unwrap()
                    .insert(key, (err.to_string(), Instant::now()));
                return Err(err);
            }
        };

        let canonical = serde_json::to_string(&payload.payload)?;
        let digest = checksum(&canonical);

        let version = {
            let mut versions = self.versions.lock().unwrap();
            let record = versions.entry(key.clone()).or_default();
            if record.checksum != digest {
                record.version += 1;
                record.checksum = digest.clone();
            }
            record.version
        };

        let snapshot = Snapshot {
            domain: domain.to_string(),
            scope: Some(normalized.key.clone()),
            version,
            checksum: digest,
            generated_at: unix_millis(),
            sequence: 0,
            payload: payload.payload,
            stats: SnapshotStats {
                item_count: payload.item_count,
                build_duration_ms: build_started.elapsed().as_millis() as u64,
                total_items: payload.total_items,
                truncated: payload.truncated.then_some(true),
                warnings: (!payload.warnings.is_empty()).then_some(payload.warnings),
                build_started_at_unix: Some(build_started_unix),
                ..Default::default()
            },
        };

        debug!(
            target: LOG_TARGET,
            "built {domain} {} v{version} ({} items)",
            normalized.key,
            snapshot.stats.item_count
        );

        let mut cache = self.cache.lock().unwrap();
        cache.insert(
            key.clone(),
            CacheEntry {
                snapshot: snapshot.clone(),
                inserted_at: Instant::now(),
            },
        );
        drop(cache);
        self.failures.lock().unwrap().remove(&key);

        Ok(snapshot)
    }

    /// Runs the domain's manual-refresh hook; the processor follows up with
    /// a cache-bypassed [`build`](Self::build).
    pub async fn manual_refresh(&self, domain: &str, raw_scope: &str) -> Result<u64, Error> {
        let normalized = scope::normalize(raw_scope)?;
        let handles = self.clusters.resolve(&normalized.clusters)?;
        let request = BuildRequest {
            domain,
            scope: &normalized,
            clusters: &handles,
            bypass_cache: true,
        };
        self.registry.manual_refresh(&request).await
    }

    /// The current version for `(domain, scope)`, 0 when never built.
    pub fn current_version(&self, domain: &str, raw_scope: &str) -> u64 {
        let Ok(normalized) = scope::normalize(raw_scope) else {
            return 0;
        };
        let versions = self.versions.lock().unwrap();
        versions
            .get(&(domain.to_string(), normalized.key))
            .map(|r| r.version)
            .unwrap_or(0)
    }

    fn cached(&self, key: &CacheKey) -> Option<Snapshot> {
        let cache = self.cache.lock().unwrap();
        cache
            .get(key)
            .filter(|e| e.inserted_at.elapsed() < self.config.snapshot_ttl)
            .map(|e| e.snapshot.clone())
    }

    fn cached_failure(&self, key: &CacheKey) -> Option<String> {
        let failures = self.failures.lock().unwrap();
        failures
            .get(key)
            .filter(|(_, at)| at.elapsed() < self.config.snapshot_error_ttl)
            .map(|(message, _)| message.clone())
    }
}
