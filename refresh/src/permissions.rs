//! Cached RBAC decisions. Every informer activation and privileged listing
//! goes through a [`PermissionChecker`], which resolves misses with a
//! SelfSubjectAccessReview and serves repeats from a TTL cache.

use crate::error::Error;
use async_trait::async_trait;
use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec,
};
use kube::{Api, Client, api::PostParams};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;

const LOG_TARGET: &str = "refresh::permissions";

/// One authorization question: can the current identity perform `verb` on
/// `group/resource` (optionally within `namespace`)?
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PermissionRequest {
    pub group: String,
    pub resource: String,
    pub verb: String,
    pub namespace: Option<String>,
}

impl PermissionRequest {
    pub fn list(group: &str, resource: &str) -> Self {
        Self {
            group: group.to_string(),
            resource: resource.to_string(),
            verb: "list".to_string(),
            namespace: None,
        }
    }

    fn describe(&self) -> String {
        let group = if self.group.is_empty() {
            "core"
        } else {
            &self.group
        };
        format!("{} {}/{}", self.verb, group, self.resource)
    }
}

/// Seam over the authorization API so the checker is testable without a
/// cluster.
#[async_trait]
pub trait AccessReviewer: Send + Sync {
    async fn review(&self, request: &PermissionRequest) -> Result<bool, Error>;
}

/// The real reviewer: posts a SelfSubjectAccessReview and reads back
/// `status.allowed`.
pub struct SelfAccessReviewer {
    client: Client,
}

impl SelfAccessReviewer {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AccessReviewer for SelfAccessReviewer {
    async fn review(&self, request: &PermissionRequest) -> Result<bool, Error> {
        let api: Api<SelfSubjectAccessReview> = Api::all(self.client.clone());
        let review = SelfSubjectAccessReview {
            spec: SelfSubjectAccessReviewSpec {
                resource_attributes: Some(ResourceAttributes {
                    group: Some(request.group.clone()),
                    resource: Some(request.resource.clone()),
                    verb: Some(request.verb.clone()),
                    namespace: request.namespace.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        };
        let created = api.create(&PostParams::default(), &review).await?;
        Ok(created.status.map(|s| s.allowed).unwrap_or(false))
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedDecision {
    allowed: bool,
    observed_at: Instant,
}

/// TTL-cached `{group, resource, verb, namespace} -> allowed` map for one
/// cluster identity. An optional audit reviewer is consulted alongside the
/// primary; disagreements are logged once per key.
pub struct PermissionChecker {
    reviewer: Arc<dyn AccessReviewer>,
    audit: Option<Arc<dyn AccessReviewer>>,
    ttl: Duration,
    cache: Mutex<HashMap<PermissionRequest, CachedDecision>>,
    mismatch_logged: Mutex<HashSet<PermissionRequest>>,
    // Serializes the miss path so a burst of identical checks issues a single
    // upstream review.
    review_gate: tokio::sync::Mutex<()>,
}

impl PermissionChecker {
    pub fn new(reviewer: Arc<dyn AccessReviewer>, ttl: Duration) -> Self {
        Self {
            reviewer,
            audit: None,
            ttl,
            cache: Mutex::new(HashMap::new()),
            mismatch_logged: Mutex::new(HashSet::new()),
            review_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AccessReviewer>) -> Self {
        self.audit = Some(audit);
        self
    }

    fn cached(&self, request: &PermissionRequest) -> Option<bool> {
        let cache = self.cache.lock().unwrap();
        cache
            .get(request)
            .filter(|d| d.observed_at.elapsed() < self.ttl)
            .map(|d| d.allowed)
    }

    /// Resolves a permission question, consulting the cache first. A failed
    /// review is treated as a denial and cached with the normal TTL so the
    /// API server is not hammered while it is unhappy.
    pub async fn allowed(&self, request: &PermissionRequest) -> bool {
        if let Some(allowed) = self.cached(request) {
            return allowed;
        }

        let _gate = self.review_gate.lock().await;
        // Another task may have resolved this key while we waited.
        if let Some(allowed) = self.cached(request) {
            return allowed;
        }

        let allowed = match self.reviewer.review(request).await {
            Ok(allowed) => allowed,
            Err(e) => {
                warn!(target: LOG_TARGET, "access review failed for {}: {e}", request.describe());
                false
            }
        };

        if let Some(audit) = &self.audit {
            match audit.review(request).await {
                Ok(audit_allowed) if audit_allowed != allowed => {
                    let mut logged = self.mismatch_logged.lock().unwrap();
                    if logged.insert(request.clone()) {
                        warn!(
                            target: LOG_TARGET,
                            "permission mismatch for {}: primary={allowed} audit={audit_allowed}",
                            request.describe()
                        );
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(target: LOG_TARGET, "audit review failed for {}: {e}", request.describe());
                }
            }
        }

        self.cache.lock().unwrap().insert(
            request.clone(),
            CachedDecision {
                allowed,
                observed_at: Instant::now(),
            },
        );
        allowed
    }

    /// Resolves a batch, deduplicating by `(group, resource, verb)` before
    /// issuing reviews. Returns when every unique entry is resolved.
    pub async fn prime(&self, requests: &[PermissionRequest]) {
        let mut seen: HashSet<(String, String, String)> = HashSet::new();
        for request in requests {
            let key = (
                request.group.clone(),
                request.resource.clone(),
                request.verb.clone(),
            );
            if !seen.insert(key) {
                continue;
            }
            self.allowed(request).await;
        }
    }

    /// Drops every cached decision; the next check re-reviews.
    pub fn invalidate(&self) {
        self.cache.lock().unwrap().clear();
    }
}
