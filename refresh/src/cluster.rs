//! The set of connected clusters and scope-driven resolution of which of
//! them a request addresses.

use crate::error::Error;
use crate::events::EventStreamManager;
use crate::informers::{ClusterInformers, ClusterState};
use crate::logs::api::PodLogApi;
use std::sync::{Arc, RwLock};

/// Everything the subsystem knows about one connected cluster. `informers`
/// is absent only for synthetic clusters in tests; production handles always
/// carry their hub.
#[derive(Clone)]
pub struct ClusterHandle {
    pub id: String,
    pub informers: Option<Arc<ClusterInformers>>,
    pub state: Arc<dyn ClusterState>,
    pub logs: Arc<dyn PodLogApi>,
    pub events: Arc<EventStreamManager>,
}

/// Registered clusters in registration order. The first cluster is the
/// default target for scopes without a cluster selector in single-cluster
/// deployments; an empty selector otherwise addresses all of them.
#[derive(Default)]
pub struct ClusterSet {
    clusters: RwLock<Vec<ClusterHandle>>,
}

impl ClusterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a cluster by id.
    pub fn insert(&self, handle: ClusterHandle) {
        let mut clusters = self.clusters.write().unwrap();
        if let Some(existing) = clusters.iter_mut().find(|c| c.id == handle.id) {
            *existing = handle;
        } else {
            clusters.push(handle);
        }
    }

    pub fn get(&self, id: &str) -> Option<ClusterHandle> {
        self.clusters
            .read()
            .unwrap()
            .iter()
            .find(|c| c.id == id)
            .cloned()
    }

    pub fn all(&self) -> Vec<ClusterHandle> {
        self.clusters.read().unwrap().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.read().unwrap().is_empty()
    }

    /// Resolves a cluster selector to handles. An empty selector means every
    /// registered cluster; an unknown id is an error rather than a silent
    /// skip.
    pub fn resolve(&self, ids: &[String]) -> Result<Vec<ClusterHandle>, Error> {
        if ids.is_empty() {
            return Ok(self.all());
        }
        let mut handles = Vec::with_capacity(ids.len());
        for id in ids {
            handles.push(
                self.get(id)
                    .ok_or_else(|| Error::UnknownCluster(id.clone()))?,
            );
        }
        Ok(handles)
    }
}
