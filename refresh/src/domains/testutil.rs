//! Shared fakes for builder tests: an in-memory [`ClusterState`] plus a
//! synthetic [`ClusterHandle`] with no informer hub behind it.

use crate::cluster::ClusterHandle;
use crate::config::RefreshConfig;
use crate::error::Error;
use crate::events::EventStreamManager;
use crate::informers::ClusterState;
use crate::logs::api::{LineStream, LogFetchParams, PodLogApi, PodWatchStream};
use crate::telemetry::TelemetryRecorder;
use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{
    ConfigMap, Event as K8sEvent, Node, PersistentVolume, PersistentVolumeClaim, Pod, Secret,
    Service,
};
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicy};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use std::collections::HashMap;
use std::sync::Arc;

fn filtered<T: Clone>(
    items: &[T],
    ns: Option<&str>,
    get_ns: impl Fn(&T) -> Option<String>,
) -> Result<Vec<Arc<T>>, Error> {
    Ok(items
        .iter()
        .filter(|item| ns.is_none_or(|ns| get_ns(item).as_deref() == Some(ns)))
        .cloned()
        .map(Arc::new)
        .collect())
}

#[derive(Default)]
pub(crate) struct FakeState {
    pub id: String,
    pub pods: Vec<Pod>,
    pub deployments: Vec<Deployment>,
    pub replica_sets: Vec<ReplicaSet>,
    pub stateful_sets: Vec<StatefulSet>,
    pub daemon_sets: Vec<DaemonSet>,
    pub jobs: Vec<Job>,
    pub cron_jobs: Vec<CronJob>,
    pub nodes: Vec<Node>,
    pub config_maps: Vec<ConfigMap>,
    pub secrets: Vec<Secret>,
    pub secrets_error: Option<fn() -> Error>,
    pub services: Vec<Service>,
    pub ingresses: Vec<Ingress>,
    pub network_policies: Vec<NetworkPolicy>,
    pub pvcs: Vec<PersistentVolumeClaim>,
    pub pvs: Vec<PersistentVolume>,
    pub storage_classes: Vec<StorageClass>,
    pub roles: Vec<Role>,
    pub role_bindings: Vec<RoleBinding>,
    pub cluster_roles: Vec<ClusterRole>,
    pub cluster_role_bindings: Vec<ClusterRoleBinding>,
    pub crds: Vec<CustomResourceDefinition>,
    pub events: Vec<K8sEvent>,
    pub usage: HashMap<String, crate::informers::NodeUsage>,
    pub pods_by_node: HashMap<String, Vec<String>>,
}

impl FakeState {
    pub fn named(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Default::default()
        }
    }
}

impl ClusterState for FakeState {
    fn cluster_id(&self) -> &str {
        &self.id
    }

    fn pods(&self, ns: Option<&str>) -> Result<Vec<Arc<Pod>>, Error> {
        filtered(&self.pods, ns, |p| p.metadata.namespace.clone())
    }

    fn deployments(&self, ns: Option<&str>) -> Result<Vec<Arc<Deployment>>, Error> {
        filtered(&self.deployments, ns, |d| d.metadata.namespace.clone())
    }

    fn replica_sets(&self, ns: Option<&str>) -> Result<Vec<Arc<ReplicaSet>>, Error> {
        filtered(&self.replica_sets, ns, |r| r.metadata.namespace.clone())
    }

    fn stateful_sets(&self, ns: Option<&str>) -> Result<Vec<Arc<StatefulSet>>, Error> {
        filtered(&self.stateful_sets, ns, |s| s.metadata.namespace.clone())
    }

    fn daemon_sets(&self, ns: Option<&str>) -> Result<Vec<Arc<DaemonSet>>, Error> {
        filtered(&self.daemon_sets, ns, |d| d.metadata.namespace.clone())
    }

    fn jobs(&self, ns: Option<&str>) -> Result<Vec<Arc<Job>>, Error> {
        filtered(&self.jobs, ns, |j| j.metadata.namespace.clone())
    }

    fn cron_jobs(&self, ns: Option<&str>) -> Result<Vec<Arc<CronJob>>, Error> {
        filtered(&self.cron_jobs, ns, |c| c.metadata.namespace.clone())
    }

    fn nodes(&self) -> Result<Vec<Arc<Node>>, Error> {
        filtered(&self.nodes, None, |n| n.metadata.namespace.clone())
    }

    fn config_maps(&self, ns: Option<&str>) -> Result<Vec<Arc<ConfigMap>>, Error> {
        filtered(&self.config_maps, ns, |c| c.metadata.namespace.clone())
    }

    fn secrets(&self, ns: Option<&str>) -> Result<Vec<Arc<Secret>>, Error> {
        if let Some(make_error) = self.secrets_error {
            return Err(make_error());
        }
        filtered(&self.secrets, ns, |s| s.metadata.namespace.clone())
    }

    fn services(&self, ns: Option<&str>) -> Result<Vec<Arc<Service>>, Error> {
        filtered(&self.services, ns, |s| s.metadata.namespace.clone())
    }

    fn ingresses(&self, ns: Option<&str>) -> Result<Vec<Arc<Ingress>>, Error> {
        filtered(&self.ingresses, ns, |i| i.metadata.namespace.clone())
    }

    fn network_policies(&self, ns: Option<&str>) -> Result<Vec<Arc<NetworkPolicy>>, Error> {
        filtered(&self.network_policies, ns, |n| n.metadata.namespace.clone())
    }

    fn persistent_volume_claims(
        &self,
        ns: Option<&str>,
    ) -> Result<Vec<Arc<PersistentVolumeClaim>>, Error> {
        filtered(&self.pvcs, ns, |p| p.metadata.namespace.clone())
    }

    fn persistent_volumes(&self) -> Result<Vec<Arc<PersistentVolume>>, Error> {
        filtered(&self.pvs, None, |p| p.metadata.namespace.clone())
    }

    fn storage_classes(&self) -> Result<Vec<Arc<StorageClass>>, Error> {
        filtered(&self.storage_classes, None, |s| s.metadata.namespace.clone())
    }

    fn roles(&self, ns: Option<&str>) -> Result<Vec<Arc<Role>>, Error> {
        filtered(&self.roles, ns, |r| r.metadata.namespace.clone())
    }

    fn role_bindings(&self, ns: Option<&str>) -> Result<Vec<Arc<RoleBinding>>, Error> {
        filtered(&self.role_bindings, ns, |r| r.metadata.namespace.clone())
    }

    fn cluster_roles(&self) -> Result<Vec<Arc<ClusterRole>>, Error> {
        filtered(&self.cluster_roles, None, |r| r.metadata.namespace.clone())
    }

    fn cluster_role_bindings(&self) -> Result<Vec<Arc<ClusterRoleBinding>>, Error> {
        filtered(&self.cluster_role_bindings, None, |r| {
            r.metadata.namespace.clone()
        })
    }

    fn custom_resource_definitions(&self) -> Result<Vec<Arc<CustomResourceDefinition>>, Error> {
        filtered(&self.crds, None, |c| c.metadata.namespace.clone())
    }

    fn events(&self, ns: Option<&str>) -> Result<Vec<Arc<K8sEvent>>, Error> {
        filtered(&self.events, ns, |e| e.metadata.namespace.clone())
    }

    fn pods_on_node(&self, node: &str) -> Vec<String> {
        self.pods_by_node.get(node).cloned().unwrap_or_default()
    }

    fn node_usage(&self) -> HashMap<String, crate::informers::NodeUsage> {
        self.usage.clone()
    }
}

struct NoLogs;

#[async_trait]
impl PodLogApi for NoLogs {
    async fn get_pod(&self, _ns: &str, _name: &str) -> Result<Option<Pod>, Error> {
        Ok(None)
    }

    async fn list_pods(&self, _ns: &str, _sel: Option<&str>) -> Result<Vec<Pod>, Error> {
        Ok(Vec::new())
    }

    async fn get_deployment(&self, _ns: &str, _name: &str) -> Result<Option<Deployment>, Error> {
        Ok(None)
    }

    async fn get_replica_set(&self, _ns: &str, _name: &str) -> Result<Option<ReplicaSet>, Error> {
        Ok(None)
    }

    async fn get_stateful_set(
        &self,
        _ns: &str,
        _name: &str,
    ) -> Result<Option<StatefulSet>, Error> {
        Ok(None)
    }

    async fn get_daemon_set(&self, _ns: &str, _name: &str) -> Result<Option<DaemonSet>, Error> {
        Ok(None)
    }

    async fn get_job(&self, _ns: &str, _name: &str) -> Result<Option<Job>, Error> {
        Ok(None)
    }

    async fn list_jobs(&self, _ns: &str) -> Result<Vec<Job>, Error> {
        Ok(Vec::new())
    }

    async fn fetch_logs(
        &self,
        _ns: &str,
        _pod: &str,
        _params: &LogFetchParams,
    ) -> Result<String, Error> {
        Ok(String::new())
    }

    async fn stream_logs(
        &self,
        _ns: &str,
        _pod: &str,
        _params: &LogFetchParams,
    ) -> Result<LineStream, Error> {
        Ok(futures::stream::empty().boxed())
    }

    fn watch_pods(&self, _ns: &str, _sel: &str) -> PodWatchStream {
        futures::stream::pending().boxed()
    }
}

/// A log API serving canned pods and tail text; streams are empty and the
/// pod watch never fires.
#[derive(Default)]
pub(crate) struct ScriptedLogs {
    pub pods: Vec<Pod>,
    /// `pod/container` -> tail text.
    pub logs: HashMap<String, String>,
}

#[async_trait]
impl PodLogApi for ScriptedLogs {
    async fn get_pod(&self, _ns: &str, name: &str) -> Result<Option<Pod>, Error> {
        Ok(self
            .pods
            .iter()
            .find(|p| p.metadata.name.as_deref() == Some(name))
            .cloned())
    }

    async fn list_pods(&self, _ns: &str, _sel: Option<&str>) -> Result<Vec<Pod>, Error> {
        Ok(self.pods.clone())
    }

    async fn get_deployment(&self, _ns: &str, _name: &str) -> Result<Option<Deployment>, Error> {
        Ok(None)
    }

    async fn get_replica_set(&self, _ns: &str, _name: &str) -> Result<Option<ReplicaSet>, Error> {
        Ok(None)
    }

    async fn get_stateful_set(
        &self,
        _ns: &str,
        _name: &str,
    ) -> Result<Option<StatefulSet>, Error> {
        Ok(None)
    }

    async fn get_daemon_set(&self, _ns: &str, _name: &str) -> Result<Option<DaemonSet>, Error> {
        Ok(None)
    }

    async fn get_job(&self, _ns: &str, _name: &str) -> Result<Option<Job>, Error> {
        Ok(None)
    }

    async fn list_jobs(&self, _ns: &str) -> Result<Vec<Job>, Error> {
        Ok(Vec::new())
    }

    async fn fetch_logs(
        &self,
        _ns: &str,
        pod: &str,
        params: &LogFetchParams,
    ) -> Result<String, Error> {
        Ok(self
            .logs
            .get(&format!("{pod}/{}", params.container))
            .cloned()
            .unwrap_or_default())
    }

    async fn stream_logs(
        &self,
        _ns: &str,
        _pod: &str,
        _params: &LogFetchParams,
    ) -> Result<LineStream, Error> {
        Ok(futures::stream::empty().boxed())
    }

    fn watch_pods(&self, _ns: &str, _sel: &str) -> PodWatchStream {
        futures::stream::pending().boxed()
    }
}

/// Wraps a fake state in a handle the builders accept.
pub(crate) fn handle(state: FakeState) -> ClusterHandle {
    handle_with_logs(state, Arc::new(NoLogs))
}

/// Like [`handle`], with a log API the logs builder can tail from.
pub(crate) fn handle_with_logs(state: FakeState, logs: Arc<dyn PodLogApi>) -> ClusterHandle {
    let config = RefreshConfig::default();
    let telemetry = Arc::new(TelemetryRecorder::new());
    let id = if state.id.is_empty() {
        "test".to_string()
    } else {
        state.id.clone()
    };
    let events = Arc::new(EventStreamManager::new(&id, &config, telemetry));
    ClusterHandle {
        id,
        informers: None,
        state: Arc::new(state),
        logs,
        events,
    }
}
