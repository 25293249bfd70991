//! Per-cluster informer hub. Each resource family is mirrored into a local
//! reflector store driven by a watch; activation is gated on a `list`
//! permission check so the console never opens watches the identity cannot
//! serve. Builders read the stores through the [`ClusterState`] capability
//! trait and never see client types.

use crate::error::Error;
use crate::events::{EventStreamManager, synthesize_entry};
use crate::permissions::{PermissionChecker, PermissionRequest};
use crate::telemetry::TelemetryRecorder;
use crate::util::{parse_cpu_millis, parse_memory_bytes};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{
    ConfigMap, Event as K8sEvent, Namespace, Node, PersistentVolume, PersistentVolumeClaim, Pod,
    Secret, Service, ServiceAccount,
};
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicy};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::runtime::WatchStreamExt;
use kube::runtime::reflector::{self, Store};
use kube::runtime::watcher::{Config as WatcherConfig, Event as WatchEvent, watcher};
use kube::{Api, Client, Resource};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "refresh::informers";

/// Bound on the initial list+sync of all active informers.
const INFORMER_SYNC_TIMEOUT: Duration = Duration::from_secs(30);

/// Resource families the hub can mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Pods,
    Deployments,
    ReplicaSets,
    StatefulSets,
    DaemonSets,
    Jobs,
    CronJobs,
    Nodes,
    Namespaces,
    ConfigMaps,
    Secrets,
    Services,
    Ingresses,
    NetworkPolicies,
    PersistentVolumeClaims,
    PersistentVolumes,
    StorageClasses,
    ServiceAccounts,
    Roles,
    RoleBindings,
    ClusterRoles,
    ClusterRoleBindings,
    CustomResourceDefinitions,
    Events,
}

impl ResourceKind {
    pub const ALL: &'static [ResourceKind] = &[
        ResourceKind::Pods,
        ResourceKind::Deployments,
        ResourceKind::ReplicaSets,
        ResourceKind::StatefulSets,
        ResourceKind::DaemonSets,
        ResourceKind::Jobs,
        ResourceKind::CronJobs,
        ResourceKind::Nodes,
        ResourceKind::Namespaces,
        ResourceKind::ConfigMaps,
        ResourceKind::Secrets,
        ResourceKind::Services,
        ResourceKind::Ingresses,
        ResourceKind::NetworkPolicies,
        ResourceKind::PersistentVolumeClaims,
        ResourceKind::PersistentVolumes,
        ResourceKind::StorageClasses,
        ResourceKind::ServiceAccounts,
        ResourceKind::Roles,
        ResourceKind::RoleBindings,
        ResourceKind::ClusterRoles,
        ResourceKind::ClusterRoleBindings,
        ResourceKind::CustomResourceDefinitions,
        ResourceKind::Events,
    ];

    pub fn group(&self) -> &'static str {
        match self {
            ResourceKind::Pods
            | ResourceKind::Nodes
            | ResourceKind::Namespaces
            | ResourceKind::ConfigMaps
            | ResourceKind::Secrets
            | ResourceKind::Services
            | ResourceKind::PersistentVolumeClaims
            | ResourceKind::PersistentVolumes
            | ResourceKind::ServiceAccounts
            | ResourceKind::Events => "",
            ResourceKind::Deployments
            | ResourceKind::ReplicaSets
            | ResourceKind::StatefulSets
            | ResourceKind::DaemonSets => "apps",
            ResourceKind::Jobs | ResourceKind::CronJobs => "batch",
            ResourceKind::Ingresses | ResourceKind::NetworkPolicies => "networking.k8s.io",
            ResourceKind::StorageClasses => "storage.k8s.io",
            ResourceKind::Roles
            | ResourceKind::RoleBindings
            | ResourceKind::ClusterRoles
            | ResourceKind::ClusterRoleBindings => "rbac.authorization.k8s.io",
            ResourceKind::CustomResourceDefinitions => "apiextensions.k8s.io",
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            ResourceKind::Pods => "pods",
            ResourceKind::Deployments => "deployments",
            ResourceKind::ReplicaSets => "replicasets",
            ResourceKind::StatefulSets => "statefulsets",
            ResourceKind::DaemonSets => "daemonsets",
            ResourceKind::Jobs => "jobs",
            ResourceKind::CronJobs => "cronjobs",
            ResourceKind::Nodes => "nodes",
            ResourceKind::Namespaces => "namespaces",
            ResourceKind::ConfigMaps => "configmaps",
            ResourceKind::Secrets => "secrets",
            ResourceKind::Services => "services",
            ResourceKind::Ingresses => "ingresses",
            ResourceKind::NetworkPolicies => "networkpolicies",
            ResourceKind::PersistentVolumeClaims => "persistentvolumeclaims",
            ResourceKind::PersistentVolumes => "persistentvolumes",
            ResourceKind::StorageClasses => "storageclasses",
            ResourceKind::ServiceAccounts => "serviceaccounts",
            ResourceKind::Roles => "roles",
            ResourceKind::RoleBindings => "rolebindings",
            ResourceKind::ClusterRoles => "clusterroles",
            ResourceKind::ClusterRoleBindings => "clusterrolebindings",
            ResourceKind::CustomResourceDefinitions => "customresourcedefinitions",
            ResourceKind::Events => "events",
        }
    }
}

/// Observed resource usage of one node, from the metrics API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeUsage {
    pub cpu_millis: u64,
    pub memory_bytes: u64,
}

/// Read access to a cluster's mirrored state. Builders depend on this trait
/// only; the hub implements it over its stores and tests implement it over
/// plain vectors. Default bodies return empty listings so fakes override
/// just what they exercise.
pub trait ClusterState: Send + Sync {
    fn cluster_id(&self) -> &str;

    fn pods(&self, _ns: Option<&str>) -> Result<Vec<Arc<Pod>>, Error> {
        Ok(Vec::new())
    }
    fn deployments(&self, _ns: Option<&str>) -> Result<Vec<Arc<Deployment>>, Error> {
        Ok(Vec::new())
    }
    fn replica_sets(&self, _ns: Option<&str>) -> Result<Vec<Arc<ReplicaSet>>, Error> {
        Ok(Vec::new())
    }
    fn stateful_sets(&self, _ns: Option<&str>) -> Result<Vec<Arc<StatefulSet>>, Error> {
        Ok(Vec::new())
    }
    fn daemon_sets(&self, _ns: Option<&str>) -> Result<Vec<Arc<DaemonSet>>, Error> {
        Ok(Vec::new())
    }
    fn jobs(&self, _ns: Option<&str>) -> Result<Vec<Arc<Job>>, Error> {
        Ok(Vec::new())
    }
    fn cron_jobs(&self, _ns: Option<&str>) -> Result<Vec<Arc<CronJob>>, Error> {
        Ok(Vec::new())
    }
    fn nodes(&self) -> Result<Vec<Arc<Node>>, Error> {
        Ok(Vec::new())
    }
    fn namespaces(&self) -> Result<Vec<Arc<Namespace>>, Error> {
        Ok(Vec::new())
    }
    fn config_maps(&self, _ns: Option<&str>) -> Result<Vec<Arc<ConfigMap>>, Error> {
        Ok(Vec::new())
    }
    fn secrets(&self, _ns: Option<&str>) -> Result<Vec<Arc<Secret>>, Error> {
        Ok(Vec::new())
    }
    fn services(&self, _ns: Option<&str>) -> Result<Vec<Arc<Service>>, Error> {
        Ok(Vec::new())
    }
    fn ingresses(&self, _ns: Option<&str>) -> Result<Vec<Arc<Ingress>>, Error> {
        Ok(Vec::new())
    }
    fn network_policies(&self, _ns: Option<&str>) -> Result<Vec<Arc<NetworkPolicy>>, Error> {
        Ok(Vec::new())
    }
    fn persistent_volume_claims(
        &self,
        _ns: Option<&str>,
    ) -> Result<Vec<Arc<PersistentVolumeClaim>>, Error> {
        Ok(Vec::new())
    }
    fn persistent_volumes(&self) -> Result<Vec<Arc<PersistentVolume>>, Error> {
        Ok(Vec::new())
    }
    fn storage_classes(&self) -> Result<Vec<Arc<StorageClass>>, Error> {
        Ok(Vec::new())
    }
    fn service_accounts(&self, _ns: Option<&str>) -> Result<Vec<Arc<ServiceAccount>>, Error> {
        Ok(Vec::new())
    }
    fn roles(&self, _ns: Option<&str>) -> Result<Vec<Arc<Role>>, Error> {
        Ok(Vec::new())
    }
    fn role_bindings(&self, _ns: Option<&str>) -> Result<Vec<Arc<RoleBinding>>, Error> {
        Ok(Vec::new())
    }
    fn cluster_roles(&self) -> Result<Vec<Arc<ClusterRole>>, Error> {
        Ok(Vec::new())
    }
    fn cluster_role_bindings(&self) -> Result<Vec<Arc<ClusterRoleBinding>>, Error> {
        Ok(Vec::new())
    }
    fn custom_resource_definitions(&self) -> Result<Vec<Arc<CustomResourceDefinition>>, Error> {
        Ok(Vec::new())
    }
    fn events(&self, _ns: Option<&str>) -> Result<Vec<Arc<K8sEvent>>, Error> {
        Ok(Vec::new())
    }

    /// `namespace/name` of every pod scheduled on `node`.
    fn pods_on_node(&self, _node: &str) -> Vec<String> {
        Vec::new()
    }

    /// Last polled usage per node name; empty when the metrics API is absent.
    fn node_usage(&self) -> HashMap<String, NodeUsage> {
        HashMap::new()
    }
}

/// A lazily activated reflector store.
struct Cell<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    store: Mutex<Option<Store<K>>>,
}

impl<K> Cell<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    fn new() -> Self {
        Self {
            store: Mutex::new(None),
        }
    }

    fn set(&self, store: Store<K>) {
        *self.store.lock().unwrap() = Some(store);
    }

    fn get(&self) -> Option<Store<K>> {
        self.store.lock().unwrap().clone()
    }
}

struct Stores {
    pods: Cell<Pod>,
    deployments: Cell<Deployment>,
    replica_sets: Cell<ReplicaSet>,
    stateful_sets: Cell<StatefulSet>,
    daemon_sets: Cell<DaemonSet>,
    jobs: Cell<Job>,
    cron_jobs: Cell<CronJob>,
    nodes: Cell<Node>,
    namespaces: Cell<Namespace>,
    config_maps: Cell<ConfigMap>,
    secrets: Cell<Secret>,
    services: Cell<Service>,
    ingresses: Cell<Ingress>,
    network_policies: Cell<NetworkPolicy>,
    pvcs: Cell<PersistentVolumeClaim>,
    pvs: Cell<PersistentVolume>,
    storage_classes: Cell<StorageClass>,
    service_accounts: Cell<ServiceAccount>,
    roles: Cell<Role>,
    role_bindings: Cell<RoleBinding>,
    cluster_roles: Cell<ClusterRole>,
    cluster_role_bindings: Cell<ClusterRoleBinding>,
    crds: Cell<CustomResourceDefinition>,
    events: Cell<K8sEvent>,
}

impl Stores {
    fn new() -> Self {
        Self {
            pods: Cell::new(),
            deployments: Cell::new(),
            replica_sets: Cell::new(),
            stateful_sets: Cell::new(),
            daemon_sets: Cell::new(),
            jobs: Cell::new(),
            cron_jobs: Cell::new(),
            nodes: Cell::new(),
            namespaces: Cell::new(),
            config_maps: Cell::new(),
            secrets: Cell::new(),
            services: Cell::new(),
            ingresses: Cell::new(),
            network_policies: Cell::new(),
            pvcs: Cell::new(),
            pvs: Cell::new(),
            storage_classes: Cell::new(),
            service_accounts: Cell::new(),
            roles: Cell::new(),
            role_bindings: Cell::new(),
            cluster_roles: Cell::new(),
            cluster_role_bindings: Cell::new(),
            crds: Cell::new(),
            events: Cell::new(),
        }
    }
}

#[derive(Default)]
struct PodIndexState {
    by_node: HashMap<String, BTreeSet<String>>,
    assignments: HashMap<String, String>,
}

/// `node -> pods` index maintained from the pod watch.
#[derive(Default)]
pub struct PodNodeIndex {
    state: Mutex<PodIndexState>,
}

impl PodNodeIndex {
    fn pod_key(pod: &Pod) -> String {
        format!(
            "{}/{}",
            pod.meta().namespace.as_deref().unwrap_or_default(),
            pod.meta().name.as_deref().unwrap_or_default()
        )
    }

    pub fn apply(&self, pod: &Pod) {
        let key = Self::pod_key(pod);
        let node = pod.spec.as_ref().and_then(|s| s.node_name.clone());
        let mut state = self.state.lock().unwrap();

        if let Some(prev) = state.assignments.get(&key).cloned() {
            if Some(&prev) == node.as_ref() {
                return;
            }
            if let Some(set) = state.by_node.get_mut(&prev) {
                set.remove(&key);
                if set.is_empty() {
                    state.by_node.remove(&prev);
                }
            }
            state.assignments.remove(&key);
        }

        if let Some(node) = node {
            state.assignments.insert(key.clone(), node.clone());
            state.by_node.entry(node).or_default().insert(key);
        }
    }

    pub fn remove(&self, pod: &Pod) {
        let key = Self::pod_key(pod);
        let mut state = self.state.lock().unwrap();
        if let Some(node) = state.assignments.remove(&key) {
            if let Some(set) = state.by_node.get_mut(&node) {
                set.remove(&key);
                if set.is_empty() {
                    state.by_node.remove(&node);
                }
            }
        }
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.by_node.clear();
        state.assignments.clear();
    }

    pub fn pods_on_node(&self, node: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .by_node
            .get(node)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }
}

type ReadyWaiter = Pin<Box<dyn Future<Output = ()> + Send>>;

/// The per-cluster informer hub.
pub struct ClusterInformers {
    cluster_id: String,
    client: Client,
    permissions: Arc<PermissionChecker>,
    telemetry: Arc<TelemetryRecorder>,
    events_manager: Arc<EventStreamManager>,
    cancel: CancellationToken,
    stores: Stores,
    pod_index: Arc<PodNodeIndex>,
    pending: Mutex<VecDeque<ResourceKind>>,
    denied: Mutex<BTreeSet<ResourceKind>>,
    active: Mutex<BTreeSet<ResourceKind>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    ready_waiters: Mutex<Vec<ReadyWaiter>>,
    node_usage: Mutex<HashMap<String, NodeUsage>>,
    has_synced: AtomicBool,
}

impl ClusterInformers {
    /// Construction never touches the API server; all network work happens
    /// in [`start`](Self::start).
    pub fn new(
        cluster_id: &str,
        client: Client,
        permissions: Arc<PermissionChecker>,
        events_manager: Arc<EventStreamManager>,
        telemetry: Arc<TelemetryRecorder>,
    ) -> Self {
        Self {
            cluster_id: cluster_id.to_string(),
            client,
            permissions,
            telemetry,
            events_manager,
            cancel: CancellationToken::new(),
            stores: Stores::new(),
            pod_index: Arc::new(PodNodeIndex::default()),
            pending: Mutex::new(VecDeque::new()),
            denied: Mutex::new(BTreeSet::new()),
            active: Mutex::new(BTreeSet::new()),
            tasks: Mutex::new(Vec::new()),
            ready_waiters: Mutex::new(Vec::new()),
            node_usage: Mutex::new(HashMap::new()),
            has_synced: AtomicBool::new(false),
        }
    }

    /// Queues every known resource family, resolves permissions, activates
    /// the allowed informers and waits for their first sync (bounded).
    pub async fn start(&self) -> Result<(), Error> {
        {
            let mut pending = self.pending.lock().unwrap();
            for kind in ResourceKind::ALL {
                pending.push_back(*kind);
            }
        }
        self.prime_permissions().await;
        self.wait_synced().await;
        info!(
            target: LOG_TARGET,
            "cluster {} informers started (synced={})",
            self.cluster_id,
            self.has_synced()
        );
        Ok(())
    }

    /// Resolves list permissions for every family (one review per unique
    /// key), re-queues previously denied families and drains the pending
    /// queue.
    pub async fn prime_permissions(&self) {
        let requests: Vec<PermissionRequest> = ResourceKind::ALL
            .iter()
            .map(|kind| PermissionRequest::list(kind.group(), kind.plural()))
            .collect();
        self.permissions.prime(&requests).await;

        {
            let mut pending = self.pending.lock().unwrap();
            let mut denied = self.denied.lock().unwrap();
            while let Some(kind) = denied.pop_first() {
                pending.push_back(kind);
            }
        }
        self.process_pending().await;
    }

    /// Drains the pending queue, activating permitted informers. Denied
    /// entries are recorded and not retried until the next prime cycle.
    pub async fn process_pending(&self) {
        let kinds: Vec<ResourceKind> = {
            let mut pending = self.pending.lock().unwrap();
            pending.drain(..).collect()
        };
        for kind in kinds {
            if self.active.lock().unwrap().contains(&kind) {
                continue;
            }
            if self.can_list_resource(kind.group(), kind.plural()).await {
                self.activate(kind);
                self.active.lock().unwrap().insert(kind);
            } else {
                warn!(
                    target: LOG_TARGET,
                    "cluster {}: informer for {} denied by RBAC",
                    self.cluster_id,
                    kind.plural()
                );
                self.denied.lock().unwrap().insert(kind);
            }
        }
    }

    pub async fn can_list_resource(&self, group: &str, resource: &str) -> bool {
        self.permissions
            .allowed(&PermissionRequest::list(group, resource))
            .await
    }

    pub fn has_synced(&self) -> bool {
        self.has_synced.load(Ordering::SeqCst)
    }

    pub fn permissions(&self) -> &Arc<PermissionChecker> {
        &self.permissions
    }

    /// Stops every informer task and blocks until they drain.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock().unwrap();
            tasks.drain(..).collect()
        };
        for task in tasks {
            let _ = task.await;
        }
    }

    async fn wait_synced(&self) {
        let waiters: Vec<ReadyWaiter> = {
            let mut waiters = self.ready_waiters.lock().unwrap();
            waiters.drain(..).collect()
        };
        match tokio::time::timeout(INFORMER_SYNC_TIMEOUT, futures::future::join_all(waiters)).await
        {
            Ok(_) => self.has_synced.store(true, Ordering::SeqCst),
            Err(_) => warn!(
                target: LOG_TARGET,
                "cluster {}: informers did not finish initial sync within {:?}",
                self.cluster_id,
                INFORMER_SYNC_TIMEOUT
            ),
        }
    }

    fn activate(&self, kind: ResourceKind) {
        match kind {
            ResourceKind::Pods => self.activate_pods(),
            ResourceKind::Events => self.activate_events(),
            ResourceKind::Deployments => self.activate_typed(kind, &self.stores.deployments),
            ResourceKind::ReplicaSets => self.activate_typed(kind, &self.stores.replica_sets),
            ResourceKind::StatefulSets => self.activate_typed(kind, &self.stores.stateful_sets),
            ResourceKind::DaemonSets => self.activate_typed(kind, &self.stores.daemon_sets),
            ResourceKind::Jobs => self.activate_typed(kind, &self.stores.jobs),
            ResourceKind::CronJobs => self.activate_typed(kind, &self.stores.cron_jobs),
            ResourceKind::Nodes => self.activate_typed(kind, &self.stores.nodes),
            ResourceKind::Namespaces => self.activate_typed(kind, &self.stores.namespaces),
            ResourceKind::ConfigMaps => self.activate_typed(kind, &self.stores.config_maps),
            ResourceKind::Secrets => self.activate_typed(kind, &self.stores.secrets),
            ResourceKind::Services => self.activate_typed(kind, &self.stores.services),
            ResourceKind::Ingresses => self.activate_typed(kind, &self.stores.ingresses),
            ResourceKind::NetworkPolicies => {
                self.activate_typed(kind, &self.stores.network_policies)
            }
            ResourceKind::PersistentVolumeClaims => self.activate_typed(kind, &self.stores.pvcs),
            ResourceKind::PersistentVolumes => self.activate_typed(kind, &self.stores.pvs),
            ResourceKind::StorageClasses => self.activate_typed(kind, &self.stores.storage_classes),
            ResourceKind::ServiceAccounts => {
                self.activate_typed(kind, &self.stores.service_accounts)
            }
            ResourceKind::Roles => self.activate_typed(kind, &self.stores.roles),
            ResourceKind::RoleBindings => self.activate_typed(kind, &self.stores.role_bindings),
            ResourceKind::ClusterRoles => self.activate_typed(kind, &self.stores.cluster_roles),
            ResourceKind::ClusterRoleBindings => {
                self.activate_typed(kind, &self.stores.cluster_role_bindings)
            }
            ResourceKind::CustomResourceDefinitions => {
                self.activate_typed(kind, &self.stores.crds)
            }
        }
    }

    fn activate_typed<K>(&self, kind: ResourceKind, cell: &Cell<K>)
    where
        K: Resource<DynamicType = ()>
            + Clone
            + serde::de::DeserializeOwned
            + std::fmt::Debug
            + Send
            + Sync
            + 'static,
    {
        let api: Api<K> = Api::all(self.client.clone());
        let (reader, writer) = reflector::store::<K>();
        cell.set(reader.clone());

        let cancel = self.cancel.clone();
        let resource = kind.plural();
        let task = tokio::spawn(async move {
            let mut stream = watcher(api, WatcherConfig::default())
                .default_backoff()
                .reflect(writer)
                .boxed();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    item = stream.next() => match item {
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            debug!(target: LOG_TARGET, "watch {resource}: {e}");
                        }
                        None => break,
                    }
                }
            }
        });
        self.tasks.lock().unwrap().push(task);
        self.ready_waiters.lock().unwrap().push(Box::pin(async move {
            let _ = reader.wait_until_ready().await;
        }));
    }

    /// Pods additionally maintain the by-node index, so the raw watch events
    /// are observed instead of the flattened object stream.
    fn activate_pods(&self) {
        let api: Api<Pod> = Api::all(self.client.clone());
        let (reader, writer) = reflector::store::<Pod>();
        self.stores.pods.set(reader.clone());

        let cancel = self.cancel.clone();
        let index = Arc::clone(&self.pod_index);
        let task = tokio::spawn(async move {
            let mut stream = watcher(api, WatcherConfig::default())
                .default_backoff()
                .reflect(writer)
                .boxed();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    item = stream.next() => match item {
                        Some(Ok(event)) => match event {
                            WatchEvent::Init => index.clear(),
                            WatchEvent::InitApply(pod) | WatchEvent::Apply(pod) => {
                                index.apply(&pod)
                            }
                            WatchEvent::Delete(pod) => index.remove(&pod),
                            WatchEvent::InitDone => {}
                        },
                        Some(Err(e)) => {
                            debug!(target: LOG_TARGET, "watch pods: {e}");
                        }
                        None => break,
                    }
                }
            }
        });
        self.tasks.lock().unwrap().push(task);
        self.ready_waiters.lock().unwrap().push(Box::pin(async move {
            let _ = reader.wait_until_ready().await;
        }));
    }

    /// Events feed the fan-out manager. Replays during a watch restart
    /// arrive as `InitApply` and are not re-published; a restart after the
    /// first sync counts as a resync.
    fn activate_events(&self) {
        let api: Api<K8sEvent> = Api::all(self.client.clone());
        let (reader, writer) = reflector::store::<K8sEvent>();
        self.stores.events.set(reader.clone());

        let cancel = self.cancel.clone();
        let manager = Arc::clone(&self.events_manager);
        let telemetry = Arc::clone(&self.telemetry);
        let stream_name = manager.stream_name().to_string();
        let task = tokio::spawn(async move {
            let mut initial_done = false;
            let mut stream = watcher(api, WatcherConfig::default())
                .default_backoff()
                .reflect(writer)
                .boxed();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    item = stream.next() => match item {
                        Some(Ok(event)) => match event {
                            WatchEvent::Init => {
                                if initial_done {
                                    telemetry.record_resync(&stream_name);
                                }
                            }
                            WatchEvent::InitDone => initial_done = true,
                            WatchEvent::Apply(ev) => {
                                manager.publish(synthesize_entry(&ev));
                            }
                            WatchEvent::InitApply(_) | WatchEvent::Delete(_) => {}
                        },
                        Some(Err(e)) => {
                            debug!(target: LOG_TARGET, "watch events: {e}");
                        }
                        None => break,
                    }
                }
            }
        });
        self.tasks.lock().unwrap().push(task);
        self.ready_waiters.lock().unwrap().push(Box::pin(async move {
            let _ = reader.wait_until_ready().await;
        }));
    }

    fn missing_store_error(&self, kind: ResourceKind) -> Error {
        if self.denied.lock().unwrap().contains(&kind) {
            Error::permission_denied("", kind.plural())
        } else {
            Error::NotReady {
                resource: kind.plural().to_string(),
            }
        }
    }

    fn list_cell<K>(
        &self,
        cell: &Cell<K>,
        kind: ResourceKind,
        ns: Option<&str>,
    ) -> Result<Vec<Arc<K>>, Error>
    where
        K: Resource<DynamicType = ()> + Clone + 'static,
    {
        let Some(store) = cell.get() else {
            return Err(self.missing_store_error(kind));
        };
        let mut items = store.state();
        if let Some(ns) = ns {
            items.retain(|item| item.meta().namespace.as_deref() == Some(ns));
        }
        Ok(items)
    }

    /// Fetches node usage from the metrics API. Best-effort: absence of the
    /// metrics server is an error the caller logs and ignores.
    pub async fn poll_node_metrics(&self) -> Result<usize, Error> {
        let request = http::Request::get("/apis/metrics.k8s.io/v1beta1/nodes")
            .body(Vec::new())
            .map_err(|e| Error::message(format!("metrics request: {e}")))?;
        let list: NodeMetricsList = self.client.request(request).await?;

        let mut usage = HashMap::new();
        for item in list.items {
            usage.insert(
                item.metadata.name,
                NodeUsage {
                    cpu_millis: parse_cpu_millis(&item.usage.cpu).unwrap_or(0),
                    memory_bytes: parse_memory_bytes(&item.usage.memory).unwrap_or(0),
                },
            );
        }
        let count = usage.len();
        *self.node_usage.lock().unwrap() = usage;
        Ok(count)
    }
}

impl ClusterState for ClusterInformers {
    fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    fn pods(&self, ns: Option<&str>) -> Result<Vec<Arc<Pod>>, Error> {
        self.list_cell(&self.stores.pods, ResourceKind::Pods, ns)
    }

    fn deployments(&self, ns: Option<&str>) -> Result<Vec<Arc<Deployment>>, Error> {
        self.list_cell(&self.stores.deployments, ResourceKind::Deployments, ns)
    }

    fn replica_sets(&self, ns: Option<&str>) -> Result<Vec<Arc<ReplicaSet>>, Error> {
        self.list_cell(&self.stores.replica_sets, ResourceKind::ReplicaSets, ns)
    }

    fn stateful_sets(&self, ns: Option<&str>) -> Result<Vec<Arc<StatefulSet>>, Error> {
        self.list_cell(&self.stores.stateful_sets, ResourceKind::StatefulSets, ns)
    }

    fn daemon_sets(&self, ns: Option<&str>) -> Result<Vec<Arc<DaemonSet>>, Error> {
        self.list_cell(&self.stores.daemon_sets, ResourceKind::DaemonSets, ns)
    }

    fn jobs(&self, ns: Option<&str>) -> Result<Vec<Arc<Job>>, Error> {
        self.list_cell(&self.stores.jobs, ResourceKind::Jobs, ns)
    }

    fn cron_jobs(&self, ns: Option<&str>) -> Result<Vec<Arc<CronJob>>, Error> {
        self.list_cell(&self.stores.cron_jobs, ResourceKind::CronJobs, ns)
    }

    fn nodes(&self) -> Result<Vec<Arc<Node>>, Error> {
        self.list_cell(&self.stores.nodes, ResourceKind::Nodes, None)
    }

    fn namespaces(&self) -> Result<Vec<Arc<Namespace>>, Error> {
        self.list_cell(&self.stores.namespaces, ResourceKind::Namespaces, None)
    }

    fn config_maps(&self, ns: Option<&str>) -> Result<Vec<Arc<ConfigMap>>, Error> {
        self.list_cell(&self.stores.config_maps, ResourceKind::ConfigMaps, ns)
    }

    fn secrets(&self, ns: Option<&str>) -> Result<Vec<Arc<Secret>>, Error> {
        self.list_cell(&self.stores.secrets, ResourceKind::Secrets, ns)
    }

    fn services(&self, ns: Option<&str>) -> Result<Vec<Arc<Service>>, Error> {
        self.list_cell(&self.stores.services, ResourceKind::Services, ns)
    }

    fn ingresses(&self, ns: Option<&str>) -> Result<Vec<Arc<Ingress>>, Error> {
        self.list_cell(&self.stores.ingresses, ResourceKind::Ingresses, ns)
    }

    fn network_policies(&self, ns: Option<&str>) -> Result<Vec<Arc<NetworkPolicy>>, Error> {
        self.list_cell(
            &self.stores.network_policies,
            ResourceKind::NetworkPolicies,
            ns,
        )
    }

    fn persistent_volume_claims(
        &self,
        ns: Option<&str>,
    ) -> Result<Vec<Arc<PersistentVolumeClaim>>, Error> {
        self.list_cell(&self.stores.pvcs, ResourceKind::PersistentVolumeClaims, ns)
    }

    fn persistent_volumes(&self) -> Result<Vec<Arc<PersistentVolume>>, Error> {
        self.list_cell(&self.stores.pvs, ResourceKind::PersistentVolumes, None)
    }

    fn storage_classes(&self) -> Result<Vec<Arc<StorageClass>>, Error> {
        self.list_cell(
            &self.stores.storage_classes,
            ResourceKind::StorageClasses,
            None,
        )
    }

    fn service_accounts(&self, ns: Option<&str>) -> Result<Vec<Arc<ServiceAccount>>, Error> {
        self.list_cell(
            &self.stores.service_accounts,
            ResourceKind::ServiceAccounts,
            ns,
        )
    }

    fn roles(&self, ns: Option<&str>) -> Result<Vec<Arc<Role>>, Error> {
        self.list_cell(&self.stores.roles, ResourceKind::Roles, ns)
    }

    fn role_bindings(&self, ns: Option<&str>) -> Result<Vec<Arc<RoleBinding>>, Error> {
        self.list_cell(&self.stores.role_bindings, ResourceKind::RoleBindings, ns)
    }

    fn cluster_roles(&self) -> Result<Vec<Arc<ClusterRole>>, Error> {
        self.list_cell(&self.stores.cluster_roles, ResourceKind::ClusterRoles, None)
    }

    fn cluster_role_bindings(&self) -> Result<Vec<Arc<ClusterRoleBinding>>, Error> {
        self.list_cell(
            &self.stores.cluster_role_bindings,
            ResourceKind::ClusterRoleBindings,
            None,
        )
    }

    fn custom_resource_definitions(&self) -> Result<Vec<Arc<CustomResourceDefinition>>, Error> {
        self.list_cell(
            &self.stores.crds,
            ResourceKind::CustomResourceDefinitions,
            None,
        )
    }

    fn events(&self, ns: Option<&str>) -> Result<Vec<Arc<K8sEvent>>, Error> {
        self.list_cell(&self.stores.events, ResourceKind::Events, ns)
    }

    fn pods_on_node(&self, node: &str) -> Vec<String> {
        self.pod_index.pods_on_node(node)
    }

    fn node_usage(&self) -> HashMap<String, NodeUsage> {
        self.node_usage.lock().unwrap().clone()
    }
}

#[derive(serde::Deserialize)]
struct NodeMetricsList {
    #[serde(default)]
    items: Vec<NodeMetricsItem>,
}

#[derive(serde::Deserialize)]
struct NodeMetricsItem {
    metadata: NodeMetricsMeta,
    usage: NodeMetricsUsage,
}

#[derive(serde::Deserialize)]
struct NodeMetricsMeta {
    name: String,
}

#[derive(serde::Deserialize)]
struct NodeMetricsUsage {
    #[serde(default)]
    cpu: String,
    #[serde(default)]
    memory: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod(ns: &str, name: &str, node: Option<&str>) -> Pod {
        let mut pod = Pod::default();
        pod.metadata.namespace = Some(ns.to_string());
        pod.metadata.name = Some(name.to_string());
        if let Some(node) = node {
            pod.spec = Some(k8s_openapi::api::core::v1::PodSpec {
                node_name: Some(node.to_string()),
                ..Default::default()
            });
        }
        pod
    }

    #[test]
    fn pod_index_tracks_assignments() {
        let index = PodNodeIndex::default();
        index.apply(&pod("default", "a", Some("node-1")));
        index.apply(&pod("default", "b", Some("node-1")));
        index.apply(&pod("other", "c", Some("node-2")));

        assert_eq!(
            index.pods_on_node("node-1"),
            vec!["default/a".to_string(), "default/b".to_string()]
        );
        assert_eq!(index.pods_on_node("node-2"), vec!["other/c".to_string()]);
        assert!(index.pods_on_node("node-3").is_empty());
    }

    #[test]
    fn pod_index_handles_reschedule_and_delete() {
        let index = PodNodeIndex::default();
        index.apply(&pod("default", "a", Some("node-1")));
        index.apply(&pod("default", "a", Some("node-2")));
        assert!(index.pods_on_node("node-1").is_empty());
        assert_eq!(index.pods_on_node("node-2"), vec!["default/a".to_string()]);

        index.remove(&pod("default", "a", Some("node-2")));
        assert!(index.pods_on_node("node-2").is_empty());
    }

    #[test]
    fn pod_index_clear_resets_everything() {
        let index = PodNodeIndex::default();
        index.apply(&pod("default", "a", Some("node-1")));
        index.clear();
        assert!(index.pods_on_node("node-1").is_empty());
    }

    #[test]
    fn unscheduled_pods_are_not_indexed() {
        let index = PodNodeIndex::default();
        index.apply(&pod("default", "pending", None));
        assert!(index.pods_on_node("").is_empty());
    }

    #[test]
    fn resource_kinds_cover_known_groups() {
        assert_eq!(ResourceKind::Pods.group(), "");
        assert_eq!(ResourceKind::Deployments.group(), "apps");
        assert_eq!(ResourceKind::CronJobs.group(), "batch");
        assert_eq!(ResourceKind::Roles.group(), "rbac.authorization.k8s.io");
        assert_eq!(
            ResourceKind::CustomResourceDefinitions.plural(),
            "customresourcedefinitions"
        );
        // Every kind has a non-empty plural and appears exactly once.
        let mut seen = std::collections::HashSet::new();
        for kind in ResourceKind::ALL {
            assert!(!kind.plural().is_empty());
            assert!(seen.insert(kind.plural()));
        }
    }
}
