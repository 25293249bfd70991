//! Log streaming for pods and the workloads that own them. `tail` resolves
//! the target pods and fetches their recent lines; `run` keeps following
//! every container (tracking pod churn for workload kinds); `open_stream`
//! packages both into the wire message sequence a transport can forward
//! verbatim.

pub mod api;
mod follow;

use crate::config::RefreshConfig;
use crate::error::{self, Error};
use crate::telemetry::TelemetryRecorder;
use api::{LogFetchParams, PodLogApi};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::ResourceExt;
use kube::runtime::watcher::Event as WatchEvent;
use porthole_types::{LogEntry, PermissionDeniedStatus, StreamMessage};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const LOG_TARGET: &str = "refresh::logs";

pub const LOGS_DOMAIN: &str = "object-logs";

/// Capacity of the drop-hint channel that aggregates backpressure counts.
const DROP_CHANNEL_CAPACITY: usize = 16;

/// Workload kinds whose pods can be log-streamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    Pod,
    Deployment,
    ReplicaSet,
    StatefulSet,
    DaemonSet,
    Job,
    CronJob,
}

impl FromStr for WorkloadKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pod" | "pods" => Ok(WorkloadKind::Pod),
            "deployment" | "deployments" | "deploy" => Ok(WorkloadKind::Deployment),
            "replicaset" | "replicasets" | "rs" => Ok(WorkloadKind::ReplicaSet),
            "statefulset" | "statefulsets" | "sts" => Ok(WorkloadKind::StatefulSet),
            "daemonset" | "daemonsets" | "ds" => Ok(WorkloadKind::DaemonSet),
            "job" | "jobs" => Ok(WorkloadKind::Job),
            "cronjob" | "cronjobs" => Ok(WorkloadKind::CronJob),
            other => Err(Error::message(format!("unsupported log kind {other:?}"))),
        }
    }
}

/// What to stream: one workload (or pod) in one namespace, optionally
/// narrowed to a single container.
#[derive(Debug, Clone)]
pub struct LogSessionOptions {
    pub namespace: String,
    pub kind: WorkloadKind,
    pub name: String,
    /// Exact container name; for init containers `"<name> (init)"` also
    /// matches.
    pub container: Option<String>,
    /// Zero and negative values fall back to the configured default.
    pub tail_lines: Option<i64>,
    /// The scope string this session serves, echoed in every message.
    pub scope: String,
}

/// Per-container follow state. `last_timestamp`/`last_line` drive the
/// reconnect dedup.
#[derive(Debug, Clone)]
pub struct ContainerTarget {
    pub namespace: String,
    pub pod: String,
    pub container: String,
    pub is_init: bool,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub last_line: String,
}

/// Output of the startup tail: merged entries plus the state the followers
/// start from.
#[derive(Debug, Clone, Default)]
pub struct TailResult {
    pub entries: Vec<LogEntry>,
    pub targets: Vec<ContainerTarget>,
    pub pods: Vec<String>,
    pub selector: Option<String>,
}

/// Splits a kubelet `timestamps=true` line into its timestamp token and
/// content. Lines without a parsable first token come back undated.
pub(crate) fn split_log_line(raw: &str) -> (Option<DateTime<Utc>>, String, String) {
    match raw.split_once(' ') {
        Some((token, rest)) => match DateTime::parse_from_rfc3339(token) {
            Ok(ts) => (
                Some(ts.with_timezone(&Utc)),
                token.to_string(),
                rest.to_string(),
            ),
            Err(_) => (None, String::new(), raw.to_string()),
        },
        None => (None, String::new(), raw.to_string()),
    }
}

/// Builds follow targets for a pod: init containers first (marked), then
/// regular containers, filtered when the caller asked for one container.
fn container_targets(pod: &Pod, filter: Option<&str>) -> Vec<ContainerTarget> {
    let namespace = pod.namespace().unwrap_or_default();
    let pod_name = pod.name_any();
    let mut targets = Vec::new();

    let matches = |name: &str, is_init: bool| match filter {
        None => true,
        Some(filter) => filter == name || (is_init && filter == format!("{name} (init)")),
    };

    if let Some(spec) = &pod.spec {
        if let Some(init_containers) = &spec.init_containers {
            for container in init_containers {
                if matches(&container.name, true) {
                    targets.push(ContainerTarget {
                        namespace: namespace.clone(),
                        pod: pod_name.clone(),
                        container: container.name.clone(),
                        is_init: true,
                        last_timestamp: None,
                        last_line: String::new(),
                    });
                }
            }
        }
        for container in &spec.containers {
            if matches(&container.name, false) {
                targets.push(ContainerTarget {
                    namespace: namespace.clone(),
                    pod: pod_name.clone(),
                    container: container.name.clone(),
                    is_init: false,
                    last_timestamp: None,
                    last_line: String::new(),
                });
            }
        }
    }
    targets
}

fn selector_string(selector: Option<&LabelSelector>) -> Option<String> {
    let match_labels = selector?.match_labels.as_ref()?;
    if match_labels.is_empty() {
        return None;
    }
    Some(
        match_labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(","),
    )
}

fn normalize_tail(requested: Option<i64>, default: i64) -> i64 {
    match requested {
        Some(n) if n > 0 => n,
        _ => default,
    }
}

struct PodSelection {
    pods: Vec<Pod>,
    selector: Option<String>,
}

/// State shared between a session's followers, its pod watcher and the
/// message assembler.
pub(crate) struct SessionShared {
    pub(crate) api: Arc<dyn PodLogApi>,
    pub(crate) config: RefreshConfig,
    pub(crate) telemetry: Arc<TelemetryRecorder>,
    pub(crate) stream_name: String,
    pub(crate) entries_tx: mpsc::Sender<LogEntry>,
    pub(crate) drops_tx: mpsc::Sender<u64>,
    cancel: CancellationToken,
    pod_scopes: Mutex<HashMap<String, CancellationToken>>,
}

impl SessionShared {
    /// Cancellation scope for one pod; created on demand, cancelled when the
    /// pod is deleted.
    fn pod_scope(&self, pod: &str) -> CancellationToken {
        let mut scopes = self.pod_scopes.lock().unwrap();
        scopes
            .entry(pod.to_string())
            .or_insert_with(|| self.cancel.child_token())
            .clone()
    }

    fn cancel_pod(&self, pod: &str) {
        if let Some(token) = self.pod_scopes.lock().unwrap().remove(pod) {
            token.cancel();
        }
    }
}

/// Bounded `job -> owned-by-cronjob` cache. On overflow the whole map is
/// evicted and a warning logged.
pub(crate) struct OwnershipCache {
    limit: usize,
    map: Mutex<HashMap<String, bool>>,
}

impl OwnershipCache {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            map: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) async fn is_owned(
        &self,
        api: &Arc<dyn PodLogApi>,
        namespace: &str,
        job: &str,
        cronjob: &str,
    ) -> bool {
        let key = format!("{namespace}/{job}");
        if let Some(owned) = self.map.lock().unwrap().get(&key).copied() {
            return owned;
        }

        let owned = match api.get_job(namespace, job).await {
            Ok(Some(job)) => job
                .metadata
                .owner_references
                .as_ref()
                .is_some_and(|owners| {
                    owners
                        .iter()
                        .any(|owner| owner.kind == "CronJob" && owner.name == cronjob)
                }),
            Ok(None) => false,
            Err(e) => {
                debug!(target: LOG_TARGET, "ownership lookup for {key}: {e}");
                false
            }
        };

        let mut map = self.map.lock().unwrap();
        if map.len() >= self.limit {
            warn!(
                target: LOG_TARGET,
                "cronjob ownership cache overflow ({}); clearing", self.limit
            );
            map.clear();
        }
        map.insert(key, owned);
        owned
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.map.lock().unwrap().len()
    }
}

/// A running log session: the raw entry stream plus aggregated drop hints.
pub struct LogSession {
    pub entries: mpsc::Receiver<LogEntry>,
    pub drops: mpsc::Receiver<u64>,
    cancel: CancellationToken,
}

impl LogSession {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for LogSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub struct LogStreamManager {
    config: RefreshConfig,
    telemetry: Arc<TelemetryRecorder>,
    ownership: OwnershipCache,
}

impl LogStreamManager {
    pub fn new(config: RefreshConfig, telemetry: Arc<TelemetryRecorder>) -> Self {
        let ownership = OwnershipCache::new(config.cronjob_cache_limit);
        Self {
            config,
            telemetry,
            ownership,
        }
    }

    /// Resolves the target pods and fetches their recent lines with
    /// timestamps, initializing per-container dedup state. Entries are merged
    /// and sorted by timestamp (undated lines last).
    pub async fn tail(
        &self,
        api: &Arc<dyn PodLogApi>,
        opts: &LogSessionOptions,
    ) -> Result<TailResult, Error> {
        let selection = self.resolve_pods(api, opts).await?;
        let tail_lines = normalize_tail(opts.tail_lines, self.config.default_tail_lines);

        let mut entries: Vec<LogEntry> = Vec::new();
        let mut targets: Vec<ContainerTarget> = Vec::new();
        let mut pods: Vec<String> = Vec::new();

        for pod in &selection.pods {
            pods.push(pod.name_any());
            for mut target in container_targets(pod, opts.container.as_deref()) {
                let params = LogFetchParams {
                    container: target.container.clone(),
                    follow: false,
                    timestamps: true,
                    since: None,
                    tail_lines: Some(tail_lines),
                };
                match api.fetch_logs(&target.namespace, &target.pod, &params).await {
                    Ok(text) => {
                        for raw in text.lines() {
                            let (parsed, timestamp, content) = split_log_line(raw);
                            if let Some(ts) = parsed {
                                if target.last_timestamp.is_none_or(|last| ts >= last) {
                                    target.last_timestamp = Some(ts);
                                    target.last_line = content.clone();
                                }
                            }
                            entries.push(LogEntry {
                                timestamp,
                                pod: target.pod.clone(),
                                container: target.container.clone(),
                                line: content,
                                is_init: target.is_init,
                            });
                        }
                    }
                    Err(e) if error::is_skippable(&e) => {
                        // Container not started yet or already gone; the
                        // follower picks it up when it appears.
                        debug!(
                            target: LOG_TARGET,
                            "tail skipped for {}/{}/{}: {e}",
                            target.namespace,
                            target.pod,
                            target.container
                        );
                    }
                    Err(e) => return Err(e),
                }
                targets.push(target);
            }
        }

        entries.sort_by(|a, b| {
            let key = |e: &LogEntry| {
                let parsed = DateTime::parse_from_rfc3339(&e.timestamp).ok();
                (parsed.is_none(), parsed, e.pod.clone(), e.container.clone())
            };
            key(a).cmp(&key(b))
        });

        Ok(TailResult {
            entries,
            targets,
            pods,
            selector: selection.selector,
        })
    }

    async fn resolve_pods(
        &self,
        api: &Arc<dyn PodLogApi>,
        opts: &LogSessionOptions,
    ) -> Result<PodSelection, Error> {
        let ns = &opts.namespace;
        let name = &opts.name;

        let (pods, selector) = match opts.kind {
            WorkloadKind::Pod => match api.get_pod(ns, name).await? {
                Some(pod) => (vec![pod], None),
                None => return Err(Error::message(format!("pod {ns}/{name} not found"))),
            },
            WorkloadKind::Deployment => {
                let workload = api
                    .get_deployment(ns, name)
                    .await?
                    .ok_or_else(|| Error::message(format!("deployment {ns}/{name} not found")))?;
                let selector = selector_string(workload.spec.as_ref().map(|s| &s.selector))
                    .ok_or_else(|| Error::message(format!("deployment {ns}/{name} has no selector")))?;
                (api.list_pods(ns, Some(&selector)).await?, Some(selector))
            }
            WorkloadKind::ReplicaSet => {
                let workload = api
                    .get_replica_set(ns, name)
                    .await?
                    .ok_or_else(|| Error::message(format!("replicaset {ns}/{name} not found")))?;
                let selector = selector_string(workload.spec.as_ref().map(|s| &s.selector))
                    .ok_or_else(|| Error::message(format!("replicaset {ns}/{name} has no selector")))?;
                (api.list_pods(ns, Some(&selector)).await?, Some(selector))
            }
            WorkloadKind::StatefulSet => {
                let workload = api
                    .get_stateful_set(ns, name)
                    .await?
                    .ok_or_else(|| Error::message(format!("statefulset {ns}/{name} not found")))?;
                let selector = selector_string(workload.spec.as_ref().map(|s| &s.selector))
                    .ok_or_else(|| Error::message(format!("statefulset {ns}/{name} has no selector")))?;
                (api.list_pods(ns, Some(&selector)).await?, Some(selector))
            }
            WorkloadKind::DaemonSet => {
                let workload = api
                    .get_daemon_set(ns, name)
                    .await?
                    .ok_or_else(|| Error::message(format!("daemonset {ns}/{name} not found")))?;
                let selector = selector_string(workload.spec.as_ref().map(|s| &s.selector))
                    .ok_or_else(|| Error::message(format!("daemonset {ns}/{name} has no selector")))?;
                (api.list_pods(ns, Some(&selector)).await?, Some(selector))
            }
            WorkloadKind::Job => {
                let selector = format!("job-name={name}");
                (api.list_pods(ns, Some(&selector)).await?, Some(selector))
            }
            WorkloadKind::CronJob => {
                let jobs = api.list_jobs(ns).await?;
                let mut pods = Vec::new();
                for job in jobs {
                    let owned = job
                        .metadata
                        .owner_references
                        .as_ref()
                        .is_some_and(|owners| {
                            owners
                                .iter()
                                .any(|owner| owner.kind == "CronJob" && &owner.name == name)
                        });
                    if !owned {
                        continue;
                    }
                    let job_name = job.name_any();
                    let selector = format!("job-name={job_name}");
                    pods.extend(api.list_pods(ns, Some(&selector)).await?);
                }
                // The live watch matches any job pod and filters by ownership.
                (pods, Some("job-name".to_string()))
            }
        };

        Ok(PodSelection { pods, selector })
    }

    /// Starts followers for every tailed target and, for workload kinds, a
    /// pod watch that follows pod churn. The returned session owns all of it;
    /// dropping the session cancels every follower.
    pub fn run(
        self: &Arc<Self>,
        api: Arc<dyn PodLogApi>,
        opts: &LogSessionOptions,
        tail: &TailResult,
        parent: Option<&CancellationToken>,
    ) -> LogSession {
        let cancel = parent
            .map(|p| p.child_token())
            .unwrap_or_default();
        let (entries_tx, entries_rx) = mpsc::channel(self.config.subscriber_buffer.max(1));
        let (drops_tx, drops_rx) = mpsc::channel(DROP_CHANNEL_CAPACITY);

        let shared = Arc::new(SessionShared {
            api,
            config: self.config.clone(),
            telemetry: Arc::clone(&self.telemetry),
            stream_name: format!("{LOGS_DOMAIN}:{}", opts.scope),
            entries_tx,
            drops_tx,
            cancel: cancel.clone(),
            pod_scopes: Mutex::new(HashMap::new()),
        });

        for target in &tail.targets {
            Self::spawn_follower(&shared, target.clone());
        }

        if opts.kind != WorkloadKind::Pod {
            if let Some(selector) = tail.selector.clone() {
                let manager = Arc::clone(self);
                let shared = Arc::clone(&shared);
                let opts = opts.clone();
                let known: HashSet<String> = tail.pods.iter().cloned().collect();
                tokio::spawn(async move {
                    manager.watch_workload_pods(shared, opts, selector, known).await;
                });
            }
        }

        LogSession {
            entries: entries_rx,
            drops: drops_rx,
            cancel,
        }
    }

    fn spawn_follower(shared: &Arc<SessionShared>, target: ContainerTarget) {
        let pod_cancel = shared.pod_scope(&target.pod);
        let shared = Arc::clone(shared);
        tokio::spawn(async move {
            let label = format!(
                "{}/{}/{}",
                target.namespace, target.pod, target.container
            );
            let telemetry = Arc::clone(&shared.telemetry);
            let stream_name = shared.stream_name.clone();
            let result = futures::FutureExt::catch_unwind(std::panic::AssertUnwindSafe(
                follow::follow_container(shared, pod_cancel, target),
            ))
            .await;
            if result.is_err() {
                tracing::error!(target: LOG_TARGET, "follower for {label} panicked");
                telemetry.record_error(&stream_name, "follower panicked");
            }
        });
    }

    /// Pod watch loop for workload-backed sessions: new pods get followers,
    /// deleted pods get their scope cancelled, watch failures back off and a
    /// fresh pod list covers any gap.
    async fn watch_workload_pods(
        self: Arc<Self>,
        shared: Arc<SessionShared>,
        opts: LogSessionOptions,
        selector: String,
        mut known: HashSet<String>,
    ) {
        let mut backoff = shared.config.log_backoff_initial;

        loop {
            if shared.cancel.is_cancelled() {
                return;
            }

            let mut stream = shared.api.watch_pods(&opts.namespace, &selector);
            loop {
                tokio::select! {
                    _ = shared.cancel.cancelled() => return,
                    item = stream.next() => match item {
                        Some(Ok(event)) => {
                            backoff = shared.config.log_backoff_initial;
                            match event {
                                WatchEvent::Apply(pod) | WatchEvent::InitApply(pod) => {
                                    self.maybe_start_pod(&shared, &opts, &mut known, &pod).await;
                                }
                                WatchEvent::Delete(pod) => {
                                    let name = pod.name_any();
                                    shared.cancel_pod(&name);
                                    known.remove(&name);
                                }
                                WatchEvent::Init | WatchEvent::InitDone => {}
                            }
                        }
                        Some(Err(e)) => {
                            debug!(target: LOG_TARGET, "pod watch for {selector}: {e}");
                            break;
                        }
                        None => break,
                    }
                }
            }

            tokio::select! {
                _ = shared.cancel.cancelled() => return,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(shared.config.log_backoff_max);

            // Reconnect: list pods to cover anything missed while the watch
            // was down.
            match shared.api.list_pods(&opts.namespace, Some(&selector)).await {
                Ok(pods) => {
                    for pod in pods {
                        self.maybe_start_pod(&shared, &opts, &mut known, &pod).await;
                    }
                }
                Err(e) => {
                    debug!(target: LOG_TARGET, "pod relist for {selector}: {e}");
                }
            }
        }
    }

    async fn maybe_start_pod(
        &self,
        shared: &Arc<SessionShared>,
        opts: &LogSessionOptions,
        known: &mut HashSet<String>,
        pod: &Pod,
    ) {
        let name = pod.name_any();
        if known.contains(&name) {
            return;
        }

        if opts.kind == WorkloadKind::CronJob {
            let Some(job_name) = pod.labels().get("job-name").cloned() else {
                return;
            };
            if !self
                .ownership
                .is_owned(&shared.api, &opts.namespace, &job_name, &opts.name)
                .await
            {
                return;
            }
        }

        known.insert(name);
        for target in container_targets(pod, opts.container.as_deref()) {
            Self::spawn_follower(shared, target);
        }
    }

    /// The full wire-message sequence for one log stream request: an initial
    /// snapshot message (or a permission-denied error message), then batched
    /// entries with keep-alives.
    pub fn open_stream(
        self: &Arc<Self>,
        api: Arc<dyn PodLogApi>,
        opts: LogSessionOptions,
    ) -> mpsc::Receiver<StreamMessage<LogEntry>> {
        let (out_tx, out_rx) = mpsc::channel(DROP_CHANNEL_CAPACITY);
        let manager = Arc::clone(self);

        tokio::spawn(async move {
            let stream_name = format!("{LOGS_DOMAIN}:{}", opts.scope);
            let mut sequence: u64 = 0;

            let tail = match manager.tail(&api, &opts).await {
                Ok(tail) => tail,
                Err(err) => {
                    sequence += 1;
                    let mut msg: StreamMessage<LogEntry> =
                        StreamMessage::new(LOGS_DOMAIN, &opts.scope, sequence);
                    let (text, details) = stream_failure(&err);
                    manager.telemetry.record_error(&stream_name, &text);
                    msg.error = Some(text);
                    msg.error_details = details;
                    let _ = out_tx.send(msg).await;
                    return;
                }
            };

            sequence += 1;
            let mut initial: StreamMessage<LogEntry> =
                StreamMessage::new(LOGS_DOMAIN, &opts.scope, sequence);
            initial.reset = Some(true);
            initial.entries = Some(tail.entries.clone());
            if out_tx.send(initial).await.is_err() {
                return;
            }

            let mut session = manager.run(api, &opts, &tail, None);
            let mut batch: Vec<LogEntry> = Vec::new();
            let mut pending_drops: u64 = 0;
            let mut flush_at: Option<Instant> = None;
            let mut drops_open = true;

            loop {
                let window = async {
                    match flush_at {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => futures::future::pending().await,
                    }
                };
                let keepalive = tokio::time::sleep(manager.config.log_keepalive_interval);

                tokio::select! {
                    entry = session.entries.recv() => match entry {
                        Some(entry) => {
                            batch.push(entry);
                            if batch.len() >= manager.config.log_batch_size {
                                if !flush(&out_tx, &opts.scope, &mut sequence, &mut batch, &mut pending_drops, &manager, &stream_name).await {
                                    break;
                                }
                                flush_at = None;
                            } else if flush_at.is_none() {
                                flush_at = Some(Instant::now() + manager.config.log_batch_window);
                            }
                        }
                        None => {
                            // Every follower exited; flush what is left and
                            // end the stream.
                            flush(&out_tx, &opts.scope, &mut sequence, &mut batch, &mut pending_drops, &manager, &stream_name).await;
                            break;
                        }
                    },
                    hint = session.drops.recv(), if drops_open => match hint {
                        Some(n) => {
                            pending_drops += n;
                            manager.telemetry.record_dropped(&stream_name, n, "log backlog");
                        }
                        None => drops_open = false,
                    },
                    _ = window => {
                        if !flush(&out_tx, &opts.scope, &mut sequence, &mut batch, &mut pending_drops, &manager, &stream_name).await {
                            break;
                        }
                        flush_at = None;
                    }
                    _ = keepalive, if batch.is_empty() => {
                        sequence += 1;
                        let msg: StreamMessage<LogEntry> =
                            StreamMessage::new(LOGS_DOMAIN, &opts.scope, sequence);
                        if out_tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    _ = out_tx.closed() => break,
                }
            }
            session.cancel();
        });

        out_rx
    }
}

/// Sends the accumulated batch as one message. Returns false when the
/// consumer is gone.
async fn flush(
    out_tx: &mpsc::Sender<StreamMessage<LogEntry>>,
    scope: &str,
    sequence: &mut u64,
    batch: &mut Vec<LogEntry>,
    pending_drops: &mut u64,
    manager: &Arc<LogStreamManager>,
    stream_name: &str,
) -> bool {
    if batch.is_empty() && *pending_drops == 0 {
        return true;
    }
    *sequence += 1;
    let mut msg: StreamMessage<LogEntry> = StreamMessage::new(LOGS_DOMAIN, scope, *sequence);
    msg.entries = Some(std::mem::take(batch));
    if *pending_drops > 0 {
        msg.error = Some(format!("{pending_drops} entries dropped"));
        manager.telemetry.record_fallback(stream_name);
        *pending_drops = 0;
    }
    out_tx.send(msg).await.is_ok()
}

/// Maps a tail failure onto the wire: RBAC refusals carry the Status form
/// with the log permission resource.
fn stream_failure(err: &Error) -> (String, Option<PermissionDeniedStatus>) {
    if let Some(status) = error::permission_denied_status(err) {
        return (status.message.clone(), Some(status));
    }
    if error::is_forbidden_chain(err) {
        let status = PermissionDeniedStatus::new(LOGS_DOMAIN, "pods");
        return (status.message.clone(), Some(status));
    }
    (format!("logstream: {err}"), None)
}

#[cfg(test)]
mod tests;
