use super::api::{LineStream, LogFetchParams, PodLogApi, PodWatchStream};
use super::*;
use crate::config::RefreshConfig;
use crate::telemetry::TelemetryRecorder;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{
    Container, ContainerState, ContainerStateTerminated, ContainerStatus, Pod, PodSpec, PodStatus,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use std::collections::VecDeque;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

fn test_config() -> RefreshConfig {
    RefreshConfig {
        log_backoff_initial: Duration::from_millis(1),
        log_backoff_max: Duration::from_millis(5),
        log_batch_window: Duration::from_millis(10),
        log_keepalive_interval: Duration::from_secs(60),
        ..Default::default()
    }
}

fn pod_with_containers(name: &str, init: &[&str], regular: &[&str]) -> Pod {
    let mut pod = Pod::default();
    pod.metadata.namespace = Some("default".to_string());
    pod.metadata.name = Some(name.to_string());
    pod.spec = Some(PodSpec {
        init_containers: (!init.is_empty()).then(|| {
            init.iter()
                .map(|n| Container {
                    name: n.to_string(),
                    ..Default::default()
                })
                .collect()
        }),
        containers: regular
            .iter()
            .map(|n| Container {
                name: n.to_string(),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    });
    pod.status = Some(PodStatus {
        phase: Some("Running".to_string()),
        ..Default::default()
    });
    pod
}

fn with_phase(mut pod: Pod, phase: &str) -> Pod {
    pod.status.get_or_insert_with(Default::default).phase = Some(phase.to_string());
    pod
}

fn with_terminated_init(mut pod: Pod, container: &str) -> Pod {
    pod.status.get_or_insert_with(Default::default).init_container_statuses =
        Some(vec![ContainerStatus {
            name: container.to_string(),
            state: Some(ContainerState {
                terminated: Some(ContainerStateTerminated {
                    exit_code: 0,
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]);
    pod
}

fn forbidden() -> Error {
    Error::Kube(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: "pods is forbidden".to_string(),
        reason: "Forbidden".to_string(),
        code: 403,
    }))
}

#[derive(Default)]
struct FakePodLogApi {
    pods: StdMutex<Vec<Pod>>,
    // Served in order by get_pod; when exhausted, pods not found.
    pod_script: StdMutex<VecDeque<Option<Pod>>>,
    logs: StdMutex<std::collections::HashMap<String, String>>,
    streams: StdMutex<std::collections::HashMap<String, VecDeque<Vec<String>>>>,
    jobs: StdMutex<Vec<Job>>,
    fetch_calls: StdMutex<Vec<LogFetchParams>>,
    stream_calls: StdMutex<Vec<LogFetchParams>>,
    job_lookups: StdMutex<usize>,
    deny_pod_list: StdMutex<bool>,
}

impl FakePodLogApi {
    fn key(pod: &str, container: &str) -> String {
        format!("{pod}/{container}")
    }

    fn add_pod(&self, pod: Pod) {
        self.pods.lock().unwrap().push(pod);
    }

    fn script_get_pod(&self, pod: Option<Pod>) {
        self.pod_script.lock().unwrap().push_back(pod);
    }

    fn set_logs(&self, pod: &str, container: &str, text: &str) {
        self.logs
            .lock()
            .unwrap()
            .insert(Self::key(pod, container), text.to_string());
    }

    fn push_stream(&self, pod: &str, container: &str, lines: &[&str]) {
        self.streams
            .lock()
            .unwrap()
            .entry(Self::key(pod, container))
            .or_default()
            .push_back(lines.iter().map(|l| l.to_string()).collect());
    }
}

#[async_trait]
impl PodLogApi for FakePodLogApi {
    async fn get_pod(&self, _namespace: &str, name: &str) -> Result<Option<Pod>, Error> {
        if let Some(scripted) = self.pod_script.lock().unwrap().pop_front() {
            return Ok(scripted);
        }
        Ok(self
            .pods
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.metadata.name.as_deref() == Some(name))
            .cloned())
    }

    async fn list_pods(
        &self,
        _namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<Pod>, Error> {
        if *self.deny_pod_list.lock().unwrap() {
            return Err(forbidden());
        }
        let pods = self.pods.lock().unwrap().clone();
        let Some(selector) = label_selector else {
            return Ok(pods);
        };
        Ok(pods
            .into_iter()
            .filter(|pod| {
                let labels = pod.metadata.labels.clone().unwrap_or_default();
                match selector.split_once('=') {
                    Some((k, v)) => labels.get(k).map(|have| have == v).unwrap_or(false),
                    None => labels.contains_key(selector),
                }
            })
            .collect())
    }

    async fn get_deployment(
        &self,
        _namespace: &str,
        _name: &str,
    ) -> Result<Option<k8s_openapi::api::apps::v1::Deployment>, Error> {
        Ok(None)
    }

    async fn get_replica_set(
        &self,
        _namespace: &str,
        _name: &str,
    ) -> Result<Option<k8s_openapi::api::apps::v1::ReplicaSet>, Error> {
        Ok(None)
    }

    async fn get_stateful_set(
        &self,
        _namespace: &str,
        _name: &str,
    ) -> Result<Option<k8s_openapi::api::apps::v1::StatefulSet>, Error> {
        Ok(None)
    }

    async fn get_daemon_set(
        &self,
        _namespace: &str,
        _name: &str,
    ) -> Result<Option<k8s_openapi::api::apps::v1::DaemonSet>, Error> {
        Ok(None)
    }

    async fn get_job(&self, _namespace: &str, name: &str) -> Result<Option<Job>, Error> {
        *self.job_lookups.lock().unwrap() += 1;
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .find(|j| j.metadata.name.as_deref() == Some(name))
            .cloned())
    }

    async fn list_jobs(&self, _namespace: &str) -> Result<Vec<Job>, Error> {
        Ok(self.jobs.lock().unwrap().clone())
    }

    async fn fetch_logs(
        &self,
        _namespace: &str,
        pod: &str,
        params: &LogFetchParams,
    ) -> Result<String, Error> {
        self.fetch_calls.lock().unwrap().push(params.clone());
        Ok(self
            .logs
            .lock()
            .unwrap()
            .get(&Self::key(pod, &params.container))
            .cloned()
            .unwrap_or_default())
    }

    async fn stream_logs(
        &self,
        _namespace: &str,
        pod: &str,
        params: &LogFetchParams,
    ) -> Result<LineStream, Error> {
        self.stream_calls.lock().unwrap().push(params.clone());
        let lines = self
            .streams
            .lock()
            .unwrap()
            .get_mut(&Self::key(pod, &params.container))
            .and_then(|queue| queue.pop_front())
            .unwrap_or_default();
        Ok(futures::stream::iter(lines.into_iter().map(Ok)).boxed())
    }

    fn watch_pods(&self, _namespace: &str, _label_selector: &str) -> PodWatchStream {
        futures::stream::pending().boxed()
    }
}

fn session_shared(
    api: Arc<dyn PodLogApi>,
    config: RefreshConfig,
) -> (
    Arc<SessionShared>,
    mpsc::Receiver<LogEntry>,
    CancellationToken,
) {
    let (entries_tx, entries_rx) = mpsc::channel(64);
    let (drops_tx, _drops_rx) = mpsc::channel(DROP_CHANNEL_CAPACITY);
    let cancel = CancellationToken::new();
    let shared = Arc::new(SessionShared {
        api,
        config,
        telemetry: Arc::new(TelemetryRecorder::new()),
        stream_name: "object-logs:test".to_string(),
        entries_tx,
        drops_tx,
        cancel: cancel.clone(),
        pod_scopes: Mutex::new(HashMap::new()),
    });
    (shared, entries_rx, cancel)
}

fn options(kind: WorkloadKind, name: &str) -> LogSessionOptions {
    LogSessionOptions {
        namespace: "default".to_string(),
        kind,
        name: name.to_string(),
        container: None,
        tail_lines: None,
        scope: format!("default:job:{name}"),
    }
}

#[test]
fn split_log_line_separates_timestamp_token() {
    let (parsed, token, content) = split_log_line("2024-05-01T10:00:00.123456789Z hello world");
    assert_eq!(parsed, Some(ts("2024-05-01T10:00:00.123456789Z")));
    assert_eq!(token, "2024-05-01T10:00:00.123456789Z");
    assert_eq!(content, "hello world");

    let (parsed, token, content) = split_log_line("no timestamp here");
    assert!(parsed.is_none());
    assert!(token.is_empty());
    assert_eq!(content, "no timestamp here");
}

#[test]
fn container_filter_matches_exact_and_init_suffix() {
    let pod = pod_with_containers("web-1", &["setup"], &["app", "sidecar"]);

    let all = container_targets(&pod, None);
    assert_eq!(all.len(), 3);
    assert!(all[0].is_init);

    let app_only = container_targets(&pod, Some("app"));
    assert_eq!(app_only.len(), 1);
    assert_eq!(app_only[0].container, "app");

    let init_by_suffix = container_targets(&pod, Some("setup (init)"));
    assert_eq!(init_by_suffix.len(), 1);
    assert!(init_by_suffix[0].is_init);

    // The suffix form never matches a regular container.
    assert!(container_targets(&pod, Some("app (init)")).is_empty());
}

#[tokio::test]
async fn tail_merges_sorts_and_initializes_state() {
    let api = Arc::new(FakePodLogApi::default());
    api.add_pod(pod_with_containers("web-1", &[], &["app", "sidecar"]));
    api.set_logs(
        "web-1",
        "app",
        "2024-05-01T10:00:01Z alpha\n2024-05-01T10:00:03Z gamma",
    );
    api.set_logs("web-1", "sidecar", "2024-05-01T10:00:02Z beta\nplain line");

    let manager = Arc::new(LogStreamManager::new(
        test_config(),
        Arc::new(TelemetryRecorder::new()),
    ));
    let api_dyn: Arc<dyn PodLogApi> = api.clone();
    let tail = manager
        .tail(&api_dyn, &options(WorkloadKind::Pod, "web-1"))
        .await
        .unwrap();

    let lines: Vec<&str> = tail.entries.iter().map(|e| e.line.as_str()).collect();
    assert_eq!(lines, vec!["alpha", "beta", "gamma", "plain line"]);

    let app = tail
        .targets
        .iter()
        .find(|t| t.container == "app")
        .unwrap();
    assert_eq!(app.last_timestamp, Some(ts("2024-05-01T10:00:03Z")));
    assert_eq!(app.last_line, "gamma");

    let sidecar = tail
        .targets
        .iter()
        .find(|t| t.container == "sidecar")
        .unwrap();
    assert_eq!(sidecar.last_timestamp, Some(ts("2024-05-01T10:00:02Z")));
    assert_eq!(sidecar.last_line, "beta");
}

#[tokio::test]
async fn tail_lines_zero_and_negative_use_the_default() {
    for requested in [None, Some(0), Some(-5)] {
        let api = Arc::new(FakePodLogApi::default());
        api.add_pod(pod_with_containers("web-1", &[], &["app"]));

        let manager = Arc::new(LogStreamManager::new(
            test_config(),
            Arc::new(TelemetryRecorder::new()),
        ));
        let api_dyn: Arc<dyn PodLogApi> = api.clone();
        let mut opts = options(WorkloadKind::Pod, "web-1");
        opts.tail_lines = requested;
        manager.tail(&api_dyn, &opts).await.unwrap();

        let calls = api.fetch_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tail_lines, Some(1000), "requested={requested:?}");
    }
}

#[tokio::test]
async fn follower_dedups_the_reconnect_overlap() {
    let api = Arc::new(FakePodLogApi::default());
    // First stream delivers [t1 a, t2 b]; the reconnect replays [t2 b] then
    // continues with [t3 c].
    api.push_stream(
        "web-1",
        "app",
        &["2024-05-01T10:00:01Z a", "2024-05-01T10:00:02Z b"],
    );
    api.push_stream(
        "web-1",
        "app",
        &["2024-05-01T10:00:02Z b", "2024-05-01T10:00:03Z c"],
    );
    // After the first stream the pod is still running; after the second it
    // has finished, terminating the follower.
    api.script_get_pod(Some(pod_with_containers("web-1", &[], &["app"])));
    api.script_get_pod(Some(with_phase(
        pod_with_containers("web-1", &[], &["app"]),
        "Succeeded",
    )));

    let api_dyn: Arc<dyn PodLogApi> = api.clone();
    let (shared, mut entries_rx, _cancel) = session_shared(api_dyn, test_config());

    let target = ContainerTarget {
        namespace: "default".to_string(),
        pod: "web-1".to_string(),
        container: "app".to_string(),
        is_init: false,
        last_timestamp: None,
        last_line: String::new(),
    };
    follow::follow_container(Arc::clone(&shared), CancellationToken::new(), target).await;

    let mut lines = Vec::new();
    while let Ok(entry) = entries_rx.try_recv() {
        lines.push(entry.line);
    }
    assert_eq!(lines, vec!["a", "b", "c"]);

    // The reconnect resumed from the last delivered timestamp.
    let calls = api.stream_calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].since, None);
    assert_eq!(calls[1].since, Some(ts("2024-05-01T10:00:02Z")));
    assert!(calls[1].follow && calls[1].timestamps);
}

#[tokio::test]
async fn init_only_pod_streams_once_without_retry() {
    let api = Arc::new(FakePodLogApi::default());
    api.push_stream("migrate-1", "setup", &["2024-05-01T10:00:01Z migrating"]);
    // Disposition check: init container already terminated.
    api.script_get_pod(Some(with_terminated_init(
        pod_with_containers("migrate-1", &["setup"], &[]),
        "setup",
    )));

    let api_dyn: Arc<dyn PodLogApi> = api.clone();
    let (shared, mut entries_rx, _cancel) = session_shared(api_dyn, test_config());

    let target = ContainerTarget {
        namespace: "default".to_string(),
        pod: "migrate-1".to_string(),
        container: "setup".to_string(),
        is_init: true,
        last_timestamp: None,
        last_line: String::new(),
    };
    follow::follow_container(Arc::clone(&shared), CancellationToken::new(), target).await;

    assert_eq!(api.stream_calls.lock().unwrap().len(), 1);
    let entry = entries_rx.try_recv().unwrap();
    assert!(entry.is_init);
    assert_eq!(entry.line, "migrating");
}

#[tokio::test]
async fn open_stream_surfaces_permission_denied_on_first_message() {
    let api = Arc::new(FakePodLogApi::default());
    *api.deny_pod_list.lock().unwrap() = true;

    let manager = Arc::new(LogStreamManager::new(
        test_config(),
        Arc::new(TelemetryRecorder::new()),
    ));
    let api_dyn: Arc<dyn PodLogApi> = api.clone();
    let mut rx = manager.open_stream(api_dyn, options(WorkloadKind::Job, "x"));

    let first = rx.recv().await.unwrap();
    assert!(first.error.is_some());
    let details = first.error_details.unwrap();
    assert_eq!(details.details.resource, "pods");
    assert_eq!(details.details.domain, LOGS_DOMAIN);
    assert_eq!(details.code, 403);
    // The stream ends after the error message.
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn open_stream_delivers_initial_snapshot_then_batches() {
    let api = Arc::new(FakePodLogApi::default());
    api.set_logs("web-1", "app", "2024-05-01T10:00:01Z old line");
    api.push_stream("web-1", "app", &["2024-05-01T10:00:02Z fresh line"]);
    // First get_pod serves pod resolution; the second is the follower's
    // disposition check, which terminates it.
    api.script_get_pod(Some(pod_with_containers("web-1", &[], &["app"])));
    api.script_get_pod(Some(with_phase(
        pod_with_containers("web-1", &[], &["app"]),
        "Succeeded",
    )));

    let manager = Arc::new(LogStreamManager::new(
        test_config(),
        Arc::new(TelemetryRecorder::new()),
    ));
    let api_dyn: Arc<dyn PodLogApi> = api.clone();
    let mut rx = manager.open_stream(api_dyn, options(WorkloadKind::Pod, "web-1"));

    let initial = rx.recv().await.unwrap();
    assert_eq!(initial.reset, Some(true));
    assert_eq!(initial.sequence, 1);
    let entries = initial.entries.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].line, "old line");

    let batch = rx.recv().await.unwrap();
    assert!(batch.sequence > 1);
    let entries = batch.entries.unwrap();
    assert_eq!(entries[0].line, "fresh line");
}

#[tokio::test]
async fn ownership_cache_caches_and_clears_on_overflow() {
    let api = Arc::new(FakePodLogApi::default());
    let mut job = Job::default();
    job.metadata.name = Some("nightly-123".to_string());
    job.metadata.owner_references = Some(vec![OwnerReference {
        api_version: "batch/v1".to_string(),
        kind: "CronJob".to_string(),
        name: "nightly".to_string(),
        uid: "uid-1".to_string(),
        ..Default::default()
    }]);
    api.jobs.lock().unwrap().push(job);

    let api_dyn: Arc<dyn PodLogApi> = api.clone();
    let cache = OwnershipCache::new(2);

    assert!(cache.is_owned(&api_dyn, "default", "nightly-123", "nightly").await);
    // Second check is served from the cache.
    assert!(cache.is_owned(&api_dyn, "default", "nightly-123", "nightly").await);
    assert_eq!(*api.job_lookups.lock().unwrap(), 1);

    // Unknown jobs are cached as not-owned until the cap forces a clear.
    assert!(!cache.is_owned(&api_dyn, "default", "other-1", "nightly").await);
    assert_eq!(cache.len(), 2);
    assert!(!cache.is_owned(&api_dyn, "default", "other-2", "nightly").await);
    assert_eq!(cache.len(), 1);
}

#[test]
fn workload_kind_parses_common_spellings() {
    assert_eq!("pod".parse::<WorkloadKind>().unwrap(), WorkloadKind::Pod);
    assert_eq!(
        "deployments".parse::<WorkloadKind>().unwrap(),
        WorkloadKind::Deployment
    );
    assert_eq!(
        "CronJob".parse::<WorkloadKind>().unwrap(),
        WorkloadKind::CronJob
    );
    assert!("gadget".parse::<WorkloadKind>().is_err());
}
