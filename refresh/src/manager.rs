//! Lifecycle owner for the refresh subsystem: starts the informer hubs, the
//! best-effort metrics poller and the manual-job processor, supervises them
//! against panics, and shuts everything down in a deterministic order.

use crate::cluster::ClusterSet;
use crate::config::RefreshConfig;
use crate::domains;
use crate::error::Error;
use crate::logs::LogStreamManager;
use crate::queue::ManualRefreshQueue;
use crate::registry::DomainRegistry;
use crate::snapshot::{BuildOptions, SnapshotService};
use crate::telemetry::TelemetryRecorder;
use futures::FutureExt;
use porthole_types::{JobState, unix_millis};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

const LOG_TARGET: &str = "refresh::manager";

/// Pause between restarts of a panicked background task.
const RESTART_DELAY: Duration = Duration::from_secs(1);

/// Runs `factory`'s future under panic recovery. A panic is logged and
/// recorded as a stream error, then the task restarts; a clean return ends
/// the supervision. The process never dies with the task.
pub(crate) fn supervise<F, Fut>(
    name: &'static str,
    cancel: CancellationToken,
    telemetry: Arc<TelemetryRecorder>,
    factory: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            match AssertUnwindSafe(factory()).catch_unwind().await {
                Ok(()) => break,
                Err(_) => {
                    error!(target: LOG_TARGET, "background task {name} panicked; restarting");
                    telemetry.record_error(name, "task panicked");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(RESTART_DELAY) => {}
                    }
                }
            }
        }
    })
}

/// Retries `operation` up to `attempts` times with a doubling delay. The
/// final attempt's error is returned as-is; cancellation aborts between
/// attempts.
pub(crate) async fn retry_with_backoff<T, F, Fut>(
    attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let attempts = attempts.max(1);
    let mut delay = initial_delay;
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt == attempts {
                    return Err(e);
                }
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                debug!(
                    target: LOG_TARGET,
                    "attempt {attempt}/{attempts} failed, retrying in {delay:?}: {e}"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                delay = (delay * 2).min(max_delay);
                attempt += 1;
            }
        }
    }
}

pub struct RefreshManager {
    config: RefreshConfig,
    telemetry: Arc<TelemetryRecorder>,
    registry: Arc<DomainRegistry>,
    snapshots: Arc<SnapshotService>,
    queue: Arc<ManualRefreshQueue>,
    clusters: Arc<ClusterSet>,
    logs: Arc<LogStreamManager>,
    run: Mutex<Option<CancellationToken>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RefreshManager {
    pub fn new(
        config: RefreshConfig,
        clusters: Arc<ClusterSet>,
        telemetry: Arc<TelemetryRecorder>,
    ) -> Arc<Self> {
        let registry = Arc::new(DomainRegistry::new());
        let snapshots = Arc::new(SnapshotService::new(
            Arc::clone(&registry),
            Arc::clone(&clusters),
            config.clone(),
        ));
        let queue = Arc::new(ManualRefreshQueue::new(config.queue_capacity));
        let logs = Arc::new(LogStreamManager::new(
            config.clone(),
            Arc::clone(&telemetry),
        ));
        Arc::new(Self {
            config,
            telemetry,
            registry,
            snapshots,
            queue,
            clusters,
            logs,
            run: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn registry(&self) -> &Arc<DomainRegistry> {
        &self.registry
    }

    pub fn snapshots(&self) -> &Arc<SnapshotService> {
        &self.snapshots
    }

    pub fn queue(&self) -> &Arc<ManualRefreshQueue> {
        &self.queue
    }

    pub fn clusters(&self) -> &Arc<ClusterSet> {
        &self.clusters
    }

    pub fn logs(&self) -> &Arc<LogStreamManager> {
        &self.logs
    }

    pub fn telemetry(&self) -> &Arc<TelemetryRecorder> {
        &self.telemetry
    }

    /// Registers the built-in snapshot domains.
    pub fn register_default_domains(&self) -> Result<(), Error> {
        domains::register_all(&self.registry, &self.logs, &self.config)
    }

    /// Idempotent. Blocks on the initial informer sync of every cluster,
    /// then spawns the metrics poller, the recurring permission primer and
    /// the manual-job processor under supervision.
    pub async fn start(self: &Arc<Self>) -> Result<(), Error> {
        let token = {
            let mut run = self.run.lock().unwrap();
            if run.is_some() {
                return Ok(());
            }
            let token = CancellationToken::new();
            *run = Some(token.clone());
            token
        };

        for handle in self.clusters.all() {
            if let Some(informers) = &handle.informers {
                informers.start().await?;
            }
        }

        let poller = {
            let manager = Arc::clone(self);
            let task_token = token.clone();
            supervise(
                "metrics-poller",
                token.clone(),
                Arc::clone(&self.telemetry),
                move || {
                    let manager = Arc::clone(&manager);
                    let cancel = task_token.clone();
                    async move { manager.poll_metrics_loop(cancel).await }
                },
            )
        };

        let primer = {
            let manager = Arc::clone(self);
            let task_token = token.clone();
            supervise(
                "permission-primer",
                token.clone(),
                Arc::clone(&self.telemetry),
                move || {
                    let manager = Arc::clone(&manager);
                    let cancel = task_token.clone();
                    async move { manager.prime_permissions_loop(cancel).await }
                },
            )
        };

        let processor = {
            let manager = Arc::clone(self);
            let task_token = token.clone();
            supervise(
                "manual-job-processor",
                token.clone(),
                Arc::clone(&self.telemetry),
                move || {
                    let manager = Arc::clone(&manager);
                    let cancel = task_token.clone();
                    async move { manager.process_jobs(cancel).await }
                },
            )
        };

        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(poller);
        tasks.push(primer);
        tasks.push(processor);
        info!(target: LOG_TARGET, "refresh manager started");
        Ok(())
    }

    /// Cancels the run context so every background loop observes it, then
    /// stops the poller and processor, then the informer hubs. The first
    /// error encountered is returned after shutdown completes.
    pub async fn shutdown(&self) -> Result<(), Error> {
        let Some(token) = self.run.lock().unwrap().take() else {
            return Ok(());
        };
        token.cancel();

        let mut first_error: Option<Error> = None;
        let tasks: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock().unwrap();
            tasks.drain(..).collect()
        };
        for task in tasks {
            if let Err(e) = task.await {
                if first_error.is_none() {
                    first_error = Some(Error::message(format!("background task join: {e}")));
                }
            }
        }

        for handle in self.clusters.all() {
            if let Some(informers) = &handle.informers {
                informers.shutdown().await;
            }
        }

        info!(target: LOG_TARGET, "refresh manager stopped");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Best-effort usage polling; failures are logged and never fatal.
    async fn poll_metrics_loop(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.metrics_poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = interval.tick() => {}
            }
            for handle in self.clusters.all() {
                let Some(informers) = &handle.informers else {
                    continue;
                };
                match informers.poll_node_metrics().await {
                    Ok(nodes) => {
                        debug!(target: LOG_TARGET, "polled usage for {nodes} nodes on {}", handle.id);
                    }
                    Err(e) => {
                        debug!(target: LOG_TARGET, "metrics poll on {} failed: {e}", handle.id);
                    }
                }
            }
        }
    }

    /// The recurring prime cycle: re-resolves list permissions on every
    /// cluster so informers denied in an earlier cycle (an RBAC change, or
    /// rules that had not propagated at boot) get activated. Upstream review
    /// traffic stays bounded by the permission cache TTL.
    async fn prime_permissions_loop(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.permission_prime_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // start() already ran the first cycle; skip the immediate tick.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = interval.tick() => {}
            }
            for handle in self.clusters.all() {
                let Some(informers) = &handle.informers else {
                    continue;
                };
                informers.prime_permissions().await;
            }
        }
    }

    async fn process_jobs(&self, cancel: CancellationToken) {
        loop {
            let Some(id) = self.queue.next(&cancel).await else {
                return;
            };
            self.process_job(&id, &cancel).await;
        }
    }

    /// Drives one manual job: registry refresh then a cache-bypassed rebuild,
    /// both under the retry policy, all bounded by the request timeout.
    async fn process_job(&self, id: &str, cancel: &CancellationToken) {
        let Some(mut job) = self.queue.status(id) else {
            return;
        };
        job.state = JobState::Running;
        job.started_at = Some(unix_millis());
        job.error = None;
        self.queue.update(job.clone());

        let scope = job.scope.clone().unwrap_or_default();
        let domain = job.domain.clone();
        let attempts = self.config.manual_job_max_attempts;
        let delay = self.config.manual_job_retry_delay;
        let max_delay = self.config.request_timeout;

        let work = async {
            let refresh_version = retry_with_backoff(attempts, delay, max_delay, cancel, || {
                self.snapshots.manual_refresh(&domain, &scope)
            })
            .await?;
            let build_options = BuildOptions::bypass();
            let snapshot = retry_with_backoff(attempts, delay, max_delay, cancel, || {
                self.snapshots.build(&domain, &scope, &build_options)
            })
            .await?;
            Ok::<_, Error>((refresh_version, snapshot))
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = tokio::time::timeout(self.config.request_timeout, work) => match result {
                Ok(result) => result,
                Err(_) => Err(Error::DeadlineElapsed),
            }
        };

        match outcome {
            Ok((refresh_version, snapshot)) => {
                job.state = JobState::Succeeded;
                job.latest_version = Some(if refresh_version != 0 {
                    refresh_version
                } else {
                    snapshot.version
                });
            }
            Err(e) => {
                job.state = JobState::Failed;
                job.error = Some(e.to_string());
            }
        }
        job.finished_at = Some(unix_millis());
        self.queue.update(job);
    }
}
