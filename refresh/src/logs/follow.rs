//! The per-container follower: opens a follow stream, filters the reconnect
//! overlap, and pushes entries without ever blocking on a slow consumer.

use super::{ContainerTarget, SessionShared, split_log_line};
use crate::error::{self, Error};
use crate::logs::api::LogFetchParams;
use futures::StreamExt;
use porthole_types::LogEntry;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const LOG_TARGET: &str = "refresh::logs";

enum Disposition {
    Terminal(&'static str),
    Retry,
}

/// Follows one container until a terminal condition or cancellation. Watch
/// and stream failures back off exponentially; reconnects resume from the
/// last delivered timestamp and drop the overlap line.
pub(super) async fn follow_container(
    shared: Arc<SessionShared>,
    cancel: CancellationToken,
    mut target: ContainerTarget,
) {
    let mut backoff = shared.config.log_backoff_initial;

    loop {
        if cancel.is_cancelled() {
            return;
        }

        match follow_once(&shared, &cancel, &mut target).await {
            Ok(received_any) => {
                if received_any {
                    backoff = shared.config.log_backoff_initial;
                }
            }
            Err(e) => {
                // EOF and cancellation never reach here; anything else is a
                // transient stream fault.
                debug!(
                    target: LOG_TARGET,
                    "follow failed for {}/{}/{}: {e}",
                    target.namespace,
                    target.pod,
                    target.container
                );
            }
        }

        if cancel.is_cancelled() {
            return;
        }

        match disposition(&shared, &target).await {
            Disposition::Terminal(reason) => {
                debug!(
                    target: LOG_TARGET,
                    "follower for {}/{}/{} done: {reason}",
                    target.namespace,
                    target.pod,
                    target.container
                );
                return;
            }
            Disposition::Retry => {}
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(shared.config.log_backoff_max);
    }
}

/// One follow attempt. Returns whether any line was delivered so the caller
/// can reset its backoff.
async fn follow_once(
    shared: &Arc<SessionShared>,
    cancel: &CancellationToken,
    target: &mut ContainerTarget,
) -> Result<bool, Error> {
    let params = LogFetchParams {
        container: target.container.clone(),
        follow: true,
        timestamps: true,
        since: target.last_timestamp,
        tail_lines: None,
    };
    let mut stream = shared
        .api
        .stream_logs(&target.namespace, &target.pod, &params)
        .await?;

    let mut received = false;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(received),
            line = stream.next() => match line {
                Some(Ok(line)) => {
                    if deliver_line(shared, target, &line) {
                        received = true;
                    }
                }
                Some(Err(e)) => {
                    return Err(Error::message(format!("log stream read: {e}")));
                }
                None => return Ok(received),
            }
        }
    }
}

/// Parses, dedups and emits one raw line. Returns false when the line was the
/// reconnect duplicate.
fn deliver_line(shared: &Arc<SessionShared>, target: &mut ContainerTarget, raw: &str) -> bool {
    let (parsed, timestamp, content) = split_log_line(raw);

    if let (Some(ts), Some(last)) = (parsed, target.last_timestamp) {
        if ts <= last && content == target.last_line {
            return false;
        }
    }

    if let Some(ts) = parsed {
        if target.last_timestamp.is_none_or(|last| ts >= last) {
            target.last_timestamp = Some(ts);
        }
    }
    target.last_line = content.clone();

    let entry = LogEntry {
        timestamp,
        pod: target.pod.clone(),
        container: target.container.clone(),
        line: content,
        is_init: target.is_init,
    };

    match shared.entries_tx.try_send(entry) {
        Ok(()) => {
            shared.telemetry.record_message(&shared.stream_name);
        }
        Err(TrySendError::Full(_)) => {
            // Forward a drop hint; if even that channel is backed up, account
            // for the loss directly.
            if shared.drops_tx.try_send(1).is_err() {
                shared
                    .telemetry
                    .record_dropped(&shared.stream_name, 1, "log backlog");
            }
        }
        Err(TrySendError::Closed(_)) => {}
    }
    true
}

/// Decides whether a finished follow attempt should retry. Terminal: the pod
/// is gone, being deleted, finished, or this was an init container that
/// completed.
async fn disposition(shared: &Arc<SessionShared>, target: &ContainerTarget) -> Disposition {
    match shared.api.get_pod(&target.namespace, &target.pod).await {
        Ok(None) => Disposition::Terminal("pod not found"),
        Ok(Some(pod)) => {
            if pod.metadata.deletion_timestamp.is_some() {
                return Disposition::Terminal("pod is being deleted");
            }
            let phase = pod
                .status
                .as_ref()
                .and_then(|s| s.phase.as_deref())
                .unwrap_or_default();
            if phase == "Failed" || phase == "Succeeded" {
                return Disposition::Terminal("pod finished");
            }
            if target.is_init && init_container_finished(&pod, &target.container) {
                return Disposition::Terminal("init container finished");
            }
            Disposition::Retry
        }
        Err(e) if error::is_skippable(&e) => Disposition::Terminal("pod not found"),
        Err(_) => Disposition::Retry,
    }
}

fn init_container_finished(pod: &k8s_openapi::api::core::v1::Pod, container: &str) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.init_container_statuses.as_ref())
        .map(|statuses| {
            statuses.iter().any(|cs| {
                cs.name == container
                    && cs
                        .state
                        .as_ref()
                        .is_some_and(|state| state.terminated.is_some())
            })
        })
        .unwrap_or(false)
}
