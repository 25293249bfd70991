//! Fan-out of cluster events to stream subscribers. One manager exists per
//! cluster; entries are published into the `cluster` scope and, for
//! namespaced objects, `namespace:<ns>` as well. Each scope keeps a ring
//! buffer so reconnecting clients can resume from their last sequence.

use crate::config::RefreshConfig;
use crate::scope::CLUSTER_SCOPE;
use crate::telemetry::TelemetryRecorder;
use crate::util::age_since;
use k8s_openapi::api::core::v1::Event as K8sEvent;
use porthole_types::EventEntry;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

const LOG_TARGET: &str = "refresh::events";

pub const EVENTS_DOMAIN: &str = "object-events";

/// One buffered event: the entry plus its scope-local sequence.
#[derive(Debug, Clone)]
pub struct EventBufferEntry {
    pub sequence: u64,
    pub entry: EventEntry,
}

struct SubscriberSlot {
    tx: mpsc::Sender<EventBufferEntry>,
}

#[derive(Default)]
struct FanoutState {
    subscribers: HashMap<String, HashMap<u64, SubscriberSlot>>,
    buffers: HashMap<String, VecDeque<EventBufferEntry>>,
    sequences: HashMap<String, u64>,
    next_subscriber_id: u64,
}

pub struct EventStreamManager {
    stream_name: String,
    subscriber_buffer: usize,
    resume_buffer_size: usize,
    max_subscribers_per_scope: usize,
    telemetry: Arc<TelemetryRecorder>,
    state: Mutex<FanoutState>,
}

impl EventStreamManager {
    pub fn new(
        cluster_id: &str,
        config: &RefreshConfig,
        telemetry: Arc<TelemetryRecorder>,
    ) -> Self {
        Self {
            stream_name: format!("{EVENTS_DOMAIN}:{cluster_id}"),
            subscriber_buffer: config.subscriber_buffer.max(1),
            resume_buffer_size: config.resume_buffer_size.max(1),
            max_subscribers_per_scope: config.max_subscribers_per_scope.max(1),
            telemetry,
            state: Mutex::new(FanoutState::default()),
        }
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    /// Registers a subscriber for `scope`. Returns `None` when the per-scope
    /// cap is reached; the caller is expected to surface that as a transport
    /// error rather than block.
    pub fn subscribe(self: &Arc<Self>, scope: &str) -> Option<Subscription> {
        let mut state = self.state.lock().unwrap();
        let subscribers = state.subscribers.entry(scope.to_string()).or_default();
        if subscribers.len() >= self.max_subscribers_per_scope {
            self.telemetry
                .record_error(&self.stream_name, "subscriber cap reached");
            return None;
        }

        let (tx, rx) = mpsc::channel(self.subscriber_buffer);
        state.next_subscriber_id += 1;
        let id = state.next_subscriber_id;
        state
            .subscribers
            .get_mut(scope)
            .unwrap()
            .insert(id, SubscriberSlot { tx });
        drop(state);

        self.telemetry.record_connect(&self.stream_name);
        Some(Subscription {
            id,
            scope: scope.to_string(),
            receiver: rx,
            manager: Arc::clone(self),
        })
    }

    fn unsubscribe(&self, scope: &str, id: u64) {
        let mut state = self.state.lock().unwrap();
        let removed = state
            .subscribers
            .get_mut(scope)
            .map(|subs| subs.remove(&id).is_some())
            .unwrap_or(false);
        drop(state);
        if removed {
            self.telemetry.record_disconnect(&self.stream_name);
        }
    }

    /// Returns buffered entries newer than `since` when the ring still
    /// reaches back that far; `(_, false)` means the client must resync from
    /// a fresh snapshot.
    pub fn resume(&self, scope: &str, since: u64) -> (Vec<EventBufferEntry>, bool) {
        let state = self.state.lock().unwrap();
        let current = state.sequences.get(scope).copied().unwrap_or(0);
        let buffer = state.buffers.get(scope);

        match buffer {
            Some(buffer) if !buffer.is_empty() => {
                let oldest = buffer.front().unwrap().sequence;
                if since + 1 < oldest {
                    self.telemetry.record_fallback(&self.stream_name);
                    return (Vec::new(), false);
                }
                let entries = buffer
                    .iter()
                    .filter(|e| e.sequence > since)
                    .cloned()
                    .collect();
                self.telemetry.record_resync(&self.stream_name);
                (entries, true)
            }
            _ => {
                if since == current {
                    (Vec::new(), true)
                } else {
                    self.telemetry.record_fallback(&self.stream_name);
                    (Vec::new(), false)
                }
            }
        }
    }

    /// Reserves the next sequence for `scope`, letting non-event payloads
    /// (initial snapshots, resets) interleave with stream events.
    pub fn next_sequence(&self, scope: &str) -> u64 {
        let mut state = self.state.lock().unwrap();
        let seq = state.sequences.entry(scope.to_string()).or_default();
        *seq += 1;
        *seq
    }

    /// Publishes an entry into every scope it belongs to, fanning out to
    /// subscribers. The publisher never waits: a subscriber whose buffer is
    /// full (or whose receiver is gone) is dropped within this broadcast and
    /// must resubscribe.
    pub fn publish(&self, entry: EventEntry) {
        let mut scopes = vec![CLUSTER_SCOPE.to_string()];
        if let Some(ns) = &entry.namespace {
            scopes.push(format!("namespace:{ns}"));
        }

        let mut state = self.state.lock().unwrap();
        for scope in scopes {
            let seq = {
                let counter = state.sequences.entry(scope.clone()).or_default();
                *counter += 1;
                *counter
            };
            let buffered = EventBufferEntry {
                sequence: seq,
                entry: entry.clone(),
            };

            let buffer = state.buffers.entry(scope.clone()).or_default();
            if buffer.len() >= self.resume_buffer_size {
                buffer.pop_front();
            }
            buffer.push_back(buffered.clone());

            let Some(subscribers) = state.subscribers.get_mut(&scope) else {
                continue;
            };
            let mut dropped: Vec<u64> = Vec::new();
            for (id, slot) in subscribers.iter() {
                match slot.tx.try_send(buffered.clone()) {
                    Ok(()) => self.telemetry.record_message(&self.stream_name),
                    Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                        dropped.push(*id);
                    }
                }
            }
            for id in dropped {
                subscribers.remove(&id);
                debug!(
                    target: LOG_TARGET,
                    "dropping subscriber {id} on scope {scope}: backlog full"
                );
                self.telemetry
                    .record_dropped(&self.stream_name, 1, "subscriber backlog");
                self.telemetry.record_disconnect(&self.stream_name);
            }
        }
    }

    /// Current subscriber count for a scope.
    pub fn subscriber_count(&self, scope: &str) -> usize {
        let state = self.state.lock().unwrap();
        state
            .subscribers
            .get(scope)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }
}

/// A live event subscription. Dropping it (or calling [`cancel`]) removes the
/// subscriber; cancellation is idempotent.
///
/// [`cancel`]: Subscription::cancel
pub struct Subscription {
    pub id: u64,
    pub scope: String,
    receiver: mpsc::Receiver<EventBufferEntry>,
    manager: Arc<EventStreamManager>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<EventBufferEntry> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<EventBufferEntry> {
        self.receiver.try_recv().ok()
    }

    pub fn cancel(&self) {
        self.manager.unsubscribe(&self.scope, self.id);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Synthesizes a stream entry from a core/v1 Event object.
pub fn synthesize_entry(event: &K8sEvent) -> EventEntry {
    let involved = &event.involved_object;
    let namespace = involved
        .namespace
        .clone()
        .or_else(|| event.metadata.namespace.clone());
    let name = involved.name.clone().unwrap_or_default();
    let observed = event
        .last_timestamp
        .as_ref()
        .map(|t| t.0)
        .or_else(|| event.metadata.creation_timestamp.as_ref().map(|t| t.0));

    EventEntry {
        kind: involved.kind.clone().unwrap_or_default(),
        name: name.clone(),
        namespace: namespace.clone(),
        event_type: event.type_.clone().unwrap_or_else(|| "Normal".to_string()),
        source: event
            .source
            .as_ref()
            .and_then(|s| s.component.clone()),
        reason: event.reason.clone().unwrap_or_default(),
        message: event.message.clone().unwrap_or_default(),
        object: namespace.as_ref().map(|ns| format!("{ns}/{name}")),
        created_at: observed
            .map(|t| t.timestamp_millis())
            .unwrap_or_else(porthole_types::unix_millis),
        age: age_since(
            event
                .last_timestamp
                .as_ref()
                .or(event.metadata.creation_timestamp.as_ref()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_with_buffer(buffer: usize) -> Arc<EventStreamManager> {
        let config = RefreshConfig {
            subscriber_buffer: buffer,
            ..Default::default()
        };
        Arc::new(EventStreamManager::new(
            "test",
            &config,
            Arc::new(TelemetryRecorder::new()),
        ))
    }

    fn entry(ns: Option<&str>, name: &str) -> EventEntry {
        EventEntry {
            kind: "Pod".to_string(),
            name: name.to_string(),
            namespace: ns.map(|s| s.to_string()),
            event_type: "Normal".to_string(),
            reason: "Started".to_string(),
            message: "container started".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn sequences_increase_per_scope() {
        let manager = manager_with_buffer(16);
        let mut sub = manager.subscribe("namespace:default").unwrap();

        manager.publish(entry(Some("default"), "a"));
        manager.publish(entry(Some("default"), "b"));
        manager.publish(entry(Some("other"), "c"));

        let first = sub.recv().await.unwrap();
        let second = sub.recv().await.unwrap();
        assert!(second.sequence > first.sequence);
        assert_eq!(first.entry.name, "a");
        assert_eq!(second.entry.name, "b");
        // The event for the other namespace never reaches this scope.
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn cluster_scope_sees_everything() {
        let manager = manager_with_buffer(16);
        let mut sub = manager.subscribe(CLUSTER_SCOPE).unwrap();

        manager.publish(entry(Some("default"), "a"));
        manager.publish(entry(None, "node-event"));

        assert_eq!(sub.recv().await.unwrap().entry.name, "a");
        assert_eq!(sub.recv().await.unwrap().entry.name, "node-event");
    }

    #[tokio::test]
    async fn backpressure_drops_the_slow_subscriber() {
        let telemetry = Arc::new(TelemetryRecorder::new());
        let config = RefreshConfig {
            subscriber_buffer: 1,
            ..Default::default()
        };
        let manager = Arc::new(EventStreamManager::new("test", &config, telemetry.clone()));
        let _sub = manager.subscribe(CLUSTER_SCOPE).unwrap();
        assert_eq!(manager.subscriber_count(CLUSTER_SCOPE), 1);

        // First publish fills the single-slot buffer; the second overflows it
        // and must drop the subscriber within the broadcast.
        manager.publish(entry(None, "a"));
        manager.publish(entry(None, "b"));

        assert_eq!(manager.subscriber_count(CLUSTER_SCOPE), 0);
        let status = telemetry.status(manager.stream_name()).unwrap();
        assert!(status.dropped_messages > 0);
        assert_eq!(status.last_error.as_deref(), Some("subscriber backlog"));
    }

    #[tokio::test]
    async fn resume_replays_buffered_entries() {
        let manager = manager_with_buffer(16);
        manager.publish(entry(None, "a"));
        manager.publish(entry(None, "b"));
        manager.publish(entry(None, "c"));

        let (entries, ok) = manager.resume(CLUSTER_SCOPE, 1);
        assert!(ok);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].entry.name, "b");
        assert_eq!(entries[1].entry.name, "c");

        // Caught-up client resumes to nothing.
        let (entries, ok) = manager.resume(CLUSTER_SCOPE, 3);
        assert!(ok);
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn resume_reports_gap_when_ring_overflowed() {
        let config = RefreshConfig {
            resume_buffer_size: 2,
            ..Default::default()
        };
        let manager = Arc::new(EventStreamManager::new(
            "test",
            &config,
            Arc::new(TelemetryRecorder::new()),
        ));
        for name in ["a", "b", "c", "d"] {
            manager.publish(entry(None, name));
        }

        // Sequences 1 and 2 have been overwritten.
        let (_, ok) = manager.resume(CLUSTER_SCOPE, 1);
        assert!(!ok);
    }

    #[tokio::test]
    async fn cancelled_subscriber_receives_nothing_and_frees_the_slot() {
        let manager = manager_with_buffer(16);
        let mut sub = manager.subscribe("namespace:default").unwrap();
        sub.cancel();
        sub.cancel(); // idempotent
        assert_eq!(manager.subscriber_count("namespace:default"), 0);

        manager.publish(entry(Some("default"), "a"));
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn subscriber_cap_is_enforced() {
        let config = RefreshConfig {
            max_subscribers_per_scope: 2,
            ..Default::default()
        };
        let manager = Arc::new(EventStreamManager::new(
            "test",
            &config,
            Arc::new(TelemetryRecorder::new()),
        ));
        let _a = manager.subscribe(CLUSTER_SCOPE).unwrap();
        let _b = manager.subscribe(CLUSTER_SCOPE).unwrap();
        assert!(manager.subscribe(CLUSTER_SCOPE).is_none());
    }

    #[tokio::test]
    async fn next_sequence_interleaves_with_published_events() {
        let manager = manager_with_buffer(16);
        manager.publish(entry(None, "a"));
        let reserved = manager.next_sequence(CLUSTER_SCOPE);
        manager.publish(entry(None, "b"));

        let (entries, ok) = manager.resume(CLUSTER_SCOPE, 0);
        assert!(ok);
        let sequences: Vec<u64> = entries.iter().map(|e| e.sequence).collect();
        assert!(!sequences.contains(&reserved));
        assert_eq!(sequences, vec![1, 3]);
    }
}
