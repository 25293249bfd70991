//! Per-stream counters and last-observations. One recorder is shared by the
//! whole process; components take an `Arc` so tests can isolate their own.

use lazy_static::lazy_static;
use porthole_types::{StreamStatus, unix_millis};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

lazy_static! {
    static ref GLOBAL: Arc<TelemetryRecorder> = Arc::new(TelemetryRecorder::new());
}

/// The process-wide recorder instance.
pub fn global() -> Arc<TelemetryRecorder> {
    Arc::clone(&GLOBAL)
}

/// Thread-safe counter store keyed by stream name. No I/O; reading the
/// summary clones the current values.
#[derive(Default)]
pub struct TelemetryRecorder {
    streams: Mutex<HashMap<String, StreamStatus>>,
}

impl TelemetryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<F: FnOnce(&mut StreamStatus)>(&self, name: &str, f: F) {
        let mut streams = self.streams.lock().unwrap();
        let status = streams
            .entry(name.to_string())
            .or_insert_with(|| StreamStatus {
                name: name.to_string(),
                ..Default::default()
            });
        f(status);
    }

    pub fn record_message(&self, name: &str) {
        self.with(name, |s| {
            s.total_messages += 1;
            s.last_event_at = Some(unix_millis());
        });
    }

    pub fn record_dropped(&self, name: &str, count: u64, reason: &str) {
        self.with(name, |s| {
            s.dropped_messages += count;
            s.last_error = Some(reason.to_string());
        });
    }

    pub fn record_error(&self, name: &str, message: &str) {
        self.with(name, |s| {
            s.error_count += 1;
            s.last_error = Some(message.to_string());
        });
    }

    pub fn record_resync(&self, name: &str) {
        self.with(name, |s| s.resyncs += 1);
    }

    pub fn record_fallback(&self, name: &str) {
        self.with(name, |s| s.fallbacks += 1);
    }

    pub fn record_connect(&self, name: &str) {
        self.with(name, |s| {
            s.connects += 1;
            s.last_connect_at = Some(unix_millis());
        });
    }

    pub fn record_disconnect(&self, name: &str) {
        self.with(name, |s| s.disconnects += 1);
    }

    /// Immutable copy of every stream's counters, sorted by name.
    pub fn snapshot_summary(&self) -> Vec<StreamStatus> {
        let streams = self.streams.lock().unwrap();
        let mut summary: Vec<StreamStatus> = streams.values().cloned().collect();
        summary.sort_by(|a, b| a.name.cmp(&b.name));
        summary
    }

    /// Counters for a single stream, when it has been observed.
    pub fn status(&self, name: &str) -> Option<StreamStatus> {
        self.streams.lock().unwrap().get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_per_stream() {
        let recorder = TelemetryRecorder::new();
        recorder.record_message("object-events:prod");
        recorder.record_message("object-events:prod");
        recorder.record_dropped("object-events:prod", 1, "subscriber backlog");
        recorder.record_error("object-logs:prod", "follow failed");
        recorder.record_connect("object-events:prod");
        recorder.record_disconnect("object-events:prod");

        let events = recorder.status("object-events:prod").unwrap();
        assert_eq!(events.total_messages, 2);
        assert_eq!(events.dropped_messages, 1);
        assert_eq!(events.last_error.as_deref(), Some("subscriber backlog"));
        assert_eq!(events.connects, 1);
        assert_eq!(events.disconnects, 1);
        assert!(events.last_event_at.is_some());
        assert!(events.last_connect_at.is_some());

        let logs = recorder.status("object-logs:prod").unwrap();
        assert_eq!(logs.error_count, 1);
        assert_eq!(logs.total_messages, 0);
    }

    #[test]
    fn summary_is_sorted_and_detached() {
        let recorder = TelemetryRecorder::new();
        recorder.record_message("b");
        recorder.record_message("a");

        let summary = recorder.snapshot_summary();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].name, "a");
        assert_eq!(summary[1].name, "b");

        // Mutating after the fact does not affect the snapshot.
        recorder.record_message("a");
        assert_eq!(summary[0].total_messages, 1);
    }
}
