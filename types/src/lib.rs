//! Wire-visible models shared between the refresh subsystem and whatever
//! transport layer ships them to console clients. Everything here is plain
//! serde data; no I/O and no Kubernetes types leak through.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Returns the current time as unix milliseconds, the timestamp unit used
/// throughout the wire protocol.
pub fn unix_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// An immutable description of one domain at a point in time.
///
/// `version` increases per `(domain, scope)` whenever the payload checksum
/// changes; `sequence` is assigned by the stream layer when the snapshot is
/// interleaved with live events.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub domain: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    pub version: u64,

    pub checksum: String,

    /// Unix milliseconds at which the payload was generated.
    pub generated_at: i64,

    #[serde(default)]
    pub sequence: u64,

    pub payload: serde_json::Value,

    pub stats: SnapshotStats,
}

/// Build statistics attached to every snapshot envelope.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotStats {
    pub item_count: usize,

    pub build_duration_ms: u64,

    /// Total items before truncation, when the builder applied a cap.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_items: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncated: Option<bool>,

    /// Best-effort warnings collected while building (skipped sub-resources).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_index: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_batches: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_final_batch: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_to_first_row_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_started_at_unix: Option<i64>,
}

/// One message on a streaming domain. `T` is the entry type of the domain:
/// [`EventEntry`] for `object-events`, [`LogEntry`] for `object-logs`.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StreamMessage<T> {
    pub domain: String,

    pub scope: String,

    pub sequence: u64,

    pub generated_at: i64,

    /// Present and `true` when the client must discard local state and
    /// rehydrate from a fresh snapshot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<T>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<PermissionDeniedStatus>,
}

impl<T> StreamMessage<T> {
    pub fn new(domain: impl Into<String>, scope: impl Into<String>, sequence: u64) -> Self {
        Self {
            domain: domain.into(),
            scope: scope.into(),
            sequence,
            generated_at: unix_millis(),
            reset: None,
            entries: None,
            error: None,
            error_details: None,
        }
    }
}

/// A cluster event synthesized from the Events informer.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventEntry {
    /// Kind of the involved object (Pod, Deployment, ...).
    pub kind: String,

    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Normal | Warning.
    #[serde(rename = "type")]
    pub event_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    pub reason: String,

    pub message: String,

    /// `namespace/name` of the involved object, for client-side joins.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,

    /// Unix milliseconds of the last observation.
    pub created_at: i64,

    /// Human-readable age at synthesis time, e.g. `3m`.
    pub age: String,
}

/// One line of container output as delivered to log subscribers.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// RFC3339Nano timestamp as reported by the kubelet; empty when the line
    /// carried no parsable timestamp.
    pub timestamp: String,

    pub pod: String,

    pub container: String,

    pub line: String,

    #[serde(default)]
    pub is_init: bool,
}

/// Lifecycle state of a [`ManualRefreshJob`].
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    #[default]
    Queued,

    Running,

    Succeeded,

    Failed,

    Cancelled,
}

impl JobState {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }
}

impl FromStr for JobState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobState::Queued),
            "running" => Ok(JobState::Running),
            "succeeded" => Ok(JobState::Succeeded),
            "failed" => Ok(JobState::Failed),
            "cancelled" => Ok(JobState::Cancelled),
            _ => Err(()),
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Queued => write!(f, "queued"),
            JobState::Running => write!(f, "running"),
            JobState::Succeeded => write!(f, "succeeded"),
            JobState::Failed => write!(f, "failed"),
            JobState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A manually requested rebuild of one `(domain, scope)`.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManualRefreshJob {
    pub job_id: String,

    pub domain: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    pub state: JobState,

    /// Unix milliseconds.
    pub queued_at: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Version of the snapshot produced by the rebuild, when one was built.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<u64>,
}

/// The wire form of an RBAC refusal, shaped like a Kubernetes Status object
/// so existing console error handling renders it natively.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PermissionDeniedStatus {
    pub kind: String,

    pub api_version: String,

    pub code: u16,

    pub reason: String,

    pub message: String,

    pub details: PermissionDeniedDetails,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PermissionDeniedDetails {
    pub domain: String,

    pub resource: String,
}

impl PermissionDeniedStatus {
    pub fn new(domain: impl Into<String>, resource: impl Into<String>) -> Self {
        let domain = domain.into();
        let resource = resource.into();
        Self {
            kind: "Status".to_string(),
            api_version: "v1".to_string(),
            code: 403,
            reason: "Forbidden".to_string(),
            message: format!("access to {resource} is denied for domain {domain}"),
            details: PermissionDeniedDetails { domain, resource },
        }
    }
}

/// Per-stream counters reported by the telemetry recorder. All counters are
/// monotone for the lifetime of the process.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StreamStatus {
    pub name: String,

    pub total_messages: u64,

    pub dropped_messages: u64,

    pub error_count: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Unix milliseconds of the most recent subscriber connect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_connect_at: Option<i64>,

    /// Unix milliseconds of the most recent delivered entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event_at: Option<i64>,

    pub resyncs: u64,

    pub fallbacks: u64,

    pub connects: u64,

    pub disconnects: u64,
}
