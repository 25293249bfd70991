use std::time::Duration;

/// Tunables for the refresh subsystem, plumbed in from process init. One
/// value is constructed by the binary and shared by every component; nothing
/// here is read from the environment directly.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Upper bound for one manual refresh job, including retries.
    pub request_timeout: Duration,

    /// Total tries for each step of a manual job.
    pub manual_job_max_attempts: u32,

    /// First retry delay; doubles per attempt up to `request_timeout`.
    pub manual_job_retry_delay: Duration,

    /// How long a successful snapshot may be served from cache.
    pub snapshot_ttl: Duration,

    /// How long a failed build suppresses rebuild attempts. Errors are never
    /// cached as successes.
    pub snapshot_error_ttl: Duration,

    /// Lifetime of a cached access-review decision.
    pub permission_ttl: Duration,

    /// Cadence of the recurring prime cycle. Each cycle re-resolves list
    /// permissions and makes informers denied in an earlier cycle eligible
    /// again, so an RBAC fix is picked up without a restart.
    pub permission_prime_interval: Duration,

    pub log_keepalive_interval: Duration,

    /// Log entries are flushed when this window elapses, or earlier when a
    /// batch fills.
    pub log_batch_window: Duration,

    pub log_batch_size: usize,

    pub log_backoff_initial: Duration,

    pub log_backoff_max: Duration,

    pub stream_heartbeat_interval: Duration,

    pub stream_heartbeat_timeout: Duration,

    /// Buffered entries per stream subscriber; overflow drops the subscriber.
    pub subscriber_buffer: usize,

    /// Ring-buffer length per event scope, for resume.
    pub resume_buffer_size: usize,

    pub max_subscribers_per_scope: usize,

    /// Queued manual-refresh job ids.
    pub queue_capacity: usize,

    /// Config snapshots are truncated to this many entries after sorting.
    pub config_snapshot_limit: usize,

    /// CronJob ownership cache; cleared wholesale on overflow.
    pub cronjob_cache_limit: usize,

    pub default_tail_lines: i64,

    pub metrics_poll_interval: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            manual_job_max_attempts: 3,
            manual_job_retry_delay: Duration::from_millis(500),
            snapshot_ttl: Duration::from_secs(5),
            snapshot_error_ttl: Duration::from_secs(2),
            permission_ttl: Duration::from_secs(300),
            permission_prime_interval: Duration::from_secs(300),
            log_keepalive_interval: Duration::from_secs(15),
            log_batch_window: Duration::from_millis(200),
            log_batch_size: 64,
            log_backoff_initial: Duration::from_secs(1),
            log_backoff_max: Duration::from_secs(30),
            stream_heartbeat_interval: Duration::from_secs(30),
            stream_heartbeat_timeout: Duration::from_secs(90),
            subscriber_buffer: 256,
            resume_buffer_size: 1000,
            max_subscribers_per_scope: 100,
            queue_capacity: 64,
            config_snapshot_limit: 1000,
            cronjob_cache_limit: 1000,
            default_tail_lines: 1000,
            metrics_poll_interval: Duration::from_secs(30),
        }
    }
}
