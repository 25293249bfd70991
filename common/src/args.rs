use clap::Parser;
use std::time::Duration;

fn duration(s: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(s)
}

#[derive(Parser, Debug, Clone)]
pub struct ClusterArgs {
    /// Kubeconfig context to serve; repeatable for multi-cluster mode.
    /// When omitted, the current context (or in-cluster config) is used.
    #[arg(long = "context", env = "PORTHOLE_CONTEXTS", value_delimiter = ',')]
    pub contexts: Vec<String>,

    /// Compare every permission decision against a second reviewer and log
    /// mismatches (one warning per key).
    #[arg(long, env = "PORTHOLE_PERMISSION_AUDIT", default_value_t = false)]
    pub permission_audit: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct TuningArgs {
    #[arg(long, env = "REFRESH_REQUEST_TIMEOUT", default_value = "30s", value_parser = duration)]
    pub request_timeout: Duration,

    #[arg(long, env = "MANUAL_JOB_MAX_ATTEMPTS", default_value_t = 3)]
    pub manual_job_max_attempts: u32,

    #[arg(long, env = "MANUAL_JOB_RETRY_DELAY", default_value = "500ms", value_parser = duration)]
    pub manual_job_retry_delay: Duration,

    #[arg(long, env = "SNAPSHOT_TTL", default_value = "5s", value_parser = duration)]
    pub snapshot_ttl: Duration,

    #[arg(long, env = "PERMISSION_TTL", default_value = "5m", value_parser = duration)]
    pub permission_ttl: Duration,

    /// How often denied informers are re-checked against RBAC.
    #[arg(long, env = "PERMISSION_PRIME_INTERVAL", default_value = "5m", value_parser = duration)]
    pub permission_prime_interval: Duration,

    #[arg(long, env = "LOG_STREAM_BACKOFF_INITIAL", default_value = "1s", value_parser = duration)]
    pub log_backoff_initial: Duration,

    #[arg(long, env = "LOG_STREAM_BACKOFF_MAX", default_value = "30s", value_parser = duration)]
    pub log_backoff_max: Duration,

    #[arg(long, env = "LOG_STREAM_BATCH_WINDOW", default_value = "200ms", value_parser = duration)]
    pub log_batch_window: Duration,

    #[arg(long, env = "LOG_STREAM_KEEPALIVE", default_value = "15s", value_parser = duration)]
    pub log_keepalive_interval: Duration,

    /// Cadence of the telemetry summary written to the log.
    #[arg(long, env = "DIAGNOSTICS_INTERVAL", default_value = "60s", value_parser = duration)]
    pub diagnostics_interval: Duration,
}
