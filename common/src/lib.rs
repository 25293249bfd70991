pub mod args;
pub mod shutdown;

use std::sync::Once;

static INIT: Once = Once::new();

/// Initializes process-wide logging. Safe to call more than once; only the
/// first call takes effect. The filter defaults to `info` and is overridable
/// through `RUST_LOG`.
pub fn init() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_writer(std::io::stderr)
            .init();
    });
}

/// Signals readiness to the orchestrator. When `READY_FILE` is set the file
/// is created (startup probes point an `exec cat` at it); otherwise this is
/// just a log line.
pub fn signal_ready() {
    match std::env::var("READY_FILE") {
        Ok(path) if !path.is_empty() => {
            if let Err(e) = std::fs::write(&path, b"ready\n") {
                tracing::warn!(target: "porthole", "failed to write ready file {path}: {e}");
            }
        }
        _ => tracing::info!(target: "porthole", "ready"),
    }
}
