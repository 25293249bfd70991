//! Small shared helpers for builders and stream managers.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

/// Renders a duration in seconds the way kubectl does: `45s`, `12m`, `3h`,
/// `7d`. Negative inputs clamp to `0s`.
pub(crate) fn format_age(total_secs: i64) -> String {
    let total_secs = total_secs.max(0);
    if total_secs < 60 {
        format!("{total_secs}s")
    } else if total_secs < 3600 {
        format!("{}m", total_secs / 60)
    } else if total_secs < 86400 {
        format!("{}h", total_secs / 3600)
    } else {
        format!("{}d", total_secs / 86400)
    }
}

/// Age of a resource timestamp relative to now.
pub(crate) fn age_since(time: Option<&Time>) -> String {
    match time {
        Some(t) => format_age((chrono::Utc::now() - t.0).num_seconds()),
        None => "unknown".to_string(),
    }
}

/// Parses a Kubernetes CPU quantity into millicores: `250m` -> 250,
/// `2` -> 2000, `1500000n` -> 1.
pub(crate) fn parse_cpu_millis(quantity: &str) -> Option<u64> {
    let q = quantity.trim();
    if let Some(v) = q.strip_suffix('n') {
        return v.parse::<u64>().ok().map(|n| n / 1_000_000);
    }
    if let Some(v) = q.strip_suffix('u') {
        return v.parse::<u64>().ok().map(|n| n / 1_000);
    }
    if let Some(v) = q.strip_suffix('m') {
        return v.parse::<u64>().ok();
    }
    q.parse::<f64>().ok().map(|cores| (cores * 1000.0) as u64)
}

/// Parses a Kubernetes memory quantity into bytes: `128Mi`, `1Gi`, `500k`.
pub(crate) fn parse_memory_bytes(quantity: &str) -> Option<u64> {
    let q = quantity.trim();
    let suffixes: [(&str, u64); 10] = [
        ("Ki", 1 << 10),
        ("Mi", 1 << 20),
        ("Gi", 1 << 30),
        ("Ti", 1u64 << 40),
        ("Pi", 1u64 << 50),
        ("k", 1_000),
        ("M", 1_000_000),
        ("G", 1_000_000_000),
        ("T", 1_000_000_000_000),
        ("P", 1_000_000_000_000_000),
    ];
    for (suffix, factor) in suffixes {
        if let Some(v) = q.strip_suffix(suffix) {
            return v.parse::<u64>().ok().map(|n| n * factor);
        }
    }
    q.parse::<u64>().ok()
}
