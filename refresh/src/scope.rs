//! The scope grammar. A scope string addresses a slice of a domain and may
//! carry a cluster selector prefix:
//!
//! ```text
//! scope           := [clusterSelector "|"] innerScope
//! clusterSelector := ["clusters="] id ["," id]*
//! innerScope      := "namespace:" ns | "namespace:all" | "workload:" ns ":" name
//!                  | "node:" name | ns ":" kind ":" name | ns
//! ```

use crate::error::Error;
use std::fmt;

/// The scope name under which cluster-wide events are published.
pub const CLUSTER_SCOPE: &str = "cluster";

/// Splits `clusterID|inner` into its two halves. The cluster half is empty
/// when the input carries no delimiter. No trimming happens here so that
/// [`join_cluster_scope`] round-trips the input exactly.
pub fn split_cluster_scope(raw: &str) -> (String, String) {
    match raw.split_once('|') {
        Some((cluster, inner)) => (cluster.to_string(), inner.to_string()),
        None => (String::new(), raw.to_string()),
    }
}

/// Splits a scope that may select several clusters: `clusters=a,b|inner` or
/// `a,b|inner`. Ids are trimmed and deduplicated preserving first-seen order.
/// A trailing delimiter with nothing after it yields an empty inner scope.
pub fn split_cluster_scope_list(raw: &str) -> (Vec<String>, String) {
    let Some((selector, inner)) = raw.split_once('|') else {
        return (Vec::new(), raw.to_string());
    };

    let selector = selector.trim();
    let selector = selector.strip_prefix("clusters=").unwrap_or(selector);

    let mut ids: Vec<String> = Vec::new();
    for part in selector.split(',') {
        let part = part.trim();
        if part.is_empty() || ids.iter().any(|seen| seen == part) {
            continue;
        }
        ids.push(part.to_string());
    }

    (ids, inner.to_string())
}

/// Inverse of [`split_cluster_scope`]. The delimiter is preserved when the
/// scope is empty but the cluster id is not, so splitting round-trips.
pub fn join_cluster_scope(cluster_id: &str, scope: &str) -> String {
    if cluster_id.is_empty() {
        scope.to_string()
    } else {
        format!("{cluster_id}|{scope}")
    }
}

/// The domain-specific half of a scope, parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InnerScope {
    AllNamespaces,
    Namespace(String),
    Workload { namespace: String, name: String },
    Node(String),
    Object { namespace: String, kind: String, name: String },
}

impl InnerScope {
    /// Parses an inner scope. A bare token is shorthand for a namespace.
    /// Empty input (after trimming) is an invalid scope.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidScope(raw.to_string()));
        }

        if let Some(ns) = trimmed.strip_prefix("namespace:") {
            let ns = ns.trim();
            return match ns {
                "" => Err(Error::InvalidScope(raw.to_string())),
                "all" => Ok(InnerScope::AllNamespaces),
                _ => Ok(InnerScope::Namespace(ns.to_string())),
            };
        }

        if let Some(rest) = trimmed.strip_prefix("workload:") {
            return match rest.split_once(':') {
                Some((ns, name)) if !ns.is_empty() && !name.is_empty() => {
                    Ok(InnerScope::Workload {
                        namespace: ns.to_string(),
                        name: name.to_string(),
                    })
                }
                _ => Err(Error::InvalidScope(raw.to_string())),
            };
        }

        if let Some(name) = trimmed.strip_prefix("node:") {
            return if name.is_empty() {
                Err(Error::InvalidScope(raw.to_string()))
            } else {
                Ok(InnerScope::Node(name.to_string()))
            };
        }

        let parts: Vec<&str> = trimmed.splitn(3, ':').collect();
        match parts.as_slice() {
            [ns, kind, name] if !ns.is_empty() && !kind.is_empty() && !name.is_empty() => {
                Ok(InnerScope::Object {
                    namespace: ns.to_string(),
                    kind: kind.to_lowercase(),
                    name: name.to_string(),
                })
            }
            [single] => Ok(InnerScope::Namespace(single.to_string())),
            _ => Err(Error::InvalidScope(raw.to_string())),
        }
    }

    /// Namespace filter implied by this scope, when there is one.
    pub fn namespace(&self) -> Option<&str> {
        match self {
            InnerScope::AllNamespaces | InnerScope::Node(_) => None,
            InnerScope::Namespace(ns) => Some(ns),
            InnerScope::Workload { namespace, .. } | InnerScope::Object { namespace, .. } => {
                Some(namespace)
            }
        }
    }
}

impl fmt::Display for InnerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InnerScope::AllNamespaces => write!(f, "namespace:all"),
            InnerScope::Namespace(ns) => write!(f, "namespace:{ns}"),
            InnerScope::Workload { namespace, name } => write!(f, "workload:{namespace}:{name}"),
            InnerScope::Node(name) => write!(f, "node:{name}"),
            InnerScope::Object {
                namespace,
                kind,
                name,
            } => write!(f, "{namespace}:{kind}:{name}"),
        }
    }
}

/// A fully parsed and canonicalized scope, usable as a cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedScope {
    /// Selected cluster ids, deduplicated, in first-seen order. Empty means
    /// "every registered cluster".
    pub clusters: Vec<String>,

    pub inner: InnerScope,

    /// Canonical string form: `clusters|inner` (or just `inner`).
    pub key: String,
}

/// Parses and canonicalizes a raw scope string.
pub fn normalize(raw: &str) -> Result<NormalizedScope, Error> {
    let (clusters, inner_raw) = split_cluster_scope_list(raw);
    let inner = InnerScope::parse(&inner_raw)?;
    let key = join_cluster_scope(&clusters.join(","), &inner.to_string());
    Ok(NormalizedScope {
        clusters,
        inner,
        key,
    })
}
