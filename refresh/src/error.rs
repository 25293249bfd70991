//! The error taxonomy of the refresh subsystem. Identity predicates walk
//! `source` chains, so wrapping an error (here or through `anyhow` context at
//! the binary boundary) never loses its classification.

use porthole_types::PermissionDeniedStatus;
use std::error::Error as StdError;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Bad grammar or a missing required component. Not retried.
    #[error("invalid scope {0:?}")]
    InvalidScope(String),

    /// RBAC refusal, attributed to the domain that hit it.
    #[error("access to {resource} is denied for domain {domain}")]
    PermissionDenied {
        domain: String,
        resource: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    },

    #[error("domain {0:?} is not registered")]
    UnknownDomain(String),

    #[error("domain {0:?} is already registered")]
    DuplicateDomain(String),

    #[error("cluster {0:?} is not connected")]
    UnknownCluster(String),

    #[error("manual refresh requires a domain")]
    EmptyDomain,

    /// The owning context was cancelled before the operation finished.
    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline elapsed")]
    DeadlineElapsed,

    /// An informer exists for the resource but has not completed its first
    /// list; callers treat this as a transient build failure.
    #[error("{resource} informer is not ready")]
    NotReady { resource: String },

    #[error(transparent)]
    Kube(#[from] kube::Error),

    #[error(transparent)]
    Serialize(#[from] serde_json::Error),

    /// Contextual wrapper that preserves the typed identity of its source.
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },

    #[error("{0}")]
    Message(String),
}

impl Error {
    pub fn permission_denied(domain: impl Into<String>, resource: impl Into<String>) -> Self {
        Error::PermissionDenied {
            domain: domain.into(),
            resource: resource.into(),
            source: None,
        }
    }

    /// Adds a short prefix identifying the subsystem while keeping the chain
    /// intact for the identity predicates.
    pub fn context(self, context: impl Into<String>) -> Self {
        Error::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    pub fn message(msg: impl Into<String>) -> Self {
        Error::Message(msg.into())
    }
}

/// Re-labels any error as a permission refusal for `(domain, resource)` while
/// preserving the original message in the chain.
pub fn wrap_permission_denied<E>(err: E, domain: &str, resource: &str) -> Error
where
    E: StdError + Send + Sync + 'static,
{
    Error::PermissionDenied {
        domain: domain.to_string(),
        resource: resource.to_string(),
        source: Some(Box::new(err)),
    }
}

/// True when the error or anything in its source chain is a permission
/// refusal.
pub fn is_permission_denied(err: &(dyn StdError + 'static)) -> bool {
    denied_details(err).is_some()
}

/// Extracts `(domain, resource)` from the first permission refusal in the
/// chain, if any.
pub fn denied_details(err: &(dyn StdError + 'static)) -> Option<(String, String)> {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(Error::PermissionDenied {
            domain, resource, ..
        }) = e.downcast_ref::<Error>()
        {
            return Some((domain.clone(), resource.clone()));
        }
        current = e.source();
    }
    None
}

/// The wire form of the first permission refusal in the chain.
pub fn permission_denied_status(err: &(dyn StdError + 'static)) -> Option<PermissionDeniedStatus> {
    denied_details(err).map(|(domain, resource)| PermissionDeniedStatus::new(domain, resource))
}

/// Upstream "forbidden" from the API server.
pub fn is_upstream_forbidden(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 403)
}

/// Upstream "not found" from the API server.
pub fn is_upstream_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// True when anywhere in the chain the API server answered 403.
pub fn is_forbidden_chain(err: &(dyn StdError + 'static)) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(kube_err) = e.downcast_ref::<kube::Error>() {
            if is_upstream_forbidden(kube_err) {
                return true;
            }
        }
        current = e.source();
    }
    false
}

/// True for upstream errors a best-effort listing may suppress: the resource
/// is gone, or one sub-resource is forbidden while the listing as a whole is
/// not.
pub fn is_skippable(err: &(dyn StdError + 'static)) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(kube_err) = e.downcast_ref::<kube::Error>() {
            if is_upstream_forbidden(kube_err) || is_upstream_not_found(kube_err) {
                return true;
            }
        }
        current = e.source();
    }
    false
}
