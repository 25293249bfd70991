//! The refresh subsystem: keeps console clients incrementally up to date with
//! the state of one or more Kubernetes clusters.
//!
//! The pieces compose bottom-up: the [`scope`] grammar addresses slices of a
//! domain, [`informers`] mirror cluster resources into local stores gated by
//! [`permissions`], the [`registry`] maps domain names to snapshot builders,
//! the [`snapshot`] service versions and caches their output, and the
//! [`events`]/[`logs`] managers fan live updates out to subscribers. The
//! [`manager`] owns the lifecycle of all background work.

pub mod cluster;
pub mod config;
pub mod domains;
pub mod error;
pub mod events;
pub mod informers;
pub mod logs;
pub mod manager;
pub mod permissions;
pub mod queue;
pub mod registry;
pub mod scope;
pub mod snapshot;
pub mod telemetry;

pub(crate) mod util;

pub use cluster::{ClusterHandle, ClusterSet};
pub use config::RefreshConfig;
pub use error::Error;
pub use manager::RefreshManager;
