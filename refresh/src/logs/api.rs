//! The seam between the log stream manager and the Kubernetes client. The
//! manager only ever talks to [`PodLogApi`]; production wires in
//! [`KubePodLogApi`], tests wire in scripted fakes.

use crate::error::Error;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::{AsyncBufReadExt, StreamExt};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{ListParams, LogParams};
use kube::runtime::watcher::{
    Config as WatcherConfig, Error as WatchError, Event as WatchEvent, watcher,
};
use kube::{Api, Client};

/// Options for one log fetch or follow against a single container.
#[derive(Debug, Clone, Default)]
pub struct LogFetchParams {
    pub container: String,
    pub follow: bool,
    pub timestamps: bool,
    /// Resume point; the kubelet re-sends the line at this instant, which the
    /// follower dedups.
    pub since: Option<DateTime<Utc>>,
    pub tail_lines: Option<i64>,
}

pub type LineStream = BoxStream<'static, std::io::Result<String>>;
pub type PodWatchStream = BoxStream<'static, Result<WatchEvent<Pod>, WatchError>>;

#[async_trait]
pub trait PodLogApi: Send + Sync {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, Error>;

    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<Pod>, Error>;

    async fn get_deployment(&self, namespace: &str, name: &str)
    -> Result<Option<Deployment>, Error>;

    async fn get_replica_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ReplicaSet>, Error>;

    async fn get_stateful_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<StatefulSet>, Error>;

    async fn get_daemon_set(&self, namespace: &str, name: &str)
    -> Result<Option<DaemonSet>, Error>;

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>, Error>;

    async fn list_jobs(&self, namespace: &str) -> Result<Vec<Job>, Error>;

    /// One-shot fetch of up to `tail_lines` lines.
    async fn fetch_logs(
        &self,
        namespace: &str,
        pod: &str,
        params: &LogFetchParams,
    ) -> Result<String, Error>;

    /// Follow stream, one item per line.
    async fn stream_logs(
        &self,
        namespace: &str,
        pod: &str,
        params: &LogFetchParams,
    ) -> Result<LineStream, Error>;

    /// Infinite pod watch filtered by label selector; errors are surfaced as
    /// stream items and handled by the caller's backoff.
    fn watch_pods(&self, namespace: &str, label_selector: &str) -> PodWatchStream;
}

/// Production implementation over a typed kube client.
pub struct KubePodLogApi {
    client: Client,
}

impl KubePodLogApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn log_params(params: &LogFetchParams) -> LogParams {
        LogParams {
            container: Some(params.container.clone()),
            follow: params.follow,
            timestamps: params.timestamps,
            since_time: params.since,
            tail_lines: params.tail_lines,
            ..Default::default()
        }
    }
}

#[async_trait]
impl PodLogApi for KubePodLogApi {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, Error> {
        Ok(self.pods(namespace).get_opt(name).await?)
    }

    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<Pod>, Error> {
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        Ok(self.pods(namespace).list(&params).await?.items)
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_replica_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ReplicaSet>, Error> {
        let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_stateful_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<StatefulSet>, Error> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_daemon_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DaemonSet>, Error> {
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>, Error> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list_jobs(&self, namespace: &str) -> Result<Vec<Job>, Error> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn fetch_logs(
        &self,
        namespace: &str,
        pod: &str,
        params: &LogFetchParams,
    ) -> Result<String, Error> {
        Ok(self.pods(namespace).logs(pod, &Self::log_params(params)).await?)
    }

    async fn stream_logs(
        &self,
        namespace: &str,
        pod: &str,
        params: &LogFetchParams,
    ) -> Result<LineStream, Error> {
        let reader = self
            .pods(namespace)
            .log_stream(pod, &Self::log_params(params))
            .await?;
        Ok(reader.lines().boxed())
    }

    fn watch_pods(&self, namespace: &str, label_selector: &str) -> PodWatchStream {
        let api = self.pods(namespace);
        let config = WatcherConfig::default().labels(label_selector);
        watcher(api, config).boxed()
    }
}
