//! Log snapshot builder: the initial tail for an object, served through the
//! snapshot contract. Live following happens on the stream side via
//! [`LogStreamManager::open_stream`](crate::logs::LogStreamManager).

use crate::error::Error;
use crate::logs::{LogSessionOptions, LogStreamManager, WorkloadKind};
use crate::registry::{BuildRequest, DomainPayload, SnapshotBuilder};
use crate::scope::InnerScope;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

pub struct LogsBuilder {
    manager: Arc<LogStreamManager>,
}

impl LogsBuilder {
    pub fn new(manager: Arc<LogStreamManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl SnapshotBuilder for LogsBuilder {
    async fn build(&self, req: &BuildRequest<'_>) -> Result<DomainPayload, Error> {
        let InnerScope::Object {
            namespace,
            kind,
            name,
        } = &req.scope.inner
        else {
            return Err(Error::InvalidScope(req.scope.key.clone()));
        };
        let kind: WorkloadKind = kind.parse()?;

        let mut entries = Vec::new();
        for cluster in req.clusters {
            let opts = LogSessionOptions {
                namespace: namespace.clone(),
                kind,
                name: name.clone(),
                container: None,
                tail_lines: None,
                scope: req.scope.key.clone(),
            };
            let tail = self.manager.tail(&cluster.logs, &opts).await?;
            entries.extend(tail.entries);
        }

        let count = entries.len();
        Ok(DomainPayload::new(json!({"entries": entries}), count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RefreshConfig;
    use crate::domains::testutil::{FakeState, ScriptedLogs, handle_with_logs};
    use crate::scope;
    use crate::telemetry::TelemetryRecorder;
    use k8s_openapi::api::core::v1::{Container, Pod, PodSpec};

    fn builder() -> LogsBuilder {
        LogsBuilder::new(Arc::new(LogStreamManager::new(
            RefreshConfig::default(),
            Arc::new(TelemetryRecorder::new()),
        )))
    }

    fn pod(ns: &str, name: &str, container: &str) -> Pod {
        let mut pod = Pod::default();
        pod.metadata.namespace = Some(ns.to_string());
        pod.metadata.name = Some(name.to_string());
        pod.spec = Some(PodSpec {
            containers: vec![Container {
                name: container.to_string(),
                ..Default::default()
            }],
            ..Default::default()
        });
        pod
    }

    #[tokio::test]
    async fn object_scope_yields_the_tail_entries() {
        let mut logs = ScriptedLogs::default();
        logs.pods = vec![pod("default", "web-1", "app")];
        logs.logs.insert(
            "web-1/app".to_string(),
            "2024-05-01T10:00:01Z hello\n2024-05-01T10:00:02Z world".to_string(),
        );
        let handles = vec![handle_with_logs(FakeState::named("test"), Arc::new(logs))];

        let scope = scope::normalize("default:pod:web-1").unwrap();
        let req = BuildRequest {
            domain: "object-logs",
            scope: &scope,
            clusters: &handles,
            bypass_cache: false,
        };
        let payload = builder().build(&req).await.unwrap();

        assert_eq!(payload.item_count, 2);
        let entries = payload.payload["entries"].as_array().unwrap();
        assert_eq!(entries[0]["line"], "hello");
        assert_eq!(entries[0]["pod"], "web-1");
        assert_eq!(entries[0]["container"], "app");
        assert_eq!(entries[1]["line"], "world");
    }

    #[tokio::test]
    async fn non_object_scopes_are_rejected() {
        let handles = vec![handle_with_logs(
            FakeState::named("test"),
            Arc::new(ScriptedLogs::default()),
        )];

        for raw in ["namespace:default", "namespace:all", "node:worker-1"] {
            let scope = scope::normalize(raw).unwrap();
            let req = BuildRequest {
                domain: "object-logs",
                scope: &scope,
                clusters: &handles,
                bypass_cache: false,
            };
            let err = builder().build(&req).await.unwrap_err();
            assert!(matches!(err, Error::InvalidScope(_)), "scope {raw:?}");
        }
    }
}
