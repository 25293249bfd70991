//! Helm release snapshot builder. Releases are read from the
//! `helm.sh/release.v1` Secrets Helm itself writes; the release metadata
//! lives in the secret labels, so no secret payload is ever decoded.

use super::sort_items;
use crate::error::Error;
use crate::registry::{BuildRequest, DomainPayload, SnapshotBuilder};
use crate::util::age_since;
use async_trait::async_trait;
use kube::Resource;
use kube::ResourceExt;
use serde_json::json;
use std::collections::HashMap;

const HELM_SECRET_TYPE: &str = "helm.sh/release.v1";

pub struct HelmReleasesBuilder;

#[async_trait]
impl SnapshotBuilder for HelmReleasesBuilder {
    async fn build(&self, req: &BuildRequest<'_>) -> Result<DomainPayload, Error> {
        let ns = req.scope.inner.namespace();
        let mut items = Vec::new();

        for cluster in req.clusters {
            // Keep only the newest revision per release.
            let mut latest: HashMap<(String, String), (i64, serde_json::Value)> = HashMap::new();

            for secret in cluster.state.secrets(ns)? {
                if secret.type_.as_deref() != Some(HELM_SECRET_TYPE) {
                    continue;
                }
                let labels = secret.labels();
                let Some(release) = labels.get("name") else {
                    continue;
                };
                let revision: i64 = labels
                    .get("version")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                let namespace = secret.namespace().unwrap_or_default();

                let row = json!({
                    "cluster": cluster.id.clone(),
                    "namespace": namespace.clone(),
                    "name": release,
                    "kind": "HelmRelease",
                    "revision": revision,
                    "status": labels.get("status").cloned().unwrap_or_default(),
                    "updatedAt": secret.meta().creation_timestamp.as_ref()
                        .map(|t| t.0.timestamp_millis()),
                    "age": age_since(secret.meta().creation_timestamp.as_ref()),
                });

                let key = (namespace, release.clone());
                match latest.get(&key) {
                    Some((existing, _)) if *existing >= revision => {}
                    _ => {
                        latest.insert(key, (revision, row));
                    }
                }
            }

            items.extend(latest.into_values().map(|(_, row)| row));
        }

        sort_items(&mut items);
        let count = items.len();
        Ok(DomainPayload::new(json!({"items": items}), count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::testutil::{FakeState, handle};
    use crate::scope;
    use k8s_openapi::api::core::v1::Secret;

    fn release_secret(ns: &str, release: &str, revision: i64, status: &str) -> Secret {
        let mut secret = Secret::default();
        secret.metadata.namespace = Some(ns.to_string());
        secret.metadata.name = Some(format!("sh.helm.release.v1.{release}.v{revision}"));
        secret.type_ = Some(HELM_SECRET_TYPE.to_string());
        secret.metadata.labels = Some(
            [
                ("name".to_string(), release.to_string()),
                ("version".to_string(), revision.to_string()),
                ("status".to_string(), status.to_string()),
                ("owner".to_string(), "helm".to_string()),
            ]
            .into_iter()
            .collect(),
        );
        secret
    }

    #[tokio::test]
    async fn only_the_newest_revision_per_release_survives() {
        let mut state = FakeState::named("test");
        state.secrets = vec![
            release_secret("default", "api", 1, "superseded"),
            release_secret("default", "api", 2, "deployed"),
            release_secret("default", "worker", 1, "deployed"),
        ];
        // A non-helm secret never shows up.
        let mut other = Secret::default();
        other.metadata.namespace = Some("default".to_string());
        other.metadata.name = Some("db-credentials".to_string());
        other.type_ = Some("Opaque".to_string());
        state.secrets.push(other);
        let handles = vec![handle(state)];

        let scope = scope::normalize("namespace:default").unwrap();
        let req = BuildRequest {
            domain: "helm-releases",
            scope: &scope,
            clusters: &handles,
            bypass_cache: false,
        };
        let payload = HelmReleasesBuilder.build(&req).await.unwrap();
        assert_eq!(payload.item_count, 2);

        let items = payload.payload["items"].as_array().unwrap();
        assert_eq!(items[0]["name"], "api");
        assert_eq!(items[0]["revision"], 2);
        assert_eq!(items[0]["status"], "deployed");
        assert_eq!(items[1]["name"], "worker");
    }
}
