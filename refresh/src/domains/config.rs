//! ConfigMap and Secret snapshot builder. Only key names leave the builder;
//! secret values are never part of a payload. The merged listing is
//! truncated after sorting so truncation is deterministic.

use super::{best_effort, sort_items};
use crate::error::Error;
use crate::registry::{BuildRequest, DomainPayload, SnapshotBuilder};
use crate::util::age_since;
use async_trait::async_trait;
use kube::Resource;
use kube::ResourceExt;
use serde_json::json;

pub struct ConfigBuilder {
    limit: usize,
}

impl ConfigBuilder {
    /// `limit` bounds the merged listing after sorting.
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }
}

#[async_trait]
impl SnapshotBuilder for ConfigBuilder {
    async fn build(&self, req: &BuildRequest<'_>) -> Result<DomainPayload, Error> {
        let ns = req.scope.inner.namespace();
        let mut items = Vec::new();
        let mut warnings = Vec::new();

        for cluster in req.clusters {
            for cm in cluster.state.config_maps(ns)? {
                let mut keys: Vec<String> = cm
                    .data
                    .as_ref()
                    .map(|d| d.keys().cloned().collect())
                    .unwrap_or_default();
                keys.extend(
                    cm.binary_data
                        .as_ref()
                        .map(|d| d.keys().cloned().collect::<Vec<_>>())
                        .unwrap_or_default(),
                );
                keys.sort();
                items.push(json!({
                    "cluster": cluster.id.clone(),
                    "namespace": cm.namespace(),
                    "name": cm.name_any(),
                    "kind": "ConfigMap",
                    "keys": keys,
                    "age": age_since(cm.meta().creation_timestamp.as_ref()),
                }));
            }

            // Secrets are commonly locked down tighter than configmaps; a
            // refusal degrades to a warning instead of failing the build.
            if let Some(secrets) =
                best_effort(cluster.state.secrets(ns), "secrets", &mut warnings)
            {
                for secret in secrets {
                    let mut keys: Vec<String> = secret
                        .data
                        .as_ref()
                        .map(|d| d.keys().cloned().collect())
                        .unwrap_or_default();
                    keys.sort();
                    items.push(json!({
                        "cluster": cluster.id.clone(),
                        "namespace": secret.namespace(),
                        "name": secret.name_any(),
                        "kind": "Secret",
                        "type": secret.type_.clone(),
                        "keys": keys,
                        "age": age_since(secret.meta().creation_timestamp.as_ref()),
                    }));
                }
            }
        }

        sort_items(&mut items);
        let total = items.len();
        let truncated = total > self.limit;
        if truncated {
            items.truncate(self.limit);
        }

        let count = items.len();
        let mut payload = DomainPayload::new(json!({"items": items}), count);
        payload.truncated = truncated;
        payload.total_items = truncated.then_some(total);
        payload.warnings = warnings;
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::testutil::{FakeState, handle};
    use crate::scope;
    use k8s_openapi::api::core::v1::{ConfigMap, Secret};
    use k8s_openapi::ByteString;

    fn config_map(ns: &str, name: &str, keys: &[&str]) -> ConfigMap {
        let mut cm = ConfigMap::default();
        cm.metadata.namespace = Some(ns.to_string());
        cm.metadata.name = Some(name.to_string());
        cm.data = Some(
            keys.iter()
                .map(|k| (k.to_string(), "value".to_string()))
                .collect(),
        );
        cm
    }

    fn secret(ns: &str, name: &str, keys: &[&str]) -> Secret {
        let mut s = Secret::default();
        s.metadata.namespace = Some(ns.to_string());
        s.metadata.name = Some(name.to_string());
        s.type_ = Some("Opaque".to_string());
        s.data = Some(
            keys.iter()
                .map(|k| (k.to_string(), ByteString(b"sensitive".to_vec())))
                .collect(),
        );
        s
    }

    fn request<'a>(
        scope: &'a crate::scope::NormalizedScope,
        handles: &'a [crate::cluster::ClusterHandle],
    ) -> BuildRequest<'a> {
        BuildRequest {
            domain: "namespace-config",
            scope,
            clusters: handles,
            bypass_cache: false,
        }
    }

    #[tokio::test]
    async fn secret_values_never_reach_the_payload() {
        let mut state = FakeState::named("test");
        state.config_maps = vec![config_map("default", "app-config", &["b.yaml", "a.yaml"])];
        state.secrets = vec![secret("default", "db-credentials", &["password"])];
        let handles = vec![handle(state)];

        let scope = scope::normalize("namespace:default").unwrap();
        let payload = ConfigBuilder::new(1000)
            .build(&request(&scope, &handles))
            .await
            .unwrap();

        let rendered = serde_json::to_string(&payload.payload).unwrap();
        assert!(!rendered.contains("sensitive"));

        let items = payload.payload["items"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["kind"], "ConfigMap");
        assert_eq!(items[0]["keys"], json!(["a.yaml", "b.yaml"]));
        assert_eq!(items[1]["kind"], "Secret");
        assert_eq!(items[1]["keys"], json!(["password"]));
    }

    #[tokio::test]
    async fn oversized_listings_truncate_deterministically() {
        let mut state = FakeState::named("test");
        // Inserted out of order on purpose; truncation happens after sorting.
        for name in ["cm-04", "cm-01", "cm-03", "cm-00", "cm-02"] {
            state.config_maps.push(config_map("default", name, &["k"]));
        }
        let handles = vec![handle(state)];

        let scope = scope::normalize("namespace:default").unwrap();
        let payload = ConfigBuilder::new(3)
            .build(&request(&scope, &handles))
            .await
            .unwrap();

        assert_eq!(payload.item_count, 3);
        assert!(payload.truncated);
        assert_eq!(payload.total_items, Some(5));
        let names: Vec<&str> = payload.payload["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["cm-00", "cm-01", "cm-02"]);
    }

    #[tokio::test]
    async fn denied_secrets_degrade_to_a_warning() {
        let mut state = FakeState::named("test");
        state.config_maps = vec![config_map("default", "app-config", &["k"])];
        state.secrets_error = Some(|| Error::permission_denied("", "secrets"));
        let handles = vec![handle(state)];

        let scope = scope::normalize("namespace:default").unwrap();
        let payload = ConfigBuilder::new(1000)
            .build(&request(&scope, &handles))
            .await
            .unwrap();

        assert_eq!(payload.item_count, 1);
        assert_eq!(payload.warnings.len(), 1);
        assert!(payload.warnings[0].contains("secrets"));
    }
}
