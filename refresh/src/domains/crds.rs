//! CustomResourceDefinition snapshot builder.

use super::sort_items;
use crate::error::Error;
use crate::registry::{BuildRequest, DomainPayload, SnapshotBuilder};
use crate::util::age_since;
use async_trait::async_trait;
use kube::Resource;
use kube::ResourceExt;
use serde_json::json;

pub struct CrdsBuilder;

#[async_trait]
impl SnapshotBuilder for CrdsBuilder {
    async fn build(&self, req: &BuildRequest<'_>) -> Result<DomainPayload, Error> {
        let mut items = Vec::new();

        for cluster in req.clusters {
            for crd in cluster.state.custom_resource_definitions()? {
                let versions: Vec<String> = crd
                    .spec
                    .versions
                    .iter()
                    .filter(|v| v.served)
                    .map(|v| v.name.clone())
                    .collect();
                let established = crd
                    .status
                    .as_ref()
                    .and_then(|s| s.conditions.as_ref())
                    .is_some_and(|conditions| {
                        conditions
                            .iter()
                            .any(|c| c.type_ == "Established" && c.status == "True")
                    });
                items.push(json!({
                    "cluster": cluster.id.clone(),
                    "name": crd.name_any(),
                    "kind": crd.spec.names.kind.clone(),
                    "group": crd.spec.group.clone(),
                    "scope": crd.spec.scope.clone(),
                    "versions": versions,
                    "established": established,
                    "age": age_since(crd.meta().creation_timestamp.as_ref()),
                }));
            }
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
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
        CustomResourceDefinition, CustomResourceDefinitionNames, CustomResourceDefinitionSpec,
        CustomResourceDefinitionVersion,
    };

    #[tokio::test]
    async fn crds_report_group_kind_and_served_versions() {
        let mut crd = CustomResourceDefinition::default();
        crd.metadata.name = Some("widgets.example.com".to_string());
        crd.spec = CustomResourceDefinitionSpec {
            group: "example.com".to_string(),
            scope: "Namespaced".to_string(),
            names: CustomResourceDefinitionNames {
                kind: "Widget".to_string(),
                plural: "widgets".to_string(),
                ..Default::default()
            },
            versions: vec![
                CustomResourceDefinitionVersion {
                    name: "v1".to_string(),
                    served: true,
                    storage: true,
                    ..Default::default()
                },
                CustomResourceDefinitionVersion {
                    name: "v1alpha1".to_string(),
                    served: false,
                    storage: false,
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        let mut state = FakeState::named("test");
        state.crds = vec![crd];
        let handles = vec![handle(state)];

        let scope = scope::normalize("namespace:all").unwrap();
        let req = BuildRequest {
            domain: "crds",
            scope: &scope,
            clusters: &handles,
            bypass_cache: false,
        };
        let payload = CrdsBuilder.build(&req).await.unwrap();
        assert_eq!(payload.item_count, 1);

        let item = &payload.payload["items"][0];
        assert_eq!(item["group"], "example.com");
        assert_eq!(item["kind"], "Widget");
        assert_eq!(item["versions"], json!(["v1"]));
        assert_eq!(item["established"], false);
    }
}
