//! RBAC snapshot builder: namespaced roles, bindings and service accounts;
//! cluster-level roles and bindings when the scope spans all namespaces.

use super::{best_effort, sort_items};
use crate::error::Error;
use crate::registry::{BuildRequest, DomainPayload, SnapshotBuilder};
use crate::scope::InnerScope;
use crate::util::age_since;
use async_trait::async_trait;
use k8s_openapi::api::rbac::v1::Subject;
use kube::Resource;
use kube::ResourceExt;
use serde_json::json;

pub struct RbacBuilder;

fn subjects(list: Option<&Vec<Subject>>) -> Vec<serde_json::Value> {
    list.map(|subjects| {
        subjects
            .iter()
            .map(|s| {
                json!({
                    "kind": s.kind.clone(),
                    "name": s.name.clone(),
                    "namespace": s.namespace.clone(),
                })
            })
            .collect()
    })
    .unwrap_or_default()
}

#[async_trait]
impl SnapshotBuilder for RbacBuilder {
    async fn build(&self, req: &BuildRequest<'_>) -> Result<DomainPayload, Error> {
        let ns = req.scope.inner.namespace();
        let mut items = Vec::new();
        let mut warnings = Vec::new();

        for cluster in req.clusters {
            for role in cluster.state.roles(ns)? {
                let rule_count = role.rules.as_ref().map(|r| r.len()).unwrap_or(0);
                items.push(json!({
                    "cluster": cluster.id.clone(),
                    "namespace": role.namespace(),
                    "name": role.name_any(),
                    "kind": "Role",
                    "ruleCount": rule_count,
                    "age": age_since(role.meta().creation_timestamp.as_ref()),
                }));
            }

            if let Some(bindings) =
                best_effort(cluster.state.role_bindings(ns), "rolebindings", &mut warnings)
            {
                for binding in bindings {
                    items.push(json!({
                        "cluster": cluster.id.clone(),
                        "namespace": binding.namespace(),
                        "name": binding.name_any(),
                        "kind": "RoleBinding",
                        "roleRef": binding.role_ref.name.clone(),
                        "subjects": subjects(binding.subjects.as_ref()),
                        "age": age_since(binding.meta().creation_timestamp.as_ref()),
                    }));
                }
            }

            if let Some(accounts) = best_effort(
                cluster.state.service_accounts(ns),
                "serviceaccounts",
                &mut warnings,
            ) {
                for account in accounts {
                    items.push(json!({
                        "cluster": cluster.id.clone(),
                        "namespace": account.namespace(),
                        "name": account.name_any(),
                        "kind": "ServiceAccount",
                        "age": age_since(account.meta().creation_timestamp.as_ref()),
                    }));
                }
            }

            // Cluster-wide RBAC only belongs in the all-namespaces view.
            if matches!(req.scope.inner, InnerScope::AllNamespaces) {
                if let Some(roles) =
                    best_effort(cluster.state.cluster_roles(), "clusterroles", &mut warnings)
                {
                    for role in roles {
                        let rule_count = role.rules.as_ref().map(|r| r.len()).unwrap_or(0);
                        items.push(json!({
                            "cluster": cluster.id.clone(),
                            "name": role.name_any(),
                            "kind": "ClusterRole",
                            "ruleCount": rule_count,
                            "age": age_since(role.meta().creation_timestamp.as_ref()),
                        }));
                    }
                }
                if let Some(bindings) = best_effort(
                    cluster.state.cluster_role_bindings(),
                    "clusterrolebindings",
                    &mut warnings,
                ) {
                    for binding in bindings {
                        items.push(json!({
                            "cluster": cluster.id.clone(),
                            "name": binding.name_any(),
                            "kind": "ClusterRoleBinding",
                            "roleRef": binding.role_ref.name.clone(),
                            "subjects": subjects(binding.subjects.as_ref()),
                            "age": age_since(binding.meta().creation_timestamp.as_ref()),
                        }));
                    }
                }
            }
        }

        sort_items(&mut items);
        let count = items.len();
        let mut payload = DomainPayload::new(json!({"items": items}), count);
        payload.warnings = warnings;
        Ok(payload)
    }
}
