//! Service, Ingress and NetworkPolicy snapshot builder.

use super::{best_effort, sort_items};
use crate::error::Error;
use crate::registry::{BuildRequest, DomainPayload, SnapshotBuilder};
use crate::util::age_since;
use async_trait::async_trait;
use kube::Resource;
use kube::ResourceExt;
use serde_json::json;

pub struct NetworkBuilder;

#[async_trait]
impl SnapshotBuilder for NetworkBuilder {
    async fn build(&self, req: &BuildRequest<'_>) -> Result<DomainPayload, Error> {
        let ns = req.scope.inner.namespace();
        let mut items = Vec::new();
        let mut warnings = Vec::new();

        for cluster in req.clusters {
            for service in cluster.state.services(ns)? {
                let spec = service.spec.as_ref();
                let ports: Vec<serde_json::Value> = spec
                    .and_then(|s| s.ports.as_ref())
                    .map(|ports| {
                        ports
                            .iter()
                            .map(|p| {
                                json!({
                                    "port": p.port,
                                    "protocol": p.protocol.clone().unwrap_or_else(|| "TCP".to_string()),
                                    "name": p.name.clone(),
                                })
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                items.push(json!({
                    "cluster": cluster.id.clone(),
                    "namespace": service.namespace(),
                    "name": service.name_any(),
                    "kind": "Service",
                    "type": spec.and_then(|s| s.type_.clone()).unwrap_or_else(|| "ClusterIP".to_string()),
                    "clusterIP": spec.and_then(|s| s.cluster_ip.clone()),
                    "ports": ports,
                    "age": age_since(service.meta().creation_timestamp.as_ref()),
                }));
            }

            if let Some(ingresses) =
                best_effort(cluster.state.ingresses(ns), "ingresses", &mut warnings)
            {
                for ingress in ingresses {
                    let hosts: Vec<String> = ingress
                        .spec
                        .as_ref()
                        .and_then(|s| s.rules.as_ref())
                        .map(|rules| rules.iter().filter_map(|r| r.host.clone()).collect())
                        .unwrap_or_default();
                    items.push(json!({
                        "cluster": cluster.id.clone(),
                        "namespace": ingress.namespace(),
                        "name": ingress.name_any(),
                        "kind": "Ingress",
                        "className": ingress.spec.as_ref().and_then(|s| s.ingress_class_name.clone()),
                        "hosts": hosts,
                        "age": age_since(ingress.meta().creation_timestamp.as_ref()),
                    }));
                }
            }

            if let Some(policies) = best_effort(
                cluster.state.network_policies(ns),
                "networkpolicies",
                &mut warnings,
            ) {
                for policy in policies {
                    let policy_types: Vec<String> = policy
                        .spec
                        .as_ref()
                        .and_then(|s| s.policy_types.clone())
                        .unwrap_or_default();
                    items.push(json!({
                        "cluster": cluster.id.clone(),
                        "namespace": policy.namespace(),
                        "name": policy.name_any(),
                        "kind": "NetworkPolicy",
                        "policyTypes": policy_types,
                        "age": age_since(policy.meta().creation_timestamp.as_ref()),
                    }));
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
