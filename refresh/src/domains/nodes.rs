//! Node snapshot builder: roles, conditions, capacity and, when the metrics
//! poller has data, live usage.

use super::sort_items;
use crate::error::Error;
use crate::registry::{BuildRequest, DomainPayload, SnapshotBuilder};
use crate::scope::InnerScope;
use crate::util::age_since;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::Resource;
use kube::ResourceExt;
use serde_json::json;

pub struct NodesBuilder;

const ROLE_LABEL_PREFIX: &str = "node-role.kubernetes.io/";

fn node_roles(node: &Node) -> Vec<String> {
    let mut roles: Vec<String> = node
        .labels()
        .keys()
        .filter_map(|key| key.strip_prefix(ROLE_LABEL_PREFIX))
        .filter(|role| !role.is_empty())
        .map(|role| role.to_string())
        .collect();
    roles.sort();
    roles
}

fn node_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

fn quantity(node: &Node, section: &str, key: &str) -> Option<String> {
    let status = node.status.as_ref()?;
    let map = match section {
        "capacity" => status.capacity.as_ref()?,
        _ => status.allocatable.as_ref()?,
    };
    map.get(key).map(|q| q.0.clone())
}

#[async_trait]
impl SnapshotBuilder for NodesBuilder {
    async fn build(&self, req: &BuildRequest<'_>) -> Result<DomainPayload, Error> {
        let name_filter = match &req.scope.inner {
            InnerScope::Node(name) => Some(name.as_str()),
            _ => None,
        };

        let mut items = Vec::new();
        for cluster in req.clusters {
            let usage = cluster.state.node_usage();
            for node in cluster.state.nodes()? {
                let name = node.name_any();
                if name_filter.is_some_and(|f| f != name) {
                    continue;
                }

                let node_usage = usage.get(&name);
                items.push(json!({
                    "cluster": cluster.id.clone(),
                    "name": name,
                    "kind": "Node",
                    "roles": node_roles(&node),
                    "ready": node_ready(&node),
                    "kubeletVersion": node.status.as_ref()
                        .and_then(|s| s.node_info.as_ref())
                        .map(|i| i.kubelet_version.clone()),
                    "capacity": {
                        "cpu": quantity(&node, "capacity", "cpu"),
                        "memory": quantity(&node, "capacity", "memory"),
                        "pods": quantity(&node, "capacity", "pods"),
                    },
                    "allocatable": {
                        "cpu": quantity(&node, "allocatable", "cpu"),
                        "memory": quantity(&node, "allocatable", "memory"),
                    },
                    "usage": node_usage.map(|u| json!({
                        "cpuMillis": u.cpu_millis,
                        "memoryBytes": u.memory_bytes,
                    })),
                    "podCount": cluster.state.pods_on_node(&node.name_any()).len(),
                    "unschedulable": node.spec.as_ref()
                        .and_then(|s| s.unschedulable)
                        .unwrap_or(false),
                    "age": age_since(node.meta().creation_timestamp.as_ref()),
                }));
            }
        }

        sort_items(&mut items);
        let count = items.len();
        Ok(DomainPayload::new(json!({"items": items}), count))
    }
}
