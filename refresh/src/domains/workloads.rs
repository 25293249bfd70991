//! Workload and pod snapshot builders.

use super::{best_effort, sort_items};
use crate::error::Error;
use crate::registry::{BuildRequest, DomainPayload, SnapshotBuilder};
use crate::scope::InnerScope;
use crate::util::age_since;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::Resource;
use kube::ResourceExt;
use serde_json::json;

/// Rolls deployments, statefulsets, daemonsets, jobs, cronjobs and standalone
/// replicasets into one list with ready/desired counts.
pub struct WorkloadsBuilder;

/// Name filter implied by a `workload:<ns>:<name>` scope.
fn workload_filter<'a>(scope: &'a InnerScope) -> Option<&'a str> {
    match scope {
        InnerScope::Workload { name, .. } => Some(name),
        _ => None,
    }
}

#[async_trait]
impl SnapshotBuilder for WorkloadsBuilder {
    async fn build(&self, req: &BuildRequest<'_>) -> Result<DomainPayload, Error> {
        let ns = req.scope.inner.namespace();
        let name_filter = workload_filter(&req.scope.inner);
        let mut items = Vec::new();
        let mut warnings = Vec::new();

        for cluster in req.clusters {
            let keep = |name: &str| name_filter.is_none_or(|f| f == name);

            // Deployments are the primary listing; a refusal here fails the
            // whole build so the caller sees the denial.
            for d in cluster.state.deployments(ns)? {
                if !keep(&d.name_any()) {
                    continue;
                }
                let status = d.status.as_ref();
                items.push(json!({
                    "cluster": cluster.id.clone(),
                    "namespace": d.namespace(),
                    "name": d.name_any(),
                    "kind": "Deployment",
                    "replicas": d.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0),
                    "readyReplicas": status.and_then(|s| s.ready_replicas).unwrap_or(0),
                    "updatedReplicas": status.and_then(|s| s.updated_replicas).unwrap_or(0),
                    "age": age_since(d.meta().creation_timestamp.as_ref()),
                }));
            }

            if let Some(sets) =
                best_effort(cluster.state.stateful_sets(ns), "statefulsets", &mut warnings)
            {
                for s in sets {
                    if !keep(&s.name_any()) {
                        continue;
                    }
                    let status = s.status.as_ref();
                    items.push(json!({
                        "cluster": cluster.id.clone(),
                        "namespace": s.namespace(),
                        "name": s.name_any(),
                        "kind": "StatefulSet",
                        "replicas": s.spec.as_ref().and_then(|sp| sp.replicas).unwrap_or(0),
                        "readyReplicas": status.and_then(|st| st.ready_replicas).unwrap_or(0),
                        "age": age_since(s.meta().creation_timestamp.as_ref()),
                    }));
                }
            }

            if let Some(sets) =
                best_effort(cluster.state.daemon_sets(ns), "daemonsets", &mut warnings)
            {
                for d in sets {
                    if !keep(&d.name_any()) {
                        continue;
                    }
                    let status = d.status.as_ref();
                    items.push(json!({
                        "cluster": cluster.id.clone(),
                        "namespace": d.namespace(),
                        "name": d.name_any(),
                        "kind": "DaemonSet",
                        "desired": status.map(|st| st.desired_number_scheduled).unwrap_or(0),
                        "ready": status.map(|st| st.number_ready).unwrap_or(0),
                        "age": age_since(d.meta().creation_timestamp.as_ref()),
                    }));
                }
            }

            if let Some(sets) = best_effort(
                cluster.state.replica_sets(ns),
                "replicasets",
                &mut warnings,
            ) {
                for rs in sets {
                    // Deployment-owned replicasets are already represented.
                    let owned = rs.metadata.owner_references.as_ref().is_some_and(|os| {
                        os.iter().any(|o| o.kind == "Deployment")
                    });
                    if owned || !keep(&rs.name_any()) {
                        continue;
                    }
                    let status = rs.status.as_ref();
                    items.push(json!({
                        "cluster": cluster.id.clone(),
                        "namespace": rs.namespace(),
                        "name": rs.name_any(),
                        "kind": "ReplicaSet",
                        "replicas": rs.spec.as_ref().and_then(|sp| sp.replicas).unwrap_or(0),
                        "readyReplicas": status.and_then(|st| st.ready_replicas).unwrap_or(0),
                        "age": age_since(rs.meta().creation_timestamp.as_ref()),
                    }));
                }
            }

            if let Some(jobs) = best_effort(cluster.state.jobs(ns), "jobs", &mut warnings) {
                for j in jobs {
                    if !keep(&j.name_any()) {
                        continue;
                    }
                    let status = j.status.as_ref();
                    items.push(json!({
                        "cluster": cluster.id.clone(),
                        "namespace": j.namespace(),
                        "name": j.name_any(),
                        "kind": "Job",
                        "active": status.and_then(|st| st.active).unwrap_or(0),
                        "succeeded": status.and_then(|st| st.succeeded).unwrap_or(0),
                        "failed": status.and_then(|st| st.failed).unwrap_or(0),
                        "age": age_since(j.meta().creation_timestamp.as_ref()),
                    }));
                }
            }

            if let Some(cron_jobs) =
                best_effort(cluster.state.cron_jobs(ns), "cronjobs", &mut warnings)
            {
                for cj in cron_jobs {
                    if !keep(&cj.name_any()) {
                        continue;
                    }
                    items.push(json!({
                        "cluster": cluster.id.clone(),
                        "namespace": cj.namespace(),
                        "name": cj.name_any(),
                        "kind": "CronJob",
                        "schedule": cj.spec.as_ref().map(|sp| sp.schedule.clone()).unwrap_or_default(),
                        "suspend": cj.spec.as_ref().and_then(|sp| sp.suspend).unwrap_or(false),
                        "lastScheduleTime": cj.status.as_ref()
                            .and_then(|st| st.last_schedule_time.as_ref())
                            .map(|t| t.0.timestamp_millis()),
                        "age": age_since(cj.meta().creation_timestamp.as_ref()),
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

/// Pod rows, filterable by namespace, owning workload, or node.
pub struct PodsBuilder;

fn pod_ready(pod: &Pod) -> String {
    let statuses = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref());
    let total = pod
        .spec
        .as_ref()
        .map(|s| s.containers.len())
        .unwrap_or_default();
    let ready = statuses
        .map(|cs| cs.iter().filter(|c| c.ready).count())
        .unwrap_or(0);
    format!("{ready}/{total}")
}

fn pod_restarts(pod: &Pod) -> i32 {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .map(|cs| cs.iter().map(|c| c.restart_count).sum())
        .unwrap_or(0)
}

/// Does the pod belong to the named workload? Direct owners match by name;
/// deployment pods match through the replicaset naming convention
/// (`<deployment>-<hash>`).
fn owned_by(pod: &Pod, workload: &str) -> bool {
    pod.metadata
        .owner_references
        .as_ref()
        .is_some_and(|owners| {
            owners.iter().any(|o| {
                o.name == workload || o.name.starts_with(&format!("{workload}-"))
            })
        })
}

#[async_trait]
impl SnapshotBuilder for PodsBuilder {
    async fn build(&self, req: &BuildRequest<'_>) -> Result<DomainPayload, Error> {
        let ns = req.scope.inner.namespace();
        let mut items = Vec::new();

        for cluster in req.clusters {
            let pods = cluster.state.pods(ns)?;
            for pod in pods {
                match &req.scope.inner {
                    InnerScope::Workload { name, .. } if !owned_by(&pod, name) => continue,
                    InnerScope::Node(node) => {
                        let on_node = pod
                            .spec
                            .as_ref()
                            .and_then(|s| s.node_name.as_deref())
                            == Some(node.as_str());
                        if !on_node {
                            continue;
                        }
                    }
                    _ => {}
                }

                items.push(json!({
                    "cluster": cluster.id.clone(),
                    "namespace": pod.namespace(),
                    "name": pod.name_any(),
                    "kind": "Pod",
                    "phase": pod.status.as_ref().and_then(|s| s.phase.clone()).unwrap_or_default(),
                    "ready": pod_ready(&pod),
                    "restarts": pod_restarts(&pod),
                    "node": pod.spec.as_ref().and_then(|s| s.node_name.clone()),
                    "age": age_since(pod.meta().creation_timestamp.as_ref()),
                }));
            }
        }

        sort_items(&mut items);
        let count = items.len();
        Ok(DomainPayload::new(json!({"items": items}), count))
    }
}
