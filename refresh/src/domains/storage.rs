//! Storage snapshot builder: PVCs joined to their volumes, plus the cluster's
//! storage classes.

use super::{best_effort, sort_items};
use crate::error::Error;
use crate::registry::{BuildRequest, DomainPayload, SnapshotBuilder};
use crate::util::age_since;
use async_trait::async_trait;
use kube::Resource;
use kube::ResourceExt;
use serde_json::json;

pub struct StorageBuilder;

#[async_trait]
impl SnapshotBuilder for StorageBuilder {
    async fn build(&self, req: &BuildRequest<'_>) -> Result<DomainPayload, Error> {
        let ns = req.scope.inner.namespace();
        let mut items = Vec::new();
        let mut warnings = Vec::new();

        for cluster in req.clusters {
            for pvc in cluster.state.persistent_volume_claims(ns)? {
                let status = pvc.status.as_ref();
                items.push(json!({
                    "cluster": cluster.id.clone(),
                    "namespace": pvc.namespace(),
                    "name": pvc.name_any(),
                    "kind": "PersistentVolumeClaim",
                    "phase": status.and_then(|s| s.phase.clone()).unwrap_or_default(),
                    "volume": pvc.spec.as_ref().and_then(|s| s.volume_name.clone()),
                    "storageClass": pvc.spec.as_ref().and_then(|s| s.storage_class_name.clone()),
                    "capacity": status
                        .and_then(|s| s.capacity.as_ref())
                        .and_then(|c| c.get("storage"))
                        .map(|q| q.0.clone()),
                    "accessModes": pvc.spec.as_ref().and_then(|s| s.access_modes.clone()).unwrap_or_default(),
                    "age": age_since(pvc.meta().creation_timestamp.as_ref()),
                }));
            }

            if let Some(volumes) = best_effort(
                cluster.state.persistent_volumes(),
                "persistentvolumes",
                &mut warnings,
            ) {
                for pv in volumes {
                    items.push(json!({
                        "cluster": cluster.id.clone(),
                        "name": pv.name_any(),
                        "kind": "PersistentVolume",
                        "phase": pv.status.as_ref().and_then(|s| s.phase.clone()).unwrap_or_default(),
                        "claim": pv.spec.as_ref().and_then(|s| s.claim_ref.as_ref()).map(|c| {
                            format!(
                                "{}/{}",
                                c.namespace.clone().unwrap_or_default(),
                                c.name.clone().unwrap_or_default()
                            )
                        }),
                        "storageClass": pv.spec.as_ref().and_then(|s| s.storage_class_name.clone()),
                        "capacity": pv.spec.as_ref()
                            .and_then(|s| s.capacity.as_ref())
                            .and_then(|c| c.get("storage"))
                            .map(|q| q.0.clone()),
                        "age": age_since(pv.meta().creation_timestamp.as_ref()),
                    }));
                }
            }

            if let Some(classes) = best_effort(
                cluster.state.storage_classes(),
                "storageclasses",
                &mut warnings,
            ) {
                for sc in classes {
                    items.push(json!({
                        "cluster": cluster.id.clone(),
                        "name": sc.name_any(),
                        "kind": "StorageClass",
                        "provisioner": sc.provisioner.clone(),
                        "reclaimPolicy": sc.reclaim_policy.clone(),
                        "default": sc.metadata.annotations.as_ref().is_some_and(|a| {
                            a.get("storageclass.kubernetes.io/is-default-class")
                                .map(|v| v == "true")
                                .unwrap_or(false)
                        }),
                        "age": age_since(sc.meta().creation_timestamp.as_ref()),
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
