//! Event snapshot builder: the polled complement of the event stream. The
//! same synthesized entries a subscriber would receive, newest first.

use crate::error::Error;
use crate::events::synthesize_entry;
use crate::registry::{BuildRequest, DomainPayload, SnapshotBuilder};
use crate::scope::InnerScope;
use async_trait::async_trait;
use porthole_types::EventEntry;
use serde_json::json;

pub struct EventsBuilder;

fn matches_scope(entry: &EventEntry, scope: &InnerScope) -> bool {
    match scope {
        InnerScope::Object {
            kind, name, ..
        } => entry.kind.eq_ignore_ascii_case(kind) && entry.name == *name,
        InnerScope::Node(name) => {
            entry.kind.eq_ignore_ascii_case("node") && entry.name == *name
        }
        InnerScope::Workload { name, .. } => {
            entry.name == *name || entry.name.starts_with(&format!("{name}-"))
        }
        _ => true,
    }
}

#[async_trait]
impl SnapshotBuilder for EventsBuilder {
    async fn build(&self, req: &BuildRequest<'_>) -> Result<DomainPayload, Error> {
        let ns = req.scope.inner.namespace();
        let mut entries: Vec<(String, EventEntry)> = Vec::new();

        for cluster in req.clusters {
            for event in cluster.state.events(ns)? {
                let entry = synthesize_entry(&event);
                if matches_scope(&entry, &req.scope.inner) {
                    entries.push((cluster.id.clone(), entry));
                }
            }
        }

        // Newest first; ties break on object identity so ordering is stable.
        entries.sort_by(|(ca, a), (cb, b)| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| ca.cmp(cb))
                .then_with(|| a.namespace.cmp(&b.namespace))
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.reason.cmp(&b.reason))
        });

        let items: Vec<serde_json::Value> = entries
            .into_iter()
            .map(|(cluster, entry)| {
                let mut row = serde_json::to_value(&entry).unwrap_or_default();
                if let Some(map) = row.as_object_mut() {
                    map.insert("cluster".to_string(), json!(cluster));
                }
                row
            })
            .collect();

        let count = items.len();
        Ok(DomainPayload::new(json!({"items": items}), count))
    }
}
