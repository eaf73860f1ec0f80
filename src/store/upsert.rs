//! Shared upsert semantics for backends that materialize entities.
//!
//! The in-memory and sled backends read the current entity, merge, and
//! write back; the change records they must emit are identical, so the
//! merge+diff step lives here. The relational backend mirrors these rules
//! in SQL-adjacent code.

use serde_json::json;

use crate::clock::MonotonicClock;
use crate::types::{Change, ChangeType, DetectedVia, Edge, Node};

/// What a single-entity upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UpsertKind {
    Created,
    Updated,
    Unchanged,
}

/// Merge an incoming node into the stored one (if any) and derive the
/// change records the write must append.
///
/// A `node-created` change embeds the full node under `metadata.node` so
/// temporal replay can reconstruct topology without a snapshot per write.
pub(crate) fn apply_node_upsert(
    existing: Option<Node>,
    incoming: &Node,
    clock: &MonotonicClock,
) -> (Node, Vec<Change>, UpsertKind) {
    match existing {
        None => {
            let node = incoming.clone();
            let change = Change::new(
                node.id.as_str(),
                ChangeType::NodeCreated,
                DetectedVia::Sync,
                clock.now_ms(),
            )
            .with_metadata(json!({ "node": node }));
            (node, vec![change], UpsertKind::Created)
        }
        Some(mut stored) => {
            let delta = stored.diff_fields(incoming);
            stored.merge_from(incoming);

            if delta.is_empty() {
                return (stored, Vec::new(), UpsertKind::Unchanged);
            }

            let mut changes = Vec::new();
            for field_change in &delta.changes {
                changes.push(
                    Change::new(
                        stored.id.as_str(),
                        ChangeType::NodeUpdated,
                        DetectedVia::Sync,
                        clock.now_ms(),
                    )
                    .with_delta(
                        field_change.field.clone(),
                        field_change.previous.clone(),
                        field_change.new.clone(),
                    ),
                );
            }
            if let Some((previous, new)) = delta.cost_change {
                changes.push(
                    Change::new(
                        stored.id.as_str(),
                        ChangeType::CostChanged,
                        DetectedVia::Sync,
                        clock.now_ms(),
                    )
                    .with_delta("cost_monthly", json!(previous), json!(new)),
                );
            }
            (stored, changes, UpsertKind::Updated)
        }
    }
}

/// Merge an incoming edge into the stored one (if any) and derive the
/// change records the write must append.
///
/// Only creation is a change event; attribute refreshes (confidence,
/// metadata) update the row silently because the edge identity is stable.
pub(crate) fn apply_edge_upsert(
    existing: Option<Edge>,
    incoming: &Edge,
    clock: &MonotonicClock,
) -> (Edge, Vec<Change>, UpsertKind) {
    match existing {
        None => {
            let edge = incoming.clone();
            let change = Change::new(
                edge.id.as_str(),
                ChangeType::EdgeCreated,
                DetectedVia::Sync,
                clock.now_ms(),
            )
            .with_metadata(json!({ "edge": edge }));
            (edge, vec![change], UpsertKind::Created)
        }
        Some(stored) => {
            let identical = stored.confidence == incoming.confidence
                && stored.discovered_via == incoming.discovered_via
                && stored.metadata == incoming.metadata;
            if identical {
                (stored, Vec::new(), UpsertKind::Unchanged)
            } else {
                (incoming.clone(), Vec::new(), UpsertKind::Updated)
            }
        }
    }
}

/// Change records for a node deletion: one `edge-deleted` per cascaded
/// edge, then the `node-deleted` itself.
pub(crate) fn node_delete_changes(
    node: &Node,
    cascaded_edges: &[Edge],
    clock: &MonotonicClock,
) -> Vec<Change> {
    let mut changes = Vec::with_capacity(cascaded_edges.len() + 1);
    for edge in cascaded_edges {
        changes.push(Change::new(
            edge.id.as_str(),
            ChangeType::EdgeDeleted,
            DetectedVia::Sync,
            clock.now_ms(),
        ));
    }
    changes.push(Change::new(
        node.id.as_str(),
        ChangeType::NodeDeleted,
        DetectedVia::Sync,
        clock.now_ms(),
    ));
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NodeInput, NodeStatus, Provider, ResourceType};
    use serde_json::Value;

    fn make_node(native_id: &str) -> Node {
        NodeInput {
            provider: Provider::Aws,
            account: "a".into(),
            region: "us-east-1".into(),
            resource_type: ResourceType::Compute,
            native_id: native_id.into(),
            name: native_id.into(),
            status: NodeStatus::Running,
            tags: Default::default(),
            metadata: Value::Null,
            cost_monthly: Some(10.0),
            owner: None,
        }
        .into_node(1_000)
    }

    #[test]
    fn test_create_emits_node_created_with_payload() {
        let clock = MonotonicClock::new();
        let node = make_node("i-1");
        let (_, changes, kind) = apply_node_upsert(None, &node, &clock);

        assert_eq!(kind, UpsertKind::Created);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::NodeCreated);
        assert!(changes[0].metadata.get("node").is_some());
    }

    #[test]
    fn test_identical_reupsert_is_silent() {
        let clock = MonotonicClock::new();
        let node = make_node("i-1");
        let (stored, _, _) = apply_node_upsert(None, &node, &clock);
        let (_, changes, kind) = apply_node_upsert(Some(stored), &node, &clock);

        assert_eq!(kind, UpsertKind::Unchanged);
        assert!(changes.is_empty());
    }

    #[test]
    fn test_status_change_and_cost_change_both_emit() {
        let clock = MonotonicClock::new();
        let node = make_node("i-1");
        let (stored, _, _) = apply_node_upsert(None, &node, &clock);

        let mut moved = node.clone();
        moved.status = NodeStatus::Stopped;
        moved.cost_monthly = Some(25.0);

        let (_, changes, kind) = apply_node_upsert(Some(stored), &moved, &clock);
        assert_eq!(kind, UpsertKind::Updated);
        let types: Vec<ChangeType> = changes.iter().map(|c| c.change_type).collect();
        assert!(types.contains(&ChangeType::NodeUpdated));
        assert!(types.contains(&ChangeType::CostChanged));
    }
}
