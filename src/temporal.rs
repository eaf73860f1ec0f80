//! Snapshot + time-travel layer over a graph store.
//!
//! A snapshot is a full copy of the graph; combined with the append-only
//! change log it reconstructs the graph at any instant: take the latest
//! snapshot at or before `ts`, then replay every change detected in
//! `(snapshot.created_at, ts]`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::clock::MonotonicClock;
use crate::store::{GraphStore, StoreError};
use crate::types::{
    Change, ChangeFilter, ChangeType, Edge, EdgeFilter, EdgeId, FieldChange, GraphSnapshot, Node,
    NodeFilter, NodeId, NodeStatus, PageRequest, SnapshotMeta, SnapshotTrigger, SubGraph,
};

/// Error type for temporal operations.
#[derive(Debug, thiserror::Error)]
pub enum TemporalError {
    /// Referenced snapshot does not exist.
    #[error("snapshot not found: {0}")]
    SnapshotNotFound(String),
    /// Underlying store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// One node that changed between two points in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDiff {
    /// Node id.
    pub id: NodeId,
    /// Field-level deltas.
    pub field_changes: Vec<FieldChange>,
}

/// Difference between two graph states.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopologyDiff {
    /// Nodes present only in the newer state.
    pub added_nodes: Vec<Node>,
    /// Nodes present only in the older state.
    pub removed_nodes: Vec<Node>,
    /// Nodes present in both whose observable fields differ.
    pub changed_nodes: Vec<NodeDiff>,
}

impl TopologyDiff {
    /// True when the two states are observably identical.
    pub fn is_empty(&self) -> bool {
        self.added_nodes.is_empty()
            && self.removed_nodes.is_empty()
            && self.changed_nodes.is_empty()
    }
}

/// Aggregate view of how the graph evolved since a timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionSummary {
    /// Window start (epoch ms).
    pub since: i64,
    /// Changes recorded in the window.
    pub total_changes: u64,
    /// Changes per change type.
    pub by_change_type: BTreeMap<String, u64>,
    /// The five busiest targets: (target id, change count), busiest first.
    pub most_active: Vec<(String, u64)>,
    /// Snapshots taken in the window.
    pub snapshots_taken: u64,
}

/// Snapshot + time-travel operations layered over any [`GraphStore`].
pub struct TemporalStore<S: GraphStore> {
    store: Arc<S>,
    clock: MonotonicClock,
}

impl<S: GraphStore> TemporalStore<S> {
    /// Wrap a store.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            clock: MonotonicClock::new(),
        }
    }

    /// Capture and persist a snapshot of the current graph.
    pub async fn take_snapshot(
        &self,
        trigger: SnapshotTrigger,
        label: Option<String>,
    ) -> Result<SnapshotMeta, TemporalError> {
        let nodes = self.store.query_nodes(&NodeFilter::default()).await?;
        let edges = self.all_edges().await?;
        let snapshot = GraphSnapshot::capture(
            Uuid::new_v4().to_string(),
            trigger,
            label,
            nodes,
            edges,
            self.clock.now_ms(),
        );
        self.store.save_snapshot(&snapshot).await?;
        tracing::debug!(
            snapshot_id = %snapshot.meta.id,
            nodes = snapshot.meta.node_count,
            edges = snapshot.meta.edge_count,
            trigger = %trigger,
            "captured graph snapshot"
        );
        Ok(snapshot.meta)
    }

    /// Snapshot metadata, newest-first.
    pub async fn list_snapshots(&self, limit: usize) -> Result<Vec<SnapshotMeta>, TemporalError> {
        Ok(self.store.list_snapshots(limit).await?)
    }

    /// Newest-first change history for one node.
    pub async fn get_node_history(
        &self,
        id: &NodeId,
        limit: usize,
    ) -> Result<Vec<Change>, TemporalError> {
        Ok(self.store.get_node_timeline(id.as_str(), limit).await?)
    }

    /// Reconstruct the graph as of `ts`: latest snapshot ≤ ts plus replay
    /// of every change in `(snapshot.created_at, ts]`. With no snapshot at
    /// or before `ts`, replay starts from the empty graph.
    pub async fn get_topology_at(
        &self,
        ts: i64,
        filter: Option<&NodeFilter>,
    ) -> Result<SubGraph, TemporalError> {
        let base = self.latest_snapshot_at(ts).await?;
        let (mut nodes, mut edges, replay_from) = match base {
            Some(snapshot) => {
                let nodes: BTreeMap<NodeId, Node> = snapshot
                    .nodes
                    .into_iter()
                    .map(|n| (n.id.clone(), n))
                    .collect();
                let edges: BTreeMap<EdgeId, Edge> = snapshot
                    .edges
                    .into_iter()
                    .map(|e| (e.id.clone(), e))
                    .collect();
                (nodes, edges, snapshot.meta.created_at + 1)
            }
            None => (BTreeMap::new(), BTreeMap::new(), i64::MIN),
        };

        let change_filter = ChangeFilter {
            since_ms: (replay_from != i64::MIN).then_some(replay_from),
            until_ms: Some(ts),
            ..ChangeFilter::default()
        };
        // get_changes is newest-first; replay wants oldest-first.
        let mut changes = self.store.get_changes(&change_filter).await?;
        changes.reverse();
        for change in &changes {
            replay_change(change, &mut nodes, &mut edges);
        }

        // Drop edges whose endpoints did not survive replay.
        edges.retain(|_, e| nodes.contains_key(&e.source_id) && nodes.contains_key(&e.target_id));

        let nodes: Vec<Node> = nodes
            .into_values()
            .filter(|n| filter.map_or(true, |f| f.matches(n)))
            .collect();
        let node_ids: BTreeMap<&NodeId, ()> = nodes.iter().map(|n| (&n.id, ())).collect();
        let edges: Vec<Edge> = edges
            .values()
            .filter(|e| node_ids.contains_key(&e.source_id) && node_ids.contains_key(&e.target_id))
            .cloned()
            .collect();

        Ok(SubGraph { nodes, edges })
    }

    /// Diff two stored snapshots (older first).
    pub async fn diff_snapshots(
        &self,
        from_id: &str,
        to_id: &str,
    ) -> Result<TopologyDiff, TemporalError> {
        let from = self
            .store
            .get_snapshot(from_id)
            .await?
            .ok_or_else(|| TemporalError::SnapshotNotFound(from_id.to_string()))?;
        let to = self
            .store
            .get_snapshot(to_id)
            .await?
            .ok_or_else(|| TemporalError::SnapshotNotFound(to_id.to_string()))?;
        Ok(diff_node_sets(from.nodes, to.nodes))
    }

    /// Diff the reconstructed graphs at two instants (older first).
    pub async fn diff_timestamps(
        &self,
        from_ts: i64,
        to_ts: i64,
    ) -> Result<TopologyDiff, TemporalError> {
        let from = self.get_topology_at(from_ts, None).await?;
        let to = self.get_topology_at(to_ts, None).await?;
        Ok(diff_node_sets(from.nodes, to.nodes))
    }

    /// Summarize change activity since a timestamp.
    pub async fn get_evolution_summary(
        &self,
        since_ts: i64,
    ) -> Result<EvolutionSummary, TemporalError> {
        let changes = self
            .store
            .get_changes(&ChangeFilter {
                since_ms: Some(since_ts),
                ..ChangeFilter::default()
            })
            .await?;

        let mut by_change_type: BTreeMap<String, u64> = BTreeMap::new();
        let mut by_target: BTreeMap<String, u64> = BTreeMap::new();
        for change in &changes {
            *by_change_type
                .entry(change.change_type.to_string())
                .or_default() += 1;
            *by_target.entry(change.target_id.clone()).or_default() += 1;
        }

        let mut most_active: Vec<(String, u64)> = by_target.into_iter().collect();
        most_active.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        most_active.truncate(5);

        let snapshots_taken = self
            .store
            .list_snapshots(usize::MAX)
            .await?
            .iter()
            .filter(|m| m.created_at >= since_ts)
            .count() as u64;

        Ok(EvolutionSummary {
            since: since_ts,
            total_changes: changes.len() as u64,
            by_change_type,
            most_active,
            snapshots_taken,
        })
    }

    async fn latest_snapshot_at(&self, ts: i64) -> Result<Option<GraphSnapshot>, TemporalError> {
        let candidate = self
            .store
            .list_snapshots(usize::MAX)
            .await?
            .into_iter()
            .filter(|m| m.created_at <= ts)
            .max_by_key(|m| (m.created_at, m.id.clone()));
        match candidate {
            Some(meta) => Ok(self.store.get_snapshot(&meta.id).await?),
            None => Ok(None),
        }
    }

    async fn all_edges(&self) -> Result<Vec<Edge>, TemporalError> {
        let filter = EdgeFilter::default();
        let mut edges = Vec::new();
        let mut page = PageRequest::with_limit(1000);
        loop {
            let result = self.store.query_edges_paginated(&filter, &page).await?;
            edges.extend(result.items);
            match result.next_cursor {
                Some(cursor) => {
                    page = PageRequest {
                        limit: Some(1000),
                        cursor: Some(cursor),
                    }
                }
                None => break,
            }
        }
        Ok(edges)
    }
}

/// Apply one change record to a materialized graph state.
fn replay_change(
    change: &Change,
    nodes: &mut BTreeMap<NodeId, Node>,
    edges: &mut BTreeMap<EdgeId, Edge>,
) {
    match change.change_type {
        ChangeType::NodeCreated => {
            if let Some(payload) = change.metadata.get("node") {
                if let Ok(node) = serde_json::from_value::<Node>(payload.clone()) {
                    nodes.insert(node.id.clone(), node);
                }
            }
        }
        ChangeType::NodeUpdated => {
            if let Some(node) = nodes.get_mut(&NodeId::from_raw(change.target_id.clone())) {
                if let (Some(field), Some(value)) = (&change.field, &change.new_value) {
                    apply_field(node, field, value);
                }
            }
        }
        ChangeType::CostChanged => {
            if let Some(node) = nodes.get_mut(&NodeId::from_raw(change.target_id.clone())) {
                node.cost_monthly = change.new_value.as_ref().and_then(Value::as_f64);
            }
        }
        ChangeType::NodeDeleted | ChangeType::NodeDisappeared => {
            let id = NodeId::from_raw(change.target_id.clone());
            nodes.remove(&id);
            edges.retain(|_, e| !e.touches(&id));
        }
        ChangeType::EdgeCreated => {
            if let Some(payload) = change.metadata.get("edge") {
                if let Ok(edge) = serde_json::from_value::<Edge>(payload.clone()) {
                    edges.insert(edge.id.clone(), edge);
                }
            }
        }
        ChangeType::EdgeDeleted => {
            edges.remove(&EdgeId::from_raw(change.target_id.clone()));
        }
        // Drift is an observation, not a topology mutation.
        ChangeType::NodeDrifted => {}
    }
}

/// Write one recorded field delta back onto a node.
fn apply_field(node: &mut Node, field: &str, value: &Value) {
    match field {
        "name" => {
            if let Some(s) = value.as_str() {
                node.name = s.to_string();
            }
        }
        "status" => {
            if let Some(status) = value.as_str().and_then(NodeStatus::from_str) {
                node.status = status;
            }
        }
        "account" => {
            if let Some(s) = value.as_str() {
                node.account = s.to_string();
            }
        }
        "region" => {
            if let Some(s) = value.as_str() {
                node.region = s.to_string();
            }
        }
        "owner" => {
            node.owner = value.as_str().map(str::to_string);
        }
        "tags" => {
            if let Ok(tags) = serde_json::from_value(value.clone()) {
                node.tags = tags;
            }
        }
        "metadata" => {
            node.metadata = value.clone();
        }
        _ => {}
    }
}

/// Compare two node sets by id, producing added/removed/changed buckets.
fn diff_node_sets(from: Vec<Node>, to: Vec<Node>) -> TopologyDiff {
    let from_map: BTreeMap<NodeId, Node> = from.into_iter().map(|n| (n.id.clone(), n)).collect();
    let to_map: BTreeMap<NodeId, Node> = to.into_iter().map(|n| (n.id.clone(), n)).collect();

    let mut diff = TopologyDiff::default();
    for (id, node) in &to_map {
        match from_map.get(id) {
            None => diff.added_nodes.push(node.clone()),
            Some(older) => {
                let delta = older.diff_fields(node);
                if !delta.is_empty() {
                    let mut field_changes = delta.changes;
                    if let Some((previous, new)) = delta.cost_change {
                        field_changes.push(FieldChange {
                            field: "cost_monthly".to_string(),
                            previous: serde_json::json!(previous),
                            new: serde_json::json!(new),
                        });
                    }
                    diff.changed_nodes.push(NodeDiff {
                        id: id.clone(),
                        field_changes,
                    });
                }
            }
        }
    }
    for (id, node) in &from_map {
        if !to_map.contains_key(id) {
            diff.removed_nodes.push(node.clone());
        }
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryGraphStore;
    use crate::types::{NodeInput, Provider, RelationshipType, ResourceType};

    fn make_node(native_id: &str, cost: f64) -> Node {
        NodeInput {
            provider: Provider::Aws,
            account: "123".into(),
            region: "us-east-1".into(),
            resource_type: ResourceType::Compute,
            native_id: native_id.into(),
            name: native_id.into(),
            status: NodeStatus::Running,
            tags: Default::default(),
            metadata: Value::Null,
            cost_monthly: Some(cost),
            owner: None,
        }
        .into_node(1_000)
    }

    #[tokio::test]
    async fn test_snapshot_then_no_mutation_diffs_empty() {
        let store = Arc::new(InMemoryGraphStore::new());
        let temporal = TemporalStore::new(Arc::clone(&store));

        store
            .upsert_nodes(&[make_node("i-1", 10.0), make_node("i-2", 20.0)])
            .await
            .unwrap();

        let a = temporal
            .take_snapshot(SnapshotTrigger::Manual, None)
            .await
            .unwrap();
        let b = temporal
            .take_snapshot(SnapshotTrigger::Manual, None)
            .await
            .unwrap();

        let diff = temporal.diff_snapshots(&a.id, &b.id).await.unwrap();
        assert!(diff.is_empty());
        assert_eq!(a.fingerprint, b.fingerprint);
    }

    #[tokio::test]
    async fn test_topology_at_now_equals_current_graph() {
        let store = Arc::new(InMemoryGraphStore::new());
        let temporal = TemporalStore::new(Arc::clone(&store));

        let a = make_node("i-1", 10.0);
        let b = make_node("i-2", 20.0);
        store.upsert_nodes(&[a.clone(), b.clone()]).await.unwrap();
        store
            .upsert_edges(&[Edge::api(
                a.id.clone(),
                b.id.clone(),
                RelationshipType::DependsOn,
            )])
            .await
            .unwrap();
        temporal
            .take_snapshot(SnapshotTrigger::PostSync, None)
            .await
            .unwrap();

        let now = crate::clock::wall_ms() + 10;
        let topology = temporal.get_topology_at(now, None).await.unwrap();
        assert_eq!(topology.nodes.len(), 2);
        assert_eq!(topology.edges.len(), 1);
    }

    #[tokio::test]
    async fn test_replay_reconstructs_pre_snapshot_state() {
        let store = Arc::new(InMemoryGraphStore::new());
        let temporal = TemporalStore::new(Arc::clone(&store));

        // No snapshot at all: replay from the empty graph using the
        // node-created payloads.
        let a = make_node("i-1", 10.0);
        store.upsert_nodes(&[a.clone()]).await.unwrap();
        let after_create = crate::clock::wall_ms() + 5;

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        store.delete_node(&a.id).await.unwrap();

        let then = temporal.get_topology_at(after_create, None).await.unwrap();
        assert_eq!(then.nodes.len(), 1);

        let now = temporal
            .get_topology_at(crate::clock::wall_ms() + 5, None)
            .await
            .unwrap();
        assert!(now.nodes.is_empty());
    }

    #[tokio::test]
    async fn test_diff_timestamps_sees_cost_change() {
        let store = Arc::new(InMemoryGraphStore::new());
        let temporal = TemporalStore::new(Arc::clone(&store));

        let node = make_node("i-1", 10.0);
        store.upsert_nodes(&[node.clone()]).await.unwrap();
        let before = crate::clock::wall_ms() + 2;

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let mut pricier = node.clone();
        pricier.cost_monthly = Some(99.0);
        store.upsert_nodes(&[pricier]).await.unwrap();

        let diff = temporal
            .diff_timestamps(before, crate::clock::wall_ms() + 2)
            .await
            .unwrap();
        assert_eq!(diff.changed_nodes.len(), 1);
        assert_eq!(diff.changed_nodes[0].field_changes[0].field, "cost_monthly");
    }

    #[tokio::test]
    async fn test_evolution_summary_buckets() {
        let store = Arc::new(InMemoryGraphStore::new());
        let temporal = TemporalStore::new(Arc::clone(&store));

        store
            .upsert_nodes(&[make_node("i-1", 1.0), make_node("i-2", 2.0)])
            .await
            .unwrap();
        store.delete_node(&make_node("i-2", 2.0).id).await.unwrap();

        let summary = temporal.get_evolution_summary(0).await.unwrap();
        assert_eq!(summary.by_change_type.get("node-created"), Some(&2));
        assert_eq!(summary.by_change_type.get("node-deleted"), Some(&1));
        assert_eq!(summary.total_changes, 3);
    }
}
