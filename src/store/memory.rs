//! In-memory graph store.
//!
//! Volatile by design: the conformance reference and the default backend
//! for tests and short-lived tooling. BTreeMaps give the id-lexicographic
//! iteration order the pagination contract requires.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::cursor::paginate;
use super::upsert::{apply_edge_upsert, apply_node_upsert, node_delete_changes, UpsertKind};
use super::{GraphStore, StoreError, UpsertOutcome};
use crate::clock::MonotonicClock;
use crate::types::{
    Change, ChangeFilter, ChangeRequest, Direction, Edge, EdgeFilter, EdgeId, GraphSnapshot,
    GraphStats, Group, Node, NodeFilter, NodeId, Page, PageRequest, SnapshotMeta, SyncRecord,
};

#[derive(Debug, Default)]
struct Inner {
    nodes: BTreeMap<NodeId, Node>,
    edges: BTreeMap<EdgeId, Edge>,
    edges_by_source: BTreeMap<NodeId, BTreeSet<EdgeId>>,
    edges_by_target: BTreeMap<NodeId, BTreeSet<EdgeId>>,
    /// Kept sorted by (detected_at, id) — the append-only total order.
    changes: Vec<Change>,
    groups: BTreeMap<String, Group>,
    group_members: BTreeMap<String, BTreeSet<NodeId>>,
    snapshots: BTreeMap<String, GraphSnapshot>,
    sync_records: Vec<SyncRecord>,
    change_requests: BTreeMap<String, ChangeRequest>,
}

/// In-memory graph store.
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    inner: RwLock<Inner>,
    clock: MonotonicClock,
}

impl InMemoryGraphStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_change(inner: &mut Inner, change: Change) {
        // Appends are nearly always in timestamp order; binary search keeps
        // the vector sorted when they are not.
        let at = inner
            .changes
            .partition_point(|existing| *existing <= change);
        inner.changes.insert(at, change);
    }

    fn remove_edge_indexed(inner: &mut Inner, edge_id: &EdgeId) {
        if let Some(edge) = inner.edges.remove(edge_id) {
            if let Some(set) = inner.edges_by_source.get_mut(&edge.source_id) {
                set.remove(edge_id);
            }
            if let Some(set) = inner.edges_by_target.get_mut(&edge.target_id) {
                set.remove(edge_id);
            }
        }
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn upsert_nodes(&self, nodes: &[Node]) -> Result<UpsertOutcome, StoreError> {
        let mut inner = self.inner.write();
        let mut outcome = UpsertOutcome::default();

        for incoming in nodes {
            let existing = inner.nodes.get(&incoming.id).cloned();
            let (merged, changes, kind) = apply_node_upsert(existing, incoming, &self.clock);
            inner.nodes.insert(merged.id.clone(), merged);
            for change in changes {
                Self::insert_change(&mut inner, change);
            }
            match kind {
                UpsertKind::Created => outcome.created += 1,
                UpsertKind::Updated => outcome.updated += 1,
                UpsertKind::Unchanged => outcome.unchanged += 1,
            }
        }
        Ok(outcome)
    }

    async fn upsert_edges(&self, edges: &[Edge]) -> Result<UpsertOutcome, StoreError> {
        let mut inner = self.inner.write();
        let mut outcome = UpsertOutcome::default();

        for incoming in edges {
            for endpoint in [&incoming.source_id, &incoming.target_id] {
                if !inner.nodes.contains_key(endpoint) {
                    return Err(StoreError::DanglingEdge {
                        edge: incoming.id.to_string(),
                        missing: endpoint.to_string(),
                    });
                }
            }

            let existing = inner.edges.get(&incoming.id).cloned();
            let (merged, changes, kind) = apply_edge_upsert(existing, incoming, &self.clock);
            inner
                .edges_by_source
                .entry(merged.source_id.clone())
                .or_default()
                .insert(merged.id.clone());
            inner
                .edges_by_target
                .entry(merged.target_id.clone())
                .or_default()
                .insert(merged.id.clone());
            inner.edges.insert(merged.id.clone(), merged);
            for change in changes {
                Self::insert_change(&mut inner, change);
            }
            match kind {
                UpsertKind::Created => outcome.created += 1,
                UpsertKind::Updated => outcome.updated += 1,
                UpsertKind::Unchanged => outcome.unchanged += 1,
            }
        }
        Ok(outcome)
    }

    async fn get_node(&self, id: &NodeId) -> Result<Option<Node>, StoreError> {
        Ok(self.inner.read().nodes.get(id).cloned())
    }

    async fn get_edge(&self, id: &EdgeId) -> Result<Option<Edge>, StoreError> {
        Ok(self.inner.read().edges.get(id).cloned())
    }

    async fn delete_node(&self, id: &NodeId) -> Result<bool, StoreError> {
        let mut inner = self.inner.write();
        let node = match inner.nodes.remove(id) {
            Some(node) => node,
            None => return Ok(false),
        };

        // Cascade every incident edge.
        let mut incident: BTreeSet<EdgeId> = BTreeSet::new();
        if let Some(set) = inner.edges_by_source.remove(id) {
            incident.extend(set);
        }
        if let Some(set) = inner.edges_by_target.remove(id) {
            incident.extend(set);
        }
        let cascaded: Vec<Edge> = incident
            .iter()
            .filter_map(|edge_id| inner.edges.get(edge_id).cloned())
            .collect();
        for edge_id in &incident {
            Self::remove_edge_indexed(&mut inner, edge_id);
        }

        // Membership rows go; groups stay.
        for members in inner.group_members.values_mut() {
            members.remove(id);
        }

        for change in node_delete_changes(&node, &cascaded, &self.clock) {
            Self::insert_change(&mut inner, change);
        }
        Ok(true)
    }

    async fn query_nodes(&self, filter: &NodeFilter) -> Result<Vec<Node>, StoreError> {
        Ok(self
            .inner
            .read()
            .nodes
            .values()
            .filter(|n| filter.matches(n))
            .cloned()
            .collect())
    }

    async fn query_nodes_paginated(
        &self,
        filter: &NodeFilter,
        page: &PageRequest,
    ) -> Result<Page<Node>, StoreError> {
        let matches = self.query_nodes(filter).await?;
        paginate(matches, filter, page)
    }

    async fn query_edges_paginated(
        &self,
        filter: &EdgeFilter,
        page: &PageRequest,
    ) -> Result<Page<Edge>, StoreError> {
        let matches: Vec<Edge> = self
            .inner
            .read()
            .edges
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        paginate(matches, filter, page)
    }

    async fn get_changes_paginated(
        &self,
        filter: &ChangeFilter,
        page: &PageRequest,
    ) -> Result<Page<Change>, StoreError> {
        let matches = self.get_changes(filter).await?;
        paginate(matches, filter, page)
    }

    async fn get_edges_for_node(
        &self,
        id: &NodeId,
        direction: Direction,
    ) -> Result<Vec<Edge>, StoreError> {
        let inner = self.inner.read();
        let mut ids: BTreeSet<EdgeId> = BTreeSet::new();
        if matches!(direction, Direction::Downstream | Direction::Both) {
            if let Some(set) = inner.edges_by_source.get(id) {
                ids.extend(set.iter().cloned());
            }
        }
        if matches!(direction, Direction::Upstream | Direction::Both) {
            if let Some(set) = inner.edges_by_target.get(id) {
                ids.extend(set.iter().cloned());
            }
        }
        Ok(ids
            .iter()
            .filter_map(|edge_id| inner.edges.get(edge_id).cloned())
            .collect())
    }

    async fn append_changes(&self, changes: &[Change]) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        for change in changes {
            Self::insert_change(&mut inner, change.clone());
        }
        Ok(())
    }

    async fn get_changes(&self, filter: &ChangeFilter) -> Result<Vec<Change>, StoreError> {
        // Stored ascending; callers get newest-first.
        Ok(self
            .inner
            .read()
            .changes
            .iter()
            .rev()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect())
    }

    async fn get_node_timeline(
        &self,
        id: &str,
        limit: usize,
    ) -> Result<Vec<Change>, StoreError> {
        Ok(self
            .inner
            .read()
            .changes
            .iter()
            .rev()
            .filter(|c| c.target_id == id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn upsert_group(&self, group: &Group) -> Result<(), StoreError> {
        self.inner
            .write()
            .groups
            .insert(group.id.clone(), group.clone());
        Ok(())
    }

    async fn get_group(&self, id: &str) -> Result<Option<Group>, StoreError> {
        Ok(self.inner.read().groups.get(id).cloned())
    }

    async fn list_groups(&self) -> Result<Vec<Group>, StoreError> {
        Ok(self.inner.read().groups.values().cloned().collect())
    }

    async fn add_group_member(
        &self,
        group_id: &str,
        node_id: &NodeId,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if !inner.groups.contains_key(group_id) {
            return Err(StoreError::NotFound(format!("group {group_id}")));
        }
        inner
            .group_members
            .entry(group_id.to_string())
            .or_default()
            .insert(node_id.clone());
        Ok(())
    }

    async fn remove_group_member(
        &self,
        group_id: &str,
        node_id: &NodeId,
    ) -> Result<(), StoreError> {
        if let Some(members) = self.inner.write().group_members.get_mut(group_id) {
            members.remove(node_id);
        }
        Ok(())
    }

    async fn get_group_members(&self, group_id: &str) -> Result<Vec<NodeId>, StoreError> {
        Ok(self
            .inner
            .read()
            .group_members
            .get(group_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn save_snapshot(&self, snapshot: &GraphSnapshot) -> Result<(), StoreError> {
        self.inner
            .write()
            .snapshots
            .insert(snapshot.meta.id.clone(), snapshot.clone());
        Ok(())
    }

    async fn get_snapshot(&self, id: &str) -> Result<Option<GraphSnapshot>, StoreError> {
        Ok(self.inner.read().snapshots.get(id).cloned())
    }

    async fn list_snapshots(&self, limit: usize) -> Result<Vec<SnapshotMeta>, StoreError> {
        let mut metas: Vec<SnapshotMeta> = self
            .inner
            .read()
            .snapshots
            .values()
            .map(|s| s.meta.clone())
            .collect();
        metas.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        metas.truncate(limit);
        Ok(metas)
    }

    async fn save_sync_record(&self, record: &SyncRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        match inner.sync_records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => inner.sync_records.push(record.clone()),
        }
        Ok(())
    }

    async fn list_sync_records(&self, limit: usize) -> Result<Vec<SyncRecord>, StoreError> {
        let mut records = self.inner.read().sync_records.clone();
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        records.truncate(limit);
        Ok(records)
    }

    async fn get_stats(&self) -> Result<GraphStats, StoreError> {
        let inner = self.inner.read();
        let mut stats = GraphStats {
            total_nodes: inner.nodes.len() as u64,
            total_edges: inner.edges.len() as u64,
            total_changes: inner.changes.len() as u64,
            ..GraphStats::default()
        };
        for node in inner.nodes.values() {
            *stats
                .nodes_by_provider
                .entry(node.provider.to_string())
                .or_default() += 1;
            *stats
                .nodes_by_resource_type
                .entry(node.resource_type.to_string())
                .or_default() += 1;
            *stats
                .nodes_by_status
                .entry(node.status.to_string())
                .or_default() += 1;
            stats.total_cost_monthly += node.cost_monthly.unwrap_or(0.0);
        }
        stats.last_sync_at = inner
            .sync_records
            .iter()
            .filter_map(|r| r.completed_at)
            .max();
        Ok(stats)
    }

    async fn save_change_request(&self, request: &ChangeRequest) -> Result<(), StoreError> {
        self.inner
            .write()
            .change_requests
            .insert(request.id.clone(), request.clone());
        Ok(())
    }

    async fn get_change_request(
        &self,
        id: &str,
    ) -> Result<Option<ChangeRequest>, StoreError> {
        Ok(self.inner.read().change_requests.get(id).cloned())
    }

    async fn list_change_requests(
        &self,
        limit: usize,
    ) -> Result<Vec<ChangeRequest>, StoreError> {
        let mut requests: Vec<ChangeRequest> =
            self.inner.read().change_requests.values().cloned().collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        requests.truncate(limit);
        Ok(requests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        ChangeType, NodeInput, NodeStatus, Provider, RelationshipType, ResourceType,
    };
    use serde_json::Value;

    fn make_node(native_id: &str) -> Node {
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
            cost_monthly: Some(10.0),
            owner: None,
        }
        .into_node(1_000)
    }

    #[tokio::test]
    async fn test_upsert_then_get() {
        let store = InMemoryGraphStore::new();
        let node = make_node("i-1");
        let outcome = store.upsert_nodes(&[node.clone()]).await.unwrap();
        assert_eq!(outcome.created, 1);

        let fetched = store.get_node(&node.id).await.unwrap();
        assert_eq!(fetched.unwrap().id, node.id);
    }

    #[tokio::test]
    async fn test_dangling_edge_rejected() {
        let store = InMemoryGraphStore::new();
        let a = make_node("i-1");
        store.upsert_nodes(&[a.clone()]).await.unwrap();

        let ghost = make_node("i-ghost");
        let edge = Edge::api(a.id.clone(), ghost.id.clone(), RelationshipType::DependsOn);
        let err = store.upsert_edges(&[edge]).await.unwrap_err();
        assert!(matches!(err, StoreError::DanglingEdge { .. }));
    }

    #[tokio::test]
    async fn test_delete_cascades_edges() {
        let store = InMemoryGraphStore::new();
        let a = make_node("i-1");
        let b = make_node("i-2");
        store.upsert_nodes(&[a.clone(), b.clone()]).await.unwrap();
        store
            .upsert_edges(&[Edge::api(
                a.id.clone(),
                b.id.clone(),
                RelationshipType::DependsOn,
            )])
            .await
            .unwrap();

        assert!(store.delete_node(&b.id).await.unwrap());
        let edges = store
            .get_edges_for_node(&a.id, Direction::Both)
            .await
            .unwrap();
        assert!(edges.is_empty());

        let timeline = store.get_node_timeline(b.id.as_str(), 10).await.unwrap();
        assert_eq!(timeline[0].change_type, ChangeType::NodeDeleted);
    }

    #[tokio::test]
    async fn test_changes_are_newest_first() {
        let store = InMemoryGraphStore::new();
        let node = make_node("i-1");
        store.upsert_nodes(&[node.clone()]).await.unwrap();

        let mut stopped = node.clone();
        stopped.status = NodeStatus::Stopped;
        store.upsert_nodes(&[stopped]).await.unwrap();

        let changes = store.get_changes(&ChangeFilter::default()).await.unwrap();
        assert_eq!(changes[0].change_type, ChangeType::NodeUpdated);
        assert_eq!(changes[1].change_type, ChangeType::NodeCreated);
    }

    #[tokio::test]
    async fn test_group_membership_survives_node_delete() {
        let store = InMemoryGraphStore::new();
        let node = make_node("i-1");
        store.upsert_nodes(&[node.clone()]).await.unwrap();

        store
            .upsert_group(&Group::new("g1", "prod", crate::types::GroupType::Environment, 1))
            .await
            .unwrap();
        store.add_group_member("g1", &node.id).await.unwrap();

        store.delete_node(&node.id).await.unwrap();
        assert!(store.get_group_members("g1").await.unwrap().is_empty());
        assert!(store.get_group("g1").await.unwrap().is_some());
    }
}
