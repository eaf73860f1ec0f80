//! Embedded B-tree graph store backed by sled.
//!
//! Durable: every mutating call flushes before acknowledging. Keys are the
//! entity ids, so key order is the id-lexicographic order the pagination
//! contract requires. Secondary trees index edges by endpoint and changes
//! by target, mirroring the relational layout.

use std::collections::BTreeSet;
use std::path::Path;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::cursor::paginate;
use super::upsert::{apply_edge_upsert, apply_node_upsert, node_delete_changes, UpsertKind};
use super::{GraphStore, StoreError, UpsertOutcome};
use crate::clock::MonotonicClock;
use crate::types::{
    Change, ChangeFilter, ChangeRequest, Direction, Edge, EdgeFilter, EdgeId, GraphSnapshot,
    GraphStats, Group, Node, NodeFilter, NodeId, Page, PageRequest, SnapshotMeta, SyncRecord,
};

const TREE_NODES: &str = "nodes";
const TREE_EDGES: &str = "edges";
const TREE_EDGES_BY_SOURCE: &str = "edges_by_source";
const TREE_EDGES_BY_TARGET: &str = "edges_by_target";
const TREE_CHANGES: &str = "changes";
const TREE_CHANGES_BY_TARGET: &str = "changes_by_target";
const TREE_GROUPS: &str = "groups";
const TREE_GROUP_MEMBERS: &str = "group_members";
const TREE_SNAPSHOTS: &str = "snapshots";
const TREE_SNAPSHOT_META: &str = "snapshot_meta";
const TREE_SYNC_RECORDS: &str = "sync_records";
const TREE_CHANGE_REQUESTS: &str = "change_requests";

/// Separator between components of composite keys. Entity ids never
/// contain NUL.
const SEP: u8 = 0;

/// Embedded graph store on a local sled database.
pub struct SledGraphStore {
    db: sled::Db,
    nodes: sled::Tree,
    edges: sled::Tree,
    edges_by_source: sled::Tree,
    edges_by_target: sled::Tree,
    changes: sled::Tree,
    changes_by_target: sled::Tree,
    groups: sled::Tree,
    group_members: sled::Tree,
    snapshots: sled::Tree,
    snapshot_meta: sled::Tree,
    sync_records: sled::Tree,
    change_requests: sled::Tree,
    clock: MonotonicClock,
}

impl SledGraphStore {
    /// Open (or create) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Open a throwaway store in a temporary location.
    ///
    /// Used by the conformance suite; data is dropped with the handle.
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, StoreError> {
        Ok(Self {
            nodes: db.open_tree(TREE_NODES)?,
            edges: db.open_tree(TREE_EDGES)?,
            edges_by_source: db.open_tree(TREE_EDGES_BY_SOURCE)?,
            edges_by_target: db.open_tree(TREE_EDGES_BY_TARGET)?,
            changes: db.open_tree(TREE_CHANGES)?,
            changes_by_target: db.open_tree(TREE_CHANGES_BY_TARGET)?,
            groups: db.open_tree(TREE_GROUPS)?,
            group_members: db.open_tree(TREE_GROUP_MEMBERS)?,
            snapshots: db.open_tree(TREE_SNAPSHOTS)?,
            snapshot_meta: db.open_tree(TREE_SNAPSHOT_META)?,
            sync_records: db.open_tree(TREE_SYNC_RECORDS)?,
            change_requests: db.open_tree(TREE_CHANGE_REQUESTS)?,
            db,
            clock: MonotonicClock::new(),
        })
    }

    /// Persist all pending writes before acknowledging.
    async fn flush(&self) -> Result<(), StoreError> {
        self.db.flush_async().await?;
        Ok(())
    }

    fn to_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn from_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Big-endian key fragment that sorts like the signed timestamp.
    fn ts_key(ts: i64) -> [u8; 8] {
        ((ts as u64) ^ (1 << 63)).to_be_bytes()
    }

    fn composite(prefix: &[u8], suffix: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(prefix.len() + 1 + suffix.len());
        key.extend_from_slice(prefix);
        key.push(SEP);
        key.extend_from_slice(suffix);
        key
    }

    /// Primary change-log key: (detected_at, id).
    fn change_key(change: &Change) -> Vec<u8> {
        let mut key = Vec::with_capacity(8 + change.id.len());
        key.extend_from_slice(&Self::ts_key(change.detected_at));
        key.extend_from_slice(change.id.as_bytes());
        key
    }

    fn put_change(&self, change: &Change) -> Result<(), StoreError> {
        let key = Self::change_key(change);
        self.changes.insert(&key, Self::to_bytes(change)?)?;
        // Secondary index: target -> primary key.
        let by_target = Self::composite(change.target_id.as_bytes(), &key);
        self.changes_by_target.insert(by_target, key)?;
        Ok(())
    }

    fn scan_edge_ids(&self, index: &sled::Tree, node_id: &NodeId) -> Result<Vec<EdgeId>, StoreError> {
        let mut prefix = node_id.as_str().as_bytes().to_vec();
        prefix.push(SEP);
        let mut ids = Vec::new();
        for entry in index.scan_prefix(&prefix) {
            let (_, value) = entry?;
            ids.push(EdgeId::from_raw(String::from_utf8_lossy(&value).to_string()));
        }
        Ok(ids)
    }

    fn remove_edge(&self, edge: &Edge) -> Result<(), StoreError> {
        self.edges.remove(edge.id.as_str().as_bytes())?;
        self.edges_by_source.remove(Self::composite(
            edge.source_id.as_str().as_bytes(),
            edge.id.as_str().as_bytes(),
        ))?;
        self.edges_by_target.remove(Self::composite(
            edge.target_id.as_str().as_bytes(),
            edge.id.as_str().as_bytes(),
        ))?;
        Ok(())
    }
}

#[async_trait]
impl GraphStore for SledGraphStore {
    async fn upsert_nodes(&self, nodes: &[Node]) -> Result<UpsertOutcome, StoreError> {
        let mut outcome = UpsertOutcome::default();

        for incoming in nodes {
            let key = incoming.id.as_str().as_bytes();
            let existing = match self.nodes.get(key)? {
                Some(bytes) => Some(Self::from_bytes::<Node>(&bytes)?),
                None => None,
            };
            let (merged, changes, kind) = apply_node_upsert(existing, incoming, &self.clock);
            self.nodes.insert(key, Self::to_bytes(&merged)?)?;
            for change in &changes {
                self.put_change(change)?;
            }
            match kind {
                UpsertKind::Created => outcome.created += 1,
                UpsertKind::Updated => outcome.updated += 1,
                UpsertKind::Unchanged => outcome.unchanged += 1,
            }
        }

        self.flush().await?;
        Ok(outcome)
    }

    async fn upsert_edges(&self, edges: &[Edge]) -> Result<UpsertOutcome, StoreError> {
        let mut outcome = UpsertOutcome::default();

        for incoming in edges {
            for endpoint in [&incoming.source_id, &incoming.target_id] {
                if self.nodes.get(endpoint.as_str().as_bytes())?.is_none() {
                    return Err(StoreError::DanglingEdge {
                        edge: incoming.id.to_string(),
                        missing: endpoint.to_string(),
                    });
                }
            }

            let key = incoming.id.as_str().as_bytes();
            let existing = match self.edges.get(key)? {
                Some(bytes) => Some(Self::from_bytes::<Edge>(&bytes)?),
                None => None,
            };
            let (merged, changes, kind) = apply_edge_upsert(existing, incoming, &self.clock);
            self.edges.insert(key, Self::to_bytes(&merged)?)?;
            self.edges_by_source.insert(
                Self::composite(merged.source_id.as_str().as_bytes(), key),
                key.to_vec(),
            )?;
            self.edges_by_target.insert(
                Self::composite(merged.target_id.as_str().as_bytes(), key),
                key.to_vec(),
            )?;
            for change in &changes {
                self.put_change(change)?;
            }
            match kind {
                UpsertKind::Created => outcome.created += 1,
                UpsertKind::Updated => outcome.updated += 1,
                UpsertKind::Unchanged => outcome.unchanged += 1,
            }
        }

        self.flush().await?;
        Ok(outcome)
    }

    async fn get_node(&self, id: &NodeId) -> Result<Option<Node>, StoreError> {
        match self.nodes.get(id.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(Self::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn get_edge(&self, id: &EdgeId) -> Result<Option<Edge>, StoreError> {
        match self.edges.get(id.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(Self::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn delete_node(&self, id: &NodeId) -> Result<bool, StoreError> {
        let node = match self.nodes.remove(id.as_str().as_bytes())? {
            Some(bytes) => Self::from_bytes::<Node>(&bytes)?,
            None => return Ok(false),
        };

        let mut incident: BTreeSet<EdgeId> = BTreeSet::new();
        incident.extend(self.scan_edge_ids(&self.edges_by_source, id)?);
        incident.extend(self.scan_edge_ids(&self.edges_by_target, id)?);

        let mut cascaded = Vec::with_capacity(incident.len());
        for edge_id in &incident {
            if let Some(bytes) = self.edges.get(edge_id.as_str().as_bytes())? {
                let edge: Edge = Self::from_bytes(&bytes)?;
                self.remove_edge(&edge)?;
                cascaded.push(edge);
            }
        }

        // Drop membership rows pointing at this node; groups themselves stay.
        let mut stale_memberships = Vec::new();
        for entry in self.group_members.iter() {
            let (key, _) = entry?;
            if key
                .split(|b| *b == SEP)
                .nth(1)
                .is_some_and(|member| member == id.as_str().as_bytes())
            {
                stale_memberships.push(key.to_vec());
            }
        }
        for key in stale_memberships {
            self.group_members.remove(key)?;
        }

        for change in node_delete_changes(&node, &cascaded, &self.clock) {
            self.put_change(&change)?;
        }

        self.flush().await?;
        Ok(true)
    }

    async fn query_nodes(&self, filter: &NodeFilter) -> Result<Vec<Node>, StoreError> {
        let mut matches = Vec::new();
        for entry in self.nodes.iter() {
            let (_, bytes) = entry?;
            let node: Node = Self::from_bytes(&bytes)?;
            if filter.matches(&node) {
                matches.push(node);
            }
        }
        Ok(matches)
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
        let mut matches = Vec::new();
        for entry in self.edges.iter() {
            let (_, bytes) = entry?;
            let edge: Edge = Self::from_bytes(&bytes)?;
            if filter.matches(&edge) {
                matches.push(edge);
            }
        }
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
        let mut ids: BTreeSet<EdgeId> = BTreeSet::new();
        if matches!(direction, Direction::Downstream | Direction::Both) {
            ids.extend(self.scan_edge_ids(&self.edges_by_source, id)?);
        }
        if matches!(direction, Direction::Upstream | Direction::Both) {
            ids.extend(self.scan_edge_ids(&self.edges_by_target, id)?);
        }
        let mut edges = Vec::with_capacity(ids.len());
        for edge_id in ids {
            if let Some(bytes) = self.edges.get(edge_id.as_str().as_bytes())? {
                edges.push(Self::from_bytes(&bytes)?);
            }
        }
        Ok(edges)
    }

    async fn append_changes(&self, changes: &[Change]) -> Result<(), StoreError> {
        for change in changes {
            self.put_change(change)?;
        }
        self.flush().await?;
        Ok(())
    }

    async fn get_changes(&self, filter: &ChangeFilter) -> Result<Vec<Change>, StoreError> {
        let mut matches = Vec::new();
        for entry in self.changes.iter().rev() {
            let (_, bytes) = entry?;
            let change: Change = Self::from_bytes(&bytes)?;
            if filter.matches(&change) {
                matches.push(change);
            }
        }
        Ok(matches)
    }

    async fn get_node_timeline(
        &self,
        id: &str,
        limit: usize,
    ) -> Result<Vec<Change>, StoreError> {
        let mut prefix = id.as_bytes().to_vec();
        prefix.push(SEP);

        let mut timeline = Vec::new();
        for entry in self.changes_by_target.scan_prefix(&prefix).rev() {
            if timeline.len() >= limit {
                break;
            }
            let (_, primary_key) = entry?;
            if let Some(bytes) = self.changes.get(&primary_key)? {
                timeline.push(Self::from_bytes(&bytes)?);
            }
        }
        Ok(timeline)
    }

    async fn upsert_group(&self, group: &Group) -> Result<(), StoreError> {
        self.groups
            .insert(group.id.as_bytes(), Self::to_bytes(group)?)?;
        self.flush().await
    }

    async fn get_group(&self, id: &str) -> Result<Option<Group>, StoreError> {
        match self.groups.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(Self::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn list_groups(&self) -> Result<Vec<Group>, StoreError> {
        let mut groups = Vec::new();
        for entry in self.groups.iter() {
            let (_, bytes) = entry?;
            groups.push(Self::from_bytes(&bytes)?);
        }
        Ok(groups)
    }

    async fn add_group_member(
        &self,
        group_id: &str,
        node_id: &NodeId,
    ) -> Result<(), StoreError> {
        if self.groups.get(group_id.as_bytes())?.is_none() {
            return Err(StoreError::NotFound(format!("group {group_id}")));
        }
        let key = Self::composite(group_id.as_bytes(), node_id.as_str().as_bytes());
        self.group_members.insert(key, vec![])?;
        self.flush().await
    }

    async fn remove_group_member(
        &self,
        group_id: &str,
        node_id: &NodeId,
    ) -> Result<(), StoreError> {
        let key = Self::composite(group_id.as_bytes(), node_id.as_str().as_bytes());
        self.group_members.remove(key)?;
        self.flush().await
    }

    async fn get_group_members(&self, group_id: &str) -> Result<Vec<NodeId>, StoreError> {
        let mut prefix = group_id.as_bytes().to_vec();
        prefix.push(SEP);
        let mut members = Vec::new();
        for entry in self.group_members.scan_prefix(&prefix) {
            let (key, _) = entry?;
            let member = &key[prefix.len()..];
            members.push(NodeId::from_raw(String::from_utf8_lossy(member).to_string()));
        }
        Ok(members)
    }

    async fn save_snapshot(&self, snapshot: &GraphSnapshot) -> Result<(), StoreError> {
        self.snapshots
            .insert(snapshot.meta.id.as_bytes(), Self::to_bytes(snapshot)?)?;
        self.snapshot_meta
            .insert(snapshot.meta.id.as_bytes(), Self::to_bytes(&snapshot.meta)?)?;
        self.flush().await
    }

    async fn get_snapshot(&self, id: &str) -> Result<Option<GraphSnapshot>, StoreError> {
        match self.snapshots.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(Self::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn list_snapshots(&self, limit: usize) -> Result<Vec<SnapshotMeta>, StoreError> {
        let mut metas: Vec<SnapshotMeta> = Vec::new();
        for entry in self.snapshot_meta.iter() {
            let (_, bytes) = entry?;
            metas.push(Self::from_bytes(&bytes)?);
        }
        metas.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        metas.truncate(limit);
        Ok(metas)
    }

    async fn save_sync_record(&self, record: &SyncRecord) -> Result<(), StoreError> {
        // Keyed by (started_at, id): stable across the running -> finished
        // update, newest-last in key order.
        let mut key = Self::ts_key(record.started_at).to_vec();
        key.extend_from_slice(record.id.as_bytes());
        self.sync_records.insert(key, Self::to_bytes(record)?)?;
        self.flush().await
    }

    async fn list_sync_records(&self, limit: usize) -> Result<Vec<SyncRecord>, StoreError> {
        let mut records = Vec::new();
        for entry in self.sync_records.iter().rev() {
            if records.len() >= limit {
                break;
            }
            let (_, bytes) = entry?;
            records.push(Self::from_bytes(&bytes)?);
        }
        Ok(records)
    }

    async fn get_stats(&self) -> Result<GraphStats, StoreError> {
        let mut stats = GraphStats {
            total_edges: self.edges.len() as u64,
            total_changes: self.changes.len() as u64,
            ..GraphStats::default()
        };
        for entry in self.nodes.iter() {
            let (_, bytes) = entry?;
            let node: Node = Self::from_bytes(&bytes)?;
            stats.total_nodes += 1;
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
        stats.last_sync_at = self.list_sync_records(usize::MAX).await?
            .iter()
            .filter_map(|r| r.completed_at)
            .max();
        Ok(stats)
    }

    async fn save_change_request(&self, request: &ChangeRequest) -> Result<(), StoreError> {
        self.change_requests
            .insert(request.id.as_bytes(), Self::to_bytes(request)?)?;
        self.flush().await
    }

    async fn get_change_request(
        &self,
        id: &str,
    ) -> Result<Option<ChangeRequest>, StoreError> {
        match self.change_requests.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(Self::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn list_change_requests(
        &self,
        limit: usize,
    ) -> Result<Vec<ChangeRequest>, StoreError> {
        let mut requests = Vec::new();
        for entry in self.change_requests.iter() {
            let (_, bytes) = entry?;
            requests.push(Self::from_bytes::<ChangeRequest>(&bytes)?);
        }
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        requests.truncate(limit);
        Ok(requests)
    }
}
