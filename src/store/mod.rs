//! Graph storage backends.
//!
//! One typed contract, three interchangeable implementations: in-memory
//! (volatile, for tests and small graphs), sled (embedded B-tree), and
//! PostgreSQL (feature `postgres`, schema-isolated). All backends iterate
//! in id-lexicographic order so paginated traversals are deterministic and
//! identical everywhere, and all are verified by one shared conformance
//! suite.

pub mod cursor;
pub mod memory;
pub mod sled;

pub(crate) mod upsert;

#[cfg(feature = "postgres")]
pub mod postgres;

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;

use crate::types::{
    Change, ChangeFilter, ChangeRequest, Direction, Edge, EdgeFilter, EdgeId, GraphSnapshot,
    GraphStats, Group, Node, NodeFilter, NodeId, Page, PageRequest, SnapshotMeta, SubGraph,
    SyncRecord,
};

/// Error type shared by all storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Cursor was malformed or issued for a different filter.
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),
    /// Edge upsert referenced a node that is not stored.
    #[error("dangling edge {edge}: missing endpoint {missing}")]
    DanglingEdge {
        /// Offending edge id.
        edge: String,
        /// The absent endpoint.
        missing: String,
    },
    /// Entity lookup that the caller required to succeed.
    #[error("not found: {0}")]
    NotFound(String),
    /// Payload could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Backend-specific failure.
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<::sled::Error> for StoreError {
    fn from(e: ::sled::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

/// Counts returned by batch upserts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// Entities inserted for the first time.
    pub created: usize,
    /// Entities whose observable payload changed.
    pub updated: usize,
    /// Entities whose payload was identical (no change emitted).
    pub unchanged: usize,
}

impl UpsertOutcome {
    /// Total entities processed.
    pub fn total(&self) -> usize {
        self.created + self.updated + self.unchanged
    }
}

/// Trait for graph storage backends.
///
/// Implementations must guarantee deterministic, id-lexicographic result
/// ordering, must be safe for concurrent callers (single writer per logical
/// batch, many readers), and — for durable backends — must persist before
/// acknowledging a write.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Batch-upsert nodes. Idempotent: a payload identical to the stored
    /// node (ignoring bookkeeping timestamps) emits no change. Creations
    /// emit `node-created`, field deltas emit `node-updated`, cost moves
    /// emit `cost-changed`.
    async fn upsert_nodes(&self, nodes: &[Node]) -> Result<UpsertOutcome, StoreError>;

    /// Batch-upsert edges. Fails with [`StoreError::DanglingEdge`] when an
    /// endpoint is absent; callers batch nodes before edges.
    async fn upsert_edges(&self, edges: &[Edge]) -> Result<UpsertOutcome, StoreError>;

    /// Fetch a node by id.
    async fn get_node(&self, id: &NodeId) -> Result<Option<Node>, StoreError>;

    /// Fetch an edge by id.
    async fn get_edge(&self, id: &EdgeId) -> Result<Option<Edge>, StoreError>;

    /// Delete a node, cascading incident edges and group memberships.
    /// Emits `edge-deleted` per cascaded edge and one `node-deleted`.
    /// Returns false when the node did not exist.
    async fn delete_node(&self, id: &NodeId) -> Result<bool, StoreError>;

    /// All nodes matching the filter, id-ordered. Unbounded; large graphs
    /// should use [`GraphStore::query_nodes_paginated`].
    async fn query_nodes(&self, filter: &NodeFilter) -> Result<Vec<Node>, StoreError>;

    /// One page of matching nodes.
    async fn query_nodes_paginated(
        &self,
        filter: &NodeFilter,
        page: &PageRequest,
    ) -> Result<Page<Node>, StoreError>;

    /// One page of matching edges.
    async fn query_edges_paginated(
        &self,
        filter: &EdgeFilter,
        page: &PageRequest,
    ) -> Result<Page<Edge>, StoreError>;

    /// One page of matching changes, newest-first.
    async fn get_changes_paginated(
        &self,
        filter: &ChangeFilter,
        page: &PageRequest,
    ) -> Result<Page<Change>, StoreError>;

    /// Edges incident to a node. `Upstream` = edges entering it,
    /// `Downstream` = edges leaving it.
    async fn get_edges_for_node(
        &self,
        id: &NodeId,
        direction: Direction,
    ) -> Result<Vec<Edge>, StoreError>;

    /// Append changes to the log. Append-only: failures must surface — a
    /// failed append aborts the enclosing sync cycle.
    async fn append_changes(&self, changes: &[Change]) -> Result<(), StoreError>;

    /// All changes matching the filter, newest-first.
    async fn get_changes(&self, filter: &ChangeFilter) -> Result<Vec<Change>, StoreError>;

    /// Newest-first change history for one target.
    async fn get_node_timeline(&self, id: &str, limit: usize)
        -> Result<Vec<Change>, StoreError>;

    /// Insert or replace a group.
    async fn upsert_group(&self, group: &Group) -> Result<(), StoreError>;

    /// Fetch a group by id.
    async fn get_group(&self, id: &str) -> Result<Option<Group>, StoreError>;

    /// All groups, id-ordered.
    async fn list_groups(&self) -> Result<Vec<Group>, StoreError>;

    /// Add a node to a group. The group must exist.
    async fn add_group_member(&self, group_id: &str, node_id: &NodeId)
        -> Result<(), StoreError>;

    /// Remove a node from a group.
    async fn remove_group_member(
        &self,
        group_id: &str,
        node_id: &NodeId,
    ) -> Result<(), StoreError>;

    /// Member node ids of a group, id-ordered.
    async fn get_group_members(&self, group_id: &str) -> Result<Vec<NodeId>, StoreError>;

    /// Persist a snapshot.
    async fn save_snapshot(&self, snapshot: &GraphSnapshot) -> Result<(), StoreError>;

    /// Fetch a full snapshot by id.
    async fn get_snapshot(&self, id: &str) -> Result<Option<GraphSnapshot>, StoreError>;

    /// Snapshot metadata, newest-first.
    async fn list_snapshots(&self, limit: usize) -> Result<Vec<SnapshotMeta>, StoreError>;

    /// Persist (or update) a sync record.
    async fn save_sync_record(&self, record: &SyncRecord) -> Result<(), StoreError>;

    /// Sync records, newest-first.
    async fn list_sync_records(&self, limit: usize) -> Result<Vec<SyncRecord>, StoreError>;

    /// Aggregate totals over the whole graph.
    async fn get_stats(&self) -> Result<GraphStats, StoreError>;

    /// Insert or update a governor change request.
    async fn save_change_request(&self, request: &ChangeRequest) -> Result<(), StoreError>;

    /// Fetch a change request by id.
    async fn get_change_request(&self, id: &str)
        -> Result<Option<ChangeRequest>, StoreError>;

    /// Change requests, newest-first.
    async fn list_change_requests(
        &self,
        limit: usize,
    ) -> Result<Vec<ChangeRequest>, StoreError>;

    /// Breadth-first neighborhood around a node.
    ///
    /// The root is always included (depth 0); traversal never exceeds
    /// `max_depth`, terminates on cycles via a visited set, and expands
    /// equal-depth neighbors in node-id lexicographic order so output is
    /// deterministic. Returns the visited subgraph.
    ///
    /// Provided for every backend on top of the primitive accessors.
    async fn get_neighbors(
        &self,
        id: &NodeId,
        max_depth: u32,
        direction: Direction,
    ) -> Result<SubGraph, StoreError> {
        let root = match self.get_node(id).await? {
            Some(node) => node,
            None => return Ok(SubGraph::default()),
        };

        let mut visited: BTreeMap<NodeId, Node> = BTreeMap::new();
        let mut seen_edges: BTreeMap<EdgeId, Edge> = BTreeMap::new();
        visited.insert(root.id.clone(), root);

        let mut frontier: Vec<NodeId> = vec![id.clone()];
        let mut depth = 0;

        while !frontier.is_empty() && depth < max_depth {
            // Lexicographic frontier order keeps expansion deterministic.
            frontier.sort();
            let mut next: BTreeSet<NodeId> = BTreeSet::new();

            for node_id in &frontier {
                for edge in self.get_edges_for_node(node_id, direction).await? {
                    let neighbor = if &edge.source_id == node_id {
                        edge.target_id.clone()
                    } else {
                        edge.source_id.clone()
                    };
                    seen_edges.insert(edge.id.clone(), edge);
                    if !visited.contains_key(&neighbor) {
                        if let Some(node) = self.get_node(&neighbor).await? {
                            visited.insert(neighbor.clone(), node);
                            next.insert(neighbor);
                        }
                    }
                }
            }

            frontier = next.into_iter().collect();
            depth += 1;
        }

        // Only edges with both endpoints inside the visited set belong to
        // the subgraph.
        let edges: Vec<Edge> = seen_edges
            .into_values()
            .filter(|e| visited.contains_key(&e.source_id) && visited.contains_key(&e.target_id))
            .collect();

        Ok(SubGraph {
            nodes: visited.into_values().collect(),
            edges,
        })
    }

    /// Shortest unweighted path between two nodes, following edges in
    /// either direction. Empty when unreachable or when an endpoint does
    /// not exist.
    async fn find_path(
        &self,
        from: &NodeId,
        to: &NodeId,
        max_depth: u32,
    ) -> Result<Vec<Node>, StoreError> {
        if self.get_node(from).await?.is_none() || self.get_node(to).await?.is_none() {
            return Ok(Vec::new());
        }
        if from == to {
            return Ok(self.get_node(from).await?.into_iter().collect());
        }

        let mut parent: BTreeMap<NodeId, NodeId> = BTreeMap::new();
        let mut frontier: Vec<NodeId> = vec![from.clone()];
        let mut depth = 0;

        'bfs: while !frontier.is_empty() && depth < max_depth {
            frontier.sort();
            let mut next: BTreeSet<NodeId> = BTreeSet::new();

            for node_id in &frontier {
                for edge in self.get_edges_for_node(node_id, Direction::Both).await? {
                    let neighbor = if &edge.source_id == node_id {
                        edge.target_id.clone()
                    } else {
                        edge.source_id.clone()
                    };
                    if &neighbor == from || parent.contains_key(&neighbor) {
                        continue;
                    }
                    parent.insert(neighbor.clone(), node_id.clone());
                    if &neighbor == to {
                        break 'bfs;
                    }
                    next.insert(neighbor);
                }
            }

            frontier = next.into_iter().collect();
            depth += 1;
        }

        if !parent.contains_key(to) {
            return Ok(Vec::new());
        }

        // Walk back from the target, then reverse.
        let mut path_ids = vec![to.clone()];
        let mut current = to.clone();
        while let Some(prev) = parent.get(&current) {
            path_ids.push(prev.clone());
            current = prev.clone();
        }
        path_ids.reverse();

        let mut path = Vec::with_capacity(path_ids.len());
        for id in path_ids {
            if let Some(node) = self.get_node(&id).await? {
                path.push(node);
            }
        }
        Ok(path)
    }
}

pub use memory::InMemoryGraphStore;
pub use self::sled::SledGraphStore;

#[cfg(feature = "postgres")]
pub use postgres::{PostgresConfig, PostgresGraphStore};
