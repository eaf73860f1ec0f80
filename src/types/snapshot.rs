//! Point-in-time snapshots of the graph.
//!
//! A snapshot plus the append-only change log gives time travel: replaying
//! every change after the snapshot's `created_at` reconstructs the graph at
//! any later instant.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::xxh64;

use super::edge::Edge;
use super::node::Node;

/// Why a snapshot was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SnapshotTrigger {
    /// Operator asked for one.
    Manual,
    /// Timer-driven.
    Scheduled,
    /// Guard taken before a destructive remediation.
    PreChange,
    /// Taken after a sync cycle.
    PostSync,
}

impl SnapshotTrigger {
    /// Stable kebab-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
            Self::PreChange => "pre-change",
            Self::PostSync => "post-sync",
        }
    }

    /// Parse trigger from its kebab-case name.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "manual" => Some(Self::Manual),
            "scheduled" => Some(Self::Scheduled),
            "pre-change" => Some(Self::PreChange),
            "post-sync" => Some(Self::PostSync),
            _ => None,
        }
    }
}

impl fmt::Display for SnapshotTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Summary row for a stored snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// Unique id.
    pub id: String,
    /// Epoch-millisecond creation timestamp.
    pub created_at: i64,
    /// Optional operator label.
    pub label: Option<String>,
    /// Why it was taken.
    pub trigger: SnapshotTrigger,
    /// Nodes captured.
    pub node_count: u64,
    /// Edges captured.
    pub edge_count: u64,
    /// Deterministic fingerprint of the captured state.
    pub fingerprint: String,
}

/// A full point-in-time copy of the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSnapshot {
    /// Summary metadata.
    pub meta: SnapshotMeta,
    /// Captured nodes, id-ordered.
    pub nodes: Vec<Node>,
    /// Captured edges, id-ordered.
    pub edges: Vec<Edge>,
}

impl GraphSnapshot {
    /// Build a snapshot over the given state.
    ///
    /// Nodes and edges are sorted by id before fingerprinting so the same
    /// graph state always yields the same fingerprint regardless of input
    /// order.
    pub fn capture(
        id: impl Into<String>,
        trigger: SnapshotTrigger,
        label: Option<String>,
        mut nodes: Vec<Node>,
        mut edges: Vec<Edge>,
        now_ms: i64,
    ) -> Self {
        nodes.sort();
        edges.sort();
        let fingerprint = fingerprint(&nodes, &edges);
        Self {
            meta: SnapshotMeta {
                id: id.into(),
                created_at: now_ms,
                label,
                trigger,
                node_count: nodes.len() as u64,
                edge_count: edges.len() as u64,
                fingerprint,
            },
            nodes,
            edges,
        }
    }

    /// Recompute the fingerprint and compare with the stored one.
    pub fn verify(&self) -> bool {
        fingerprint(&self.nodes, &self.edges) == self.meta.fingerprint
    }
}

/// Deterministic xxh64 fingerprint over sorted node ids, statuses, and edge ids.
fn fingerprint(nodes: &[Node], edges: &[Edge]) -> String {
    let node_part: BTreeSet<String> = nodes
        .iter()
        .map(|n| format!("{}#{}", n.id, n.status))
        .collect();
    let edge_part: BTreeSet<&str> = edges.iter().map(|e| e.id.as_str()).collect();

    let mut buf = Vec::new();
    for part in &node_part {
        buf.extend_from_slice(part.as_bytes());
        buf.push(0);
    }
    buf.push(1);
    for part in &edge_part {
        buf.extend_from_slice(part.as_bytes());
        buf.push(0);
    }
    format!("{:016x}", xxh64(&buf, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::edge::RelationshipType;
    use crate::types::node::{NodeId, NodeInput, NodeStatus, Provider, ResourceType};

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
            metadata: serde_json::Value::Null,
            cost_monthly: None,
            owner: None,
        }
        .into_node(1_000)
    }

    #[test]
    fn test_fingerprint_is_order_independent() {
        let n1 = make_node("i-1");
        let n2 = make_node("i-2");
        let e = Edge::api(n1.id.clone(), n2.id.clone(), RelationshipType::DependsOn);

        let a = GraphSnapshot::capture(
            "s1",
            SnapshotTrigger::Manual,
            None,
            vec![n1.clone(), n2.clone()],
            vec![e.clone()],
            5,
        );
        let b = GraphSnapshot::capture(
            "s2",
            SnapshotTrigger::Manual,
            None,
            vec![n2, n1],
            vec![e],
            9,
        );
        assert_eq!(a.meta.fingerprint, b.meta.fingerprint);
    }

    #[test]
    fn test_fingerprint_tracks_status() {
        let n1 = make_node("i-1");
        let mut stopped = n1.clone();
        stopped.status = NodeStatus::Stopped;

        let a = GraphSnapshot::capture("s1", SnapshotTrigger::Manual, None, vec![n1], vec![], 5);
        let b =
            GraphSnapshot::capture("s2", SnapshotTrigger::Manual, None, vec![stopped], vec![], 5);
        assert_ne!(a.meta.fingerprint, b.meta.fingerprint);
    }

    #[test]
    fn test_verify_detects_tamper() {
        let n1 = make_node("i-1");
        let mut snap =
            GraphSnapshot::capture("s1", SnapshotTrigger::Manual, None, vec![n1], vec![], 5);
        assert!(snap.verify());

        snap.nodes.push(make_node("i-2"));
        assert!(!snap.verify());
    }

    #[test]
    fn test_capture_sorts_by_id() {
        let n1 = make_node("i-1");
        let n2 = make_node("i-2");
        let snap = GraphSnapshot::capture(
            "s1",
            SnapshotTrigger::PostSync,
            Some("after sync".into()),
            vec![n2.clone(), n1.clone()],
            vec![],
            5,
        );
        let ids: Vec<&NodeId> = snap.nodes.iter().map(|n| &n.id).collect();
        assert_eq!(ids, vec![&n1.id, &n2.id]);
    }
}
