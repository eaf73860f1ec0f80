//! Edge types for the infrastructure graph.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::node::NodeId;

/// Typed relationship between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationshipType {
    /// Source requires target to function.
    DependsOn,
    /// Network-level connectivity.
    ConnectedTo,
    /// Source is hosted inside target (e.g. instance in VPC).
    RunsIn,
    /// Source belongs to a fleet node.
    MemberOfFleet,
    /// Source is placed at an edge site.
    DeployedAt,
    /// Source reads data from target.
    ReadsFrom,
    /// Source writes data to target.
    WritesTo,
    /// Generic usage relationship.
    Uses,
}

impl RelationshipType {
    /// Parse relationship type from its kebab-case name.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "depends-on" => Some(Self::DependsOn),
            "connected-to" => Some(Self::ConnectedTo),
            "runs-in" => Some(Self::RunsIn),
            "member-of-fleet" => Some(Self::MemberOfFleet),
            "deployed-at" => Some(Self::DeployedAt),
            "reads-from" => Some(Self::ReadsFrom),
            "writes-to" => Some(Self::WritesTo),
            "uses" => Some(Self::Uses),
            _ => None,
        }
    }

    /// Stable kebab-case name used in ids and persisted rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DependsOn => "depends-on",
            Self::ConnectedTo => "connected-to",
            Self::RunsIn => "runs-in",
            Self::MemberOfFleet => "member-of-fleet",
            Self::DeployedAt => "deployed-at",
            Self::ReadsFrom => "reads-from",
            Self::WritesTo => "writes-to",
            Self::Uses => "uses",
        }
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How an edge was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveredVia {
    /// Read directly from a provider API field.
    ApiField,
    /// Parsed out of resource configuration.
    ConfigScan,
    /// Inferred from naming, tags, or traffic.
    Inference,
    /// Observed on an event stream.
    EventStream,
}

impl DiscoveredVia {
    /// Parse discovery channel from its kebab-case name.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "api-field" => Some(Self::ApiField),
            "config-scan" => Some(Self::ConfigScan),
            "inference" => Some(Self::Inference),
            "event-stream" => Some(Self::EventStream),
            _ => None,
        }
    }

    /// Stable kebab-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApiField => "api-field",
            Self::ConfigScan => "config-scan",
            Self::Inference => "inference",
            Self::EventStream => "event-stream",
        }
    }
}

impl fmt::Display for DiscoveredVia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unique identifier for an edge: `source--relationshipType--target`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeId(String);

impl EdgeId {
    /// Derive the canonical id from endpoints and relationship.
    pub fn derive(source: &NodeId, relationship: RelationshipType, target: &NodeId) -> Self {
        Self(format!(
            "{}--{}--{}",
            source.as_str(),
            relationship.as_str(),
            target.as_str()
        ))
    }

    /// Wrap an already-derived id.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for EdgeId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// A typed, directed relationship between two nodes.
///
/// Edges are relations, not ownership: both endpoints own themselves, and
/// deleting a node cascades its incident edges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    /// Canonical id.
    pub id: EdgeId,
    /// Source node.
    pub source_id: NodeId,
    /// Target node.
    pub target_id: NodeId,
    /// Relationship kind.
    pub relationship_type: RelationshipType,
    /// Discovery confidence in [0, 1].
    pub confidence: f64,
    /// Discovery channel.
    pub discovered_via: DiscoveredVia,
    /// Opaque metadata.
    pub metadata: Value,
}

impl Edge {
    /// Create a new edge with a derived id. Confidence is clamped to [0, 1].
    pub fn new(
        source_id: NodeId,
        target_id: NodeId,
        relationship_type: RelationshipType,
        confidence: f64,
        discovered_via: DiscoveredVia,
    ) -> Self {
        let id = EdgeId::derive(&source_id, relationship_type, &target_id);
        Self {
            id,
            source_id,
            target_id,
            relationship_type,
            confidence: confidence.clamp(0.0, 1.0),
            discovered_via,
            metadata: Value::Null,
        }
    }

    /// Edge read straight off a provider API field with full confidence.
    pub fn api(source_id: NodeId, target_id: NodeId, relationship_type: RelationshipType) -> Self {
        Self::new(
            source_id,
            target_id,
            relationship_type,
            1.0,
            DiscoveredVia::ApiField,
        )
    }

    /// Attach metadata.
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// True when `node` is either endpoint.
    pub fn touches(&self, node: &NodeId) -> bool {
        &self.source_id == node || &self.target_id == node
    }
}

// Canonical ordering: by id, which encodes (source, relationship, target).
impl PartialEq for Edge {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Edge {}

impl PartialOrd for Edge {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Edge {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nid(raw: &str) -> NodeId {
        NodeId::from_raw(raw)
    }

    #[test]
    fn test_edge_id_encodes_direction() {
        let ab = EdgeId::derive(&nid("a"), RelationshipType::DependsOn, &nid("b"));
        let ba = EdgeId::derive(&nid("b"), RelationshipType::DependsOn, &nid("a"));
        assert_ne!(ab, ba);
        assert_eq!(ab.as_str(), "a--depends-on--b");
    }

    #[test]
    fn test_confidence_is_clamped() {
        let e = Edge::new(
            nid("a"),
            nid("b"),
            RelationshipType::Uses,
            7.5,
            DiscoveredVia::Inference,
        );
        assert_eq!(e.confidence, 1.0);
    }

    #[test]
    fn test_touches_both_endpoints() {
        let e = Edge::api(nid("a"), nid("b"), RelationshipType::ConnectedTo);
        assert!(e.touches(&nid("a")));
        assert!(e.touches(&nid("b")));
        assert!(!e.touches(&nid("c")));
    }

    #[test]
    fn test_edge_ordering_follows_ids() {
        let e1 = Edge::api(nid("a"), nid("b"), RelationshipType::DependsOn);
        let e2 = Edge::api(nid("a"), nid("c"), RelationshipType::DependsOn);
        let e3 = Edge::api(nid("b"), nid("a"), RelationshipType::DependsOn);
        assert!(e1 < e2);
        assert!(e2 < e3);
    }
}
