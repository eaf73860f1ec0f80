//! Query filters, pagination, and traversal shapes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::change::{Change, ChangeType, DetectedVia, InitiatorType};
use super::edge::{Edge, RelationshipType};
use super::node::{Node, NodeId, NodeStatus, Provider, ResourceType};

/// Traversal direction relative to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Edges pointing at the node (incoming).
    Upstream,
    /// Edges leaving the node (outgoing).
    Downstream,
    /// Both.
    Both,
}

impl Direction {
    /// Parse direction from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "upstream" => Some(Self::Upstream),
            "downstream" => Some(Self::Downstream),
            "both" => Some(Self::Both),
            _ => None,
        }
    }
}

/// Node query filter. Empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeFilter {
    /// Match one provider.
    #[serde(default)]
    pub provider: Option<Provider>,
    /// Match one account.
    #[serde(default)]
    pub account: Option<String>,
    /// Match one region.
    #[serde(default)]
    pub region: Option<String>,
    /// Match any of these resource types; empty = all.
    #[serde(default)]
    pub resource_types: Vec<ResourceType>,
    /// Match any of these statuses; empty = all.
    #[serde(default)]
    pub statuses: Vec<NodeStatus>,
    /// Every (k, v) here must appear in the node's tags.
    #[serde(default)]
    pub tag_match: BTreeMap<String, String>,
    /// Node name must start with this.
    #[serde(default)]
    pub name_prefix: Option<String>,
    /// Node owner must contain this (case-insensitive).
    #[serde(default)]
    pub owner_contains: Option<String>,
}

impl NodeFilter {
    /// Filter by provider.
    pub fn provider(provider: Provider) -> Self {
        Self {
            provider: Some(provider),
            ..Self::default()
        }
    }

    /// Filter by a single resource type.
    pub fn resource_type(resource_type: ResourceType) -> Self {
        Self {
            resource_types: vec![resource_type],
            ..Self::default()
        }
    }

    /// True when the node passes every present predicate.
    pub fn matches(&self, node: &Node) -> bool {
        if let Some(p) = self.provider {
            if node.provider != p {
                return false;
            }
        }
        if let Some(ref account) = self.account {
            if &node.account != account {
                return false;
            }
        }
        if let Some(ref region) = self.region {
            if &node.region != region {
                return false;
            }
        }
        if !self.resource_types.is_empty() && !self.resource_types.contains(&node.resource_type) {
            return false;
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&node.status) {
            return false;
        }
        for (k, v) in &self.tag_match {
            if node.tags.get(k) != Some(v) {
                return false;
            }
        }
        if let Some(ref prefix) = self.name_prefix {
            if !node.name.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(ref fragment) = self.owner_contains {
            let fragment = fragment.to_lowercase();
            match &node.owner {
                Some(owner) if owner.to_lowercase().contains(&fragment) => {}
                _ => return false,
            }
        }
        true
    }
}

/// Edge query filter. Empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeFilter {
    /// Match edges leaving this node.
    #[serde(default)]
    pub source_id: Option<NodeId>,
    /// Match edges entering this node.
    #[serde(default)]
    pub target_id: Option<NodeId>,
    /// Match one relationship type.
    #[serde(default)]
    pub relationship_type: Option<RelationshipType>,
}

impl EdgeFilter {
    /// True when the edge passes every present predicate.
    pub fn matches(&self, edge: &Edge) -> bool {
        if let Some(ref source) = self.source_id {
            if &edge.source_id != source {
                return false;
            }
        }
        if let Some(ref target) = self.target_id {
            if &edge.target_id != target {
                return false;
            }
        }
        if let Some(rel) = self.relationship_type {
            if edge.relationship_type != rel {
                return false;
            }
        }
        true
    }
}

/// Change query filter. Empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeFilter {
    /// Match changes about this target.
    #[serde(default)]
    pub target_id: Option<String>,
    /// Match one change type.
    #[serde(default)]
    pub change_type: Option<ChangeType>,
    /// Match one detection channel.
    #[serde(default)]
    pub detected_via: Option<DetectedVia>,
    /// Match one initiator class.
    #[serde(default)]
    pub initiator_type: Option<InitiatorType>,
    /// Only changes with `detected_at` ≥ this.
    #[serde(default)]
    pub since_ms: Option<i64>,
    /// Only changes with `detected_at` ≤ this.
    #[serde(default)]
    pub until_ms: Option<i64>,
}

impl ChangeFilter {
    /// Filter for one target's history.
    pub fn target(target_id: impl Into<String>) -> Self {
        Self {
            target_id: Some(target_id.into()),
            ..Self::default()
        }
    }

    /// True when the change passes every present predicate.
    pub fn matches(&self, change: &Change) -> bool {
        if let Some(ref target) = self.target_id {
            if &change.target_id != target {
                return false;
            }
        }
        if let Some(ct) = self.change_type {
            if change.change_type != ct {
                return false;
            }
        }
        if let Some(via) = self.detected_via {
            if change.detected_via != via {
                return false;
            }
        }
        if let Some(it) = self.initiator_type {
            if change.initiator_type != it {
                return false;
            }
        }
        if let Some(since) = self.since_ms {
            if change.detected_at < since {
                return false;
            }
        }
        if let Some(until) = self.until_ms {
            if change.detected_at > until {
                return false;
            }
        }
        true
    }
}

/// Default page size when the caller does not pass a limit.
pub const DEFAULT_PAGE_LIMIT: i64 = 100;
/// Hard ceiling on page size.
pub const MAX_PAGE_LIMIT: i64 = 1000;

/// Pagination request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageRequest {
    /// Requested page size; clamped to [1, 1000], default 100.
    #[serde(default)]
    pub limit: Option<i64>,
    /// Opaque cursor from a previous page.
    #[serde(default)]
    pub cursor: Option<String>,
}

impl PageRequest {
    /// First page with the default limit.
    pub fn first() -> Self {
        Self::default()
    }

    /// First page with an explicit limit.
    pub fn with_limit(limit: i64) -> Self {
        Self {
            limit: Some(limit),
            cursor: None,
        }
    }

    /// Continue from a cursor, keeping the same limit semantics.
    pub fn after(cursor: impl Into<String>) -> Self {
        Self {
            limit: None,
            cursor: Some(cursor.into()),
        }
    }

    /// The clamped effective limit: 0 and negatives become 1, values above
    /// the ceiling become the ceiling, absence becomes the default.
    pub fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT) as usize
    }
}

/// One page of query results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    /// Items on this page, in the store's deterministic order.
    pub items: Vec<T>,
    /// Total matches across all pages.
    pub total_count: u64,
    /// Whether another page exists.
    pub has_more: bool,
    /// Cursor for the next page, when `has_more`.
    pub next_cursor: Option<String>,
}

/// A visited subgraph returned by traversals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubGraph {
    /// Visited nodes.
    pub nodes: Vec<Node>,
    /// Edges between visited nodes.
    pub edges: Vec<Edge>,
}

impl SubGraph {
    /// True when the subgraph contains the node.
    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.iter().any(|n| &n.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::node::NodeInput;
    use serde_json::Value;

    fn make_node(name: &str, env: &str) -> Node {
        let mut tags = BTreeMap::new();
        tags.insert("env".to_string(), env.to_string());
        NodeInput {
            provider: Provider::Aws,
            account: "123".into(),
            region: "us-east-1".into(),
            resource_type: ResourceType::Database,
            native_id: name.into(),
            name: name.into(),
            status: NodeStatus::Running,
            tags,
            metadata: Value::Null,
            cost_monthly: None,
            owner: Some("platform-team".into()),
        }
        .into_node(1_000)
    }

    #[test]
    fn test_empty_filter_matches_all() {
        assert!(NodeFilter::default().matches(&make_node("db-1", "prod")));
    }

    #[test]
    fn test_tag_subset_match() {
        let mut filter = NodeFilter::default();
        filter
            .tag_match
            .insert("env".to_string(), "prod".to_string());
        assert!(filter.matches(&make_node("db-1", "prod")));
        assert!(!filter.matches(&make_node("db-2", "dev")));
    }

    #[test]
    fn test_name_prefix_and_owner_contains() {
        let filter = NodeFilter {
            name_prefix: Some("db-".into()),
            owner_contains: Some("PLATFORM".into()),
            ..NodeFilter::default()
        };
        assert!(filter.matches(&make_node("db-1", "prod")));
        assert!(!filter.matches(&make_node("cache-1", "prod")));
    }

    #[test]
    fn test_resource_type_set_match() {
        let filter = NodeFilter {
            resource_types: vec![ResourceType::Cache, ResourceType::Database],
            ..NodeFilter::default()
        };
        assert!(filter.matches(&make_node("db-1", "prod")));

        let only_cache = NodeFilter::resource_type(ResourceType::Cache);
        assert!(!only_cache.matches(&make_node("db-1", "prod")));
    }

    #[test]
    fn test_limit_clamping() {
        assert_eq!(PageRequest::with_limit(0).effective_limit(), 1);
        assert_eq!(PageRequest::with_limit(-5).effective_limit(), 1);
        assert_eq!(PageRequest::with_limit(5000).effective_limit(), 1000);
        assert_eq!(PageRequest::first().effective_limit(), 100);
    }

    #[test]
    fn test_change_filter_window() {
        let change = Change::new("n1", ChangeType::NodeUpdated, DetectedVia::Sync, 150);
        let filter = ChangeFilter {
            since_ms: Some(100),
            until_ms: Some(200),
            ..ChangeFilter::default()
        };
        assert!(filter.matches(&change));

        let outside = ChangeFilter {
            since_ms: Some(151),
            ..ChangeFilter::default()
        };
        assert!(!outside.matches(&change));
    }
}
