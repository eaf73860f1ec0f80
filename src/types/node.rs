//! Node types for the infrastructure graph.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Cloud provider of a discovered resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Amazon Web Services.
    Aws,
    /// Microsoft Azure.
    Azure,
    /// Google Cloud Platform.
    Gcp,
    /// Kubernetes clusters (any substrate).
    Kubernetes,
    /// Custom / on-prem inventory.
    Custom,
}

impl Provider {
    /// Parse provider from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "aws" => Some(Self::Aws),
            "azure" => Some(Self::Azure),
            "gcp" => Some(Self::Gcp),
            "kubernetes" | "k8s" => Some(Self::Kubernetes),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }

    /// Stable lowercase name used in ids and persisted rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::Azure => "azure",
            Self::Gcp => "gcp",
            Self::Kubernetes => "kubernetes",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of a discovered resource.
///
/// A closed enum: per-kind behavior lives in lookup tables keyed by this
/// type, never in per-kind subtypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceType {
    /// Virtual machines, instances.
    Compute,
    /// Managed databases.
    Database,
    /// Object / block storage.
    Storage,
    /// Managed caches.
    Cache,
    /// VPCs, subnets, peerings.
    Network,
    /// Message queues.
    Queue,
    /// Streaming topics / shards.
    Stream,
    /// Functions-as-a-service.
    Serverless,
    /// Container services and pods.
    Container,
    /// Edge locations.
    EdgeSite,
    /// Externally attached clusters.
    ConnectedCluster,
    /// Device / VM fleets.
    Fleet,
    /// Load balancers.
    LoadBalancer,
    /// DNS zones and records.
    Dns,
    /// IAM-ish identity resources.
    Identity,
    /// Monitors, alarms, dashboards.
    Monitor,
    /// Anything the adapters cannot classify.
    Other,
}

impl ResourceType {
    /// Parse resource type from its kebab-case name.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "compute" => Some(Self::Compute),
            "database" => Some(Self::Database),
            "storage" => Some(Self::Storage),
            "cache" => Some(Self::Cache),
            "network" => Some(Self::Network),
            "queue" => Some(Self::Queue),
            "stream" => Some(Self::Stream),
            "serverless" => Some(Self::Serverless),
            "container" => Some(Self::Container),
            "edge-site" => Some(Self::EdgeSite),
            "connected-cluster" => Some(Self::ConnectedCluster),
            "fleet" => Some(Self::Fleet),
            "load-balancer" => Some(Self::LoadBalancer),
            "dns" => Some(Self::Dns),
            "identity" => Some(Self::Identity),
            "monitor" => Some(Self::Monitor),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    /// Stable kebab-case name used in ids and persisted rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compute => "compute",
            Self::Database => "database",
            Self::Storage => "storage",
            Self::Cache => "cache",
            Self::Network => "network",
            Self::Queue => "queue",
            Self::Stream => "stream",
            Self::Serverless => "serverless",
            Self::Container => "container",
            Self::EdgeSite => "edge-site",
            Self::ConnectedCluster => "connected-cluster",
            Self::Fleet => "fleet",
            Self::LoadBalancer => "load-balancer",
            Self::Dns => "dns",
            Self::Identity => "identity",
            Self::Monitor => "monitor",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Observed lifecycle status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Resource is up.
    Running,
    /// Resource exists but is stopped.
    Stopped,
    /// Resource reports an error state.
    Error,
    /// Status could not be determined.
    Unknown,
}

impl NodeStatus {
    /// Parse status from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "running" => Some(Self::Running),
            "stopped" => Some(Self::Stopped),
            "error" => Some(Self::Error),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

impl Default for NodeStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unique identifier for a graph node.
///
/// Deterministically derived as `provider::region:resourceType:nativeId`,
/// so the same cloud resource always maps to the same node. Implements
/// `Ord` for the id-lexicographic iteration order all backends share.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    /// Derive the canonical id from the identity tuple.
    pub fn derive(
        provider: Provider,
        region: &str,
        resource_type: ResourceType,
        native_id: &str,
    ) -> Self {
        Self(format!(
            "{}::{}:{}:{}",
            provider.as_str(),
            region,
            resource_type.as_str(),
            native_id
        ))
    }

    /// Wrap an already-derived id (e.g. read back from storage).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for NodeId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl From<&str> for NodeId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

/// A discovered infrastructure resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Canonical id, immutable for the resource's lifetime.
    pub id: NodeId,
    /// Cloud provider.
    pub provider: Provider,
    /// Provider account / subscription / project.
    pub account: String,
    /// Provider region, or a provider-specific pseudo-region.
    pub region: String,
    /// Resource kind.
    pub resource_type: ResourceType,
    /// Provider-native identifier.
    pub native_id: String,
    /// Human-readable name.
    pub name: String,
    /// Observed status.
    pub status: NodeStatus,
    /// Resource tags.
    pub tags: BTreeMap<String, String>,
    /// Opaque provider metadata (configuration properties).
    pub metadata: Value,
    /// Estimated monthly cost in USD, when known.
    pub cost_monthly: Option<f64>,
    /// Owning team or principal.
    pub owner: Option<String>,
    /// Epoch-millisecond timestamp of first discovery.
    pub created_at: i64,
    /// Epoch-millisecond timestamp of the last sync that saw this node.
    pub last_synced_at: i64,
}

impl Node {
    /// Merge a re-discovered payload into this node.
    ///
    /// Identity fields and `created_at` are kept; everything observable is
    /// taken from `newer`.
    pub fn merge_from(&mut self, newer: &Node) {
        self.name = newer.name.clone();
        self.status = newer.status;
        self.account = newer.account.clone();
        self.region = newer.region.clone();
        self.owner = newer.owner.clone();
        self.tags = newer.tags.clone();
        self.metadata = newer.metadata.clone();
        self.cost_monthly = newer.cost_monthly;
        self.last_synced_at = newer.last_synced_at;
    }

    /// Compute field-level deltas against a newer payload.
    ///
    /// `last_synced_at` and `created_at` are bookkeeping, not observations,
    /// and never count as a delta. Cost changes are reported separately so
    /// the store can emit `cost-changed` instead of `node-updated`.
    pub fn diff_fields(&self, newer: &Node) -> NodeDelta {
        let mut changes = Vec::new();

        if self.name != newer.name {
            changes.push(FieldChange::new("name", &self.name, &newer.name));
        }
        if self.status != newer.status {
            changes.push(FieldChange::new(
                "status",
                self.status.as_str(),
                newer.status.as_str(),
            ));
        }
        if self.account != newer.account {
            changes.push(FieldChange::new("account", &self.account, &newer.account));
        }
        if self.region != newer.region {
            changes.push(FieldChange::new("region", &self.region, &newer.region));
        }
        if self.owner != newer.owner {
            changes.push(FieldChange {
                field: "owner".to_string(),
                previous: serde_json::json!(self.owner),
                new: serde_json::json!(newer.owner),
            });
        }
        if self.tags != newer.tags {
            changes.push(FieldChange {
                field: "tags".to_string(),
                previous: serde_json::json!(self.tags),
                new: serde_json::json!(newer.tags),
            });
        }
        if self.metadata != newer.metadata {
            changes.push(FieldChange {
                field: "metadata".to_string(),
                previous: self.metadata.clone(),
                new: newer.metadata.clone(),
            });
        }

        let cost_change = if self.cost_monthly != newer.cost_monthly {
            Some((self.cost_monthly, newer.cost_monthly))
        } else {
            None
        };

        NodeDelta {
            changes,
            cost_change,
        }
    }
}

// Nodes order by id so every backend iterates identically.
impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Node {}

impl PartialOrd for Node {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Node {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

/// One changed field, as recorded on a `node-updated` change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    /// Field name.
    pub field: String,
    /// Value before.
    pub previous: Value,
    /// Value after.
    pub new: Value,
}

impl FieldChange {
    fn new(field: &str, previous: &str, new: &str) -> Self {
        Self {
            field: field.to_string(),
            previous: Value::String(previous.to_string()),
            new: Value::String(new.to_string()),
        }
    }
}

/// Result of diffing an existing node against a re-discovered payload.
#[derive(Debug, Clone, Default)]
pub struct NodeDelta {
    /// Changed observable fields.
    pub changes: Vec<FieldChange>,
    /// `(previous, new)` monthly cost, when it moved.
    pub cost_change: Option<(Option<f64>, Option<f64>)>,
}

impl NodeDelta {
    /// True when the payload was observably identical.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.cost_change.is_none()
    }
}

/// Discovery payload emitted by cloud adapters.
///
/// Carries the identity tuple plus observations; the engine stamps
/// timestamps and derives the canonical id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInput {
    /// Cloud provider.
    pub provider: Provider,
    /// Provider account.
    pub account: String,
    /// Provider region.
    pub region: String,
    /// Resource kind.
    pub resource_type: ResourceType,
    /// Provider-native identifier.
    pub native_id: String,
    /// Human-readable name.
    pub name: String,
    /// Observed status.
    pub status: NodeStatus,
    /// Resource tags.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Opaque provider metadata.
    #[serde(default)]
    pub metadata: Value,
    /// Estimated monthly cost in USD.
    #[serde(default)]
    pub cost_monthly: Option<f64>,
    /// Owning team or principal.
    #[serde(default)]
    pub owner: Option<String>,
}

impl NodeInput {
    /// Canonical id this input resolves to.
    pub fn node_id(&self) -> NodeId {
        NodeId::derive(
            self.provider,
            &self.region,
            self.resource_type,
            &self.native_id,
        )
    }

    /// Materialize a full node, stamping both timestamps with `now_ms`.
    pub fn into_node(self, now_ms: i64) -> Node {
        let id = self.node_id();
        Node {
            id,
            provider: self.provider,
            account: self.account,
            region: self.region,
            resource_type: self.resource_type,
            native_id: self.native_id,
            name: self.name,
            status: self.status,
            tags: self.tags,
            metadata: self.metadata,
            cost_monthly: self.cost_monthly,
            owner: self.owner,
            created_at: now_ms,
            last_synced_at: now_ms,
        }
    }
}
