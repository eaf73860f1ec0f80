//! Append-only change records.
//!
//! Changes are the audit and time-travel log: once appended they are never
//! mutated or removed. Total order is (detected_at, id).

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// What happened to the target entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeType {
    /// Node first discovered.
    NodeCreated,
    /// Observable node field changed.
    NodeUpdated,
    /// Node removed from the graph.
    NodeDeleted,
    /// Node drifted from recorded state.
    NodeDrifted,
    /// Node vanished from the provider (two-miss confirmed).
    NodeDisappeared,
    /// Monthly cost estimate moved.
    CostChanged,
    /// Edge first discovered.
    EdgeCreated,
    /// Edge removed.
    EdgeDeleted,
}

impl ChangeType {
    /// Parse change type from its kebab-case name.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "node-created" => Some(Self::NodeCreated),
            "node-updated" => Some(Self::NodeUpdated),
            "node-deleted" => Some(Self::NodeDeleted),
            "node-drifted" => Some(Self::NodeDrifted),
            "node-disappeared" => Some(Self::NodeDisappeared),
            "cost-changed" => Some(Self::CostChanged),
            "edge-created" => Some(Self::EdgeCreated),
            "edge-deleted" => Some(Self::EdgeDeleted),
            _ => None,
        }
    }

    /// Stable kebab-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NodeCreated => "node-created",
            Self::NodeUpdated => "node-updated",
            Self::NodeDeleted => "node-deleted",
            Self::NodeDrifted => "node-drifted",
            Self::NodeDisappeared => "node-disappeared",
            Self::CostChanged => "cost-changed",
            Self::EdgeCreated => "edge-created",
            Self::EdgeDeleted => "edge-deleted",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Channel through which a change was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectedVia {
    /// Regular discovery pass.
    Sync,
    /// Exhaustive re-scan.
    FullScan,
    /// Provider audit/event stream.
    EventStream,
    /// Manual entry.
    Manual,
}

impl DetectedVia {
    /// Parse detection channel from its kebab-case name.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "sync" => Some(Self::Sync),
            "full-scan" => Some(Self::FullScan),
            "event-stream" => Some(Self::EventStream),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }

    /// Stable kebab-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::FullScan => "full-scan",
            Self::EventStream => "event-stream",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for DetectedVia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Who initiated the underlying mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitiatorType {
    /// A human operator.
    Human,
    /// An autonomous agent.
    Agent,
    /// This system itself.
    System,
    /// Could not be attributed.
    Unknown,
}

impl InitiatorType {
    /// Parse initiator type from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "human" => Some(Self::Human),
            "agent" => Some(Self::Agent),
            "system" => Some(Self::System),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Agent => "agent",
            Self::System => "system",
            Self::Unknown => "unknown",
        }
    }
}

impl Default for InitiatorType {
    fn default() -> Self {
        Self::Unknown
    }
}

impl fmt::Display for InitiatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One append-only change event against a node or edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    /// Unique id.
    pub id: String,
    /// Id of the node or edge this change is about.
    pub target_id: String,
    /// What happened.
    pub change_type: ChangeType,
    /// Changed field, for update-shaped changes.
    #[serde(default)]
    pub field: Option<String>,
    /// Value before, for update-shaped changes.
    #[serde(default)]
    pub previous_value: Option<Value>,
    /// Value after, for update-shaped changes.
    #[serde(default)]
    pub new_value: Option<Value>,
    /// Epoch-millisecond detection timestamp.
    pub detected_at: i64,
    /// Detection channel.
    pub detected_via: DetectedVia,
    /// Id of the governor request that authorized this change, when any.
    #[serde(default)]
    pub correlation_id: Option<String>,
    /// Initiating principal, when known.
    #[serde(default)]
    pub initiator: Option<String>,
    /// Class of the initiator.
    #[serde(default)]
    pub initiator_type: InitiatorType,
    /// Opaque extra context.
    #[serde(default)]
    pub metadata: Value,
}

impl Change {
    /// Create a change with a fresh id and the given detection timestamp.
    pub fn new(
        target_id: impl Into<String>,
        change_type: ChangeType,
        detected_via: DetectedVia,
        detected_at: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            target_id: target_id.into(),
            change_type,
            field: None,
            previous_value: None,
            new_value: None,
            detected_at,
            detected_via,
            correlation_id: None,
            initiator: None,
            initiator_type: InitiatorType::System,
            metadata: Value::Null,
        }
    }

    /// Record the field-level delta this change captures.
    pub fn with_delta(
        mut self,
        field: impl Into<String>,
        previous: Value,
        new: Value,
    ) -> Self {
        self.field = Some(field.into());
        self.previous_value = Some(previous);
        self.new_value = Some(new);
        self
    }

    /// Attribute the change to an initiator.
    pub fn with_initiator(
        mut self,
        initiator: impl Into<String>,
        initiator_type: InitiatorType,
    ) -> Self {
        self.initiator = Some(initiator.into());
        self.initiator_type = initiator_type;
        self
    }

    /// Mark the initiator class without naming a principal.
    pub fn with_initiator_type(mut self, initiator_type: InitiatorType) -> Self {
        self.initiator_type = initiator_type;
        self
    }

    /// Link this change to the governor request that authorized it.
    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Attach metadata.
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// True for change types that describe a mutation of the target.
    pub fn is_mutation(&self) -> bool {
        !matches!(self.change_type, ChangeType::NodeDrifted)
    }
}

// Total order: detected_at, then id.
impl PartialEq for Change {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Change {}

impl PartialOrd for Change {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Change {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.detected_at
            .cmp(&other.detected_at)
            .then_with(|| self.id.cmp(&other.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_ordering_by_time_then_id() {
        let mut a = Change::new("n1", ChangeType::NodeCreated, DetectedVia::Sync, 100);
        let mut b = Change::new("n1", ChangeType::NodeUpdated, DetectedVia::Sync, 200);
        assert!(a < b);

        // Same timestamp: id breaks the tie deterministically.
        a.detected_at = 200;
        b.detected_at = 200;
        a.id = "aaa".to_string();
        b.id = "bbb".to_string();
        assert!(a < b);
    }

    #[test]
    fn test_builder_sets_delta() {
        let c = Change::new("n1", ChangeType::NodeUpdated, DetectedVia::Sync, 1).with_delta(
            "status",
            Value::String("running".into()),
            Value::String("stopped".into()),
        );
        assert_eq!(c.field.as_deref(), Some("status"));
        assert_eq!(c.previous_value, Some(Value::String("running".into())));
    }

    #[test]
    fn test_change_type_round_trip() {
        for ct in [
            ChangeType::NodeCreated,
            ChangeType::NodeDisappeared,
            ChangeType::CostChanged,
            ChangeType::EdgeDeleted,
        ] {
            assert_eq!(ChangeType::from_str(ct.as_str()), Some(ct));
        }
    }
}
