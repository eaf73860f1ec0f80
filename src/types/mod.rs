//! Core data model for the infrastructure graph.

pub mod change;
pub mod edge;
pub mod event;
pub mod filter;
pub mod group;
pub mod node;
pub mod plan;
pub mod request;
pub mod snapshot;
pub mod stats;
pub mod sync;

pub use change::{Change, ChangeType, DetectedVia, InitiatorType};
pub use edge::{DiscoveredVia, Edge, EdgeId, RelationshipType};
pub use event::CloudEvent;
pub use filter::{
    ChangeFilter, Direction, EdgeFilter, NodeFilter, Page, PageRequest, SubGraph,
    DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT,
};
pub use group::{Group, GroupType};
pub use node::{
    FieldChange, Node, NodeDelta, NodeId, NodeInput, NodeStatus, Provider, ResourceType,
};
pub use plan::{Execution, Plan, PlannedResource, ProvisionedResource};
pub use request::{
    ChangeAction, ChangeRequest, ChangeRequestDraft, RequestStatus, Risk, RiskLevel,
};
pub use snapshot::{GraphSnapshot, SnapshotMeta, SnapshotTrigger};
pub use stats::GraphStats;
pub use sync::{SyncRecord, SyncStatus};
