//! # cloudgraph
//!
//! Multi-cloud infrastructure knowledge graph and reconciliation platform.
//!
//! cloudgraph continuously discovers resources across cloud providers,
//! records them in a typed graph with provenance and history, detects
//! drift and anomalies against intended state, and drives corrective
//! actions through a governed change pipeline.
//!
//! ## Architecture
//!
//! ```text
//! Cloud Adapters → Graph Engine → Graph Store ⇄ Temporal Store ⇄ IQL
//!                       ↑                ↓
//!                Monitor Loop      Change Governor ← Reconciler
//! ```
//!
//! - [`store`] — one typed, cursor-paginated storage contract with
//!   in-memory, sled, and PostgreSQL backends
//! - [`temporal`] — snapshots and time travel via change replay
//! - [`adapter`] — the uniform discover/describe/mutate provider shape
//! - [`iql`] — a small declarative query language over the graph
//! - [`engine`] — sync orchestration, blast radius, drift, cost rollups
//! - [`governor`] — risk scoring, policy evaluation, approval, audit
//! - [`reconcile`] — plan-vs-actual diffing and governed remediation
//! - [`monitor`] — scheduled sync, event ingestion, alert rules, dispatch
//! - [`tools`] — the capability surface for external callers
//!
//! ## Determinism
//!
//! All backends iterate in id-lexicographic order, cursors are stable for
//! a fixed filter, BFS tie-breaks equal-depth neighbors by node id, and
//! change timestamps are monotonic per emitting component. The same graph
//! state always pages, traverses, and fingerprints identically.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapter;
pub mod clock;
pub mod engine;
pub mod governor;
pub mod iql;
pub mod monitor;
pub mod reconcile;
pub mod store;
pub mod temporal;
pub mod tools;
pub mod types;

#[cfg(feature = "service")]
pub mod service;

// Re-exports
pub use adapter::{AdapterError, AdapterHealth, CloudAdapter, DiscoverScope, Discovery, EventSource};
pub use engine::{BlastRadius, DriftReport, EngineError, GraphEngine, SyncConfig, SyncOptions};
pub use governor::{ChangeGovernor, GovernorConfig, GovernorError, Policy, Verdict};
pub use iql::{IqlError, IqlExecutor, QueryResult};
pub use monitor::{Alert, AlertCategory, AlertRule, AlertSeverity, Monitor, MonitorConfig};
pub use reconcile::{
    ReconcileOptions, ReconcileResult, Reconciler, ReconcilerConfig, RemediationAction,
};
pub use store::{GraphStore, InMemoryGraphStore, SledGraphStore, StoreError};
pub use temporal::{TemporalStore, TopologyDiff};
pub use tools::{ToolRegistry, ToolResult, ToolSpec};
pub use types::{
    Change, ChangeRequest, ChangeType, Edge, EdgeId, GraphStats, Node, NodeFilter, NodeId,
    NodeInput, Provider, ResourceType,
};

#[cfg(feature = "postgres")]
pub use store::{PostgresConfig, PostgresGraphStore};

#[cfg(feature = "service")]
pub use service::{create_router, ServiceState};

/// Schema version for all persisted graph types.
/// Increment on breaking changes to any stored shape.
pub const GRAPH_SCHEMA_VERSION: &str = "1.0.0";
