//! Tool registry: core capabilities as named, schema-described tools.
//!
//! Protocol-agnostic: every tool takes a JSON argument object and returns
//! a structured success/message/data result that never panics the caller.
//! The optional HTTP service is one consumer; RPC bridges are another.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::engine::GraphEngine;
use crate::governor::{AuditQuery, ChangeGovernor};
use crate::iql::{IqlError, IqlExecutor, EXAMPLE_QUERIES};
use crate::store::GraphStore;
use crate::temporal::TemporalStore;
use crate::types::{
    ChangeAction, Direction, NodeFilter, NodeId, PageRequest, Provider, SnapshotTrigger,
};

/// Structured result of one tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the invocation succeeded.
    pub success: bool,
    /// Human-readable summary or error message.
    pub message: String,
    /// Structured payload (null on failure unless noted).
    pub data: Value,
}

impl ToolResult {
    fn ok(message: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: Value::Null,
        }
    }

    fn err_with(message: impl Into<String>, data: Value) -> Self {
        Self {
            success: false,
            message: message.into(),
            data,
        }
    }
}

/// Description of one registered tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool name.
    pub name: String,
    /// What it does.
    pub description: String,
    /// JSON schema of the argument object.
    pub parameters: Value,
}

/// The tool registry over one engine/governor/temporal stack.
pub struct ToolRegistry<S: GraphStore> {
    engine: Arc<GraphEngine<S>>,
    governor: Arc<ChangeGovernor<S>>,
    temporal: Arc<TemporalStore<S>>,
    iql: IqlExecutor<S>,
}

impl<S: GraphStore + 'static> ToolRegistry<S> {
    /// Bind the core components into a registry.
    pub fn new(
        engine: Arc<GraphEngine<S>>,
        governor: Arc<ChangeGovernor<S>>,
        temporal: Arc<TemporalStore<S>>,
    ) -> Self {
        let iql = IqlExecutor::new(Arc::clone(engine.store()));
        Self {
            engine,
            governor,
            temporal,
            iql,
        }
    }

    /// Every registered tool with its parameter schema.
    pub fn list(&self) -> Vec<ToolSpec> {
        fn spec(name: &str, description: &str, properties: Value) -> ToolSpec {
            ToolSpec {
                name: name.to_string(),
                description: description.to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": properties,
                }),
            }
        }

        vec![
            spec(
                "query_nodes",
                "Query nodes with filters and cursor pagination",
                json!({
                    "provider": {"type": "string"},
                    "resource_type": {"type": "string"},
                    "status": {"type": "string"},
                    "name_prefix": {"type": "string"},
                    "limit": {"type": "integer"},
                    "cursor": {"type": "string"},
                }),
            ),
            spec(
                "get_node",
                "Fetch one node by id",
                json!({"id": {"type": "string"}}),
            ),
            spec(
                "get_neighbors",
                "BFS neighborhood of a node",
                json!({
                    "id": {"type": "string"},
                    "depth": {"type": "integer"},
                    "direction": {"type": "string", "enum": ["upstream", "downstream", "both"]},
                }),
            ),
            spec(
                "get_blast_radius",
                "Downstream reach and cost exposure of a node",
                json!({"id": {"type": "string"}, "depth": {"type": "integer"}}),
            ),
            spec("get_stats", "Graph totals and breakdowns", json!({})),
            spec(
                "get_cost_breakdown",
                "Monthly cost rollups by provider/type/region/account",
                json!({"provider": {"type": "string"}}),
            ),
            spec(
                "detect_drift",
                "Compare recorded state against live describes",
                json!({"provider": {"type": "string"}}),
            ),
            spec(
                "sync",
                "Run a discovery pass across registered adapters",
                json!({"providers": {"type": "array", "items": {"type": "string"}}}),
            ),
            spec(
                "run_iql",
                "Execute an IQL query",
                json!({"query": {"type": "string"}}),
            ),
            spec(
                "get_node_timeline",
                "Newest-first change history for a node",
                json!({"id": {"type": "string"}, "limit": {"type": "integer"}}),
            ),
            spec(
                "take_snapshot",
                "Capture a point-in-time snapshot of the graph",
                json!({"label": {"type": "string"}}),
            ),
            spec(
                "list_snapshots",
                "Snapshot metadata, newest first",
                json!({"limit": {"type": "integer"}}),
            ),
            spec(
                "get_topology_at",
                "Reconstruct the graph at a timestamp (snapshot + replay)",
                json!({"ts": {"type": "integer"}}),
            ),
            spec(
                "diff_snapshots",
                "Added/removed/changed nodes between two snapshots",
                json!({"from": {"type": "string"}, "to": {"type": "string"}}),
            ),
            spec(
                "get_pending_requests",
                "Change requests awaiting approval",
                json!({}),
            ),
            spec(
                "approve_request",
                "Approve a pending change request",
                json!({"id": {"type": "string"}, "approver": {"type": "string"}}),
            ),
            spec(
                "reject_request",
                "Reject a pending change request",
                json!({"id": {"type": "string"}, "reason": {"type": "string"}}),
            ),
            spec(
                "get_audit_trail",
                "Newest-first change request audit slice",
                json!({
                    "target_resource_id": {"type": "string"},
                    "action": {"type": "string"},
                    "limit": {"type": "integer"},
                }),
            ),
            spec(
                "get_governor_summary",
                "Governor totals by status, risk level, and action",
                json!({}),
            ),
            spec("health", "Adapter health checks", json!({})),
        ]
    }

    /// Invoke a tool by name. Unknown names and bad arguments come back as
    /// failed results, never errors or panics.
    pub async fn invoke(&self, name: &str, args: Value) -> ToolResult {
        match name {
            "query_nodes" => self.query_nodes(args).await,
            "get_node" => self.get_node(args).await,
            "get_neighbors" => self.get_neighbors(args).await,
            "get_blast_radius" => self.get_blast_radius(args).await,
            "get_stats" => self.get_stats().await,
            "get_cost_breakdown" => self.get_cost_breakdown(args).await,
            "detect_drift" => self.detect_drift(args).await,
            "sync" => self.sync(args).await,
            "run_iql" => self.run_iql(args).await,
            "get_node_timeline" => self.get_node_timeline(args).await,
            "take_snapshot" => self.take_snapshot(args).await,
            "list_snapshots" => self.list_snapshots(args).await,
            "get_topology_at" => self.get_topology_at(args).await,
            "diff_snapshots" => self.diff_snapshots(args).await,
            "get_pending_requests" => self.get_pending_requests().await,
            "approve_request" => self.approve_request(args).await,
            "reject_request" => self.reject_request(args).await,
            "get_audit_trail" => self.get_audit_trail(args).await,
            "get_governor_summary" => self.get_governor_summary().await,
            "health" => self.health().await,
            other => ToolResult::err(format!("unknown tool '{other}'")),
        }
    }

    fn str_arg(args: &Value, key: &str) -> Option<String> {
        args.get(key).and_then(Value::as_str).map(str::to_string)
    }

    fn required_str(args: &Value, key: &str) -> Result<String, ToolResult> {
        Self::str_arg(args, key)
            .ok_or_else(|| ToolResult::err(format!("missing required argument '{key}'")))
    }

    fn node_filter(args: &Value) -> NodeFilter {
        let mut filter = NodeFilter::default();
        filter.provider = Self::str_arg(args, "provider")
            .as_deref()
            .and_then(Provider::from_str);
        if let Some(rt) = Self::str_arg(args, "resource_type")
            .as_deref()
            .and_then(crate::types::ResourceType::from_str)
        {
            filter.resource_types.push(rt);
        }
        if let Some(status) = Self::str_arg(args, "status")
            .as_deref()
            .and_then(crate::types::NodeStatus::from_str)
        {
            filter.statuses.push(status);
        }
        filter.name_prefix = Self::str_arg(args, "name_prefix");
        filter
    }

    async fn query_nodes(&self, args: Value) -> ToolResult {
        let filter = Self::node_filter(&args);
        let page = PageRequest {
            limit: args.get("limit").and_then(Value::as_i64),
            cursor: Self::str_arg(&args, "cursor"),
        };
        match self
            .engine
            .store()
            .query_nodes_paginated(&filter, &page)
            .await
        {
            Ok(page) => ToolResult::ok(
                format!("{} of {} nodes", page.items.len(), page.total_count),
                json!(page),
            ),
            Err(err) => ToolResult::err(err.to_string()),
        }
    }

    async fn get_node(&self, args: Value) -> ToolResult {
        let id = match Self::required_str(&args, "id") {
            Ok(id) => NodeId::from_raw(id),
            Err(result) => return result,
        };
        match self.engine.store().get_node(&id).await {
            Ok(Some(node)) => ToolResult::ok("node found", json!(node)),
            Ok(None) => ToolResult::err(format!("node '{id}' not found")),
            Err(err) => ToolResult::err(err.to_string()),
        }
    }

    async fn get_neighbors(&self, args: Value) -> ToolResult {
        let id = match Self::required_str(&args, "id") {
            Ok(id) => NodeId::from_raw(id),
            Err(result) => return result,
        };
        let depth = args.get("depth").and_then(Value::as_u64).unwrap_or(2) as u32;
        let direction = Self::str_arg(&args, "direction")
            .as_deref()
            .and_then(Direction::from_str)
            .unwrap_or(Direction::Both);
        match self.engine.store().get_neighbors(&id, depth, direction).await {
            Ok(subgraph) => ToolResult::ok(
                format!(
                    "{} nodes, {} edges",
                    subgraph.nodes.len(),
                    subgraph.edges.len()
                ),
                json!(subgraph),
            ),
            Err(err) => ToolResult::err(err.to_string()),
        }
    }

    async fn get_blast_radius(&self, args: Value) -> ToolResult {
        let id = match Self::required_str(&args, "id") {
            Ok(id) => NodeId::from_raw(id),
            Err(result) => return result,
        };
        let depth = args.get("depth").and_then(Value::as_u64).unwrap_or(3) as u32;
        match self.engine.get_blast_radius(&id, depth).await {
            Ok(blast) => ToolResult::ok(
                format!(
                    "{} affected nodes, ${:.2}/month exposed",
                    blast.affected_count(),
                    blast.total_cost_monthly
                ),
                json!(blast),
            ),
            Err(err) => ToolResult::err(err.to_string()),
        }
    }

    async fn get_stats(&self) -> ToolResult {
        match self.engine.get_stats().await {
            Ok(stats) => ToolResult::ok(
                format!("{} nodes, {} edges", stats.total_nodes, stats.total_edges),
                json!(stats),
            ),
            Err(err) => ToolResult::err(err.to_string()),
        }
    }

    async fn get_cost_breakdown(&self, args: Value) -> ToolResult {
        let filter = Self::node_filter(&args);
        match self.engine.get_cost_by_filter(&filter).await {
            Ok(breakdown) => ToolResult::ok(
                format!("${:.2}/month total", breakdown.total_monthly),
                json!(breakdown),
            ),
            Err(err) => ToolResult::err(err.to_string()),
        }
    }

    async fn detect_drift(&self, args: Value) -> ToolResult {
        let provider = Self::str_arg(&args, "provider")
            .as_deref()
            .and_then(Provider::from_str);
        match self.engine.detect_drift(provider).await {
            Ok(report) => ToolResult::ok(
                format!(
                    "{} drifted, {} disappeared",
                    report.drifted_nodes.len(),
                    report.disappeared_nodes.len()
                ),
                json!(report),
            ),
            Err(err) => ToolResult::err(err.to_string()),
        }
    }

    async fn sync(&self, args: Value) -> ToolResult {
        let providers = args.get("providers").and_then(Value::as_array).map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect::<Vec<_>>()
        });
        let opts = crate::engine::SyncOptions {
            providers,
            ..Default::default()
        };
        match self.engine.sync(&opts).await {
            Ok(records) => ToolResult::ok(
                format!("{} sync records", records.len()),
                json!(records),
            ),
            Err(err) => ToolResult::err(err.to_string()),
        }
    }

    async fn run_iql(&self, args: Value) -> ToolResult {
        let query = match Self::required_str(&args, "query") {
            Ok(query) => query,
            Err(result) => return result,
        };
        match self.iql.run(&query).await {
            Ok(result) => ToolResult::ok("query executed", json!(result)),
            Err(IqlError::Syntax { message, offset }) => ToolResult::err_with(
                format!("syntax error at offset {offset}: {message}"),
                json!({
                    "offset": offset,
                    "examples": EXAMPLE_QUERIES,
                }),
            ),
            Err(err) => ToolResult::err(err.to_string()),
        }
    }

    async fn get_node_timeline(&self, args: Value) -> ToolResult {
        let id = match Self::required_str(&args, "id") {
            Ok(id) => id,
            Err(result) => return result,
        };
        let limit = args.get("limit").and_then(Value::as_u64).unwrap_or(50) as usize;
        match self.engine.store().get_node_timeline(&id, limit).await {
            Ok(changes) => {
                ToolResult::ok(format!("{} changes", changes.len()), json!(changes))
            }
            Err(err) => ToolResult::err(err.to_string()),
        }
    }

    async fn take_snapshot(&self, args: Value) -> ToolResult {
        let label = Self::str_arg(&args, "label");
        match self
            .temporal
            .take_snapshot(SnapshotTrigger::Manual, label)
            .await
        {
            Ok(meta) => ToolResult::ok(format!("snapshot {}", meta.id), json!(meta)),
            Err(err) => ToolResult::err(err.to_string()),
        }
    }

    async fn list_snapshots(&self, args: Value) -> ToolResult {
        let limit = args.get("limit").and_then(Value::as_u64).unwrap_or(20) as usize;
        match self.temporal.list_snapshots(limit).await {
            Ok(metas) => ToolResult::ok(format!("{} snapshots", metas.len()), json!(metas)),
            Err(err) => ToolResult::err(err.to_string()),
        }
    }

    async fn get_topology_at(&self, args: Value) -> ToolResult {
        let ts = match args.get("ts").and_then(Value::as_i64) {
            Some(ts) => ts,
            None => return ToolResult::err("missing required argument 'ts'"),
        };
        match self.temporal.get_topology_at(ts, None).await {
            Ok(subgraph) => ToolResult::ok(
                format!(
                    "{} nodes, {} edges at {ts}",
                    subgraph.nodes.len(),
                    subgraph.edges.len()
                ),
                json!(subgraph),
            ),
            Err(err) => ToolResult::err(err.to_string()),
        }
    }

    async fn diff_snapshots(&self, args: Value) -> ToolResult {
        let from = match Self::required_str(&args, "from") {
            Ok(from) => from,
            Err(result) => return result,
        };
        let to = match Self::required_str(&args, "to") {
            Ok(to) => to,
            Err(result) => return result,
        };
        match self.temporal.diff_snapshots(&from, &to).await {
            Ok(diff) => ToolResult::ok(
                format!(
                    "{} added, {} removed, {} changed",
                    diff.added_nodes.len(),
                    diff.removed_nodes.len(),
                    diff.changed_nodes.len()
                ),
                json!(diff),
            ),
            Err(err) => ToolResult::err(err.to_string()),
        }
    }

    async fn get_pending_requests(&self) -> ToolResult {
        let pending = self.governor.get_pending_requests();
        ToolResult::ok(format!("{} pending", pending.len()), json!(pending))
    }

    async fn approve_request(&self, args: Value) -> ToolResult {
        let id = match Self::required_str(&args, "id") {
            Ok(id) => id,
            Err(result) => return result,
        };
        let approver =
            Self::str_arg(&args, "approver").unwrap_or_else(|| "unknown".to_string());
        match self.governor.approve(&id, approver).await {
            Ok(request) => ToolResult::ok("approved", json!(request)),
            Err(err) => ToolResult::err(err.to_string()),
        }
    }

    async fn reject_request(&self, args: Value) -> ToolResult {
        let id = match Self::required_str(&args, "id") {
            Ok(id) => id,
            Err(result) => return result,
        };
        let reason =
            Self::str_arg(&args, "reason").unwrap_or_else(|| "rejected by operator".to_string());
        match self.governor.reject(&id, reason).await {
            Ok(request) => ToolResult::ok("rejected", json!(request)),
            Err(err) => ToolResult::err(err.to_string()),
        }
    }

    async fn get_audit_trail(&self, args: Value) -> ToolResult {
        let query = AuditQuery {
            target_resource_id: Self::str_arg(&args, "target_resource_id"),
            action: Self::str_arg(&args, "action")
                .as_deref()
                .and_then(ChangeAction::from_str),
            limit: args.get("limit").and_then(Value::as_u64).map(|n| n as usize),
        };
        match self.governor.get_audit_trail(&query).await {
            Ok(trail) => ToolResult::ok(format!("{} entries", trail.len()), json!(trail)),
            Err(err) => ToolResult::err(err.to_string()),
        }
    }

    async fn get_governor_summary(&self) -> ToolResult {
        match self.governor.get_summary().await {
            Ok(summary) => ToolResult::ok(
                format!("{} requests recorded", summary.total),
                json!(summary),
            ),
            Err(err) => ToolResult::err(err.to_string()),
        }
    }

    async fn health(&self) -> ToolResult {
        let health = self.engine.health().await;
        let ok = health.values().all(|h| h.ok);
        ToolResult {
            success: ok,
            message: if ok {
                "all adapters healthy".to_string()
            } else {
                "one or more adapters unhealthy".to_string()
            },
            data: json!(health),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SyncConfig;
    use crate::governor::GovernorConfig;
    use crate::store::InMemoryGraphStore;
    use crate::types::{NodeInput, NodeStatus, ResourceType};

    async fn registry() -> ToolRegistry<InMemoryGraphStore> {
        let store = Arc::new(InMemoryGraphStore::new());
        store
            .upsert_nodes(&[NodeInput {
                provider: Provider::Aws,
                account: "123".into(),
                region: "us-east-1".into(),
                resource_type: ResourceType::Database,
                native_id: "db-1".into(),
                name: "orders-db".into(),
                status: NodeStatus::Running,
                tags: Default::default(),
                metadata: Value::Null,
                cost_monthly: Some(120.0),
                owner: None,
            }
            .into_node(1_000)])
            .await
            .unwrap();

        let engine = Arc::new(GraphEngine::new(Arc::clone(&store), SyncConfig::default()));
        let governor = Arc::new(ChangeGovernor::new(
            Arc::clone(&store),
            GovernorConfig::default(),
        ));
        let temporal = Arc::new(TemporalStore::new(store));
        ToolRegistry::new(engine, governor, temporal)
    }

    #[tokio::test]
    async fn test_list_names_are_unique() {
        let registry = registry().await;
        let specs = registry.list();
        let mut names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        let total = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), total);
        assert!(total >= 15);
    }

    #[tokio::test]
    async fn test_query_nodes_tool() {
        let registry = registry().await;
        let result = registry
            .invoke("query_nodes", json!({"resource_type": "database"}))
            .await;
        assert!(result.success);
        assert_eq!(result.data["totalCount"].as_u64(), None); // snake_case fields
        assert_eq!(result.data["total_count"].as_u64(), Some(1));
    }

    #[tokio::test]
    async fn test_unknown_tool_fails_softly() {
        let registry = registry().await;
        let result = registry.invoke("frobnicate", json!({})).await;
        assert!(!result.success);
        assert!(result.message.contains("unknown tool"));
    }

    #[tokio::test]
    async fn test_iql_syntax_error_carries_examples() {
        let registry = registry().await;
        let result = registry
            .invoke("run_iql", json!({"query": "FETCH all the things"}))
            .await;
        assert!(!result.success);
        assert!(result.data["examples"].as_array().is_some());
        assert!(result.data["offset"].is_number());
    }

    #[tokio::test]
    async fn test_missing_argument_fails_softly() {
        let registry = registry().await;
        let result = registry.invoke("get_node", json!({})).await;
        assert!(!result.success);
        assert!(result.message.contains("missing required argument"));
    }
}
