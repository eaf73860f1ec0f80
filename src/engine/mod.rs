//! Graph engine: sync orchestration and high-level queries.
//!
//! The engine drives registered cloud adapters through discovery passes,
//! lands their output in the graph store (nodes before edges, adapters in
//! dependency order), confirms disappearances with the two-miss rule, and
//! exposes blast-radius, drift, and cost queries on top of the store.

pub mod blast;
pub mod cost;
pub mod drift;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::adapter::{with_retry, AdapterError, AdapterHealth, CloudAdapter, DiscoverScope, RetryPolicy};
use crate::clock::MonotonicClock;
use crate::store::{GraphStore, StoreError};
use crate::types::{
    Change, ChangeType, DetectedVia, Direction, GraphStats, Node, NodeFilter, NodeId, Provider,
    SubGraph, SyncRecord, SyncStatus,
};

pub use blast::{BlastRadius, HopBucket};
pub use cost::CostBreakdown;
pub use drift::{DriftReport, DriftedNode, PropertyDelta, Severity, CRITICAL_FIELDS};

/// Consecutive describe-misses before a node is declared disappeared.
///
/// Fixed in v1; revisit only if short discovery blips prove common.
pub const DISAPPEARANCE_MISSES: u32 = 2;

/// Error type for engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Underlying store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// Adapter failure that aborted the operation.
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),
    /// Named adapter is not registered.
    #[error("unknown adapter: {0}")]
    UnknownAdapter(String),
    /// Adapter dependency declarations form a cycle.
    #[error("adapter dependency cycle involving: {0}")]
    DependencyCycle(String),
    /// Referenced node does not exist.
    #[error("node not found: {0}")]
    NodeNotFound(String),
}

/// Sync orchestration settings.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Concurrent discoveries per dependency layer.
    pub fan_out: usize,
    /// Deadline per adapter call.
    pub adapter_timeout: Duration,
    /// Backoff policy for transient adapter failures.
    pub retry: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fan_out: 4,
            adapter_timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
        }
    }
}

impl SyncConfig {
    /// Load from `SYNC_FAN_OUT` / `SYNC_ADAPTER_TIMEOUT_SECS` with
    /// production defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            fan_out: std::env::var("SYNC_FAN_OUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.fan_out),
            adapter_timeout: std::env::var("SYNC_ADAPTER_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.adapter_timeout),
            retry: RetryPolicy::default(),
        }
    }
}

/// Per-call sync options.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Restrict to these adapter names; `None` = all registered.
    pub providers: Option<Vec<String>>,
    /// Cooperative cancellation; partial progress stays durable and the
    /// record is marked `partial`.
    pub cancel: CancellationToken,
}

impl SyncOptions {
    /// Sync only the named adapters.
    pub fn providers(names: &[&str]) -> Self {
        Self {
            providers: Some(names.iter().map(|s| s.to_string()).collect()),
            ..Self::default()
        }
    }
}

/// The graph engine.
pub struct GraphEngine<S: GraphStore> {
    store: Arc<S>,
    adapters: Vec<Arc<dyn CloudAdapter>>,
    config: SyncConfig,
    clock: MonotonicClock,
    /// Consecutive describe-miss counts per node (two-miss rule).
    miss_counts: Mutex<HashMap<NodeId, u32>>,
    /// Stats memo, valid until the next sync.
    stats_cache: Mutex<Option<GraphStats>>,
}

impl<S: GraphStore + 'static> GraphEngine<S> {
    /// Create an engine over a store.
    pub fn new(store: Arc<S>, config: SyncConfig) -> Self {
        Self {
            store,
            adapters: Vec::new(),
            config,
            clock: MonotonicClock::new(),
            miss_counts: Mutex::new(HashMap::new()),
            stats_cache: Mutex::new(None),
        }
    }

    /// Register a cloud adapter. Names must be unique.
    pub fn register_adapter(&mut self, adapter: Arc<dyn CloudAdapter>) {
        self.adapters.push(adapter);
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Registered adapter names.
    pub fn adapter_names(&self) -> Vec<String> {
        self.adapters.iter().map(|a| a.name().to_string()).collect()
    }

    /// Find the first adapter covering a provider.
    pub fn adapter_for(&self, provider: Provider) -> Option<Arc<dyn CloudAdapter>> {
        self.adapters
            .iter()
            .find(|a| a.provider() == provider)
            .cloned()
    }

    /// Run one discovery pass across the selected adapters.
    ///
    /// Adapters run layer by layer in dependency order, concurrently within
    /// a layer (bounded by `fan_out`). Per-resource failures are contained
    /// in the sync record; structural failures mark the record failed and
    /// the pass moves on to the next adapter.
    pub async fn sync(&self, opts: &SyncOptions) -> Result<Vec<SyncRecord>, EngineError> {
        let selected = self.select_adapters(opts)?;
        let layers = topo_layers(&selected)?;
        let semaphore = Arc::new(Semaphore::new(self.config.fan_out.max(1)));
        let mut records = Vec::new();

        for layer in layers {
            let mut handles = Vec::new();
            for adapter in layer {
                if opts.cancel.is_cancelled() {
                    break;
                }
                let permit = Arc::clone(&semaphore);
                let this = self;
                let cancel = opts.cancel.clone();
                handles.push(async move {
                    // Bound concurrent discoveries. The semaphore is never
                    // closed, so acquisition cannot fail.
                    let _permit = permit.acquire_owned().await.ok();
                    this.sync_one(adapter, cancel).await
                });
            }
            // A layer is a barrier: downstream adapters may reference these
            // nodes, so the whole layer lands before the next starts.
            for result in futures::future::join_all(handles).await {
                records.push(result?);
            }
        }

        // Stats memo is only valid until the graph changes.
        *self.stats_cache.lock() = None;

        Ok(records)
    }

    async fn sync_one(
        &self,
        adapter: Arc<dyn CloudAdapter>,
        cancel: CancellationToken,
    ) -> Result<SyncRecord, EngineError> {
        let provider = adapter.provider();
        let mut record = SyncRecord::start(provider, self.clock.now_ms());
        self.store.save_sync_record(&record).await?;
        tracing::info!(adapter = adapter.name(), sync_id = %record.id, "sync started");

        let scope = DiscoverScope::default();
        let discovery = tokio::select! {
            _ = cancel.cancelled() => {
                record.finish(SyncStatus::Partial, self.clock.now_ms());
                record.error = Some("cancelled before discovery".to_string());
                self.store.save_sync_record(&record).await?;
                return Ok(record);
            }
            result = self.adapter_call(adapter.name(), "discover", || adapter.discover(&scope)) => {
                match result {
                    Ok(discovery) => discovery,
                    Err(err) => {
                        tracing::error!(adapter = adapter.name(), error = %err, "discovery failed");
                        record.fail(err.to_string(), self.clock.now_ms());
                        self.store.save_sync_record(&record).await?;
                        return Ok(record);
                    }
                }
            }
        };

        let known = self
            .store
            .query_nodes(&NodeFilter::provider(provider))
            .await?;

        // Nodes land before any edge referencing them, in id order.
        let now = self.clock.now_ms();
        let mut nodes: Vec<Node> = discovery
            .nodes
            .iter()
            .cloned()
            .map(|input| input.into_node(now))
            .collect();
        nodes.sort();
        let seen: BTreeSet<NodeId> = nodes.iter().map(|n| n.id.clone()).collect();
        let outcome = self.store.upsert_nodes(&nodes).await?;
        record.nodes_discovered = nodes.len() as u64;
        record.nodes_drifted = outcome.updated as u64;

        // Re-discovered nodes are alive again.
        {
            let mut misses = self.miss_counts.lock();
            for id in &seen {
                misses.remove(id);
            }
        }

        let mut contained_errors: Vec<String> = Vec::new();

        let mut edges = discovery.edges.clone();
        edges.sort();
        for edge in &edges {
            match self.store.upsert_edges(std::slice::from_ref(edge)).await {
                Ok(_) => {}
                Err(StoreError::DanglingEdge { edge, missing }) => {
                    // Contained: the endpoint may belong to an adapter that
                    // has not run yet or a resource that is gone.
                    tracing::warn!(%edge, %missing, "skipping dangling edge");
                    contained_errors.push(format!("dangling edge {edge}"));
                }
                Err(err) => return Err(err.into()),
            }
        }

        // Two-miss disappearance: describe every known node this pass did
        // not see, and only declare it gone on the second consecutive miss.
        for node in known {
            if seen.contains(&node.id) {
                continue;
            }
            if cancel.is_cancelled() {
                record.finish(SyncStatus::Partial, self.clock.now_ms());
                record.error = Some("cancelled during disappearance check".to_string());
                self.store.save_sync_record(&record).await?;
                return Ok(record);
            }

            let described = self
                .adapter_call(adapter.name(), "describe", || {
                    adapter.describe(&node.native_id, node.resource_type)
                })
                .await;
            match described {
                Ok(Some(_)) => {
                    // Still there; discovery scope just missed it.
                    self.miss_counts.lock().remove(&node.id);
                }
                Ok(None) => {
                    let misses = {
                        let mut counts = self.miss_counts.lock();
                        let entry = counts.entry(node.id.clone()).or_insert(0);
                        *entry += 1;
                        *entry
                    };
                    if misses >= DISAPPEARANCE_MISSES {
                        self.confirm_disappearance(&node).await?;
                        record.nodes_disappeared += 1;
                        self.miss_counts.lock().remove(&node.id);
                    }
                }
                Err(err) => {
                    tracing::warn!(node = %node.id, error = %err, "describe failed, miss not counted");
                    contained_errors.push(format!("{}: {err}", node.id));
                }
            }
        }

        if contained_errors.is_empty() {
            record.finish(SyncStatus::Completed, self.clock.now_ms());
        } else {
            record.finish(SyncStatus::Partial, self.clock.now_ms());
            record.error = Some(contained_errors.join("; "));
        }
        self.store.save_sync_record(&record).await?;
        tracing::info!(
            adapter = adapter.name(),
            sync_id = %record.id,
            status = %record.status,
            discovered = record.nodes_discovered,
            disappeared = record.nodes_disappeared,
            "sync finished"
        );
        Ok(record)
    }

    async fn confirm_disappearance(&self, node: &Node) -> Result<(), EngineError> {
        // The disappearance change precedes the cascade so the timeline
        // reads: disappeared, then deleted.
        let change = Change::new(
            node.id.as_str(),
            ChangeType::NodeDisappeared,
            DetectedVia::Sync,
            self.clock.now_ms(),
        )
        .with_metadata(serde_json::json!({
            "provider": node.provider,
            "nativeId": node.native_id,
        }));
        self.store.append_changes(std::slice::from_ref(&change)).await?;
        self.store.delete_node(&node.id).await?;
        tracing::info!(node = %node.id, "node disappearance confirmed");
        Ok(())
    }

    async fn adapter_call<T, F, Fut>(
        &self,
        adapter: &str,
        op: &str,
        mut call: F,
    ) -> Result<T, AdapterError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, AdapterError>>,
    {
        let timeout = self.config.adapter_timeout;
        with_retry(op, &self.config.retry, || {
            let fut = call();
            async move {
                match tokio::time::timeout(timeout, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(AdapterError::Timeout(timeout)),
                }
            }
        })
        .await
        .map_err(|err| {
            tracing::debug!(adapter, op, error = %err, "adapter call failed");
            err
        })
    }

    fn select_adapters(
        &self,
        opts: &SyncOptions,
    ) -> Result<Vec<Arc<dyn CloudAdapter>>, EngineError> {
        match &opts.providers {
            None => Ok(self.adapters.clone()),
            Some(names) => {
                let mut selected = Vec::new();
                for name in names {
                    let adapter = self
                        .adapters
                        .iter()
                        .find(|a| a.name() == name)
                        .ok_or_else(|| EngineError::UnknownAdapter(name.clone()))?;
                    selected.push(adapter.clone());
                }
                Ok(selected)
            }
        }
    }

    /// BFS neighborhood, as §4.A.
    pub async fn get_dependency_chain(
        &self,
        id: &NodeId,
        direction: Direction,
        depth: u32,
    ) -> Result<SubGraph, EngineError> {
        Ok(self.store.get_neighbors(id, depth, direction).await?)
    }

    /// Store stats, memoized until the next sync.
    pub async fn get_stats(&self) -> Result<GraphStats, EngineError> {
        if let Some(cached) = self.stats_cache.lock().clone() {
            return Ok(cached);
        }
        let stats = self.store.get_stats().await?;
        *self.stats_cache.lock() = Some(stats.clone());
        Ok(stats)
    }

    /// Health of every registered adapter.
    pub async fn health(&self) -> BTreeMap<String, AdapterHealth> {
        let mut health = BTreeMap::new();
        for adapter in &self.adapters {
            health.insert(adapter.name().to_string(), adapter.health_check().await);
        }
        health
    }
}

/// Kahn's algorithm over the adapter dependency declarations, producing
/// layers that can run concurrently. Dependencies on unselected adapters
/// are ignored.
fn topo_layers(
    adapters: &[Arc<dyn CloudAdapter>],
) -> Result<Vec<Vec<Arc<dyn CloudAdapter>>>, EngineError> {
    let by_name: BTreeMap<String, Arc<dyn CloudAdapter>> = adapters
        .iter()
        .map(|a| (a.name().to_string(), a.clone()))
        .collect();

    let mut remaining: BTreeMap<String, BTreeSet<String>> = adapters
        .iter()
        .map(|a| {
            let deps: BTreeSet<String> = a
                .depends_on()
                .into_iter()
                .filter(|dep| by_name.contains_key(dep))
                .collect();
            (a.name().to_string(), deps)
        })
        .collect();

    let mut layers = Vec::new();
    while !remaining.is_empty() {
        let ready: Vec<String> = remaining
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        if ready.is_empty() {
            let stuck = remaining.keys().cloned().collect::<Vec<_>>().join(", ");
            return Err(EngineError::DependencyCycle(stuck));
        }
        for name in &ready {
            remaining.remove(name);
        }
        for deps in remaining.values_mut() {
            for name in &ready {
                deps.remove(name);
            }
        }
        layers.push(ready.iter().map(|name| by_name[name].clone()).collect());
    }
    Ok(layers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::mock::MockCloudAdapter;
    use crate::store::InMemoryGraphStore;
    use crate::types::{NodeInput, NodeStatus, ResourceType};
    use serde_json::Value;

    fn make_input(provider: Provider, native_id: &str) -> NodeInput {
        NodeInput {
            provider,
            account: "123".into(),
            region: "us-east-1".into(),
            resource_type: ResourceType::Compute,
            native_id: native_id.into(),
            name: native_id.into(),
            status: NodeStatus::Running,
            tags: Default::default(),
            metadata: Value::Null,
            cost_monthly: Some(10.0),
            owner: None,
        }
    }

    fn quick_config() -> SyncConfig {
        SyncConfig {
            fan_out: 2,
            adapter_timeout: Duration::from_secs(5),
            retry: RetryPolicy::immediate(2),
        }
    }

    #[tokio::test]
    async fn test_sync_lands_nodes_and_record() {
        let store = Arc::new(InMemoryGraphStore::new());
        let adapter = Arc::new(
            MockCloudAdapter::new(Provider::Aws)
                .with_nodes(vec![make_input(Provider::Aws, "i-1"), make_input(Provider::Aws, "i-2")]),
        );
        let mut engine = GraphEngine::new(Arc::clone(&store), quick_config());
        engine.register_adapter(adapter);

        let records = engine.sync(&SyncOptions::default()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, SyncStatus::Completed);
        assert_eq!(records[0].nodes_discovered, 2);

        let stats = engine.get_stats().await.unwrap();
        assert_eq!(stats.total_nodes, 2);
    }

    #[tokio::test]
    async fn test_two_miss_rule() {
        let store = Arc::new(InMemoryGraphStore::new());
        let adapter = Arc::new(
            MockCloudAdapter::new(Provider::Aws)
                .with_nodes(vec![make_input(Provider::Aws, "i-abc")]),
        );
        let mut engine = GraphEngine::new(Arc::clone(&store), quick_config());
        engine.register_adapter(Arc::clone(&adapter) as Arc<dyn CloudAdapter>);

        // t0: the node exists.
        engine.sync(&SyncOptions::default()).await.unwrap();
        let id = make_input(Provider::Aws, "i-abc").node_id();
        assert!(store.get_node(&id).await.unwrap().is_some());

        // t1: discovery no longer mentions it and describe returns null.
        adapter.remove_node("i-abc");
        adapter.set_describe("i-abc", None);
        let records = engine.sync(&SyncOptions::default()).await.unwrap();
        assert_eq!(records[0].nodes_disappeared, 0);
        assert!(store.get_node(&id).await.unwrap().is_some(), "one miss must not delete");

        // t2: second consecutive miss confirms.
        let records = engine.sync(&SyncOptions::default()).await.unwrap();
        assert_eq!(records[0].nodes_disappeared, 1);
        assert!(store.get_node(&id).await.unwrap().is_none());

        let timeline = store.get_node_timeline(id.as_str(), 10).await.unwrap();
        let types: Vec<ChangeType> = timeline.iter().map(|c| c.change_type).collect();
        assert!(types.contains(&ChangeType::NodeDisappeared));
        assert!(types.contains(&ChangeType::NodeDeleted));
    }

    #[tokio::test]
    async fn test_describe_resets_miss_count() {
        let store = Arc::new(InMemoryGraphStore::new());
        let adapter = Arc::new(
            MockCloudAdapter::new(Provider::Aws)
                .with_nodes(vec![make_input(Provider::Aws, "i-abc")]),
        );
        let mut engine = GraphEngine::new(Arc::clone(&store), quick_config());
        engine.register_adapter(Arc::clone(&adapter) as Arc<dyn CloudAdapter>);
        engine.sync(&SyncOptions::default()).await.unwrap();

        // Missing from discovery but describe still finds it: never deleted.
        adapter.remove_node("i-abc");
        adapter.set_describe("i-abc", Some(serde_json::json!({"state": "running"})));
        for _ in 0..3 {
            let records = engine.sync(&SyncOptions::default()).await.unwrap();
            assert_eq!(records[0].nodes_disappeared, 0);
        }
        let id = make_input(Provider::Aws, "i-abc").node_id();
        assert!(store.get_node(&id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_discovery_failure_marks_record_failed() {
        let store = Arc::new(InMemoryGraphStore::new());
        let adapter = Arc::new(MockCloudAdapter::new(Provider::Gcp));
        adapter.fail_discover(AdapterError::PermissionDenied("bad creds".into()));
        let mut engine = GraphEngine::new(Arc::clone(&store), quick_config());
        engine.register_adapter(adapter);

        let records = engine.sync(&SyncOptions::default()).await.unwrap();
        assert_eq!(records[0].status, SyncStatus::Failed);
        assert!(records[0].error.as_deref().unwrap().contains("bad creds"));
    }

    #[tokio::test]
    async fn test_dependent_adapter_runs_after_dependency() {
        let store = Arc::new(InMemoryGraphStore::new());

        let aws_node = make_input(Provider::Aws, "vpc-1");
        let aws_id = aws_node.node_id();
        let k8s_node = make_input(Provider::Kubernetes, "cluster-1");
        let k8s_id = k8s_node.node_id();

        let aws = Arc::new(MockCloudAdapter::new(Provider::Aws).with_nodes(vec![aws_node]));
        // The cluster's edge references the AWS VPC node.
        let k8s = Arc::new(
            MockCloudAdapter::new(Provider::Kubernetes)
                .depends_on(&["aws"])
                .with_nodes(vec![k8s_node])
                .with_edges(vec![crate::types::Edge::api(
                    k8s_id.clone(),
                    aws_id.clone(),
                    crate::types::RelationshipType::RunsIn,
                )]),
        );

        let mut engine = GraphEngine::new(Arc::clone(&store), quick_config());
        // Registration order must not matter.
        engine.register_adapter(k8s);
        engine.register_adapter(aws);

        let records = engine.sync(&SyncOptions::default()).await.unwrap();
        assert!(records.iter().all(|r| r.status == SyncStatus::Completed));
        let edges = store
            .get_edges_for_node(&k8s_id, Direction::Downstream)
            .await
            .unwrap();
        assert_eq!(edges.len(), 1);
    }

    #[tokio::test]
    async fn test_dependency_cycle_detected() {
        let a = Arc::new(MockCloudAdapter::new(Provider::Aws).named("a").depends_on(&["b"]))
            as Arc<dyn CloudAdapter>;
        let b = Arc::new(MockCloudAdapter::new(Provider::Gcp).named("b").depends_on(&["a"]))
            as Arc<dyn CloudAdapter>;
        let err = match topo_layers(&[a, b]) {
            Err(e) => e,
            Ok(_) => panic!("expected DependencyCycle error"),
        };
        assert!(matches!(err, EngineError::DependencyCycle(_)));
    }

    #[tokio::test]
    async fn test_stats_memoized_until_next_sync() {
        let store = Arc::new(InMemoryGraphStore::new());
        let adapter = Arc::new(
            MockCloudAdapter::new(Provider::Aws)
                .with_nodes(vec![make_input(Provider::Aws, "i-1")]),
        );
        let mut engine = GraphEngine::new(Arc::clone(&store), quick_config());
        engine.register_adapter(Arc::clone(&adapter) as Arc<dyn CloudAdapter>);

        engine.sync(&SyncOptions::default()).await.unwrap();
        let before = engine.get_stats().await.unwrap();

        // Out-of-band store write: memo hides it until the next sync.
        store
            .upsert_nodes(&[make_input(Provider::Aws, "i-oob").into_node(5)])
            .await
            .unwrap();
        assert_eq!(engine.get_stats().await.unwrap(), before);

        engine.sync(&SyncOptions::default()).await.unwrap();
        assert_ne!(engine.get_stats().await.unwrap().total_nodes, before.total_nodes);
    }
}
