//! End-to-end scenarios: seeded topologies driven through the monitor,
//! reconciler, and governor exactly as the platform runs them.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use cloudgraph::adapter::mock::MockCloudAdapter;
use cloudgraph::adapter::{CloudAdapter, RetryPolicy};
use cloudgraph::engine::{GraphEngine, Severity, SyncConfig};
use cloudgraph::governor::{ChangeGovernor, GovernorConfig};
use cloudgraph::monitor::{Alert, AlertCategory, AlertSeverity, Monitor, MonitorConfig};
use cloudgraph::reconcile::{
    ActionType, DriftType, InMemoryReportSink, ReconcileOptions, Reconciler, ReconcilerConfig,
    ReportSink,
};
use cloudgraph::store::{GraphStore, InMemoryGraphStore};
use cloudgraph::types::{
    ChangeFilter, ChangeType, Edge, Execution, NodeId, NodeInput, NodeStatus, Plan,
    PlannedResource, Provider, ProvisionedResource, RelationshipType, RequestStatus, ResourceType,
};
use serde_json::{json, Value};

fn vm(native_id: &str, cost: f64) -> NodeInput {
    NodeInput {
        provider: Provider::Aws,
        account: "123456789012".into(),
        region: "us-east-1".into(),
        resource_type: ResourceType::Compute,
        native_id: native_id.into(),
        name: native_id.into(),
        status: NodeStatus::Running,
        tags: Default::default(),
        metadata: Value::Null,
        cost_monthly: Some(cost),
        owner: None,
    }
}

fn typed(native_id: &str, resource_type: ResourceType, cost: f64) -> NodeInput {
    NodeInput {
        resource_type,
        ..vm(native_id, cost)
    }
}

fn node_id(input: &NodeInput) -> NodeId {
    input.node_id()
}

fn quick_sync_config() -> SyncConfig {
    SyncConfig {
        fan_out: 2,
        adapter_timeout: Duration::from_secs(5),
        retry: RetryPolicy::immediate(1),
    }
}

fn monitor_over(adapter: Arc<MockCloudAdapter>) -> Arc<Monitor<InMemoryGraphStore>> {
    let store = Arc::new(InMemoryGraphStore::new());
    let mut engine = GraphEngine::new(store, quick_sync_config());
    engine.register_adapter(adapter as Arc<dyn CloudAdapter>);
    Arc::new(Monitor::new(Arc::new(engine), MonitorConfig::default()))
}

fn affected_set(alert: &Alert) -> BTreeSet<String> {
    alert
        .affected_node_ids
        .iter()
        .map(|id| id.to_string())
        .collect()
}

/// Scenario 1: three isolated VMs alongside one connected API+LB pair
/// raise exactly one orphan warning naming the VMs.
#[tokio::test]
async fn orphan_alert_names_exactly_the_isolated_vms() {
    let vm1 = vm("vm-1", 150.0);
    let vm2 = vm("vm-2", 200.0);
    let vm3 = vm("vm-3", 20.0);
    let api = typed("api-1", ResourceType::Compute, 40.0);
    let lb = typed("lb-1", ResourceType::LoadBalancer, 25.0);
    let pair_edge = Edge::api(
        node_id(&lb),
        node_id(&api),
        RelationshipType::ConnectedTo,
    );

    let adapter = Arc::new(
        MockCloudAdapter::new(Provider::Aws)
            .with_nodes(vec![vm1.clone(), vm2.clone(), vm3.clone(), api, lb])
            .with_edges(vec![pair_edge]),
    );
    let monitor = monitor_over(adapter);

    let outcome = monitor.run_one_cycle().await.unwrap();

    assert_eq!(outcome.alerts.len(), 1);
    let alert = &outcome.alerts[0];
    assert_eq!(alert.category, AlertCategory::Orphan);
    // $370 stranded is under the $1000 critical bar.
    assert_eq!(alert.severity, AlertSeverity::Warning);

    let expected: BTreeSet<String> = [&vm1, &vm2, &vm3]
        .into_iter()
        .map(|n| node_id(n).to_string())
        .collect();
    assert_eq!(affected_set(alert), expected);
}

/// Scenario 2: a hub database with five dependents is a critical SPOF with
/// its reachability ratio recorded in metadata.
#[tokio::test]
async fn spof_alert_flags_the_hub_database() {
    let hub = typed("hub-db", ResourceType::Database, 300.0);
    let dependents = ["api-1", "api-2", "api-3", "worker", "cache"]
        .map(|name| typed(name, ResourceType::Compute, 10.0));

    let edges: Vec<Edge> = dependents
        .iter()
        .map(|d| Edge::api(node_id(&hub), node_id(d), RelationshipType::DependsOn))
        .collect();

    let mut nodes = vec![hub.clone()];
    nodes.extend(dependents.iter().cloned());
    let adapter = Arc::new(
        MockCloudAdapter::new(Provider::Aws)
            .with_nodes(nodes)
            .with_edges(edges),
    );
    let monitor = monitor_over(adapter);

    let outcome = monitor.run_one_cycle().await.unwrap();

    let spofs: Vec<&Alert> = outcome
        .alerts
        .iter()
        .filter(|a| a.category == AlertCategory::Spof)
        .collect();
    assert_eq!(spofs.len(), 1);
    let alert = spofs[0];
    assert_eq!(alert.severity, AlertSeverity::Critical);
    assert!(affected_set(alert).contains(node_id(&hub).as_str()));

    let ratio = alert.metadata["reachabilityRatio"].as_f64().unwrap();
    assert!(ratio > 0.3, "reachability ratio {ratio} must exceed 0.3");
}

/// Scenario 3: a 30% cost jump between cycles raises one warning-level
/// cost anomaly carrying the dollar impact.
#[tokio::test]
async fn cost_anomaly_reports_the_impact() {
    // Two connected nodes so the orphan rule stays quiet.
    let a = vm("svc-a", 500.0);
    let b = vm("svc-b", 500.0);
    let edge = Edge::api(node_id(&a), node_id(&b), RelationshipType::ConnectedTo);
    let adapter = Arc::new(
        MockCloudAdapter::new(Provider::Aws)
            .with_nodes(vec![a.clone(), b.clone()])
            .with_edges(vec![edge]),
    );
    let monitor = monitor_over(Arc::clone(&adapter));

    // Cycle one establishes the $1000 baseline.
    let first = monitor.run_one_cycle().await.unwrap();
    assert!(first.alerts.is_empty());

    // Costs climb to $1300.
    adapter.set_nodes(vec![
        NodeInput { cost_monthly: Some(650.0), ..a },
        NodeInput { cost_monthly: Some(650.0), ..b },
    ]);
    let second = monitor.run_one_cycle().await.unwrap();

    assert_eq!(second.alerts.len(), 1);
    let alert = &second.alerts[0];
    assert_eq!(alert.category, AlertCategory::CostAnomaly);
    // 30% growth is under the 50% critical bar.
    assert_eq!(alert.severity, AlertSeverity::Warning);
    assert_eq!(alert.metadata["costImpact"].as_f64(), Some(300.0));
}

/// Scenario 4: publicly-accessible RDS drifts from a private plan; auto
/// remediation updates it through the governor and the next cycle is
/// clean.
#[tokio::test]
async fn critical_drift_auto_remediates_and_converges() {
    let adapter = Arc::new(MockCloudAdapter::new(Provider::Aws));
    adapter.set_describe(
        "db-prod-1",
        Some(json!({"publiclyAccessible": true, "encryption": true})),
    );

    let store = Arc::new(InMemoryGraphStore::new());
    let mut engine = GraphEngine::new(Arc::clone(&store), quick_sync_config());
    engine.register_adapter(Arc::clone(&adapter) as Arc<dyn CloudAdapter>);
    let engine = Arc::new(engine);
    let governor = Arc::new(ChangeGovernor::new(
        Arc::clone(&store),
        GovernorConfig::default(),
    ));
    let sink = Arc::new(InMemoryReportSink::new());
    let reconciler = Reconciler::new(
        Arc::clone(&engine),
        Arc::clone(&governor),
        ReconcilerConfig::default(),
    )
    .with_report_sink(Arc::clone(&sink) as Arc<dyn ReportSink>);

    let plan = Plan {
        id: "plan-orders".into(),
        name: "orders stack".into(),
        resources: vec![PlannedResource {
            id: "db-main".into(),
            name: "orders-db".into(),
            resource_type: ResourceType::Database,
            provider: Provider::Aws,
            region: "us-east-1".into(),
            properties: json!({"publiclyAccessible": false, "encryption": true}),
            estimated_monthly_cost: None,
            tags: Default::default(),
        }],
        created_at: 1,
    };
    let execution = Execution {
        id: "exec-1".into(),
        plan_id: "plan-orders".into(),
        provisioned: vec![ProvisionedResource {
            plan_resource_id: "db-main".into(),
            cloud_id: "db-prod-1".into(),
            resource_type: ResourceType::Database,
            provider: Provider::Aws,
            region: "us-east-1".into(),
        }],
        started_at: 1,
        completed_at: Some(2),
    };

    let result = reconciler
        .reconcile(
            &plan,
            &execution,
            &ReconcileOptions {
                auto_remediate: Some(true),
            },
        )
        .await
        .unwrap();

    // Drift is critical on exactly the public-access flag.
    assert!(result.drift_detected);
    assert_eq!(result.drifts.len(), 1);
    assert_eq!(result.drifts[0].drift_type, DriftType::Configuration);
    let delta = &result.drifts[0].deltas[0];
    assert_eq!(delta.path, "publiclyAccessible");
    assert_eq!(delta.severity, Severity::Critical);

    // One auto-executable update ran.
    let update = result
        .recommended_actions
        .iter()
        .find(|a| a.action_type == ActionType::Update && a.auto_executable)
        .unwrap();
    assert!(!update.approval_required);
    assert!(result.auto_remediation_applied);

    let mutations = adapter.mutations();
    assert_eq!(mutations.len(), 1);
    assert_eq!(mutations[0].properties["publiclyAccessible"], json!(false));

    // The governor holds an executed, correlated request.
    let executed = store
        .list_change_requests(10)
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.status == RequestStatus::Executed)
        .unwrap();
    assert_eq!(executed.resource_type, ResourceType::Database);

    // Cloud converges; the next cycle reports nothing.
    adapter.set_describe(
        "db-prod-1",
        Some(json!({"publiclyAccessible": false, "encryption": true})),
    );
    let second = reconciler
        .reconcile(&plan, &execution, &ReconcileOptions::default())
        .await
        .unwrap();
    assert!(!second.drift_detected);
    assert!(second.drifts.is_empty());
    assert_eq!(sink.reports().len(), 2);
}

/// Scenario 5: a single missed describe does nothing; the second
/// consecutive miss yields one disappearance change and one alert.
#[tokio::test]
async fn disappearance_requires_two_consecutive_misses() {
    let instance = vm("i-abc", 80.0);
    let peer = vm("i-peer", 10.0);
    let edge = Edge::api(node_id(&instance), node_id(&peer), RelationshipType::ConnectedTo);
    let adapter = Arc::new(
        MockCloudAdapter::new(Provider::Aws)
            .with_nodes(vec![instance.clone(), peer])
            .with_edges(vec![edge]),
    );
    let monitor = monitor_over(Arc::clone(&adapter));
    let id = node_id(&instance);

    // t0: the instance exists.
    monitor.run_one_cycle().await.unwrap();

    // t1: gone from discovery, describe 404s. One miss only.
    adapter.remove_node("i-abc");
    adapter.set_describe("i-abc", None);
    let t1 = monitor.run_one_cycle().await.unwrap();
    assert!(t1.alerts.iter().all(|a| a.category != AlertCategory::Disappeared));

    let store = monitor_store(&monitor);
    assert!(store.get_node(&id).await.unwrap().is_some());

    // t2: second miss confirms.
    let t2 = monitor.run_one_cycle().await.unwrap();
    let disappeared: Vec<&Alert> = t2
        .alerts
        .iter()
        .filter(|a| a.category == AlertCategory::Disappeared)
        .collect();
    assert_eq!(disappeared.len(), 1);
    assert!(affected_set(disappeared[0]).contains(id.as_str()));

    let changes = store
        .get_changes(&ChangeFilter {
            change_type: Some(ChangeType::NodeDisappeared),
            ..ChangeFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].target_id, id.as_str());
    assert!(store.get_node(&id).await.unwrap().is_none());
}

fn monitor_store(monitor: &Arc<Monitor<InMemoryGraphStore>>) -> Arc<InMemoryGraphStore> {
    Arc::clone(monitor.engine().store())
}
