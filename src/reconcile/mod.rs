//! Reconciliation engine: plan vs actual.
//!
//! One cycle detects drift against the declared plan, checks compliance,
//! looks for cost anomalies, synthesizes remediation actions, optionally
//! auto-executes the safe ones through the change governor, and publishes
//! a report. Per-resource failures are contained: one broken resource
//! never stops the cycle.

pub mod actions;
pub mod anomaly;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::adapter::AdapterError;
use crate::clock::MonotonicClock;
use crate::engine::drift::json_diff;
use crate::engine::{EngineError, GraphEngine, PropertyDelta, Severity};
use crate::governor::{ChangeGovernor, GovernorError};
use crate::store::{GraphStore, StoreError};
use crate::types::{
    ChangeAction, ChangeRequestDraft, Execution, GraphSnapshot, InitiatorType, NodeFilter,
    NodeId, Plan, PlannedResource, Provider, RequestStatus, ResourceType, SnapshotTrigger,
};

pub use actions::{
    is_stateful, supports_in_place_update, ActionPriority, ActionType, RemediationAction,
};
pub use anomaly::{AnomalyType, CostAnomaly};

/// Error type for reconciliation.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// Underlying store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// Engine failure.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    /// Governor failure.
    #[error("governor error: {0}")]
    Governor(#[from] GovernorError),
    /// Adapter failure that aborted the cycle.
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),
    /// No adapter registered for a provider the plan uses.
    #[error("no adapter for provider {0}")]
    NoAdapter(Provider),
}

/// How a provisioned resource deviates from its plan entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftType {
    /// The resource is gone from the provider.
    Deleted,
    /// Properties differ from the planned ones.
    Configuration,
}

/// One drifted resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDrift {
    /// Plan-local resource id.
    pub plan_resource_id: String,
    /// Provisioned cloud id.
    pub cloud_id: String,
    /// Resource type.
    pub resource_type: ResourceType,
    /// Provider.
    pub provider: Provider,
    /// Deleted or configuration.
    pub drift_type: DriftType,
    /// The properties the plan wants (used for remediation).
    pub planned_properties: Value,
    /// Property-level deltas (empty for deleted drift).
    pub deltas: Vec<PropertyDelta>,
}

/// One compliance failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceViolation {
    /// Plan-local resource id.
    pub plan_resource_id: String,
    /// Provisioned cloud id, when the resource exists.
    pub cloud_id: Option<String>,
    /// Resource type.
    pub resource_type: ResourceType,
    /// Provider.
    pub provider: Provider,
    /// Rule that failed.
    pub rule: String,
    /// What is wrong.
    pub message: String,
    /// Severity.
    pub severity: Severity,
}

/// A compliance rule evaluated against each provisioned resource.
pub trait ComplianceRule: Send + Sync {
    /// Rule name, used in violation records.
    fn name(&self) -> &str;

    /// Check one resource; `None` when compliant. `actual` is the
    /// described cloud state (absent when the resource is gone).
    fn check(
        &self,
        planned: &PlannedResource,
        actual: Option<&Value>,
    ) -> Option<(String, Severity)>;
}

/// Databases and buckets must have encryption enabled.
pub struct EncryptionRequired;

impl ComplianceRule for EncryptionRequired {
    fn name(&self) -> &str {
        "encryption-required"
    }

    fn check(
        &self,
        planned: &PlannedResource,
        actual: Option<&Value>,
    ) -> Option<(String, Severity)> {
        if !matches!(
            planned.resource_type,
            ResourceType::Database | ResourceType::Storage
        ) {
            return None;
        }
        let actual = actual?;
        let enabled = actual
            .get("encryption")
            .and_then(|e| {
                e.as_bool()
                    .or_else(|| e.get("enabled").and_then(Value::as_bool))
            })
            .unwrap_or(false);
        (!enabled).then(|| {
            (
                "encryption is disabled".to_string(),
                Severity::Critical,
            )
        })
    }
}

/// Nothing may be publicly accessible unless the plan says so.
pub struct NoUnplannedPublicAccess;

impl ComplianceRule for NoUnplannedPublicAccess {
    fn name(&self) -> &str {
        "no-unplanned-public-access"
    }

    fn check(
        &self,
        planned: &PlannedResource,
        actual: Option<&Value>,
    ) -> Option<(String, Severity)> {
        let actual = actual?;
        let actually_public = public_flag(actual).unwrap_or(false);
        let planned_public = public_flag(&planned.properties).unwrap_or(false);
        (actually_public && !planned_public).then(|| {
            (
                "resource is publicly accessible but the plan does not allow it".to_string(),
                Severity::Critical,
            )
        })
    }
}

fn public_flag(properties: &Value) -> Option<bool> {
    properties
        .get("publiclyAccessible")
        .or_else(|| properties.get("publicAccess"))
        .and_then(Value::as_bool)
}

/// Every resource must carry the plan's tags.
pub struct RequiredTags;

impl ComplianceRule for RequiredTags {
    fn name(&self) -> &str {
        "required-tags"
    }

    fn check(
        &self,
        planned: &PlannedResource,
        actual: Option<&Value>,
    ) -> Option<(String, Severity)> {
        let actual = actual?;
        let actual_tags = actual.get("tags")?.as_object()?;
        let missing: Vec<&str> = planned
            .tags
            .keys()
            .filter(|k| !actual_tags.contains_key(*k))
            .map(|k| k.as_str())
            .collect();
        (!missing.is_empty()).then(|| {
            (
                format!("missing tags: {}", missing.join(", ")),
                Severity::Medium,
            )
        })
    }
}

/// Default compliance rule set.
pub fn default_compliance_rules() -> Vec<Box<dyn ComplianceRule>> {
    vec![
        Box::new(EncryptionRequired),
        Box::new(NoUnplannedPublicAccess),
        Box::new(RequiredTags),
    ]
}

/// Source of actual spend figures.
#[async_trait]
pub trait CostSource: Send + Sync {
    /// Actual monthly cost (last 30 days) for one resource, when known.
    async fn actual_monthly_cost(
        &self,
        provider: Provider,
        cloud_id: &str,
        resource_type: ResourceType,
    ) -> Result<Option<f64>, AdapterError>;
}

/// Fixed cost table, for tests and offline runs.
#[derive(Debug, Default)]
pub struct StaticCostSource {
    costs: Mutex<std::collections::BTreeMap<String, f64>>,
}

impl StaticCostSource {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the actual cost for a cloud id.
    pub fn set(&self, cloud_id: impl Into<String>, monthly: f64) {
        self.costs.lock().insert(cloud_id.into(), monthly);
    }
}

#[async_trait]
impl CostSource for StaticCostSource {
    async fn actual_monthly_cost(
        &self,
        _provider: Provider,
        cloud_id: &str,
        _resource_type: ResourceType,
    ) -> Result<Option<f64>, AdapterError> {
        Ok(self.costs.lock().get(cloud_id).copied())
    }
}

/// Structured reconcile report published after each cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Plan id.
    pub plan_id: String,
    /// Execution id.
    pub execution_id: String,
    /// Drifts found.
    pub drift_count: u64,
    /// Violations found.
    pub violation_count: u64,
    /// Anomalies found.
    pub anomaly_count: u64,
    /// One-line summary.
    pub message: String,
}

/// Destination for reconcile reports (topic, queue, or in-process).
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Publish one report. Failures are logged by the caller, never fatal.
    async fn publish(&self, report: &ReconcileReport) -> Result<(), AdapterError>;
}

/// In-process sink that retains reports, for tests.
#[derive(Debug, Default)]
pub struct InMemoryReportSink {
    reports: Mutex<Vec<ReconcileReport>>,
}

impl InMemoryReportSink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports published so far.
    pub fn reports(&self) -> Vec<ReconcileReport> {
        self.reports.lock().clone()
    }
}

#[async_trait]
impl ReportSink for InMemoryReportSink {
    async fn publish(&self, report: &ReconcileReport) -> Result<(), AdapterError> {
        self.reports.lock().push(report.clone());
        Ok(())
    }
}

/// Reconciler settings.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Cost deviation percentage that becomes an anomaly.
    pub cost_threshold_pct: f64,
    /// Execute safe remediations without being asked per call.
    pub auto_remediate: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            cost_threshold_pct: 20.0,
            auto_remediate: false,
        }
    }
}

impl ReconcilerConfig {
    /// Load from `RECONCILE_COST_THRESHOLD_PCT` / `RECONCILE_AUTO_REMEDIATE`
    /// with production defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cost_threshold_pct: std::env::var("RECONCILE_COST_THRESHOLD_PCT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.cost_threshold_pct),
            auto_remediate: std::env::var("RECONCILE_AUTO_REMEDIATE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.auto_remediate),
        }
    }
}

/// Per-call reconcile options.
#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
    /// Override the configured auto-remediation flag.
    pub auto_remediate: Option<bool>,
}

/// Outcome of one reconcile cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileResult {
    /// Cycle id.
    pub id: String,
    /// Plan id.
    pub plan_id: String,
    /// Execution id.
    pub execution_id: String,
    /// Epoch-millisecond cycle timestamp.
    pub timestamp: i64,
    /// Whether any drift was found.
    pub drift_detected: bool,
    /// Drifted resources.
    pub drifts: Vec<ResourceDrift>,
    /// Compliance violations.
    pub violations: Vec<ComplianceViolation>,
    /// Cost anomalies.
    pub anomalies: Vec<CostAnomaly>,
    /// Synthesized remediations.
    pub recommended_actions: Vec<RemediationAction>,
    /// Whether auto-remediation ran.
    pub auto_remediation_applied: bool,
}

/// The reconciliation engine.
pub struct Reconciler<S: GraphStore> {
    engine: Arc<GraphEngine<S>>,
    governor: Arc<ChangeGovernor<S>>,
    cost_source: Option<Arc<dyn CostSource>>,
    report_sink: Option<Arc<dyn ReportSink>>,
    compliance: Vec<Box<dyn ComplianceRule>>,
    config: ReconcilerConfig,
    clock: MonotonicClock,
}

impl<S: GraphStore + 'static> Reconciler<S> {
    /// Reconciler with the default compliance rules.
    pub fn new(
        engine: Arc<GraphEngine<S>>,
        governor: Arc<ChangeGovernor<S>>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            engine,
            governor,
            cost_source: None,
            report_sink: None,
            compliance: default_compliance_rules(),
            config,
            clock: MonotonicClock::new(),
        }
    }

    /// Attach a billing source for cost anomaly detection.
    pub fn with_cost_source(mut self, source: Arc<dyn CostSource>) -> Self {
        self.cost_source = Some(source);
        self
    }

    /// Attach a report sink.
    pub fn with_report_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.report_sink = Some(sink);
        self
    }

    /// Replace the compliance rule set.
    pub fn with_compliance_rules(mut self, rules: Vec<Box<dyn ComplianceRule>>) -> Self {
        self.compliance = rules;
        self
    }

    /// Run one reconcile cycle for a plan and its execution.
    pub async fn reconcile(
        &self,
        plan: &Plan,
        execution: &Execution,
        opts: &ReconcileOptions,
    ) -> Result<ReconcileResult, ReconcileError> {
        let mut drifts = Vec::new();
        let mut violations = Vec::new();
        let mut anomalies = Vec::new();

        for provisioned in &execution.provisioned {
            let planned = match plan.resource(&provisioned.plan_resource_id) {
                Some(planned) => planned,
                None => {
                    tracing::warn!(
                        plan = %plan.id,
                        resource = %provisioned.plan_resource_id,
                        "execution references a resource the plan does not declare"
                    );
                    continue;
                }
            };

            // Failures on one resource are contained to that resource.
            if let Err(err) = self
                .reconcile_resource(
                    planned,
                    provisioned.cloud_id.as_str(),
                    &mut drifts,
                    &mut violations,
                    &mut anomalies,
                )
                .await
            {
                tracing::error!(
                    resource = %provisioned.plan_resource_id,
                    error = %err,
                    "resource reconcile failed, continuing"
                );
            }
        }

        let recommended_actions = actions::synthesize(
            &drifts,
            &violations,
            &anomalies,
            self.config.cost_threshold_pct,
        );

        let auto = opts.auto_remediate.unwrap_or(self.config.auto_remediate);
        let mut auto_remediation_applied = false;
        if auto {
            for action in &recommended_actions {
                if !action.auto_executable || action.approval_required {
                    continue;
                }
                match self.execute_action(action).await {
                    Ok(()) => auto_remediation_applied = true,
                    Err(err) => {
                        tracing::error!(action = %action.id, error = %err, "auto-remediation failed");
                    }
                }
            }
        }

        let result = ReconcileResult {
            id: Uuid::new_v4().to_string(),
            plan_id: plan.id.clone(),
            execution_id: execution.id.clone(),
            timestamp: self.clock.now_ms(),
            drift_detected: !drifts.is_empty(),
            drifts,
            violations,
            anomalies,
            recommended_actions,
            auto_remediation_applied,
        };

        self.publish_report(&result).await;
        tracing::info!(
            plan = %result.plan_id,
            drifts = result.drifts.len(),
            violations = result.violations.len(),
            anomalies = result.anomalies.len(),
            auto = result.auto_remediation_applied,
            "reconcile cycle finished"
        );
        Ok(result)
    }

    async fn reconcile_resource(
        &self,
        planned: &PlannedResource,
        cloud_id: &str,
        drifts: &mut Vec<ResourceDrift>,
        violations: &mut Vec<ComplianceViolation>,
        anomalies: &mut Vec<CostAnomaly>,
    ) -> Result<(), ReconcileError> {
        let adapter = self
            .engine
            .adapter_for(planned.provider)
            .ok_or(ReconcileError::NoAdapter(planned.provider))?;

        let actual = adapter
            .describe(cloud_id, planned.resource_type)
            .await?;

        match &actual {
            None => drifts.push(ResourceDrift {
                plan_resource_id: planned.id.clone(),
                cloud_id: cloud_id.to_string(),
                resource_type: planned.resource_type,
                provider: planned.provider,
                drift_type: DriftType::Deleted,
                planned_properties: planned.properties.clone(),
                deltas: Vec::new(),
            }),
            Some(actual_props) => {
                let deltas = json_diff(&planned.properties, actual_props);
                if !deltas.is_empty() {
                    drifts.push(ResourceDrift {
                        plan_resource_id: planned.id.clone(),
                        cloud_id: cloud_id.to_string(),
                        resource_type: planned.resource_type,
                        provider: planned.provider,
                        drift_type: DriftType::Configuration,
                        planned_properties: planned.properties.clone(),
                        deltas,
                    });
                }
            }
        }

        for rule in &self.compliance {
            if let Some((message, severity)) = rule.check(planned, actual.as_ref()) {
                violations.push(ComplianceViolation {
                    plan_resource_id: planned.id.clone(),
                    cloud_id: actual.is_some().then(|| cloud_id.to_string()),
                    resource_type: planned.resource_type,
                    provider: planned.provider,
                    rule: rule.name().to_string(),
                    message,
                    severity,
                });
            }
        }

        if let Some(source) = &self.cost_source {
            let actual_cost = source
                .actual_monthly_cost(planned.provider, cloud_id, planned.resource_type)
                .await?;
            if let Some(anomaly) = anomaly::evaluate_cost(
                planned,
                cloud_id,
                actual_cost,
                self.config.cost_threshold_pct,
            ) {
                anomalies.push(anomaly);
            }
        }

        Ok(())
    }

    /// Execute one remediation through the governor.
    ///
    /// `update` re-applies the planned properties in place; `delete` and
    /// `recreate` run an ordered shutdown→destroy with a final-snapshot
    /// guard for stateful resources; `scale` stays advisory; `alert` only
    /// logs. Unsupported combinations degrade to alert.
    pub async fn execute_action(&self, action: &RemediationAction) -> Result<(), ReconcileError> {
        match action.action_type {
            ActionType::Alert | ActionType::Scale => {
                tracing::warn!(
                    action = %action.action_type_name(),
                    resource = %action.cloud_id,
                    reason = %action.reason,
                    "advisory remediation"
                );
                return Ok(());
            }
            ActionType::Update if !supports_in_place_update(action.resource_type) => {
                tracing::warn!(
                    resource = %action.cloud_id,
                    "in-place update unsupported for this type; degrading to alert"
                );
                return Ok(());
            }
            _ => {}
        }

        let adapter = self
            .engine
            .adapter_for(action.provider)
            .ok_or(ReconcileError::NoAdapter(action.provider))?;

        let governor_action = match action.action_type {
            ActionType::Update => ChangeAction::Update,
            ActionType::Delete | ActionType::Recreate => ChangeAction::Delete,
            ActionType::Scale | ActionType::Alert => unreachable!("advisories handled above"),
        };

        let node_id = NodeId::derive(
            action.provider,
            &self.region_of(&action.cloud_id).await,
            action.resource_type,
            &action.cloud_id,
        );
        let draft = ChangeRequestDraft {
            target_resource_id: node_id.to_string(),
            resource_type: action.resource_type,
            provider: action.provider,
            action: governor_action,
            initiator: "reconciler".to_string(),
            initiator_type: InitiatorType::System,
            description: action.reason.clone(),
            correlation_id: None,
            affected_node_count: self.affected_count(&node_id).await,
            production: false,
            touched_fields: action
                .properties
                .as_object()
                .map(|o| o.keys().cloned().collect())
                .unwrap_or_default(),
        };

        let request = self.governor.submit(draft).await?;
        match request.status {
            RequestStatus::Approved => {}
            RequestStatus::Pending => {
                tracing::info!(request = %request.id, "remediation held for approval");
                return Ok(());
            }
            _ => {
                return Err(GovernorError::PolicyDenied(
                    request
                        .rejection_reason
                        .unwrap_or_else(|| "rejected".to_string()),
                )
                .into())
            }
        }

        if matches!(action.action_type, ActionType::Delete | ActionType::Recreate)
            && is_stateful(action.resource_type)
        {
            self.final_snapshot_guard(&action.cloud_id).await?;
            // Ordered teardown: stop traffic, then destroy.
            adapter
                .mutate(
                    ChangeAction::Update,
                    &action.cloud_id,
                    action.resource_type,
                    &json!({"desiredState": "stopped"}),
                )
                .await?;
        }

        self.governor
            .execute(&request.id, &adapter, &action.cloud_id, &action.properties)
            .await?;

        if action.action_type == ActionType::Recreate {
            // Provision anew from the plan after the destroy lands.
            adapter
                .mutate(
                    ChangeAction::Create,
                    &action.cloud_id,
                    action.resource_type,
                    &action.properties,
                )
                .await?;
        }
        Ok(())
    }

    /// Capture a pre-destroy snapshot so stateful teardowns are auditable.
    async fn final_snapshot_guard(&self, cloud_id: &str) -> Result<(), ReconcileError> {
        let store = self.engine.store();
        let nodes = store.query_nodes(&NodeFilter::default()).await?;
        let snapshot = GraphSnapshot::capture(
            Uuid::new_v4().to_string(),
            SnapshotTrigger::PreChange,
            Some(format!("final-snapshot {cloud_id}")),
            nodes,
            Vec::new(),
            self.clock.now_ms(),
        );
        store.save_snapshot(&snapshot).await?;
        Ok(())
    }

    async fn region_of(&self, cloud_id: &str) -> String {
        // Best effort: find the node carrying this native id.
        if let Ok(nodes) = self.engine.store().query_nodes(&NodeFilter::default()).await {
            if let Some(node) = nodes.iter().find(|n| n.native_id == cloud_id) {
                return node.region.clone();
            }
        }
        "unknown".to_string()
    }

    async fn affected_count(&self, node_id: &NodeId) -> u32 {
        match self.engine.get_blast_radius(node_id, 3).await {
            Ok(blast) => blast.affected_count() as u32,
            Err(_) => 0,
        }
    }

    async fn publish_report(&self, result: &ReconcileResult) {
        let sink = match &self.report_sink {
            Some(sink) => sink,
            None => return,
        };
        let report = ReconcileReport {
            plan_id: result.plan_id.clone(),
            execution_id: result.execution_id.clone(),
            drift_count: result.drifts.len() as u64,
            violation_count: result.violations.len() as u64,
            anomaly_count: result.anomalies.len() as u64,
            message: format!(
                "reconcile {}: {} drifts, {} violations, {} anomalies",
                result.id,
                result.drifts.len(),
                result.violations.len(),
                result.anomalies.len()
            ),
        };
        if let Err(err) = sink.publish(&report).await {
            // Reporting must never fail the cycle.
            tracing::warn!(error = %err, "reconcile report publish failed");
        }
    }
}

impl RemediationAction {
    fn action_type_name(&self) -> &'static str {
        match self.action_type {
            ActionType::Update => "update",
            ActionType::Delete => "delete",
            ActionType::Recreate => "recreate",
            ActionType::Scale => "scale",
            ActionType::Alert => "alert",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::mock::MockCloudAdapter;
    use crate::adapter::CloudAdapter;
    use crate::engine::SyncConfig;
    use crate::governor::GovernorConfig;
    use crate::store::InMemoryGraphStore;
    use crate::types::ProvisionedResource;

    fn plan_with_db(publicly_accessible: bool, estimate: Option<f64>) -> (Plan, Execution) {
        let plan = Plan {
            id: "plan-1".into(),
            name: "orders stack".into(),
            resources: vec![PlannedResource {
                id: "db-main".into(),
                name: "orders-db".into(),
                resource_type: ResourceType::Database,
                provider: Provider::Aws,
                region: "us-east-1".into(),
                properties: json!({
                    "publiclyAccessible": publicly_accessible,
                    "encryption": true,
                }),
                estimated_monthly_cost: estimate,
                tags: Default::default(),
            }],
            created_at: 1,
        };
        let execution = Execution {
            id: "exec-1".into(),
            plan_id: "plan-1".into(),
            provisioned: vec![ProvisionedResource {
                plan_resource_id: "db-main".into(),
                cloud_id: "db-0a1b".into(),
                resource_type: ResourceType::Database,
                provider: Provider::Aws,
                region: "us-east-1".into(),
            }],
            started_at: 1,
            completed_at: Some(2),
        };
        (plan, execution)
    }

    fn build(
        adapter: Arc<MockCloudAdapter>,
    ) -> (
        Reconciler<InMemoryGraphStore>,
        Arc<InMemoryGraphStore>,
        Arc<InMemoryReportSink>,
    ) {
        let store = Arc::new(InMemoryGraphStore::new());
        let mut engine = GraphEngine::new(Arc::clone(&store), SyncConfig::default());
        engine.register_adapter(adapter as Arc<dyn CloudAdapter>);
        let engine = Arc::new(engine);
        let governor = Arc::new(ChangeGovernor::new(
            Arc::clone(&store),
            GovernorConfig::default(),
        ));
        let sink = Arc::new(InMemoryReportSink::new());
        let reconciler = Reconciler::new(engine, governor, ReconcilerConfig::default())
            .with_report_sink(Arc::clone(&sink) as Arc<dyn ReportSink>);
        (reconciler, store, sink)
    }

    #[tokio::test]
    async fn test_clean_resource_yields_no_findings() {
        let adapter = Arc::new(MockCloudAdapter::new(Provider::Aws));
        adapter.set_describe(
            "db-0a1b",
            Some(json!({"publiclyAccessible": false, "encryption": true})),
        );
        let (reconciler, _, sink) = build(adapter);

        let (plan, execution) = plan_with_db(false, None);
        let result = reconciler
            .reconcile(&plan, &execution, &ReconcileOptions::default())
            .await
            .unwrap();

        assert!(!result.drift_detected);
        assert!(result.violations.is_empty());
        assert!(result.recommended_actions.is_empty());
        assert_eq!(sink.reports().len(), 1);
        assert_eq!(sink.reports()[0].drift_count, 0);
    }

    #[tokio::test]
    async fn test_deleted_resource_yields_recreate() {
        let adapter = Arc::new(MockCloudAdapter::new(Provider::Aws));
        adapter.set_describe("db-0a1b", None);
        let (reconciler, _, _) = build(adapter);

        let (plan, execution) = plan_with_db(false, None);
        let result = reconciler
            .reconcile(&plan, &execution, &ReconcileOptions::default())
            .await
            .unwrap();

        assert!(result.drift_detected);
        assert_eq!(result.drifts[0].drift_type, DriftType::Deleted);
        let recreate = result
            .recommended_actions
            .iter()
            .find(|a| a.action_type == ActionType::Recreate)
            .unwrap();
        assert!(recreate.approval_required);
    }

    #[tokio::test]
    async fn test_critical_drift_auto_remediates() {
        let adapter = Arc::new(MockCloudAdapter::new(Provider::Aws));
        // Plan wants private; cloud says public.
        adapter.set_describe(
            "db-0a1b",
            Some(json!({"publiclyAccessible": true, "encryption": true})),
        );
        let (reconciler, _, _) = build(Arc::clone(&adapter));

        let (plan, execution) = plan_with_db(false, None);
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

        assert!(result.drift_detected);
        let update = result
            .recommended_actions
            .iter()
            .find(|a| a.action_type == ActionType::Update)
            .unwrap();
        assert!(update.auto_executable);
        assert!(result.auto_remediation_applied);

        // The governor drove an adapter mutation with the planned props.
        let mutations = adapter.mutations();
        assert_eq!(mutations.len(), 1);
        assert_eq!(mutations[0].native_id, "db-0a1b");
        assert_eq!(mutations[0].properties["publiclyAccessible"], json!(false));
    }

    #[tokio::test]
    async fn test_cost_anomaly_detection() {
        let adapter = Arc::new(MockCloudAdapter::new(Provider::Aws));
        adapter.set_describe(
            "db-0a1b",
            Some(json!({"publiclyAccessible": false, "encryption": true})),
        );
        let costs = Arc::new(StaticCostSource::new());
        costs.set("db-0a1b", 300.0);

        let (reconciler, _, _) = build(adapter);
        let reconciler = reconciler.with_cost_source(costs as Arc<dyn CostSource>);

        let (plan, execution) = plan_with_db(false, Some(100.0));
        let result = reconciler
            .reconcile(&plan, &execution, &ReconcileOptions::default())
            .await
            .unwrap();

        assert_eq!(result.anomalies.len(), 1);
        assert_eq!(result.anomalies[0].anomaly_type, AnomalyType::Spike);
        // 200% deviation > 2x threshold: scale advisory.
        assert!(result
            .recommended_actions
            .iter()
            .any(|a| a.action_type == ActionType::Scale));
    }

    #[tokio::test]
    async fn test_unencrypted_database_violates() {
        let adapter = Arc::new(MockCloudAdapter::new(Provider::Aws));
        adapter.set_describe(
            "db-0a1b",
            Some(json!({"publiclyAccessible": false, "encryption": false})),
        );
        let (reconciler, _, _) = build(adapter);

        let (mut plan, execution) = plan_with_db(false, None);
        plan.resources[0].properties = json!({"publiclyAccessible": false, "encryption": false});
        let result = reconciler
            .reconcile(&plan, &execution, &ReconcileOptions::default())
            .await
            .unwrap();

        let violation = result
            .violations
            .iter()
            .find(|v| v.rule == "encryption-required")
            .unwrap();
        assert_eq!(violation.severity, Severity::Critical);
    }
}
