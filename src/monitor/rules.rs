//! Alert rules and the built-in rule set.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::MonitorError;
use crate::engine::GraphEngine;
use crate::store::GraphStore;
use crate::types::{
    ChangeFilter, ChangeType, Direction, GraphStats, InitiatorType, NodeFilter, NodeId,
    SyncRecord,
};

/// Orphan alerts turn critical when the stranded spend exceeds this.
const ORPHAN_COST_CRITICAL_USD: f64 = 1_000.0;
/// Minimum degree for SPOF consideration.
const SPOF_MIN_DEGREE: usize = 5;
/// Minimum downstream reach ratio for SPOF.
const SPOF_REACH_RATIO: f64 = 0.3;
/// Cost growth percentage that raises the cost-anomaly alert.
const COST_GROWTH_WARNING_PCT: f64 = 20.0;
/// Cost growth percentage that makes it critical.
const COST_GROWTH_CRITICAL_PCT: f64 = 50.0;

/// What kind of condition an alert reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertCategory {
    /// Node with no relationships.
    Orphan,
    /// Single point of failure.
    Spof,
    /// Spend moved abnormally.
    CostAnomaly,
    /// Change without attribution or approval.
    UnauthorizedChange,
    /// Plan-vs-actual drift.
    Drift,
    /// Resource vanished from its provider.
    Disappeared,
    /// User-defined rules.
    Custom,
}

impl AlertCategory {
    /// Stable kebab-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Orphan => "orphan",
            Self::Spof => "spof",
            Self::CostAnomaly => "cost-anomaly",
            Self::UnauthorizedChange => "unauthorized-change",
            Self::Drift => "drift",
            Self::Disappeared => "disappeared",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    /// Informational.
    Info,
    /// Needs attention.
    Warning,
    /// Needs attention now.
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// One fired alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Unique id.
    pub id: String,
    /// Rule that fired.
    pub rule_id: String,
    /// Condition category.
    pub category: AlertCategory,
    /// Severity.
    pub severity: AlertSeverity,
    /// Short title.
    pub title: String,
    /// Human-readable detail.
    pub message: String,
    /// Nodes involved.
    pub affected_node_ids: Vec<NodeId>,
    /// Rule-specific detail.
    pub metadata: Value,
    /// Epoch-millisecond fire time.
    pub triggered_at: i64,
}

impl Alert {
    /// Build an alert for a rule.
    pub fn new(
        rule_id: &str,
        category: AlertCategory,
        severity: AlertSeverity,
        title: impl Into<String>,
        message: impl Into<String>,
        triggered_at: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            rule_id: rule_id.to_string(),
            category,
            severity,
            title: title.into(),
            message: message.into(),
            affected_node_ids: Vec::new(),
            metadata: Value::Null,
            triggered_at,
        }
    }

    /// Attach affected nodes.
    pub fn with_affected(mut self, ids: Vec<NodeId>) -> Self {
        self.affected_node_ids = ids;
        self
    }

    /// Attach metadata.
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Everything a rule may look at during evaluation.
pub struct RuleContext<'a, S: GraphStore> {
    /// The engine (blast radius, cost rollups).
    pub engine: &'a GraphEngine<S>,
    /// The store.
    pub store: &'a S,
    /// Sync records from the cycle that just ran.
    pub sync_records: &'a [SyncRecord],
    /// Stats captured after the previous cycle, if any.
    pub previous_stats: Option<&'a GraphStats>,
    /// Stats captured after this cycle.
    pub current_stats: &'a GraphStats,
    /// Start of the evaluation window (previous cycle time).
    pub window_start_ms: i64,
    /// Evaluation timestamp.
    pub now_ms: i64,
}

/// An alert rule.
#[async_trait]
pub trait AlertRule<S: GraphStore>: Send + Sync {
    /// Stable rule id (cooldown key).
    fn id(&self) -> &str;

    /// Display name.
    fn name(&self) -> &str;

    /// Category of the alerts this rule raises.
    fn category(&self) -> AlertCategory;

    /// Baseline severity; individual alerts may escalate it.
    fn severity(&self) -> AlertSeverity;

    /// Whether the rule participates in evaluation.
    fn enabled(&self) -> bool {
        true
    }

    /// Evaluate against the cycle context. Errors are swallowed per rule
    /// by the monitor and never affect other rules.
    async fn evaluate(&self, ctx: &RuleContext<'_, S>) -> Result<Vec<Alert>, MonitorError>;
}

/// Built-in rule set.
pub fn builtin_rules<S: GraphStore + 'static>() -> Vec<Box<dyn AlertRule<S>>> {
    vec![
        Box::new(OrphanRule),
        Box::new(SpofRule),
        Box::new(CostAnomalyRule),
        Box::new(UnauthorizedChangeRule),
        Box::new(DisappearedRule),
    ]
}

/// Nodes with zero edges in either direction.
pub struct OrphanRule;

#[async_trait]
impl<S: GraphStore + 'static> AlertRule<S> for OrphanRule {
    fn id(&self) -> &str {
        "builtin-orphan"
    }

    fn name(&self) -> &str {
        "orphaned resources"
    }

    fn category(&self) -> AlertCategory {
        AlertCategory::Orphan
    }

    fn severity(&self) -> AlertSeverity {
        AlertSeverity::Warning
    }

    async fn evaluate(&self, ctx: &RuleContext<'_, S>) -> Result<Vec<Alert>, MonitorError> {
        let nodes = ctx.store.query_nodes(&NodeFilter::default()).await?;
        let mut orphans = Vec::new();
        let mut stranded_cost = 0.0;

        for node in nodes {
            let edges = ctx
                .store
                .get_edges_for_node(&node.id, Direction::Both)
                .await?;
            if edges.is_empty() {
                stranded_cost += node.cost_monthly.unwrap_or(0.0);
                orphans.push(node.id);
            }
        }

        if orphans.is_empty() {
            return Ok(Vec::new());
        }

        let severity = if stranded_cost > ORPHAN_COST_CRITICAL_USD {
            AlertSeverity::Critical
        } else {
            AlertSeverity::Warning
        };
        Ok(vec![Alert::new(
            <OrphanRule as AlertRule<S>>::id(self),
            AlertCategory::Orphan,
            severity,
            format!("{} orphaned resources", orphans.len()),
            format!(
                "{} resources have no relationships; ${stranded_cost:.2}/month may be stranded",
                orphans.len()
            ),
            ctx.now_ms,
        )
        .with_affected(orphans)
        .with_metadata(json!({ "strandedCostMonthly": stranded_cost }))])
    }
}

/// High-degree nodes whose downstream reach covers a large share of the
/// graph.
pub struct SpofRule;

#[async_trait]
impl<S: GraphStore + 'static> AlertRule<S> for SpofRule {
    fn id(&self) -> &str {
        "builtin-spof"
    }

    fn name(&self) -> &str {
        "single points of failure"
    }

    fn category(&self) -> AlertCategory {
        AlertCategory::Spof
    }

    fn severity(&self) -> AlertSeverity {
        AlertSeverity::Critical
    }

    async fn evaluate(&self, ctx: &RuleContext<'_, S>) -> Result<Vec<Alert>, MonitorError> {
        let nodes = ctx.store.query_nodes(&NodeFilter::default()).await?;
        let total = nodes.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let mut alerts = Vec::new();
        for node in nodes {
            let degree = ctx
                .store
                .get_edges_for_node(&node.id, Direction::Both)
                .await?
                .len();
            if degree < SPOF_MIN_DEGREE {
                continue;
            }
            let blast = match ctx.engine.get_blast_radius(&node.id, u32::MAX).await {
                Ok(blast) => blast,
                Err(_) => continue,
            };
            let ratio = blast.affected_count() as f64 / total as f64;
            if ratio <= SPOF_REACH_RATIO {
                continue;
            }
            alerts.push(
                Alert::new(
                    <SpofRule as AlertRule<S>>::id(self),
                    AlertCategory::Spof,
                    AlertSeverity::Critical,
                    format!("single point of failure: {}", node.name),
                    format!(
                        "{} has {degree} edges and reaches {:.0}% of the graph downstream",
                        node.id,
                        ratio * 100.0
                    ),
                    ctx.now_ms,
                )
                .with_affected(vec![node.id.clone()])
                .with_metadata(json!({
                    "degree": degree,
                    "reachabilityRatio": ratio,
                    "downstreamCostMonthly": blast.total_cost_monthly,
                })),
            );
        }
        Ok(alerts)
    }
}

/// Total monthly cost grew more than the threshold since the previous
/// cycle.
pub struct CostAnomalyRule;

#[async_trait]
impl<S: GraphStore + 'static> AlertRule<S> for CostAnomalyRule {
    fn id(&self) -> &str {
        "builtin-cost-anomaly"
    }

    fn name(&self) -> &str {
        "cost anomaly"
    }

    fn category(&self) -> AlertCategory {
        AlertCategory::CostAnomaly
    }

    fn severity(&self) -> AlertSeverity {
        AlertSeverity::Warning
    }

    async fn evaluate(&self, ctx: &RuleContext<'_, S>) -> Result<Vec<Alert>, MonitorError> {
        let previous = match ctx.previous_stats {
            Some(previous) => previous,
            None => return Ok(Vec::new()),
        };
        let growth = match ctx.current_stats.cost_growth_pct(previous) {
            Some(growth) if growth > COST_GROWTH_WARNING_PCT => growth,
            _ => return Ok(Vec::new()),
        };

        let impact = ctx.current_stats.total_cost_monthly - previous.total_cost_monthly;
        let severity = if growth >= COST_GROWTH_CRITICAL_PCT {
            AlertSeverity::Critical
        } else {
            AlertSeverity::Warning
        };
        Ok(vec![Alert::new(
            <CostAnomalyRule as AlertRule<S>>::id(self),
            AlertCategory::CostAnomaly,
            severity,
            format!("monthly cost up {growth:.1}%"),
            format!(
                "total monthly cost moved from ${:.2} to ${:.2} since the last cycle",
                previous.total_cost_monthly, ctx.current_stats.total_cost_monthly
            ),
            ctx.now_ms,
        )
        .with_metadata(json!({
            "costImpact": impact,
            "growthPct": growth,
        }))])
    }
}

/// Mutations without attribution: agent changes with no correlation id,
/// or mutations with no initiator at all.
pub struct UnauthorizedChangeRule;

#[async_trait]
impl<S: GraphStore + 'static> AlertRule<S> for UnauthorizedChangeRule {
    fn id(&self) -> &str {
        "builtin-unauthorized-change"
    }

    fn name(&self) -> &str {
        "unauthorized changes"
    }

    fn category(&self) -> AlertCategory {
        AlertCategory::UnauthorizedChange
    }

    fn severity(&self) -> AlertSeverity {
        AlertSeverity::Critical
    }

    async fn evaluate(&self, ctx: &RuleContext<'_, S>) -> Result<Vec<Alert>, MonitorError> {
        let changes = ctx
            .store
            .get_changes(&ChangeFilter {
                since_ms: Some(ctx.window_start_ms),
                ..ChangeFilter::default()
            })
            .await?;

        let suspicious: Vec<_> = changes
            .iter()
            .filter(|c| {
                let unattributed_agent =
                    c.initiator_type == InitiatorType::Agent && c.correlation_id.is_none();
                // The store's own bookkeeping runs as system; everything
                // else mutating without an initiator is suspect.
                let anonymous_mutation = c.is_mutation()
                    && c.initiator.is_none()
                    && !matches!(
                        c.initiator_type,
                        InitiatorType::System
                    );
                unattributed_agent || anonymous_mutation
            })
            .collect();

        if suspicious.is_empty() {
            return Ok(Vec::new());
        }

        let affected: Vec<NodeId> = suspicious
            .iter()
            .map(|c| NodeId::from_raw(c.target_id.clone()))
            .collect();
        Ok(vec![Alert::new(
            <UnauthorizedChangeRule as AlertRule<S>>::id(self),
            AlertCategory::UnauthorizedChange,
            AlertSeverity::Critical,
            format!("{} unattributed changes", suspicious.len()),
            "changes were made without correlation to an approved request".to_string(),
            ctx.now_ms,
        )
        .with_affected(affected)
        .with_metadata(json!({
            "changeIds": suspicious.iter().map(|c| c.id.clone()).collect::<Vec<_>>(),
        }))])
    }
}

/// A sync confirmed resource disappearances.
pub struct DisappearedRule;

#[async_trait]
impl<S: GraphStore + 'static> AlertRule<S> for DisappearedRule {
    fn id(&self) -> &str {
        "builtin-disappeared"
    }

    fn name(&self) -> &str {
        "disappeared resources"
    }

    fn category(&self) -> AlertCategory {
        AlertCategory::Disappeared
    }

    fn severity(&self) -> AlertSeverity {
        AlertSeverity::Warning
    }

    async fn evaluate(&self, ctx: &RuleContext<'_, S>) -> Result<Vec<Alert>, MonitorError> {
        let disappeared_total: u64 = ctx
            .sync_records
            .iter()
            .map(|r| r.nodes_disappeared)
            .sum();
        if disappeared_total == 0 {
            return Ok(Vec::new());
        }

        // Pull the ids from the disappearance changes in this window.
        let changes = ctx
            .store
            .get_changes(&ChangeFilter {
                change_type: Some(ChangeType::NodeDisappeared),
                since_ms: Some(ctx.window_start_ms),
                ..ChangeFilter::default()
            })
            .await?;
        let affected: Vec<NodeId> = changes
            .iter()
            .map(|c| NodeId::from_raw(c.target_id.clone()))
            .collect();

        Ok(vec![Alert::new(
            <DisappearedRule as AlertRule<S>>::id(self),
            AlertCategory::Disappeared,
            AlertSeverity::Warning,
            format!("{disappeared_total} resources disappeared"),
            "resources recorded in the graph are no longer reported by their provider"
                .to_string(),
            ctx.now_ms,
        )
        .with_affected(affected)])
    }
}
