//! Remediation action synthesis.
//!
//! Per-kind behavior (can this type be modified in place? is it stateful?)
//! lives in lookup tables keyed by resource type.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::anomaly::CostAnomaly;
use super::{ComplianceViolation, DriftType, ResourceDrift};
use crate::engine::Severity;
use crate::types::{Provider, ResourceType};

/// What a remediation does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    /// Re-apply planned properties in place.
    Update,
    /// Destroy the resource.
    Delete,
    /// Destroy and provision again from the plan.
    Recreate,
    /// Capacity change advisory.
    Scale,
    /// Notify only.
    Alert,
}

/// Urgency of a remediation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionPriority {
    /// Fix eventually.
    Low,
    /// Fix soon.
    Medium,
    /// Fix now.
    High,
    /// Security/durability exposure.
    Critical,
}

/// One synthesized remediation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationAction {
    /// Unique id.
    pub id: String,
    /// What to do.
    pub action_type: ActionType,
    /// Plan-local id of the resource.
    pub plan_resource_id: String,
    /// Provisioned cloud id.
    pub cloud_id: String,
    /// Resource type.
    pub resource_type: ResourceType,
    /// Provider.
    pub provider: Provider,
    /// Urgency.
    pub priority: ActionPriority,
    /// Safe to run without a human in the loop.
    pub auto_executable: bool,
    /// Must pass human approval even when auto-remediation is on.
    pub approval_required: bool,
    /// Why this action exists.
    pub reason: String,
    /// Properties to apply, for update-shaped actions.
    pub properties: Value,
}

/// Whether a type supports modify-in-place updates.
pub fn supports_in_place_update(resource_type: ResourceType) -> bool {
    matches!(
        resource_type,
        ResourceType::Database
            | ResourceType::Serverless
            | ResourceType::Container
            | ResourceType::Storage
    )
}

/// Whether destroying a type risks data loss (final-snapshot guard).
pub fn is_stateful(resource_type: ResourceType) -> bool {
    matches!(
        resource_type,
        ResourceType::Database
            | ResourceType::Storage
            | ResourceType::Cache
            | ResourceType::Queue
            | ResourceType::Stream
    )
}

/// Derive remediation actions from one reconcile pass's findings.
pub fn synthesize(
    drifts: &[ResourceDrift],
    violations: &[ComplianceViolation],
    anomalies: &[CostAnomaly],
    cost_threshold_pct: f64,
) -> Vec<RemediationAction> {
    let mut actions = Vec::new();

    for drift in drifts {
        match drift.drift_type {
            DriftType::Deleted => {
                // Recreation provisions new infrastructure: always a human
                // decision.
                actions.push(RemediationAction {
                    id: Uuid::new_v4().to_string(),
                    action_type: ActionType::Recreate,
                    plan_resource_id: drift.plan_resource_id.clone(),
                    cloud_id: drift.cloud_id.clone(),
                    resource_type: drift.resource_type,
                    provider: drift.provider,
                    priority: ActionPriority::High,
                    auto_executable: false,
                    approval_required: true,
                    reason: "resource deleted outside the plan".to_string(),
                    properties: drift.planned_properties.clone(),
                });
            }
            DriftType::Configuration => {
                let critical = drift
                    .deltas
                    .iter()
                    .any(|d| d.severity == Severity::Critical);
                if critical && supports_in_place_update(drift.resource_type) {
                    actions.push(RemediationAction {
                        id: Uuid::new_v4().to_string(),
                        action_type: ActionType::Update,
                        plan_resource_id: drift.plan_resource_id.clone(),
                        cloud_id: drift.cloud_id.clone(),
                        resource_type: drift.resource_type,
                        provider: drift.provider,
                        priority: ActionPriority::Critical,
                        auto_executable: true,
                        approval_required: false,
                        reason: format!(
                            "critical configuration drift: {}",
                            drifted_paths(drift)
                        ),
                        properties: drift.planned_properties.clone(),
                    });
                } else if critical {
                    // Unsupported (type, action) pair degrades to alert.
                    actions.push(alert_action(
                        drift.plan_resource_id.clone(),
                        drift.cloud_id.clone(),
                        drift.resource_type,
                        drift.provider,
                        ActionPriority::Critical,
                        format!(
                            "critical drift on {} but {} does not support in-place update",
                            drifted_paths(drift),
                            drift.resource_type
                        ),
                    ));
                } else {
                    actions.push(RemediationAction {
                        id: Uuid::new_v4().to_string(),
                        action_type: ActionType::Update,
                        plan_resource_id: drift.plan_resource_id.clone(),
                        cloud_id: drift.cloud_id.clone(),
                        resource_type: drift.resource_type,
                        provider: drift.provider,
                        priority: ActionPriority::Medium,
                        auto_executable: false,
                        approval_required: false,
                        reason: format!("configuration drift: {}", drifted_paths(drift)),
                        properties: drift.planned_properties.clone(),
                    });
                }
            }
        }
    }

    for violation in violations {
        let critical = violation.severity == Severity::Critical;
        actions.push(RemediationAction {
            id: Uuid::new_v4().to_string(),
            action_type: if critical { ActionType::Update } else { ActionType::Alert },
            plan_resource_id: violation.plan_resource_id.clone(),
            cloud_id: violation.cloud_id.clone().unwrap_or_default(),
            resource_type: violation.resource_type,
            provider: violation.provider,
            priority: if critical {
                ActionPriority::Critical
            } else {
                ActionPriority::Medium
            },
            auto_executable: false,
            approval_required: critical,
            reason: format!("{}: {}", violation.rule, violation.message),
            properties: Value::Null,
        });
    }

    for anomaly in anomalies {
        if anomaly.deviation_pct.abs() > cost_threshold_pct * 2.0 {
            // Scale stays advisory: the engine never resizes on its own.
            actions.push(RemediationAction {
                id: Uuid::new_v4().to_string(),
                action_type: ActionType::Scale,
                plan_resource_id: anomaly.plan_resource_id.clone(),
                cloud_id: anomaly.cloud_id.clone(),
                resource_type: anomaly.resource_type,
                provider: Provider::Custom,
                priority: ActionPriority::High,
                auto_executable: false,
                approval_required: false,
                reason: format!(
                    "cost deviates {:.1}% from estimate (${:.2} vs ${:.2}); consider resizing",
                    anomaly.deviation_pct, anomaly.actual_monthly, anomaly.expected_monthly
                ),
                properties: Value::Null,
            });
        } else {
            actions.push(alert_action(
                anomaly.plan_resource_id.clone(),
                anomaly.cloud_id.clone(),
                anomaly.resource_type,
                Provider::Custom,
                ActionPriority::Medium,
                format!(
                    "cost deviates {:.1}% from estimate; possible causes: {}",
                    anomaly.deviation_pct,
                    anomaly.possible_causes.join(", ")
                ),
            ));
        }
    }

    actions.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
    actions
}

fn alert_action(
    plan_resource_id: String,
    cloud_id: String,
    resource_type: ResourceType,
    provider: Provider,
    priority: ActionPriority,
    reason: String,
) -> RemediationAction {
    RemediationAction {
        id: Uuid::new_v4().to_string(),
        action_type: ActionType::Alert,
        plan_resource_id,
        cloud_id,
        resource_type,
        provider,
        priority,
        auto_executable: false,
        approval_required: false,
        reason,
        properties: Value::Null,
    }
}

fn drifted_paths(drift: &ResourceDrift) -> String {
    drift
        .deltas
        .iter()
        .map(|d| d.path.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PropertyDelta;
    use serde_json::json;

    fn config_drift(path: &str, severity: Severity, rt: ResourceType) -> ResourceDrift {
        ResourceDrift {
            plan_resource_id: "db-main".into(),
            cloud_id: "db-1".into(),
            resource_type: rt,
            provider: Provider::Aws,
            drift_type: DriftType::Configuration,
            planned_properties: json!({"publiclyAccessible": false}),
            deltas: vec![PropertyDelta {
                path: path.into(),
                expected: json!(false),
                actual: json!(true),
                severity,
            }],
        }
    }

    #[test]
    fn test_critical_config_drift_is_auto_update() {
        let actions = synthesize(
            &[config_drift("publiclyAccessible", Severity::Critical, ResourceType::Database)],
            &[],
            &[],
            20.0,
        );
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action_type, ActionType::Update);
        assert!(actions[0].auto_executable);
        assert!(!actions[0].approval_required);
        assert_eq!(actions[0].priority, ActionPriority::Critical);
    }

    #[test]
    fn test_critical_drift_on_unsupported_type_degrades_to_alert() {
        let actions = synthesize(
            &[config_drift("encryption", Severity::Critical, ResourceType::Network)],
            &[],
            &[],
            20.0,
        );
        assert_eq!(actions[0].action_type, ActionType::Alert);
        assert!(!actions[0].auto_executable);
    }

    #[test]
    fn test_deleted_drift_is_manual_recreate() {
        let drift = ResourceDrift {
            plan_resource_id: "db-main".into(),
            cloud_id: "db-1".into(),
            resource_type: ResourceType::Database,
            provider: Provider::Aws,
            drift_type: DriftType::Deleted,
            planned_properties: json!({}),
            deltas: vec![],
        };
        let actions = synthesize(&[drift], &[], &[], 20.0);
        assert_eq!(actions[0].action_type, ActionType::Recreate);
        assert!(actions[0].approval_required);
        assert!(!actions[0].auto_executable);
    }

    #[test]
    fn test_large_anomaly_is_scale_advisory() {
        let anomaly = CostAnomaly {
            plan_resource_id: "db-main".into(),
            cloud_id: "db-1".into(),
            resource_type: ResourceType::Database,
            expected_monthly: 100.0,
            actual_monthly: 200.0,
            deviation_pct: 100.0,
            anomaly_type: super::super::anomaly::AnomalyType::Spike,
            possible_causes: vec![],
        };
        let actions = synthesize(&[], &[], &[anomaly], 20.0);
        assert_eq!(actions[0].action_type, ActionType::Scale);
        assert!(!actions[0].auto_executable, "scale is advisory only");
    }

    #[test]
    fn test_behavior_tables() {
        assert!(supports_in_place_update(ResourceType::Database));
        assert!(!supports_in_place_update(ResourceType::Network));
        assert!(is_stateful(ResourceType::Storage));
        assert!(!is_stateful(ResourceType::Compute));
    }
}
