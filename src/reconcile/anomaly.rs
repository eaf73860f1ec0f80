//! Cost anomaly detection.
//!
//! Compares the billing source's last-30-day actual against the plan's
//! estimate. Deviations beyond the threshold become anomalies: positive
//! deviations are spikes, negative ones are trends (spend drifting away
//! from the footprint the plan expected).

use serde::{Deserialize, Serialize};

use crate::types::{PlannedResource, ResourceType};

/// Direction of a cost deviation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyType {
    /// Actual spend above estimate.
    Spike,
    /// Actual spend below estimate.
    Trend,
}

/// One detected cost anomaly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostAnomaly {
    /// Plan-local resource id.
    pub plan_resource_id: String,
    /// Provisioned cloud id.
    pub cloud_id: String,
    /// Resource type.
    pub resource_type: ResourceType,
    /// Planned estimate (USD/month).
    pub expected_monthly: f64,
    /// Observed actual (USD/month).
    pub actual_monthly: f64,
    /// Signed deviation percentage.
    pub deviation_pct: f64,
    /// Spike or trend.
    pub anomaly_type: AnomalyType,
    /// Heuristic causes, keyed by resource type.
    pub possible_causes: Vec<String>,
}

/// Compare actual vs estimate; `None` when within threshold or when either
/// figure is unavailable.
pub fn evaluate_cost(
    planned: &PlannedResource,
    cloud_id: &str,
    actual_monthly: Option<f64>,
    threshold_pct: f64,
) -> Option<CostAnomaly> {
    let expected = planned.estimated_monthly_cost?;
    let actual = actual_monthly?;
    if expected <= f64::EPSILON {
        return None;
    }

    let deviation_pct = (actual - expected) / expected * 100.0;
    if deviation_pct.abs() <= threshold_pct {
        return None;
    }

    let anomaly_type = if deviation_pct > 0.0 {
        AnomalyType::Spike
    } else {
        AnomalyType::Trend
    };
    Some(CostAnomaly {
        plan_resource_id: planned.id.clone(),
        cloud_id: cloud_id.to_string(),
        resource_type: planned.resource_type,
        expected_monthly: expected,
        actual_monthly: actual,
        deviation_pct,
        anomaly_type,
        possible_causes: possible_causes(planned.resource_type, anomaly_type),
    })
}

/// Heuristic cause table, keyed by resource type.
pub fn possible_causes(resource_type: ResourceType, anomaly_type: AnomalyType) -> Vec<String> {
    let causes: &[&str] = match (resource_type, anomaly_type) {
        (ResourceType::Database, AnomalyType::Spike) => &[
            "storage autoscaling growth",
            "instance class changed",
            "read replica added",
            "backup retention increased",
        ],
        (ResourceType::Database, AnomalyType::Trend) => {
            &["instance downsized", "replica removed"]
        }
        (ResourceType::Compute, AnomalyType::Spike) => &[
            "instance resized",
            "burst credits exhausted",
            "autoscaling group grew",
        ],
        (ResourceType::Compute, AnomalyType::Trend) => {
            &["instances stopped", "reserved pricing applied"]
        }
        (ResourceType::Storage, AnomalyType::Spike) => &[
            "object growth",
            "egress traffic spike",
            "lifecycle policies disabled",
        ],
        (ResourceType::Serverless, AnomalyType::Spike) => &[
            "invocation volume increase",
            "memory allocation raised",
            "timeout extended",
        ],
        (ResourceType::Cache, AnomalyType::Spike) => {
            &["node type upgraded", "cluster scaled out"]
        }
        (_, AnomalyType::Spike) => &["usage growth", "pricing change"],
        (_, AnomalyType::Trend) => &["usage decline", "resources idle"],
    };
    causes.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Provider;

    fn planned(estimate: Option<f64>) -> PlannedResource {
        PlannedResource {
            id: "db-main".into(),
            name: "orders".into(),
            resource_type: ResourceType::Database,
            provider: Provider::Aws,
            region: "us-east-1".into(),
            properties: serde_json::Value::Null,
            estimated_monthly_cost: estimate,
            tags: Default::default(),
        }
    }

    #[test]
    fn test_within_threshold_is_quiet() {
        assert!(evaluate_cost(&planned(Some(100.0)), "db-1", Some(115.0), 20.0).is_none());
    }

    #[test]
    fn test_spike_above_threshold() {
        let anomaly = evaluate_cost(&planned(Some(100.0)), "db-1", Some(150.0), 20.0).unwrap();
        assert_eq!(anomaly.anomaly_type, AnomalyType::Spike);
        assert_eq!(anomaly.deviation_pct, 50.0);
        assert!(!anomaly.possible_causes.is_empty());
    }

    #[test]
    fn test_negative_deviation_is_trend() {
        let anomaly = evaluate_cost(&planned(Some(100.0)), "db-1", Some(40.0), 20.0).unwrap();
        assert_eq!(anomaly.anomaly_type, AnomalyType::Trend);
        assert_eq!(anomaly.deviation_pct, -60.0);
    }

    #[test]
    fn test_missing_estimate_or_actual_is_quiet() {
        assert!(evaluate_cost(&planned(None), "db-1", Some(500.0), 20.0).is_none());
        assert!(evaluate_cost(&planned(Some(100.0)), "db-1", None, 20.0).is_none());
    }
}
