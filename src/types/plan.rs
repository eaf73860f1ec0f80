//! Intent-side types owned by the reconciler.
//!
//! A `Plan` declares desired resources under plan-local ids; an `Execution`
//! records what was actually provisioned and maps plan ids to cloud ids.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::node::{Provider, ResourceType};

/// One desired resource inside a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedResource {
    /// Plan-local id (unique within the plan).
    pub id: String,
    /// Display name.
    pub name: String,
    /// Resource kind.
    pub resource_type: ResourceType,
    /// Target provider.
    pub provider: Provider,
    /// Target region.
    pub region: String,
    /// Desired configuration properties.
    pub properties: Value,
    /// Cost estimate in USD/month, when the planner produced one.
    #[serde(default)]
    pub estimated_monthly_cost: Option<f64>,
    /// Desired tags.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// A declared set of desired resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Unique plan id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Desired resources.
    pub resources: Vec<PlannedResource>,
    /// Epoch-millisecond creation timestamp.
    pub created_at: i64,
}

impl Plan {
    /// Look up a planned resource by its plan-local id.
    pub fn resource(&self, plan_resource_id: &str) -> Option<&PlannedResource> {
        self.resources.iter().find(|r| r.id == plan_resource_id)
    }
}

/// A resource actually provisioned for a plan entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionedResource {
    /// Plan-local id this provisioning satisfies.
    pub plan_resource_id: String,
    /// Provider-native id of the provisioned resource.
    pub cloud_id: String,
    /// Resource kind.
    pub resource_type: ResourceType,
    /// Provider.
    pub provider: Provider,
    /// Region.
    pub region: String,
}

/// Record of one provisioning run for a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    /// Unique execution id.
    pub id: String,
    /// Plan this execution implements.
    pub plan_id: String,
    /// Provisioned resources, one per satisfied plan entry.
    pub provisioned: Vec<ProvisionedResource>,
    /// Epoch-millisecond start timestamp.
    pub started_at: i64,
    /// Epoch-millisecond completion timestamp, once finished.
    pub completed_at: Option<i64>,
}

impl Execution {
    /// Cloud id provisioned for a plan-local id, when any.
    pub fn cloud_id_for(&self, plan_resource_id: &str) -> Option<&str> {
        self.provisioned
            .iter()
            .find(|p| p.plan_resource_id == plan_resource_id)
            .map(|p| p.cloud_id.as_str())
    }

    /// Plan-local id a cloud id was provisioned for, when any.
    pub fn plan_resource_for(&self, cloud_id: &str) -> Option<&str> {
        self.provisioned
            .iter()
            .find(|p| p.cloud_id == cloud_id)
            .map(|p| p.plan_resource_id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_id_mapping_round_trip() {
        let exec = Execution {
            id: "x1".into(),
            plan_id: "p1".into(),
            provisioned: vec![ProvisionedResource {
                plan_resource_id: "db-main".into(),
                cloud_id: "db-0a1b2c".into(),
                resource_type: ResourceType::Database,
                provider: Provider::Aws,
                region: "us-east-1".into(),
            }],
            started_at: 1,
            completed_at: Some(2),
        };

        assert_eq!(exec.cloud_id_for("db-main"), Some("db-0a1b2c"));
        assert_eq!(exec.plan_resource_for("db-0a1b2c"), Some("db-main"));
        assert_eq!(exec.cloud_id_for("missing"), None);
    }
}
