//! Change requests: the governor's work items.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::change::InitiatorType;
use super::node::{Provider, ResourceType};

/// Action a change request wants to perform against the cloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    /// Provision a new resource.
    Create,
    /// Modify an existing resource in place.
    Update,
    /// Destroy a resource.
    Delete,
    /// Change capacity.
    Scale,
    /// Change configuration shape.
    Reconfigure,
}

impl ChangeAction {
    /// Base risk weight per the scoring model.
    pub fn risk_weight(&self) -> u32 {
        match self {
            Self::Create => 10,
            Self::Update => 20,
            Self::Scale => 15,
            Self::Reconfigure => 25,
            Self::Delete => 55,
        }
    }

    /// Parse action from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            "scale" => Some(Self::Scale),
            "reconfigure" => Some(Self::Reconfigure),
            _ => None,
        }
    }

    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Scale => "scale",
            Self::Reconfigure => "reconfigure",
        }
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Risk tier derived from the numeric score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Score < 25.
    Low,
    /// Score < 50.
    Medium,
    /// Score < 75.
    High,
    /// Score ≥ 75.
    Critical,
}

impl RiskLevel {
    /// Tier for a clamped score.
    pub fn from_score(score: u32) -> Self {
        match score {
            0..=24 => Self::Low,
            25..=49 => Self::Medium,
            50..=74 => Self::High,
            _ => Self::Critical,
        }
    }

    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Scored risk for one change request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Risk {
    /// Score in [0, 100].
    pub score: u32,
    /// Tier derived from the score.
    pub level: RiskLevel,
    /// Human-readable contributing factors.
    pub factors: Vec<String>,
}

impl Risk {
    /// Build a risk from an unclamped score and its factors.
    pub fn from_score(score: u32, factors: Vec<String>) -> Self {
        let score = score.min(100);
        Self {
            score,
            level: RiskLevel::from_score(score),
            factors,
        }
    }
}

/// Lifecycle state of a change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    /// Awaiting a verdict or approval.
    Pending,
    /// Cleared for execution.
    Approved,
    /// Denied, expired, or policy-blocked.
    Rejected,
    /// Executed against the cloud.
    Executed,
    /// Execution attempted and failed.
    Failed,
}

impl RequestStatus {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Executed => "executed",
            Self::Failed => "failed",
        }
    }

    /// Parse status from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "executed" => Some(Self::Executed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// True when no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Executed | Self::Failed)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A request to mutate a cloud resource, pending governance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRequest {
    /// Unique id; doubles as the correlation id on resulting changes.
    pub id: String,
    /// Node id of the target resource.
    pub target_resource_id: String,
    /// Resource kind.
    pub resource_type: ResourceType,
    /// Provider owning the resource.
    pub provider: Provider,
    /// Requested action.
    pub action: ChangeAction,
    /// Requesting principal.
    pub initiator: String,
    /// Class of the requesting principal.
    pub initiator_type: InitiatorType,
    /// Why the change is wanted.
    pub description: String,
    /// Scored risk.
    pub risk: Risk,
    /// Lifecycle state.
    pub status: RequestStatus,
    /// Epoch-millisecond creation timestamp.
    pub created_at: i64,
    /// Approver, once approved.
    pub approved_by: Option<String>,
    /// Rejection reason, once rejected.
    pub rejection_reason: Option<String>,
    /// Epoch-millisecond execution timestamp, once executed.
    pub executed_at: Option<i64>,
}

/// Unscored request payload handed to the governor.
#[derive(Debug, Clone)]
pub struct ChangeRequestDraft {
    /// Node id of the target resource.
    pub target_resource_id: String,
    /// Resource kind.
    pub resource_type: ResourceType,
    /// Provider owning the resource.
    pub provider: Provider,
    /// Requested action.
    pub action: ChangeAction,
    /// Requesting principal.
    pub initiator: String,
    /// Class of the requesting principal.
    pub initiator_type: InitiatorType,
    /// Why the change is wanted.
    pub description: String,
    /// Correlation id the requester already carries, when re-submitting
    /// governed work (absence of one on agent requests raises risk).
    pub correlation_id: Option<String>,
    /// Downstream nodes affected, for blast-radius scoring.
    pub affected_node_count: u32,
    /// True when the target is tagged as a production resource.
    pub production: bool,
    /// Fields this change touches, for critical-field scoring.
    pub touched_fields: Vec<String>,
}

impl ChangeRequest {
    /// Materialize a pending request from a draft and its scored risk.
    pub fn from_draft(draft: &ChangeRequestDraft, risk: Risk, now_ms: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            target_resource_id: draft.target_resource_id.clone(),
            resource_type: draft.resource_type,
            provider: draft.provider,
            action: draft.action,
            initiator: draft.initiator.clone(),
            initiator_type: draft.initiator_type,
            description: draft.description.clone(),
            risk,
            status: RequestStatus::Pending,
            created_at: now_ms,
            approved_by: None,
            rejection_reason: None,
            executed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_boundaries() {
        assert_eq!(RiskLevel::from_score(0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(24), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(25), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(49), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(50), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(74), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(75), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(100), RiskLevel::Critical);
    }

    #[test]
    fn test_risk_score_clamped_to_100() {
        let risk = Risk::from_score(140, vec![]);
        assert_eq!(risk.score, 100);
        assert_eq!(risk.level, RiskLevel::Critical);
    }

    #[test]
    fn test_action_weights() {
        assert_eq!(ChangeAction::Create.risk_weight(), 10);
        assert_eq!(ChangeAction::Update.risk_weight(), 20);
        assert_eq!(ChangeAction::Scale.risk_weight(), 15);
        assert_eq!(ChangeAction::Reconfigure.risk_weight(), 25);
        assert_eq!(ChangeAction::Delete.risk_weight(), 55);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!RequestStatus::Pending.is_terminal());
        assert!(!RequestStatus::Approved.is_terminal());
        assert!(RequestStatus::Rejected.is_terminal());
        assert!(RequestStatus::Executed.is_terminal());
        assert!(RequestStatus::Failed.is_terminal());
    }
}
