//! Governance policies.
//!
//! A policy is a predicate over a scored change request. The governor
//! evaluates every applicable policy: one deny short-circuits to reject,
//! one require-approval holds the request pending, otherwise it proceeds.

use crate::types::{ChangeAction, ChangeRequest, InitiatorType, RiskLevel};

/// Policy verdict for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Proceed.
    Allow,
    /// Reject outright.
    Deny,
    /// Hold until a human approves.
    RequireApproval,
}

/// A governance rule.
pub trait Policy: Send + Sync {
    /// Policy name, used in rejection reasons and audit messages.
    fn name(&self) -> &str;

    /// Whether this policy has an opinion about the request.
    fn applies_when(&self, request: &ChangeRequest) -> bool;

    /// The opinion.
    fn verdict(&self, request: &ChangeRequest) -> Verdict;

    /// Human-readable explanation attached to rejections and holds.
    fn message(&self, request: &ChangeRequest) -> String;
}

/// Hold any request at or above a risk level for human approval.
pub struct ApprovalAboveRisk {
    /// Requests at or above this level are held.
    pub threshold: RiskLevel,
}

impl Default for ApprovalAboveRisk {
    fn default() -> Self {
        Self {
            threshold: RiskLevel::High,
        }
    }
}

impl Policy for ApprovalAboveRisk {
    fn name(&self) -> &str {
        "approval-above-risk"
    }

    fn applies_when(&self, request: &ChangeRequest) -> bool {
        request.risk.level >= self.threshold
    }

    fn verdict(&self, _request: &ChangeRequest) -> Verdict {
        Verdict::RequireApproval
    }

    fn message(&self, request: &ChangeRequest) -> String {
        format!(
            "risk {} ({}) is at or above {}; approval required",
            request.risk.score, request.risk.level, self.threshold
        )
    }
}

/// Deny deletes issued by agents with no correlation id.
///
/// An autonomous delete that cannot be traced back to an approved request
/// is never acceptable.
pub struct DenyUnattributedAgentDeletes;

impl Policy for DenyUnattributedAgentDeletes {
    fn name(&self) -> &str {
        "deny-unattributed-agent-deletes"
    }

    fn applies_when(&self, request: &ChangeRequest) -> bool {
        request.action == ChangeAction::Delete
            && request.initiator_type == InitiatorType::Agent
    }

    fn verdict(&self, _request: &ChangeRequest) -> Verdict {
        Verdict::Deny
    }

    fn message(&self, request: &ChangeRequest) -> String {
        format!(
            "agent '{}' may not delete {} without an approved request",
            request.initiator, request.target_resource_id
        )
    }
}

/// Default policy set: hold high-risk changes, refuse untraceable agent
/// deletes.
pub fn default_policies() -> Vec<Box<dyn Policy>> {
    vec![
        Box::new(ApprovalAboveRisk::default()),
        Box::new(DenyUnattributedAgentDeletes),
    ]
}
