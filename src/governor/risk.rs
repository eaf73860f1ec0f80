//! Risk scoring for change requests.
//!
//! Score = action weight + blast-radius term + production flag +
//! unattributed-agent flag + critical-field flag, clamped to [0, 100].

use crate::engine::CRITICAL_FIELDS;
use crate::types::{ChangeRequestDraft, InitiatorType, Risk};

/// Cap on the blast-radius contribution.
const BLAST_RADIUS_CAP: u32 = 30;
/// Bonus for production-tagged targets.
const PRODUCTION_WEIGHT: u32 = 10;
/// Bonus for agent-initiated requests with no correlation id.
const UNATTRIBUTED_AGENT_WEIGHT: u32 = 15;
/// Bonus for touching a critical field.
const CRITICAL_FIELD_WEIGHT: u32 = 20;

/// Score a draft request.
pub fn score_risk(draft: &ChangeRequestDraft) -> Risk {
    let mut factors = Vec::new();

    let action_weight = draft.action.risk_weight();
    factors.push(format!("action {} (+{action_weight})", draft.action));
    let mut score = action_weight;

    let blast = (draft.affected_node_count * 2).min(BLAST_RADIUS_CAP);
    if blast > 0 {
        factors.push(format!(
            "blast radius {} nodes (+{blast})",
            draft.affected_node_count
        ));
        score += blast;
    }

    if draft.production {
        factors.push(format!("production environment (+{PRODUCTION_WEIGHT})"));
        score += PRODUCTION_WEIGHT;
    }

    if draft.initiator_type == InitiatorType::Agent && draft.correlation_id.is_none() {
        factors.push(format!(
            "agent-initiated without correlation (+{UNATTRIBUTED_AGENT_WEIGHT})"
        ));
        score += UNATTRIBUTED_AGENT_WEIGHT;
    }

    let critical: Vec<&String> = draft
        .touched_fields
        .iter()
        .filter(|field| {
            let leaf = field.rsplit('.').next().unwrap_or(field);
            CRITICAL_FIELDS.iter().any(|c| c.eq_ignore_ascii_case(leaf))
        })
        .collect();
    if !critical.is_empty() {
        factors.push(format!(
            "touches critical field {} (+{CRITICAL_FIELD_WEIGHT})",
            critical
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ));
        score += CRITICAL_FIELD_WEIGHT;
    }

    Risk::from_score(score, factors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChangeAction, Provider, ResourceType, RiskLevel};

    fn draft(action: ChangeAction) -> ChangeRequestDraft {
        ChangeRequestDraft {
            target_resource_id: "aws::us-east-1:database:db-1".into(),
            resource_type: ResourceType::Database,
            provider: Provider::Aws,
            action,
            initiator: "alice".into(),
            initiator_type: InitiatorType::Human,
            description: "test".into(),
            correlation_id: None,
            affected_node_count: 0,
            production: false,
            touched_fields: Vec::new(),
        }
    }

    #[test]
    fn test_base_action_weights() {
        assert_eq!(score_risk(&draft(ChangeAction::Create)).score, 10);
        assert_eq!(score_risk(&draft(ChangeAction::Delete)).score, 55);
    }

    #[test]
    fn test_blast_radius_capped_at_30() {
        let mut d = draft(ChangeAction::Update);
        d.affected_node_count = 100;
        let risk = score_risk(&d);
        assert_eq!(risk.score, 20 + 30);
    }

    #[test]
    fn test_unattributed_agent_penalty() {
        let mut d = draft(ChangeAction::Update);
        d.initiator_type = InitiatorType::Agent;
        assert_eq!(score_risk(&d).score, 35);

        d.correlation_id = Some("req-1".into());
        assert_eq!(score_risk(&d).score, 20);
    }

    #[test]
    fn test_full_stack_is_critical() {
        let mut d = draft(ChangeAction::Delete);
        d.affected_node_count = 20; // +30 (capped)
        d.production = true; // +10
        d.initiator_type = InitiatorType::Agent; // +15
        d.touched_fields = vec!["config.deletionProtection".into()]; // +20

        let risk = score_risk(&d);
        assert_eq!(risk.score, 100); // 55+30+10+15+20 = 130, clamped
        assert_eq!(risk.level, RiskLevel::Critical);
        assert_eq!(risk.factors.len(), 5);
    }

    #[test]
    fn test_levels_from_composite_scores() {
        assert_eq!(score_risk(&draft(ChangeAction::Create)).level, RiskLevel::Low);
        let mut d = draft(ChangeAction::Reconfigure);
        d.production = true;
        assert_eq!(score_risk(&d).level, RiskLevel::Medium); // 35
        d.touched_fields = vec!["encryption".into()];
        assert_eq!(score_risk(&d).level, RiskLevel::High); // 55
    }
}
