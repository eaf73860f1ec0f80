//! Change governor: risk scoring, policy evaluation, approval, audit.
//!
//! Every mutation bound for an adapter flows through here. A request is
//! scored, evaluated against the policy set, optionally held for human
//! approval, and only then executed; every state transition and every
//! executed cloud change is recorded with the request id as correlation.

pub mod policy;
pub mod risk;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapter::{AdapterError, CloudAdapter};
use crate::clock::MonotonicClock;
use crate::store::{GraphStore, StoreError};
use crate::types::{
    Change, ChangeAction, ChangeRequest, ChangeRequestDraft, ChangeType, DetectedVia,
    InitiatorType, RequestStatus,
};

pub use policy::{default_policies, ApprovalAboveRisk, DenyUnattributedAgentDeletes, Policy, Verdict};
pub use risk::score_risk;

/// Error type for governor operations.
#[derive(Debug, thiserror::Error)]
pub enum GovernorError {
    /// Request id is unknown.
    #[error("change request not found: {0}")]
    NotFound(String),
    /// Transition not allowed from the current state.
    #[error("invalid transition for request {id}: {from} -> {to}")]
    InvalidTransition {
        /// Request id.
        id: String,
        /// Current status.
        from: RequestStatus,
        /// Requested status.
        to: RequestStatus,
    },
    /// A policy denied the request.
    #[error("policy denied: {0}")]
    PolicyDenied(String),
    /// Execution against the adapter failed.
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),
    /// Underlying store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Governor settings.
#[derive(Debug, Clone)]
pub struct GovernorConfig {
    /// Pending requests expire to rejected after this long.
    pub pending_ttl: Duration,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            pending_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl GovernorConfig {
    /// Load from `GOVERNOR_PENDING_TTL_SECS` with production defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            pending_ttl: std::env::var("GOVERNOR_PENDING_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.pending_ttl),
        }
    }
}

/// Audit trail query.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    /// Restrict to one target resource.
    pub target_resource_id: Option<String>,
    /// Restrict to one action.
    pub action: Option<ChangeAction>,
    /// Maximum rows (default 100).
    pub limit: Option<usize>,
}

/// Aggregate governor statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GovernorSummary {
    /// Requests ever submitted.
    pub total: u64,
    /// Requests per status.
    pub by_status: BTreeMap<String, u64>,
    /// Requests per risk level.
    pub by_risk_level: BTreeMap<String, u64>,
    /// Requests per action.
    pub by_action: BTreeMap<String, u64>,
    /// Mean risk score.
    pub avg_risk_score: f64,
    /// Requests a policy denied.
    pub policy_violation_count: u64,
}

/// The change governor.
pub struct ChangeGovernor<S: GraphStore> {
    store: Arc<S>,
    policies: Vec<Box<dyn Policy>>,
    /// Pending-set access is serialized; the store holds the durable copy.
    pending: Mutex<BTreeMap<String, ChangeRequest>>,
    policy_violations: AtomicU64,
    config: GovernorConfig,
    clock: MonotonicClock,
}

impl<S: GraphStore + 'static> ChangeGovernor<S> {
    /// Governor with the default policy set.
    pub fn new(store: Arc<S>, config: GovernorConfig) -> Self {
        Self::with_policies(store, config, default_policies())
    }

    /// Governor with an explicit policy set.
    pub fn with_policies(
        store: Arc<S>,
        config: GovernorConfig,
        policies: Vec<Box<dyn Policy>>,
    ) -> Self {
        Self {
            store,
            policies,
            pending: Mutex::new(BTreeMap::new()),
            policy_violations: AtomicU64::new(0),
            config,
            clock: MonotonicClock::new(),
        }
    }

    /// Score, policy-check, and register a change request.
    ///
    /// Outcomes: a deny rejects immediately; a require-approval leaves the
    /// request pending; otherwise it is auto-approved and ready to execute.
    pub async fn submit(
        &self,
        draft: ChangeRequestDraft,
    ) -> Result<ChangeRequest, GovernorError> {
        let risk = score_risk(&draft);
        let mut request = ChangeRequest::from_draft(&draft, risk, self.clock.now_ms());

        let mut hold_reason: Option<String> = None;
        for policy in &self.policies {
            if !policy.applies_when(&request) {
                continue;
            }
            match policy.verdict(&request) {
                Verdict::Deny => {
                    let reason = policy.message(&request);
                    request.status = RequestStatus::Rejected;
                    request.rejection_reason = Some(reason.clone());
                    self.policy_violations.fetch_add(1, Ordering::Relaxed);
                    self.store.save_change_request(&request).await?;
                    self.audit_transition(&request, RequestStatus::Pending, None)
                        .await?;
                    tracing::warn!(
                        request = %request.id,
                        policy = policy.name(),
                        %reason,
                        "change request denied by policy"
                    );
                    return Ok(request);
                }
                Verdict::RequireApproval => {
                    hold_reason.get_or_insert_with(|| policy.message(&request));
                }
                Verdict::Allow => {}
            }
        }

        match hold_reason {
            Some(reason) => {
                self.store.save_change_request(&request).await?;
                self.pending
                    .lock()
                    .insert(request.id.clone(), request.clone());
                tracing::info!(request = %request.id, %reason, "change request held for approval");
            }
            None => {
                request.status = RequestStatus::Approved;
                request.approved_by = Some("policy:auto".to_string());
                self.store.save_change_request(&request).await?;
                self.audit_transition(&request, RequestStatus::Pending, None)
                    .await?;
                tracing::info!(request = %request.id, risk = request.risk.score, "change request auto-approved");
            }
        }
        Ok(request)
    }

    /// Approve a pending request.
    pub async fn approve(
        &self,
        id: &str,
        approver: impl Into<String>,
    ) -> Result<ChangeRequest, GovernorError> {
        let mut request = self.load(id).await?;
        self.check_transition(&request, RequestStatus::Approved)?;
        request.status = RequestStatus::Approved;
        request.approved_by = Some(approver.into());
        self.store.save_change_request(&request).await?;
        self.pending.lock().remove(id);
        self.audit_transition(&request, RequestStatus::Pending, None)
            .await?;
        Ok(request)
    }

    /// Reject a pending request.
    pub async fn reject(
        &self,
        id: &str,
        reason: impl Into<String>,
    ) -> Result<ChangeRequest, GovernorError> {
        let mut request = self.load(id).await?;
        self.check_transition(&request, RequestStatus::Rejected)?;
        request.status = RequestStatus::Rejected;
        request.rejection_reason = Some(reason.into());
        self.store.save_change_request(&request).await?;
        self.pending.lock().remove(id);
        self.audit_transition(&request, RequestStatus::Pending, None)
            .await?;
        Ok(request)
    }

    /// Execute an approved request through its adapter, recording the
    /// outcome and the resulting cloud change.
    ///
    /// The appended change carries the request id as correlation, which is
    /// what makes governed mutations traceable end to end.
    pub async fn execute(
        &self,
        id: &str,
        adapter: &Arc<dyn CloudAdapter>,
        native_id: &str,
        properties: &Value,
    ) -> Result<ChangeRequest, GovernorError> {
        let mut request = self.load(id).await?;
        if request.status != RequestStatus::Approved {
            return Err(GovernorError::InvalidTransition {
                id: request.id,
                from: request.status,
                to: RequestStatus::Executed,
            });
        }

        let result = adapter
            .mutate(request.action, native_id, request.resource_type, properties)
            .await;

        match result {
            Ok(()) => {
                request.status = RequestStatus::Executed;
                request.executed_at = Some(self.clock.now_ms());
                self.store.save_change_request(&request).await?;
                self.audit_transition(&request, RequestStatus::Approved, None)
                    .await?;

                let change_type = match request.action {
                    ChangeAction::Create => ChangeType::NodeCreated,
                    ChangeAction::Delete => ChangeType::NodeDeleted,
                    _ => ChangeType::NodeUpdated,
                };
                let change = Change::new(
                    request.target_resource_id.clone(),
                    change_type,
                    DetectedVia::Manual,
                    self.clock.now_ms(),
                )
                .with_initiator(request.initiator.clone(), request.initiator_type)
                .with_correlation(request.id.clone())
                .with_metadata(serde_json::json!({
                    "action": request.action,
                    "properties": properties,
                }));
                self.store.append_changes(std::slice::from_ref(&change)).await?;
                tracing::info!(request = %request.id, action = %request.action, "change executed");
                Ok(request)
            }
            Err(err) => {
                request.status = RequestStatus::Failed;
                self.store.save_change_request(&request).await?;
                self.audit_transition(
                    &request,
                    RequestStatus::Approved,
                    Some(err.to_string()),
                )
                .await?;
                tracing::error!(request = %request.id, error = %err, "change execution failed");
                Err(err.into())
            }
        }
    }

    /// Expire pending requests older than the configured TTL. Returns the
    /// number expired.
    pub async fn expire_pending(&self) -> Result<usize, GovernorError> {
        let cutoff = self.clock.now_ms() - self.config.pending_ttl.as_millis() as i64;
        let expired: Vec<ChangeRequest> = {
            let pending = self.pending.lock();
            pending
                .values()
                .filter(|r| r.created_at < cutoff)
                .cloned()
                .collect()
        };

        for mut request in expired.clone() {
            request.status = RequestStatus::Rejected;
            request.rejection_reason = Some("expired".to_string());
            self.store.save_change_request(&request).await?;
            self.pending.lock().remove(&request.id);
            self.audit_transition(&request, RequestStatus::Pending, None)
                .await?;
            tracing::info!(request = %request.id, "pending change request expired");
        }
        Ok(expired.len())
    }

    /// All pending requests, oldest first.
    pub fn get_pending_requests(&self) -> Vec<ChangeRequest> {
        let mut pending: Vec<ChangeRequest> = self.pending.lock().values().cloned().collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        pending
    }

    /// Newest-first audit slice.
    pub async fn get_audit_trail(
        &self,
        query: &AuditQuery,
    ) -> Result<Vec<ChangeRequest>, GovernorError> {
        let limit = query.limit.unwrap_or(100);
        let all = self.store.list_change_requests(usize::MAX).await?;
        Ok(all
            .into_iter()
            .filter(|r| {
                query
                    .target_resource_id
                    .as_ref()
                    .map_or(true, |t| &r.target_resource_id == t)
                    && query.action.map_or(true, |a| r.action == a)
            })
            .take(limit)
            .collect())
    }

    /// Aggregate statistics over every request ever recorded.
    pub async fn get_summary(&self) -> Result<GovernorSummary, GovernorError> {
        let all = self.store.list_change_requests(usize::MAX).await?;
        let mut summary = GovernorSummary {
            total: all.len() as u64,
            policy_violation_count: self.policy_violations.load(Ordering::Relaxed),
            ..GovernorSummary::default()
        };

        let mut score_sum = 0u64;
        for request in &all {
            *summary
                .by_status
                .entry(request.status.to_string())
                .or_default() += 1;
            *summary
                .by_risk_level
                .entry(request.risk.level.to_string())
                .or_default() += 1;
            *summary
                .by_action
                .entry(request.action.to_string())
                .or_default() += 1;
            score_sum += request.risk.score as u64;
        }
        if !all.is_empty() {
            summary.avg_risk_score = score_sum as f64 / all.len() as f64;
        }
        Ok(summary)
    }

    async fn load(&self, id: &str) -> Result<ChangeRequest, GovernorError> {
        if let Some(request) = self.pending.lock().get(id) {
            return Ok(request.clone());
        }
        self.store
            .get_change_request(id)
            .await?
            .ok_or_else(|| GovernorError::NotFound(id.to_string()))
    }

    fn check_transition(
        &self,
        request: &ChangeRequest,
        to: RequestStatus,
    ) -> Result<(), GovernorError> {
        let allowed = matches!(
            (request.status, to),
            (RequestStatus::Pending, RequestStatus::Approved)
                | (RequestStatus::Pending, RequestStatus::Rejected)
                | (RequestStatus::Approved, RequestStatus::Executed)
                | (RequestStatus::Approved, RequestStatus::Failed)
        );
        if allowed {
            Ok(())
        } else {
            Err(GovernorError::InvalidTransition {
                id: request.id.clone(),
                from: request.status,
                to,
            })
        }
    }

    /// Record one state transition in the change log.
    async fn audit_transition(
        &self,
        request: &ChangeRequest,
        from: RequestStatus,
        error: Option<String>,
    ) -> Result<(), GovernorError> {
        let mut metadata = serde_json::json!({
            "changeRequestId": request.id,
            "action": request.action,
            "riskScore": request.risk.score,
        });
        if let Some(error) = error {
            metadata["error"] = Value::String(error);
        }
        let change = Change::new(
            request.target_resource_id.clone(),
            ChangeType::NodeUpdated,
            DetectedVia::Manual,
            self.clock.now_ms(),
        )
        .with_delta(
            "change_request_status",
            Value::String(from.to_string()),
            Value::String(request.status.to_string()),
        )
        .with_initiator_type(InitiatorType::System)
        .with_correlation(request.id.clone())
        .with_metadata(metadata);
        self.store.append_changes(std::slice::from_ref(&change)).await?;
        Ok(())
    }
}
