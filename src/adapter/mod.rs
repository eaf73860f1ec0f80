//! Cloud adapter and event source interfaces.
//!
//! Adapters are the only path between the core and a provider. They own
//! their rate-limiting, credential refresh, and pagination; the core treats
//! them as black boxes whose read methods are idempotent and retry-safe.

pub mod mock;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{ChangeAction, CloudEvent, Edge, NodeInput, Provider, ResourceType};

/// Error type for adapter operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AdapterError {
    /// Network / throttling / 5xx class failure; retried with backoff.
    #[error("transient: {0}")]
    Transient(String),
    /// Credentials lack access.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// Request the provider rejected as malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Provider quota exhausted.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),
    /// Operation exceeded its deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// Anything else.
    #[error("{0}")]
    Other(String),
}

impl AdapterError {
    /// Whether the retry helper should try again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }
}

/// Scope restriction for a discovery pass. Empty scope = everything the
/// adapter can see.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoverScope {
    /// Restrict to these regions.
    #[serde(default)]
    pub regions: Option<Vec<String>>,
    /// Restrict to these resource types.
    #[serde(default)]
    pub resource_types: Option<Vec<ResourceType>>,
}

/// One discovery pass worth of output.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    /// Discovered resources.
    pub nodes: Vec<NodeInput>,
    /// Discovered relationships. Edges may reference nodes from other
    /// adapters; the engine sequences upserts so endpoints exist first.
    pub edges: Vec<Edge>,
}

/// Adapter health probe result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterHealth {
    /// Reachable and authenticated.
    pub ok: bool,
    /// Details when not ok.
    #[serde(default)]
    pub message: Option<String>,
}

impl AdapterHealth {
    /// Healthy probe.
    pub fn ok() -> Self {
        Self {
            ok: true,
            message: None,
        }
    }

    /// Unhealthy probe with a reason.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: Some(message.into()),
        }
    }
}

/// Uniform shape every provider integration satisfies.
#[async_trait]
pub trait CloudAdapter: Send + Sync {
    /// Provider this adapter covers.
    fn provider(&self) -> Provider;

    /// Unique registry name; defaults to the provider name.
    fn name(&self) -> &str {
        self.provider().as_str()
    }

    /// Names of adapters whose output this adapter's edges reference
    /// (e.g. a Kubernetes adapter referencing cloud-provider nodes). The
    /// engine topologically sorts discovery so referenced nodes are
    /// upserted first.
    fn depends_on(&self) -> Vec<String> {
        Vec::new()
    }

    /// Enumerate resources and relationships within a scope.
    async fn discover(&self, scope: &DiscoverScope) -> Result<Discovery, AdapterError>;

    /// Current properties of one resource, or `None` when the provider
    /// reports it absent (404-like responses map to `None`; every other
    /// error propagates).
    async fn describe(
        &self,
        native_id: &str,
        resource_type: ResourceType,
    ) -> Result<Option<Value>, AdapterError>;

    /// Apply a mutation to one resource.
    async fn mutate(
        &self,
        action: ChangeAction,
        native_id: &str,
        resource_type: ResourceType,
        properties: &Value,
    ) -> Result<(), AdapterError>;

    /// Probe reachability and credentials.
    async fn health_check(&self) -> AdapterHealth;
}

/// Provider audit-log poller or push-webhook ingester.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Source kind, e.g. `audit-log` or `webhook`.
    fn source_type(&self) -> &str;

    /// Provider whose events this source carries.
    fn provider(&self) -> Provider;

    /// Events observed since the given timestamp (exclusive). Sources page
    /// internally; the monitor only tracks the high-water mark.
    async fn fetch_events(&self, since_ms: i64) -> Result<Vec<CloudEvent>, AdapterError>;

    /// Probe reachability.
    async fn health_check(&self) -> AdapterHealth;
}

/// Exponential backoff policy for transient adapter failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// First retry delay.
    pub base_delay: Duration,
    /// Multiplier applied per attempt.
    pub factor: f64,
    /// Total attempts, including the first.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            factor: 2.0,
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Policy with no sleep between attempts (tests).
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            base_delay: Duration::ZERO,
            factor: 1.0,
            max_attempts,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.mul_f64(self.factor.powi(attempt as i32))
    }
}

/// Run an adapter operation, retrying transient failures with backoff.
pub async fn with_retry<T, F, Fut>(
    op: &str,
    policy: &RetryPolicy,
    mut call: F,
) -> Result<T, AdapterError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, AdapterError>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    op,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient adapter failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_recovers_from_transient() {
        let calls = AtomicU32::new(0);
        let result = with_retry("op", &RetryPolicy::immediate(3), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(AdapterError::Transient("throttled".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry("op", &RetryPolicy::immediate(3), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AdapterError::Transient("still down".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_do_not_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry("op", &RetryPolicy::immediate(3), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AdapterError::PermissionDenied("no".into())) }
        })
        .await;
        assert!(matches!(result, Err(AdapterError::PermissionDenied(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
