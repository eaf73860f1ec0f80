//! Sync records: one row per discovery pass.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::node::Provider;

/// Outcome of a discovery pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Pass in flight.
    Running,
    /// Pass finished cleanly.
    Completed,
    /// Pass was cancelled or partially failed; durable progress kept.
    Partial,
    /// Structural failure aborted the pass.
    Failed,
}

impl SyncStatus {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }

    /// Parse status from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "partial" => Some(Self::Partial),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Record of one discovery pass for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRecord {
    /// Unique id.
    pub id: String,
    /// Provider synced.
    pub provider: Provider,
    /// Epoch-millisecond start timestamp.
    pub started_at: i64,
    /// Epoch-millisecond completion timestamp, once finished.
    pub completed_at: Option<i64>,
    /// Outcome.
    pub status: SyncStatus,
    /// Nodes seen in this pass.
    pub nodes_discovered: u64,
    /// Nodes that drifted during this pass.
    pub nodes_drifted: u64,
    /// Nodes confirmed disappeared during this pass.
    pub nodes_disappeared: u64,
    /// Error detail for partial/failed passes.
    pub error: Option<String>,
}

impl SyncRecord {
    /// Start a new record in `Running` state.
    pub fn start(provider: Provider, now_ms: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            provider,
            started_at: now_ms,
            completed_at: None,
            status: SyncStatus::Running,
            nodes_discovered: 0,
            nodes_drifted: 0,
            nodes_disappeared: 0,
            error: None,
        }
    }

    /// Finish the record with the given outcome.
    pub fn finish(&mut self, status: SyncStatus, now_ms: i64) {
        self.status = status;
        self.completed_at = Some(now_ms);
    }

    /// Finish as failed, recording the error.
    pub fn fail(&mut self, error: impl Into<String>, now_ms: i64) {
        self.error = Some(error.into());
        self.finish(SyncStatus::Failed, now_ms);
    }
}
