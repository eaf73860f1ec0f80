//! Shared service state.

use std::sync::Arc;

use crate::clock::wall_ms;
use crate::store::GraphStore;
use crate::tools::ToolRegistry;

/// State shared by every route handler.
pub struct ServiceState<S: GraphStore> {
    /// The tool registry the service fronts.
    pub registry: Arc<ToolRegistry<S>>,
    /// Epoch-millisecond service start time.
    pub started_at: i64,
}

impl<S: GraphStore> ServiceState<S> {
    /// State over a registry.
    pub fn new(registry: Arc<ToolRegistry<S>>) -> Self {
        Self {
            registry,
            started_at: wall_ms(),
        }
    }

    /// Seconds since the service started.
    pub fn uptime_secs(&self) -> i64 {
        (wall_ms() - self.started_at) / 1_000
    }
}

impl<S: GraphStore> Clone for ServiceState<S> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            started_at: self.started_at,
        }
    }
}
