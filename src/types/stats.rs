//! Aggregate graph statistics.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Totals and breakdowns over the whole graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    /// Node count.
    pub total_nodes: u64,
    /// Edge count.
    pub total_edges: u64,
    /// Change count.
    pub total_changes: u64,
    /// Nodes per provider.
    pub nodes_by_provider: BTreeMap<String, u64>,
    /// Nodes per resource type.
    pub nodes_by_resource_type: BTreeMap<String, u64>,
    /// Nodes per status.
    pub nodes_by_status: BTreeMap<String, u64>,
    /// Sum of known monthly costs in USD.
    pub total_cost_monthly: f64,
    /// Epoch-millisecond timestamp of the most recent sync, when any.
    pub last_sync_at: Option<i64>,
}

impl GraphStats {
    /// Percentage growth of monthly cost against a previous reading.
    ///
    /// Returns `None` when the previous total is zero (no baseline).
    pub fn cost_growth_pct(&self, previous: &GraphStats) -> Option<f64> {
        if previous.total_cost_monthly <= f64::EPSILON {
            return None;
        }
        Some(
            (self.total_cost_monthly - previous.total_cost_monthly) / previous.total_cost_monthly
                * 100.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_growth_pct() {
        let previous = GraphStats {
            total_cost_monthly: 1000.0,
            ..GraphStats::default()
        };
        let current = GraphStats {
            total_cost_monthly: 1300.0,
            ..GraphStats::default()
        };
        assert_eq!(current.cost_growth_pct(&previous), Some(30.0));
    }

    #[test]
    fn test_cost_growth_without_baseline() {
        let previous = GraphStats::default();
        let current = GraphStats {
            total_cost_monthly: 500.0,
            ..GraphStats::default()
        };
        assert_eq!(current.cost_growth_pct(&previous), None);
    }
}
