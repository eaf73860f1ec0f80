//! Cost rollups over the graph.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{EngineError, GraphEngine};
use crate::store::GraphStore;
use crate::types::NodeFilter;

/// Monthly cost totals, bucketed four ways.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    /// Sum over all matched nodes.
    pub total_monthly: f64,
    /// Per provider.
    pub by_provider: BTreeMap<String, f64>,
    /// Per resource type.
    pub by_resource_type: BTreeMap<String, f64>,
    /// Per region.
    pub by_region: BTreeMap<String, f64>,
    /// Per account.
    pub by_account: BTreeMap<String, f64>,
}

impl<S: GraphStore + 'static> GraphEngine<S> {
    /// Roll up known monthly costs for every node matching the filter.
    /// Nodes without a cost estimate contribute nothing.
    pub async fn get_cost_by_filter(
        &self,
        filter: &NodeFilter,
    ) -> Result<CostBreakdown, EngineError> {
        let nodes = self.store().query_nodes(filter).await?;
        let mut breakdown = CostBreakdown::default();

        for node in nodes {
            let cost = match node.cost_monthly {
                Some(cost) => cost,
                None => continue,
            };
            breakdown.total_monthly += cost;
            *breakdown
                .by_provider
                .entry(node.provider.to_string())
                .or_default() += cost;
            *breakdown
                .by_resource_type
                .entry(node.resource_type.to_string())
                .or_default() += cost;
            *breakdown.by_region.entry(node.region.clone()).or_default() += cost;
            *breakdown
                .by_account
                .entry(node.account.clone())
                .or_default() += cost;
        }

        Ok(breakdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SyncConfig;
    use crate::store::InMemoryGraphStore;
    use crate::types::{NodeInput, NodeStatus, Provider, ResourceType};
    use std::sync::Arc;

    fn make_node(provider: Provider, rt: ResourceType, region: &str, cost: Option<f64>) -> crate::types::Node {
        NodeInput {
            provider,
            account: "123".into(),
            region: region.into(),
            resource_type: rt,
            native_id: format!("{provider}-{rt}-{region}-{:?}", cost),
            name: "n".into(),
            status: NodeStatus::Running,
            tags: Default::default(),
            metadata: serde_json::Value::Null,
            cost_monthly: cost,
            owner: None,
        }
        .into_node(1_000)
    }

    #[tokio::test]
    async fn test_cost_rollup_buckets() {
        let store = Arc::new(InMemoryGraphStore::new());
        store
            .upsert_nodes(&[
                make_node(Provider::Aws, ResourceType::Compute, "us-east-1", Some(100.0)),
                make_node(Provider::Aws, ResourceType::Database, "us-east-1", Some(200.0)),
                make_node(Provider::Gcp, ResourceType::Compute, "europe-west1", Some(50.0)),
                make_node(Provider::Gcp, ResourceType::Storage, "europe-west1", None),
            ])
            .await
            .unwrap();
        let engine = GraphEngine::new(store, SyncConfig::default());

        let breakdown = engine
            .get_cost_by_filter(&NodeFilter::default())
            .await
            .unwrap();
        assert_eq!(breakdown.total_monthly, 350.0);
        assert_eq!(breakdown.by_provider["aws"], 300.0);
        assert_eq!(breakdown.by_provider["gcp"], 50.0);
        assert_eq!(breakdown.by_resource_type["compute"], 150.0);
        assert_eq!(breakdown.by_region["us-east-1"], 300.0);

        let aws_only = engine
            .get_cost_by_filter(&NodeFilter::provider(Provider::Aws))
            .await
            .unwrap();
        assert_eq!(aws_only.total_monthly, 300.0);
    }
}
