//! Blast radius: the downstream transitive closure of a node.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::{EngineError, GraphEngine};
use crate::store::GraphStore;
use crate::types::{Direction, Node, NodeId};

/// Nodes first reached at one traversal depth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HopBucket {
    /// Distance from the root (1 = direct dependents).
    pub depth: u32,
    /// Node ids first reached at this depth, id-ordered.
    pub node_ids: Vec<NodeId>,
}

/// Downstream impact estimate for one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlastRadius {
    /// Root node id.
    pub root: NodeId,
    /// Every reached node, root included, id-ordered.
    pub nodes: Vec<Node>,
    /// Reached nodes bucketed by hop distance (root excluded).
    pub hops: Vec<HopBucket>,
    /// Sum of known monthly costs across the radius, root included.
    pub total_cost_monthly: f64,
}

impl BlastRadius {
    /// Number of affected nodes, root excluded.
    pub fn affected_count(&self) -> usize {
        self.nodes.len().saturating_sub(1)
    }
}

impl<S: GraphStore + 'static> GraphEngine<S> {
    /// Walk downstream edges from `id` up to `max_depth` hops, collecting
    /// the reach set, per-hop buckets, and the cost exposure.
    pub async fn get_blast_radius(
        &self,
        id: &NodeId,
        max_depth: u32,
    ) -> Result<BlastRadius, EngineError> {
        let root = self
            .store()
            .get_node(id)
            .await?
            .ok_or_else(|| EngineError::NodeNotFound(id.to_string()))?;

        let mut visited: BTreeMap<NodeId, Node> = BTreeMap::new();
        visited.insert(root.id.clone(), root);
        let mut hops = Vec::new();
        let mut frontier = vec![id.clone()];
        let mut depth = 0;

        while !frontier.is_empty() && depth < max_depth {
            frontier.sort();
            let mut next: BTreeSet<NodeId> = BTreeSet::new();

            for node_id in &frontier {
                let edges = self
                    .store()
                    .get_edges_for_node(node_id, Direction::Downstream)
                    .await?;
                for edge in edges {
                    let target = edge.target_id;
                    if !visited.contains_key(&target) {
                        if let Some(node) = self.store().get_node(&target).await? {
                            visited.insert(target.clone(), node);
                            next.insert(target);
                        }
                    }
                }
            }

            depth += 1;
            if !next.is_empty() {
                hops.push(HopBucket {
                    depth,
                    node_ids: next.iter().cloned().collect(),
                });
            }
            frontier = next.into_iter().collect();
        }

        let total_cost_monthly = visited
            .values()
            .filter_map(|n| n.cost_monthly)
            .sum();

        Ok(BlastRadius {
            root: id.clone(),
            nodes: visited.into_values().collect(),
            hops,
            total_cost_monthly,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SyncConfig;
    use crate::store::InMemoryGraphStore;
    use crate::types::{Edge, NodeInput, NodeStatus, Provider, RelationshipType, ResourceType};
    use std::sync::Arc;

    fn make_node(native_id: &str, cost: f64) -> Node {
        NodeInput {
            provider: Provider::Aws,
            account: "123".into(),
            region: "us-east-1".into(),
            resource_type: ResourceType::Compute,
            native_id: native_id.into(),
            name: native_id.into(),
            status: NodeStatus::Running,
            tags: Default::default(),
            metadata: serde_json::Value::Null,
            cost_monthly: Some(cost),
            owner: None,
        }
        .into_node(1_000)
    }

    /// db -> api -> worker, db -> cache
    async fn seeded_engine() -> (GraphEngine<InMemoryGraphStore>, NodeId) {
        let store = Arc::new(InMemoryGraphStore::new());
        let db = make_node("db", 100.0);
        let api = make_node("api", 50.0);
        let worker = make_node("worker", 25.0);
        let cache = make_node("cache", 10.0);
        store
            .upsert_nodes(&[db.clone(), api.clone(), worker.clone(), cache.clone()])
            .await
            .unwrap();
        store
            .upsert_edges(&[
                Edge::api(db.id.clone(), api.id.clone(), RelationshipType::DependsOn),
                Edge::api(api.id.clone(), worker.id.clone(), RelationshipType::DependsOn),
                Edge::api(db.id.clone(), cache.id.clone(), RelationshipType::DependsOn),
            ])
            .await
            .unwrap();
        (GraphEngine::new(store, SyncConfig::default()), db.id)
    }

    #[tokio::test]
    async fn test_blast_radius_buckets_and_cost() {
        let (engine, db_id) = seeded_engine().await;
        let blast = engine.get_blast_radius(&db_id, 3).await.unwrap();

        assert_eq!(blast.nodes.len(), 4);
        assert_eq!(blast.affected_count(), 3);
        assert_eq!(blast.total_cost_monthly, 185.0);
        assert_eq!(blast.hops.len(), 2);
        assert_eq!(blast.hops[0].depth, 1);
        assert_eq!(blast.hops[0].node_ids.len(), 2); // api + cache
        assert_eq!(blast.hops[1].node_ids.len(), 1); // worker
    }

    #[tokio::test]
    async fn test_blast_radius_respects_depth() {
        let (engine, db_id) = seeded_engine().await;
        let blast = engine.get_blast_radius(&db_id, 1).await.unwrap();
        assert_eq!(blast.nodes.len(), 3); // root + api + cache
        assert_eq!(blast.hops.len(), 1);
    }

    #[tokio::test]
    async fn test_blast_radius_terminates_on_cycles() {
        let store = Arc::new(InMemoryGraphStore::new());
        let a = make_node("a", 1.0);
        let b = make_node("b", 2.0);
        store.upsert_nodes(&[a.clone(), b.clone()]).await.unwrap();
        store
            .upsert_edges(&[
                Edge::api(a.id.clone(), b.id.clone(), RelationshipType::ConnectedTo),
                Edge::api(b.id.clone(), a.id.clone(), RelationshipType::ConnectedTo),
            ])
            .await
            .unwrap();

        let engine = GraphEngine::new(store, SyncConfig::default());
        let blast = engine.get_blast_radius(&a.id, 10).await.unwrap();
        assert_eq!(blast.nodes.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_root_errors() {
        let (engine, _) = seeded_engine().await;
        let err = engine
            .get_blast_radius(&NodeId::from_raw("nope"), 2)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NodeNotFound(_)));
    }
}
