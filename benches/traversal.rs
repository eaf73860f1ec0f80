//! Traversal and pagination benchmarks over the in-memory backend.

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use tokio::runtime::Runtime;

use cloudgraph::store::{GraphStore, InMemoryGraphStore};
use cloudgraph::types::{
    Direction, Edge, NodeFilter, NodeInput, NodeStatus, PageRequest, Provider, RelationshipType,
    ResourceType,
};

fn make_node(i: usize) -> cloudgraph::types::Node {
    NodeInput {
        provider: Provider::Aws,
        account: "123456789012".into(),
        region: "us-east-1".into(),
        resource_type: ResourceType::Compute,
        native_id: format!("i-{i:05}"),
        name: format!("node-{i:05}"),
        status: NodeStatus::Running,
        tags: Default::default(),
        metadata: serde_json::Value::Null,
        cost_monthly: Some(1.0),
        owner: None,
    }
    .into_node(1_000)
}

/// Layered graph: each node points at a handful of nodes in the next layer.
fn build_store(runtime: &Runtime, n: usize) -> Arc<InMemoryGraphStore> {
    runtime.block_on(async {
        let store = Arc::new(InMemoryGraphStore::new());
        let nodes: Vec<_> = (0..n).map(make_node).collect();
        store.upsert_nodes(&nodes).await.unwrap();

        let mut edges = Vec::new();
        for i in 0..n.saturating_sub(4) {
            for offset in 1..=3 {
                edges.push(Edge::api(
                    nodes[i].id.clone(),
                    nodes[i + offset].id.clone(),
                    RelationshipType::DependsOn,
                ));
            }
        }
        store.upsert_edges(&edges).await.unwrap();
        store
    })
}

fn bench_bfs(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let mut group = c.benchmark_group("bfs_neighbors");

    for n in [100, 1_000] {
        let store = build_store(&runtime, n);
        let root = make_node(0).id;
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                runtime.block_on(async {
                    store
                        .get_neighbors(&root, 4, Direction::Downstream)
                        .await
                        .unwrap()
                })
            })
        });
    }
    group.finish();
}

fn bench_paginated_query(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let store = build_store(&runtime, 2_000);

    c.bench_function("paginate_2000_nodes", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let mut page = PageRequest::with_limit(500);
                let mut total = 0;
                loop {
                    let result = store
                        .query_nodes_paginated(&NodeFilter::default(), &page)
                        .await
                        .unwrap();
                    total += result.items.len();
                    match result.next_cursor {
                        Some(cursor) => {
                            page = PageRequest {
                                limit: Some(500),
                                cursor: Some(cursor),
                            }
                        }
                        None => break,
                    }
                }
                total
            })
        })
    });
}

criterion_group!(benches, bench_bfs, bench_paginated_query);
criterion_main!(benches);
