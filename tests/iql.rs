//! IQL integration over a seeded graph.

use std::collections::BTreeMap;
use std::sync::Arc;

use cloudgraph::iql::{IqlError, IqlExecutor, QueryResult, EXAMPLE_QUERIES};
use cloudgraph::store::{GraphStore, InMemoryGraphStore};
use cloudgraph::types::{
    Edge, Node, NodeInput, NodeStatus, Provider, RelationshipType, ResourceType,
};
use serde_json::Value;

fn database(native_id: &str, env: &str, cost: f64) -> Node {
    let mut tags = BTreeMap::new();
    tags.insert("env".to_string(), env.to_string());
    NodeInput {
        provider: Provider::Aws,
        account: "123456789012".into(),
        region: "us-east-1".into(),
        resource_type: ResourceType::Database,
        native_id: native_id.into(),
        name: native_id.into(),
        status: NodeStatus::Running,
        tags,
        metadata: Value::Null,
        cost_monthly: Some(cost),
        owner: Some("data-team".into()),
    }
    .into_node(1_000)
}

/// Ten databases: six prod, four dev.
async fn seeded() -> Arc<InMemoryGraphStore> {
    let store = Arc::new(InMemoryGraphStore::new());
    let mut nodes = Vec::new();
    for i in 0..6 {
        nodes.push(database(&format!("prod-db-{i}"), "prod", 100.0 + i as f64));
    }
    for i in 0..4 {
        nodes.push(database(&format!("dev-db-{i}"), "dev", 10.0));
    }
    store.upsert_nodes(&nodes).await.unwrap();
    store
}

/// The literal scenario: LIMIT 5 over six matching prod databases.
#[tokio::test]
async fn find_prod_databases_with_limit() {
    let exec = IqlExecutor::new(seeded().await);
    let result = exec
        .run("FIND resources WHERE type = 'database' AND tag.env = 'prod' LIMIT 5")
        .await
        .unwrap();

    match result {
        QueryResult::Find { nodes } => {
            assert_eq!(nodes.len(), 5);
            for node in &nodes {
                assert_eq!(node.resource_type, ResourceType::Database);
                assert_eq!(node.tags.get("env").map(String::as_str), Some("prod"));
            }
        }
        other => panic!("expected find result, got {other:?}"),
    }
}

#[tokio::test]
async fn keywords_are_case_insensitive() {
    let exec = IqlExecutor::new(seeded().await);
    let upper = exec
        .run("FIND RESOURCES WHERE TAG.env = 'dev'")
        .await
        .unwrap();
    let lower = exec
        .run("find resources where tag.env = 'dev'")
        .await
        .unwrap();
    match (upper, lower) {
        (QueryResult::Find { nodes: a }, QueryResult::Find { nodes: b }) => {
            assert_eq!(a.len(), 4);
            assert_eq!(a.len(), b.len());
        }
        other => panic!("expected find results, got {other:?}"),
    }
}

#[tokio::test]
async fn summarize_groups_carry_count_and_cost() {
    let exec = IqlExecutor::new(seeded().await);
    let result = exec.run("SUMMARIZE cost BY tag.env").await.unwrap();

    match result {
        QueryResult::Summarize { groups } => {
            assert_eq!(groups.len(), 2);
            // Largest bucket first.
            assert_eq!(groups[0].key, "prod");
            assert_eq!(groups[0].count, 6);
            assert_eq!(groups[1].key, "dev");
            assert_eq!(groups[1].total_cost, 40.0);
        }
        other => panic!("expected summarize result, got {other:?}"),
    }
}

#[tokio::test]
async fn traversal_and_path_results() {
    let store = seeded().await;
    let api = NodeInput {
        provider: Provider::Aws,
        account: "123456789012".into(),
        region: "us-east-1".into(),
        resource_type: ResourceType::Compute,
        native_id: "api-1".into(),
        name: "api-1".into(),
        status: NodeStatus::Running,
        tags: BTreeMap::new(),
        metadata: Value::Null,
        cost_monthly: None,
        owner: None,
    }
    .into_node(1_000);
    let db = database("prod-db-0", "prod", 100.0);
    store.upsert_nodes(&[api.clone()]).await.unwrap();
    store
        .upsert_edges(&[Edge::api(
            api.id.clone(),
            db.id.clone(),
            RelationshipType::ReadsFrom,
        )])
        .await
        .unwrap();

    let exec = IqlExecutor::new(Arc::clone(&store));

    let downstream = exec
        .run(&format!("FIND DOWNSTREAM OF '{}'", api.id))
        .await
        .unwrap();
    match downstream {
        QueryResult::Find { nodes } => {
            assert_eq!(nodes.len(), 2); // api + db
        }
        other => panic!("expected find result, got {other:?}"),
    }

    let path = exec
        .run(&format!("FIND PATH FROM '{}' TO '{}'", api.id, db.id))
        .await
        .unwrap();
    match path {
        QueryResult::Path { nodes } => {
            assert_eq!(nodes.len(), 2);
            assert_eq!(nodes[0].id, api.id);
            assert_eq!(nodes[1].id, db.id);
        }
        other => panic!("expected path result, got {other:?}"),
    }
}

#[tokio::test]
async fn result_json_discriminates_on_type() {
    let exec = IqlExecutor::new(seeded().await);

    let find = exec.run("FIND resources LIMIT 1").await.unwrap();
    assert_eq!(serde_json::json!(find)["type"], "find");

    let summarize = exec.run("SUMMARIZE resources BY provider").await.unwrap();
    assert_eq!(serde_json::json!(summarize)["type"], "summarize");

    let path = exec.run("FIND PATH FROM 'x' TO 'y'").await.unwrap();
    assert_eq!(serde_json::json!(path)["type"], "path");
}

#[tokio::test]
async fn syntax_errors_carry_offsets_and_examples_exist() {
    let exec = IqlExecutor::new(seeded().await);
    let err = exec.run("SHOW me the money").await.unwrap_err();
    match err {
        IqlError::Syntax { offset, .. } => assert_eq!(offset, 0),
        other => panic!("expected syntax error, got {other:?}"),
    }

    // Every published example parses.
    for example in EXAMPLE_QUERIES {
        assert!(
            cloudgraph::iql::parse(example).is_ok(),
            "example query must parse: {example}"
        );
    }
}
