//! Scriptable in-process adapters for tests and demos.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::{
    AdapterError, AdapterHealth, CloudAdapter, DiscoverScope, Discovery, EventSource,
};
use crate::types::{ChangeAction, CloudEvent, Edge, NodeInput, Provider, ResourceType};

/// One mutation the mock received, for assertions.
#[derive(Debug, Clone)]
pub struct RecordedMutation {
    /// Requested action.
    pub action: ChangeAction,
    /// Target native id.
    pub native_id: String,
    /// Target resource type.
    pub resource_type: ResourceType,
    /// Properties passed along.
    pub properties: Value,
}

#[derive(Default)]
struct MockState {
    nodes: Vec<NodeInput>,
    edges: Vec<Edge>,
    /// Overrides for describe, keyed by native id. An explicit `None`
    /// scripts a 404.
    describe: BTreeMap<String, Option<Value>>,
    mutations: Vec<RecordedMutation>,
    discover_error: Option<AdapterError>,
    describe_error: Option<AdapterError>,
    healthy: bool,
}

/// Scriptable [`CloudAdapter`].
///
/// Defaults: discovery returns the configured node/edge sets, `describe`
/// answers with the node's metadata (or a scripted override), mutations
/// are recorded and succeed.
pub struct MockCloudAdapter {
    provider: Provider,
    name: String,
    depends_on: Vec<String>,
    state: Mutex<MockState>,
}

impl MockCloudAdapter {
    /// Mock for a provider, named after it.
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            name: provider.as_str().to_string(),
            depends_on: Vec::new(),
            state: Mutex::new(MockState {
                healthy: true,
                ..MockState::default()
            }),
        }
    }

    /// Override the registry name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Declare discovery-ordering dependencies.
    pub fn depends_on(mut self, names: &[&str]) -> Self {
        self.depends_on = names.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Seed the discovery output.
    pub fn with_nodes(self, nodes: Vec<NodeInput>) -> Self {
        self.state.lock().nodes = nodes;
        self
    }

    /// Seed the discovery edges.
    pub fn with_edges(self, edges: Vec<Edge>) -> Self {
        self.state.lock().edges = edges;
        self
    }

    /// Replace the discovery output at runtime.
    pub fn set_nodes(&self, nodes: Vec<NodeInput>) {
        self.state.lock().nodes = nodes;
    }

    /// Drop one node from future discoveries (simulates disappearance).
    pub fn remove_node(&self, native_id: &str) {
        self.state.lock().nodes.retain(|n| n.native_id != native_id);
    }

    /// Script a describe response; `None` simulates a 404.
    pub fn set_describe(&self, native_id: impl Into<String>, response: Option<Value>) {
        self.state.lock().describe.insert(native_id.into(), response);
    }

    /// Fail the next discoveries with this error.
    pub fn fail_discover(&self, error: AdapterError) {
        self.state.lock().discover_error = Some(error);
    }

    /// Fail describes with this error.
    pub fn fail_describe(&self, error: AdapterError) {
        self.state.lock().describe_error = Some(error);
    }

    /// Toggle health.
    pub fn set_healthy(&self, healthy: bool) {
        self.state.lock().healthy = healthy;
    }

    /// Mutations received so far.
    pub fn mutations(&self) -> Vec<RecordedMutation> {
        self.state.lock().mutations.clone()
    }
}

#[async_trait]
impl CloudAdapter for MockCloudAdapter {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn depends_on(&self) -> Vec<String> {
        self.depends_on.clone()
    }

    async fn discover(&self, scope: &DiscoverScope) -> Result<Discovery, AdapterError> {
        let state = self.state.lock();
        if let Some(err) = &state.discover_error {
            return Err(err.clone());
        }

        let nodes = state
            .nodes
            .iter()
            .filter(|n| {
                scope
                    .regions
                    .as_ref()
                    .map_or(true, |regions| regions.contains(&n.region))
                    && scope
                        .resource_types
                        .as_ref()
                        .map_or(true, |types| types.contains(&n.resource_type))
            })
            .cloned()
            .collect();
        Ok(Discovery {
            nodes,
            edges: state.edges.clone(),
        })
    }

    async fn describe(
        &self,
        native_id: &str,
        _resource_type: ResourceType,
    ) -> Result<Option<Value>, AdapterError> {
        let state = self.state.lock();
        if let Some(err) = &state.describe_error {
            return Err(err.clone());
        }
        if let Some(scripted) = state.describe.get(native_id) {
            return Ok(scripted.clone());
        }
        Ok(state
            .nodes
            .iter()
            .find(|n| n.native_id == native_id)
            .map(|n| n.metadata.clone()))
    }

    async fn mutate(
        &self,
        action: ChangeAction,
        native_id: &str,
        resource_type: ResourceType,
        properties: &Value,
    ) -> Result<(), AdapterError> {
        self.state.lock().mutations.push(RecordedMutation {
            action,
            native_id: native_id.to_string(),
            resource_type,
            properties: properties.clone(),
        });
        Ok(())
    }

    async fn health_check(&self) -> AdapterHealth {
        if self.state.lock().healthy {
            AdapterHealth::ok()
        } else {
            AdapterHealth::failing("mock marked unhealthy")
        }
    }
}

/// Scriptable [`EventSource`] backed by a queue of canned events.
pub struct MockEventSource {
    provider: Provider,
    events: Mutex<Vec<CloudEvent>>,
}

impl MockEventSource {
    /// Empty source for a provider.
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            events: Mutex::new(Vec::new()),
        }
    }

    /// Queue an event for the next fetch.
    pub fn push(&self, event: CloudEvent) {
        self.events.lock().push(event);
    }
}

#[async_trait]
impl EventSource for MockEventSource {
    fn source_type(&self) -> &str {
        "mock"
    }

    fn provider(&self) -> Provider {
        self.provider
    }

    async fn fetch_events(&self, since_ms: i64) -> Result<Vec<CloudEvent>, AdapterError> {
        Ok(self
            .events
            .lock()
            .iter()
            .filter(|e| e.timestamp > since_ms)
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> AdapterHealth {
        AdapterHealth::ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_input(native_id: &str, region: &str) -> NodeInput {
        NodeInput {
            provider: Provider::Aws,
            account: "123".into(),
            region: region.into(),
            resource_type: ResourceType::Compute,
            native_id: native_id.into(),
            name: native_id.into(),
            status: crate::types::NodeStatus::Running,
            tags: Default::default(),
            metadata: serde_json::json!({"instanceType": "m5.large"}),
            cost_monthly: None,
            owner: None,
        }
    }

    #[tokio::test]
    async fn test_scope_filters_discovery() {
        let adapter = MockCloudAdapter::new(Provider::Aws)
            .with_nodes(vec![make_input("i-1", "us-east-1"), make_input("i-2", "eu-west-1")]);

        let scoped = adapter
            .discover(&DiscoverScope {
                regions: Some(vec!["us-east-1".into()]),
                resource_types: None,
            })
            .await
            .unwrap();
        assert_eq!(scoped.nodes.len(), 1);
        assert_eq!(scoped.nodes[0].native_id, "i-1");
    }

    #[tokio::test]
    async fn test_describe_prefers_script_over_metadata() {
        let adapter =
            MockCloudAdapter::new(Provider::Aws).with_nodes(vec![make_input("i-1", "us-east-1")]);

        let from_metadata = adapter
            .describe("i-1", ResourceType::Compute)
            .await
            .unwrap();
        assert_eq!(from_metadata.unwrap()["instanceType"], "m5.large");

        adapter.set_describe("i-1", None);
        assert!(adapter
            .describe("i-1", ResourceType::Compute)
            .await
            .unwrap()
            .is_none());
    }
}
