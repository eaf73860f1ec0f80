//! HTTP routes.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::state::ServiceState;
use crate::store::GraphStore;
use crate::tools::{ToolResult, ToolSpec};

/// Build the service router.
pub fn create_router<S: GraphStore + 'static>(state: ServiceState<S>) -> Router {
    Router::new()
        .route("/healthz", get(healthz::<S>))
        .route("/v1/tools", get(list_tools::<S>))
        .route("/v1/tools/:name", post(invoke_tool::<S>))
        .route("/v1/iql", post(run_iql::<S>))
        .route("/v1/stats", get(stats::<S>))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn healthz<S: GraphStore + 'static>(
    State(state): State<ServiceState<S>>,
) -> Json<Value> {
    let health = state.registry.invoke("health", json!({})).await;
    Json(json!({
        "status": if health.success { "ok" } else { "degraded" },
        "uptime_secs": state.uptime_secs(),
        "adapters": health.data,
    }))
}

async fn list_tools<S: GraphStore + 'static>(
    State(state): State<ServiceState<S>>,
) -> Json<Vec<ToolSpec>> {
    Json(state.registry.list())
}

async fn invoke_tool<S: GraphStore + 'static>(
    State(state): State<ServiceState<S>>,
    Path(name): Path<String>,
    Json(args): Json<Value>,
) -> Json<ToolResult> {
    Json(state.registry.invoke(&name, args).await)
}

async fn run_iql<S: GraphStore + 'static>(
    State(state): State<ServiceState<S>>,
    Json(body): Json<Value>,
) -> Json<ToolResult> {
    Json(state.registry.invoke("run_iql", body).await)
}

async fn stats<S: GraphStore + 'static>(
    State(state): State<ServiceState<S>>,
) -> Json<ToolResult> {
    Json(state.registry.invoke("get_stats", json!({})).await)
}
