//! cloudgraphd: the graph service binary.
//!
//! Runs the knowledge graph core as a REST API with structured JSON
//! logging, an optional background monitor loop, and graceful shutdown.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `CLOUDGRAPH_DATA_DIR`: sled data directory (default: ./cloudgraph-data)
//! - `PORT`: service port (default: 8080)
//! - `HOST`: service host (default: 0.0.0.0)
//! - `MONITOR_ENABLED`: start the background monitor loop (default: false)
//! - `MONITOR_INTERVAL_SECS` and friends: see `MonitorConfig::from_env`
//! - `RUST_LOG`: log level filter (default: info)
//! - `LOG_FORMAT`: "json" for structured logs, "pretty" for development
//!
//! ## Usage
//!
//! ```bash
//! CLOUDGRAPH_DATA_DIR=/var/lib/cloudgraph cargo run --bin cloudgraphd --features service
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use cloudgraph::engine::{GraphEngine, SyncConfig};
use cloudgraph::governor::{ChangeGovernor, GovernorConfig};
use cloudgraph::monitor::{Monitor, MonitorConfig};
use cloudgraph::service::{create_router, ServiceState};
use cloudgraph::store::SledGraphStore;
use cloudgraph::temporal::TemporalStore;
use cloudgraph::tools::ToolRegistry;

/// Initialize the tracing subscriber with JSON or pretty format.
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "cloudgraphd=info,cloudgraph=info,tower_http=info".into());

    if log_format == "pretty" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_span_events(FmtSpan::CLOSE))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .flatten_event(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let version = env!("CARGO_PKG_VERSION");
    info!(version, "starting cloudgraphd");

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let data_dir = std::env::var("CLOUDGRAPH_DATA_DIR")
        .unwrap_or_else(|_| "./cloudgraph-data".to_string());

    // Open the embedded store.
    let open_start = Instant::now();
    let store = Arc::new(SledGraphStore::open(&data_dir)?);
    info!(
        %data_dir,
        latency_ms = open_start.elapsed().as_millis() as u64,
        "sled store opened"
    );

    // Wire the core. Cloud adapters are registered by embedders; a bare
    // daemon still serves queries, IQL, and governance over existing data.
    let engine = Arc::new(GraphEngine::new(Arc::clone(&store), SyncConfig::from_env()));
    let governor = Arc::new(ChangeGovernor::new(
        Arc::clone(&store),
        GovernorConfig::from_env(),
    ));
    let temporal = Arc::new(TemporalStore::new(Arc::clone(&store)));
    let registry = Arc::new(ToolRegistry::new(
        Arc::clone(&engine),
        Arc::clone(&governor),
        temporal,
    ));
    info!(tool_count = registry.list().len(), "tool registry initialized");

    // Optional background monitor.
    let monitor_enabled = std::env::var("MONITOR_ENABLED")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(false);
    let monitor = if monitor_enabled {
        let monitor = Arc::new(Monitor::new(Arc::clone(&engine), MonitorConfig::from_env()));
        monitor.start();
        info!("monitor loop started");
        Some(monitor)
    } else {
        warn!("monitor loop disabled (set MONITOR_ENABLED=true to enable)");
        None
    };

    let state = ServiceState::new(registry);
    let app = create_router(state);

    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(address = %addr, version, "cloudgraphd listening");

    let shutdown_signal = async {
        let ctrl_c = async {
            if tokio::signal::ctrl_c().await.is_err() {
                warn!("failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(_) => {
                    warn!("failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("received Ctrl+C, shutting down"),
            _ = terminate => info!("received SIGTERM, shutting down"),
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    if let Some(monitor) = monitor {
        monitor.stop();
    }
    info!("cloudgraphd shutdown complete");

    Ok(())
}
