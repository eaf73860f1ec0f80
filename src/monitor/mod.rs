//! Monitoring loop: scheduled sync, event ingestion, alerting.
//!
//! Two long-lived workers run from [`Monitor::start`]: the sync scheduler
//! (sync → stats → rule evaluation → cooldown → dispatch) and the event
//! poller (provider audit events → change records). Both stop through one
//! cancellation token; `run_one_cycle` drives a single scheduler pass for
//! tests.

pub mod cooldown;
pub mod dispatch;
pub mod rules;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::adapter::EventSource;
use crate::clock::MonotonicClock;
use crate::engine::{EngineError, GraphEngine, SyncOptions};
use crate::store::{GraphStore, StoreError};
use crate::types::{Change, DetectedVia, GraphStats, InitiatorType, SyncRecord};

pub use cooldown::CooldownTracker;
pub use dispatch::{
    AlertDestination, CallbackDestination, ConsoleDestination, WebhookDestination,
    DISPATCH_TIMEOUT,
};
pub use rules::{
    builtin_rules, Alert, AlertCategory, AlertRule, AlertSeverity, RuleContext,
};

/// 5-minute sync preset.
pub const INTERVAL_5_MIN: Duration = Duration::from_secs(5 * 60);
/// 15-minute sync preset.
pub const INTERVAL_15_MIN: Duration = Duration::from_secs(15 * 60);
/// Hourly sync preset.
pub const INTERVAL_HOURLY: Duration = Duration::from_secs(60 * 60);
/// Daily sync preset.
pub const INTERVAL_DAILY: Duration = Duration::from_secs(24 * 60 * 60);

/// Error type for monitor operations.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// Underlying store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// Engine failure.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    /// Alert delivery failure (always swallowed by the loop).
    #[error("dispatch error: {0}")]
    Dispatch(String),
    /// Rule evaluation failure (always swallowed by the loop).
    #[error("rule error: {0}")]
    Rule(String),
}

/// Monitor settings.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Sync cadence.
    pub interval: Duration,
    /// Event poll cadence.
    pub event_poll_interval: Duration,
    /// Per-rule re-fire suppression window.
    pub alert_cooldown: Duration,
    /// Alerts dispatched per cycle, at most.
    pub max_alerts_per_cycle: usize,
    /// Restrict sync to these adapter names.
    pub providers: Option<Vec<String>>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: INTERVAL_15_MIN,
            event_poll_interval: Duration::from_secs(60),
            alert_cooldown: Duration::from_secs(30 * 60),
            max_alerts_per_cycle: 10,
            providers: None,
        }
    }
}

impl MonitorConfig {
    /// Load from `MONITOR_INTERVAL_SECS` / `MONITOR_EVENT_POLL_SECS` /
    /// `MONITOR_ALERT_COOLDOWN_SECS` / `MONITOR_MAX_ALERTS_PER_CYCLE`
    /// with production defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let secs = |key: &str, fallback: Duration| {
            std::env::var(key)
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(fallback)
        };
        Self {
            interval: secs("MONITOR_INTERVAL_SECS", defaults.interval),
            event_poll_interval: secs("MONITOR_EVENT_POLL_SECS", defaults.event_poll_interval),
            alert_cooldown: secs("MONITOR_ALERT_COOLDOWN_SECS", defaults.alert_cooldown),
            max_alerts_per_cycle: std::env::var("MONITOR_MAX_ALERTS_PER_CYCLE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_alerts_per_cycle),
            providers: None,
        }
    }
}

/// What one scheduler pass produced.
#[derive(Debug, Default)]
pub struct CycleOutcome {
    /// Sync records from this pass.
    pub sync_records: Vec<SyncRecord>,
    /// Alerts that survived cooldown and the per-cycle cap.
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Default)]
struct MonitorState {
    previous_stats: Option<GraphStats>,
    last_cycle_ms: i64,
    last_event_poll_ms: i64,
}

/// The monitoring loop.
pub struct Monitor<S: GraphStore> {
    engine: Arc<GraphEngine<S>>,
    rules: Vec<Box<dyn AlertRule<S>>>,
    destinations: Vec<Arc<dyn AlertDestination>>,
    event_sources: Vec<Arc<dyn EventSource>>,
    cooldowns: CooldownTracker,
    config: MonitorConfig,
    state: Mutex<MonitorState>,
    /// Skip-if-running guard for scheduler ticks.
    cycle_running: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
    clock: MonotonicClock,
}

impl<S: GraphStore + 'static> Monitor<S> {
    /// Monitor with the built-in rule set and no destinations.
    pub fn new(engine: Arc<GraphEngine<S>>, config: MonitorConfig) -> Self {
        let cooldowns = CooldownTracker::new(config.alert_cooldown);
        Self {
            engine,
            rules: builtin_rules(),
            destinations: Vec::new(),
            event_sources: Vec::new(),
            cooldowns,
            config,
            state: Mutex::new(MonitorState::default()),
            cycle_running: AtomicBool::new(false),
            cancel: Mutex::new(None),
            clock: MonotonicClock::new(),
        }
    }

    /// Replace the rule set.
    pub fn with_rules(mut self, rules: Vec<Box<dyn AlertRule<S>>>) -> Self {
        self.rules = rules;
        self
    }

    /// Add a rule.
    pub fn with_rule(mut self, rule: Box<dyn AlertRule<S>>) -> Self {
        self.rules.push(rule);
        self
    }

    /// Add a dispatch destination.
    pub fn with_destination(mut self, destination: Arc<dyn AlertDestination>) -> Self {
        self.destinations.push(destination);
        self
    }

    /// Add an event source.
    pub fn with_event_source(mut self, source: Arc<dyn EventSource>) -> Self {
        self.event_sources.push(source);
        self
    }

    /// The engine this monitor drives.
    pub fn engine(&self) -> &Arc<GraphEngine<S>> {
        &self.engine
    }

    /// Start the two workers. Idempotent: a second call while running is a
    /// no-op.
    pub fn start(self: &Arc<Self>) {
        let mut cancel = self.cancel.lock();
        if cancel.is_some() {
            return;
        }
        let token = CancellationToken::new();
        *cancel = Some(token.clone());

        // Sync scheduler.
        let monitor = Arc::clone(self);
        let scheduler_token = token.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = scheduler_token.cancelled() => break,
                    _ = ticker.tick() => {
                        // A tick that lands while a cycle is still running
                        // is skipped, not queued.
                        if monitor
                            .cycle_running
                            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                            .is_err()
                        {
                            tracing::debug!("sync cycle still running, skipping tick");
                            continue;
                        }
                        if let Err(err) = monitor.run_one_cycle().await {
                            tracing::error!(error = %err, "sync cycle failed");
                        }
                        monitor.cycle_running.store(false, Ordering::SeqCst);
                    }
                }
            }
            tracing::info!("sync scheduler stopped");
        });

        // Event poller.
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.config.event_poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = monitor.run_event_cycle().await {
                            tracing::error!(error = %err, "event poll failed");
                        }
                    }
                }
            }
            tracing::info!("event poller stopped");
        });
    }

    /// Stop both workers.
    pub fn stop(&self) {
        if let Some(token) = self.cancel.lock().take() {
            token.cancel();
        }
    }

    /// Run one scheduler pass: sync, evaluate rules, cooldown-filter, cap,
    /// dispatch. Exposed for tests and manual triggering.
    pub async fn run_one_cycle(&self) -> Result<CycleOutcome, MonitorError> {
        let now = self.clock.now_ms();
        let (previous_stats, window_start) = {
            let state = self.state.lock();
            (state.previous_stats.clone(), state.last_cycle_ms)
        };

        let sync_records = self
            .engine
            .sync(&SyncOptions {
                providers: self.config.providers.clone(),
                ..SyncOptions::default()
            })
            .await?;
        let current_stats = self.engine.get_stats().await?;

        let mut alerts = Vec::new();
        {
            let ctx = RuleContext {
                engine: self.engine.as_ref(),
                store: self.engine.store().as_ref(),
                sync_records: &sync_records,
                previous_stats: previous_stats.as_ref(),
                current_stats: &current_stats,
                window_start_ms: window_start,
                now_ms: now,
            };
            for rule in &self.rules {
                if !rule.enabled() {
                    continue;
                }
                // One broken rule never takes down the cycle.
                match rule.evaluate(&ctx).await {
                    Ok(fired) if !fired.is_empty() => {
                        if self.cooldowns.try_fire(rule.id(), now) {
                            alerts.extend(fired);
                        } else {
                            tracing::debug!(rule = rule.id(), "suppressed by cooldown");
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(rule = rule.id(), error = %err, "rule evaluation failed");
                    }
                }
            }
        }

        if alerts.len() > self.config.max_alerts_per_cycle {
            tracing::warn!(
                fired = alerts.len(),
                cap = self.config.max_alerts_per_cycle,
                "alert volume capped"
            );
            alerts.truncate(self.config.max_alerts_per_cycle);
        }

        if !alerts.is_empty() {
            self.dispatch_all(&alerts).await;
        }

        {
            let mut state = self.state.lock();
            state.previous_stats = Some(current_stats);
            state.last_cycle_ms = now;
        }

        Ok(CycleOutcome {
            sync_records,
            alerts,
        })
    }

    /// Poll every event source once, converting mutation events to change
    /// records. Returns the number of changes appended.
    pub async fn run_event_cycle(&self) -> Result<usize, MonitorError> {
        let since = self.state.lock().last_event_poll_ms;
        let mut appended = 0;
        let mut high_water = since;

        for source in &self.event_sources {
            let events = match source.fetch_events(since).await {
                Ok(events) => events,
                Err(err) => {
                    tracing::warn!(
                        source = source.source_type(),
                        provider = %source.provider(),
                        error = %err,
                        "event fetch failed"
                    );
                    continue;
                }
            };

            let mut changes = Vec::new();
            for event in events {
                high_water = high_water.max(event.timestamp);
                // Read-only calls never become change records.
                if event.read_only {
                    continue;
                }
                let target = match &event.resource_id {
                    Some(target) => target.clone(),
                    None => continue,
                };
                let initiator_type = if event.actor.is_some() {
                    InitiatorType::Human
                } else {
                    InitiatorType::Unknown
                };
                let mut change = Change::new(
                    target,
                    event.change_type(),
                    DetectedVia::EventStream,
                    event.timestamp,
                )
                .with_initiator_type(initiator_type)
                .with_metadata(serde_json::json!({
                    "eventId": event.id,
                    "eventType": event.event_type,
                    "success": event.success,
                }));
                if let Some(actor) = &event.actor {
                    change.initiator = Some(actor.clone());
                }
                changes.push(change);
            }

            if !changes.is_empty() {
                self.engine.store().append_changes(&changes).await?;
                appended += changes.len();
            }
        }

        self.state.lock().last_event_poll_ms = high_water.max(since);
        Ok(appended)
    }

    async fn dispatch_all(&self, alerts: &[Alert]) {
        for destination in &self.destinations {
            let result = tokio::time::timeout(
                DISPATCH_TIMEOUT,
                destination.dispatch(alerts),
            )
            .await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    // Dispatch failures are never fatal.
                    tracing::warn!(destination = destination.name(), error = %err, "dispatch failed");
                }
                Err(_) => {
                    tracing::warn!(destination = destination.name(), "dispatch timed out");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::mock::{MockCloudAdapter, MockEventSource};
    use crate::adapter::{CloudAdapter, RetryPolicy};
    use crate::engine::SyncConfig;
    use crate::store::InMemoryGraphStore;
    use crate::types::{
        ChangeFilter, ChangeType, CloudEvent, NodeInput, NodeStatus, Provider, ResourceType,
    };
    use serde_json::Value;

    fn make_input(native_id: &str, cost: f64) -> NodeInput {
        NodeInput {
            provider: Provider::Aws,
            account: "123".into(),
            region: "us-east-1".into(),
            resource_type: ResourceType::Compute,
            native_id: native_id.into(),
            name: native_id.into(),
            status: NodeStatus::Running,
            tags: Default::default(),
            metadata: Value::Null,
            cost_monthly: Some(cost),
            owner: None,
        }
    }

    fn build_monitor(
        adapter: Arc<MockCloudAdapter>,
        config: MonitorConfig,
    ) -> Arc<Monitor<InMemoryGraphStore>> {
        let store = Arc::new(InMemoryGraphStore::new());
        let mut engine = GraphEngine::new(
            store,
            SyncConfig {
                retry: RetryPolicy::immediate(1),
                ..SyncConfig::default()
            },
        );
        engine.register_adapter(adapter as Arc<dyn CloudAdapter>);
        Arc::new(Monitor::new(Arc::new(engine), config))
    }

    #[tokio::test]
    async fn test_cycle_syncs_and_fires_orphan_alert() {
        let adapter = Arc::new(
            MockCloudAdapter::new(Provider::Aws).with_nodes(vec![make_input("vm-1", 50.0)]),
        );
        let monitor = build_monitor(adapter, MonitorConfig::default());

        let outcome = monitor.run_one_cycle().await.unwrap();
        assert_eq!(outcome.sync_records.len(), 1);
        let orphan = outcome
            .alerts
            .iter()
            .find(|a| a.category == AlertCategory::Orphan)
            .unwrap();
        assert_eq!(orphan.severity, AlertSeverity::Warning);
    }

    #[tokio::test]
    async fn test_cooldown_suppresses_second_fire() {
        let adapter = Arc::new(
            MockCloudAdapter::new(Provider::Aws).with_nodes(vec![make_input("vm-1", 50.0)]),
        );
        let monitor = build_monitor(
            adapter,
            MonitorConfig {
                alert_cooldown: Duration::from_secs(3600),
                ..MonitorConfig::default()
            },
        );

        let first = monitor.run_one_cycle().await.unwrap();
        assert!(!first.alerts.is_empty());

        let second = monitor.run_one_cycle().await.unwrap();
        assert!(
            second.alerts.is_empty(),
            "orphan rule must be suppressed by cooldown"
        );
    }

    #[tokio::test]
    async fn test_alert_cap() {
        let adapter = Arc::new(
            MockCloudAdapter::new(Provider::Aws).with_nodes(vec![make_input("vm-1", 50.0)]),
        );
        let monitor = build_monitor(
            adapter,
            MonitorConfig {
                max_alerts_per_cycle: 0,
                ..MonitorConfig::default()
            },
        );

        let outcome = monitor.run_one_cycle().await.unwrap();
        assert!(outcome.alerts.is_empty());
    }

    #[tokio::test]
    async fn test_event_ingestion_maps_change_types() {
        let adapter = Arc::new(MockCloudAdapter::new(Provider::Aws));
        let source = Arc::new(MockEventSource::new(Provider::Aws));
        source.push(CloudEvent {
            id: "e1".into(),
            provider: Provider::Aws,
            event_type: "TerminateInstances".into(),
            resource_id: Some("aws::us-east-1:compute:i-dead".into()),
            resource_type: Some(ResourceType::Compute),
            actor: Some("mallory".into()),
            timestamp: 5_000,
            read_only: false,
            success: true,
            raw: Value::Null,
        });
        source.push(CloudEvent {
            id: "e2".into(),
            provider: Provider::Aws,
            event_type: "DescribeInstances".into(),
            resource_id: Some("aws::us-east-1:compute:i-dead".into()),
            resource_type: Some(ResourceType::Compute),
            actor: None,
            timestamp: 6_000,
            read_only: true,
            success: true,
            raw: Value::Null,
        });

        let store = Arc::new(InMemoryGraphStore::new());
        let mut engine = GraphEngine::new(Arc::clone(&store), SyncConfig::default());
        engine.register_adapter(adapter as Arc<dyn CloudAdapter>);
        let monitor = Arc::new(
            Monitor::new(Arc::new(engine), MonitorConfig::default())
                .with_event_source(source as Arc<dyn crate::adapter::EventSource>),
        );

        let appended = monitor.run_event_cycle().await.unwrap();
        assert_eq!(appended, 1, "read-only events are excluded");

        let changes = store
            .get_changes(&ChangeFilter::target("aws::us-east-1:compute:i-dead"))
            .await
            .unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::NodeDeleted);
        assert_eq!(changes[0].detected_via, DetectedVia::EventStream);
        assert_eq!(changes[0].initiator_type, InitiatorType::Human);
        assert_eq!(changes[0].initiator.as_deref(), Some("mallory"));

        // High-water mark advanced: nothing new on the next poll.
        assert_eq!(monitor.run_event_cycle().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let adapter = Arc::new(
            MockCloudAdapter::new(Provider::Aws).with_nodes(vec![make_input("vm-1", 1.0)]),
        );
        let monitor = build_monitor(
            adapter,
            MonitorConfig {
                interval: Duration::from_millis(20),
                event_poll_interval: Duration::from_millis(20),
                ..MonitorConfig::default()
            },
        );

        monitor.start();
        tokio::time::sleep(Duration::from_millis(80)).await;
        monitor.stop();

        // At least one scheduled cycle ran.
        let stats = monitor.engine.get_stats().await.unwrap();
        assert!(stats.total_nodes >= 1);
        assert!(stats.last_sync_at.is_some());
    }
}
