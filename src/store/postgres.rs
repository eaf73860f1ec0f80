//! PostgreSQL graph store for production use.
//!
//! All state lives inside one configurable schema so several deployments
//! (or test runs) can share a database without touching each other.
//!
//! ## Configuration
//!
//! Settings come from environment variables:
//! - `DATABASE_URL`: PostgreSQL connection string (required)
//! - `DB_SCHEMA`: schema holding all tables (default: cloudgraph)
//! - `DB_MAX_CONNECTIONS`: maximum pool size (default: 10)
//! - `DB_MIN_CONNECTIONS`: minimum idle connections (default: 2)
//! - `DB_CONNECT_TIMEOUT_SECS`: connection timeout (default: 10)
//! - `DB_IDLE_TIMEOUT_SECS`: idle connection timeout (default: 300)
//! - `DB_MAX_LIFETIME_SECS`: max connection lifetime (default: 1800)

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use super::cursor;
use super::upsert::{apply_edge_upsert, apply_node_upsert, node_delete_changes, UpsertKind};
use super::{GraphStore, StoreError, UpsertOutcome};
use crate::clock::MonotonicClock;
use crate::types::{
    Change, ChangeFilter, ChangeRequest, ChangeType, DetectedVia, Direction, Edge, EdgeFilter,
    EdgeId, GraphSnapshot, GraphStats, Group, GroupType, InitiatorType, Node, NodeFilter, NodeId,
    NodeStatus, Page, PageRequest, Provider, RequestStatus, ResourceType, Risk, RiskLevel,
    SnapshotMeta, SnapshotTrigger, SyncRecord, SyncStatus,
};

/// Configuration for the PostgreSQL connection pool.
///
/// Production defaults balance pool size against managed-database
/// connection limits; timeouts are aggressive to fail fast.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL.
    pub database_url: String,
    /// Schema all tables live in (default: cloudgraph).
    pub schema: String,
    /// Maximum connections in pool (default: 10).
    pub max_connections: u32,
    /// Minimum idle connections to keep warm (default: 2).
    pub min_connections: u32,
    /// Connection acquire timeout in seconds (default: 10).
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds (default: 300 = 5 min).
    pub idle_timeout_secs: u64,
    /// Maximum connection lifetime in seconds (default: 1800 = 30 min).
    pub max_lifetime_secs: u64,
}

impl PostgresConfig {
    /// Load configuration from environment variables with production defaults.
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/cloudgraph".to_string()),
            schema: std::env::var("DB_SCHEMA").unwrap_or_else(|_| "cloudgraph".to_string()),
            max_connections: env_parse("DB_MAX_CONNECTIONS", 10),
            min_connections: env_parse("DB_MIN_CONNECTIONS", 2),
            connect_timeout_secs: env_parse("DB_CONNECT_TIMEOUT_SECS", 10),
            idle_timeout_secs: env_parse("DB_IDLE_TIMEOUT_SECS", 300),
            max_lifetime_secs: env_parse("DB_MAX_LIFETIME_SECS", 1800),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Value to bind into a dynamically built query, in order.
enum Bind {
    Str(String),
    StrList(Vec<String>),
    Json(Value),
    Int(i64),
}

/// Accumulates WHERE conditions and their bind values.
#[derive(Default)]
struct SqlFilter {
    conditions: Vec<String>,
    binds: Vec<Bind>,
}

impl SqlFilter {
    fn push(&mut self, template: &str, bind: Bind) {
        let placeholder = format!("${}", self.binds.len() + 1);
        self.conditions.push(template.replace("{}", &placeholder));
        self.binds.push(bind);
    }

    fn where_clause(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conditions.join(" AND "))
        }
    }

    fn next_placeholder(&mut self, bind: Bind) -> String {
        self.binds.push(bind);
        format!("${}", self.binds.len())
    }

    fn bind_all<'q>(
        &'q self,
        mut query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
        for bind in &self.binds {
            query = match bind {
                Bind::Str(s) => query.bind(s),
                Bind::StrList(list) => query.bind(list),
                Bind::Json(v) => query.bind(v),
                Bind::Int(i) => query.bind(i),
            };
        }
        query
    }
}

/// PostgreSQL graph store.
pub struct PostgresGraphStore {
    pool: PgPool,
    schema: String,
    clock: MonotonicClock,
}

impl PostgresGraphStore {
    /// Connect and ensure the schema and tables exist.
    pub async fn new(config: PostgresConfig) -> Result<Self, StoreError> {
        tracing::info!(
            schema = %config.schema,
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            connect_timeout_secs = config.connect_timeout_secs,
            "Initializing PostgreSQL connection pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .test_before_acquire(true)
            .connect(&config.database_url)
            .await?;

        let store = Self {
            pool,
            schema: config.schema,
            clock: MonotonicClock::new(),
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// Connect from environment variables.
    pub async fn from_env() -> Result<Self, StoreError> {
        Self::new(PostgresConfig::from_env()).await
    }

    /// Check if the database is reachable.
    pub async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }

    fn table(&self, name: &str) -> String {
        format!("{}.{}", self.schema, name)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", self.schema))
            .execute(&self.pool)
            .await?;

        let ddl = [
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id TEXT PRIMARY KEY,
                    provider TEXT NOT NULL,
                    account TEXT NOT NULL,
                    region TEXT NOT NULL,
                    resource_type TEXT NOT NULL,
                    native_id TEXT NOT NULL,
                    name TEXT NOT NULL,
                    status TEXT NOT NULL,
                    tags JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                    metadata JSONB,
                    cost_monthly DOUBLE PRECISION,
                    owner TEXT,
                    created_at BIGINT NOT NULL,
                    last_synced_at BIGINT NOT NULL
                )",
                self.table("nodes")
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id TEXT PRIMARY KEY,
                    source_id TEXT NOT NULL,
                    target_id TEXT NOT NULL,
                    relationship_type TEXT NOT NULL,
                    confidence DOUBLE PRECISION NOT NULL,
                    discovered_via TEXT NOT NULL,
                    metadata JSONB
                )",
                self.table("edges")
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS edges_source_idx ON {} (source_id)",
                self.table("edges")
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS edges_target_idx ON {} (target_id)",
                self.table("edges")
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id TEXT PRIMARY KEY,
                    target_id TEXT NOT NULL,
                    change_type TEXT NOT NULL,
                    field TEXT,
                    previous_value JSONB,
                    new_value JSONB,
                    detected_at BIGINT NOT NULL,
                    detected_via TEXT NOT NULL,
                    correlation_id TEXT,
                    initiator TEXT,
                    initiator_type TEXT NOT NULL,
                    metadata JSONB
                )",
                self.table("changes")
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS changes_target_idx ON {} (target_id, detected_at DESC)",
                self.table("changes")
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    group_type TEXT NOT NULL,
                    provider TEXT,
                    created_at BIGINT NOT NULL,
                    updated_at BIGINT NOT NULL
                )",
                self.table("groups")
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    group_id TEXT NOT NULL,
                    node_id TEXT NOT NULL,
                    PRIMARY KEY (group_id, node_id)
                )",
                self.table("group_members")
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id TEXT PRIMARY KEY,
                    provider TEXT NOT NULL,
                    started_at BIGINT NOT NULL,
                    completed_at BIGINT,
                    status TEXT NOT NULL,
                    nodes_discovered BIGINT NOT NULL DEFAULT 0,
                    nodes_drifted BIGINT NOT NULL DEFAULT 0,
                    nodes_disappeared BIGINT NOT NULL DEFAULT 0,
                    error TEXT
                )",
                self.table("sync_records")
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id TEXT PRIMARY KEY,
                    created_at BIGINT NOT NULL,
                    label TEXT,
                    trigger TEXT NOT NULL,
                    node_count BIGINT NOT NULL,
                    edge_count BIGINT NOT NULL,
                    fingerprint TEXT NOT NULL
                )",
                self.table("snapshots")
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    snapshot_id TEXT NOT NULL,
                    node_id TEXT NOT NULL,
                    payload JSONB NOT NULL,
                    PRIMARY KEY (snapshot_id, node_id)
                )",
                self.table("snapshot_nodes")
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    snapshot_id TEXT NOT NULL,
                    edge_id TEXT NOT NULL,
                    payload JSONB NOT NULL,
                    PRIMARY KEY (snapshot_id, edge_id)
                )",
                self.table("snapshot_edges")
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id TEXT PRIMARY KEY,
                    target_id TEXT NOT NULL,
                    resource_type TEXT NOT NULL,
                    provider TEXT NOT NULL,
                    action TEXT NOT NULL,
                    initiator TEXT NOT NULL,
                    initiator_type TEXT NOT NULL,
                    description TEXT NOT NULL,
                    risk_score BIGINT NOT NULL,
                    risk_level TEXT NOT NULL,
                    risk_factors JSONB NOT NULL DEFAULT '[]'::jsonb,
                    status TEXT NOT NULL,
                    created_at BIGINT NOT NULL,
                    approved_by TEXT,
                    rejection_reason TEXT,
                    executed_at BIGINT
                )",
                self.table("change_requests")
            ),
        ];

        for statement in &ddl {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn parse_enum<T>(raw: &str, parse: fn(&str) -> Option<T>, what: &str) -> Result<T, StoreError> {
        parse(raw).ok_or_else(|| StoreError::Backend(format!("unknown {what}: {raw}")))
    }

    fn parse_node_row(row: &PgRow) -> Result<Node, StoreError> {
        let provider: String = row.try_get("provider")?;
        let resource_type: String = row.try_get("resource_type")?;
        let status: String = row.try_get("status")?;
        let tags: Value = row.try_get("tags")?;
        let tags: BTreeMap<String, String> = serde_json::from_value(tags)?;

        Ok(Node {
            id: NodeId::from_raw(row.try_get::<String, _>("id")?),
            provider: Self::parse_enum(&provider, Provider::from_str, "provider")?,
            account: row.try_get("account")?,
            region: row.try_get("region")?,
            resource_type: Self::parse_enum(
                &resource_type,
                ResourceType::from_str,
                "resource type",
            )?,
            native_id: row.try_get("native_id")?,
            name: row.try_get("name")?,
            status: NodeStatus::from_str(&status).unwrap_or_default(),
            tags,
            metadata: row.try_get::<Option<Value>, _>("metadata")?.unwrap_or(Value::Null),
            cost_monthly: row.try_get("cost_monthly")?,
            owner: row.try_get("owner")?,
            created_at: row.try_get("created_at")?,
            last_synced_at: row.try_get("last_synced_at")?,
        })
    }

    fn parse_edge_row(row: &PgRow) -> Result<Edge, StoreError> {
        let relationship: String = row.try_get("relationship_type")?;
        let discovered_via: String = row.try_get("discovered_via")?;
        Ok(Edge {
            id: EdgeId::from_raw(row.try_get::<String, _>("id")?),
            source_id: NodeId::from_raw(row.try_get::<String, _>("source_id")?),
            target_id: NodeId::from_raw(row.try_get::<String, _>("target_id")?),
            relationship_type: Self::parse_enum(
                &relationship,
                crate::types::RelationshipType::from_str,
                "relationship type",
            )?,
            confidence: row.try_get("confidence")?,
            discovered_via: Self::parse_enum(
                &discovered_via,
                crate::types::DiscoveredVia::from_str,
                "discovery channel",
            )?,
            metadata: row.try_get::<Option<Value>, _>("metadata")?.unwrap_or(Value::Null),
        })
    }

    fn parse_change_row(row: &PgRow) -> Result<Change, StoreError> {
        let change_type: String = row.try_get("change_type")?;
        let detected_via: String = row.try_get("detected_via")?;
        let initiator_type: String = row.try_get("initiator_type")?;
        Ok(Change {
            id: row.try_get("id")?,
            target_id: row.try_get("target_id")?,
            change_type: Self::parse_enum(&change_type, ChangeType::from_str, "change type")?,
            field: row.try_get("field")?,
            previous_value: row.try_get("previous_value")?,
            new_value: row.try_get("new_value")?,
            detected_at: row.try_get("detected_at")?,
            detected_via: Self::parse_enum(&detected_via, DetectedVia::from_str, "channel")?,
            correlation_id: row.try_get("correlation_id")?,
            initiator: row.try_get("initiator")?,
            initiator_type: InitiatorType::from_str(&initiator_type).unwrap_or_default(),
            metadata: row.try_get::<Option<Value>, _>("metadata")?.unwrap_or(Value::Null),
        })
    }

    fn parse_sync_row(row: &PgRow) -> Result<SyncRecord, StoreError> {
        let provider: String = row.try_get("provider")?;
        let status: String = row.try_get("status")?;
        Ok(SyncRecord {
            id: row.try_get("id")?,
            provider: Self::parse_enum(&provider, Provider::from_str, "provider")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            status: Self::parse_enum(&status, SyncStatus::from_str, "sync status")?,
            nodes_discovered: row.try_get::<i64, _>("nodes_discovered")? as u64,
            nodes_drifted: row.try_get::<i64, _>("nodes_drifted")? as u64,
            nodes_disappeared: row.try_get::<i64, _>("nodes_disappeared")? as u64,
            error: row.try_get("error")?,
        })
    }

    fn node_filter_sql(filter: &NodeFilter) -> SqlFilter {
        let mut sql = SqlFilter::default();
        if let Some(p) = filter.provider {
            sql.push("provider = {}", Bind::Str(p.to_string()));
        }
        if let Some(ref account) = filter.account {
            sql.push("account = {}", Bind::Str(account.clone()));
        }
        if let Some(ref region) = filter.region {
            sql.push("region = {}", Bind::Str(region.clone()));
        }
        if !filter.resource_types.is_empty() {
            sql.push(
                "resource_type = ANY({})",
                Bind::StrList(filter.resource_types.iter().map(|t| t.to_string()).collect()),
            );
        }
        if !filter.statuses.is_empty() {
            sql.push(
                "status = ANY({})",
                Bind::StrList(filter.statuses.iter().map(|s| s.to_string()).collect()),
            );
        }
        if !filter.tag_match.is_empty() {
            sql.push(
                "tags @> {}",
                Bind::Json(serde_json::json!(filter.tag_match)),
            );
        }
        if let Some(ref prefix) = filter.name_prefix {
            let escaped = prefix.replace('%', "\\%").replace('_', "\\_");
            sql.push("name LIKE {}", Bind::Str(format!("{escaped}%")));
        }
        if let Some(ref fragment) = filter.owner_contains {
            let escaped = fragment.replace('%', "\\%").replace('_', "\\_");
            sql.push("owner ILIKE {}", Bind::Str(format!("%{escaped}%")));
        }
        sql
    }

    fn change_filter_sql(filter: &ChangeFilter) -> SqlFilter {
        let mut sql = SqlFilter::default();
        if let Some(ref target) = filter.target_id {
            sql.push("target_id = {}", Bind::Str(target.clone()));
        }
        if let Some(ct) = filter.change_type {
            sql.push("change_type = {}", Bind::Str(ct.to_string()));
        }
        if let Some(via) = filter.detected_via {
            sql.push("detected_via = {}", Bind::Str(via.to_string()));
        }
        if let Some(it) = filter.initiator_type {
            sql.push("initiator_type = {}", Bind::Str(it.to_string()));
        }
        if let Some(since) = filter.since_ms {
            sql.push("detected_at >= {}", Bind::Int(since));
        }
        if let Some(until) = filter.until_ms {
            sql.push("detected_at <= {}", Bind::Int(until));
        }
        sql
    }

    fn edge_filter_sql(filter: &EdgeFilter) -> SqlFilter {
        let mut sql = SqlFilter::default();
        if let Some(ref source) = filter.source_id {
            sql.push("source_id = {}", Bind::Str(source.to_string()));
        }
        if let Some(ref target) = filter.target_id {
            sql.push("target_id = {}", Bind::Str(target.to_string()));
        }
        if let Some(rel) = filter.relationship_type {
            sql.push("relationship_type = {}", Bind::Str(rel.to_string()));
        }
        sql
    }

    async fn count_where(&self, table: &str, sql: &SqlFilter) -> Result<u64, StoreError> {
        let statement = format!(
            "SELECT COUNT(*) AS n FROM {}{}",
            self.table(table),
            sql.where_clause()
        );
        let row = sql.bind_all(sqlx::query(&statement)).fetch_one(&self.pool).await?;
        Ok(row.try_get::<i64, _>("n")? as u64)
    }

    async fn write_node(&self, node: &Node) -> Result<(), StoreError> {
        let statement = format!(
            "INSERT INTO {} (id, provider, account, region, resource_type, native_id, name,
                             status, tags, metadata, cost_monthly, owner, created_at, last_synced_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
             ON CONFLICT (id) DO UPDATE SET
                 provider = EXCLUDED.provider,
                 account = EXCLUDED.account,
                 region = EXCLUDED.region,
                 resource_type = EXCLUDED.resource_type,
                 native_id = EXCLUDED.native_id,
                 name = EXCLUDED.name,
                 status = EXCLUDED.status,
                 tags = EXCLUDED.tags,
                 metadata = EXCLUDED.metadata,
                 cost_monthly = EXCLUDED.cost_monthly,
                 owner = EXCLUDED.owner,
                 last_synced_at = EXCLUDED.last_synced_at",
            self.table("nodes")
        );
        sqlx::query(&statement)
            .bind(node.id.as_str())
            .bind(node.provider.to_string())
            .bind(&node.account)
            .bind(&node.region)
            .bind(node.resource_type.to_string())
            .bind(&node.native_id)
            .bind(&node.name)
            .bind(node.status.to_string())
            .bind(serde_json::json!(node.tags))
            .bind(&node.metadata)
            .bind(node.cost_monthly)
            .bind(&node.owner)
            .bind(node.created_at)
            .bind(node.last_synced_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn write_change(&self, change: &Change) -> Result<(), StoreError> {
        let statement = format!(
            "INSERT INTO {} (id, target_id, change_type, field, previous_value, new_value,
                             detected_at, detected_via, correlation_id, initiator,
                             initiator_type, metadata)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            self.table("changes")
        );
        sqlx::query(&statement)
            .bind(&change.id)
            .bind(&change.target_id)
            .bind(change.change_type.to_string())
            .bind(&change.field)
            .bind(&change.previous_value)
            .bind(&change.new_value)
            .bind(change.detected_at)
            .bind(change.detected_via.to_string())
            .bind(&change.correlation_id)
            .bind(&change.initiator)
            .bind(change.initiator_type.to_string())
            .bind(&change.metadata)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl GraphStore for PostgresGraphStore {
    async fn upsert_nodes(&self, nodes: &[Node]) -> Result<UpsertOutcome, StoreError> {
        let mut outcome = UpsertOutcome::default();
        for incoming in nodes {
            let existing = self.get_node(&incoming.id).await?;
            let (merged, changes, kind) = apply_node_upsert(existing, incoming, &self.clock);
            self.write_node(&merged).await?;
            for change in &changes {
                self.write_change(change).await?;
            }
            match kind {
                UpsertKind::Created => outcome.created += 1,
                UpsertKind::Updated => outcome.updated += 1,
                UpsertKind::Unchanged => outcome.unchanged += 1,
            }
        }
        Ok(outcome)
    }

    async fn upsert_edges(&self, edges: &[Edge]) -> Result<UpsertOutcome, StoreError> {
        let mut outcome = UpsertOutcome::default();
        for incoming in edges {
            for endpoint in [&incoming.source_id, &incoming.target_id] {
                if self.get_node(endpoint).await?.is_none() {
                    return Err(StoreError::DanglingEdge {
                        edge: incoming.id.to_string(),
                        missing: endpoint.to_string(),
                    });
                }
            }

            let existing = self.get_edge(&incoming.id).await?;
            let (merged, changes, kind) = apply_edge_upsert(existing, incoming, &self.clock);
            let statement = format!(
                "INSERT INTO {} (id, source_id, target_id, relationship_type, confidence,
                                 discovered_via, metadata)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (id) DO UPDATE SET
                     confidence = EXCLUDED.confidence,
                     discovered_via = EXCLUDED.discovered_via,
                     metadata = EXCLUDED.metadata",
                self.table("edges")
            );
            sqlx::query(&statement)
                .bind(merged.id.as_str())
                .bind(merged.source_id.as_str())
                .bind(merged.target_id.as_str())
                .bind(merged.relationship_type.to_string())
                .bind(merged.confidence)
                .bind(merged.discovered_via.to_string())
                .bind(&merged.metadata)
                .execute(&self.pool)
                .await?;
            for change in &changes {
                self.write_change(change).await?;
            }
            match kind {
                UpsertKind::Created => outcome.created += 1,
                UpsertKind::Updated => outcome.updated += 1,
                UpsertKind::Unchanged => outcome.unchanged += 1,
            }
        }
        Ok(outcome)
    }

    async fn get_node(&self, id: &NodeId) -> Result<Option<Node>, StoreError> {
        let statement = format!("SELECT * FROM {} WHERE id = $1", self.table("nodes"));
        let row = sqlx::query(&statement)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::parse_node_row).transpose()
    }

    async fn get_edge(&self, id: &EdgeId) -> Result<Option<Edge>, StoreError> {
        let statement = format!("SELECT * FROM {} WHERE id = $1", self.table("edges"));
        let row = sqlx::query(&statement)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::parse_edge_row).transpose()
    }

    async fn delete_node(&self, id: &NodeId) -> Result<bool, StoreError> {
        let node = match self.get_node(id).await? {
            Some(node) => node,
            None => return Ok(false),
        };
        let cascaded = self.get_edges_for_node(id, Direction::Both).await?;

        let mut tx = self.pool.begin().await?;
        let delete_edges = format!(
            "DELETE FROM {} WHERE source_id = $1 OR target_id = $1",
            self.table("edges")
        );
        sqlx::query(&delete_edges)
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        let delete_members = format!(
            "DELETE FROM {} WHERE node_id = $1",
            self.table("group_members")
        );
        sqlx::query(&delete_members)
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        let delete_node = format!("DELETE FROM {} WHERE id = $1", self.table("nodes"));
        sqlx::query(&delete_node)
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        for change in node_delete_changes(&node, &cascaded, &self.clock) {
            self.write_change(&change).await?;
        }
        Ok(true)
    }

    async fn query_nodes(&self, filter: &NodeFilter) -> Result<Vec<Node>, StoreError> {
        let sql = Self::node_filter_sql(filter);
        let statement = format!(
            "SELECT * FROM {}{} ORDER BY id",
            self.table("nodes"),
            sql.where_clause()
        );
        let rows = sql.bind_all(sqlx::query(&statement)).fetch_all(&self.pool).await?;
        rows.iter().map(Self::parse_node_row).collect()
    }

    async fn query_nodes_paginated(
        &self,
        filter: &NodeFilter,
        page: &PageRequest,
    ) -> Result<Page<Node>, StoreError> {
        let hash = cursor::filter_hash(filter);
        let offset = match &page.cursor {
            Some(c) => cursor::decode(c, hash)?,
            None => 0,
        };
        let limit = page.effective_limit() as i64;

        let mut sql = Self::node_filter_sql(filter);
        let total_count = self.count_where("nodes", &sql).await?;

        let limit_ph = sql.next_placeholder(Bind::Int(limit));
        let offset_ph = sql.next_placeholder(Bind::Int(offset as i64));
        let statement = format!(
            "SELECT * FROM {}{} ORDER BY id LIMIT {} OFFSET {}",
            self.table("nodes"),
            sql.where_clause(),
            limit_ph,
            offset_ph
        );
        let rows = sql.bind_all(sqlx::query(&statement)).fetch_all(&self.pool).await?;
        let items: Vec<Node> = rows.iter().map(Self::parse_node_row).collect::<Result<_, _>>()?;

        let next_offset = offset + items.len() as u64;
        let has_more = next_offset < total_count;
        Ok(Page {
            items,
            total_count,
            has_more,
            next_cursor: has_more.then(|| cursor::encode(hash, next_offset)),
        })
    }

    async fn query_edges_paginated(
        &self,
        filter: &EdgeFilter,
        page: &PageRequest,
    ) -> Result<Page<Edge>, StoreError> {
        let hash = cursor::filter_hash(filter);
        let offset = match &page.cursor {
            Some(c) => cursor::decode(c, hash)?,
            None => 0,
        };
        let limit = page.effective_limit() as i64;

        let mut sql = Self::edge_filter_sql(filter);
        let total_count = self.count_where("edges", &sql).await?;

        let limit_ph = sql.next_placeholder(Bind::Int(limit));
        let offset_ph = sql.next_placeholder(Bind::Int(offset as i64));
        let statement = format!(
            "SELECT * FROM {}{} ORDER BY id LIMIT {} OFFSET {}",
            self.table("edges"),
            sql.where_clause(),
            limit_ph,
            offset_ph
        );
        let rows = sql.bind_all(sqlx::query(&statement)).fetch_all(&self.pool).await?;
        let items: Vec<Edge> = rows.iter().map(Self::parse_edge_row).collect::<Result<_, _>>()?;

        let next_offset = offset + items.len() as u64;
        let has_more = next_offset < total_count;
        Ok(Page {
            items,
            total_count,
            has_more,
            next_cursor: has_more.then(|| cursor::encode(hash, next_offset)),
        })
    }

    async fn get_changes_paginated(
        &self,
        filter: &ChangeFilter,
        page: &PageRequest,
    ) -> Result<Page<Change>, StoreError> {
        let hash = cursor::filter_hash(filter);
        let offset = match &page.cursor {
            Some(c) => cursor::decode(c, hash)?,
            None => 0,
        };
        let limit = page.effective_limit() as i64;

        let mut sql = Self::change_filter_sql(filter);
        let total_count = self.count_where("changes", &sql).await?;

        let limit_ph = sql.next_placeholder(Bind::Int(limit));
        let offset_ph = sql.next_placeholder(Bind::Int(offset as i64));
        let statement = format!(
            "SELECT * FROM {}{} ORDER BY detected_at DESC, id DESC LIMIT {} OFFSET {}",
            self.table("changes"),
            sql.where_clause(),
            limit_ph,
            offset_ph
        );
        let rows = sql.bind_all(sqlx::query(&statement)).fetch_all(&self.pool).await?;
        let items: Vec<Change> = rows
            .iter()
            .map(Self::parse_change_row)
            .collect::<Result<_, _>>()?;

        let next_offset = offset + items.len() as u64;
        let has_more = next_offset < total_count;
        Ok(Page {
            items,
            total_count,
            has_more,
            next_cursor: has_more.then(|| cursor::encode(hash, next_offset)),
        })
    }

    async fn get_edges_for_node(
        &self,
        id: &NodeId,
        direction: Direction,
    ) -> Result<Vec<Edge>, StoreError> {
        let condition = match direction {
            Direction::Downstream => "source_id = $1",
            Direction::Upstream => "target_id = $1",
            Direction::Both => "source_id = $1 OR target_id = $1",
        };
        let statement = format!(
            "SELECT * FROM {} WHERE {} ORDER BY id",
            self.table("edges"),
            condition
        );
        let rows = sqlx::query(&statement)
            .bind(id.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::parse_edge_row).collect()
    }

    async fn append_changes(&self, changes: &[Change]) -> Result<(), StoreError> {
        for change in changes {
            self.write_change(change).await?;
        }
        Ok(())
    }

    async fn get_changes(&self, filter: &ChangeFilter) -> Result<Vec<Change>, StoreError> {
        let sql = Self::change_filter_sql(filter);
        let statement = format!(
            "SELECT * FROM {}{} ORDER BY detected_at DESC, id DESC",
            self.table("changes"),
            sql.where_clause()
        );
        let rows = sql.bind_all(sqlx::query(&statement)).fetch_all(&self.pool).await?;
        rows.iter().map(Self::parse_change_row).collect()
    }

    async fn get_node_timeline(
        &self,
        id: &str,
        limit: usize,
    ) -> Result<Vec<Change>, StoreError> {
        let statement = format!(
            "SELECT * FROM {} WHERE target_id = $1 ORDER BY detected_at DESC, id DESC LIMIT $2",
            self.table("changes")
        );
        let rows = sqlx::query(&statement)
            .bind(id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::parse_change_row).collect()
    }

    async fn upsert_group(&self, group: &Group) -> Result<(), StoreError> {
        let statement = format!(
            "INSERT INTO {} (id, name, group_type, provider, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (id) DO UPDATE SET
                 name = EXCLUDED.name,
                 group_type = EXCLUDED.group_type,
                 provider = EXCLUDED.provider,
                 updated_at = EXCLUDED.updated_at",
            self.table("groups")
        );
        sqlx::query(&statement)
            .bind(&group.id)
            .bind(&group.name)
            .bind(group.group_type.to_string())
            .bind(group.provider.map(|p| p.to_string()))
            .bind(group.created_at)
            .bind(group.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_group(&self, id: &str) -> Result<Option<Group>, StoreError> {
        let statement = format!("SELECT * FROM {} WHERE id = $1", self.table("groups"));
        let row = sqlx::query(&statement)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| -> Result<Group, StoreError> {
            let group_type: String = r.try_get("group_type")?;
            let provider: Option<String> = r.try_get("provider")?;
            Ok(Group {
                id: r.try_get("id")?,
                name: r.try_get("name")?,
                group_type: Self::parse_enum(&group_type, GroupType::from_str, "group type")?,
                provider: provider.as_deref().and_then(Provider::from_str),
                created_at: r.try_get("created_at")?,
                updated_at: r.try_get("updated_at")?,
            })
        })
        .transpose()
    }

    async fn list_groups(&self) -> Result<Vec<Group>, StoreError> {
        let statement = format!("SELECT id FROM {} ORDER BY id", self.table("groups"));
        let rows = sqlx::query(&statement).fetch_all(&self.pool).await?;
        let mut groups = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            if let Some(group) = self.get_group(&id).await? {
                groups.push(group);
            }
        }
        Ok(groups)
    }

    async fn add_group_member(
        &self,
        group_id: &str,
        node_id: &NodeId,
    ) -> Result<(), StoreError> {
        if self.get_group(group_id).await?.is_none() {
            return Err(StoreError::NotFound(format!("group {group_id}")));
        }
        let statement = format!(
            "INSERT INTO {} (group_id, node_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            self.table("group_members")
        );
        sqlx::query(&statement)
            .bind(group_id)
            .bind(node_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn remove_group_member(
        &self,
        group_id: &str,
        node_id: &NodeId,
    ) -> Result<(), StoreError> {
        let statement = format!(
            "DELETE FROM {} WHERE group_id = $1 AND node_id = $2",
            self.table("group_members")
        );
        sqlx::query(&statement)
            .bind(group_id)
            .bind(node_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_group_members(&self, group_id: &str) -> Result<Vec<NodeId>, StoreError> {
        let statement = format!(
            "SELECT node_id FROM {} WHERE group_id = $1 ORDER BY node_id",
            self.table("group_members")
        );
        let rows = sqlx::query(&statement)
            .bind(group_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| Ok(NodeId::from_raw(r.try_get::<String, _>("node_id")?)))
            .collect()
    }

    async fn save_snapshot(&self, snapshot: &GraphSnapshot) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let meta = format!(
            "INSERT INTO {} (id, created_at, label, trigger, node_count, edge_count, fingerprint)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (id) DO NOTHING",
            self.table("snapshots")
        );
        sqlx::query(&meta)
            .bind(&snapshot.meta.id)
            .bind(snapshot.meta.created_at)
            .bind(&snapshot.meta.label)
            .bind(snapshot.meta.trigger.to_string())
            .bind(snapshot.meta.node_count as i64)
            .bind(snapshot.meta.edge_count as i64)
            .bind(&snapshot.meta.fingerprint)
            .execute(&mut *tx)
            .await?;

        let node_link = format!(
            "INSERT INTO {} (snapshot_id, node_id, payload) VALUES ($1, $2, $3)
             ON CONFLICT DO NOTHING",
            self.table("snapshot_nodes")
        );
        for node in &snapshot.nodes {
            sqlx::query(&node_link)
                .bind(&snapshot.meta.id)
                .bind(node.id.as_str())
                .bind(serde_json::to_value(node)?)
                .execute(&mut *tx)
                .await?;
        }

        let edge_link = format!(
            "INSERT INTO {} (snapshot_id, edge_id, payload) VALUES ($1, $2, $3)
             ON CONFLICT DO NOTHING",
            self.table("snapshot_edges")
        );
        for edge in &snapshot.edges {
            sqlx::query(&edge_link)
                .bind(&snapshot.meta.id)
                .bind(edge.id.as_str())
                .bind(serde_json::to_value(edge)?)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_snapshot(&self, id: &str) -> Result<Option<GraphSnapshot>, StoreError> {
        let statement = format!("SELECT * FROM {} WHERE id = $1", self.table("snapshots"));
        let row = match sqlx::query(&statement)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
        {
            Some(row) => row,
            None => return Ok(None),
        };

        let trigger: String = row.try_get("trigger")?;
        let meta = SnapshotMeta {
            id: row.try_get("id")?,
            created_at: row.try_get("created_at")?,
            label: row.try_get("label")?,
            trigger: Self::parse_enum(&trigger, SnapshotTrigger::from_str, "trigger")?,
            node_count: row.try_get::<i64, _>("node_count")? as u64,
            edge_count: row.try_get::<i64, _>("edge_count")? as u64,
            fingerprint: row.try_get("fingerprint")?,
        };

        let nodes_q = format!(
            "SELECT payload FROM {} WHERE snapshot_id = $1 ORDER BY node_id",
            self.table("snapshot_nodes")
        );
        let node_rows = sqlx::query(&nodes_q).bind(id).fetch_all(&self.pool).await?;
        let nodes: Vec<Node> = node_rows
            .iter()
            .map(|r| Ok(serde_json::from_value(r.try_get::<Value, _>("payload")?)?))
            .collect::<Result<_, StoreError>>()?;

        let edges_q = format!(
            "SELECT payload FROM {} WHERE snapshot_id = $1 ORDER BY edge_id",
            self.table("snapshot_edges")
        );
        let edge_rows = sqlx::query(&edges_q).bind(id).fetch_all(&self.pool).await?;
        let edges: Vec<Edge> = edge_rows
            .iter()
            .map(|r| Ok(serde_json::from_value(r.try_get::<Value, _>("payload")?)?))
            .collect::<Result<_, StoreError>>()?;

        Ok(Some(GraphSnapshot { meta, nodes, edges }))
    }

    async fn list_snapshots(&self, limit: usize) -> Result<Vec<SnapshotMeta>, StoreError> {
        let statement = format!(
            "SELECT * FROM {} ORDER BY created_at DESC, id DESC LIMIT $1",
            self.table("snapshots")
        );
        let rows = sqlx::query(&statement)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let trigger: String = row.try_get("trigger")?;
                Ok(SnapshotMeta {
                    id: row.try_get("id")?,
                    created_at: row.try_get("created_at")?,
                    label: row.try_get("label")?,
                    trigger: Self::parse_enum(&trigger, SnapshotTrigger::from_str, "trigger")?,
                    node_count: row.try_get::<i64, _>("node_count")? as u64,
                    edge_count: row.try_get::<i64, _>("edge_count")? as u64,
                    fingerprint: row.try_get("fingerprint")?,
                })
            })
            .collect()
    }

    async fn save_sync_record(&self, record: &SyncRecord) -> Result<(), StoreError> {
        let statement = format!(
            "INSERT INTO {} (id, provider, started_at, completed_at, status,
                             nodes_discovered, nodes_drifted, nodes_disappeared, error)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (id) DO UPDATE SET
                 completed_at = EXCLUDED.completed_at,
                 status = EXCLUDED.status,
                 nodes_discovered = EXCLUDED.nodes_discovered,
                 nodes_drifted = EXCLUDED.nodes_drifted,
                 nodes_disappeared = EXCLUDED.nodes_disappeared,
                 error = EXCLUDED.error",
            self.table("sync_records")
        );
        sqlx::query(&statement)
            .bind(&record.id)
            .bind(record.provider.to_string())
            .bind(record.started_at)
            .bind(record.completed_at)
            .bind(record.status.to_string())
            .bind(record.nodes_discovered as i64)
            .bind(record.nodes_drifted as i64)
            .bind(record.nodes_disappeared as i64)
            .bind(&record.error)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_sync_records(&self, limit: usize) -> Result<Vec<SyncRecord>, StoreError> {
        let statement = format!(
            "SELECT * FROM {} ORDER BY started_at DESC, id DESC LIMIT $1",
            self.table("sync_records")
        );
        let rows = sqlx::query(&statement)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::parse_sync_row).collect()
    }

    async fn get_stats(&self) -> Result<GraphStats, StoreError> {
        let totals = format!(
            "SELECT COUNT(*) AS n, COALESCE(SUM(cost_monthly), 0) AS cost FROM {}",
            self.table("nodes")
        );
        let row = sqlx::query(&totals).fetch_one(&self.pool).await?;
        let mut stats = GraphStats {
            total_nodes: row.try_get::<i64, _>("n")? as u64,
            total_cost_monthly: row.try_get::<f64, _>("cost")?,
            ..GraphStats::default()
        };

        let edge_count = format!("SELECT COUNT(*) AS n FROM {}", self.table("edges"));
        stats.total_edges =
            sqlx::query(&edge_count).fetch_one(&self.pool).await?.try_get::<i64, _>("n")? as u64;

        let change_count = format!("SELECT COUNT(*) AS n FROM {}", self.table("changes"));
        stats.total_changes =
            sqlx::query(&change_count).fetch_one(&self.pool).await?.try_get::<i64, _>("n")? as u64;

        for (column, bucket) in [
            ("provider", &mut stats.nodes_by_provider),
            ("resource_type", &mut stats.nodes_by_resource_type),
            ("status", &mut stats.nodes_by_status),
        ] {
            let by = format!(
                "SELECT {column} AS k, COUNT(*) AS n FROM {} GROUP BY {column}",
                self.table("nodes")
            );
            for row in sqlx::query(&by).fetch_all(&self.pool).await? {
                bucket.insert(row.try_get("k")?, row.try_get::<i64, _>("n")? as u64);
            }
        }

        let last_sync = format!(
            "SELECT MAX(completed_at) AS t FROM {}",
            self.table("sync_records")
        );
        stats.last_sync_at = sqlx::query(&last_sync)
            .fetch_one(&self.pool)
            .await?
            .try_get("t")?;

        Ok(stats)
    }

    async fn save_change_request(&self, request: &ChangeRequest) -> Result<(), StoreError> {
        let statement = format!(
            "INSERT INTO {} (id, target_id, resource_type, provider, action, initiator,
                             initiator_type, description, risk_score, risk_level, risk_factors,
                             status, created_at, approved_by, rejection_reason, executed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
             ON CONFLICT (id) DO UPDATE SET
                 status = EXCLUDED.status,
                 approved_by = EXCLUDED.approved_by,
                 rejection_reason = EXCLUDED.rejection_reason,
                 executed_at = EXCLUDED.executed_at",
            self.table("change_requests")
        );
        sqlx::query(&statement)
            .bind(&request.id)
            .bind(&request.target_resource_id)
            .bind(request.resource_type.to_string())
            .bind(request.provider.to_string())
            .bind(request.action.to_string())
            .bind(&request.initiator)
            .bind(request.initiator_type.to_string())
            .bind(&request.description)
            .bind(request.risk.score as i64)
            .bind(request.risk.level.to_string())
            .bind(serde_json::json!(request.risk.factors))
            .bind(request.status.to_string())
            .bind(request.created_at)
            .bind(&request.approved_by)
            .bind(&request.rejection_reason)
            .bind(request.executed_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_change_request(
        &self,
        id: &str,
    ) -> Result<Option<ChangeRequest>, StoreError> {
        let statement = format!(
            "SELECT * FROM {} WHERE id = $1",
            self.table("change_requests")
        );
        let row = sqlx::query(&statement)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::parse_request_row).transpose()
    }

    async fn list_change_requests(
        &self,
        limit: usize,
    ) -> Result<Vec<ChangeRequest>, StoreError> {
        let statement = format!(
            "SELECT * FROM {} ORDER BY created_at DESC, id DESC LIMIT $1",
            self.table("change_requests")
        );
        let rows = sqlx::query(&statement)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::parse_request_row).collect()
    }
}

impl PostgresGraphStore {
    fn parse_request_row(row: &PgRow) -> Result<ChangeRequest, StoreError> {
        let resource_type: String = row.try_get("resource_type")?;
        let provider: String = row.try_get("provider")?;
        let action: String = row.try_get("action")?;
        let initiator_type: String = row.try_get("initiator_type")?;
        let status: String = row.try_get("status")?;
        let factors: Value = row.try_get("risk_factors")?;
        let score = row.try_get::<i64, _>("risk_score")? as u32;
        Ok(ChangeRequest {
            id: row.try_get("id")?,
            target_resource_id: row.try_get("target_id")?,
            resource_type: Self::parse_enum(&resource_type, ResourceType::from_str, "resource type")?,
            provider: Self::parse_enum(&provider, Provider::from_str, "provider")?,
            action: Self::parse_enum(&action, crate::types::ChangeAction::from_str, "action")?,
            initiator: row.try_get("initiator")?,
            initiator_type: InitiatorType::from_str(&initiator_type).unwrap_or_default(),
            description: row.try_get("description")?,
            risk: Risk {
                score,
                level: RiskLevel::from_score(score),
                factors: serde_json::from_value(factors)?,
            },
            status: Self::parse_enum(&status, RequestStatus::from_str, "status")?,
            created_at: row.try_get("created_at")?,
            approved_by: row.try_get("approved_by")?,
            rejection_reason: row.try_get("rejection_reason")?,
            executed_at: row.try_get("executed_at")?,
        })
    }
}
