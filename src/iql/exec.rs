//! IQL execution against a graph store.
//!
//! Store-backed predicates (`drifted_since`, `has_edge`) are resolved to
//! node-id sets up front, so per-node evaluation stays synchronous and a
//! predicate tree never issues per-row queries.

use std::collections::{BTreeSet, HashMap};
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ast::{CompareOp, Expr, FieldPath, FindSource, Func, Literal, Query};
use super::{parse, IqlError};
use crate::store::GraphStore;
use crate::types::{
    ChangeFilter, ChangeType, Direction, EdgeFilter, Node, NodeFilter, NodeId, PageRequest,
    RelationshipType,
};

/// Default traversal depth for DOWNSTREAM / UPSTREAM queries.
pub const DEFAULT_TRAVERSAL_DEPTH: u32 = 3;

/// Parsed-query cache capacity.
const PARSE_CACHE_CAPACITY: usize = 256;

/// One SUMMARIZE bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryGroup {
    /// Grouping key value.
    pub key: String,
    /// Nodes in the bucket.
    pub count: u64,
    /// Sum of known monthly costs in the bucket.
    pub total_cost: f64,
}

/// Structured query result, discriminated on `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum QueryResult {
    /// Node list from FIND resources / DOWNSTREAM / UPSTREAM.
    Find {
        /// Matching nodes.
        nodes: Vec<Node>,
    },
    /// Grouped aggregation from SUMMARIZE.
    Summarize {
        /// Buckets, largest first.
        groups: Vec<SummaryGroup>,
    },
    /// Shortest path from FIND PATH; empty when unreachable.
    Path {
        /// Path nodes in order, endpoints included.
        nodes: Vec<Node>,
    },
}

/// Executes IQL text against a [`GraphStore`].
pub struct IqlExecutor<S: GraphStore> {
    store: Arc<S>,
    cache: Mutex<LruCache<String, Query>>,
}

impl<S: GraphStore> IqlExecutor<S> {
    /// Create an executor over a store.
    pub fn new(store: Arc<S>) -> Self {
        let capacity =
            NonZeroUsize::new(PARSE_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Parse (with caching) and execute a query.
    pub async fn run(&self, text: &str) -> Result<QueryResult, IqlError> {
        let query = {
            let mut cache = self.cache.lock();
            match cache.get(text) {
                Some(parsed) => parsed.clone(),
                None => {
                    let parsed = parse(text)?;
                    cache.put(text.to_string(), parsed.clone());
                    parsed
                }
            }
        };
        self.execute(&query).await
    }

    /// Execute an already-parsed query.
    pub async fn execute(&self, query: &Query) -> Result<QueryResult, IqlError> {
        match query {
            Query::Find { source, depth, filter, limit } => {
                self.execute_find(source, *depth, filter.as_ref(), *limit).await
            }
            Query::Summarize { by, filter, .. } => {
                self.execute_summarize(by, filter.as_ref()).await
            }
        }
    }

    async fn execute_find(
        &self,
        source: &FindSource,
        depth: Option<u32>,
        filter: Option<&Expr>,
        limit: Option<usize>,
    ) -> Result<QueryResult, IqlError> {
        let resolved = match filter {
            Some(expr) => self.resolve_calls(expr).await?,
            None => ResolvedCalls::default(),
        };

        let mut nodes = match source {
            FindSource::Resources => self.store.query_nodes(&NodeFilter::default()).await?,
            FindSource::Downstream(id) => {
                self.store
                    .get_neighbors(
                        &NodeId::from_raw(id.clone()),
                        depth.unwrap_or(DEFAULT_TRAVERSAL_DEPTH),
                        Direction::Downstream,
                    )
                    .await?
                    .nodes
            }
            FindSource::Upstream(id) => {
                self.store
                    .get_neighbors(
                        &NodeId::from_raw(id.clone()),
                        depth.unwrap_or(DEFAULT_TRAVERSAL_DEPTH),
                        Direction::Upstream,
                    )
                    .await?
                    .nodes
            }
            FindSource::Path { from, to } => {
                let path = self
                    .store
                    .find_path(
                        &NodeId::from_raw(from.clone()),
                        &NodeId::from_raw(to.clone()),
                        depth.unwrap_or(u32::MAX),
                    )
                    .await?;
                return Ok(QueryResult::Path { nodes: path });
            }
        };

        if let Some(expr) = filter {
            let mut kept = Vec::with_capacity(nodes.len());
            for node in nodes {
                if eval_expr(&node, expr, &resolved)? {
                    kept.push(node);
                }
            }
            nodes = kept;
        }
        if let Some(limit) = limit {
            nodes.truncate(limit);
        }

        Ok(QueryResult::Find { nodes })
    }

    async fn execute_summarize(
        &self,
        by: &FieldPath,
        filter: Option<&Expr>,
    ) -> Result<QueryResult, IqlError> {
        let resolved = match filter {
            Some(expr) => self.resolve_calls(expr).await?,
            None => ResolvedCalls::default(),
        };

        let nodes = self.store.query_nodes(&NodeFilter::default()).await?;
        let mut groups: HashMap<String, SummaryGroup> = HashMap::new();

        for node in nodes {
            if let Some(expr) = filter {
                if !eval_expr(&node, expr, &resolved)? {
                    continue;
                }
            }
            let key = match field_value(&node, by)? {
                Value::Null => "unknown".to_string(),
                Value::String(s) => s,
                other => other.to_string(),
            };
            let entry = groups.entry(key.clone()).or_insert(SummaryGroup {
                key,
                count: 0,
                total_cost: 0.0,
            });
            entry.count += 1;
            entry.total_cost += node.cost_monthly.unwrap_or(0.0);
        }

        let mut groups: Vec<SummaryGroup> = groups.into_values().collect();
        groups.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
        Ok(QueryResult::Summarize { groups })
    }

    /// Resolve store-backed function calls to node-id sets.
    async fn resolve_calls(&self, expr: &Expr) -> Result<ResolvedCalls, IqlError> {
        let mut calls = Vec::new();
        collect_calls(expr, &mut calls);

        let mut resolved = ResolvedCalls::default();
        for (func, args) in calls {
            let key = call_key(func, &args);
            if resolved.sets.contains_key(&key) {
                continue;
            }
            let set = match func {
                Func::DriftedSince => {
                    let since = numeric_arg(&args, 0, "drifted_since")? as i64;
                    self.store
                        .get_changes(&ChangeFilter {
                            change_type: Some(ChangeType::NodeDrifted),
                            since_ms: Some(since),
                            ..ChangeFilter::default()
                        })
                        .await?
                        .into_iter()
                        .map(|c| c.target_id)
                        .collect()
                }
                Func::HasEdge => {
                    let relationship = match args.first() {
                        Some(Literal::Str(name)) => {
                            Some(RelationshipType::from_str(name).ok_or_else(|| {
                                IqlError::Execution(format!(
                                    "unknown relationship type '{name}'"
                                ))
                            })?)
                        }
                        Some(_) => {
                            return Err(IqlError::Execution(
                                "has_edge expects a relationship-type string".into(),
                            ))
                        }
                        None => None,
                    };
                    self.incident_node_ids(relationship).await?
                }
                // Pure functions are evaluated per node.
                Func::Tagged | Func::CreatedAfter | Func::CreatedBefore => continue,
            };
            resolved.sets.insert(key, set);
        }
        Ok(resolved)
    }

    async fn incident_node_ids(
        &self,
        relationship: Option<RelationshipType>,
    ) -> Result<BTreeSet<String>, IqlError> {
        let filter = EdgeFilter {
            relationship_type: relationship,
            ..EdgeFilter::default()
        };
        let mut ids = BTreeSet::new();
        let mut page = PageRequest::with_limit(1000);
        loop {
            let result = self.store.query_edges_paginated(&filter, &page).await?;
            for edge in &result.items {
                ids.insert(edge.source_id.to_string());
                ids.insert(edge.target_id.to_string());
            }
            match result.next_cursor {
                Some(cursor) => {
                    page = PageRequest {
                        limit: Some(1000),
                        cursor: Some(cursor),
                    }
                }
                None => break,
            }
        }
        Ok(ids)
    }
}

#[derive(Debug, Default)]
struct ResolvedCalls {
    sets: HashMap<String, BTreeSet<String>>,
}

fn call_key(func: Func, args: &[Literal]) -> String {
    format!("{func:?}:{}", serde_json::json!(args))
}

fn collect_calls(expr: &Expr, out: &mut Vec<(Func, Vec<Literal>)>) {
    match expr {
        Expr::Or(left, right) | Expr::And(left, right) => {
            collect_calls(left, out);
            collect_calls(right, out);
        }
        Expr::Not(inner) => collect_calls(inner, out),
        Expr::Call { func, args } => out.push((*func, args.clone())),
        Expr::Compare { .. } => {}
    }
}

fn numeric_arg(args: &[Literal], index: usize, func: &str) -> Result<f64, IqlError> {
    match args.get(index) {
        Some(Literal::Number(n)) => Ok(*n),
        _ => Err(IqlError::Execution(format!(
            "{func} expects a numeric argument"
        ))),
    }
}

fn eval_expr(node: &Node, expr: &Expr, resolved: &ResolvedCalls) -> Result<bool, IqlError> {
    match expr {
        Expr::Or(left, right) => {
            Ok(eval_expr(node, left, resolved)? || eval_expr(node, right, resolved)?)
        }
        Expr::And(left, right) => {
            Ok(eval_expr(node, left, resolved)? && eval_expr(node, right, resolved)?)
        }
        Expr::Not(inner) => Ok(!eval_expr(node, inner, resolved)?),
        Expr::Compare { field, op, value } => {
            let actual = field_value(node, field)?;
            compare(&actual, *op, value)
        }
        Expr::Call { func, args } => match func {
            Func::Tagged => match args.as_slice() {
                [Literal::Str(key)] => Ok(node.tags.contains_key(key)),
                [Literal::Str(key), Literal::Str(value)] => {
                    Ok(node.tags.get(key) == Some(value))
                }
                _ => Err(IqlError::Execution(
                    "tagged expects (key) or (key, value) strings".into(),
                )),
            },
            Func::CreatedAfter => {
                Ok(node.created_at > numeric_arg(args, 0, "created_after")? as i64)
            }
            Func::CreatedBefore => {
                Ok(node.created_at < numeric_arg(args, 0, "created_before")? as i64)
            }
            Func::DriftedSince | Func::HasEdge => {
                let key = call_key(*func, args);
                Ok(resolved
                    .sets
                    .get(&key)
                    .is_some_and(|set| set.contains(node.id.as_str())))
            }
        },
    }
}

/// Resolve a dotted field path against a node.
fn field_value(node: &Node, path: &FieldPath) -> Result<Value, IqlError> {
    let value = match path.head().as_str() {
        "id" => Value::String(node.id.to_string()),
        "provider" => Value::String(node.provider.to_string()),
        "account" => Value::String(node.account.clone()),
        "region" => Value::String(node.region.clone()),
        "type" | "resourcetype" | "resource_type" => {
            Value::String(node.resource_type.to_string())
        }
        "nativeid" | "native_id" => Value::String(node.native_id.clone()),
        "name" => Value::String(node.name.clone()),
        "status" => Value::String(node.status.to_string()),
        "owner" => node
            .owner
            .clone()
            .map(Value::String)
            .unwrap_or(Value::Null),
        "cost" | "costmonthly" | "cost_monthly" => node
            .cost_monthly
            .map(|c| serde_json::json!(c))
            .unwrap_or(Value::Null),
        "createdat" | "created_at" => serde_json::json!(node.created_at),
        "lastsyncedat" | "last_synced_at" => serde_json::json!(node.last_synced_at),
        "tag" | "tags" => {
            let key = path
                .rest()
                .first()
                .ok_or_else(|| IqlError::Execution("tag.<key> requires a key".into()))?;
            node.tags
                .get(key)
                .cloned()
                .map(Value::String)
                .unwrap_or(Value::Null)
        }
        "metadata" => {
            let mut current = node.metadata.clone();
            for segment in path.rest() {
                current = current.get(segment).cloned().unwrap_or(Value::Null);
            }
            current
        }
        other => {
            return Err(IqlError::Execution(format!("unknown field '{other}'")));
        }
    };
    Ok(value)
}

fn compare(actual: &Value, op: CompareOp, literal: &Literal) -> Result<bool, IqlError> {
    match op {
        CompareOp::Eq => Ok(loose_eq(actual, literal)),
        CompareOp::Neq => Ok(!loose_eq(actual, literal)),
        CompareOp::Gt | CompareOp::Lt | CompareOp::Gte | CompareOp::Lte => {
            let (left, right) = match (as_number(actual), literal) {
                (Some(left), Literal::Number(right)) => (left, *right),
                _ => return Ok(false),
            };
            Ok(match op {
                CompareOp::Gt => left > right,
                CompareOp::Lt => left < right,
                CompareOp::Gte => left >= right,
                CompareOp::Lte => left <= right,
                _ => unreachable!(),
            })
        }
        CompareOp::Like => {
            let (text, pattern) = match (actual.as_str(), literal) {
                (Some(text), Literal::Str(pattern)) => (text, pattern),
                _ => return Ok(false),
            };
            let regex = like_to_regex(pattern)?;
            Ok(regex.is_match(text))
        }
        CompareOp::Matches => {
            let (text, pattern) = match (actual.as_str(), literal) {
                (Some(text), Literal::Str(pattern)) => (text, pattern),
                _ => return Ok(false),
            };
            let regex = Regex::new(pattern)
                .map_err(|e| IqlError::Execution(format!("bad regex: {e}")))?;
            Ok(regex.is_match(text))
        }
        CompareOp::In => match literal {
            Literal::List(items) => Ok(items.iter().any(|item| loose_eq(actual, item))),
            single => Ok(loose_eq(actual, single)),
        },
    }
}

fn loose_eq(actual: &Value, literal: &Literal) -> bool {
    match literal {
        Literal::Str(s) => actual.as_str() == Some(s.as_str()),
        Literal::Number(n) => as_number(actual) == Some(*n),
        Literal::Bool(b) => actual.as_bool() == Some(*b),
        Literal::List(_) => false,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

/// Translate a SQL-style LIKE pattern into an anchored regex.
fn like_to_regex(pattern: &str) -> Result<Regex, IqlError> {
    let mut regex = String::with_capacity(pattern.len() + 8);
    regex.push('^');
    for c in pattern.chars() {
        match c {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            c if "\\.+*?()|[]{}^$".contains(c) => {
                regex.push('\\');
                regex.push(c);
            }
            c => regex.push(c),
        }
    }
    regex.push('$');
    Regex::new(&regex).map_err(|e| IqlError::Execution(format!("bad LIKE pattern: {e}")))
}
