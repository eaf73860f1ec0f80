//! Abstract syntax tree for IQL.

use serde::{Deserialize, Serialize};

/// A parsed query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Query {
    /// `FIND ...`
    Find {
        /// What to enumerate.
        source: FindSource,
        /// Traversal depth override (`DEPTH n`).
        depth: Option<u32>,
        /// `WHERE` predicate.
        filter: Option<Expr>,
        /// `LIMIT n`.
        limit: Option<usize>,
    },
    /// `SUMMARIZE metric BY field`
    Summarize {
        /// Metric identifier (informational; groups always carry count and
        /// total cost).
        metric: String,
        /// Dotted grouping field.
        by: FieldPath,
        /// `WHERE` predicate.
        filter: Option<Expr>,
    },
}

/// Subject of a `FIND`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FindSource {
    /// All resources.
    Resources,
    /// Downstream traversal from a node id.
    Downstream(String),
    /// Upstream traversal from a node id.
    Upstream(String),
    /// Shortest path between two node ids.
    Path {
        /// Start node id.
        from: String,
        /// End node id.
        to: String,
    },
}

/// Boolean predicate tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Either side holds.
    Or(Box<Expr>, Box<Expr>),
    /// Both sides hold.
    And(Box<Expr>, Box<Expr>),
    /// Negation.
    Not(Box<Expr>),
    /// `field op value`.
    Compare {
        /// Dotted field path.
        field: FieldPath,
        /// Comparison operator.
        op: CompareOp,
        /// Right-hand literal.
        value: Literal,
    },
    /// Built-in function call.
    Call {
        /// Which function.
        func: Func,
        /// Literal arguments.
        args: Vec<Literal>,
    },
}

/// Dotted field path, e.g. `tag.env`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldPath(pub Vec<String>);

impl FieldPath {
    /// First segment, lowercased.
    pub fn head(&self) -> String {
        self.0.first().map(|s| s.to_lowercase()).unwrap_or_default()
    }

    /// Segments after the first.
    pub fn rest(&self) -> &[String] {
        self.0.get(1..).unwrap_or_default()
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `!=`
    Neq,
    /// `>`
    Gt,
    /// `<`
    Lt,
    /// `>=`
    Gte,
    /// `<=`
    Lte,
    /// SQL-style pattern with `%` and `_` wildcards.
    Like,
    /// Membership in a list literal.
    In,
    /// Regular-expression match.
    Matches,
}

/// Literal value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    /// String.
    Str(String),
    /// Number.
    Number(f64),
    /// Boolean.
    Bool(bool),
    /// List of literals.
    List(Vec<Literal>),
}

/// Built-in predicate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Func {
    /// `tagged(key)` or `tagged(key, value)`.
    Tagged,
    /// `drifted_since(epoch_ms)`.
    DriftedSince,
    /// `has_edge()` or `has_edge(relationship-type)`.
    HasEdge,
    /// `created_after(epoch_ms)`.
    CreatedAfter,
    /// `created_before(epoch_ms)`.
    CreatedBefore,
}

impl Func {
    /// Resolve a function name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "tagged" => Some(Self::Tagged),
            "drifted_since" => Some(Self::DriftedSince),
            "has_edge" => Some(Self::HasEdge),
            "created_after" => Some(Self::CreatedAfter),
            "created_before" => Some(Self::CreatedBefore),
            _ => None,
        }
    }
}
