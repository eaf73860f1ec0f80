//! IQL: a small declarative query language over the graph.
//!
//! Text in, structured result out. `FIND` enumerates or traverses nodes,
//! `SUMMARIZE` groups them; predicates cover fields, tags, and a handful
//! of built-in functions. Syntax errors carry the byte offset of the
//! offending token.

pub mod ast;
pub mod exec;
pub mod lexer;
pub mod parser;

use crate::store::StoreError;

pub use ast::{CompareOp, Expr, FieldPath, FindSource, Func, Literal, Query};
pub use exec::{IqlExecutor, QueryResult, SummaryGroup};
pub use parser::parse;

/// Example queries surfaced alongside syntax errors.
pub const EXAMPLE_QUERIES: &[&str] = &[
    "FIND resources WHERE type = 'database' AND tag.env = 'prod' LIMIT 5",
    "FIND resources WHERE cost > 100 AND status = 'running'",
    "FIND DOWNSTREAM OF 'aws::us-east-1:database:orders-db' DEPTH 2",
    "FIND UPSTREAM OF 'aws::us-east-1:compute:i-0abc' WHERE type = 'load-balancer'",
    "FIND PATH FROM 'aws::us-east-1:compute:i-0abc' TO 'aws::us-east-1:storage:assets'",
    "FIND resources WHERE tagged('team') AND NOT tagged('env', 'dev')",
    "SUMMARIZE cost BY provider",
    "SUMMARIZE resources BY tag.env WHERE type = 'compute'",
];

/// Error type for IQL parsing and execution.
#[derive(Debug, thiserror::Error)]
pub enum IqlError {
    /// The query text does not match the grammar.
    #[error("syntax error at offset {offset}: {message}")]
    Syntax {
        /// What went wrong.
        message: String,
        /// Byte offset of the offending token.
        offset: usize,
    },
    /// The query parsed but cannot be evaluated.
    #[error("execution error: {0}")]
    Execution(String),
    /// Underlying store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl IqlError {
    pub(crate) fn syntax(message: impl Into<String>, offset: usize) -> Self {
        Self::Syntax {
            message: message.into(),
            offset,
        }
    }
}
