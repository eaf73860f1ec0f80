//! Drift detection: observed cloud state vs recorded graph state.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{EngineError, GraphEngine};
use crate::store::GraphStore;
use crate::types::{Change, ChangeType, DetectedVia, Node, NodeFilter, Provider};

/// Fields whose drift is always critical.
pub const CRITICAL_FIELDS: &[&str] = &[
    "encryption",
    "publicAccess",
    "publiclyAccessible",
    "deletionProtection",
];

/// How bad a drifted property is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Cosmetic or informational.
    Low,
    /// Needs attention.
    Medium,
    /// Security- or durability-relevant.
    High,
    /// Immediate action required.
    Critical,
}

impl Severity {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One drifted property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDelta {
    /// Dotted path into the property document.
    pub path: String,
    /// Recorded (expected) value.
    pub expected: Value,
    /// Observed (actual) value.
    pub actual: Value,
    /// Severity from the critical-field table.
    pub severity: Severity,
}

/// A node whose observed properties differ from the recorded ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftedNode {
    /// The node as recorded.
    pub node: Node,
    /// The drifted properties.
    pub changes: Vec<PropertyDelta>,
}

/// Outcome of one drift-detection pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriftReport {
    /// Nodes with property drift.
    pub drifted_nodes: Vec<DriftedNode>,
    /// Nodes the provider no longer reports (describe returned null).
    pub disappeared_nodes: Vec<Node>,
}

/// Severity for one drifted path: the leaf segment decides.
pub fn severity_for_path(path: &str) -> Severity {
    let leaf = path.rsplit('.').next().unwrap_or(path);
    if CRITICAL_FIELDS
        .iter()
        .any(|f| f.eq_ignore_ascii_case(leaf))
    {
        Severity::Critical
    } else {
        Severity::Medium
    }
}

/// Deep-compare two property documents, producing one delta per leaf that
/// differs. Arrays compare wholesale.
pub fn json_diff(expected: &Value, actual: &Value) -> Vec<PropertyDelta> {
    let mut out = Vec::new();
    diff_inner("", expected, actual, &mut out);
    out.sort_by(|a, b| a.path.cmp(&b.path));
    out
}

fn diff_inner(prefix: &str, expected: &Value, actual: &Value, out: &mut Vec<PropertyDelta>) {
    match (expected, actual) {
        (Value::Object(expected_map), Value::Object(actual_map)) => {
            for (key, expected_value) in expected_map {
                let path = join_path(prefix, key);
                match actual_map.get(key) {
                    Some(actual_value) => {
                        diff_inner(&path, expected_value, actual_value, out)
                    }
                    None => push_delta(out, path, expected_value.clone(), Value::Null),
                }
            }
            for (key, actual_value) in actual_map {
                if !expected_map.contains_key(key) {
                    let path = join_path(prefix, key);
                    push_delta(out, path, Value::Null, actual_value.clone());
                }
            }
        }
        (expected, actual) if expected != actual => {
            push_delta(
                out,
                prefix.to_string(),
                expected.clone(),
                actual.clone(),
            );
        }
        _ => {}
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn push_delta(out: &mut Vec<PropertyDelta>, path: String, expected: Value, actual: Value) {
    let severity = severity_for_path(&path);
    out.push(PropertyDelta {
        path,
        expected,
        actual,
        severity,
    });
}

impl<S: GraphStore + 'static> GraphEngine<S> {
    /// Compare every known node (optionally one provider's) against what
    /// its adapter currently describes.
    ///
    /// Drifted nodes get a `node-drifted` change appended; nodes whose
    /// describe returns null are reported as disappeared (deletion stays
    /// with the sync loop's two-miss rule). Per-node describe failures are
    /// logged and skipped.
    pub async fn detect_drift(
        &self,
        provider: Option<Provider>,
    ) -> Result<DriftReport, EngineError> {
        let filter = match provider {
            Some(p) => NodeFilter::provider(p),
            None => NodeFilter::default(),
        };
        let nodes = self.store().query_nodes(&filter).await?;
        let mut report = DriftReport::default();

        for node in nodes {
            let adapter = match self.adapter_for(node.provider) {
                Some(adapter) => adapter,
                None => continue,
            };
            let described = match adapter.describe(&node.native_id, node.resource_type).await {
                Ok(described) => described,
                Err(err) => {
                    tracing::warn!(node = %node.id, error = %err, "describe failed during drift scan");
                    continue;
                }
            };

            match described {
                None => report.disappeared_nodes.push(node),
                Some(actual) => {
                    let deltas = json_diff(&node.metadata, &actual);
                    if deltas.is_empty() {
                        continue;
                    }
                    let change = Change::new(
                        node.id.as_str(),
                        ChangeType::NodeDrifted,
                        DetectedVia::Sync,
                        self.clock.now_ms(),
                    )
                    .with_metadata(serde_json::json!({
                        "driftedPaths": deltas.iter().map(|d| d.path.clone()).collect::<Vec<_>>(),
                        "maxSeverity": deltas.iter().map(|d| d.severity).max(),
                    }));
                    self.store().append_changes(std::slice::from_ref(&change)).await?;
                    report.drifted_nodes.push(DriftedNode {
                        node,
                        changes: deltas,
                    });
                }
            }
        }

        tracing::info!(
            drifted = report.drifted_nodes.len(),
            disappeared = report.disappeared_nodes.len(),
            "drift scan finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_diff_flags_changed_leaf() {
        let expected = json!({"instanceType": "m5.large", "publiclyAccessible": false});
        let actual = json!({"instanceType": "m5.large", "publiclyAccessible": true});

        let deltas = json_diff(&expected, &actual);
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].path, "publiclyAccessible");
        assert_eq!(deltas[0].severity, Severity::Critical);
    }

    #[test]
    fn test_diff_nested_paths() {
        let expected = json!({"storage": {"encryption": {"enabled": true}, "sizeGb": 100}});
        let actual = json!({"storage": {"encryption": {"enabled": true}, "sizeGb": 200}});

        let deltas = json_diff(&expected, &actual);
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].path, "storage.sizeGb");
        assert_eq!(deltas[0].severity, Severity::Medium);
    }

    #[test]
    fn test_diff_reports_missing_and_extra_keys() {
        let expected = json!({"a": 1, "b": 2});
        let actual = json!({"b": 2, "c": 3});

        let deltas = json_diff(&expected, &actual);
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].path, "a");
        assert_eq!(deltas[0].actual, Value::Null);
        assert_eq!(deltas[1].path, "c");
        assert_eq!(deltas[1].expected, Value::Null);
    }

    #[test]
    fn test_critical_leaf_in_nested_path() {
        assert_eq!(severity_for_path("config.encryption"), Severity::Critical);
        assert_eq!(severity_for_path("deletionProtection"), Severity::Critical);
        assert_eq!(severity_for_path("config.sizeGb"), Severity::Medium);
    }

    #[test]
    fn test_identical_documents_have_no_deltas() {
        let doc = json!({"a": {"b": [1, 2, 3]}});
        assert!(json_diff(&doc, &doc).is_empty());
    }
}
