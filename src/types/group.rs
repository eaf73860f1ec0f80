//! Logical groupings of nodes.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::node::Provider;

/// Kind of grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupType {
    /// Network boundary.
    Vpc,
    /// Application service.
    Service,
    /// Device / VM fleet.
    Fleet,
    /// Deployment environment (prod, staging, ...).
    Environment,
    /// Anything else.
    Custom,
}

impl GroupType {
    /// Parse group type from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "vpc" => Some(Self::Vpc),
            "service" => Some(Self::Service),
            "fleet" => Some(Self::Fleet),
            "environment" => Some(Self::Environment),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }

    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vpc => "vpc",
            Self::Service => "service",
            Self::Fleet => "fleet",
            Self::Environment => "environment",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for GroupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A named grouping of nodes.
///
/// Groups reference nodes; deleting a node removes the membership row but
/// never the group itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    /// Unique id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Grouping kind.
    pub group_type: GroupType,
    /// Provider, when the grouping is provider-scoped.
    #[serde(default)]
    pub provider: Option<Provider>,
    /// Epoch-millisecond creation timestamp.
    pub created_at: i64,
    /// Epoch-millisecond last-update timestamp.
    pub updated_at: i64,
}

impl Group {
    /// Create a group.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        group_type: GroupType,
        now_ms: i64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            group_type,
            provider: None,
            created_at: now_ms,
            updated_at: now_ms,
        }
    }

    /// Scope the group to one provider.
    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.provider = Some(provider);
        self
    }
}
