//! Cloud audit events ingested by the monitor loop.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::change::ChangeType;
use super::node::{Provider, ResourceType};

/// One event from a provider audit log or push webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudEvent {
    /// Provider-assigned event id.
    pub id: String,
    /// Provider the event came from.
    pub provider: Provider,
    /// Provider-native event name (e.g. `RunInstances`).
    pub event_type: String,
    /// Node id the event is about, when resolvable.
    pub resource_id: Option<String>,
    /// Resource kind, when resolvable.
    pub resource_type: Option<ResourceType>,
    /// Acting principal, when recorded.
    pub actor: Option<String>,
    /// Epoch-millisecond event timestamp.
    pub timestamp: i64,
    /// True for read-only API calls; these are never converted to changes.
    pub read_only: bool,
    /// Whether the underlying call succeeded.
    pub success: bool,
    /// Raw provider payload.
    pub raw: Value,
}

impl CloudEvent {
    /// Map the provider event name onto a graph change type.
    ///
    /// Substring rules: create/run/launch ⇒ node-created,
    /// delete/terminate/remove ⇒ node-deleted, anything else ⇒ node-updated.
    pub fn change_type(&self) -> ChangeType {
        let lowered = self.event_type.to_lowercase();
        if ["create", "run", "launch"].iter().any(|k| lowered.contains(k)) {
            ChangeType::NodeCreated
        } else if ["delete", "terminate", "remove"]
            .iter()
            .any(|k| lowered.contains(k))
        {
            ChangeType::NodeDeleted
        } else {
            ChangeType::NodeUpdated
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_type: &str) -> CloudEvent {
        CloudEvent {
            id: "e1".into(),
            provider: Provider::Aws,
            event_type: event_type.into(),
            resource_id: Some("aws::us-east-1:compute:i-abc".into()),
            resource_type: Some(ResourceType::Compute),
            actor: Some("alice".into()),
            timestamp: 1_000,
            read_only: false,
            success: true,
            raw: Value::Null,
        }
    }

    #[test]
    fn test_event_type_mapping() {
        assert_eq!(event("RunInstances").change_type(), ChangeType::NodeCreated);
        assert_eq!(event("CreateBucket").change_type(), ChangeType::NodeCreated);
        assert_eq!(event("LaunchTemplate").change_type(), ChangeType::NodeCreated);
        assert_eq!(
            event("TerminateInstances").change_type(),
            ChangeType::NodeDeleted
        );
        assert_eq!(event("DeleteDBInstance").change_type(), ChangeType::NodeDeleted);
        assert_eq!(event("RemoveTags").change_type(), ChangeType::NodeDeleted);
        assert_eq!(
            event("ModifyDBInstance").change_type(),
            ChangeType::NodeUpdated
        );
    }
}
