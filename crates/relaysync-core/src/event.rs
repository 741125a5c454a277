//! Wire records exchanged through the shared folder.

use std::collections::BTreeMap;
use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of mutation carried by a [`SyncEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncAction {
    Save,
    Delete,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::Save => "SAVE",
            SyncAction::Delete => "DELETE",
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One incremental change, as stored in an event file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    pub origin_node_id: String,
    pub entity_type: String,
    pub action: SyncAction,
    /// Entity payload, string-encoded JSON.
    pub content_json: String,
    /// Producer wall clock in epoch milliseconds. Not used for ordering.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl SyncEvent {
    pub fn new(
        origin_node_id: impl Into<String>,
        entity_type: impl Into<String>,
        action: SyncAction,
        payload: &Value,
    ) -> serde_json::Result<Self> {
        Ok(Self {
            origin_node_id: origin_node_id.into(),
            entity_type: entity_type.into(),
            action,
            content_json: serde_json::to_string(payload)?,
            timestamp: Some(Utc::now().timestamp_millis()),
        })
    }

    /// Decode the string-encoded payload.
    pub fn payload(&self) -> serde_json::Result<Value> {
        serde_json::from_str(&self.content_json)
    }
}

/// Full dump of one node: entity type name to that type's records.
pub type Snapshot = BTreeMap<String, Vec<Value>>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_field_names_are_camel_case() {
        let event = SyncEvent::new(
            "NODE_A",
            "Proveedor",
            SyncAction::Save,
            &json!({"nombre": "Acme", "cuit": "123"}),
        )
        .expect("event");

        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(value["originNodeId"], "NODE_A");
        assert_eq!(value["entityType"], "Proveedor");
        assert_eq!(value["action"], "SAVE");
        assert!(value["contentJson"].is_string());
        assert!(value["timestamp"].is_i64());
    }

    #[test]
    fn parses_event_written_by_peer() {
        let raw = r#"{
            "originNodeId": "NODE_7F3A21BC",
            "entityType": "TipoProducto",
            "action": "DELETE",
            "contentJson": "{\"id\":4,\"nombre\":\"Cables\"}",
            "timestamp": 1735732800000
        }"#;

        let event: SyncEvent = serde_json::from_str(raw).expect("parse");
        assert_eq!(event.action, SyncAction::Delete);
        assert_eq!(event.payload().expect("payload")["nombre"], "Cables");
    }

    #[test]
    fn unknown_action_is_rejected() {
        let raw = r#"{"originNodeId":"A","entityType":"Dolar","action":"UPSERT","contentJson":"{}"}"#;
        assert!(serde_json::from_str::<SyncEvent>(raw).is_err());
    }
}
