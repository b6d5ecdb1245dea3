//! The wire message exchanged over the socket transport.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One JSON object on the wire.
///
/// Requests carry a correlation `id`; responses echo it. Event pushes carry a
/// `type` and no pending id. All other fields are kept in `payload` and
/// flattened next to `id` and `type` when encoded.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Message {
    /// Correlation id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Message discriminator (request kind or event name).
    #[serde(rename = "type", default)]
    pub kind: String,

    /// Remaining fields.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Message {
    /// Create a message of the given kind with an empty payload.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            id: None,
            kind: kind.into(),
            payload: Map::new(),
        }
    }

    /// Build a message from a JSON payload.
    ///
    /// The payload must be an object or null. Its own `id` and `type` keys
    /// are discarded so they cannot shadow the envelope.
    pub fn with_payload(kind: impl Into<String>, payload: Value) -> Option<Self> {
        let mut payload = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => return None,
        };
        payload.remove("id");
        payload.remove("type");
        Some(Self {
            id: None,
            kind: kind.into(),
            payload,
        })
    }

    /// Set the correlation id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Insert a payload field.
    pub fn insert(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Get a payload field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Parse one line of wire text.
    pub fn decode(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }

    /// Encode as one line of wire text.
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// The whole message as a JSON object, envelope included.
    pub fn to_value(&self) -> Value {
        let mut map = self.payload.clone();
        if let Some(id) = &self.id {
            map.insert("id".into(), Value::String(id.clone()));
        }
        map.insert("type".into(), Value::String(self.kind.clone()));
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_is_flattened() {
        let msg = Message::with_payload("exec", json!({ "path": "a.sh", "id": "spoofed" }))
            .unwrap()
            .with_id("abc");
        let line = msg.encode().unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();

        assert_eq!(value["id"], "abc");
        assert_eq!(value["type"], "exec");
        assert_eq!(value["path"], "a.sh");
    }

    #[test]
    fn test_non_object_payload_rejected() {
        assert!(Message::with_payload("exec", json!([1, 2])).is_none());
        assert!(Message::with_payload("exec", Value::Null).is_some());
    }

    #[test]
    fn test_decode_without_type() {
        let msg = Message::decode(r#"{"id":"x","ok":true}"#).unwrap();
        assert_eq!(msg.id.as_deref(), Some("x"));
        assert_eq!(msg.kind, "");
        assert_eq!(msg.get("ok"), Some(&json!(true)));
    }
}
