use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Header carrying the per-send correlation identifier.
pub const CORRELATION_ID_HEADER: &str = "correlation-id";

/// One command on the protocol channel.
///
/// `topic` may still contain the `<namespace>` and `<name>` placeholders
/// until it is prepared for a concrete thing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolMessage {
    pub topic: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub headers: Map<String, Value>,
}

impl ProtocolMessage {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            path: String::new(),
            value: Value::Null,
            headers: Map::new(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = value;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.headers.get(CORRELATION_ID_HEADER)?.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_fields_are_omitted_on_the_wire() {
        let message = ProtocolMessage::new("org.example/dev1/things/twin/commands/delete");
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({ "topic": "org.example/dev1/things/twin/commands/delete" })
        );
    }

    #[test]
    fn parses_minimal_request_body() {
        let message: ProtocolMessage = serde_json::from_value(json!({
            "topic": "<namespace>/<name>/things/twin/commands/modify",
            "path": "/attributes/location",
            "value": "hall-2"
        }))
        .unwrap();
        assert_eq!(message.path, "/attributes/location");
        assert_eq!(message.value, json!("hall-2"));
        assert!(message.headers.is_empty());
        assert_eq!(message.correlation_id(), None);
    }
}
