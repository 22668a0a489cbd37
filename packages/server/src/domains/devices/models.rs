use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::domains::messaging::ProtocolMessage;
use crate::kernel::Thing;

/// A device thing matched by a configuration query. Never created locally.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub thing_id: String,
    pub attributes: Map<String, Value>,
}

impl From<Thing> for Device {
    fn from(thing: Thing) -> Self {
        Self {
            thing_id: thing.thing_id,
            attributes: thing.attributes,
        }
    }
}

/// What to apply to every matched device.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceConfig {
    /// Merged into the device's attributes
    Attributes(Map<String, Value>),
    /// Addressed to each device (`<namespace>/<name>` in the topic) and sent
    Message(ProtocolMessage),
}

impl DeviceConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            DeviceConfig::Attributes(_) => "attributes",
            DeviceConfig::Message(_) => "message",
        }
    }
}

/// Body of a device configuration request.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfigRequest {
    /// Search expression selecting the devices
    pub query: String,
    #[serde(default)]
    pub attributes: Option<Map<String, Value>>,
    #[serde(default)]
    pub message: Option<ProtocolMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceValidationError {
    #[error("query must not be empty")]
    EmptyQuery,

    #[error("exactly one of 'attributes' or 'message' is required")]
    AmbiguousConfig,

    #[error("attributes must not be empty")]
    EmptyAttributes,

    #[error("message topic must not be empty")]
    EmptyTopic,
}

impl DeviceConfigRequest {
    pub fn into_parts(self) -> Result<(String, DeviceConfig), DeviceValidationError> {
        let query = self.query.trim().to_string();
        if query.is_empty() {
            return Err(DeviceValidationError::EmptyQuery);
        }
        let config = match (self.attributes, self.message) {
            (Some(attributes), None) => {
                if attributes.is_empty() {
                    return Err(DeviceValidationError::EmptyAttributes);
                }
                DeviceConfig::Attributes(attributes)
            }
            (None, Some(message)) => {
                if message.topic.trim().is_empty() {
                    return Err(DeviceValidationError::EmptyTopic);
                }
                DeviceConfig::Message(message)
            }
            _ => return Err(DeviceValidationError::AmbiguousConfig),
        };
        Ok((query, config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(body: Value) -> DeviceConfigRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn attribute_request_is_accepted() {
        let (query, config) = request(json!({
            "query": "eq(attributes/type,\"sensor\")",
            "attributes": { "interval": 30 }
        }))
        .into_parts()
        .unwrap();
        assert_eq!(query, "eq(attributes/type,\"sensor\")");
        assert_eq!(config.kind(), "attributes");
    }

    #[test]
    fn message_request_is_accepted() {
        let (_, config) = request(json!({
            "query": "exists(attributes/type)",
            "message": { "topic": "<namespace>/<name>/things/live/messages/update", "path": "/inbox/messages/reboot" }
        }))
        .into_parts()
        .unwrap();
        assert!(matches!(config, DeviceConfig::Message(_)));
    }

    #[test]
    fn both_or_neither_is_rejected() {
        let neither = request(json!({ "query": "exists(attributes/type)" }));
        assert_eq!(neither.into_parts(), Err(DeviceValidationError::AmbiguousConfig));

        let both = request(json!({
            "query": "exists(attributes/type)",
            "attributes": { "a": 1 },
            "message": { "topic": "<namespace>/<name>/things/twin/commands/modify" }
        }));
        assert_eq!(both.into_parts(), Err(DeviceValidationError::AmbiguousConfig));
    }

    #[test]
    fn blank_query_is_rejected() {
        let blank = request(json!({ "query": "  ", "attributes": { "a": 1 } }));
        assert_eq!(blank.into_parts(), Err(DeviceValidationError::EmptyQuery));
    }

    #[test]
    fn empty_attributes_are_rejected() {
        let empty = request(json!({ "query": "exists(attributes/type)", "attributes": {} }));
        assert_eq!(empty.into_parts(), Err(DeviceValidationError::EmptyAttributes));
    }
}
