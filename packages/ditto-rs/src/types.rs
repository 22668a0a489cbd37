use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A thing as returned by the things and search APIs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thing {
    #[serde(rename = "thingId")]
    pub thing_id: String,
    #[serde(rename = "policyId", default, skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<Value>,
}

/// One page of `GET /api/2/search/things`.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchPage {
    #[serde(default)]
    pub items: Vec<Thing>,
    /// Present while more results remain.
    #[serde(default)]
    pub cursor: Option<String>,
}

/// Body of a create response when acknowledgements were requested.
///
/// ```json
/// { "twin-persisted": { "status": 201, "payload": { "thingId": "gateway:abc" } },
///   "search-persisted": { "status": 204 } }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CreateAcks {
    #[serde(rename = "twin-persisted")]
    pub twin_persisted: Option<Ack>,
    #[serde(rename = "search-persisted")]
    pub search_persisted: Option<Ack>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Ack {
    pub status: Option<u16>,
    #[serde(default)]
    pub payload: Option<Value>,
}

impl Ack {
    pub fn is_success(&self) -> bool {
        matches!(self.status, Some(s) if (200..300).contains(&s))
    }

    pub fn thing_id(&self) -> Option<&str> {
        self.payload.as_ref()?.get("thingId")?.as_str()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ConnectionCreated {
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn thing_without_attributes_parses() {
        let thing: Thing = serde_json::from_value(json!({ "thingId": "org.example:dev1" })).unwrap();
        assert_eq!(thing.thing_id, "org.example:dev1");
        assert!(thing.attributes.is_empty());
    }

    #[test]
    fn ack_body_yields_thing_id() {
        let acks: CreateAcks = serde_json::from_value(json!({
            "twin-persisted": { "status": 201, "payload": { "thingId": "gateway:abc", "attributes": {} } },
            "search-persisted": { "status": 204 }
        }))
        .unwrap();
        let twin = acks.twin_persisted.unwrap();
        assert!(twin.is_success());
        assert_eq!(twin.thing_id(), Some("gateway:abc"));
        assert!(acks.search_persisted.unwrap().is_success());
    }
}
