//! Thing activities - uniquely keyed creation, idempotent deletion, patching

use serde_json::{Map, Value};
use tracing::{debug, info};

use super::error::ThingError;
use crate::kernel::{BaseThingStore, DeleteOutcome, Filter, RemoteError};

/// Input for [`create_unique_thing`].
#[derive(Debug, Clone)]
pub struct CreateThingRequest {
    pub namespace: String,
    /// Attribute whose value must be unique across all things
    pub unique_key: String,
    /// Full thing body; must contain `attributes[unique_key]`
    pub payload: Value,
}

impl CreateThingRequest {
    fn unique_value(&self) -> Result<&Value, ThingError> {
        let attributes = self
            .payload
            .get("attributes")
            .and_then(Value::as_object)
            .ok_or(ThingError::MissingAttributes)?;
        attributes
            .get(&self.unique_key)
            .ok_or_else(|| ThingError::MissingUniqueKey(self.unique_key.clone()))
    }
}

/// Create a thing unless one with the same unique attribute value exists.
///
/// The platform does not enforce uniqueness for attributes, so this searches
/// first. A conflict from the create call itself (another writer won the race)
/// is reported the same way as a pre-check hit.
pub async fn create_unique_thing(
    request: &CreateThingRequest,
    store: &dyn BaseThingStore,
) -> Result<String, ThingError> {
    let value = request.unique_value()?;
    let rendered = render_value(value);

    let filter = Filter::eq(format!("attributes.{}", request.unique_key), value.clone());
    let existing = store.search(&filter).await?;
    if let Some(thing) = existing.into_iter().next() {
        info!(
            key = %request.unique_key,
            value = %rendered,
            thing_id = %thing.thing_id,
            "thing already exists"
        );
        return Err(ThingError::AlreadyExists {
            key: request.unique_key.clone(),
            value: rendered,
            thing_id: Some(thing.thing_id),
        });
    }

    match store.create(&request.namespace, &request.payload).await {
        Ok(thing_id) => {
            info!(thing_id = %thing_id, key = %request.unique_key, value = %rendered, "thing created");
            Ok(thing_id)
        }
        Err(RemoteError::Conflict(message)) => {
            info!(key = %request.unique_key, value = %rendered, %message, "create refused as duplicate");
            Err(ThingError::AlreadyExists {
                key: request.unique_key.clone(),
                value: rendered,
                thing_id: None,
            })
        }
        Err(err) => Err(err.into()),
    }
}

/// Delete a thing. A thing that is already gone counts as deleted.
pub async fn delete_thing(
    thing_id: &str,
    store: &dyn BaseThingStore,
) -> Result<DeleteOutcome, ThingError> {
    let outcome = store.delete(thing_id).await?;
    match outcome {
        DeleteOutcome::Deleted => info!(thing_id = %thing_id, "thing deleted"),
        DeleteOutcome::NotFound => debug!(thing_id = %thing_id, "thing already absent"),
    }
    Ok(outcome)
}

/// Merge `attributes` into the thing's existing attributes.
pub async fn patch_thing_attributes(
    thing_id: &str,
    attributes: &Map<String, Value>,
    store: &dyn BaseThingStore,
) -> Result<(), ThingError> {
    store.patch_attributes(thing_id, attributes).await?;
    debug!(thing_id = %thing_id, keys = attributes.len(), "attributes patched");
    Ok(())
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::test_dependencies::{InMemoryThingStore, StoreCall, StoreOp};
    use serde_json::json;

    fn site_request(name: &str) -> CreateThingRequest {
        CreateThingRequest {
            namespace: "gateway".to_string(),
            unique_key: "siteName".to_string(),
            payload: json!({ "attributes": { "siteName": name, "siteDescription": "" } }),
        }
    }

    #[tokio::test]
    async fn creates_when_no_match_exists() {
        let store = InMemoryThingStore::new();
        let thing_id = create_unique_thing(&site_request("site1"), &store).await.unwrap();

        assert!(thing_id.starts_with("gateway:"));
        assert_eq!(store.things_with("siteName", "site1").len(), 1);
        assert_eq!(
            store.calls()[0],
            StoreCall::Search(r#"eq(attributes/siteName,"site1")"#.to_string())
        );
    }

    #[tokio::test]
    async fn second_create_with_same_key_is_refused() {
        let store = InMemoryThingStore::new();
        let first = create_unique_thing(&site_request("site1"), &store).await.unwrap();
        let err = create_unique_thing(&site_request("site1"), &store).await.unwrap_err();

        assert_eq!(
            err,
            ThingError::AlreadyExists {
                key: "siteName".into(),
                value: "site1".into(),
                thing_id: Some(first),
            }
        );
        assert_eq!(store.count(StoreOp::Create), 1);
        assert_eq!(store.things().len(), 1);
    }

    #[tokio::test]
    async fn remote_conflict_counts_as_already_exists() {
        let store = InMemoryThingStore::new()
            .enforcing_unique("siteName")
            .with_unindexed_thing("gateway:racer", json!({ "siteName": "site1" }));

        let err = create_unique_thing(&site_request("site1"), &store).await.unwrap_err();
        assert!(matches!(err, ThingError::AlreadyExists { thing_id: None, .. }));
        assert!(saga::StepError::from(err).is_already_exists());
    }

    #[tokio::test]
    async fn missing_unique_key_is_a_validation_error() {
        let store = InMemoryThingStore::new();
        let mut request = site_request("site1");
        request.unique_key = "serial".into();

        let err = create_unique_thing(&request, &store).await.unwrap_err();
        assert_eq!(err, ThingError::MissingUniqueKey("serial".into()));
        assert!(store.calls().is_empty());

        request.payload = json!({ "features": {} });
        let err = create_unique_thing(&request, &store).await.unwrap_err();
        assert_eq!(err, ThingError::MissingAttributes);
    }

    #[tokio::test]
    async fn transient_search_failure_stays_retryable() {
        let store = InMemoryThingStore::new();
        store.fail_next(StoreOp::Search, RemoteError::Unavailable("503".into()));

        let err = create_unique_thing(&site_request("site1"), &store).await.unwrap_err();
        assert!(saga::StepError::from(err).is_retryable());
        assert_eq!(store.count(StoreOp::Create), 0);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = InMemoryThingStore::new().with_thing("gateway:a", json!({ "siteName": "a" }));

        assert_eq!(delete_thing("gateway:a", &store).await.unwrap(), DeleteOutcome::Deleted);
        assert_eq!(delete_thing("gateway:a", &store).await.unwrap(), DeleteOutcome::NotFound);
        assert!(!store.contains("gateway:a"));
    }

    #[tokio::test]
    async fn patch_merges_attributes() {
        let store = InMemoryThingStore::new().with_thing("org.example:dev1", json!({ "type": "sensor" }));
        let attributes = json!({ "interval": 30 }).as_object().cloned().unwrap();

        patch_thing_attributes("org.example:dev1", &attributes, &store).await.unwrap();
        let thing = store.thing("org.example:dev1").unwrap();
        assert_eq!(thing.attributes["type"], json!("sensor"));
        assert_eq!(thing.attributes["interval"], json!(30));
    }
}
