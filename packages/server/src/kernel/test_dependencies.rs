// TestDependencies - in-memory implementations for testing
//
// Provides doubles for every remote trait that can be injected into ServerDeps
// for tests. Each double records its calls and can be scripted to fail.

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use saga::RetryPolicy;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{
    BaseConnectionService, BaseMessageChannel, BaseThingStore, DeleteOutcome, Filter,
    ProvisioningSettings, RemoteError, ServerDeps, Thing,
};
use crate::domains::connections::ConnectionTemplates;
use crate::domains::messaging::ProtocolMessage;

// =============================================================================
// Scripted failures
// =============================================================================

/// Failures queued for one operation: consumed one per call, then the
/// permanent failure (if any) applies.
#[derive(Default)]
struct FailureScript {
    queued: VecDeque<RemoteError>,
    always: Option<RemoteError>,
}

impl FailureScript {
    fn next(&mut self) -> Option<RemoteError> {
        self.queued.pop_front().or_else(|| self.always.clone())
    }
}

// =============================================================================
// In-memory Thing Store
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Search,
    Create,
    Delete,
    Patch,
}

/// Arguments captured from a store call
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    Search(String),
    Create { namespace: String, payload: Value },
    Delete(String),
    Patch {
        thing_id: String,
        attributes: Map<String, Value>,
    },
}

#[derive(Default)]
struct StoreState {
    things: Vec<Thing>,
    /// Present in the store but not yet visible to search
    unindexed: HashSet<String>,
    next_id: u64,
    failures: HashMap<StoreOp, FailureScript>,
    calls: Vec<StoreCall>,
}

lazy_static! {
    static ref RAW_EQ_REGEX: Regex = Regex::new(r"^eq\(([^,()]+),(.+)\)$").unwrap();
}

pub struct InMemoryThingStore {
    state: Mutex<StoreState>,
    /// Attribute the store itself refuses to duplicate, like a unique index
    enforced_unique: Option<String>,
}

impl InMemoryThingStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            enforced_unique: None,
        }
    }

    /// Reject creates that duplicate `attribute` with a conflict
    pub fn enforcing_unique(mut self, attribute: &str) -> Self {
        self.enforced_unique = Some(attribute.to_string());
        self
    }

    /// Seed a thing visible to search
    pub fn with_thing(self, thing_id: &str, attributes: Value) -> Self {
        self.insert(thing_id, attributes, true);
        self
    }

    /// Seed a thing that search cannot see yet (lagging search index)
    pub fn with_unindexed_thing(self, thing_id: &str, attributes: Value) -> Self {
        self.insert(thing_id, attributes, false);
        self
    }

    fn insert(&self, thing_id: &str, attributes: Value, indexed: bool) {
        let mut state = self.state.lock().unwrap();
        state.things.push(Thing {
            thing_id: thing_id.to_string(),
            policy_id: Some(thing_id.to_string()),
            attributes: attributes.as_object().cloned().unwrap_or_default(),
            features: None,
        });
        if !indexed {
            state.unindexed.insert(thing_id.to_string());
        }
    }

    /// Fail the next call of `op` with `error`
    pub fn fail_next(&self, op: StoreOp, error: RemoteError) {
        let mut state = self.state.lock().unwrap();
        state.failures.entry(op).or_default().queued.push_back(error);
    }

    /// Fail the next `n` calls of `op` with `error`
    pub fn fail_times(&self, op: StoreOp, n: usize, error: RemoteError) {
        for _ in 0..n {
            self.fail_next(op, error.clone());
        }
    }

    /// Fail every call of `op` (after any queued failures)
    pub fn fail_always(&self, op: StoreOp, error: RemoteError) {
        let mut state = self.state.lock().unwrap();
        state.failures.entry(op).or_default().always = Some(error);
    }

    /// Stop failing `op`
    pub fn heal(&self, op: StoreOp) {
        self.state.lock().unwrap().failures.remove(&op);
    }

    pub fn things(&self) -> Vec<Thing> {
        self.state.lock().unwrap().things.clone()
    }

    pub fn thing(&self, thing_id: &str) -> Option<Thing> {
        self.things().into_iter().find(|t| t.thing_id == thing_id)
    }

    pub fn contains(&self, thing_id: &str) -> bool {
        self.thing(thing_id).is_some()
    }

    /// Things whose attribute `key` equals `value`
    pub fn things_with(&self, key: &str, value: &str) -> Vec<Thing> {
        self.things()
            .into_iter()
            .filter(|t| t.attributes.get(key).and_then(Value::as_str) == Some(value))
            .collect()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, op: StoreOp) -> usize {
        self.calls()
            .iter()
            .filter(|call| {
                matches!(
                    (op, call),
                    (StoreOp::Search, StoreCall::Search(_))
                        | (StoreOp::Create, StoreCall::Create { .. })
                        | (StoreOp::Delete, StoreCall::Delete(_))
                        | (StoreOp::Patch, StoreCall::Patch { .. })
                )
            })
            .count()
    }

    fn begin(
        &self,
        op: StoreOp,
        call: StoreCall,
    ) -> Result<std::sync::MutexGuard<'_, StoreState>, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if let Some(error) = state.failures.get_mut(&op).and_then(FailureScript::next) {
            return Err(error);
        }
        Ok(state)
    }
}

impl Default for InMemoryThingStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Equality predicate a filter reduces to: a `/`-separated path and the
/// value it must hold. Anything but `eq(path,value)` is refused like the
/// platform refuses an unparseable query.
fn parse_filter(filter: &Filter) -> Result<(String, Value), RemoteError> {
    match filter {
        Filter::Eq { path, value } => Ok((path.replace('.', "/"), value.clone())),
        Filter::Raw(query) => {
            let captures = RAW_EQ_REGEX.captures(query.trim()).ok_or_else(|| RemoteError::Rejected {
                status: 400,
                message: format!("unsupported filter: {}", query),
            })?;
            let value = serde_json::from_str(&captures[2]).map_err(|e| RemoteError::Rejected {
                status: 400,
                message: format!("invalid filter value: {}", e),
            })?;
            Ok((captures[1].to_string(), value))
        }
    }
}

fn matches_filter(thing: &Thing, path: &str, expected: &Value) -> Result<bool, RemoteError> {
    let document = serde_json::to_value(thing).map_err(|e| RemoteError::Malformed(e.to_string()))?;
    let actual = path
        .split('/')
        .try_fold(&document, |node, segment| node.get(segment));
    Ok(actual == Some(expected))
}

#[async_trait]
impl BaseThingStore for InMemoryThingStore {
    async fn search(&self, filter: &Filter) -> Result<Vec<Thing>, RemoteError> {
        let state = self.begin(StoreOp::Search, StoreCall::Search(filter.to_rql()))?;
        let (path, expected) = parse_filter(filter)?;
        let mut found = Vec::new();
        for thing in state.things.iter().filter(|t| !state.unindexed.contains(&t.thing_id)) {
            if matches_filter(thing, &path, &expected)? {
                found.push(thing.clone());
            }
        }
        Ok(found)
    }

    async fn create(&self, namespace: &str, payload: &Value) -> Result<String, RemoteError> {
        let mut state = self.begin(
            StoreOp::Create,
            StoreCall::Create {
                namespace: namespace.to_string(),
                payload: payload.clone(),
            },
        )?;

        let attributes = payload
            .get("attributes")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        if let Some(key) = &self.enforced_unique {
            if let Some(value) = attributes.get(key) {
                if state.things.iter().any(|t| t.attributes.get(key) == Some(value)) {
                    return Err(RemoteError::Conflict(format!("{}={} already taken", key, value)));
                }
            }
        }

        state.next_id += 1;
        let thing_id = format!("{}:thing-{}", namespace, state.next_id);
        state.things.push(Thing {
            thing_id: thing_id.clone(),
            policy_id: Some(thing_id.clone()),
            attributes,
            features: payload.get("features").cloned(),
        });
        Ok(thing_id)
    }

    async fn delete(&self, thing_id: &str) -> Result<DeleteOutcome, RemoteError> {
        let mut state = self.begin(StoreOp::Delete, StoreCall::Delete(thing_id.to_string()))?;
        let before = state.things.len();
        state.things.retain(|t| t.thing_id != thing_id);
        state.unindexed.remove(thing_id);
        Ok(if state.things.len() < before {
            DeleteOutcome::Deleted
        } else {
            DeleteOutcome::NotFound
        })
    }

    async fn patch_attributes(
        &self,
        thing_id: &str,
        attributes: &Map<String, Value>,
    ) -> Result<(), RemoteError> {
        let mut state = self.begin(
            StoreOp::Patch,
            StoreCall::Patch {
                thing_id: thing_id.to_string(),
                attributes: attributes.clone(),
            },
        )?;
        let thing = state
            .things
            .iter_mut()
            .find(|t| t.thing_id == thing_id)
            .ok_or_else(|| RemoteError::NotFound(thing_id.to_string()))?;
        for (key, value) in attributes {
            if value.is_null() {
                thing.attributes.remove(key);
            } else {
                thing.attributes.insert(key.clone(), value.clone());
            }
        }
        Ok(())
    }
}

// =============================================================================
// Mock Connection Service
// =============================================================================

pub struct MockConnectionService {
    payloads: Mutex<Vec<Value>>,
    failures: Mutex<FailureScript>,
}

impl MockConnectionService {
    pub fn new() -> Self {
        Self {
            payloads: Mutex::new(Vec::new()),
            failures: Mutex::new(FailureScript::default()),
        }
    }

    pub fn fail_next(&self, error: RemoteError) {
        self.failures.lock().unwrap().queued.push_back(error);
    }

    pub fn fail_always(&self, error: RemoteError) {
        self.failures.lock().unwrap().always = Some(error);
    }

    /// Every payload received, including ones that were failed
    pub fn payloads(&self) -> Vec<Value> {
        self.payloads.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.payloads.lock().unwrap().len()
    }
}

impl Default for MockConnectionService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseConnectionService for MockConnectionService {
    async fn create_connection(&self, payload: &Value) -> Result<String, RemoteError> {
        let count = {
            let mut payloads = self.payloads.lock().unwrap();
            payloads.push(payload.clone());
            payloads.len()
        };
        if let Some(error) = self.failures.lock().unwrap().next() {
            return Err(error);
        }
        Ok(format!("conn-{}", count))
    }
}

// =============================================================================
// Recording Message Channel
// =============================================================================

pub struct RecordingChannel {
    sent: Mutex<Vec<ProtocolMessage>>,
    attempts: Mutex<usize>,
    failures: Mutex<FailureScript>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            attempts: Mutex::new(0),
            failures: Mutex::new(FailureScript::default()),
        }
    }

    pub fn fail_next(&self, error: RemoteError) {
        self.failures.lock().unwrap().queued.push_back(error);
    }

    pub fn fail_always(&self, error: RemoteError) {
        self.failures.lock().unwrap().always = Some(error);
    }

    /// Messages that were delivered
    pub fn sent(&self) -> Vec<ProtocolMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Every send call, delivered or failed
    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

impl Default for RecordingChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseMessageChannel for RecordingChannel {
    async fn send(&self, message: &ProtocolMessage) -> Result<(), RemoteError> {
        *self.attempts.lock().unwrap() += 1;
        if let Some(error) = self.failures.lock().unwrap().next() {
            return Err(error);
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

// =============================================================================
// TestDependencies
// =============================================================================

/// Fast retry policy for tests
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(Duration::from_millis(1), 2.0, 3)
}

/// Container of doubles; tests keep the handles to script and inspect them.
pub struct TestDependencies {
    pub things: Arc<InMemoryThingStore>,
    pub connections: Arc<MockConnectionService>,
    pub channel: Arc<RecordingChannel>,
    pub settings: ProvisioningSettings,
}

impl TestDependencies {
    pub fn new() -> Self {
        Self {
            things: Arc::new(InMemoryThingStore::new()),
            connections: Arc::new(MockConnectionService::new()),
            channel: Arc::new(RecordingChannel::new()),
            settings: ProvisioningSettings {
                retry: fast_retry(),
                saga_timeout: Duration::from_secs(30),
                compensation_grace: Duration::from_secs(5),
                ..ProvisioningSettings::default()
            },
        }
    }

    pub fn with_thing_store(mut self, store: InMemoryThingStore) -> Self {
        self.things = Arc::new(store);
        self
    }

    pub fn with_settings(mut self, settings: ProvisioningSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.settings.retry = retry;
        self
    }

    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.settings.fanout_max_concurrency = Some(limit);
        self
    }

    pub fn into_server_deps(&self) -> Arc<ServerDeps> {
        Arc::new(ServerDeps::new(
            self.things.clone(),
            self.connections.clone(),
            self.channel.clone(),
            Arc::new(ConnectionTemplates::builtin()),
            self.settings.clone(),
        ))
    }
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn eq_filter_matches_nested_attribute() {
        let store = InMemoryThingStore::new()
            .with_thing("org.example:dev1", json!({ "type": "sensor", "floor": 2 }))
            .with_thing("org.example:dev2", json!({ "type": "actuator" }));

        let found = store.search(&Filter::eq("attributes.type", "sensor")).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].thing_id, "org.example:dev1");

        let raw = store.search(&Filter::raw("eq(attributes/floor,2)")).await.unwrap();
        assert_eq!(raw.len(), 1);
    }

    #[tokio::test]
    async fn unsupported_raw_filter_is_rejected() {
        let store = InMemoryThingStore::new();
        let err = store.search(&Filter::raw("like(attributes/type,\"s*\")")).await.unwrap_err();
        assert!(matches!(err, RemoteError::Rejected { status: 400, .. }));
    }

    #[tokio::test]
    async fn unindexed_things_are_invisible_to_search_but_conflict_on_create() {
        let store = InMemoryThingStore::new()
            .enforcing_unique("siteName")
            .with_unindexed_thing("gateway:old", json!({ "siteName": "site1" }));

        let found = store.search(&Filter::eq("attributes.siteName", "site1")).await.unwrap();
        assert!(found.is_empty());

        let err = store
            .create("gateway", &json!({ "attributes": { "siteName": "site1" } }))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Conflict(_)));
    }

    #[tokio::test]
    async fn queued_failures_are_consumed_in_order() {
        let store = InMemoryThingStore::new();
        store.fail_next(StoreOp::Delete, RemoteError::Unavailable("503".into()));

        assert!(store.delete("gateway:x").await.is_err());
        assert_eq!(store.delete("gateway:x").await.unwrap(), DeleteOutcome::NotFound);
        assert_eq!(store.count(StoreOp::Delete), 2);
    }

    #[tokio::test]
    async fn merge_patch_removes_null_attributes() {
        let store = InMemoryThingStore::new().with_thing("org.example:dev1", json!({ "a": 1, "b": 2 }));
        let patch = json!({ "a": null, "c": 3 }).as_object().cloned().unwrap();
        store.patch_attributes("org.example:dev1", &patch).await.unwrap();

        let thing = store.thing("org.example:dev1").unwrap();
        assert_eq!(Value::Object(thing.attributes), json!({ "b": 2, "c": 3 }));
    }
}
