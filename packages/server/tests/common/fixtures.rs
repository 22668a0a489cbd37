//! Test fixtures for sites and device things.

use dm_core::domains::messaging::ProtocolMessage;
use dm_core::domains::sites::Site;
use dm_core::kernel::test_dependencies::InMemoryThingStore;
use serde_json::{json, Value};

/// A valid site with broker credentials
pub fn site(name: &str) -> Site {
    Site {
        site_name: name.to_string(),
        host: "broker.local".to_string(),
        port: "1883".to_string(),
        username: "gateway".to_string(),
        password: "secret".to_string(),
        description: format!("{} gateway", name),
    }
}

/// JSON body for one site, as API callers send it
pub fn site_json(name: &str) -> Value {
    json!({
        "siteName": name,
        "host": "broker.local",
        "port": "1883",
        "username": "gateway",
        "password": "secret",
        "description": format!("{} gateway", name),
    })
}

/// Store seeded with `count` sensors of type `kind` plus one unrelated actuator
pub fn device_store(kind: &str, count: usize) -> InMemoryThingStore {
    let store = (1..=count).fold(InMemoryThingStore::new(), |store, n| {
        store.with_thing(
            &format!("org.example:{}-{}", kind, n),
            json!({ "type": kind, "interval": 60 }),
        )
    });
    store.with_thing("org.example:actuator-1", json!({ "type": "actuator" }))
}

/// Query matching every device of type `kind`
pub fn type_query(kind: &str) -> String {
    format!(r#"eq(attributes/type,"{}")"#, kind)
}

/// Twin modify command addressed to whichever device it is sent to
pub fn modify_command(value: Value) -> ProtocolMessage {
    ProtocolMessage::new("<namespace>/<name>/things/twin/commands/modify")
        .with_path("/attributes")
        .with_value(value)
}
