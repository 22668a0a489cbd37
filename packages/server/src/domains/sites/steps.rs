//! The three steps of gateway provisioning.
//!
//! 1. create the gateway thing (unique on `siteName`, compensated by deleting it)
//! 2. grant the gateway's connection access in the thing's policy (idempotent)
//! 3. create the gateway's broker connection (final step)

use async_trait::async_trait;
use saga::{SagaStep, StepError};
use serde_json::{json, Value};
use std::sync::Arc;

use super::models::Site;
use crate::domains::connections::{create_connection, ConnectionSpec};
use crate::domains::messaging::{send_message, ProtocolMessage};
use crate::domains::things::{create_unique_thing, delete_thing, CreateThingRequest};
use crate::kernel::ServerDeps;

/// Attribute that identifies a gateway thing
pub const SITE_NAME_ATTRIBUTE: &str = "siteName";

const POLICY_TOPIC: &str = "<namespace>/<name>/policies/commands/modify";
const POLICY_ENTRY_PATH: &str = "entries/DEVICE";

/// Per-run state threaded through the site saga.
#[derive(Debug, Clone)]
pub struct SiteContext {
    pub site: Site,
    pub thing_id: Option<String>,
    pub connection_id: Option<String>,
}

impl SiteContext {
    pub fn new(site: Site) -> Self {
        Self {
            site,
            thing_id: None,
            connection_id: None,
        }
    }

    fn require_thing_id(&self) -> Result<&str, StepError> {
        self.thing_id
            .as_deref()
            .ok_or_else(|| StepError::terminal("gateway thing was not created"))
    }
}

/// Subject the gateway's connection authenticates as
pub fn integration_subject(thing_id: &str) -> String {
    format!("integration:{}", thing_id)
}

/// Policy entry granting the gateway's connection read/write on the thing
/// and its messages.
pub fn gateway_policy_message(thing_id: &str) -> ProtocolMessage {
    let subject = integration_subject(thing_id);
    ProtocolMessage::new(POLICY_TOPIC)
        .with_path(POLICY_ENTRY_PATH)
        .with_value(json!({
            "subjects": {
                subject: { "type": "connection" }
            },
            "resources": {
                "thing:/": { "grant": ["READ", "WRITE"], "revoke": [] },
                "message:/": { "grant": ["READ", "WRITE"], "revoke": [] }
            }
        }))
}

/// Connection rendered for a gateway
pub fn gateway_connection_spec(site: &Site, thing_id: &str, template: &str) -> ConnectionSpec {
    let name = site.connection_name();
    ConnectionSpec::new(name.clone(), template)
        .placeholder("ThingID", thing_id)
        .placeholder("ConnectionName", name)
        .placeholder("MQTTHost", &site.host)
        .placeholder("MQTTPort", &site.port)
        .placeholder("Username", site.username.as_str())
        .placeholder("Password", site.password.as_str())
}

// =============================================================================
// Step 1: create gateway thing
// =============================================================================

pub struct CreateGatewayThing {
    deps: Arc<ServerDeps>,
}

impl CreateGatewayThing {
    pub fn new(deps: Arc<ServerDeps>) -> Self {
        Self { deps }
    }

    fn payload(site: &Site) -> Value {
        json!({
            "attributes": {
                SITE_NAME_ATTRIBUTE: site.site_name,
                "siteDescription": site.description,
            }
        })
    }
}

#[async_trait]
impl SagaStep<SiteContext> for CreateGatewayThing {
    fn name(&self) -> &str {
        "create_gateway_thing"
    }

    fn has_compensation(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: &mut SiteContext) -> Result<(), StepError> {
        let request = CreateThingRequest {
            namespace: self.deps.settings.namespace.clone(),
            unique_key: SITE_NAME_ATTRIBUTE.to_string(),
            payload: Self::payload(&ctx.site),
        };
        let thing_id = create_unique_thing(&request, self.deps.things.as_ref()).await?;
        ctx.thing_id = Some(thing_id);
        Ok(())
    }

    async fn compensate(&self, ctx: &SiteContext) -> Result<(), StepError> {
        if let Some(thing_id) = &ctx.thing_id {
            delete_thing(thing_id, self.deps.things.as_ref()).await?;
        }
        Ok(())
    }
}

// =============================================================================
// Step 2: update gateway policy
// =============================================================================

pub struct UpdateGatewayPolicy {
    deps: Arc<ServerDeps>,
}

impl UpdateGatewayPolicy {
    pub fn new(deps: Arc<ServerDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl SagaStep<SiteContext> for UpdateGatewayPolicy {
    fn name(&self) -> &str {
        "update_gateway_policy"
    }

    // Writing the same policy entry twice leaves the same policy.
    fn is_idempotent(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: &mut SiteContext) -> Result<(), StepError> {
        let thing_id = ctx.require_thing_id()?;
        let template = gateway_policy_message(thing_id);
        send_message(&template, thing_id, self.deps.channel.as_ref()).await?;
        Ok(())
    }
}

// =============================================================================
// Step 3: create gateway connection
// =============================================================================

pub struct CreateGatewayConnection {
    deps: Arc<ServerDeps>,
}

impl CreateGatewayConnection {
    pub fn new(deps: Arc<ServerDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl SagaStep<SiteContext> for CreateGatewayConnection {
    fn name(&self) -> &str {
        "create_gateway_connection"
    }

    async fn execute(&self, ctx: &mut SiteContext) -> Result<(), StepError> {
        let thing_id = ctx.require_thing_id()?;
        let spec = gateway_connection_spec(
            &ctx.site,
            thing_id,
            &self.deps.settings.connection_template,
        );
        let connection_id = create_connection(
            &spec,
            &self.deps.templates,
            self.deps.connections.as_ref(),
        )
        .await?;
        ctx.connection_id = Some(connection_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_message_grants_integration_subject() {
        let message = gateway_policy_message("gateway:abc");
        assert_eq!(message.topic, POLICY_TOPIC);
        assert_eq!(message.path, "entries/DEVICE");
        assert_eq!(
            message.value["subjects"]["integration:gateway:abc"]["type"],
            json!("connection")
        );
        assert_eq!(message.value["resources"]["thing:/"]["grant"], json!(["READ", "WRITE"]));
        assert_eq!(message.value["resources"]["message:/"]["revoke"], json!([]));
    }

    #[test]
    fn connection_spec_fills_every_placeholder() {
        let site = Site {
            site_name: "site1".into(),
            host: "broker.local".into(),
            port: "1883".into(),
            username: "u".into(),
            password: "p".into(),
            description: String::new(),
        };
        let spec = gateway_connection_spec(&site, "gateway:abc", "mqtt5");
        assert_eq!(spec.name, "site1-conn");
        assert_eq!(spec.placeholders["ThingID"], "gateway:abc");
        assert_eq!(spec.placeholders["ConnectionName"], "site1-conn");
        assert_eq!(spec.placeholders["MQTTPort"], "1883");
        assert_eq!(spec.placeholders.len(), 6);
    }
}
