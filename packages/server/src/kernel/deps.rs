//! Server dependencies for workflows (using traits for testability)
//!
//! This module provides the central dependency container used by all domain
//! workflows. Every remote capability sits behind a trait so tests can swap in
//! the in-memory doubles from `test_dependencies`.

use async_trait::async_trait;
use ditto::{DittoClient, DittoError, WsChannel};
use saga::{FanOut, RetryPolicy, DEFAULT_COMPENSATION_GRACE};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::domains::connections::ConnectionTemplates;
use crate::domains::executions::DEFAULT_RETAINED_EXECUTIONS;
use crate::domains::messaging::ProtocolMessage;
use crate::kernel::{
    BaseConnectionService, BaseMessageChannel, BaseThingStore, DeleteOutcome, Filter, RemoteError,
    Thing,
};

// =============================================================================
// Ditto Adapter (implements every remote trait)
// =============================================================================

impl From<DittoError> for RemoteError {
    fn from(err: DittoError) -> Self {
        if err.is_not_found() {
            RemoteError::NotFound(err.to_string())
        } else if err.is_conflict() {
            RemoteError::Conflict(err.to_string())
        } else if err.is_transient() {
            RemoteError::Unavailable(err.to_string())
        } else {
            match err {
                DittoError::Api { status, message } => RemoteError::Rejected { status, message },
                other => RemoteError::Malformed(other.to_string()),
            }
        }
    }
}

/// Wrapper around DittoClient and its protocol channel
pub struct DittoAdapter {
    client: Arc<DittoClient>,
    channel: WsChannel,
}

impl DittoAdapter {
    pub fn new(client: Arc<DittoClient>) -> Self {
        let channel = client.websocket_channel();
        Self { client, channel }
    }

    /// Close the protocol channel if it is open
    pub async fn close(&self) -> Result<(), RemoteError> {
        self.channel.close().await.map_err(RemoteError::from)
    }
}

#[async_trait]
impl BaseThingStore for DittoAdapter {
    async fn search(&self, filter: &Filter) -> Result<Vec<Thing>, RemoteError> {
        let rql = filter.to_rql();
        Ok(self.client.search_things(Some(&rql)).await?)
    }

    async fn create(&self, namespace: &str, payload: &Value) -> Result<String, RemoteError> {
        Ok(self.client.create_thing(namespace, payload).await?)
    }

    async fn delete(&self, thing_id: &str) -> Result<DeleteOutcome, RemoteError> {
        let deleted = self.client.delete_thing(thing_id).await?;
        Ok(if deleted {
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
        Ok(self.client.patch_attributes(thing_id, attributes).await?)
    }
}

#[async_trait]
impl BaseConnectionService for DittoAdapter {
    async fn create_connection(&self, payload: &Value) -> Result<String, RemoteError> {
        Ok(self.client.create_connection(payload).await?)
    }
}

#[async_trait]
impl BaseMessageChannel for DittoAdapter {
    async fn send(&self, message: &ProtocolMessage) -> Result<(), RemoteError> {
        Ok(self.channel.send_json(message).await?)
    }
}

// =============================================================================
// Provisioning settings
// =============================================================================

/// Tunables shared by every workflow
#[derive(Debug, Clone)]
pub struct ProvisioningSettings {
    /// Namespace new gateway things are created in
    pub namespace: String,
    /// Template used to render gateway connections
    pub connection_template: String,
    /// Applied to every step and every compensation
    pub retry: RetryPolicy,
    /// Deadline for one site saga's forward progress
    pub saga_timeout: Duration,
    /// Budget for each compensation, independent of the deadline
    pub compensation_grace: Duration,
    pub fanout_max_concurrency: Option<usize>,
    /// Finished executions kept for status queries
    pub retained_executions: usize,
}

impl ProvisioningSettings {
    pub fn fan_out(&self) -> FanOut {
        match self.fanout_max_concurrency {
            Some(limit) => FanOut::with_max_concurrency(limit),
            None => FanOut::new(),
        }
    }
}

impl Default for ProvisioningSettings {
    fn default() -> Self {
        Self {
            namespace: "gateway".to_string(),
            connection_template: "mqtt5".to_string(),
            retry: RetryPolicy::default(),
            saga_timeout: Duration::from_secs(300),
            compensation_grace: DEFAULT_COMPENSATION_GRACE,
            fanout_max_concurrency: None,
            retained_executions: DEFAULT_RETAINED_EXECUTIONS,
        }
    }
}

// =============================================================================
// ServerDeps
// =============================================================================

/// Server dependencies accessible to workflows (using traits for testability)
#[derive(Clone)]
pub struct ServerDeps {
    pub things: Arc<dyn BaseThingStore>,
    pub connections: Arc<dyn BaseConnectionService>,
    pub channel: Arc<dyn BaseMessageChannel>,
    /// Immutable after startup
    pub templates: Arc<ConnectionTemplates>,
    pub settings: ProvisioningSettings,
}

impl ServerDeps {
    pub fn new(
        things: Arc<dyn BaseThingStore>,
        connections: Arc<dyn BaseConnectionService>,
        channel: Arc<dyn BaseMessageChannel>,
        templates: Arc<ConnectionTemplates>,
        settings: ProvisioningSettings,
    ) -> Self {
        Self {
            things,
            connections,
            channel,
            templates,
            settings,
        }
    }

    /// Wire every capability to one Ditto adapter
    pub fn from_ditto(
        adapter: Arc<DittoAdapter>,
        templates: Arc<ConnectionTemplates>,
        settings: ProvisioningSettings,
    ) -> Self {
        Self::new(
            adapter.clone(),
            adapter.clone(),
            adapter,
            templates,
            settings,
        )
    }
}
