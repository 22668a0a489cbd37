// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// Uniqueness checks, topic rewriting and template rendering are domain
// functions that use these traits.
//
// Naming convention: Base* for trait names (e.g., BaseThingStore)

use async_trait::async_trait;
use saga::StepError;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::domains::messaging::ProtocolMessage;

pub use ditto::Thing;

// =============================================================================
// Remote errors (classification shared by every remote capability)
// =============================================================================

/// Failure of a call to the twin platform, classified once at the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("not found: {0}")]
    NotFound(String),

    /// The remote refused a create because the resource already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Timeout, connection failure, 5xx. Worth retrying.
    #[error("remote unavailable: {0}")]
    Unavailable(String),

    #[error("remote rejected request with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed remote response: {0}")]
    Malformed(String),
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_))
    }
}

impl From<RemoteError> for StepError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Unavailable(_) => StepError::transient(err.to_string()),
            RemoteError::Conflict(_) => StepError::already_exists(err.to_string()),
            _ => StepError::terminal(err.to_string()),
        }
    }
}

// =============================================================================
// Search filters
// =============================================================================

/// Search predicate over things.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Equality on a dotted attribute path, e.g. `attributes.siteName`.
    Eq { path: String, value: Value },
    /// An RQL expression passed through untouched.
    Raw(String),
}

impl Filter {
    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn raw(query: impl Into<String>) -> Self {
        Filter::Raw(query.into())
    }

    /// Render as an RQL expression.
    pub fn to_rql(&self) -> String {
        match self {
            Filter::Eq { path, value } => {
                format!("eq({},{})", path.replace('.', "/"), value)
            }
            Filter::Raw(query) => query.clone(),
        }
    }
}

// =============================================================================
// Thing Store Trait (Infrastructure - twin platform things API)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

#[async_trait]
pub trait BaseThingStore: Send + Sync {
    /// Every thing matching `filter`, across all result pages
    async fn search(&self, filter: &Filter) -> Result<Vec<Thing>, RemoteError>;

    /// Create a thing with a generated ID in `namespace`, returning that ID
    async fn create(&self, namespace: &str, payload: &Value) -> Result<String, RemoteError>;

    async fn delete(&self, thing_id: &str) -> Result<DeleteOutcome, RemoteError>;

    /// Merge-patch the thing's attributes
    async fn patch_attributes(
        &self,
        thing_id: &str,
        attributes: &Map<String, Value>,
    ) -> Result<(), RemoteError>;
}

// =============================================================================
// Connection Service Trait (Infrastructure - twin platform connections API)
// =============================================================================

#[async_trait]
pub trait BaseConnectionService: Send + Sync {
    /// Create a connection from a rendered payload, returning its ID
    async fn create_connection(&self, payload: &Value) -> Result<String, RemoteError>;
}

// =============================================================================
// Message Channel Trait (Infrastructure - protocol message channel)
// =============================================================================

#[async_trait]
pub trait BaseMessageChannel: Send + Sync {
    /// Send one already-validated protocol message
    async fn send(&self, message: &ProtocolMessage) -> Result<(), RemoteError>;
}
