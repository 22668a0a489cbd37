//! Error types for the Ditto client.

use thiserror::Error;

/// Result type for Ditto client operations.
pub type Result<T> = std::result::Result<T, DittoError>;

/// Ditto client errors.
#[derive(Debug, Error)]
pub enum DittoError {
    /// Transport failure (connection refused, timeout, TLS)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status from the Ditto API
    #[error("Ditto API returned status {status}: {message}")]
    Api { status: u16, message: String },

    /// Success status with a body we could not interpret
    #[error("Unexpected Ditto response: {0}")]
    Malformed(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    /// The server closed the channel before answering a command
    #[error("WebSocket closed: {0}")]
    ChannelClosed(String),

    /// No correlated response arrived in time
    #[error("no response to command '{correlation_id}' within {timeout:?}")]
    ResponseTimeout {
        correlation_id: String,
        timeout: std::time::Duration,
    },
}

impl From<tokio_tungstenite::tungstenite::Error> for DittoError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        DittoError::WebSocket(Box::new(err))
    }
}

impl DittoError {
    pub fn status(&self) -> Option<u16> {
        match self {
            DittoError::Api { status, .. } => Some(*status),
            DittoError::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    pub fn is_conflict(&self) -> bool {
        self.status() == Some(409)
    }

    /// Whether repeating the same request may succeed.
    ///
    /// Timeouts, connection failures, 5xx, 408 and 429 are transient. A broken
    /// WebSocket, a closed channel or a missing response is transient because
    /// the channel reconnects on next send.
    pub fn is_transient(&self) -> bool {
        match self {
            DittoError::Http(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            DittoError::Api { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            DittoError::WebSocket(_)
            | DittoError::ChannelClosed(_)
            | DittoError::ResponseTimeout { .. } => true,
            DittoError::Malformed(_) | DittoError::Json(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16) -> DittoError {
        DittoError::Api {
            status,
            message: String::new(),
        }
    }

    #[test]
    fn server_errors_are_transient() {
        assert!(api(500).is_transient());
        assert!(api(503).is_transient());
        assert!(api(429).is_transient());
        assert!(api(408).is_transient());
    }

    #[test]
    fn client_errors_are_not_transient() {
        assert!(!api(400).is_transient());
        assert!(!api(403).is_transient());
        assert!(!api(404).is_transient());
        assert!(!api(409).is_transient());
        assert!(!DittoError::Malformed("no thingId".into()).is_transient());
    }

    #[test]
    fn status_helpers() {
        assert!(api(404).is_not_found());
        assert!(api(409).is_conflict());
        assert_eq!(api(201).status(), Some(201));
        assert_eq!(DittoError::Malformed("x".into()).status(), None);
    }
}
