//! Ditto protocol WebSocket channel.
//!
//! One logical connection per channel. Connect, send, the wait for the
//! correlated response and close all happen under a single async mutex, so
//! concurrent senders are serialized and never interleave frames, steal each
//! other's responses or race a reconnect.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::error::{DittoError, Result};
use crate::Credentials;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long a command waits for its correlated response by default
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

const CORRELATION_ID: &str = "correlation-id";

/// Ditto protocol response envelope. Only the fields needed to match and
/// classify a response are read.
#[derive(Debug, Deserialize)]
struct ProtocolResponse {
    #[serde(default)]
    headers: Map<String, Value>,
    status: Option<u16>,
    #[serde(default)]
    value: Value,
}

impl ProtocolResponse {
    fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }

    fn correlation_id(&self) -> Option<&str> {
        self.headers.get(CORRELATION_ID).and_then(Value::as_str)
    }

    fn status(&self) -> Option<u16> {
        self.status.or_else(|| {
            self.value
                .get("status")
                .and_then(Value::as_u64)
                .and_then(|s| u16::try_from(s).ok())
        })
    }

    /// 2xx is success; anything else becomes `Api` and is classified by status
    fn into_result(self) -> Result<()> {
        let Some(status) = self.status() else {
            return Err(DittoError::Malformed(
                "protocol response has no status".into(),
            ));
        };
        if (200..300).contains(&status) {
            return Ok(());
        }
        let message = ["message", "description", "error"]
            .iter()
            .find_map(|key| self.value.get(*key).and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| self.value.to_string());
        Err(DittoError::Api { status, message })
    }
}

pub struct WsChannel {
    url: String,
    credentials: Credentials,
    response_timeout: Duration,
    conn: Mutex<Option<WsStream>>,
}

impl WsChannel {
    pub fn new(url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            url: url.into(),
            credentials,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            conn: Mutex::new(None),
        }
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Serialize `message`, send it as one text frame and wait for its
    /// response.
    ///
    /// Connects lazily. When the message carries a `correlation-id` header the
    /// call completes only once the response with the same header arrives;
    /// unrelated frames are skipped meanwhile. A non-2xx response becomes
    /// [`DittoError::Api`]. A failed send, a closed stream or a missing
    /// response drops the connection so the next call reconnects.
    pub async fn send_json<T: Serialize>(&self, message: &T) -> Result<()> {
        let envelope = serde_json::to_value(message)?;
        let correlation_id = envelope
            .get("headers")
            .and_then(|headers| headers.get(CORRELATION_ID))
            .and_then(Value::as_str)
            .map(str::to_string);
        let text = envelope.to_string();

        let mut guard = self.conn.lock().await;
        let mut stream = match guard.take() {
            Some(stream) => stream,
            None => self.connect().await?,
        };

        if let Err(err) = stream.send(Message::Text(text)).await {
            warn!(url = %self.url, error = %err, "websocket send failed, dropping connection");
            return Err(err.into());
        }

        let Some(correlation_id) = correlation_id else {
            *guard = Some(stream);
            return Ok(());
        };

        let waited = tokio::time::timeout(
            self.response_timeout,
            await_response(&mut stream, &correlation_id),
        )
        .await;
        match waited {
            Ok(Ok(response)) => {
                *guard = Some(stream);
                response.into_result()
            }
            Ok(Err(err)) => {
                warn!(
                    url = %self.url,
                    correlation_id = %correlation_id,
                    error = %err,
                    "websocket lost while awaiting response, dropping connection"
                );
                Err(err)
            }
            Err(_) => {
                warn!(
                    url = %self.url,
                    correlation_id = %correlation_id,
                    "no websocket response in time, dropping connection"
                );
                Err(DittoError::ResponseTimeout {
                    correlation_id,
                    timeout: self.response_timeout,
                })
            }
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    pub async fn close(&self) -> Result<()> {
        let mut guard = self.conn.lock().await;
        if let Some(mut stream) = guard.take() {
            debug!(url = %self.url, "closing websocket");
            stream.close(None).await?;
        }
        Ok(())
    }

    async fn connect(&self) -> Result<WsStream> {
        let mut request = self.url.as_str().into_client_request()?;
        let token = STANDARD.encode(format!(
            "{}:{}",
            self.credentials.username, self.credentials.password
        ));
        let header = HeaderValue::from_str(&format!("Basic {}", token))
            .map_err(|e| DittoError::Malformed(format!("invalid credentials header: {}", e)))?;
        request.headers_mut().insert(AUTHORIZATION, header);

        let (stream, response) = tokio_tungstenite::connect_async(request).await?;
        debug!(url = %self.url, status = %response.status(), "websocket connected");
        Ok(stream)
    }
}

/// Read frames until the response correlated with `correlation_id`.
///
/// Pings are answered by tungstenite on the next read. Events, acks and
/// responses to other commands are skipped.
async fn await_response(
    stream: &mut WsStream,
    correlation_id: &str,
) -> Result<ProtocolResponse> {
    while let Some(frame) = stream.next().await {
        match frame? {
            Message::Text(text) => match ProtocolResponse::parse(&text) {
                Some(response) if response.correlation_id() == Some(correlation_id) => {
                    return Ok(response);
                }
                _ => debug!(correlation_id, "skipping unrelated websocket frame"),
            },
            Message::Close(frame) => {
                let reason = frame
                    .map(|f| format!("{} {}", f.code, f.reason))
                    .unwrap_or_else(|| "no close frame".to_string());
                return Err(DittoError::ChannelClosed(reason));
            }
            _ => {}
        }
    }
    Err(DittoError::ChannelClosed("stream ended".into()))
}
