//! Pure Eclipse Ditto API client.
//!
//! Covers the parts of the Ditto HTTP API 2 needed to provision gateways and
//! configure devices: thing search, create, delete and attribute patch, the
//! connections API, and the Ditto protocol WebSocket channel.
//!
//! # Example
//!
//! ```rust,ignore
//! use ditto::{Credentials, DittoClient};
//!
//! let client = DittoClient::new("localhost:8080", Credentials::new("ditto", "ditto"));
//!
//! let things = client.search_things(Some(r#"eq(attributes/siteName,"site1")"#)).await?;
//! if things.is_empty() {
//!     let id = client.create_thing("gateway", &serde_json::json!({ "attributes": { "siteName": "site1" } })).await?;
//!     println!("created {}", id);
//! }
//! ```

pub mod error;
pub mod types;
pub mod ws;

pub use error::{DittoError, Result};
pub use types::{SearchPage, Thing};
pub use ws::WsChannel;

use std::fmt;

use reqwest::{RequestBuilder, Response};
use serde_json::{Map, Value};
use types::{ConnectionCreated, CreateAcks};

/// Page size requested from the search API.
const SEARCH_PAGE_SIZE: u32 = 200;

/// Acknowledgements requested on create so the new thing is searchable
/// before the response returns.
const CREATE_ACKS: &str = "twin-persisted,search-persisted";

/// Seconds Ditto may wait for the requested acknowledgements.
const CREATE_ACK_TIMEOUT_SECS: u32 = 10;

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

pub struct DittoClient {
    client: reqwest::Client,
    host_port: String,
    credentials: Credentials,
    devops: Option<Credentials>,
}

impl DittoClient {
    /// `host_port` is `host:port` without a scheme.
    pub fn new(host_port: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            client: reqwest::Client::new(),
            host_port: host_port.into(),
            credentials,
            devops: None,
        }
    }

    /// Credentials for the connections API. Defaults to the regular ones.
    pub fn with_devops_credentials(mut self, credentials: Credentials) -> Self {
        self.devops = Some(credentials);
        self
    }

    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/api/2", self.host_port)
    }

    pub fn websocket_url(&self) -> String {
        format!("ws://{}/ws/2", self.host_port)
    }

    /// A protocol channel authenticated with this client's credentials.
    pub fn websocket_channel(&self) -> WsChannel {
        WsChannel::new(self.websocket_url(), self.credentials.clone())
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.basic_auth(&self.credentials.username, Some(&self.credentials.password))
    }

    /// Fetch one page of search results. `filter` is an RQL expression.
    pub async fn search_page(
        &self,
        filter: Option<&str>,
        cursor: Option<&str>,
    ) -> Result<SearchPage> {
        let mut option = format!("size({})", SEARCH_PAGE_SIZE);
        if let Some(cursor) = cursor {
            option.push_str(&format!(",cursor({})", cursor));
        }

        let mut query = vec![("option", option)];
        if let Some(filter) = filter.filter(|f| !f.trim().is_empty()) {
            query.push(("filter", filter.to_string()));
        }

        let url = format!("{}/search/things", self.base_url());
        let resp = self.authed(self.client.get(&url)).query(&query).send().await?;
        let resp = check(resp).await?;
        Ok(resp.json().await?)
    }

    /// Fetch every thing matching `filter`, following the cursor to the end.
    pub async fn search_things(&self, filter: Option<&str>) -> Result<Vec<Thing>> {
        let mut things = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.search_page(filter, cursor.as_deref()).await?;
            things.extend(page.items);
            match page.cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        tracing::debug!(filter = ?filter, count = things.len(), "Ditto search complete");
        Ok(things)
    }

    /// Create a thing with a generated ID in `namespace`. Returns the new thing ID.
    ///
    /// Ditto answers 424 when an acknowledgement failed. If the twin itself was
    /// persisted the thing exists, so its ID is still returned.
    pub async fn create_thing(&self, namespace: &str, thing: &Value) -> Result<String> {
        let url = format!("{}/things", self.base_url());
        let timeout = CREATE_ACK_TIMEOUT_SECS.to_string();
        let resp = self
            .authed(self.client.post(&url))
            .query(&[
                ("namespace", namespace),
                ("requested-acks", CREATE_ACKS),
                ("timeout", timeout.as_str()),
            ])
            .json(thing)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() && status.as_u16() != 424 {
            return Err(DittoError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let acks: CreateAcks = serde_json::from_str(&body)?;
        let twin = acks.twin_persisted.ok_or_else(|| {
            DittoError::Malformed("create response has no twin-persisted acknowledgement".into())
        })?;
        if !twin.is_success() {
            return Err(DittoError::Api {
                status: twin.status.unwrap_or(status.as_u16()),
                message: body,
            });
        }
        let thing_id = twin
            .thing_id()
            .ok_or_else(|| DittoError::Malformed("twin-persisted payload has no thingId".into()))?
            .to_string();

        if !acks.search_persisted.as_ref().is_some_and(|a| a.is_success()) {
            tracing::warn!(thing_id = %thing_id, "thing created but search index not confirmed");
        }
        tracing::info!(thing_id = %thing_id, namespace, "Created Ditto thing");
        Ok(thing_id)
    }

    /// Delete a thing. Returns `false` when it did not exist.
    pub async fn delete_thing(&self, thing_id: &str) -> Result<bool> {
        let url = format!("{}/things/{}", self.base_url(), thing_id);
        let resp = self.authed(self.client.delete(&url)).send().await?;
        if resp.status().as_u16() == 404 {
            tracing::debug!(thing_id, "Thing already absent");
            return Ok(false);
        }
        check(resp).await?;
        tracing::info!(thing_id, "Deleted Ditto thing");
        Ok(true)
    }

    /// Merge-patch the thing's attributes.
    pub async fn patch_attributes(
        &self,
        thing_id: &str,
        attributes: &Map<String, Value>,
    ) -> Result<()> {
        let url = format!("{}/things/{}/attributes", self.base_url(), thing_id);
        let body = serde_json::to_vec(attributes)?;
        let resp = self
            .authed(self.client.patch(&url))
            .header(reqwest::header::CONTENT_TYPE, "application/merge-patch+json")
            .body(body)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    /// Create a connection from a rendered payload. Returns the connection ID.
    pub async fn create_connection(&self, payload: &Value) -> Result<String> {
        let creds = self.devops.as_ref().unwrap_or(&self.credentials);
        let url = format!("{}/connections", self.base_url());
        let resp = self
            .client
            .post(&url)
            .basic_auth(&creds.username, Some(&creds.password))
            .json(payload)
            .send()
            .await?;
        let resp = check(resp).await?;
        let created: ConnectionCreated = resp
            .json()
            .await
            .map_err(|e| DittoError::Malformed(format!("connection response: {}", e)))?;
        tracing::info!(connection_id = %created.id, "Created Ditto connection");
        Ok(created.id)
    }
}

async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(DittoError::Api {
        status: status.as_u16(),
        message: body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query};
    use axum::http::StatusCode;
    use axum::routing::{delete, get, post};
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr.to_string()
    }

    fn client(host_port: String) -> DittoClient {
        DittoClient::new(host_port, Credentials::new("ditto", "ditto"))
    }

    #[tokio::test]
    async fn search_follows_cursor_until_exhausted() {
        let router = Router::new().route(
            "/api/2/search/things",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                let option = q.get("option").cloned().unwrap_or_default();
                if option.contains("cursor(page2)") {
                    Json(json!({ "items": [{ "thingId": "org.example:dev3" }] }))
                } else {
                    Json(json!({
                        "items": [{ "thingId": "org.example:dev1" }, { "thingId": "org.example:dev2" }],
                        "cursor": "page2"
                    }))
                }
            }),
        );
        let ditto = client(serve(router).await);

        let things = ditto.search_things(Some("eq(attributes/type,\"sensor\")")).await.unwrap();

        let ids: Vec<_> = things.iter().map(|t| t.thing_id.as_str()).collect();
        assert_eq!(ids, vec!["org.example:dev1", "org.example:dev2", "org.example:dev3"]);
    }

    #[tokio::test]
    async fn create_reads_thing_id_from_twin_ack() {
        let router = Router::new().route(
            "/api/2/things",
            post(|Query(q): Query<HashMap<String, String>>| async move {
                assert_eq!(q.get("namespace").map(String::as_str), Some("gateway"));
                assert_eq!(q.get("requested-acks").map(String::as_str), Some(CREATE_ACKS));
                (
                    StatusCode::CREATED,
                    Json(json!({
                        "twin-persisted": { "status": 201, "payload": { "thingId": "gateway:0001" } },
                        "search-persisted": { "status": 204 }
                    })),
                )
            }),
        );
        let ditto = client(serve(router).await);

        let id = ditto
            .create_thing("gateway", &json!({ "attributes": { "siteName": "site1" } }))
            .await
            .unwrap();
        assert_eq!(id, "gateway:0001");
    }

    #[tokio::test]
    async fn create_survives_missing_search_ack() {
        let router = Router::new().route(
            "/api/2/things",
            post(|| async {
                (
                    StatusCode::FAILED_DEPENDENCY,
                    Json(json!({
                        "twin-persisted": { "status": 201, "payload": { "thingId": "gateway:0002" } },
                        "search-persisted": { "status": 408 }
                    })),
                )
            }),
        );
        let ditto = client(serve(router).await);

        let id = ditto.create_thing("gateway", &json!({})).await.unwrap();
        assert_eq!(id, "gateway:0002");
    }

    #[tokio::test]
    async fn delete_of_missing_thing_is_not_an_error() {
        let router = Router::new().route(
            "/api/2/things/:id",
            delete(|Path(id): Path<String>| async move {
                if id == "gateway:gone" {
                    StatusCode::NOT_FOUND
                } else {
                    StatusCode::NO_CONTENT
                }
            }),
        );
        let ditto = client(serve(router).await);

        assert!(ditto.delete_thing("gateway:live").await.unwrap());
        assert!(!ditto.delete_thing("gateway:gone").await.unwrap());
    }

    #[tokio::test]
    async fn server_error_is_transient_api_error() {
        let router = Router::new().route(
            "/api/2/connections",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "busy") }),
        );
        let ditto = client(serve(router).await);

        let err = ditto.create_connection(&json!({})).await.unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn connection_refused_is_transient() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = client(addr).delete_thing("gateway:x").await.unwrap_err();
        assert!(err.is_transient(), "{err:?}");
    }

    #[test]
    fn urls_use_api_2() {
        let ditto = client("ditto.local:8080".into());
        assert_eq!(ditto.base_url(), "http://ditto.local:8080/api/2");
        assert_eq!(ditto.websocket_url(), "ws://ditto.local:8080/ws/2");
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials::new("devops", "s3cret");
        assert!(!format!("{:?}", creds).contains("s3cret"));
    }
}
