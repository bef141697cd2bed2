//! HTTP access to the panel backend's resource collections.
//!
//! The backend exposes each collection as one read endpoint plus a handful
//! of POST endpoints (`add_*`, `edit_*`, `delete_*`). Endpoint paths vary
//! between backend drafts, so they come from configuration. List responses
//! are either a bare array or an object wrapping one; both are normalized
//! into canonical records here, before anything else sees them.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{ApiConfig, EndpointConfig};
use crate::model::{dedupe_by_key, CopySetup, RecordKey, Resource, ResourceKind};
use crate::session::SessionContext;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("API error {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("invalid header {0}")]
    Header(String),
    #[error("no {action} endpoint configured for {kind}")]
    NotConfigured { kind: ResourceKind, action: &'static str },
}

/// Pull a human-readable message out of an error body. The backend uses
/// `detail` (FastAPI) or `message`; anything else is returned verbatim.
pub(crate) fn extract_detail(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("detail")
                .or_else(|| v.get("message"))
                .map(|d| match d {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
        })
        .unwrap_or_else(|| body.trim().to_string())
}

/// Join a base URL and an endpoint path, with or without a leading `/`.
pub(crate) fn join_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Authenticated JSON client for the panel backend.
pub struct PanelApi {
    client: reqwest::Client,
    base_url: String,
    auth_header: HeaderName,
    token: Option<String>,
}

impl PanelApi {
    pub fn new(api: &ApiConfig, session: &SessionContext) -> Result<Self, RemoteError> {
        let auth_header = HeaderName::from_bytes(api.auth_header.as_bytes())
            .map_err(|_| RemoteError::Header(api.auth_header.clone()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(api.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            auth_header,
            token: session.token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    fn headers(&self) -> Result<HeaderMap, RemoteError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(token)
                .map_err(|_| RemoteError::Header(self.auth_header.to_string()))?;
            headers.insert(self.auth_header.clone(), value);
        }
        Ok(headers)
    }

    async fn check(resp: reqwest::Response) -> Result<String, RemoteError> {
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body: extract_detail(&body),
            });
        }
        Ok(body)
    }

    /// GET and decode a JSON body.
    pub async fn get(&self, path: &str) -> Result<Value, RemoteError> {
        let resp = self
            .client
            .get(self.url(path))
            .headers(self.headers()?)
            .send()
            .await?;
        let body = Self::check(resp).await?;
        serde_json::from_str(&body).map_err(|e| RemoteError::Decode(e.to_string()))
    }

    /// POST a JSON body. Write endpoints don't reliably return JSON, so a
    /// non-JSON success body comes back as a string value.
    pub async fn post(&self, path: &str, body: &Value) -> Result<Value, RemoteError> {
        let body_str = serde_json::to_string(body).map_err(|e| RemoteError::Decode(e.to_string()))?;
        let resp = self
            .client
            .post(self.url(path))
            .headers(self.headers()?)
            .header(CONTENT_TYPE, "application/json")
            .body(body_str)
            .send()
            .await?;
        let text = Self::check(resp).await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    /// Backend liveness check.
    pub async fn health(&self, path: &str) -> bool {
        match self.client.get(self.url(path)).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(error = %e, "health check failed");
                false
            }
        }
    }
}

/// Read access to one remote collection.
#[async_trait]
pub trait ListApi<R: Resource>: Send + Sync {
    async fn list(&self) -> Result<Vec<R>, RemoteError>;
}

/// Write access on top of `list`.
#[async_trait]
pub trait ResourceApi<R: Resource>: ListApi<R> {
    async fn create(&self, record: &R) -> Result<(), RemoteError>;
    async fn update(&self, key: &RecordKey, record: &R) -> Result<(), RemoteError>;
    async fn delete(&self, keys: &[RecordKey]) -> Result<(), RemoteError>;
}

/// Copy-setup collections also support switching a setup on and off.
#[async_trait]
pub trait CopySetupApi: ResourceApi<CopySetup> {
    async fn set_enabled(&self, key: &RecordKey, enabled: bool) -> Result<(), RemoteError>;
}

/// Decode a list response: a bare array, an object wrapping the array
/// under the collection's field, or a bucketed object whose array fields are
/// concatenated (`{"dhan": [...], "motilal": [...]}`). Records that fail to
/// normalize are skipped.
pub fn parse_collection<R: Resource>(body: Value) -> Result<Vec<R>, RemoteError> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            let field = R::KIND.collection_field();
            match map.remove(field) {
                Some(Value::Array(items)) => items,
                _ => {
                    let mut found = false;
                    let mut items = Vec::new();
                    for (bucket, value) in map {
                        let Value::Array(rows) = value else { continue };
                        found = true;
                        items.extend(rows.into_iter().map(|mut row| {
                            if let Value::Object(fields) = &mut row {
                                R::adopt_bucket(fields, &bucket);
                            }
                            row
                        }));
                    }
                    if !found {
                        return Err(RemoteError::Decode(format!(
                            "no {} array in response",
                            R::KIND
                        )));
                    }
                    items
                }
            }
        }
        other => {
            return Err(RemoteError::Decode(format!(
                "expected {} array, got {}",
                R::KIND,
                other
            )))
        }
    };

    let total = items.len();
    let records: Vec<R> = items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<R::Wire>(item) {
            Ok(wire) => R::from_wire(wire),
            Err(e) => {
                warn!(kind = %R::KIND, error = %e, "skipping malformed record");
                None
            }
        })
        .collect();
    if records.len() < total {
        warn!(kind = %R::KIND, total = total, kept = records.len(), "dropped unusable records");
    }
    Ok(dedupe_by_key(records))
}

/// `ResourceApi` over the panel backend's HTTP endpoints.
pub struct RemoteStore<R> {
    api: Arc<PanelApi>,
    endpoints: EndpointConfig,
    _record: PhantomData<fn() -> R>,
}

impl<R: Resource> RemoteStore<R> {
    pub fn new(api: Arc<PanelApi>, endpoints: EndpointConfig) -> Self {
        Self {
            api,
            endpoints,
            _record: PhantomData,
        }
    }

    fn to_body(record: &R) -> Result<Value, RemoteError> {
        serde_json::to_value(record).map_err(|e| RemoteError::Decode(e.to_string()))
    }
}

async fn list_from<R: Resource>(api: &PanelApi, path: &str) -> Result<Vec<R>, RemoteError> {
    let body = api.get(path).await?;
    let records = parse_collection::<R>(body)?;
    debug!(kind = %R::KIND, records = records.len(), "listed remote collection");
    Ok(records)
}

#[async_trait]
impl<R: Resource> ListApi<R> for RemoteStore<R> {
    async fn list(&self) -> Result<Vec<R>, RemoteError> {
        list_from(&self.api, &self.endpoints.list).await
    }
}

#[async_trait]
impl<R: Resource> ResourceApi<R> for RemoteStore<R> {
    async fn create(&self, record: &R) -> Result<(), RemoteError> {
        self.api
            .post(&self.endpoints.create, &Self::to_body(record)?)
            .await?;
        debug!(kind = %R::KIND, key = %record.key(), "remote create accepted");
        Ok(())
    }

    async fn update(&self, key: &RecordKey, record: &R) -> Result<(), RemoteError> {
        self.api
            .post(&self.endpoints.update, &Self::to_body(record)?)
            .await?;
        debug!(kind = %R::KIND, key = %key, "remote update accepted");
        Ok(())
    }

    async fn delete(&self, keys: &[RecordKey]) -> Result<(), RemoteError> {
        let ids: Vec<String> = keys.iter().map(R::remote_id).collect();
        let body = serde_json::json!({ "ids": ids });
        self.api.post(&self.endpoints.delete, &body).await?;
        debug!(kind = %R::KIND, count = keys.len(), "remote delete accepted");
        Ok(())
    }
}

#[async_trait]
impl CopySetupApi for RemoteStore<CopySetup> {
    async fn set_enabled(&self, key: &RecordKey, enabled: bool) -> Result<(), RemoteError> {
        let (action, path) = if enabled {
            ("enable", self.endpoints.enable.as_deref())
        } else {
            ("disable", self.endpoints.disable.as_deref())
        };
        let path = path.ok_or(RemoteError::NotConfigured {
            kind: ResourceKind::CopySetups,
            action,
        })?;
        let body = serde_json::json!({ "setup_id": key });
        self.api.post(path, &body).await?;
        debug!(key = %key, enabled = enabled, "remote copy setup toggled");
        Ok(())
    }
}

/// List-only access to a dashboard report collection.
pub struct ReportStore<R> {
    api: Arc<PanelApi>,
    path: String,
    _record: PhantomData<fn() -> R>,
}

impl<R: Resource> ReportStore<R> {
    pub fn new(api: Arc<PanelApi>, path: impl Into<String>) -> Self {
        Self {
            api,
            path: path.into(),
            _record: PhantomData,
        }
    }
}

#[async_trait]
impl<R: Resource> ListApi<R> for ReportStore<R> {
    async fn list(&self) -> Result<Vec<R>, RemoteError> {
        list_from(&self.api, &self.path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointsConfig;
    use crate::model::{Broker, Client, Group, Order, SessionStatus};
    use rust_decimal::Decimal;
    use serde_json::json;

    fn api(url: &str, token: Option<&str>) -> Arc<PanelApi> {
        let config = ApiConfig {
            base_url: url.to_string(),
            ..ApiConfig::default()
        };
        let session = SessionContext::new(Some("ravi".into()), token.map(str::to_string));
        Arc::new(PanelApi::new(&config, &session).unwrap())
    }

    #[test]
    fn test_parse_collection_shapes() {
        let bare: Vec<Group> =
            parse_collection(json!([{ "id": 1, "name": "A", "members": ["U1"] }])).unwrap();
        assert_eq!(bare.len(), 1);

        let wrapped: Vec<Group> =
            parse_collection(json!({ "groups": [{ "group_name": "B", "clients": ["U2"] }] })).unwrap();
        assert_eq!(wrapped[0].name, "B");

        let odd_field: Vec<Group> =
            parse_collection(json!({ "ok": true, "items": [{ "name": "C" }] })).unwrap();
        assert_eq!(odd_field[0].name, "C");

        assert!(parse_collection::<Group>(json!({ "ok": true })).is_err());
        assert!(parse_collection::<Group>(json!("nope")).is_err());
    }

    #[test]
    fn test_parse_collection_concatenates_broker_buckets() {
        let clients: Vec<Client> = parse_collection(json!({
            "dhan": [{ "broker": "dhan", "client_id": "D1", "display_name": "Ravi" }],
            "motilal": [
                { "client_id": "M1", "display_name": "Asha" },
                { "client_id": "M2" }
            ]
        }))
        .unwrap();
        let keys: Vec<String> = clients.iter().map(|c| c.key().to_string()).collect();
        assert_eq!(keys, vec!["dhan::D1", "motilal::M1", "motilal::M2"]);
    }

    #[test]
    fn test_parse_collection_status_buckets() {
        let orders: Vec<Order> = parse_collection(json!({
            "pending": [{ "name": "Ravi", "symbol": "SBIN", "order_id": "1" }],
            "traded": [{ "name": "Ravi", "symbol": "TCS", "order_id": "2" }],
            "others": []
        }))
        .unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].status, "pending");
        assert_eq!(orders[1].status, "traded");
    }

    #[test]
    fn test_join_url_slashes() {
        assert_eq!(join_url("http://h:1/", "/a"), "http://h:1/a");
        assert_eq!(join_url("http://h:1", "a"), "http://h:1/a");
    }

    #[test]
    fn test_parse_collection_skips_bad_records_and_dedupes() {
        let clients: Vec<Client> = parse_collection(json!([
            { "broker": "dhan", "userid": "U1", "session_status": "PENDING" },
            { "broker": "dhan" },
            "garbage",
            { "broker": "dhan", "userid": "U1", "session_status": "ACTIVE" }
        ]))
        .unwrap();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0].session_status, SessionStatus::Active);
    }

    #[test]
    fn test_extract_detail() {
        assert_eq!(extract_detail(r#"{"detail":"Invalid credentials"}"#), "Invalid credentials");
        assert_eq!(extract_detail(r#"{"message":"nope"}"#), "nope");
        assert_eq!(extract_detail("Internal Server Error\n"), "Internal Server Error");
    }

    #[tokio::test]
    async fn test_list_sends_token_and_normalizes() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/get_clients")
            .match_header("x-auth-token", "tok-1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"clients":[{"name":"Ravi","client_id":"U1","capital":1000,"session":"Logged in"}]}"#)
            .create_async()
            .await;

        let store: RemoteStore<Client> =
            RemoteStore::new(api(&server.url(), Some("tok-1")), EndpointsConfig::default().clients);
        let clients = store.list().await.unwrap();

        mock.assert_async().await;
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0].key().as_str(), "dhan::U1");
        assert_eq!(clients[0].capital, Some(Decimal::from(1000)));
        assert_eq!(clients[0].session_status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn test_list_error_status_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/groups")
            .with_status(503)
            .with_body(r#"{"detail":"maintenance"}"#)
            .create_async()
            .await;

        let store: RemoteStore<Group> =
            RemoteStore::new(api(&server.url(), None), EndpointsConfig::default().groups);
        match store.list().await {
            Err(RemoteError::Status { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "maintenance");
            }
            other => panic!("expected status error, got {:?}", other.map(|v| v.len())),
        }
    }

    #[tokio::test]
    async fn test_create_posts_canonical_record() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/add_client")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::PartialJson(json!({
                "broker": "dhan",
                "userid": "U1",
                "creds": { "access_token": "t" }
            })))
            .with_status(200)
            .with_body("Client saved. Login started.")
            .create_async()
            .await;

        let store: RemoteStore<Client> =
            RemoteStore::new(api(&server.url(), None), EndpointsConfig::default().clients);
        let client = Client::new(Broker::Dhan, "U1").with_credential("access_token", "t");
        store.create(&client).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_delete_is_one_batched_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/delete_groups")
            .match_body(mockito::Matcher::Json(json!({ "ids": ["1", "Swing"] })))
            .with_status(200)
            .with_body(r#"{"message":"deleted"}"#)
            .expect(1)
            .create_async()
            .await;

        let store: RemoteStore<Group> =
            RemoteStore::new(api(&server.url(), None), EndpointsConfig::default().groups);
        store.delete(&["1".into(), "Swing".into()]).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_client_delete_sends_bare_userids() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/delete_clients")
            .match_body(mockito::Matcher::Json(json!({ "ids": ["U1", "M9"] })))
            .with_status(200)
            .with_body(r#"{"message":"deleted"}"#)
            .expect(1)
            .create_async()
            .await;

        let store: RemoteStore<Client> =
            RemoteStore::new(api(&server.url(), None), EndpointsConfig::default().clients);
        store
            .delete(&[
                Client::key_for(&Broker::Dhan, "U1"),
                Client::key_for(&Broker::Motilal, "M9"),
            ])
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_report_store_lists_configured_path() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/get_orders")
            .with_status(200)
            .with_body(r#"{"pending":[],"traded":[{"name":"Ravi","symbol":"SBIN","quantity":5,"price":"812.4","status":"Traded","order_id":"A7"}]}"#)
            .create_async()
            .await;

        let store: ReportStore<Order> = ReportStore::new(api(&server.url(), None), "get_orders");
        let orders = store.list().await.unwrap();
        mock.assert_async().await;
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].key().as_str(), "A7");
    }

    #[tokio::test]
    async fn test_truncated_body_is_transport_error() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 100\r\n\r\n[{\"id\"")
                .await;
            // Dropping the socket cuts the body short.
        });

        let store: RemoteStore<Group> = RemoteStore::new(
            api(&format!("http://{}", addr), None),
            EndpointsConfig::default().groups,
        );
        assert!(matches!(store.list().await, Err(RemoteError::Transport(_))));
    }

    #[tokio::test]
    async fn test_set_enabled_uses_toggle_endpoints() {
        let mut server = mockito::Server::new_async().await;
        let enable = server
            .mock("POST", "/enable_copy_setup")
            .match_body(mockito::Matcher::Json(json!({ "setup_id": "s1" })))
            .with_status(200)
            .create_async()
            .await;
        let disable = server
            .mock("POST", "/disable_copy_setup")
            .with_status(200)
            .create_async()
            .await;

        let store: RemoteStore<CopySetup> =
            RemoteStore::new(api(&server.url(), None), EndpointsConfig::default().copy_setups);
        store.set_enabled(&"s1".into(), true).await.unwrap();
        store.set_enabled(&"s1".into(), false).await.unwrap();
        enable.assert_async().await;
        disable.assert_async().await;
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_transport_error() {
        let store: RemoteStore<Group> = RemoteStore::new(
            api("http://127.0.0.1:9", None),
            EndpointsConfig::default().groups,
        );
        assert!(matches!(store.list().await, Err(RemoteError::Transport(_))));
    }
}
