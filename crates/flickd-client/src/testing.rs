//! Test utilities for flickd-client
//!
//! [`TestServer`] runs a fake photo service on a loopback port. It speaks the
//! same configurable protocol as the clients and recomputes the signature of
//! every request it receives, so end-to-end tests exercise the real
//! [`HttpTransport`] and the real signing path.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;

use crate::config::ServiceConfig;
use crate::error::Result;
use crate::exchange::CredentialExchange;
use crate::signing::{NonceSource, SignedRequestParameters, SystemNonceSource};
use crate::transport::HttpTransport;
use crate::upload::UploadClient;

/// Application key the default test configuration signs with
pub const TEST_API_KEY: &str = "test-key";
/// Application secret the default test configuration signs with
pub const TEST_API_SECRET: &str = "test-secret";
/// Account registered with the default fake service
pub const TEST_USERNAME: &str = "alice";
pub const TEST_PASSWORD: &str = "wonderland";

/// Deterministic nonces (`nonce-1`, `nonce-2`, ...) and a fixed timestamp
#[derive(Debug, Default)]
pub struct CountingNonceSource {
    next: AtomicU64,
    timestamp: i64,
}

impl CountingNonceSource {
    pub fn new(timestamp: i64) -> Self {
        Self {
            next: AtomicU64::new(0),
            timestamp,
        }
    }

    /// Nonces handed out so far
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }
}

impl NonceSource for CountingNonceSource {
    fn nonce(&self) -> String {
        format!("nonce-{}", self.next.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

/// An upload as received by the fake service
#[derive(Debug, Clone)]
pub struct ReceivedUpload {
    pub id: String,
    pub fields: BTreeMap<String, String>,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

#[derive(Default)]
struct ServiceData {
    users: HashMap<String, String>,
    consumers: HashMap<String, String>,
    tokens: HashSet<String>,
    frobs: HashMap<String, bool>,
    nonces: HashSet<String>,
    uploads: Vec<ReceivedUpload>,
    next_id: u64,
}

type Reply = (StatusCode, Json<Value>);

/// In-memory photo service speaking the configured protocol
#[derive(Clone)]
pub struct FakePhotoService {
    config: Arc<ServiceConfig>,
    data: Arc<Mutex<ServiceData>>,
}

impl FakePhotoService {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config: Arc::new(config),
            data: Arc::new(Mutex::new(ServiceData {
                next_id: 1000,
                ..ServiceData::default()
            })),
        }
    }

    /// Register an account for password exchanges
    pub fn add_user(&self, username: &str, password: &str) {
        self.data
            .lock()
            .users
            .insert(username.to_string(), password.to_string());
    }

    /// Register a delegated consumer key
    pub fn add_consumer(&self, key: &str, secret: &str) {
        self.data
            .lock()
            .consumers
            .insert(key.to_string(), secret.to_string());
    }

    /// Issue a token directly, as if an earlier exchange had succeeded
    pub fn issue_token(&self) -> String {
        let token = format!("tok-{}", uuid::Uuid::new_v4().simple());
        self.data.lock().tokens.insert(token.clone());
        token
    }

    /// Invalidate a token
    pub fn revoke_token(&self, token: &str) {
        self.data.lock().tokens.remove(token);
    }

    /// Approve a frob, as the user would on the login page
    pub fn approve_frob(&self, frob: &str) {
        if let Some(approved) = self.data.lock().frobs.get_mut(frob) {
            *approved = true;
        }
    }

    /// Uploads received so far
    pub fn uploads(&self) -> Vec<ReceivedUpload> {
        self.data.lock().uploads.clone()
    }

    /// Axum router serving the configured endpoints
    pub fn router(&self) -> Router {
        let endpoints = &self.config.endpoints;
        Router::new()
            .route(&endpoints.token, post(token_handler))
            .route(&endpoints.check_token, get(check_handler))
            .route(&endpoints.frob, get(frob_handler))
            .route(&endpoints.frob_token, get(frob_token_handler))
            .route(&endpoints.upload, post(upload_handler))
            .layer(DefaultBodyLimit::max(64 * 1024 * 1024))
            .with_state(self.clone())
    }

    fn failure(&self, status: StatusCode, code: u32, message: &str) -> Reply {
        let fields = &self.config.response;
        let mut body = Value::Object(Map::new());
        if let Some(status_path) = &fields.status {
            insert_path(&mut body, status_path, json!("fail"));
        }
        insert_path(&mut body, &fields.error_code, json!(code));
        insert_path(&mut body, &fields.error_message, json!(message));
        (status, Json(body))
    }

    fn success(&self, path: &str, value: &str) -> Reply {
        let mut body = Value::Object(Map::new());
        if let Some(status_path) = &self.config.response.status {
            insert_path(&mut body, status_path, json!(self.config.response.status_ok));
        }
        insert_path(&mut body, path, json!(value));
        (StatusCode::OK, Json(body))
    }

    /// Check the signature and nonce of a request; returns the signed parameters
    fn authenticate(
        &self,
        params: BTreeMap<String, String>,
    ) -> std::result::Result<BTreeMap<String, String>, Reply> {
        let fields = &self.config.fields;
        let signed = SignedRequestParameters::from_wire(params, &fields.signature)
            .ok_or_else(|| self.failure(StatusCode::OK, 97, "Missing signature"))?;

        let key = signed.get(&fields.api_key).unwrap_or_default();
        let secret = if key == self.config.connection.api_key {
            self.config.api_secret().to_string()
        } else {
            self.data
                .lock()
                .consumers
                .get(key)
                .cloned()
                .ok_or_else(|| self.failure(StatusCode::OK, 100, "Invalid API Key"))?
        };

        if !signed.verify(&secret, &self.config.signing) {
            return Err(self.failure(StatusCode::OK, 96, "Invalid signature"));
        }

        if let Some(nonce) = signed.get(&fields.nonce) {
            if !self.data.lock().nonces.insert(nonce.to_string()) {
                return Err(self.failure(StatusCode::OK, 96, "Nonce already used"));
            }
        }

        Ok(signed.params().clone())
    }

    fn check_token(
        &self,
        params: &BTreeMap<String, String>,
    ) -> std::result::Result<(), Reply> {
        let token = params
            .get(&self.config.fields.auth_token)
            .map(String::as_str)
            .unwrap_or_default();
        if self.data.lock().tokens.contains(token) {
            Ok(())
        } else {
            Err(self.failure(StatusCode::OK, 98, "Invalid auth token"))
        }
    }
}

/// Insert `value` at a dotted path, creating intermediate objects
fn insert_path(target: &mut Value, path: &str, value: Value) {
    let mut current = target;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        let Value::Object(map) = current else {
            return;
        };
        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return;
        }
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

async fn token_handler(
    State(service): State<FakePhotoService>,
    Form(params): Form<BTreeMap<String, String>>,
) -> Reply {
    let params = match service.authenticate(params) {
        Ok(params) => params,
        Err(reply) => return reply,
    };
    let fields = &service.config.fields;

    if let Some(username) = params.get(&fields.username) {
        let password = params.get(&fields.password).cloned().unwrap_or_default();
        let known = service.data.lock().users.get(username).cloned();
        if known.as_deref() != Some(password.as_str()) {
            return service.failure(StatusCode::UNAUTHORIZED, 98, "Login failed");
        }
    }

    let token = service.issue_token();
    service.success(&service.config.response.token, &token)
}

async fn check_handler(
    State(service): State<FakePhotoService>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Reply {
    let params = match service.authenticate(params) {
        Ok(params) => params,
        Err(reply) => return reply,
    };
    if let Err(reply) = service.check_token(&params) {
        return reply;
    }
    let token = params
        .get(&service.config.fields.auth_token)
        .cloned()
        .unwrap_or_default();
    service.success(&service.config.response.token, &token)
}

async fn frob_handler(
    State(service): State<FakePhotoService>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Reply {
    if let Err(reply) = service.authenticate(params) {
        return reply;
    }
    let frob = format!("frob-{}", uuid::Uuid::new_v4().simple());
    service.data.lock().frobs.insert(frob.clone(), false);
    service.success(&service.config.response.frob, &frob)
}

async fn frob_token_handler(
    State(service): State<FakePhotoService>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Reply {
    let params = match service.authenticate(params) {
        Ok(params) => params,
        Err(reply) => return reply,
    };
    let frob = params
        .get(&service.config.fields.frob)
        .cloned()
        .unwrap_or_default();
    let approved = service.data.lock().frobs.remove(&frob);
    match approved {
        Some(true) => {
            let token = service.issue_token();
            service.success(&service.config.response.token, &token)
        }
        _ => service.failure(StatusCode::OK, 108, "Invalid frob"),
    }
}

async fn upload_handler(
    State(service): State<FakePhotoService>,
    mut multipart: Multipart,
) -> Reply {
    let mut fields = BTreeMap::new();
    let mut media = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                return service.failure(StatusCode::BAD_REQUEST, 4, &err.body_text());
            }
        };
        let name = field.name().unwrap_or_default().to_string();
        if name == service.config.fields.media {
            let filename = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);
            match field.bytes().await {
                Ok(data) => media = Some((filename, content_type, data)),
                Err(err) => {
                    return service.failure(StatusCode::BAD_REQUEST, 4, &err.body_text());
                }
            }
        } else {
            match field.text().await {
                Ok(value) => {
                    fields.insert(name, value);
                }
                Err(err) => {
                    return service.failure(StatusCode::BAD_REQUEST, 4, &err.body_text());
                }
            }
        }
    }

    let fields = match service.authenticate(fields) {
        Ok(fields) => fields,
        Err(reply) => return reply,
    };
    if let Err(reply) = service.check_token(&fields) {
        return reply;
    }
    let Some((filename, content_type, data)) = media else {
        return service.failure(StatusCode::OK, 2, "No photo specified");
    };
    if data.is_empty() {
        return service.failure(StatusCode::OK, 3, "General upload failure");
    }

    let id = {
        let mut store = service.data.lock();
        store.next_id += 1;
        let id = store.next_id.to_string();
        store.uploads.push(ReceivedUpload {
            id: id.clone(),
            fields,
            filename,
            content_type,
            data,
        });
        id
    };
    service.success(&service.config.response.media_id, &id)
}

/// A fake service on a loopback port that shuts down when dropped
pub struct TestServer {
    pub addr: SocketAddr,
    pub service: FakePhotoService,
    config: ServiceConfig,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    /// Start with the default test credentials and one registered user
    pub async fn start() -> Result<Self> {
        let config = ServiceConfig::builder("http://127.0.0.1")
            .api_credentials(TEST_API_KEY, TEST_API_SECRET)
            .build();
        Self::start_with_config(config).await
    }

    /// Start a service for `config`; its `base_url` is replaced by the bound address
    ///
    /// # Example
    ///
    /// ```ignore
    /// use flickd_client::testing::TestServer;
    ///
    /// let server = TestServer::start().await?;
    /// let exchange = server.exchange()?;
    /// ```
    pub async fn start_with_config(mut config: ServiceConfig) -> Result<Self> {
        // Bind to any available port
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        config.connection.base_url = format!("http://{}", addr);

        let service = FakePhotoService::new(config.clone());
        service.add_user(TEST_USERNAME, TEST_PASSWORD);
        let router = service.router();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        // Give server a moment to start
        tokio::time::sleep(Duration::from_millis(10)).await;

        Ok(Self {
            addr,
            service,
            config,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Get the base URL of the test server
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Client configuration pointing at this server
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Credential exchange over HTTP against this server
    pub fn exchange(&self) -> Result<CredentialExchange> {
        let transport = HttpTransport::new(&self.config.timeouts)?;
        Ok(CredentialExchange::new(
            Arc::new(self.config.clone()),
            Arc::new(transport),
            Arc::new(SystemNonceSource),
        ))
    }

    /// Upload client over HTTP against this server
    pub fn upload_client(&self) -> Result<UploadClient> {
        let transport = HttpTransport::new(&self.config.timeouts)?;
        Ok(UploadClient::new(
            Arc::new(self.config.clone()),
            Arc::new(transport),
            Arc::new(SystemNonceSource),
        ))
    }

    /// Shutdown the server gracefully
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Wait for a condition with timeout
pub async fn wait_for<F, Fut>(condition: F, timeout: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;

    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_path() {
        let mut value = Value::Object(Map::new());
        insert_path(&mut value, "photoid._content", json!("7"));
        insert_path(&mut value, "stat", json!("ok"));
        assert_eq!(value, json!({"photoid": {"_content": "7"}, "stat": "ok"}));
    }

    #[test]
    fn test_counting_nonces() {
        let nonces = CountingNonceSource::new(1_700_000_000);
        assert_eq!(nonces.nonce(), "nonce-1");
        assert_eq!(nonces.nonce(), "nonce-2");
        assert_eq!(nonces.timestamp(), 1_700_000_000);
        assert_eq!(nonces.issued(), 2);
    }

    #[tokio::test]
    async fn test_server_rejects_bad_signature() {
        let server = TestServer::start().await.unwrap();
        let url = format!("{}/auth/check?auth_token=x&api_key={}&api_sig=bad", server.base_url(), TEST_API_KEY);
        let body: Value = reqwest::get(url).await.unwrap().json().await.unwrap();
        assert_eq!(body["code"], json!(96));
    }
}
