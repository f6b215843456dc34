//! Credential exchange
//!
//! Turns a username/password (or delegated consumer key/secret) into a
//! verified [`Token`]. Each [`ExchangeSession`] performs exactly one attempt;
//! retrying means creating a new session. Nothing here retries on its own.
//!
//! # Example
//!
//! ```rust,ignore
//! let exchange = CredentialExchange::new(config, transport, Arc::new(SystemNonceSource));
//! let session = exchange.start(
//!     Credential::password("alice", "hunter2"),
//!     |result: Result<Token, ExchangeError>| println!("{:?}", result.is_ok()),
//! );
//! let token = session.outcome().await?;
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::ServiceConfig;
use crate::error::ExchangeError;
use crate::observer::CredentialObserver;
use crate::response::Reply;
use crate::signing::{NonceSource, RequestSigner, SignedRequestParameters};
use crate::token::Token;
use crate::transport::{TransportAdapter, TransportRequest};

/// `mode` value for a username/password exchange
const MODE_PASSWORD: &str = "client_auth";
/// `mode` value for a consumer-only exchange
const MODE_CONSUMER: &str = "consumer";

/// Input to a credential exchange; never stored beyond the session
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
    pub consumer_key: String,
    pub consumer_secret: String,
}

impl Credential {
    /// Username and password, signed with the application's own key
    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    /// Delegated consumer key and secret
    pub fn consumer(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            consumer_key: key.into(),
            consumer_secret: secret.into(),
            ..Self::default()
        }
    }

    /// Sign with a delegated consumer key/secret instead of the application's
    pub fn with_consumer(mut self, key: impl Into<String>, secret: impl Into<String>) -> Self {
        self.consumer_key = key.into();
        self.consumer_secret = secret.into();
        self
    }

    fn has_password(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }

    fn has_consumer(&self) -> bool {
        !self.consumer_key.is_empty() && !self.consumer_secret.is_empty()
    }

    /// Username+password or consumer key+secret present
    pub fn is_valid(&self) -> bool {
        self.has_password() || self.has_consumer()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("consumer_key", &self.consumer_key)
            .field("consumer_secret", &"<redacted>")
            .finish()
    }
}

/// Phase of a session, without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Requesting,
    Verified,
    Failed,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Requesting => write!(f, "requesting"),
            Self::Verified => write!(f, "verified"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// State of an exchange session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Requesting,
    Verified(Token),
    Failed(ExchangeError),
}

impl SessionState {
    pub fn phase(&self) -> SessionPhase {
        match self {
            Self::Idle => SessionPhase::Idle,
            Self::Requesting => SessionPhase::Requesting,
            Self::Verified(_) => SessionPhase::Verified,
            Self::Failed(_) => SessionPhase::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Verified(_) | Self::Failed(_))
    }
}

/// Result of starting a web authorization: the frob and the login page URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebAuthorization {
    pub frob: String,
    pub url: Url,
}

/// Performs credential exchanges against one service
#[derive(Clone)]
pub struct CredentialExchange {
    config: Arc<ServiceConfig>,
    transport: Arc<dyn TransportAdapter>,
    signer: RequestSigner,
}

impl fmt::Debug for CredentialExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialExchange")
            .field("base_url", &self.config.connection.base_url)
            .finish_non_exhaustive()
    }
}

impl CredentialExchange {
    pub fn new(
        config: Arc<ServiceConfig>,
        transport: Arc<dyn TransportAdapter>,
        nonces: Arc<dyn NonceSource>,
    ) -> Self {
        let signer = RequestSigner::new(Arc::clone(&config), nonces);
        Self {
            config,
            transport,
            signer,
        }
    }

    /// Create an idle session for a credential
    pub fn session(&self, credential: Credential) -> ExchangeSession {
        let (outcome_tx, _) = watch::channel(None);
        ExchangeSession {
            inner: Arc::new(SessionInner {
                exchange: self.clone(),
                credential,
                state: Mutex::new(SessionState::Idle),
                outcome_tx,
            }),
        }
    }

    /// Create a session and start it immediately
    pub fn start(
        &self,
        credential: Credential,
        observer: impl CredentialObserver + 'static,
    ) -> ExchangeSession {
        let session = self.session(credential);
        // A fresh session is always idle
        let _ = session.start(observer);
        session
    }

    /// Fetch a frob and build the login page URL the user must visit
    #[instrument(skip(self))]
    pub async fn begin_web_authorization(
        &self,
        perms: &str,
    ) -> Result<WebAuthorization, ExchangeError> {
        let fields = &self.config.fields;
        let signed = self
            .signer
            .sign(BTreeMap::new())
            .map_err(|_| ExchangeError::InvalidCredentialInput)?;
        let url = self.endpoint(&self.config.endpoints.frob)?;
        let request = TransportRequest::get(url, &self.signer.wire_pairs(&signed));

        let reply = self.round_trip(request).await?;
        check_reply(&self.config, &reply)?;
        let frob = reply.field(&self.config.response.frob).ok_or_else(|| {
            ExchangeError::InvalidResponse(format!(
                "missing '{}' in frob response",
                self.config.response.frob
            ))
        })?;

        let mut params = BTreeMap::new();
        params.insert(fields.frob.clone(), frob.clone());
        params.insert(fields.perms.clone(), perms.to_string());
        let signed = self
            .signer
            .sign(params)
            .map_err(|_| ExchangeError::InvalidCredentialInput)?;
        let mut url = self.endpoint(&self.config.endpoints.authorize)?;
        url.query_pairs_mut()
            .extend_pairs(self.signer.wire_pairs(&signed).iter());

        info!("Web authorization started");
        Ok(WebAuthorization { frob, url })
    }

    /// Exchange an authorized frob for a token
    #[instrument(skip(self, authorization))]
    pub async fn complete_web_authorization(
        &self,
        authorization: &WebAuthorization,
    ) -> Result<Token, ExchangeError> {
        let mut params = BTreeMap::new();
        params.insert(self.config.fields.frob.clone(), authorization.frob.clone());
        let signed = self
            .signer
            .sign(params)
            .map_err(|_| ExchangeError::InvalidCredentialInput)?;
        let url = self.endpoint(&self.config.endpoints.frob_token)?;
        let request = TransportRequest::get(url, &self.signer.wire_pairs(&signed));

        let reply = self.round_trip(request).await?;
        let token = token_from_reply(&self.config, &reply)?;
        info!("Web authorization completed");
        Ok(token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, ExchangeError> {
        self.config.endpoint_url(path).map_err(|e| {
            ExchangeError::InvalidResponse(format!("invalid endpoint '{}': {}", path, e))
        })
    }

    fn token_request(&self, credential: &Credential) -> Result<TransportRequest, ExchangeError> {
        let fields = &self.config.fields;
        let mut params = BTreeMap::new();
        if credential.has_password() {
            params.insert(fields.username.clone(), credential.username.clone());
            params.insert(fields.password.clone(), credential.password.clone());
            params.insert(fields.mode.clone(), MODE_PASSWORD.to_string());
        } else {
            params.insert(fields.mode.clone(), MODE_CONSUMER.to_string());
        }

        let signed: SignedRequestParameters = if credential.has_consumer() {
            self.signer
                .sign_as(params, &credential.consumer_key, &credential.consumer_secret)
        } else {
            self.signer.sign(params)
        }
        .map_err(|_| ExchangeError::InvalidCredentialInput)?;

        let url = self.endpoint(&self.config.endpoints.token)?;
        Ok(TransportRequest::post_form(url, &self.signer.wire_pairs(&signed)))
    }

    async fn round_trip(&self, request: TransportRequest) -> Result<Reply, ExchangeError> {
        let limit = Duration::from_millis(self.config.timeouts.exchange_ms);
        let call = self.transport.send_streaming(request);
        let handle = call.handle().clone();

        match tokio::time::timeout(limit, call.response()).await {
            Ok(Ok((status, body))) => Ok(Reply::new(status, &body)),
            Ok(Err(err)) => Err(ExchangeError::NetworkUnreachable(err.to_string())),
            Err(_) => {
                handle.cancel();
                Err(ExchangeError::NetworkUnreachable(format!(
                    "no response within {:?}",
                    limit
                )))
            }
        }
    }
}

/// Map a reply to the exchange error taxonomy; `Ok` means "no failure reported"
fn check_reply(config: &ServiceConfig, reply: &Reply) -> Result<(), ExchangeError> {
    if reply.status == 401 || reply.status == 403 {
        return Err(ExchangeError::Unauthorized(reply.message(&config.response)));
    }
    if let Some(failure) = reply.failure(&config.response) {
        let auth = failure
            .code
            .as_deref()
            .map(|code| config.is_auth_error_code(code))
            .unwrap_or(false);
        return Err(if auth {
            ExchangeError::Unauthorized(failure.message)
        } else {
            ExchangeError::Unknown {
                status: reply.status,
                message: match failure.code {
                    Some(code) => format!("{} (code {})", failure.message, code),
                    None => failure.message,
                },
            }
        });
    }
    if !reply.is_success() {
        return Err(ExchangeError::Unknown {
            status: reply.status,
            message: reply.message(&config.response),
        });
    }
    Ok(())
}

fn token_from_reply(config: &ServiceConfig, reply: &Reply) -> Result<Token, ExchangeError> {
    check_reply(config, reply)?;
    if !reply.is_json() {
        return Err(ExchangeError::InvalidResponse(
            "token response is not JSON".to_string(),
        ));
    }
    reply
        .field(&config.response.token)
        .map(Token::new)
        .ok_or_else(|| {
            ExchangeError::InvalidResponse(format!(
                "missing '{}' in token response",
                config.response.token
            ))
        })
}

struct SessionInner {
    exchange: CredentialExchange,
    credential: Credential,
    state: Mutex<SessionState>,
    outcome_tx: watch::Sender<Option<Result<Token, ExchangeError>>>,
}

impl SessionInner {
    /// Move from `Requesting` to a terminal state and report it once
    ///
    /// The observer hears about the result before `outcome()` resolves.
    fn resolve(&self, result: Result<Token, ExchangeError>, observer: &dyn CredentialObserver) {
        {
            let mut state = self.state.lock();
            if state.is_terminal() {
                return;
            }
            *state = match &result {
                Ok(token) => SessionState::Verified(token.clone()),
                Err(err) => SessionState::Failed(err.clone()),
            };
        }
        observer.on_credential_result(result.clone());
        self.outcome_tx.send_replace(Some(result));
    }
}

/// One credential exchange attempt
///
/// Clones share the same session.
#[derive(Clone)]
pub struct ExchangeSession {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for ExchangeSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeSession")
            .field("credential", &self.inner.credential)
            .field("state", &self.state().phase())
            .finish()
    }
}

impl ExchangeSession {
    /// Current state
    pub fn state(&self) -> SessionState {
        self.inner.state.lock().clone()
    }

    /// Start the exchange
    ///
    /// An invalid credential resolves the session to
    /// `Failed(InvalidCredentialInput)` before returning, without touching the
    /// network. Otherwise one request is sent on a spawned task, so this must
    /// be called from within a Tokio runtime. Calling `start` on a session
    /// that is not idle returns `InvalidState`.
    pub fn start(&self, observer: impl CredentialObserver + 'static) -> Result<(), ExchangeError> {
        {
            let mut state = self.inner.state.lock();
            if *state != SessionState::Idle {
                return Err(ExchangeError::InvalidState(state.phase()));
            }
            *state = SessionState::Requesting;
        }

        let inner = Arc::clone(&self.inner);
        let request = if inner.credential.is_valid() {
            inner.exchange.token_request(&inner.credential)
        } else {
            Err(ExchangeError::InvalidCredentialInput)
        };

        let request = match request {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, "Credential rejected before exchange");
                inner.resolve(Err(err), &observer);
                return Ok(());
            }
        };

        debug!(username = %inner.credential.username, "Requesting token");
        tokio::spawn(async move {
            let result = match inner.exchange.round_trip(request).await {
                Ok(reply) => token_from_reply(&inner.exchange.config, &reply),
                Err(err) => Err(err),
            };
            match &result {
                Ok(_) => info!("Credential exchange verified"),
                Err(err) => warn!(error = %err, "Credential exchange failed"),
            }
            inner.resolve(result, &observer);
        });
        Ok(())
    }

    /// Wait for the terminal result
    ///
    /// Resolves immediately when the session already finished. Never resolves
    /// for a session that was never started.
    pub async fn outcome(&self) -> Result<Token, ExchangeError> {
        let mut rx = self.inner.outcome_tx.subscribe();
        loop {
            if let Some(result) = rx.borrow_and_update().clone() {
                return result;
            }
            if rx.changed().await.is_err() {
                return Err(ExchangeError::InvalidState(self.state().phase()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::SystemNonceSource;
    use crate::transport::{MockResponse, MockTransport, TransportError};
    use serde_json::json;

    fn setup() -> (CredentialExchange, MockTransport) {
        let config = ServiceConfig::builder("http://mock.local")
            .api_credentials("app-key", "app-secret")
            .exchange_timeout_ms(200)
            .build();
        let mock = MockTransport::new();
        let exchange = CredentialExchange::new(
            Arc::new(config),
            Arc::new(mock.clone()),
            Arc::new(SystemNonceSource),
        );
        (exchange, mock)
    }

    #[test]
    fn test_credential_validation() {
        assert!(Credential::password("a", "b").is_valid());
        assert!(Credential::consumer("k", "s").is_valid());
        assert!(!Credential::password("", "").is_valid());
        assert!(!Credential::password("a", "").is_valid());
        assert!(!Credential::consumer("k", "").is_valid());
        assert!(!format!("{:?}", Credential::password("a", "pw")).contains("pw"));
    }

    #[tokio::test]
    async fn test_invalid_credential_resolves_without_network() {
        let (exchange, mock) = setup();
        let session = exchange.session(Credential::password("", ""));
        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&calls);

        session
            .start(move |r: Result<Token, ExchangeError>| seen.lock().push(r))
            .unwrap();

        assert_eq!(
            session.state(),
            SessionState::Failed(ExchangeError::InvalidCredentialInput)
        );
        assert_eq!(
            *calls.lock(),
            vec![Err(ExchangeError::InvalidCredentialInput)]
        );
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_second_start_is_invalid_state() {
        let (exchange, mock) = setup();
        mock.add_response("/auth/token", MockResponse::ok_json(json!({"token": "t"})));

        let session = exchange.start(Credential::password("a", "b"), crate::NoopObserver);
        let err = session.start(crate::NoopObserver).unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidState(_)));

        session.outcome().await.unwrap();
        assert_eq!(
            session.start(crate::NoopObserver),
            Err(ExchangeError::InvalidState(SessionPhase::Verified))
        );
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_password_request_shape() {
        let (exchange, mock) = setup();
        mock.add_response("/auth/token", MockResponse::ok_json(json!({"token": "t"})));

        let session = exchange.start(Credential::password("alice", "pw"), crate::NoopObserver);
        session.outcome().await.unwrap();

        let params = mock.requests()[0].form_params();
        assert_eq!(params["username"], "alice");
        assert_eq!(params["password"], "pw");
        assert_eq!(params["mode"], MODE_PASSWORD);
        assert_eq!(params["api_key"], "app-key");
        assert!(params.contains_key("nonce"));
        assert_eq!(params["api_sig"].len(), 32);
    }

    #[tokio::test]
    async fn test_consumer_credential_signs_with_consumer_key() {
        let (exchange, mock) = setup();
        mock.add_response("/auth/token", MockResponse::ok_json(json!({"token": "t"})));

        let session = exchange.start(Credential::consumer("ck", "cs"), crate::NoopObserver);
        session.outcome().await.unwrap();

        let mut params = mock.requests()[0].form_params();
        assert_eq!(params["api_key"], "ck");
        assert_eq!(params["mode"], MODE_CONSUMER);

        let signature = params.remove("api_sig").unwrap();
        let scheme = crate::signing::SigningScheme::default();
        assert_eq!(scheme.signature(&params, "cs").unwrap(), signature);
    }

    #[tokio::test]
    async fn test_failure_classification() {
        let cases = vec![
            (
                MockResponse::json(401, json!({"message": "bad password"})),
                ExchangeError::Unauthorized("bad password".into()),
            ),
            (
                MockResponse::ok_json(json!({"code": 98, "message": "Login failed"})),
                ExchangeError::Unauthorized("Login failed".into()),
            ),
            (
                MockResponse::ok_json(json!({"something": "else"})),
                ExchangeError::InvalidResponse("missing 'token' in token response".into()),
            ),
            (
                MockResponse::text(200, "<html>"),
                ExchangeError::InvalidResponse("token response is not JSON".into()),
            ),
            (
                MockResponse::text(503, "down for maintenance"),
                ExchangeError::Unknown {
                    status: 503,
                    message: "down for maintenance".into(),
                },
            ),
            (
                MockResponse::error(TransportError::ConnectionFailed("refused".into())),
                ExchangeError::NetworkUnreachable("Connection failed: refused".into()),
            ),
        ];

        for (response, expected) in cases {
            let (exchange, mock) = setup();
            mock.add_response("/auth/token", response);
            let session = exchange.start(Credential::password("a", "b"), crate::NoopObserver);
            assert_eq!(session.outcome().await, Err(expected.clone()));
            assert_eq!(session.state(), SessionState::Failed(expected));
        }
    }

    #[tokio::test]
    async fn test_malformed_endpoint_is_not_retryable() {
        let config = ServiceConfig::builder("not a url")
            .api_credentials("app-key", "app-secret")
            .build();
        let mock = MockTransport::new();
        let exchange = CredentialExchange::new(
            Arc::new(config),
            Arc::new(mock.clone()),
            Arc::new(SystemNonceSource),
        );

        let session = exchange.start(Credential::password("a", "b"), crate::NoopObserver);
        let err = session.outcome().await.unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidResponse(_)));
        assert!(!err.is_retryable());
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_exchange_timeout() {
        let (exchange, mock) = setup();
        mock.add_response("/auth/token", MockResponse::stalled());

        let session = exchange.start(Credential::password("a", "b"), crate::NoopObserver);
        let err = session.outcome().await.unwrap_err();
        assert!(matches!(err, ExchangeError::NetworkUnreachable(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_web_authorization_flow() {
        let (exchange, mock) = setup();
        mock.add_response("/auth/frob", MockResponse::ok_json(json!({"frob": "f-1"})));
        mock.add_response(
            "/auth/frob/token",
            MockResponse::ok_json(json!({"token": "web-token"})),
        );

        let auth = exchange.begin_web_authorization("write").await.unwrap();
        assert_eq!(auth.frob, "f-1");
        assert_eq!(auth.url.path(), "/auth");
        let query: BTreeMap<String, String> = auth.url.query_pairs().into_owned().collect();
        assert_eq!(query["frob"], "f-1");
        assert_eq!(query["perms"], "write");
        assert!(query.contains_key("api_sig"));

        let token = exchange.complete_web_authorization(&auth).await.unwrap();
        assert_eq!(token.value(), "web-token");

        let requests = mock.requests();
        assert_eq!(requests[1].query_params()["frob"], "f-1");
    }
}
