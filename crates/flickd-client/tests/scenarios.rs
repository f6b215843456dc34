//! Behavioural scenarios over the mock transport
//!
//! Each test drives the public API the way a presentation layer would: it
//! hands in an observer, then checks exactly which callbacks arrived and in
//! what order.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;

use flickd_client::testing::CountingNonceSource;
use flickd_client::transport::{MockResponse, MockTransport};
use flickd_client::{
    Credential, CredentialObserver, ExchangeError, FlickdClient, JobState, ServiceConfig,
    SessionState, Token, UploadError, UploadJob, UploadObserver,
};

// =============================================================================
// Recording observers
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Progress(f64),
    Result(Result<String, UploadError>),
}

/// Records every upload callback in arrival order
#[derive(Clone, Default)]
struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
    on_first_progress: Arc<Mutex<Option<Box<dyn FnOnce() + Send>>>>,
}

impl Recorder {
    fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    fn progress(&self) -> Vec<f64> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Progress(p) => Some(p),
                Event::Result(_) => None,
            })
            .collect()
    }

    fn results(&self) -> Vec<Result<String, UploadError>> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Result(r) => Some(r),
                Event::Progress(_) => None,
            })
            .collect()
    }
}

impl UploadObserver for Recorder {
    fn on_upload_progress(&self, fraction: f64) {
        self.events.lock().push(Event::Progress(fraction));
        let hook = self.on_first_progress.lock().take();
        if let Some(hook) = hook {
            hook();
        }
    }

    fn on_upload_result(&self, result: Result<String, UploadError>) {
        self.events.lock().push(Event::Result(result));
    }
}

#[derive(Clone, Default)]
struct CredentialRecorder {
    results: Arc<Mutex<Vec<Result<Token, ExchangeError>>>>,
}

impl CredentialObserver for CredentialRecorder {
    fn on_credential_result(&self, result: Result<Token, ExchangeError>) {
        self.results.lock().push(result);
    }
}

fn client() -> (FlickdClient, MockTransport) {
    let config = ServiceConfig::builder("http://mock.local")
        .api_credentials("app-key", "app-secret")
        .build();
    let mock = MockTransport::new();
    let client = FlickdClient::with_transport(
        config,
        Arc::new(mock.clone()),
        Arc::new(CountingNonceSource::new(1_700_000_000)),
    );
    (client, mock)
}

fn title_job() -> UploadJob {
    UploadJob::builder(vec![0xFFu8, 0xD8, 0xFF, 0xE0, 1, 2, 3, 4], Token::new("tok123"))
        .title("x")
        .build()
}

// =============================================================================
// Credential exchange
// =============================================================================

#[tokio::test]
async fn test_exchange_delivers_token() {
    let (client, mock) = client();
    mock.add_response("/auth/token", MockResponse::ok_json(json!({"token": "tok123"})));
    let recorder = CredentialRecorder::default();

    let session = client
        .exchange()
        .start(Credential::password("a", "b"), recorder.clone());
    let token = session.outcome().await.unwrap();

    assert_eq!(token.value(), "tok123");
    let results = recorder.results.lock().clone();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].as_ref().map(Token::value), Ok("tok123"));
    assert!(matches!(session.state(), SessionState::Verified(_)));
}

#[tokio::test]
async fn test_empty_credential_fails_without_network() {
    let (client, mock) = client();
    let recorder = CredentialRecorder::default();

    let session = client
        .exchange()
        .start(Credential::password("", ""), recorder.clone());

    // Resolved before start() returned
    assert_eq!(
        *recorder.results.lock(),
        vec![Err(ExchangeError::InvalidCredentialInput)]
    );
    assert_eq!(
        session.state(),
        SessionState::Failed(ExchangeError::InvalidCredentialInput)
    );
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test]
async fn test_network_loss_is_retryable_with_new_session() {
    let (client, mock) = client();
    mock.add_response("/auth/token", MockResponse::ok_json(json!({"token": "tok123"})));
    mock.set_reachable(false);

    let first = client
        .exchange()
        .start(Credential::password("a", "b"), flickd_client::NoopObserver);
    let err = first.outcome().await.unwrap_err();
    assert!(err.is_retryable());

    mock.set_reachable(true);
    let second = client
        .exchange()
        .start(Credential::password("a", "b"), flickd_client::NoopObserver);
    assert_eq!(second.outcome().await.unwrap().value(), "tok123");
    assert_eq!(mock.call_count(), 2);
}

// =============================================================================
// Upload
// =============================================================================

#[tokio::test]
async fn test_upload_progress_then_media_id() {
    let (client, mock) = client();
    mock.add_response(
        "/upload",
        MockResponse::ok_json(json!({"id": "987"})).with_progress(vec![0.1, 0.5, 1.0]),
    );
    let recorder = Recorder::default();

    let handle = client.uploads().submit(title_job(), recorder.clone());
    assert_eq!(handle.outcome().await, Ok("987".to_string()));

    assert_eq!(
        recorder.events(),
        vec![
            Event::Progress(0.1),
            Event::Progress(0.5),
            Event::Progress(1.0),
            Event::Result(Ok("987".to_string())),
        ]
    );
    assert_eq!(handle.state(), JobState::Completed("987".into()));
}

#[tokio::test]
async fn test_cancel_after_first_progress() {
    let (client, mock) = client();
    mock.add_response(
        "/upload",
        MockResponse::ok_json(json!({"id": "987"}))
            .with_progress(vec![0.1, 0.5, 1.0])
            .with_step_delay(Duration::from_millis(50)),
    );
    let recorder = Recorder::default();

    let handle = client.uploads().submit(title_job(), recorder.clone());
    let canceller = handle.clone();
    *recorder.on_first_progress.lock() = Some(Box::new(move || canceller.cancel()));

    assert_eq!(handle.outcome().await, Err(UploadError::Cancelled));

    // Let the mock's remaining steps elapse; nothing more may arrive
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(
        recorder.events(),
        vec![Event::Progress(0.1), Event::Result(Err(UploadError::Cancelled))]
    );
    assert_eq!(handle.state(), JobState::Cancelled);
}

#[tokio::test]
async fn test_cancel_from_another_task() {
    let (client, mock) = client();
    mock.add_response(
        "/upload",
        MockResponse::ok_json(json!({"id": "987"}))
            .with_progress(vec![0.1, 0.5])
            .with_step_delay(Duration::from_millis(100)),
    );
    let recorder = Recorder::default();
    let handle = client.uploads().submit(title_job(), recorder.clone());

    let mut progress = handle.progress();
    progress.changed().await.unwrap();
    let canceller = handle.clone();
    tokio::spawn(async move { canceller.cancel() }).await.unwrap();

    assert_eq!(handle.outcome().await, Err(UploadError::Cancelled));
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(recorder.results(), vec![Err(UploadError::Cancelled)]);
    assert!(recorder.progress().iter().all(|p| *p <= 0.5));
}

#[tokio::test]
async fn test_expired_token_requires_reauthorization() {
    let (client, mock) = client();
    mock.add_response(
        "/upload",
        MockResponse::ok_json(json!({"stat": "fail", "code": 98, "message": "Invalid auth token"})),
    );
    let recorder = Recorder::default();

    let err = client
        .uploads()
        .submit(title_job(), recorder.clone())
        .outcome()
        .await
        .unwrap_err();

    assert!(err.requires_reauthorization());
    assert_eq!(recorder.results(), vec![Err(err)]);
}

#[tokio::test]
async fn test_dropped_connection_is_transient() {
    let (client, mock) = client();
    mock.add_response(
        "/upload",
        MockResponse::error(flickd_client::transport::TransportError::ConnectionClosed)
            .with_progress(vec![0.4]),
    );
    let recorder = Recorder::default();

    let err = client
        .uploads()
        .submit(title_job(), recorder.clone())
        .outcome()
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(recorder.progress(), vec![0.4]);
}

#[tokio::test]
async fn test_concurrent_jobs_do_not_share_nonces() {
    let (client, mock) = client();
    mock.set_fallback(MockResponse::ok_json(json!({"id": "1"})));

    let token = Token::new("tok123");
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let job = UploadJob::builder(vec![i as u8; 16], token.clone())
                .title(format!("photo {}", i))
                .build();
            client.uploads().submit(job, flickd_client::NoopObserver)
        })
        .collect();
    for handle in &handles {
        handle.outcome().await.unwrap();
    }

    let mut boundaries: Vec<String> = mock
        .requests()
        .iter()
        .filter_map(|r| r.header("content-type").map(str::to_string))
        .collect();
    boundaries.sort();
    boundaries.dedup();
    assert_eq!(boundaries.len(), 4);

    let mut nonces: Vec<String> = mock
        .requests()
        .iter()
        .map(|r| {
            let body = String::from_utf8_lossy(&r.body).into_owned();
            let start = body.find("name=\"nonce\"\r\n\r\n").unwrap() + "name=\"nonce\"\r\n\r\n".len();
            body[start..].split("\r\n").next().unwrap().to_string()
        })
        .collect();
    nonces.sort();
    nonces.dedup();
    assert_eq!(nonces.len(), 4);
}

#[tokio::test]
async fn test_progress_stream_ends_at_one() {
    use futures::StreamExt;

    let (client, mock) = client();
    mock.add_response(
        "/upload",
        MockResponse::ok_json(json!({"id": "5"}))
            .with_progress(vec![0.25, 0.75])
            .with_step_delay(Duration::from_millis(20)),
    );

    let handle = client.uploads().submit(title_job(), flickd_client::NoopObserver);
    let mut stream = handle.progress_stream();
    let mut seen = Vec::new();
    while let Some(fraction) = stream.next().await {
        seen.push(fraction);
        if fraction >= 1.0 {
            break;
        }
    }

    assert_eq!(seen.first(), Some(&0.0));
    assert_eq!(seen.last(), Some(&1.0));
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(handle.outcome().await, Ok("5".to_string()));
}
