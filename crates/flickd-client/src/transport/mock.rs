//! Mock transport adapter for testing

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use reqwest::Method;
use url::Url;

use super::adapter::{EventSink, RequestBody, TransferHandle, TransportCall, TransportRequest};
use super::{TransportAdapter, TransportError};

/// How a scripted request ends
#[derive(Debug, Clone)]
pub enum MockOutcome {
    Complete { status: u16, body: Bytes },
    Fail(TransportError),
    /// Never finishes (for timeout and cancellation tests)
    Stall,
}

/// Scripted reply to one request
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub progress: Vec<f64>,
    pub step_delay: Duration,
    pub outcome: MockOutcome,
}

impl MockResponse {
    /// Reply with a status and a JSON body
    pub fn json(status: u16, body: serde_json::Value) -> Self {
        Self::text(status, body.to_string())
    }

    /// 200 with a JSON body
    pub fn ok_json(body: serde_json::Value) -> Self {
        Self::json(200, body)
    }

    /// Reply with a status and a raw body
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            progress: Vec::new(),
            step_delay: Duration::ZERO,
            outcome: MockOutcome::Complete {
                status,
                body: Bytes::from(body.into()),
            },
        }
    }

    /// Fail at the transport level
    pub fn error(error: TransportError) -> Self {
        Self {
            progress: Vec::new(),
            step_delay: Duration::ZERO,
            outcome: MockOutcome::Fail(error),
        }
    }

    /// Never answer
    pub fn stalled() -> Self {
        Self {
            progress: Vec::new(),
            step_delay: Duration::ZERO,
            outcome: MockOutcome::Stall,
        }
    }

    /// Report these progress fractions before the outcome
    pub fn with_progress(mut self, progress: Vec<f64>) -> Self {
        self.progress = progress;
        self
    }

    /// Sleep this long before each progress event and before the outcome
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }
}

/// A request as seen by the mock, with its body fully drained
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl RecordedRequest {
    /// First header with this name (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Query string parameters
    pub fn query_params(&self) -> BTreeMap<String, String> {
        self.url.query_pairs().into_owned().collect()
    }

    /// Form-encoded body parameters
    pub fn form_params(&self) -> BTreeMap<String, String> {
        url::form_urlencoded::parse(&self.body).into_owned().collect()
    }
}

struct MockState {
    reachable: AtomicBool,
    calls: AtomicUsize,
    responses: RwLock<HashMap<String, VecDeque<MockResponse>>>,
    fallback: RwLock<Option<MockResponse>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

/// Mock transport adapter for testing
///
/// Replies are scripted per URL path and consumed in order; the last reply
/// scripted for a path is reused once the queue runs dry.
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<MockState>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(MockState {
                reachable: AtomicBool::new(true),
                calls: AtomicUsize::new(0),
                responses: RwLock::new(HashMap::new()),
                fallback: RwLock::new(None),
                requests: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Script a reply for requests to `path`
    pub fn add_response(&self, path: &str, response: MockResponse) {
        self.state
            .responses
            .write()
            .entry(path.to_string())
            .or_default()
            .push_back(response);
    }

    /// Reply used when nothing is scripted for a path
    pub fn set_fallback(&self, response: MockResponse) {
        *self.state.fallback.write() = Some(response);
    }

    /// Simulate loss of connectivity
    pub fn set_reachable(&self, reachable: bool) {
        self.state.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Number of requests handed to this transport
    pub fn call_count(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    /// Requests whose bodies have been drained so far
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().clone()
    }

    fn next_response(&self, path: &str) -> Option<MockResponse> {
        let mut responses = self.state.responses.write();
        if let Some(queue) = responses.get_mut(path) {
            if queue.len() > 1 {
                return queue.pop_front();
            }
            if let Some(last) = queue.front() {
                return Some(last.clone());
            }
        }
        self.state.fallback.read().clone()
    }
}

async fn drain(body: RequestBody) -> Bytes {
    match body {
        RequestBody::Empty => Bytes::new(),
        RequestBody::Bytes(bytes) => bytes,
        RequestBody::Stream { mut frames, length } => {
            let mut buf = BytesMut::with_capacity(length as usize);
            while let Some(frame) = frames.next().await {
                buf.extend_from_slice(&frame);
            }
            buf.freeze()
        }
    }
}

impl TransportAdapter for MockTransport {
    fn send_streaming(&self, request: TransportRequest) -> TransportCall {
        self.state.calls.fetch_add(1, Ordering::SeqCst);

        if !self.state.reachable.load(Ordering::SeqCst) {
            return TransportCall::failed(TransportError::ConnectionFailed(
                "Mock transport unreachable".to_string(),
            ));
        }

        let response = self.next_response(request.url.path());
        let state = Arc::clone(&self.state);
        let (sink, events) = EventSink::channel();

        let task = tokio::spawn(async move {
            let TransportRequest {
                method,
                url,
                headers,
                body,
            } = request;
            let body = drain(body).await;
            tracing::debug!(%method, %url, bytes = body.len(), "Mock transport: request received");
            state.requests.lock().push(RecordedRequest {
                method,
                url,
                headers,
                body,
            });

            let Some(response) = response else {
                sink.fail(TransportError::ReceiveFailed(
                    "No mock response configured".to_string(),
                ));
                return;
            };

            for fraction in response.progress {
                if !response.step_delay.is_zero() {
                    tokio::time::sleep(response.step_delay).await;
                }
                sink.progress(fraction);
            }
            if !response.step_delay.is_zero() {
                tokio::time::sleep(response.step_delay).await;
            }

            match response.outcome {
                MockOutcome::Complete { status, body } => sink.complete(status, body),
                MockOutcome::Fail(err) => sink.fail(err),
                MockOutcome::Stall => futures::future::pending::<()>().await,
            }
        });

        TransportCall::new(events, TransferHandle::new(task.abort_handle()))
    }
}
