//! Transport adapter trait and types

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use reqwest::Method;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use url::Url;

use super::TransportError;

/// Request body
pub enum RequestBody {
    /// No body
    Empty,
    /// Small body held in memory
    Bytes(Bytes),
    /// Body produced frame by frame; `length` is the exact total byte count
    Stream {
        frames: BoxStream<'static, Bytes>,
        length: u64,
    },
}

impl RequestBody {
    /// Total body length in bytes
    pub fn len(&self) -> u64 {
        match self {
            Self::Empty => 0,
            Self::Bytes(b) => b.len() as u64,
            Self::Stream { length, .. } => *length,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty"),
            Self::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Self::Stream { length, .. } => write!(f, "Stream({} bytes)", length),
        }
    }
}

/// An HTTP request handed to a transport adapter
#[derive(Debug)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl TransportRequest {
    /// GET with the given query parameters appended to the URL
    pub fn get(mut url: Url, query: &[(String, String)]) -> Self {
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter());
        }
        Self {
            method: Method::GET,
            url,
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    /// POST with an `application/x-www-form-urlencoded` body
    pub fn post_form(url: Url, form: &[(String, String)]) -> Self {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(form.iter())
            .finish();
        Self {
            method: Method::POST,
            url,
            headers: vec![(
                "Content-Type".to_string(),
                "application/x-www-form-urlencoded".to_string(),
            )],
            body: RequestBody::Bytes(Bytes::from(encoded)),
        }
    }

    /// POST with a streamed body
    pub fn post_stream(
        url: Url,
        content_type: impl Into<String>,
        frames: BoxStream<'static, Bytes>,
        length: u64,
    ) -> Self {
        Self {
            method: Method::POST,
            url,
            headers: vec![("Content-Type".to_string(), content_type.into())],
            body: RequestBody::Stream { frames, length },
        }
    }

    /// Add a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Event reported by a transport for one request
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Fraction of the request body sent so far (0.0..=1.0)
    Progress(f64),
    /// Response received
    Complete { status: u16, body: Bytes },
    /// Request failed
    Failed(TransportError),
}

impl TransportEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress(_))
    }
}

/// Sending side of a request's event channel
///
/// Enforces the adapter guarantees: at most one terminal event, and no
/// progress once the terminal event has been emitted. Clones share state.
#[derive(Clone)]
pub struct EventSink {
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>>,
}

impl EventSink {
    /// Create a sink and its receiving end
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Report progress; returns false once the request has finished
    ///
    /// Non-finite values are dropped.
    pub fn progress(&self, fraction: f64) -> bool {
        match self.tx.lock().as_ref() {
            Some(_) if !fraction.is_finite() => true,
            Some(tx) => tx
                .send(TransportEvent::Progress(fraction.clamp(0.0, 1.0)))
                .is_ok(),
            None => false,
        }
    }

    /// Report the response
    pub fn complete(&self, status: u16, body: Bytes) {
        self.finish(TransportEvent::Complete { status, body });
    }

    /// Report a failure
    pub fn fail(&self, error: TransportError) {
        self.finish(TransportEvent::Failed(error));
    }

    /// Whether the terminal event has been emitted
    pub fn is_finished(&self) -> bool {
        self.tx.lock().is_none()
    }

    fn finish(&self, event: TransportEvent) {
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(event);
        }
    }
}

/// Cancellation handle of one in-flight request
#[derive(Debug, Clone)]
pub struct TransferHandle {
    abort: Option<AbortHandle>,
    cancelled: Arc<AtomicBool>,
}

impl TransferHandle {
    /// Handle that aborts the task driving the request
    pub fn new(abort: AbortHandle) -> Self {
        Self {
            abort: Some(abort),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for a request that finished before it started
    pub fn detached() -> Self {
        Self {
            abort: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Abort the request; idempotent and a no-op after completion
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            if let Some(abort) = &self.abort {
                abort.abort();
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// An in-flight request: its events and its cancellation handle
#[derive(Debug)]
pub struct TransportCall {
    events: mpsc::UnboundedReceiver<TransportEvent>,
    handle: TransferHandle,
}

impl TransportCall {
    pub fn new(events: mpsc::UnboundedReceiver<TransportEvent>, handle: TransferHandle) -> Self {
        Self { events, handle }
    }

    /// A call that fails immediately without touching the network
    pub fn failed(error: TransportError) -> Self {
        let (sink, events) = EventSink::channel();
        sink.fail(error);
        Self::new(events, TransferHandle::detached())
    }

    pub fn handle(&self) -> &TransferHandle {
        &self.handle
    }

    /// Next event; `None` once the channel closes
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    /// Wait for the response, ignoring progress
    pub async fn response(mut self) -> Result<(u16, Bytes), TransportError> {
        while let Some(event) = self.events.recv().await {
            match event {
                TransportEvent::Progress(_) => {}
                TransportEvent::Complete { status, body } => return Ok((status, body)),
                TransportEvent::Failed(err) => return Err(err),
            }
        }
        if self.handle.is_cancelled() {
            Err(TransportError::Cancelled)
        } else {
            Err(TransportError::ConnectionClosed)
        }
    }
}

/// HTTP(S) transport the clients send their requests through
///
/// Implementations must deliver every progress event before the single
/// terminal event (`Complete` or `Failed`) of a request. Events may be
/// produced on any thread.
pub trait TransportAdapter: Send + Sync {
    /// Start sending a request; returns immediately
    fn send_streaming(&self, request: TransportRequest) -> TransportCall;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sink_single_terminal_event() {
        let (sink, rx) = EventSink::channel();
        let mut call = TransportCall::new(rx, TransferHandle::detached());

        assert!(sink.progress(0.5));
        sink.complete(200, Bytes::from_static(b"ok"));
        sink.fail(TransportError::ConnectionClosed);
        assert!(!sink.progress(0.9));
        assert!(sink.is_finished());

        assert_eq!(call.next_event().await, Some(TransportEvent::Progress(0.5)));
        assert_eq!(
            call.next_event().await,
            Some(TransportEvent::Complete {
                status: 200,
                body: Bytes::from_static(b"ok")
            })
        );
        assert_eq!(call.next_event().await, None);
    }

    #[tokio::test]
    async fn test_progress_is_clamped() {
        let (sink, rx) = EventSink::channel();
        let mut call = TransportCall::new(rx, TransferHandle::detached());
        sink.progress(1.7);
        sink.progress(-0.2);
        assert_eq!(call.next_event().await, Some(TransportEvent::Progress(1.0)));
        assert_eq!(call.next_event().await, Some(TransportEvent::Progress(0.0)));
    }

    #[tokio::test]
    async fn test_non_finite_progress_is_dropped() {
        let (sink, rx) = EventSink::channel();
        let mut call = TransportCall::new(rx, TransferHandle::detached());
        assert!(sink.progress(f64::NAN));
        assert!(sink.progress(f64::INFINITY));
        sink.progress(0.4);
        sink.complete(200, Bytes::new());
        assert_eq!(call.next_event().await, Some(TransportEvent::Progress(0.4)));
        assert!(call.next_event().await.unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_failed_call() {
        let call = TransportCall::failed(TransportError::InvalidRequest("bad".into()));
        assert_eq!(
            call.response().await,
            Err(TransportError::InvalidRequest("bad".into()))
        );
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let task = tokio::spawn(futures::future::pending::<()>());
        let handle = TransferHandle::new(task.abort_handle());
        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());
        assert!(task.await.unwrap_err().is_cancelled());
    }

    #[test]
    fn test_request_builders() {
        let url = Url::parse("http://localhost/auth/check").unwrap();
        let get = TransportRequest::get(url.clone(), &[("a".into(), "1 2".into())]);
        assert_eq!(get.url.as_str(), "http://localhost/auth/check?a=1+2");
        assert!(get.body.is_empty());

        let post = TransportRequest::post_form(url, &[("b".into(), "x&y".into())]);
        assert_eq!(post.method, Method::POST);
        match post.body {
            RequestBody::Bytes(b) => assert_eq!(&b[..], b"b=x%26y"),
            other => panic!("unexpected body {:?}", other),
        }
    }
}
