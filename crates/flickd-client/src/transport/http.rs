//! reqwest-backed transport

use std::time::Duration;

use futures::StreamExt;
use reqwest::header::CONTENT_LENGTH;
use reqwest::Client;
use tracing::{debug, trace};

use super::adapter::{EventSink, RequestBody, TransferHandle, TransportCall, TransportRequest};
use super::{TransportAdapter, TransportError};
use crate::config::TimeoutsConfig;

/// Transport over a shared reqwest connection pool
///
/// Each request runs on its own task; cancelling aborts that task, which
/// drops the connection.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Build a transport with the configured connect timeout
    ///
    /// No overall request timeout is set here: the clients bound each
    /// operation themselves, and uploads may legitimately run for minutes.
    pub fn new(timeouts: &TimeoutsConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(Duration::from_millis(timeouts.connect_ms))
            .build()?;
        Ok(Self { client })
    }

    /// Wrap an existing reqwest client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl TransportAdapter for HttpTransport {
    fn send_streaming(&self, request: TransportRequest) -> TransportCall {
        let (sink, events) = EventSink::channel();
        let client = self.client.clone();
        let task = tokio::spawn(execute(client, request, sink));
        TransportCall::new(events, TransferHandle::new(task.abort_handle()))
    }
}

async fn execute(client: Client, request: TransportRequest, sink: EventSink) {
    debug!(method = %request.method, url = %request.url, body = ?request.body, "Sending request");

    let mut builder = client.request(request.method, request.url);
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    builder = match request.body {
        RequestBody::Empty => builder,
        RequestBody::Bytes(bytes) => builder.body(bytes),
        RequestBody::Stream { frames, length } => {
            let progress = sink.clone();
            let mut sent: u64 = 0;
            let counted = frames.map(move |frame| {
                sent += frame.len() as u64;
                if length > 0 {
                    progress.progress(sent as f64 / length as f64);
                }
                trace!(sent, length, "Body frame pulled");
                Ok::<_, std::io::Error>(frame)
            });
            builder
                .header(CONTENT_LENGTH, length)
                .body(reqwest::Body::wrap_stream(counted))
        }
    };

    let response = match builder.send().await {
        Ok(response) => response,
        Err(err) => {
            sink.fail(TransportError::from(err));
            return;
        }
    };

    let status = response.status().as_u16();
    match response.bytes().await {
        Ok(body) => {
            debug!(status, bytes = body.len(), "Response received");
            sink.complete(status, body);
        }
        Err(err) => sink.fail(TransportError::from(err)),
    }
}
