//! Transport layer for service communication
//!
//! This module provides the adapters the clients send requests through:
//! - HTTP adapter over reqwest, with streamed request bodies
//! - Mock adapter for testing
//!
//! # Example
//!
//! ```ignore
//! use flickd_client::transport::{HttpTransport, TransportAdapter, TransportRequest};
//!
//! let transport = HttpTransport::new(&config.timeouts)?;
//! let call = transport.send_streaming(TransportRequest::get(url, &[]));
//! let (status, body) = call.response().await?;
//! ```

mod adapter;
pub mod error;
pub mod http;
pub mod mock;

pub use adapter::{
    EventSink, RequestBody, TransferHandle, TransportAdapter, TransportCall, TransportEvent,
    TransportRequest,
};
pub use error::TransportError;
pub use http::HttpTransport;
pub use mock::{MockOutcome, MockResponse, MockTransport, RecordedRequest};
