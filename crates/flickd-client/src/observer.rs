//! Caller-facing callbacks
//!
//! These are the only integration points a presentation layer needs. Every
//! method may be invoked on a worker thread; callers that own a UI thread must
//! hop back to it themselves.
//!
//! Closures implement both traits, so a caller that only cares about the
//! result can write:
//!
//! ```rust
//! use flickd_client::{CredentialObserver, ExchangeError, Token};
//!
//! let observer = |result: Result<Token, ExchangeError>| {
//!     println!("exchange finished: {:?}", result.is_ok());
//! };
//! observer.on_credential_result(Err(ExchangeError::InvalidCredentialInput));
//! ```

use crate::error::{ExchangeError, UploadError};
use crate::token::Token;

/// Receives the outcome of a credential exchange, exactly once
pub trait CredentialObserver: Send + Sync {
    fn on_credential_result(&self, result: Result<Token, ExchangeError>);
}

impl<F> CredentialObserver for F
where
    F: Fn(Result<Token, ExchangeError>) + Send + Sync,
{
    fn on_credential_result(&self, result: Result<Token, ExchangeError>) {
        self(result)
    }
}

/// Receives progress and the outcome of an upload job
///
/// Progress values are non-decreasing and all arrive before the single
/// `on_upload_result` call.
pub trait UploadObserver: Send + Sync {
    fn on_upload_progress(&self, _fraction: f64) {}

    fn on_upload_result(&self, result: Result<String, UploadError>);
}

impl<F> UploadObserver for F
where
    F: Fn(Result<String, UploadError>) + Send + Sync,
{
    fn on_upload_result(&self, result: Result<String, UploadError>) {
        self(result)
    }
}

/// Observer that ignores everything (for callers that await the outcome instead)
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl CredentialObserver for NoopObserver {
    fn on_credential_result(&self, _result: Result<Token, ExchangeError>) {}
}

impl UploadObserver for NoopObserver {
    fn on_upload_result(&self, _result: Result<String, UploadError>) {}
}
