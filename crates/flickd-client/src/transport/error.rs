//! Transport layer errors

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Transfer cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::ConnectionFailed(err.to_string())
        } else if err.is_builder() {
            Self::InvalidRequest(err.to_string())
        } else if err.is_request() || err.is_body() {
            Self::SendFailed(err.to_string())
        } else {
            Self::ReceiveFailed(err.to_string())
        }
    }
}
