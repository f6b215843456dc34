//! Error types for flickd client operations

use thiserror::Error;

use crate::exchange::SessionPhase;

/// Result type alias for client construction and configuration
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors raised while building a client (never by an in-flight operation)
#[derive(Error, Debug)]
pub enum ClientError {
    /// HTTP client could not be built
    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

/// Failure of a credential exchange or web authorization
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExchangeError {
    /// Neither username+password nor consumer key+secret were supplied
    #[error("Credential must carry username and password, or consumer key and secret")]
    InvalidCredentialInput,

    /// The service could not be reached
    #[error("Network unreachable: {0}")]
    NetworkUnreachable(String),

    /// The service answered with a body we could not use
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The service refused the credential
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Any other service failure
    #[error("Unexpected response {status}: {message}")]
    Unknown { status: u16, message: String },

    /// `start` called on a session that already left `Idle`
    #[error("Session is not idle (state: {0})")]
    InvalidState(SessionPhase),
}

impl ExchangeError {
    /// Whether the caller may retry the same exchange without new input
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkUnreachable(_))
    }
}

/// Failure of an upload job
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UploadError {
    /// Token invalid or expired; run the credential exchange again
    #[error("Authorization rejected: {0}")]
    AuthRejected(String),

    /// Connection dropped, timed out or the service was temporarily unavailable
    #[error("Transient network failure: {0}")]
    TransientNetwork(String),

    /// The service refused the metadata or payload
    #[error("Server rejected upload ({status}): {message}")]
    ServerRejected {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// The caller cancelled the job
    #[error("Upload cancelled")]
    Cancelled,

    /// The job could not be built into a request
    #[error("Invalid upload job: {0}")]
    InvalidJob(String),
}

impl UploadError {
    /// Create a server rejection from status, optional service code and message
    pub fn server_rejected(status: u16, code: Option<String>, message: impl Into<String>) -> Self {
        Self::ServerRejected {
            status,
            code,
            message: message.into(),
        }
    }

    /// Whether resubmitting the same job may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientNetwork(_))
    }

    /// Whether the caller has to obtain a fresh token first
    pub fn requires_reauthorization(&self) -> bool {
        matches!(self, Self::AuthRejected(_))
    }
}
