//! Flickd Client Library
//!
//! Network core of a photo/video uploader: exchanges user credentials for an
//! authorization token, then performs signed, progress-reporting multipart
//! uploads of media plus metadata.
//!
//! # Example
//!
//! ```rust,no_run
//! use flickd_client::{Credential, FlickdClient, NoopObserver, ServiceConfig, UploadJob};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServiceConfig::builder("https://api.example.com")
//!         .api_credentials("app-key", "app-secret")
//!         .build();
//!     let client = FlickdClient::new(config)?;
//!
//!     // Exchange credentials for a token
//!     let session = client
//!         .exchange()
//!         .start(Credential::password("alice", "secret"), NoopObserver);
//!     let token = session.outcome().await?;
//!
//!     // Upload a photo with progress
//!     let job = UploadJob::builder(std::fs::read("sunset.jpg")?, token)
//!         .title("Sunset")
//!         .tags(["sea", "golden hour"])
//!         .build();
//!     let media_id = client.uploads().upload(job).await?;
//!     println!("uploaded as {}", media_id);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Testing
//!
//! The `testing` module runs a fake photo service for integration tests:
//!
//! ```rust,ignore
//! use flickd_client::testing::TestServer;
//!
//! let server = TestServer::start().await?;
//! let token = server.exchange()?
//!     .start(Credential::password("alice", "wonderland"), NoopObserver)
//!     .outcome()
//!     .await?;
//! ```

pub mod config;
mod error;
pub mod exchange;
mod observer;
pub mod response;
pub mod signing;
pub mod testing;
mod token;
pub mod transport;
pub mod upload;

use std::sync::Arc;

pub use config::{ServiceConfig, ServiceConfigBuilder};
pub use error::{ClientError, ExchangeError, Result, UploadError};
pub use exchange::{
    Credential, CredentialExchange, ExchangeSession, SessionPhase, SessionState, WebAuthorization,
};
pub use observer::{CredentialObserver, NoopObserver, UploadObserver};
pub use signing::{
    NonceSource, SecretPlacement, SignedRequestParameters, Signer, SigningError, SigningScheme,
    SystemNonceSource,
};
pub use token::Token;
pub use transport::{HttpTransport, TransportAdapter};
pub use upload::{JobState, MediaKind, TokenStatus, UploadClient, UploadHandle, UploadJob};

/// Credential exchange and upload client sharing one configuration and transport
#[derive(Debug, Clone)]
pub struct FlickdClient {
    exchange: CredentialExchange,
    uploads: UploadClient,
}

impl FlickdClient {
    /// Build a client over HTTP
    pub fn new(config: ServiceConfig) -> Result<Self> {
        config.validate()?;
        let transport = HttpTransport::new(&config.timeouts)?;
        Ok(Self::with_transport(
            config,
            Arc::new(transport),
            Arc::new(SystemNonceSource),
        ))
    }

    /// Build a client over any transport, e.g. [`transport::MockTransport`]
    pub fn with_transport(
        config: ServiceConfig,
        transport: Arc<dyn TransportAdapter>,
        nonces: Arc<dyn NonceSource>,
    ) -> Self {
        let config = Arc::new(config);
        Self {
            exchange: CredentialExchange::new(
                Arc::clone(&config),
                Arc::clone(&transport),
                Arc::clone(&nonces),
            ),
            uploads: UploadClient::new(config, transport, nonces),
        }
    }

    /// Load the configuration from a YAML file and build a client over HTTP
    pub fn from_yaml_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Self::new(ServiceConfig::from_yaml_file(path)?)
    }

    pub fn exchange(&self) -> &CredentialExchange {
        &self.exchange
    }

    pub fn uploads(&self) -> &UploadClient {
        &self.uploads
    }

    pub fn config(&self) -> &ServiceConfig {
        self.uploads.config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_endpoint_rejected_at_construction() {
        let config = ServiceConfig::builder("not a url").build();
        let err = FlickdClient::new(config).unwrap_err();
        assert!(matches!(err, ClientError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_valid_config_builds() {
        let config = ServiceConfig::builder("http://localhost:8080")
            .api_credentials("k", "s")
            .build();
        let client = FlickdClient::new(config).unwrap();
        assert_eq!(client.config().connection.api_key, "k");
    }
}
