//! Service configuration with YAML support
//!
//! Everything service-specific (paths, field names, signing parameters) lives
//! here so the same client can talk to differently shaped photo services.
//!
//! ```yaml
//! connection:
//!   base_url: "https://api.example.com"
//!   api_key: "app-key"
//!   api_secret: "app-secret"
//!
//! endpoints:
//!   token: "/services/auth/access_token"
//!   upload: "/services/upload/"
//!
//! fields:
//!   signature: "api_sig"
//!   media: "photo"
//!
//! signing:
//!   pair_separator: ""
//!   join_separator: ""
//!   escape: false
//!
//! timeouts:
//!   upload_ms: 600000
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::signing::SigningScheme;

/// Complete client configuration
///
/// Can be loaded from YAML, JSON, or constructed programmatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Connection settings
    pub connection: ConnectionConfig,

    /// Endpoint paths (configurable per service)
    #[serde(default)]
    pub endpoints: EndpointsConfig,

    /// Request field names
    #[serde(default)]
    pub fields: FieldNames,

    /// Response field paths
    #[serde(default)]
    pub response: ResponseFields,

    /// Signature scheme
    #[serde(default)]
    pub signing: SigningScheme,

    /// Parameters added to every signed request (e.g. `format: json`)
    #[serde(default)]
    pub extra_params: BTreeMap<String, String>,

    /// Service error codes that mean "token invalid or expired"
    ///
    /// Signature and nonce failures are protocol mismatches and do not belong here.
    #[serde(default = "default_auth_error_codes")]
    pub auth_error_codes: Vec<String>,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    /// Upload settings
    #[serde(default)]
    pub upload: UploadSettings,
}

fn default_auth_error_codes() -> Vec<String> {
    vec!["98".to_string()]
}

/// Connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Base URL of the service
    pub base_url: String,

    /// Application key sent with every request
    #[serde(default)]
    pub api_key: String,

    /// Application secret used to sign requests
    #[serde(default)]
    pub api_secret: Option<String>,
}

/// Endpoint paths, relative to `base_url` or absolute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointsConfig {
    /// Credential exchange
    #[serde(default = "default_token_path")]
    pub token: String,

    /// Token verification
    #[serde(default = "default_check_token_path")]
    pub check_token: String,

    /// Frob request (web authorization)
    #[serde(default = "default_frob_path")]
    pub frob: String,

    /// Login page the user is sent to (web authorization)
    #[serde(default = "default_authorize_path")]
    pub authorize: String,

    /// Frob-for-token exchange (web authorization)
    #[serde(default = "default_frob_token_path")]
    pub frob_token: String,

    /// Multipart media upload
    #[serde(default = "default_upload_path")]
    pub upload: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            token: default_token_path(),
            check_token: default_check_token_path(),
            frob: default_frob_path(),
            authorize: default_authorize_path(),
            frob_token: default_frob_token_path(),
            upload: default_upload_path(),
        }
    }
}

fn default_token_path() -> String {
    "/auth/token".to_string()
}

fn default_check_token_path() -> String {
    "/auth/check".to_string()
}

fn default_frob_path() -> String {
    "/auth/frob".to_string()
}

fn default_authorize_path() -> String {
    "/auth".to_string()
}

fn default_frob_token_path() -> String {
    "/auth/frob/token".to_string()
}

fn default_upload_path() -> String {
    "/upload".to_string()
}

/// Names of request parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldNames {
    pub api_key: String,
    pub signature: String,
    pub nonce: String,
    pub timestamp: String,
    pub auth_token: String,
    pub username: String,
    pub password: String,
    pub mode: String,
    pub frob: String,
    pub perms: String,
    /// Multipart field carrying the media bytes
    pub media: String,
}

impl Default for FieldNames {
    fn default() -> Self {
        Self {
            api_key: "api_key".into(),
            signature: "api_sig".into(),
            nonce: "nonce".into(),
            timestamp: "timestamp".into(),
            auth_token: "auth_token".into(),
            username: "username".into(),
            password: "password".into(),
            mode: "mode".into(),
            frob: "frob".into(),
            perms: "perms".into(),
            media: "photo".into(),
        }
    }
}

/// Dotted JSON paths into response bodies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseFields {
    /// Token string in an exchange response
    pub token: String,
    /// Frob string in a frob response
    pub frob: String,
    /// Media identifier in an upload response
    pub media_id: String,
    /// Machine-readable error code
    pub error_code: String,
    /// Human-readable error message
    pub error_message: String,
    /// Optional status field (e.g. `stat`); when set, any value but `status_ok` is a failure
    pub status: Option<String>,
    /// Value of `status` meaning success
    pub status_ok: String,
}

impl Default for ResponseFields {
    fn default() -> Self {
        Self {
            token: "token".into(),
            frob: "frob".into(),
            media_id: "id".into(),
            error_code: "code".into(),
            error_message: "message".into(),
            status: None,
            status_ok: "ok".into(),
        }
    }
}

/// Timeout configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// Connect timeout in milliseconds (default: 10s)
    #[serde(default = "default_connect_timeout")]
    pub connect_ms: u64,

    /// Bound on a whole credential exchange in milliseconds (default: 30s)
    #[serde(default = "default_exchange_timeout")]
    pub exchange_ms: u64,

    /// Bound on token verification in milliseconds (default: 15s)
    #[serde(default = "default_verify_timeout")]
    pub verify_ms: u64,

    /// Bound on a whole upload in milliseconds (default: 10 minutes)
    #[serde(default = "default_upload_timeout")]
    pub upload_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            connect_ms: default_connect_timeout(),
            exchange_ms: default_exchange_timeout(),
            verify_ms: default_verify_timeout(),
            upload_ms: default_upload_timeout(),
        }
    }
}

fn default_exchange_timeout() -> u64 {
    30_000 // 30 seconds
}

fn default_connect_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_verify_timeout() -> u64 {
    15_000 // 15 seconds
}

fn default_upload_timeout() -> u64 {
    600_000 // 10 minutes
}

/// Upload settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    /// Bytes of media per streamed frame
    pub chunk_size: usize,
    /// Content type of image parts
    pub image_content_type: String,
    /// Content type of video parts
    pub video_content_type: String,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            image_content_type: "image/jpeg".into(),
            video_content_type: "video/quicktime".into(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Parse configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Serialize configuration to YAML
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::SerializeError(e.to_string()))
    }

    /// Create a builder for programmatic configuration
    pub fn builder(base_url: impl Into<String>) -> ServiceConfigBuilder {
        ServiceConfigBuilder::new(base_url)
    }

    /// Resolve an endpoint path against the base URL
    pub fn endpoint_url(&self, path: &str) -> Result<Url, url::ParseError> {
        Url::parse(&self.connection.base_url)?.join(path)
    }

    /// Check that every endpoint resolves against the base URL
    pub fn validate(&self) -> Result<(), url::ParseError> {
        let endpoints = &self.endpoints;
        for path in [
            &endpoints.token,
            &endpoints.check_token,
            &endpoints.frob,
            &endpoints.authorize,
            &endpoints.frob_token,
            &endpoints.upload,
        ] {
            self.endpoint_url(path)?;
        }
        Ok(())
    }

    /// Secret used to sign requests when the credential carries none
    pub fn api_secret(&self) -> &str {
        self.connection.api_secret.as_deref().unwrap_or("")
    }

    /// Whether a service error code means the token was rejected
    pub fn is_auth_error_code(&self, code: &str) -> bool {
        self.auth_error_codes.iter().any(|c| c == code)
    }
}

/// Builder for ServiceConfig
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    /// Create a new builder with the given base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            config: ServiceConfig {
                connection: ConnectionConfig {
                    base_url: base_url.into(),
                    api_key: String::new(),
                    api_secret: None,
                },
                endpoints: EndpointsConfig::default(),
                fields: FieldNames::default(),
                response: ResponseFields::default(),
                signing: SigningScheme::default(),
                extra_params: BTreeMap::new(),
                auth_error_codes: default_auth_error_codes(),
                timeouts: TimeoutsConfig::default(),
                upload: UploadSettings::default(),
            },
        }
    }

    /// Set the application key and secret
    pub fn api_credentials(mut self, key: impl Into<String>, secret: impl Into<String>) -> Self {
        self.config.connection.api_key = key.into();
        self.config.connection.api_secret = Some(secret.into());
        self
    }

    /// Set the credential exchange path
    pub fn token_path(mut self, path: impl Into<String>) -> Self {
        self.config.endpoints.token = path.into();
        self
    }

    /// Set the upload path
    pub fn upload_path(mut self, path: impl Into<String>) -> Self {
        self.config.endpoints.upload = path.into();
        self
    }

    /// Replace the signature scheme
    pub fn signing(mut self, scheme: SigningScheme) -> Self {
        self.config.signing = scheme;
        self
    }

    /// Add a parameter to every signed request
    pub fn extra_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.extra_params.insert(key.into(), value.into());
        self
    }

    /// Set the response path of the media identifier
    pub fn media_id_field(mut self, path: impl Into<String>) -> Self {
        self.config.response.media_id = path.into();
        self
    }

    /// Set the response path of the token
    pub fn token_field(mut self, path: impl Into<String>) -> Self {
        self.config.response.token = path.into();
        self
    }

    /// Bytes of media per streamed frame
    pub fn chunk_size(mut self, bytes: usize) -> Self {
        self.config.upload.chunk_size = bytes.max(1);
        self
    }

    /// Set the credential exchange timeout in milliseconds
    pub fn exchange_timeout_ms(mut self, ms: u64) -> Self {
        self.config.timeouts.exchange_ms = ms;
        self
    }

    /// Set the upload timeout in milliseconds
    pub fn upload_timeout_ms(mut self, ms: u64) -> Self {
        self.config.timeouts.upload_ms = ms;
        self
    }

    /// Set the token verification timeout in milliseconds
    pub fn verify_timeout_ms(mut self, ms: u64) -> Self {
        self.config.timeouts.verify_ms = ms;
        self
    }

    /// Build the configuration
    pub fn build(self) -> ServiceConfig {
        self.config
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::SecretPlacement;
    use std::io::Write;

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
connection:
  base_url: "https://api.example.com"
  api_key: "key123"
  api_secret: "secret123"

endpoints:
  upload: "/services/upload/"

fields:
  media: "video"

response:
  media_id: "photoid._content"
  status: "stat"

signing:
  pair_separator: ""
  join_separator: ""
  escape: false
  include_nonce: false

timeouts:
  upload_ms: 60000
"#;

        let config = ServiceConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.connection.api_key, "key123");
        assert_eq!(config.api_secret(), "secret123");
        assert_eq!(config.endpoints.upload, "/services/upload/");
        assert_eq!(config.endpoints.token, "/auth/token");
        assert_eq!(config.fields.media, "video");
        assert_eq!(config.fields.signature, "api_sig");
        assert_eq!(config.response.media_id, "photoid._content");
        assert_eq!(config.response.status.as_deref(), Some("stat"));
        assert_eq!(config.signing.secret_placement, SecretPlacement::Prefix);
        assert!(!config.signing.include_nonce);
        assert_eq!(config.timeouts.upload_ms, 60000);
        assert_eq!(config.timeouts.connect_ms, 10_000);
        assert!(config.is_auth_error_code("98"));
        assert!(!config.is_auth_error_code("96"));
        assert!(!config.is_auth_error_code("97"));
    }

    #[test]
    fn test_builder() {
        let config = ServiceConfig::builder("http://localhost:9080")
            .api_credentials("k", "s")
            .upload_path("/up")
            .extra_param("format", "json")
            .chunk_size(0)
            .build();

        assert_eq!(config.connection.api_key, "k");
        assert_eq!(config.api_secret(), "s");
        assert_eq!(config.endpoints.upload, "/up");
        assert_eq!(config.extra_params.get("format").unwrap(), "json");
        assert_eq!(config.upload.chunk_size, 1);
    }

    #[test]
    fn test_endpoint_resolution() {
        let config = ServiceConfig::builder("http://localhost:8080/api/").build();
        assert_eq!(
            config.endpoint_url("upload").unwrap().as_str(),
            "http://localhost:8080/api/upload"
        );
        assert_eq!(
            config.endpoint_url("/auth/token").unwrap().as_str(),
            "http://localhost:8080/auth/token"
        );
        assert_eq!(
            config
                .endpoint_url("https://www.example.com/services/auth/")
                .unwrap()
                .as_str(),
            "https://www.example.com/services/auth/"
        );
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let config = ServiceConfig::builder("http://localhost:8080")
            .api_credentials("key", "secret")
            .build();
        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("base_url"));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        let loaded = ServiceConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_timeout_defaults() {
        let timeouts = TimeoutsConfig::default();
        assert_eq!(timeouts.connect_ms, 10_000);
        assert_eq!(timeouts.exchange_ms, 30_000);
        assert_eq!(timeouts.verify_ms, 15_000);
        assert_eq!(timeouts.upload_ms, 600_000);

        let yaml = serde_yaml::to_string(&timeouts).unwrap();
        assert!(!yaml.contains("request_ms"));
    }

    #[test]
    fn test_endpoint_validation() {
        let mut config = ServiceConfig::builder("http://localhost:8080").build();
        assert!(config.validate().is_ok());

        config.connection.base_url = "not a url".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = ServiceConfig::from_yaml_file("/nonexistent/flickd.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }
}
