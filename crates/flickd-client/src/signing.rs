//! Request signing and content hashing
//!
//! The service recomputes every signature server-side from the same canonical
//! string, so the canonical form must be byte-for-byte reproducible:
//!
//! 1. each key and value is percent-encoded (when [`SigningScheme::escape`] is set),
//! 2. pairs are rendered as `key<pair_separator>value`,
//! 3. pairs are sorted by key (ties by value) and joined with `join_separator`,
//! 4. the shared secret is prepended or appended and the result is hashed.
//!
//! # Example
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use flickd_client::signing::{Signer, SigningScheme};
//!
//! let signer = Signer::new(SigningScheme::default(), "secret");
//! let mut params = BTreeMap::new();
//! params.insert("method".to_string(), "upload".to_string());
//! let signed = signer.sign(params).unwrap();
//! assert!(signed.verify("secret", &SigningScheme::default()));
//! ```

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ServiceConfig;

/// Hex MD5 digest of a string or byte blob (32 lowercase hex characters)
pub fn hash(data: impl AsRef<[u8]>) -> String {
    hex::encode(Md5::digest(data.as_ref()))
}

/// Render `key<separator>value` pairs in a deterministic order
///
/// Pairs are sorted by key bytes, ties broken by value, so the output does not
/// depend on the iteration order of the input mapping.
pub fn canonicalize<I, K, V>(params: I, separator: &str) -> Vec<String>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut pairs: Vec<(K, V)> = params.into_iter().collect();
    pairs.sort_by(|a, b| {
        a.0.as_ref()
            .cmp(b.0.as_ref())
            .then_with(|| a.1.as_ref().cmp(b.1.as_ref()))
    });
    pairs
        .iter()
        .map(|(k, v)| format!("{}{}{}", k.as_ref(), separator, v.as_ref()))
        .collect()
}

/// Signing errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SigningError {
    /// Unescaped key or value contains a separator and would make the canonical string ambiguous
    #[error("Parameter '{key}' contains a separator character")]
    AmbiguousParameter { key: String },
}

/// Where the shared secret goes relative to the canonical string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretPlacement {
    /// `hash(secret + canonical)`
    #[default]
    Prefix,
    /// `hash(canonical + secret)`
    Suffix,
    /// `hash(canonical)`
    None,
}

/// Service-specific signing parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningScheme {
    /// Separator between a key and its value (default: `=`)
    #[serde(default = "default_pair_separator")]
    pub pair_separator: String,

    /// Separator between pairs (default: `&`)
    #[serde(default = "default_join_separator")]
    pub join_separator: String,

    /// Secret placement (default: prefix)
    #[serde(default)]
    pub secret_placement: SecretPlacement,

    /// Percent-encode keys and values before pairing (default: true)
    #[serde(default = "default_true")]
    pub escape: bool,

    /// Add a nonce/timestamp pair to every signed request (default: true)
    #[serde(default = "default_true")]
    pub include_nonce: bool,
}

fn default_pair_separator() -> String {
    "=".to_string()
}

fn default_join_separator() -> String {
    "&".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for SigningScheme {
    fn default() -> Self {
        Self {
            pair_separator: default_pair_separator(),
            join_separator: default_join_separator(),
            secret_placement: SecretPlacement::default(),
            escape: true,
            include_nonce: true,
        }
    }
}

impl SigningScheme {
    /// Build the canonical string for a parameter mapping
    pub fn canonical_string(&self, params: &BTreeMap<String, String>) -> Result<String, SigningError> {
        let mut rendered: Vec<(Cow<'_, str>, Cow<'_, str>)> = Vec::with_capacity(params.len());
        for (key, value) in params {
            if self.escape {
                rendered.push((urlencoding::encode(key), urlencoding::encode(value)));
            } else {
                self.check_unescaped(key, key)?;
                self.check_unescaped(key, value)?;
                rendered.push((Cow::Borrowed(key.as_str()), Cow::Borrowed(value.as_str())));
            }
        }
        Ok(canonicalize(rendered, &self.pair_separator).join(&self.join_separator))
    }

    /// Compute the signature of a parameter mapping with a shared secret
    pub fn signature(
        &self,
        params: &BTreeMap<String, String>,
        secret: &str,
    ) -> Result<String, SigningError> {
        let canonical = self.canonical_string(params)?;
        let material = match self.secret_placement {
            SecretPlacement::Prefix => format!("{}{}", secret, canonical),
            SecretPlacement::Suffix => format!("{}{}", canonical, secret),
            SecretPlacement::None => canonical,
        };
        Ok(hash(material))
    }

    fn check_unescaped(&self, key: &str, text: &str) -> Result<(), SigningError> {
        let collides = [&self.pair_separator, &self.join_separator]
            .iter()
            .any(|sep| !sep.is_empty() && text.contains(sep.as_str()));
        if collides {
            Err(SigningError::AmbiguousParameter {
                key: key.to_string(),
            })
        } else {
            Ok(())
        }
    }
}

/// Source of per-request nonces and timestamps
pub trait NonceSource: Send + Sync {
    /// A value never returned before by this source
    fn nonce(&self) -> String;

    /// Current Unix time in seconds
    fn timestamp(&self) -> i64;
}

/// Random UUID nonces and wall-clock timestamps
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemNonceSource;

impl NonceSource for SystemNonceSource {
    fn nonce(&self) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }

    fn timestamp(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Parameters with their computed signature
///
/// Immutable once built; changing a parameter means signing a new set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequestParameters {
    params: BTreeMap<String, String>,
    signature: String,
}

impl SignedRequestParameters {
    /// Split received parameters into the signed set and its signature
    pub fn from_wire(mut params: BTreeMap<String, String>, signature_field: &str) -> Option<Self> {
        let signature = params.remove(signature_field)?;
        Some(Self { params, signature })
    }

    /// The signed parameters, in canonical key order
    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    /// The computed signature
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Look up one parameter
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// All parameters followed by the signature under `signature_field`
    pub fn to_pairs(&self, signature_field: &str) -> Vec<(String, String)> {
        self.params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .chain(std::iter::once((
                signature_field.to_string(),
                self.signature.clone(),
            )))
            .collect()
    }

    /// Recompute the signature from the parameters and compare
    pub fn verify(&self, secret: &str, scheme: &SigningScheme) -> bool {
        scheme
            .signature(&self.params, secret)
            .map(|expected| expected == self.signature)
            .unwrap_or(false)
    }
}

/// Signs parameter sets with a shared secret
#[derive(Clone)]
pub struct Signer {
    scheme: SigningScheme,
    secret: String,
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("scheme", &self.scheme)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl Signer {
    pub fn new(scheme: SigningScheme, secret: impl Into<String>) -> Self {
        Self {
            scheme,
            secret: secret.into(),
        }
    }

    pub fn scheme(&self) -> &SigningScheme {
        &self.scheme
    }

    /// Sign a parameter set
    pub fn sign(&self, params: BTreeMap<String, String>) -> Result<SignedRequestParameters, SigningError> {
        let signature = self.scheme.signature(&params, &self.secret)?;
        Ok(SignedRequestParameters { params, signature })
    }
}

/// Builds signed parameter sets for one service configuration
///
/// Adds the configured extra parameters, the application key and, when the
/// scheme asks for it, a fresh nonce/timestamp pair before signing.
#[derive(Clone)]
pub struct RequestSigner {
    config: Arc<ServiceConfig>,
    nonces: Arc<dyn NonceSource>,
}

impl fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestSigner")
            .field("scheme", &self.config.signing)
            .finish_non_exhaustive()
    }
}

impl RequestSigner {
    pub fn new(config: Arc<ServiceConfig>, nonces: Arc<dyn NonceSource>) -> Self {
        Self { config, nonces }
    }

    /// Sign with the application key and secret from the configuration
    pub fn sign(
        &self,
        params: BTreeMap<String, String>,
    ) -> Result<SignedRequestParameters, SigningError> {
        self.sign_as(
            params,
            &self.config.connection.api_key,
            self.config.api_secret(),
        )
    }

    /// Sign with an explicit key and secret (delegated consumer credentials)
    pub fn sign_as(
        &self,
        mut params: BTreeMap<String, String>,
        api_key: &str,
        secret: &str,
    ) -> Result<SignedRequestParameters, SigningError> {
        let fields = &self.config.fields;
        for (key, value) in &self.config.extra_params {
            params
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        if !api_key.is_empty() {
            params.insert(fields.api_key.clone(), api_key.to_string());
        }
        if self.config.signing.include_nonce {
            params.insert(fields.nonce.clone(), self.nonces.nonce());
            params.insert(fields.timestamp.clone(), self.nonces.timestamp().to_string());
        }
        Signer::new(self.config.signing.clone(), secret).sign(params)
    }

    /// Parameters plus signature, ready to put on the wire
    pub fn wire_pairs(&self, signed: &SignedRequestParameters) -> Vec<(String, String)> {
        signed.to_pairs(&self.config.fields.signature)
    }
}
