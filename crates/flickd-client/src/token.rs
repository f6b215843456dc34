//! Access token value

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque bearer credential returned by a credential exchange
///
/// Immutable; a refreshed token is a new value. Cloning is cheap enough to
/// hand one copy to each upload job.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    value: String,
    obtained_at: DateTime<Utc>,
}

impl Token {
    /// Token obtained now
    pub fn new(value: impl Into<String>) -> Self {
        Self::with_timestamp(value, Utc::now())
    }

    /// Token obtained at a known time (e.g. restored by the caller)
    pub fn with_timestamp(value: impl Into<String>, obtained_at: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            obtained_at,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn obtained_at(&self) -> DateTime<Utc> {
        self.obtained_at
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let visible: String = self.value.chars().take(4).collect();
        f.debug_struct("Token")
            .field("value", &format!("{}…", visible))
            .field("obtained_at", &self.obtained_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_value() {
        let token = Token::new("72157600000000000-abcdef");
        let debug = format!("{:?}", token);
        assert!(debug.contains("7215"));
        assert!(!debug.contains("abcdef"));
    }

    #[test]
    fn test_serde_roundtrip_keeps_timestamp() {
        let token = Token::with_timestamp("tok123", DateTime::from_timestamp(1_700_000_000, 0).unwrap());
        let json = serde_json::to_string(&token).unwrap();
        let back: Token = serde_json::from_str(&json).unwrap();
        assert_eq!(back, token);
        assert_eq!(back.obtained_at().timestamp(), 1_700_000_000);
    }
}
