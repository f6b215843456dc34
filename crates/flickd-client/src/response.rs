//! Service reply parsing
//!
//! Replies are JSON bodies; the fields of interest are addressed by dotted
//! paths from [`ResponseFields`] so that nested shapes such as
//! `{"photoid": {"_content": "123"}}` work with `photoid._content`.

use bytes::Bytes;
use serde_json::Value;

use crate::config::ResponseFields;

/// Look up a dotted path in a JSON value
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Look up a dotted path and render scalars as a string
pub fn lookup_string(value: &Value, path: &str) -> Option<String> {
    match lookup(value, path)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Error reported by the service inside a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceFailure {
    pub code: Option<String>,
    pub message: String,
}

/// A decoded HTTP reply
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    json: Option<Value>,
    text: String,
}

impl Reply {
    pub fn new(status: u16, body: &Bytes) -> Self {
        Self {
            status,
            json: serde_json::from_slice(body).ok(),
            text: String::from_utf8_lossy(body).into_owned(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Whether the body parsed as JSON
    pub fn is_json(&self) -> bool {
        self.json.is_some()
    }

    /// String field at a dotted path
    pub fn field(&self, path: &str) -> Option<String> {
        self.json.as_ref().and_then(|v| lookup_string(v, path))
    }

    /// Service-level failure, if the body reports one
    ///
    /// A reply is a failure when the configured status field is present and
    /// differs from `status_ok`, or when an error code is present.
    pub fn failure(&self, fields: &ResponseFields) -> Option<ServiceFailure> {
        let json = self.json.as_ref()?;
        let status_failed = fields
            .status
            .as_deref()
            .and_then(|path| lookup_string(json, path))
            .map(|status| status != fields.status_ok)
            .unwrap_or(false);
        let code = lookup_string(json, &fields.error_code);

        if !status_failed && code.is_none() {
            return None;
        }

        let message = lookup_string(json, &fields.error_message)
            .unwrap_or_else(|| "Service reported a failure".to_string());
        Some(ServiceFailure { code, message })
    }

    /// Best human-readable description of the reply
    pub fn message(&self, fields: &ResponseFields) -> String {
        self.field(&fields.error_message).unwrap_or_else(|| {
            let trimmed = self.text.trim();
            if trimmed.is_empty() {
                format!("HTTP {}", self.status)
            } else {
                trimmed.chars().take(200).collect()
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_paths() {
        let value = json!({"photoid": {"_content": "123"}, "ids": [7, 8], "n": 5});
        assert_eq!(lookup_string(&value, "photoid._content").as_deref(), Some("123"));
        assert_eq!(lookup_string(&value, "ids.1").as_deref(), Some("8"));
        assert_eq!(lookup_string(&value, "n").as_deref(), Some("5"));
        assert_eq!(lookup_string(&value, "photoid"), None);
        assert_eq!(lookup_string(&value, "missing.path"), None);
    }

    #[test]
    fn test_empty_string_is_absent() {
        let value = json!({"id": ""});
        assert_eq!(lookup_string(&value, "id"), None);
    }

    #[test]
    fn test_failure_from_error_code() {
        let fields = ResponseFields::default();
        let reply = Reply::new(200, &Bytes::from(r#"{"code": 98, "message": "Invalid auth token"}"#));
        let failure = reply.failure(&fields).unwrap();
        assert_eq!(failure.code.as_deref(), Some("98"));
        assert_eq!(failure.message, "Invalid auth token");
    }

    #[test]
    fn test_failure_from_status_field() {
        let fields = ResponseFields {
            status: Some("stat".into()),
            ..ResponseFields::default()
        };
        let failed = Reply::new(200, &Bytes::from(r#"{"stat": "fail"}"#));
        assert_eq!(failed.failure(&fields).unwrap().code, None);

        let ok = Reply::new(200, &Bytes::from(r#"{"stat": "ok", "id": "1"}"#));
        assert!(ok.failure(&fields).is_none());
    }

    #[test]
    fn test_non_json_reply() {
        let fields = ResponseFields::default();
        let reply = Reply::new(502, &Bytes::from("Bad Gateway"));
        assert!(!reply.is_json());
        assert!(reply.failure(&fields).is_none());
        assert_eq!(reply.message(&fields), "Bad Gateway");

        let empty = Reply::new(500, &Bytes::new());
        assert_eq!(empty.message(&fields), "HTTP 500");
    }
}
