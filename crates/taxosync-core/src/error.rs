//! Error types for taxosync.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::defaults;

/// Result type alias using taxosync's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for taxosync operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The incoming graph violates remote limits; nothing was mutated.
    #[error("Validation failed with {} error(s)", .0.len())]
    Validation(Vec<String>),

    /// A remote call returned a non-success status (or exhausted its retries).
    #[error("Remote call failed: {0}")]
    Remote(Box<ApiFailure>),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed before a response was received
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Structured failure record, when the error came from a remote response.
    pub fn api_failure(&self) -> Option<&ApiFailure> {
        match self {
            Error::Remote(failure) => Some(failure),
            _ => None,
        }
    }
}

impl From<ApiFailure> for Error {
    fn from(failure: ApiFailure) -> Self {
        Error::Remote(Box::new(failure))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}

// =============================================================================
// STRUCTURED REMOTE FAILURES
// =============================================================================

/// Replacement text for credentials in captured requests.
pub const REDACTED: &str = "*****";

/// Sanitized copy of a request that failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub method: String,
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<JsonValue>,
}

impl RequestRecord {
    /// Capture a request, masking the `Authorization` header.
    pub fn new<I, K, V>(method: impl Into<String>, headers: I, body: Option<JsonValue>) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let headers = headers
            .into_iter()
            .map(|(name, value)| {
                let name = name.into();
                let value = if name.eq_ignore_ascii_case("authorization") {
                    REDACTED.to_string()
                } else {
                    value.into()
                };
                (name, value)
            })
            .collect();
        Self {
            method: method.into(),
            headers,
            body,
        }
    }
}

/// Structured record of a failed remote call: endpoint, request, response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiFailure {
    pub endpoint: String,
    pub status: u16,
    pub request: RequestRecord,
    pub response: JsonValue,
}

impl ApiFailure {
    /// The remote error identifier (`sys.id` of the error body).
    pub fn error_id(&self) -> Option<&str> {
        self.response.get("sys")?.get("id")?.as_str()
    }

    /// Human-readable message from the error body, if any.
    pub fn message(&self) -> Option<&str> {
        self.response.get("message")?.as_str()
    }

    /// 429 carrying the rate-limit error identifier.
    pub fn is_rate_limited(&self) -> bool {
        self.status == 429 && self.error_id() == Some(defaults::RATE_LIMIT_ERROR_ID)
    }

    /// Create rejected because another resource already owns the URI.
    pub fn is_uri_conflict(&self) -> bool {
        if self.status != 422 {
            return false;
        }
        match self.response.get("details") {
            Some(JsonValue::String(details)) => details.contains(defaults::URI_CONFLICT_DETAILS),
            Some(other) => other.to_string().contains(defaults::URI_CONFLICT_DETAILS),
            None => false,
        }
    }

    /// Mutation rejected because the supplied version token is stale.
    pub fn is_version_conflict(&self) -> bool {
        self.status == 409
    }
}

impl fmt::Display for ApiFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} returned {}",
            self.request.method, self.endpoint, self.status
        )?;
        if let Some(message) = self.message() {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn failure(status: u16, response: JsonValue) -> ApiFailure {
        ApiFailure {
            endpoint: "https://api.example.com/organizations/o/taxonomy/concepts".to_string(),
            status,
            request: RequestRecord::new(
                "POST",
                [("Authorization", "Bearer secret"), ("Content-Type", "application/json")],
                None,
            ),
            response,
        }
    }

    #[test]
    fn test_request_record_redacts_authorization() {
        let record = RequestRecord::new(
            "GET",
            [("authorization", "Bearer abc"), ("Accept", "application/json")],
            None,
        );
        assert_eq!(record.headers["authorization"], REDACTED);
        assert_eq!(record.headers["Accept"], "application/json");
    }

    #[test]
    fn test_rate_limited_requires_error_id() {
        let limited = failure(429, json!({"sys": {"type": "Error", "id": "RateLimitExceeded"}}));
        assert!(limited.is_rate_limited());

        let other = failure(429, json!({"sys": {"type": "Error", "id": "SomethingElse"}}));
        assert!(!other.is_rate_limited());
    }

    #[test]
    fn test_uri_conflict_string_details() {
        let conflict = failure(422, json!({"details": "URI already exists"}));
        assert!(conflict.is_uri_conflict());
        assert!(!failure(400, json!({"details": "URI already exists"})).is_uri_conflict());
    }

    #[test]
    fn test_uri_conflict_nested_details() {
        let conflict = failure(
            422,
            json!({"details": {"errors": [{"details": "URI already exists"}]}}),
        );
        assert!(conflict.is_uri_conflict());
    }

    #[test]
    fn test_version_conflict() {
        assert!(failure(409, json!({})).is_version_conflict());
        assert!(!failure(422, json!({})).is_version_conflict());
    }

    #[test]
    fn test_failure_display_includes_message() {
        let f = failure(400, json!({"message": "bad payload"}));
        assert_eq!(
            f.to_string(),
            "POST https://api.example.com/organizations/o/taxonomy/concepts returned 400: bad payload"
        );
    }

    #[test]
    fn test_error_display_validation() {
        let err = Error::Validation(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(err.to_string(), "Validation failed with 2 error(s)");
    }

    #[test]
    fn test_error_from_api_failure() {
        let err: Error = failure(500, json!({})).into();
        assert_eq!(err.api_failure().map(|f| f.status), Some(500));
        assert!(err.to_string().starts_with("Remote call failed: POST"));
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
