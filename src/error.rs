use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// JSON-RPC reserved error codes used by the middleware.
pub mod codes {
    /// Emitted by transports for lines that are not JSON at all.
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// Codes a client can plausibly fix by correcting its request and retrying.
pub const RECOVERABLE_CODES: [i64; 3] = [
    codes::INVALID_REQUEST,
    codes::METHOD_NOT_FOUND,
    codes::INVALID_PARAMS,
];

/// Retry hint applied to rate limit errors that don't carry one.
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Request context attached to every envelope produced by the error handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorContextBlock {
    pub session_id: Option<String>,
    pub request_id: String,
    pub method: String,
    /// RFC 3339 timestamp of when the error was handled
    pub timestamp: String,
    /// Milliseconds between request receipt and error handling
    pub processing_time: u64,
}

/// Normalized `{code, message, data}` error object returned to the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ErrorContextBlock>,
}

impl ErrorEnvelope {
    pub fn new(code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            code,
            message: message.into(),
            data,
            context: None,
        }
    }

    /// Whether the caller can fix the request and retry.
    pub fn is_recoverable(&self) -> bool {
        RECOVERABLE_CODES.contains(&self.code)
    }
}

impl fmt::Display for ErrorEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Every failure the middleware can raise or receive from a handler.
///
/// The first six variants are the classification taxonomy used by
/// [`ErrorHandler`](crate::middleware::ErrorHandler). The remaining variants are
/// all generic failures and land in the internal-error bucket.
#[derive(Error, Debug)]
pub enum MiddlewareError {
    #[error("{message}")]
    Validation {
        message: String,
        details: Option<Value>,
    },

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("{message}")]
    RateLimit {
        message: String,
        /// Seconds until the client may retry
        retry_after: Option<u64>,
    },

    #[error("Operation timed out after {timeout_ms}ms for method {method}")]
    Timeout { method: String, timeout_ms: u64 },

    #[error("Method not found: {}", .method.as_deref().unwrap_or("<unknown>"))]
    MethodNotFound { method: Option<String> },

    /// An error that already carries a protocol code.
    #[error("{0}")]
    Coded(ErrorEnvelope),

    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MiddlewareError {
    pub fn validation(message: impl Into<String>, details: Option<Value>) -> Self {
        Self::Validation {
            message: message.into(),
            details,
        }
    }

    pub fn rate_limit(message: impl Into<String>, retry_after: Option<u64>) -> Self {
        Self::RateLimit {
            message: message.into(),
            retry_after,
        }
    }

    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::MethodNotFound {
            method: Some(method.into()),
        }
    }

    /// Label used for statistics, metrics and generic envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "ValidationError",
            Self::Authentication(_) => "AuthenticationError",
            Self::RateLimit { .. } => "RateLimitError",
            Self::Timeout { .. } => "TimeoutError",
            Self::MethodNotFound { .. } => "MethodNotFoundError",
            Self::Coded(_) => "McpError",
            Self::PolicyViolation(_) => "PolicyViolationError",
            Self::Serialization(_) => "SerializationError",
            Self::Config(_) => "ConfigError",
            Self::Internal(_) => "InternalError",
        }
    }

    /// Protocol code, present only on already-coded errors.
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Coded(envelope) => Some(envelope.code),
            _ => None,
        }
    }

    /// The envelope for an already-coded error.
    pub fn envelope(&self) -> Option<&ErrorEnvelope> {
        match self {
            Self::Coded(envelope) => Some(envelope),
            _ => None,
        }
    }
}

impl From<ErrorEnvelope> for MiddlewareError {
    fn from(envelope: ErrorEnvelope) -> Self {
        Self::Coded(envelope)
    }
}

/// Convenience type alias for Results with MiddlewareError.
pub type MiddlewareResult<T> = Result<T, MiddlewareError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_labels() {
        assert_eq!(
            MiddlewareError::validation("bad", None).kind(),
            "ValidationError"
        );
        assert_eq!(
            MiddlewareError::Timeout {
                method: "tools/call".into(),
                timeout_ms: 10
            }
            .kind(),
            "TimeoutError"
        );
        assert_eq!(
            MiddlewareError::Internal("boom".into()).kind(),
            "InternalError"
        );
    }

    #[test]
    fn test_only_coded_errors_have_codes() {
        let coded = MiddlewareError::from(ErrorEnvelope::new(-32601, "nope", None));
        assert_eq!(coded.code(), Some(-32601));
        assert_eq!(MiddlewareError::validation("bad", None).code(), None);
    }

    #[test]
    fn test_envelope_recoverable_codes() {
        assert!(ErrorEnvelope::new(codes::INVALID_PARAMS, "x", None).is_recoverable());
        assert!(ErrorEnvelope::new(codes::INVALID_REQUEST, "x", None).is_recoverable());
        assert!(!ErrorEnvelope::new(codes::INTERNAL_ERROR, "x", None).is_recoverable());
        assert!(!ErrorEnvelope::new(-32000, "x", None).is_recoverable());
    }

    #[test]
    fn test_envelope_serialization_skips_empty_fields() {
        let envelope = ErrorEnvelope::new(codes::INTERNAL_ERROR, "Internal server error", None);
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            value,
            json!({"code": -32603, "message": "Internal server error"})
        );
    }

    #[test]
    fn test_method_not_found_display() {
        let err = MiddlewareError::MethodNotFound { method: None };
        assert_eq!(err.to_string(), "Method not found: <unknown>");
        let err = MiddlewareError::method_not_found("foo/bar");
        assert_eq!(err.to_string(), "Method not found: foo/bar");
    }
}
