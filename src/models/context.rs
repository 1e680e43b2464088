use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use uuid::Uuid;

/// Per-call context created by the transport when a request arrives.
///
/// The context is built from the raw request so it exists even when the
/// request later fails validation.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub session_id: Option<String>,
    pub request_id: String,
    pub method: String,
    /// Monotonic start marker used for processing-time figures
    pub started_at: Instant,
    /// Wall-clock receipt time
    pub received_at: DateTime<Utc>,
}

impl RequestContext {
    pub fn new(
        session_id: Option<String>,
        request_id: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            session_id,
            request_id: request_id.into(),
            method: method.into(),
            started_at: Instant::now(),
            received_at: Utc::now(),
        }
    }

    /// Best-effort extraction from an unvalidated request.
    ///
    /// A string or numeric `id` becomes the request id; anything else gets a
    /// generated UUID. A missing or non-string `method` becomes an empty string.
    pub fn from_raw(raw: &Value, session_id: Option<String>) -> Self {
        let request_id = match raw.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => Uuid::new_v4().to_string(),
        };
        let method = raw
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default();
        Self::new(session_id, request_id, method)
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Current time as an RFC 3339 / ISO 8601 string with millisecond precision.
pub fn iso_timestamp() -> String {
    iso(Utc::now())
}

pub fn iso(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
