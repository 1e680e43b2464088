//! Error classification, enrichment and statistics.
//!
//! Every failure is mapped to exactly one envelope:
//!
//! | Kind            | Code   | Message                     | Data                       |
//! |-----------------|--------|-----------------------------|----------------------------|
//! | already coded   | as is  | as is                       | as is                      |
//! | Validation      | -32602 | Request validation failed   | originalMessage, details   |
//! | Timeout         | -32603 | Request timed out           | timeout, method            |
//! | MethodNotFound  | -32601 | Method not found            | method                     |
//! | Authentication  | -32600 | Unauthorized request        | sessionId                  |
//! | RateLimit       | -32603 | Rate limit exceeded         | retryAfter                 |
//! | anything else   | -32603 | Internal server error       | originalMessage, errorType |
//!
//! The envelope also gets a context block (session, request, method,
//! timestamp, processing time) unless it already carries one.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use serde_json::json;
use tracing::{error, warn};

use crate::error::{
    DEFAULT_RETRY_AFTER_SECS, ErrorContextBlock, ErrorEnvelope, MiddlewareError,
    RECOVERABLE_CODES, codes,
};
use crate::metrics;
use crate::models::{RequestContext, RpcRequest, iso_timestamp};

const UNKNOWN_METHOD: &str = "unknown";

/// Method name used for statistics and metric labels: the context's method,
/// else the request's, else `"unknown"`.
pub(crate) fn method_label<'a>(context: &'a RequestContext, request: Option<&'a RpcRequest>) -> &'a str {
    if !context.method.is_empty() {
        context.method.as_str()
    } else {
        request
            .map(|r| r.method.as_str())
            .filter(|m| !m.is_empty())
            .unwrap_or(UNKNOWN_METHOD)
    }
}

/// Snapshot of error counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorStats {
    pub total_errors: u64,
    pub errors_by_kind: BTreeMap<String, u64>,
    pub errors_by_method: BTreeMap<String, u64>,
    /// Kind with the highest count; ties go to the kind seen first
    pub most_common_error: Option<String>,
    /// Not tracked yet; always 0.0
    pub error_rate: f64,
}

#[derive(Debug, Default)]
struct ErrorCounters {
    total: u64,
    /// Kept in first-seen order for the most-common tie-break
    by_kind: Vec<(&'static str, u64)>,
    by_method: HashMap<String, u64>,
}

impl ErrorCounters {
    fn record(&mut self, kind: &'static str, method: &str) {
        self.total += 1;
        match self.by_kind.iter_mut().find(|(k, _)| *k == kind) {
            Some((_, count)) => *count += 1,
            None => self.by_kind.push((kind, 1)),
        }
        *self.by_method.entry(method.to_string()).or_insert(0) += 1;
    }

    fn most_common(&self) -> Option<&'static str> {
        let mut best: Option<(&'static str, u64)> = None;
        for &(kind, count) in &self.by_kind {
            if best.is_none_or(|(_, max)| count > max) {
                best = Some((kind, count));
            }
        }
        best.map(|(kind, _)| kind)
    }
}

/// Classifies errors into envelopes and keeps per-kind/per-method counts.
#[derive(Debug, Default)]
pub struct ErrorHandler {
    counters: Mutex<ErrorCounters>,
}

impl ErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify, enrich, count and log `error`.
    ///
    /// `request` is the validated request when one exists; it supplies the
    /// method for not-found errors that don't name one.
    pub fn handle_error(
        &self,
        error: MiddlewareError,
        request: Option<&RpcRequest>,
        context: &RequestContext,
    ) -> ErrorEnvelope {
        let kind = error.kind();
        let method = method_label(context, request);

        let source_message = error.to_string();
        let mut envelope = classify(error, request, context);
        if envelope.context.is_none() {
            envelope.context = Some(ErrorContextBlock {
                session_id: context.session_id.clone(),
                request_id: context.request_id.clone(),
                method: method.to_string(),
                timestamp: iso_timestamp(),
                processing_time: context.elapsed_ms(),
            });
        }

        self.lock().record(kind, method);
        metrics::record_error(kind, method);

        if envelope.is_recoverable() {
            warn!(
                kind,
                code = envelope.code,
                method,
                request_id = %context.request_id,
                session_id = context.session_id.as_deref().unwrap_or("-"),
                processing_time_ms = context.elapsed_ms(),
                error = %source_message,
                "Request rejected"
            );
        } else {
            error!(
                kind,
                code = envelope.code,
                method,
                request_id = %context.request_id,
                session_id = context.session_id.as_deref().unwrap_or("-"),
                processing_time_ms = context.elapsed_ms(),
                error = %source_message,
                "Request failed"
            );
        }

        envelope
    }

    /// Project any error to `{code, message, data}` without classification.
    ///
    /// Already-coded errors keep their envelope; everything else becomes an
    /// internal error carrying its display message.
    pub fn format_mcp_error(error: &MiddlewareError) -> ErrorEnvelope {
        match error {
            MiddlewareError::Coded(envelope) => envelope.clone(),
            other => {
                let message = other.to_string();
                let message = if message.is_empty() {
                    "Internal server error".to_string()
                } else {
                    message
                };
                ErrorEnvelope::new(codes::INTERNAL_ERROR, message, None)
            }
        }
    }

    /// True only for coded errors in the invalid-request / not-found /
    /// invalid-params range.
    pub fn is_recoverable_error(error: &MiddlewareError) -> bool {
        error
            .code()
            .is_some_and(|code| RECOVERABLE_CODES.contains(&code))
    }

    pub fn stats(&self) -> ErrorStats {
        let counters = self.lock();
        ErrorStats {
            total_errors: counters.total,
            errors_by_kind: counters
                .by_kind
                .iter()
                .map(|(kind, count)| (kind.to_string(), *count))
                .collect(),
            errors_by_method: counters
                .by_method
                .iter()
                .map(|(method, count)| (method.clone(), *count))
                .collect(),
            most_common_error: counters.most_common().map(str::to_string),
            error_rate: 0.0,
        }
    }

    pub fn clear_stats(&self) {
        *self.lock() = ErrorCounters::default();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ErrorCounters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn classify(
    error: MiddlewareError,
    request: Option<&RpcRequest>,
    context: &RequestContext,
) -> ErrorEnvelope {
    match error {
        MiddlewareError::Coded(envelope) => envelope,
        MiddlewareError::Validation { message, details } => ErrorEnvelope::new(
            codes::INVALID_PARAMS,
            "Request validation failed",
            Some(json!({
                "originalMessage": message,
                "details": details,
            })),
        ),
        MiddlewareError::Timeout { method, timeout_ms } => ErrorEnvelope::new(
            codes::INTERNAL_ERROR,
            "Request timed out",
            Some(json!({
                "timeout": timeout_ms,
                "method": method,
            })),
        ),
        MiddlewareError::MethodNotFound { method } => {
            let method = method.or_else(|| request.map(|r| r.method.clone()));
            ErrorEnvelope::new(
                codes::METHOD_NOT_FOUND,
                "Method not found",
                Some(json!({ "method": method })),
            )
        }
        MiddlewareError::Authentication(_) => ErrorEnvelope::new(
            codes::INVALID_REQUEST,
            "Unauthorized request",
            Some(json!({ "sessionId": context.session_id })),
        ),
        MiddlewareError::RateLimit { retry_after, .. } => ErrorEnvelope::new(
            codes::INTERNAL_ERROR,
            "Rate limit exceeded",
            Some(json!({
                "retryAfter": retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
            })),
        ),
        other @ (MiddlewareError::PolicyViolation(_)
        | MiddlewareError::Serialization(_)
        | MiddlewareError::Config(_)
        | MiddlewareError::Internal(_)) => ErrorEnvelope::new(
            codes::INTERNAL_ERROR,
            "Internal server error",
            Some(json!({
                "originalMessage": other.to_string(),
                "errorType": other.kind(),
            })),
        ),
    }
}
