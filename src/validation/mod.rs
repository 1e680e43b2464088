//! Inbound request and outbound response validation.
//!
//! # Request pipeline
//!
//! ```text
//! raw JSON → envelope schema → method schema → allow-list → payload policy → RpcRequest
//!                 -32602           -32602         -32601       generic
//! ```
//!
//! Each stage only runs if the previous one passed. The envelope schema
//! requires the `"2.0"` version tag, an `id` (string, number or null), a
//! non-empty `method` and, when present, an object `params`. Schema failures
//! list every violation as a JSON Pointer plus message.
//!
//! Responses are checked for the version tag, the `id`, exactly one of
//! `result` / `error`, and the method's result schema when one is registered.

mod contract;
mod schema;

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::error::{ErrorEnvelope, MiddlewareError, MiddlewareResult, codes};
use crate::metrics;
use crate::models::{RpcRequest, RpcResponse};

pub use contract::{ALLOWED_METHODS, MethodContract, MethodSchemas, is_allowed_method};
pub use schema::{Schema, Violation};

// =============================================================================
// Validation Constants
// =============================================================================

/// Maximum serialized size of a request's `params`, in bytes.
pub const MAX_PARAMS_BYTES: usize = 100_000;

/// Maximum number of messages in a `sampling/create` request.
pub const MAX_SAMPLING_MESSAGES: usize = 50;

/// Maximum length of a single sampling message's content, in characters.
pub const MAX_MESSAGE_CONTENT_CHARS: usize = 10_000;

const SAMPLING_METHOD: &str = "sampling/create";

/// Payload policy limits applied after shape validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationLimits {
    pub max_params_bytes: usize,
    pub max_sampling_messages: usize,
    pub max_message_content_chars: usize,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_params_bytes: MAX_PARAMS_BYTES,
            max_sampling_messages: MAX_SAMPLING_MESSAGES,
            max_message_content_chars: MAX_MESSAGE_CONTENT_CHARS,
        }
    }
}

/// Snapshot of validator counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationStats {
    pub total_validations: u64,
    pub validation_errors: u64,
    /// Fraction of validations that passed; 1.0 before any validation
    pub success_rate: f64,
}

/// Checks requests and responses against the base protocol shape and the
/// per-method contract.
#[derive(Debug)]
pub struct RequestValidator {
    request_envelope: Schema,
    response_envelope: Schema,
    contract: MethodContract,
    limits: ValidationLimits,
    validations: AtomicU64,
    validation_errors: AtomicU64,
}

impl Default for RequestValidator {
    fn default() -> Self {
        Self::new(MethodContract::mcp_default(), ValidationLimits::default())
    }
}

impl RequestValidator {
    pub fn new(contract: MethodContract, limits: ValidationLimits) -> Self {
        Self {
            request_envelope: Schema::compile(schema::request_envelope()),
            response_envelope: Schema::compile(schema::response_envelope()),
            contract,
            limits,
            validations: AtomicU64::new(0),
            validation_errors: AtomicU64::new(0),
        }
    }

    pub fn contract(&self) -> &MethodContract {
        &self.contract
    }

    pub fn limits(&self) -> ValidationLimits {
        self.limits
    }

    /// Validate a raw inbound request and return its typed form.
    ///
    /// # Errors
    ///
    /// - `Validation` when the base shape or the method's parameter shape is violated
    /// - `MethodNotFound` when the method is outside [`ALLOWED_METHODS`]
    /// - `PolicyViolation` when payload size or sampling limits are exceeded
    pub fn validate_request(&self, raw: &Value) -> MiddlewareResult<RpcRequest> {
        let result = self.check_request(raw);
        self.record("request", &result);
        result
    }

    /// Validate a raw outbound response produced for `method`.
    ///
    /// # Errors
    ///
    /// Returns an already-coded internal error (`-32603`, "Response validation
    /// failed") whose data lists the violations.
    pub fn validate_response(&self, raw: &Value, method: &str) -> MiddlewareResult<RpcResponse> {
        let result = self.check_response(raw, method);
        self.record("response", &result);
        result
    }

    pub fn stats(&self) -> ValidationStats {
        let total_validations = self.validations.load(Ordering::Relaxed);
        let validation_errors = self.validation_errors.load(Ordering::Relaxed);
        let success_rate = if total_validations == 0 {
            1.0
        } else {
            (total_validations - validation_errors) as f64 / total_validations as f64
        };
        ValidationStats {
            total_validations,
            validation_errors,
            success_rate,
        }
    }

    pub fn reset_stats(&self) {
        self.validations.store(0, Ordering::Relaxed);
        self.validation_errors.store(0, Ordering::Relaxed);
    }

    fn record<T>(&self, kind: &'static str, result: &MiddlewareResult<T>) {
        self.validations.fetch_add(1, Ordering::Relaxed);
        let outcome = match result {
            Ok(_) => "ok",
            Err(e) => {
                self.validation_errors.fetch_add(1, Ordering::Relaxed);
                debug!(kind, error = %e, "Validation failed");
                "error"
            }
        };
        metrics::record_validation(kind, outcome);
    }

    fn check_request(&self, raw: &Value) -> MiddlewareResult<RpcRequest> {
        let violations = self.request_envelope.violations(raw, "");
        if !violations.is_empty() {
            return Err(violation_error("Invalid request format", violations));
        }

        let request: RpcRequest = serde_json::from_value(raw.clone())?;
        let params = request
            .params
            .clone()
            .map(Value::Object)
            .unwrap_or_else(|| Value::Object(Map::new()));

        if let Some(schema) = self.contract.params_schema(&request.method) {
            let violations = schema.violations(&params, "/params");
            if !violations.is_empty() {
                return Err(violation_error(
                    format!("Invalid parameters for method {}", request.method),
                    violations,
                ));
            }
        }

        if !is_allowed_method(&request.method) {
            return Err(MiddlewareError::method_not_found(&request.method));
        }

        let size = serde_json::to_vec(&params)?.len();
        if size > self.limits.max_params_bytes {
            return Err(MiddlewareError::PolicyViolation(format!(
                "Request payload too large: {size} bytes exceeds limit of {} bytes",
                self.limits.max_params_bytes
            )));
        }

        if request.method == SAMPLING_METHOD {
            self.check_sampling(&params)?;
        }

        Ok(request)
    }

    fn check_sampling(&self, params: &Value) -> MiddlewareResult<()> {
        let Some(messages) = params.get("messages").and_then(Value::as_array) else {
            return Ok(());
        };

        if messages.len() > self.limits.max_sampling_messages {
            return Err(MiddlewareError::PolicyViolation(format!(
                "Too many messages: {} exceeds limit of {}",
                messages.len(),
                self.limits.max_sampling_messages
            )));
        }

        for (i, message) in messages.iter().enumerate() {
            let Some(content) = message.get("content") else {
                continue;
            };
            let length = content_length(content)?;
            if length > self.limits.max_message_content_chars {
                return Err(MiddlewareError::PolicyViolation(format!(
                    "Message {i} content too long: {length} characters exceeds limit of {}",
                    self.limits.max_message_content_chars
                )));
            }
        }

        Ok(())
    }

    fn check_response(&self, raw: &Value, method: &str) -> MiddlewareResult<RpcResponse> {
        let violations = self.response_envelope.violations(raw, "");
        if !violations.is_empty() {
            return Err(response_error(violations));
        }

        if let Some(schema) = self.contract.result_schema(method)
            && let Some(result) = raw.get("result")
        {
            let violations = schema.violations(result, "/result");
            if !violations.is_empty() {
                return Err(response_error(violations));
            }
        }

        Ok(serde_json::from_value(raw.clone())?)
    }
}

fn violation_error(message: impl Into<String>, violations: Vec<Violation>) -> MiddlewareError {
    MiddlewareError::validation(message, Some(json!({ "violations": violations })))
}

fn response_error(violations: Vec<Violation>) -> MiddlewareError {
    MiddlewareError::Coded(ErrorEnvelope::new(
        codes::INTERNAL_ERROR,
        "Response validation failed",
        Some(json!({ "violations": violations })),
    ))
}

/// Character length of a sampling message's content.
///
/// Text blocks and plain strings count their text; any other content counts
/// its serialized form.
fn content_length(content: &Value) -> MiddlewareResult<usize> {
    if let Some(text) = content.as_str() {
        return Ok(text.chars().count());
    }
    if let Some(text) = content.get("text").and_then(Value::as_str) {
        return Ok(text.chars().count());
    }
    Ok(serde_json::to_string(content)?.chars().count())
}
