//! Per-call orchestration of validation, the timeout race and error handling.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;

use super::error_handler::{ErrorHandler, ErrorStats, method_label};
use super::timeout::{TimeoutManager, TimeoutStats};
use crate::config::Config;
use crate::error::{MiddlewareError, MiddlewareResult};
use crate::metrics;
use crate::models::{RequestContext, RpcRequest, iso, iso_timestamp};
use crate::validation::{MethodContract, RequestValidator, ValidationStats};

/// Lifecycle of a single call.
///
/// ```text
/// Received → Validating → Rejected
///                       → Validated → Processing → Completed | TimedOut | Errored
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Received,
    Validating,
    Rejected,
    Validated,
    Processing,
    Completed,
    TimedOut,
    Errored,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CallState::Rejected | CallState::Completed | CallState::TimedOut | CallState::Errored
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CallState::Received => "received",
            CallState::Validating => "validating",
            CallState::Rejected => "rejected",
            CallState::Validated => "validated",
            CallState::Processing => "processing",
            CallState::Completed => "completed",
            CallState::TimedOut => "timed_out",
            CallState::Errored => "errored",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregated statistics of the three components.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MiddlewareStats {
    pub validation: ValidationStats,
    pub timeouts: TimeoutStats,
    pub errors: ErrorStats,
}

/// Chains request validation, the handler/timeout race, response validation
/// and error normalization for each call.
///
/// Components are injected so tests and multiple stacks in one process get
/// independent statistics.
#[derive(Clone)]
pub struct ProtocolMiddleware {
    validator: Arc<RequestValidator>,
    timeouts: Arc<TimeoutManager>,
    errors: Arc<ErrorHandler>,
}

impl ProtocolMiddleware {
    pub fn new(
        validator: Arc<RequestValidator>,
        timeouts: Arc<TimeoutManager>,
        errors: Arc<ErrorHandler>,
    ) -> Self {
        Self {
            validator,
            timeouts,
            errors,
        }
    }

    /// Build a stack with the MCP method contract and the configured limits.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(RequestValidator::new(
                MethodContract::mcp_default(),
                config.validation_limits(),
            )),
            Arc::new(TimeoutManager::new(config.timeout_policy())),
            Arc::new(ErrorHandler::new()),
        )
    }

    pub fn validator(&self) -> &RequestValidator {
        &self.validator
    }

    pub fn timeouts(&self) -> &TimeoutManager {
        &self.timeouts
    }

    pub fn errors(&self) -> &ErrorHandler {
        &self.errors
    }

    /// Validate `raw`, run `handler` under the method's timeout and return its
    /// result with a `_metadata` block attached.
    ///
    /// # Errors
    ///
    /// Any failure (validation, timeout, handler error) is routed through the
    /// [`ErrorHandler`] and returned as `MiddlewareError::Coded` carrying the
    /// final envelope.
    pub async fn process_request<H, Fut>(
        &self,
        raw: &Value,
        context: &RequestContext,
        handler: H,
    ) -> MiddlewareResult<Value>
    where
        H: FnOnce(RpcRequest) -> Fut,
        Fut: Future<Output = MiddlewareResult<Value>>,
    {
        let mut state = CallState::Received;
        advance(&mut state, CallState::Validating, context);

        let request = match self.validator.validate_request(raw) {
            Ok(request) => request,
            Err(e) => {
                advance(&mut state, CallState::Rejected, context);
                return Err(self.fail(e, None, context, state));
            }
        };
        advance(&mut state, CallState::Validated, context);

        let method = if context.method.is_empty() {
            request.method.clone()
        } else {
            context.method.clone()
        };

        advance(&mut state, CallState::Processing, context);
        match self
            .timeouts
            .with_timeout(&method, handler(request.clone()))
            .await
        {
            Ok(result) => {
                advance(&mut state, CallState::Completed, context);
                metrics::record_request_duration(
                    &method,
                    state.as_str(),
                    context.elapsed().as_secs_f64(),
                );
                Ok(attach_metadata(result, context))
            }
            Err(e) => {
                let terminal = if matches!(e, MiddlewareError::Timeout { .. }) {
                    CallState::TimedOut
                } else {
                    CallState::Errored
                };
                advance(&mut state, terminal, context);
                Err(self.fail(e, Some(&request), context, state))
            }
        }
    }

    /// Validate an outbound response for `request.method` and stamp it with
    /// `_processingTime` (ms) and `_requestId`.
    ///
    /// # Errors
    ///
    /// A response that fails validation is routed through the
    /// [`ErrorHandler`] and returned as `MiddlewareError::Coded`.
    pub fn process_response(
        &self,
        raw: &Value,
        request: &RpcRequest,
        context: &RequestContext,
    ) -> MiddlewareResult<Value> {
        if let Err(e) = self.validator.validate_response(raw, &request.method) {
            return Err(self.fail(e, Some(request), context, CallState::Errored));
        }

        let mut response = raw.clone();
        if let Value::Object(map) = &mut response {
            map.insert("_processingTime".into(), json!(context.elapsed_ms()));
            map.insert("_requestId".into(), json!(context.request_id));
        }
        Ok(response)
    }

    pub async fn stats(&self) -> MiddlewareStats {
        MiddlewareStats {
            validation: self.validator.stats(),
            timeouts: self.timeouts.stats().await,
            errors: self.errors.stats(),
        }
    }

    /// Cancel pending timers and wait for timer tasks to exit.
    pub async fn shutdown(&self) {
        self.timeouts.shutdown().await;
    }

    fn fail(
        &self,
        error: MiddlewareError,
        request: Option<&RpcRequest>,
        context: &RequestContext,
        state: CallState,
    ) -> MiddlewareError {
        let method = method_label(context, request);
        metrics::record_request_duration(method, state.as_str(), context.elapsed().as_secs_f64());
        MiddlewareError::Coded(self.errors.handle_error(error, request, context))
    }
}

fn advance(state: &mut CallState, next: CallState, context: &RequestContext) {
    debug!(
        request_id = %context.request_id,
        method = %context.method,
        from = %state,
        to = %next,
        "Call state transition"
    );
    *state = next;
}

/// Attach request metadata to an object result. Other results pass unchanged.
fn attach_metadata(mut result: Value, context: &RequestContext) -> Value {
    if let Value::Object(map) = &mut result {
        map.insert(
            "_metadata".into(),
            json!({
                "requestId": context.request_id,
                "sessionId": context.session_id,
                "timestamp": iso_timestamp(),
                "processingStartedAt": iso(context.received_at),
            }),
        );
    }
    result
}
