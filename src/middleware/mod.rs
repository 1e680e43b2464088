//! The request/response middleware pipeline.
//!
//! - **Timeouts**: per-method durations and the handler/timer race
//! - **Error handling**: classification into JSON-RPC envelopes with statistics
//! - **Pipeline**: the orchestrator chaining validation, timeouts and errors
//!
//! # Architecture
//!
//! ```text
//! raw request → RequestValidator → TimeoutManager::with_timeout(handler) → result + _metadata
//!                    ↓                        ↓                  ↓
//!                 rejected                timed out           errored
//!                    └──────────────→ ErrorHandler ←──────────────┘
//!                                         ↓
//!                                   ErrorEnvelope → transport
//! ```

pub mod error_handler;
pub mod pipeline;
pub mod timeout;

pub use error_handler::{ErrorHandler, ErrorStats};
pub use pipeline::{CallState, MiddlewareStats, ProtocolMiddleware};
pub use timeout::{
    DEFAULT_METHOD_TIMEOUTS_MS, DEFAULT_TIMEOUT_MS, MAX_TIMEOUT_MS, TimeoutHandle, TimeoutManager,
    TimeoutPolicy, TimeoutStats, duration_ms,
};
