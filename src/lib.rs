//! # MCP Guard
//!
//! Protocol middleware for MCP-style JSON-RPC 2.0 servers, featuring:
//!
//! - **Validation**: Structural request/response checks, per-method parameter
//!   contracts, a method allow-list and payload limits
//! - **Timeouts**: Per-method budgets enforced by racing the handler against a
//!   tracked timer
//! - **Error Normalization**: Every failure becomes a JSON-RPC error envelope
//!   with a context block, plus running statistics
//! - **Observability**: Structured logging via `tracing`, optional Prometheus metrics
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Transport (stdio binary / embedder)            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ProtocolMiddleware (process_request / process_response)    │
//! ├───────────────────┬───────────────────┬─────────────────────┤
//! │ RequestValidator  │  TimeoutManager   │    ErrorHandler     │
//! ├───────────────────┴───────────────────┴─────────────────────┤
//! │  Method handler (supplied by the server)                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mcp_guard::{Config, ProtocolMiddleware, RequestContext};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), mcp_guard::MiddlewareError> {
//!     let config = Config::from_env()?;
//!     let middleware = ProtocolMiddleware::from_config(&config);
//!
//!     let raw = json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"});
//!     let context = RequestContext::from_raw(&raw, None);
//!     let result = middleware
//!         .process_request(&raw, &context, |_request| async { Ok(json!({"tools": []})) })
//!         .await?;
//!
//!     println!("{result}");
//!     middleware.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Timeout Configuration
//!
//! Override a method's budget:
//! ```bash
//! RPC_METHOD_TIMEOUTS="tools/call=45000" cargo run
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod utils;
pub mod validation;

// Re-exports for convenience
pub use config::Config;
pub use error::{ErrorEnvelope, MiddlewareError, MiddlewareResult, codes};
pub use middleware::{
    CallState, ErrorHandler, ErrorStats, MiddlewareStats, ProtocolMiddleware, TimeoutManager,
    TimeoutPolicy, TimeoutStats,
};
pub use models::{RequestContext, RequestId, RpcRequest, RpcResponse};
pub use validation::{MethodContract, RequestValidator, ValidationLimits, ValidationStats};
