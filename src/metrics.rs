//! Prometheus metrics for middleware observability.
//!
//! Metrics are recorded through the `metrics` facade; without an installed
//! recorder every call is a no-op, so components record unconditionally.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `mcp_validations_total` - Validations performed (labels: kind, outcome)
//! - `mcp_timeouts_total` - Timers that fired (labels: method)
//! - `mcp_errors_total` - Errors handled (labels: kind, method)
//!
//! ## Histograms
//! - `mcp_request_duration_seconds` - Request processing time (labels: method, state)
//!
//! ## Gauges
//! - `mcp_pending_timeouts` - Timers currently registered
//!
//! # Usage
//!
//! ```rust,ignore
//! use mcp_guard::metrics::{init_metrics, record_timeout};
//!
//! init_metrics("0.0.0.0:9090".parse()?)?;
//! record_timeout("tools/call");
//! ```

use std::net::SocketAddr;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const VALIDATIONS_TOTAL: &str = "mcp_validations_total";
    pub const TIMEOUTS_TOTAL: &str = "mcp_timeouts_total";
    pub const ERRORS_TOTAL: &str = "mcp_errors_total";
    pub const REQUEST_DURATION_SECONDS: &str = "mcp_request_duration_seconds";
    pub const PENDING_TIMEOUTS: &str = "mcp_pending_timeouts";
}

/// Initialize the Prometheus metrics exporter on `metrics_addr`.
///
/// # Errors
///
/// Returns a message if the exporter could not be installed (for example when
/// the port is already bound or a recorder is already set).
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::VALIDATIONS_TOTAL,
        "Total number of request and response validations"
    );
    describe_counter!(
        names::TIMEOUTS_TOTAL,
        "Total number of per-method timeouts that fired"
    );
    describe_counter!(
        names::ERRORS_TOTAL,
        "Total number of errors routed through the error handler"
    );
    describe_histogram!(
        names::REQUEST_DURATION_SECONDS,
        "Request processing duration in seconds"
    );
    describe_gauge!(
        names::PENDING_TIMEOUTS,
        "Number of timers currently pending"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

/// Record a validation outcome. `kind` is `request` or `response`.
pub fn record_validation(kind: &'static str, outcome: &'static str) {
    counter!(names::VALIDATIONS_TOTAL, "kind" => kind, "outcome" => outcome).increment(1);
}

pub fn record_timeout(method: &str) {
    counter!(names::TIMEOUTS_TOTAL, "method" => method.to_string()).increment(1);
}

pub fn record_error(kind: &'static str, method: &str) {
    counter!(names::ERRORS_TOTAL, "kind" => kind, "method" => method.to_string()).increment(1);
}

pub fn record_request_duration(method: &str, state: &'static str, duration_secs: f64) {
    histogram!(names::REQUEST_DURATION_SECONDS, "method" => method.to_string(), "state" => state)
        .record(duration_secs);
}

pub fn set_pending_timeouts(count: usize) {
    gauge!(names::PENDING_TIMEOUTS).set(count as f64);
}
