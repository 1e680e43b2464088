//! Middleware configuration loaded from environment variables.
//!
//! All configuration is loaded from environment variables with defaults that
//! match the MCP method timeout table. A `.env` file is honored if present.
//!
//! # Timeouts
//!
//! - `RPC_DEFAULT_TIMEOUT_MS`: Timeout for methods without an override (default: 30000)
//! - `RPC_MAX_TIMEOUT_MS`: Hard ceiling for every method (default: 120000)
//! - `RPC_METHOD_TIMEOUTS`: `method=ms` pairs, comma separated, merged over the
//!   built-in table (e.g. `tools/call=45000,prompts/get=2000`)
//!
//! # Payload Limits
//!
//! - `MAX_PARAMS_BYTES`: Serialized params ceiling (default: 100000)
//! - `SAMPLING_MAX_MESSAGES`: Messages per `sampling/create` (default: 50)
//! - `SAMPLING_MAX_CONTENT_CHARS`: Characters per sampling message (default: 10000)

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use crate::error::{MiddlewareError, MiddlewareResult};
use crate::middleware::{DEFAULT_METHOD_TIMEOUTS_MS, DEFAULT_TIMEOUT_MS, MAX_TIMEOUT_MS, TimeoutPolicy};
use crate::validation::{
    MAX_MESSAGE_CONTENT_CHARS, MAX_PARAMS_BYTES, MAX_SAMPLING_MESSAGES, ValidationLimits,
};

/// Middleware configuration.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// let middleware = ProtocolMiddleware::from_config(&config);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Timeout Configuration
    // =========================================================================
    /// Timeout for methods without an override (default: 30s)
    pub default_timeout: Duration,

    /// Ceiling applied to every method's timeout (default: 120s)
    pub max_timeout: Duration,

    /// Per-method overrides, built-in table merged with `RPC_METHOD_TIMEOUTS`
    pub method_timeouts: HashMap<String, Duration>,

    // =========================================================================
    // Payload Limits
    // =========================================================================
    /// Maximum serialized size of request params in bytes (default: 100000)
    pub max_params_bytes: usize,

    /// Maximum messages in a sampling request (default: 50)
    pub sampling_max_messages: usize,

    /// Maximum characters in one sampling message's content (default: 10000)
    pub sampling_max_content_chars: usize,

    // =========================================================================
    // Session / Observability
    // =========================================================================
    /// Session id reported in error contexts (binary generates one if unset)
    pub session_id: Option<String>,

    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,

    /// Port for Prometheus metrics endpoint (default: 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `MiddlewareError::Config` if a value does not parse or the
    /// resulting configuration is inconsistent (e.g. default above maximum).
    pub fn from_env() -> MiddlewareResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let mut method_timeouts = default_method_timeouts();
        if let Ok(raw) = env::var("RPC_METHOD_TIMEOUTS") {
            method_timeouts.extend(parse_method_timeouts(&raw)?);
        }

        let config = Self {
            default_timeout: Duration::from_millis(Self::parse_env(
                "RPC_DEFAULT_TIMEOUT_MS",
                DEFAULT_TIMEOUT_MS,
            )?),
            max_timeout: Duration::from_millis(Self::parse_env(
                "RPC_MAX_TIMEOUT_MS",
                MAX_TIMEOUT_MS,
            )?),
            method_timeouts,

            max_params_bytes: Self::parse_env("MAX_PARAMS_BYTES", MAX_PARAMS_BYTES)?,
            sampling_max_messages: Self::parse_env("SAMPLING_MAX_MESSAGES", MAX_SAMPLING_MESSAGES)?,
            sampling_max_content_chars: Self::parse_env(
                "SAMPLING_MAX_CONTENT_CHARS",
                MAX_MESSAGE_CONTENT_CHARS,
            )?,

            session_id: env::var("SESSION_ID").ok().filter(|s| !s.is_empty()),
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            metrics_port: Self::parse_env("METRICS_PORT", 0)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `MiddlewareError::Config` if validation fails.
    pub fn validate(&self) -> MiddlewareResult<()> {
        if self.default_timeout.is_zero() {
            return Err(MiddlewareError::Config(
                "RPC_DEFAULT_TIMEOUT_MS must be greater than 0".to_string(),
            ));
        }

        if self.default_timeout > self.max_timeout {
            return Err(MiddlewareError::Config(format!(
                "RPC_DEFAULT_TIMEOUT_MS ({:?}) must be <= RPC_MAX_TIMEOUT_MS ({:?})",
                self.default_timeout, self.max_timeout
            )));
        }

        if let Some((method, _)) = self.method_timeouts.iter().find(|(_, t)| t.is_zero()) {
            return Err(MiddlewareError::Config(format!(
                "Timeout for {method} must be greater than 0"
            )));
        }

        if self.max_params_bytes == 0 {
            return Err(MiddlewareError::Config(
                "MAX_PARAMS_BYTES must be greater than 0".to_string(),
            ));
        }

        if self.sampling_max_messages == 0 || self.sampling_max_content_chars == 0 {
            return Err(MiddlewareError::Config(
                "SAMPLING_MAX_MESSAGES and SAMPLING_MAX_CONTENT_CHARS must be greater than 0"
                    .to_string(),
            ));
        }

        Ok(())
    }

    pub fn timeout_policy(&self) -> TimeoutPolicy {
        TimeoutPolicy {
            default: self.default_timeout,
            maximum: self.max_timeout,
            overrides: self.method_timeouts.clone(),
        }
    }

    pub fn validation_limits(&self) -> ValidationLimits {
        ValidationLimits {
            max_params_bytes: self.max_params_bytes,
            max_sampling_messages: self.sampling_max_messages,
            max_message_content_chars: self.sampling_max_content_chars,
        }
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        self.metrics_enabled()
            .then(|| std::net::SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> MiddlewareResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .parse()
                .map_err(|e| MiddlewareError::Config(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }
}

fn default_method_timeouts() -> HashMap<String, Duration> {
    DEFAULT_METHOD_TIMEOUTS_MS
        .iter()
        .map(|(method, ms)| (method.to_string(), Duration::from_millis(*ms)))
        .collect()
}

/// Parse `method=ms` pairs separated by commas. Blank entries are skipped.
///
/// # Errors
///
/// Returns `MiddlewareError::Config` for an entry without `=`, an empty
/// method name or a non-numeric duration.
pub fn parse_method_timeouts(raw: &str) -> MiddlewareResult<HashMap<String, Duration>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (method, ms) = entry.split_once('=').ok_or_else(|| {
                MiddlewareError::Config(format!(
                    "Invalid RPC_METHOD_TIMEOUTS entry '{entry}': expected method=ms"
                ))
            })?;
            let method = method.trim();
            if method.is_empty() {
                return Err(MiddlewareError::Config(format!(
                    "Invalid RPC_METHOD_TIMEOUTS entry '{entry}': empty method"
                )));
            }
            let ms: u64 = ms.trim().parse().map_err(|e| {
                MiddlewareError::Config(format!("Invalid RPC_METHOD_TIMEOUTS entry '{entry}': {e}"))
            })?;
            Ok((method.to_string(), Duration::from_millis(ms)))
        })
        .collect()
}

/// Default configuration for testing and embedding.
///
/// Deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_timeout: Duration::from_millis(MAX_TIMEOUT_MS),
            method_timeouts: default_method_timeouts(),
            max_params_bytes: MAX_PARAMS_BYTES,
            sampling_max_messages: MAX_SAMPLING_MESSAGES,
            sampling_max_content_chars: MAX_MESSAGE_CONTENT_CHARS,
            session_id: None,
            log_level: "info".to_string(),
            metrics_port: 0,
        }
    }
}
