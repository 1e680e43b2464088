//! Compiled JSON Schemas and violation reporting.
//!
//! Schemas are compiled once with `jsonschema` and every error from
//! `iter_errors` becomes a [`Violation`] whose path is a JSON Pointer into
//! the whole message (e.g. `/params/messages/0/role`).

use std::fmt;
use std::sync::Arc;

use jsonschema::Validator;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::error;

use crate::models::JSONRPC_VERSION;

/// One schema violation, located by JSON Pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub path: String,
    pub message: String,
}

impl Violation {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A JSON Schema compiled at construction.
///
/// A schema that fails to compile rejects every instance with a single
/// violation naming the compile error.
#[derive(Clone)]
pub struct Schema {
    source: Value,
    compiled: Result<Arc<Validator>, String>,
}

impl Schema {
    pub fn compile(source: Value) -> Self {
        let compiled = jsonschema::validator_for(&source)
            .map(Arc::new)
            .map_err(|e| {
                error!(error = %e, "Failed to compile JSON schema");
                e.to_string()
            });
        Self { source, compiled }
    }

    pub fn source(&self) -> &Value {
        &self.source
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled.is_ok()
    }

    /// Every violation of `instance`, with pointers prefixed by `root`
    /// (the location of `instance` inside the enclosing message).
    pub fn violations(&self, instance: &Value, root: &str) -> Vec<Violation> {
        match &self.compiled {
            Ok(validator) => validator
                .iter_errors(instance)
                .map(|e| Violation::new(format!("{root}{}", e.instance_path), e.to_string()))
                .collect(),
            Err(reason) => vec![Violation::new(
                root,
                format!("schema failed to compile: {reason}"),
            )],
        }
    }

    pub fn is_valid(&self, instance: &Value) -> bool {
        self.compiled
            .as_ref()
            .is_ok_and(|validator| validator.is_valid(instance))
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("source", &self.source)
            .field("compiled", &self.compiled.is_ok())
            .finish()
    }
}

fn id_schema() -> Value {
    json!({"type": ["string", "number", "null"]})
}

/// Base shape of every inbound request.
pub fn request_envelope() -> Value {
    json!({
        "type": "object",
        "required": ["jsonrpc", "id", "method"],
        "properties": {
            "jsonrpc": {"const": JSONRPC_VERSION},
            "id": id_schema(),
            "method": {"type": "string", "minLength": 1},
            "params": {"type": "object"}
        }
    })
}

/// Base shape of every outbound response: exactly one of `result` / `error`.
pub fn response_envelope() -> Value {
    json!({
        "type": "object",
        "required": ["jsonrpc", "id"],
        "properties": {
            "jsonrpc": {"const": JSONRPC_VERSION},
            "id": id_schema(),
            "error": {
                "type": "object",
                "required": ["code", "message"],
                "properties": {
                    "code": {"type": "integer"},
                    "message": {"type": "string"}
                }
            }
        },
        "oneOf": [
            {"required": ["result"]},
            {"required": ["error"]}
        ]
    })
}
