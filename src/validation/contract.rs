//! Per-method parameter and result contracts, written as JSON Schema.

use std::collections::HashMap;

use serde_json::{Value, json};

use super::schema::Schema;

/// Methods the validator accepts. Anything else is rejected as not found.
pub const ALLOWED_METHODS: [&str; 8] = [
    "tools/list",
    "tools/call",
    "resources/list",
    "resources/read",
    "prompts/list",
    "prompts/get",
    "sampling/create",
    "roots/list",
];

pub fn is_allowed_method(method: &str) -> bool {
    ALLOWED_METHODS.contains(&method)
}

/// Compiled parameter and result schemas for one method.
#[derive(Debug, Clone, Default)]
pub struct MethodSchemas {
    pub params: Option<Schema>,
    pub result: Option<Schema>,
}

/// Mapping from method name to its schemas.
///
/// Only methods present here get schema-level validation.
#[derive(Debug, Clone, Default)]
pub struct MethodContract {
    methods: HashMap<String, MethodSchemas>,
}

impl MethodContract {
    pub fn new() -> Self {
        Self::default()
    }

    /// Contracts for every allowed MCP method.
    pub fn mcp_default() -> Self {
        let mut contract = Self::new();

        contract.register(
            "tools/list",
            Some(paginated_params()),
            Some(listing(
                "tools",
                json!({
                    "type": "object",
                    "required": ["name", "inputSchema"],
                    "properties": {
                        "name": non_empty_string(),
                        "description": {"type": "string"},
                        "inputSchema": {"type": "object"}
                    }
                }),
            )),
        );
        contract.register(
            "tools/call",
            Some(json!({
                "type": "object",
                "required": ["name"],
                "properties": {
                    "name": non_empty_string(),
                    "arguments": {"type": "object"}
                }
            })),
            Some(json!({
                "type": "object",
                "required": ["content"],
                "properties": {
                    "content": {"type": "array", "items": content_block()},
                    "isError": {"type": "boolean"}
                }
            })),
        );
        contract.register(
            "resources/list",
            Some(paginated_params()),
            Some(listing(
                "resources",
                json!({
                    "type": "object",
                    "required": ["uri", "name"],
                    "properties": {
                        "uri": non_empty_string(),
                        "name": {"type": "string"},
                        "description": {"type": "string"},
                        "mimeType": {"type": "string"}
                    }
                }),
            )),
        );
        contract.register(
            "resources/read",
            Some(json!({
                "type": "object",
                "required": ["uri"],
                "properties": {"uri": non_empty_string()}
            })),
            Some(json!({
                "type": "object",
                "required": ["contents"],
                "properties": {
                    "contents": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["uri"],
                            "properties": {
                                "uri": {"type": "string"},
                                "mimeType": {"type": "string"},
                                "text": {"type": "string"},
                                "blob": {"type": "string"}
                            }
                        }
                    }
                }
            })),
        );
        contract.register(
            "prompts/list",
            Some(paginated_params()),
            Some(listing(
                "prompts",
                json!({
                    "type": "object",
                    "required": ["name"],
                    "properties": {
                        "name": non_empty_string(),
                        "description": {"type": "string"}
                    }
                }),
            )),
        );
        contract.register(
            "prompts/get",
            Some(json!({
                "type": "object",
                "required": ["name"],
                "properties": {
                    "name": non_empty_string(),
                    "arguments": {"type": "object", "additionalProperties": {"type": "string"}}
                }
            })),
            Some(json!({
                "type": "object",
                "required": ["messages"],
                "properties": {
                    "description": {"type": "string"},
                    "messages": {"type": "array", "items": message()}
                }
            })),
        );
        contract.register(
            "sampling/create",
            Some(json!({
                "type": "object",
                "required": ["messages"],
                "properties": {
                    "messages": {"type": "array", "items": message()},
                    "systemPrompt": {"type": "string"},
                    "maxTokens": {"type": "integer", "minimum": 1},
                    "temperature": {"type": "number"},
                    "stopSequences": {"type": "array", "items": {"type": "string"}}
                }
            })),
            Some(json!({
                "type": "object",
                "required": ["role", "content"],
                "properties": {
                    "role": role(),
                    "content": content_block(),
                    "model": {"type": "string"},
                    "stopReason": {"type": "string"}
                }
            })),
        );
        contract.register(
            "roots/list",
            None,
            Some(listing(
                "roots",
                json!({
                    "type": "object",
                    "required": ["uri"],
                    "properties": {
                        "uri": non_empty_string(),
                        "name": {"type": "string"}
                    }
                }),
            )),
        );

        contract
    }

    /// Compile and register (or replace) the schemas for a method.
    pub fn register(&mut self, method: impl Into<String>, params: Option<Value>, result: Option<Value>) {
        self.methods.insert(
            method.into(),
            MethodSchemas {
                params: params.map(Schema::compile),
                result: result.map(Schema::compile),
            },
        );
    }

    pub fn get(&self, method: &str) -> Option<&MethodSchemas> {
        self.methods.get(method)
    }

    pub fn params_schema(&self, method: &str) -> Option<&Schema> {
        self.get(method).and_then(|s| s.params.as_ref())
    }

    pub fn result_schema(&self, method: &str) -> Option<&Schema> {
        self.get(method).and_then(|s| s.result.as_ref())
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

fn non_empty_string() -> Value {
    json!({"type": "string", "minLength": 1})
}

fn paginated_params() -> Value {
    json!({
        "type": "object",
        "properties": {"cursor": {"type": "string"}}
    })
}

/// `{ <key>: [item...], nextCursor? }`
fn listing(key: &str, item: Value) -> Value {
    json!({
        "type": "object",
        "required": [key],
        "properties": {
            key: {"type": "array", "items": item},
            "nextCursor": {"type": "string"}
        }
    })
}

fn role() -> Value {
    json!({"enum": ["user", "assistant"]})
}

fn content_block() -> Value {
    json!({
        "type": "object",
        "required": ["type"],
        "properties": {
            "type": non_empty_string(),
            "text": {"type": "string"},
            "data": {"type": "string"},
            "mimeType": {"type": "string"}
        }
    })
}

fn message() -> Value {
    json!({
        "type": "object",
        "required": ["role", "content"],
        "properties": {
            "role": role(),
            "content": content_block()
        }
    })
}
