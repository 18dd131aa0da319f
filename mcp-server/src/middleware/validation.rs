//! Argument checks against a tool's input schema.
//!
//! Only the top level is checked: `required` keys and the primitive `type`
//! of each declared property. Nested schemas are left to the backend.

use std::sync::Arc;

use async_trait::async_trait;
use mcp_core::messages::{CallToolParams, CallToolResult};
use mcp_core::middleware::{Middleware, Next, RequestContext};
use mcp_core::registry::ToolRegistry;
use mcp_core::McpResult;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Why a set of arguments was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[allow(missing_docs)]
pub enum ArgumentError {
    /// Arguments are not a JSON object
    #[error("Arguments must be an object, got {found}")]
    NotAnObject { found: &'static str },

    /// A required property is absent
    #[error("Missing required argument '{field}'")]
    MissingRequired { field: String },

    /// A property has the wrong primitive type
    #[error("Argument '{field}' must be of type '{expected}' but got '{found}'")]
    WrongType {
        field: String,
        expected: String,
        found: &'static str,
    },
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn matches_type(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.as_f64().is_some_and(|n| n.fract() == 0.0),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

/// Check `arguments` against `schema`.
pub fn check_arguments(schema: &Value, arguments: &Value) -> Result<(), ArgumentError> {
    let Some(arguments) = arguments.as_object() else {
        return Err(ArgumentError::NotAnObject {
            found: type_name(arguments),
        });
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !arguments.contains_key(field) {
                return Err(ArgumentError::MissingRequired {
                    field: field.to_string(),
                });
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };
    for (field, value) in arguments {
        let Some(declared) = properties.get(field).and_then(|p| p.get("type")) else {
            continue;
        };
        // `type` may be a single name or a list of alternatives
        let accepted = match declared {
            Value::String(expected) => matches_type(expected, value),
            Value::Array(options) => options
                .iter()
                .filter_map(Value::as_str)
                .any(|expected| matches_type(expected, value)),
            _ => true,
        };
        if !accepted {
            return Err(ArgumentError::WrongType {
                field: field.clone(),
                expected: match declared {
                    Value::String(expected) => expected.clone(),
                    other => other.to_string(),
                },
                found: type_name(value),
            });
        }
    }
    Ok(())
}

/// Rejects a `tools/call` whose arguments do not fit the tool's input schema.
///
/// Tools missing from the current snapshot pass through so the endpoint can
/// report them.
pub struct ArgumentValidationMiddleware {
    registry: Arc<ToolRegistry>,
}

impl ArgumentValidationMiddleware {
    /// Validate against tools published in `registry`.
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Middleware<CallToolParams, CallToolResult> for ArgumentValidationMiddleware {
    fn name(&self) -> &str {
        "argument-validation"
    }

    async fn handle(
        &self,
        request: CallToolParams,
        ctx: &RequestContext,
        next: Next<'_, CallToolParams, CallToolResult>,
    ) -> McpResult<CallToolResult> {
        if let Some(tool) = self.registry.resolve(&request.name) {
            if let Err(e) = check_arguments(&tool.input_schema, &request.arguments_or_empty()) {
                debug!(tool = %request.name, session = ?ctx.session_id, "rejected arguments: {}", e);
                return Ok(CallToolResult::error(e.to_string(), None));
            }
        }
        next.run(request, ctx).await
    }
}
