//! Tool discovery and execution messages.
//!
//! - `tools/list` → [`ListToolsResult`]
//! - `tools/call` with [`CallToolParams`] → [`CallToolResult`]
//!
//! Tool failures are not JSON-RPC errors: they travel as a successful
//! response whose result has `isError: true`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Parameters of a `tools/list` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ListToolsParams {
    /// Optional cursor for pagination
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Result of a `tools/list` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    /// Tools in the current catalog snapshot
    pub tools: Vec<Tool>,

    /// Cursor for the next page; the server never paginates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

impl ListToolsResult {
    /// Wrap a full catalog.
    pub fn new(tools: Vec<Tool>) -> Self {
        Self {
            tools,
            next_cursor: None,
        }
    }
}

/// A tool as advertised to clients.
///
/// `internal_id` is the backend's key for the operation and never leaves
/// the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    /// Unique name within one registry snapshot
    pub name: String,

    /// Optional display title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Human-readable description of what the tool does
    #[serde(default)]
    pub description: String,

    /// JSON Schema object for the arguments
    pub input_schema: Value,

    /// JSON Schema object for the structured result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,

    /// Namespace of the application that owns the tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_namespace: Option<String>,

    /// Backend key used to invoke the tool
    #[serde(skip)]
    pub internal_id: String,
}

impl Tool {
    /// Create a tool with a permissive input schema.
    pub fn new(name: impl Into<String>, internal_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: None,
            description: String::new(),
            input_schema: json!({"type": "object", "additionalProperties": true}),
            output_schema: None,
            app_namespace: None,
            internal_id: internal_id.into(),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the input schema.
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }
}

/// Parameters of a `tools/call` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallToolParams {
    /// Name of the tool to call
    pub name: String,

    /// Arguments to pass to the tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

impl CallToolParams {
    /// Arguments as a JSON object, `{}` when absent.
    pub fn arguments_or_empty(&self) -> Value {
        self.arguments
            .clone()
            .unwrap_or_else(|| Value::Object(Default::default()))
    }
}

/// Result of a `tools/call` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    /// Content blocks returned by the tool
    #[serde(default)]
    pub content: Vec<ToolContent>,

    /// Set when the call failed
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,

    /// Machine-readable result, when the tool produced JSON
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
}

impl CallToolResult {
    /// A successful result carrying one text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
            structured_content: None,
        }
    }

    /// A successful result built from the backend's JSON value.
    ///
    /// Strings become a text block as-is; anything else is rendered as JSON
    /// text and, for objects, also attached as structured content.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(text) => Self::text(text),
            other => {
                let structured_content = other.is_object().then(|| other.clone());
                Self {
                    content: vec![ToolContent::Text {
                        text: other.to_string(),
                    }],
                    is_error: false,
                    structured_content,
                }
            }
        }
    }

    /// A failed call with a message and an optional upstream status.
    pub fn error(message: impl Into<String>, status: Option<u16>) -> Self {
        let message = message.into();
        let structured_content = Some(match status {
            Some(status) => json!({"message": message, "status": status}),
            None => json!({"message": message}),
        });
        Self {
            content: vec![ToolContent::Text { text: message }],
            is_error: true,
            structured_content,
        }
    }
}

/// One content block of a tool result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolContent {
    /// Text content
    #[serde(rename = "text")]
    Text {
        /// The text content
        text: String,
    },

    /// Image content
    #[serde(rename = "image")]
    Image {
        /// Image data (base64 encoded)
        data: String,

        /// MIME type of the image
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}
