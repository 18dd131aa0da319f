//! Error types for the MCP server core.
//!
//! Every failure that can happen between an inbound connection and the tool
//! backend is expressed as one of the variants below. Each variant knows which
//! HTTP status and which JSON-RPC error code it maps to, so transports can turn
//! a boundary failure into a wire response without consulting the dispatcher.
//!
//! | Condition | HTTP | JSON-RPC |
//! |---|---|---|
//! | Malformed JSON body | 400 | -32700 |
//! | Schema-invalid message | 400 | -32600 |
//! | Missing session id | 400 | -32000 |
//! | Unknown session id | 404 | -32001 |
//! | Already initialized | 400 | -32600 |
//! | Accept header unusable | 406 | -32000 |
//! | Wrong Content-Type | 415 | -32000 |
//! | Second concurrent stream | 409 | -32000 |
//! | Unsupported HTTP method | 405 | -32000 |
//! | Anything unexpected | 500 | -32603 |

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::messages::{JsonRpcError, JsonRpcResponse, RequestId};

/// JSON-RPC code used for transport-level rejections that have no standard code.
pub const SERVER_ERROR: i32 = -32000;

/// JSON-RPC code used when a session id does not match a live session.
pub const SESSION_NOT_FOUND: i32 = -32001;

/// The main error type for all MCP server operations.
///
/// # Examples
///
/// ```rust
/// use mcp_core::error::{McpError, ProtocolError};
///
/// let error = McpError::Protocol(ProtocolError::MissingSessionId);
/// assert_eq!(error.http_status().as_u16(), 400);
/// assert_eq!(error.to_json_rpc_error().code, -32000);
/// ```
#[derive(Error, Debug)]
pub enum McpError {
    /// Transport lifecycle and delivery errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Protocol-level errors detected at the transport boundary
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Tool resolution and execution errors
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// Configuration errors (invalid config files, missing parameters, etc.)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Serialization/deserialization errors
    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        /// The underlying serde_json error
        source: serde_json::Error,
    },

    /// IO errors (socket binding, file access, etc.)
    #[error("IO error: {source}")]
    Io {
        #[from]
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Generic errors for cases not covered by specific variants
    #[error("Internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

/// Transport lifecycle errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum TransportError {
    /// `start` was called on an instance that is already running
    #[error("{transport_type} transport already started")]
    AlreadyStarted { transport_type: String },

    /// The transport was never started, or has been closed
    #[error("Transport not connected ({transport_type}): {reason}")]
    NotConnected {
        transport_type: String,
        reason: String,
    },

    /// A WebSocket was already bound to this transport instance
    #[error("WebSocket already accepted by this transport")]
    AlreadyAccepted,

    /// A pending exchange was aborted because the transport closed
    #[error("Exchange cancelled ({transport_type}): {reason}")]
    Cancelled {
        transport_type: String,
        reason: String,
    },

    /// `send` was called after the HTTP response had been written
    #[error("Response already committed for this exchange")]
    ResponseCommitted,

    /// The peer could not be written to
    #[error("Failed to send message via {transport_type}: {reason}")]
    SendFailed {
        transport_type: String,
        reason: String,
    },
}

/// Protocol violations detected before a message reaches the dispatcher.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ProtocolError {
    /// The body is not valid JSON
    #[error("Parse error: {reason}")]
    ParseError { reason: String },

    /// The body is JSON but not a valid JSON-RPC 2.0 message
    #[error("Invalid Request: {reason}")]
    InvalidRequest { reason: String },

    /// Session tracking is enabled and the request carries no session id
    #[error("Bad Request: session id required")]
    MissingSessionId,

    /// The session id does not match a live session
    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    /// An `initialize` request arrived for an initialized session
    #[error("Invalid Request: server already initialized")]
    AlreadyInitialized,

    /// The Accept header allows neither JSON nor an event stream
    #[error("Not Acceptable: client must accept application/json or text/event-stream")]
    NotAcceptable,

    /// The POST body is not declared as JSON
    #[error("Unsupported Media Type: {content_type}")]
    UnsupportedMediaType { content_type: String },

    /// A session already has an open stream
    #[error("Conflict: only one stream per session")]
    StreamConflict { session_id: String },

    /// The HTTP method is not served on this route
    #[error("Method not allowed: {method}")]
    MethodNotAllowed { method: String },

    /// The session registry is full
    #[error("Service unavailable: session limit of {max_sessions} reached")]
    SessionLimitReached { max_sessions: usize },
}

/// Tool resolution and execution errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ToolError {
    /// The tool name is not part of the last published catalog snapshot
    #[error("Tool not found: {name}")]
    NotFound { name: String },

    /// The backend reported a failure while executing the tool
    #[error("Tool '{name}' failed: {message}")]
    Execution {
        name: String,
        message: String,
        status: Option<u16>,
    },

    /// The backend could not produce a catalog
    #[error("Tool catalog unavailable: {reason}")]
    CatalogUnavailable { reason: String },
}

/// Configuration-related errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// Configuration file has invalid format
    #[error("Invalid configuration format in {path}: {reason}")]
    InvalidFormat { path: String, reason: String },

    /// Configuration parameter has invalid value
    #[error("Invalid value for parameter '{parameter}': {value} - {reason}")]
    InvalidValue {
        parameter: String,
        value: String,
        reason: String,
    },
}

/// Convenience type alias for Results using McpError.
pub type McpResult<T> = Result<T, McpError>;

impl McpError {
    /// Create a new internal error with a custom message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a `NotConnected` transport error.
    pub fn not_connected(transport_type: &str, reason: impl Into<String>) -> Self {
        Self::Transport(TransportError::NotConnected {
            transport_type: transport_type.to_string(),
            reason: reason.into(),
        })
    }

    /// Create an `InvalidRequest` protocol error.
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::Protocol(ProtocolError::InvalidRequest {
            reason: reason.into(),
        })
    }

    /// Get the error category for this error.
    ///
    /// Used as a stable field in log lines.
    pub fn category(&self) -> &'static str {
        match self {
            McpError::Transport(_) => "transport",
            McpError::Protocol(_) => "protocol",
            McpError::Tool(_) => "tool",
            McpError::Config(_) => "config",
            McpError::Serialization { .. } => "serialization",
            McpError::Io { .. } => "io",
            McpError::Internal { .. } => "internal",
        }
    }

    /// HTTP status used when this error terminates an HTTP exchange.
    pub fn http_status(&self) -> StatusCode {
        match self {
            McpError::Protocol(err) => match err {
                ProtocolError::ParseError { .. }
                | ProtocolError::InvalidRequest { .. }
                | ProtocolError::MissingSessionId
                | ProtocolError::AlreadyInitialized => StatusCode::BAD_REQUEST,
                ProtocolError::SessionNotFound { .. } => StatusCode::NOT_FOUND,
                ProtocolError::NotAcceptable => StatusCode::NOT_ACCEPTABLE,
                ProtocolError::UnsupportedMediaType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                ProtocolError::StreamConflict { .. } => StatusCode::CONFLICT,
                ProtocolError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
                ProtocolError::SessionLimitReached { .. } => StatusCode::SERVICE_UNAVAILABLE,
            },
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON-RPC error object describing this error.
    ///
    /// Internal failures only expose their message string.
    pub fn to_json_rpc_error(&self) -> JsonRpcError {
        match self {
            McpError::Protocol(err) => match err {
                ProtocolError::ParseError { reason } => {
                    JsonRpcError::new(-32700, "Parse error", Some(reason.clone().into()))
                }
                ProtocolError::InvalidRequest { reason } => JsonRpcError::invalid_request(reason),
                ProtocolError::AlreadyInitialized => {
                    JsonRpcError::new(-32600, "Invalid Request: server already initialized", None)
                }
                ProtocolError::SessionNotFound { .. } => {
                    JsonRpcError::new(SESSION_NOT_FOUND, "Session not found", None)
                }
                other => JsonRpcError::new(SERVER_ERROR, other.to_string(), None),
            },
            other => JsonRpcError::internal_error(other.to_string()),
        }
    }
}

impl IntoResponse for McpError {
    fn into_response(self) -> Response {
        let status = self.http_status();
        if status.is_server_error() {
            tracing::error!(category = self.category(), "request failed: {}", self);
        } else {
            tracing::debug!(category = self.category(), "request rejected: {}", self);
        }

        let body = JsonRpcResponse::error(RequestId::Null, self.to_json_rpc_error());
        let mut response = (status, axum::Json(body)).into_response();
        if status == StatusCode::METHOD_NOT_ALLOWED {
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static("GET, POST, DELETE"));
        }
        response
    }
}
