//! # MCP Core Library
//!
//! `mcp-core` is the protocol layer of an MCP (Model Context Protocol) server
//! that exposes a backend's operations as tools to AI-agent clients.
//!
//! ## Features
//!
//! - **JSON-RPC envelopes**: message types, batch parsing and strict envelope validation
//! - **Three wire bindings**: stateless HTTP, legacy two-endpoint SSE, WebSocket
//! - **Sessions**: one-time initialization and one open stream per session
//! - **Tool registry**: `$ref` dereferencing, stable slug naming with collision
//!   suffixes, include/exclude filters, atomically published snapshots
//! - **Middleware**: ordered interceptors in front of `tools/list` and `tools/call`
//! - **Error mapping**: every failure knows its HTTP status and JSON-RPC code
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use mcp_core::dispatcher::{Dispatcher, ToolBackend, ToolFailure};
//! use mcp_core::messages::{JsonRpcMessage, JsonRpcRequest};
//! use mcp_core::middleware::RequestContext;
//! use mcp_core::registry::{OperationDef, OperationGroup, SchemaSource};
//! use mcp_core::transport::TransportKind;
//! use mcp_core::McpResult;
//! use serde_json::{json, Value};
//!
//! struct Clock;
//!
//! #[async_trait]
//! impl ToolBackend for Clock {
//!     async fn list_tools(&self, _ctx: &RequestContext) -> McpResult<SchemaSource> {
//!         Ok(SchemaSource::from_groups(vec![OperationGroup::new(
//!             "read",
//!             vec![OperationDef::new("clock.now")],
//!         )]))
//!     }
//!
//!     async fn invoke(&self, _id: &str, _args: Value, _ctx: &RequestContext) -> Result<Value, ToolFailure> {
//!         Ok(json!("12:00"))
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let dispatcher = Dispatcher::builder(Arc::new(Clock)).build();
//! let ctx = RequestContext::new(TransportKind::StreamableHttp);
//!
//! let request = JsonRpcRequest::new(1, "tools/call", json!({"name": "clock-now"}));
//! let Some(JsonRpcMessage::Response(reply)) = dispatcher.dispatch(request.into(), &ctx).await else {
//!     panic!("requests always get a reply");
//! };
//! assert_eq!(reply.result.unwrap()["content"][0]["text"], "12:00");
//! # });
//! ```
//!
//! ## Architecture
//!
//! - [`error`]: error taxonomy with HTTP and JSON-RPC mappings
//! - [`messages`]: JSON-RPC envelopes and the MCP messages a tool server speaks
//! - [`validation`]: envelope parsing and validation at the transport boundary
//! - [`transport`]: the transport contract and its three implementations
//! - [`session`]: the session registry
//! - [`registry`]: tool derivation from a backend catalog
//! - [`middleware`]: request context and middleware composition
//! - [`dispatcher`]: method routing, backend and credential seams

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::uninlined_format_args)]

pub mod dispatcher;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod registry;
pub mod session;
pub mod transport;
pub mod validation;

// Re-export commonly used types for convenience
pub use dispatcher::{CredentialProvider, DispatchObserver, Dispatcher, ToolBackend, ToolFailure};
pub use error::{McpError, McpResult};
pub use messages::{
    CallToolParams, CallToolResult, Implementation, JsonRpcMessage, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, ProtocolVersion, Tool,
};
pub use middleware::{Middleware, MiddlewareChain, Next, RequestContext};
pub use registry::{SchemaSource, ToolFilter, ToolRegistry};
pub use session::{Session, SessionRegistry};
pub use transport::{Transport, TransportInfo, TransportKind, TransportOptions};

/// Current version of the mcp-core library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Header carrying the session id on HTTP requests and responses
pub const SESSION_HEADER: &str = "mcp-session-id";
