//! # MCP Server
//!
//! HTTP, SSE and WebSocket front end for [`mcp_core`], with a configurable
//! HTTP tool backend and the built-in middleware.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mcp_server::{build_dispatcher, HttpToolBackend, McpServer, ServerConfig};
//!
//! # async fn run() -> mcp_core::McpResult<()> {
//! let config = ServerConfig::from_file("server.yaml")?;
//! let backend = Arc::new(HttpToolBackend::from_config(&config.backend)?);
//! let server = McpServer::new(config.clone(), build_dispatcher(&config, backend));
//!
//! let listener = tokio::net::TcpListener::bind(config.bind_addr()?).await?;
//! server.serve(listener).await
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod config;
pub mod middleware;
pub mod server;

use std::sync::Arc;

use mcp_core::dispatcher::{Dispatcher, ToolBackend};
use mcp_core::messages::Implementation;
use mcp_core::registry::ToolRegistry;

pub use backend::{CatalogSource, HttpToolBackend};
pub use config::ServerConfig;
pub use middleware::{ArgumentValidationMiddleware, LoggingMiddleware, RateLimitMiddleware};
pub use server::McpServer;

/// Current version of the mcp-server crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build the dispatcher described by `config` over `backend`.
///
/// Call chain order is logging, rate limit, argument validation; each of
/// the last two only when configured.
pub fn build_dispatcher(config: &ServerConfig, backend: Arc<dyn ToolBackend>) -> Arc<Dispatcher> {
    let registry = Arc::new(ToolRegistry::new());
    let logging = Arc::new(LoggingMiddleware::new(config.log_arguments));

    let mut builder = Dispatcher::builder(backend)
        .registry(registry.clone())
        .filter(config.tools.clone())
        .server_info(Implementation::new("mcp-server", VERSION))
        .list_middleware(logging.clone())
        .call_middleware(logging);

    if let Some(limit) = &config.rate_limit {
        builder = builder.call_middleware(Arc::new(RateLimitMiddleware::new(
            limit.max_calls,
            limit.window,
        )));
    }
    if config.validate_arguments {
        builder = builder.call_middleware(Arc::new(ArgumentValidationMiddleware::new(registry)));
    }

    let dispatcher = builder.build();
    let (list, call) = dispatcher.chain_names();
    tracing::debug!(?list, ?call, "middleware chains composed");
    Arc::new(dispatcher)
}
