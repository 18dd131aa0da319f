//! Request tracing for both tool chains.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use mcp_core::messages::{CallToolParams, CallToolResult, ListToolsParams, ListToolsResult};
use mcp_core::middleware::{Middleware, Next, RequestContext};
use mcp_core::McpResult;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::MiddlewareStats;

/// Logs every `tools/list` and `tools/call` with its outcome and duration.
///
/// The same instance can sit in both chains; the stats are shared.
pub struct LoggingMiddleware {
    stats: Arc<RwLock<MiddlewareStats>>,
    /// Whether call arguments are logged (may contain secrets)
    log_arguments: bool,
}

impl LoggingMiddleware {
    /// Create the middleware.
    pub fn new(log_arguments: bool) -> Self {
        Self {
            stats: Arc::new(RwLock::new(MiddlewareStats::default())),
            log_arguments,
        }
    }

    /// Counters so far.
    pub async fn stats(&self) -> MiddlewareStats {
        self.stats.read().await.clone()
    }

    async fn record(&self, started: Instant) {
        let elapsed = started.elapsed().as_secs_f64() * 1000.0;
        self.stats.write().await.record(elapsed, false);
    }
}

#[async_trait]
impl Middleware<ListToolsParams, ListToolsResult> for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    async fn handle(
        &self,
        request: ListToolsParams,
        ctx: &RequestContext,
        next: Next<'_, ListToolsParams, ListToolsResult>,
    ) -> McpResult<ListToolsResult> {
        let started = Instant::now();
        let result = next.run(request, ctx).await;
        self.record(started).await;

        match &result {
            Ok(list) => debug!(
                session = ?ctx.session_id,
                transport = %ctx.transport,
                tools = list.tools.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "tools/list"
            ),
            Err(e) => warn!(session = ?ctx.session_id, "tools/list failed: {}", e),
        }
        result
    }
}

#[async_trait]
impl Middleware<CallToolParams, CallToolResult> for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    async fn handle(
        &self,
        request: CallToolParams,
        ctx: &RequestContext,
        next: Next<'_, CallToolParams, CallToolResult>,
    ) -> McpResult<CallToolResult> {
        let started = Instant::now();
        let tool = request.name.clone();
        if self.log_arguments {
            info!(
                tool = %tool,
                session = ?ctx.session_id,
                "tools/call arguments: {}",
                request.arguments_or_empty()
            );
        }

        let result = next.run(request, ctx).await;
        self.record(started).await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(outcome) if outcome.is_error => {
                info!(tool = %tool, session = ?ctx.session_id, elapsed_ms, "tools/call returned an error result")
            }
            Ok(_) => info!(tool = %tool, session = ?ctx.session_id, elapsed_ms, "tools/call"),
            Err(e) => warn!(tool = %tool, session = ?ctx.session_id, "tools/call failed: {}", e),
        }
        result
    }
}
