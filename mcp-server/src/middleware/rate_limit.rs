//! Sliding-window limit on tool calls.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mcp_core::messages::{CallToolParams, CallToolResult};
use mcp_core::middleware::{Middleware, Next, RequestContext};
use mcp_core::McpResult;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::warn;

use super::MiddlewareStats;

/// Status reported in the error result of a rejected call
const TOO_MANY_REQUESTS: u16 = 429;

/// Call timestamps per tool within the current window.
struct SlidingWindow {
    max_calls: usize,
    window: Duration,
    history: HashMap<String, Vec<Instant>>,
}

impl SlidingWindow {
    fn new(max_calls: usize, window: Duration) -> Self {
        Self {
            max_calls,
            window,
            history: HashMap::new(),
        }
    }

    /// Record a call unless the tool is at its limit.
    fn check_and_record(&mut self, tool: &str) -> bool {
        let now = Instant::now();
        let history = self.history.entry(tool.to_string()).or_default();

        if let Some(window_start) = now.checked_sub(self.window) {
            history.retain(|&at| at > window_start);
        }

        if history.len() < self.max_calls {
            history.push(now);
            true
        } else {
            false
        }
    }

    fn current_rate(&self, tool: &str) -> usize {
        let now = Instant::now();
        self.history
            .get(tool)
            .map(|history| {
                history
                    .iter()
                    .filter(|&&at| now.duration_since(at) < self.window)
                    .count()
            })
            .unwrap_or(0)
    }
}

/// Rejects a `tools/call` once its tool has been called `max_calls` times
/// within the last `window`.
///
/// The rejection is a tool result with `isError: true` and status 429; the
/// backend is not called.
pub struct RateLimitMiddleware {
    limiter: Arc<RwLock<SlidingWindow>>,
    stats: Arc<RwLock<MiddlewareStats>>,
}

impl RateLimitMiddleware {
    /// Create the middleware.
    pub fn new(max_calls: usize, window: Duration) -> Self {
        Self {
            limiter: Arc::new(RwLock::new(SlidingWindow::new(max_calls, window))),
            stats: Arc::new(RwLock::new(MiddlewareStats::default())),
        }
    }

    /// Calls recorded for `tool` in the current window.
    pub async fn current_rate(&self, tool: &str) -> usize {
        self.limiter.read().await.current_rate(tool)
    }

    /// Counters so far.
    pub async fn stats(&self) -> MiddlewareStats {
        self.stats.read().await.clone()
    }
}

#[async_trait]
impl Middleware<CallToolParams, CallToolResult> for RateLimitMiddleware {
    fn name(&self) -> &str {
        "rate-limit"
    }

    async fn handle(
        &self,
        request: CallToolParams,
        ctx: &RequestContext,
        next: Next<'_, CallToolParams, CallToolResult>,
    ) -> McpResult<CallToolResult> {
        let started = std::time::Instant::now();

        let mut limiter = self.limiter.write().await;
        let allowed = limiter.check_and_record(&request.name);
        let current_rate = limiter.current_rate(&request.name);
        drop(limiter);

        if !allowed {
            let elapsed = started.elapsed().as_secs_f64() * 1000.0;
            self.stats.write().await.record(elapsed, true);
            warn!(
                tool = %request.name,
                session = ?ctx.session_id,
                "rate limit exceeded ({}/window)",
                current_rate
            );
            return Ok(CallToolResult::error(
                format!(
                    "Rate limit exceeded for tool '{}' ({}/window)",
                    request.name, current_rate
                ),
                Some(TOO_MANY_REQUESTS),
            ));
        }

        let result = next.run(request, ctx).await;
        let elapsed = started.elapsed().as_secs_f64() * 1000.0;
        self.stats.write().await.record(elapsed, false);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcp_core::dispatcher::CallToolMiddleware;
    use mcp_core::middleware::{Endpoint, MiddlewareChain};
    use mcp_core::transport::TransportKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    #[test]
    fn test_window_allows_under_limit() {
        let mut window = SlidingWindow::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            assert!(window.check_and_record("a"));
        }
        assert!(!window.check_and_record("a"));
        assert!(window.check_and_record("b"));
        assert_eq!(window.current_rate("a"), 3);
        assert_eq!(window.current_rate("missing"), 0);
    }

    #[tokio::test]
    async fn test_window_slides() {
        let mut window = SlidingWindow::new(2, Duration::from_millis(200));
        assert!(window.check_and_record("a"));
        assert!(window.check_and_record("a"));
        assert!(!window.check_and_record("a"));

        sleep(Duration::from_millis(250)).await;

        assert!(window.check_and_record("a"));
    }

    struct Counting(AtomicUsize);

    #[async_trait]
    impl Endpoint<CallToolParams, CallToolResult> for Counting {
        async fn call(&self, _request: CallToolParams, _ctx: &RequestContext) -> McpResult<CallToolResult> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(CallToolResult::text("ok"))
        }
    }

    #[tokio::test]
    async fn test_rejection_short_circuits() {
        let limiter = Arc::new(RateLimitMiddleware::new(1, Duration::from_secs(60)));
        let endpoint = Arc::new(Counting(AtomicUsize::new(0)));
        let layer: Arc<CallToolMiddleware> = limiter.clone();
        let chain = MiddlewareChain::compose(vec![layer], endpoint.clone());
        let ctx = RequestContext::new(TransportKind::StreamableHttp);
        let call = || CallToolParams {
            name: "slow-op".to_string(),
            arguments: None,
        };

        let first = chain.call(call(), &ctx).await.unwrap();
        assert!(!first.is_error);

        let second = chain.call(call(), &ctx).await.unwrap();
        assert!(second.is_error);
        assert_eq!(
            second.structured_content.as_ref().unwrap()["status"],
            TOO_MANY_REQUESTS
        );

        assert_eq!(endpoint.0.load(Ordering::SeqCst), 1);
        let stats = limiter.stats().await;
        assert_eq!(stats.total_handled, 2);
        assert_eq!(stats.total_rejected, 1);
        assert_eq!(limiter.current_rate("slow-op").await, 1);
    }
}
