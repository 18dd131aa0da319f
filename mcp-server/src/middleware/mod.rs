//! Built-in middleware for `tools/list` and `tools/call`.
//!
//! - [`LoggingMiddleware`]: traces every request with its duration
//! - [`RateLimitMiddleware`]: sliding-window call limit per tool
//! - [`ArgumentValidationMiddleware`]: checks call arguments against the
//!   tool's input schema before the backend sees them
//!
//! Rejections are ordinary tool results with `isError: true`, never
//! JSON-RPC errors.

mod logging;
mod rate_limit;
mod validation;

pub use logging::LoggingMiddleware;
pub use rate_limit::RateLimitMiddleware;
pub use validation::ArgumentValidationMiddleware;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counters kept by a middleware.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MiddlewareStats {
    /// Requests seen
    pub total_handled: u64,
    /// Requests answered without reaching the backend
    pub total_rejected: u64,
    /// Mean time spent in this layer and everything after it
    pub avg_processing_time_ms: f64,
    /// When the last request was seen
    pub last_processed: Option<DateTime<Utc>>,
}

impl MiddlewareStats {
    fn record(&mut self, elapsed_ms: f64, rejected: bool) {
        self.total_handled += 1;
        if rejected {
            self.total_rejected += 1;
        }
        self.last_processed = Some(Utc::now());
        self.avg_processing_time_ms = (self.avg_processing_time_ms
            * (self.total_handled - 1) as f64
            + elapsed_ms)
            / self.total_handled as f64;
    }
}
