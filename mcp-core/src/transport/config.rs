//! Options shared by the server-side transports.
//!
//! ```rust
//! use mcp_core::transport::{ResponseMode, TransportOptions};
//! use std::time::Duration;
//!
//! let options = TransportOptions {
//!     response_mode: ResponseMode::Stream,
//!     keep_alive: Duration::from_secs(5),
//!     ..Default::default()
//! };
//! assert!(options.validate().is_ok());
//! ```

use crate::error::{ConfigError, McpResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the stateless HTTP transport answers a POST.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    /// Wait for the reply and return it as an `application/json` body
    #[default]
    Json,
    /// Return an event stream immediately and write replies as they come
    Stream,
}

/// Tunables for the HTTP, SSE and WebSocket transports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportOptions {
    /// Reply style of the stateless HTTP transport
    pub response_mode: ResponseMode,

    /// Outbound queue depth of stream transports; `send` waits when full
    pub send_queue_capacity: usize,

    /// Interval between SSE keep-alive comments
    #[serde(with = "humantime_serde")]
    pub keep_alive: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            response_mode: ResponseMode::Json,
            send_queue_capacity: 64,
            keep_alive: Duration::from_secs(15),
        }
    }
}

impl TransportOptions {
    /// Validate the options.
    pub fn validate(&self) -> McpResult<()> {
        if self.send_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                parameter: "send_queue_capacity".to_string(),
                value: "0".to_string(),
                reason: "Queue capacity must be greater than zero".to_string(),
            }
            .into());
        }
        if self.keep_alive.is_zero() {
            return Err(ConfigError::InvalidValue {
                parameter: "keep_alive".to_string(),
                value: "0s".to_string(),
                reason: "Keep-alive interval must be greater than zero".to_string(),
            }
            .into());
        }
        Ok(())
    }
}
