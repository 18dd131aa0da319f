//! Server-side MCP transports.
//!
//! Three wire bindings implement the same [`Transport`] contract:
//!
//! - [`streamable_http`]: one POST = one exchange, answered with JSON or an
//!   event stream
//! - [`sse`]: the legacy two-endpoint mode, a long-lived GET event stream
//!   fed by POSTs to a side channel
//! - [`websocket`]: a full-duplex socket
//!
//! A transport never interprets messages. It validates envelopes, hands each
//! inbound message to its [`TransportObserver`] in arrival order and writes
//! whatever is passed to [`Transport::send`].
//!
//! # Examples
//!
//! ```rust
//! use mcp_core::messages::{JsonRpcMessage, JsonRpcResponse};
//! use mcp_core::transport::{Transport, TransportOptions};
//! use mcp_core::transport::websocket::WebSocketTransport;
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let transport = WebSocketTransport::new("session-1", &TransportOptions::default());
//! // Sending before start is refused
//! let reply = JsonRpcMessage::from(JsonRpcResponse::success(1, json!({})));
//! assert!(transport.send(reply).await.is_err());
//! # });
//! ```

pub mod config;
pub mod sse;
mod stream;
pub mod streamable_http;
pub mod websocket;

pub use config::*;

use crate::error::{McpError, McpResult, TransportError};
use crate::messages::JsonRpcMessage;
use crate::validation::JsonRpcPayload;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, SystemTime};

/// Which wire binding a transport speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Stateless request/response over HTTP
    StreamableHttp,
    /// Legacy GET stream + POST side channel
    Sse,
    /// Full-duplex WebSocket
    WebSocket,
}

impl TransportKind {
    /// Stable name used in logs and errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StreamableHttp => "streamable-http",
            Self::Sse => "sse",
            Self::WebSocket => "websocket",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contract shared by the three wire bindings.
///
/// All methods take `&self`: a transport is shared between the HTTP handler
/// that owns the connection, the session registry and the observer that
/// writes replies.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Wire binding of this instance.
    fn kind(&self) -> TransportKind;

    /// Session this transport is bound to, if any.
    fn session_id(&self) -> Option<&str>;

    /// Prepare the transport for use.
    ///
    /// Fails with `AlreadyStarted` when called on a running instance.
    async fn start(&self) -> McpResult<()>;

    /// Deliver one message to the peer.
    ///
    /// Stream transports may wait here for queue space. Fails with
    /// `NotConnected` before `start` and after `close`.
    async fn send(&self, message: JsonRpcMessage) -> McpResult<()>;

    /// Release every resource and fire `on_close` once. Idempotent.
    async fn close(&self) -> McpResult<()>;

    /// Whether `send` can currently succeed.
    fn is_connected(&self) -> bool;

    /// Install the callbacks that receive inbound traffic.
    fn set_observer(&self, observer: Arc<dyn TransportObserver>);

    /// Accept a payload that arrived outside the transport's own connection.
    ///
    /// Only the legacy SSE binding has such a side channel.
    fn post_payload(&self, payload: JsonRpcPayload) -> McpResult<()> {
        let _ = payload;
        Err(McpError::invalid_request(format!(
            "{} transport has no side channel",
            self.kind()
        )))
    }

    /// Counters and metadata for this instance.
    fn get_info(&self) -> TransportInfo;
}

/// Callbacks a transport fires.
#[async_trait]
pub trait TransportObserver: Send + Sync {
    /// An inbound message, in the order the connection received it.
    async fn on_message(&self, message: JsonRpcMessage);

    /// A failure that did not close the transport, such as a malformed frame.
    fn on_error(&self, error: &McpError) {
        tracing::warn!(category = error.category(), "transport error: {}", error);
    }

    /// The transport closed. Fired exactly once.
    fn on_close(&self) {}
}

/// Transport information and statistics.
#[derive(Debug, Clone, Serialize)]
pub struct TransportInfo {
    /// Wire binding
    pub transport_type: TransportKind,

    /// Session the transport is bound to
    pub session_id: Option<String>,

    /// Whether the transport is currently connected
    pub connected: bool,

    /// When `start` succeeded
    pub connected_since: Option<SystemTime>,

    /// Number of inbound messages delivered to the observer
    pub messages_received: u64,

    /// Number of messages written to the peer
    pub messages_sent: u64,

    /// Number of errors reported
    pub errors: u64,

    /// Transport-specific metadata
    pub metadata: std::collections::HashMap<String, serde_json::Value>,
}

impl TransportInfo {
    /// Add transport-specific metadata.
    pub fn add_metadata(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.metadata.insert(key.into(), value);
    }

    /// Get the duration since the transport started.
    pub fn connection_duration(&self) -> Option<Duration> {
        self.connected_since.map(|since| {
            SystemTime::now()
                .duration_since(since)
                .unwrap_or_default()
        })
    }
}

const STATE_IDLE: u8 = 0;
const STATE_STARTED: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Lifecycle bookkeeping shared by every transport implementation.
///
/// Holds the idle → started → closed state machine, the observer and the
/// counters. Background tasks keep an `Arc` to it so they can deliver
/// messages and fire `on_close` without a handle on the transport itself.
pub struct TransportLifecycle {
    kind: TransportKind,
    session_id: Option<String>,
    state: AtomicU8,
    close_fired: AtomicBool,
    observer: RwLock<Option<Arc<dyn TransportObserver>>>,
    connected_since: Mutex<Option<SystemTime>>,
    messages_received: AtomicU64,
    messages_sent: AtomicU64,
    errors: AtomicU64,
}

impl TransportLifecycle {
    /// Create the bookkeeping for a transport that has not started.
    pub fn new(kind: TransportKind, session_id: Option<String>) -> Self {
        Self {
            kind,
            session_id,
            state: AtomicU8::new(STATE_IDLE),
            close_fired: AtomicBool::new(false),
            observer: RwLock::new(None),
            connected_since: Mutex::new(None),
            messages_received: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// Wire binding.
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Bound session, if any.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Move idle → started.
    pub fn start(&self) -> McpResult<()> {
        match self.state.compare_exchange(
            STATE_IDLE,
            STATE_STARTED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                if let Ok(mut since) = self.connected_since.lock() {
                    *since = Some(SystemTime::now());
                }
                tracing::debug!(transport = %self.kind, session = ?self.session_id, "transport started");
                Ok(())
            }
            Err(STATE_STARTED) => Err(TransportError::AlreadyStarted {
                transport_type: self.kind.to_string(),
            }
            .into()),
            Err(_) => Err(McpError::not_connected(self.kind.as_str(), "transport closed")),
        }
    }

    /// Fail with `NotConnected` unless started and not yet closed.
    pub fn ensure_connected(&self) -> McpResult<()> {
        match self.state.load(Ordering::Acquire) {
            STATE_STARTED => Ok(()),
            STATE_IDLE => Err(McpError::not_connected(self.kind.as_str(), "transport not started")),
            _ => Err(McpError::not_connected(self.kind.as_str(), "transport closed")),
        }
    }

    /// Whether the transport is started and not closed.
    pub fn is_connected(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_STARTED
    }

    /// Whether `close` has begun.
    pub fn is_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_CLOSED
    }

    /// Mark the transport closed. Returns `true` only for the first caller,
    /// which then owns the cleanup.
    pub fn begin_close(&self) -> bool {
        self.state.swap(STATE_CLOSED, Ordering::AcqRel) != STATE_CLOSED
    }

    /// Fire `on_close` unless it already fired.
    pub fn fire_close(&self) {
        if self.close_fired.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(transport = %self.kind, session = ?self.session_id, "transport closed");
        if let Some(observer) = self.observer() {
            observer.on_close();
        }
    }

    /// Install the observer, replacing any previous one.
    pub fn set_observer(&self, observer: Arc<dyn TransportObserver>) {
        if let Ok(mut slot) = self.observer.write() {
            *slot = Some(observer);
        }
    }

    fn observer(&self) -> Option<Arc<dyn TransportObserver>> {
        self.observer.read().ok().and_then(|slot| slot.clone())
    }

    /// Hand one inbound message to the observer and wait for it.
    pub async fn deliver(&self, message: JsonRpcMessage) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        match self.observer() {
            Some(observer) => observer.on_message(message).await,
            None => tracing::warn!(
                transport = %self.kind,
                method = ?message.method(),
                "no observer installed, dropping inbound message"
            ),
        }
    }

    /// Count an error and pass it to the observer.
    pub fn report_error(&self, error: &McpError) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        match self.observer() {
            Some(observer) => observer.on_error(error),
            None => tracing::warn!(transport = %self.kind, "transport error: {}", error),
        }
    }

    /// Count one message written to the peer.
    pub fn record_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of the counters.
    pub fn info(&self) -> TransportInfo {
        TransportInfo {
            transport_type: self.kind,
            session_id: self.session_id.clone(),
            connected: self.is_connected(),
            connected_since: self.connected_since.lock().ok().and_then(|since| *since),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            metadata: Default::default(),
        }
    }
}

impl std::fmt::Debug for TransportLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportLifecycle")
            .field("kind", &self.kind)
            .field("session_id", &self.session_id)
            .field("state", &self.state.load(Ordering::Relaxed))
            .finish()
    }
}
