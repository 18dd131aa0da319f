//! Stateless request/response transport over HTTP.
//!
//! One POST body is one exchange. The transport validates the body, delivers
//! each message to the observer in order, then answers in one of two ways:
//!
//! - [`ResponseMode::Json`]: wait until every request in the body has been
//!   answered through [`Transport::send`], then return the reply (or an
//!   array of replies for a batch) as `application/json`
//! - [`ResponseMode::Stream`]: return an event stream at once and write each
//!   reply as an `event: message`; the stream ends after the last reply
//!
//! A body holding only notifications or responses is answered `202 Accepted`.
//!
//! When the client goes away mid-exchange, the pending wait is cancelled and
//! the transport closes; later sends fail.

use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use super::stream::{message_event, EventIds, GuardedStream};
use super::{
    ResponseMode, Transport, TransportInfo, TransportKind, TransportLifecycle, TransportObserver,
    TransportOptions,
};
use crate::error::{McpError, McpResult, TransportError};
use crate::messages::JsonRpcMessage;
use crate::validation::{parse_payload, JsonRpcPayload};

const KIND: TransportKind = TransportKind::StreamableHttp;

enum Exchange {
    Idle,
    Collecting {
        expected: usize,
        collected: Vec<JsonRpcMessage>,
        done: Option<oneshot::Sender<Vec<JsonRpcMessage>>>,
    },
    Streaming {
        remaining: usize,
        sender: Option<mpsc::Sender<JsonRpcMessage>>,
    },
    Committed,
    Closed,
}

struct Shared {
    lifecycle: Arc<TransportLifecycle>,
    cancel: CancellationToken,
    exchange: Mutex<Exchange>,
}

impl Shared {
    fn begin_exchange(&self, next: Exchange) -> McpResult<()> {
        let mut exchange = self
            .exchange
            .lock()
            .map_err(|_| McpError::internal("exchange state poisoned"))?;
        match *exchange {
            Exchange::Idle => {
                *exchange = next;
                Ok(())
            }
            Exchange::Closed => Err(McpError::not_connected(KIND.as_str(), "transport closed")),
            _ => Err(McpError::internal(
                "an exchange is already in progress on this transport",
            )),
        }
    }

    /// Close without awaiting anything; safe to call from `Drop`.
    fn abort(&self) -> bool {
        if !self.lifecycle.begin_close() {
            return false;
        }
        self.cancel.cancel();
        if let Ok(mut exchange) = self.exchange.lock() {
            if !matches!(*exchange, Exchange::Committed) {
                // Drops any pending oneshot or stream sender.
                *exchange = Exchange::Closed;
            }
        }
        self.lifecycle.fire_close();
        true
    }
}

struct AbortOnDrop<'a> {
    shared: &'a Shared,
    armed: bool,
}

impl Drop for AbortOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed && self.shared.abort() {
            tracing::debug!("HTTP exchange dropped before completion, transport closed");
        }
    }
}

/// Per-request HTTP transport.
pub struct StreamableHttpTransport {
    shared: Arc<Shared>,
    options: TransportOptions,
    event_ids: Arc<EventIds>,
}

impl StreamableHttpTransport {
    /// Create a transport for one HTTP exchange.
    pub fn new(session_id: Option<String>, options: &TransportOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                lifecycle: Arc::new(TransportLifecycle::new(KIND, session_id)),
                cancel: CancellationToken::new(),
                exchange: Mutex::new(Exchange::Idle),
            }),
            options: options.clone(),
            event_ids: Arc::new(EventIds::default()),
        }
    }

    /// Parse, validate and answer one raw POST body.
    pub async fn handle_message(&self, body: &[u8]) -> Response {
        match parse_payload(body) {
            Ok(payload) => self.handle_payload(payload).await,
            Err(error) => {
                tracing::warn!("rejecting malformed HTTP body: {}", error);
                McpError::from(error).into_response()
            }
        }
    }

    /// Answer an already validated payload.
    pub async fn handle_payload(&self, payload: JsonRpcPayload) -> Response {
        match self.exchange(payload).await {
            Ok(response) => response,
            Err(error) => error.into_response(),
        }
    }

    async fn exchange(&self, payload: JsonRpcPayload) -> McpResult<Response> {
        self.shared.lifecycle.ensure_connected()?;

        let expected = payload.request_count();
        let batch = payload.is_batch();
        let messages = payload.into_messages();

        if expected == 0 {
            for message in messages {
                self.shared.lifecycle.deliver(message).await;
            }
            return Ok(StatusCode::ACCEPTED.into_response());
        }

        match self.options.response_mode {
            ResponseMode::Json => self.respond_json(messages, expected, batch).await,
            ResponseMode::Stream => self.respond_stream(messages, expected),
        }
    }

    async fn respond_json(
        &self,
        messages: Vec<JsonRpcMessage>,
        expected: usize,
        batch: bool,
    ) -> McpResult<Response> {
        let (done_tx, done_rx) = oneshot::channel();
        self.shared.begin_exchange(Exchange::Collecting {
            expected,
            collected: Vec::with_capacity(expected),
            done: Some(done_tx),
        })?;

        let mut guard = AbortOnDrop {
            shared: &self.shared,
            armed: true,
        };
        self.spawn_delivery(messages);

        let replies = tokio::select! {
            replies = done_rx => replies.map_err(|_| cancelled("transport closed before the reply was sent"))?,
            _ = self.shared.cancel.cancelled() => {
                return Err(cancelled("transport closed before the reply was sent"));
            }
        };
        guard.armed = false;

        if batch {
            Ok(Json(replies).into_response())
        } else {
            match replies.into_iter().next() {
                Some(reply) => Ok(Json(reply).into_response()),
                None => Err(McpError::internal("exchange completed without a reply")),
            }
        }
    }

    fn respond_stream(
        &self,
        messages: Vec<JsonRpcMessage>,
        expected: usize,
    ) -> McpResult<Response> {
        let (tx, rx) = mpsc::channel(self.options.send_queue_capacity);
        self.shared.begin_exchange(Exchange::Streaming {
            remaining: expected,
            sender: Some(tx),
        })?;
        self.spawn_delivery(messages);

        let ids = self.event_ids.clone();
        let events = ReceiverStream::new(rx)
            .map(move |message| Ok::<_, Infallible>(message_event(ids.next(), &message)));
        let shared = self.shared.clone();
        let body = GuardedStream::new(events, move || {
            shared.abort();
        });

        Ok(Sse::new(body)
            .keep_alive(KeepAlive::new().interval(self.options.keep_alive))
            .into_response())
    }

    fn spawn_delivery(&self, messages: Vec<JsonRpcMessage>) {
        let lifecycle = self.shared.lifecycle.clone();
        let cancel = self.shared.cancel.clone();
        tokio::spawn(async move {
            for message in messages {
                if cancel.is_cancelled() {
                    break;
                }
                lifecycle.deliver(message).await;
            }
        });
    }
}

fn cancelled(reason: &str) -> McpError {
    TransportError::Cancelled {
        transport_type: KIND.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    fn kind(&self) -> TransportKind {
        KIND
    }

    fn session_id(&self) -> Option<&str> {
        self.shared.lifecycle.session_id()
    }

    async fn start(&self) -> McpResult<()> {
        self.shared.lifecycle.start()
    }

    async fn send(&self, message: JsonRpcMessage) -> McpResult<()> {
        let sender = {
            let mut exchange = self
                .shared
                .exchange
                .lock()
                .map_err(|_| McpError::internal("exchange state poisoned"))?;

            match &mut *exchange {
                Exchange::Committed => return Err(TransportError::ResponseCommitted.into()),
                Exchange::Idle | Exchange::Closed => {
                    return Err(McpError::not_connected(
                        KIND.as_str(),
                        "no exchange in progress",
                    ));
                }
                Exchange::Collecting {
                    expected,
                    collected,
                    done,
                } => {
                    if !matches!(message, JsonRpcMessage::Response(_)) {
                        tracing::debug!(
                            method = ?message.method(),
                            "dropping server-initiated message in JSON response mode"
                        );
                        return Ok(());
                    }
                    collected.push(message);
                    if collected.len() == *expected {
                        let replies = std::mem::take(collected);
                        let done = done.take();
                        *exchange = Exchange::Committed;
                        if let Some(done) = done {
                            let _ = done.send(replies);
                        }
                    }
                    self.shared.lifecycle.record_sent();
                    return Ok(());
                }
                Exchange::Streaming { remaining, sender } => {
                    let is_reply = matches!(message, JsonRpcMessage::Response(_));
                    if is_reply {
                        *remaining = remaining.saturating_sub(1);
                    }
                    if is_reply && *remaining == 0 {
                        let last = sender.take();
                        *exchange = Exchange::Committed;
                        last
                    } else {
                        sender.clone()
                    }
                }
            }
        };

        let sender = sender.ok_or(TransportError::ResponseCommitted)?;
        tokio::select! {
            result = sender.send(message) => result.map_err(|_| TransportError::SendFailed {
                transport_type: KIND.to_string(),
                reason: "response stream closed".to_string(),
            })?,
            _ = self.shared.cancel.cancelled() => {
                return Err(cancelled("transport closed while waiting for queue space"));
            }
        }
        self.shared.lifecycle.record_sent();
        Ok(())
    }

    async fn close(&self) -> McpResult<()> {
        self.shared.abort();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shared.lifecycle.is_connected()
    }

    fn set_observer(&self, observer: Arc<dyn TransportObserver>) {
        self.shared.lifecycle.set_observer(observer);
    }

    fn get_info(&self) -> TransportInfo {
        let mut info = self.shared.lifecycle.info();
        info.add_metadata(
            "response_mode",
            serde_json::to_value(self.options.response_mode).unwrap_or_default(),
        );
        info
    }
}
