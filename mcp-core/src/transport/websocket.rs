//! Full-duplex WebSocket transport.
//!
//! [`WebSocketTransport::accept_websocket`] binds the socket halves and spawns
//! a reader and a writer task. Text and binary frames are parsed as JSON-RPC;
//! a malformed frame is reported to the observer and the socket stays open.
//! A close frame, a read error or the end of the stream closes the transport.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{
    Transport, TransportInfo, TransportKind, TransportLifecycle, TransportObserver,
    TransportOptions,
};
use crate::error::{McpError, McpResult, TransportError};
use crate::messages::JsonRpcMessage;
use crate::validation::parse_payload;

const KIND: TransportKind = TransportKind::WebSocket;

struct Shared {
    lifecycle: Arc<TransportLifecycle>,
    cancel: CancellationToken,
    outbound: Mutex<Option<mpsc::Sender<JsonRpcMessage>>>,
}

impl Shared {
    fn abort(&self) -> bool {
        if !self.lifecycle.begin_close() {
            return false;
        }
        self.cancel.cancel();
        if let Ok(mut outbound) = self.outbound.lock() {
            // The writer drains what is queued, then sends a close frame.
            outbound.take();
        }
        self.lifecycle.fire_close();
        true
    }

    async fn handle_frame(&self, bytes: &[u8]) {
        match parse_payload(bytes) {
            Ok(payload) => {
                for message in payload.into_messages() {
                    self.lifecycle.deliver(message).await;
                }
            }
            Err(error) => {
                tracing::warn!(session = ?self.lifecycle.session_id(), "malformed WebSocket frame: {}", error);
                self.lifecycle.report_error(&error.into());
            }
        }
    }
}

/// Session-bound WebSocket transport.
pub struct WebSocketTransport {
    shared: Arc<Shared>,
    accepted: AtomicBool,
    outbound_rx: Mutex<Option<mpsc::Receiver<JsonRpcMessage>>>,
}

impl WebSocketTransport {
    /// Create a transport for `session_id`; no socket is bound yet.
    pub fn new(session_id: impl Into<String>, options: &TransportOptions) -> Self {
        let (tx, rx) = mpsc::channel(options.send_queue_capacity);
        Self {
            shared: Arc::new(Shared {
                lifecycle: Arc::new(TransportLifecycle::new(KIND, Some(session_id.into()))),
                cancel: CancellationToken::new(),
                outbound: Mutex::new(Some(tx)),
            }),
            accepted: AtomicBool::new(false),
            outbound_rx: Mutex::new(Some(rx)),
        }
    }

    /// Bind an upgraded axum socket.
    pub fn accept(&self, socket: WebSocket) -> McpResult<()> {
        let (sink, stream) = socket.split();
        self.accept_websocket(sink, stream)
    }

    /// Bind the two halves of a socket. Fails with `AlreadyAccepted` when
    /// called a second time.
    pub fn accept_websocket<W, R, E>(&self, mut sink: W, mut stream: R) -> McpResult<()>
    where
        W: Sink<Message> + Unpin + Send + 'static,
        W::Error: Display + Send,
        R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
        E: Display + Send,
    {
        if self.accepted.swap(true, Ordering::AcqRel) {
            return Err(TransportError::AlreadyAccepted.into());
        }
        let mut outbound = self
            .outbound_rx
            .lock()
            .map_err(|_| McpError::internal("outbound queue poisoned"))?
            .take()
            .ok_or(TransportError::AlreadyAccepted)?;

        let writer_shared = self.shared.clone();
        tokio::spawn(async move {
            while let Some(message) = outbound.recv().await {
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        writer_shared.lifecycle.report_error(&e.into());
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    writer_shared.lifecycle.report_error(
                        &TransportError::SendFailed {
                            transport_type: KIND.to_string(),
                            reason: e.to_string(),
                        }
                        .into(),
                    );
                    writer_shared.abort();
                    return;
                }
                writer_shared.lifecycle.record_sent();
            }
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        });

        let reader_shared = self.shared.clone();
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    frame = stream.next() => frame,
                    _ = reader_shared.cancel.cancelled() => break,
                };
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        reader_shared.handle_frame(text.as_str().as_bytes()).await
                    }
                    Some(Ok(Message::Binary(bytes))) => reader_shared.handle_frame(&bytes).await,
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        reader_shared.lifecycle.report_error(
                            &TransportError::SendFailed {
                                transport_type: KIND.to_string(),
                                reason: format!("read failed: {e}"),
                            }
                            .into(),
                        );
                        break;
                    }
                }
            }
            if reader_shared.abort() {
                tracing::info!(session = ?reader_shared.lifecycle.session_id(), "WebSocket peer disconnected");
            }
        });

        tracing::info!(session = ?self.session_id(), "WebSocket accepted");
        Ok(())
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
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
        self.shared.lifecycle.ensure_connected()?;
        let outbound = self
            .shared
            .outbound
            .lock()
            .map_err(|_| McpError::internal("outbound queue poisoned"))?
            .clone()
            .ok_or_else(|| McpError::not_connected(KIND.as_str(), "socket closed"))?;

        tokio::select! {
            result = outbound.send(message) => result.map_err(|_| {
                McpError::not_connected(KIND.as_str(), "socket closed")
            }),
            _ = self.shared.cancel.cancelled() => {
                Err(McpError::not_connected(KIND.as_str(), "socket closed"))
            }
        }
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
            "accepted",
            serde_json::Value::Bool(self.accepted.load(Ordering::Acquire)),
        );
        info
    }
}
