//! Legacy two-endpoint SSE transport.
//!
//! A client opens a long-lived GET event stream and receives, as its first
//! event, the `endpoint` it must POST messages to. Every POST to that side
//! channel is validated by the HTTP layer and queued here with
//! [`SseTransport::handle_post_message`]; one worker drains the queue so the
//! observer sees messages in the order they were posted. Replies written
//! with [`Transport::send`] go out on the GET stream as `event: message`
//! with a per-stream counter as event id.
//!
//! Dropping the GET body (the client disconnecting) closes the transport.

use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use super::stream::{message_event, EventIds, GuardedStream};
use super::{
    Transport, TransportInfo, TransportKind, TransportLifecycle, TransportObserver,
    TransportOptions,
};
use crate::error::{McpError, McpResult, TransportError};
use crate::messages::JsonRpcMessage;
use crate::validation::JsonRpcPayload;

const KIND: TransportKind = TransportKind::Sse;

enum Outbound {
    Endpoint(String),
    Message(JsonRpcMessage),
}

struct Shared {
    lifecycle: Arc<TransportLifecycle>,
    cancel: CancellationToken,
    outbound: Mutex<Option<mpsc::Sender<Outbound>>>,
    inbound: Mutex<Option<mpsc::UnboundedSender<JsonRpcMessage>>>,
}

impl Shared {
    fn abort(&self) -> bool {
        if !self.lifecycle.begin_close() {
            return false;
        }
        self.cancel.cancel();
        if let Ok(mut outbound) = self.outbound.lock() {
            outbound.take();
        }
        if let Ok(mut inbound) = self.inbound.lock() {
            inbound.take();
        }
        self.lifecycle.fire_close();
        true
    }
}

/// Session-bound SSE transport.
pub struct SseTransport {
    shared: Arc<Shared>,
    endpoint: String,
    options: TransportOptions,
    outbound_rx: Mutex<Option<mpsc::Receiver<Outbound>>>,
}

impl SseTransport {
    /// Create a transport for `session_id` whose side channel is `endpoint`.
    pub fn new(
        session_id: impl Into<String>,
        endpoint: impl Into<String>,
        options: &TransportOptions,
    ) -> Self {
        let (tx, rx) = mpsc::channel(options.send_queue_capacity);
        Self {
            shared: Arc::new(Shared {
                lifecycle: Arc::new(TransportLifecycle::new(KIND, Some(session_id.into()))),
                cancel: CancellationToken::new(),
                outbound: Mutex::new(Some(tx)),
                inbound: Mutex::new(None),
            }),
            endpoint: endpoint.into(),
            options: options.clone(),
            outbound_rx: Mutex::new(Some(rx)),
        }
    }

    /// The POST side-channel URL announced to the client.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Take the GET response that carries the event stream.
    ///
    /// Only one stream exists per transport; a second call fails.
    pub fn take_stream(&self) -> McpResult<Response> {
        let rx = self
            .outbound_rx
            .lock()
            .map_err(|_| McpError::internal("stream slot poisoned"))?
            .take()
            .ok_or_else(|| McpError::internal("event stream already taken"))?;

        let ids = EventIds::default();
        let events = ReceiverStream::new(rx).map(move |outbound| {
            let event = match outbound {
                Outbound::Endpoint(endpoint) => Event::default().event("endpoint").data(endpoint),
                Outbound::Message(message) => message_event(ids.next(), &message),
            };
            Ok::<_, Infallible>(event)
        });

        let shared = self.shared.clone();
        let body = GuardedStream::new(events, move || {
            if shared.abort() {
                tracing::info!(session = ?shared.lifecycle.session_id(), "SSE client disconnected");
            }
        });

        Ok(Sse::new(body)
            .keep_alive(KeepAlive::new().interval(self.options.keep_alive))
            .into_response())
    }

    /// Queue the messages of one side-channel POST for delivery.
    pub fn handle_post_message(&self, payload: JsonRpcPayload) -> McpResult<()> {
        self.shared.lifecycle.ensure_connected()?;
        let inbound = self
            .shared
            .inbound
            .lock()
            .map_err(|_| McpError::internal("inbound queue poisoned"))?
            .clone()
            .ok_or_else(|| McpError::not_connected(KIND.as_str(), "transport closed"))?;

        for message in payload.into_messages() {
            inbound.send(message).map_err(|_| {
                McpError::not_connected(KIND.as_str(), "inbound worker stopped")
            })?;
        }
        Ok(())
    }

    fn outbound(&self) -> McpResult<mpsc::Sender<Outbound>> {
        self.shared
            .outbound
            .lock()
            .map_err(|_| McpError::internal("outbound queue poisoned"))?
            .clone()
            .ok_or_else(|| McpError::not_connected(KIND.as_str(), "transport closed"))
    }
}

#[async_trait]
impl Transport for SseTransport {
    fn kind(&self) -> TransportKind {
        KIND
    }

    fn session_id(&self) -> Option<&str> {
        self.shared.lifecycle.session_id()
    }

    async fn start(&self) -> McpResult<()> {
        self.shared.lifecycle.start()?;

        self.outbound()?
            .try_send(Outbound::Endpoint(self.endpoint.clone()))
            .map_err(|e| TransportError::SendFailed {
                transport_type: KIND.to_string(),
                reason: e.to_string(),
            })?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Ok(mut inbound) = self.shared.inbound.lock() {
            *inbound = Some(tx);
        }

        let lifecycle = self.shared.lifecycle.clone();
        let cancel = self.shared.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    message = rx.recv() => match message {
                        Some(message) => lifecycle.deliver(message).await,
                        None => break,
                    },
                    _ = cancel.cancelled() => break,
                }
            }
            tracing::debug!(session = ?lifecycle.session_id(), "SSE inbound worker stopped");
        });

        tracing::info!(session = ?self.session_id(), "SSE stream opened");
        Ok(())
    }

    async fn send(&self, message: JsonRpcMessage) -> McpResult<()> {
        self.shared.lifecycle.ensure_connected()?;
        let outbound = self.outbound()?;

        tokio::select! {
            result = outbound.send(Outbound::Message(message)) => {
                result.map_err(|_| TransportError::SendFailed {
                    transport_type: KIND.to_string(),
                    reason: "event stream closed".to_string(),
                })?;
            }
            _ = self.shared.cancel.cancelled() => {
                return Err(McpError::not_connected(KIND.as_str(), "transport closed"));
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

    fn post_payload(&self, payload: JsonRpcPayload) -> McpResult<()> {
        self.handle_post_message(payload)
    }

    fn get_info(&self) -> TransportInfo {
        let mut info = self.shared.lifecycle.info();
        info.add_metadata("endpoint", serde_json::Value::String(self.endpoint.clone()));
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::JsonRpcResponse;
    use crate::transport::testing::{channel_observer, EchoObserver};
    use crate::validation::parse_payload;
    use assert_matches::assert_matches;
    use eventsource_stream::Eventsource;
    use serde_json::{json, Value};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn transport() -> Arc<SseTransport> {
        Arc::new(SseTransport::new(
            "s1",
            "/mcp/messages?sessionId=s1",
            &TransportOptions::default(),
        ))
    }

    #[tokio::test]
    async fn test_endpoint_event_then_replies() {
        let transport = transport();
        EchoObserver::install(&transport);
        transport.start().await.unwrap();
        let response = transport.take_stream().unwrap();

        transport
            .handle_post_message(
                parse_payload(
                    br#"[{"jsonrpc":"2.0","id":10,"method":"ping"},{"jsonrpc":"2.0","id":11,"method":"tools/list"}]"#,
                )
                .unwrap(),
            )
            .unwrap();

        let events: Vec<_> = response
            .into_body()
            .into_data_stream()
            .eventsource()
            .take(3)
            .collect()
            .await;
        let events: Vec<_> = events.into_iter().map(Result::unwrap).collect();

        assert_eq!(events[0].event, "endpoint");
        assert_eq!(events[0].data, "/mcp/messages?sessionId=s1");

        assert_eq!(events[1].event, "message");
        assert_eq!(events[1].id, "1");
        let first: Value = serde_json::from_str(&events[1].data).unwrap();
        assert_eq!(first["id"], 10);

        assert_eq!(events[2].id, "2");
        let second: Value = serde_json::from_str(&events[2].data).unwrap();
        assert_eq!(second["id"], 11);
        assert_eq!(second["result"]["method"], "tools/list");
    }

    #[tokio::test]
    async fn test_send_requires_started_and_open() {
        let transport = transport();
        let reply = || JsonRpcMessage::from(JsonRpcResponse::success(1, json!({})));

        assert_matches!(
            transport.send(reply()).await,
            Err(McpError::Transport(TransportError::NotConnected { .. }))
        );

        transport.start().await.unwrap();
        assert_matches!(
            transport.start().await,
            Err(McpError::Transport(TransportError::AlreadyStarted { .. }))
        );

        transport.close().await.unwrap();
        assert_matches!(
            transport.send(reply()).await,
            Err(McpError::Transport(TransportError::NotConnected { .. }))
        );
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_ends_stream() {
        let transport = transport();
        let (observer, probe) = channel_observer();
        transport.set_observer(observer);
        transport.start().await.unwrap();
        let response = transport.take_stream().unwrap();

        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert_eq!(probe.closes.load(Ordering::SeqCst), 1);

        let body = tokio::time::timeout(
            Duration::from_secs(1),
            axum::body::to_bytes(response.into_body(), usize::MAX),
        )
        .await
        .expect("stream must end after close")
        .unwrap();
        assert!(String::from_utf8_lossy(&body).contains("event: endpoint"));
    }

    #[tokio::test]
    async fn test_dropping_stream_closes_transport() {
        let transport = transport();
        let (observer, probe) = channel_observer();
        transport.set_observer(observer);
        transport.start().await.unwrap();

        drop(transport.take_stream().unwrap());

        assert!(!transport.is_connected());
        assert_eq!(probe.closes.load(Ordering::SeqCst), 1);
        assert!(transport
            .handle_post_message(
                parse_payload(br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).unwrap()
            )
            .is_err());
    }

    #[tokio::test]
    async fn test_stream_taken_once() {
        let transport = transport();
        transport.start().await.unwrap();
        let _first = transport.take_stream().unwrap();
        assert!(transport.take_stream().is_err());
    }

    #[tokio::test]
    async fn test_posts_delivered_in_order() {
        let transport = transport();
        let (observer, mut probe) = channel_observer();
        transport.set_observer(observer);
        transport.start().await.unwrap();

        for id in 0..5 {
            let body = format!(r#"{{"jsonrpc":"2.0","id":{id},"method":"ping"}}"#);
            transport
                .handle_post_message(parse_payload(body.as_bytes()).unwrap())
                .unwrap();
        }

        for id in 0..5 {
            let message = probe.messages.recv().await.unwrap();
            assert_eq!(message.id(), Some(&crate::messages::RequestId::Number(id)));
        }
    }
}
