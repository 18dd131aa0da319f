//! Event-stream plumbing shared by the HTTP and SSE transports.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use axum::response::sse::Event;
use futures::Stream;
use pin_project_lite::pin_project;

use crate::messages::JsonRpcMessage;

/// Strictly increasing event ids for one stream.
#[derive(Debug, Default)]
pub(crate) struct EventIds(AtomicU64);

impl EventIds {
    pub(crate) fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// `event: message` carrying one JSON-RPC message.
pub(crate) fn message_event(id: u64, message: &JsonRpcMessage) -> Event {
    let data = serde_json::to_string(message).unwrap_or_else(|e| {
        tracing::error!("failed to serialize outbound message: {}", e);
        String::from("{}")
    });
    Event::default()
        .event("message")
        .id(id.to_string())
        .data(data)
}

struct OnDrop(Option<Box<dyn FnOnce() + Send>>);

impl Drop for OnDrop {
    fn drop(&mut self) {
        if let Some(callback) = self.0.take() {
            callback();
        }
    }
}

pin_project! {
    /// Stream wrapper that runs a callback when the HTTP body is dropped,
    /// which is how a client disconnect reaches the transport.
    pub(crate) struct GuardedStream<S> {
        #[pin]
        inner: S,
        on_drop: OnDrop,
    }
}

impl<S> GuardedStream<S> {
    pub(crate) fn new(inner: S, on_drop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            inner,
            on_drop: OnDrop(Some(Box::new(on_drop))),
        }
    }
}

impl<S: Stream> Stream for GuardedStream<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn test_event_ids_strictly_increase() {
        let ids = EventIds::default();
        let drawn: Vec<u64> = (0..5).map(|_| ids.next()).collect();
        assert_eq!(drawn, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_guard_runs_on_drop() {
        let dropped = Arc::new(AtomicBool::new(false));
        let flag = dropped.clone();
        let mut stream = GuardedStream::new(futures::stream::iter(vec![1, 2]), move || {
            flag.store(true, Ordering::SeqCst)
        });

        assert_eq!(stream.next().await, Some(1));
        assert!(!dropped.load(Ordering::SeqCst));
        drop(stream);
        assert!(dropped.load(Ordering::SeqCst));
    }
}
