//! Session registry.
//!
//! A session is created by an `initialize` (or by opening a legacy SSE
//! stream) and lives until it is deleted, its stream disconnects or the
//! server shuts down. Two rules hold for every session:
//!
//! - it moves from uninitialized to initialized once, irreversibly
//! - at most one streaming transport (SSE or WebSocket) is open on it

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{McpError, McpResult, ProtocolError};
use crate::transport::Transport;

/// One client conversation.
pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    initialized: AtomicBool,
    stream: Mutex<Option<Arc<dyn Transport>>>,
}

impl Session {
    fn new(id: String) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            initialized: AtomicBool::new(false),
            stream: Mutex::new(None),
        }
    }

    /// Session id as sent in `mcp-session-id`.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// When the session was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether an `initialize` has been accepted.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Record the one `initialize` this session may receive.
    pub fn begin_initialize(&self) -> Result<(), ProtocolError> {
        self.initialized
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| ProtocolError::AlreadyInitialized)
    }

    /// Bind a started streaming transport to this session.
    ///
    /// Fails with `StreamConflict` while another stream is still connected;
    /// a closed one is replaced.
    pub fn attach_stream(&self, transport: Arc<dyn Transport>) -> Result<(), ProtocolError> {
        let mut slot = self.stream.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = slot.as_ref() {
            if existing.is_connected() {
                return Err(ProtocolError::StreamConflict {
                    session_id: self.id.clone(),
                });
            }
        }
        *slot = Some(transport);
        Ok(())
    }

    /// The bound stream, if it is still connected.
    pub fn stream(&self) -> Option<Arc<dyn Transport>> {
        let slot = self.stream.lock().unwrap_or_else(|e| e.into_inner());
        slot.as_ref().filter(|t| t.is_connected()).cloned()
    }

    /// Whether a streaming connection is open.
    pub fn active_stream_open(&self) -> bool {
        self.stream().is_some()
    }

    /// Drop the bound stream if it has closed.
    pub fn release_closed_stream(&self) {
        let mut slot = self.stream.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|t| !t.is_connected()) {
            *slot = None;
        }
    }

    /// Close the bound stream, if any.
    pub async fn close(&self) -> McpResult<()> {
        let stream = self
            .stream
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match stream {
            Some(transport) => transport.close().await,
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("initialized", &self.is_initialized())
            .field("active_stream_open", &self.active_stream_open())
            .finish()
    }
}

/// Map of live sessions, owned by one server instance.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    max_sessions: Option<usize>,
}

impl SessionRegistry {
    /// Create a registry; `max_sessions` caps concurrent sessions.
    pub fn new(max_sessions: Option<usize>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
        }
    }

    /// Create a session with a fresh id.
    pub fn create(&self) -> McpResult<Arc<Session>> {
        self.insert(Uuid::new_v4().to_string())
    }

    fn insert(&self, id: String) -> McpResult<Arc<Session>> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| McpError::internal("session registry poisoned"))?;
        if let Some(max_sessions) = self.max_sessions {
            if sessions.len() >= max_sessions {
                tracing::warn!(max_sessions, "session limit reached, refusing new session");
                return Err(ProtocolError::SessionLimitReached { max_sessions }.into());
            }
        }
        let session = Arc::new(Session::new(id.clone()));
        sessions.insert(id, session.clone());
        tracing::info!(session = %session.id(), "session created");
        Ok(session)
    }

    /// Bind `transport` as the stream of session `id`, creating the session
    /// when it does not exist.
    pub fn register(&self, id: &str, transport: Arc<dyn Transport>) -> McpResult<Arc<Session>> {
        let session = match self.session(id) {
            Some(session) => session,
            None => self.insert(id.to_string())?,
        };
        session.attach_stream(transport)?;
        Ok(session)
    }

    /// The connected stream of session `id`.
    pub fn lookup(&self, id: &str) -> Option<Arc<dyn Transport>> {
        self.session(id).and_then(|session| session.stream())
    }

    /// The session with this id.
    pub fn session(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .ok()
            .and_then(|sessions| sessions.get(id).cloned())
    }

    /// Resolve the session named by a request header or query parameter.
    ///
    /// Missing or empty ids fail with `MissingSessionId`, unknown ids with
    /// `SessionNotFound`.
    pub fn require(&self, id: Option<&str>) -> Result<Arc<Session>, ProtocolError> {
        let id = id
            .filter(|id| !id.is_empty())
            .ok_or(ProtocolError::MissingSessionId)?;
        self.session(id).ok_or_else(|| ProtocolError::SessionNotFound {
            session_id: id.to_string(),
        })
    }

    /// Remove a session, returning it so the caller can close it.
    pub fn unregister(&self, id: &str) -> Option<Arc<Session>> {
        let removed = self
            .sessions
            .write()
            .ok()
            .and_then(|mut sessions| sessions.remove(id));
        if removed.is_some() {
            tracing::info!(session = %id, "session removed");
        }
        removed
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Whether no session is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every session's stream and empty the registry.
    pub async fn close_all(&self) {
        let drained: Vec<Arc<Session>> = match self.sessions.write() {
            Ok(mut sessions) => sessions.drain().map(|(_, session)| session).collect(),
            Err(_) => return,
        };
        let count = drained.len();
        for session in drained {
            if let Err(e) = session.close().await {
                tracing::warn!(session = %session.id(), "failed to close session: {}", e);
            }
        }
        tracing::info!(count, "closed all sessions");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::websocket::WebSocketTransport;
    use crate::transport::TransportOptions;
    use assert_matches::assert_matches;

    async fn started_stream(id: &str) -> Arc<dyn Transport> {
        let transport: Arc<dyn Transport> =
            Arc::new(WebSocketTransport::new(id, &TransportOptions::default()));
        transport.start().await.unwrap();
        transport
    }

    #[test]
    fn test_create_lookup_unregister() {
        let registry = SessionRegistry::new(None);
        let session = registry.create().unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.session(session.id()).is_some());
        assert!(registry.lookup(session.id()).is_none());

        assert!(registry.unregister(session.id()).is_some());
        assert!(registry.is_empty());
        assert!(registry.unregister(session.id()).is_none());
    }

    #[test]
    fn test_initialize_only_once() {
        let registry = SessionRegistry::new(None);
        let session = registry.create().unwrap();

        assert!(session.begin_initialize().is_ok());
        assert!(session.is_initialized());
        assert_eq!(
            session.begin_initialize(),
            Err(ProtocolError::AlreadyInitialized)
        );
    }

    #[test]
    fn test_require_distinguishes_missing_and_unknown() {
        let registry = SessionRegistry::new(None);
        assert_eq!(
            registry.require(None).unwrap_err(),
            ProtocolError::MissingSessionId
        );
        assert_eq!(
            registry.require(Some("")).unwrap_err(),
            ProtocolError::MissingSessionId
        );
        assert_matches!(
            registry.require(Some("nope")),
            Err(ProtocolError::SessionNotFound { session_id }) if session_id == "nope"
        );
    }

    #[test]
    fn test_session_limit() {
        let registry = SessionRegistry::new(Some(1));
        registry.create().unwrap();
        assert_matches!(
            registry.create(),
            Err(McpError::Protocol(ProtocolError::SessionLimitReached { max_sessions: 1 }))
        );
    }

    #[tokio::test]
    async fn test_one_stream_per_session() {
        let registry = SessionRegistry::new(None);
        let first = started_stream("s1").await;
        let session = registry.register("s1", first.clone()).unwrap();
        assert!(session.active_stream_open());
        assert!(registry.lookup("s1").is_some());

        let second = started_stream("s1").await;
        assert_matches!(
            registry.register("s1", second.clone()),
            Err(McpError::Protocol(ProtocolError::StreamConflict { .. }))
        );

        first.close().await.unwrap();
        assert!(!session.active_stream_open());
        assert!(registry.register("s1", second).is_ok());
        assert!(session.active_stream_open());
    }

    #[tokio::test]
    async fn test_release_closed_stream() {
        let registry = SessionRegistry::new(None);
        let stream = started_stream("s2").await;
        let session = registry.register("s2", stream.clone()).unwrap();

        stream.close().await.unwrap();
        session.release_closed_stream();
        assert!(registry.lookup("s2").is_none());
    }

    #[tokio::test]
    async fn test_close_all_closes_streams() {
        let registry = SessionRegistry::new(None);
        let a = started_stream("a").await;
        let b = started_stream("b").await;
        registry.register("a", a.clone()).unwrap();
        registry.register("b", b.clone()).unwrap();

        registry.close_all().await;

        assert!(registry.is_empty());
        assert!(!a.is_connected());
        assert!(!b.is_connected());
    }
}
