//! HTTP facade: routes, header checks and session bookkeeping.
//!
//! | Path | Method | Binding |
//! |---|---|---|
//! | `{base}/mcp/messages` | POST | stateless HTTP, or the SSE side channel with `?sessionId=` |
//! | `{base}/mcp/messages` | DELETE | close the session named by `mcp-session-id` |
//! | `{base}/mcp/sse` | GET | legacy SSE stream |
//! | `{base}/mcp/ws` | GET + upgrade | WebSocket |
//!
//! Every other method on these paths is answered with 405.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::StreamExt;
use mcp_core::dispatcher::{DispatchObserver, Dispatcher};
use mcp_core::error::{McpError, McpResult, ProtocolError};
use mcp_core::middleware::RequestContext;
use mcp_core::session::{Session, SessionRegistry};
use mcp_core::transport::sse::SseTransport;
use mcp_core::transport::streamable_http::StreamableHttpTransport;
use mcp_core::transport::websocket::WebSocketTransport;
use mcp_core::transport::{ResponseMode, Transport, TransportKind};
use mcp_core::validation::{ensure_initialize_alone, parse_payload};
use mcp_core::SESSION_HEADER;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;

/// Media ranges that satisfy content negotiation.
const ACCEPTED_MEDIA: [&str; 5] = [
    "application/json",
    "text/event-stream",
    "application/*",
    "text/*",
    "*/*",
];

struct ServerState {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
    sessions: Arc<SessionRegistry>,
    shutdown: CancellationToken,
}

/// An MCP server bound to one dispatcher.
#[derive(Clone)]
pub struct McpServer {
    state: Arc<ServerState>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

impl McpServer {
    /// Create a server; nothing is bound until [`McpServer::serve`].
    pub fn new(config: ServerConfig, dispatcher: Arc<Dispatcher>) -> Self {
        let sessions = Arc::new(SessionRegistry::new(config.sessions.max_sessions));
        Self {
            state: Arc::new(ServerState {
                config,
                dispatcher,
                sessions,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Effective configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Live sessions.
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.state.sessions
    }

    /// Token that stops [`McpServer::serve`] when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    /// Begin a graceful shutdown.
    pub fn shutdown(&self) {
        self.state.shutdown.cancel();
    }

    /// The axum router serving every route.
    pub fn router(&self) -> Router {
        let config = &self.state.config;
        Router::new()
            .route(
                &config.route("/mcp/messages"),
                post(handle_post)
                    .delete(handle_delete)
                    .fallback(method_not_allowed),
            )
            .route(
                &config.route("/mcp/sse"),
                get(handle_sse).fallback(method_not_allowed),
            )
            .route(
                &config.route("/mcp/ws"),
                get(handle_websocket).fallback(method_not_allowed),
            )
            .with_state(self.state.clone())
    }

    /// Serve on `listener` until [`McpServer::shutdown`] is called.
    ///
    /// Shutdown closes every session's stream before in-flight requests
    /// are drained.
    pub async fn serve(self, listener: TcpListener) -> McpResult<()> {
        let addr = listener.local_addr()?;
        info!(
            %addr,
            base_path = %self.state.config.base_path,
            sessions = self.state.config.sessions.enabled,
            "MCP server listening"
        );

        let state = self.state.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                state.shutdown.cancelled().await;
                info!(sessions = state.sessions.len(), "shutting down");
                state.sessions.close_all().await;
            })
            .await?;

        info!("MCP server stopped");
        Ok(())
    }
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer")
            .field("config", &self.state.config)
            .field("sessions", &self.state.sessions.len())
            .finish()
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn session_header(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, SESSION_HEADER)
}

fn request_context(kind: TransportKind, session_id: Option<&str>, headers: &HeaderMap) -> RequestContext {
    let ctx = RequestContext::new(kind)
        .with_authorization(header_str(headers, AUTHORIZATION.as_str()).map(str::to_string));
    match session_id {
        Some(id) => ctx.with_session(id),
        None => ctx,
    }
}

fn media_type(value: &str) -> &str {
    value.split(';').next().unwrap_or_default().trim()
}

fn require_json_body(headers: &HeaderMap) -> Result<(), ProtocolError> {
    let content_type = header_str(headers, CONTENT_TYPE.as_str()).unwrap_or_default();
    if media_type(content_type).eq_ignore_ascii_case("application/json") {
        Ok(())
    } else {
        Err(ProtocolError::UnsupportedMediaType {
            content_type: if content_type.is_empty() {
                "missing".to_string()
            } else {
                content_type.to_string()
            },
        })
    }
}

/// The Accept header must name JSON or an event stream.
fn require_acceptable(headers: &HeaderMap) -> Result<(), ProtocolError> {
    let Some(accept) = header_str(headers, ACCEPT.as_str()) else {
        return Err(ProtocolError::NotAcceptable);
    };
    let acceptable = accept.split(',').map(media_type).any(|range| {
        ACCEPTED_MEDIA
            .iter()
            .any(|accepted| range.eq_ignore_ascii_case(accepted))
    });
    if acceptable {
        Ok(())
    } else {
        Err(ProtocolError::NotAcceptable)
    }
}

fn with_session_header(mut response: Response, session_id: &str) -> McpResult<Response> {
    let value = HeaderValue::from_str(session_id)
        .map_err(|e| McpError::internal(format!("invalid session id header: {e}")))?;
    response.headers_mut().insert(SESSION_HEADER, value);
    Ok(response)
}

/// Keep `transport` alive until the event-stream body is dropped.
fn hold_until_body_ends(response: Response, transport: Arc<StreamableHttpTransport>) -> Response {
    let (parts, body) = response.into_parts();
    let stream = body.into_data_stream().map(move |chunk| {
        let _held = &transport;
        chunk
    });
    Response::from_parts(parts, Body::from_stream(stream))
}

async fn method_not_allowed(method: Method) -> McpError {
    ProtocolError::MethodNotAllowed {
        method: method.to_string(),
    }
    .into()
}

async fn handle_post(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<SessionQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let result = match query.session_id {
        Some(session_id) => post_side_channel(&state, &session_id, &headers, &body),
        None => post_exchange(&state, &headers, &body).await,
    };
    result.unwrap_or_else(IntoResponse::into_response)
}

/// POST `?sessionId=` of the legacy SSE binding; replies go out on the stream.
fn post_side_channel(
    state: &ServerState,
    session_id: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> McpResult<Response> {
    require_json_body(headers)?;
    require_acceptable(headers)?;
    let session = state.sessions.require(Some(session_id))?;
    let payload = parse_payload(body)?;
    let stream = session
        .stream()
        .ok_or_else(|| ProtocolError::SessionNotFound {
            session_id: session_id.to_string(),
        })?;

    if payload.contains_initialize() {
        ensure_initialize_alone(&payload)?;
        session.begin_initialize()?;
    }

    debug!(session = %session_id, messages = payload.messages().len(), "side-channel message");
    stream.post_payload(payload)?;
    Ok(StatusCode::ACCEPTED.into_response())
}

/// Stateless POST: one HTTP exchange per payload.
async fn post_exchange(state: &ServerState, headers: &HeaderMap, body: &[u8]) -> McpResult<Response> {
    require_json_body(headers)?;
    require_acceptable(headers)?;
    let payload = parse_payload(body)?;
    let tracking = state.config.sessions.enabled;

    let mut created = None;
    let session_id = if payload.contains_initialize() {
        ensure_initialize_alone(&payload)?;
        if tracking {
            let session = match session_header(headers) {
                Some(id) => state.sessions.require(Some(id))?,
                None => {
                    let session = state.sessions.create()?;
                    created = Some(session.id().to_string());
                    session
                }
            };
            session.begin_initialize()?;
            Some(session.id().to_string())
        } else {
            None
        }
    } else if tracking {
        Some(state.sessions.require(session_header(headers))?.id().to_string())
    } else {
        None
    };

    let ctx = request_context(TransportKind::StreamableHttp, session_id.as_deref(), headers);
    let http = Arc::new(StreamableHttpTransport::new(session_id, &state.config.transport));
    let transport: Arc<dyn Transport> = http.clone();
    DispatchObserver::new(state.dispatcher.clone(), &transport, ctx).install();
    http.start().await?;

    let mut response = http.handle_payload(payload).await;
    if state.config.transport.response_mode == ResponseMode::Stream {
        response = hold_until_body_ends(response, http);
    }
    match created {
        Some(id) => with_session_header(response, &id),
        None => Ok(response),
    }
}

async fn handle_delete(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> Response {
    delete_session(&state, &headers)
        .await
        .unwrap_or_else(IntoResponse::into_response)
}

async fn delete_session(state: &ServerState, headers: &HeaderMap) -> McpResult<Response> {
    let session = state.sessions.require(session_header(headers))?;
    state.sessions.unregister(session.id());
    session.close().await?;
    info!(session = %session.id(), "session deleted by client");
    Ok(StatusCode::OK.into_response())
}

/// Session for a new stream: the requested one if it has no open stream,
/// otherwise a fresh one.
fn stream_session(state: &ServerState, requested: Option<&str>) -> McpResult<Arc<Session>> {
    match requested {
        Some(id) => {
            let session = state.sessions.require(Some(id))?;
            if session.active_stream_open() {
                return Err(ProtocolError::StreamConflict {
                    session_id: id.to_string(),
                }
                .into());
            }
            Ok(session)
        }
        None => state.sessions.create(),
    }
}

/// Bind a started stream transport to its session, closing it on conflict.
async fn register_stream(state: &ServerState, session: &Session, transport: &Arc<dyn Transport>) -> McpResult<()> {
    if let Err(e) = state.sessions.register(session.id(), transport.clone()) {
        if let Err(close_error) = transport.close().await {
            debug!(session = %session.id(), "closing rejected stream failed: {}", close_error);
        }
        return Err(e);
    }
    Ok(())
}

async fn handle_sse(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<SessionQuery>,
    headers: HeaderMap,
) -> Response {
    open_sse(&state, query, &headers)
        .await
        .unwrap_or_else(IntoResponse::into_response)
}

async fn open_sse(state: &Arc<ServerState>, query: SessionQuery, headers: &HeaderMap) -> McpResult<Response> {
    require_acceptable(headers)?;
    let requested = query.session_id.as_deref().or_else(|| session_header(headers));
    let session = stream_session(state, requested)?;

    let sse = Arc::new(SseTransport::new(
        session.id(),
        state.config.sse_endpoint(session.id()),
        &state.config.transport,
    ));
    let transport: Arc<dyn Transport> = sse.clone();
    sse.start().await?;
    register_stream(state, &session, &transport).await?;

    let ctx = request_context(TransportKind::Sse, Some(session.id()), headers);
    DispatchObserver::new(state.dispatcher.clone(), &transport, ctx)
        .unregister_on_close(state.sessions.clone())
        .install();

    let response = sse.take_stream()?;
    with_session_header(response, session.id())
}

async fn handle_websocket(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<SessionQuery>,
    headers: HeaderMap,
    upgrade: WebSocketUpgrade,
) -> Response {
    open_websocket(&state, query, &headers, upgrade)
        .await
        .unwrap_or_else(IntoResponse::into_response)
}

async fn open_websocket(
    state: &Arc<ServerState>,
    query: SessionQuery,
    headers: &HeaderMap,
    upgrade: WebSocketUpgrade,
) -> McpResult<Response> {
    let requested = query.session_id.as_deref().or_else(|| session_header(headers));
    let session = stream_session(state, requested)?;

    let socket = Arc::new(WebSocketTransport::new(session.id(), &state.config.transport));
    let transport: Arc<dyn Transport> = socket.clone();
    socket.start().await?;
    register_stream(state, &session, &transport).await?;

    let ctx = request_context(TransportKind::WebSocket, Some(session.id()), headers);
    DispatchObserver::new(state.dispatcher.clone(), &transport, ctx)
        .guard_initialize(session.clone())
        .unregister_on_close(state.sessions.clone())
        .install();

    let session_id = session.id().to_string();
    let failed = transport.clone();
    let response = upgrade
        .on_failed_upgrade(move |e| {
            warn!("WebSocket upgrade failed: {}", e);
            tokio::spawn(async move {
                let _ = failed.close().await;
            });
        })
        .on_upgrade(move |ws| async move {
            if let Err(e) = socket.accept(ws) {
                warn!(session = %session_id, "failed to bind WebSocket: {}", e);
                let _ = socket.close().await;
            }
        });
    with_session_header(response, session.id())
}
