//! Shared fixtures for the server integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, Response};
use axum::Router;
use mcp_core::dispatcher::{ToolBackend, ToolFailure};
use mcp_core::middleware::RequestContext;
use mcp_core::registry::{OperationDef, OperationGroup, SchemaSource};
use mcp_core::McpResult;
use mcp_server::{build_dispatcher, McpServer, ServerConfig};
use serde_json::{json, Value};
use tower::ServiceExt;

/// Initialize logging for tests.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Backend with three named operations that echoes its arguments.
#[derive(Default)]
pub struct RecordingBackend {
    pub invocations: Mutex<Vec<(String, Value)>>,
}

impl RecordingBackend {
    pub fn invocation_count(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }
}

fn named(id: &str, name: &str) -> OperationDef {
    OperationDef {
        name: Some(name.to_string()),
        input_schema: Some(json!({
            "type": "object",
            "properties": {"path": {"type": "string"}}
        })),
        ..OperationDef::new(id)
    }
}

#[async_trait]
impl ToolBackend for RecordingBackend {
    async fn list_tools(&self, _ctx: &RequestContext) -> McpResult<SchemaSource> {
        Ok(SchemaSource::from_groups(vec![
            OperationGroup::new(
                "drive",
                vec![named("drive.list", "drive_list"), named("drive.upload", "drive_upload")],
            ),
            OperationGroup::new("mail", vec![named("resend.send", "resend_send")]),
        ]))
    }

    async fn invoke(
        &self,
        internal_id: &str,
        arguments: Value,
        _ctx: &RequestContext,
    ) -> Result<Value, ToolFailure> {
        self.invocations
            .lock()
            .unwrap()
            .push((internal_id.to_string(), arguments.clone()));
        Ok(json!({"operation": internal_id, "arguments": arguments}))
    }
}

/// A server over a fresh [`RecordingBackend`].
pub fn server(config: ServerConfig) -> (McpServer, Arc<RecordingBackend>) {
    init_test_logging();
    let backend = Arc::new(RecordingBackend::default());
    let dispatcher = build_dispatcher(&config, backend.clone());
    (McpServer::new(config, dispatcher), backend)
}

pub fn initialize(id: u64) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "initialize",
        "params": {
            "protocolVersion": "2025-03-26",
            "capabilities": {},
            "clientInfo": {"name": "test-client", "version": "1.0"}
        }
    })
}

pub fn request(id: u64, method: &str, params: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params})
}

/// JSON POST to `uri`, optionally within a session.
pub fn post(uri: &str, body: &Value, session: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("accept", "application/json, text/event-stream");
    if let Some(session) = session {
        builder = builder.header("mcp-session-id", session);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub async fn send(router: &Router, request: Request<Body>) -> Response<Body> {
    router.clone().oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn session_id(response: &Response<Body>) -> String {
    response
        .headers()
        .get("mcp-session-id")
        .expect("session header")
        .to_str()
        .unwrap()
        .to_string()
}

/// Run `initialize` and return the new session id.
pub async fn open_session(router: &Router) -> String {
    let response = send(router, post("/mcp/messages", &initialize(1), None)).await;
    assert_eq!(response.status(), 200);
    session_id(&response)
}
