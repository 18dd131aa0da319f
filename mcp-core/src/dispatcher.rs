//! Request dispatch.
//!
//! The [`Dispatcher`] classifies each inbound message by method and produces
//! the reply, if any:
//!
//! | Method | Handling |
//! |---|---|
//! | `initialize` | negotiated [`InitializeResult`] |
//! | `ping` | `{}` |
//! | `tools/list` | list chain, terminal step derives the catalog |
//! | `tools/call` | call chain, terminal step resolves the name and invokes the backend |
//! | anything else | `-32601` |
//!
//! Notifications and client responses get no reply. Tool execution failures
//! are turned into `isError` results by the terminal step; only unexpected
//! failures surface as JSON-RPC `-32603`.
//!
//! [`DispatchObserver`] glues a dispatcher to a transport: it receives
//! inbound messages and writes the replies back through the same transport.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

use crate::error::{McpError, McpResult};
use crate::messages::{
    CallToolParams, CallToolResult, Implementation, InitializeParams, InitializeResult,
    JsonRpcError, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, ListToolsParams,
    ListToolsResult, RequestId,
};
use crate::middleware::{Endpoint, Middleware, MiddlewareChain, RequestContext};
use crate::registry::{SchemaSource, ToolFilter, ToolRegistry};
use crate::session::{Session, SessionRegistry};
use crate::transport::{Transport, TransportObserver};

/// A failure reported by the backend for one tool call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ToolFailure {
    /// What went wrong
    pub message: String,
    /// Upstream status code, when the backend has one
    pub status: Option<u16>,
}

impl ToolFailure {
    /// A failure without a status.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }

    /// Attach an upstream status.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

/// The system whose operations are exposed as tools.
#[async_trait]
pub trait ToolBackend: Send + Sync {
    /// Current operation catalog.
    async fn list_tools(&self, ctx: &RequestContext) -> McpResult<SchemaSource>;

    /// Execute the operation `internal_id`.
    async fn invoke(
        &self,
        internal_id: &str,
        arguments: Value,
        ctx: &RequestContext,
    ) -> Result<Value, ToolFailure>;
}

/// Resolves credentials for a request before a tool call.
///
/// What the credentials mean is up to the backend.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Credentials for `ctx`, or `None` to call without any.
    async fn resolve(&self, ctx: &RequestContext) -> McpResult<Option<Value>>;
}

/// Middleware over `tools/list`.
pub type ListToolsMiddleware = dyn Middleware<ListToolsParams, ListToolsResult>;

/// Middleware over `tools/call`.
pub type CallToolMiddleware = dyn Middleware<CallToolParams, CallToolResult>;

/// Terminal step of the list chain.
pub struct ListToolsEndpoint {
    backend: Arc<dyn ToolBackend>,
    registry: Arc<ToolRegistry>,
    filter: ToolFilter,
}

impl ListToolsEndpoint {
    /// Create the endpoint.
    pub fn new(backend: Arc<dyn ToolBackend>, registry: Arc<ToolRegistry>, filter: ToolFilter) -> Self {
        Self {
            backend,
            registry,
            filter,
        }
    }
}

#[async_trait]
impl Endpoint<ListToolsParams, ListToolsResult> for ListToolsEndpoint {
    async fn call(&self, _request: ListToolsParams, ctx: &RequestContext) -> McpResult<ListToolsResult> {
        let source = self.backend.list_tools(ctx).await?;
        Ok(ListToolsResult::new(
            self.registry.derive_tools(&source, &self.filter),
        ))
    }
}

/// Terminal step of the call chain.
///
/// Names are resolved against the last published snapshot. When no
/// `tools/list` has run yet the catalog is derived once here.
pub struct CallToolEndpoint {
    backend: Arc<dyn ToolBackend>,
    registry: Arc<ToolRegistry>,
    filter: ToolFilter,
}

impl CallToolEndpoint {
    /// Create the endpoint.
    pub fn new(backend: Arc<dyn ToolBackend>, registry: Arc<ToolRegistry>, filter: ToolFilter) -> Self {
        Self {
            backend,
            registry,
            filter,
        }
    }
}

#[async_trait]
impl Endpoint<CallToolParams, CallToolResult> for CallToolEndpoint {
    async fn call(&self, request: CallToolParams, ctx: &RequestContext) -> McpResult<CallToolResult> {
        if self.registry.snapshot().is_none() {
            let source = self.backend.list_tools(ctx).await?;
            self.registry.derive_tools(&source, &self.filter);
        }

        let Some(tool) = self.registry.resolve(&request.name) else {
            tracing::warn!(tool = %request.name, session = ?ctx.session_id, "call for unknown tool");
            return Ok(CallToolResult::error(
                format!("Tool not found: {}", request.name),
                None,
            ));
        };

        let arguments = request.arguments_or_empty();
        match self.backend.invoke(&tool.internal_id, arguments, ctx).await {
            Ok(value) => Ok(CallToolResult::from_value(value)),
            Err(failure) => {
                tracing::warn!(
                    tool = %tool.name,
                    status = ?failure.status,
                    "tool execution failed: {}",
                    failure
                );
                Ok(CallToolResult::error(failure.message, failure.status))
            }
        }
    }
}

/// Builder for [`Dispatcher`].
pub struct DispatcherBuilder {
    backend: Arc<dyn ToolBackend>,
    registry: Option<Arc<ToolRegistry>>,
    filter: ToolFilter,
    server_info: Implementation,
    instructions: Option<String>,
    list_layers: Vec<Arc<ListToolsMiddleware>>,
    call_layers: Vec<Arc<CallToolMiddleware>>,
    credentials: Option<Arc<dyn CredentialProvider>>,
}

impl DispatcherBuilder {
    /// Share an existing registry instead of creating one.
    pub fn registry(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Include/exclude filter applied on every derivation.
    pub fn filter(mut self, filter: ToolFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Identity reported by `initialize`.
    pub fn server_info(mut self, server_info: Implementation) -> Self {
        self.server_info = server_info;
        self
    }

    /// Usage hints reported by `initialize`.
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Append a layer to the list chain.
    pub fn list_middleware(mut self, layer: Arc<ListToolsMiddleware>) -> Self {
        self.list_layers.push(layer);
        self
    }

    /// Append a layer to the call chain.
    pub fn call_middleware(mut self, layer: Arc<CallToolMiddleware>) -> Self {
        self.call_layers.push(layer);
        self
    }

    /// Resolve credentials before every tool call.
    pub fn credential_provider(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(provider);
        self
    }

    /// Compose the chains.
    pub fn build(self) -> Dispatcher {
        let registry = self.registry.unwrap_or_default();
        let list_chain = MiddlewareChain::compose(
            self.list_layers,
            Arc::new(ListToolsEndpoint::new(
                self.backend.clone(),
                registry.clone(),
                self.filter.clone(),
            )),
        );
        let call_chain = MiddlewareChain::compose(
            self.call_layers,
            Arc::new(CallToolEndpoint::new(
                self.backend,
                registry.clone(),
                self.filter,
            )),
        );
        Dispatcher {
            server_info: self.server_info,
            instructions: self.instructions,
            registry,
            list_chain,
            call_chain,
            credentials: self.credentials,
        }
    }
}

/// Routes JSON-RPC messages to the tool chains.
pub struct Dispatcher {
    server_info: Implementation,
    instructions: Option<String>,
    registry: Arc<ToolRegistry>,
    list_chain: MiddlewareChain<ListToolsParams, ListToolsResult>,
    call_chain: MiddlewareChain<CallToolParams, CallToolResult>,
    credentials: Option<Arc<dyn CredentialProvider>>,
}

impl Dispatcher {
    /// Start building a dispatcher over `backend`.
    pub fn builder(backend: Arc<dyn ToolBackend>) -> DispatcherBuilder {
        DispatcherBuilder {
            backend,
            registry: None,
            filter: ToolFilter::default(),
            server_info: Implementation::new("mcp-server", crate::VERSION),
            instructions: None,
            list_layers: Vec::new(),
            call_layers: Vec::new(),
            credentials: None,
        }
    }

    /// Registry whose snapshots this dispatcher publishes.
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Names of the list and call chain layers.
    pub fn chain_names(&self) -> (Vec<&str>, Vec<&str>) {
        (self.list_chain.names(), self.call_chain.names())
    }

    /// Handle one message, returning the reply to send back.
    pub async fn dispatch(&self, message: JsonRpcMessage, ctx: &RequestContext) -> Option<JsonRpcMessage> {
        match message {
            JsonRpcMessage::Request(request) => Some(self.handle_request(request, ctx).await.into()),
            JsonRpcMessage::Notification(notification) => {
                tracing::debug!(method = %notification.method, session = ?ctx.session_id, "notification received");
                None
            }
            JsonRpcMessage::Response(response) => {
                tracing::debug!(id = %response.id, session = ?ctx.session_id, "ignoring client response");
                None
            }
        }
    }

    async fn handle_request(&self, request: JsonRpcRequest, ctx: &RequestContext) -> JsonRpcResponse {
        tracing::debug!(method = %request.method, id = %request.id, session = ?ctx.session_id, "dispatching request");
        let id = request.id.clone();
        let outcome = match request.method.as_str() {
            "initialize" => match request.params_as::<InitializeParams>() {
                Ok(params) => self.initialize(params, ctx),
                Err(e) => return JsonRpcResponse::error(id, JsonRpcError::invalid_params(e.to_string())),
            },
            "ping" => Ok(json!({})),
            "tools/list" => match request.params_as::<ListToolsParams>() {
                Ok(params) => self.list_tools(params, ctx).await,
                Err(e) => return JsonRpcResponse::error(id, JsonRpcError::invalid_params(e.to_string())),
            },
            "tools/call" => match request.params_as::<CallToolParams>() {
                Ok(params) => self.call_tool(params, ctx).await,
                Err(e) => return JsonRpcResponse::error(id, JsonRpcError::invalid_params(e.to_string())),
            },
            other => {
                tracing::debug!(method = other, "method not found");
                return JsonRpcResponse::error(id, JsonRpcError::method_not_found(other));
            }
        };

        match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(e) => {
                tracing::error!(method = %request.method, category = e.category(), "request failed: {}", e);
                JsonRpcResponse::error(id, e.to_json_rpc_error())
            }
        }
    }

    fn initialize(&self, params: InitializeParams, ctx: &RequestContext) -> McpResult<Value> {
        let mut result = InitializeResult::for_request(&params, self.server_info.clone());
        result.instructions = self.instructions.clone();
        tracing::info!(
            session = ?ctx.session_id,
            client = ?params.client_info.as_ref().map(|c| c.name.as_str()),
            protocol = %result.protocol_version,
            "client initialized"
        );
        Ok(serde_json::to_value(result)?)
    }

    async fn list_tools(&self, params: ListToolsParams, ctx: &RequestContext) -> McpResult<Value> {
        let result = self.list_chain.call(params, ctx).await?;
        Ok(serde_json::to_value(result)?)
    }

    async fn call_tool(&self, params: CallToolParams, ctx: &RequestContext) -> McpResult<Value> {
        let result = match &self.credentials {
            Some(provider) => {
                let mut ctx = ctx.clone();
                ctx.credentials = provider.resolve(&ctx).await?;
                self.call_chain.call(params, &ctx).await?
            }
            None => self.call_chain.call(params, ctx).await?,
        };
        Ok(serde_json::to_value(result)?)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("server_info", &self.server_info)
            .field("list_chain", &self.list_chain)
            .field("call_chain", &self.call_chain)
            .field("credentials", &self.credentials.is_some())
            .finish()
    }
}

/// Transport observer that answers through the transport it watches.
pub struct DispatchObserver {
    dispatcher: Arc<Dispatcher>,
    transport: Weak<dyn Transport>,
    ctx: RequestContext,
    initialize_guard: Option<Arc<Session>>,
    sessions: Option<Arc<SessionRegistry>>,
}

impl DispatchObserver {
    /// Observer for `transport`; every request is dispatched with a copy of `ctx`.
    pub fn new(dispatcher: Arc<Dispatcher>, transport: &Arc<dyn Transport>, ctx: RequestContext) -> Self {
        Self {
            dispatcher,
            transport: Arc::downgrade(transport),
            ctx,
            initialize_guard: None,
            sessions: None,
        }
    }

    /// Answer a repeated `initialize` on `session` with an in-band `-32600`.
    pub fn guard_initialize(mut self, session: Arc<Session>) -> Self {
        self.initialize_guard = Some(session);
        self
    }

    /// Remove the transport's session from `sessions` when it closes.
    pub fn unregister_on_close(mut self, sessions: Arc<SessionRegistry>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Install as the transport's observer.
    pub fn install(self) {
        if let Some(transport) = self.transport.upgrade() {
            transport.set_observer(Arc::new(self));
        }
    }

    fn rejected_initialize(&self, message: &JsonRpcMessage) -> Option<JsonRpcMessage> {
        let session = self.initialize_guard.as_ref()?;
        if !message.is_initialize() {
            return None;
        }
        let error = session.begin_initialize().err()?;
        tracing::warn!(session = %session.id(), "repeated initialize rejected");
        let id = message.id().cloned().unwrap_or(RequestId::Null);
        Some(JsonRpcResponse::error(id, McpError::from(error).to_json_rpc_error()).into())
    }
}

#[async_trait]
impl TransportObserver for DispatchObserver {
    async fn on_message(&self, message: JsonRpcMessage) {
        let reply = match self.rejected_initialize(&message) {
            Some(rejection) => Some(rejection),
            None => self.dispatcher.dispatch(message, &self.ctx.renewed()).await,
        };
        let Some(reply) = reply else {
            return;
        };
        let Some(transport) = self.transport.upgrade() else {
            tracing::debug!(session = ?self.ctx.session_id, "transport gone, dropping reply");
            return;
        };
        if let Err(e) = transport.send(reply).await {
            tracing::warn!(transport = %self.ctx.transport, session = ?self.ctx.session_id, "failed to send reply: {}", e);
        }
    }

    fn on_close(&self) {
        if let Some(session) = &self.initialize_guard {
            session.release_closed_stream();
        }
        if let (Some(sessions), Some(session_id)) = (&self.sessions, &self.ctx.session_id) {
            sessions.unregister(session_id);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Backend with a fixed catalog that echoes its arguments.
    #[derive(Default)]
    pub struct StubBackend {
        pub catalog: SchemaSource,
        pub invocations: Mutex<Vec<(String, Value)>>,
        pub list_calls: AtomicUsize,
    }

    impl StubBackend {
        pub fn with_operations(ids: &[&str]) -> Self {
            let operations = ids
                .iter()
                .map(|id| {
                    let mut op = crate::registry::OperationDef::new(*id);
                    op.name = Some(id.to_string());
                    op
                })
                .collect();
            Self {
                catalog: SchemaSource::from_groups(vec![crate::registry::OperationGroup::new(
                    "ops", operations,
                )]),
                ..Default::default()
            }
        }

        pub fn invocation_count(&self) -> usize {
            self.invocations.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ToolBackend for StubBackend {
        async fn list_tools(&self, _ctx: &RequestContext) -> McpResult<SchemaSource> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.catalog.clone())
        }

        async fn invoke(
            &self,
            internal_id: &str,
            arguments: Value,
            ctx: &RequestContext,
        ) -> Result<Value, ToolFailure> {
            self.invocations
                .lock()
                .unwrap()
                .push((internal_id.to_string(), arguments.clone()));
            if internal_id == "fail" {
                return Err(ToolFailure::new("upstream exploded").with_status(502));
            }
            Ok(json!({"tool": internal_id, "arguments": arguments, "credentials": ctx.credentials}))
        }
    }
}
