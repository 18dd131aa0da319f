//! Middleware composition for tool requests.
//!
//! A [`MiddlewareChain`] is an ordered list of [`Middleware`] values in front
//! of one terminal [`Endpoint`]. Each middleware receives the request, the
//! [`RequestContext`] and a [`Next`] handle; it may answer on its own or call
//! [`Next::run`] to continue. The endpoint is always last and has no `next`.
//!
//! The chain is plain data: [`MiddlewareChain::names`] lists the layers in
//! execution order without running anything.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use mcp_core::middleware::{Endpoint, Middleware, MiddlewareChain, Next, RequestContext};
//! use mcp_core::transport::TransportKind;
//! use mcp_core::McpResult;
//!
//! struct Upper;
//!
//! #[async_trait]
//! impl Middleware<String, String> for Upper {
//!     fn name(&self) -> &str {
//!         "upper"
//!     }
//!
//!     async fn handle(
//!         &self,
//!         request: String,
//!         ctx: &RequestContext,
//!         next: Next<'_, String, String>,
//!     ) -> McpResult<String> {
//!         next.run(request.to_uppercase(), ctx).await
//!     }
//! }
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl Endpoint<String, String> for Echo {
//!     async fn call(&self, request: String, _ctx: &RequestContext) -> McpResult<String> {
//!         Ok(request)
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let chain = MiddlewareChain::compose(vec![Arc::new(Upper)], Arc::new(Echo));
//! let ctx = RequestContext::new(TransportKind::StreamableHttp);
//! assert_eq!(chain.call("hi".to_string(), &ctx).await.unwrap(), "HI");
//! # });
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::McpResult;
use crate::transport::TransportKind;

/// Per-request state passed explicitly through middleware and the backend.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Session the request belongs to
    pub session_id: Option<String>,

    /// Wire binding the request arrived on
    pub transport: TransportKind,

    /// Raw `Authorization` header of the originating HTTP request
    pub authorization: Option<String>,

    /// Credentials resolved by the configured credential provider
    pub credentials: Option<Value>,

    /// When the request was received
    pub received_at: DateTime<Utc>,

    /// Free-form values middleware can hand to later layers
    pub metadata: HashMap<String, Value>,
}

impl RequestContext {
    /// Context for a request on `transport` without a session.
    pub fn new(transport: TransportKind) -> Self {
        Self {
            session_id: None,
            transport,
            authorization: None,
            credentials: None,
            received_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Bind the context to a session.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Attach the `Authorization` header value.
    pub fn with_authorization(mut self, authorization: Option<String>) -> Self {
        self.authorization = authorization;
        self
    }

    /// Copy of this context stamped with the current time.
    pub fn renewed(&self) -> Self {
        Self {
            received_at: Utc::now(),
            ..self.clone()
        }
    }
}

/// One interceptor in a chain.
#[async_trait]
pub trait Middleware<Req, Res>: Send + Sync {
    /// Name shown by [`MiddlewareChain::names`] and in logs.
    fn name(&self) -> &str;

    /// Handle `request`, optionally continuing with `next`.
    async fn handle(
        &self,
        request: Req,
        ctx: &RequestContext,
        next: Next<'_, Req, Res>,
    ) -> McpResult<Res>;
}

/// Terminal step of a chain.
#[async_trait]
pub trait Endpoint<Req, Res>: Send + Sync {
    /// Produce the response; never delegates further.
    async fn call(&self, request: Req, ctx: &RequestContext) -> McpResult<Res>;
}

/// The remainder of a chain, handed to each middleware.
pub struct Next<'a, Req, Res> {
    layers: &'a [Arc<dyn Middleware<Req, Res>>],
    endpoint: &'a dyn Endpoint<Req, Res>,
}

impl<'a, Req, Res> Next<'a, Req, Res>
where
    Req: Send,
    Res: Send,
{
    /// Run the rest of the chain.
    pub async fn run(self, request: Req, ctx: &RequestContext) -> McpResult<Res> {
        match self.layers.split_first() {
            Some((layer, rest)) => {
                let next = Next {
                    layers: rest,
                    endpoint: self.endpoint,
                };
                layer.handle(request, ctx, next).await
            }
            None => self.endpoint.call(request, ctx).await,
        }
    }
}

/// Middleware layers composed in front of an endpoint.
pub struct MiddlewareChain<Req, Res> {
    layers: Vec<Arc<dyn Middleware<Req, Res>>>,
    endpoint: Arc<dyn Endpoint<Req, Res>>,
}

impl<Req, Res> MiddlewareChain<Req, Res>
where
    Req: Send,
    Res: Send,
{
    /// Compose `layers`, outermost first, in front of `endpoint`.
    pub fn compose(
        layers: Vec<Arc<dyn Middleware<Req, Res>>>,
        endpoint: Arc<dyn Endpoint<Req, Res>>,
    ) -> Self {
        Self { layers, endpoint }
    }

    /// Layer names in execution order.
    pub fn names(&self) -> Vec<&str> {
        self.layers.iter().map(|layer| layer.name()).collect()
    }

    /// Number of middleware layers.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Whether requests go straight to the endpoint.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Run `request` through the chain.
    pub async fn call(&self, request: Req, ctx: &RequestContext) -> McpResult<Res> {
        Next {
            layers: &self.layers,
            endpoint: self.endpoint.as_ref(),
        }
        .run(request, ctx)
        .await
    }
}

impl<Req, Res> std::fmt::Debug for MiddlewareChain<Req, Res> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.layers.iter().map(|layer| layer.name()).collect();
        f.debug_struct("MiddlewareChain")
            .field("layers", &names)
            .finish()
    }
}
