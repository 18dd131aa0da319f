//! HTTP tool backend.
//!
//! The catalog is a JSON [`SchemaSource`] read from a local file or fetched
//! from a URL on every `tools/list`. Calls are POSTed as JSON to
//! `{invoke_url}/{internal_id}`; the response body becomes the tool result.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use mcp_core::dispatcher::{ToolBackend, ToolFailure};
use mcp_core::error::{McpResult, ToolError};
use mcp_core::middleware::RequestContext;
use mcp_core::registry::SchemaSource;
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use serde_json::Value;
use url::Url;

use crate::config::{parse_url, BackendConfig};

/// Where the operation catalog is read from.
#[derive(Debug, Clone)]
pub enum CatalogSource {
    /// A JSON file on disk
    File(PathBuf),
    /// A URL answering GET with JSON
    Url(Url),
    /// A catalog fixed at startup
    Static(SchemaSource),
}

/// [`ToolBackend`] that talks to an HTTP service.
#[derive(Debug, Clone)]
pub struct HttpToolBackend {
    client: Client,
    catalog: CatalogSource,
    invoke_url: Option<Url>,
}

impl HttpToolBackend {
    /// Create a backend with a request timeout.
    pub fn new(catalog: CatalogSource, invoke_url: Option<Url>, timeout: Duration) -> McpResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| mcp_core::McpError::internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            catalog,
            invoke_url,
        })
    }

    /// Create a backend from the `backend` config section.
    ///
    /// Without a catalog file or URL the catalog is empty.
    pub fn from_config(config: &BackendConfig) -> McpResult<Self> {
        let catalog = match (&config.catalog_file, &config.catalog_url) {
            (Some(path), _) => CatalogSource::File(path.clone()),
            (None, Some(url)) => CatalogSource::Url(parse_url("backend.catalog_url", url)?),
            (None, None) => CatalogSource::Static(SchemaSource::default()),
        };
        let invoke_url = config
            .invoke_url
            .as_deref()
            .map(|url| parse_url("backend.invoke_url", url))
            .transpose()?;
        Self::new(catalog, invoke_url, config.timeout)
    }

    async fn fetch_catalog(&self) -> Result<SchemaSource, String> {
        match &self.catalog {
            CatalogSource::Static(source) => Ok(source.clone()),
            CatalogSource::File(path) => {
                let content = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| format!("{}: {e}", path.display()))?;
                serde_json::from_str(&content).map_err(|e| format!("{}: {e}", path.display()))
            }
            CatalogSource::Url(url) => {
                let response = self
                    .client
                    .get(url.clone())
                    .send()
                    .await
                    .and_then(|response| response.error_for_status())
                    .map_err(|e| e.to_string())?;
                response.json().await.map_err(|e| e.to_string())
            }
        }
    }

    fn operation_url(&self, internal_id: &str) -> Result<Url, ToolFailure> {
        let mut url = self
            .invoke_url
            .clone()
            .ok_or_else(|| ToolFailure::new("No invoke URL configured"))?;
        url.path_segments_mut()
            .map_err(|_| ToolFailure::new("Invoke URL cannot take a path"))?
            .pop_if_empty()
            .push(internal_id);
        Ok(url)
    }
}

#[async_trait]
impl ToolBackend for HttpToolBackend {
    async fn list_tools(&self, _ctx: &RequestContext) -> McpResult<SchemaSource> {
        let source = self
            .fetch_catalog()
            .await
            .map_err(|reason| ToolError::CatalogUnavailable { reason })?;
        tracing::debug!(operations = source.operations().count(), "catalog loaded");
        Ok(source)
    }

    async fn invoke(
        &self,
        internal_id: &str,
        arguments: Value,
        ctx: &RequestContext,
    ) -> Result<Value, ToolFailure> {
        let url = self.operation_url(internal_id)?;
        let mut request = self.client.post(url).json(&arguments);
        match (&ctx.credentials, &ctx.authorization) {
            (Some(Value::String(token)), _) => request = request.bearer_auth(token),
            (_, Some(authorization)) => request = request.header(AUTHORIZATION, authorization),
            _ => {}
        }

        let response = request
            .send()
            .await
            .map_err(|e| ToolFailure::new(format!("Backend request failed: {e}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ToolFailure::new(format!("Failed to read backend response: {e}")).with_status(status.as_u16()))?;

        if !status.is_success() {
            let message = if body.is_empty() {
                format!("Backend returned {status}")
            } else {
                body
            };
            return Err(ToolFailure::new(message).with_status(status.as_u16()));
        }

        if body.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }
}
