//! Server configuration.
//!
//! Loaded from a JSON, YAML or TOML file and then overridden by command-line
//! flags. Every field has a default, so an empty file is a valid config.
//!
//! ```rust
//! use mcp_server::config::ServerConfig;
//!
//! let config: ServerConfig = serde_json::from_str(r#"{
//!     "bind": "0.0.0.0:9000",
//!     "base_path": "/api",
//!     "tools": {"include": [{"startsWith": "drive_"}]},
//!     "rate_limit": {"max_calls": 10, "window": "1m"}
//! }"#).unwrap();
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.sse_endpoint("abc"), "/api/mcp/messages?sessionId=abc");
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mcp_core::error::{ConfigError, McpError, McpResult};
use mcp_core::registry::ToolFilter;
use mcp_core::transport::TransportOptions;
use serde::{Deserialize, Serialize};
use url::Url;

/// Top-level server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on
    pub bind: String,

    /// Prefix of every route; empty or `/segment` without a trailing slash
    pub base_path: String,

    /// Session tracking
    pub sessions: SessionConfig,

    /// Transport tunables
    pub transport: TransportOptions,

    /// Include/exclude filters applied to the derived tools
    pub tools: ToolFilter,

    /// Per-tool call rate limit
    pub rate_limit: Option<RateLimitConfig>,

    /// Check call arguments against the tool's input schema
    pub validate_arguments: bool,

    /// Log tool arguments on every call
    pub log_arguments: bool,

    /// Where the catalog comes from and where calls go
    pub backend: BackendConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            base_path: String::new(),
            sessions: SessionConfig::default(),
            transport: TransportOptions::default(),
            tools: ToolFilter::default(),
            rate_limit: None,
            validate_arguments: true,
            log_arguments: false,
            backend: BackendConfig::default(),
        }
    }
}

/// Session tracking settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Require `mcp-session-id` on every stateless request after `initialize`
    pub enabled: bool,

    /// Cap on concurrent sessions; `null` removes the cap
    pub max_sessions: Option<usize>,
}

/// Session cap used when the config does not set one.
pub const DEFAULT_MAX_SESSIONS: usize = 1024;

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_sessions: Some(DEFAULT_MAX_SESSIONS),
        }
    }
}

/// Sliding-window call limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Calls allowed per tool within one window
    pub max_calls: usize,

    /// Window length
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

/// HTTP tool backend settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Catalog as a local JSON file
    pub catalog_file: Option<PathBuf>,

    /// Catalog fetched with a GET
    pub catalog_url: Option<String>,

    /// Base URL calls are POSTed to, as `{invoke_url}/{internal_id}`
    pub invoke_url: Option<String>,

    /// Timeout of every backend request
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            catalog_file: None,
            catalog_url: None,
            invoke_url: None,
            timeout: Duration::from_secs(30),
        }
    }
}

fn invalid(parameter: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        parameter: parameter.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

impl ServerConfig {
    /// Load configuration from a file.
    ///
    /// The format follows the extension: `.json`, `.yaml`/`.yml` or `.toml`.
    /// The result is validated before it is returned.
    pub fn from_file(path: impl AsRef<Path>) -> McpResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => McpError::from(ConfigError::FileNotFound {
                path: path.display().to_string(),
            }),
            _ => McpError::from(e),
        })?;

        let format_error = |reason: String| ConfigError::InvalidFormat {
            path: path.display().to_string(),
            reason,
        };
        let config: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&content).map_err(|e| format_error(e.to_string()))?,
            // Enums such as filter patterns are written as single-key maps
            Some("yaml") | Some("yml") => serde_yaml::with::singleton_map_recursive::deserialize(
                serde_yaml::Deserializer::from_str(&content),
            )
            .map_err(|e| format_error(e.to_string()))?,
            Some("toml") => toml::from_str(&content).map_err(|e| format_error(e.to_string()))?,
            _ => {
                return Err(format_error(
                    "Unsupported file format. Use .json, .yaml, or .toml".to_string(),
                )
                .into())
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> McpResult<()> {
        self.bind_addr()?;

        let base = &self.base_path;
        if !base.is_empty() && (!base.starts_with('/') || base.ends_with('/')) {
            return Err(invalid(
                "base_path",
                base,
                "Base path must start with '/' and must not end with '/'",
            )
            .into());
        }

        if self.sessions.max_sessions == Some(0) {
            return Err(invalid("sessions.max_sessions", 0, "Session limit must be greater than zero").into());
        }

        self.transport.validate()?;

        if let Some(limit) = &self.rate_limit {
            if limit.max_calls == 0 {
                return Err(invalid("rate_limit.max_calls", 0, "Call limit must be greater than zero").into());
            }
            if limit.window.is_zero() {
                return Err(invalid("rate_limit.window", "0s", "Window must be greater than zero").into());
            }
        }

        self.backend.validate()
    }

    /// Parsed listen address.
    pub fn bind_addr(&self) -> McpResult<SocketAddr> {
        self.bind
            .parse()
            .map_err(|_| invalid("bind", &self.bind, "Expected an address like 127.0.0.1:8080").into())
    }

    /// Route path under the base path.
    pub fn route(&self, path: &str) -> String {
        format!("{}{}", self.base_path, path)
    }

    /// Side-channel URL announced by the legacy SSE stream.
    pub fn sse_endpoint(&self, session_id: &str) -> String {
        format!("{}?sessionId={}", self.route("/mcp/messages"), session_id)
    }
}

impl BackendConfig {
    /// Validate the backend section.
    pub fn validate(&self) -> McpResult<()> {
        if self.catalog_file.is_some() && self.catalog_url.is_some() {
            return Err(invalid(
                "backend.catalog_url",
                self.catalog_url.as_deref().unwrap_or_default(),
                "Set either catalog_file or catalog_url, not both",
            )
            .into());
        }
        if let Some(url) = &self.catalog_url {
            parse_url("backend.catalog_url", url)?;
        }
        if let Some(url) = &self.invoke_url {
            parse_url("backend.invoke_url", url)?;
        }
        if self.timeout.is_zero() {
            return Err(invalid("backend.timeout", "0s", "Timeout must be greater than zero").into());
        }
        Ok(())
    }
}

/// Parse an absolute http(s) URL.
pub fn parse_url(parameter: &str, value: &str) -> McpResult<Url> {
    let url = Url::parse(value).map_err(|e| invalid(parameter, value, &format!("Invalid URL: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(parameter, value, "URL must use http or https").into());
    }
    Ok(url)
}
