//! MCP message types carried inside JSON-RPC envelopes.
//!
//! - [`core`]: the JSON-RPC 2.0 envelope itself
//! - [`initialization`]: the `initialize` handshake
//! - [`tools`]: `tools/list` and `tools/call`

pub mod core;
pub mod initialization;
pub mod tools;

pub use core::*;
pub use initialization::*;
pub use tools::*;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// MCP protocol version identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// MCP Protocol version 2024-11-05 (legacy SSE era)
    #[serde(rename = "2024-11-05")]
    V2024_11_05,

    /// MCP Protocol version 2025-03-26 (streamable HTTP)
    #[serde(rename = "2025-03-26")]
    V2025_03_26,

    /// Any other version string a client may send
    #[serde(untagged)]
    Custom(String),
}

impl ProtocolVersion {
    /// Get the string representation of the protocol version.
    pub fn as_str(&self) -> &str {
        match self {
            Self::V2024_11_05 => "2024-11-05",
            Self::V2025_03_26 => "2025-03-26",
            Self::Custom(version) => version,
        }
    }

    /// Check if this version is supported by the server.
    pub fn is_supported(&self) -> bool {
        matches!(self, Self::V2024_11_05 | Self::V2025_03_26)
    }

    /// The version the server answers with when a client asks for one it
    /// does not speak.
    pub fn latest() -> Self {
        Self::V2025_03_26
    }

    /// Pick the version to answer an `initialize` with.
    pub fn negotiate(requested: Option<&ProtocolVersion>) -> Self {
        match requested {
            Some(version) if version.is_supported() => version.clone(),
            _ => Self::latest(),
        }
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::latest()
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Capabilities the server advertises in its `initialize` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ServerCapabilities {
    /// Tool support
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolCapabilities>,
}

/// Tool-related capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ToolCapabilities {
    /// Whether the server emits list-changed notifications
    pub list_changed: bool,
}

/// Implementation information for client or server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    /// Name of the implementation
    pub name: String,

    /// Version of the implementation
    pub version: String,

    /// Additional implementation metadata
    #[serde(flatten)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Implementation {
    /// Create a new implementation info structure.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            metadata: HashMap::new(),
        }
    }
}
