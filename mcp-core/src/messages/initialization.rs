//! The `initialize` handshake.
//!
//! The client opens with an `initialize` request naming the protocol version
//! it wants; the server answers with the version it will speak, its
//! capabilities and its identity. A `notifications/initialized` notification
//! from the client completes the exchange and needs no reply.

use super::{Implementation, ProtocolVersion, ServerCapabilities, ToolCapabilities};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parameters of an `initialize` request.
///
/// Every field is optional on the way in; clients in the wild omit
/// capabilities and sometimes the client info.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version requested by the client
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<ProtocolVersion>,

    /// Capabilities offered by the client, kept opaque
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Value>,

    /// Information about the client implementation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_info: Option<Implementation>,
}

/// Server reply to `initialize`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Protocol version the server will speak
    pub protocol_version: ProtocolVersion,

    /// Capabilities provided by the server
    pub capabilities: ServerCapabilities,

    /// Information about the server implementation
    pub server_info: Implementation,

    /// Optional usage hints for the client
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl InitializeResult {
    /// Build the reply to `params` for a server that only exposes tools.
    pub fn for_request(params: &InitializeParams, server_info: Implementation) -> Self {
        Self {
            protocol_version: ProtocolVersion::negotiate(params.protocol_version.as_ref()),
            capabilities: ServerCapabilities {
                tools: Some(ToolCapabilities {
                    list_changed: false,
                }),
            },
            server_info,
            instructions: None,
        }
    }
}

/// Method name of the notification that completes the handshake.
pub const INITIALIZED_NOTIFICATION: &str = "notifications/initialized";
