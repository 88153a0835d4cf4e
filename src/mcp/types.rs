//! Serializable response types for the MCP connector tools.
//!
//! All types implement `Serialize`, `Deserialize` and `JsonSchema` so
//! poem-mcpserver can publish their schema.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::connector::ConnectorService;

/// Snapshot of one connector service
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ServiceInfo {
    pub service_id: String,
    pub name: String,
    pub host_name: String,
    pub system_type: String,
    pub capability: String,
    pub transport: String,
    /// One of disconnected, connecting, connected, disconnecting
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Client sessions registered with the service
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub session_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Whether a password is held in memory
    pub password_cached: bool,
    /// When the current connection was established (RFC3339 format)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<String>,
}

impl ServiceInfo {
    pub fn from_service(service: &ConnectorService) -> Self {
        let host = service.host();
        let provider = service.credentials_provider();
        Self {
            service_id: service.id().to_string(),
            name: service.name().to_string(),
            host_name: host.host_name().to_string(),
            system_type: host.system_type().to_string(),
            capability: service.capability().to_string(),
            transport: service.transport_name().to_string(),
            state: service.state().to_string(),
            port: service.port(),
            session_count: service.session_count(),
            user_id: provider.user_id(),
            password_cached: provider.is_password_cached(false),
            connected_at: service.connected_at().map(|at| at.to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ConnectResponse {
    pub service: ServiceInfo,
    /// False when the service was already connected
    pub newly_connected: bool,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct DisconnectResponse {
    /// Names of the services that were disconnected
    pub disconnected: Vec<String>,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ServiceListResponse {
    pub services: Vec<ServiceInfo>,
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ForgetResponse {
    /// Whether a saved password was removed from the store
    pub removed_from_store: bool,
    /// Services whose in-memory password was cleared
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub cleared_services: usize,
    pub message: String,
}
