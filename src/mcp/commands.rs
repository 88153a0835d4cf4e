//! MCP connector tools.
//!
//! - `connector_connect`: connect the shared service for a host and capability
//! - `connector_disconnect`: disconnect one or all services of a host
//! - `connector_list`: every known service with state and credential status
//! - `credential_forget`: drop a saved password and every in-memory copy

use std::sync::Arc;

use poem_mcpserver::{Tools, tool::StructuredContent};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::context::ConnectorContext;
use super::types::{
    ConnectResponse, DisconnectResponse, ForgetResponse, ServiceInfo, ServiceListResponse,
};
use crate::connector::Capability;
use crate::connector::store::DEFAULT_SYSTEM_TYPE;

/// MCP tools over a shared [`ConnectorContext`].
pub struct McpConnectorTools {
    context: Arc<ConnectorContext>,
}

impl McpConnectorTools {
    pub fn new(context: Arc<ConnectorContext>) -> Self {
        Self { context }
    }
}

fn parse_capability(capability: Option<String>) -> Result<Capability, String> {
    match capability {
        Some(name) => name.parse(),
        None => Ok(Capability::Shells),
    }
}

/// Connection request as received by `connector_connect`.
#[derive(Debug, Default)]
pub struct ConnectRequest {
    pub host_name: String,
    pub system_type: Option<String>,
    pub capability: Option<String>,
    pub port: Option<u16>,
    pub user_id: Option<String>,
    pub password: Option<String>,
    pub save_password: Option<bool>,
}

impl McpConnectorTools {
    pub async fn connect_service(&self, request: ConnectRequest) -> Result<ConnectResponse, String> {
        let capability = parse_capability(request.capability)?;
        let host_name = request.host_name;
        let host = self
            .context
            .resolve_host(&host_name, request.system_type.as_deref());
        let service = self.context.service(&host, &capability);

        if request.port.is_some() {
            service.set_port(request.port);
        }

        let provider = service.credentials_provider();
        let save = request.save_password.unwrap_or(false);
        match (request.user_id.as_deref(), request.password.as_deref()) {
            (Some(user_id), Some(password)) => provider.set_password(user_id, password, save, true),
            (Some(user_id), None) => provider.set_user_id(user_id),
            (None, Some(password)) => {
                let user_id = provider
                    .user_id()
                    .ok_or_else(|| format!("A user id is required to sign on to {}", host_name))?;
                provider.set_password(&user_id, password, save, true)
            }
            (None, None) => {}
        }

        if service.is_connected() {
            return Ok(ConnectResponse {
                service: ServiceInfo::from_service(&service),
                newly_connected: false,
                message: format!("{} is already connected", service.name()),
            });
        }

        info!("Connecting {} to {}", service.name(), host_name);
        if let Err(e) = service.connect(&CancellationToken::new()).await {
            error!("Connecting {} failed: {}", service.name(), e);
            return Err(format!("Failed to connect {}: {}", service.name(), e));
        }

        Ok(ConnectResponse {
            service: ServiceInfo::from_service(&service),
            newly_connected: true,
            message: format!("Connected {} to {}", service.name(), host_name),
        })
    }

    pub async fn disconnect_services(
        &self,
        host_name: &str,
        capability: Option<String>,
    ) -> Result<DisconnectResponse, String> {
        let host = self
            .context
            .known_host(host_name)
            .ok_or_else(|| format!("No connector services for host {}", host_name))?;
        let wanted = match capability {
            Some(name) => Some(name.parse::<Capability>()?),
            None => None,
        };

        let cancel = CancellationToken::new();
        let mut disconnected = Vec::new();
        for service in self.context.registry().services_for(&host) {
            if wanted.as_ref().is_some_and(|c| c != service.capability()) {
                continue;
            }
            if !service.is_connected() {
                continue;
            }
            service
                .disconnect(&cancel)
                .await
                .map_err(|e| format!("Failed to disconnect {}: {}", service.name(), e))?;
            disconnected.push(service.name().to_string());
        }
        disconnected.sort();

        let message = if disconnected.is_empty() {
            format!("Nothing connected on {}", host_name)
        } else {
            format!("Disconnected {} service(s) on {}", disconnected.len(), host_name)
        };
        Ok(DisconnectResponse {
            disconnected,
            message,
        })
    }

    pub fn list_services(&self) -> ServiceListResponse {
        let mut services: Vec<ServiceInfo> = self
            .context
            .registry()
            .services()
            .iter()
            .map(|service| ServiceInfo::from_service(service))
            .collect();
        services.sort_by(|a, b| a.name.cmp(&b.name));

        let count = services.len();
        ServiceListResponse { services, count }
    }

    /// Remove the saved password and clear every in-memory copy on the host.
    ///
    /// The store lookup uses `system_type`, else the host's type once known,
    /// else `DEFAULT`.
    pub fn forget_credential(
        &self,
        host_name: &str,
        system_type: Option<String>,
        user_id: &str,
    ) -> ForgetResponse {
        let host = self.context.known_host(host_name);
        let system_type = system_type
            .or_else(|| {
                host.as_ref()
                    .filter(|h| !h.is_placeholder())
                    .map(|h| h.system_type().to_string())
            })
            .unwrap_or_else(|| DEFAULT_SYSTEM_TYPE.to_string());

        let removed_from_store = self.context.store().remove(&system_type, host_name, user_id);

        let mut cleared_services = 0;
        if let Some(host) = host {
            for service in self.context.registry().services_for(&host) {
                let provider = service.credentials_provider();
                if provider.is_password_cached(false) {
                    provider.clear_password(false, false);
                    cleared_services += 1;
                }
            }
        }

        info!(
            "Forgot password of {} on {} ({} in store, {} service(s) cleared)",
            user_id,
            host_name,
            if removed_from_store { "removed" } else { "absent" },
            cleared_services
        );
        ForgetResponse {
            removed_from_store,
            cleared_services,
            message: format!("Forgot password of {} on {}", user_id, host_name),
        }
    }
}

#[Tools]
impl McpConnectorTools {
    /// Connect the shared connector service for a host and capability.
    ///
    /// Services are shared: every caller asking for the same host and
    /// capability gets the same connection. A password given here is also
    /// offered to the other idle services of the host.
    #[allow(clippy::too_many_arguments)]
    async fn connector_connect(
        &self,
        /// Host name or address, optionally with ":port"
        host_name: String,
        /// System type of the host (e.g. "Linux"); omitted means not yet known
        system_type: Option<String>,
        /// Capability to connect: files, shells, processes, terminals (default: shells)
        capability: Option<String>,
        /// Port to connect to (default: 22)
        port: Option<u16>,
        /// User id to sign on with
        user_id: Option<String>,
        /// Password for the user id
        password: Option<String>,
        /// Save the password in the credential store (default: false)
        save_password: Option<bool>,
    ) -> Result<StructuredContent<ConnectResponse>, String> {
        self.connect_service(ConnectRequest {
            host_name,
            system_type,
            capability,
            port,
            user_id,
            password,
            save_password,
        })
        .await
        .map(StructuredContent)
    }

    /// Disconnect the services of a host.
    ///
    /// Without a capability every service of the host is disconnected. The
    /// services stay registered and can be connected again.
    async fn connector_disconnect(
        &self,
        /// Host name used when connecting
        host_name: String,
        /// Only disconnect this capability
        capability: Option<String>,
    ) -> Result<StructuredContent<DisconnectResponse>, String> {
        self.disconnect_services(&host_name, capability)
            .await
            .map(StructuredContent)
    }

    /// List every connector service with its state and credential status.
    async fn connector_list(&self) -> StructuredContent<ServiceListResponse> {
        StructuredContent(self.list_services())
    }

    /// Forget a password: remove it from the credential store and clear it
    /// from every service of the host.
    async fn credential_forget(
        &self,
        /// Host name the password was saved for
        host_name: String,
        /// System type the password was saved under (default: the host's, else DEFAULT)
        system_type: Option<String>,
        /// User id the password belongs to
        user_id: String,
    ) -> StructuredContent<ForgetResponse> {
        StructuredContent(self.forget_credential(&host_name, system_type, &user_id))
    }
}
