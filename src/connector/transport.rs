//! Pluggable transport behind a connector service.
//!
//! The connector service owns the state machine; a [`ConnectorTransport`]
//! only knows how to open and close the wire connection. Hooks default to
//! no-ops so simple transports implement just `connect` and `disconnect`.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::service::ConnectorService;
use crate::error::{ConnectorError, TransportError};

/// Wire-level connect/disconnect supplied by a concrete protocol.
///
/// Every method receives the owning service so a transport can read the host,
/// port and credentials without keeping its own copy.
#[async_trait]
pub trait ConnectorTransport: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn pre_connect(&self, _service: &ConnectorService) -> Result<(), TransportError> {
        Ok(())
    }

    /// Open the connection. Cancellation while connecting is the transport's job.
    ///
    /// A declined or suppressed sign-on is reported as [`ConnectorError::Canceled`];
    /// wire failures as [`ConnectorError::Transport`].
    async fn connect(
        &self,
        service: &ConnectorService,
        cancel: &CancellationToken,
    ) -> Result<(), ConnectorError>;

    async fn post_connect(&self, _service: &ConnectorService) {}

    async fn pre_disconnect(&self, _service: &ConnectorService) {}

    async fn disconnect(
        &self,
        service: &ConnectorService,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError>;

    async fn post_disconnect(&self, _service: &ConnectorService) {}

    /// Version/release/modification of the remote system, when connected.
    fn version_release_modification(&self) -> Option<String> {
        None
    }

    fn home_directory(&self) -> Option<String> {
        None
    }

    fn temp_directory(&self) -> Option<String> {
        None
    }
}

/// How a remote server process gets started before connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerLaunchType {
    /// A daemon on the host starts the server
    Daemon,
    /// The server is started through rexec
    Rexec,
    /// The server is already running
    Running,
    /// The server is started over an SSH session
    Ssh,
    /// The server is started over telnet
    Telnet,
}

/// Server launch configuration attached to a connector service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerLaunchProperties {
    pub launch_type: ServerLaunchType,
    pub daemon_port: Option<u16>,
    pub server_path: Option<String>,
    pub server_script: Option<String>,
}

impl ServerLaunchProperties {
    pub fn new(launch_type: ServerLaunchType) -> Self {
        Self {
            launch_type,
            daemon_port: None,
            server_path: None,
            server_script: None,
        }
    }
}
