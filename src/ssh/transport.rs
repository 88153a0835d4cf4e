//! [`ConnectorTransport`] over russh.

use async_trait::async_trait;
use russh::{Disconnect, client};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::client::{Login, SshSettings, connect_with_retry, resolve_address};
use super::handler::SshClientHandler;
use crate::connector::{ConnectorService, ConnectorTransport};
use crate::error::{ConnectorError, TransportError};

/// One SSH connection per connector service.
///
/// Credentials come from the service's provider, so a password entered for a
/// sibling service of the same host is reused here.
pub struct SshTransport {
    settings: SshSettings,
    handle: Mutex<Option<client::Handle<SshClientHandler>>>,
}

impl SshTransport {
    pub fn new(settings: SshSettings) -> Self {
        Self {
            settings,
            handle: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &SshSettings {
        &self.settings
    }

    /// Whether a live handle is held.
    pub async fn has_session(&self) -> bool {
        self.handle
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_closed())
    }
}

impl Default for SshTransport {
    fn default() -> Self {
        Self::new(SshSettings::from_env())
    }
}

#[async_trait]
impl ConnectorTransport for SshTransport {
    fn name(&self) -> &'static str {
        "ssh"
    }

    async fn connect(
        &self,
        service: &ConnectorService,
        cancel: &CancellationToken,
    ) -> Result<(), ConnectorError> {
        let (host, port) = resolve_address(&service.host_name(), service.port())?;

        let credentials = service
            .credentials_provider()
            .acquire_credentials(false)
            .await
            .map_err(|e| {
                info!("Sign-on to {} not completed: {}", host, e);
                e
            })?;
        let user_id = credentials
            .user_id
            .ok_or_else(|| TransportError::new(format!("No user id known for {}", host)))?;

        let login = Login {
            user_id: &user_id,
            password: credentials.password.as_deref(),
        };
        let (handle, _retries) =
            match connect_with_retry(&host, port, &login, &self.settings, cancel).await {
                Ok(connected) => connected,
                Err(_) if cancel.is_cancelled() => return Err(ConnectorError::Canceled),
                Err(e) => return Err(e.into()),
            };

        info!("SSH session to {}@{}:{} established", user_id, host, port);
        if let Some(stale) = self.handle.lock().await.replace(handle) {
            let _ = stale
                .disconnect(Disconnect::ByApplication, "Replaced by new session", "en")
                .await;
        }
        Ok(())
    }

    async fn disconnect(
        &self,
        service: &ConnectorService,
        _cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        let Some(handle) = self.handle.lock().await.take() else {
            return Ok(());
        };

        handle
            .disconnect(Disconnect::ByApplication, "Connector disconnected", "en")
            .await
            .map_err(|e| {
                warn!("SSH disconnect from {} failed: {}", service.host_name(), e);
                TransportError::connection_lost(format!("Failed to disconnect: {}", e))
            })
    }
}
