//! Building blocks for opening an authenticated russh session.
//!
//! ## Retry Strategy
//!
//! Attempts use exponential backoff with jitter via `backon`, starting at the
//! configured delay and capped at [`MAX_RETRY_DELAY`]. Only failures that
//! [`TransportError::is_retryable`] accepts are retried, so a rejected password
//! is reported after the first attempt.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use russh::client;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::auth::AuthChain;
use super::handler::SshClientHandler;
use crate::config::{
    MAX_RETRY_DELAY, resolve_compression, resolve_connect_timeout, resolve_max_retries,
    resolve_retry_delay, resolve_ssh_key_path,
};
use crate::error::TransportError;

/// Default SSH port when neither the service nor the host name carries one
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Connection settings shared by every attempt.
#[derive(Debug, Clone)]
pub struct SshSettings {
    pub connect_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub compress: bool,
    pub key_path: Option<PathBuf>,
}

impl SshSettings {
    /// Settings from the environment, falling back to built-in defaults.
    pub fn from_env() -> Self {
        Self {
            connect_timeout: resolve_connect_timeout(None),
            max_retries: resolve_max_retries(None),
            retry_delay: resolve_retry_delay(None),
            compress: resolve_compression(None),
            key_path: resolve_ssh_key_path(None),
        }
    }
}

impl Default for SshSettings {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Who to log in as, and with what.
pub struct Login<'a> {
    pub user_id: &'a str,
    pub password: Option<&'a str>,
}

/// Client configuration with inactivity timeout, 30 s keepalive and optional zlib.
pub(crate) fn build_client_config(timeout: Duration, compress: bool) -> Arc<client::Config> {
    let compression = if compress {
        (&[russh::compression::ZLIB, russh::compression::NONE][..]).into()
    } else {
        (&[russh::compression::NONE][..]).into()
    };

    Arc::new(client::Config {
        inactivity_timeout: Some(timeout),
        keepalive_interval: Some(Duration::from_secs(30)),
        keepalive_max: 3,
        preferred: russh::Preferred {
            compression,
            ..Default::default()
        },
        ..Default::default()
    })
}

/// Split a host name into host and port.
///
/// An explicit `port` wins over a `host:port` suffix. `rsplit_once` keeps
/// bracketed IPv6 literals such as `[::1]:22` intact.
pub(crate) fn resolve_address(
    host_name: &str,
    port: Option<u16>,
) -> Result<(String, u16), TransportError> {
    let (host, embedded) = match host_name.rsplit_once(':') {
        Some((host, port_str)) if !host.ends_with(':') => {
            let embedded = port_str.parse::<u16>().map_err(|e| {
                TransportError::new(format!("Invalid port in host name '{}': {}", host_name, e))
            })?;
            (host, Some(embedded))
        }
        _ => (host_name, None),
    };

    if host.is_empty() {
        return Err(TransportError::new("Host name is empty"));
    }

    Ok((
        host.to_string(),
        port.or(embedded).unwrap_or(DEFAULT_SSH_PORT),
    ))
}

/// Open and authenticate a session, retrying transient failures.
///
/// Returns the handle and how many retries it took. The cancel token stops
/// the attempt loop at any point, including while backing off.
pub(crate) async fn connect_with_retry(
    host: &str,
    port: u16,
    login: &Login<'_>,
    settings: &SshSettings,
    cancel: &CancellationToken,
) -> Result<(client::Handle<SshClientHandler>, u32), TransportError> {
    let attempt_counter = AtomicU32::new(0);

    let backoff = ExponentialBuilder::default()
        .with_min_delay(settings.retry_delay)
        .with_max_delay(MAX_RETRY_DELAY)
        .with_max_times(settings.max_retries as usize)
        .with_jitter();

    let attempts = (|| async {
        let current = attempt_counter.fetch_add(1, Ordering::SeqCst);
        if current > 0 {
            warn!(
                "SSH connection retry attempt {} to {}@{}:{}",
                current, login.user_id, host, port
            );
        }
        connect_once(host, port, login, settings).await
    })
    .retry(backoff)
    .when(|e: &TransportError| {
        let retryable = e.is_retryable();
        if !retryable {
            warn!(
                "SSH connection to {}@{}:{} failed with non-retryable error: {}",
                login.user_id, host, port, e
            );
        }
        retryable
    })
    .notify(|err, dur| {
        warn!("SSH connection failed: {}. Retrying in {:?}", err, dur);
    });

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransportError::new("SSH connection canceled")),
        result = attempts => result,
    };

    let total_attempts = attempt_counter.load(Ordering::SeqCst);
    let retry_count = total_attempts.saturating_sub(1);

    match result {
        Ok(handle) => {
            if retry_count > 0 {
                info!(
                    "SSH connection to {}@{}:{} succeeded after {} retry attempt(s)",
                    login.user_id, host, port, retry_count
                );
            }
            Ok((handle, retry_count))
        }
        Err(e) => {
            error!(
                "SSH connection to {}@{}:{} failed after {} attempt(s): {}",
                login.user_id, host, port, total_attempts, e
            );
            Err(e)
        }
    }
}

async fn connect_once(
    host: &str,
    port: u16,
    login: &Login<'_>,
    settings: &SshSettings,
) -> Result<client::Handle<SshClientHandler>, TransportError> {
    let config = build_client_config(settings.connect_timeout, settings.compress);
    let handler = SshClientHandler::new(host);

    let mut handle = tokio::time::timeout(
        settings.connect_timeout,
        client::connect(config, (host, port), handler),
    )
    .await
    .map_err(|_| {
        TransportError::new(format!(
            "Connection timed out after {:?}",
            settings.connect_timeout
        ))
    })?
    .map_err(|e| TransportError::new(format!("Failed to connect: {}", e)))?;

    AuthChain::for_credentials(login.password, settings.key_path.clone())
        .authenticate(&mut handle, login.user_id)
        .await?;

    Ok(handle)
}
