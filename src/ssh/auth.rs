//! Authentication methods tried in order against an SSH server.
//!
//! The chain for a connector is password, then the configured key file, and
//! the SSH agent only when neither of those is available.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use russh::{client, keys};
use tracing::{debug, info};

use super::handler::SshClientHandler;
use crate::error::TransportError;

type Handle = client::Handle<SshClientHandler>;

/// One way of proving identity to the server.
#[async_trait]
pub trait AuthMethod: Send + Sync {
    /// `Ok(false)` means the server rejected the credentials.
    async fn authenticate(&self, handle: &mut Handle, user_id: &str)
    -> Result<bool, TransportError>;

    fn name(&self) -> &'static str;
}

pub struct PasswordAuth {
    password: String,
}

impl PasswordAuth {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
        }
    }
}

#[async_trait]
impl AuthMethod for PasswordAuth {
    async fn authenticate(
        &self,
        handle: &mut Handle,
        user_id: &str,
    ) -> Result<bool, TransportError> {
        let result = handle
            .authenticate_password(user_id, &self.password)
            .await
            .map_err(|e| TransportError::new(format!("Password authentication failed: {}", e)))?;
        Ok(result.success())
    }

    fn name(&self) -> &'static str {
        "password"
    }
}

/// Passphrase-less private key loaded from disk on each attempt.
pub struct KeyFileAuth {
    key_path: PathBuf,
}

impl KeyFileAuth {
    pub fn new(key_path: impl Into<PathBuf>) -> Self {
        Self {
            key_path: key_path.into(),
        }
    }
}

#[async_trait]
impl AuthMethod for KeyFileAuth {
    async fn authenticate(
        &self,
        handle: &mut Handle,
        user_id: &str,
    ) -> Result<bool, TransportError> {
        let key_pair = keys::load_secret_key(&self.key_path, None).map_err(|e| {
            TransportError::new(format!(
                "Key authentication failed: cannot load {}: {}",
                self.key_path.display(),
                e
            ))
        })?;

        let hash_alg = handle
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();
        debug!("RSA hash for key authentication: {:?}", hash_alg);

        let result = handle
            .authenticate_publickey(
                user_id,
                keys::PrivateKeyWithHashAlg::new(Arc::new(key_pair), hash_alg),
            )
            .await
            .map_err(|e| TransportError::new(format!("Key authentication failed: {}", e)))?;
        Ok(result.success())
    }

    fn name(&self) -> &'static str {
        "key"
    }
}

/// Every identity offered by the agent behind `SSH_AUTH_SOCK`.
#[derive(Default)]
pub struct AgentAuth;

#[async_trait]
impl AuthMethod for AgentAuth {
    async fn authenticate(
        &self,
        handle: &mut Handle,
        user_id: &str,
    ) -> Result<bool, TransportError> {
        let mut agent = keys::agent::client::AgentClient::connect_env()
            .await
            .map_err(|e| {
                TransportError::new(format!("Agent authentication failed: no agent: {}", e))
            })?;

        let identities = agent.request_identities().await.map_err(|e| {
            TransportError::new(format!("Agent authentication failed: {}", e))
        })?;

        for identity in identities {
            let hash_alg = handle
                .best_supported_rsa_hash()
                .await
                .ok()
                .flatten()
                .flatten();

            match handle
                .authenticate_publickey_with(user_id, identity.clone(), hash_alg, &mut agent)
                .await
            {
                Ok(result) if result.success() => {
                    info!("Authenticated {} with an agent identity", user_id);
                    return Ok(true);
                }
                Ok(_) => debug!("Agent identity {:?} rejected", identity.comment()),
                Err(e) => debug!("Agent identity {:?} failed: {}", identity.comment(), e),
            }
        }

        Ok(false)
    }

    fn name(&self) -> &'static str {
        "agent"
    }
}

/// Methods tried in insertion order until one succeeds.
#[derive(Default)]
pub struct AuthChain {
    methods: Vec<Box<dyn AuthMethod>>,
}

impl AuthChain {
    /// Password first, then the key file, and the agent only as a last resort.
    pub fn for_credentials(password: Option<&str>, key_path: Option<PathBuf>) -> Self {
        let mut chain = Self::default();
        if let Some(password) = password {
            chain.methods.push(Box::new(PasswordAuth::new(password)));
        }
        if let Some(key_path) = key_path {
            chain.methods.push(Box::new(KeyFileAuth::new(key_path)));
        }
        if chain.methods.is_empty() {
            chain.methods.push(Box::new(AgentAuth));
        }
        chain
    }

    pub fn method_names(&self) -> Vec<&'static str> {
        self.methods.iter().map(|m| m.name()).collect()
    }

    /// Run the chain; the error carries the last failure seen.
    pub async fn authenticate(
        &self,
        handle: &mut Handle,
        user_id: &str,
    ) -> Result<(), TransportError> {
        let mut last_error = None;

        for method in &self.methods {
            debug!("Trying {} authentication for {}", method.name(), user_id);
            match method.authenticate(handle, user_id).await {
                Ok(true) => return Ok(()),
                Ok(false) => {
                    last_error = Some(TransportError::new(format!(
                        "{} authentication failed: rejected by server",
                        method.name()
                    )))
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| TransportError::new("All authentication methods failed")))
    }
}
