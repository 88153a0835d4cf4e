//! Sign-on credentials for connector services.
//!
//! This module provides:
//! - [`Credentials`]: the user id / password pair handed to transports
//! - [`CredentialsProvider`]: a service's in-memory credential and its sign-on flow
//! - [`CredentialPropagator`]: sharing a credential change with sibling services
//! - [`CredentialPrompt`] and [`SignonValidator`]: hooks for interactive sign-on

mod propagate;
mod provider;

use std::fmt;

use async_trait::async_trait;

pub use propagate::CredentialPropagator;
pub use provider::CredentialsProvider;
pub(crate) use provider::CredentialState;

use super::store::SignonInfo;

/// A user id and password. Either may be absent depending on what the
/// endpoint type supports and what is known so far.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub user_id: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user_id", &self.user_id)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// What a sign-on prompt is asked to collect.
#[derive(Debug, Clone)]
pub struct PromptRequest {
    pub host_name: String,
    pub system_type: String,
    pub user_id: Option<String>,
    /// Preselect "save password" because one is already saved.
    pub save_password: bool,
    /// A remembered password was rejected by the signon validator.
    pub previous_password_invalid: bool,
    pub force_uppercase: bool,
}

/// What the operator entered.
#[derive(Clone)]
pub struct PromptResponse {
    pub user_id: String,
    pub password: String,
    pub save_password: bool,
    /// A changed user id becomes the session default instead of applying
    /// only to this connection.
    pub user_id_permanent: bool,
}

impl fmt::Debug for PromptResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromptResponse")
            .field("user_id", &self.user_id)
            .field("password", &"***")
            .field("save_password", &self.save_password)
            .field("user_id_permanent", &self.user_id_permanent)
            .finish()
    }
}

/// Interactive source of credentials.
#[async_trait]
pub trait CredentialPrompt: Send + Sync {
    /// Ask for credentials. `None` means the operator declined.
    async fn prompt(&self, request: PromptRequest) -> Option<PromptResponse>;
}

/// Checks remembered credentials before they are used.
pub trait SignonValidator: Send + Sync {
    fn is_valid(&self, info: &SignonInfo) -> bool;
}
