//! Persistent key-value backend behind the credential store.
//!
//! A backend keeps one string map per `(url, realm)` pair. The credential
//! store uses the location URL to version its data and the realm to bucket
//! entries by system type.

use std::collections::HashMap;

use crate::error::PersistenceError;

/// One authorization bucket: `"host//user"` -> password.
pub type AuthInfo = HashMap<String, String>;

/// Trait for credential persistence backends.
///
/// Implementations must be thread-safe (`Send + Sync`); the store is shared by
/// every connector service in the process.
pub trait AuthInfoBackend: Send + Sync {
    /// Fetch the bucket stored under `(url, realm)`.
    fn get_auth_info(&self, url: &str, realm: &str) -> Result<Option<AuthInfo>, PersistenceError>;

    /// Replace the bucket stored under `(url, realm)`.
    fn set_auth_info(&self, url: &str, realm: &str, info: AuthInfo) -> Result<(), PersistenceError>;

    /// Delete the bucket stored under `(url, realm)`.
    fn flush_auth_info(&self, url: &str, realm: &str) -> Result<(), PersistenceError>;
}
