//! Durable credential storage.
//!
//! This module provides:
//! - [`AuthInfoBackend`]: the `(url, realm)` key-value contract the store sits on
//! - [`MemoryAuthBackend`] and [`FileAuthBackend`]: the two shipped backends
//! - [`HostNameMatcher`]: pluggable host-name comparison used by lookups
//! - [`CredentialStore`]: typed add/find/remove with per-type case policy,
//!   `DEFAULT` fallback and legacy-location migration

mod file;
mod hosts;
mod memory;
mod password;
mod traits;

use std::fmt;

pub use file::FileAuthBackend;
pub use hosts::{HostNameMatcher, HostResolver, QualifiedHostMatcher};
pub use memory::MemoryAuthBackend;
pub use password::{AddOutcome, CredentialStore};
pub use traits::{AuthInfo, AuthInfoBackend};

/// Reserved system type consulted when a specific type has no entry.
pub const DEFAULT_SYSTEM_TYPE: &str = "DEFAULT";

/// One remembered credential.
#[derive(Clone, PartialEq, Eq)]
pub struct SignonInfo {
    pub system_type: String,
    pub host_name: String,
    pub user_id: String,
    pub password: String,
}

impl SignonInfo {
    pub fn new(
        system_type: impl Into<String>,
        host_name: impl Into<String>,
        user_id: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            system_type: system_type.into(),
            host_name: host_name.into(),
            user_id: user_id.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for SignonInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignonInfo")
            .field("system_type", &self.system_type)
            .field("host_name", &self.host_name)
            .field("user_id", &self.user_id)
            .field("password", &"***")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_password() {
        let info = SignonInfo::new("AIX", "host1", "bob", "hunter2");
        let debug = format!("{:?}", info);
        assert!(debug.contains("bob"));
        assert!(!debug.contains("hunter2"));
    }
}
