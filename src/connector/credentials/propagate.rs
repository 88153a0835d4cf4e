//! Sharing credential changes with sibling services on the same host.
//!
//! A sibling is any other service backing a client session of the same host
//! that accepts inherited credentials. A new password only reaches siblings
//! that are disconnected and hold no password of their own. Clearing reaches
//! every sibling that holds one, and never cascades further.

use std::sync::Arc;

use tracing::debug;

use crate::connector::service::ConnectorService;

/// Propagation of credential changes from one source service.
pub struct CredentialPropagator<'a> {
    source: &'a ConnectorService,
}

impl<'a> CredentialPropagator<'a> {
    pub fn new(source: &'a ConnectorService) -> Self {
        Self { source }
    }

    /// Sibling services that accept inherited credentials, without duplicates.
    pub fn candidates(&self) -> Vec<Arc<ConnectorService>> {
        let Some(directory) = self.source.host_directory() else {
            return Vec::new();
        };

        let mut unique: Vec<Arc<ConnectorService>> = Vec::new();
        for service in directory.session_services(&self.source.host()) {
            if std::ptr::eq(Arc::as_ptr(&service), self.source) {
                continue;
            }
            if !service.policy().inherits_credentials {
                continue;
            }
            if !unique.iter().any(|known| Arc::ptr_eq(known, &service)) {
                unique.push(service);
            }
        }
        unique
    }

    /// Forward a new password to idle siblings. Returns how many were updated.
    pub fn propagate_set(&self, user_id: &str, password: &str) -> usize {
        if !self.source.policy().shares_credentials {
            return 0;
        }

        let mut updated = 0;
        for sibling in self.candidates() {
            let provider = sibling.credentials_provider();
            if sibling.is_connected() || provider.is_password_cached(false) {
                debug!("Leaving credentials of {} untouched", sibling.name());
                continue;
            }
            provider.inherit_password(user_id, password);
            updated += 1;
        }
        updated
    }

    /// Clear the password on every sibling that holds one. Returns how many were cleared.
    pub fn propagate_clear(&self, persist: bool) -> usize {
        if !self.source.policy().shares_credentials {
            return 0;
        }

        let mut cleared = 0;
        for sibling in self.candidates() {
            let provider = sibling.credentials_provider();
            if provider.is_password_cached(persist) {
                provider.clear_password(persist, false);
                cleared += 1;
            }
        }
        cleared
    }
}
