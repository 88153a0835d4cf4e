//! DashMap-based credential backend.
//!
//! Keeps every bucket in memory. Used when no credential file is configured
//! and throughout the tests.

use dashmap::DashMap;

use super::traits::{AuthInfo, AuthInfoBackend};
use crate::error::PersistenceError;

/// In-memory implementation of [`AuthInfoBackend`], keyed by `(url, realm)`.
#[derive(Debug, Default)]
pub struct MemoryAuthBackend {
    buckets: DashMap<(String, String), AuthInfo>,
}

impl MemoryAuthBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of non-empty buckets across all locations.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

impl AuthInfoBackend for MemoryAuthBackend {
    fn get_auth_info(&self, url: &str, realm: &str) -> Result<Option<AuthInfo>, PersistenceError> {
        Ok(self
            .buckets
            .get(&(url.to_string(), realm.to_string()))
            .map(|entry| entry.value().clone()))
    }

    fn set_auth_info(&self, url: &str, realm: &str, info: AuthInfo) -> Result<(), PersistenceError> {
        self.buckets
            .insert((url.to_string(), realm.to_string()), info);
        Ok(())
    }

    fn flush_auth_info(&self, url: &str, realm: &str) -> Result<(), PersistenceError> {
        self.buckets.remove(&(url.to_string(), realm.to_string()));
        Ok(())
    }
}
