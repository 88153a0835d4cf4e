//! Credential store over an [`AuthInfoBackend`].
//!
//! Entries live in one bucket per system type (the backend realm) under the
//! current location URL. Each bucket maps `"HOST//user"` to a password.
//!
//! # Lookup rules
//!
//! - Host names always compare through the configured [`HostNameMatcher`].
//! - User ids compare exactly unless the system type was registered as
//!   case-insensitive, in which case they are stored upper-cased.
//! - A miss under a specific type may fall back to the `DEFAULT` bucket; a miss
//!   under `DEFAULT` never falls through to a specific type.
//! - A bucket missing from the current location is looked up in each legacy
//!   location in order and, when found, moved into the current location.
//!
//! Every public operation runs under one store-wide lock so read-modify-write
//! cycles on a bucket never interleave.

use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;
use tracing::{debug, info, warn};

use super::hosts::{HostNameMatcher, QualifiedHostMatcher};
use super::traits::{AuthInfo, AuthInfoBackend};
use super::{DEFAULT_SYSTEM_TYPE, SignonInfo};
use crate::config::LEGACY_STORE_URLS;
use crate::error::PersistenceError;

const KEY_SEPARATOR: &str = "//";

/// Result of [`CredentialStore::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    /// An entry for the same host and user exists and `overwrite` was false.
    AlreadyExists,
}

/// Typed credential store shared by every connector service in a process.
pub struct CredentialStore {
    backend: Arc<dyn AuthInfoBackend>,
    location: String,
    legacy_locations: Vec<String>,
    case_sensitivity: DashMap<String, bool>,
    matcher: Arc<dyn HostNameMatcher>,
    buckets: Mutex<()>,
}

impl CredentialStore {
    /// Create a store at `location`, migrating from the standard legacy locations.
    pub fn new(
        backend: Arc<dyn AuthInfoBackend>,
        location: impl Into<String>,
    ) -> Result<Self, PersistenceError> {
        let location = location.into();
        validate_location(&location)?;

        Ok(Self {
            backend,
            location,
            legacy_locations: LEGACY_STORE_URLS.iter().map(|s| s.to_string()).collect(),
            case_sensitivity: DashMap::new(),
            matcher: Arc::new(QualifiedHostMatcher::new()),
            buckets: Mutex::new(()),
        })
    }

    /// Replace the legacy locations consulted on a miss, in lookup order.
    pub fn with_legacy_locations(
        mut self,
        locations: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self, PersistenceError> {
        let locations: Vec<String> = locations.into_iter().map(Into::into).collect();
        for location in &locations {
            validate_location(location)?;
        }
        self.legacy_locations = locations;
        Ok(self)
    }

    pub fn with_matcher(mut self, matcher: Arc<dyn HostNameMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    fn lock_buckets(&self) -> MutexGuard<'_, ()> {
        self.buckets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Declare whether user ids of `system_type` are case-sensitive.
    pub fn register_system_type(&self, system_type: &str, case_sensitive: bool) {
        self.case_sensitivity
            .insert(system_type.to_ascii_uppercase(), case_sensitive);
    }

    /// Types are case-sensitive unless registered otherwise.
    pub fn is_case_sensitive(&self, system_type: &str) -> bool {
        self.case_sensitivity
            .get(&system_type.to_ascii_uppercase())
            .map(|entry| *entry.value())
            .unwrap_or(true)
    }

    /// Save a credential.
    ///
    /// With `update_default`, an existing `DEFAULT` entry for the same host and
    /// user is rewritten too so both buckets agree after a type change.
    pub fn add(
        &self,
        info: &SignonInfo,
        overwrite: bool,
        update_default: bool,
    ) -> Result<AddOutcome, PersistenceError> {
        let _buckets = self.lock_buckets();
        let outcome = self.add_to_bucket(&info.system_type, info, overwrite)?;

        if outcome == AddOutcome::Added
            && update_default
            && !is_default_type(&info.system_type)
            && self
                .find_in_bucket(DEFAULT_SYSTEM_TYPE, &info.host_name, &info.user_id)?
                .is_some()
        {
            debug!(
                "Refreshing {} entry for {} on {}",
                DEFAULT_SYSTEM_TYPE, info.user_id, info.host_name
            );
            self.add_to_bucket(DEFAULT_SYSTEM_TYPE, info, true)?;
        }

        Ok(outcome)
    }

    /// Remove a saved credential. Returns whether an entry was removed.
    pub fn remove(&self, system_type: &str, host_name: &str, user_id: &str) -> bool {
        let _buckets = self.lock_buckets();
        match self.remove_from_bucket(system_type, host_name, user_id) {
            Ok(removed) => removed,
            Err(e) => {
                warn!(
                    "Failed to remove saved password for {} on {}: {}",
                    user_id, host_name, e
                );
                false
            }
        }
    }

    /// Look up a saved credential, optionally falling back to `DEFAULT`.
    ///
    /// Backend failures are logged and reported as "not found".
    pub fn find(
        &self,
        system_type: &str,
        host_name: &str,
        user_id: &str,
        check_default: bool,
    ) -> Option<SignonInfo> {
        let _buckets = self.lock_buckets();
        let found = self.find_logged(system_type, host_name, user_id);
        if found.is_some() || !check_default || is_default_type(system_type) {
            return found;
        }

        self.find_logged(DEFAULT_SYSTEM_TYPE, host_name, user_id)
            .map(|mut info| {
                debug!(
                    "Using {} entry for {} on {}",
                    DEFAULT_SYSTEM_TYPE, user_id, host_name
                );
                info.system_type = system_type.to_string();
                info
            })
    }

    pub fn password_exists(
        &self,
        system_type: &str,
        host_name: &str,
        user_id: &str,
        check_default: bool,
    ) -> bool {
        self.find(system_type, host_name, user_id, check_default)
            .is_some()
    }

    /// Every entry saved under `system_type`.
    pub fn saved_entries(&self, system_type: &str) -> Vec<SignonInfo> {
        let _buckets = self.lock_buckets();
        let bucket = match self.load_bucket(system_type) {
            Ok(bucket) => bucket.unwrap_or_default(),
            Err(e) => {
                warn!("Failed to read saved passwords for {}: {}", system_type, e);
                return Vec::new();
            }
        };

        let mut entries: Vec<SignonInfo> = bucket
            .iter()
            .filter_map(|(key, password)| {
                let (host, user) = split_key(key)?;
                Some(SignonInfo::new(system_type, host, user, password.clone()))
            })
            .collect();
        entries.sort_by(|a, b| (&a.host_name, &a.user_id).cmp(&(&b.host_name, &b.user_id)));
        entries
    }

    fn find_logged(&self, system_type: &str, host_name: &str, user_id: &str) -> Option<SignonInfo> {
        match self.find_in_bucket(system_type, host_name, user_id) {
            Ok(found) => found,
            Err(e) => {
                warn!(
                    "Failed to read saved password for {} on {}: {}",
                    user_id, host_name, e
                );
                None
            }
        }
    }

    fn find_in_bucket(
        &self,
        system_type: &str,
        host_name: &str,
        user_id: &str,
    ) -> Result<Option<SignonInfo>, PersistenceError> {
        let Some(bucket) = self.load_bucket(system_type)? else {
            return Ok(None);
        };

        Ok(self
            .matching_key(&bucket, system_type, host_name, user_id)
            .and_then(|key| {
                let (_, stored_user) = split_key(&key)?;
                let password = bucket.get(&key)?;
                Some(SignonInfo::new(
                    system_type,
                    host_name,
                    stored_user,
                    password.clone(),
                ))
            }))
    }

    fn add_to_bucket(
        &self,
        realm: &str,
        info: &SignonInfo,
        overwrite: bool,
    ) -> Result<AddOutcome, PersistenceError> {
        let mut bucket = self.load_bucket(realm)?.unwrap_or_default();

        if let Some(existing) = self.matching_key(&bucket, realm, &info.host_name, &info.user_id) {
            if !overwrite {
                return Ok(AddOutcome::AlreadyExists);
            }
            bucket.remove(&existing);
        }

        let key = self.make_key(realm, &info.host_name, &info.user_id);
        bucket.insert(key, info.password.clone());
        self.backend.set_auth_info(&self.location, realm, bucket)?;
        debug!("Saved password for {} on {} ({})", info.user_id, info.host_name, realm);
        Ok(AddOutcome::Added)
    }

    fn remove_from_bucket(
        &self,
        system_type: &str,
        host_name: &str,
        user_id: &str,
    ) -> Result<bool, PersistenceError> {
        let Some(mut bucket) = self.load_bucket(system_type)? else {
            return Ok(false);
        };
        let Some(key) = self.matching_key(&bucket, system_type, host_name, user_id) else {
            return Ok(false);
        };

        bucket.remove(&key);
        if bucket.is_empty() {
            self.backend.flush_auth_info(&self.location, system_type)?;
        } else {
            self.backend.set_auth_info(&self.location, system_type, bucket)?;
        }
        debug!("Removed saved password for {} on {} ({})", user_id, host_name, system_type);
        Ok(true)
    }

    /// Read a bucket from the current location, moving it over from the first
    /// legacy location that has it.
    ///
    /// Callers hold the bucket lock.
    fn load_bucket(&self, realm: &str) -> Result<Option<AuthInfo>, PersistenceError> {
        if let Some(bucket) = self.backend.get_auth_info(&self.location, realm)?
            && !bucket.is_empty()
        {
            return Ok(Some(bucket));
        }

        for legacy in &self.legacy_locations {
            if let Some(bucket) = self.backend.get_auth_info(legacy, realm)?
                && !bucket.is_empty()
            {
                info!(
                    "Migrating {} saved password(s) for {} from {} to {}",
                    bucket.len(),
                    realm,
                    legacy,
                    self.location
                );
                self.backend
                    .set_auth_info(&self.location, realm, bucket.clone())?;
                self.backend.flush_auth_info(legacy, realm)?;
                return Ok(Some(bucket));
            }
        }

        Ok(None)
    }

    fn make_key(&self, system_type: &str, host_name: &str, user_id: &str) -> String {
        let user = if self.is_case_sensitive(system_type) {
            user_id.to_string()
        } else {
            fold_user_id(user_id)
        };
        format!("{}{}{}", host_name.to_uppercase(), KEY_SEPARATOR, user)
    }

    fn matching_key(
        &self,
        bucket: &AuthInfo,
        system_type: &str,
        host_name: &str,
        user_id: &str,
    ) -> Option<String> {
        let case_sensitive = self.is_case_sensitive(system_type);
        let folded = (!case_sensitive).then(|| fold_user_id(user_id));

        bucket
            .keys()
            .find(|key| {
                let Some((stored_host, stored_user)) = split_key(key) else {
                    return false;
                };
                let user_matches = match &folded {
                    None => stored_user == user_id,
                    Some(folded) => fold_user_id(stored_user) == *folded,
                };
                user_matches && self.matcher.matches(stored_host, host_name)
            })
            .cloned()
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("location", &self.location)
            .field("legacy_locations", &self.legacy_locations)
            .finish_non_exhaustive()
    }
}

fn is_default_type(system_type: &str) -> bool {
    system_type.eq_ignore_ascii_case(DEFAULT_SYSTEM_TYPE)
}

/// Case folding for user ids of case-insensitive types.
fn fold_user_id(user_id: &str) -> String {
    user_id.to_uppercase()
}

fn split_key(key: &str) -> Option<(&str, &str)> {
    key.split_once(KEY_SEPARATOR)
}

/// A location must look like `scheme://rest`.
fn validate_location(location: &str) -> Result<(), PersistenceError> {
    let malformed = || PersistenceError::MalformedLocation(location.to_string());

    let (scheme, rest) = location.split_once("://").ok_or_else(malformed)?;
    let scheme_ok = scheme
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));

    if !scheme_ok || rest.is_empty() {
        return Err(malformed());
    }
    Ok(())
}
