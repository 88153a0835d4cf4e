//! In-memory credential of one connector service and its sign-on flow.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use super::propagate::CredentialPropagator;
use super::{CredentialPrompt, Credentials, PromptRequest, PromptResponse, SignonValidator};
use crate::connector::service::ConnectorService;
use crate::connector::store::{CredentialStore, SignonInfo};
use crate::error::ConnectorError;

#[derive(Debug, Default)]
struct CachedCredentials {
    /// User id chosen for this service, overriding session and host defaults
    user_id: Option<String>,
    signon: Option<SignonInfo>,
}

/// Credential state owned by a [`ConnectorService`].
pub(crate) struct CredentialState {
    store: Option<Arc<CredentialStore>>,
    prompt: Option<Arc<dyn CredentialPrompt>>,
    validator: Option<Arc<dyn SignonValidator>>,
    cache: Mutex<CachedCredentials>,
    suppressed: AtomicBool,
    /// Serializes propagation originating from this service.
    propagation: Mutex<()>,
}

impl CredentialState {
    pub(crate) fn new(
        store: Option<Arc<CredentialStore>>,
        prompt: Option<Arc<dyn CredentialPrompt>>,
        validator: Option<Arc<dyn SignonValidator>>,
    ) -> Self {
        Self {
            store,
            prompt,
            validator,
            cache: Mutex::new(CachedCredentials::default()),
            suppressed: AtomicBool::new(false),
            propagation: Mutex::new(()),
        }
    }
}

/// Credential operations of one connector service.
///
/// Obtained from [`ConnectorService::credentials_provider`]. Passwords are kept
/// in memory; persistence goes through the shared [`CredentialStore`].
#[derive(Clone, Copy)]
pub struct CredentialsProvider<'a> {
    service: &'a ConnectorService,
}

impl<'a> CredentialsProvider<'a> {
    pub(crate) fn new(service: &'a ConnectorService) -> Self {
        Self { service }
    }

    fn state(&self) -> &'a CredentialState {
        self.service.credential_state()
    }

    fn cache(&self) -> MutexGuard<'a, CachedCredentials> {
        self.state().cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn store(&self) -> Option<&'a Arc<CredentialStore>> {
        self.state().store.as_ref()
    }

    /// The user id to sign on with.
    ///
    /// Resolution order: the id set on this service, the primary session's
    /// local id, the host default, then the OS user.
    pub fn user_id(&self) -> Option<String> {
        if !self.service.policy().supports_user_id {
            return None;
        }

        let cached = self.cache().user_id.clone();
        cached.or_else(|| self.local_user_id())
    }

    fn local_user_id(&self) -> Option<String> {
        self.service
            .primary_session()
            .and_then(|session| session.local_user_id())
            .or_else(|| self.service.host().default_user_id().map(str::to_string))
            .or_else(os_user_name)
    }

    pub fn set_user_id(&self, user_id: &str) {
        let changed = {
            let mut cache = self.cache();
            if cache.user_id.as_deref() == Some(user_id) {
                false
            } else {
                cache.user_id = Some(user_id.to_string());
                true
            }
        };

        if changed {
            debug!("User id for {} set to {}", self.service.name(), user_id);
            self.service.mark_dirty();
        }
    }

    /// The credentials currently known, without prompting.
    pub fn credentials(&self) -> Credentials {
        let password = if self.service.policy().supports_password {
            self.cache().signon.as_ref().map(|s| s.password.clone())
        } else {
            None
        };

        Credentials {
            user_id: self.user_id(),
            password,
        }
    }

    /// Forget the cached user id and in-memory password, clearing siblings too.
    pub fn clear_credentials(&self) {
        self.clear_password(false, true);
        self.cache().user_id = None;
    }

    /// Drop the in-memory password, and the saved one when `persist` is set.
    pub fn clear_password(&self, persist: bool, propagate: bool) {
        self.cache().signon = None;

        if persist
            && let Some(store) = self.store()
            && let Some(user_id) = self.user_id()
        {
            let host = self.service.host();
            store.remove(host.system_type(), host.host_name(), &user_id);
        }
        debug!("Cleared password for {} (persist: {})", self.service.name(), persist);

        if propagate {
            self.propagate(|propagator| propagator.propagate_clear(persist));
        }
    }

    /// Set the password for `user_id`.
    ///
    /// `persist` saves it to the store; otherwise any saved copy is removed.
    pub fn set_password(&self, user_id: &str, password: &str, persist: bool, propagate: bool) {
        let user_id = if self.forces_uppercase() {
            user_id.to_uppercase()
        } else {
            user_id.to_string()
        };

        let host = self.service.host();
        let signon = SignonInfo::new(host.system_type(), host.host_name(), &user_id, password);
        self.remember(signon.clone());

        if let Some(store) = self.store() {
            if persist {
                if let Err(e) = store.add(&signon, true, true) {
                    warn!(
                        "Failed to save password for {} on {}: {}",
                        user_id,
                        host.host_name(),
                        e
                    );
                }
            } else {
                store.remove(host.system_type(), host.host_name(), &user_id);
            }
        }

        if propagate {
            self.propagate(|propagator| propagator.propagate_set(&user_id, password));
        }
    }

    /// Take a credential shared by a sibling service. Memory only.
    pub(crate) fn inherit_password(&self, user_id: &str, password: &str) {
        let (user_id, password) = if self.forces_uppercase() {
            (user_id.to_uppercase(), password.to_uppercase())
        } else {
            (user_id.to_string(), password.to_string())
        };

        let host = self.service.host();
        self.remember(SignonInfo::new(
            host.system_type(),
            host.host_name(),
            user_id,
            password,
        ));
    }

    /// Whether a password is held in memory, or saved when `on_disk` is set.
    pub fn is_password_cached(&self, on_disk: bool) -> bool {
        if self.cache().signon.is_some() {
            return true;
        }
        if !on_disk {
            return false;
        }

        match (self.store(), self.user_id()) {
            (Some(store), Some(user_id)) => {
                let host = self.service.host();
                store.password_exists(host.system_type(), host.host_name(), &user_id, true)
            }
            _ => false,
        }
    }

    pub fn is_suppressed(&self) -> bool {
        self.state().suppressed.load(Ordering::SeqCst)
    }

    /// Suppress sign-on prompting, typically after the operator canceled one.
    pub fn set_suppressed(&self, suppressed: bool) {
        self.state().suppressed.store(suppressed, Ordering::SeqCst);
    }

    /// Produce credentials for a connect.
    ///
    /// Uses the in-memory credential if it still matches the user and host and
    /// passes validation, then the store, then the prompt. `force_refresh`
    /// skips straight to the prompt. Returns `Canceled` when sign-on is
    /// suppressed or the prompt is declined.
    pub async fn acquire_credentials(&self, force_refresh: bool) -> Result<Credentials, ConnectorError> {
        if self.is_suppressed() {
            debug!("Sign-on suppressed for {}", self.service.name());
            return Err(ConnectorError::Canceled);
        }

        let host = self.service.host();
        let user_id = self.user_id();
        let mut previous_invalid = false;
        let mut signon = self.cache().signon.clone();

        if !force_refresh
            && let Some(current) = &signon
        {
            let same_user = user_id
                .as_deref()
                .is_some_and(|user| self.same_user_id(user, &current.user_id));
            if !same_user || !current.host_name.eq_ignore_ascii_case(host.host_name()) {
                debug!(
                    "Discarding cached password for {} on {}",
                    current.user_id, current.host_name
                );
                self.cache().signon = None;
                signon = None;
            }
        }

        if let Some(current) = &signon
            && !self.validate(current)
        {
            previous_invalid = true;
            self.cache().signon = None;
            signon = None;
        }

        if signon.is_none()
            && !force_refresh
            && let Some(store) = self.store()
            && let Some(user) = user_id.as_deref()
            && let Some(found) = store.find(host.system_type(), host.host_name(), user, true)
        {
            if self.validate(&found) {
                debug!("Using saved password for {} on {}", user, host.host_name());
                self.remember(found.clone());
                signon = Some(found);
            } else {
                previous_invalid = true;
            }
        }

        if signon.is_none() || force_refresh {
            match self.state().prompt.clone() {
                Some(prompt) => {
                    let save_password = match (self.store(), user_id.as_deref()) {
                        (Some(store), Some(user)) => {
                            store.password_exists(host.system_type(), host.host_name(), user, true)
                        }
                        _ => false,
                    };
                    let request = PromptRequest {
                        host_name: host.host_name().to_string(),
                        system_type: host.system_type().to_string(),
                        user_id: user_id.clone(),
                        save_password,
                        previous_password_invalid: previous_invalid,
                        force_uppercase: self.forces_uppercase(),
                    };

                    let Some(response) = prompt.prompt(request).await else {
                        info!("Sign-on to {} declined", host.host_name());
                        return Err(ConnectorError::Canceled);
                    };
                    self.apply_prompt_response(response, user_id.as_deref());
                }
                None if signon.is_none() => {
                    debug!(
                        "No password known for {} and no prompt configured",
                        host.host_name()
                    );
                }
                None => {}
            }
        }

        Ok(self.credentials())
    }

    fn apply_prompt_response(&self, response: PromptResponse, previous_user: Option<&str>) {
        if previous_user != Some(response.user_id.as_str()) {
            if response.user_id_permanent {
                if let Some(primary) = self.service.primary_session() {
                    primary.update_default_user_id(&response.user_id);
                }
            } else {
                self.set_user_id(&response.user_id);
            }
        }

        self.set_password(
            &response.user_id,
            &response.password,
            response.save_password,
            true,
        );
    }

    fn remember(&self, signon: SignonInfo) {
        let mut cache = self.cache();
        cache.user_id = Some(signon.user_id.clone());
        cache.signon = Some(signon);
    }

    fn validate(&self, info: &SignonInfo) -> bool {
        self.state()
            .validator
            .as_ref()
            .is_none_or(|validator| validator.is_valid(info))
    }

    fn same_user_id(&self, a: &str, b: &str) -> bool {
        let case_sensitive = self
            .store()
            .is_none_or(|store| store.is_case_sensitive(self.service.host().system_type()));
        if case_sensitive {
            a == b
        } else {
            a.eq_ignore_ascii_case(b)
        }
    }

    pub(crate) fn forces_uppercase(&self) -> bool {
        self.service
            .primary_session()
            .is_some_and(|session| session.force_user_id_to_uppercase())
    }

    fn propagate(&self, apply: impl FnOnce(&CredentialPropagator<'_>) -> usize) {
        let _serial = self
            .state()
            .propagation
            .lock()
            .unwrap_or_else(|e| e.into_inner());

        let updated = apply(&CredentialPropagator::new(self.service));
        if updated > 0 {
            debug!(
                "Propagated credential change from {} to {} sibling service(s)",
                self.service.name(),
                updated
            );
        }
    }
}

fn os_user_name() -> Option<String> {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::store::{DEFAULT_SYSTEM_TYPE, MemoryAuthBackend};
    use crate::connector::test_support::{MockSession, ScriptedPrompt, service_builder};
    use crate::connector::Host;

    fn store() -> Arc<CredentialStore> {
        Arc::new(CredentialStore::new(Arc::new(MemoryAuthBackend::new()), "file://rse").unwrap())
    }

    fn host() -> Arc<Host> {
        Arc::new(Host::new("lab", "host1", "AIX").with_default_user_id("bob"))
    }

    mod user_id {
        use super::*;

        #[test]
        fn test_falls_back_to_host_default() {
            let service = service_builder(host()).build();
            assert_eq!(service.credentials_provider().user_id().as_deref(), Some("bob"));
        }

        #[test]
        fn test_session_local_id_wins_over_host_default() {
            let service = service_builder(host()).build();
            service.register_session(MockSession::new("files").with_local_user_id("alice").into_arc());
            assert_eq!(service.credentials_provider().user_id().as_deref(), Some("alice"));
        }

        #[test]
        fn test_set_user_id_marks_dirty_once() {
            let service = service_builder(host()).build();
            let provider = service.credentials_provider();
            assert!(!service.is_dirty());

            provider.set_user_id("carol");
            assert!(service.is_dirty());
            assert_eq!(provider.user_id().as_deref(), Some("carol"));

            service.clear_dirty();
            provider.set_user_id("carol");
            assert!(!service.is_dirty());
        }

        #[test]
        fn test_unsupported_user_id() {
            let service = service_builder(host())
                .credential_policy(crate::connector::CredentialPolicy {
                    supports_user_id: false,
                    ..Default::default()
                })
                .build();
            assert!(service.credentials_provider().user_id().is_none());
        }
    }

    mod passwords {
        use super::*;

        #[test]
        fn test_set_password_in_memory() {
            let service = service_builder(host()).build();
            let provider = service.credentials_provider();
            provider.set_password("bob", "pw", false, false);

            let credentials = provider.credentials();
            assert_eq!(credentials.user_id.as_deref(), Some("bob"));
            assert_eq!(credentials.password.as_deref(), Some("pw"));
            assert!(provider.is_password_cached(false));
        }

        #[test]
        fn test_set_password_persist_then_clear_on_disk() {
            let store = store();
            let service = service_builder(host()).store(store.clone()).build();
            let provider = service.credentials_provider();

            provider.set_password("bob", "pw", true, false);
            assert!(store.password_exists("AIX", "host1", "bob", false));

            provider.clear_password(false, false);
            assert!(!provider.is_password_cached(false));
            assert!(provider.is_password_cached(true));

            provider.clear_password(true, false);
            assert!(!provider.is_password_cached(true));
        }

        #[test]
        fn test_set_password_without_persist_removes_saved_copy() {
            let store = store();
            store
                .add(&SignonInfo::new("AIX", "host1", "bob", "old"), false, false)
                .unwrap();
            let service = service_builder(host()).store(store.clone()).build();

            service
                .credentials_provider()
                .set_password("bob", "new", false, false);
            assert!(!store.password_exists("AIX", "host1", "bob", false));
        }

        #[test]
        fn test_uppercase_session_folds_user_id_only() {
            let service = service_builder(host()).build();
            service.register_session(MockSession::new("files").with_uppercase().into_arc());

            let provider = service.credentials_provider();
            provider.set_password("bob", "MixedCase", false, false);

            let credentials = provider.credentials();
            assert_eq!(credentials.user_id.as_deref(), Some("BOB"));
            assert_eq!(credentials.password.as_deref(), Some("MixedCase"));
        }

        #[test]
        fn test_clear_credentials_resets_user_id() {
            let service = service_builder(host()).build();
            let provider = service.credentials_provider();
            provider.set_password("carol", "pw", false, false);

            provider.clear_credentials();
            assert!(!provider.is_password_cached(false));
            assert_eq!(provider.user_id().as_deref(), Some("bob"));
        }
    }

    mod acquire {
        use super::*;

        struct RejectAll;

        impl SignonValidator for RejectAll {
            fn is_valid(&self, _info: &SignonInfo) -> bool {
                false
            }
        }

        #[tokio::test]
        async fn test_suppressed_is_canceled() {
            let service = service_builder(host()).build();
            let provider = service.credentials_provider();
            provider.set_suppressed(true);

            let result = provider.acquire_credentials(false).await;
            assert!(matches!(result, Err(ConnectorError::Canceled)));
        }

        #[tokio::test]
        async fn test_uses_in_memory_password() {
            let prompt = ScriptedPrompt::declining();
            let service = service_builder(host()).prompt(prompt.clone()).build();
            let provider = service.credentials_provider();
            provider.set_password("bob", "pw", false, false);

            let credentials = provider.acquire_credentials(false).await.unwrap();
            assert_eq!(credentials.password.as_deref(), Some("pw"));
            assert_eq!(prompt.request_count(), 0);
        }

        #[tokio::test]
        async fn test_uses_saved_password_with_default_fallback() {
            let store = store();
            store
                .add(
                    &SignonInfo::new(DEFAULT_SYSTEM_TYPE, "host1", "bob", "saved"),
                    false,
                    false,
                )
                .unwrap();
            let service = service_builder(host()).store(store).build();

            let credentials = service
                .credentials_provider()
                .acquire_credentials(false)
                .await
                .unwrap();
            assert_eq!(credentials.password.as_deref(), Some("saved"));
        }

        #[tokio::test]
        async fn test_declined_prompt_is_canceled() {
            let service = service_builder(host())
                .prompt(ScriptedPrompt::declining())
                .build();

            let result = service.credentials_provider().acquire_credentials(false).await;
            assert!(matches!(result, Err(ConnectorError::Canceled)));
        }

        #[tokio::test]
        async fn test_prompt_answer_is_saved_when_requested() {
            let store = store();
            let prompt = ScriptedPrompt::answering("bob", "typed", true);
            let service = service_builder(host())
                .store(store.clone())
                .prompt(prompt.clone())
                .build();

            let credentials = service
                .credentials_provider()
                .acquire_credentials(false)
                .await
                .unwrap();
            assert_eq!(credentials.password.as_deref(), Some("typed"));
            assert_eq!(store.find("AIX", "host1", "bob", false).unwrap().password, "typed");

            let request = prompt.last_request().unwrap();
            assert_eq!(request.user_id.as_deref(), Some("bob"));
            assert!(!request.save_password);
        }

        #[tokio::test]
        async fn test_force_refresh_prompts_even_with_password() {
            let prompt = ScriptedPrompt::answering("bob", "fresh", false);
            let service = service_builder(host()).prompt(prompt.clone()).build();
            let provider = service.credentials_provider();
            provider.set_password("bob", "stale", false, false);

            let credentials = provider.acquire_credentials(true).await.unwrap();
            assert_eq!(credentials.password.as_deref(), Some("fresh"));
            assert_eq!(prompt.request_count(), 1);
        }

        #[tokio::test]
        async fn test_changed_user_id_discards_cached_password() {
            let prompt = ScriptedPrompt::declining();
            let service = service_builder(host()).prompt(prompt.clone()).build();
            let provider = service.credentials_provider();
            provider.set_password("bob", "pw", false, false);
            provider.set_user_id("carol");

            let result = provider.acquire_credentials(false).await;
            assert!(matches!(result, Err(ConnectorError::Canceled)));
            assert!(!provider.is_password_cached(false));
            assert_eq!(prompt.last_request().unwrap().user_id.as_deref(), Some("carol"));
        }

        #[tokio::test]
        async fn test_invalid_saved_password_is_reported_to_prompt() {
            let store = store();
            store
                .add(&SignonInfo::new("AIX", "host1", "bob", "expired"), false, false)
                .unwrap();
            let prompt = ScriptedPrompt::answering("bob", "renewed", false);
            let service = service_builder(host())
                .store(store)
                .prompt(prompt.clone())
                .validator(Arc::new(RejectAll))
                .build();

            let credentials = service
                .credentials_provider()
                .acquire_credentials(false)
                .await
                .unwrap();
            assert_eq!(credentials.password.as_deref(), Some("renewed"));

            let request = prompt.last_request().unwrap();
            assert!(request.previous_password_invalid);
            assert!(request.save_password);
        }

        #[tokio::test]
        async fn test_temporary_user_change_from_prompt() {
            let prompt = ScriptedPrompt::answering("dave", "pw", false);
            let session = MockSession::new("files").into_arc();
            let service = service_builder(host()).prompt(prompt).build();
            service.register_session(session.clone());

            let credentials = service
                .credentials_provider()
                .acquire_credentials(false)
                .await
                .unwrap();
            assert_eq!(credentials.user_id.as_deref(), Some("dave"));
            assert!(session.updated_default_user_id().is_none());
        }

        #[tokio::test]
        async fn test_permanent_user_change_updates_primary_session() {
            let prompt = ScriptedPrompt::answering_permanent("dave", "pw");
            let session = MockSession::new("files").into_arc();
            let service = service_builder(host()).prompt(prompt).build();
            service.register_session(session.clone());

            service
                .credentials_provider()
                .acquire_credentials(false)
                .await
                .unwrap();
            assert_eq!(session.updated_default_user_id().as_deref(), Some("dave"));
        }

        #[tokio::test]
        async fn test_without_prompt_returns_what_is_known() {
            let service = service_builder(host()).build();
            let credentials = service
                .credentials_provider()
                .acquire_credentials(false)
                .await
                .unwrap();
            assert_eq!(credentials.user_id.as_deref(), Some("bob"));
            assert!(credentials.password.is_none());
        }
    }
}
