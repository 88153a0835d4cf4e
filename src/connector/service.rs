//! Connector service: one live connection to one remote endpoint.
//!
//! # State machine
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Disconnecting -> Disconnected
//! ```
//!
//! Every transition runs under the service's [`SerializedOperationGuard`], and
//! the "already connected" check happens inside the guarded region so two
//! concurrent callers never both reach the transport.
//!
//! `connect` drives the transport and then initializes each registered client
//! session. A session that fails to initialize is reported to the caller after
//! all sessions were tried, but the connection stays up. `disconnect` tears
//! the sessions down best-effort. A guard timeout is reported as `Canceled` for
//! connect and swallowed for disconnect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::credentials::{
    CredentialPrompt, CredentialState, CredentialsProvider, SignonValidator,
};
use super::guard::SerializedOperationGuard;
use super::host::{Capability, Host, HostPersistence};
use super::listener::{CommunicationsEvent, ConnectorListener, EventKind, ListenerSet};
use super::registry::HostDirectory;
use super::session::{ClientSession, same_session};
use super::store::CredentialStore;
use super::transport::{ConnectorTransport, ServerLaunchProperties};
use crate::config::resolve_operation_timeout;
use crate::error::{ConnectorError, PersistenceError, SessionError};

/// Connection lifecycle of a [`ConnectorService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a service does with user ids and passwords.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialPolicy {
    pub supports_user_id: bool,
    pub supports_password: bool,
    /// Password changes on this service are offered to siblings.
    pub shares_credentials: bool,
    /// This service accepts passwords offered by siblings.
    pub inherits_credentials: bool,
}

impl Default for CredentialPolicy {
    fn default() -> Self {
        Self {
            supports_user_id: true,
            supports_password: true,
            shares_credentials: true,
            inherits_credentials: true,
        }
    }
}

#[derive(Debug, Default)]
struct ServiceProperties {
    description: Option<String>,
    port: Option<u16>,
    use_tls: bool,
    server_launch: Option<ServerLaunchProperties>,
}

/// Builder for [`ConnectorService`].
pub struct ConnectorServiceBuilder {
    name: String,
    host: Arc<Host>,
    capability: Capability,
    transport: Arc<dyn ConnectorTransport>,
    operation_timeout: Option<Duration>,
    properties: ServiceProperties,
    policy: CredentialPolicy,
    store: Option<Arc<CredentialStore>>,
    prompt: Option<Arc<dyn CredentialPrompt>>,
    validator: Option<Arc<dyn SignonValidator>>,
}

impl ConnectorServiceBuilder {
    /// Acquisition timeout for connect/disconnect. Defaults to the configured value.
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.properties.description = Some(description.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.properties.port = Some(port);
        self
    }

    pub fn use_tls(mut self, use_tls: bool) -> Self {
        self.properties.use_tls = use_tls;
        self
    }

    pub fn server_launch(mut self, properties: ServerLaunchProperties) -> Self {
        self.properties.server_launch = Some(properties);
        self
    }

    pub fn credential_policy(mut self, policy: CredentialPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(mut self, store: Arc<CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn prompt(mut self, prompt: Arc<dyn CredentialPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn validator(mut self, validator: Arc<dyn SignonValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn build(self) -> Arc<ConnectorService> {
        Arc::new(ConnectorService {
            id: Uuid::new_v4(),
            name: self.name,
            capability: self.capability,
            host: RwLock::new(self.host),
            transport: self.transport,
            guard: SerializedOperationGuard::new(),
            operation_timeout: self
                .operation_timeout
                .unwrap_or_else(|| resolve_operation_timeout(None)),
            state: Mutex::new(ConnectionState::Disconnected),
            connected_at: Mutex::new(None),
            sessions: RwLock::new(Vec::new()),
            primary_session: OnceCell::new(),
            listeners: ListenerSet::new(),
            properties: Mutex::new(self.properties),
            dirty: AtomicBool::new(false),
            policy: self.policy,
            credentials: CredentialState::new(self.store, self.prompt, self.validator),
            directory: RwLock::new(None),
        })
    }
}

/// Owner of one connection to one host for one capability.
pub struct ConnectorService {
    id: Uuid,
    name: String,
    capability: Capability,
    host: RwLock<Arc<Host>>,
    transport: Arc<dyn ConnectorTransport>,
    guard: SerializedOperationGuard,
    operation_timeout: Duration,
    state: Mutex<ConnectionState>,
    connected_at: Mutex<Option<DateTime<Utc>>>,
    sessions: RwLock<Vec<Arc<dyn ClientSession>>>,
    primary_session: OnceCell<Arc<dyn ClientSession>>,
    listeners: ListenerSet,
    properties: Mutex<ServiceProperties>,
    dirty: AtomicBool,
    policy: CredentialPolicy,
    credentials: CredentialState,
    directory: RwLock<Option<Weak<dyn HostDirectory>>>,
}

impl ConnectorService {
    pub fn builder(
        name: impl Into<String>,
        host: Arc<Host>,
        capability: Capability,
        transport: Arc<dyn ConnectorTransport>,
    ) -> ConnectorServiceBuilder {
        ConnectorServiceBuilder {
            name: name.into(),
            host,
            capability,
            transport,
            operation_timeout: None,
            properties: ServiceProperties::default(),
            policy: CredentialPolicy::default(),
            store: None,
            prompt: None,
            validator: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    pub fn policy(&self) -> CredentialPolicy {
        self.policy
    }

    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }

    // host

    pub fn host(&self) -> Arc<Host> {
        self.host.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn host_name(&self) -> String {
        self.host().host_name().to_string()
    }

    /// Retarget the service, e.g. when a placeholder host is resolved.
    pub fn set_host(&self, host: Arc<Host>) {
        let mut current = self.host.write().unwrap_or_else(|e| e.into_inner());
        if current.id() != host.id() {
            debug!(
                "Service {} moved from host {} to {}",
                self.name,
                current.alias(),
                host.alias()
            );
        }
        *current = host;
    }

    pub(crate) fn attach_directory(&self, directory: Weak<dyn HostDirectory>) {
        *self.directory.write().unwrap_or_else(|e| e.into_inner()) = Some(directory);
    }

    pub(crate) fn host_directory(&self) -> Option<Arc<dyn HostDirectory>> {
        self.directory
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(Weak::upgrade)
    }

    // state

    fn lock_state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> ConnectionState {
        *self.lock_state()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.lock_state() = state;
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// When the current connection was established.
    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        *self.connected_at.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_connected_at(&self, at: Option<DateTime<Utc>>) {
        *self.connected_at.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }

    // connect / disconnect

    /// Connect, initializing every registered session.
    ///
    /// Connecting an already connected service is a no-op. Waiting longer than
    /// the operation timeout for another connect or disconnect yields `Canceled`.
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<(), ConnectorError> {
        let result = self
            .guard
            .run(|| self.connect_guarded(cancel), self.operation_timeout, cancel)
            .await;

        match result {
            Ok(outcome) => outcome,
            Err(ConnectorError::Timeout { timeout }) => {
                warn!(
                    "Connect of {} to {} gave up after {:?} waiting for another operation",
                    self.name,
                    self.host_name(),
                    timeout
                );
                Err(ConnectorError::Canceled)
            }
            Err(e) => Err(e),
        }
    }

    async fn connect_guarded(&self, cancel: &CancellationToken) -> Result<(), ConnectorError> {
        if cancel.is_cancelled() {
            return Err(ConnectorError::Canceled);
        }

        match self.state() {
            ConnectionState::Connected => {
                debug!("{} already connected", self.name);
                return Ok(());
            }
            // nested connect from inside our own connect sequence
            ConnectionState::Connecting => return Ok(()),
            _ => {}
        }

        let host_name = self.host_name();
        info!(
            "Connecting {} to {} via {}",
            self.name,
            host_name,
            self.transport.name()
        );
        self.set_state(ConnectionState::Connecting);

        let connected = match self.transport.pre_connect(self).await {
            Ok(()) => self.transport.connect(self, cancel).await,
            Err(e) => Err(e.into()),
        };

        if let Err(e) = connected {
            self.set_state(ConnectionState::Disconnected);
            if matches!(e, ConnectorError::Canceled) {
                info!("Connect of {} to {} canceled", self.name, host_name);
            } else {
                error!("Failed to connect {} to {}: {}", self.name, host_name, e);
                self.fire(EventKind::ConnectionError);
            }
            return Err(e);
        }

        let failures = self.initialize_sessions(cancel).await;

        self.transport.post_connect(self).await;
        self.set_connected_at(Some(Utc::now()));
        self.set_state(ConnectionState::Connected);
        info!("Connected {} to {}", self.name, host_name);
        self.fire(EventKind::AfterConnect);

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ConnectorError::SessionInit { failures })
        }
    }

    async fn initialize_sessions(&self, cancel: &CancellationToken) -> Vec<SessionError> {
        let mut failures = Vec::new();
        for session in self.sessions() {
            if let Err(e) = session.initialize(cancel).await {
                warn!("Session initialization failed on {}: {}", self.name, e);
                failures.push(e);
            }
        }
        failures
    }

    /// Disconnect, uninitializing every registered session.
    ///
    /// Never fails on a guard timeout: the timeout is logged and `Ok` returned.
    pub async fn disconnect(&self, cancel: &CancellationToken) -> Result<(), ConnectorError> {
        let result = self
            .guard
            .run(|| self.disconnect_guarded(cancel), self.operation_timeout, cancel)
            .await;

        match result {
            Ok(outcome) => outcome,
            Err(ConnectorError::Timeout { timeout }) => {
                warn!(
                    "Skipping disconnect of {} from {} after waiting {:?}",
                    self.name,
                    self.host_name(),
                    timeout
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn disconnect_guarded(&self, cancel: &CancellationToken) -> Result<(), ConnectorError> {
        if self.state() == ConnectionState::Disconnected {
            debug!("{} already disconnected", self.name);
            return Ok(());
        }

        let host_name = self.host_name();
        info!("Disconnecting {} from {}", self.name, host_name);
        self.set_state(ConnectionState::Disconnecting);

        self.transport.pre_disconnect(self).await;
        let outcome = self.transport.disconnect(self, cancel).await;

        if let Err(e) = &outcome {
            if !e.connection_lost {
                error!("Failed to disconnect {} from {}: {}", self.name, host_name, e);
                self.set_state(ConnectionState::Connected);
                return Err(e.clone().into());
            }
            warn!(
                "Connection of {} to {} lost while disconnecting: {}",
                self.name, host_name, e
            );
        }

        for session in self.sessions() {
            if let Err(e) = session.uninitialize(cancel).await {
                warn!("Ignoring uninitialize failure on {}: {}", self.name, e);
            }
        }

        self.transport.post_disconnect(self).await;
        self.set_connected_at(None);
        self.set_state(ConnectionState::Disconnected);
        info!("Disconnected {} from {}", self.name, host_name);
        self.fire(EventKind::AfterDisconnect);

        outcome.map_err(ConnectorError::from)
    }

    // listeners

    pub fn add_listener(&self, listener: Arc<dyn ConnectorListener>) {
        self.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ConnectorListener>) {
        self.listeners.remove(listener);
    }

    pub fn clear_listeners(&self) {
        self.listeners.clear();
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Listeners that keep the connection in use.
    pub fn active_listener_count(&self) -> usize {
        self.listeners.active_count()
    }

    /// Fire `AfterConnect` if the service is connected.
    pub fn notify_connection(&self) {
        if self.is_connected() {
            self.fire(EventKind::AfterConnect);
        }
    }

    /// Fire `AfterDisconnect` if the service is not connected.
    pub fn notify_disconnection(&self) {
        if !self.is_connected() {
            self.fire(EventKind::AfterDisconnect);
        }
    }

    pub fn notify_error(&self) {
        self.fire(EventKind::ConnectionError);
    }

    fn fire(&self, kind: EventKind) {
        self.listeners.notify(&CommunicationsEvent {
            kind,
            service: self.name.clone(),
            host_name: self.host_name(),
        });
    }

    // sessions

    /// Register a client session. Registering the same session twice is a no-op.
    pub fn register_session(&self, session: Arc<dyn ClientSession>) {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        if !sessions.iter().any(|s| same_session(s, &session)) {
            debug!("Registered session {} with {}", session.name(), self.name);
            sessions.push(session);
        }
    }

    pub fn deregister_session(&self, session: &Arc<dyn ClientSession>) {
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|s| !same_session(s, session));
    }

    pub fn sessions(&self) -> Vec<Arc<dyn ClientSession>> {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// The first session ever registered. Resolved once, then cached.
    pub fn primary_session(&self) -> Option<Arc<dyn ClientSession>> {
        if let Some(primary) = self.primary_session.get() {
            return Some(primary.clone());
        }

        let first = self
            .sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .first()
            .cloned()?;
        Some(self.primary_session.get_or_init(|| first).clone())
    }

    // credentials

    pub fn credentials_provider(&self) -> CredentialsProvider<'_> {
        CredentialsProvider::new(self)
    }

    pub(crate) fn credential_state(&self) -> &CredentialState {
        &self.credentials
    }

    // properties

    fn lock_properties(&self) -> MutexGuard<'_, ServiceProperties> {
        self.properties.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply `update` and mark the service dirty if it reports a change.
    fn update_properties(&self, update: impl FnOnce(&mut ServiceProperties) -> bool) {
        if update(&mut self.lock_properties()) {
            self.mark_dirty();
        }
    }

    pub fn description(&self) -> Option<String> {
        self.lock_properties().description.clone()
    }

    pub fn set_description(&self, description: Option<String>) {
        self.update_properties(|p| replace_if_changed(&mut p.description, description));
    }

    /// Configured port, or `None` for the transport default.
    pub fn port(&self) -> Option<u16> {
        self.lock_properties().port
    }

    pub fn set_port(&self, port: Option<u16>) {
        self.update_properties(|p| replace_if_changed(&mut p.port, port));
    }

    pub fn is_using_tls(&self) -> bool {
        self.lock_properties().use_tls
    }

    pub fn set_using_tls(&self, use_tls: bool) {
        self.update_properties(|p| replace_if_changed(&mut p.use_tls, use_tls));
    }

    pub fn server_launch_properties(&self) -> Option<ServerLaunchProperties> {
        self.lock_properties().server_launch.clone()
    }

    pub fn has_server_launch_properties(&self) -> bool {
        self.lock_properties().server_launch.is_some()
    }

    pub fn set_server_launch_properties(&self, properties: Option<ServerLaunchProperties>) {
        self.update_properties(|p| replace_if_changed(&mut p.server_launch, properties));
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    pub(crate) fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::SeqCst);
    }

    /// Persist the host through `persistence` and clear the dirty flag.
    pub fn commit(&self, persistence: &dyn HostPersistence) -> Result<(), PersistenceError> {
        persistence.commit(&self.host())?;
        self.clear_dirty();
        Ok(())
    }

    // remote information

    pub fn version_release_modification(&self) -> Option<String> {
        self.transport.version_release_modification()
    }

    pub fn home_directory(&self) -> Option<String> {
        self.transport.home_directory()
    }

    pub fn temp_directory(&self) -> Option<String> {
        self.transport.temp_directory()
    }
}

impl std::fmt::Debug for ConnectorService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorService")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("capability", &self.capability)
            .field("host", &self.host_name())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn replace_if_changed<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}
