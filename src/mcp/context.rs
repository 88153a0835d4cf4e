//! Everything the MCP tools share: registry, credential store and known hosts.
//!
//! One context is built per server process and handed to every tool instance,
//! so two MCP clients asking for the same host end up on the same service.

use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::session::McpSession;
use crate::config::{resolve_credentials_file, resolve_store_url};
use crate::connector::store::{AuthInfoBackend, FileAuthBackend, MemoryAuthBackend};
use crate::connector::{
    Capability, ConnectorService, ConnectorServiceRegistry, ConnectorTransport, CredentialStore,
    Host,
};
use crate::error::PersistenceError;
use crate::ssh::{SshSettings, SshTransport};

pub struct ConnectorContext {
    registry: Arc<ConnectorServiceRegistry>,
    store: Arc<CredentialStore>,
    /// Lower-cased host name -> host
    hosts: DashMap<String, Arc<Host>>,
    /// Service id -> the MCP session registered with it
    sessions: DashMap<Uuid, Arc<McpSession>>,
}

impl ConnectorContext {
    /// Context whose services get a fresh transport from `transports`.
    pub fn new(
        store: Arc<CredentialStore>,
        transports: impl Fn() -> Arc<dyn ConnectorTransport> + Send + Sync + 'static,
    ) -> Arc<Self> {
        let factory_store = store.clone();
        let registry = ConnectorServiceRegistry::new(move |host, capability| {
            ConnectorService::builder(
                format!("{}-{}", capability, host.host_name()),
                host.clone(),
                capability.clone(),
                transports(),
            )
            .store(factory_store.clone())
            .build()
        });

        Arc::new(Self {
            registry,
            store,
            hosts: DashMap::new(),
            sessions: DashMap::new(),
        })
    }

    /// SSH-backed context configured from the environment.
    ///
    /// Credentials live in memory unless `CONNECTOR_CREDENTIALS_FILE` is set.
    pub fn from_env() -> Result<Arc<Self>, PersistenceError> {
        let backend: Arc<dyn AuthInfoBackend> = match resolve_credentials_file(None) {
            Some(path) => {
                info!("Using credential file {:?}", path);
                Arc::new(FileAuthBackend::open(path)?)
            }
            None => Arc::new(MemoryAuthBackend::new()),
        };
        let store = Arc::new(CredentialStore::new(backend, resolve_store_url(None))?);
        let settings = SshSettings::from_env();

        Ok(Self::new(store, move || {
            Arc::new(SshTransport::new(settings.clone())) as Arc<dyn ConnectorTransport>
        }))
    }

    pub fn registry(&self) -> &Arc<ConnectorServiceRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// The host for `host_name`, created on first use.
    ///
    /// Without a system type the host starts as a placeholder; naming the type
    /// later replaces it, and the registry moves its services over.
    pub fn resolve_host(&self, host_name: &str, system_type: Option<&str>) -> Arc<Host> {
        let mut entry = self
            .hosts
            .entry(host_name.to_ascii_lowercase())
            .or_insert_with(|| Arc::new(new_host(host_name, system_type)));

        if let Some(system_type) = system_type {
            if entry.is_placeholder() {
                *entry = Arc::new(new_host(host_name, Some(system_type)));
            } else if !entry.system_type().eq_ignore_ascii_case(system_type) {
                warn!(
                    "Host {} is already known as {}, ignoring system type {}",
                    host_name,
                    entry.system_type(),
                    system_type
                );
            }
        }

        entry.clone()
    }

    pub fn known_host(&self, host_name: &str) -> Option<Arc<Host>> {
        self.hosts
            .get(&host_name.to_ascii_lowercase())
            .map(|entry| entry.clone())
    }

    /// The shared service for `(host, capability)` with the MCP session registered.
    pub fn service(&self, host: &Arc<Host>, capability: &Capability) -> Arc<ConnectorService> {
        let service = self.registry.get(host, capability);
        self.sessions.entry(service.id()).or_insert_with(|| {
            let session = Arc::new(McpSession::new(capability));
            service.register_session(session.clone());
            session
        });
        service
    }

    /// Disconnect every service. Returns how many failed.
    pub async fn shutdown(&self) -> usize {
        let failures = self
            .registry
            .disconnect_all(&CancellationToken::new())
            .await;
        if !failures.is_empty() {
            warn!("{} service(s) failed to disconnect cleanly", failures.len());
        }
        failures.len()
    }
}

fn new_host(host_name: &str, system_type: Option<&str>) -> Host {
    match system_type {
        Some(system_type) => Host::new(host_name, host_name, system_type),
        None => Host::placeholder(host_name),
    }
}
