//! Registry of shared connector services.
//!
//! Maps `(host, capability)` to the one [`ConnectorService`] that client
//! sessions of that host and capability share. Services are created on demand
//! by an injected factory. A service created under a placeholder host is
//! migrated to the real host when the real host is first looked up, so one
//! physical endpoint never ends up with two services.

use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::host::{Capability, Host, HostId};
use super::service::ConnectorService;
use crate::error::ConnectorError;

/// Lookup of services backing client sessions, used for credential propagation.
pub trait HostDirectory: Send + Sync {
    /// One entry per client session registered with a service of `host`.
    /// A service backing several sessions appears several times.
    fn session_services(&self, host: &Host) -> Vec<Arc<ConnectorService>>;
}

/// Creates the service for a `(host, capability)` pair on first request.
pub type ServiceFactory = dyn Fn(&Arc<Host>, &Capability) -> Arc<ConnectorService> + Send + Sync;

type ServiceKey = (HostId, Capability);

#[derive(Clone)]
struct RegistryEntry {
    host: Arc<Host>,
    service: Arc<ConnectorService>,
}

/// Thread-safe `(host, capability)` -> service map.
pub struct ConnectorServiceRegistry {
    services: DashMap<ServiceKey, RegistryEntry>,
    /// Serializes creation and migration so a pair never gets two services.
    slow_path: Mutex<()>,
    factory: Box<ServiceFactory>,
}

impl ConnectorServiceRegistry {
    pub fn new(
        factory: impl Fn(&Arc<Host>, &Capability) -> Arc<ConnectorService> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            services: DashMap::new(),
            slow_path: Mutex::new(()),
            factory: Box::new(factory),
        })
    }

    /// The service for `(host, capability)`, created on first request.
    pub fn get(self: &Arc<Self>, host: &Arc<Host>, capability: &Capability) -> Arc<ConnectorService> {
        let key = (host.id(), capability.clone());

        if let Some(service) = self.lookup(&key) {
            refresh_host(&service, host);
            return service;
        }

        let _slow = self.slow_path.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(service) = self.lookup(&key) {
            refresh_host(&service, host);
            return service;
        }

        if !host.is_placeholder()
            && let Some(service) = self.migrate_placeholder(host, capability)
        {
            return service;
        }

        let service = (self.factory)(host, capability);
        debug!(
            "Created {} service {} for {}",
            capability,
            service.name(),
            host.host_name()
        );
        self.attach(&service);
        self.services.insert(
            key,
            RegistryEntry {
                host: host.clone(),
                service: service.clone(),
            },
        );
        service
    }

    /// Register `service` for `(host, capability)`, replacing any previous one.
    pub fn set(self: &Arc<Self>, host: &Arc<Host>, capability: &Capability, service: Arc<ConnectorService>) {
        let _slow = self.slow_path.lock().unwrap_or_else(|e| e.into_inner());
        self.attach(&service);
        self.services.insert(
            (host.id(), capability.clone()),
            RegistryEntry {
                host: host.clone(),
                service,
            },
        );
    }

    /// Drop every service registered for `host`, returning them.
    pub fn remove_host(&self, host: &Host) -> Vec<Arc<ConnectorService>> {
        let _slow = self.slow_path.lock().unwrap_or_else(|e| e.into_inner());
        let keys: Vec<ServiceKey> = self
            .services
            .iter()
            .filter(|entry| entry.key().0 == host.id())
            .map(|entry| entry.key().clone())
            .collect();

        keys.into_iter()
            .filter_map(|key| self.services.remove(&key))
            .map(|(_, entry)| entry.service)
            .collect()
    }

    /// Every registered service.
    pub fn services(&self) -> Vec<Arc<ConnectorService>> {
        self.services
            .iter()
            .map(|entry| entry.value().service.clone())
            .collect()
    }

    /// Services registered for `host`.
    pub fn services_for(&self, host: &Host) -> Vec<Arc<ConnectorService>> {
        self.services
            .iter()
            .filter(|entry| entry.key().0 == host.id())
            .map(|entry| entry.value().service.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Disconnect every connected service concurrently.
    ///
    /// Returns the services that failed, with their errors.
    pub async fn disconnect_all(
        &self,
        cancel: &CancellationToken,
    ) -> Vec<(Arc<ConnectorService>, ConnectorError)> {
        let connected: Vec<_> = self
            .services()
            .into_iter()
            .filter(|service| service.is_connected())
            .collect();
        info!("Disconnecting {} connector service(s)", connected.len());

        let results = join_all(connected.iter().map(|service| service.disconnect(cancel))).await;

        connected
            .into_iter()
            .zip(results)
            .filter_map(|(service, result)| match result {
                Ok(()) => None,
                Err(e) => {
                    warn!("Failed to disconnect {}: {}", service.name(), e);
                    Some((service, e))
                }
            })
            .collect()
    }

    fn lookup(&self, key: &ServiceKey) -> Option<Arc<ConnectorService>> {
        self.services.get(key).map(|entry| entry.service.clone())
    }

    /// Re-key a service registered under a placeholder with the same host name.
    fn migrate_placeholder(
        &self,
        host: &Arc<Host>,
        capability: &Capability,
    ) -> Option<Arc<ConnectorService>> {
        let placeholder_key = self
            .services
            .iter()
            .find(|entry| {
                entry.key().1 == *capability
                    && entry.value().host.is_placeholder()
                    && entry.value().host.same_host_name(host)
            })
            .map(|entry| entry.key().clone())?;

        let (_, entry) = self.services.remove(&placeholder_key)?;
        info!(
            "Migrating {} service {} from placeholder to host {}",
            capability,
            entry.service.name(),
            host.alias()
        );

        entry.service.set_host(host.clone());
        self.services.insert(
            (host.id(), capability.clone()),
            RegistryEntry {
                host: host.clone(),
                service: entry.service.clone(),
            },
        );
        Some(entry.service)
    }

    fn attach(self: &Arc<Self>, service: &ConnectorService) {
        let directory: Arc<dyn HostDirectory> = self.clone();
        service.attach_directory(Arc::downgrade(&directory));
    }
}

/// A service still pointing at a placeholder follows the real host.
fn refresh_host(service: &ConnectorService, host: &Arc<Host>) {
    if service.host().is_placeholder() && !host.is_placeholder() {
        service.set_host(host.clone());
    }
}

impl HostDirectory for ConnectorServiceRegistry {
    fn session_services(&self, host: &Host) -> Vec<Arc<ConnectorService>> {
        let mut services = Vec::new();
        for entry in self.services.iter() {
            let service = &entry.value().service;
            if service.host().id() != host.id() {
                continue;
            }
            for _ in 0..service.session_count() {
                services.push(service.clone());
            }
        }
        services
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::test_support::{MockSession, MockTransport, test_registry};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn host(name: &str) -> Arc<Host> {
        Arc::new(Host::new(name, name, "Linux"))
    }

    mod lookup {
        use super::*;

        #[test]
        fn test_get_returns_same_instance() {
            let registry = test_registry(MockTransport::new());
            let h = host("host1");

            let first = registry.get(&h, &Capability::Files);
            let second = registry.get(&h, &Capability::Files);
            assert!(Arc::ptr_eq(&first, &second));
            assert_eq!(registry.len(), 1);
        }

        #[test]
        fn test_capabilities_get_separate_services() {
            let registry = test_registry(MockTransport::new());
            let h = host("host1");

            let files = registry.get(&h, &Capability::Files);
            let shells = registry.get(&h, &Capability::Shells);
            assert!(!Arc::ptr_eq(&files, &shells));
        }

        #[test]
        fn test_hosts_with_same_name_are_distinct() {
            let registry = test_registry(MockTransport::new());
            let a = registry.get(&host("host1"), &Capability::Files);
            let b = registry.get(&host("host1"), &Capability::Files);
            assert!(!Arc::ptr_eq(&a, &b));
        }

        #[test]
        fn test_set_replaces_entry() {
            let registry = test_registry(MockTransport::new());
            let h = host("host1");
            let created = registry.get(&h, &Capability::Files);

            let replacement = crate::connector::test_support::service_builder(h.clone()).build();
            registry.set(&h, &Capability::Files, replacement.clone());

            let found = registry.get(&h, &Capability::Files);
            assert!(Arc::ptr_eq(&found, &replacement));
            assert!(!Arc::ptr_eq(&found, &created));
        }

        #[test]
        fn test_remove_host_drops_its_services() {
            let registry = test_registry(MockTransport::new());
            let h = host("host1");
            let other = host("host2");
            registry.get(&h, &Capability::Files);
            registry.get(&h, &Capability::Shells);
            registry.get(&other, &Capability::Files);

            assert_eq!(registry.remove_host(&h).len(), 2);
            assert_eq!(registry.len(), 1);
            assert!(registry.services_for(&h).is_empty());
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
        async fn test_concurrent_gets_create_one_service() {
            let created = Arc::new(AtomicUsize::new(0));
            let counter = created.clone();
            let transport = MockTransport::new();
            let registry = ConnectorServiceRegistry::new(move |host, capability| {
                counter.fetch_add(1, Ordering::SeqCst);
                crate::connector::test_support::service_with_transport(host.clone(), transport.clone())
                    .description(capability.to_string())
                    .build()
            });
            let h = host("host1");

            let mut handles = Vec::new();
            for _ in 0..16 {
                let registry = registry.clone();
                let h = h.clone();
                handles.push(tokio::spawn(async move {
                    registry.get(&h, &Capability::Files)
                }));
            }

            let mut services = Vec::new();
            for handle in handles {
                services.push(handle.await.unwrap());
            }

            assert_eq!(created.load(Ordering::SeqCst), 1);
            assert!(services.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        }
    }

    mod placeholders {
        use super::*;

        #[test]
        fn test_placeholder_service_migrates_to_real_host() {
            let registry = test_registry(MockTransport::new());
            let placeholder = Arc::new(Host::placeholder("host1"));
            let real = Arc::new(Host::new("lab", "HOST1", "Linux"));

            let early = registry.get(&placeholder, &Capability::Files);
            let resolved = registry.get(&real, &Capability::Files);

            assert!(Arc::ptr_eq(&early, &resolved));
            assert_eq!(resolved.host().id(), real.id());
            assert_eq!(registry.len(), 1);

            let fresh = registry.get(&placeholder, &Capability::Files);
            assert!(!Arc::ptr_eq(&fresh, &resolved));
        }

        #[test]
        fn test_migration_respects_capability_and_host_name() {
            let registry = test_registry(MockTransport::new());
            let placeholder = Arc::new(Host::placeholder("host1"));
            let early = registry.get(&placeholder, &Capability::Files);

            let shells = registry.get(&Arc::new(Host::new("lab", "host1", "Linux")), &Capability::Shells);
            let elsewhere = registry.get(&Arc::new(Host::new("x", "host2", "Linux")), &Capability::Files);

            assert!(!Arc::ptr_eq(&early, &shells));
            assert!(!Arc::ptr_eq(&early, &elsewhere));
            assert!(early.host().is_placeholder());
        }

        #[test]
        fn test_placeholder_lookup_never_migrates() {
            let registry = test_registry(MockTransport::new());
            let first = Arc::new(Host::placeholder("host1"));
            let second = Arc::new(Host::placeholder("host1"));

            let a = registry.get(&first, &Capability::Files);
            let b = registry.get(&second, &Capability::Files);
            assert!(!Arc::ptr_eq(&a, &b));
        }

        #[test]
        fn test_direct_hit_follows_real_host() {
            let registry = test_registry(MockTransport::new());
            let placeholder = Arc::new(Host::placeholder("host1"));
            let real = Arc::new(Host::new("lab", "host1", "Linux"));

            let service = crate::connector::test_support::service_builder(placeholder).build();
            registry.set(&real, &Capability::Files, service.clone());

            let found = registry.get(&real, &Capability::Files);
            assert!(Arc::ptr_eq(&found, &service));
            assert_eq!(found.host().id(), real.id());
        }
    }

    mod directory {
        use super::*;

        #[test]
        fn test_session_services_repeat_per_session() {
            let registry = test_registry(MockTransport::new());
            let h = host("host1");
            let files = registry.get(&h, &Capability::Files);
            let shells = registry.get(&h, &Capability::Shells);
            files.register_session(MockSession::new("a").into_arc());
            files.register_session(MockSession::new("b").into_arc());
            shells.register_session(MockSession::new("c").into_arc());

            let services = registry.session_services(&h);
            assert_eq!(services.len(), 3);
            assert_eq!(services.iter().filter(|s| Arc::ptr_eq(s, &files)).count(), 2);
        }

        #[test]
        fn test_services_reach_registry_through_weak_handle() {
            let registry = test_registry(MockTransport::new());
            let service = registry.get(&host("host1"), &Capability::Files);
            assert!(service.host_directory().is_some());

            drop(registry);
            assert!(service.host_directory().is_none());
        }
    }

    mod shutdown {
        use super::*;
        use crate::error::TransportError;

        #[tokio::test]
        async fn test_disconnect_all_reports_failures() {
            let ok_transport = MockTransport::new();
            let bad_transport = MockTransport::new().failing_disconnect(TransportError::new("busy"));
            let registry = test_registry(ok_transport.clone());
            let h = host("host1");

            let ok = registry.get(&h, &Capability::Files);
            let bad = crate::connector::test_support::service_with_transport(h.clone(), bad_transport.clone())
                .build();
            registry.set(&h, &Capability::Shells, bad.clone());
            let idle = registry.get(&host("host2"), &Capability::Files);

            let cancel = CancellationToken::new();
            ok.connect(&cancel).await.unwrap();
            bad.connect(&cancel).await.unwrap();

            let failures = registry.disconnect_all(&cancel).await;

            assert_eq!(failures.len(), 1);
            assert!(Arc::ptr_eq(&failures[0].0, &bad));
            assert!(!ok.is_connected());
            assert_eq!(ok_transport.disconnects(), 1);
            assert_eq!(bad_transport.disconnects(), 1);
            assert!(!idle.is_connected());
        }
    }
}
