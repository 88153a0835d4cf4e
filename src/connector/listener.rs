//! Connection state notifications.
//!
//! Listeners are delivered a point-in-time snapshot of the registered set, so a
//! listener that registers or removes listeners from inside its callback only
//! affects the next notification.

use std::sync::{Arc, RwLock};

/// What happened to the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    AfterConnect,
    AfterDisconnect,
    ConnectionError,
}

/// Notification delivered to [`ConnectorListener`]s.
#[derive(Debug, Clone)]
pub struct CommunicationsEvent {
    pub kind: EventKind,
    /// Name of the connector service that changed state
    pub service: String,
    pub host_name: String,
}

/// Observer of a connector service's connection state.
pub trait ConnectorListener: Send + Sync {
    fn on_event(&self, event: &CommunicationsEvent);

    /// Passive listeners do not keep a connection "in use".
    fn is_passive(&self) -> bool {
        false
    }
}

fn same_listener(a: &Arc<dyn ConnectorListener>, b: &Arc<dyn ConnectorListener>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Set of listeners with snapshot delivery.
#[derive(Default)]
pub struct ListenerSet {
    listeners: RwLock<Vec<Arc<dyn ConnectorListener>>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener; adding the same listener twice is a no-op.
    pub fn add(&self, listener: Arc<dyn ConnectorListener>) {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        if !listeners.iter().any(|l| same_listener(l, &listener)) {
            listeners.push(listener);
        }
    }

    pub fn remove(&self, listener: &Arc<dyn ConnectorListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|l| !same_listener(l, listener));
    }

    pub fn clear(&self) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn len(&self) -> usize {
        self.listeners.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of listeners that are not passive.
    pub fn active_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|l| !l.is_passive())
            .count()
    }

    /// Deliver `event` to every listener registered right now.
    pub fn notify(&self, event: &CommunicationsEvent) {
        let snapshot: Vec<_> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        for listener in snapshot {
            listener.on_event(event);
        }
    }
}
