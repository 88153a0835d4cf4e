//! Connector services and credential sharing.
//!
//! This module provides:
//! - [`SerializedOperationGuard`]: reentrant, timeout-bound exclusion for connect/disconnect
//! - [`ConnectorService`]: one shared connection per host and capability
//! - [`ConnectorServiceRegistry`]: lookup and placeholder migration of services
//! - [`CredentialsProvider`] / [`CredentialPropagator`]: in-memory credentials and sharing
//! - [`store`]: durable credential storage

pub mod credentials;
pub mod guard;
pub mod host;
pub mod listener;
pub mod registry;
pub mod service;
pub mod session;
pub mod store;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use credentials::{
    CredentialPrompt, CredentialPropagator, Credentials, CredentialsProvider, PromptRequest,
    PromptResponse, SignonValidator,
};
pub use guard::{OwnerToken, SerializedOperationGuard};
pub use host::{Capability, Host, HostId, HostPersistence};
pub use listener::{CommunicationsEvent, ConnectorListener, EventKind};
pub use registry::{ConnectorServiceRegistry, HostDirectory, ServiceFactory};
pub use service::{ConnectionState, ConnectorService, ConnectorServiceBuilder, CredentialPolicy};
pub use session::ClientSession;
pub use store::{CredentialStore, SignonInfo};
pub use transport::{ConnectorTransport, ServerLaunchProperties, ServerLaunchType};
