//! SSH transport for connector services.
//!
//! - `handler`: russh client handler
//! - `auth`: password, key file and agent authentication
//! - `client`: address resolution, client config and retrying connect
//! - `transport`: [`SshTransport`], the [`ConnectorTransport`](crate::connector::ConnectorTransport)

pub mod auth;
pub(crate) mod client;
pub mod handler;
pub mod transport;

pub use client::{DEFAULT_SSH_PORT, SshSettings};
pub use transport::SshTransport;
