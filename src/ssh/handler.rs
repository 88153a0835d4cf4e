//! russh client handler used by [`SshTransport`](super::SshTransport).

use russh::{client, keys};
use tracing::debug;

/// Accepts every server key, like `StrictHostKeyChecking=no`.
///
/// The key algorithm is logged so a changed host key at least leaves a trace.
pub struct SshClientHandler {
    host: String,
}

impl SshClientHandler {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!(
            "Accepting {:?} host key from {}",
            server_public_key.algorithm(),
            self.host
        );
        Ok(true)
    }
}
