//! Client session representing MCP tool callers.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::connector::{Capability, ClientSession};
use crate::error::SessionError;

/// The MCP client's use of one connector service.
///
/// Registered once per service on the first `connector_connect` for it.
pub struct McpSession {
    name: String,
    active: AtomicBool,
}

impl McpSession {
    pub fn new(capability: &Capability) -> Self {
        Self {
            name: format!("mcp-{}", capability),
            active: AtomicBool::new(false),
        }
    }

    /// True between a successful connect and the following disconnect.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClientSession for McpSession {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self, _cancel: &CancellationToken) -> Result<(), SessionError> {
        debug!("Session {} initialized", self.name);
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn uninitialize(&self, _cancel: &CancellationToken) -> Result<(), SessionError> {
        debug!("Session {} uninitialized", self.name);
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }
}
