//! MCP tool surface over the connector core.
//!
//! - `context`: registry, credential store and host table shared by all tools
//! - `session`: the client session the MCP caller registers with each service
//! - `types`: serializable responses
//! - `schema`: JSON Schema helpers
//! - `commands`: the `#[Tools]` implementation

pub mod commands;
pub mod context;
pub(crate) mod schema;
pub mod session;
pub mod types;

pub use commands::{ConnectRequest, McpConnectorTools};
pub use context::ConnectorContext;
