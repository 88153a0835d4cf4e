//! Shared connector services for remote hosts.
//!
//! One [`ConnectorService`](connector::ConnectorService) exists per host and
//! capability. Its connect and disconnect are serialized, its listeners are
//! notified of every transition, and the credentials it holds are shared with
//! sibling services of the same host. The [`ssh`] module provides a russh
//! transport and [`mcp`] exposes the whole thing as MCP tools.

#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod config;
pub mod connector;
pub mod error;
pub mod mcp;
pub mod ssh;
