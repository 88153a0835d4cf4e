//! Remote endpoint identities and capability tags.

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::error::PersistenceError;

/// Stable identity of a [`Host`], independent of its names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostId(Uuid);

impl HostId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A remote endpoint. Hosts are owned by the caller and shared as `Arc<Host>`.
///
/// A *placeholder* host stands in for a host whose real identity is not known
/// yet (for example while restoring saved state). The registry migrates
/// services created under a placeholder to the real host once it shows up.
#[derive(Debug, Clone)]
pub struct Host {
    id: HostId,
    alias: String,
    host_name: String,
    system_type: String,
    default_user_id: Option<String>,
    placeholder: bool,
}

impl Host {
    pub fn new(
        alias: impl Into<String>,
        host_name: impl Into<String>,
        system_type: impl Into<String>,
    ) -> Self {
        Self {
            id: HostId::new(),
            alias: alias.into(),
            host_name: host_name.into(),
            system_type: system_type.into(),
            default_user_id: None,
            placeholder: false,
        }
    }

    /// A provisional host known only by its host name.
    pub fn placeholder(host_name: impl Into<String>) -> Self {
        let host_name = host_name.into();
        Self {
            id: HostId::new(),
            alias: host_name.clone(),
            host_name,
            system_type: crate::connector::store::DEFAULT_SYSTEM_TYPE.to_string(),
            default_user_id: None,
            placeholder: true,
        }
    }

    pub fn with_default_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.default_user_id = Some(user_id.into());
        self
    }

    pub fn id(&self) -> HostId {
        self.id
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn system_type(&self) -> &str {
        &self.system_type
    }

    pub fn default_user_id(&self) -> Option<&str> {
        self.default_user_id.as_deref()
    }

    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }

    /// Host names compare case-insensitively.
    pub fn same_host_name(&self, other: &Host) -> bool {
        self.host_name.eq_ignore_ascii_case(&other.host_name)
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Host {}

/// Persists a host (and everything hanging off it) on demand.
pub trait HostPersistence: Send + Sync {
    fn commit(&self, host: &Host) -> Result<(), PersistenceError>;
}

/// Capability a client session needs from a connector service.
///
/// Sessions that declare the same capability on the same host share one
/// connector service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    Files,
    Shells,
    Processes,
    Terminals,
    Other(String),
}

impl Capability {
    pub fn as_str(&self) -> &str {
        match self {
            Capability::Files => "files",
            Capability::Shells => "shells",
            Capability::Processes => "processes",
            Capability::Terminals => "terminals",
            Capability::Other(name) => name,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err("Capability name must not be empty".to_string());
        }
        Ok(match trimmed.to_ascii_lowercase().as_str() {
            "files" => Capability::Files,
            "shells" => Capability::Shells,
            "processes" => Capability::Processes,
            "terminals" => Capability::Terminals,
            other => Capability::Other(other.to_string()),
        })
    }
}
