//! Error taxonomy for connector services and credential storage.
//!
//! Every failure a caller can observe is an explicit value:
//!
//! | Error | Origin | Policy |
//! |-------|--------|--------|
//! | [`ConnectorError::Timeout`] | guard not acquired in time | logged; connect reports `Canceled`, disconnect swallows it |
//! | [`ConnectorError::Canceled`] | caller token or suppressed/declined sign-on | always propagated, never retried |
//! | [`ConnectorError::Transport`] | pluggable connect/disconnect | propagated verbatim |
//! | [`ConnectorError::SessionInit`] | a client session failed to initialize | reported after every session was tried |
//! | [`ConnectorError::Persistence`] | credential store backend | recovered locally, store degrades to "not found" |
//!
//! # Transient Transport Failures
//!
//! [`TransportError::is_retryable`] classifies a transport failure by its message.
//! Authentication failures take precedence over connection keywords so that a
//! rejected password is never retried into an account lockout.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by connector-service operations.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// The operation guard could not be acquired within the configured window.
    #[error("timed out after {timeout:?} waiting for exclusive access to the connector")]
    Timeout { timeout: Duration },

    /// The caller canceled, or sign-on was suppressed or declined.
    #[error("operation canceled")]
    Canceled,

    /// The transport-specific connect or disconnect failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// One or more registered client sessions failed to initialize.
    /// The underlying connection stays established.
    #[error("{} client session(s) failed to initialize", .failures.len())]
    SessionInit { failures: Vec<SessionError> },

    /// The credential store backend failed.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl ConnectorError {
    /// True for the cancellation-flavoured outcomes (`Canceled` and `Timeout`).
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ConnectorError::Canceled | ConnectorError::Timeout { .. })
    }
}

/// Failure reported by a [`ConnectorTransport`](crate::connector::ConnectorTransport).
///
/// `connection_lost` tells the state machine that the transport may have left a
/// partial connection behind and the service must fall back to `Disconnected`.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
    pub connection_lost: bool,
}

impl TransportError {
    /// A failure that left the previous connection state intact.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            connection_lost: false,
        }
    }

    /// A failure after which the connection can no longer be trusted.
    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            connection_lost: true,
        }
    }

    /// Whether retrying the same transport operation could succeed.
    pub fn is_retryable(&self) -> bool {
        is_retryable_message(&self.message)
    }
}

/// A client session's initialize or uninitialize hook failed.
#[derive(Debug, Clone, Error)]
#[error("session '{session}': {message}")]
pub struct SessionError {
    pub session: String,
    pub message: String,
}

impl SessionError {
    pub fn new(session: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            session: session.into(),
            message: message.into(),
        }
    }
}

/// Credential store backend failures.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("malformed store location: {0}")]
    MalformedLocation(String),

    #[error("credential store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("credential store data is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Authentication failure patterns. Never retried.
const AUTH_ERRORS: &[&str] = &[
    "authentication failed",
    "password authentication failed",
    "key authentication failed",
    "agent authentication failed",
    "permission denied",
    "publickey",
    "auth fail",
    "no authentication",
    "all authentication methods failed",
];

/// Connection failure patterns that are usually transient.
const RETRYABLE_ERRORS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection timed out",
    "timeout",
    "timed out",
    "network is unreachable",
    "no route to host",
    "host is down",
    "temporary failure",
    "resource temporarily unavailable",
    "handshake failed",
    "failed to connect",
    "broken pipe",
];

/// Classify a transport failure message.
///
/// Unknown messages are retried unless they look like a protocol error
/// (mention "ssh") without also mentioning a timeout or connect problem.
pub(crate) fn is_retryable_message(error: &str) -> bool {
    let error_lower = error.to_lowercase();

    if AUTH_ERRORS.iter().any(|p| error_lower.contains(p)) {
        return false;
    }

    if RETRYABLE_ERRORS.iter().any(|p| error_lower.contains(p)) {
        return true;
    }

    !error_lower.contains("ssh") || error_lower.contains("connect")
}

#[cfg(test)]
mod tests {
    use super::*;

    mod classification {
        use super::*;

        #[test]
        fn test_auth_failures_not_retryable() {
            assert!(!is_retryable_message("Authentication failed"));
            assert!(!is_retryable_message("Permission denied (publickey)"));
            assert!(!is_retryable_message("All authentication methods failed"));
            assert!(!is_retryable_message("password authentication failed: wrong"));
        }

        #[test]
        fn test_connection_failures_retryable() {
            assert!(is_retryable_message("Connection refused"));
            assert!(is_retryable_message("connection reset by peer"));
            assert!(is_retryable_message("Connection timed out after 30s"));
            assert!(is_retryable_message("No route to host"));
            assert!(is_retryable_message("Temporary failure in name resolution"));
        }

        #[test]
        fn test_auth_takes_precedence_over_timeout() {
            assert!(!is_retryable_message(
                "Connection timeout during authentication failed"
            ));
        }

        #[test]
        fn test_ssh_protocol_error_not_retryable() {
            assert!(!is_retryable_message("SSH protocol error"));
            assert!(is_retryable_message("SSH connection dropped"));
        }

        #[test]
        fn test_unknown_error_retryable() {
            assert!(is_retryable_message("something odd happened"));
            assert!(is_retryable_message(""));
        }
    }

    mod connector_error {
        use super::*;

        #[test]
        fn test_cancellation_flavours() {
            assert!(ConnectorError::Canceled.is_cancellation());
            assert!(
                ConnectorError::Timeout {
                    timeout: Duration::from_millis(5)
                }
                .is_cancellation()
            );
            assert!(!ConnectorError::Transport(TransportError::new("boom")).is_cancellation());
        }

        #[test]
        fn test_timeout_carries_value() {
            let err = ConnectorError::Timeout {
                timeout: Duration::from_secs(120),
            };
            assert!(err.to_string().contains("120s"));
        }

        #[test]
        fn test_session_init_counts_failures() {
            let err = ConnectorError::SessionInit {
                failures: vec![
                    SessionError::new("files", "no home"),
                    SessionError::new("shells", "no shell"),
                ],
            };
            assert_eq!(err.to_string(), "2 client session(s) failed to initialize");
        }

        #[test]
        fn test_transport_is_transparent() {
            let err: ConnectorError = TransportError::new("Connection refused").into();
            assert_eq!(err.to_string(), "Connection refused");
        }
    }

    mod transport_error {
        use super::*;

        #[test]
        fn test_constructors() {
            assert!(!TransportError::new("x").connection_lost);
            assert!(TransportError::connection_lost("x").connection_lost);
        }

        #[test]
        fn test_retryable_delegates_to_message() {
            assert!(TransportError::new("Connection refused").is_retryable());
            assert!(!TransportError::new("Permission denied").is_retryable());
        }
    }
}
