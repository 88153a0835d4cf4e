//! Client sessions ("subsystems") that consume a connector service.
//!
//! A session is a logical client of one [`ConnectorService`](super::ConnectorService).
//! Many sessions can register with the same service; the service initializes
//! every registered session after connecting and uninitializes them after
//! disconnecting.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::SessionError;

/// Trait implemented by every consumer of a connector service.
///
/// Implementations must be thread-safe (`Send + Sync`); hooks run on whichever
/// task performs the connect or disconnect.
#[async_trait]
pub trait ClientSession: Send + Sync {
    /// Name used in logs and error reports.
    fn name(&self) -> &str;

    /// Called after the transport connected.
    async fn initialize(&self, cancel: &CancellationToken) -> Result<(), SessionError>;

    /// Called after the transport disconnected. Failures are logged and ignored.
    async fn uninitialize(&self, cancel: &CancellationToken) -> Result<(), SessionError>;

    /// User id configured on this session, if it overrides the host default.
    fn local_user_id(&self) -> Option<String> {
        None
    }

    /// Whether user ids (and inherited passwords) must be upper-cased.
    fn force_user_id_to_uppercase(&self) -> bool {
        false
    }

    /// Persist a user id the operator chose as the new default during sign-on.
    fn update_default_user_id(&self, _user_id: &str) {}
}

/// Identity comparison for shared session handles, ignoring vtable pointers.
pub(crate) fn same_session(a: &Arc<dyn ClientSession>, b: &Arc<dyn ClientSession>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
