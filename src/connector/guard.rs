//! Reentrant, timeout-bound mutual exclusion for connect/disconnect.
//!
//! [`SerializedOperationGuard::run`] admits one owner at a time. The owner is
//! identified by an [`OwnerToken`] scoped to the running task, so an operation
//! that re-enters the guard from the same task (for example a sign-on prompt
//! that triggers another connect) runs immediately instead of deadlocking.
//! Any other task waits until the guard is released, the timeout elapses, or
//! its cancellation token fires.
//!
//! The timeout bounds *acquisition* only. Once started, an operation runs to
//! completion.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::ConnectorError;

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

tokio::task_local! {
    static CURRENT_OWNER: OwnerToken;
}

/// Identity of the task that holds a guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerToken(u64);

impl OwnerToken {
    /// Token of the guarded operation the current task is running, if any.
    pub fn current() -> Option<Self> {
        CURRENT_OWNER.try_with(|token| *token).ok()
    }

    fn current_or_new() -> Self {
        Self::current().unwrap_or_else(|| OwnerToken(NEXT_OWNER.fetch_add(1, Ordering::Relaxed)))
    }
}

/// Serializes operations with owner reentrance, timeout and cancellation.
#[derive(Debug, Default)]
pub struct SerializedOperationGuard {
    owner: Mutex<Option<OwnerToken>>,
    released: Notify,
}

impl SerializedOperationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_owner(&self) -> MutexGuard<'_, Option<OwnerToken>> {
        self.owner.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Whether any task currently holds the guard.
    pub fn is_held(&self) -> bool {
        self.lock_owner().is_some()
    }

    /// Whether the calling task holds the guard.
    pub fn is_held_by_current(&self) -> bool {
        match OwnerToken::current() {
            Some(token) => *self.lock_owner() == Some(token),
            None => false,
        }
    }

    /// Run `operation` while holding the guard.
    ///
    /// Returns `Timeout` if another owner keeps the guard for longer than
    /// `timeout`, and `Canceled` if `cancel` fires first. In both cases the
    /// operation is never started. The guard is released on every exit path,
    /// including when the returned future is dropped mid-operation.
    pub async fn run<F, Fut, T>(
        &self,
        operation: F,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<T, ConnectorError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let token = OwnerToken::current_or_new();

        if *self.lock_owner() == Some(token) {
            trace!("Re-entering serialized operation as {:?}", token);
            return Ok(operation().await);
        }

        let _release = self.acquire(token, timeout, cancel).await?;
        Ok(CURRENT_OWNER.scope(token, operation()).await)
    }

    async fn acquire(
        &self,
        token: OwnerToken,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Release<'_>, ConnectorError> {
        if cancel.is_cancelled() {
            return Err(ConnectorError::Canceled);
        }

        // Duration::MAX and friends would overflow Instant arithmetic
        let deadline = Instant::now()
            .checked_add(timeout)
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(60 * 60 * 24 * 365));

        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            // Register before checking so a release between the check and the
            // select cannot be missed.
            notified.as_mut().enable();

            if self.try_claim(token) {
                trace!("Acquired serialized operation guard as {:?}", token);
                return Ok(Release { guard: self });
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Canceled while waiting for serialized operation guard");
                    return Err(ConnectorError::Canceled);
                }
                _ = tokio::time::sleep_until(deadline) => {
                    debug!("Timed out after {:?} waiting for serialized operation guard", timeout);
                    return Err(ConnectorError::Timeout { timeout });
                }
                _ = &mut notified => {}
            }
        }
    }

    fn try_claim(&self, token: OwnerToken) -> bool {
        let mut owner = self.lock_owner();
        if owner.is_none() {
            *owner = Some(token);
            true
        } else {
            false
        }
    }
}

/// Clears ownership when the outermost acquisition ends.
struct Release<'a> {
    guard: &'a SerializedOperationGuard,
}

impl Drop for Release<'_> {
    fn drop(&mut self) {
        *self.guard.lock_owner() = None;
        self.guard.released.notify_waiters();
    }
}
