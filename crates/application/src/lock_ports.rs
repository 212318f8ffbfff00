use std::time::Duration;

use async_trait::async_trait;
use primacy_core::AppResult;
use primacy_domain::LockHandle;
use tokio_util::sync::CancellationToken;

/// Outcome of one lock acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAcquisition {
    /// The lock was granted to the caller.
    Acquired(LockHandle),
    /// Another owner currently holds the lock.
    Conflict,
}

impl LockAcquisition {
    /// Returns true when the lock was granted.
    #[must_use]
    pub fn is_acquired(&self) -> bool {
        matches!(self, Self::Acquired(_))
    }

    /// Returns the handle when the lock was granted.
    #[must_use]
    pub fn into_handle(self) -> Option<LockHandle> {
        match self {
            Self::Acquired(handle) => Some(handle),
            Self::Conflict => None,
        }
    }
}

/// Backend-agnostic distributed lock port.
///
/// Implementations validate identifiers before any I/O, retry transient
/// backend failures internally and honour `cancel` for in-flight calls.
/// Mutual exclusion comes from the backend's atomic primitive only.
#[async_trait]
pub trait DistributedLockManager: Send + Sync {
    /// Attempts to acquire one lock; `Conflict` when another owner holds it.
    async fn try_lock(
        &self,
        namespace: &str,
        lock_id: &str,
        owner: &str,
        proposed_lease_period: Duration,
        cancel: &CancellationToken,
    ) -> AppResult<LockAcquisition>;

    /// Extends a held lease and returns false when it was definitively lost.
    async fn renew(&self, handle: &LockHandle, cancel: &CancellationToken) -> AppResult<bool>;

    /// Releases a held lease, ignoring locks that are already gone.
    async fn release(&self, handle: &LockHandle, cancel: &CancellationToken) -> AppResult<()>;

    /// Returns the current holder, or `None` when the lock is free.
    async fn get_owner(
        &self,
        namespace: &str,
        lock_id: &str,
        cancel: &CancellationToken,
    ) -> AppResult<Option<String>>;
}
