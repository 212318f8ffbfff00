//! Lock identity and handle types.

use std::time::Duration;

use chrono::{DateTime, Utc};
use primacy_core::{AppError, AppResult, NonEmptyString};

/// Validated `(namespace, lock_id)` pair identifying one lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockTarget {
    namespace: NonEmptyString,
    lock_id: NonEmptyString,
}

impl LockTarget {
    /// Creates a lock target, rejecting empty namespaces and lock ids.
    pub fn new(namespace: impl Into<String>, lock_id: impl Into<String>) -> AppResult<Self> {
        Ok(Self {
            namespace: NonEmptyString::for_field("lock namespace", namespace)?,
            lock_id: NonEmptyString::for_field("lock_id", lock_id)?,
        })
    }

    /// Returns the namespace the lock id is resolved under.
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.namespace.as_str()
    }

    /// Returns the lock id.
    #[must_use]
    pub fn lock_id(&self) -> &str {
        self.lock_id.as_str()
    }
}

/// Validates a lock owner identifier.
pub fn validate_owner(owner: &str) -> AppResult<NonEmptyString> {
    NonEmptyString::for_field("lock owner", owner)
}

/// Construction input for [`LockHandle`].
#[derive(Debug, Clone)]
pub struct LockHandleInput {
    /// Lock target the handle was granted for.
    pub target: LockTarget,
    /// Owner recorded by the backend.
    pub owner: String,
    /// Lease period granted by the backend.
    pub lease_period: Duration,
    /// Opaque backend token (lease id, redis token, sidecar owner).
    pub token: String,
    /// Time the lease was acquired.
    pub acquired_at: DateTime<Utc>,
}

/// Immutable proof that one lock was acquired by one owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    target: LockTarget,
    owner: NonEmptyString,
    lease_period: Duration,
    token: NonEmptyString,
    acquired_at: DateTime<Utc>,
}

impl LockHandle {
    /// Creates a validated handle.
    pub fn new(input: LockHandleInput) -> AppResult<Self> {
        if input.lease_period.is_zero() {
            return Err(AppError::Validation(
                "lock lease period must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            target: input.target,
            owner: validate_owner(input.owner.as_str())?,
            lease_period: input.lease_period,
            token: NonEmptyString::for_field("lock token", input.token)?,
            acquired_at: input.acquired_at,
        })
    }

    /// Returns the lock target.
    #[must_use]
    pub fn target(&self) -> &LockTarget {
        &self.target
    }

    /// Returns the namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.target.namespace()
    }

    /// Returns the lock id.
    #[must_use]
    pub fn lock_id(&self) -> &str {
        self.target.lock_id()
    }

    /// Returns the holder identity.
    #[must_use]
    pub fn owner(&self) -> &str {
        self.owner.as_str()
    }

    /// Returns the lease period granted by the backend.
    #[must_use]
    pub fn lease_period(&self) -> Duration {
        self.lease_period
    }

    /// Returns the backend token.
    #[must_use]
    pub fn token(&self) -> &str {
        self.token.as_str()
    }

    /// Returns when the lease was acquired.
    #[must_use]
    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }
}
