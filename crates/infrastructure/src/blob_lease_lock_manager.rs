use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use primacy_application::{DistributedLockManager, LockAcquisition};
use primacy_core::{AppError, AppResult};
use primacy_domain::{
    LeasePeriodBounds, LockHandle, LockHandleInput, LockResourceName, LockTarget, validate_owner,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::blob_lease_store::{BlobLeaseStore, BlobStoreResult};
use crate::retry::{RetryPolicy, retry_transient};

/// Container holding host lock blobs unless configured otherwise.
pub const DEFAULT_HOST_CONTAINER: &str = "azure-webjobs-hosts";

/// Blob metadata key recording the lease holder.
pub const OWNER_METADATA_KEY: &str = "FunctionInstance";

const LOCK_BLOB_PREFIX: &str = "locks";

/// Configuration for [`BlobLeaseLockManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobLeaseConfig {
    /// Container the lock blobs live in.
    pub container: String,
    /// Retry settings for transient storage failures.
    pub retry: RetryPolicy,
}

impl Default for BlobLeaseConfig {
    fn default() -> Self {
        Self {
            container: DEFAULT_HOST_CONTAINER.to_owned(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Returns the blob path backing one lock target.
#[must_use]
pub fn lock_blob_name(target: &LockTarget) -> String {
    format!("{LOCK_BLOB_PREFIX}/{}", LockResourceName::new(target).path())
}

/// Lock manager built on object-storage blob leases.
///
/// Each lock is a zero-length blob; holding the lock means holding the
/// blob's lease. The blob is created on demand and recreated if it is
/// deleted while a lease is being renewed.
pub struct BlobLeaseLockManager {
    store: Arc<dyn BlobLeaseStore>,
    config: BlobLeaseConfig,
}

impl BlobLeaseLockManager {
    /// Creates a manager over one blob lease store.
    #[must_use]
    pub fn new(store: Arc<dyn BlobLeaseStore>, config: BlobLeaseConfig) -> Self {
        Self { store, config }
    }

    /// Returns the manager configuration.
    #[must_use]
    pub fn config(&self) -> &BlobLeaseConfig {
        &self.config
    }

    async fn call<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        operation: &'static str,
        mut call: F,
    ) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = BlobStoreResult<T>>,
    {
        retry_transient(self.config.retry, cancel, operation, || {
            let pending = call();
            async move {
                pending
                    .await
                    .map_err(|error| error.into_app_error(operation))
            }
        })
        .await
    }

    async fn acquire(
        &self,
        blob: &str,
        lease_period: Duration,
        proposed_lease_id: &str,
        cancel: &CancellationToken,
    ) -> AppResult<String> {
        let store = &self.store;
        let container = self.config.container.as_str();
        self.call(cancel, "acquire host lock lease", move || {
            store.acquire_lease(container, blob, lease_period, proposed_lease_id)
        })
        .await
    }

    /// Creates the container and the zero-length lock blob when missing.
    async fn ensure_lock_blob(&self, blob: &str, cancel: &CancellationToken) -> AppResult<()> {
        match self.create_blob(blob, cancel).await {
            Err(AppError::NotFound(_)) => {
                let store = &self.store;
                let container = self.config.container.as_str();
                self.call(cancel, "create host lock container", move || {
                    store.create_container_if_missing(container)
                })
                .await?;
                self.create_blob(blob, cancel).await
            }
            other => other,
        }
    }

    async fn create_blob(&self, blob: &str, cancel: &CancellationToken) -> AppResult<()> {
        let store = &self.store;
        let container = self.config.container.as_str();
        match self
            .call(cancel, "create host lock blob", move || {
                store.create_empty_blob(container, blob)
            })
            .await
        {
            // 409/412: another host created it first.
            Err(AppError::Conflict(_)) => Ok(()),
            other => other,
        }
    }

    async fn record_owner(
        &self,
        blob: &str,
        lease_id: &str,
        owner: &str,
        cancel: &CancellationToken,
    ) {
        let metadata = HashMap::from([(OWNER_METADATA_KEY.to_owned(), owner.to_owned())]);
        let store = &self.store;
        let container = self.config.container.as_str();
        let metadata = &metadata;
        let result = self
            .call(cancel, "write host lock owner", move || {
                store.set_metadata(container, blob, lease_id, metadata)
            })
            .await;

        if let Err(error) = result {
            warn!(
                blob = %blob,
                owner = %owner,
                error = %error,
                "failed to record host lock owner metadata"
            );
        }
    }

    /// Acquires with `lease_id`, creating the lock blob once if it is missing.
    async fn acquire_creating_blob(
        &self,
        blob: &str,
        lease_period: Duration,
        lease_id: &str,
        cancel: &CancellationToken,
    ) -> AppResult<Option<String>> {
        let first_attempt = match self.acquire(blob, lease_period, lease_id, cancel).await {
            Err(AppError::NotFound(_)) => {
                debug!(blob = %blob, "host lock blob missing; creating it");
                self.ensure_lock_blob(blob, cancel).await?;
                self.acquire(blob, lease_period, lease_id, cancel).await
            }
            other => other,
        };

        match first_attempt {
            Ok(granted) => Ok(Some(granted)),
            Err(AppError::Conflict(_)) => Ok(None),
            Err(error) => Err(error),
        }
    }
}

#[async_trait]
impl DistributedLockManager for BlobLeaseLockManager {
    async fn try_lock(
        &self,
        namespace: &str,
        lock_id: &str,
        owner: &str,
        proposed_lease_period: Duration,
        cancel: &CancellationToken,
    ) -> AppResult<LockAcquisition> {
        let target = LockTarget::new(namespace, lock_id)?;
        let owner = validate_owner(owner)?;
        let lease_period = LeasePeriodBounds::BLOB_STORAGE.bound(proposed_lease_period)?;
        let blob = lock_blob_name(&target);
        let proposed_lease_id = Uuid::new_v4().to_string();

        let Some(lease_id) = self
            .acquire_creating_blob(&blob, lease_period, &proposed_lease_id, cancel)
            .await?
        else {
            return Ok(LockAcquisition::Conflict);
        };

        self.record_owner(&blob, &lease_id, owner.as_str(), cancel)
            .await;

        let handle = LockHandle::new(LockHandleInput {
            target,
            owner: owner.into(),
            lease_period,
            token: lease_id,
            acquired_at: Utc::now(),
        })?;
        Ok(LockAcquisition::Acquired(handle))
    }

    async fn renew(&self, handle: &LockHandle, cancel: &CancellationToken) -> AppResult<bool> {
        let blob = lock_blob_name(handle.target());
        let store = &self.store;
        let container = self.config.container.as_str();
        let blob_name = blob.as_str();
        let lease_id = handle.token();
        let renewed = self
            .call(cancel, "renew host lock lease", move || {
                store.renew_lease(container, blob_name, lease_id)
            })
            .await;

        match renewed {
            Ok(()) => Ok(true),
            Err(AppError::Conflict(_)) => Ok(false),
            Err(AppError::NotFound(_)) => {
                warn!(
                    blob = %blob,
                    owner = %handle.owner(),
                    "host lock blob disappeared during renewal; recreating it"
                );
                let reacquired = self
                    .acquire_creating_blob(&blob, handle.lease_period(), lease_id, cancel)
                    .await?;
                if reacquired.is_none() {
                    return Ok(false);
                }

                self.record_owner(&blob, lease_id, handle.owner(), cancel)
                    .await;
                Ok(true)
            }
            Err(error) => Err(error),
        }
    }

    async fn release(&self, handle: &LockHandle, cancel: &CancellationToken) -> AppResult<()> {
        let blob = lock_blob_name(handle.target());
        let store = &self.store;
        let container = self.config.container.as_str();
        let blob_name = blob.as_str();
        let lease_id = handle.token();
        let released = self
            .call(cancel, "release host lock lease", move || {
                store.release_lease(container, blob_name, lease_id)
            })
            .await;

        match released {
            Ok(()) | Err(AppError::NotFound(_)) | Err(AppError::Conflict(_)) => Ok(()),
            Err(error) => Err(error),
        }
    }

    async fn get_owner(
        &self,
        namespace: &str,
        lock_id: &str,
        cancel: &CancellationToken,
    ) -> AppResult<Option<String>> {
        let target = LockTarget::new(namespace, lock_id)?;
        let blob = lock_blob_name(&target);
        let store = &self.store;
        let container = self.config.container.as_str();
        let blob_name = blob.as_str();
        let properties = self
            .call(cancel, "read host lock owner", move || {
                store.get_properties(container, blob_name)
            })
            .await;

        match properties {
            Ok(properties) if properties.is_unleased() => Ok(None),
            Ok(properties) => Ok(properties
                .metadata_value(OWNER_METADATA_KEY)
                .filter(|owner| !owner.is_empty())
                .map(str::to_owned)),
            Err(AppError::NotFound(_)) => Ok(None),
            Err(error) => Err(error),
        }
    }
}
