use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::blob_lease_store::{
    BlobLeaseProperties, BlobLeaseState, BlobLeaseStatus, BlobLeaseStore, BlobStoreError,
    BlobStoreResult,
};

/// Store operation names used for fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobOperation {
    /// `create_container_if_missing`.
    CreateContainer,
    /// `create_empty_blob`.
    CreateBlob,
    /// `acquire_lease`.
    AcquireLease,
    /// `renew_lease`.
    RenewLease,
    /// `release_lease`.
    ReleaseLease,
    /// `get_properties`.
    GetProperties,
    /// `set_metadata`.
    SetMetadata,
}

#[derive(Debug, Clone)]
struct StoredLease {
    lease_id: String,
    duration: Duration,
    expires_at: Instant,
}

impl StoredLease {
    fn is_active(&self) -> bool {
        self.expires_at > Instant::now()
    }
}

#[derive(Debug, Default)]
struct StoredBlob {
    lease: Option<StoredLease>,
    metadata: HashMap<String, String>,
}

impl StoredBlob {
    fn active_lease(&self) -> Option<&StoredLease> {
        self.lease.as_ref().filter(|lease| lease.is_active())
    }
}

#[derive(Debug, Default)]
struct InMemoryBlobState {
    containers: HashSet<String>,
    blobs: HashMap<(String, String), StoredBlob>,
}

/// Process-local emulation of blob storage leases.
///
/// Leases expire on the tokio clock, so paused-time tests can drive expiry.
#[derive(Debug, Default)]
pub struct InMemoryBlobLeaseStore {
    state: Mutex<InMemoryBlobState>,
    faults: Mutex<VecDeque<(BlobOperation, BlobStoreError)>>,
    calls: AtomicUsize,
}

impl InMemoryBlobLeaseStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next call of `operation` fail with `status`.
    pub async fn inject_fault(&self, operation: BlobOperation, status: StatusCode) {
        let error = BlobStoreError::status(status, None, format!("injected failure for {operation:?}"));
        self.inject_error(operation, error).await;
    }

    /// Makes the next call of `operation` fail with `error`.
    pub async fn inject_error(&self, operation: BlobOperation, error: BlobStoreError) {
        self.faults.lock().await.push_back((operation, error));
    }

    /// Returns how many store calls were made.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Deletes a blob regardless of its lease.
    pub async fn delete_blob(&self, container: &str, blob: &str) {
        self.state
            .lock()
            .await
            .blobs
            .remove(&(container.to_owned(), blob.to_owned()));
    }

    /// Breaks the current lease immediately.
    pub async fn break_lease(&self, container: &str, blob: &str) {
        if let Some(stored) = self
            .state
            .lock()
            .await
            .blobs
            .get_mut(&(container.to_owned(), blob.to_owned()))
        {
            stored.lease = None;
        }
    }

    /// Breaks the current lease and takes a new one under `lease_id`.
    pub async fn steal_lease(
        &self,
        container: &str,
        blob: &str,
        lease_id: &str,
        duration: Duration,
    ) -> bool {
        let mut state = self.state.lock().await;
        let Some(stored) = state
            .blobs
            .get_mut(&(container.to_owned(), blob.to_owned()))
        else {
            return false;
        };

        stored.lease = Some(StoredLease {
            lease_id: lease_id.to_owned(),
            duration,
            expires_at: Instant::now() + duration,
        });
        true
    }

    /// Returns the active lease id on a blob.
    pub async fn active_lease_id(&self, container: &str, blob: &str) -> Option<String> {
        self.state
            .lock()
            .await
            .blobs
            .get(&(container.to_owned(), blob.to_owned()))
            .and_then(StoredBlob::active_lease)
            .map(|lease| lease.lease_id.clone())
    }

    async fn enter(&self, operation: BlobOperation) -> BlobStoreResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut faults = self.faults.lock().await;
        let Some(position) = faults.iter().position(|(target, _)| *target == operation) else {
            return Ok(());
        };

        match faults.remove(position) {
            Some((_, error)) => Err(error),
            None => Ok(()),
        }
    }
}

fn blob_not_found(containers: &HashSet<String>, container: &str) -> BlobStoreError {
    if containers.contains(container) {
        BlobStoreError::status(
            StatusCode::NOT_FOUND,
            Some("BlobNotFound"),
            "the specified blob does not exist",
        )
    } else {
        BlobStoreError::status(
            StatusCode::NOT_FOUND,
            Some("ContainerNotFound"),
            "the specified container does not exist",
        )
    }
}

fn lease_mismatch(code: &str) -> BlobStoreError {
    BlobStoreError::status(StatusCode::CONFLICT, Some(code), "lease id does not match")
}

#[async_trait]
impl BlobLeaseStore for InMemoryBlobLeaseStore {
    async fn create_container_if_missing(&self, container: &str) -> BlobStoreResult<()> {
        self.enter(BlobOperation::CreateContainer).await?;
        self.state
            .lock()
            .await
            .containers
            .insert(container.to_owned());
        Ok(())
    }

    async fn create_empty_blob(&self, container: &str, blob: &str) -> BlobStoreResult<()> {
        self.enter(BlobOperation::CreateBlob).await?;
        let mut state = self.state.lock().await;
        if !state.containers.contains(container) {
            return Err(blob_not_found(&state.containers, container));
        }

        let key = (container.to_owned(), blob.to_owned());
        if state.blobs.contains_key(&key) {
            return Err(BlobStoreError::status(
                StatusCode::CONFLICT,
                Some("BlobAlreadyExists"),
                "the specified blob already exists",
            ));
        }

        state.blobs.insert(key, StoredBlob::default());
        Ok(())
    }

    async fn acquire_lease(
        &self,
        container: &str,
        blob: &str,
        duration: Duration,
        proposed_lease_id: &str,
    ) -> BlobStoreResult<String> {
        self.enter(BlobOperation::AcquireLease).await?;
        let mut state = self.state.lock().await;
        let InMemoryBlobState { containers, blobs } = &mut *state;
        let Some(stored) = blobs.get_mut(&(container.to_owned(), blob.to_owned())) else {
            return Err(blob_not_found(containers, container));
        };
        if let Some(active) = stored.active_lease()
            && active.lease_id != proposed_lease_id
        {
            return Err(BlobStoreError::status(
                StatusCode::CONFLICT,
                Some("LeaseAlreadyPresent"),
                "there is already a lease present",
            ));
        }

        stored.lease = Some(StoredLease {
            lease_id: proposed_lease_id.to_owned(),
            duration,
            expires_at: Instant::now() + duration,
        });
        Ok(proposed_lease_id.to_owned())
    }

    async fn renew_lease(
        &self,
        container: &str,
        blob: &str,
        lease_id: &str,
    ) -> BlobStoreResult<()> {
        self.enter(BlobOperation::RenewLease).await?;
        let mut state = self.state.lock().await;
        let InMemoryBlobState { containers, blobs } = &mut *state;
        let Some(stored) = blobs.get_mut(&(container.to_owned(), blob.to_owned())) else {
            return Err(blob_not_found(containers, container));
        };
        // An expired lease can still be renewed until someone else acquires it.
        match stored.lease.as_mut() {
            Some(lease) if lease.lease_id == lease_id => {
                lease.expires_at = Instant::now() + lease.duration;
                Ok(())
            }
            Some(_) => Err(lease_mismatch("LeaseIdMismatchWithLeaseOperation")),
            None => Err(lease_mismatch("LeaseNotPresentWithLeaseOperation")),
        }
    }

    async fn release_lease(
        &self,
        container: &str,
        blob: &str,
        lease_id: &str,
    ) -> BlobStoreResult<()> {
        self.enter(BlobOperation::ReleaseLease).await?;
        let mut state = self.state.lock().await;
        let InMemoryBlobState { containers, blobs } = &mut *state;
        let Some(stored) = blobs.get_mut(&(container.to_owned(), blob.to_owned())) else {
            return Err(blob_not_found(containers, container));
        };
        match stored.lease.as_ref() {
            Some(lease) if lease.lease_id == lease_id => {
                stored.lease = None;
                Ok(())
            }
            Some(_) => Err(lease_mismatch("LeaseIdMismatchWithLeaseOperation")),
            None => Err(lease_mismatch("LeaseNotPresentWithLeaseOperation")),
        }
    }

    async fn get_properties(
        &self,
        container: &str,
        blob: &str,
    ) -> BlobStoreResult<BlobLeaseProperties> {
        self.enter(BlobOperation::GetProperties).await?;
        let state = self.state.lock().await;
        let Some(stored) = state.blobs.get(&(container.to_owned(), blob.to_owned())) else {
            return Err(blob_not_found(&state.containers, container));
        };

        let (lease_state, lease_status) = match stored.lease.as_ref() {
            Some(lease) if lease.is_active() => (BlobLeaseState::Leased, BlobLeaseStatus::Locked),
            Some(_) => (BlobLeaseState::Expired, BlobLeaseStatus::Unlocked),
            None => (BlobLeaseState::Available, BlobLeaseStatus::Unlocked),
        };

        Ok(BlobLeaseProperties {
            lease_state,
            lease_status,
            metadata: stored.metadata.clone(),
        })
    }

    async fn set_metadata(
        &self,
        container: &str,
        blob: &str,
        lease_id: &str,
        metadata: &HashMap<String, String>,
    ) -> BlobStoreResult<()> {
        self.enter(BlobOperation::SetMetadata).await?;
        let mut state = self.state.lock().await;
        let InMemoryBlobState { containers, blobs } = &mut *state;
        let Some(stored) = blobs.get_mut(&(container.to_owned(), blob.to_owned())) else {
            return Err(blob_not_found(containers, container));
        };
        if stored
            .active_lease()
            .is_some_and(|lease| lease.lease_id != lease_id)
        {
            return Err(BlobStoreError::status(
                StatusCode::PRECONDITION_FAILED,
                Some("LeaseIdMismatchWithBlobOperation"),
                "lease id does not match",
            ));
        }

        stored.metadata = metadata.clone();
        Ok(())
    }
}
