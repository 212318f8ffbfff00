//! Object-storage lease primitives used by the blob lease lock manager.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;
use primacy_core::AppError;

/// Storage error code returned while a container is being deleted.
pub const CONTAINER_BEING_DELETED: &str = "ContainerBeingDeleted";

/// Result type returned by [`BlobLeaseStore`] implementations.
pub type BlobStoreResult<T> = Result<T, BlobStoreError>;

/// Failure reported by the storage service or the transport beneath it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobStoreError {
    /// Response status; `None` when no response was received.
    pub status: Option<StatusCode>,
    /// Storage error code such as `LeaseAlreadyPresent`.
    pub code: Option<String>,
    /// Human-readable detail.
    pub message: String,
}

impl BlobStoreError {
    /// Creates an error from a response status.
    #[must_use]
    pub fn status(status: StatusCode, code: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            code: code.map(str::to_owned),
            message: message.into(),
        }
    }

    /// Creates an error for a request that never produced a response.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
        }
    }

    /// Maps the storage status onto the lock error taxonomy.
    ///
    /// 409/412 are conflicts, 404 means the resource is missing, 5xx and
    /// dropped requests are transient, every other status is fatal.
    #[must_use]
    pub fn into_app_error(self, operation: &str) -> AppError {
        let detail = self.describe(operation);
        match self.status {
            None => AppError::Transient(detail),
            Some(status) if status.is_server_error() => AppError::Transient(detail),
            Some(StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS) => {
                AppError::Transient(detail)
            }
            Some(StatusCode::CONFLICT) if self.code.as_deref() == Some(CONTAINER_BEING_DELETED) => {
                AppError::Transport(format!(
                    "the host container is pending deletion and currently inaccessible ({detail})"
                ))
            }
            Some(StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED) => {
                AppError::Conflict(detail)
            }
            Some(StatusCode::NOT_FOUND) => AppError::NotFound(detail),
            Some(_) => AppError::Transport(detail),
        }
    }

    fn describe(&self, operation: &str) -> String {
        let status = self
            .status
            .map(|status| status.as_u16().to_string())
            .unwrap_or_else(|| "no response".to_owned());
        match self.code.as_deref() {
            Some(code) => format!("{operation} failed with {status}: {code}: {}", self.message),
            None => format!("{operation} failed with {status}: {}", self.message),
        }
    }
}

/// Lease state reported for a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobLeaseState {
    /// No lease has been taken or the last one was released.
    Available,
    /// A lease is active.
    Leased,
    /// The last lease ran out.
    Expired,
    /// A lease is being broken.
    Breaking,
    /// A lease was broken.
    Broken,
}

impl BlobLeaseState {
    /// Parses the storage header value, defaulting to `Available`.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "leased" => Self::Leased,
            "expired" => Self::Expired,
            "breaking" => Self::Breaking,
            "broken" => Self::Broken,
            _ => Self::Available,
        }
    }
}

/// Lock status reported for a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobLeaseStatus {
    /// A lease currently locks the blob.
    Locked,
    /// The blob is not locked.
    Unlocked,
}

impl BlobLeaseStatus {
    /// Parses the storage header value, defaulting to `Unlocked`.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("locked") {
            Self::Locked
        } else {
            Self::Unlocked
        }
    }
}

/// Lease-related blob properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobLeaseProperties {
    /// Lease state.
    pub lease_state: BlobLeaseState,
    /// Lease status.
    pub lease_status: BlobLeaseStatus,
    /// User metadata attached to the blob.
    pub metadata: HashMap<String, String>,
}

impl BlobLeaseProperties {
    /// Returns true when nobody currently holds a lease.
    #[must_use]
    pub fn is_unleased(&self) -> bool {
        self.lease_status == BlobLeaseStatus::Unlocked
            && matches!(
                self.lease_state,
                BlobLeaseState::Available | BlobLeaseState::Expired | BlobLeaseState::Broken
            )
    }

    /// Looks up one metadata value ignoring key case.
    #[must_use]
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_str())
    }
}

/// Storage operations needed to implement blob-lease locking.
#[async_trait]
pub trait BlobLeaseStore: Send + Sync {
    /// Creates the container; an existing container is not an error.
    async fn create_container_if_missing(&self, container: &str) -> BlobStoreResult<()>;

    /// Uploads a zero-length blob; fails with 409/412 when it already exists.
    async fn create_empty_blob(&self, container: &str, blob: &str) -> BlobStoreResult<()>;

    /// Acquires a lease and returns the lease id granted by the service.
    async fn acquire_lease(
        &self,
        container: &str,
        blob: &str,
        duration: Duration,
        proposed_lease_id: &str,
    ) -> BlobStoreResult<String>;

    /// Renews a lease held under `lease_id`.
    async fn renew_lease(&self, container: &str, blob: &str, lease_id: &str)
    -> BlobStoreResult<()>;

    /// Releases a lease held under `lease_id`.
    async fn release_lease(
        &self,
        container: &str,
        blob: &str,
        lease_id: &str,
    ) -> BlobStoreResult<()>;

    /// Reads lease state and metadata.
    async fn get_properties(&self, container: &str, blob: &str)
    -> BlobStoreResult<BlobLeaseProperties>;

    /// Replaces blob metadata under an active lease.
    async fn set_metadata(
        &self,
        container: &str,
        blob: &str,
        lease_id: &str,
        metadata: &HashMap<String, String>,
    ) -> BlobStoreResult<()>;
}

#[cfg(test)]
mod tests {
    use http::StatusCode;
    use primacy_core::AppError;

    use super::{BlobLeaseState, BlobStoreError, CONTAINER_BEING_DELETED};

    #[test]
    fn status_codes_map_onto_the_error_taxonomy() {
        let conflict = BlobStoreError::status(StatusCode::CONFLICT, Some("LeaseAlreadyPresent"), "");
        assert!(matches!(
            conflict.into_app_error("acquire"),
            AppError::Conflict(_)
        ));

        let missing = BlobStoreError::status(StatusCode::NOT_FOUND, Some("BlobNotFound"), "");
        assert!(matches!(
            missing.into_app_error("acquire"),
            AppError::NotFound(_)
        ));

        let unavailable = BlobStoreError::status(StatusCode::SERVICE_UNAVAILABLE, None, "");
        assert!(unavailable.into_app_error("acquire").is_transient());
        assert!(
            BlobStoreError::transport("reset")
                .into_app_error("acquire")
                .is_transient()
        );

        let forbidden = BlobStoreError::status(StatusCode::FORBIDDEN, None, "bad sas");
        assert!(matches!(
            forbidden.into_app_error("acquire"),
            AppError::Transport(_)
        ));
    }

    #[test]
    fn container_pending_deletion_is_fatal() {
        let error =
            BlobStoreError::status(StatusCode::CONFLICT, Some(CONTAINER_BEING_DELETED), "");
        assert!(matches!(
            error.into_app_error("create container"),
            AppError::Transport(message) if message.contains("pending deletion")
        ));
    }

    #[test]
    fn lease_state_parsing_is_case_insensitive() {
        assert_eq!(BlobLeaseState::parse("Leased"), BlobLeaseState::Leased);
        assert_eq!(BlobLeaseState::parse("unknown"), BlobLeaseState::Available);
    }
}
