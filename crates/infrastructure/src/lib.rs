//! Infrastructure adapters for the distributed lock port.

#![forbid(unsafe_code)]

mod blob_lease_lock_manager;
mod blob_lease_store;
mod http_blob_lease_store;
mod in_memory_blob_lease_store;
mod lock_manager_factory;
mod redis_lock_manager;
mod retry;
mod sidecar_lock_manager;


pub use blob_lease_lock_manager::{
    BlobLeaseConfig, BlobLeaseLockManager, DEFAULT_HOST_CONTAINER, OWNER_METADATA_KEY,
    lock_blob_name,
};
pub use blob_lease_store::{
    BlobLeaseProperties, BlobLeaseState, BlobLeaseStatus, BlobLeaseStore, BlobStoreError,
    BlobStoreResult, CONTAINER_BEING_DELETED,
};
pub use http_blob_lease_store::HttpBlobLeaseStore;
pub use in_memory_blob_lease_store::{BlobOperation, InMemoryBlobLeaseStore};
pub use lock_manager_factory::{LockBackendConfig, build_lock_manager};
pub use redis_lock_manager::{DEFAULT_REDIS_KEY_PREFIX, RedisLockConfig, RedisLockManager};
pub use retry::RetryPolicy;
pub use sidecar_lock_manager::{SidecarConfig, SidecarLockManager, request_uri};
