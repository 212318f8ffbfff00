use std::sync::Arc;

use primacy_application::DistributedLockManager;
use primacy_core::{AppError, AppResult};
use tracing::info;
use url::Url;

use crate::blob_lease_lock_manager::{BlobLeaseConfig, BlobLeaseLockManager};
use crate::http_blob_lease_store::HttpBlobLeaseStore;
use crate::in_memory_blob_lease_store::InMemoryBlobLeaseStore;
use crate::redis_lock_manager::{RedisLockConfig, RedisLockManager};
use crate::sidecar_lock_manager::{SidecarConfig, SidecarLockManager};

/// Lock backend selection with its backend-specific settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockBackendConfig {
    /// Object-storage blob leases.
    BlobLease {
        /// Storage account endpoint, for example `https://acct.blob.core.windows.net`.
        account_url: Url,
        /// Shared access signature appended to every request.
        sas_token: Option<String>,
        /// Container and retry settings.
        config: BlobLeaseConfig,
    },
    /// HTTP leader-election sidecar.
    Sidecar(SidecarConfig),
    /// Redis keys with expiry.
    Redis {
        /// Redis connection url.
        url: String,
        /// Key prefix and retry settings.
        config: RedisLockConfig,
    },
    /// Process-local blob lease emulation.
    InMemory(BlobLeaseConfig),
}

impl LockBackendConfig {
    /// Returns the backend name used in configuration and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BlobLease { .. } => "blob",
            Self::Sidecar(_) => "sidecar",
            Self::Redis { .. } => "redis",
            Self::InMemory(_) => "memory",
        }
    }
}

/// Builds the lock manager for one backend configuration.
pub fn build_lock_manager(config: LockBackendConfig) -> AppResult<Arc<dyn DistributedLockManager>> {
    let backend = config.as_str();
    let manager: Arc<dyn DistributedLockManager> = match config {
        LockBackendConfig::BlobLease {
            account_url,
            sas_token,
            config,
        } => {
            let store = HttpBlobLeaseStore::new(reqwest::Client::new(), account_url, sas_token);
            Arc::new(BlobLeaseLockManager::new(Arc::new(store), config))
        }
        LockBackendConfig::Sidecar(config) => {
            Arc::new(SidecarLockManager::new(reqwest::Client::new(), config))
        }
        LockBackendConfig::Redis { url, config } => {
            let client = redis::Client::open(url.as_str()).map_err(|error| {
                AppError::Validation(format!("invalid redis url '{url}': {error}"))
            })?;
            Arc::new(RedisLockManager::new(client, config))
        }
        LockBackendConfig::InMemory(config) => Arc::new(BlobLeaseLockManager::new(
            Arc::new(InMemoryBlobLeaseStore::new()),
            config,
        )),
    };

    info!(backend, "distributed lock manager configured");
    Ok(manager)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use primacy_core::{AppError, AppResult};
    use tokio_util::sync::CancellationToken;

    use super::{LockBackendConfig, build_lock_manager};
    use crate::blob_lease_lock_manager::BlobLeaseConfig;
    use crate::redis_lock_manager::RedisLockConfig;

    #[tokio::test]
    async fn in_memory_backend_grants_locks() -> AppResult<()> {
        let manager = build_lock_manager(LockBackendConfig::InMemory(BlobLeaseConfig::default()))?;

        let outcome = manager
            .try_lock(
                "host",
                "primary",
                "instance-a",
                Duration::from_secs(15),
                &CancellationToken::new(),
            )
            .await?;

        assert!(outcome.is_acquired());
        Ok(())
    }

    #[test]
    fn malformed_redis_url_is_rejected() {
        let result = build_lock_manager(LockBackendConfig::Redis {
            url: "not a redis url".to_owned(),
            config: RedisLockConfig::default(),
        });

        assert!(matches!(result, Err(AppError::Validation(_))));
    }
}
