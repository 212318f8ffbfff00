//! Redis-backed distributed lock manager.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use primacy_application::{DistributedLockManager, LockAcquisition};
use primacy_core::{AppError, AppResult};
use primacy_domain::{LockHandle, LockHandleInput, LockResourceName, LockTarget, validate_owner};
use redis::{AsyncCommands, Script};
use tokio_util::sync::CancellationToken;

use crate::retry::{RetryPolicy, retry_transient};

const RELEASE_LOCK_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
else
  return 0
end
"#;

const RENEW_LOCK_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('PEXPIRE', KEYS[1], ARGV[2])
else
  return 0
end
"#;

/// Default prefix for lock keys.
pub const DEFAULT_REDIS_KEY_PREFIX: &str = "primacy:locks";

/// Configuration for [`RedisLockManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisLockConfig {
    /// Prefix prepended to every lock key.
    pub key_prefix: String,
    /// Retry settings for transient connection failures.
    pub retry: RetryPolicy,
}

impl Default for RedisLockConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_REDIS_KEY_PREFIX.to_owned(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Redis implementation of distributed locking.
///
/// A lock is a key holding `{owner}:{uuid}` with a millisecond expiry.
/// Renew and release are compare-and-set scripts on that token.
#[derive(Clone)]
pub struct RedisLockManager {
    client: redis::Client,
    config: RedisLockConfig,
}

impl RedisLockManager {
    /// Creates one lock manager adapter.
    #[must_use]
    pub fn new(client: redis::Client, config: RedisLockConfig) -> Self {
        Self { client, config }
    }

    fn key_for(&self, target: &LockTarget) -> String {
        format!(
            "{}:{}",
            self.config.key_prefix,
            LockResourceName::new(target).path()
        )
    }

    async fn connection(&self) -> AppResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| redis_error("connect to redis", &error))
    }
}

fn lease_millis(lease_period: Duration) -> u64 {
    u64::try_from(lease_period.as_millis())
        .unwrap_or(u64::MAX)
        .max(1)
}

fn owner_from_token(token: &str) -> &str {
    token
        .rsplit_once(':')
        .map_or(token, |(owner, _nonce)| owner)
}

fn redis_error(operation: &str, error: &redis::RedisError) -> AppError {
    let message = format!("failed to {operation}: {error}");
    if error.is_io_error()
        || error.is_timeout()
        || error.is_connection_dropped()
        || error.is_connection_refusal()
    {
        AppError::Transient(message)
    } else {
        AppError::Transport(message)
    }
}

#[async_trait]
impl DistributedLockManager for RedisLockManager {
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
        if proposed_lease_period.is_zero() {
            return Err(AppError::Validation(
                "proposed lease period must be greater than zero".to_owned(),
            ));
        }

        let key = self.key_for(&target);
        let token = format!("{owner}:{}", uuid::Uuid::new_v4());
        let lease_ms = lease_millis(proposed_lease_period);

        let acquired = retry_transient(self.config.retry, cancel, "acquire redis lock", || async {
            let mut connection = self.connection().await?;
            redis::cmd("SET")
                .arg(key.as_str())
                .arg(token.as_str())
                .arg("NX")
                .arg("PX")
                .arg(lease_ms)
                .query_async::<Option<String>>(&mut connection)
                .await
                .map_err(|error| redis_error("acquire redis lock", &error))
        })
        .await?;

        if acquired.is_none() {
            return Ok(LockAcquisition::Conflict);
        }

        let handle = LockHandle::new(LockHandleInput {
            target,
            owner: owner.into(),
            lease_period: Duration::from_millis(lease_ms),
            token,
            acquired_at: Utc::now(),
        })?;
        Ok(LockAcquisition::Acquired(handle))
    }

    async fn renew(&self, handle: &LockHandle, cancel: &CancellationToken) -> AppResult<bool> {
        let key = self.key_for(handle.target());
        let lease_ms = lease_millis(handle.lease_period());

        let renewed = retry_transient(self.config.retry, cancel, "renew redis lock", || async {
            let mut connection = self.connection().await?;
            Script::new(RENEW_LOCK_SCRIPT)
                .key(key.as_str())
                .arg(handle.token())
                .arg(lease_ms)
                .invoke_async::<i32>(&mut connection)
                .await
                .map_err(|error| redis_error("renew redis lock", &error))
        })
        .await?;

        Ok(renewed > 0)
    }

    async fn release(&self, handle: &LockHandle, cancel: &CancellationToken) -> AppResult<()> {
        let key = self.key_for(handle.target());

        retry_transient(self.config.retry, cancel, "release redis lock", || async {
            let mut connection = self.connection().await?;
            Script::new(RELEASE_LOCK_SCRIPT)
                .key(key.as_str())
                .arg(handle.token())
                .invoke_async::<i32>(&mut connection)
                .await
                .map_err(|error| redis_error("release redis lock", &error))
        })
        .await?;

        Ok(())
    }

    async fn get_owner(
        &self,
        namespace: &str,
        lock_id: &str,
        cancel: &CancellationToken,
    ) -> AppResult<Option<String>> {
        let target = LockTarget::new(namespace, lock_id)?;
        let key = self.key_for(&target);

        let token = retry_transient(self.config.retry, cancel, "read redis lock owner", || async {
            let mut connection = self.connection().await?;
            connection
                .get::<_, Option<String>>(key.as_str())
                .await
                .map_err(|error| redis_error("read redis lock owner", &error))
        })
        .await?;

        Ok(token.map(|token| owner_from_token(token.as_str()).to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use primacy_application::DistributedLockManager;
    use primacy_core::AppError;
    use primacy_domain::LockTarget;
    use tokio_util::sync::CancellationToken;

    use super::{RedisLockConfig, RedisLockManager, lease_millis, owner_from_token};

    fn manager() -> RedisLockManager {
        let client =
            redis::Client::open("redis://127.0.0.1:1/").unwrap_or_else(|_| unreachable!());
        RedisLockManager::new(client, RedisLockConfig::default())
    }

    #[test]
    fn keys_use_the_prefix_and_resource_name() {
        let target = LockTarget::new("host", "primary").unwrap_or_else(|_| unreachable!());

        assert_eq!(manager().key_for(&target), "primacy:locks:host/primary");
    }

    #[test]
    fn owner_is_recovered_from_tokens_with_colons() {
        assert_eq!(owner_from_token("host-a:1234"), "host-a");
        assert_eq!(owner_from_token("node:7:uuid"), "node:7");
        assert_eq!(owner_from_token("bare"), "bare");
    }

    #[test]
    fn sub_millisecond_periods_round_up() {
        assert_eq!(lease_millis(Duration::from_micros(10)), 1);
        assert_eq!(lease_millis(Duration::from_secs(15)), 15_000);
    }

    #[tokio::test]
    async fn invalid_arguments_fail_before_connecting() {
        let manager = manager();
        let cancel = CancellationToken::new();

        let empty_lock = manager
            .try_lock("host", "", "a", Duration::from_secs(1), &cancel)
            .await;
        let zero_period = manager
            .try_lock("host", "primary", "a", Duration::ZERO, &cancel)
            .await;
        let empty_owner = manager
            .try_lock("host", "primary", "", Duration::from_secs(1), &cancel)
            .await;

        assert!(matches!(empty_lock, Err(AppError::Validation(_))));
        assert!(matches!(zero_period, Err(AppError::Validation(_))));
        assert!(matches!(empty_owner, Err(AppError::Validation(_))));
    }
}
