use std::env;
use std::time::Duration;

use primacy_application::PrimaryCoordinatorConfig;
use primacy_core::{AppError, AppResult};
use primacy_infrastructure::{
    BlobLeaseConfig, DEFAULT_HOST_CONTAINER, DEFAULT_REDIS_KEY_PREFIX, LockBackendConfig,
    RedisLockConfig, RetryPolicy, SidecarConfig,
};
use url::Url;

#[derive(Debug, Clone)]
pub(crate) struct WorkerConfig {
    pub(crate) backend: LockBackendConfig,
    pub(crate) host_id: String,
    pub(crate) instance_id: String,
    pub(crate) namespace: String,
    pub(crate) lease_period: Duration,
    pub(crate) acquire_interval: Duration,
    pub(crate) renewal_fraction: f64,
    pub(crate) lease_safety_margin: Duration,
    pub(crate) singleton_tick: Duration,
}

impl WorkerConfig {
    pub(crate) fn load() -> AppResult<Self> {
        Self::from_lookup(&|name| env::var(name).ok())
    }

    fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> AppResult<Self> {
        let host_id = required_env(lookup, "PRIMACY_HOST_ID")?;
        let instance_id = optional_env(lookup, "PRIMACY_INSTANCE_ID")
            .unwrap_or_else(|| format!("instance-{}", std::process::id()));
        let namespace =
            optional_env(lookup, "PRIMACY_LOCK_NAMESPACE").unwrap_or_else(|| "host".to_owned());
        let lease_seconds = parse_env_u64(lookup, "PRIMACY_LEASE_SECONDS", 15)?;
        let acquire_interval_ms = parse_env_u64(lookup, "PRIMACY_ACQUIRE_INTERVAL_MS", 5000)?;
        let renewal_fraction = parse_env_f64(lookup, "PRIMACY_RENEWAL_FRACTION", 0.333)?;
        let safety_margin_ms = parse_env_u64(lookup, "PRIMACY_LEASE_SAFETY_MARGIN_MS", 2000)?;
        let singleton_tick_ms = parse_env_u64(lookup, "PRIMACY_SINGLETON_TICK_MS", 10_000)?;
        let retry_attempts = parse_env_u8(lookup, "PRIMACY_RETRY_ATTEMPTS", 3)?;
        let retry_delay_ms = parse_env_u64(lookup, "PRIMACY_RETRY_DELAY_MS", 500)?;

        for (name, value) in [
            ("PRIMACY_LEASE_SECONDS", lease_seconds),
            ("PRIMACY_ACQUIRE_INTERVAL_MS", acquire_interval_ms),
            ("PRIMACY_SINGLETON_TICK_MS", singleton_tick_ms),
            ("PRIMACY_RETRY_ATTEMPTS", u64::from(retry_attempts)),
        ] {
            if value == 0 {
                return Err(AppError::Validation(format!(
                    "{name} must be greater than zero"
                )));
            }
        }

        if !(renewal_fraction > 0.0 && renewal_fraction < 1.0) {
            return Err(AppError::Validation(format!(
                "PRIMACY_RENEWAL_FRACTION must be between 0 and 1, got {renewal_fraction}"
            )));
        }

        let retry = RetryPolicy::new(retry_attempts, Duration::from_millis(retry_delay_ms));
        let backend = parse_backend(lookup, instance_id.as_str(), retry)?;

        Ok(Self {
            backend,
            host_id,
            instance_id,
            namespace,
            lease_period: Duration::from_secs(lease_seconds),
            acquire_interval: Duration::from_millis(acquire_interval_ms),
            renewal_fraction,
            lease_safety_margin: Duration::from_millis(safety_margin_ms),
            singleton_tick: Duration::from_millis(singleton_tick_ms),
        })
    }

    /// The host id is the lock id; every instance of one host competes for it.
    pub(crate) fn coordinator_config(&self) -> PrimaryCoordinatorConfig {
        let mut config = PrimaryCoordinatorConfig::new(
            self.namespace.as_str(),
            self.host_id.as_str(),
            self.instance_id.as_str(),
        );
        config.lease_period = self.lease_period;
        config.acquire_interval = self.acquire_interval;
        config.renewal_fraction = self.renewal_fraction;
        config.lease_safety_margin = self.lease_safety_margin;
        config
    }
}

fn parse_backend(
    lookup: &dyn Fn(&str) -> Option<String>,
    instance_id: &str,
    retry: RetryPolicy,
) -> AppResult<LockBackendConfig> {
    let backend = optional_env(lookup, "PRIMACY_LOCK_BACKEND")
        .unwrap_or_else(|| "memory".to_owned())
        .to_ascii_lowercase();
    let blob_config = || BlobLeaseConfig {
        container: optional_env(lookup, "PRIMACY_BLOB_CONTAINER")
            .unwrap_or_else(|| DEFAULT_HOST_CONTAINER.to_owned()),
        retry,
    };

    match backend.as_str() {
        "memory" => Ok(LockBackendConfig::InMemory(blob_config())),
        "blob" => Ok(LockBackendConfig::BlobLease {
            account_url: parse_env_url(lookup, "PRIMACY_BLOB_ACCOUNT_URL")?,
            sas_token: optional_env(lookup, "PRIMACY_BLOB_SAS_TOKEN"),
            config: blob_config(),
        }),
        "sidecar" => {
            let mut config = SidecarConfig::new(parse_env_url(lookup, "PRIMACY_LEADER_ENDPOINT")?);
            config.instance_id = Some(instance_id.to_owned());
            config.retry = retry;
            Ok(LockBackendConfig::Sidecar(config))
        }
        "redis" => Ok(LockBackendConfig::Redis {
            url: required_env(lookup, "PRIMACY_REDIS_URL")?,
            config: RedisLockConfig {
                key_prefix: optional_env(lookup, "PRIMACY_REDIS_KEY_PREFIX")
                    .unwrap_or_else(|| DEFAULT_REDIS_KEY_PREFIX.to_owned()),
                retry,
            },
        }),
        other => Err(AppError::Validation(format!(
            "invalid PRIMACY_LOCK_BACKEND value '{other}': expected blob, sidecar, redis or memory"
        ))),
    }
}

fn optional_env(lookup: &dyn Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn required_env(lookup: &dyn Fn(&str) -> Option<String>, name: &str) -> AppResult<String> {
    optional_env(lookup, name).ok_or_else(|| AppError::Validation(format!("{name} is required")))
}

fn parse_env_url(lookup: &dyn Fn(&str) -> Option<String>, name: &str) -> AppResult<Url> {
    let value = required_env(lookup, name)?;
    Url::parse(value.as_str())
        .map_err(|error| AppError::Validation(format!("invalid {name} value '{value}': {error}")))
}

fn parse_env_u8(lookup: &dyn Fn(&str) -> Option<String>, name: &str, default: u8) -> AppResult<u8> {
    match optional_env(lookup, name) {
        Some(value) => value.parse::<u8>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        None => Ok(default),
    }
}

fn parse_env_u64(
    lookup: &dyn Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
) -> AppResult<u64> {
    match optional_env(lookup, name) {
        Some(value) => value.parse::<u64>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        None => Ok(default),
    }
}

fn parse_env_f64(
    lookup: &dyn Fn(&str) -> Option<String>,
    name: &str,
    default: f64,
) -> AppResult<f64> {
    match optional_env(lookup, name) {
        Some(value) => value.parse::<f64>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        None => Ok(default),
    }
}
