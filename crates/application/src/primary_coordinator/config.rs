use std::time::Duration;

use primacy_core::{AppError, AppResult};
use primacy_domain::{LockTarget, validate_owner};

/// Default share of the granted lease period between two renewals.
pub const DEFAULT_RENEWAL_FRACTION: f64 = 1.0 / 3.0;

const DEFAULT_LEASE_PERIOD: Duration = Duration::from_secs(15);
const DEFAULT_ACQUIRE_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_TRANSIENT_RETRY_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_RELEASE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_LEASE_SAFETY_MARGIN: Duration = Duration::from_secs(2);

/// Settings for one primary coordinator.
#[derive(Debug, Clone)]
pub struct PrimaryCoordinatorConfig {
    /// Lock namespace.
    pub namespace: String,
    /// Lock id, usually the logical host id.
    pub lock_id: String,
    /// Identity of this instance.
    pub owner: String,
    /// Lease period proposed to the backend.
    pub lease_period: Duration,
    /// Delay between acquisition attempts while not primary.
    pub acquire_interval: Duration,
    /// Fixed renewal interval; derived from the granted lease when unset.
    pub renewal_interval: Option<Duration>,
    /// Share of the granted lease period between renewals.
    pub renewal_fraction: f64,
    /// Delay before retrying a renewal that failed transiently.
    pub transient_retry_interval: Duration,
    /// Upper bound for the best-effort release on dispose.
    pub release_timeout: Duration,
    /// Time before backend expiry at which a leader that cannot renew steps down.
    pub lease_safety_margin: Duration,
}

impl PrimaryCoordinatorConfig {
    /// Creates a config with default timings.
    #[must_use]
    pub fn new(
        namespace: impl Into<String>,
        lock_id: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            lock_id: lock_id.into(),
            owner: owner.into(),
            lease_period: DEFAULT_LEASE_PERIOD,
            acquire_interval: DEFAULT_ACQUIRE_INTERVAL,
            renewal_interval: None,
            renewal_fraction: DEFAULT_RENEWAL_FRACTION,
            transient_retry_interval: DEFAULT_TRANSIENT_RETRY_INTERVAL,
            release_timeout: DEFAULT_RELEASE_TIMEOUT,
            lease_safety_margin: DEFAULT_LEASE_SAFETY_MARGIN,
        }
    }

    /// Validates identifiers and timings.
    pub fn validate(&self) -> AppResult<LockTarget> {
        let target = LockTarget::new(self.namespace.as_str(), self.lock_id.as_str())?;
        validate_owner(self.owner.as_str())?;

        for (name, value) in [
            ("lease_period", self.lease_period),
            ("acquire_interval", self.acquire_interval),
            ("transient_retry_interval", self.transient_retry_interval),
            ("release_timeout", self.release_timeout),
        ] {
            if value.is_zero() {
                return Err(AppError::Validation(format!(
                    "coordinator {name} must be greater than zero"
                )));
            }
        }

        if let Some(interval) = self.renewal_interval
            && (interval.is_zero() || interval >= self.lease_period)
        {
            return Err(AppError::Validation(
                "coordinator renewal_interval must be positive and shorter than lease_period"
                    .to_owned(),
            ));
        }

        if self.lease_safety_margin >= self.lease_period {
            return Err(AppError::Validation(
                "coordinator lease_safety_margin must be shorter than lease_period".to_owned(),
            ));
        }

        if !(self.renewal_fraction > 0.0 && self.renewal_fraction < 1.0) {
            return Err(AppError::Validation(format!(
                "coordinator renewal_fraction must be within (0, 1), got {}",
                self.renewal_fraction
            )));
        }

        Ok(target)
    }

    /// Returns the renewal cadence for a lease the backend granted.
    #[must_use]
    pub fn renewal_interval_for(&self, granted_lease_period: Duration) -> Duration {
        let interval = self
            .renewal_interval
            .unwrap_or_else(|| granted_lease_period.mul_f64(self.renewal_fraction));

        interval.max(Duration::from_millis(1))
    }

    /// Returns how long after a request started the leader may still claim
    /// the lease it was granted. Never less than half the granted period.
    #[must_use]
    pub fn safe_lease_for(&self, granted_lease_period: Duration) -> Duration {
        granted_lease_period
            .saturating_sub(self.lease_safety_margin)
            .max(granted_lease_period / 2)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use primacy_core::AppError;

    use super::PrimaryCoordinatorConfig;

    #[test]
    fn renewal_defaults_to_a_third_of_the_granted_lease() {
        let config = PrimaryCoordinatorConfig::new("host", "h1", "instance-a");
        assert_eq!(
            config.renewal_interval_for(Duration::from_secs(15)),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn explicit_renewal_interval_wins() {
        let mut config = PrimaryCoordinatorConfig::new("host", "h1", "instance-a");
        config.renewal_interval = Some(Duration::from_secs(3));
        assert_eq!(
            config.renewal_interval_for(Duration::from_secs(60)),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn validate_rejects_empty_owner_and_bad_fraction() {
        let empty_owner = PrimaryCoordinatorConfig::new("host", "h1", " ");
        assert!(matches!(
            empty_owner.validate(),
            Err(AppError::Validation(_))
        ));

        let mut bad_fraction = PrimaryCoordinatorConfig::new("host", "h1", "instance-a");
        bad_fraction.renewal_fraction = 1.0;
        assert!(matches!(
            bad_fraction.validate(),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn safe_lease_leaves_the_margin_before_expiry() {
        let mut config = PrimaryCoordinatorConfig::new("host", "h1", "instance-a");
        assert_eq!(
            config.safe_lease_for(Duration::from_secs(15)),
            Duration::from_secs(13)
        );

        config.lease_safety_margin = Duration::from_secs(20);
        assert_eq!(
            config.safe_lease_for(Duration::from_secs(15)),
            Duration::from_millis(7500)
        );
        assert!(matches!(config.validate(), Err(AppError::Validation(_))));
    }
}
