use std::time::Duration;

use primacy_core::{AppError, AppResult};

/// Inclusive range of lease periods a backend accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeasePeriodBounds {
    min: Duration,
    max: Duration,
}

impl LeasePeriodBounds {
    /// Lease range enforced by blob storage leases.
    pub const BLOB_STORAGE: Self = Self {
        min: Duration::from_secs(15),
        max: Duration::from_secs(60),
    };

    /// Creates bounds, rejecting empty or inverted ranges.
    pub fn new(min: Duration, max: Duration) -> AppResult<Self> {
        if min.is_zero() || min > max {
            return Err(AppError::Validation(format!(
                "invalid lease period bounds {}s..={}s",
                min.as_secs_f64(),
                max.as_secs_f64()
            )));
        }

        Ok(Self { min, max })
    }

    /// Returns the lower bound.
    #[must_use]
    pub fn min(&self) -> Duration {
        self.min
    }

    /// Returns the upper bound.
    #[must_use]
    pub fn max(&self) -> Duration {
        self.max
    }

    /// Validates a proposed period and clamps it into range, rounding to whole seconds.
    pub fn bound(&self, proposed: Duration) -> AppResult<Duration> {
        if proposed.is_zero() {
            return Err(AppError::Validation(
                "proposed lease period must be greater than zero".to_owned(),
            ));
        }

        let whole_seconds = Duration::from_secs(proposed.as_secs().max(1));
        Ok(whole_seconds.clamp(self.min, self.max))
    }
}
