//! Application services and ports.

#![forbid(unsafe_code)]

mod lock_ports;
mod primary_coordinator;

pub use lock_ports::{DistributedLockManager, LockAcquisition};
pub use primary_coordinator::{
    DEFAULT_RENEWAL_FRACTION, PrimaryCoordinator, PrimaryCoordinatorConfig,
};
