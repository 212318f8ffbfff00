//! Domain entities and invariants for distributed locks and leadership.

#![forbid(unsafe_code)]

mod leadership;
mod lease;
mod lock;
mod resource_name;

pub use leadership::LeadershipPhase;
pub use lease::LeasePeriodBounds;
pub use lock::{LockHandle, LockHandleInput, LockTarget, validate_owner};
pub use resource_name::LockResourceName;
