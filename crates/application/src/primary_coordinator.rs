//! Primary-host election on top of a [`DistributedLockManager`].
//!
//! One background task per coordinator either polls for the lock or renews
//! the held lease. The task is the only writer of the coordinator state;
//! readers observe `is_primary` through a `watch` channel that is updated
//! after the state mutex has been released.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use primacy_core::AppResult;
use primacy_domain::{LeadershipPhase, LockHandle, LockTarget};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::lock_ports::DistributedLockManager;

mod config;
mod runner;

pub use config::{DEFAULT_RENEWAL_FRACTION, PrimaryCoordinatorConfig};

/// Elects one primary instance per lock and keeps its lease alive.
pub struct PrimaryCoordinator {
    shared: Arc<CoordinatorShared>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct CoordinatorShared {
    manager: Arc<dyn DistributedLockManager>,
    config: PrimaryCoordinatorConfig,
    target: LockTarget,
    state: Mutex<CoordinatorState>,
    primary: watch::Sender<bool>,
}

struct CoordinatorState {
    phase: LeadershipPhase,
    handle: Option<LockHandle>,
    last_renewal: Option<RenewalRecord>,
}

#[derive(Debug, Clone, Copy)]
struct RenewalRecord {
    /// When the granting request was sent; the backend lease starts no earlier.
    started: Instant,
    completed_at: DateTime<Utc>,
    latency: Duration,
}

impl PrimaryCoordinator {
    /// Validates the config and spawns the election loop on the current runtime.
    pub fn start(
        manager: Arc<dyn DistributedLockManager>,
        config: PrimaryCoordinatorConfig,
    ) -> AppResult<Self> {
        let target = config.validate()?;
        let (primary, _) = watch::channel(false);
        let shared = Arc::new(CoordinatorShared {
            manager,
            config,
            target,
            state: Mutex::new(CoordinatorState {
                phase: LeadershipPhase::Idle,
                handle: None,
                last_renewal: None,
            }),
            primary,
        });

        let cancel = CancellationToken::new();
        let task = tokio::spawn(runner::run(Arc::clone(&shared), cancel.clone()));

        Ok(Self {
            shared,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    /// Returns true while this instance holds the lock.
    #[must_use]
    pub fn is_primary(&self) -> bool {
        *self.shared.primary.borrow()
    }

    /// Subscribes to leadership changes; the channel carries the new state.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shared.primary.subscribe()
    }

    /// Returns the current state machine phase.
    pub async fn phase(&self) -> LeadershipPhase {
        self.shared.state.lock().await.phase
    }

    /// Returns a copy of the handle held while primary.
    pub async fn current_handle(&self) -> Option<LockHandle> {
        self.shared.state.lock().await.handle.clone()
    }

    /// Returns the coordinator settings.
    #[must_use]
    pub fn config(&self) -> &PrimaryCoordinatorConfig {
        &self.shared.config
    }

    /// Stops the loop and releases the lock. Later calls return immediately.
    ///
    /// Waits for the loop to observe cancellation. A backend call already in
    /// flight gets `release_timeout` to settle so a lock granted during
    /// shutdown is still released; the release is bounded by the same timeout.
    pub async fn dispose(&self) {
        self.cancel.cancel();

        let task = self.task.lock().await.take();
        let Some(task) = task else {
            return;
        };

        if let Err(error) = task.await {
            warn!(
                lock_id = %self.shared.target.lock_id(),
                error = %error,
                "primary coordinator loop ended abnormally"
            );
            self.shared.mark_disposed().await;
        }
    }
}

impl Drop for PrimaryCoordinator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl CoordinatorShared {
    fn publish(&self, is_primary: bool) {
        self.primary.send_if_modified(|current| {
            if *current == is_primary {
                return false;
            }

            *current = is_primary;
            true
        });
    }

    async fn mark_disposed(&self) -> Option<LockHandle> {
        let handle = {
            let mut state = self.state.lock().await;
            state.phase = LeadershipPhase::Disposed;
            state.last_renewal = None;
            state.handle.take()
        };

        self.publish(false);
        handle
    }
}
