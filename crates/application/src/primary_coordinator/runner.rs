use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use primacy_core::{AppError, AppResult};
use primacy_domain::{LeadershipPhase, LockHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{CoordinatorShared, RenewalRecord};
use crate::lock_ports::LockAcquisition;

/// Drives acquisition and renewal until `cancel` fires, then releases.
pub(super) async fn run(shared: Arc<CoordinatorShared>, cancel: CancellationToken) {
    shared.state.lock().await.phase = LeadershipPhase::Acquiring;

    loop {
        let held = shared.state.lock().await.handle.clone();
        let next_delay = match held {
            None => shared.attempt_acquire(&cancel).await,
            Some(handle) => shared.attempt_renew(&handle, &cancel).await,
        };

        let Some(next_delay) = next_delay else {
            break;
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(next_delay) => {}
        }
    }

    shared.shutdown().await;
}

/// Runs one backend call. Once `cancel` fires the call gets `grace` to
/// settle; `None` means it did not.
async fn settle<T>(
    cancel: &CancellationToken,
    grace: Duration,
    call: impl Future<Output = AppResult<T>>,
) -> Option<AppResult<T>> {
    tokio::pin!(call);

    tokio::select! {
        biased;
        result = &mut call => return Some(result),
        _ = cancel.cancelled() => {}
    }

    tokio::time::timeout(grace, call).await.ok()
}

impl CoordinatorShared {
    async fn attempt_acquire(&self, cancel: &CancellationToken) -> Option<Duration> {
        let config = &self.config;
        let started = Instant::now();
        let result = settle(
            cancel,
            config.release_timeout,
            self.manager.try_lock(
                self.target.namespace(),
                self.target.lock_id(),
                config.owner.as_str(),
                config.lease_period,
                cancel,
            ),
        )
        .await?;

        if cancel.is_cancelled() {
            // Granted while shutting down; shutdown releases it.
            if let Ok(LockAcquisition::Acquired(handle)) = result {
                self.state.lock().await.handle = Some(handle);
            }
            return None;
        }

        match result {
            Ok(LockAcquisition::Acquired(handle)) => {
                let renewal_interval = config.renewal_interval_for(handle.lease_period());
                let owner = handle.owner().to_owned();
                let lease_period = handle.lease_period();
                {
                    let mut state = self.state.lock().await;
                    state.phase = LeadershipPhase::Leader;
                    state.handle = Some(handle);
                    state.last_renewal = Some(RenewalRecord {
                        started,
                        completed_at: Utc::now(),
                        latency: started.elapsed(),
                    });
                }

                self.publish(true);
                info!(
                    lock_id = %self.target.lock_id(),
                    owner = %owner,
                    lease_period_ms = lease_period.as_millis(),
                    renewal_interval_ms = renewal_interval.as_millis(),
                    "host lock lease acquired by instance '{owner}'"
                );

                Some(renewal_interval)
            }
            Ok(LockAcquisition::Conflict) => {
                debug!(
                    lock_id = %self.target.lock_id(),
                    owner = %config.owner,
                    "host lock lease is held by another instance"
                );
                Some(config.acquire_interval)
            }
            Err(error) => {
                warn!(
                    lock_id = %self.target.lock_id(),
                    owner = %config.owner,
                    error_kind = error.kind(),
                    error = %error,
                    "host instance '{}' failed to acquire host lock lease",
                    config.owner
                );
                Some(config.acquire_interval)
            }
        }
    }

    async fn attempt_renew(
        &self,
        handle: &LockHandle,
        cancel: &CancellationToken,
    ) -> Option<Duration> {
        let renewal_interval = self.config.renewal_interval_for(handle.lease_period());
        let safe_lease = self.config.safe_lease_for(handle.lease_period());
        let deadline = self
            .state
            .lock()
            .await
            .last_renewal
            .map_or_else(Instant::now, |record| record.started + safe_lease);

        let started = Instant::now();
        let renewal = async {
            tokio::time::timeout_at(deadline, self.manager.renew(handle, cancel))
                .await
                .unwrap_or_else(|_| {
                    Err(AppError::LeaseLost(
                        "the renewal did not complete before the lease deadline".to_owned(),
                    ))
                })
        };
        let result = settle(cancel, self.config.release_timeout, renewal).await?;
        if cancel.is_cancelled() {
            return None;
        }

        match result {
            Ok(true) => {
                let record = RenewalRecord {
                    started,
                    completed_at: Utc::now(),
                    latency: started.elapsed(),
                };
                self.state.lock().await.last_renewal = Some(record);
                debug!(
                    lock_id = %handle.lock_id(),
                    latency_ms = record.latency.as_millis(),
                    "host lock lease renewed"
                );
                Some(renewal_interval)
            }
            Ok(false) => {
                self.lose_lease(handle, "another host has acquired the lease")
                    .await;
                Some(Duration::ZERO)
            }
            Err(error) if error.is_transient() => {
                let retry_delay = self.config.transient_retry_interval.min(renewal_interval);
                // The next attempt is assumed to take as long as this one.
                let next_attempt_done = Instant::now() + retry_delay + started.elapsed();

                if next_attempt_done < deadline {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    warn!(
                        lock_id = %handle.lock_id(),
                        error = %error,
                        deadline_in_ms = remaining.as_millis(),
                        "host lock lease renewal failed transiently; keeping leadership"
                    );
                    Some(retry_delay)
                } else {
                    self.lose_lease(
                        handle,
                        format!(
                            "renewals kept failing and the lease deadline is too close to retry ({error})"
                        )
                        .as_str(),
                    )
                    .await;
                    Some(Duration::ZERO)
                }
            }
            Err(error) => {
                self.lose_lease(handle, error.to_string().as_str()).await;
                Some(Duration::ZERO)
            }
        }
    }

    async fn lose_lease(&self, handle: &LockHandle, reason: &str) {
        let last_renewal = {
            let mut state = self.state.lock().await;
            state.phase = LeadershipPhase::LeaseLost;
            state.handle = None;
            state.last_renewal.take()
        };

        self.publish(false);

        let lease_period_ms = handle.lease_period().as_millis();
        match last_renewal {
            Some(record) => info!(
                lock_id = %handle.lock_id(),
                owner = %handle.owner(),
                "failed to renew host lock lease: {reason}. The last successful renewal completed at {} ({} milliseconds ago) with a duration of {} milliseconds. The lease period was {lease_period_ms} milliseconds.",
                record.completed_at.to_rfc3339_opts(SecondsFormat::Millis, true),
                (record.started + record.latency).elapsed().as_millis(),
                record.latency.as_millis(),
            ),
            None => info!(
                lock_id = %handle.lock_id(),
                owner = %handle.owner(),
                "failed to renew host lock lease: {reason}"
            ),
        }

        self.state.lock().await.phase = LeadershipPhase::Acquiring;
    }

    async fn shutdown(&self) {
        let Some(handle) = self.mark_disposed().await else {
            debug!(lock_id = %self.target.lock_id(), "primary coordinator stopped");
            return;
        };

        let release_token = CancellationToken::new();
        let release = self.manager.release(&handle, &release_token);
        match tokio::time::timeout(self.config.release_timeout, release).await {
            Ok(Ok(())) => info!(
                lock_id = %handle.lock_id(),
                owner = %handle.owner(),
                "host instance '{}' released lock lease",
                handle.owner()
            ),
            Ok(Err(error)) => warn!(
                lock_id = %handle.lock_id(),
                owner = %handle.owner(),
                error = %error,
                "failed to release host lock lease"
            ),
            Err(_) => warn!(
                lock_id = %handle.lock_id(),
                owner = %handle.owner(),
                timeout_ms = self.config.release_timeout.as_millis(),
                "timed out releasing host lock lease"
            ),
        }
    }
}
