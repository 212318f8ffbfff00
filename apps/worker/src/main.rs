//! Primacy primary-host coordinator daemon.

#![forbid(unsafe_code)]

mod config;

use primacy_application::PrimaryCoordinator;
use primacy_core::AppError;
use primacy_infrastructure::build_lock_manager;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::WorkerConfig;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::load()?;
    let backend = config.backend.as_str();
    let manager = build_lock_manager(config.backend.clone())?;
    let coordinator = PrimaryCoordinator::start(manager, config.coordinator_config())?;

    info!(
        host_id = %config.host_id,
        instance_id = %config.instance_id,
        namespace = %config.namespace,
        backend,
        lease_seconds = config.lease_period.as_secs(),
        acquire_interval_ms = config.acquire_interval.as_millis(),
        "primacy-worker started"
    );

    let mut leadership = coordinator.subscribe();
    let mut singleton_tick = tokio::time::interval(config.singleton_tick);
    singleton_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut singleton_runs = 0_u64;

    loop {
        tokio::select! {
            signal = &mut shutdown => {
                if let Err(error) = signal {
                    warn!(error = %error, "failed to listen for shutdown signal");
                }
                break;
            }
            changed = leadership.changed() => {
                if changed.is_err() {
                    break;
                }

                let is_primary = *leadership.borrow_and_update();
                info!(
                    host_id = %config.host_id,
                    instance_id = %config.instance_id,
                    is_primary,
                    "host leadership changed"
                );
            }
            _ = singleton_tick.tick() => {
                if coordinator.is_primary() {
                    singleton_runs = singleton_runs.saturating_add(1);
                    info!(
                        host_id = %config.host_id,
                        instance_id = %config.instance_id,
                        run = singleton_runs,
                        "running singleton work as primary host"
                    );
                } else {
                    debug!(
                        host_id = %config.host_id,
                        instance_id = %config.instance_id,
                        "skipping singleton work; another instance is primary"
                    );
                }
            }
        }
    }

    info!(instance_id = %config.instance_id, "primacy-worker shutting down");
    coordinator.dispose().await;
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}
