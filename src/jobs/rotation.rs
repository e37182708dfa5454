//! Background job: scheduled rotation and expiration.
//!
//! Every tick rotates the secrets whose rotation slot is due, deactivates
//! expired secrets and sweeps the local metadata cache. Ticks are
//! idempotent, so overlapping instances are harmless.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time;

use crate::service::{RotationReport, SecretsManager};

/// Spawn the rotation task. Call this once at startup.
pub fn spawn(manager: Arc<SecretsManager>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(every);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = tick(&manager).await {
                tracing::error!("rotation job failed: {:#}", e);
            }
        }
    })
}

/// One pass of the job. Also used by `smgr rotate-due`.
pub async fn tick(manager: &SecretsManager) -> anyhow::Result<RotationReport> {
    let report = manager.run_due_rotations(Utc::now()).await?;
    let evicted = manager.cache().evict_expired();
    if evicted > 0 {
        tracing::debug!(evicted, "evicted expired metadata cache entries");
    }
    Ok(report)
}
