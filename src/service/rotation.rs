use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::secrets::ensure_previous_unlocked;
use super::SecretsManager;
use crate::errors::{AppError, Result};
use crate::metrics::recorder;
use crate::models::rotation::RotationPolicy;
use crate::models::secret::SecretState;
use crate::notification::webhook::EventType;

/// Outcome of one scheduler tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RotationReport {
    pub rotated: usize,
    pub failed: usize,
    pub skipped: usize,
    pub expired: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduledOutcome {
    Rotated,
    Failed,
    /// Nothing due, already executed, or another writer got there first.
    Skipped,
}

impl SecretsManager {
    /// One scheduler tick: rotate every due secret, then deactivate expired
    /// ones. Safe to run concurrently and to retry.
    pub async fn run_due_rotations(&self, now: DateTime<Utc>) -> Result<RotationReport> {
        let mut report = RotationReport::default();
        for id in self.repo.secrets_due_for_rotation(now).await? {
            match self.rotate_scheduled(id, now).await {
                Ok(ScheduledOutcome::Rotated) => report.rotated += 1,
                Ok(ScheduledOutcome::Failed) => report.failed += 1,
                Ok(ScheduledOutcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    warn!(secret_id = %id, error = %e, "scheduled rotation aborted");
                    report.failed += 1;
                }
            }
        }
        report.expired = self.deactivate_expired(now).await?;
        if report != RotationReport::default() {
            info!(
                rotated = report.rotated,
                failed = report.failed,
                skipped = report.skipped,
                expired = report.expired,
                "rotation tick finished"
            );
        }
        Ok(report)
    }

    /// Execute the due rotation slot of one secret at most once.
    pub async fn rotate_scheduled(&self, id: Uuid, now: DateTime<Utc>) -> Result<ScheduledOutcome> {
        let _guard = self.guards.acquire(id).await;
        let mut record = match self.repo.get_secret(id).await? {
            Some(record) => record,
            None => return Ok(ScheduledOutcome::Skipped),
        };
        let Some(slot) = record.rotation.due_slot(now, self.rotation_grace) else {
            return Ok(ScheduledOutcome::Skipped);
        };
        let policy: Option<RotationPolicy> = record.metadata.rotation.clone();
        let auto = policy.as_ref().is_some_and(|p| p.auto_rotate);
        if !auto || !record.metadata.state.can_rotate() {
            debug!(secret_id = %id, "secret no longer rotates, clearing schedule");
            record.rotation.reschedule(None, now);
            self.store(&mut record).await?;
            return Ok(ScheduledOutcome::Skipped);
        }

        // Claim the slot; a concurrent process that read the same revision
        // loses the compare-and-swap.
        record.rotation.begin(slot, now);
        match self.store(&mut record).await {
            Ok(()) => {}
            Err(AppError::Conflict(_)) => return Ok(ScheduledOutcome::Skipped),
            Err(e) => return Err(e),
        }

        let secret_type = record.secret_type();
        let started = Instant::now();
        let rotate_keys = policy.as_ref().is_some_and(RotationPolicy::rotate_keys);
        let generated = match ensure_previous_unlocked(&record) {
            Ok(()) => {
                let kind = record.metadata.kind.clone();
                self.generate_next(&record, &kind, rotate_keys, now).await
            }
            Err(e) => Err(e),
        };

        let appended = generated.and_then(|generated| {
            self.append_version(
                &mut record,
                generated.kind,
                &generated.payload,
                true,
                Default::default(),
                now,
            )
        });

        let outcome = match appended {
            Ok(()) => {
                record.rotation.complete(Some(slot), now, policy.as_ref());
                self.persist(&mut record, now).await?;
                let version_id = record.versions.last().map(|v| v.id);
                info!(secret_id = %id, slot = %slot, "secret rotated on schedule");
                self.emit(
                    EventType::SecretRotated,
                    &record.metadata,
                    json!({ "version_id": version_id, "auto_rotated": true }),
                )
                .await;
                ScheduledOutcome::Rotated
            }
            Err(e) => {
                let message = e.to_string();
                warn!(secret_id = %id, slot = %slot, error = %message, "scheduled rotation failed");
                record.rotation.fail(slot, message.clone());
                self.store(&mut record).await?;
                self.emit(
                    EventType::SecretRotationFailed,
                    &record.metadata,
                    json!({ "slot": slot, "error": message }),
                )
                .await;
                ScheduledOutcome::Failed
            }
        };

        recorder().rotation(
            "scheduled",
            secret_type.as_str(),
            match outcome {
                ScheduledOutcome::Rotated => "success",
                _ => "failure",
            },
            started.elapsed().as_secs_f64(),
        );
        Ok(outcome)
    }

    /// Deactivate secrets whose expiration date has passed.
    pub async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut expired = 0;
        for id in self.repo.expired_secrets(now).await? {
            let _guard = self.guards.acquire(id).await;
            let Some(mut record) = self.repo.get_secret(id).await? else {
                continue;
            };
            let past = record.metadata.expiration_date.is_some_and(|exp| exp <= now);
            if !past || !record.metadata.state.can_rotate() {
                continue;
            }
            record.metadata.state = SecretState::Deactivated;
            record.rotation.reschedule(None, now);
            match self.persist(&mut record, now).await {
                Ok(()) => {}
                Err(AppError::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }
            expired += 1;
            recorder().secret_operation("expire", record.secret_type().as_str());
            info!(secret_id = %id, "secret expired and was deactivated");
            self.emit(EventType::SecretExpired, &record.metadata, json!({}))
                .await;
        }
        Ok(expired)
    }
}
