use std::collections::HashSet;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use super::SecretsManager;
use crate::errors::{AppError, Result};
use crate::metrics::recorder;
use crate::models::lock::{
    Lock, LockBulkRequest, LockMode, LockView, SecretLocks, VersionLocks, MAX_LOCKS_PER_SECRET,
};
use crate::models::pagination::Window;
use crate::models::secret::SecretRecord;
use crate::models::validation;
use crate::models::version::VersionSelector;

impl SecretsManager {
    /// Attach locks to one version. Locks that already exist under the same
    /// name are replaced in place, keeping their creation time.
    pub async fn attach_locks(
        &self,
        id: Uuid,
        selector: VersionSelector,
        request: LockBulkRequest,
        mode: Option<LockMode>,
    ) -> Result<SecretLocks> {
        request.validate()?;
        let _guard = self.guards.acquire(id).await;
        let mut record = self.load(id).await?;
        let index = record.resolve(&selector)?;
        let target = &record.versions[index];
        if !target.payload_available() {
            return Err(AppError::validation(format!(
                "version {} of secret {id} has no data left to lock",
                target.id
            )));
        }

        let fresh = request
            .locks
            .iter()
            .filter(|p| !target.locks.iter().any(|l| l.name == p.name))
            .count();
        let total = record.locks_total() + fresh;
        if total > MAX_LOCKS_PER_SECRET {
            return Err(AppError::quota(format!(
                "a secret can hold at most {MAX_LOCKS_PER_SECRET} locks"
            )));
        }

        let now = Utc::now();
        let names: HashSet<String> = request.locks.iter().map(|l| l.name.clone()).collect();
        let version = &mut record.versions[index];
        for proto in request.locks {
            match version.locks.iter_mut().find(|l| l.name == proto.name) {
                Some(existing) => {
                    existing.description = proto.description;
                    existing.attributes = proto.attributes;
                    existing.updated_at = now;
                }
                None => version.locks.push(Lock {
                    name: proto.name,
                    description: proto.description,
                    attributes: proto.attributes,
                    created_at: now,
                    updated_at: now,
                }),
            }
        }

        if let (Some(mode), Some(preceding)) = (mode, index.checked_sub(1)) {
            let before = &mut record.versions[preceding];
            before.locks.retain(|l| !names.contains(&l.name));
            if mode == LockMode::RemovePreviousAndDelete && before.locks.is_empty() {
                before.payload = None;
            }
        }

        self.persist(&mut record, now).await?;
        recorder().locks("attach", names.len());
        info!(secret_id = %id, locks = names.len(), mode = ?mode, "locks attached");
        Ok(summarize(&record))
    }

    /// Remove the named locks (all locks when `names` is empty) from one
    /// version, or from every version when `selector` is `None`.
    pub async fn detach_locks(
        &self,
        id: Uuid,
        selector: Option<VersionSelector>,
        names: &[String],
    ) -> Result<SecretLocks> {
        for name in names {
            validation::lock_name(name)?;
        }
        let _guard = self.guards.acquire(id).await;
        let mut record = self.load(id).await?;
        let indices: Vec<usize> = match selector {
            Some(selector) => vec![record.resolve(&selector)?],
            None => (0..record.versions.len()).collect(),
        };

        let mut removed = 0;
        for index in indices {
            let locks = &mut record.versions[index].locks;
            let before = locks.len();
            if names.is_empty() {
                locks.clear();
            } else {
                locks.retain(|l| !names.contains(&l.name));
            }
            removed += before - locks.len();
        }

        if removed > 0 {
            self.persist(&mut record, Utc::now()).await?;
        }
        recorder().locks("detach", removed);
        info!(secret_id = %id, removed, "locks detached");
        Ok(summarize(&record))
    }

    /// Locks of every version of a secret, oldest version first.
    pub async fn list_secret_locks(
        &self,
        id: Uuid,
        search: Option<&str>,
        window: Window,
    ) -> Result<(Vec<LockView>, u64)> {
        let record = self.load(id).await?;
        let views: Vec<LockView> = record
            .all_locks()
            .filter(|(_, lock)| matches_search(lock, search))
            .map(|(index, lock)| lock_view(&record, index, lock))
            .collect();
        let total = views.len() as u64;
        Ok((window.slice(views), total))
    }

    pub async fn list_version_locks(
        &self,
        id: Uuid,
        selector: VersionSelector,
        search: Option<&str>,
        window: Window,
    ) -> Result<(Vec<LockView>, u64)> {
        let record = self.load(id).await?;
        let index = record.resolve(&selector)?;
        let views: Vec<LockView> = record.versions[index]
            .locks
            .iter()
            .filter(|lock| matches_search(lock, search))
            .map(|lock| lock_view(&record, index, lock))
            .collect();
        let total = views.len() as u64;
        Ok((window.slice(views), total))
    }

    /// Every secret holding at least one lock.
    pub async fn list_locked_secrets(
        &self,
        search: Option<&str>,
        window: Window,
    ) -> Result<(Vec<SecretLocks>, u64)> {
        let (records, total) = self.repo.list_locked_secrets(search, window).await?;
        Ok((records.iter().map(summarize).collect(), total))
    }
}

fn matches_search(lock: &Lock, search: Option<&str>) -> bool {
    search.map_or(true, |term| {
        lock.name.to_lowercase().contains(&term.to_lowercase())
    })
}

fn lock_view(record: &SecretRecord, index: usize, lock: &Lock) -> LockView {
    LockView {
        name: lock.name.clone(),
        description: lock.description.clone(),
        attributes: lock.attributes.clone(),
        created_at: lock.created_at,
        updated_at: lock.updated_at,
        secret_id: record.id(),
        secret_group_id: record.metadata.secret_group_id.clone(),
        secret_version_id: record.versions[index].id,
        secret_version_alias: record.alias_of(index),
    }
}

/// Lock summary of the versions that are locked or still aliased, newest
/// first.
pub(crate) fn summarize(record: &SecretRecord) -> SecretLocks {
    let versions = record
        .versions
        .iter()
        .enumerate()
        .rev()
        .filter(|(i, v)| v.is_locked() || record.alias_of(*i).is_some())
        .map(|(i, v)| VersionLocks {
            version_id: v.id,
            version_alias: record.alias_of(i),
            locks: v.lock_names(),
            payload_available: v.payload_available(),
        })
        .collect();
    SecretLocks {
        secret_id: record.id(),
        secret_group_id: record.metadata.secret_group_id.clone(),
        secret_type: record.secret_type(),
        versions,
    }
}
