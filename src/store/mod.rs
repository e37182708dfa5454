//! Persistence for secrets, groups, configurations and the notification
//! registration.
//!
//! Secrets are stored as whole aggregates ([`SecretRecord`]) guarded by a
//! revision counter: `update_secret` only succeeds when the stored revision
//! still equals the one the caller read.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::{AppError, Result};
use crate::models::configuration::{Configuration, ConfigurationType};
use crate::models::group::SecretGroup;
use crate::models::notification::NotificationRegistration;
use crate::models::pagination::Window;
use crate::models::secret::{SecretMetadata, SecretRecord, SecretType};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    CreatedAt,
    UpdatedAt,
    Name,
    ExpirationDate,
    NextRotationDate,
}

impl SortKey {
    pub fn column(&self) -> &'static str {
        match self {
            SortKey::CreatedAt => "created_at",
            SortKey::UpdatedAt => "updated_at",
            SortKey::Name => "name",
            SortKey::ExpirationDate => "expiration_date",
            SortKey::NextRotationDate => "next_rotation_date",
        }
    }
}

/// `sort=name` or `sort=-created_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Sort {
    pub key: SortKey,
    pub descending: bool,
}

impl FromStr for Sort {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let (descending, field) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let key = match field {
            "created_at" => SortKey::CreatedAt,
            "updated_at" => SortKey::UpdatedAt,
            "name" => SortKey::Name,
            "expiration_date" => SortKey::ExpirationDate,
            "next_rotation_date" => SortKey::NextRotationDate,
            other => {
                return Err(AppError::validation(format!(
                    "cannot sort secrets by '{other}'"
                )))
            }
        };
        Ok(Sort { key, descending })
    }
}

#[derive(Debug, Clone, Default)]
pub struct SecretFilter {
    pub groups: Vec<String>,
    pub secret_types: Vec<SecretType>,
    /// Case-insensitive substring of the name or any label.
    pub search: Option<String>,
    pub match_all_labels: Vec<String>,
    pub sort: Sort,
}

impl SecretFilter {
    /// In-memory evaluation, shared by the memory backend and tests.
    pub fn matches(&self, meta: &SecretMetadata) -> bool {
        if !self.groups.is_empty() && !self.groups.contains(&meta.secret_group_id) {
            return false;
        }
        if !self.secret_types.is_empty() && !self.secret_types.contains(&meta.secret_type()) {
            return false;
        }
        if !self
            .match_all_labels
            .iter()
            .all(|l| meta.labels.contains(l))
        {
            return false;
        }
        match &self.search {
            Some(term) => {
                let term = term.to_lowercase();
                meta.name.to_lowercase().contains(&term)
                    || meta.labels.iter().any(|l| l.to_lowercase().contains(&term))
            }
            None => true,
        }
    }

    pub fn compare(&self, a: &SecretMetadata, b: &SecretMetadata) -> std::cmp::Ordering {
        let ord = match self.sort.key {
            SortKey::CreatedAt => a.created_at.cmp(&b.created_at),
            SortKey::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            SortKey::Name => a.name.cmp(&b.name),
            SortKey::ExpirationDate => a.expiration_date.cmp(&b.expiration_date),
            SortKey::NextRotationDate => a.next_rotation_date.cmp(&b.next_rotation_date),
        }
        .then_with(|| a.id.cmp(&b.id));
        if self.sort.descending {
            ord.reverse()
        } else {
            ord
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigurationFilter {
    pub config_types: Vec<ConfigurationType>,
    pub search: Option<String>,
}

impl ConfigurationFilter {
    pub fn matches(&self, config: &Configuration) -> bool {
        if !self.config_types.is_empty() && !self.config_types.contains(&config.config_type()) {
            return false;
        }
        match &self.search {
            Some(term) => config.name.to_lowercase().contains(&term.to_lowercase()),
            None => true,
        }
    }
}

#[async_trait]
pub trait Repository: Send + Sync {
    async fn ping(&self) -> Result<()>;

    // -- Secret groups --

    async fn list_groups(&self) -> Result<Vec<SecretGroup>>;
    async fn get_group(&self, id: &str) -> Result<Option<SecretGroup>>;
    /// Conflict when the name is taken.
    async fn insert_group(&self, group: &SecretGroup) -> Result<()>;
    async fn update_group(&self, group: &SecretGroup) -> Result<()>;
    async fn delete_group(&self, id: &str) -> Result<bool>;

    // -- Secrets --

    /// Conflict when `(group, type, name)` is taken.
    async fn insert_secret(&self, record: &SecretRecord) -> Result<()>;
    async fn get_secret(&self, id: Uuid) -> Result<Option<SecretRecord>>;
    async fn find_secret(
        &self,
        group: &str,
        secret_type: SecretType,
        name: &str,
    ) -> Result<Option<SecretRecord>>;
    /// Store `record` if the persisted revision equals `expected_revision`.
    /// A stale revision, or a rename onto a taken name, is a Conflict.
    async fn update_secret(&self, record: &SecretRecord, expected_revision: u64) -> Result<()>;
    async fn delete_secret(&self, id: Uuid) -> Result<bool>;
    async fn list_secrets(
        &self,
        filter: &SecretFilter,
        window: Window,
    ) -> Result<(Vec<SecretMetadata>, u64)>;
    /// Secrets holding at least one lock (whose name contains `search`, if
    /// given), oldest first.
    async fn list_locked_secrets(
        &self,
        search: Option<&str>,
        window: Window,
    ) -> Result<(Vec<SecretRecord>, u64)>;
    async fn count_secrets_in_group(&self, group: &str) -> Result<u64>;
    async fn count_secrets_using_configuration(&self, name: &str) -> Result<u64>;
    /// Secrets whose next rotation date is at or before `now`.
    async fn secrets_due_for_rotation(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>>;
    /// Secrets past their expiration date that are not yet deactivated.
    async fn expired_secrets(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>>;

    // -- Configurations --

    /// Conflict when the name is taken.
    async fn insert_configuration(&self, config: &Configuration) -> Result<()>;
    async fn get_configuration(&self, name: &str) -> Result<Option<Configuration>>;
    async fn update_configuration(&self, config: &Configuration) -> Result<()>;
    async fn delete_configuration(&self, name: &str) -> Result<bool>;
    async fn list_configurations(
        &self,
        filter: &ConfigurationFilter,
        window: Window,
    ) -> Result<(Vec<Configuration>, u64)>;
    async fn count_configurations(&self, types: &[ConfigurationType]) -> Result<u64>;
    /// Names of configurations that reference `name` (templates, intermediates).
    async fn configurations_referencing(&self, name: &str) -> Result<Vec<String>>;

    // -- Notification registration --

    async fn get_registration(&self) -> Result<Option<NotificationRegistration>>;
    /// Conflict when a registration exists.
    async fn insert_registration(&self, registration: &NotificationRegistration) -> Result<()>;
    async fn delete_registration(&self) -> Result<bool>;
}
