use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ConfigurationFilter, Repository, SecretFilter};
use crate::errors::{AppError, Result};
use crate::models::configuration::{Configuration, ConfigurationType};
use crate::models::group::SecretGroup;
use crate::models::notification::NotificationRegistration;
use crate::models::pagination::Window;
use crate::models::secret::{SecretMetadata, SecretRecord, SecretState, SecretType};

type NameKey = (String, SecretType, String);

fn name_key(record: &SecretRecord) -> NameKey {
    (
        record.metadata.secret_group_id.clone(),
        record.secret_type(),
        record.metadata.name.clone(),
    )
}

/// Process-local backend. Nothing survives a restart.
pub struct MemoryStore {
    groups: DashMap<String, SecretGroup>,
    secrets: DashMap<Uuid, SecretRecord>,
    names: DashMap<NameKey, Uuid>,
    configurations: DashMap<String, Configuration>,
    registration: RwLock<Option<NotificationRegistration>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let groups = DashMap::new();
        let default = SecretGroup::default_group(Utc::now());
        groups.insert(default.id.clone(), default);
        Self {
            groups,
            secrets: DashMap::new(),
            names: DashMap::new(),
            configurations: DashMap::new(),
            registration: RwLock::new(None),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Repository for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn list_groups(&self) -> Result<Vec<SecretGroup>> {
        let mut groups: Vec<SecretGroup> = self.groups.iter().map(|g| g.value().clone()).collect();
        groups.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(groups)
    }

    async fn get_group(&self, id: &str) -> Result<Option<SecretGroup>> {
        Ok(self.groups.get(id).map(|g| g.value().clone()))
    }

    async fn insert_group(&self, group: &SecretGroup) -> Result<()> {
        if self.groups.iter().any(|g| g.name == group.name) {
            return Err(AppError::conflict(format!(
                "a secret group named '{}' already exists",
                group.name
            )));
        }
        self.groups.insert(group.id.clone(), group.clone());
        Ok(())
    }

    async fn update_group(&self, group: &SecretGroup) -> Result<()> {
        if self
            .groups
            .iter()
            .any(|g| g.name == group.name && g.id != group.id)
        {
            return Err(AppError::conflict(format!(
                "a secret group named '{}' already exists",
                group.name
            )));
        }
        match self.groups.get_mut(&group.id) {
            Some(mut existing) => {
                *existing = group.clone();
                Ok(())
            }
            None => Err(AppError::not_found(format!("secret group {}", group.id))),
        }
    }

    async fn delete_group(&self, id: &str) -> Result<bool> {
        Ok(self.groups.remove(id).is_some())
    }

    async fn insert_secret(&self, record: &SecretRecord) -> Result<()> {
        if !self.groups.contains_key(&record.metadata.secret_group_id) {
            return Err(AppError::conflict(format!(
                "secret group '{}' no longer exists",
                record.metadata.secret_group_id
            )));
        }
        match self.names.entry(name_key(record)) {
            Entry::Occupied(_) => {
                return Err(AppError::conflict(format!(
                    "a {} secret named '{}' already exists in group {}",
                    record.secret_type(),
                    record.metadata.name,
                    record.metadata.secret_group_id
                )))
            }
            Entry::Vacant(slot) => {
                slot.insert(record.id());
            }
        }
        self.secrets.insert(record.id(), record.clone());
        Ok(())
    }

    async fn get_secret(&self, id: Uuid) -> Result<Option<SecretRecord>> {
        Ok(self.secrets.get(&id).map(|r| r.value().clone()))
    }

    async fn find_secret(
        &self,
        group: &str,
        secret_type: SecretType,
        name: &str,
    ) -> Result<Option<SecretRecord>> {
        let id = self
            .names
            .get(&(group.to_string(), secret_type, name.to_string()))
            .map(|e| *e.value());
        match id {
            Some(id) => self.get_secret(id).await,
            None => Ok(None),
        }
    }

    async fn update_secret(&self, record: &SecretRecord, expected_revision: u64) -> Result<()> {
        let mut stored = self
            .secrets
            .get_mut(&record.id())
            .ok_or_else(|| AppError::not_found(format!("secret {}", record.id())))?;
        if stored.revision != expected_revision {
            return Err(AppError::conflict(format!(
                "secret {} was modified concurrently",
                record.id()
            )));
        }

        let old_key = name_key(&stored);
        let new_key = name_key(record);
        if old_key != new_key {
            match self.names.entry(new_key) {
                Entry::Occupied(_) => {
                    return Err(AppError::conflict(format!(
                        "a {} secret named '{}' already exists in group {}",
                        record.secret_type(),
                        record.metadata.name,
                        record.metadata.secret_group_id
                    )))
                }
                Entry::Vacant(slot) => {
                    slot.insert(record.id());
                }
            }
            self.names.remove(&old_key);
        }

        *stored = record.clone();
        Ok(())
    }

    async fn delete_secret(&self, id: Uuid) -> Result<bool> {
        match self.secrets.remove(&id) {
            Some((_, record)) => {
                self.names.remove(&name_key(&record));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_secrets(
        &self,
        filter: &SecretFilter,
        window: Window,
    ) -> Result<(Vec<SecretMetadata>, u64)> {
        let mut matched: Vec<SecretMetadata> = self
            .secrets
            .iter()
            .filter(|r| filter.matches(&r.metadata))
            .map(|r| r.metadata.clone())
            .collect();
        matched.sort_by(|a, b| filter.compare(a, b));
        let total = matched.len() as u64;
        Ok((window.slice(matched), total))
    }

    async fn list_locked_secrets(
        &self,
        search: Option<&str>,
        window: Window,
    ) -> Result<(Vec<SecretRecord>, u64)> {
        let term = search.map(str::to_lowercase);
        let mut matched: Vec<SecretRecord> = self
            .secrets
            .iter()
            .filter(|r| match &term {
                Some(t) => r.all_locks().any(|(_, l)| l.name.to_lowercase().contains(t)),
                None => r.locks_total() > 0,
            })
            .map(|r| r.value().clone())
            .collect();
        matched.sort_by(|a, b| {
            a.metadata
                .created_at
                .cmp(&b.metadata.created_at)
                .then_with(|| a.id().cmp(&b.id()))
        });
        let total = matched.len() as u64;
        Ok((window.slice(matched), total))
    }

    async fn count_secrets_in_group(&self, group: &str) -> Result<u64> {
        Ok(self
            .secrets
            .iter()
            .filter(|r| r.metadata.secret_group_id == group)
            .count() as u64)
    }

    async fn count_secrets_using_configuration(&self, name: &str) -> Result<u64> {
        Ok(self
            .secrets
            .iter()
            .filter(|r| r.metadata.kind.configuration_ref() == Some(name))
            .count() as u64)
    }

    async fn secrets_due_for_rotation(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        Ok(self
            .secrets
            .iter()
            .filter(|r| matches!(r.rotation.next_rotation_date(), Some(next) if next <= now))
            .map(|r| r.id())
            .collect())
    }

    async fn expired_secrets(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        Ok(self
            .secrets
            .iter()
            .filter(|r| {
                matches!(r.metadata.expiration_date, Some(exp) if exp <= now)
                    && !matches!(
                        r.metadata.state,
                        SecretState::Deactivated | SecretState::Destroyed
                    )
            })
            .map(|r| r.id())
            .collect())
    }

    async fn insert_configuration(&self, config: &Configuration) -> Result<()> {
        match self.configurations.entry(config.name.clone()) {
            Entry::Occupied(_) => Err(AppError::conflict(format!(
                "a configuration named '{}' already exists",
                config.name
            ))),
            Entry::Vacant(slot) => {
                slot.insert(config.clone());
                Ok(())
            }
        }
    }

    async fn get_configuration(&self, name: &str) -> Result<Option<Configuration>> {
        Ok(self.configurations.get(name).map(|c| c.value().clone()))
    }

    async fn update_configuration(&self, config: &Configuration) -> Result<()> {
        match self.configurations.get_mut(&config.name) {
            Some(mut existing) => {
                *existing = config.clone();
                Ok(())
            }
            None => Err(AppError::not_found(format!("configuration '{}'", config.name))),
        }
    }

    async fn delete_configuration(&self, name: &str) -> Result<bool> {
        Ok(self.configurations.remove(name).is_some())
    }

    async fn list_configurations(
        &self,
        filter: &ConfigurationFilter,
        window: Window,
    ) -> Result<(Vec<Configuration>, u64)> {
        let mut matched: Vec<Configuration> = self
            .configurations
            .iter()
            .filter(|c| filter.matches(c.value()))
            .map(|c| c.value().clone())
            .collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        let total = matched.len() as u64;
        Ok((window.slice(matched), total))
    }

    async fn count_configurations(&self, types: &[ConfigurationType]) -> Result<u64> {
        Ok(self
            .configurations
            .iter()
            .filter(|c| types.contains(&c.config_type()))
            .count() as u64)
    }

    async fn configurations_referencing(&self, name: &str) -> Result<Vec<String>> {
        Ok(self
            .configurations
            .iter()
            .filter(|c| c.spec.references() == Some(name))
            .map(|c| c.name.clone())
            .collect())
    }

    async fn get_registration(&self) -> Result<Option<NotificationRegistration>> {
        Ok(self.registration.read().await.clone())
    }

    async fn insert_registration(&self, registration: &NotificationRegistration) -> Result<()> {
        let mut slot = self.registration.write().await;
        if slot.is_some() {
            return Err(AppError::conflict("a notification registration already exists"));
        }
        *slot = Some(registration.clone());
        Ok(())
    }

    async fn delete_registration(&self) -> Result<bool> {
        Ok(self.registration.write().await.take().is_some())
    }
}
