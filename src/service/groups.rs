use chrono::Utc;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use super::SecretsManager;
use crate::errors::{AppError, Result};
use crate::models::group::{SecretGroup, SecretGroupPatch, SecretGroupPrototype, MAX_GROUPS};
use crate::models::patch;

impl SecretsManager {
    pub async fn list_groups(&self) -> Result<Vec<SecretGroup>> {
        self.repo.list_groups().await
    }

    pub async fn get_group(&self, id: &str) -> Result<SecretGroup> {
        self.repo
            .get_group(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("secret group '{id}'")))
    }

    pub async fn create_group(&self, proto: SecretGroupPrototype) -> Result<SecretGroup> {
        proto.validate()?;
        let _groups = self.group_lock.write().await;
        if self.repo.list_groups().await?.len() >= MAX_GROUPS {
            return Err(AppError::quota(format!(
                "at most {MAX_GROUPS} secret groups are allowed per instance"
            )));
        }
        let now = Utc::now();
        let group = SecretGroup {
            id: Uuid::new_v4().to_string(),
            name: proto.name,
            description: proto.description,
            created_at: now,
            updated_at: now,
        };
        self.repo.insert_group(&group).await?;
        info!(group_id = %group.id, name = %group.name, "secret group created");
        Ok(group)
    }

    pub async fn update_group(&self, id: &str, merge_patch: &Value) -> Result<SecretGroup> {
        let _groups = self.group_lock.write().await;
        let mut group = self.get_group(id).await?;
        if group.is_default() {
            return Err(AppError::validation("the default secret group cannot be modified"));
        }
        let patched: SecretGroupPatch =
            patch::apply(&SecretGroupPatch::from_group(&group), merge_patch)?;
        patched.validate()?;
        group.name = patched.name;
        group.description = patched.description;
        group.updated_at = Utc::now();
        self.repo.update_group(&group).await?;
        Ok(group)
    }

    /// Groups can only be deleted once they are empty.
    pub async fn delete_group(&self, id: &str) -> Result<()> {
        let _groups = self.group_lock.write().await;
        let group = self.get_group(id).await?;
        if group.is_default() {
            return Err(AppError::validation("the default secret group cannot be deleted"));
        }
        let members = self.repo.count_secrets_in_group(id).await?;
        if members > 0 {
            return Err(AppError::conflict(format!(
                "secret group '{id}' still contains {members} secret(s)"
            )));
        }
        if !self.repo.delete_group(id).await? {
            return Err(AppError::not_found(format!("secret group '{id}'")));
        }
        info!(group_id = %id, "secret group deleted");
        Ok(())
    }
}
