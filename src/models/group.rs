use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::validation;
use crate::errors::Result;

/// The group every instance starts with; it cannot be renamed or deleted.
pub const DEFAULT_GROUP_ID: &str = "default";
pub const MAX_GROUPS: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretGroup {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SecretGroup {
    pub fn default_group(now: DateTime<Utc>) -> Self {
        Self {
            id: DEFAULT_GROUP_ID.into(),
            name: "default".into(),
            description: Some("Secrets that are not assigned to a group".into()),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_default(&self) -> bool {
        self.id == DEFAULT_GROUP_ID
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecretGroupPrototype {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl SecretGroupPrototype {
    pub fn validate(&self) -> Result<()> {
        validation::group_name(&self.name)?;
        validation::description(self.description.as_deref())
    }
}

/// Fields accepted by a group merge-patch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecretGroupPatch {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl SecretGroupPatch {
    pub fn from_group(group: &SecretGroup) -> Self {
        Self {
            name: group.name.clone(),
            description: group.description.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validation::group_name(&self.name)?;
        validation::description(self.description.as_deref())
    }
}
