use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::lock::Lock;
use super::secret::{SecretRecord, SecretType};
use crate::errors::AppError;
use crate::vault::SealedPayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionAlias {
    Current,
    Previous,
}

impl VersionAlias {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionAlias::Current => "current",
            VersionAlias::Previous => "previous",
        }
    }
}

/// Path selector for a version: an alias or a concrete version id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSelector {
    Alias(VersionAlias),
    Id(Uuid),
}

impl VersionSelector {
    pub const CURRENT: VersionSelector = VersionSelector::Alias(VersionAlias::Current);
}

impl FromStr for VersionSelector {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "current" => Ok(VersionSelector::Alias(VersionAlias::Current)),
            "previous" => Ok(VersionSelector::Alias(VersionAlias::Previous)),
            other => Uuid::parse_str(other).map(VersionSelector::Id).map_err(|_| {
                AppError::validation(format!(
                    "version id must be a UUID, 'current' or 'previous', got '{other}'"
                ))
            }),
        }
    }
}

impl fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSelector::Alias(a) => f.write_str(a.as_str()),
            VersionSelector::Id(id) => write!(f, "{id}"),
        }
    }
}

/// One link of a secret's version chain. `payload` is `None` once the
/// version data has been destroyed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretVersion {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub auto_rotated: bool,
    #[serde(default)]
    pub payload: Option<SealedPayload>,
    #[serde(default)]
    pub version_custom_metadata: Map<String, Value>,
    #[serde(default)]
    pub expiration_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub downloaded: bool,
    #[serde(default)]
    pub locks: Vec<Lock>,
}

impl SecretVersion {
    pub fn new(
        payload: SealedPayload,
        created_at: DateTime<Utc>,
        auto_rotated: bool,
        version_custom_metadata: Map<String, Value>,
        expiration_date: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at,
            auto_rotated,
            payload: Some(payload),
            version_custom_metadata,
            expiration_date,
            downloaded: false,
            locks: Vec::new(),
        }
    }

    pub fn payload_available(&self) -> bool {
        self.payload.is_some()
    }

    pub fn is_locked(&self) -> bool {
        !self.locks.is_empty()
    }

    pub fn lock_names(&self) -> Vec<String> {
        self.locks.iter().map(|l| l.name.clone()).collect()
    }
}

/// API view of a version without its payload.
#[derive(Debug, Clone, Serialize)]
pub struct VersionMetadata {
    pub id: Uuid,
    pub secret_id: Uuid,
    pub secret_name: String,
    pub secret_type: SecretType,
    pub secret_group_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<VersionAlias>,
    pub created_at: DateTime<Utc>,
    pub auto_rotated: bool,
    pub payload_available: bool,
    pub downloaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<DateTime<Utc>>,
    pub version_custom_metadata: Map<String, Value>,
    pub locks_total: usize,
}

impl VersionMetadata {
    pub fn of(record: &SecretRecord, index: usize) -> Option<Self> {
        let v = record.versions.get(index)?;
        Some(Self {
            id: v.id,
            secret_id: record.id(),
            secret_name: record.metadata.name.clone(),
            secret_type: record.secret_type(),
            secret_group_id: record.metadata.secret_group_id.clone(),
            alias: record.alias_of(index),
            created_at: v.created_at,
            auto_rotated: v.auto_rotated,
            payload_available: v.payload_available(),
            downloaded: v.downloaded,
            expiration_date: v.expiration_date,
            version_custom_metadata: v.version_custom_metadata.clone(),
            locks_total: v.locks.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_parsing() {
        assert_eq!(
            "current".parse::<VersionSelector>().unwrap(),
            VersionSelector::CURRENT
        );
        assert_eq!(
            "previous".parse::<VersionSelector>().unwrap(),
            VersionSelector::Alias(VersionAlias::Previous)
        );
        let id = Uuid::new_v4();
        assert_eq!(
            id.to_string().parse::<VersionSelector>().unwrap(),
            VersionSelector::Id(id)
        );
        assert!("latest".parse::<VersionSelector>().is_err());
    }
}
