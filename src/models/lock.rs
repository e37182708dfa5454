use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::validation;
use super::version::VersionAlias;
use crate::errors::{AppError, Result};

/// Upper bound on locks across all versions of one secret.
pub const MAX_LOCKS_PER_SECRET: usize = 1000;

/// A named guard on one secret version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lock {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LockPrototype {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl LockPrototype {
    pub fn validate(&self) -> Result<()> {
        validation::lock_name(&self.name)?;
        validation::description(self.description.as_deref())
    }
}

/// Body of a `locks_bulk` create request.
#[derive(Debug, Clone, Deserialize)]
pub struct LockBulkRequest {
    pub locks: Vec<LockPrototype>,
}

impl LockBulkRequest {
    pub fn validate(&self) -> Result<()> {
        if self.locks.is_empty() {
            return Err(AppError::validation("locks must contain at least one lock"));
        }
        let mut seen = std::collections::HashSet::new();
        for lock in &self.locks {
            lock.validate()?;
            if !seen.insert(lock.name.as_str()) {
                return Err(AppError::validation(format!(
                    "lock '{}' appears more than once in the request",
                    lock.name
                )));
            }
        }
        Ok(())
    }
}

/// How a bulk attach treats the version preceding the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    /// Remove same-named locks from the preceding version.
    RemovePrevious,
    /// As `RemovePrevious`, then destroy the preceding version's payload if
    /// it has no locks left.
    RemovePreviousAndDelete,
}

impl FromStr for LockMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "remove_previous" => Ok(LockMode::RemovePrevious),
            "remove_previous_and_delete" => Ok(LockMode::RemovePreviousAndDelete),
            other => Err(AppError::validation(format!(
                "mode must be remove_previous or remove_previous_and_delete, got '{other}'"
            ))),
        }
    }
}

/// API view of a lock with its owning version.
#[derive(Debug, Clone, Serialize)]
pub struct LockView {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub attributes: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub secret_id: Uuid,
    pub secret_group_id: String,
    pub secret_version_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_version_alias: Option<VersionAlias>,
}

/// Per-version lock summary returned by bulk lock operations.
#[derive(Debug, Clone, Serialize)]
pub struct VersionLocks {
    pub version_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_alias: Option<VersionAlias>,
    pub locks: Vec<String>,
    pub payload_available: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SecretLocks {
    pub secret_id: Uuid,
    pub secret_group_id: String,
    pub secret_type: super::secret::SecretType,
    pub versions: Vec<VersionLocks>,
}
