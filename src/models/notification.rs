use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::validation;
use crate::errors::{AppError, Result};
use crate::vault::SealedPayload;

/// The single notification destination of an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRegistration {
    pub endpoint_url: String,
    pub source_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_description: Option<String>,
    /// HMAC key for payload signatures, sealed like any other secret.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sealed_signing_secret: Option<SealedPayload>,
    pub created_at: DateTime<Utc>,
}

impl NotificationRegistration {
    pub fn to_json(&self) -> Result<Value> {
        let mut value = serde_json::to_value(self)?;
        if let Some(obj) = value.as_object_mut() {
            obj.remove("sealed_signing_secret");
            obj.insert("signed".into(), Value::Bool(self.sealed_signing_secret.is_some()));
        }
        Ok(value)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationRegistrationPrototype {
    pub endpoint_url: String,
    pub source_name: String,
    #[serde(default)]
    pub source_description: Option<String>,
    #[serde(default)]
    pub signing_secret: Option<String>,
}

impl NotificationRegistrationPrototype {
    pub fn validate(&self) -> Result<()> {
        validation::http_url(&self.endpoint_url)?;
        if self.source_name.trim().is_empty() || self.source_name.len() > 256 {
            return Err(AppError::validation(
                "source_name is required and must be at most 256 characters",
            ));
        }
        validation::description(self.source_description.as_deref())?;
        if let Some(secret) = &self.signing_secret {
            if secret.len() < 16 {
                return Err(AppError::validation(
                    "signing_secret must be at least 16 characters",
                ));
            }
        }
        Ok(())
    }
}
