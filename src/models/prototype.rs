//! Request bodies for creating secrets and versions, and the editable
//! projections that merge-patches are applied to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::rotation::RotationPolicy;
use super::secret::{PasswordPolicy, SecretMetadata, SecretType};
use super::ttl::Ttl;
use super::validation;
use crate::errors::{AppError, Result};

/// Bounds on the lifetime of IAM credentials.
pub const IAM_TTL_MIN: u64 = 60;
pub const IAM_TTL_MAX: u64 = 7_776_000;

#[derive(Debug, Clone, Deserialize)]
pub struct SecretPrototype {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub secret_group_id: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub custom_metadata: Map<String, Value>,
    #[serde(default)]
    pub version_custom_metadata: Map<String, Value>,
    #[serde(default)]
    pub expiration_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rotation: Option<RotationPolicy>,
    #[serde(flatten)]
    pub material: MaterialPrototype,
}

/// Type-specific part of a secret prototype, tagged by `secret_type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "secret_type", rename_all = "snake_case")]
pub enum MaterialPrototype {
    Arbitrary {
        payload: String,
    },
    Kv {
        data: Map<String, Value>,
    },
    UsernamePassword {
        username: String,
        #[serde(default)]
        password: Option<String>,
        #[serde(default)]
        password_generation_policy: Option<PasswordPolicy>,
    },
    ImportedCert {
        certificate: String,
        #[serde(default)]
        intermediate: Option<String>,
        #[serde(default)]
        private_key: Option<String>,
    },
    IamCredentials {
        /// Defaults to the instance's IAM credentials configuration.
        #[serde(default)]
        configuration: Option<String>,
        #[serde(default)]
        service_id: Option<String>,
        #[serde(default)]
        access_groups: Vec<String>,
        ttl: Ttl,
        #[serde(default)]
        reuse_api_key: bool,
    },
    PrivateCert {
        certificate_template: String,
        common_name: String,
        #[serde(default)]
        alt_names: Vec<String>,
        #[serde(default)]
        ttl: Option<Ttl>,
    },
}

impl MaterialPrototype {
    pub fn secret_type(&self) -> SecretType {
        match self {
            MaterialPrototype::Arbitrary { .. } => SecretType::Arbitrary,
            MaterialPrototype::Kv { .. } => SecretType::Kv,
            MaterialPrototype::UsernamePassword { .. } => SecretType::UsernamePassword,
            MaterialPrototype::ImportedCert { .. } => SecretType::ImportedCert,
            MaterialPrototype::IamCredentials { .. } => SecretType::IamCredentials,
            MaterialPrototype::PrivateCert { .. } => SecretType::PrivateCert,
        }
    }
}

impl SecretPrototype {
    pub fn secret_type(&self) -> SecretType {
        self.material.secret_type()
    }

    /// Checks that need no storage access.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<()> {
        validation::secret_name(&self.name)?;
        validation::description(self.description.as_deref())?;
        validation::labels(&self.labels)?;
        if let Some(exp) = self.expiration_date {
            if self.secret_type() == SecretType::PrivateCert {
                return Err(AppError::validation(
                    "the expiration_date of a private_cert secret follows its certificate",
                ));
            }
            if exp <= now {
                return Err(AppError::validation("expiration_date must be in the future"));
            }
        }
        if let Some(policy) = &self.rotation {
            validate_rotation(self.secret_type(), policy)?;
        }

        match &self.material {
            MaterialPrototype::Arbitrary { payload } => {
                if payload.is_empty() {
                    return Err(AppError::validation("payload is required"));
                }
            }
            MaterialPrototype::Kv { data } => {
                if data.is_empty() {
                    return Err(AppError::validation("data must contain at least one key"));
                }
            }
            MaterialPrototype::UsernamePassword {
                username,
                password,
                password_generation_policy,
            } => {
                if username.trim().is_empty() {
                    return Err(AppError::validation("username is required"));
                }
                if matches!(password, Some(p) if p.is_empty()) {
                    return Err(AppError::validation("password must not be empty"));
                }
                if let Some(policy) = password_generation_policy {
                    policy.validate()?;
                }
            }
            MaterialPrototype::ImportedCert {
                certificate,
                intermediate,
                private_key,
            } => {
                require_pem("certificate", certificate, "CERTIFICATE")?;
                if let Some(i) = intermediate {
                    require_pem("intermediate", i, "CERTIFICATE")?;
                }
                if let Some(k) = private_key {
                    require_pem("private_key", k, "PRIVATE KEY")?;
                }
            }
            MaterialPrototype::IamCredentials {
                service_id,
                access_groups,
                ttl,
                ..
            } => {
                if service_id.is_none() && access_groups.is_empty() {
                    return Err(AppError::validation(
                        "either service_id or access_groups is required",
                    ));
                }
                validate_iam_ttl(*ttl)?;
            }
            MaterialPrototype::PrivateCert {
                certificate_template,
                common_name,
                alt_names,
                ..
            } => {
                validation::configuration_name(certificate_template)?;
                if common_name.trim().is_empty() || common_name.len() > 64 {
                    return Err(AppError::validation(
                        "common_name is required and must be at most 64 characters",
                    ));
                }
                for name in alt_names {
                    validation::domain_name(name)?;
                }
            }
        }
        Ok(())
    }
}

pub(crate) fn validate_iam_ttl(ttl: Ttl) -> Result<()> {
    if !(IAM_TTL_MIN..=IAM_TTL_MAX).contains(&ttl.seconds()) {
        return Err(AppError::validation(format!(
            "ttl must be between {IAM_TTL_MIN} and {IAM_TTL_MAX} seconds"
        )));
    }
    Ok(())
}

pub(crate) fn validate_rotation(secret_type: SecretType, policy: &RotationPolicy) -> Result<()> {
    if policy.auto_rotate && !secret_type.supports_auto_rotation() {
        return Err(AppError::validation(format!(
            "secrets of type {secret_type} cannot be rotated automatically"
        )));
    }
    if policy.rotate_keys.is_some() && secret_type != SecretType::PrivateCert {
        return Err(AppError::validation(
            "rotation.rotate_keys applies to private_cert secrets only",
        ));
    }
    policy.validate()
}

fn require_pem(field: &str, value: &str, label: &str) -> Result<()> {
    if !value.contains("-----BEGIN") || !value.contains(label) {
        return Err(AppError::validation(format!(
            "{field} must be PEM encoded ({label})"
        )));
    }
    Ok(())
}

/// Body of `POST /secrets/{id}/versions`. Which fields are required depends
/// on the secret type; generated types accept an empty body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecretVersionPrototype {
    #[serde(default)]
    pub payload: Option<String>,
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub certificate: Option<String>,
    #[serde(default)]
    pub intermediate: Option<String>,
    #[serde(default)]
    pub private_key: Option<String>,
    /// Private certificates: override the policy's `rotate_keys` once.
    #[serde(default)]
    pub rotate_keys: Option<bool>,
    #[serde(default)]
    pub custom_metadata: Option<Map<String, Value>>,
    #[serde(default)]
    pub version_custom_metadata: Map<String, Value>,
}

impl SecretVersionPrototype {
    pub fn validate(&self, secret_type: SecretType) -> Result<()> {
        let supplied = |present: bool, field: &str| -> Result<()> {
            if present {
                Err(AppError::validation(format!(
                    "{field} cannot be set for {secret_type} secrets"
                )))
            } else {
                Ok(())
            }
        };
        match secret_type {
            SecretType::Arbitrary => {
                if self.payload.as_deref().map_or(true, str::is_empty) {
                    return Err(AppError::validation("payload is required"));
                }
            }
            SecretType::Kv => {
                if self.data.as_ref().map_or(true, Map::is_empty) {
                    return Err(AppError::validation("data must contain at least one key"));
                }
            }
            SecretType::UsernamePassword => {
                if matches!(&self.password, Some(p) if p.is_empty()) {
                    return Err(AppError::validation("password must not be empty"));
                }
            }
            SecretType::ImportedCert => match &self.certificate {
                Some(c) => {
                    require_pem("certificate", c, "CERTIFICATE")?;
                    if let Some(i) = &self.intermediate {
                        require_pem("intermediate", i, "CERTIFICATE")?;
                    }
                    if let Some(k) = &self.private_key {
                        require_pem("private_key", k, "PRIVATE KEY")?;
                    }
                }
                None => return Err(AppError::validation("certificate is required")),
            },
            SecretType::IamCredentials | SecretType::PrivateCert => {
                supplied(self.payload.is_some(), "payload")?;
                supplied(self.certificate.is_some(), "certificate")?;
                supplied(self.password.is_some(), "password")?;
            }
        }
        if self.rotate_keys.is_some() && secret_type != SecretType::PrivateCert {
            return Err(AppError::validation(
                "rotate_keys applies to private_cert secrets only",
            ));
        }
        Ok(())
    }
}

/// The mutable subset of secret metadata. Merge-patches are applied to this
/// projection; anything outside it is rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecretMetadataPatch {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub custom_metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<RotationPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_generation_policy: Option<PasswordPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<Ttl>,
}

impl SecretMetadataPatch {
    pub fn from_metadata(meta: &SecretMetadata) -> Self {
        use super::secret::SecretKind;
        let (password_generation_policy, ttl) = match &meta.kind {
            SecretKind::UsernamePassword {
                password_generation_policy,
                ..
            } => (Some(password_generation_policy.clone()), None),
            SecretKind::IamCredentials { ttl, .. } | SecretKind::PrivateCert { ttl, .. } => {
                (None, Some(Ttl(*ttl)))
            }
            _ => (None, None),
        };
        Self {
            name: meta.name.clone(),
            description: meta.description.clone(),
            labels: meta.labels.clone(),
            custom_metadata: meta.custom_metadata.clone(),
            expiration_date: meta.expiration_date,
            rotation: meta.rotation.clone(),
            password_generation_policy,
            ttl,
        }
    }

    pub fn validate(&self, secret_type: SecretType) -> Result<()> {
        validation::secret_name(&self.name)?;
        validation::description(self.description.as_deref())?;
        validation::labels(&self.labels)?;
        if let Some(policy) = &self.rotation {
            validate_rotation(secret_type, policy)?;
        }
        if let Some(policy) = &self.password_generation_policy {
            if secret_type != SecretType::UsernamePassword {
                return Err(AppError::validation(
                    "password_generation_policy applies to username_password secrets only",
                ));
            }
            policy.validate()?;
        }
        if let Some(ttl) = self.ttl {
            match secret_type {
                SecretType::IamCredentials => validate_iam_ttl(ttl)?,
                SecretType::PrivateCert => {}
                other => {
                    return Err(AppError::validation(format!(
                        "ttl cannot be set for {other} secrets"
                    )))
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VersionMetadataPatch {
    #[serde(default)]
    pub version_custom_metadata: Map<String, Value>,
}
