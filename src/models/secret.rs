use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::lock::Lock;
use super::rotation::{RotationPolicy, RotationTracker};
use super::version::{SecretVersion, VersionAlias, VersionSelector};
use crate::errors::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretType {
    Arbitrary,
    Kv,
    UsernamePassword,
    ImportedCert,
    IamCredentials,
    PrivateCert,
}

impl SecretType {
    pub const ALL: [SecretType; 6] = [
        SecretType::Arbitrary,
        SecretType::Kv,
        SecretType::UsernamePassword,
        SecretType::ImportedCert,
        SecretType::IamCredentials,
        SecretType::PrivateCert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SecretType::Arbitrary => "arbitrary",
            SecretType::Kv => "kv",
            SecretType::UsernamePassword => "username_password",
            SecretType::ImportedCert => "imported_cert",
            SecretType::IamCredentials => "iam_credentials",
            SecretType::PrivateCert => "private_cert",
        }
    }

    /// Types whose new versions can be produced without caller-supplied
    /// material, and therefore may carry an auto-rotating policy.
    pub fn supports_auto_rotation(&self) -> bool {
        matches!(
            self,
            SecretType::UsernamePassword | SecretType::IamCredentials | SecretType::PrivateCert
        )
    }

    /// Types whose current version data may be destroyed on request.
    pub fn supports_version_data_deletion(&self) -> bool {
        matches!(
            self,
            SecretType::Arbitrary
                | SecretType::Kv
                | SecretType::UsernamePassword
                | SecretType::ImportedCert
        )
    }
}

impl fmt::Display for SecretType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecretType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        SecretType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| AppError::validation(format!("unknown secret_type '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretState {
    PreActivation,
    Active,
    Suspended,
    Deactivated,
    Destroyed,
}

impl SecretState {
    /// Numeric state code carried next to the name in API responses.
    pub fn code(&self) -> u8 {
        match self {
            SecretState::PreActivation => 0,
            SecretState::Active => 1,
            SecretState::Suspended => 2,
            SecretState::Deactivated => 3,
            SecretState::Destroyed => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SecretState::PreActivation => "pre_activation",
            SecretState::Active => "active",
            SecretState::Suspended => "suspended",
            SecretState::Deactivated => "deactivated",
            SecretState::Destroyed => "destroyed",
        }
    }

    pub fn can_rotate(&self) -> bool {
        matches!(
            self,
            SecretState::PreActivation | SecretState::Active | SecretState::Suspended
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordPolicy {
    #[serde(default = "default_password_length")]
    pub length: u16,
    #[serde(default = "yes")]
    pub include_digits: bool,
    #[serde(default = "yes")]
    pub include_symbols: bool,
    #[serde(default = "yes")]
    pub include_uppercase: bool,
}

fn default_password_length() -> u16 {
    32
}

fn yes() -> bool {
    true
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            length: default_password_length(),
            include_digits: true,
            include_symbols: true,
            include_uppercase: true,
        }
    }
}

impl PasswordPolicy {
    pub fn validate(&self) -> Result<()> {
        if !(12..=256).contains(&self.length) {
            return Err(AppError::validation(
                "password_generation_policy.length must be between 12 and 256",
            ));
        }
        Ok(())
    }
}

/// Type-specific metadata, flattened into the secret metadata document
/// under the `secret_type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "secret_type", rename_all = "snake_case")]
pub enum SecretKind {
    Arbitrary,
    Kv,
    UsernamePassword {
        username: String,
        #[serde(default)]
        password_generation_policy: PasswordPolicy,
    },
    ImportedCert {
        intermediate_included: bool,
        private_key_included: bool,
    },
    IamCredentials {
        configuration: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        service_id: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        access_groups: Vec<String>,
        ttl: u64,
        reuse_api_key: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_key_id: Option<String>,
        /// End of the current key's `ttl`; it is not reused past this point.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_key_expires_at: Option<DateTime<Utc>>,
    },
    PrivateCert {
        certificate_template: String,
        common_name: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        alt_names: Vec<String>,
        ttl: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        serial_number: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        issuer: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        not_after: Option<DateTime<Utc>>,
    },
}

impl SecretKind {
    pub fn secret_type(&self) -> SecretType {
        match self {
            SecretKind::Arbitrary => SecretType::Arbitrary,
            SecretKind::Kv => SecretType::Kv,
            SecretKind::UsernamePassword { .. } => SecretType::UsernamePassword,
            SecretKind::ImportedCert { .. } => SecretType::ImportedCert,
            SecretKind::IamCredentials { .. } => SecretType::IamCredentials,
            SecretKind::PrivateCert { .. } => SecretType::PrivateCert,
        }
    }

    /// Name of the configuration this secret is issued from, if any.
    pub fn configuration_ref(&self) -> Option<&str> {
        match self {
            SecretKind::IamCredentials { configuration, .. } => Some(configuration),
            SecretKind::PrivateCert {
                certificate_template,
                ..
            } => Some(certificate_template),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretMetadata {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub secret_group_id: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub custom_metadata: Map<String, Value>,
    pub state: SecretState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<RotationPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_rotation_date: Option<DateTime<Utc>>,
    /// Why the last scheduled rotation failed; cleared once one succeeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_rotation_error: Option<String>,
    #[serde(default)]
    pub versions_total: usize,
    #[serde(default)]
    pub locks_total: usize,
    #[serde(default)]
    pub downloaded: bool,
    #[serde(flatten)]
    pub kind: SecretKind,
}

impl SecretMetadata {
    pub fn secret_type(&self) -> SecretType {
        self.kind.secret_type()
    }

    /// API representation: metadata plus the numeric state code.
    pub fn to_json(&self) -> Result<Value> {
        let mut value = serde_json::to_value(self)?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert("state_code".into(), Value::from(self.state.code()));
        }
        Ok(value)
    }
}

/// Decrypted secret material. Sealed inside each [`SecretVersion`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "secret_type", rename_all = "snake_case")]
pub enum SecretPayload {
    Arbitrary {
        payload: String,
    },
    Kv {
        data: Map<String, Value>,
    },
    UsernamePassword {
        username: String,
        password: String,
    },
    ImportedCert {
        certificate: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        intermediate: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        private_key: Option<String>,
    },
    IamCredentials {
        api_key_id: String,
        api_key: String,
    },
    PrivateCert {
        certificate: String,
        private_key: String,
        issuing_ca: String,
        #[serde(default)]
        ca_chain: Vec<String>,
    },
}

impl SecretPayload {
    pub fn secret_type(&self) -> SecretType {
        match self {
            SecretPayload::Arbitrary { .. } => SecretType::Arbitrary,
            SecretPayload::Kv { .. } => SecretType::Kv,
            SecretPayload::UsernamePassword { .. } => SecretType::UsernamePassword,
            SecretPayload::ImportedCert { .. } => SecretType::ImportedCert,
            SecretPayload::IamCredentials { .. } => SecretType::IamCredentials,
            SecretPayload::PrivateCert { .. } => SecretType::PrivateCert,
        }
    }

    /// Payload fields without the type tag, ready to merge into a response.
    pub fn fields(&self) -> Result<Map<String, Value>> {
        let mut value = serde_json::to_value(self)?;
        let mut map = match value.as_object_mut() {
            Some(obj) => std::mem::take(obj),
            None => Map::new(),
        };
        map.remove("secret_type");
        Ok(map)
    }
}

/// The persisted aggregate: metadata, the version chain (oldest first) with
/// its locks, and rotation bookkeeping. `revision` guards compare-and-swap
/// updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretRecord {
    pub metadata: SecretMetadata,
    pub versions: Vec<SecretVersion>,
    pub rotation: RotationTracker,
    #[serde(default)]
    pub revision: u64,
}

impl SecretRecord {
    pub fn id(&self) -> Uuid {
        self.metadata.id
    }

    pub fn secret_type(&self) -> SecretType {
        self.metadata.secret_type()
    }

    pub fn current_index(&self) -> Result<usize> {
        self.versions
            .len()
            .checked_sub(1)
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("secret {} has no versions", self.id())))
    }

    pub fn previous_index(&self) -> Option<usize> {
        self.versions.len().checked_sub(2)
    }

    pub fn alias_of(&self, index: usize) -> Option<VersionAlias> {
        let len = self.versions.len();
        if index + 1 == len {
            Some(VersionAlias::Current)
        } else if index + 2 == len {
            Some(VersionAlias::Previous)
        } else {
            None
        }
    }

    /// Resolve an alias or version id to an index in the chain.
    pub fn resolve(&self, selector: &VersionSelector) -> Result<usize> {
        let found = match selector {
            VersionSelector::Alias(VersionAlias::Current) => self.versions.len().checked_sub(1),
            VersionSelector::Alias(VersionAlias::Previous) => self.previous_index(),
            VersionSelector::Id(id) => self.versions.iter().position(|v| v.id == *id),
        };
        found.ok_or_else(|| {
            AppError::not_found(format!("version '{}' of secret {}", selector, self.id()))
        })
    }

    pub fn locks_total(&self) -> usize {
        self.versions.iter().map(|v| v.locks.len()).sum()
    }

    pub fn all_locks(&self) -> impl Iterator<Item = (usize, &Lock)> {
        self.versions
            .iter()
            .enumerate()
            .flat_map(|(i, v)| v.locks.iter().map(move |l| (i, l)))
    }

    /// Recompute the derived metadata counters. Call before persisting.
    pub fn refresh(&mut self) {
        self.metadata.versions_total = self.versions.len();
        self.metadata.locks_total = self.locks_total();
        self.metadata.next_rotation_date = self.rotation.next_rotation_date();
        self.metadata.last_rotation_error = self.rotation.last_error.clone();
        self.metadata.downloaded = self.versions.iter().any(|v| v.downloaded);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata(kind: SecretKind) -> SecretMetadata {
        let now = Utc::now();
        SecretMetadata {
            id: Uuid::new_v4(),
            name: "db-password".into(),
            description: None,
            secret_group_id: "default".into(),
            labels: vec![],
            custom_metadata: Map::new(),
            state: SecretState::Active,
            created_at: now,
            updated_at: now,
            expiration_date: None,
            rotation: None,
            next_rotation_date: None,
            last_rotation_error: None,
            versions_total: 1,
            locks_total: 0,
            downloaded: false,
            kind,
        }
    }

    #[test]
    fn test_metadata_flattens_type_tag() {
        let meta = metadata(SecretKind::UsernamePassword {
            username: "admin".into(),
            password_generation_policy: PasswordPolicy::default(),
        });
        let json = meta.to_json().unwrap();
        assert_eq!(json["secret_type"], "username_password");
        assert_eq!(json["username"], "admin");
        assert_eq!(json["state"], "active");
        assert_eq!(json["state_code"], 1);

        let back: SecretMetadata = serde_json::from_value(serde_json::to_value(&meta).unwrap()).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn test_unit_kind_roundtrips_through_flatten() {
        let meta = metadata(SecretKind::Arbitrary);
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["secret_type"], "arbitrary");
        let back: SecretMetadata = serde_json::from_value(value).unwrap();
        assert_eq!(back.secret_type(), SecretType::Arbitrary);
    }

    #[test]
    fn test_payload_fields_drop_tag() {
        let payload = SecretPayload::Kv {
            data: json!({"a": 1}).as_object().unwrap().clone(),
        };
        let fields = payload.fields().unwrap();
        assert!(!fields.contains_key("secret_type"));
        assert_eq!(fields["data"]["a"], 1);
    }

    #[test]
    fn test_secret_type_parse() {
        assert_eq!("kv".parse::<SecretType>().unwrap(), SecretType::Kv);
        assert!("public_cert".parse::<SecretType>().is_err());
        assert!(SecretType::PrivateCert.supports_auto_rotation());
        assert!(!SecretType::Arbitrary.supports_auto_rotation());
        assert!(!SecretType::IamCredentials.supports_version_data_deletion());
    }
}
