use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use super::{metadata_key, with_payload, SecretsManager, METADATA_CACHE_TTL_SECS};
use crate::engine::{password, pki};
use crate::errors::{AppError, Result};
use crate::metrics::recorder;
use crate::models::group::DEFAULT_GROUP_ID;
use crate::models::pagination::Window;
use crate::models::patch;
use crate::models::prototype::{
    MaterialPrototype, SecretMetadataPatch, SecretPrototype, SecretVersionPrototype,
    VersionMetadataPatch,
};
use crate::models::rotation::{RotationPolicy, RotationTracker};
use crate::models::secret::{
    SecretKind, SecretMetadata, SecretPayload, SecretRecord, SecretState, SecretType,
};
use crate::models::ttl::Ttl;
use crate::models::version::{SecretVersion, VersionMetadata, VersionSelector};
use crate::notification::webhook::EventType;
use crate::store::SecretFilter;

impl SecretsManager {
    // ── Secrets ──────────────────────────────────────────────

    pub async fn create_secret(&self, proto: SecretPrototype) -> Result<Value> {
        let now = Utc::now();
        proto.validate(now)?;

        let group_id = proto
            .secret_group_id
            .clone()
            .unwrap_or_else(|| DEFAULT_GROUP_ID.to_string());
        // the group cannot be deleted until the secret is stored
        let _groups = self.group_lock.read().await;
        if self.repo.get_group(&group_id).await?.is_none() {
            return Err(AppError::validation(format!(
                "secret_group_id '{group_id}' does not exist"
            )));
        }

        let (kind, payload) = self.initial_material(proto.material, now).await?;
        let expiration_date = certificate_expiry(&kind).or(proto.expiration_date);
        let version_expiry = version_expiry(&kind, expiration_date);
        let metadata = SecretMetadata {
            id: Uuid::new_v4(),
            name: proto.name,
            description: proto.description,
            secret_group_id: group_id,
            labels: proto.labels,
            custom_metadata: proto.custom_metadata,
            state: SecretState::Active,
            created_at: now,
            updated_at: now,
            expiration_date,
            rotation: proto.rotation,
            next_rotation_date: None,
            last_rotation_error: None,
            versions_total: 0,
            locks_total: 0,
            downloaded: false,
            kind,
        };
        let version = SecretVersion::new(
            self.seal(&payload)?,
            now,
            false,
            proto.version_custom_metadata,
            version_expiry,
        );
        let mut record = SecretRecord {
            rotation: RotationTracker::new(metadata.rotation.as_ref(), now),
            metadata,
            versions: vec![version],
            revision: 0,
        };
        record.refresh();
        self.repo.insert_secret(&record).await?;

        let secret_type = record.secret_type();
        recorder().secret_operation("create", secret_type.as_str());
        info!(
            secret_id = %record.id(),
            secret_type = %secret_type,
            group = %record.metadata.secret_group_id,
            "secret created"
        );
        self.emit(
            EventType::SecretCreated,
            &record.metadata,
            json!({ "version_id": record.versions[0].id }),
        )
        .await;

        with_payload(record.metadata.to_json()?, Some(&payload))
    }

    /// Type-specific metadata and payload of a first version.
    async fn initial_material(
        &self,
        material: MaterialPrototype,
        now: DateTime<Utc>,
    ) -> Result<(SecretKind, SecretPayload)> {
        Ok(match material {
            MaterialPrototype::Arbitrary { payload } => {
                (SecretKind::Arbitrary, SecretPayload::Arbitrary { payload })
            }
            MaterialPrototype::Kv { data } => (SecretKind::Kv, SecretPayload::Kv { data }),
            MaterialPrototype::UsernamePassword {
                username,
                password,
                password_generation_policy,
            } => {
                let policy = password_generation_policy.unwrap_or_default();
                let password = password.unwrap_or_else(|| password::generate(&policy));
                (
                    SecretKind::UsernamePassword {
                        username: username.clone(),
                        password_generation_policy: policy,
                    },
                    SecretPayload::UsernamePassword { username, password },
                )
            }
            MaterialPrototype::ImportedCert {
                certificate,
                intermediate,
                private_key,
            } => (
                SecretKind::ImportedCert {
                    intermediate_included: intermediate.is_some(),
                    private_key_included: private_key.is_some(),
                },
                SecretPayload::ImportedCert {
                    certificate,
                    intermediate,
                    private_key,
                },
            ),
            MaterialPrototype::IamCredentials {
                configuration,
                service_id,
                access_groups,
                ttl,
                reuse_api_key,
            } => {
                let config = self
                    .engines
                    .iam_configuration(configuration.as_deref())
                    .await?;
                let kind = SecretKind::IamCredentials {
                    configuration: config.name,
                    service_id,
                    access_groups,
                    ttl: ttl.seconds(),
                    reuse_api_key,
                    api_key_id: None,
                    api_key_expires_at: None,
                };
                let generated = self.engines.generate(&kind, true, None, now).await?;
                (generated.kind, generated.payload)
            }
            MaterialPrototype::PrivateCert {
                certificate_template,
                common_name,
                alt_names,
                ttl,
            } => {
                let template = self.engines.template(&certificate_template).await?;
                pki::check_names(&template, &common_name, &alt_names)?;
                let kind = SecretKind::PrivateCert {
                    certificate_template,
                    common_name,
                    alt_names,
                    ttl: pki::effective_ttl(&template, ttl.map(Ttl::seconds)),
                    serial_number: None,
                    issuer: None,
                    not_after: None,
                };
                let generated = self.engines.generate(&kind, true, None, now).await?;
                (generated.kind, generated.payload)
            }
        })
    }

    /// The secret with its current version's payload.
    pub async fn get_secret(&self, id: Uuid) -> Result<Value> {
        let record = self.load(id).await?;
        self.read_current(record).await
    }

    pub async fn get_secret_by_name(
        &self,
        group: &str,
        secret_type: SecretType,
        name: &str,
    ) -> Result<Value> {
        let record = self
            .repo
            .find_secret(group, secret_type, name)
            .await?
            .ok_or_else(|| {
                AppError::not_found(format!(
                    "{secret_type} secret '{name}' in group '{group}'"
                ))
            })?;
        self.read_current(record).await
    }

    async fn read_current(&self, mut record: SecretRecord) -> Result<Value> {
        let index = record.current_index()?;
        let payload = self.open(&record.versions[index])?;
        if payload.is_some() && !record.versions[index].downloaded {
            self.mark_downloaded(record.id(), record.versions[index].id)
                .await;
            record.versions[index].downloaded = true;
            record.refresh();
        }
        recorder().secret_operation("get", record.secret_type().as_str());
        with_payload(record.metadata.to_json()?, payload.as_ref())
    }

    /// Flag a version as downloaded. Failures only cost the flag.
    async fn mark_downloaded(&self, id: Uuid, version_id: Uuid) {
        let _guard = self.guards.acquire(id).await;
        let result: Result<()> = async {
            let mut record = self.load(id).await?;
            match record.versions.iter_mut().find(|v| v.id == version_id) {
                Some(v) if !v.downloaded => v.downloaded = true,
                _ => return Ok(()),
            }
            self.store(&mut record).await
        }
        .await;
        if let Err(e) = result {
            warn!(secret_id = %id, version_id = %version_id, error = %e, "could not record download");
        }
    }

    pub async fn get_metadata(&self, id: Uuid) -> Result<Value> {
        let key = metadata_key(id);
        if let Some(cached) = self.cache.get::<Value>(&key).await {
            return Ok(cached);
        }
        let view = self.load(id).await?.metadata.to_json()?;
        if let Err(e) = self.cache.set(&key, &view, METADATA_CACHE_TTL_SECS).await {
            warn!(secret_id = %id, error = %e, "could not cache secret metadata");
        }
        Ok(view)
    }

    /// Apply a JSON merge-patch to the mutable metadata of a secret.
    pub async fn update_metadata(&self, id: Uuid, merge_patch: &Value) -> Result<Value> {
        let _guard = self.guards.acquire(id).await;
        let mut record = self.load(id).await?;
        let secret_type = record.secret_type();
        let now = Utc::now();

        let current = SecretMetadataPatch::from_metadata(&record.metadata);
        let patched: SecretMetadataPatch = patch::apply(&current, merge_patch)?;
        patched.validate(secret_type)?;
        let mut reactivate = false;
        if patched.expiration_date != current.expiration_date {
            if secret_type == SecretType::PrivateCert {
                return Err(AppError::validation(
                    "the expiration_date of a private_cert secret follows its certificate",
                ));
            }
            if let Some(exp) = patched.expiration_date {
                if exp <= now {
                    return Err(AppError::validation("expiration_date must be in the future"));
                }
            }
            // an expired secret comes back once its expiration is extended
            reactivate = record.metadata.state == SecretState::Deactivated;
        }

        let meta = &mut record.metadata;
        meta.name = patched.name;
        meta.description = patched.description;
        meta.labels = patched.labels;
        meta.custom_metadata = patched.custom_metadata;
        meta.expiration_date = patched.expiration_date;
        if reactivate {
            meta.state = SecretState::Active;
            let from = record.rotation.last_rotated_at.unwrap_or(meta.created_at);
            record.rotation.reschedule(patched.rotation.as_ref(), from);
            meta.rotation = patched.rotation;
        } else if patched.rotation != current.rotation {
            let from = record.rotation.last_rotated_at.unwrap_or(meta.created_at);
            record.rotation.reschedule(patched.rotation.as_ref(), from);
            meta.rotation = patched.rotation;
        }
        match &mut meta.kind {
            SecretKind::UsernamePassword {
                password_generation_policy,
                ..
            } => {
                if let Some(policy) = patched.password_generation_policy {
                    *password_generation_policy = policy;
                }
            }
            SecretKind::IamCredentials { ttl, .. } | SecretKind::PrivateCert { ttl, .. } => {
                if let Some(new_ttl) = patched.ttl {
                    *ttl = new_ttl.seconds();
                }
            }
            _ => {}
        }

        self.persist(&mut record, now).await?;
        recorder().secret_operation("update_metadata", secret_type.as_str());
        info!(secret_id = %id, "secret metadata updated");
        record.metadata.to_json()
    }

    /// Delete a secret and all of its versions. Locked secrets stay.
    pub async fn delete_secret(&self, id: Uuid) -> Result<()> {
        let _guard = self.guards.acquire(id).await;
        let record = self.load(id).await?;
        let locks = record.locks_total();
        if locks > 0 {
            return Err(AppError::locked(format!(
                "secret {id} has {locks} lock(s) attached; remove them before deleting it"
            )));
        }
        if !self.repo.delete_secret(id).await? {
            return Err(AppError::not_found(format!("secret {id}")));
        }
        self.cache.invalidate(&metadata_key(id)).await;

        recorder().secret_operation("delete", record.secret_type().as_str());
        info!(secret_id = %id, "secret deleted");
        self.emit(EventType::SecretDeleted, &record.metadata, json!({}))
            .await;
        Ok(())
    }

    pub async fn list_secrets(
        &self,
        filter: &SecretFilter,
        window: Window,
    ) -> Result<(Vec<SecretMetadata>, u64)> {
        self.repo.list_secrets(filter, window).await
    }

    // ── Versions ─────────────────────────────────────────────

    /// Version metadata, newest first.
    pub async fn list_versions(&self, id: Uuid) -> Result<Vec<VersionMetadata>> {
        let record = self.load(id).await?;
        Ok((0..record.versions.len())
            .rev()
            .filter_map(|i| VersionMetadata::of(&record, i))
            .collect())
    }

    /// A version with its payload, if the payload still exists.
    pub async fn get_version(&self, id: Uuid, selector: VersionSelector) -> Result<Value> {
        let mut record = self.load(id).await?;
        let index = record.resolve(&selector)?;
        let payload = self.open(&record.versions[index])?;
        if payload.is_some() && !record.versions[index].downloaded {
            self.mark_downloaded(id, record.versions[index].id).await;
            record.versions[index].downloaded = true;
        }
        recorder().secret_operation("get_version", record.secret_type().as_str());
        with_payload(version_view(&record, index)?, payload.as_ref())
    }

    pub async fn get_version_metadata(
        &self,
        id: Uuid,
        selector: VersionSelector,
    ) -> Result<VersionMetadata> {
        let record = self.load(id).await?;
        let index = record.resolve(&selector)?;
        version_metadata(&record, index)
    }

    pub async fn update_version_metadata(
        &self,
        id: Uuid,
        selector: VersionSelector,
        merge_patch: &Value,
    ) -> Result<VersionMetadata> {
        let _guard = self.guards.acquire(id).await;
        let mut record = self.load(id).await?;
        let index = record.resolve(&selector)?;
        let current = VersionMetadataPatch {
            version_custom_metadata: record.versions[index].version_custom_metadata.clone(),
        };
        let patched: VersionMetadataPatch = patch::apply(&current, merge_patch)?;
        record.versions[index].version_custom_metadata = patched.version_custom_metadata;
        self.persist(&mut record, Utc::now()).await?;
        version_metadata(&record, index)
    }

    /// Manual rotation: append a new current version. The version that was
    /// `previous` loses its payload, so it must not be locked.
    pub async fn create_version(&self, id: Uuid, proto: SecretVersionPrototype) -> Result<Value> {
        let _guard = self.guards.acquire(id).await;
        let mut record = self.load(id).await?;
        let secret_type = record.secret_type();
        proto.validate(secret_type)?;
        ensure_rotatable(&record)?;
        ensure_previous_unlocked(&record)?;

        let now = Utc::now();
        let started = Instant::now();
        let (kind, payload) = match self.manual_material(&record, &proto, now).await {
            Ok(material) => material,
            Err(e) => {
                recorder().rotation(
                    "manual",
                    secret_type.as_str(),
                    "failure",
                    started.elapsed().as_secs_f64(),
                );
                return Err(e);
            }
        };

        let SecretVersionPrototype {
            custom_metadata,
            version_custom_metadata,
            ..
        } = proto;
        self.append_version(&mut record, kind, &payload, false, version_custom_metadata, now)?;
        if let Some(custom_metadata) = custom_metadata {
            record.metadata.custom_metadata = custom_metadata;
        }
        let policy = record.metadata.rotation.clone();
        record.rotation.complete(None, now, policy.as_ref());
        self.persist(&mut record, now).await?;

        recorder().rotation(
            "manual",
            secret_type.as_str(),
            "success",
            started.elapsed().as_secs_f64(),
        );
        let index = record.current_index()?;
        let version_id = record.versions[index].id;
        info!(secret_id = %id, version_id = %version_id, "secret version created");
        self.emit(
            EventType::SecretRotated,
            &record.metadata,
            json!({ "version_id": version_id, "auto_rotated": false }),
        )
        .await;

        with_payload(version_view(&record, index)?, Some(&payload))
    }

    async fn manual_material(
        &self,
        record: &SecretRecord,
        proto: &SecretVersionPrototype,
        now: DateTime<Utc>,
    ) -> Result<(SecretKind, SecretPayload)> {
        let required = |value: Option<&String>, field: &str| -> Result<String> {
            value
                .cloned()
                .ok_or_else(|| AppError::validation(format!("{field} is required")))
        };
        Ok(match &record.metadata.kind {
            SecretKind::Arbitrary => (
                SecretKind::Arbitrary,
                SecretPayload::Arbitrary {
                    payload: required(proto.payload.as_ref(), "payload")?,
                },
            ),
            SecretKind::Kv => (
                SecretKind::Kv,
                SecretPayload::Kv {
                    data: proto
                        .data
                        .clone()
                        .ok_or_else(|| AppError::validation("data is required"))?,
                },
            ),
            SecretKind::UsernamePassword {
                username,
                password_generation_policy,
            } => (
                record.metadata.kind.clone(),
                SecretPayload::UsernamePassword {
                    username: username.clone(),
                    password: proto
                        .password
                        .clone()
                        .unwrap_or_else(|| password::generate(password_generation_policy)),
                },
            ),
            SecretKind::ImportedCert { .. } => (
                SecretKind::ImportedCert {
                    intermediate_included: proto.intermediate.is_some(),
                    private_key_included: proto.private_key.is_some(),
                },
                SecretPayload::ImportedCert {
                    certificate: required(proto.certificate.as_ref(), "certificate")?,
                    intermediate: proto.intermediate.clone(),
                    private_key: proto.private_key.clone(),
                },
            ),
            kind @ (SecretKind::IamCredentials { .. } | SecretKind::PrivateCert { .. }) => {
                let rotate_keys = proto.rotate_keys.unwrap_or_else(|| {
                    record
                        .metadata
                        .rotation
                        .as_ref()
                        .is_some_and(RotationPolicy::rotate_keys)
                });
                let generated = self.generate_next(record, kind, rotate_keys, now).await?;
                (generated.kind, generated.payload)
            }
        })
    }

    /// Engine-produced material for the next version of `record`.
    pub(crate) async fn generate_next(
        &self,
        record: &SecretRecord,
        kind: &SecretKind,
        rotate_keys: bool,
        now: DateTime<Utc>,
    ) -> Result<crate::engine::Generated> {
        let previous = match record.versions.last() {
            Some(v) => self.open(v)?,
            None => None,
        };
        self.engines
            .generate(kind, rotate_keys, previous.as_ref(), now)
            .await
    }

    /// Push a new current version, destroying the payload of the version
    /// that was `previous`.
    pub(crate) fn append_version(
        &self,
        record: &mut SecretRecord,
        kind: SecretKind,
        payload: &SecretPayload,
        auto_rotated: bool,
        version_custom_metadata: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        // seal before touching the chain so a failure leaves it intact
        let sealed = self.seal(payload)?;
        if let Some(previous) = record.previous_index() {
            record.versions[previous].payload = None;
        }
        if let Some(not_after) = certificate_expiry(&kind) {
            record.metadata.expiration_date = Some(not_after);
        }
        let expiry = version_expiry(&kind, record.metadata.expiration_date);
        record.versions.push(SecretVersion::new(
            sealed,
            now,
            auto_rotated,
            version_custom_metadata,
            expiry,
        ));
        record.metadata.kind = kind;
        Ok(())
    }

    /// Destroy the payload of the current version. The secret becomes
    /// `destroyed` and can no longer be rotated.
    pub async fn delete_version_data(
        &self,
        id: Uuid,
        selector: VersionSelector,
    ) -> Result<VersionMetadata> {
        let _guard = self.guards.acquire(id).await;
        let mut record = self.load(id).await?;
        let secret_type = record.secret_type();
        let index = record.resolve(&selector)?;
        if index != record.current_index()? {
            return Err(AppError::validation(
                "only the data of the current version can be deleted",
            ));
        }
        if !secret_type.supports_version_data_deletion() {
            return Err(AppError::validation(format!(
                "version data of {secret_type} secrets cannot be deleted"
            )));
        }
        let version = &mut record.versions[index];
        if version.is_locked() {
            return Err(AppError::locked(format!(
                "version {} of secret {id} is locked by {:?}",
                version.id,
                version.lock_names()
            )));
        }
        version.payload = None;
        let version_id = version.id;
        let now = Utc::now();
        record.metadata.state = SecretState::Destroyed;
        record.rotation.reschedule(None, now);
        self.persist(&mut record, now).await?;

        recorder().secret_operation("delete_version_data", secret_type.as_str());
        info!(secret_id = %id, version_id = %version_id, "version data deleted");
        self.emit(
            EventType::SecretVersionDataDeleted,
            &record.metadata,
            json!({ "version_id": version_id }),
        )
        .await;
        version_metadata(&record, index)
    }
}

pub(crate) fn ensure_rotatable(record: &SecretRecord) -> Result<()> {
    let state = record.metadata.state;
    if !state.can_rotate() {
        return Err(AppError::validation(format!(
            "secret {} is {} and cannot get new versions",
            record.id(),
            state.as_str()
        )));
    }
    Ok(())
}

/// Creating a version destroys `previous`; refuse while it holds locks.
pub(crate) fn ensure_previous_unlocked(record: &SecretRecord) -> Result<()> {
    if let Some(previous) = record.previous_index() {
        let version = &record.versions[previous];
        if version.is_locked() {
            return Err(AppError::locked(format!(
                "previous version {} of secret {} is locked by {:?}; a new version would destroy it",
                version.id,
                record.id(),
                version.lock_names()
            )));
        }
    }
    Ok(())
}

/// Expiry of a new version: the certificate's end of validity for private
/// certificates, otherwise the secret's expiration date.
fn version_expiry(
    kind: &SecretKind,
    secret_expiration: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match kind {
        SecretKind::PrivateCert { not_after, .. } => not_after.or(secret_expiration),
        SecretKind::IamCredentials {
            api_key_expires_at, ..
        } => match (*api_key_expires_at, secret_expiration) {
            (Some(key), Some(secret)) => Some(key.min(secret)),
            (key, secret) => key.or(secret),
        },
        _ => secret_expiration,
    }
}

/// A private certificate secret expires with its current certificate.
fn certificate_expiry(kind: &SecretKind) -> Option<DateTime<Utc>> {
    match kind {
        SecretKind::PrivateCert { not_after, .. } => *not_after,
        _ => None,
    }
}

fn version_metadata(record: &SecretRecord, index: usize) -> Result<VersionMetadata> {
    VersionMetadata::of(record, index).ok_or_else(|| {
        AppError::not_found(format!("version #{index} of secret {}", record.id()))
    })
}

fn version_view(record: &SecretRecord, index: usize) -> Result<Value> {
    Ok(serde_json::to_value(version_metadata(record, index)?)?)
}
