//! The secrets manager service: every operation exposed over HTTP, the CLI
//! and the rotation job goes through [`SecretsManager`].
//!
//! Mutations of one secret are serialized by its writer guard and then
//! persisted with a revision compare-and-swap, which also protects the
//! current/previous swap against writers in other processes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::cache::TieredCache;
use crate::engine::EngineRegistry;
use crate::errors::{AppError, Result};
use crate::models::secret::{SecretMetadata, SecretPayload, SecretRecord};
use crate::models::version::SecretVersion;
use crate::notification::webhook::{EventType, SecretEvent, Target, WebhookNotifier};
use crate::store::Repository;
use crate::vault::VaultCrypto;

pub mod configurations;
pub mod groups;
pub mod guard;
pub mod locks;
pub mod notifications;
pub mod rotation;
pub mod secrets;

pub use guard::WriterGuards;
pub use rotation::RotationReport;

/// How long cached metadata documents live.
const METADATA_CACHE_TTL_SECS: u64 = 30;

/// Default time a rotation may sit in `rotating` before it is retried.
pub const DEFAULT_ROTATION_GRACE_SECS: i64 = 300;

pub struct SecretsManager {
    repo: Arc<dyn Repository>,
    crypto: Arc<VaultCrypto>,
    engines: EngineRegistry,
    guards: WriterGuards,
    cache: TieredCache,
    notifier: WebhookNotifier,
    /// Serializes configuration mutations: quota-checked creation, patches
    /// and the referenced-by checks of delete.
    registry_lock: tokio::sync::Mutex<()>,
    /// Secret creation holds it shared while its group must stay alive;
    /// group mutations hold it exclusively.
    group_lock: tokio::sync::RwLock<()>,
    rotation_grace: chrono::Duration,
}

impl SecretsManager {
    pub fn new(
        repo: Arc<dyn Repository>,
        crypto: Arc<VaultCrypto>,
        cache: TieredCache,
        notifier: WebhookNotifier,
    ) -> Self {
        Self {
            engines: EngineRegistry::new(repo.clone(), crypto.clone()),
            repo,
            crypto,
            guards: WriterGuards::new(),
            cache,
            notifier,
            registry_lock: tokio::sync::Mutex::new(()),
            group_lock: tokio::sync::RwLock::new(()),
            rotation_grace: chrono::Duration::seconds(DEFAULT_ROTATION_GRACE_SECS),
        }
    }

    pub fn with_rotation_grace(mut self, grace: chrono::Duration) -> Self {
        self.rotation_grace = grace;
        self
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repo
    }

    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    // -- shared helpers --

    async fn load(&self, id: Uuid) -> Result<SecretRecord> {
        self.repo
            .get_secret(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("secret {id}")))
    }

    /// Bump the revision and store `record` if nobody else wrote it since
    /// it was read.
    async fn persist(&self, record: &mut SecretRecord, now: DateTime<Utc>) -> Result<()> {
        record.metadata.updated_at = now;
        self.store(record).await
    }

    /// As [`persist`](Self::persist) without touching `updated_at`.
    async fn store(&self, record: &mut SecretRecord) -> Result<()> {
        let expected = record.revision;
        record.revision += 1;
        record.refresh();
        let stored = self.repo.update_secret(record, expected).await;
        self.cache.invalidate(&metadata_key(record.id())).await;
        if stored.is_err() {
            record.revision = expected;
        }
        stored
    }

    fn seal(&self, payload: &SecretPayload) -> Result<crate::vault::SealedPayload> {
        Ok(self.crypto.seal_json(payload)?)
    }

    /// Decrypted payload of a version, `None` once its data was destroyed.
    fn open(&self, version: &SecretVersion) -> Result<Option<SecretPayload>> {
        version
            .payload
            .as_ref()
            .map(|sealed| self.crypto.open_json(sealed).map_err(AppError::from))
            .transpose()
    }

    /// Queue `event` for the registered endpoint, if there is one.
    async fn emit(&self, event_type: EventType, meta: &SecretMetadata, details: Value) {
        let event = SecretEvent::for_secret(event_type, meta, details);
        match self.notification_target().await {
            Ok(Some((target, source_name))) => {
                self.notifier.dispatch(target, SecretEvent { source_name, ..event })
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(
                event_type = event_type.as_str(),
                error = %e,
                "could not load notification registration"
            ),
        }
    }

    async fn notification_target(&self) -> Result<Option<(Target, String)>> {
        let Some(registration) = self.repo.get_registration().await? else {
            return Ok(None);
        };
        let signing_secret = match &registration.sealed_signing_secret {
            Some(sealed) => Some(self.crypto.open_json::<String>(sealed)?),
            None => None,
        };
        Ok(Some((
            Target {
                url: registration.endpoint_url,
                signing_secret,
            },
            registration.source_name,
        )))
    }
}

pub(crate) fn metadata_key(id: Uuid) -> String {
    format!("smgr:secret_metadata:{id}")
}

/// Metadata document merged with the decrypted payload fields.
pub(crate) fn with_payload(mut view: Value, payload: Option<&SecretPayload>) -> Result<Value> {
    if let (Some(obj), Some(payload)) = (view.as_object_mut(), payload) {
        for (k, v) in payload.fields()? {
            obj.insert(k, v);
        }
    }
    Ok(view)
}
