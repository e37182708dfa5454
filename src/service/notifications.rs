use chrono::Utc;
use serde_json::Value;
use tracing::info;

use super::SecretsManager;
use crate::errors::{AppError, Result};
use crate::metrics::recorder;
use crate::models::notification::{NotificationRegistration, NotificationRegistrationPrototype};
use crate::notification::webhook::SecretEvent;

impl SecretsManager {
    pub async fn register_notifications(
        &self,
        proto: NotificationRegistrationPrototype,
    ) -> Result<Value> {
        proto.validate()?;
        let sealed_signing_secret = match &proto.signing_secret {
            Some(secret) => Some(self.crypto.seal_json(secret)?),
            None => None,
        };
        let registration = NotificationRegistration {
            endpoint_url: proto.endpoint_url,
            source_name: proto.source_name,
            source_description: proto.source_description,
            sealed_signing_secret,
            created_at: Utc::now(),
        };
        self.repo.insert_registration(&registration).await?;
        info!(endpoint = %registration.endpoint_url, "notification destination registered");
        registration.to_json()
    }

    pub async fn get_registration(&self) -> Result<Value> {
        self.repo
            .get_registration()
            .await?
            .ok_or_else(|| AppError::not_found("notification registration"))?
            .to_json()
    }

    pub async fn delete_registration(&self) -> Result<()> {
        if !self.repo.delete_registration().await? {
            return Err(AppError::not_found("notification registration"));
        }
        info!("notification destination removed");
        Ok(())
    }

    /// Deliver a test event synchronously, without retries.
    pub async fn send_test_notification(&self) -> Result<()> {
        let (target, source_name) = self
            .notification_target()
            .await?
            .ok_or_else(|| AppError::not_found("notification registration"))?;
        let event = SecretEvent {
            source_name,
            ..SecretEvent::test()
        };
        let outcome = self.notifier.send_once(&target, &event).await;
        let label = if outcome.is_ok() { "delivered" } else { "failed" };
        recorder().notification(event.event_type.as_str(), label);
        outcome.map_err(|e| AppError::validation(format!("test notification failed: {e}")))
    }
}
