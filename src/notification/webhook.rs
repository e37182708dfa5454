use anyhow::Result;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::models::secret::SecretMetadata;

// ── Event Types ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SecretCreated,
    SecretRotated,
    SecretRotationFailed,
    SecretDeleted,
    SecretExpired,
    SecretVersionDataDeleted,
    TestNotification,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SecretCreated => "secret_created",
            EventType::SecretRotated => "secret_rotated",
            EventType::SecretRotationFailed => "secret_rotation_failed",
            EventType::SecretDeleted => "secret_deleted",
            EventType::SecretExpired => "secret_expired",
            EventType::SecretVersionDataDeleted => "secret_version_data_deleted",
            EventType::TestNotification => "test_notification",
        }
    }
}

/// A lifecycle event POSTed to the registered endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SecretEvent {
    pub event_type: EventType,
    /// RFC 3339 timestamp of when the event occurred.
    pub timestamp: String,
    /// `source_name` of the registration, filled in at dispatch.
    pub source_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_group_id: Option<String>,
    /// Event-specific details (version id, rotation error, ...).
    pub details: serde_json::Value,
}

impl SecretEvent {
    pub fn for_secret(event_type: EventType, meta: &SecretMetadata, details: serde_json::Value) -> Self {
        Self {
            event_type,
            timestamp: chrono::Utc::now().to_rfc3339(),
            source_name: String::new(),
            secret_id: Some(meta.id.to_string()),
            secret_name: Some(meta.name.clone()),
            secret_type: Some(meta.secret_type().to_string()),
            secret_group_id: Some(meta.secret_group_id.clone()),
            details,
        }
    }

    pub fn test() -> Self {
        Self {
            event_type: EventType::TestNotification,
            timestamp: chrono::Utc::now().to_rfc3339(),
            source_name: String::new(),
            secret_id: None,
            secret_name: None,
            secret_type: None,
            secret_group_id: None,
            details: serde_json::json!({ "message": "test notification" }),
        }
    }
}

// ── HMAC Signing ─────────────────────────────────────────────

/// HMAC-SHA256 of `payload` under `secret`, as `sha256=<hex>`.
pub fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("invalid signing key: {e}"))?;
    mac.update(payload);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

// ── Webhook Notifier ──────────────────────────────────────────

/// Where and how to deliver one event.
#[derive(Debug, Clone)]
pub struct Target {
    pub url: String,
    pub signing_secret: Option<String>,
}

/// Delivers events to the registered endpoint.
/// - HMAC-SHA256 signing (`x-secrets-manager-signature`)
/// - retries with back-off, 1s → 5s → 25s by default
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    backoff: Vec<Duration>,
}

const DEFAULT_BACKOFF_SECS: [u64; 4] = [0, 1, 5, 25];

impl WebhookNotifier {
    pub fn new() -> Result<Self> {
        Self::with_backoff(
            DEFAULT_BACKOFF_SECS
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
        )
    }

    /// One entry per attempt: the delay before that attempt.
    pub fn with_backoff(backoff: Vec<Duration>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("secrets-manager-notifier/1.0")
            .build()?;
        Ok(Self {
            client,
            backoff: if backoff.is_empty() {
                vec![Duration::ZERO]
            } else {
                backoff
            },
        })
    }

    /// Deliver with the configured retries.
    pub async fn send(&self, target: &Target, event: &SecretEvent) -> Result<()> {
        self.deliver(target, event, &self.backoff).await
    }

    /// Deliver exactly once, without retries.
    pub async fn send_once(&self, target: &Target, event: &SecretEvent) -> Result<()> {
        self.deliver(target, event, &[Duration::ZERO]).await
    }

    async fn deliver(&self, target: &Target, event: &SecretEvent, backoff: &[Duration]) -> Result<()> {
        let payload = serde_json::to_vec(event)
            .map_err(|e| anyhow::anyhow!("notification serialize error: {}", e))?;
        let delivery_id = uuid::Uuid::new_v4().to_string();
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = target
            .signing_secret
            .as_deref()
            .map(|s| hmac_sha256_hex(s, &payload))
            .transpose()?;
        let url = target.url.as_str();
        let event_type = event.event_type.as_str();

        for (attempt, delay) in backoff.iter().enumerate() {
            if !delay.is_zero() {
                debug!(
                    url,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    event_type,
                    "retrying notification delivery"
                );
                tokio::time::sleep(*delay).await;
            }

            let mut req = self
                .client
                .post(url)
                .header("content-type", "application/json")
                .header("x-secrets-manager-delivery-id", &delivery_id)
                .header("x-secrets-manager-timestamp", &timestamp)
                .header("x-secrets-manager-event", event_type);

            if let Some(ref sig) = signature {
                req = req.header("x-secrets-manager-signature", sig.as_str());
            }

            match req.body(payload.clone()).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(
                        url,
                        event_type,
                        delivery_id = %delivery_id,
                        attempt,
                        status = %resp.status(),
                        "notification delivered"
                    );
                    return Ok(());
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    warn!(
                        url,
                        event_type,
                        delivery_id = %delivery_id,
                        attempt,
                        status = %status,
                        body = %body,
                        "notification delivery failed (non-2xx)"
                    );
                }
                Err(e) => {
                    warn!(
                        url,
                        event_type,
                        delivery_id = %delivery_id,
                        attempt,
                        error = %e,
                        "notification request error"
                    );
                }
            }
        }

        Err(anyhow::anyhow!(
            "notification delivery to {} failed after {} attempt(s)",
            url,
            backoff.len()
        ))
    }

    /// Fire-and-forget delivery with retries.
    pub fn dispatch(&self, target: Target, event: SecretEvent) {
        let notifier = self.clone();
        tokio::spawn(async move {
            let event_type = event.event_type.as_str();
            let outcome = match notifier.send(&target, &event).await {
                Ok(()) => "delivered",
                Err(e) => {
                    warn!(url = %target.url, error = %e, "notification dispatch ultimately failed");
                    "failed"
                }
            };
            crate::metrics::recorder().notification(event_type, outcome);
        });
    }
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_event_serializes_snake_case_type() {
        let json = serde_json::to_value(SecretEvent::test()).unwrap();
        assert_eq!(json["event_type"], "test_notification");
        assert!(json.get("secret_id").is_none());
        assert!(json.get("timestamp").is_some());
    }

    #[test]
    fn test_hmac_signature_deterministic() {
        let sig1 = hmac_sha256_hex("secret123", b"payload").unwrap();
        let sig2 = hmac_sha256_hex("secret123", b"payload").unwrap();
        assert_eq!(sig1, sig2);
        assert!(sig1.starts_with("sha256="));
        assert_ne!(sig1, hmac_sha256_hex("secret456", b"payload").unwrap());
    }

    #[tokio::test]
    async fn test_signed_delivery_carries_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header_exists("x-secrets-manager-signature"))
            .and(header_exists("x-secrets-manager-delivery-id"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::with_backoff(vec![Duration::ZERO]).unwrap();
        let target = Target {
            url: format!("{}/hook", server.uri()),
            signing_secret: Some("0123456789abcdef".into()),
        };
        notifier.send(&target, &SecretEvent::test()).await.unwrap();
    }

    #[tokio::test]
    async fn test_retries_until_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::with_backoff(vec![
            Duration::ZERO,
            Duration::from_millis(5),
            Duration::from_millis(5),
        ])
        .unwrap();
        let target = Target {
            url: server.uri(),
            signing_secret: None,
        };
        assert!(notifier.send(&target, &SecretEvent::test()).await.is_err());
    }

    #[tokio::test]
    async fn test_send_once_makes_single_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new().unwrap();
        let target = Target {
            url: server.uri(),
            signing_secret: None,
        };
        assert!(notifier.send_once(&target, &SecretEvent::test()).await.is_err());
    }
}
