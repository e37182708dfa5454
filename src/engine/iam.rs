use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use uuid::Uuid;

use crate::errors::{AppError, Result};
use crate::models::configuration::{Configuration, ConfigurationSpec};

/// A freshly minted API key.
#[derive(Debug, Clone)]
pub struct IssuedApiKey {
    pub api_key_id: String,
    pub api_key: String,
}

/// When a key minted at `now` with `ttl` seconds stops being valid.
pub fn expires_at(ttl: u64, now: DateTime<Utc>) -> DateTime<Utc> {
    let ttl = i64::try_from(ttl).unwrap_or(i64::MAX);
    Duration::try_seconds(ttl)
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Mint an API key under the instance IAM credentials configuration.
pub fn mint(config: &Configuration) -> Result<IssuedApiKey> {
    match &config.spec {
        ConfigurationSpec::IamCredentialsConfiguration(iam) if iam.disabled => {
            Err(AppError::validation(format!(
                "IAM credentials configuration '{}' is disabled",
                config.name
            )))
        }
        ConfigurationSpec::IamCredentialsConfiguration(_) => {
            let mut raw = [0u8; 32];
            rand::rngs::OsRng.fill_bytes(&mut raw);
            Ok(IssuedApiKey {
                api_key_id: format!("ApiKey-{}", Uuid::new_v4()),
                api_key: URL_SAFE_NO_PAD.encode(raw),
            })
        }
        _ => Err(AppError::validation(format!(
            "configuration '{}' is not an iam_credentials_configuration",
            config.name
        ))),
    }
}
