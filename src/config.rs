use serde::Deserialize;

/// Placeholder shipped in `.env.example`; refused in production.
pub const PLACEHOLDER_MASTER_KEY: &str = "CHANGE_ME_64_HEX_CHAR_MASTER_KEY";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    /// Postgres connection string. When unset the service runs on the
    /// in-memory store and nothing survives a restart.
    pub database_url: Option<String>,
    /// Optional second cache tier for secret metadata.
    pub redis_url: Option<String>,
    /// 64 hex chars (32 bytes) wrapping every per-payload data key.
    pub master_key: String,
    pub admin_key: Option<String>,
    /// How often the rotation job wakes up, in seconds.
    /// Set via SMGR_ROTATION_INTERVAL_SECS. Default: 60.
    pub rotation_interval_secs: u64,
    /// Base path used when building pagination hrefs.
    pub public_base_path: String,
}

impl Config {
    /// Returns the admin key for API authentication.
    /// Falls back to master_key if SMGR_ADMIN_KEY is not set.
    pub fn admin_key(&self) -> &str {
        self.admin_key.as_deref().unwrap_or(&self.master_key)
    }

    /// Config for tests and local tooling: in-memory store, fixed keys.
    pub fn for_tests() -> Self {
        Self {
            port: 0,
            database_url: None,
            redis_url: None,
            master_key: "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f".into(),
            admin_key: Some("test-admin-key".into()),
            rotation_interval_secs: 60,
            public_base_path: "/api/v2".into(),
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let env_mode = std::env::var("SMGR_ENV")
        .or_else(|_| std::env::var("RUST_ENV"))
        .unwrap_or_default();

    let database_url = non_empty_env("DATABASE_URL");
    let admin_key = non_empty_env("SMGR_ADMIN_KEY");
    let master_key = resolve_master_key(
        std::env::var("SMGR_MASTER_KEY").ok(),
        &env_mode,
        database_url.is_some(),
        admin_key.is_some(),
    )?;

    Ok(Config {
        port: std::env::var("SMGR_PORT")
            .unwrap_or_else(|_| "8443".into())
            .parse()
            .unwrap_or(8443),
        database_url,
        redis_url: non_empty_env("REDIS_URL"),
        master_key,
        admin_key,
        rotation_interval_secs: std::env::var("SMGR_ROTATION_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|v| *v > 0)
            .unwrap_or(60),
        public_base_path: std::env::var("SMGR_PUBLIC_BASE_PATH")
            .unwrap_or_else(|_| "/api/v2".into()),
    })
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// An ephemeral key is only acceptable when nothing sealed with it outlives
/// the process: outside production, on the in-memory store, with an explicit
/// admin key (the admin key otherwise falls back to the master key).
fn resolve_master_key(
    configured: Option<String>,
    env_mode: &str,
    persistent_store: bool,
    has_admin_key: bool,
) -> anyhow::Result<String> {
    if let Some(key) = configured.filter(|k| !k.trim().is_empty() && k != PLACEHOLDER_MASTER_KEY) {
        return Ok(key);
    }
    if env_mode == "production" {
        anyhow::bail!(
            "SMGR_MASTER_KEY is unset or still the placeholder. \
             Set a proper 64-char hex key before running in production."
        );
    }
    if persistent_store {
        anyhow::bail!(
            "SMGR_MASTER_KEY must be set when DATABASE_URL is configured; \
             payloads sealed with an ephemeral key are unreadable after restart."
        );
    }
    if !has_admin_key {
        anyhow::bail!("SMGR_ADMIN_KEY must be set when SMGR_MASTER_KEY is not configured");
    }
    tracing::warn!("SMGR_MASTER_KEY is not set, using an ephemeral key for the in-memory store");
    Ok(ephemeral_master_key())
}

fn ephemeral_master_key() -> String {
    use rand::RngCore;
    let mut key = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut key);
    hex::encode(key)
}
