//! Secrets manager: lifecycle, versioning, locks and rotation of stored
//! secrets behind an HTTP API.
//!
//! The binary in `main.rs` is a thin shell around [`build_app`] and
//! [`AppState`]; integration tests in `tests/` drive the same router.

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderName, Method},
    response::IntoResponse,
    routing::get,
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};

pub mod api;
pub mod cache;
pub mod config;
pub mod engine;
pub mod errors;
pub mod jobs;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod notification;
pub mod service;
pub mod store;
pub mod vault;

use cache::TieredCache;
use config::Config;
use errors::AppError;
use notification::webhook::WebhookNotifier;
use service::SecretsManager;
use store::{memory::MemoryStore, postgres::PgStore, Repository};
use vault::VaultCrypto;

/// Request bodies larger than this are rejected before parsing.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub config: Config,
    pub manager: Arc<SecretsManager>,
}

impl AppState {
    pub fn new(config: Config, repo: Arc<dyn Repository>, cache: TieredCache) -> anyhow::Result<Self> {
        Self::with_notifier(config, repo, cache, WebhookNotifier::new()?)
    }

    pub fn with_notifier(
        config: Config,
        repo: Arc<dyn Repository>,
        cache: TieredCache,
        notifier: WebhookNotifier,
    ) -> anyhow::Result<Self> {
        let crypto = Arc::new(VaultCrypto::new(&config.master_key)?);
        let manager = Arc::new(SecretsManager::new(repo, crypto, cache, notifier));
        Ok(Self { config, manager })
    }

    /// State backed by the in-memory store and a local-only cache.
    pub fn in_memory(config: Config) -> anyhow::Result<Self> {
        Self::new(config, Arc::new(MemoryStore::new()), TieredCache::local_only())
    }

    /// Connect the configured backends: Postgres when `DATABASE_URL` is set
    /// (migrations applied), otherwise the in-memory store; Redis as the
    /// second cache tier when `REDIS_URL` is set.
    pub async fn connect(config: Config) -> anyhow::Result<Self> {
        let repo: Arc<dyn Repository> = match &config.database_url {
            Some(url) => {
                tracing::info!("Connecting to database...");
                let db = PgStore::connect(url).await?;
                tracing::info!("Running migrations...");
                db.migrate().await?;
                Arc::new(db)
            }
            None => {
                tracing::warn!("DATABASE_URL is not set, secrets are kept in memory only");
                Arc::new(MemoryStore::new())
            }
        };

        let cache = match &config.redis_url {
            Some(url) => {
                tracing::info!("Connecting to Redis...");
                let client = redis::Client::open(url.as_str())?;
                let conn = redis::aio::ConnectionManager::new(client).await?;
                TieredCache::new(Some(conn))
            }
            None => TieredCache::local_only(),
        };

        Self::new(config, repo, cache)
    }
}

/// The full HTTP surface: health checks, metrics and the `/api/v2` API.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        // Health endpoints (no auth)
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .nest("/api/v2", api::api_router(state.clone()))
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(cors_layer())
        .layer(axum::middleware::from_fn(middleware::headers::request_id))
        .layer(axum::middleware::from_fn(middleware::headers::security_headers))
}

/// Ready once the backing store answers.
async fn readiness_check(State(state): State<Arc<AppState>>) -> Result<&'static str, AppError> {
    state.manager.repository().ping().await?;
    Ok("ok")
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::encode_metrics(),
    )
}

/// Browser access is limited to `SMGR_CORS_ORIGIN` plus local development
/// origins.
fn cors_layer() -> CorsLayer {
    let allowed_origin =
        std::env::var("SMGR_CORS_ORIGIN").unwrap_or_else(|_| "http://localhost:3000".to_string());
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            origin_str == allowed_origin
                || origin_str.starts_with("http://localhost:")
                || origin_str.starts_with("http://127.0.0.1:")
        }))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static("authorization"),
            HeaderName::from_static("x-admin-key"),
            HeaderName::from_static("x-request-id"),
        ])
}
