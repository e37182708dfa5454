use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use subtle::ConstantTimeEq;

use crate::errors::AppError;
use crate::models::pagination::Links;
use crate::AppState;

pub mod configurations;
pub mod extract;
pub mod groups;
pub mod locks;
pub mod notifications;
pub mod secrets;
pub mod versions;

/// Build the secrets manager API router.
/// All routes are relative; the caller mounts this under `/api/v2`.
pub fn api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        // Secret groups
        .route(
            "/secret_groups",
            get(groups::list_groups).post(groups::create_group),
        )
        .route(
            "/secret_groups/:id",
            get(groups::get_group)
                .patch(groups::update_group)
                .delete(groups::delete_group),
        )
        .route(
            "/secret_groups/:id/secret_types/:secret_type/secrets/:name",
            get(secrets::get_secret_by_name),
        )
        // Secrets
        .route(
            "/secrets",
            get(secrets::list_secrets).post(secrets::create_secret),
        )
        .route(
            "/secrets/:id",
            get(secrets::get_secret).delete(secrets::delete_secret),
        )
        .route(
            "/secrets/:id/metadata",
            get(secrets::get_metadata).patch(secrets::update_metadata),
        )
        // Versions
        .route(
            "/secrets/:id/versions",
            get(versions::list_versions).post(versions::create_version),
        )
        .route("/secrets/:id/versions/:vid", get(versions::get_version))
        .route(
            "/secrets/:id/versions/:vid/secret_data",
            axum::routing::delete(versions::delete_version_data),
        )
        .route(
            "/secrets/:id/versions/:vid/metadata",
            get(versions::get_version_metadata).patch(versions::update_version_metadata),
        )
        // Locks
        .route("/locks", get(locks::list_locked_secrets))
        .route("/secrets/:id/locks", get(locks::list_secret_locks))
        .route(
            "/secrets/:id/versions/:vid/locks",
            get(locks::list_version_locks),
        )
        .route(
            "/secrets/:id/locks_bulk",
            post(locks::create_secret_locks).delete(locks::delete_secret_locks),
        )
        .route(
            "/secrets/:id/versions/:vid/locks_bulk",
            post(locks::create_version_locks).delete(locks::delete_version_locks),
        )
        // Configurations
        .route(
            "/configurations",
            get(configurations::list_configurations).post(configurations::create_configuration),
        )
        .route(
            "/configurations/:name",
            get(configurations::get_configuration)
                .patch(configurations::update_configuration)
                .delete(configurations::delete_configuration),
        )
        // Notifications
        .route(
            "/notifications/registration",
            get(notifications::get_registration)
                .post(notifications::create_registration)
                .delete(notifications::delete_registration),
        )
        .route(
            "/notifications/registration/test",
            get(notifications::send_test_notification),
        )
        .layer(middleware::from_fn_with_state(state, admin_auth))
        .fallback(fallback_404)
}

async fn fallback_404() -> AppError {
    AppError::not_found("no such route")
}

/// Collection links rooted at the public API base path.
pub(crate) fn links(state: &AppState, path: &str) -> Links {
    Links::new(format!("{}{}", state.config.public_base_path, path))
}

/// Middleware: validates `X-Admin-Key` (or `Authorization: Bearer`) against
/// the configured admin key in constant time.
async fn admin_auth(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let provided_key = req
        .headers()
        .get("x-admin-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            req.headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|t| t.trim())
        });

    let expected = state.config.admin_key().as_bytes();
    match provided_key {
        Some(k) if bool::from(k.as_bytes().ct_eq(expected)) => next.run(req).await,
        Some(k) => {
            // never log the expected key or the full provided key
            let masked = if k.len() > 8 && k.is_char_boundary(4) && k.is_char_boundary(k.len() - 4) {
                format!("{}…{}", &k[..4], &k[k.len() - 4..])
            } else {
                "****".to_string()
            };
            tracing::warn!("admin API: invalid key (provided: '{}')", masked);
            AppError::Unauthorized.into_response()
        }
        None => {
            tracing::warn!("admin API: missing X-Admin-Key header");
            AppError::Unauthorized.into_response()
        }
    }
}
