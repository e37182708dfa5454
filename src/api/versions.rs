use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};

use super::extract::{self, Body};
use crate::errors::{AppError, Result};
use crate::models::prototype::SecretVersionPrototype;
use crate::models::version::VersionMetadata;
use crate::AppState;

/// GET /api/v2/secrets/:id/versions: newest first, without payloads.
pub async fn list_versions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let id = extract::secret_id(&id)?;
    let versions = state.manager.list_versions(id).await?;
    Ok(Json(json!({
        "total_count": versions.len(),
        "versions": versions,
    })))
}

/// POST /api/v2/secrets/:id/versions: manual rotation. Generated secret
/// types accept an empty body.
pub async fn create_version(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>)> {
    let id = extract::secret_id(&id)?;
    let proto: SecretVersionPrototype = if body.is_empty() {
        SecretVersionPrototype::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::validation(format!("invalid request body: {e}")))?
    };
    let version = state.manager.create_version(id, proto).await?;
    Ok((StatusCode::CREATED, Json(version)))
}

/// GET /api/v2/secrets/:id/versions/:vid: version metadata plus payload.
pub async fn get_version(
    State(state): State<Arc<AppState>>,
    Path((id, vid)): Path<(String, String)>,
) -> Result<Json<Value>> {
    let id = extract::secret_id(&id)?;
    let selector = extract::version(&vid)?;
    Ok(Json(state.manager.get_version(id, selector).await?))
}

pub async fn delete_version_data(
    State(state): State<Arc<AppState>>,
    Path((id, vid)): Path<(String, String)>,
) -> Result<Json<VersionMetadata>> {
    let id = extract::secret_id(&id)?;
    let selector = extract::version(&vid)?;
    Ok(Json(state.manager.delete_version_data(id, selector).await?))
}

pub async fn get_version_metadata(
    State(state): State<Arc<AppState>>,
    Path((id, vid)): Path<(String, String)>,
) -> Result<Json<VersionMetadata>> {
    let id = extract::secret_id(&id)?;
    let selector = extract::version(&vid)?;
    Ok(Json(state.manager.get_version_metadata(id, selector).await?))
}

/// PATCH /api/v2/secrets/:id/versions/:vid/metadata (merge-patch)
pub async fn update_version_metadata(
    State(state): State<Arc<AppState>>,
    Path((id, vid)): Path<(String, String)>,
    Body(patch): Body<Value>,
) -> Result<Json<VersionMetadata>> {
    let id = extract::secret_id(&id)?;
    let selector = extract::version(&vid)?;
    Ok(Json(
        state
            .manager
            .update_version_metadata(id, selector, &patch)
            .await?,
    ))
}
