use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};

use super::extract::Body;
use crate::errors::Result;
use crate::models::group::{SecretGroup, SecretGroupPrototype};
use crate::AppState;

/// GET /api/v2/secret_groups
pub async fn list_groups(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let groups = state.manager.list_groups().await?;
    Ok(Json(json!({
        "total_count": groups.len(),
        "secret_groups": groups,
    })))
}

/// POST /api/v2/secret_groups
pub async fn create_group(
    State(state): State<Arc<AppState>>,
    Body(proto): Body<SecretGroupPrototype>,
) -> Result<(StatusCode, Json<SecretGroup>)> {
    let group = state.manager.create_group(proto).await?;
    Ok((StatusCode::CREATED, Json(group)))
}

pub async fn get_group(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SecretGroup>> {
    Ok(Json(state.manager.get_group(&id).await?))
}

/// PATCH /api/v2/secret_groups/:id (merge-patch)
pub async fn update_group(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Body(patch): Body<Value>,
) -> Result<Json<SecretGroup>> {
    Ok(Json(state.manager.update_group(&id, &patch).await?))
}

pub async fn delete_group(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.manager.delete_group(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
