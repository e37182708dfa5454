use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::Value;

use super::extract::{self, Body, Params};
use super::links;
use crate::errors::Result;
use crate::models::lock::{LockBulkRequest, LockMode, SecretLocks};
use crate::models::pagination::{Page, PageParams, Window};
use crate::models::version::VersionSelector;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ListLocksParams {
    pub offset: Option<u64>,
    pub limit: Option<u64>,
    pub search: Option<String>,
}

impl ListLocksParams {
    fn window(&self) -> Result<Window> {
        PageParams {
            offset: self.offset,
            limit: self.limit,
        }
        .window()
    }

    fn search(&self) -> Option<&str> {
        self.search.as_deref().filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AttachParams {
    pub mode: Option<String>,
}

impl AttachParams {
    fn mode(&self) -> Result<Option<LockMode>> {
        self.mode.as_deref().map(str::parse::<LockMode>).transpose()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DetachParams {
    /// Comma-separated lock names; absent removes every lock.
    pub name: Option<String>,
}

/// GET /api/v2/locks: secrets holding at least one lock.
pub async fn list_locked_secrets(
    State(state): State<Arc<AppState>>,
    Params(params): Params<ListLocksParams>,
) -> Result<Json<Value>> {
    let window = params.window()?;
    let (items, total) = state
        .manager
        .list_locked_secrets(params.search(), window)
        .await?;
    let links = links(&state, "/locks").with("search", params.search());
    Ok(Json(Page::new(items, total, window).into_body("locks", &links)?))
}

/// GET /api/v2/secrets/:id/locks
pub async fn list_secret_locks(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Params(params): Params<ListLocksParams>,
) -> Result<Json<Value>> {
    let secret_id = extract::secret_id(&id)?;
    let window = params.window()?;
    let (items, total) = state
        .manager
        .list_secret_locks(secret_id, params.search(), window)
        .await?;
    let links =
        links(&state, &format!("/secrets/{secret_id}/locks")).with("search", params.search());
    Ok(Json(Page::new(items, total, window).into_body("locks", &links)?))
}

/// GET /api/v2/secrets/:id/versions/:vid/locks
pub async fn list_version_locks(
    State(state): State<Arc<AppState>>,
    Path((id, vid)): Path<(String, String)>,
    Params(params): Params<ListLocksParams>,
) -> Result<Json<Value>> {
    let secret_id = extract::secret_id(&id)?;
    let selector = extract::version(&vid)?;
    let window = params.window()?;
    let (items, total) = state
        .manager
        .list_version_locks(secret_id, selector, params.search(), window)
        .await?;
    let links = links(&state, &format!("/secrets/{secret_id}/versions/{vid}/locks"))
        .with("search", params.search());
    Ok(Json(Page::new(items, total, window).into_body("locks", &links)?))
}

/// POST /api/v2/secrets/:id/locks_bulk: lock the current version.
pub async fn create_secret_locks(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Params(params): Params<AttachParams>,
    Body(request): Body<LockBulkRequest>,
) -> Result<(StatusCode, Json<SecretLocks>)> {
    let id = extract::secret_id(&id)?;
    let mode = params.mode()?;
    let locks = state
        .manager
        .attach_locks(id, VersionSelector::CURRENT, request, mode)
        .await?;
    Ok((StatusCode::CREATED, Json(locks)))
}

/// DELETE /api/v2/secrets/:id/locks_bulk: unlock across every version.
pub async fn delete_secret_locks(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Params(params): Params<DetachParams>,
) -> Result<Json<SecretLocks>> {
    let id = extract::secret_id(&id)?;
    let names = extract::list(params.name.as_deref());
    Ok(Json(state.manager.detach_locks(id, None, &names).await?))
}

pub async fn create_version_locks(
    State(state): State<Arc<AppState>>,
    Path((id, vid)): Path<(String, String)>,
    Params(params): Params<AttachParams>,
    Body(request): Body<LockBulkRequest>,
) -> Result<(StatusCode, Json<SecretLocks>)> {
    let id = extract::secret_id(&id)?;
    let selector = extract::version(&vid)?;
    let mode = params.mode()?;
    let locks = state
        .manager
        .attach_locks(id, selector, request, mode)
        .await?;
    Ok((StatusCode::CREATED, Json(locks)))
}

pub async fn delete_version_locks(
    State(state): State<Arc<AppState>>,
    Path((id, vid)): Path<(String, String)>,
    Params(params): Params<DetachParams>,
) -> Result<Json<SecretLocks>> {
    let id = extract::secret_id(&id)?;
    let selector = extract::version(&vid)?;
    let names = extract::list(params.name.as_deref());
    Ok(Json(
        state
            .manager
            .detach_locks(id, Some(selector), &names)
            .await?,
    ))
}
