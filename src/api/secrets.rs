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
use crate::models::pagination::{Page, PageParams};
use crate::models::prototype::SecretPrototype;
use crate::models::secret::SecretType;
use crate::store::{SecretFilter, Sort};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ListSecretsParams {
    pub offset: Option<u64>,
    pub limit: Option<u64>,
    pub sort: Option<String>,
    pub search: Option<String>,
    pub groups: Option<String>,
    pub secret_types: Option<String>,
    pub match_all_labels: Option<String>,
}

impl ListSecretsParams {
    fn filter(&self) -> Result<SecretFilter> {
        Ok(SecretFilter {
            groups: extract::list(self.groups.as_deref()),
            secret_types: extract::list(self.secret_types.as_deref())
                .iter()
                .map(|t| t.parse::<SecretType>())
                .collect::<Result<_>>()?,
            search: self.search.clone().filter(|s| !s.is_empty()),
            match_all_labels: extract::list(self.match_all_labels.as_deref()),
            sort: match &self.sort {
                Some(raw) => raw.parse::<Sort>()?,
                None => Sort::default(),
            },
        })
    }
}

/// GET /api/v2/secrets: metadata only, filtered and paginated.
pub async fn list_secrets(
    State(state): State<Arc<AppState>>,
    Params(params): Params<ListSecretsParams>,
) -> Result<Json<Value>> {
    let window = PageParams {
        offset: params.offset,
        limit: params.limit,
    }
    .window()?;
    let filter = params.filter()?;
    let (secrets, total) = state.manager.list_secrets(&filter, window).await?;
    let items = secrets
        .iter()
        .map(|m| m.to_json())
        .collect::<Result<Vec<_>>>()?;

    let links = links(&state, "/secrets")
        .with("sort", params.sort.as_deref())
        .with("search", params.search.as_deref())
        .with("groups", params.groups.as_deref())
        .with("secret_types", params.secret_types.as_deref())
        .with("match_all_labels", params.match_all_labels.as_deref());
    Ok(Json(Page::new(items, total, window).into_body("secrets", &links)?))
}

/// POST /api/v2/secrets
pub async fn create_secret(
    State(state): State<Arc<AppState>>,
    Body(proto): Body<SecretPrototype>,
) -> Result<(StatusCode, Json<Value>)> {
    let secret = state.manager.create_secret(proto).await?;
    Ok((StatusCode::CREATED, Json(secret)))
}

/// GET /api/v2/secrets/:id: metadata plus the current payload.
pub async fn get_secret(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let id = extract::secret_id(&id)?;
    Ok(Json(state.manager.get_secret(id).await?))
}

/// GET /api/v2/secret_groups/:id/secret_types/:secret_type/secrets/:name
pub async fn get_secret_by_name(
    State(state): State<Arc<AppState>>,
    Path((group, secret_type, name)): Path<(String, String, String)>,
) -> Result<Json<Value>> {
    let secret_type: SecretType = secret_type.parse()?;
    Ok(Json(
        state
            .manager
            .get_secret_by_name(&group, secret_type, &name)
            .await?,
    ))
}

pub async fn delete_secret(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let id = extract::secret_id(&id)?;
    state.manager.delete_secret(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_metadata(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let id = extract::secret_id(&id)?;
    Ok(Json(state.manager.get_metadata(id).await?))
}

/// PATCH /api/v2/secrets/:id/metadata (merge-patch)
pub async fn update_metadata(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Body(patch): Body<Value>,
) -> Result<Json<Value>> {
    let id = extract::secret_id(&id)?;
    Ok(Json(state.manager.update_metadata(id, &patch).await?))
}
