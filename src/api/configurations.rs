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
use crate::models::configuration::{ConfigurationPrototype, ConfigurationType};
use crate::models::pagination::{Page, PageParams};
use crate::store::ConfigurationFilter;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ListConfigurationsParams {
    pub offset: Option<u64>,
    pub limit: Option<u64>,
    pub search: Option<String>,
    pub config_types: Option<String>,
}

/// GET /api/v2/configurations
pub async fn list_configurations(
    State(state): State<Arc<AppState>>,
    Params(params): Params<ListConfigurationsParams>,
) -> Result<Json<Value>> {
    let window = PageParams {
        offset: params.offset,
        limit: params.limit,
    }
    .window()?;
    let filter = ConfigurationFilter {
        config_types: extract::list(params.config_types.as_deref())
            .iter()
            .map(|t| t.parse::<ConfigurationType>())
            .collect::<Result<_>>()?,
        search: params.search.clone().filter(|s| !s.is_empty()),
    };
    let (items, total) = state.manager.list_configurations(&filter, window).await?;

    let links = links(&state, "/configurations")
        .with("search", filter.search.as_deref())
        .with("config_types", params.config_types.as_deref());
    Ok(Json(
        Page::new(items, total, window).into_body("configurations", &links)?,
    ))
}

/// POST /api/v2/configurations
pub async fn create_configuration(
    State(state): State<Arc<AppState>>,
    Body(proto): Body<ConfigurationPrototype>,
) -> Result<(StatusCode, Json<Value>)> {
    let config = state.manager.create_configuration(proto).await?;
    Ok((StatusCode::CREATED, Json(config)))
}

pub async fn get_configuration(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Value>> {
    Ok(Json(state.manager.get_configuration(&name).await?))
}

/// PATCH /api/v2/configurations/:name (merge-patch)
pub async fn update_configuration(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Body(patch): Body<Value>,
) -> Result<Json<Value>> {
    Ok(Json(state.manager.update_configuration(&name, &patch).await?))
}

pub async fn delete_configuration(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<StatusCode> {
    state.manager.delete_configuration(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}
