use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde_json::Value;

use super::extract::Body;
use crate::errors::Result;
use crate::models::notification::NotificationRegistrationPrototype;
use crate::AppState;

/// GET /api/v2/notifications/registration
pub async fn get_registration(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    Ok(Json(state.manager.get_registration().await?))
}

/// POST /api/v2/notifications/registration: one destination per instance.
pub async fn create_registration(
    State(state): State<Arc<AppState>>,
    Body(proto): Body<NotificationRegistrationPrototype>,
) -> Result<(StatusCode, Json<Value>)> {
    let registration = state.manager.register_notifications(proto).await?;
    Ok((StatusCode::CREATED, Json(registration)))
}

pub async fn delete_registration(State(state): State<Arc<AppState>>) -> Result<StatusCode> {
    state.manager.delete_registration().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v2/notifications/registration/test
pub async fn send_test_notification(State(state): State<Arc<AppState>>) -> Result<StatusCode> {
    state.manager.send_test_notification().await?;
    Ok(StatusCode::NO_CONTENT)
}
