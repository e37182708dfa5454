//! Extractors that report malformed requests in the service's error format.

use axum::async_trait;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts, Query, Request};
use axum::http::request::Parts;
use axum::Json;
use uuid::Uuid;

use crate::errors::{AppError, Result};
use crate::models::version::VersionSelector;

/// JSON body (`application/json` or `application/merge-patch+json`).
pub struct Body<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for Body<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| AppError::validation(e.body_text()))?;
        Ok(Body(value))
    }
}

/// Query string parameters.
pub struct Params<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for Params<T>
where
    Query<T>: FromRequestParts<S, Rejection = QueryRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e| AppError::validation(e.body_text()))?;
        Ok(Params(value))
    }
}

pub fn secret_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw)
        .map_err(|_| AppError::validation(format!("secret id must be a UUID, got '{raw}'")))
}

pub fn version(raw: &str) -> Result<VersionSelector> {
    raw.parse()
}

/// Comma-separated list parameter, empty entries dropped.
pub fn list(raw: Option<&str>) -> Vec<String> {
    raw.map(|v| {
        v.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_parameter_splitting() {
        assert_eq!(list(Some("a, b,,c")), vec!["a", "b", "c"]);
        assert!(list(None).is_empty());
    }

    #[test]
    fn test_ids_are_checked_before_storage() {
        assert!(secret_id("not-a-uuid").is_err());
        assert!(version("current").is_ok());
        assert!(version("latest").is_err());
    }
}
