//! Shared harness: an in-memory service driven through the real router.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use secrets_manager::config::Config;
use secrets_manager::{build_app, AppState};

pub const ADMIN_KEY: &str = "test-admin-key";

pub struct TestApp {
    pub state: Arc<AppState>,
    pub router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        let state = Arc::new(AppState::in_memory(Config::for_tests()).unwrap());
        let router = build_app(state.clone());
        Self { state, router }
    }

    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let body = body.map(|json| ("application/json", json));
        self.send(method, uri, body).await
    }

    /// Send `body` with an explicit content type.
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        body: Option<(&str, Value)>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-admin-key", ADMIN_KEY);
        let body = match body {
            Some((content_type, json)) => {
                builder = builder.header("content-type", content_type);
                Body::from(serde_json::to_vec(&json).unwrap())
            }
            None => Body::empty(),
        };
        let resp = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Method::GET, uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, Some(body)).await
    }

    pub async fn patch(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::PATCH, uri, Some(body)).await
    }

    /// PATCH as an RFC 7396 document.
    pub async fn merge_patch(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::PATCH, uri, Some(("application/merge-patch+json", body)))
            .await
    }

    pub async fn delete(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Method::DELETE, uri, None).await
    }

    /// Create an arbitrary secret and return its id.
    pub async fn arbitrary(&self, name: &str, payload: &str) -> String {
        let (status, body) = self
            .post(
                "/api/v2/secrets",
                serde_json::json!({
                    "name": name,
                    "secret_type": "arbitrary",
                    "payload": payload,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["id"].as_str().unwrap().to_string()
    }
}
