//! Notification registration and delivery against a mock receiver.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use serde_json::{json, Value};
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use common::TestApp;

async fn register(app: &TestApp, server: &MockServer, signing_secret: Option<&str>) {
    let mut body = json!({
        "endpoint_url": format!("{}/hook", server.uri()),
        "source_name": "test-instance",
    });
    if let Some(secret) = signing_secret {
        body["signing_secret"] = json!(secret);
    }
    let (status, registration) = app.post("/api/v2/notifications/registration", body).await;
    assert_eq!(status, StatusCode::CREATED, "{registration}");
}

/// Deliveries run in the background; wait until `n` arrived.
async fn wait_for(server: &MockServer, n: usize) -> Vec<Request> {
    for _ in 0..50 {
        let received = server.received_requests().await.unwrap_or_default();
        if received.len() >= n {
            return received;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    server.received_requests().await.unwrap_or_default()
}

#[tokio::test]
async fn test_registration_lifecycle() {
    let app = TestApp::new();
    let server = MockServer::start().await;

    let (status, _) = app.get("/api/v2/notifications/registration").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    register(&app, &server, Some("a-signing-secret-of-length")).await;
    let (status, registration) = app.get("/api/v2/notifications/registration").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(registration["source_name"], "test-instance");
    assert_eq!(registration["signed"], true);
    assert!(registration.get("signing_secret").is_none());

    let (status, _) = app.delete("/api/v2/notifications/registration").await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app.delete("/api/v2/notifications/registration").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_secret_events_are_delivered_signed() {
    let app = TestApp::new();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(header_exists("x-secrets-manager-signature"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    register(&app, &server, Some("a-signing-secret-of-length")).await;

    let id = app.arbitrary("watched", "x").await;
    let received = wait_for(&server, 1).await;
    assert_eq!(received.len(), 1);
    let event: Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(event["event_type"], "secret_created");
    assert_eq!(event["secret_id"], id.as_str());
    assert_eq!(event["source_name"], "test-instance");
    // payloads never travel in events
    assert!(!String::from_utf8_lossy(&received[0].body).contains("\"payload\""));
    assert_eq!(
        received[0].headers["x-secrets-manager-event"],
        "secret_created"
    );
}

#[tokio::test]
async fn test_test_notification() {
    let app = TestApp::new();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    register(&app, &server, None).await;

    let (status, _) = app.get("/api/v2/notifications/registration/test").await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_failed_test_notification_is_reported() {
    let app = TestApp::new();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    register(&app, &server, None).await;

    let (status, body) = app.get("/api/v2/notifications/registration/test").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_failed");
}
