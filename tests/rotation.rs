//! Scheduled rotation and expiration, driven through the service with an
//! explicit clock.

mod common;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use serde_json::json;

use common::TestApp;
use secrets_manager::jobs;
use secrets_manager::service::rotation::ScheduledOutcome;
use secrets_manager::service::DEFAULT_ROTATION_GRACE_SECS;

async fn rotating_login(app: &TestApp) -> String {
    let (status, secret) = app
        .post(
            "/api/v2/secrets",
            json!({
                "name": "rotating-login",
                "secret_type": "username_password",
                "username": "svc",
                "rotation": {"auto_rotate": true, "interval": 1, "unit": "day"},
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{secret}");
    assert!(secret["next_rotation_date"].is_string());
    secret["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_due_rotation_runs_once_per_slot() {
    let app = TestApp::new();
    let id = rotating_login(&app).await;
    let (_, before) = app.get(&format!("/api/v2/secrets/{id}")).await;

    let later = Utc::now() + Duration::days(2);
    let first = app.state.manager.run_due_rotations(later).await.unwrap();
    assert_eq!(first.rotated, 1);

    // a retried tick at the same instant finds the slot already executed
    let second = app.state.manager.run_due_rotations(later).await.unwrap();
    assert_eq!(second.rotated, 0);

    let (_, versions) = app.get(&format!("/api/v2/secrets/{id}/versions")).await;
    assert_eq!(versions["total_count"], 2);
    assert_eq!(versions["versions"][0]["auto_rotated"], true);

    let (_, after) = app.get(&format!("/api/v2/secrets/{id}")).await;
    assert_eq!(after["username"], "svc");
    assert_ne!(after["password"], before["password"]);
}

#[tokio::test]
async fn test_rotation_skips_locked_previous() {
    let app = TestApp::new();
    let id = rotating_login(&app).await;
    let later = Utc::now() + Duration::days(2);
    app.state.manager.run_due_rotations(later).await.unwrap();

    let (status, _) = app
        .post(
            &format!("/api/v2/secrets/{id}/versions/previous/locks_bulk"),
            json!({"locks": [{"name": "still-reading"}]}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let report = app
        .state
        .manager
        .run_due_rotations(later + Duration::days(2))
        .await
        .unwrap();
    assert_eq!(report.rotated, 0);
    assert_eq!(report.failed, 1);

    let (_, previous) = app
        .get(&format!("/api/v2/secrets/{id}/versions/previous"))
        .await;
    assert!(previous["password"].is_string());
}

#[tokio::test]
async fn test_failed_rotation_is_reported_until_a_rotation_succeeds() {
    let app = TestApp::new();
    let id = rotating_login(&app).await;
    let later = Utc::now() + Duration::days(2);
    app.state.manager.run_due_rotations(later).await.unwrap();
    let (status, _) = app
        .post(
            &format!("/api/v2/secrets/{id}/versions/previous/locks_bulk"),
            json!({"locks": [{"name": "batch-job"}]}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let retry_at = later + Duration::days(2);
    let report = app.state.manager.run_due_rotations(retry_at).await.unwrap();
    assert_eq!(report.failed, 1);
    let (_, meta) = app.get(&format!("/api/v2/secrets/{id}/metadata")).await;
    assert_eq!(meta["state"], "active");
    let error = meta["last_rotation_error"].as_str().unwrap();
    assert!(error.contains("lock"), "{error}");

    let (status, _) = app
        .delete(&format!("/api/v2/secrets/{id}/versions/previous/locks_bulk"))
        .await;
    assert_eq!(status, StatusCode::OK);

    // the failed slot is still due and now goes through
    let report = app.state.manager.run_due_rotations(retry_at).await.unwrap();
    assert_eq!(report.rotated, 1);
    let (_, meta) = app.get(&format!("/api/v2/secrets/{id}/metadata")).await;
    assert!(meta.get("last_rotation_error").is_none(), "{meta}");
    assert_eq!(meta["versions_total"], 3);
}

#[tokio::test]
async fn test_stale_rotating_slot_is_reclaimed_after_grace() {
    let app = TestApp::new();
    let id: uuid::Uuid = rotating_login(&app).await.parse().unwrap();
    let repo = app.state.manager.repository();

    // a process claimed the slot and died before finishing it
    let claimed_at = Utc::now() + Duration::days(2);
    let mut record = repo.get_secret(id).await.unwrap().unwrap();
    let slot = record.rotation.next_rotation_date().unwrap();
    record.rotation.begin(slot, claimed_at);
    let expected = record.revision;
    record.revision += 1;
    repo.update_secret(&record, expected).await.unwrap();

    let grace = Duration::seconds(DEFAULT_ROTATION_GRACE_SECS);
    let outcome = app
        .state
        .manager
        .rotate_scheduled(id, claimed_at + grace - Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(outcome, ScheduledOutcome::Skipped);

    let outcome = app
        .state
        .manager
        .rotate_scheduled(id, claimed_at + grace)
        .await
        .unwrap();
    assert_eq!(outcome, ScheduledOutcome::Rotated);

    let stored = repo.get_secret(id).await.unwrap().unwrap();
    assert_eq!(stored.versions.len(), 2);
    assert_eq!(stored.rotation.last_slot, Some(slot));
}

#[tokio::test]
async fn test_expired_secret_is_deactivated_and_can_be_revived() {
    let app = TestApp::new();
    let expires = Utc::now() + Duration::hours(1);
    let (status, secret) = app
        .post(
            "/api/v2/secrets",
            json!({
                "name": "temporary",
                "secret_type": "arbitrary",
                "payload": "x",
                "expiration_date": expires.to_rfc3339(),
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{secret}");
    let id = secret["id"].as_str().unwrap();

    let report = app
        .state
        .manager
        .run_due_rotations(expires + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(report.expired, 1);

    let (_, meta) = app.get(&format!("/api/v2/secrets/{id}/metadata")).await;
    assert_eq!(meta["state"], "deactivated");

    let extended = Utc::now() + Duration::days(30);
    let (status, meta) = app
        .patch(
            &format!("/api/v2/secrets/{id}/metadata"),
            json!({"expiration_date": extended.to_rfc3339()}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{meta}");
    assert_eq!(meta["state"], "active");
}

#[tokio::test]
async fn test_job_tick_reports() {
    let app = TestApp::new();
    app.arbitrary("not-rotating", "x").await;
    let report = tokio_test::assert_ok!(jobs::rotation::tick(&app.state.manager).await);
    assert_eq!(report, Default::default());
}

#[tokio::test]
async fn test_auto_rotation_is_refused_for_static_types() {
    let app = TestApp::new();
    let (status, _) = app
        .post(
            "/api/v2/secrets",
            json!({
                "name": "static",
                "secret_type": "arbitrary",
                "payload": "x",
                "rotation": {"auto_rotate": true, "interval": 1, "unit": "day"},
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
