//! End-to-end tests of the HTTP API against the in-memory store.
//!
//! Run with `cargo test --test api`; no external services are needed.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use common::TestApp;

mod auth_tests {
    use super::*;

    #[tokio::test]
    async fn test_api_requires_admin_key() {
        let app = TestApp::new();
        let resp = app
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/v2/secrets")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_wrong_key_is_rejected() {
        let app = TestApp::new();
        let resp = app
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/v2/secrets")
                    .header("x-admin-key", "not-the-admin-key")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_bearer_token_is_accepted() {
        let app = TestApp::new();
        let resp = app
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/v2/secret_groups")
                    .header("authorization", format!("Bearer {}", common::ADMIN_KEY))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_endpoints_need_no_key() {
        let app = TestApp::new();
        for path in ["/healthz", "/readyz", "/metrics"] {
            let resp = app
                .router
                .clone()
                .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK, "{path}");
        }
    }
}

mod group_tests {
    use super::*;

    #[tokio::test]
    async fn test_default_group_exists_and_is_immutable() {
        let app = TestApp::new();
        let (status, body) = app.get("/api/v2/secret_groups").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_count"], 1);
        assert_eq!(body["secret_groups"][0]["id"], "default");

        let (status, _) = app
            .patch("/api/v2/secret_groups/default", json!({"description": "x"}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = app.delete("/api/v2/secret_groups/default").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_group_lifecycle() {
        let app = TestApp::new();
        let (status, group) = app
            .post("/api/v2/secret_groups", json!({"name": "payments"}))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = group["id"].as_str().unwrap().to_string();

        let (status, _) = app
            .post("/api/v2/secret_groups", json!({"name": "payments"}))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, updated) = app
            .patch(
                &format!("/api/v2/secret_groups/{id}"),
                json!({"description": "card processing"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["description"], "card processing");

        // a group holding secrets cannot be deleted
        let (status, _) = app
            .post(
                "/api/v2/secrets",
                json!({
                    "name": "stripe-key",
                    "secret_type": "arbitrary",
                    "payload": "sk_live",
                    "secret_group_id": id,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _) = app.delete(&format!("/api/v2/secret_groups/{id}")).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_group_delete_never_orphans_a_secret() {
        let app = std::sync::Arc::new(TestApp::new());
        for round in 0..20 {
            let (_, group) = app
                .post("/api/v2/secret_groups", json!({"name": format!("racing-{round}")}))
                .await;
            let group_id = group["id"].as_str().unwrap().to_string();

            let creator = {
                let app = app.clone();
                let group_id = group_id.clone();
                tokio::spawn(async move {
                    app.post(
                        "/api/v2/secrets",
                        json!({
                            "name": "member",
                            "secret_type": "arbitrary",
                            "payload": "x",
                            "secret_group_id": group_id,
                        }),
                    )
                    .await
                })
            };
            let deleter = {
                let app = app.clone();
                let group_id = group_id.clone();
                tokio::spawn(async move {
                    app.delete(&format!("/api/v2/secret_groups/{group_id}")).await
                })
            };
            let (created, _) = creator.await.unwrap();
            let (deleted, _) = deleter.await.unwrap();

            // exactly one side wins
            match (created, deleted) {
                (StatusCode::CREATED, StatusCode::CONFLICT) => {}
                (StatusCode::BAD_REQUEST, StatusCode::NO_CONTENT) => {}
                other => panic!("round {round}: unexpected outcome {other:?}"),
            }
            let (_, page) = app
                .get(&format!("/api/v2/secrets?groups={group_id}"))
                .await;
            let members = page["total_count"].as_u64().unwrap();
            assert_eq!(members, u64::from(created == StatusCode::CREATED));
        }
    }

    #[tokio::test]
    async fn test_unknown_group_is_rejected_on_secret_create() {
        let app = TestApp::new();
        let (status, body) = app
            .post(
                "/api/v2/secrets",
                json!({
                    "name": "orphan",
                    "secret_type": "arbitrary",
                    "payload": "x",
                    "secret_group_id": "does-not-exist",
                }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "validation_failed");
    }
}

mod secret_tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_read_arbitrary_secret() {
        let app = TestApp::new();
        let id = app.arbitrary("db-password", "hunter2").await;

        let (status, secret) = app.get(&format!("/api/v2/secrets/{id}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(secret["payload"], "hunter2");
        assert_eq!(secret["state"], "active");
        assert_eq!(secret["versions_total"], 1);

        // metadata never carries the payload
        let (status, meta) = app.get(&format!("/api/v2/secrets/{id}/metadata")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(meta.get("payload").is_none());
        assert_eq!(meta["downloaded"], true);
    }

    #[tokio::test]
    async fn test_read_by_name() {
        let app = TestApp::new();
        app.arbitrary("by-name", "v1").await;
        let (status, secret) = app
            .get("/api/v2/secret_groups/default/secret_types/arbitrary/secrets/by-name")
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(secret["payload"], "v1");

        let (status, _) = app
            .get("/api/v2/secret_groups/default/secret_types/kv/secrets/by-name")
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_duplicate_name_conflicts() {
        let app = TestApp::new();
        app.arbitrary("twice", "a").await;
        let (status, body) = app
            .post(
                "/api/v2/secrets",
                json!({"name": "twice", "secret_type": "arbitrary", "payload": "b"}),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "conflict");

        // the same name is free for another type
        let (status, _) = app
            .post(
                "/api/v2/secrets",
                json!({"name": "twice", "secret_type": "kv", "data": {"k": "v"}}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_malformed_requests_are_validation_errors() {
        let app = TestApp::new();
        let (status, _) = app.get("/api/v2/secrets/not-a-uuid").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app.get("/api/v2/secrets?limit=0").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app
            .post("/api/v2/secrets", json!({"name": "x1", "secret_type": "nope"}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app
            .post(
                "/api/v2/secrets",
                json!({"name": "k1", "secret_type": "kv", "data": {}}),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_generated_password() {
        let app = TestApp::new();
        let (status, secret) = app
            .post(
                "/api/v2/secrets",
                json!({
                    "name": "svc-login",
                    "secret_type": "username_password",
                    "username": "svc",
                    "password_generation_policy": {"length": 24},
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{secret}");
        assert_eq!(secret["username"], "svc");
        assert_eq!(secret["password"].as_str().unwrap().len(), 24);
    }

    #[tokio::test]
    async fn test_metadata_merge_patch() {
        let app = TestApp::new();
        let (status, secret) = app
            .post(
                "/api/v2/secrets",
                json!({
                    "name": "patched",
                    "secret_type": "arbitrary",
                    "payload": "x",
                    "description": "old",
                    "labels": ["env-prod"],
                    "custom_metadata": {"team": "core", "tier": 1},
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{secret}");
        let id = secret["id"].as_str().unwrap();

        let (status, meta) = app
            .patch(
                &format!("/api/v2/secrets/{id}/metadata"),
                json!({
                    "description": null,
                    "labels": ["env-prod", "pci"],
                    "custom_metadata": {"tier": null},
                }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{meta}");
        assert!(meta.get("description").is_none());
        assert_eq!(meta["labels"], json!(["env-prod", "pci"]));
        assert_eq!(meta["custom_metadata"], json!({"team": "core"}));

        // fields outside the editable projection are refused
        let (status, _) = app
            .patch(
                &format!("/api/v2/secrets/{id}/metadata"),
                json!({"secret_type": "kv"}),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_metadata_patch_accepts_merge_patch_content_type() {
        let app = TestApp::new();
        let id = app.arbitrary("merge-typed", "x").await;
        let (status, meta) = app
            .merge_patch(
                &format!("/api/v2/secrets/{id}/metadata"),
                json!({"description": "via merge-patch", "labels": ["ops"]}),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{meta}");
        assert_eq!(meta["description"], "via merge-patch");
        assert_eq!(meta["labels"], json!(["ops"]));

        let (status, body) = app
            .merge_patch(&format!("/api/v2/secrets/{id}/metadata"), json!({"state": "active"}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    }

    #[tokio::test]
    async fn test_list_pagination_links() {
        let app = TestApp::new();
        for i in 0..5 {
            app.arbitrary(&format!("paged-{i}"), "x").await;
        }

        let (status, page) = app.get("/api/v2/secrets?limit=2&offset=2").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["total_count"], 5);
        assert_eq!(page["secrets"].as_array().unwrap().len(), 2);
        assert_eq!(page["first"]["href"], "/api/v2/secrets?limit=2&offset=0");
        assert_eq!(page["last"]["href"], "/api/v2/secrets?limit=2&offset=4");
        assert_eq!(page["next"]["href"], "/api/v2/secrets?limit=2&offset=4");
        assert_eq!(page["previous"]["href"], "/api/v2/secrets?limit=2&offset=0");

        let (_, first) = app.get("/api/v2/secrets?limit=2").await;
        assert!(first.get("previous").is_none());
        let (_, last) = app.get("/api/v2/secrets?limit=2&offset=4").await;
        assert!(last.get("next").is_none());
    }

    #[tokio::test]
    async fn test_list_filters_by_type_and_search() {
        let app = TestApp::new();
        app.arbitrary("alpha-one", "x").await;
        app.arbitrary("beta-two", "x").await;
        app.post(
            "/api/v2/secrets",
            json!({"name": "alpha-kv", "secret_type": "kv", "data": {"k": 1}}),
        )
        .await;

        let (_, page) = app.get("/api/v2/secrets?search=alpha").await;
        assert_eq!(page["total_count"], 2);

        let (_, page) = app.get("/api/v2/secrets?secret_types=kv").await;
        assert_eq!(page["total_count"], 1);
        assert_eq!(page["secrets"][0]["name"], "alpha-kv");
    }

    #[tokio::test]
    async fn test_delete_secret() {
        let app = TestApp::new();
        let id = app.arbitrary("short-lived", "x").await;
        let (status, _) = app.delete(&format!("/api/v2/secrets/{id}")).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = app.get(&format!("/api/v2/secrets/{id}")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

mod version_tests {
    use super::*;

    #[tokio::test]
    async fn test_new_version_destroys_previous_payload() {
        let app = TestApp::new();
        let id = app.arbitrary("rolling", "v1").await;

        let (status, _) = app
            .post(&format!("/api/v2/secrets/{id}/versions"), json!({"payload": "v2"}))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _) = app
            .post(&format!("/api/v2/secrets/{id}/versions"), json!({"payload": "v3"}))
            .await;
        assert_eq!(status, StatusCode::CREATED);

        let (_, versions) = app.get(&format!("/api/v2/secrets/{id}/versions")).await;
        assert_eq!(versions["total_count"], 3);
        let list = versions["versions"].as_array().unwrap();
        // newest first
        assert_eq!(list[0]["alias"], "current");
        assert_eq!(list[1]["alias"], "previous");
        assert_eq!(list[0]["payload_available"], true);
        assert_eq!(list[1]["payload_available"], true);
        assert_eq!(list[2]["payload_available"], false);

        let (status, previous) = app
            .get(&format!("/api/v2/secrets/{id}/versions/previous"))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(previous["payload"], "v2");
    }

    #[tokio::test]
    async fn test_arbitrary_version_requires_payload() {
        let app = TestApp::new();
        let id = app.arbitrary("needs-payload", "v1").await;
        let (status, _) = app
            .request(
                axum::http::Method::POST,
                &format!("/api/v2/secrets/{id}/versions"),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_version_metadata_patch() {
        let app = TestApp::new();
        let id = app.arbitrary("annotated", "v1").await;
        let (status, meta) = app
            .patch(
                &format!("/api/v2/secrets/{id}/versions/current/metadata"),
                json!({"version_custom_metadata": {"ticket": "OPS-1"}}),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{meta}");
        assert_eq!(meta["version_custom_metadata"]["ticket"], "OPS-1");
    }

    #[tokio::test]
    async fn test_delete_version_data() {
        let app = TestApp::new();
        let id = app.arbitrary("wiped", "v1").await;
        let (status, meta) = app
            .delete(&format!("/api/v2/secrets/{id}/versions/current/secret_data"))
            .await;
        assert_eq!(status, StatusCode::OK, "{meta}");
        assert_eq!(meta["payload_available"], false);

        let (_, secret) = app.get(&format!("/api/v2/secrets/{id}/metadata")).await;
        assert_eq!(secret["state"], "destroyed");

        // destroyed secrets get no new versions
        let (status, _) = app
            .post(&format!("/api/v2/secrets/{id}/versions"), json!({"payload": "v2"}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

mod lock_tests {
    use super::*;

    async fn lock(app: &TestApp, id: &str, vid: &str, names: &[&str], mode: Option<&str>) -> (StatusCode, serde_json::Value) {
        let locks: Vec<_> = names.iter().map(|n| json!({"name": n})).collect();
        let uri = match mode {
            Some(m) => format!("/api/v2/secrets/{id}/versions/{vid}/locks_bulk?mode={m}"),
            None => format!("/api/v2/secrets/{id}/versions/{vid}/locks_bulk"),
        };
        app.post(&uri, json!({"locks": locks})).await
    }

    #[tokio::test]
    async fn test_locked_secret_cannot_be_deleted() {
        let app = TestApp::new();
        let id = app.arbitrary("guarded", "v1").await;
        let (status, _) = app
            .post(
                &format!("/api/v2/secrets/{id}/locks_bulk"),
                json!({"locks": [{"name": "app-1", "description": "in use"}]}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = app.delete(&format!("/api/v2/secrets/{id}")).await;
        assert_eq!(status, StatusCode::PRECONDITION_FAILED);
        assert_eq!(body["error"]["code"], "secret_locked");

        let (status, _) = app
            .delete(&format!("/api/v2/secrets/{id}/versions/current/secret_data"))
            .await;
        assert_eq!(status, StatusCode::PRECONDITION_FAILED);

        let (status, _) = app
            .delete(&format!("/api/v2/secrets/{id}/locks_bulk?name=app-1"))
            .await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = app.delete(&format!("/api/v2/secrets/{id}")).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_locked_previous_blocks_new_version() {
        let app = TestApp::new();
        let id = app.arbitrary("pinned", "v1").await;
        app.post(&format!("/api/v2/secrets/{id}/versions"), json!({"payload": "v2"}))
            .await;
        let (status, _) = lock(&app, &id, "previous", &["consumer"], None).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, _) = app
            .post(&format!("/api/v2/secrets/{id}/versions"), json!({"payload": "v3"}))
            .await;
        assert_eq!(status, StatusCode::PRECONDITION_FAILED);

        // the payload of the locked version is untouched
        let (_, previous) = app
            .get(&format!("/api/v2/secrets/{id}/versions/previous"))
            .await;
        assert_eq!(previous["payload"], "v1");
    }

    #[tokio::test]
    async fn test_remove_previous_mode_moves_lock() {
        let app = TestApp::new();
        let id = app.arbitrary("moving", "v1").await;
        lock(&app, &id, "current", &["consumer"], None).await;
        // detach so a second version can be created, then relock the old one
        app.delete(&format!("/api/v2/secrets/{id}/locks_bulk")).await;
        app.post(&format!("/api/v2/secrets/{id}/versions"), json!({"payload": "v2"}))
            .await;
        lock(&app, &id, "previous", &["consumer", "audit"], None).await;

        let (status, summary) = lock(
            &app,
            &id,
            "current",
            &["consumer", "audit"],
            Some("remove_previous_and_delete"),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{summary}");

        let (_, previous) = app
            .get(&format!("/api/v2/secrets/{id}/versions/previous/metadata"))
            .await;
        assert_eq!(previous["locks_total"], 0);
        assert_eq!(previous["payload_available"], false);

        let (_, locks) = app.get(&format!("/api/v2/secrets/{id}/locks")).await;
        assert_eq!(locks["total_count"], 2);
    }

    #[tokio::test]
    async fn test_lock_quota_per_secret() {
        let app = TestApp::new();
        let id = app.arbitrary("busy", "v1").await;
        let names: Vec<String> = (0..1000).map(|i| format!("lock-{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let (status, body) = lock(&app, &id, "current", &refs, None).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert_eq!(body["versions"][0]["locks"].as_array().unwrap().len(), 1000);

        let (status, body) = lock(&app, &id, "current", &["one-more"], None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "quota_exceeded");

        // replacing an existing lock does not count against the quota
        let (status, _) = lock(&app, &id, "current", &["lock-7"], None).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_invalid_mode_is_rejected() {
        let app = TestApp::new();
        let id = app.arbitrary("mode-check", "v1").await;
        let (status, _) = lock(&app, &id, "current", &["x1"], Some("everything")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_locked_secrets() {
        let app = TestApp::new();
        let locked = app.arbitrary("locked-one", "v1").await;
        app.arbitrary("free-one", "v1").await;
        lock(&app, &locked, "current", &["reader"], None).await;

        let (status, page) = app.get("/api/v2/locks").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["total_count"], 1);
        assert_eq!(page["locks"][0]["secret_id"], locked.as_str());
        assert_eq!(page["locks"][0]["versions"][0]["locks"], json!(["reader"]));
    }

    #[tokio::test]
    async fn test_version_lock_search() {
        let app = TestApp::new();
        let id = app.arbitrary("searched", "v1").await;
        lock(&app, &id, "current", &["billing-api", "billing-cron", "reports"], None).await;

        let (status, page) = app
            .get(&format!("/api/v2/secrets/{id}/versions/current/locks?search=billing"))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["total_count"], 2);
    }
}

mod configuration_tests {
    use super::*;

    async fn private_ca(app: &TestApp) {
        let (status, body) = app
            .post(
                "/api/v2/configurations",
                json!({
                    "name": "root-ca",
                    "config_type": "private_cert_configuration_root_ca",
                    "common_name": "Example Root",
                    "max_ttl": "8760h",
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert!(body.get("private_key").is_none());

        let (status, body) = app
            .post(
                "/api/v2/configurations",
                json!({
                    "name": "web",
                    "config_type": "private_cert_configuration_template",
                    "certificate_authority": "root-ca",
                    "allowed_domains": ["example.com"],
                    "allow_subdomains": true,
                    "max_ttl": "720h",
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
    }

    #[tokio::test]
    async fn test_private_cert_issuance() {
        let app = TestApp::new();
        private_ca(&app).await;

        let (status, cert) = app
            .post(
                "/api/v2/secrets",
                json!({
                    "name": "api-cert",
                    "secret_type": "private_cert",
                    "certificate_template": "web",
                    "common_name": "api.example.com",
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{cert}");
        assert!(cert["certificate"]
            .as_str()
            .unwrap()
            .starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(cert["private_key"].as_str().unwrap().contains("PRIVATE KEY"));

        // names outside the template are refused
        let (status, _) = app
            .post(
                "/api/v2/secrets",
                json!({
                    "name": "bad-cert",
                    "secret_type": "private_cert",
                    "certificate_template": "web",
                    "common_name": "api.other.org",
                }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_referenced_configuration_cannot_be_deleted() {
        let app = TestApp::new();
        private_ca(&app).await;
        let (status, _) = app.delete("/api/v2/configurations/root-ca").await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = app.delete("/api/v2/configurations/web").await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = app.delete("/api/v2/configurations/root-ca").await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_list_and_patch_configurations() {
        let app = TestApp::new();
        private_ca(&app).await;

        let (status, page) = app
            .get("/api/v2/configurations?config_types=private_cert_configuration_template")
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["total_count"], 1);
        assert_eq!(page["configurations"][0]["name"], "web");

        let (status, patched) = app
            .patch(
                "/api/v2/configurations/web",
                json!({"allowed_domains": ["example.com", "example.net"]}),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{patched}");
        assert_eq!(patched["allowed_domains"].as_array().unwrap().len(), 2);

        let (status, _) = app
            .patch("/api/v2/configurations/web", json!({"certificate_authority": "x"}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_iam_configuration_quota() {
        let app = TestApp::new();
        let body = |name: &str| {
            json!({
                "name": name,
                "config_type": "iam_credentials_configuration",
                "api_key": "an-api-key-with-enough-length",
            })
        };
        let (status, _) = app.post("/api/v2/configurations", body("iam-1")).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, err) = app.post("/api/v2/configurations", body("iam-2")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["error"]["code"], "quota_exceeded");
    }

    async fn iam_configuration(app: &TestApp) {
        let (status, body) = app
            .post(
                "/api/v2/configurations",
                json!({
                    "name": "iam",
                    "config_type": "iam_credentials_configuration",
                    "api_key": "an-api-key-with-enough-length",
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
    }

    async fn iam_secret(app: &TestApp, name: &str, reuse_api_key: bool) -> (String, String) {
        let (status, secret) = app
            .post(
                "/api/v2/secrets",
                json!({
                    "name": name,
                    "secret_type": "iam_credentials",
                    "service_id": "ServiceId-1234",
                    "ttl": "1h",
                    "reuse_api_key": reuse_api_key,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{secret}");
        (
            secret["id"].as_str().unwrap().to_string(),
            secret["api_key_id"].as_str().unwrap().to_string(),
        )
    }

    #[tokio::test]
    async fn test_iam_key_is_reused_within_ttl() {
        let app = TestApp::new();
        iam_configuration(&app).await;
        let (id, first_key) = iam_secret(&app, "ci-reused", true).await;

        let (_, first) = app
            .get(&format!("/api/v2/secrets/{id}/versions/current/metadata"))
            .await;
        let expires = chrono::DateTime::parse_from_rfc3339(first["expiration_date"].as_str().unwrap())
            .unwrap()
            .with_timezone(&chrono::Utc);
        let remaining = expires - chrono::Utc::now();
        assert!(remaining > chrono::Duration::minutes(55), "{remaining}");
        assert!(remaining <= chrono::Duration::hours(1));

        let (status, version) = app
            .post(&format!("/api/v2/secrets/{id}/versions"), json!({}))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{version}");
        assert_eq!(version["api_key_id"], first_key.as_str());
        // the reused key keeps its original expiry
        assert_eq!(version["expiration_date"], first["expiration_date"]);
    }

    #[tokio::test]
    async fn test_iam_key_is_minted_per_version_without_reuse() {
        let app = TestApp::new();
        iam_configuration(&app).await;
        let (id, first_key) = iam_secret(&app, "ci-fresh", false).await;

        let (status, version) = app
            .post(&format!("/api/v2/secrets/{id}/versions"), json!({}))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{version}");
        assert_ne!(version["api_key_id"], first_key.as_str());
        assert!(version["expiration_date"].is_string());
    }

    #[tokio::test]
    async fn test_generated_version_data_cannot_be_deleted() {
        let app = TestApp::new();
        iam_configuration(&app).await;
        private_ca(&app).await;
        let (iam_id, _) = iam_secret(&app, "ci-key", false).await;
        let (status, cert) = app
            .post(
                "/api/v2/secrets",
                json!({
                    "name": "svc-cert",
                    "secret_type": "private_cert",
                    "certificate_template": "web",
                    "common_name": "svc.example.com",
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{cert}");
        let cert_id = cert["id"].as_str().unwrap();

        for id in [iam_id.as_str(), cert_id] {
            let (status, body) = app
                .delete(&format!("/api/v2/secrets/{id}/versions/current/secret_data"))
                .await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
            let (_, meta) = app.get(&format!("/api/v2/secrets/{id}/metadata")).await;
            assert_eq!(meta["state"], "active");
        }
    }

    #[tokio::test]
    async fn test_private_cert_expiration_follows_certificate() {
        let app = TestApp::new();
        private_ca(&app).await;
        let (status, cert) = app
            .post(
                "/api/v2/secrets",
                json!({
                    "name": "expiring-cert",
                    "secret_type": "private_cert",
                    "certificate_template": "web",
                    "common_name": "www.example.com",
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{cert}");
        assert!(cert["not_after"].is_string());
        assert_eq!(cert["expiration_date"], cert["not_after"]);

        let id = cert["id"].as_str().unwrap();
        let (status, _) = app
            .patch(
                &format!("/api/v2/secrets/{id}/metadata"),
                json!({"expiration_date": "2099-01-01T00:00:00Z"}),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app
            .post(
                "/api/v2/secrets",
                json!({
                    "name": "dated-cert",
                    "secret_type": "private_cert",
                    "certificate_template": "web",
                    "common_name": "www.example.com",
                    "expiration_date": "2099-01-01T00:00:00Z",
                }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_template_max_ttl_is_capped_by_ca() {
        let app = TestApp::new();
        private_ca(&app).await;

        let (status, patched) = app
            .patch("/api/v2/configurations/web", json!({"max_ttl": "87600h"}))
            .await;
        assert_eq!(status, StatusCode::OK, "{patched}");
        assert_eq!(patched["max_ttl"], 8760 * 3600);

        let (status, _) = app
            .patch("/api/v2/configurations/web", json!({"ttl": "9000h"}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_root_ca_quota() {
        let app = TestApp::new();
        let body = |i: usize| {
            json!({
                "name": format!("root-{i}"),
                "config_type": "private_cert_configuration_root_ca",
                "common_name": format!("Root {i}"),
            })
        };
        for i in 0..10 {
            let (status, created) = app.post("/api/v2/configurations", body(i)).await;
            assert_eq!(status, StatusCode::CREATED, "{created}");
        }
        let (status, err) = app.post("/api/v2/configurations", body(10)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["error"]["code"], "quota_exceeded");
    }

    #[tokio::test]
    async fn test_dns_providers_share_quota() {
        let app = TestApp::new();
        for i in 0..5 {
            let (status, body) = app
                .post(
                    "/api/v2/configurations",
                    json!({
                        "name": format!("cis-{i}"),
                        "config_type": "public_cert_configuration_dns_cloud_internet_services",
                        "cloud_internet_services_crn": format!("crn:v1:bluemix:public:internet-svcs:global:a/{i}"),
                    }),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED, "{body}");
            let (status, body) = app
                .post(
                    "/api/v2/configurations",
                    json!({
                        "name": format!("classic-{i}"),
                        "config_type": "public_cert_configuration_dns_classic_infrastructure",
                        "classic_infrastructure_username": "sl-user",
                        "classic_infrastructure_password": "sl-password",
                    }),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED, "{body}");
        }
        let (status, err) = app
            .post(
                "/api/v2/configurations",
                json!({
                    "name": "classic-extra",
                    "config_type": "public_cert_configuration_dns_classic_infrastructure",
                    "classic_infrastructure_username": "sl-user",
                    "classic_infrastructure_password": "sl-password",
                }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["error"]["code"], "quota_exceeded");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_configuration_patches_are_kept() {
        let app = std::sync::Arc::new(TestApp::new());
        private_ca(&app).await;
        for round in 0..10 {
            let domain = format!("round{round}.example.org");
            let first = {
                let app = app.clone();
                let domain = domain.clone();
                tokio::spawn(async move {
                    app.patch(
                        "/api/v2/configurations/web",
                        json!({"allowed_domains": ["example.com", domain]}),
                    )
                    .await
                })
            };
            let flag = round % 2 == 0;
            let second = {
                let app = app.clone();
                tokio::spawn(async move {
                    app.patch("/api/v2/configurations/web", json!({"allow_subdomains": flag}))
                        .await
                })
            };
            assert_eq!(first.await.unwrap().0, StatusCode::OK);
            assert_eq!(second.await.unwrap().0, StatusCode::OK);

            let (_, web) = app.get("/api/v2/configurations/web").await;
            assert_eq!(web["allowed_domains"], json!(["example.com", domain]));
            assert_eq!(web["allow_subdomains"], flag);
        }
    }
}
