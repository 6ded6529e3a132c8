//! Account, profile, catalog and admin API integration tests.

mod common;

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;

use common::{TestApp, PASSWORD};

#[tokio::test]
async fn test_health_endpoint() {
    let app = TestApp::new().await;

    let (status, body) = app.get("/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = app.get("/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
}

#[tokio::test]
async fn test_security_headers_and_request_id() {
    let app = TestApp::new().await;

    let response = app
        .send(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await;

    let headers = response.headers();
    assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
    assert!(headers.contains_key("x-request-id"));
}

#[tokio::test]
async fn test_metrics_route_absent_without_recorder() {
    let app = TestApp::new().await;
    let (status, _) = app.get("/metrics", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_register_login_and_duplicate_email() {
    let app = TestApp::new().await;
    let (user_id, token) = app.register("viewer@example.com").await;

    let (status, body) = app.get("/api/v1/user/profile", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], user_id.as_str());
    assert_eq!(body["role"], "user");
    assert_eq!(body["profiles"].as_array().unwrap().len(), 1);
    assert!(body.get("password_hash").is_none());

    // Emails are normalized before the uniqueness check
    let (status, _) = app
        .post(
            "/api/v1/auth/register",
            None,
            json!({
                "email": "Viewer@Example.COM",
                "password": PASSWORD,
                "first_name": "Other",
                "last_name": "Person",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app
        .post(
            "/api/v1/auth/login",
            None,
            json!({"email": "viewer@example.com", "password": PASSWORD}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["access_token"].as_str().is_some());

    let (status, _) = app
        .post(
            "/api/v1/auth/login",
            None,
            json!({"email": "viewer@example.com", "password": "Wr0ng!Password"}),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_register_rejects_weak_password() {
    let app = TestApp::new().await;
    let (status, body) = app
        .post(
            "/api/v1/auth/register",
            None,
            json!({
                "email": "weak@example.com",
                "password": "password",
                "first_name": "Weak",
                "last_name": "Password",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_failed");
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    let app = TestApp::new().await;

    let (status, _) = app.get("/api/v1/user/profile", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.get("/api/v1/user/profile", Some("not-a-jwt")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_profile_limit_and_last_profile() {
    let app = TestApp::new().await;
    let (_, token) = app.register("family@example.com").await;

    let (_, profiles) = app.get("/api/v1/user/profiles", Some(&token)).await;
    let first_id = profiles[0]["id"].as_str().unwrap().to_string();

    // The last profile cannot be removed
    let (status, _) = app
        .call(
            "DELETE",
            &format!("/api/v1/user/profiles/{}", first_id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut created = Vec::new();
    for i in 0..4 {
        let (status, body) = app
            .post(
                "/api/v1/user/profiles",
                Some(&token),
                json!({
                    "name": format!("Member {}", i),
                    "language": "en",
                    "maturity_rating": "PG",
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "profile {} failed: {}", i, body);
        created.push(body["id"].as_str().unwrap().to_string());
    }

    let (status, _) = app
        .post(
            "/api/v1/user/profiles",
            Some(&token),
            json!({"name": "Sixth", "language": "en", "maturity_rating": "PG"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .call(
            "DELETE",
            &format!("/api/v1/user/profiles/{}", created[0]),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, profiles) = app.get("/api/v1/user/profiles", Some(&token)).await;
    assert_eq!(profiles.as_array().unwrap().len(), 4);

    let (status, _) = app
        .get("/api/v1/user/profiles/does-not-exist", Some(&token))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_watchlist_is_a_set() {
    let app = TestApp::new().await;
    let (_, token) = app.register("list@example.com").await;
    let movie = app.seed_movie("Northern Lights").await;
    let draft = app.seed_draft("Unreleased Cut").await;

    let (_, profiles) = app.get("/api/v1/user/profiles", Some(&token)).await;
    let profile_id = profiles[0]["id"].as_str().unwrap().to_string();
    let uri = format!("/api/v1/user/watchlist/{}?profile_id={}", movie.id, profile_id);
    let list = format!("/api/v1/user/watchlist?profile_id={}", profile_id);

    let (status, _) = app.call("POST", &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.call("POST", &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, items) = app.get(&list, Some(&token)).await;
    assert_eq!(items.as_array().unwrap().len(), 1);
    assert_eq!(items[0]["id"], movie.id.as_str());

    let (status, _) = app
        .call(
            "POST",
            &format!("/api/v1/user/watchlist/{}?profile_id={}", draft.id, profile_id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // profile_id is mandatory
    let (status, _) = app
        .call(
            "POST",
            &format!("/api/v1/user/watchlist/{}", movie.id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.call("DELETE", &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, items) = app.get(&list, Some(&token)).await;
    assert!(items.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_browse_empty_catalog_pagination() {
    let app = TestApp::new().await;

    let (status, body) = app.get("/api/v1/content", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["items"].as_array().unwrap().is_empty());
    assert_eq!(body["pagination"]["total_items"], 0);
    assert_eq!(body["pagination"]["has_next"], false);
    assert_eq!(body["pagination"]["has_previous"], false);
}

#[tokio::test]
async fn test_catalog_hides_drafts() {
    let app = TestApp::new().await;
    let published = app.seed_movie("Harbor Nights").await;
    let draft = app.seed_draft("Harbor Days").await;

    let (status, body) = app.get("/api/v1/content?limit=10", None).await;
    assert_eq!(status, StatusCode::OK);
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], published.id.as_str());

    let (status, _) = app
        .get(&format!("/api/v1/content/{}", draft.id), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app
        .get(&format!("/api/v1/content/{}", published.id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "Harbor Nights");
}

#[tokio::test]
async fn test_search_term_length() {
    let app = TestApp::new().await;
    app.seed_movie("Harbor Nights").await;

    let (status, _) = app.get("/api/v1/content/search?q=h", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app.get("/api/v1/content/search?q=harbor", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_admin_routes_require_admin_role() {
    let app = TestApp::new().await;
    let (_, user_token) = app.register("plain@example.com").await;
    let (_, admin_token) = app.register_admin("admin@example.com").await;

    let (status, _) = app.get("/api/v1/admin/dashboard", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.get("/api/v1/admin/dashboard", Some(&user_token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.get("/api/v1/admin/dashboard", Some(&admin_token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["overview"]["total_users"], 2);
}

#[tokio::test]
async fn test_admin_content_lifecycle() {
    let app = TestApp::new().await;
    let (_, admin) = app.register_admin("editor@example.com").await;

    let (status, body) = app
        .post(
            "/api/v1/admin/content",
            Some(&admin),
            json!({
                "title": "Quiet Water",
                "description": "A documentary about rivers and the towns along them.",
                "type": "movie",
                "genres": ["documentary"],
                "runtime": 95,
                "rating": 8.1,
                "maturity_rating": "G",
                "language": "en",
                "country": "US",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "create failed: {}", body);
    assert_eq!(body["status"], "draft");
    let id = body["id"].as_str().unwrap().to_string();

    // Drafts are invisible to the public catalog
    let (status, _) = app.get(&format!("/api/v1/content/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .call(
            "POST",
            &format!("/api/v1/admin/content/{}/publish", id),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.get(&format!("/api/v1/content/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);

    // Deleting archives the item
    let (status, _) = app
        .call(
            "DELETE",
            &format!("/api/v1/admin/content/{}", id),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .get(&format!("/api/v1/admin/content/{}", id), Some(&admin))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "archived");

    let (status, _) = app.get(&format!("/api/v1/content/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_ban_blocks_access() {
    let app = TestApp::new().await;
    let (user_id, user_token) = app.register("banned@example.com").await;
    let (admin_id, admin) = app.register_admin("moderator@example.com").await;

    let (status, _) = app
        .post(
            &format!("/api/v1/admin/users/{}/ban", admin_id),
            Some(&admin),
            json!({"reason": "Testing self-ban protection"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post(
            &format!("/api/v1/admin/users/{}/ban", user_id),
            Some(&admin),
            json!({"reason": "Repeated terms of service violations"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.get("/api/v1/user/profile", Some(&user_token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .call(
            "POST",
            &format!("/api/v1/admin/users/{}/unban", user_id),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.get("/api/v1/user/profile", Some(&user_token)).await;
    assert_eq!(status, StatusCode::OK);
}

/// Wait for the background mailer and pull the code out of the newest
/// matching email.
async fn emailed_code(app: &TestApp, to: &str, subject: &str) -> Option<String> {
    for _ in 0..50 {
        let code = app
            .notifier
            .sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|e| e.to == to && e.subject == subject)
            .and_then(|e| {
                let (_, rest) = e.body.split_once("code: ")?;
                rest.lines().next().map(|line| line.trim().to_string())
            });
        if code.is_some() {
            return code;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    None
}

#[tokio::test]
async fn test_email_verification_flow() {
    let app = TestApp::new().await;
    let (_, token) = app.register("verify@example.com").await;

    let (_, body) = app.get("/api/v1/user/profile", Some(&token)).await;
    assert_eq!(body["is_email_verified"], false);

    let code = emailed_code(&app, "verify@example.com", "Welcome to Onflix")
        .await
        .expect("welcome email with code");

    let (status, body) = app
        .post("/api/v1/auth/verify-email", None, json!({"token": "not-the-code"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Invalid or expired verification token");

    // A resend replaces the outstanding code
    let (status, _) = app
        .post(
            "/api/v1/auth/resend-verification",
            None,
            json!({"email": "Verify@Example.com"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let fresh = emailed_code(&app, "verify@example.com", "Verify your email")
        .await
        .expect("verification email");
    assert_ne!(fresh, code);

    let (status, _) = app
        .post("/api/v1/auth/verify-email", None, json!({"token": code}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post("/api/v1/auth/verify-email", None, json!({"token": fresh}))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = app.get("/api/v1/user/profile", Some(&token)).await;
    assert_eq!(body["is_email_verified"], true);
    assert!(body["email_verified_at"].is_string());

    // Codes are single use
    let (status, _) = app
        .post("/api/v1/auth/verify-email", None, json!({"token": fresh}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .post(
            "/api/v1/auth/resend-verification",
            None,
            json!({"email": "verify@example.com"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Email is already verified");

    // Unknown addresses are not disclosed
    let (status, _) = app
        .post(
            "/api/v1/auth/resend-verification",
            None,
            json!({"email": "nobody@example.com"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_logout_requires_token() {
    let app = TestApp::new().await;
    let (_, token) = app.register("leaving@example.com").await;

    let (status, _) = app.call("POST", "/api/v1/auth/logout", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .call("POST", "/api/v1/auth/logout", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Logout successful");
}

#[tokio::test]
async fn test_language_and_maturity_preferences() {
    let app = TestApp::new().await;
    let (_, token) = app.register("prefs@example.com").await;

    let (status, body) = app
        .call(
            "PUT",
            "/api/v1/user/preferences/language",
            Some(&token),
            Some(json!({"language": "FR"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["language"], "fr");

    let (status, _) = app
        .call(
            "PUT",
            "/api/v1/user/preferences/language",
            Some(&token),
            Some(json!({"language": "french"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .call(
            "PUT",
            "/api/v1/user/preferences/maturity-rating",
            Some(&token),
            Some(json!({"maturity_rating": "TV-14"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["maturity_rating"], "TV-14");
    assert_eq!(body["language"], "fr");

    let (status, _) = app
        .call(
            "PUT",
            "/api/v1/user/preferences/maturity-rating",
            Some(&token),
            Some(json!({"maturity_rating": "X"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = app.get("/api/v1/user/preferences", Some(&token)).await;
    assert_eq!(body["language"], "fr");
    assert_eq!(body["maturity_rating"], "TV-14");
}

#[tokio::test]
async fn test_admin_user_management() {
    let app = TestApp::new().await;
    let (user_id, user_token) = app.register("managed@example.com").await;
    app.register("taken@example.com").await;
    let (admin_id, admin) = app.register_admin("support@example.com").await;
    let user_uri = format!("/api/v1/admin/users/{}", user_id);

    let (status, body) = app
        .call(
            "PUT",
            &user_uri,
            Some(&admin),
            Some(json!({
                "first_name": "Renamed",
                "email": "Managed.New@Example.com",
                "is_email_verified": true,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "update failed: {}", body);
    assert_eq!(body["first_name"], "Renamed");
    assert_eq!(body["email"], "managed.new@example.com");
    assert_eq!(body["is_email_verified"], true);

    let (status, _) = app
        .call(
            "PUT",
            &user_uri,
            Some(&admin),
            Some(json!({"email": "taken@example.com"})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .call(
            "PUT",
            &format!("/api/v1/admin/users/{}", admin_id),
            Some(&admin),
            Some(json!({"role": "user"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Password reset replaces the old credentials
    let (status, _) = app
        .post(
            &format!("{}/reset-password", user_uri),
            Some(&admin),
            json!({"new_password": "N3w!Passphrase"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app
        .post(
            "/api/v1/auth/login",
            None,
            json!({"email": "managed.new@example.com", "password": PASSWORD}),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app
        .post(
            "/api/v1/auth/login",
            None,
            json!({"email": "managed.new@example.com", "password": "N3w!Passphrase"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .post(
            &format!("{}/reset-password", user_uri),
            Some(&admin),
            json!({"new_password": "weak"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .call(
            "DELETE",
            &format!("/api/v1/admin/users/{}", admin_id),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.call("DELETE", &user_uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.get("/api/v1/user/profile", Some(&user_token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app.get(&user_uri, Some(&admin)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_active"], false);

    let (status, _) = app
        .call("DELETE", "/api/v1/admin/users/missing-user", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_user_and_content_analytics() {
    let app = TestApp::new().await;
    app.register("one@example.com").await;
    let (banned_id, _) = app.register("two@example.com").await;
    let (_, admin) = app.register_admin("analyst@example.com").await;
    app.seed_movie("First Light").await;
    app.seed_movie("Second Wind").await;
    app.seed_draft("Unfinished").await;

    app.post(
        &format!("/api/v1/admin/users/{}/ban", banned_id),
        Some(&admin),
        json!({"reason": "Chargeback fraud on several accounts"}),
    )
    .await;

    let (status, body) = app
        .get("/api/v1/admin/analytics/users?days=7", Some(&admin))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["period_days"], 7);
    assert_eq!(body["total_users"], 3);
    assert_eq!(body["new_users"], 3);
    assert_eq!(body["verified_users"], 0);
    let by_status = body["by_status"].as_array().unwrap();
    assert!(by_status.contains(&json!({"key": "active", "count": 2})));
    assert!(by_status.contains(&json!({"key": "inactive", "count": 1})));
    let by_role = body["by_role"].as_array().unwrap();
    assert!(by_role.contains(&json!({"key": "admin", "count": 1})));

    let (status, body) = app.get("/api/v1/admin/analytics/content", Some(&admin)).await;
    assert_eq!(status, StatusCode::OK);
    let by_status = body["by_status"].as_array().unwrap();
    assert!(by_status.contains(&json!({"key": "published", "count": 2})));
    assert!(by_status.contains(&json!({"key": "draft", "count": 1})));
    assert_eq!(body["by_type"], json!([{"key": "movie", "count": 2}]));
    assert_eq!(body["most_viewed"].as_array().unwrap().len(), 2);
}
