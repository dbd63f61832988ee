mod common;

use common::TestApp;
use common::PASSWORD;
use identity_service::config::RateLimitConfig;
use identity_service::domain::identity::models::Permission;
use identity_service::domain::identity::models::TokenScope;
use identity_service::domain::identity::models::UserId;
use reqwest::StatusCode;
use serde_json::json;
use serde_json::Value;
use uuid::Uuid;

#[tokio::test]
async fn test_healthcheck_reports_available() {
    let app = TestApp::spawn().await;

    let response = app.get("/health").send().await.expect("Failed to execute request");

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["data"]["status"], "available");
}

#[tokio::test]
async fn test_register_returns_token_and_publishes_event() {
    let app = TestApp::spawn().await;

    let token = app.register("alice").await;

    assert_eq!(token.len(), auth::TOKEN_LENGTH);
    let published = app.events.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].email, "alice@example.com");
    assert_eq!(published[0].activation_token.as_str(), token);

    let user_id = UserId(Uuid::parse_str(&published[0].user_id).unwrap());
    assert_eq!(app.store.token_count(&user_id, TokenScope::Activation), 1);
}

#[tokio::test]
async fn test_register_invalid_input_lists_every_field() {
    let app = TestApp::spawn().await;

    let response = app
        .post("/api/v1/users/register")
        .json(&json!({
            "username": "a!",
            "email": "not-an-email",
            "password": "short"
        }))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = response.json().await.expect("Failed to parse response");
    let errors = &body["data"]["errors"];
    assert!(errors["username"].is_string());
    assert!(errors["email"].is_string());
    assert!(errors["password"].is_string());
    assert!(app.events.published().is_empty());
}

#[tokio::test]
async fn test_register_duplicate_username_conflicts() {
    let app = TestApp::spawn().await;
    app.register("alice").await;

    let response = app
        .post("/api/v1/users/register")
        .json(&json!({
            "username": "alice",
            "email": "other@example.com",
            "password": PASSWORD
        }))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_activate_consumes_token_once() {
    let app = TestApp::spawn().await;
    let token = app.register("alice").await;

    let response = app.activate(&token).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["data"]["username"], "alice");
    assert_eq!(body["data"]["activated"], true);

    let user_id = UserId(Uuid::parse_str(body["data"]["id"].as_str().unwrap()).unwrap());
    assert_eq!(app.store.permissions(&user_id), vec![Permission::BlogWrite]);

    let replay = app.activate(&token).await;
    assert_eq!(replay.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_activate_with_malformed_token_is_unprocessable() {
    let app = TestApp::spawn().await;

    let response = app.activate("too-short").await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert!(body["data"]["errors"]["token"].is_string());
}

#[tokio::test]
async fn test_login_before_activation_is_forbidden() {
    let app = TestApp::spawn().await;
    app.register("alice").await;

    let response = app.login("alice", PASSWORD).await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_login_with_wrong_password_is_unauthorized() {
    let app = TestApp::spawn().await;
    let token = app.register("alice").await;
    app.activate(&token).await;

    let wrong = app.login("alice", "Wr0ngpass!").await;
    let unknown = app.login("nobody", PASSWORD).await;

    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_second_login_reuses_pair_without_plaintext() {
    let app = TestApp::spawn().await;
    let token = app.register("alice").await;
    app.activate(&token).await;

    let first: Value = app.login("alice", PASSWORD).await.json().await.unwrap();
    let second: Value = app.login("alice", PASSWORD).await.json().await.unwrap();

    assert_eq!(first["data"]["new_session"], true);
    assert!(first["data"]["access_token"].is_string());
    assert!(first["data"]["refresh_token"].is_string());

    assert_eq!(second["data"]["new_session"], false);
    assert!(second["data"].get("access_token").is_none());
    assert_eq!(
        first["data"]["access_token_expiry"],
        second["data"]["access_token_expiry"]
    );
}

#[tokio::test]
async fn test_me_returns_identity_for_access_token() {
    let app = TestApp::spawn().await;
    let access_token = app.signed_in("alice").await;

    let response = app
        .get_authenticated("/api/v1/users/me", &access_token)
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["data"]["username"], "alice");
    assert_eq!(body["data"]["permissions"], json!(["blog:write"]));
}

#[tokio::test]
async fn test_me_without_or_with_bad_token_is_unauthorized() {
    let app = TestApp::spawn().await;

    let missing = app
        .get("/api/v1/users/me")
        .send()
        .await
        .expect("Failed to execute request");
    let unknown = app
        .get_authenticated("/api/v1/users/me", "ABCDEFGHIJKLMNOPQRSTUVWXYZ")
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_revokes_access_token() {
    let app = TestApp::spawn().await;
    let access_token = app.signed_in("alice").await;

    // Warm the session cache before logging out
    let me = app
        .get_authenticated("/api/v1/users/me", &access_token)
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(me.status(), StatusCode::OK);

    let logout = app
        .delete_authenticated("/api/v1/users/logout", &access_token)
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(logout.status(), StatusCode::OK);

    let after = app
        .get_authenticated("/api/v1/users/me", &access_token)
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(after.status(), StatusCode::UNAUTHORIZED);

    let relogin: Value = app.login("alice", PASSWORD).await.json().await.unwrap();
    assert_eq!(relogin["data"]["new_session"], true);
}

#[tokio::test]
async fn test_rate_limit_rejects_burst_overflow() {
    let app = TestApp::spawn_with_rate_limit(RateLimitConfig {
        enabled: true,
        requests_per_second: 1,
        burst: 2,
    })
    .await;

    let mut statuses = Vec::new();
    for _ in 0..3 {
        let response = app.get("/health").send().await.expect("Failed to execute request");
        statuses.push(response.status());
    }

    assert_eq!(statuses[0], StatusCode::OK);
    assert_eq!(statuses[1], StatusCode::OK);
    assert_eq!(statuses[2], StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_rate_limit_ignores_spoofed_forwarded_for() {
    let app = TestApp::spawn_with_rate_limit(RateLimitConfig {
        enabled: true,
        requests_per_second: 1,
        burst: 2,
    })
    .await;

    let mut statuses = Vec::new();
    for hop in ["198.51.100.1", "198.51.100.2", "198.51.100.3"] {
        let response = app
            .get("/health")
            .header("X-Forwarded-For", hop)
            .send()
            .await
            .expect("Failed to execute request");
        statuses.push(response.status());
    }

    assert_eq!(statuses[2], StatusCode::TOO_MANY_REQUESTS);
}
