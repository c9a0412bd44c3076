//! Chat proxy against a mocked inference service and a mocked GoTrue.

mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::Router;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use aterges::api;
use aterges::auth::HostedAuthClient;
use common::{build_state, call, test_config};

struct ChatHarness {
    inference: MockServer,
    gotrue: MockServer,
    router: Router,
}

async fn harness() -> ChatHarness {
    let inference = MockServer::start().await;
    let gotrue = MockServer::start().await;

    let mut config = test_config();
    config.inference_api_url = inference.uri();
    let identity = Arc::new(HostedAuthClient::new(
        reqwest::Client::new(),
        gotrue.uri(),
        "anon-key",
    ));
    let (state, _store) = build_state(config, identity);

    ChatHarness {
        inference,
        gotrue,
        router: api::app(state),
    }
}

async fn inference_answers(server: &MockServer, token: &str, status: u16, body: Value) {
    Mock::given(method("POST"))
        .and(path("/api/query"))
        .and(header("authorization", format!("Bearer {}", token).as_str()))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(server)
        .await;
}

async fn refresh_answers(server: &MockServer, refresh_token: &str, status: u16, body: Value) {
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "refresh_token"))
        .and(header("apikey", "anon-key"))
        .and(body_json(json!({ "refresh_token": refresh_token })))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(server)
        .await;
}

fn fresh_session() -> Value {
    json!({
        "access_token": "new-access",
        "refresh_token": "new-refresh",
        "expires_in": 3600,
        "token_type": "bearer",
    })
}

fn jwt_expiring_in(secs: i64) -> String {
    encode(
        &Header::new(Algorithm::HS256),
        &json!({
            "sub": uuid::Uuid::new_v4().to_string(),
            "exp": chrono::Utc::now().timestamp() + secs,
        }),
        &EncodingKey::from_secret(b"unrelated-secret"),
    )
    .unwrap()
}

#[tokio::test]
async fn test_chat_relays_inference_response() {
    let h = harness().await;
    Mock::given(method("POST"))
        .and(path("/api/query"))
        .and(header("authorization", "Bearer valid-token"))
        .and(body_json(json!({ "prompt": "What was revenue last quarter?" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response": "About 4.2M."})))
        .expect(1)
        .mount(&h.inference)
        .await;

    let (status, json) = call(
        &h.router,
        "POST",
        "/api/chat",
        Some("valid-token"),
        Some(json!({ "prompt": "What was revenue last quarter?" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json,
        json!({"message": {"role": "assistant", "content": "About 4.2M."}})
    );
}

#[tokio::test]
async fn test_rejected_token_is_refreshed_once_and_retried() {
    let h = harness().await;
    inference_answers(&h.inference, "old-access", 401, json!({"detail": "expired"})).await;
    inference_answers(&h.inference, "new-access", 200, json!({"response": "hello"})).await;
    refresh_answers(&h.gotrue, "old-refresh", 200, fresh_session()).await;

    let (status, json) = call(
        &h.router,
        "POST",
        "/api/chat",
        Some("old-access"),
        Some(json!({ "prompt": "hi", "refresh_token": "old-refresh" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"]["content"], "hello");
    assert_eq!(json["session"]["access_token"], "new-access");
    assert_eq!(json["session"]["refresh_token"], "new-refresh");
}

#[tokio::test]
async fn test_failed_refresh_is_unauthorized() {
    let h = harness().await;
    inference_answers(&h.inference, "old-access", 401, json!({})).await;
    refresh_answers(
        &h.gotrue,
        "revoked",
        400,
        json!({"error": "invalid_grant", "error_description": "Invalid Refresh Token: Already Used"}),
    )
    .await;

    let (status, json) = call(
        &h.router,
        "POST",
        "/api/chat",
        Some("old-access"),
        Some(json!({ "prompt": "hi", "refresh_token": "revoked" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"]["code"], "unauthorized");
}

#[tokio::test]
async fn test_rejection_without_refresh_token_is_unauthorized() {
    let h = harness().await;
    inference_answers(&h.inference, "old-access", 401, json!({})).await;

    let (status, _) = call(
        &h.router,
        "POST",
        "/api/chat",
        Some("old-access"),
        Some(json!({ "prompt": "hi" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_refreshed_token_rejected_again_is_not_refreshed_twice() {
    let h = harness().await;
    inference_answers(&h.inference, "old-access", 401, json!({})).await;
    inference_answers(&h.inference, "new-access", 401, json!({})).await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(fresh_session()))
        .expect(1)
        .mount(&h.gotrue)
        .await;

    let (status, _) = call(
        &h.router,
        "POST",
        "/api/chat",
        Some("old-access"),
        Some(json!({ "prompt": "hi", "refresh_token": "old-refresh" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_stale_jwt_is_refreshed_before_the_first_call() {
    let h = harness().await;
    let stale = jwt_expiring_in(5);
    Mock::given(method("POST"))
        .and(path("/api/query"))
        .and(header("authorization", format!("Bearer {}", stale).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response": "stale"})))
        .expect(0)
        .mount(&h.inference)
        .await;
    inference_answers(&h.inference, "new-access", 200, json!({"response": "fresh"})).await;
    refresh_answers(&h.gotrue, "old-refresh", 200, fresh_session()).await;

    let (status, json) = call(
        &h.router,
        "POST",
        "/api/chat",
        Some(&stale),
        Some(json!({ "prompt": "hi", "refresh_token": "old-refresh" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"]["content"], "fresh");
    assert_eq!(json["session"]["access_token"], "new-access");
}

#[tokio::test]
async fn test_unexpired_jwt_is_used_as_is() {
    let h = harness().await;
    let valid = jwt_expiring_in(3600);
    inference_answers(&h.inference, &valid, 200, json!({"response": "ok"})).await;

    let (status, json) = call(
        &h.router,
        "POST",
        "/api/chat",
        Some(&valid),
        Some(json!({ "prompt": "hi", "refresh_token": "unused" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(json.get("session").is_none());
}

#[tokio::test]
async fn test_chat_input_and_upstream_errors() {
    let h = harness().await;

    let (status, _) = call(&h.router, "POST", "/api/chat", None, Some(json!({"prompt": "hi"}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, json) = call(
        &h.router,
        "POST",
        "/api/chat",
        Some("valid-token"),
        Some(json!({ "prompt": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["message"], "Prompt is required");

    inference_answers(&h.inference, "valid-token", 200, json!({"answer": "wrong field"})).await;
    let (status, json) = call(
        &h.router,
        "POST",
        "/api/chat",
        Some("valid-token"),
        Some(json!({ "prompt": "hi" })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"]["code"], "upstream_failure");
}
