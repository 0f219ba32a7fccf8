use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    extract::connect_info::MockConnectInfo,
    http::{header, Request, StatusCode},
    Router,
};
use identity_backend::{
    build_router,
    config::AssertionAlgorithm,
    database::memory::MemoryStore,
    utils::assertion::{JwtAssertionVerifier, ProviderClaims},
    AppState,
};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value as JsonValue};
use tower::ServiceExt;

const SECRET: &str = "provider-test-secret";
const ISSUER: &str = "https://issuer.test";
const AUDIENCE: &str = "identity-backend";

const PEER: ([u8; 4], u16) = ([192, 0, 2, 10], 40000);
const FORWARDED: &str = "198.51.100.4";

fn build_app(rps: u32, trust_forwarded_for: bool) -> (Router, Arc<MemoryStore>) {
    let verifier = JwtAssertionVerifier::new(AssertionAlgorithm::Hs256, SECRET, ISSUER, AUDIENCE, 0)
        .expect("verifier");
    let store = Arc::new(MemoryStore::new());
    let state = AppState::new(Arc::new(verifier), store.clone(), Some("audit-key".into()))
        .trust_forwarded_for(trust_forwarded_for);
    let router = build_router(state, rps).layer(MockConnectInfo(SocketAddr::from(PEER)));
    (router, store)
}

fn app() -> (Router, Arc<MemoryStore>) {
    build_app(1000, false)
}

fn assertion(sub: &str, email: Option<&str>, verified: bool) -> String {
    assertion_named(sub, email, verified, None)
}

fn assertion_named(sub: &str, email: Option<&str>, verified: bool, name: Option<String>) -> String {
    let now = chrono::Utc::now().timestamp() as usize;
    let claims = ProviderClaims {
        sub: sub.into(),
        exp: now + 3600,
        iat: Some(now),
        iss: Some(ISSUER.into()),
        aud: Some(AUDIENCE.into()),
        email: email.map(str::to_string),
        email_verified: Some(verified),
        name,
        phone_number: None,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .expect("encode assertion")
}

async fn post_json(app: &Router, uri: &str, body: JsonValue) -> (StatusCode, JsonValue) {
    post_json_from(app, uri, body, FORWARDED).await
}

async fn post_json_from(
    app: &Router,
    uri: &str,
    body: JsonValue,
    forwarded_for: &str,
) -> (StatusCode, JsonValue) {
    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .header("user-agent", "api-test")
                .header("x-forwarded-for", forwarded_for)
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    read(res).await
}

async fn get(app: &Router, uri: &str, bearer: Option<&str>) -> (StatusCode, JsonValue) {
    let mut req = Request::builder().method("GET").uri(uri);
    if let Some(token) = bearer {
        req = req.header("authorization", format!("Bearer {}", token));
    }
    let res = app
        .clone()
        .oneshot(req.body(Body::empty()).unwrap())
        .await
        .unwrap();
    read(res).await
}

async fn read(res: axum::response::Response) -> (StatusCode, JsonValue) {
    let status = res.status();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null);
    (status, body)
}

#[tokio::test]
async fn login_complete_profile_and_me_flow() {
    let (app, store) = app();
    let token = assertion("sub-1", Some("Ana@Example.com"), true);

    let (status, body) = post_json(&app, "/api/auth/login/token", json!({ "id_token": token })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["created"], true);
    assert_eq!(body["data"]["lifecycle_state"], "email_verified_incomplete");
    assert_eq!(body["data"]["user"]["email"], "ana@example.com");
    assert_eq!(body["data"]["user"]["handle"], "ana");
    assert_eq!(body["data"]["user"]["last_login_ip"], "192.0.2.10");

    let (status, body) = post_json(
        &app,
        "/api/auth/complete-profile",
        json!({
            "id_token": token,
            "data": { "display_name": "Ana", "family_name": "Lopez", "phone": "+1 555 010 9999" }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["lifecycle_state"], "complete");
    assert_eq!(body["data"]["user"]["phone"], "+15550109999");

    let (status, body) = get(&app, "/api/auth/me", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["display_name"], "Ana");
    assert_eq!(body["data"]["lifecycle_state"], "complete");

    let audit = store.wait_for_audit(2).await;
    assert!(audit.iter().all(|r| r.user_agent.as_deref() == Some("api-test")));
    assert!(audit
        .iter()
        .any(|r| r.endpoint.as_deref() == Some("/api/auth/complete-profile")));
}

#[tokio::test]
async fn unverified_login_is_forbidden_but_record_exists() {
    let (app, store) = app();
    let token = assertion("sub-2", Some("bo@example.com"), false);

    let (status, body) = post_json(&app, "/api/auth/login/token", json!({ "id_token": token })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "email_not_verified");
    assert_eq!(store.user_count(), 1);
}

#[tokio::test]
async fn register_reports_created_then_updated() {
    let (app, _store) = app();
    let token = assertion("sub-3", Some("cy@example.com"), false);
    let request = json!({
        "id_token": token,
        "data": { "display_name": "Cy", "birth_date": "1988-02-29", "role": "ADMIN" }
    });

    let (status, body) = post_json(&app, "/api/auth/register", request.clone()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["created"], true);
    assert_eq!(body["data"]["lifecycle_state"], "unverified");
    assert_eq!(body["data"]["user"]["role"], "ADMIN");

    let (status, body) = post_json(&app, "/api/auth/register", request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["created"], false);
}

#[tokio::test]
async fn register_with_foreign_email_conflicts() {
    let (app, store) = app();
    let owner = assertion("owner", Some("shared@example.com"), true);
    post_json(&app, "/api/auth/login/token", json!({ "id_token": owner })).await;

    let intruder = assertion("intruder", Some("other@example.com"), true);
    let (status, body) = post_json(
        &app,
        "/api/auth/register",
        json!({ "id_token": intruder, "data": { "email": "shared@example.com" } }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "email_already_registered");
    assert_eq!(store.user_count(), 1);
}

#[tokio::test]
async fn register_rejects_malformed_profile() {
    let (app, store) = app();
    let token = assertion("sub-4", Some("di@example.com"), true);
    let (status, body) = post_json(
        &app,
        "/api/auth/register",
        json!({ "id_token": token, "data": { "email": "not-an-email" } }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");
    assert_eq!(store.user_count(), 0);
}

#[tokio::test]
async fn bad_assertions_and_unknown_users() {
    let (app, _store) = app();

    let (status, body) =
        post_json(&app, "/api/auth/login/token", json!({ "id_token": "not.a.jwt" })).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "invalid_assertion");

    let (status, _) = get(&app, "/api/auth/me", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let stranger = assertion("nobody", Some("nobody@example.com"), true);
    let (status, body) = get(&app, "/api/auth/me", Some(&stranger)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "user_not_found");

    let (status, body) = post_json(
        &app,
        "/api/auth/complete-profile",
        json!({ "id_token": stranger, "data": { "display_name": "Nobody" } }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "user_not_found");
}

#[tokio::test]
async fn health_and_openapi_are_served() {
    let (app, _store) = app();
    let (status, body) = get(&app, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = get(&app, "/api/openapi.json", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/api/auth/login/token"].is_object());
    assert!(body["paths"]["/api/auth/complete-profile"].is_object());
}

#[tokio::test]
async fn auth_routes_are_rate_limited_per_client() {
    let (app, _store) = build_app(1, false);
    let token = assertion("sub-5", Some("ed@example.com"), true);

    let (first, _) = post_json(&app, "/api/auth/login/token", json!({ "id_token": token })).await;
    assert_eq!(first, StatusCode::OK);
    let (second, body) = post_json(&app, "/api/auth/login/token", json!({ "id_token": token })).await;
    assert_eq!(second, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["code"], "rate_limit_exceeded");

    // A rotated forwarding header does not reset the window of a direct client.
    let (third, _) = post_json_from(
        &app,
        "/api/auth/login/token",
        json!({ "id_token": token }),
        "203.0.113.200",
    )
    .await;
    assert_eq!(third, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn forwarded_address_is_recorded_only_behind_a_trusted_proxy() {
    let token = assertion("sub-6", Some("fe@example.com"), true);

    let (direct, store) = app();
    let (_, body) = post_json(&direct, "/api/auth/login/token", json!({ "id_token": token })).await;
    assert_eq!(body["data"]["user"]["last_login_ip"], "192.0.2.10");
    let audit = store.wait_for_audit(1).await;
    assert_eq!(audit[0].client_ip.as_deref(), Some("192.0.2.10"));

    let (proxied, _store) = build_app(1000, true);
    let (_, body) = post_json(&proxied, "/api/auth/login/token", json!({ "id_token": token })).await;
    assert_eq!(body["data"]["user"]["last_login_ip"], FORWARDED);
}

#[tokio::test]
async fn auth_responses_carry_security_headers() {
    let (app, _store) = app();
    let token = assertion("sub-7", Some("gi@example.com"), true);
    let res = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/auth/login/token")
                .header("content-type", "application/json")
                .body(Body::from(json!({ "id_token": token }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let headers = res.headers();
    assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    assert_eq!(headers[header::X_FRAME_OPTIONS], "DENY");
    assert_eq!(headers[header::CACHE_CONTROL], "no-store");
}

#[tokio::test]
async fn oversized_provider_name_is_stored_truncated() {
    let (app, store) = app();
    let plain = assertion("sub-8", Some("hu@example.com"), true);
    post_json(&app, "/api/auth/login/token", json!({ "id_token": plain })).await;

    let long_name = assertion_named("sub-8", Some("hu@example.com"), true, Some("N".repeat(150)));
    let (status, body) =
        post_json(&app, "/api/auth/login/token", json!({ "id_token": long_name })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["user"]["display_name"], "N".repeat(100));
    assert_eq!(
        store.users()[0].display_name.as_ref().map(|n| n.chars().count()),
        Some(100)
    );
}
