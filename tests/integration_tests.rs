// [business] Integration tests for the HTTP surface
// Requests go through the full router (routing, extractors, state) backed by the in-memory store

use axum::{
    body::Body,
    http::{header::CONTENT_TYPE, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use iara::{
    config::Config,
    db::MemoryStore,
    security::{extract_kid_from_jwt, password::HashParams, KeyPolicy},
    web::create_app_router,
};
use secrecy::Secret;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const ADMIN_KEY: &str = "admin-key-0123456789";

fn test_config() -> Config {
    Config {
        issuer: "https://id.example.test".to_string(),
        keys: KeyPolicy {
            rsa_bits: 2048,
            max_retained: 1,
        },
        hashing: HashParams {
            time: 1,
            memory: 1024,
            threads: 1,
            key_length: 32,
            salt_length: 16,
        },
        admin_api_key: Some(Secret::new(ADMIN_KEY.to_string())),
        ..Config::default()
    }
}

fn test_app() -> Router {
    create_app_router(Arc::new(MemoryStore::new()), test_config())
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn admin_request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-api-key", ADMIN_KEY);
    match body {
        Some(body) => builder
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn json_request(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn token_request(client_id: &str, client_secret: &str, audience: &str) -> Request<Body> {
    // Generated identifiers and secrets are base64url, safe to place in a form body as-is
    let form = format!(
        "grant_type=client_credentials&client_id={client_id}&client_secret={client_secret}&audience={audience}"
    );
    Request::post("/oauth2/token")
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form))
        .unwrap()
}

async fn create_api(app: &Router, audience: &str, token_type: &str) {
    let (status, body) = send(
        app,
        admin_request(
            Method::POST,
            "/admin/apis",
            Some(json!({"name": "Billing API", "audience": audience, "token_type": token_type})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
}

async fn create_machine_client(app: &Router, audiences: &[&str]) -> (String, String) {
    let (status, body) = send(
        app,
        admin_request(
            Method::POST,
            "/admin/clients",
            Some(json!({
                "name": "Nightly export",
                "grant_types": ["client_credentials"],
                "allowed_audiences": audiences,
                "token_lifetime": 600
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    (
        body["client_id"].as_str().unwrap().to_string(),
        body["client_secret"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn test_health_endpoint() {
    let response = test_app()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"OK");
}

#[tokio::test]
async fn test_discovery_endpoint() {
    let app = test_app();
    let (status, body) = send(
        &app,
        Request::get("/.well-known/openid-configuration")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["issuer"], "https://id.example.test");
    assert_eq!(body["token_endpoint"], "https://id.example.test/oauth2/token");
    assert_eq!(body["jwks_uri"], "https://id.example.test/.well-known/jwks.json");
}

#[tokio::test]
async fn test_client_credentials_rs256_flow() {
    let app = test_app();
    create_api(&app, "billing", "RS256").await;
    let (client_id, client_secret) = create_machine_client(&app, &["billing"]).await;

    let (status, token) = send(&app, token_request(&client_id, &client_secret, "billing")).await;
    assert_eq!(status, StatusCode::OK, "{token}");
    assert_eq!(token["token_type"], "Bearer");
    assert_eq!(token["expires_in"], 600);

    let access_token = token["access_token"].as_str().unwrap();
    let kid = extract_kid_from_jwt(access_token).unwrap();

    // The signing key is published with the same kid
    let (status, jwks) = send(
        &app,
        Request::get("/.well-known/jwks.json")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let keys = jwks["keys"].as_array().unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0]["kid"], kid.as_str());
    assert_eq!(keys[0]["alg"], "RS256");
    assert!(keys[0].get("d").is_none());
}

#[tokio::test]
async fn test_client_credentials_hs256_flow_publishes_no_keys() {
    let app = test_app();
    create_api(&app, "reports", "HS256").await;
    let (client_id, client_secret) = create_machine_client(&app, &["reports"]).await;

    let (status, token) = send(&app, token_request(&client_id, &client_secret, "reports")).await;
    assert_eq!(status, StatusCode::OK, "{token}");
    assert_eq!(token["access_token"].as_str().unwrap().split('.').count(), 3);

    let (_, jwks) = send(
        &app,
        Request::get("/.well-known/jwks.json")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert!(jwks["keys"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_token_endpoint_errors() {
    let app = test_app();
    create_api(&app, "billing", "HS256").await;
    let (client_id, client_secret) = create_machine_client(&app, &["billing"]).await;

    let (status, body) = send(&app, token_request(&client_id, "wrong-secret", "billing")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_client");

    let (status, body) = send(&app, token_request("unknown", &client_secret, "billing")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_client");

    // Unknown and unauthorized audiences are indistinguishable
    let (status, unknown) = send(&app, token_request(&client_id, &client_secret, "ghost")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(unknown["error"], "unauthorized_client");

    let missing_audience = Request::post("/oauth2/token")
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(format!(
            "grant_type=client_credentials&client_id={client_id}&client_secret={client_secret}"
        )))
        .unwrap();
    let (status, body) = send(&app, missing_audience).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");

    let wrong_grant = Request::post("/oauth2/token")
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(format!(
            "grant_type=device_code&client_id={client_id}&audience=billing"
        )))
        .unwrap();
    let (status, body) = send(&app, wrong_grant).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "unsupported_grant_type");
}

#[tokio::test]
async fn test_key_rotation_keeps_previous_key_published() {
    let app = test_app();
    create_api(&app, "billing", "RS256").await;

    let (status, _) = send(
        &app,
        admin_request(Method::POST, "/admin/apis/billing/rotate", None),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, jwks) = send(
        &app,
        Request::get("/.well-known/jwks.json")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(jwks["keys"].as_array().unwrap().len(), 2);

    let (status, body) = send(
        &app,
        admin_request(Method::POST, "/admin/apis/missing/rotate", None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_admin_requires_api_key() {
    let app = test_app();

    let (status, body) = send(
        &app,
        json_request("/admin/clients", json!({"name": "Intruder"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_client");

    let wrong_key = Request::post("/admin/clients")
        .header(CONTENT_TYPE, "application/json")
        .header("authorization", "API-Key not-the-admin-key")
        .body(Body::from(json!({"name": "Intruder"}).to_string()))
        .unwrap();
    let (status, _) = send(&app, wrong_key).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_client_lifecycle() {
    let app = test_app();
    let (client_id, _) = create_machine_client(&app, &[]).await;
    let uri = format!("/admin/clients/{client_id}");

    let (status, body) = send(
        &app,
        admin_request(
            Method::PATCH,
            &uri,
            Some(json!({"allowed_audiences": ["billing"], "token_lifetime": 120})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token_lifetime"], 120);
    assert_eq!(body["allowed_audiences"], json!(["billing"]));

    let (status, body) = send(
        &app,
        admin_request(Method::PATCH, &uri, Some(json!({"token_lifetime": -5}))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");

    let (status, _) = send(&app, admin_request(Method::DELETE, &uri, None)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app, admin_request(Method::GET, &uri, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_duplicate_audience_conflicts() {
    let app = test_app();
    create_api(&app, "billing", "HS256").await;

    let (status, body) = send(
        &app,
        admin_request(
            Method::POST,
            "/admin/apis",
            Some(json!({"name": "Other", "audience": "billing", "token_type": "HS256"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");
}

#[tokio::test]
async fn test_register_and_login() {
    let app = test_app();
    let registration = json!({
        "email": "ana@example.com",
        "username": "ana",
        "password": "correct horse",
        "phone_number": null
    });

    let (status, body) = send(&app, json_request("/register", registration.clone())).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["username"], "ana");
    assert!(body.get("credential").is_none());

    let (status, body) = send(&app, json_request("/register", registration)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invalid_request");

    let (status, body) = send(
        &app,
        json_request("/login", json!({"username": "ana", "password": "correct horse"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "ana@example.com");

    let (status, body) = send(
        &app,
        json_request("/login", json!({"username": "ana", "password": "wrong horse"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "access_denied");
}

#[tokio::test]
async fn test_register_rejects_short_password() {
    let app = test_app();
    let (status, body) = send(
        &app,
        json_request(
            "/register",
            json!({"email": "bo@example.com", "username": "bo", "password": "short"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");
}
