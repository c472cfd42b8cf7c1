//! Router-level tests that never reach Postgres or Redis: every request here
//! is answered by middleware or validation before any query runs.

mod common;

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use serde_json::{Value, json};
use sqlx::postgres::PgPoolOptions;
use stakehouse::{AppState, mail::Mailer, routes, utils::error_codes};
use tower::ServiceExt;

fn app() -> Router {
    let config = common::config();
    let pool = PgPoolOptions::new()
        .connect_lazy(&config.database_url)
        .unwrap();
    let redis = redis::Client::open(config.redis_url.clone()).unwrap();

    routes::router(AppState {
        pool,
        redis: Arc::new(redis),
        mailer: Mailer::console(config.default_from_email.clone()),
        config,
    })
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn protected_routes_require_a_token() {
    for uri in ["/staking/dashboard", "/twofactor/settings", "/accounts/profile"] {
        let response = app()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
    }
}

#[tokio::test]
async fn admin_routes_require_a_token() {
    let response = app()
        .oneshot(post_json("/admin/transactions/approve", json!({ "ids": [1] })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_bearer_token_is_rejected() {
    let request = Request::get("/staking/dashboard")
        .header(header::AUTHORIZATION, "Bearer not-a-jwt")
        .body(Body::empty())
        .unwrap();
    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn signup_reports_field_errors() {
    let response = app()
        .oneshot(post_json(
            "/accounts/signup",
            json!({
                "email": "not-an-email",
                "first_name": "Ada",
                "last_name": "Lovelace",
                "password1": "12345678",
                "password2": "12345679",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = json_body(response).await;
    assert_eq!(body["code"], error_codes::VALIDATION_ERROR);
    assert!(body["resp_data"]["email"].is_array());
    assert!(body["resp_data"]["password1"].is_array());
}

#[tokio::test]
async fn garbage_activation_link_is_invalid() {
    let response = app()
        .oneshot(
            Request::get("/accounts/activate/bm90LWEtdXVpZA/token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = json_body(response).await;
    assert_eq!(body["code"], error_codes::INVALID_LINK);
    assert_eq!(body["msg"], "Activation link is invalid or has expired.");
}
