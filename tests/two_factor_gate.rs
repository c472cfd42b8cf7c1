//! The second-factor gate mounted on a small router, with the signed-in user
//! attached the way `auth_middleware` would.
//!
//! Run with: `DATABASE_URL=postgres://... cargo test --test two_factor_gate -- --ignored`

mod common;

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
    middleware::{Next, from_fn, from_fn_with_state},
    routing::get,
};
use sqlx::PgPool;
use stakehouse::{
    AppState,
    mail::Mailer,
    middleware::two_factor_gate,
    routes::accounts::User,
    routes::twofactor::{TwoFactorMethod, TwoFactorSettings},
};
use tower::ServiceExt;

use common::Fixture;

fn gated(pool: PgPool, user: User) -> Router {
    let config = common::config();
    let redis = redis::Client::open(config.redis_url.clone()).unwrap();
    let state = AppState {
        pool,
        redis: Arc::new(redis),
        mailer: Mailer::console(config.default_from_email.clone()),
        config,
    };

    Router::new()
        .route("/staking/dashboard", get(|| async { "dashboard" }))
        .route("/twofactor/verify", get(|| async { "verify" }))
        .layer(from_fn_with_state(state, two_factor_gate))
        .layer(from_fn(move |mut req: Request<Body>, next: Next| {
            let user = user.clone();
            async move {
                req.extensions_mut().insert(user);
                next.run(req).await
            }
        }))
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// Enables email 2FA and backdates the last verification past the 14 day window.
async fn stale_second_factor(f: &Fixture, user: &User) {
    TwoFactorSettings::get_or_create(&f.pool, user.id).await.unwrap();
    TwoFactorSettings::enable(&f.pool, user.id, TwoFactorMethod::Email, None, &[])
        .await
        .unwrap();
    sqlx::query(
        "UPDATE two_factor_settings SET last_verified = NOW() - INTERVAL '15 days' WHERE user_id = $1",
    )
    .bind(user.id)
    .execute(&f.pool)
    .await
    .unwrap();
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires running PostgreSQL instance"]
async fn stale_verification_redirects_with_next(pool: PgPool) {
    let f = Fixture::new(pool);
    let user = f.user("stale@example.com").await;
    stale_second_factor(&f, &user).await;

    let response = gated(f.pool.clone(), user)
        .oneshot(get_request("/staking/dashboard"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers()[header::LOCATION],
        "/twofactor/verify?next=%2Fstaking%2Fdashboard"
    );
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires running PostgreSQL instance"]
async fn verification_page_is_reachable_while_stale(pool: PgPool) {
    let f = Fixture::new(pool);
    let user = f.user("pending@example.com").await;
    stale_second_factor(&f, &user).await;

    let response = gated(f.pool.clone(), user)
        .oneshot(get_request("/twofactor/verify"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires running PostgreSQL instance"]
async fn users_without_two_factor_pass_through(pool: PgPool) {
    let f = Fixture::new(pool);
    let user = f.user("plain@example.com").await;

    let response = gated(f.pool.clone(), user)
        .oneshot(get_request("/staking/dashboard"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires running PostgreSQL instance"]
async fn fresh_verification_passes_through(pool: PgPool) {
    let f = Fixture::new(pool);
    let user = f.user("fresh@example.com").await;
    TwoFactorSettings::get_or_create(&f.pool, user.id).await.unwrap();
    TwoFactorSettings::enable(&f.pool, user.id, TwoFactorMethod::Email, None, &[])
        .await
        .unwrap();

    let response = gated(f.pool.clone(), user)
        .oneshot(get_request("/staking/dashboard"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
