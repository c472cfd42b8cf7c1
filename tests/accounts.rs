//! Account and second-factor persistence tests.
//!
//! Run with: `DATABASE_URL=postgres://... cargo test --test accounts -- --ignored`

mod common;

use chrono::Duration;
use sqlx::PgPool;
use stakehouse::error::AppError;
use stakehouse::routes::accounts::{Profile, User};
use stakehouse::routes::twofactor::{EmailOtp, TwoFactorMethod, TwoFactorSettings};

use common::{Fixture, PASSWORD};

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires running PostgreSQL instance"]
async fn registration_creates_exactly_one_profile(pool: PgPool) {
    let f = Fixture::new(pool);
    let user = f.user("new@example.com").await;
    assert!(!user.is_email_verified);

    let first = Profile::get_or_create(&f.pool, user.id).await.unwrap();
    let again = Profile::get_or_create(&f.pool, user.id).await.unwrap();
    assert_eq!(first.user_id, again.user_id);
    assert_eq!(first.created_at, again.created_at);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM profiles WHERE user_id = $1")
        .bind(user.id)
        .fetch_one(&f.pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires running PostgreSQL instance"]
async fn duplicate_email_is_a_conflict(pool: PgPool) {
    let f = Fixture::new(pool);
    f.user("taken@example.com").await;

    let err = User::register(&f.pool, "taken@example.com", None, PASSWORD, "A", "B")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    assert!(User::email_taken(&f.pool, "taken@example.com").await.unwrap());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires running PostgreSQL instance"]
async fn activation_only_happens_once(pool: PgPool) {
    let f = Fixture::new(pool);
    let user = f.user("activate@example.com").await;

    let first = User::mark_verified(&f.pool, user.id).await.unwrap();
    assert!(first.is_some_and(|u| u.is_email_verified));
    assert!(User::mark_verified(&f.pool, user.id).await.unwrap().is_none());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires running PostgreSQL instance"]
async fn activation_does_not_reenable_a_deactivated_account(pool: PgPool) {
    let f = Fixture::new(pool);
    let user = f.user("suspended@example.com").await;
    sqlx::query("UPDATE users SET is_active = FALSE WHERE id = $1")
        .bind(user.id)
        .execute(&f.pool)
        .await
        .unwrap();

    let activated = User::mark_verified(&f.pool, user.id).await.unwrap().unwrap();
    assert!(activated.is_email_verified);
    assert!(!activated.is_active);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires running PostgreSQL instance"]
async fn email_otp_is_single_use(pool: PgPool) {
    let f = Fixture::new(pool);
    let user = f.user("otp@example.com").await;

    EmailOtp::issue(&f.pool, user.id, "123456", Duration::minutes(10))
        .await
        .unwrap();
    assert!(EmailOtp::has_live(&f.pool, user.id).await.unwrap());

    assert!(!EmailOtp::redeem(&f.pool, user.id, "654321").await.unwrap());
    assert!(EmailOtp::redeem(&f.pool, user.id, "123456").await.unwrap());
    assert!(!EmailOtp::redeem(&f.pool, user.id, "123456").await.unwrap());
    assert!(!EmailOtp::has_live(&f.pool, user.id).await.unwrap());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires running PostgreSQL instance"]
async fn expired_email_otp_is_refused(pool: PgPool) {
    let f = Fixture::new(pool);
    let user = f.user("late@example.com").await;

    EmailOtp::issue(&f.pool, user.id, "111111", Duration::minutes(-1))
        .await
        .unwrap();
    assert!(!EmailOtp::redeem(&f.pool, user.id, "111111").await.unwrap());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires running PostgreSQL instance"]
async fn backup_codes_are_consumed_once(pool: PgPool) {
    let f = Fixture::new(pool);
    let user = f.user("backup@example.com").await;
    let codes = vec!["12345678".to_string(), "87654321".to_string()];

    TwoFactorSettings::get_or_create(&f.pool, user.id).await.unwrap();
    let settings = TwoFactorSettings::enable(&f.pool, user.id, TwoFactorMethod::Email, None, &codes)
        .await
        .unwrap();
    assert!(settings.is_enabled);

    assert!(TwoFactorSettings::consume_backup_code(&f.pool, user.id, "12345678").await.unwrap());
    assert!(!TwoFactorSettings::consume_backup_code(&f.pool, user.id, "12345678").await.unwrap());

    let remaining = TwoFactorSettings::get_or_create(&f.pool, user.id).await.unwrap();
    assert_eq!(remaining.backup_codes, vec!["87654321".to_string()]);
}
