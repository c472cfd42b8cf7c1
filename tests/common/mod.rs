#![allow(dead_code)]

use rust_decimal::Decimal;
use sqlx::PgPool;
use stakehouse::config::Config;
use stakehouse::routes::accounts::User;
use stakehouse::routes::staking::model::{
    self, AssetType, AssetWallet, Plan, Transaction,
};
use stakehouse::routes::staking::ledger::Review;
use uuid::Uuid;

pub const PASSWORD: &str = "correct-horse-battery";

pub fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

pub fn config() -> Config {
    Config {
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/stakehouse_test".into()),
        redis_url: "redis://127.0.0.1/".into(),
        jwt_secret: "integration-secret".into(),
        jwt_expiration_secs: 3600,
        link_token_expiration_secs: 3600,
        rate_limit_window_secs: 60,
        rate_limit_requests: 1000,
        server_host: "127.0.0.1".into(),
        server_port: 0,
        site_url: "http://localhost:3000".into(),
        site_name: "Stakehouse".into(),
        default_from_email: "noreply@example.com".into(),
        admin_email: "ops@example.com".into(),
        smtp: None,
        media_root: std::env::temp_dir().join("stakehouse-tests"),
        two_factor_window_days: 14,
        email_otp_expiry_minutes: 10,
        otp_max_attempts: 5,
        otp_attempt_window_secs: 900,
    }
}

/// Builds users and balances for ledger tests.
pub struct Fixture {
    pub pool: PgPool,
}

impl Fixture {
    pub fn new(pool: PgPool) -> Self {
        Fixture { pool }
    }

    pub async fn user(&self, email: &str) -> User {
        let (user, _profile) = User::register(&self.pool, email, None, PASSWORD, "Test", "User")
            .await
            .unwrap();
        user
    }

    pub async fn balance(&self, user_id: Uuid, asset: AssetType) -> Decimal {
        let mut conn = self.pool.acquire().await.unwrap();
        AssetWallet::get_or_create(&mut conn, user_id, asset)
            .await
            .unwrap()
            .balance
    }

    /// Deposits and approves `amount`, the only way money enters a wallet.
    pub async fn fund(&self, user_id: Uuid, asset: AssetType, amount: Decimal) {
        let deposit = model::request_deposit(&self.pool, user_id, asset, amount, Some("0xfeed"))
            .await
            .unwrap();
        let approved = Transaction::review(&self.pool, deposit.id, Review::Approve)
            .await
            .unwrap();
        assert!(approved.is_some());
    }

    pub async fn plan(&self, days: i32, roi: Decimal, minimum: Decimal) -> Plan {
        Plan::create(&self.pool, &format!("{days} day plan"), days, roi, minimum)
            .await
            .unwrap()
    }
}
