//! Ledger tests against a real database.
//!
//! Run with: `DATABASE_URL=postgres://... cargo test --test ledger -- --ignored`

mod common;

use rust_decimal::Decimal;
use sqlx::PgPool;
use stakehouse::error::AppError;
use stakehouse::routes::staking::ledger::Review;
use stakehouse::routes::staking::model::{
    self, AssetType, ExchangeRate, Stake, Transaction, TransactionStatus,
};

use common::{Fixture, dec};

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires running PostgreSQL instance"]
async fn approving_a_deposit_twice_credits_once(pool: PgPool) {
    let f = Fixture::new(pool);
    let user = f.user("depositor@example.com").await;

    let deposit = model::request_deposit(&f.pool, user.id, AssetType::Usdt, dec("1000"), None)
        .await
        .unwrap();
    assert_eq!(deposit.status, TransactionStatus::Pending);
    assert_eq!(f.balance(user.id, AssetType::Usdt).await, Decimal::ZERO);

    let first = Transaction::review(&f.pool, deposit.id, Review::Approve).await.unwrap();
    assert_eq!(first.map(|t| t.status), Some(TransactionStatus::Confirmed));
    let second = Transaction::review(&f.pool, deposit.id, Review::Approve).await.unwrap();
    assert!(second.is_none());

    assert_eq!(f.balance(user.id, AssetType::Usdt).await, dec("1000"));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires running PostgreSQL instance"]
async fn rejected_withdrawal_is_refunded(pool: PgPool) {
    let f = Fixture::new(pool);
    let user = f.user("withdrawer@example.com").await;
    f.fund(user.id, AssetType::Btc, dec("1")).await;

    let (withdrawal, wallet) =
        model::request_withdrawal(&f.pool, user.id, AssetType::Btc, dec("0.4"), "bc1qdestination")
            .await
            .unwrap();
    assert_eq!(wallet.balance, dec("0.6"));

    let rejected = Transaction::review(&f.pool, withdrawal.id, Review::Reject).await.unwrap();
    assert_eq!(rejected.map(|t| t.status), Some(TransactionStatus::Rejected));
    assert_eq!(f.balance(user.id, AssetType::Btc).await, dec("1"));

    let err = model::request_withdrawal(&f.pool, user.id, AssetType::Btc, dec("2"), "bc1q")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InsufficientBalance));
    assert_eq!(f.balance(user.id, AssetType::Btc).await, dec("1"));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires running PostgreSQL instance"]
async fn swap_moves_both_legs_at_the_stored_rate(pool: PgPool) {
    let f = Fixture::new(pool);
    let user = f.user("swapper@example.com").await;
    f.fund(user.id, AssetType::Usdt, dec("1000")).await;
    ExchangeRate::upsert(&f.pool, AssetType::Usdt, AssetType::Eth, dec("0.0004"))
        .await
        .unwrap();

    let swap = model::swap(&f.pool, user.id, AssetType::Usdt, AssetType::Eth, dec("500"))
        .await
        .unwrap();
    assert_eq!(swap.status, TransactionStatus::Confirmed);
    assert_eq!(swap.to_amount, Some(dec("0.2")));
    assert_eq!(f.balance(user.id, AssetType::Usdt).await, dec("500"));
    assert_eq!(f.balance(user.id, AssetType::Eth).await, dec("0.2"));

    let err = model::swap(&f.pool, user.id, AssetType::Usdt, AssetType::Doge, dec("10"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::RateUnavailable));
    assert_eq!(f.balance(user.id, AssetType::Usdt).await, dec("500"));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires running PostgreSQL instance"]
async fn stake_lifecycle_pays_principal_and_reward_once(pool: PgPool) {
    let f = Fixture::new(pool);
    let user = f.user("staker@example.com").await;
    let plan = f.plan(30, dec("5"), dec("100")).await;
    f.fund(user.id, AssetType::Usdt, dec("1000")).await;

    let err = Stake::open(&f.pool, user.id, plan.id, AssetType::Usdt, dec("50"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BelowMinimum { .. }));

    let (stake, _, wallet) = Stake::open(&f.pool, user.id, plan.id, AssetType::Usdt, dec("500"))
        .await
        .unwrap();
    assert_eq!(wallet.balance, dec("500"));
    assert_eq!(Stake::active_for(&f.pool, user.id).await.unwrap().len(), 1);

    let outcome = model::complete_stakes(&f.pool, &[stake.id, stake.id]).await;
    assert_eq!(outcome.processed, vec![stake.id]);
    assert_eq!(outcome.skipped, vec![stake.id]);

    assert_eq!(f.balance(user.id, AssetType::Usdt).await, dec("1025"));
    assert!(Stake::active_for(&f.pool, user.id).await.unwrap().is_empty());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires running PostgreSQL instance"]
async fn seeding_twice_updates_instead_of_duplicating(pool: PgPool) {
    let prices = stakehouse::routes::staking::ledger::default_usdt_prices();
    let (created, updated) = ExchangeRate::seed(&pool, &prices).await.unwrap();
    assert_eq!((created, updated), (156, 0));

    let (created, updated) = ExchangeRate::seed(&pool, &prices).await.unwrap();
    assert_eq!((created, updated), (0, 156));
    assert_eq!(ExchangeRate::list(&pool).await.unwrap().len(), 156);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires running PostgreSQL instance"]
async fn oversized_amounts_are_validation_errors(pool: PgPool) {
    let f = Fixture::new(pool);
    let user = f.user("whale@example.com").await;

    let err = model::request_deposit(&f.pool, user.id, AssetType::Btc, dec("100000000000"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let err = model::request_withdrawal(&f.pool, user.id, AssetType::Btc, dec("10000000000"), "bc1q")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    assert!(Transaction::history(&f.pool, user.id, None).await.unwrap().is_empty());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires running PostgreSQL instance"]
async fn swap_refuses_quotes_the_destination_cannot_hold(pool: PgPool) {
    let f = Fixture::new(pool);
    let user = f.user("overflow@example.com").await;
    f.fund(user.id, AssetType::Btc, dec("20000")).await;
    ExchangeRate::upsert(&f.pool, AssetType::Btc, AssetType::Doge, dec("648704"))
        .await
        .unwrap();

    let err = model::swap(&f.pool, user.id, AssetType::Btc, AssetType::Doge, dec("20000"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(f.balance(user.id, AssetType::Btc).await, dec("20000"));
    assert_eq!(f.balance(user.id, AssetType::Doge).await, Decimal::ZERO);

    // the quote fits on its own but the credited balance would not
    f.fund(user.id, AssetType::Doge, dec("9999999990")).await;
    f.fund(user.id, AssetType::Usdt, dec("10")).await;
    ExchangeRate::upsert(&f.pool, AssetType::Usdt, AssetType::Doge, dec("20"))
        .await
        .unwrap();
    let err = model::swap(&f.pool, user.id, AssetType::Usdt, AssetType::Doge, dec("1"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(f.balance(user.id, AssetType::Usdt).await, dec("10"));
    assert_eq!(f.balance(user.id, AssetType::Doge).await, dec("9999999990"));
}
