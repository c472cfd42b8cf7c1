use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::utils::text_enum;

use super::ledger::{self, Review, WalletEffect};

text_enum! {
    pub enum AssetType {
        Btc => "BTC",
        Eth => "ETH",
        Usdt => "USDT",
        Ltc => "LTC",
        Xrp => "XRP",
        Ada => "ADA",
        Sol => "SOL",
        Dot => "DOT",
        Bnb => "BNB",
        Doge => "DOGE",
        Link => "LINK",
        Matic => "MATIC",
        Eos => "EOS",
    }
}

text_enum! {
    pub enum TransactionType {
        Deposit => "DEPOSIT",
        Withdrawal => "WITHDRAWAL",
        Stake => "STAKE",
        Unstake => "UNSTAKE",
        Reward => "REWARD",
        Swap => "SWAP",
    }
}

text_enum! {
    pub enum TransactionStatus {
        Pending => "PENDING",
        Confirmed => "CONFIRMED",
        Rejected => "REJECTED",
    }
}

text_enum! {
    pub enum StakeStatus {
        Active => "ACTIVE",
        Completed => "COMPLETED",
        Cancelled => "CANCELLED",
    }
}

text_enum! {
    pub enum CardStatus {
        Pending => "PENDING",
        Processing => "PROCESSING",
        Shipped => "SHIPPED",
        Delivered => "DELIVERED",
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Plan {
    pub id: i64,
    pub name: String,
    pub duration_days: i32,
    pub roi_percentage: Decimal,
    pub minimum_amount: Decimal,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AssetWallet {
    pub id: i64,
    pub user_id: Uuid,
    pub asset_type: AssetType,
    pub balance: Decimal,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Transaction {
    pub id: i64,
    pub user_id: Uuid,
    pub asset_wallet_id: i64,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub status: TransactionStatus,
    pub timestamp: DateTime<Utc>,
    pub transaction_hash: Option<String>,
    pub destination_address: Option<String>,
    pub to_asset_wallet_id: Option<i64>,
    pub to_amount: Option<Decimal>,
    pub exchange_rate: Option<Decimal>,
}

/// A transaction row joined with the asset names of its wallets.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TransactionRecord {
    pub id: i64,
    pub transaction_type: TransactionType,
    pub asset_type: AssetType,
    pub amount: Decimal,
    pub status: TransactionStatus,
    pub timestamp: DateTime<Utc>,
    pub transaction_hash: Option<String>,
    pub destination_address: Option<String>,
    pub to_asset_type: Option<AssetType>,
    pub to_amount: Option<Decimal>,
    pub exchange_rate: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Stake {
    pub id: i64,
    pub user_id: Uuid,
    pub plan_id: i64,
    pub asset_wallet_id: i64,
    pub amount: Decimal,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_active: bool,
    pub status: StakeStatus,
}

/// A stake joined with its plan and wallet asset.
#[derive(Debug, Clone, FromRow)]
pub struct StakeDetails {
    pub id: i64,
    pub amount: Decimal,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: StakeStatus,
    pub plan_name: String,
    pub duration_days: i32,
    pub roi_percentage: Decimal,
    pub asset_type: AssetType,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ExchangeRate {
    pub id: i64,
    pub from_asset: AssetType,
    pub to_asset: AssetType,
    pub rate: Decimal,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Card {
    pub id: i64,
    pub user_id: Uuid,
    pub shipping_address: String,
    pub order_date: DateTime<Utc>,
    pub status: CardStatus,
    pub tracking_number: Option<String>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DepositAddress {
    pub id: i64,
    pub asset_type: AssetType,
    pub wallet_address: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Column values for a new transaction row.
#[derive(Debug, Clone)]
pub struct NewTransaction<'a> {
    pub user_id: Uuid,
    pub asset_wallet_id: i64,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub status: TransactionStatus,
    pub transaction_hash: Option<&'a str>,
    pub destination_address: Option<&'a str>,
    pub to_asset_wallet_id: Option<i64>,
    pub to_amount: Option<Decimal>,
    pub exchange_rate: Option<Decimal>,
}

impl<'a> NewTransaction<'a> {
    pub fn new(
        user_id: Uuid,
        asset_wallet_id: i64,
        transaction_type: TransactionType,
        amount: Decimal,
        status: TransactionStatus,
    ) -> Self {
        Self {
            user_id,
            asset_wallet_id,
            transaction_type,
            amount,
            status,
            transaction_hash: None,
            destination_address: None,
            to_asset_wallet_id: None,
            to_amount: None,
            exchange_rate: None,
        }
    }
}

impl Plan {
    pub async fn list(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Plan>(
            r#"
            SELECT id, name, duration_days, roi_percentage, minimum_amount
            FROM plans
            ORDER BY duration_days, id
            "#,
        )
        .fetch_all(pool)
        .await
    }

    pub async fn find(conn: &mut PgConnection, id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Plan>(
            r#"
            SELECT id, name, duration_days, roi_percentage, minimum_amount
            FROM plans
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(conn)
        .await
    }

    pub async fn create(
        pool: &PgPool,
        name: &str,
        duration_days: i32,
        roi_percentage: Decimal,
        minimum_amount: Decimal,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Plan>(
            r#"
            INSERT INTO plans (name, duration_days, roi_percentage, minimum_amount)
            VALUES ($1, $2, $3, $4)
            RETURNING id, name, duration_days, roi_percentage, minimum_amount
            "#,
        )
        .bind(name)
        .bind(duration_days)
        .bind(roi_percentage)
        .bind(minimum_amount)
        .fetch_one(pool)
        .await
    }
}

impl AssetWallet {
    /// Returns the user's wallet for `asset`, creating a zero-balance one on
    /// first use. Safe against concurrent first use.
    pub async fn get_or_create(
        conn: &mut PgConnection,
        user_id: Uuid,
        asset: AssetType,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO asset_wallets (user_id, asset_type)
            VALUES ($1, $2)
            ON CONFLICT (user_id, asset_type) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(asset)
        .execute(&mut *conn)
        .await?;

        sqlx::query_as::<_, AssetWallet>(
            r#"
            SELECT id, user_id, asset_type, balance
            FROM asset_wallets
            WHERE user_id = $1 AND asset_type = $2
            "#,
        )
        .bind(user_id)
        .bind(asset)
        .fetch_one(&mut *conn)
        .await
    }

    /// All of the user's wallets, one per asset, in asset order.
    pub async fn ensure_all(pool: &PgPool, user_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        let assets: Vec<String> = AssetType::ALL.iter().map(|a| a.as_str().to_string()).collect();

        sqlx::query(
            r#"
            INSERT INTO asset_wallets (user_id, asset_type)
            SELECT $1, asset FROM UNNEST($2::text[]) AS asset
            ON CONFLICT (user_id, asset_type) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(&assets)
        .execute(pool)
        .await?;

        let mut wallets = sqlx::query_as::<_, AssetWallet>(
            r#"
            SELECT id, user_id, asset_type, balance
            FROM asset_wallets
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;

        wallets.sort_by_key(|w| w.asset_type);
        Ok(wallets)
    }

    /// Row-locks the given wallets in ascending id order and returns them in
    /// that order. Callers must hold an open transaction.
    pub async fn lock(conn: &mut PgConnection, ids: &[i64]) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, AssetWallet>(
            r#"
            SELECT id, user_id, asset_type, balance
            FROM asset_wallets
            WHERE id = ANY($1)
            ORDER BY id
            FOR UPDATE
            "#,
        )
        .bind(ids)
        .fetch_all(conn)
        .await
    }

    async fn lock_one(conn: &mut PgConnection, id: i64) -> AppResult<Self> {
        Self::lock(conn, &[id])
            .await?
            .into_iter()
            .next()
            .ok_or(AppError::NotFound("wallet"))
    }

    pub async fn adjust(conn: &mut PgConnection, id: i64, delta: Decimal) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, AssetWallet>(
            r#"
            UPDATE asset_wallets
            SET balance = balance + $2
            WHERE id = $1
            RETURNING id, user_id, asset_type, balance
            "#,
        )
        .bind(id)
        .bind(delta)
        .fetch_one(conn)
        .await
    }
}

impl Transaction {
    pub async fn insert(conn: &mut PgConnection, new: &NewTransaction<'_>) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Transaction>(
            r#"
            INSERT INTO transactions (
                user_id, asset_wallet_id, transaction_type, amount, status,
                transaction_hash, destination_address, to_asset_wallet_id, to_amount, exchange_rate
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(new.user_id)
        .bind(new.asset_wallet_id)
        .bind(new.transaction_type)
        .bind(new.amount)
        .bind(new.status)
        .bind(new.transaction_hash)
        .bind(new.destination_address)
        .bind(new.to_asset_wallet_id)
        .bind(new.to_amount)
        .bind(new.exchange_rate)
        .fetch_one(conn)
        .await
    }

    /// Newest first. `limit` of `None` returns the full history.
    pub async fn history(
        pool: &PgPool,
        user_id: Uuid,
        limit: Option<i64>,
    ) -> Result<Vec<TransactionRecord>, sqlx::Error> {
        sqlx::query_as::<_, TransactionRecord>(
            r#"
            SELECT t.id, t.transaction_type, w.asset_type, t.amount, t.status, t.timestamp,
                   t.transaction_hash, t.destination_address,
                   tw.asset_type AS to_asset_type, t.to_amount, t.exchange_rate
            FROM transactions t
            JOIN asset_wallets w ON w.id = t.asset_wallet_id
            LEFT JOIN asset_wallets tw ON tw.id = t.to_asset_wallet_id
            WHERE t.user_id = $1
            ORDER BY t.timestamp DESC, t.id DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Settles one PENDING transaction. Returns `Ok(None)` when it was already
    /// settled, in which case nothing is touched.
    pub async fn review(pool: &PgPool, id: i64, review: Review) -> AppResult<Option<Self>> {
        let mut tx = pool.begin().await?;

        let current = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT * FROM transactions WHERE id = $1 FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound("transaction"))?;

        let Some((next_status, effect)) =
            ledger::review_outcome(current.transaction_type, current.status, review)
        else {
            return Ok(None);
        };

        match effect {
            WalletEffect::None => {}
            WalletEffect::CreditSource => {
                let wallet = AssetWallet::lock_one(&mut tx, current.asset_wallet_id).await?;
                ledger::credited(wallet.balance, current.amount)?;
                AssetWallet::adjust(&mut tx, current.asset_wallet_id, current.amount).await?;
            }
            WalletEffect::ReverseSwap => {
                let (Some(to_wallet), Some(to_amount)) = (current.to_asset_wallet_id, current.to_amount)
                else {
                    return Err(AppError::Internal(format!(
                        "swap transaction {} has no destination leg",
                        id
                    )));
                };
                let order = ledger::lock_order(current.asset_wallet_id, to_wallet);
                let locked = AssetWallet::lock(&mut tx, &order).await?;
                if let Some(source) = locked.iter().find(|w| w.id == current.asset_wallet_id) {
                    ledger::credited(source.balance, current.amount)?;
                }
                AssetWallet::adjust(&mut tx, current.asset_wallet_id, current.amount).await?;
                AssetWallet::adjust(&mut tx, to_wallet, -to_amount).await?;
            }
        }

        let updated = sqlx::query_as::<_, Transaction>(
            r#"
            UPDATE transactions SET status = $2 WHERE id = $1 RETURNING *
            "#,
        )
        .bind(id)
        .bind(next_status)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!(
            transaction_id = id,
            kind = %updated.transaction_type,
            status = %updated.status,
            "transaction settled"
        );
        Ok(Some(updated))
    }
}

#[derive(Debug, Default, Serialize)]
pub struct BatchOutcome {
    pub processed: Vec<i64>,
    pub skipped: Vec<i64>,
    pub failed: Vec<i64>,
}

impl BatchOutcome {
    fn record(&mut self, id: i64, result: AppResult<bool>) {
        match result {
            Ok(true) => self.processed.push(id),
            Ok(false) => self.skipped.push(id),
            Err(e) => {
                tracing::warn!(id, error = %e, "batch item failed");
                self.failed.push(id);
            }
        }
    }
}

pub async fn review_transactions(pool: &PgPool, ids: &[i64], review: Review) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();
    for &id in ids {
        let result = Transaction::review(pool, id, review).await.map(|t| t.is_some());
        outcome.record(id, result);
    }
    outcome
}

pub async fn complete_stakes(pool: &PgPool, ids: &[i64]) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();
    for &id in ids {
        let result = Stake::complete(pool, id).await.map(|r| r.is_some());
        outcome.record(id, result);
    }
    outcome
}

impl Stake {
    /// Locks `amount` from the user's wallet into a new active stake.
    pub async fn open(
        pool: &PgPool,
        user_id: Uuid,
        plan_id: i64,
        asset: AssetType,
        amount: Decimal,
    ) -> AppResult<(Self, Plan, AssetWallet)> {
        ledger::check_positive(amount)?;

        let mut tx = pool.begin().await?;
        let plan = Plan::find(&mut tx, plan_id)
            .await?
            .ok_or(AppError::NotFound("plan"))?;

        let wallet = AssetWallet::get_or_create(&mut tx, user_id, asset).await?;
        let wallet = AssetWallet::lock_one(&mut tx, wallet.id).await?;
        ledger::check_stake(wallet.balance, amount, plan.minimum_amount, asset)?;

        let start = Utc::now();
        let stake = sqlx::query_as::<_, Stake>(
            r#"
            INSERT INTO stakes (user_id, plan_id, asset_wallet_id, amount, start_date, end_date, is_active, status)
            VALUES ($1, $2, $3, $4, $5, $6, TRUE, $7)
            RETURNING id, user_id, plan_id, asset_wallet_id, amount, start_date, end_date, is_active, status
            "#,
        )
        .bind(user_id)
        .bind(plan.id)
        .bind(wallet.id)
        .bind(amount)
        .bind(start)
        .bind(ledger::stake_end(start, plan.duration_days))
        .bind(StakeStatus::Active)
        .fetch_one(&mut *tx)
        .await?;

        let wallet = AssetWallet::adjust(&mut tx, wallet.id, -amount).await?;
        Transaction::insert(
            &mut tx,
            &NewTransaction::new(
                user_id,
                wallet.id,
                TransactionType::Stake,
                amount,
                TransactionStatus::Confirmed,
            ),
        )
        .await?;

        tx.commit().await?;
        tracing::info!(stake_id = stake.id, user_id = %user_id, %amount, %asset, "stake opened");
        Ok((stake, plan, wallet))
    }

    pub async fn active_for(pool: &PgPool, user_id: Uuid) -> Result<Vec<StakeDetails>, sqlx::Error> {
        sqlx::query_as::<_, StakeDetails>(
            r#"
            SELECT s.id, s.amount, s.start_date, s.end_date, s.status,
                   p.name AS plan_name, p.duration_days, p.roi_percentage,
                   w.asset_type
            FROM stakes s
            JOIN plans p ON p.id = s.plan_id
            JOIN asset_wallets w ON w.id = s.asset_wallet_id
            WHERE s.user_id = $1 AND s.is_active
            ORDER BY s.start_date DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }

    /// Pays out principal plus reward for an active stake and closes it.
    /// Returns the reward, or `Ok(None)` if the stake was no longer active.
    pub async fn complete(pool: &PgPool, id: i64) -> AppResult<Option<Decimal>> {
        let mut tx = pool.begin().await?;

        let stake = sqlx::query_as::<_, Stake>(
            r#"
            SELECT id, user_id, plan_id, asset_wallet_id, amount, start_date, end_date, is_active, status
            FROM stakes
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound("stake"))?;

        if !stake.is_active {
            return Ok(None);
        }

        let plan = Plan::find(&mut tx, stake.plan_id)
            .await?
            .ok_or(AppError::NotFound("plan"))?;
        let reward = ledger::stake_reward(stake.amount, plan.roi_percentage);

        let wallet = AssetWallet::lock_one(&mut tx, stake.asset_wallet_id).await?;
        ledger::credited(wallet.balance, stake.amount + reward)?;
        AssetWallet::adjust(&mut tx, stake.asset_wallet_id, stake.amount + reward).await?;
        Transaction::insert(
            &mut tx,
            &NewTransaction::new(
                stake.user_id,
                stake.asset_wallet_id,
                TransactionType::Reward,
                reward,
                TransactionStatus::Confirmed,
            ),
        )
        .await?;

        sqlx::query(
            r#"
            UPDATE stakes SET is_active = FALSE, status = $2 WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(StakeStatus::Completed)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!(stake_id = id, %reward, "stake completed");
        Ok(Some(reward))
    }
}

/// Records a deposit the user says they sent. No balance moves until an
/// operator approves it.
pub async fn request_deposit(
    pool: &PgPool,
    user_id: Uuid,
    asset: AssetType,
    amount: Decimal,
    transaction_hash: Option<&str>,
) -> AppResult<Transaction> {
    ledger::check_positive(amount)?;

    let mut conn = pool.acquire().await?;
    let wallet = AssetWallet::get_or_create(&mut conn, user_id, asset).await?;

    let mut new = NewTransaction::new(
        user_id,
        wallet.id,
        TransactionType::Deposit,
        amount,
        TransactionStatus::Pending,
    );
    new.transaction_hash = transaction_hash;

    Ok(Transaction::insert(&mut conn, &new).await?)
}

/// Debits the wallet right away and records a PENDING withdrawal. A rejected
/// withdrawal is refunded during review.
pub async fn request_withdrawal(
    pool: &PgPool,
    user_id: Uuid,
    asset: AssetType,
    amount: Decimal,
    destination_address: &str,
) -> AppResult<(Transaction, AssetWallet)> {
    ledger::check_positive(amount)?;

    let mut tx = pool.begin().await?;
    let wallet = AssetWallet::get_or_create(&mut tx, user_id, asset).await?;
    let wallet = AssetWallet::lock_one(&mut tx, wallet.id).await?;
    ledger::check_funds(wallet.balance, amount)?;

    let mut new = NewTransaction::new(
        user_id,
        wallet.id,
        TransactionType::Withdrawal,
        amount,
        TransactionStatus::Pending,
    );
    new.destination_address = Some(destination_address);
    let transaction = Transaction::insert(&mut tx, &new).await?;
    let wallet = AssetWallet::adjust(&mut tx, wallet.id, -amount).await?;

    tx.commit().await?;
    Ok((transaction, wallet))
}

/// Converts between two of the user's wallets at the stored rate. Both legs
/// commit together or not at all.
pub async fn swap(
    pool: &PgPool,
    user_id: Uuid,
    from_asset: AssetType,
    to_asset: AssetType,
    amount: Decimal,
) -> AppResult<Transaction> {
    if from_asset == to_asset {
        return Err(AppError::Validation("cannot swap an asset for itself".into()));
    }
    ledger::check_positive(amount)?;

    let mut tx = pool.begin().await?;
    let from = AssetWallet::get_or_create(&mut tx, user_id, from_asset).await?;
    let to = AssetWallet::get_or_create(&mut tx, user_id, to_asset).await?;

    let locked = AssetWallet::lock(&mut tx, &ledger::lock_order(from.id, to.id)).await?;
    let balance_of = |id: i64| {
        locked
            .iter()
            .find(|w| w.id == id)
            .map(|w| w.balance)
            .ok_or(AppError::NotFound("wallet"))
    };
    ledger::check_funds(balance_of(from.id)?, amount)?;

    let rate = ExchangeRate::find(&mut tx, from_asset, to_asset)
        .await?
        .ok_or(AppError::RateUnavailable)?;
    let to_amount = ledger::swap_quote(amount, rate.rate);
    ledger::check_fits(to_amount)?;
    ledger::credited(balance_of(to.id)?, to_amount)?;

    AssetWallet::adjust(&mut tx, from.id, -amount).await?;
    AssetWallet::adjust(&mut tx, to.id, to_amount).await?;

    let mut new = NewTransaction::new(
        user_id,
        from.id,
        TransactionType::Swap,
        amount,
        TransactionStatus::Confirmed,
    );
    new.to_asset_wallet_id = Some(to.id);
    new.to_amount = Some(to_amount);
    new.exchange_rate = Some(rate.rate);
    let transaction = Transaction::insert(&mut tx, &new).await?;

    tx.commit().await?;
    tracing::info!(
        user_id = %user_id,
        from = %from_asset,
        to = %to_asset,
        %amount,
        %to_amount,
        "swap executed"
    );
    Ok(transaction)
}

impl ExchangeRate {
    pub async fn find(
        conn: &mut PgConnection,
        from: AssetType,
        to: AssetType,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, ExchangeRate>(
            r#"
            SELECT id, from_asset, to_asset, rate, last_updated
            FROM exchange_rates
            WHERE from_asset = $1 AND to_asset = $2
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_optional(conn)
        .await
    }

    pub async fn list(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, ExchangeRate>(
            r#"
            SELECT id, from_asset, to_asset, rate, last_updated
            FROM exchange_rates
            ORDER BY from_asset, to_asset
            "#,
        )
        .fetch_all(pool)
        .await
    }

    /// `asset -> rate` for every asset with a stored rate into USDT.
    pub async fn to_usdt(pool: &PgPool) -> Result<HashMap<AssetType, Decimal>, sqlx::Error> {
        let rows = sqlx::query_as::<_, (AssetType, Decimal)>(
            r#"
            SELECT from_asset, rate FROM exchange_rates WHERE to_asset = $1
            "#,
        )
        .bind(AssetType::Usdt)
        .fetch_all(pool)
        .await?;

        Ok(rows.into_iter().collect())
    }

    /// Inserts or overwrites the rate for a pair. Returns `true` when a new
    /// row was created.
    pub async fn upsert(
        pool: &PgPool,
        from: AssetType,
        to: AssetType,
        rate: Decimal,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            r#"
            INSERT INTO exchange_rates (from_asset, to_asset, rate, last_updated)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (from_asset, to_asset)
            DO UPDATE SET rate = EXCLUDED.rate, last_updated = NOW()
            RETURNING (xmax = 0)
            "#,
        )
        .bind(from)
        .bind(to)
        .bind(rate)
        .fetch_one(pool)
        .await
    }

    /// Writes every cross rate derived from `prices`. Returns (created, updated).
    pub async fn seed(
        pool: &PgPool,
        prices: &[(AssetType, Decimal)],
    ) -> Result<(usize, usize), sqlx::Error> {
        let mut created = 0;
        let mut updated = 0;
        for (from, to, rate) in ledger::cross_rates(prices) {
            if Self::upsert(pool, from, to, rate).await? {
                created += 1;
            } else {
                updated += 1;
            }
        }
        Ok((created, updated))
    }
}

impl Card {
    pub async fn order(pool: &PgPool, user_id: Uuid, shipping_address: &str) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Card>(
            r#"
            INSERT INTO cards (user_id, shipping_address, status)
            VALUES ($1, $2, $3)
            RETURNING id, user_id, shipping_address, order_date, status, tracking_number
            "#,
        )
        .bind(user_id)
        .bind(shipping_address)
        .bind(CardStatus::Pending)
        .fetch_one(pool)
        .await
    }

    pub async fn latest_for(pool: &PgPool, user_id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Card>(
            r#"
            SELECT id, user_id, shipping_address, order_date, status, tracking_number
            FROM cards
            WHERE user_id = $1
            ORDER BY order_date DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
    }

    /// Returns the number of cards updated.
    pub async fn set_status(
        pool: &PgPool,
        ids: &[i64],
        status: CardStatus,
        tracking_number: Option<&str>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE cards
            SET status = $2, tracking_number = COALESCE($3, tracking_number)
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .bind(status)
        .bind(tracking_number)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }
}

impl DepositAddress {
    pub async fn active(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, DepositAddress>(
            r#"
            SELECT id, asset_type, wallet_address, is_active, created_at, updated_at
            FROM deposit_addresses
            WHERE is_active
            ORDER BY asset_type
            "#,
        )
        .fetch_all(pool)
        .await
    }

    pub async fn upsert(
        pool: &PgPool,
        asset: AssetType,
        wallet_address: &str,
        is_active: bool,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, DepositAddress>(
            r#"
            INSERT INTO deposit_addresses (asset_type, wallet_address, is_active)
            VALUES ($1, $2, $3)
            ON CONFLICT (asset_type)
            DO UPDATE SET wallet_address = EXCLUDED.wallet_address,
                          is_active = EXCLUDED.is_active,
                          updated_at = NOW()
            RETURNING id, asset_type, wallet_address, is_active, created_at, updated_at
            "#,
        )
        .bind(asset)
        .bind(wallet_address)
        .bind(is_active)
        .fetch_one(pool)
        .await
    }
}
