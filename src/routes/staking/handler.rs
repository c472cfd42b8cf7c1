use std::collections::{BTreeMap, HashMap};

use axum::{
    Extension,
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::mail::templates;
use crate::routes::accounts::User;
use crate::utils::success_to_api_response;

use super::ledger;
use super::model::{
    self, AssetType, AssetWallet, Card, DepositAddress, ExchangeRate, Plan, Stake, StakeDetails,
    Transaction, TransactionRecord,
};

const RECENT_TRANSACTIONS: i64 = 10;

#[derive(Debug, Serialize)]
pub struct WalletView {
    pub asset_type: AssetType,
    pub balance: Decimal,
    pub usd_value: Decimal,
}

#[derive(Debug, Serialize)]
pub struct StakeView {
    pub id: i64,
    pub plan_name: String,
    pub asset_type: AssetType,
    pub amount: Decimal,
    pub roi_percentage: Decimal,
    pub duration_days: i32,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub days_remaining: i64,
    pub expected_reward: Decimal,
    pub reward_usd: Decimal,
}

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub wallets: Vec<WalletView>,
    pub total_usd_value: Decimal,
    pub active_stakes: Vec<StakeView>,
    pub plans: Vec<Plan>,
    pub recent_transactions: Vec<TransactionRecord>,
    pub card: Option<Card>,
}

fn wallet_views(wallets: Vec<AssetWallet>, rates: &HashMap<AssetType, Decimal>) -> Vec<WalletView> {
    wallets
        .into_iter()
        .map(|w| WalletView {
            usd_value: ledger::usd_value(w.asset_type, w.balance, rates),
            asset_type: w.asset_type,
            balance: w.balance,
        })
        .collect()
}

fn stake_view(
    stake: StakeDetails,
    rates: &HashMap<AssetType, Decimal>,
    now: DateTime<Utc>,
) -> StakeView {
    let expected_reward = ledger::stake_reward(stake.amount, stake.roi_percentage);
    StakeView {
        id: stake.id,
        plan_name: stake.plan_name,
        asset_type: stake.asset_type,
        amount: stake.amount,
        roi_percentage: stake.roi_percentage,
        duration_days: stake.duration_days,
        start_date: stake.start_date,
        end_date: stake.end_date,
        days_remaining: ledger::days_remaining(stake.end_date, now),
        expected_reward,
        reward_usd: ledger::usd_value(stake.asset_type, expected_reward, rates),
    }
}

#[axum::debug_handler]
pub async fn dashboard(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> AppResult<impl IntoResponse> {
    let wallets = AssetWallet::ensure_all(&state.pool, user.id).await?;
    let rates = ExchangeRate::to_usdt(&state.pool).await?;

    let wallets = wallet_views(wallets, &rates);
    let total_usd_value = wallets.iter().map(|w| w.usd_value).sum();

    let now = Utc::now();
    let active_stakes = Stake::active_for(&state.pool, user.id)
        .await?
        .into_iter()
        .map(|s| stake_view(s, &rates, now))
        .collect();

    Ok(success_to_api_response(DashboardResponse {
        wallets,
        total_usd_value,
        active_stakes,
        plans: Plan::list(&state.pool).await?,
        recent_transactions: Transaction::history(&state.pool, user.id, Some(RECENT_TRANSACTIONS))
            .await?,
        card: Card::latest_for(&state.pool, user.id).await?,
    }))
}

#[derive(Debug, Deserialize)]
pub struct StakeRequest {
    pub plan_id: i64,
    pub asset_type: AssetType,
    pub amount: Decimal,
}

#[derive(Debug, Serialize)]
pub struct StakeResponse {
    pub message: String,
    pub stake: Stake,
    pub balance: Decimal,
}

#[axum::debug_handler]
pub async fn create_stake(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<StakeRequest>,
) -> AppResult<impl IntoResponse> {
    let (stake, plan, wallet) =
        Stake::open(&state.pool, user.id, req.plan_id, req.asset_type, req.amount).await?;

    let message = format!(
        "Successfully staked {} {} for {} days with {}% ROI.",
        stake.amount, req.asset_type, plan.duration_days, plan.roi_percentage
    );
    Ok((
        StatusCode::CREATED,
        success_to_api_response(StakeResponse {
            message,
            stake,
            balance: wallet.balance,
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct DepositPage {
    pub wallets: Vec<WalletView>,
    pub deposit_addresses: BTreeMap<AssetType, String>,
}

#[axum::debug_handler]
pub async fn deposit_page(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> AppResult<impl IntoResponse> {
    let wallets = AssetWallet::ensure_all(&state.pool, user.id).await?;
    let rates = ExchangeRate::to_usdt(&state.pool).await?;
    let deposit_addresses = DepositAddress::active(&state.pool)
        .await?
        .into_iter()
        .map(|a| (a.asset_type, a.wallet_address))
        .collect();

    Ok(success_to_api_response(DepositPage {
        wallets: wallet_views(wallets, &rates),
        deposit_addresses,
    }))
}

#[derive(Debug, Deserialize, Validate)]
pub struct DepositRequest {
    pub asset_type: AssetType,
    pub amount: Decimal,
    #[validate(length(max = 255, message = "Ensure this value has at most 255 characters."))]
    pub transaction_hash: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TransferResponse {
    pub message: String,
    pub transaction: Transaction,
}

#[axum::debug_handler]
pub async fn create_deposit(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<DepositRequest>,
) -> AppResult<impl IntoResponse> {
    req.validate()?;
    let tx_hash = req
        .transaction_hash
        .as_deref()
        .map(str::trim)
        .filter(|h| !h.is_empty());

    let transaction =
        model::request_deposit(&state.pool, user.id, req.asset_type, req.amount, tx_hash).await?;
    tracing::info!(
        user_id = %user.id,
        transaction_id = transaction.id,
        amount = %req.amount,
        asset = %req.asset_type,
        "deposit requested"
    );

    state.mailer.notify(
        state.config.admin_email.clone(),
        templates::deposit_request(&user.email, req.amount, req.asset_type, tx_hash.unwrap_or("N/A")),
    );

    Ok((
        StatusCode::CREATED,
        success_to_api_response(TransferResponse {
            message: "Your deposit request has been submitted and is pending confirmation.".into(),
            transaction,
        }),
    ))
}

#[derive(Debug, Deserialize, Validate)]
pub struct WithdrawalRequest {
    pub asset_type: AssetType,
    pub amount: Decimal,
    #[validate(length(min = 1, max = 255, message = "Enter a destination address."))]
    pub destination_address: String,
}

#[axum::debug_handler]
pub async fn create_withdrawal(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<WithdrawalRequest>,
) -> AppResult<impl IntoResponse> {
    req.validate()?;
    let destination = req.destination_address.trim();
    if destination.is_empty() {
        return Err(AppError::Validation("Enter a destination address.".into()));
    }

    let (transaction, wallet) =
        model::request_withdrawal(&state.pool, user.id, req.asset_type, req.amount, destination)
            .await?;
    tracing::info!(
        user_id = %user.id,
        wallet_id = wallet.id,
        transaction_id = transaction.id,
        amount = %req.amount,
        "withdrawal requested"
    );

    state.mailer.notify(
        state.config.admin_email.clone(),
        templates::withdrawal_request(&user.email, req.amount, req.asset_type, destination),
    );

    Ok((
        StatusCode::CREATED,
        success_to_api_response(TransferResponse {
            message: "Your withdrawal request has been submitted and is pending approval.".into(),
            transaction,
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct SwapPage {
    pub wallets: Vec<WalletView>,
    /// from -> to -> rate
    pub rates: BTreeMap<AssetType, BTreeMap<AssetType, Decimal>>,
}

fn rate_table(rates: Vec<ExchangeRate>) -> BTreeMap<AssetType, BTreeMap<AssetType, Decimal>> {
    let mut table: BTreeMap<AssetType, BTreeMap<AssetType, Decimal>> = BTreeMap::new();
    for r in rates {
        table.entry(r.from_asset).or_default().insert(r.to_asset, r.rate);
    }
    table
}

#[axum::debug_handler]
pub async fn swap_page(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> AppResult<impl IntoResponse> {
    let wallets = AssetWallet::ensure_all(&state.pool, user.id).await?;
    let usdt = ExchangeRate::to_usdt(&state.pool).await?;
    let rates = ExchangeRate::list(&state.pool).await?;

    Ok(success_to_api_response(SwapPage {
        wallets: wallet_views(wallets, &usdt),
        rates: rate_table(rates),
    }))
}

#[derive(Debug, Deserialize)]
pub struct SwapRequest {
    pub from_asset: AssetType,
    pub to_asset: AssetType,
    pub amount: Decimal,
}

#[axum::debug_handler]
pub async fn create_swap(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<SwapRequest>,
) -> AppResult<impl IntoResponse> {
    let transaction =
        model::swap(&state.pool, user.id, req.from_asset, req.to_asset, req.amount).await?;

    let message = format!(
        "Successfully swapped {} {} to {} {}.",
        transaction.amount,
        req.from_asset,
        transaction.to_amount.unwrap_or_default(),
        req.to_asset
    );
    Ok(success_to_api_response(TransferResponse {
        message,
        transaction,
    }))
}

#[axum::debug_handler]
pub async fn transactions(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> AppResult<impl IntoResponse> {
    let history = Transaction::history(&state.pool, user.id, None).await?;
    Ok(success_to_api_response(history))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CardOrderRequest {
    #[validate(length(min = 1, max = 1000, message = "Enter a shipping address."))]
    pub shipping_address: String,
}

#[derive(Debug, Serialize)]
pub struct CardOrderResponse {
    pub message: String,
    pub card: Card,
}

#[axum::debug_handler]
pub async fn order_card(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<CardOrderRequest>,
) -> AppResult<impl IntoResponse> {
    req.validate()?;
    let address = req.shipping_address.trim();
    if address.is_empty() {
        return Err(AppError::Validation("Enter a shipping address.".into()));
    }

    let card = Card::order(&state.pool, user.id, address).await?;
    tracing::info!(user_id = %user.id, card_id = card.id, "card ordered");

    Ok((
        StatusCode::CREATED,
        success_to_api_response(CardOrderResponse {
            message: "Your card has been ordered successfully!".into(),
            card,
        }),
    ))
}
