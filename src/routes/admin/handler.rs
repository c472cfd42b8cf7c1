use axum::{
    Extension,
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::routes::accounts::User;
use crate::routes::staking::ledger::{Review, check_positive, check_rate};
use crate::routes::staking::model::{
    self, AssetType, BatchOutcome, Card, CardStatus, DepositAddress, ExchangeRate, Plan,
};
use crate::utils::success_to_api_response;

#[derive(Debug, Deserialize, Validate)]
pub struct BatchRequest {
    #[validate(length(min = 1, message = "Select at least one item."))]
    pub ids: Vec<i64>,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub message: String,
    #[serde(flatten)]
    pub outcome: BatchOutcome,
}

fn batch_response(verb: &str, noun: &str, outcome: BatchOutcome) -> BatchResponse {
    BatchResponse {
        message: format!("{} {} {}.", verb, outcome.processed.len(), noun),
        outcome,
    }
}

async fn review(state: &AppState, staff: &User, req: BatchRequest, review: Review) -> AppResult<BatchResponse> {
    req.validate()?;
    let outcome = model::review_transactions(&state.pool, &req.ids, review).await;
    tracing::info!(
        staff_id = %staff.id,
        ?review,
        processed = outcome.processed.len(),
        skipped = outcome.skipped.len(),
        failed = outcome.failed.len(),
        "transactions reviewed"
    );
    let verb = match review {
        Review::Approve => "Approved",
        Review::Reject => "Rejected",
    };
    Ok(batch_response(verb, "transaction(s)", outcome))
}

#[axum::debug_handler]
pub async fn approve_transactions(
    State(state): State<AppState>,
    Extension(staff): Extension<User>,
    Json(req): Json<BatchRequest>,
) -> AppResult<impl IntoResponse> {
    let response = review(&state, &staff, req, Review::Approve).await?;
    Ok(success_to_api_response(response))
}

#[axum::debug_handler]
pub async fn reject_transactions(
    State(state): State<AppState>,
    Extension(staff): Extension<User>,
    Json(req): Json<BatchRequest>,
) -> AppResult<impl IntoResponse> {
    let response = review(&state, &staff, req, Review::Reject).await?;
    Ok(success_to_api_response(response))
}

#[axum::debug_handler]
pub async fn complete_stakes(
    State(state): State<AppState>,
    Extension(staff): Extension<User>,
    Json(req): Json<BatchRequest>,
) -> AppResult<impl IntoResponse> {
    req.validate()?;
    let outcome = model::complete_stakes(&state.pool, &req.ids).await;
    tracing::info!(
        staff_id = %staff.id,
        processed = outcome.processed.len(),
        skipped = outcome.skipped.len(),
        "stakes completed"
    );
    Ok(success_to_api_response(batch_response(
        "Completed",
        "stake(s)",
        outcome,
    )))
}

#[derive(Debug, Deserialize)]
pub struct RateRequest {
    pub from_asset: AssetType,
    pub to_asset: AssetType,
    pub rate: Decimal,
}

#[derive(Debug, Serialize)]
pub struct RateResponse {
    pub created: bool,
    pub rate: Option<ExchangeRate>,
}

#[axum::debug_handler]
pub async fn set_exchange_rate(
    State(state): State<AppState>,
    Json(req): Json<RateRequest>,
) -> AppResult<impl IntoResponse> {
    if req.from_asset == req.to_asset {
        return Err(AppError::field("to_asset", "Choose two different assets."));
    }
    check_rate(req.rate).map_err(|err| AppError::field("rate", err.to_string()))?;

    let created = ExchangeRate::upsert(&state.pool, req.from_asset, req.to_asset, req.rate).await?;
    let mut conn = state.pool.acquire().await?;
    let rate = ExchangeRate::find(&mut conn, req.from_asset, req.to_asset).await?;
    tracing::info!(from = %req.from_asset, to = %req.to_asset, rate = %req.rate, created, "exchange rate set");

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, success_to_api_response(RateResponse { created, rate })))
}

#[derive(Debug, Deserialize, Validate)]
pub struct PlanRequest {
    #[validate(length(min = 1, max = 100, message = "Enter a plan name."))]
    pub name: String,
    #[validate(range(min = 1, message = "Duration must be at least one day."))]
    pub duration_days: i32,
    pub roi_percentage: Decimal,
    pub minimum_amount: Decimal,
}

/// ROI is stored as NUMERIC(5, 2), so it must stay below 1000 once rounded.
fn check_plan_terms(roi_percentage: Decimal, minimum_amount: Decimal) -> AppResult<()> {
    if roi_percentage < Decimal::ZERO {
        return Err(AppError::field("roi_percentage", "ROI cannot be negative."));
    }
    if roi_percentage.round_dp(2) >= Decimal::ONE_THOUSAND {
        return Err(AppError::field("roi_percentage", "ROI must be less than 1000."));
    }
    check_positive(minimum_amount).map_err(|err| match err {
        AppError::Validation(msg) if minimum_amount > Decimal::ZERO => {
            AppError::field("minimum_amount", msg)
        }
        _ => AppError::field("minimum_amount", "Minimum amount must be greater than zero."),
    })
}

#[axum::debug_handler]
pub async fn create_plan(
    State(state): State<AppState>,
    Json(req): Json<PlanRequest>,
) -> AppResult<impl IntoResponse> {
    req.validate()?;
    check_plan_terms(req.roi_percentage, req.minimum_amount)?;

    let plan = Plan::create(
        &state.pool,
        req.name.trim(),
        req.duration_days,
        req.roi_percentage,
        req.minimum_amount,
    )
    .await?;
    tracing::info!(plan_id = plan.id, name = %plan.name, "plan created");

    Ok((StatusCode::CREATED, success_to_api_response(plan)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct DepositAddressRequest {
    pub asset_type: AssetType,
    #[validate(length(min = 1, max = 255, message = "Enter a wallet address."))]
    pub wallet_address: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

#[axum::debug_handler]
pub async fn set_deposit_address(
    State(state): State<AppState>,
    Json(req): Json<DepositAddressRequest>,
) -> AppResult<impl IntoResponse> {
    req.validate()?;
    let address = DepositAddress::upsert(
        &state.pool,
        req.asset_type,
        req.wallet_address.trim(),
        req.is_active,
    )
    .await?;
    Ok(success_to_api_response(address))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CardStatusRequest {
    #[validate(length(min = 1, message = "Select at least one card."))]
    pub ids: Vec<i64>,
    pub status: CardStatus,
    #[validate(length(max = 100))]
    pub tracking_number: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CardStatusResponse {
    pub message: String,
    pub updated: u64,
}

#[axum::debug_handler]
pub async fn set_card_status(
    State(state): State<AppState>,
    Json(req): Json<CardStatusRequest>,
) -> AppResult<impl IntoResponse> {
    req.validate()?;
    let tracking = req
        .tracking_number
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());

    let updated = Card::set_status(&state.pool, &req.ids, req.status, tracking).await?;
    Ok(success_to_api_response(CardStatusResponse {
        message: format!("{} card(s) marked {}.", updated, req.status),
        updated,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_message_counts_processed_only() {
        let outcome = BatchOutcome {
            processed: vec![1, 2],
            skipped: vec![3],
            failed: vec![],
        };
        let response = batch_response("Approved", "transaction(s)", outcome);
        assert_eq!(response.message, "Approved 2 transaction(s).");
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["skipped"], serde_json::json!([3]));
    }

    #[test]
    fn empty_batches_are_rejected() {
        assert!(BatchRequest { ids: vec![] }.validate().is_err());
    }

    #[test]
    fn plan_terms_must_fit_storage() {
        let dec = |s: &str| s.parse::<Decimal>().unwrap();
        assert!(check_plan_terms(dec("999.99"), dec("100")).is_ok());
        assert!(matches!(
            check_plan_terms(dec("1000"), dec("100")),
            Err(AppError::Fields(_))
        ));
        assert!(check_plan_terms(dec("999.995"), dec("100")).is_err());
        assert!(check_plan_terms(dec("-1"), dec("100")).is_err());
        assert!(check_plan_terms(dec("5"), dec("0")).is_err());
        assert!(check_plan_terms(dec("5"), dec("10000000000")).is_err());
    }

    #[test]
    fn deposit_addresses_default_to_active() {
        let req: DepositAddressRequest =
            serde_json::from_str(r#"{"asset_type":"BTC","wallet_address":"bc1q"}"#).unwrap();
        assert!(req.is_active);
    }
}
