use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post, put},
};
use tower_http::services::ServeDir;

use crate::AppState;
use crate::middleware::{auth_middleware, require_staff, two_factor_gate};

pub mod accounts;
pub mod admin;
pub mod staking;
pub mod twofactor;

const IMAGE_UPLOAD_LIMIT: usize = 12 * 1024 * 1024;

/// Builds every route with its state attached. Request-wide layers (logging,
/// rate limiting, tracing, CORS) are added by the caller.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/accounts/signup", post(accounts::signup))
        .route("/accounts/login", post(accounts::login))
        .route("/accounts/activate/{uid}/{token}", get(accounts::activate))
        .route(
            "/accounts/verify-email-change/{uid}/{token}",
            get(accounts::verify_email_change),
        )
        .route("/accounts/password-reset", post(accounts::password_reset))
        .route(
            "/accounts/password-reset-confirm/{uid}/{token}",
            get(accounts::password_reset_check).post(accounts::password_reset_confirm),
        );

    let admin_routes = Router::new()
        .route("/admin/transactions/approve", post(admin::approve_transactions))
        .route("/admin/transactions/reject", post(admin::reject_transactions))
        .route("/admin/stakes/complete", post(admin::complete_stakes))
        .route("/admin/exchange-rates", put(admin::set_exchange_rate))
        .route("/admin/plans", post(admin::create_plan))
        .route("/admin/deposit-addresses", put(admin::set_deposit_address))
        .route("/admin/cards/status", put(admin::set_card_status))
        .layer(from_fn(require_staff));

    let protected_routes = Router::new()
        // accounts
        .route("/accounts/logout", post(accounts::logout))
        .route("/accounts/password-change", post(accounts::password_change))
        .route("/accounts/profile", get(accounts::profile))
        .route("/accounts/profile/edit", post(accounts::profile_edit))
        .route(
            "/accounts/profile/edit/images",
            post(accounts::profile_images).layer(DefaultBodyLimit::max(IMAGE_UPLOAD_LIMIT)),
        )
        .route("/accounts/email/change", post(accounts::email_change))
        // two-factor
        .route("/twofactor/settings", get(twofactor::security_settings))
        .route("/twofactor/setup", post(twofactor::setup))
        .route("/twofactor/setup/totp", post(twofactor::setup_totp))
        .route("/twofactor/qr-code", get(twofactor::qr_code))
        .route("/twofactor/setup/email", post(twofactor::setup_email))
        .route(
            "/twofactor/setup/email/request",
            post(twofactor::request_setup_email_code),
        )
        .route(
            "/twofactor/verify",
            get(twofactor::verify_page).post(twofactor::verify),
        )
        .route(
            "/twofactor/verify/email/request",
            post(twofactor::request_verify_email_code),
        )
        .route("/twofactor/disable", post(twofactor::disable))
        .route("/twofactor/backup-codes", get(twofactor::backup_codes))
        .route(
            "/twofactor/backup-codes/regenerate",
            post(twofactor::regenerate_backup_codes),
        )
        .route("/twofactor/change-method", post(twofactor::change_method))
        // staking
        .route("/staking/dashboard", get(staking::dashboard))
        .route("/staking/stake", post(staking::create_stake))
        .route(
            "/staking/deposit",
            get(staking::deposit_page).post(staking::create_deposit),
        )
        .route("/staking/withdrawal", post(staking::create_withdrawal))
        .route("/staking/swap", get(staking::swap_page).post(staking::create_swap))
        .route("/staking/transactions", get(staking::transactions))
        .route("/staking/order-card", post(staking::order_card))
        .merge(admin_routes)
        // the gate reads the user that auth_middleware attaches, so auth is the outer layer
        .layer(from_fn_with_state(state.clone(), two_factor_gate))
        .layer(from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .nest_service("/media", ServeDir::new(&state.config.media_root))
        .with_state(state)
}
