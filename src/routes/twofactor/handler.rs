use axum::{
    Extension,
    extract::{Json, Query, State},
    http::header,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::mail::templates;
use crate::middleware::safe_next;
use crate::routes::accounts::User;
use crate::utils::success_to_api_response;

use super::attempts;
use super::model::{EmailOtp, TwoFactorMethod, TwoFactorSettings};
use super::otp;

const INVALID_CODE: &str = "Invalid verification code. Please try again.";
const INVALID_EMAIL_CODE: &str = "Invalid or expired verification code. Please try again.";

#[derive(Debug, Serialize)]
pub struct SettingsResponse {
    pub is_enabled: bool,
    pub method: TwoFactorMethod,
    pub method_label: &'static str,
    pub last_verified: Option<DateTime<Utc>>,
    pub backup_codes_remaining: usize,
    pub verification_required: bool,
}

#[derive(Debug, Serialize)]
pub struct SetupResponse {
    pub method: TwoFactorMethod,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otpauth_url: Option<String>,
    /// Base64 PNG.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_code_url: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct EnabledResponse {
    pub message: &'static str,
    pub method: TwoFactorMethod,
    pub backup_codes: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub verified: bool,
    pub next_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<TwoFactorMethod>,
}

#[derive(Debug, Serialize)]
pub struct BackupCodesResponse {
    pub backup_codes: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct MethodRequest {
    pub method: TwoFactorMethod,
}

#[derive(Debug, Deserialize)]
pub struct CodeRequest {
    pub code: String,
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NextQuery {
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DisableRequest {
    #[serde(default)]
    pub confirm: bool,
}

async fn send_email_code(state: &AppState, user: &User) -> AppResult<()> {
    let code = otp::generate_email_code();
    EmailOtp::issue(&state.pool, user.id, &code, state.config.email_otp_expiry()).await?;
    state
        .mailer
        .notify(user.email.clone(), templates::otp_code(&state.config, &code));
    Ok(())
}

/// Runs one code check under the per-user attempt limit.
async fn limited<F>(state: &AppState, user: &User, check: F) -> AppResult<bool>
where
    F: Future<Output = AppResult<bool>>,
{
    attempts::ensure_not_locked(state, &user.id).await?;
    let ok = check.await?;
    if ok {
        attempts::clear(state, &user.id).await?;
    } else {
        let failures = attempts::record_failure(state, &user.id).await?;
        tracing::info!(user_id = %user.id, failures, "second factor code rejected");
    }
    Ok(ok)
}

/// Accepts the code for the active method, or any unused backup code.
async fn check_enabled_code(
    state: &AppState,
    user: &User,
    settings: &TwoFactorSettings,
    code: &str,
) -> AppResult<bool> {
    let primary = match settings.method {
        TwoFactorMethod::Totp => match settings.totp_secret.as_deref() {
            Some(secret) => otp::verify_totp(secret, code)?,
            None => false,
        },
        TwoFactorMethod::Email => {
            otp::is_numeric_code(code, otp::EMAIL_CODE_LENGTH)
                && EmailOtp::redeem(&state.pool, user.id, code).await?
        }
    };
    if primary {
        return Ok(true);
    }

    if otp::is_numeric_code(code, otp::BACKUP_CODE_LENGTH)
        && TwoFactorSettings::consume_backup_code(&state.pool, user.id, code).await?
    {
        tracing::info!(user_id = %user.id, "backup code used");
        return Ok(true);
    }
    Ok(false)
}

async fn require_enabled(state: &AppState, user: &User) -> AppResult<TwoFactorSettings> {
    TwoFactorSettings::find_enabled(&state.pool, user.id)
        .await?
        .ok_or_else(|| AppError::Validation("Two-factor authentication is not enabled.".into()))
}

async fn begin_setup(state: &AppState, user: &User, method: TwoFactorMethod) -> AppResult<SetupResponse> {
    match method {
        TwoFactorMethod::Totp => {
            let secret = otp::generate_totp_secret();
            TwoFactorSettings::set_pending_secret(&state.pool, user.id, &secret).await?;
            let provisioning = otp::provisioning(&secret, &state.config.site_name, &user.email)?;

            Ok(SetupResponse {
                method,
                message: "Scan the QR code with your authenticator app, then enter the 6-digit code."
                    .into(),
                secret: Some(secret),
                otpauth_url: Some(provisioning.otpauth_url),
                qr_code: Some(provisioning.qr_code),
                qr_code_url: Some("/twofactor/qr-code"),
            })
        }
        TwoFactorMethod::Email => {
            TwoFactorSettings::get_or_create(&state.pool, user.id).await?;
            send_email_code(state, user).await?;

            Ok(SetupResponse {
                method,
                message: format!("A verification code has been sent to {}.", user.email),
                secret: None,
                otpauth_url: None,
                qr_code: None,
                qr_code_url: None,
            })
        }
    }
}

#[axum::debug_handler]
pub async fn security_settings(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> AppResult<impl IntoResponse> {
    let settings = TwoFactorSettings::get_or_create(&state.pool, user.id).await?;

    Ok(success_to_api_response(SettingsResponse {
        is_enabled: settings.is_enabled,
        method: settings.method,
        method_label: settings.method.label(),
        last_verified: settings.last_verified,
        backup_codes_remaining: settings.backup_codes.len(),
        verification_required: settings
            .needs_verification_at(Utc::now(), state.config.two_factor_window()),
    }))
}

#[axum::debug_handler]
pub async fn setup(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<MethodRequest>,
) -> AppResult<impl IntoResponse> {
    if TwoFactorSettings::find_enabled(&state.pool, user.id).await?.is_some() {
        return Err(AppError::Validation(
            "Two-factor authentication is already enabled.".into(),
        ));
    }
    Ok(success_to_api_response(begin_setup(&state, &user, req.method).await?))
}

#[axum::debug_handler]
pub async fn setup_totp(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<CodeRequest>,
) -> AppResult<impl IntoResponse> {
    let settings = TwoFactorSettings::get_or_create(&state.pool, user.id).await?;
    let Some(secret) = settings.pending_totp_secret else {
        return Err(AppError::Validation("Setup session expired. Please start again.".into()));
    };

    let code = req.code.trim();
    let ok = limited(&state, &user, async { otp::verify_totp(&secret, code) }).await?;
    if !ok {
        return Err(AppError::Validation(INVALID_CODE.into()));
    }

    let backup_codes = otp::generate_backup_codes();
    TwoFactorSettings::enable(
        &state.pool,
        user.id,
        TwoFactorMethod::Totp,
        Some(&secret),
        &backup_codes,
    )
    .await?;
    tracing::info!(user_id = %user.id, "totp enabled");

    Ok(success_to_api_response(EnabledResponse {
        message: "Two-factor authentication has been enabled successfully.",
        method: TwoFactorMethod::Totp,
        backup_codes,
    }))
}

#[axum::debug_handler]
pub async fn qr_code(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> AppResult<impl IntoResponse> {
    let settings = TwoFactorSettings::get_or_create(&state.pool, user.id).await?;
    let secret = settings
        .pending_totp_secret
        .ok_or(AppError::NotFound("pending setup"))?;

    let png = otp::qr_png(&secret, &state.config.site_name, &user.email)?;
    Ok((
        [
            (header::CONTENT_TYPE, "image/png"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        png,
    ))
}

#[axum::debug_handler]
pub async fn setup_email(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<CodeRequest>,
) -> AppResult<impl IntoResponse> {
    let code = req.code.trim();
    let ok = limited(&state, &user, async {
        Ok::<_, AppError>(
            otp::is_numeric_code(code, otp::EMAIL_CODE_LENGTH)
                && EmailOtp::redeem(&state.pool, user.id, code).await?,
        )
    })
    .await?;
    if !ok {
        return Err(AppError::Validation(INVALID_EMAIL_CODE.into()));
    }

    let backup_codes = otp::generate_backup_codes();
    TwoFactorSettings::enable(&state.pool, user.id, TwoFactorMethod::Email, None, &backup_codes)
        .await?;
    tracing::info!(user_id = %user.id, "email two-factor enabled");

    Ok(success_to_api_response(EnabledResponse {
        message: "Two-factor authentication has been enabled successfully.",
        method: TwoFactorMethod::Email,
        backup_codes,
    }))
}

#[axum::debug_handler]
pub async fn request_setup_email_code(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> AppResult<impl IntoResponse> {
    send_email_code(&state, &user).await?;
    Ok(success_to_api_response(MessageResponse {
        message: format!("A new verification code has been sent to {}.", user.email),
    }))
}

#[axum::debug_handler]
pub async fn verify_page(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<NextQuery>,
) -> AppResult<impl IntoResponse> {
    let next_url = safe_next(query.next.as_deref());
    let Some(settings) = TwoFactorSettings::find_enabled(&state.pool, user.id).await? else {
        return Ok(success_to_api_response(VerifyResponse {
            verified: true,
            next_url,
            method: None,
        }));
    };

    if !settings.needs_verification_at(Utc::now(), state.config.two_factor_window()) {
        return Ok(success_to_api_response(VerifyResponse {
            verified: true,
            next_url,
            method: Some(settings.method),
        }));
    }

    if settings.method == TwoFactorMethod::Email && !EmailOtp::has_live(&state.pool, user.id).await? {
        send_email_code(&state, &user).await?;
    }

    Ok(success_to_api_response(VerifyResponse {
        verified: false,
        next_url,
        method: Some(settings.method),
    }))
}

#[axum::debug_handler]
pub async fn verify(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<CodeRequest>,
) -> AppResult<impl IntoResponse> {
    let next_url = safe_next(req.next.as_deref());
    let Some(settings) = TwoFactorSettings::find_enabled(&state.pool, user.id).await? else {
        return Ok(success_to_api_response(VerifyResponse {
            verified: true,
            next_url,
            method: None,
        }));
    };

    let code = req.code.trim();
    let ok = limited(&state, &user, check_enabled_code(&state, &user, &settings, code)).await?;
    if !ok {
        return Err(AppError::Validation(INVALID_CODE.into()));
    }

    TwoFactorSettings::touch_verified(&state.pool, user.id).await?;
    tracing::info!(user_id = %user.id, "second factor verified");

    Ok(success_to_api_response(VerifyResponse {
        verified: true,
        next_url,
        method: Some(settings.method),
    }))
}

#[axum::debug_handler]
pub async fn request_verify_email_code(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> AppResult<impl IntoResponse> {
    let settings = require_enabled(&state, &user).await?;
    if settings.method != TwoFactorMethod::Email {
        return Err(AppError::Validation(
            "Email verification is not enabled for this account.".into(),
        ));
    }

    send_email_code(&state, &user).await?;
    Ok(success_to_api_response(MessageResponse {
        message: format!("A new verification code has been sent to {}.", user.email),
    }))
}

#[axum::debug_handler]
pub async fn disable(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<DisableRequest>,
) -> AppResult<impl IntoResponse> {
    require_enabled(&state, &user).await?;
    if !req.confirm {
        return Err(AppError::field(
            "confirm",
            "Please confirm that you want to disable two-factor authentication.",
        ));
    }

    TwoFactorSettings::disable(&state.pool, user.id).await?;
    tracing::info!(user_id = %user.id, "two-factor disabled");

    Ok(success_to_api_response(MessageResponse {
        message: "Two-factor authentication has been disabled.".into(),
    }))
}

#[axum::debug_handler]
pub async fn backup_codes(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> AppResult<impl IntoResponse> {
    let settings = require_enabled(&state, &user).await?;
    Ok(success_to_api_response(BackupCodesResponse {
        backup_codes: settings.backup_codes,
    }))
}

#[axum::debug_handler]
pub async fn regenerate_backup_codes(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> AppResult<impl IntoResponse> {
    require_enabled(&state, &user).await?;
    let codes = otp::generate_backup_codes();
    let settings = TwoFactorSettings::replace_backup_codes(&state.pool, user.id, &codes).await?;
    tracing::info!(user_id = %user.id, "backup codes regenerated");

    Ok(success_to_api_response(BackupCodesResponse {
        backup_codes: settings.backup_codes,
    }))
}

#[axum::debug_handler]
pub async fn change_method(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<MethodRequest>,
) -> AppResult<impl IntoResponse> {
    let settings = require_enabled(&state, &user).await?;
    if settings.method == req.method {
        return Err(AppError::Validation(format!(
            "You are already using {}.",
            req.method.label()
        )));
    }

    // the current method stays active until the new one is confirmed
    Ok(success_to_api_response(begin_setup(&state, &user, req.method).await?))
}
