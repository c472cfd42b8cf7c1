use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::borrow::Cow;

use rust_decimal::Decimal;
use validator::{ValidationError, ValidationErrors};

use crate::routes::staking::model::AssetType;
use crate::utils::{ApiResponse, error_codes, error_to_api_response, field_messages};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("please correct the errors below")]
    Fields(#[from] ValidationErrors),
    #[error("authentication required")]
    Unauthorized,
    #[error("{0}")]
    AuthFailed(&'static str),
    #[error("{0}")]
    AccountInactive(&'static str),
    #[error("{0}")]
    EmailNotVerified(&'static str),
    #[error("permission denied")]
    Forbidden,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(&'static str),
    #[error("insufficient balance")]
    InsufficientBalance,
    #[error("minimum amount for this plan is {minimum} {asset}")]
    BelowMinimum { minimum: Decimal, asset: AssetType },
    #[error("exchange rate not available for this pair")]
    RateUnavailable,
    #[error("{0}")]
    InvalidLink(&'static str),
    #[error("too many attempts, try again in {0} seconds")]
    RateLimited(u64),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("cache error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("{0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl From<bcrypt::BcryptError> for AppError {
    fn from(e: bcrypt::BcryptError) -> Self {
        AppError::Internal(format!("password hashing failed: {}", e))
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        AppError::Internal(format!("token signing failed: {}", e))
    }
}

impl AppError {
    /// A single per-field message, rendered like any other form error.
    pub fn field(field: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        let mut err = ValidationError::new("invalid");
        err.message = Some(message.into());
        let mut errors = ValidationErrors::new();
        errors.add(field, err);
        AppError::Fields(errors)
    }

    fn status_and_code(&self) -> (StatusCode, i32) {
        match self {
            AppError::Validation(_) | AppError::Fields(_) => {
                (StatusCode::BAD_REQUEST, error_codes::VALIDATION_ERROR)
            }
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, error_codes::AUTH_FAILED),
            AppError::AuthFailed(_) => (StatusCode::UNAUTHORIZED, error_codes::AUTH_FAILED),
            AppError::AccountInactive(_) => (StatusCode::FORBIDDEN, error_codes::ACCOUNT_INACTIVE),
            AppError::EmailNotVerified(_) => {
                (StatusCode::FORBIDDEN, error_codes::EMAIL_NOT_VERIFIED)
            }
            AppError::Forbidden => (StatusCode::FORBIDDEN, error_codes::PERMISSION_DENIED),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, error_codes::NOT_FOUND),
            AppError::Conflict(_) => (StatusCode::CONFLICT, error_codes::USER_EXISTS),
            AppError::InsufficientBalance => {
                (StatusCode::BAD_REQUEST, error_codes::INSUFFICIENT_BALANCE)
            }
            AppError::BelowMinimum { .. } => (StatusCode::BAD_REQUEST, error_codes::BELOW_MINIMUM),
            AppError::RateUnavailable => (StatusCode::BAD_REQUEST, error_codes::RATE_UNAVAILABLE),
            AppError::InvalidLink(_) => (StatusCode::BAD_REQUEST, error_codes::INVALID_LINK),
            AppError::RateLimited(_) => (StatusCode::TOO_MANY_REQUESTS, error_codes::RATE_LIMIT),
            AppError::Database(_) | AppError::Redis(_) | AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, error_codes::INTERNAL_ERROR)
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            let body = error_to_api_response::<()>(code, "internal server error".into());
            return (status, body).into_response();
        }

        let resp_data = match &self {
            AppError::Fields(errors) => Some(field_messages(errors)),
            _ => None,
        };
        let body = ApiResponse {
            code,
            msg: self.to_string(),
            resp_data,
        };

        (status, axum::Json(body)).into_response()
    }
}
