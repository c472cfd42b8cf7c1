use axum::{
    Extension,
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use chrono::Utc;
use redis::AsyncCommands;

use crate::AppState;
use crate::error::AppError;
use crate::routes::accounts::User;
use crate::utils::{Claims, verify_token};

fn revoked_key(jti: &str) -> String {
    format!("revoked_jti:{}", jti)
}

/// Resolves the bearer token to an active user and puts both the claims and
/// the user into request extensions.
pub async fn auth_middleware(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let Some(TypedHeader(Authorization(bearer))) = bearer else {
        return Err(AppError::Unauthorized);
    };

    let claims = verify_token(bearer.token(), &state.config).map_err(|e| {
        tracing::debug!("rejected token: {}", e);
        AppError::Unauthorized
    })?;

    if is_revoked(&state, &claims.jti).await? {
        return Err(AppError::Unauthorized);
    }

    let user_id = claims.user_id().ok_or(AppError::Unauthorized)?;
    let user = User::find_by_id(&state.pool, user_id)
        .await?
        .filter(|u| u.is_active)
        .ok_or(AppError::Unauthorized)?;

    req.extensions_mut().insert(claims);
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

/// Must run inside `auth_middleware`.
pub async fn require_staff(
    Extension(user): Extension<User>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    if !user.is_staff {
        tracing::warn!(user_id = %user.id, path = %req.uri().path(), "non-staff user hit admin route");
        return Err(AppError::Forbidden);
    }
    Ok(next.run(req).await)
}

async fn is_revoked(state: &AppState, jti: &str) -> Result<bool, AppError> {
    let mut conn = state.redis.get_multiplexed_async_connection().await?;
    Ok(conn.exists(revoked_key(jti)).await?)
}

/// Blacklists the token's id until the token would have expired anyway.
pub async fn revoke(state: &AppState, claims: &Claims) -> Result<(), AppError> {
    let ttl = claims.exp - Utc::now().timestamp();
    if ttl <= 0 {
        return Ok(());
    }

    let mut conn = state.redis.get_multiplexed_async_connection().await?;
    let _: () = conn.set_ex(revoked_key(&claims.jti), 1, ttl as u64).await?;
    Ok(())
}
