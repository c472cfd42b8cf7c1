use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use chrono::Utc;

use crate::AppState;
use crate::error::AppError;
use crate::routes::accounts::User;
use crate::routes::twofactor::TwoFactorSettings;

/// Paths reachable while a second-factor check is outstanding.
const EXEMPT_PREFIXES: &[&str] = &["/twofactor/verify", "/accounts/logout", "/static/", "/media/"];

pub fn is_exempt(path: &str) -> bool {
    EXEMPT_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
}

pub fn verification_url(next: &str) -> String {
    format!("/twofactor/verify?next={}", urlencoding::encode(next))
}

/// Only same-site relative paths are followed after verification.
pub fn safe_next(next: Option<&str>) -> String {
    match next {
        Some(path) if path.starts_with('/') && !path.starts_with("//") && !path.contains('\\') => {
            path.to_string()
        }
        _ => "/".to_string(),
    }
}

/// Sends authenticated users with stale second-factor verification to the
/// verification page, remembering where they were going.
pub async fn two_factor_gate(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    if is_exempt(req.uri().path()) {
        return Ok(next.run(req).await);
    }
    let Some(user_id) = req.extensions().get::<User>().map(|u| u.id) else {
        return Ok(next.run(req).await);
    };

    if let Some(settings) = TwoFactorSettings::find_enabled(&state.pool, user_id).await? {
        if settings.needs_verification_at(Utc::now(), state.config.two_factor_window()) {
            let target = req
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/");
            tracing::info!(user_id = %user_id, requested = target, "second factor required");
            return Ok(Redirect::to(&verification_url(target)).into_response());
        }
    }

    Ok(next.run(req).await)
}
