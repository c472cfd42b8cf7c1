//! Per-user counter of failed second-factor codes, kept in redis with the same
//! INCR/EXPIRE scheme as the request rate limiter.

use redis::AsyncCommands;
use uuid::Uuid;

use crate::AppState;
use crate::error::{AppError, AppResult};

pub fn attempts_key(user_id: &Uuid) -> String {
    format!("otp_attempts:{}", user_id)
}

/// Refuses further codes while the user is locked out.
pub async fn ensure_not_locked(state: &AppState, user_id: &Uuid) -> AppResult<()> {
    let key = attempts_key(user_id);
    let mut conn = state.redis.get_multiplexed_async_connection().await?;

    let failures: Option<u32> = conn.get(&key).await?;
    if failures.unwrap_or(0) >= state.config.otp_max_attempts {
        let ttl: i64 = conn.ttl(&key).await?;
        let retry_after = if ttl > 0 {
            ttl as u64
        } else {
            state.config.otp_attempt_window().as_secs()
        };
        tracing::warn!(user_id = %user_id, "second factor locked after repeated failures");
        return Err(AppError::RateLimited(retry_after));
    }
    Ok(())
}

pub async fn record_failure(state: &AppState, user_id: &Uuid) -> AppResult<u32> {
    let key = attempts_key(user_id);
    let mut conn = state.redis.get_multiplexed_async_connection().await?;

    let failures: u32 = conn.incr(&key, 1).await?;
    if failures == 1 {
        let _: () = conn
            .expire(&key, state.config.otp_attempt_window().as_secs() as i64)
            .await?;
    }
    Ok(failures)
}

pub async fn clear(state: &AppState, user_id: &Uuid) -> AppResult<()> {
    let mut conn = state.redis.get_multiplexed_async_connection().await?;
    let _: () = conn.del(attempts_key(user_id)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_scoped_per_user() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_ne!(attempts_key(&a), attempts_key(&b));
        assert!(attempts_key(&a).starts_with("otp_attempts:"));
    }
}
