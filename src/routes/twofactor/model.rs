use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::utils::text_enum;

text_enum! {
    pub enum TwoFactorMethod {
        Totp => "TOTP",
        Email => "EMAIL",
    }
}

impl TwoFactorMethod {
    pub fn label(&self) -> &'static str {
        match self {
            TwoFactorMethod::Totp => "Authenticator App (TOTP)",
            TwoFactorMethod::Email => "Email",
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TwoFactorSettings {
    pub user_id: Uuid,
    pub is_enabled: bool,
    pub method: TwoFactorMethod,
    #[serde(skip_serializing)]
    pub totp_secret: Option<String>,
    #[serde(skip_serializing)]
    pub pending_totp_secret: Option<String>,
    #[serde(skip_serializing)]
    pub backup_codes: Vec<String>,
    pub last_verified: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TwoFactorSettings {
    /// An enabled account needs a code when it was never verified or the last
    /// verification is older than `window`.
    pub fn needs_verification_at(&self, now: DateTime<Utc>, window: Duration) -> bool {
        if !self.is_enabled {
            return false;
        }
        match self.last_verified {
            None => true,
            Some(at) => now > at + window,
        }
    }

    pub async fn get_or_create(pool: &PgPool, user_id: Uuid) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, TwoFactorSettings>(
            r#"
            INSERT INTO two_factor_settings (user_id) VALUES ($1)
            ON CONFLICT (user_id) DO UPDATE SET user_id = EXCLUDED.user_id
            RETURNING *
            "#,
        )
        .bind(user_id)
        .fetch_one(pool)
        .await
    }

    pub async fn find_enabled(pool: &PgPool, user_id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, TwoFactorSettings>(
            "SELECT * FROM two_factor_settings WHERE user_id = $1 AND is_enabled",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn set_pending_secret(
        pool: &PgPool,
        user_id: Uuid,
        secret: &str,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, TwoFactorSettings>(
            r#"
            INSERT INTO two_factor_settings (user_id, pending_totp_secret) VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE
            SET pending_totp_secret = EXCLUDED.pending_totp_secret, updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(secret)
        .fetch_one(pool)
        .await
    }

    /// Turns the method on, replaces the backup codes and counts as a fresh
    /// verification. Email accounts keep no TOTP secret.
    pub async fn enable(
        pool: &PgPool,
        user_id: Uuid,
        method: TwoFactorMethod,
        totp_secret: Option<&str>,
        backup_codes: &[String],
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, TwoFactorSettings>(
            r#"
            UPDATE two_factor_settings
            SET is_enabled = TRUE,
                method = $2,
                totp_secret = $3,
                pending_totp_secret = NULL,
                backup_codes = $4,
                last_verified = NOW(),
                updated_at = NOW()
            WHERE user_id = $1
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(method)
        .bind(totp_secret)
        .bind(backup_codes)
        .fetch_one(pool)
        .await
    }

    pub async fn disable(pool: &PgPool, user_id: Uuid) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, TwoFactorSettings>(
            r#"
            UPDATE two_factor_settings
            SET is_enabled = FALSE,
                totp_secret = NULL,
                pending_totp_secret = NULL,
                backup_codes = '{}',
                last_verified = NULL,
                updated_at = NOW()
            WHERE user_id = $1
            RETURNING *
            "#,
        )
        .bind(user_id)
        .fetch_one(pool)
        .await
    }

    pub async fn touch_verified(pool: &PgPool, user_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE two_factor_settings SET last_verified = NOW(), updated_at = NOW() WHERE user_id = $1",
        )
        .bind(user_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn replace_backup_codes(
        pool: &PgPool,
        user_id: Uuid,
        codes: &[String],
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, TwoFactorSettings>(
            r#"
            UPDATE two_factor_settings SET backup_codes = $2, updated_at = NOW()
            WHERE user_id = $1
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(codes)
        .fetch_one(pool)
        .await
    }

    /// Removes `code` from the remaining backup codes. `true` only for the
    /// request that actually removed it.
    pub async fn consume_backup_code(
        pool: &PgPool,
        user_id: Uuid,
        code: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE two_factor_settings
            SET backup_codes = array_remove(backup_codes, $2), updated_at = NOW()
            WHERE user_id = $1 AND is_enabled AND $2 = ANY(backup_codes)
            "#,
        )
        .bind(user_id)
        .bind(code)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EmailOtp {
    pub id: i64,
    pub user_id: Uuid,
    pub code: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_used: bool,
}

impl EmailOtp {
    pub async fn issue(
        pool: &PgPool,
        user_id: Uuid,
        code: &str,
        ttl: Duration,
    ) -> Result<Self, sqlx::Error> {
        let now = Utc::now();
        sqlx::query_as::<_, EmailOtp>(
            r#"
            INSERT INTO email_otps (user_id, code, created_at, expires_at, is_used)
            VALUES ($1, $2, $3, $4, FALSE)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(code)
        .bind(now)
        .bind(now + ttl)
        .fetch_one(pool)
        .await
    }

    /// Marks the newest live OTP matching `code` as used. Exactly one caller
    /// can succeed for a given OTP.
    pub async fn redeem(pool: &PgPool, user_id: Uuid, code: &str) -> Result<bool, sqlx::Error> {
        let redeemed = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE email_otps SET is_used = TRUE
            WHERE id = (
                SELECT id FROM email_otps
                WHERE user_id = $1 AND code = $2 AND NOT is_used AND expires_at > NOW()
                ORDER BY created_at DESC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            AND NOT is_used
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(code)
        .fetch_optional(pool)
        .await?;

        Ok(redeemed.is_some())
    }

    pub async fn has_live(pool: &PgPool, user_id: Uuid) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM email_otps
                WHERE user_id = $1 AND NOT is_used AND expires_at > NOW()
            )
            "#,
        )
        .bind(user_id)
        .fetch_one(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(enabled: bool, last_verified: Option<DateTime<Utc>>) -> TwoFactorSettings {
        let now = Utc::now();
        TwoFactorSettings {
            user_id: Uuid::new_v4(),
            is_enabled: enabled,
            method: TwoFactorMethod::Totp,
            totp_secret: None,
            pending_totp_secret: None,
            backup_codes: Vec::new(),
            last_verified,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn verification_stays_fresh_for_the_window() {
        let now = Utc::now();
        let window = Duration::days(14);

        assert!(!settings(true, Some(now - Duration::days(13))).needs_verification_at(now, window));
        assert!(settings(true, Some(now - Duration::days(15))).needs_verification_at(now, window));
        assert!(settings(true, None).needs_verification_at(now, window));
    }

    #[test]
    fn disabled_accounts_are_never_prompted() {
        let now = Utc::now();
        assert!(!settings(false, None).needs_verification_at(now, Duration::days(14)));
    }

    #[test]
    fn method_codes() {
        assert_eq!("EMAIL".parse::<TwoFactorMethod>().unwrap(), TwoFactorMethod::Email);
        assert_eq!(TwoFactorMethod::Totp.as_str(), "TOTP");
    }
}
