use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub jwt_expiration_secs: u64,
    pub link_token_expiration_secs: u64,
    pub rate_limit_window_secs: u64,
    pub rate_limit_requests: u32,
    pub server_host: String,
    pub server_port: u16,
    pub site_url: String,
    pub site_name: String,
    pub default_from_email: String,
    pub admin_email: String,
    pub smtp: Option<SmtpSettings>,
    pub media_root: PathBuf,
    pub two_factor_window_days: i64,
    pub email_otp_expiry_minutes: i64,
    pub otp_max_attempts: u32,
    pub otp_attempt_window_secs: u64,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

fn var_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn hours(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().trim_end_matches('h').parse::<u64>().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenv::dotenv().ok();

        let smtp = non_empty("SMTP_HOST").map(|host| SmtpSettings {
            host,
            port: var_or("SMTP_PORT", 587),
            username: non_empty("SMTP_USERNAME"),
            password: non_empty("SMTP_PASSWORD"),
        });

        Ok(Config {
            database_url: env::var("DATABASE_URL")?,
            redis_url: env::var("REDIS_URL")?,
            jwt_secret: env::var("JWT_SECRET")?,
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "::".into()),
            server_port: var_or("SERVER_PORT", 3000),
            jwt_expiration_secs: hours("JWT_EXPIRATION", 24) * 3600,
            link_token_expiration_secs: hours("LINK_TOKEN_EXPIRATION", 72) * 3600,
            rate_limit_window_secs: var_or("RATE_LIMIT_WINDOW", 60),
            rate_limit_requests: var_or("RATE_LIMIT_REQUESTS", 100),
            site_url: env::var("SITE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".into())
                .trim_end_matches('/')
                .to_string(),
            site_name: env::var("SITE_NAME").unwrap_or_else(|_| "Stakehouse".into()),
            default_from_email: env::var("DEFAULT_FROM_EMAIL")
                .unwrap_or_else(|_| "noreply@example.com".into()),
            admin_email: env::var("ADMIN_EMAIL").unwrap_or_else(|_| "admin@example.com".into()),
            smtp,
            media_root: env::var("MEDIA_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("media")),
            two_factor_window_days: var_or("TWO_FACTOR_VERIFICATION_WINDOW_DAYS", 14),
            email_otp_expiry_minutes: var_or("TWO_FACTOR_EMAIL_OTP_EXPIRY_MINUTES", 10),
            otp_max_attempts: var_or("OTP_MAX_ATTEMPTS", 5),
            otp_attempt_window_secs: var_or("OTP_ATTEMPT_WINDOW", 900),
        })
    }

    pub fn jwt_expiration(&self) -> Duration {
        Duration::from_secs(self.jwt_expiration_secs)
    }

    pub fn link_token_expiration(&self) -> Duration {
        Duration::from_secs(self.link_token_expiration_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn otp_attempt_window(&self) -> Duration {
        Duration::from_secs(self.otp_attempt_window_secs)
    }

    /// How long a successful second-factor check stays fresh.
    pub fn two_factor_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.two_factor_window_days)
    }

    pub fn email_otp_expiry(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.email_otp_expiry_minutes)
    }
}
