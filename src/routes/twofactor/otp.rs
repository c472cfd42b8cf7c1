//! Code generation and verification for the second factor.

use rand::Rng;
use totp_rs::{Algorithm, Secret, TOTP};

use crate::error::{AppError, AppResult};

pub const TOTP_DIGITS: usize = 6;
/// One step either side of the current one is accepted.
pub const TOTP_SKEW: u8 = 1;
pub const TOTP_STEP: u64 = 30;

pub const EMAIL_CODE_LENGTH: usize = 6;
pub const BACKUP_CODE_COUNT: usize = 10;
pub const BACKUP_CODE_LENGTH: usize = 8;

pub fn generate_totp_secret() -> String {
    Secret::generate_secret().to_encoded().to_string()
}

fn build_totp(secret_base32: &str, issuer: Option<&str>, account: &str) -> AppResult<TOTP> {
    let secret = Secret::Encoded(secret_base32.to_string())
        .to_bytes()
        .map_err(|e| AppError::Internal(format!("Invalid secret: {}", e)))?;

    TOTP::new(
        Algorithm::SHA1,
        TOTP_DIGITS,
        TOTP_SKEW,
        TOTP_STEP,
        secret,
        issuer.map(str::to_string),
        account.to_string(),
    )
    .map_err(|e| AppError::Internal(format!("Failed to create TOTP: {}", e)))
}

/// Checks `code` against the secret at unix time `at`.
pub fn verify_totp_at(secret_base32: &str, code: &str, at: u64) -> AppResult<bool> {
    if !is_numeric_code(code, TOTP_DIGITS) {
        return Ok(false);
    }
    let totp = build_totp(secret_base32, None, "")?;
    Ok(totp.check(code, at))
}

pub fn verify_totp(secret_base32: &str, code: &str) -> AppResult<bool> {
    verify_totp_at(secret_base32, code, unix_now())
}

fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

pub struct Provisioning {
    pub otpauth_url: String,
    /// PNG encoded as base64.
    pub qr_code: String,
}

pub fn provisioning(secret_base32: &str, issuer: &str, account: &str) -> AppResult<Provisioning> {
    let totp = build_totp(secret_base32, Some(issuer), account)?;
    let qr_code = totp
        .get_qr_base64()
        .map_err(|e| AppError::Internal(format!("Failed to generate QR code: {}", e)))?;

    Ok(Provisioning {
        otpauth_url: totp.get_url(),
        qr_code,
    })
}

pub fn qr_png(secret_base32: &str, issuer: &str, account: &str) -> AppResult<Vec<u8>> {
    build_totp(secret_base32, Some(issuer), account)?
        .get_qr_png()
        .map_err(|e| AppError::Internal(format!("Failed to generate QR code: {}", e)))
}

fn numeric_code(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen_range(0..10).to_string()).collect()
}

pub fn generate_email_code() -> String {
    numeric_code(EMAIL_CODE_LENGTH)
}

pub fn generate_backup_codes() -> Vec<String> {
    (0..BACKUP_CODE_COUNT)
        .map(|_| numeric_code(BACKUP_CODE_LENGTH))
        .collect()
}

pub fn is_numeric_code(code: &str, len: usize) -> bool {
    code.len() == len && code.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: u64 = 1_700_000_010;

    fn code_at(secret: &str, at: u64) -> String {
        build_totp(secret, None, "").unwrap().generate(at)
    }

    #[test]
    fn totp_accepts_current_and_adjacent_steps() {
        let secret = generate_totp_secret();
        let code = code_at(&secret, T0);

        assert!(verify_totp_at(&secret, &code, T0).unwrap());
        assert!(verify_totp_at(&secret, &code, T0 + TOTP_STEP).unwrap());
        assert!(!verify_totp_at(&secret, &code, T0 + 4 * TOTP_STEP).unwrap());
    }

    #[test]
    fn totp_rejects_malformed_codes_without_checking() {
        let secret = generate_totp_secret();
        assert!(!verify_totp_at(&secret, "12345", T0).unwrap());
        assert!(!verify_totp_at(&secret, "abcdef", T0).unwrap());
    }

    #[test]
    fn provisioning_uri_names_issuer_and_account() {
        let secret = generate_totp_secret();
        let p = provisioning(&secret, "Stakehouse", "ada@example.com").unwrap();

        assert!(p.otpauth_url.starts_with("otpauth://totp/"));
        assert!(p.otpauth_url.contains("issuer=Stakehouse"));
        assert!(p.otpauth_url.contains(&secret));
        assert!(!p.qr_code.is_empty());
    }

    #[test]
    fn generated_codes_have_expected_shape() {
        assert!(is_numeric_code(&generate_email_code(), EMAIL_CODE_LENGTH));

        let codes = generate_backup_codes();
        assert_eq!(codes.len(), BACKUP_CODE_COUNT);
        assert!(codes.iter().all(|c| is_numeric_code(c, BACKUP_CODE_LENGTH)));
    }
}
