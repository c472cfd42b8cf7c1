//! Stateless tokens for emailed links (activation, email change, password reset).
//!
//! A token is only accepted while the account still looks the way it did when
//! the token was issued: the payload carries a digest of the password hash, the
//! email address and the last login time. Changing any of them invalidates every
//! outstanding link for that account.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::Config;

const KEY_SALT: &str = "stakehouse.signed-link";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LinkPurpose {
    Activation,
    EmailChange { new_email: String },
    PasswordReset,
}

/// The account fields a link token is bound to.
#[derive(Debug, Clone, Copy)]
pub struct LinkSubject<'a> {
    pub user_id: Uuid,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub last_login: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LinkClaims {
    sub: String,
    purpose: LinkPurpose,
    stamp: String,
    iat: i64,
    exp: i64,
}

fn signing_key(config: &Config) -> Vec<u8> {
    format!("{}:{}", KEY_SALT, config.jwt_secret).into_bytes()
}

fn state_stamp(subject: &LinkSubject<'_>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(subject.user_id.as_bytes());
    hasher.update(subject.password_hash.as_bytes());
    hasher.update(subject.email.as_bytes());
    if let Some(ts) = subject.last_login {
        hasher.update(ts.timestamp_micros().to_be_bytes());
    }
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

pub fn encode_uid(user_id: &Uuid) -> String {
    URL_SAFE_NO_PAD.encode(user_id.to_string())
}

pub fn decode_uid(uid: &str) -> Option<Uuid> {
    let bytes = URL_SAFE_NO_PAD.decode(uid).ok()?;
    let text = String::from_utf8(bytes).ok()?;
    Uuid::parse_str(&text).ok()
}

pub fn make_link_token(
    subject: &LinkSubject<'_>,
    purpose: LinkPurpose,
    config: &Config,
) -> Result<String, jsonwebtoken::errors::Error> {
    make_link_token_at(subject, purpose, config, Utc::now())
}

pub(crate) fn make_link_token_at(
    subject: &LinkSubject<'_>,
    purpose: LinkPurpose,
    config: &Config,
    issued_at: DateTime<Utc>,
) -> Result<String, jsonwebtoken::errors::Error> {
    let ttl = Duration::seconds(config.link_token_expiration().as_secs() as i64);
    let claims = LinkClaims {
        sub: subject.user_id.to_string(),
        purpose,
        stamp: state_stamp(subject),
        iat: issued_at.timestamp(),
        exp: (issued_at + ttl).timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(&signing_key(config)),
    )
}

/// Returns the purpose the token was issued for, or `None` when the token is
/// malformed, expired, for another account, or the account changed since.
pub fn check_link_token(
    subject: &LinkSubject<'_>,
    token: &str,
    config: &Config,
) -> Option<LinkPurpose> {
    let mut validation = Validation::default();
    validation.leeway = 0;

    let data = decode::<LinkClaims>(
        token,
        &DecodingKey::from_secret(&signing_key(config)),
        &validation,
    )
    .ok()?;

    let claims = data.claims;
    if claims.sub != subject.user_id.to_string() || claims.stamp != state_stamp(subject) {
        return None;
    }
    Some(claims.purpose)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_config;

    fn subject<'a>(id: Uuid, email: &'a str, hash: &'a str) -> LinkSubject<'a> {
        LinkSubject {
            user_id: id,
            email,
            password_hash: hash,
            last_login: None,
        }
    }

    #[test]
    fn uid_round_trips_and_rejects_garbage() {
        let id = Uuid::new_v4();
        assert_eq!(decode_uid(&encode_uid(&id)), Some(id));
        assert_eq!(decode_uid("!!not-base64"), None);
        assert_eq!(decode_uid(&URL_SAFE_NO_PAD.encode("42")), None);
    }

    #[test]
    fn purpose_travels_inside_the_token() {
        let config = test_config();
        let id = Uuid::new_v4();
        let who = subject(id, "a@example.com", "hash-1");
        let purpose = LinkPurpose::EmailChange {
            new_email: "b@example.com".into(),
        };

        let token = make_link_token(&who, purpose.clone(), &config).unwrap();
        assert_eq!(check_link_token(&who, &token, &config), Some(purpose));
    }

    #[test]
    fn password_change_invalidates_reset_link() {
        let config = test_config();
        let id = Uuid::new_v4();
        let before = subject(id, "a@example.com", "hash-1");
        let token = make_link_token(&before, LinkPurpose::PasswordReset, &config).unwrap();

        let after = subject(id, "a@example.com", "hash-2");
        assert_eq!(check_link_token(&after, &token, &config), None);
    }

    #[test]
    fn token_for_one_user_does_not_open_another() {
        let config = test_config();
        let alice = subject(Uuid::new_v4(), "a@example.com", "hash");
        let token = make_link_token(&alice, LinkPurpose::Activation, &config).unwrap();

        let mallory = subject(Uuid::new_v4(), "a@example.com", "hash");
        assert_eq!(check_link_token(&mallory, &token, &config), None);
    }

    #[test]
    fn expired_link_is_rejected() {
        let config = test_config();
        let who = subject(Uuid::new_v4(), "a@example.com", "hash");
        let issued = Utc::now() - Duration::hours(73);
        let token = make_link_token_at(&who, LinkPurpose::Activation, &config, issued).unwrap();

        assert_eq!(check_link_token(&who, &token, &config), None);
    }

    #[test]
    fn session_secret_alone_cannot_forge_links() {
        let config = test_config();
        let who = subject(Uuid::new_v4(), "a@example.com", "hash");
        let forged = encode(
            &Header::default(),
            &LinkClaims {
                sub: who.user_id.to_string(),
                purpose: LinkPurpose::Activation,
                stamp: state_stamp(&who),
                iat: Utc::now().timestamp(),
                exp: (Utc::now() + Duration::hours(1)).timestamp(),
            },
            &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
        )
        .unwrap();

        assert_eq!(check_link_token(&who, &forged, &config), None);
    }
}
