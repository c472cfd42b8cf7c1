use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::utils::hash_password;
use crate::utils::signed_link::LinkSubject;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_active: bool,
    pub is_email_verified: bool,
    pub is_staff: bool,
    pub date_joined: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Profile {
    pub user_id: Uuid,
    pub avatar: Option<String>,
    pub cover_photo: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "passwords_match_signup", skip_on_field_errors = false))]
pub struct SignupRequest {
    #[validate(email(message = "Enter a valid email address."), length(max = 254))]
    pub email: String,
    #[validate(length(max = 30, message = "Ensure this value has at most 30 characters."))]
    #[serde(default)]
    pub first_name: String,
    #[validate(length(max = 30, message = "Ensure this value has at most 30 characters."))]
    #[serde(default)]
    pub last_name: String,
    #[validate(
        length(max = 150, message = "Ensure this value has at most 150 characters."),
        custom(function = "validate_username")
    )]
    pub username: Option<String>,
    #[validate(
        length(min = 8, max = 128, message = "Password must be between 8 and 128 characters."),
        custom(function = "crate::utils::validate_password_strength")
    )]
    pub password1: String,
    pub password2: String,
}

fn passwords_match_signup(req: &SignupRequest) -> Result<(), validator::ValidationError> {
    passwords_match(&req.password1, &req.password2)
}

pub(crate) fn passwords_match(first: &str, second: &str) -> Result<(), validator::ValidationError> {
    if first != second {
        let mut err = validator::ValidationError::new("password_mismatch");
        err.message = Some("The two password fields didn't match.".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "This field is required."))]
    pub email: String,
    #[validate(length(min = 1, message = "This field is required."))]
    pub password: String,
}

/// Profile fields a user may edit. Empty strings clear optional fields.
#[derive(Debug, Deserialize, Validate)]
pub struct ProfileUpdate {
    #[validate(length(min = 1, max = 30, message = "Enter between 1 and 30 characters."))]
    pub first_name: String,
    #[validate(length(min = 1, max = 30, message = "Enter between 1 and 30 characters."))]
    pub last_name: String,
    #[validate(
        length(max = 150, message = "Ensure this value has at most 150 characters."),
        custom(function = "validate_username")
    )]
    pub username: Option<String>,
    #[validate(length(max = 500, message = "Ensure this value has at most 500 characters."))]
    pub bio: Option<String>,
    #[validate(length(max = 100, message = "Ensure this value has at most 100 characters."))]
    pub location: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
}

fn validate_username(username: &str) -> Result<(), validator::ValidationError> {
    let allowed = |c: char| c.is_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_');
    if !username.chars().all(allowed) {
        let mut err = validator::ValidationError::new("invalid_username");
        err.message = Some(
            "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters."
                .into(),
        );
        return Err(err);
    }
    Ok(())
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl SignupRequest {
    pub fn normalized(mut self) -> Self {
        self.email = crate::utils::normalize_email(&self.email);
        self.first_name = self.first_name.trim().to_string();
        self.last_name = self.last_name.trim().to_string();
        self.username = blank_to_none(self.username);
        self
    }
}

impl ProfileUpdate {
    pub fn normalized(mut self) -> Self {
        self.first_name = self.first_name.trim().to_string();
        self.last_name = self.last_name.trim().to_string();
        self.username = blank_to_none(self.username);
        self.bio = blank_to_none(self.bio);
        self.location = blank_to_none(self.location);
        self
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

impl User {
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name.trim(), self.last_name.trim());
        let full = full.trim();
        if full.is_empty() {
            self.email.clone()
        } else {
            full.to_string()
        }
    }

    pub fn link_subject(&self) -> LinkSubject<'_> {
        LinkSubject {
            user_id: self.id,
            email: &self.email,
            password_hash: &self.password_hash,
            last_login: self.last_login,
        }
    }

    /// Creates an unverified user and its profile in one transaction.
    pub async fn register(
        pool: &PgPool,
        email: &str,
        username: Option<&str>,
        password: &str,
        first_name: &str,
        last_name: &str,
    ) -> AppResult<(Self, Profile)> {
        let password_hash = hash_password(password)?;
        let mut tx = pool.begin().await?;

        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, email, username, first_name, last_name, password_hash, is_active, is_email_verified)
            VALUES ($1, $2, $3, $4, $5, $6, TRUE, FALSE)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(username)
        .bind(first_name.trim())
        .bind(last_name.trim())
        .bind(&password_hash)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict("A user with that email or username already exists.")
            } else {
                AppError::Database(e)
            }
        })?;

        let profile = sqlx::query_as::<_, Profile>(
            r#"
            INSERT INTO profiles (user_id) VALUES ($1)
            RETURNING *
            "#,
        )
        .bind(user.id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!(user_id = %user.id, "user registered");
        Ok((user, profile))
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(pool)
            .await
    }

    pub async fn email_taken(pool: &PgPool, email: &str) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM users WHERE email = $1)")
            .bind(email)
            .fetch_one(pool)
            .await
    }

    /// `except` skips the caller's own row when editing a profile.
    pub async fn username_taken(
        pool: &PgPool,
        username: &str,
        except: Option<Uuid>,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM users WHERE username = $1 AND id IS DISTINCT FROM $2)",
        )
        .bind(username)
        .bind(except)
        .fetch_one(pool)
        .await
    }

    /// Flips the verified flag and leaves `is_active` alone. Returns `None` if
    /// the user was already verified, so callers can tell a first activation
    /// from a replay.
    pub async fn mark_verified(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET is_email_verified = TRUE
            WHERE id = $1 AND NOT is_email_verified
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn apply_email_change(pool: &PgPool, id: Uuid, new_email: &str) -> AppResult<Self> {
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET email = $2, is_email_verified = TRUE
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(new_email)
        .fetch_one(pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict("A user with that email already exists.")
            } else {
                AppError::Database(e)
            }
        })
    }

    pub async fn set_password(pool: &PgPool, id: Uuid, password: &str) -> AppResult<Self> {
        let password_hash = hash_password(password)?;
        Ok(sqlx::query_as::<_, User>(
            r#"
            UPDATE users SET password_hash = $2 WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(password_hash)
        .fetch_one(pool)
        .await?)
    }

    pub async fn record_login(pool: &PgPool, id: Uuid) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users SET last_login = NOW() WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_one(pool)
        .await
    }

    pub async fn update_profile(
        pool: &PgPool,
        id: Uuid,
        update: &ProfileUpdate,
    ) -> AppResult<(Self, Profile)> {
        let mut tx = pool.begin().await?;

        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users SET first_name = $2, last_name = $3, username = $4
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&update.first_name)
        .bind(&update.last_name)
        .bind(&update.username)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict("A user with that username already exists.")
            } else {
                AppError::Database(e)
            }
        })?;

        let profile = sqlx::query_as::<_, Profile>(
            r#"
            INSERT INTO profiles (user_id, bio, location, date_of_birth)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id) DO UPDATE
            SET bio = EXCLUDED.bio,
                location = EXCLUDED.location,
                date_of_birth = EXCLUDED.date_of_birth,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&update.bio)
        .bind(&update.location)
        .bind(update.date_of_birth)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((user, profile))
    }
}

impl Profile {
    /// Profiles are created at signup; older accounts get one on first read.
    pub async fn get_or_create(pool: &PgPool, user_id: Uuid) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Profile>(
            r#"
            INSERT INTO profiles (user_id) VALUES ($1)
            ON CONFLICT (user_id) DO UPDATE SET user_id = EXCLUDED.user_id
            RETURNING *
            "#,
        )
        .bind(user_id)
        .fetch_one(pool)
        .await
    }

    /// Replaces whichever image paths are given; `None` keeps the current one.
    pub async fn set_images(
        pool: &PgPool,
        user_id: Uuid,
        avatar: Option<&str>,
        cover_photo: Option<&str>,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Profile>(
            r#"
            INSERT INTO profiles (user_id, avatar, cover_photo)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id) DO UPDATE
            SET avatar = COALESCE(EXCLUDED.avatar, profiles.avatar),
                cover_photo = COALESCE(EXCLUDED.cover_photo, profiles.cover_photo),
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(avatar)
        .bind(cover_photo)
        .fetch_one(pool)
        .await
    }
}
