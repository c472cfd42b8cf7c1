use std::path::Path as FsPath;

use axum::{
    Extension,
    extract::{Json, Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::mail::templates;
use crate::middleware::{ClientMeta, revoke};
use crate::routes::twofactor::TwoFactorSettings;
use crate::utils::signed_link::{LinkPurpose, check_link_token, decode_uid, encode_uid, make_link_token};
use crate::utils::{
    Claims, FormResponse, field_messages, generate_token, normalize_email, single_field_error,
    success_to_api_response, validate_password_strength, verify_password,
};

use super::model::{LoginRequest, Profile, ProfileUpdate, SignupRequest, User, passwords_match};

const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

fn message(text: impl Into<String>) -> MessageResponse {
    MessageResponse {
        message: text.into(),
    }
}

#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub message: &'static str,
    pub user_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: i64,
    pub user: User,
    /// The client has to pass `/twofactor/verify` before anything else.
    pub two_factor_required: bool,
}

#[derive(Debug, Serialize)]
pub struct ActivationResponse {
    pub message: &'static str,
    pub newly_verified: bool,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub user: User,
    pub profile: Profile,
}

#[derive(Debug, Deserialize, Validate)]
pub struct EmailRequest {
    #[validate(email(message = "Enter a valid email address."), length(max = 254))]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "new_passwords_match", skip_on_field_errors = false))]
pub struct SetPasswordRequest {
    #[validate(
        length(min = 8, max = 128, message = "Password must be between 8 and 128 characters."),
        custom(function = "validate_password_strength")
    )]
    pub new_password1: String,
    pub new_password2: String,
}

fn new_passwords_match(req: &SetPasswordRequest) -> Result<(), validator::ValidationError> {
    passwords_match(&req.new_password1, &req.new_password2)
}

#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "changed_passwords_match", skip_on_field_errors = false))]
pub struct PasswordChangeRequest {
    #[validate(length(min = 1, message = "This field is required."))]
    pub old_password: String,
    #[validate(
        length(min = 8, max = 128, message = "Password must be between 8 and 128 characters."),
        custom(function = "validate_password_strength")
    )]
    pub new_password1: String,
    pub new_password2: String,
}

fn changed_passwords_match(req: &PasswordChangeRequest) -> Result<(), validator::ValidationError> {
    passwords_match(&req.new_password1, &req.new_password2)
}

/// Resolves `uid` and checks `token` was issued to that user for a purpose
/// `accept` approves of.
async fn user_for_link<F>(
    state: &AppState,
    uid: &str,
    token: &str,
    accept: F,
) -> Option<(User, LinkPurpose)>
where
    F: Fn(&LinkPurpose) -> bool,
{
    let user_id = decode_uid(uid)?;
    let user = match User::find_by_id(&state.pool, user_id).await {
        Ok(user) => user?,
        Err(e) => {
            tracing::error!(error = %e, "user lookup for emailed link failed");
            return None;
        }
    };
    let purpose = check_link_token(&user.link_subject(), token, &state.config)?;
    accept(&purpose).then_some((user, purpose))
}

fn send_link(state: &AppState, user: &User, to: &str, purpose: LinkPurpose) -> AppResult<()> {
    let token = make_link_token(&user.link_subject(), purpose.clone(), &state.config)?;
    let uid = encode_uid(&user.id);
    let name = user.display_name();

    let notice = match purpose {
        LinkPurpose::Activation => templates::activation(&state.config, &name, &uid, &token),
        LinkPurpose::PasswordReset => templates::password_reset(&state.config, &name, &uid, &token),
        LinkPurpose::EmailChange { .. } => templates::email_change(&state.config, &name, &uid, &token),
    };
    state.mailer.notify(to, notice);
    Ok(())
}

#[axum::debug_handler]
pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> AppResult<impl IntoResponse> {
    let req = req.normalized();
    req.validate()?;

    if User::email_taken(&state.pool, &req.email).await? {
        return Err(AppError::field("email", "A user with that email already exists."));
    }
    if let Some(username) = &req.username {
        if User::username_taken(&state.pool, username, None).await? {
            return Err(AppError::field(
                "username",
                "A user with that username already exists.",
            ));
        }
    }

    let (user, _profile) = User::register(
        &state.pool,
        &req.email,
        req.username.as_deref(),
        &req.password1,
        &req.first_name,
        &req.last_name,
    )
    .await?;
    send_link(&state, &user, &user.email, LinkPurpose::Activation)?;

    Ok((
        StatusCode::CREATED,
        success_to_api_response(SignupResponse {
            message: "Account created successfully. Please check your email to verify your account.",
            user_id: user.id,
        }),
    ))
}

#[axum::debug_handler]
pub async fn activate(
    State(state): State<AppState>,
    Path((uid, token)): Path<(String, String)>,
) -> AppResult<impl IntoResponse> {
    let (user, _) = user_for_link(&state, &uid, &token, |p| *p == LinkPurpose::Activation)
        .await
        .ok_or(AppError::InvalidLink("Activation link is invalid or has expired."))?;

    let response = match User::mark_verified(&state.pool, user.id).await? {
        Some(user) => {
            tracing::info!(user_id = %user.id, "email verified");
            state.mailer.notify(
                user.email.clone(),
                templates::welcome(&state.config, &user.display_name()),
            );
            ActivationResponse {
                message: "Your email has been verified. You can now log in.",
                newly_verified: true,
            }
        }
        None => ActivationResponse {
            message: "This account is already verified. Please log in.",
            newly_verified: false,
        },
    };
    Ok(success_to_api_response(response))
}

#[axum::debug_handler]
pub async fn verify_email_change(
    State(state): State<AppState>,
    Path((uid, token)): Path<(String, String)>,
) -> AppResult<impl IntoResponse> {
    let (user, purpose) = user_for_link(&state, &uid, &token, |p| {
        matches!(p, LinkPurpose::EmailChange { .. })
    })
    .await
    .ok_or(AppError::InvalidLink("Verification link is invalid or has expired."))?;

    let LinkPurpose::EmailChange { new_email } = purpose else {
        return Err(AppError::InvalidLink("Verification link is invalid or has expired."));
    };

    let user = User::apply_email_change(&state.pool, user.id, &new_email).await?;
    tracing::info!(user_id = %user.id, "email address changed");

    Ok(success_to_api_response(message(
        "Your new email address has been verified successfully.",
    )))
}

#[axum::debug_handler]
pub async fn login(
    State(state): State<AppState>,
    client: ClientMeta,
    Json(req): Json<LoginRequest>,
) -> AppResult<impl IntoResponse> {
    req.validate()?;
    const INVALID_LOGIN: &str =
        "Please enter a correct email and password. Note that both fields may be case-sensitive.";

    let email = normalize_email(&req.email);
    let user = User::find_by_email(&state.pool, &email)
        .await?
        .ok_or(AppError::AuthFailed(INVALID_LOGIN))?;

    if !verify_password(&req.password, &user.password_hash)? {
        tracing::info!(user_id = %user.id, ip = %client.ip, "failed login");
        return Err(AppError::AuthFailed(INVALID_LOGIN));
    }
    if !user.is_active {
        return Err(AppError::AccountInactive(
            "This account is inactive. Please verify your email address.",
        ));
    }
    if !user.is_email_verified {
        return Err(AppError::EmailNotVerified(
            "Please verify your email address before logging in.",
        ));
    }

    let user = User::record_login(&state.pool, user.id).await?;
    let (token, expires_at) = generate_token(&user.id, &state.config)?;

    let two_factor_required = TwoFactorSettings::find_enabled(&state.pool, user.id)
        .await?
        .is_some_and(|s| s.needs_verification_at(Utc::now(), state.config.two_factor_window()));

    state.mailer.notify(
        user.email.clone(),
        templates::login_alert(&state.config, &user.display_name(), &client.ip, &client.user_agent),
    );
    tracing::info!(user_id = %user.id, ip = %client.ip, "user logged in");

    Ok(success_to_api_response(LoginResponse {
        token,
        expires_at,
        user,
        two_factor_required,
    }))
}

#[axum::debug_handler]
pub async fn logout(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<impl IntoResponse> {
    revoke(&state, &claims).await?;
    Ok(success_to_api_response(message("You have been logged out.")))
}

#[axum::debug_handler]
pub async fn password_reset(
    State(state): State<AppState>,
    Json(req): Json<EmailRequest>,
) -> AppResult<impl IntoResponse> {
    req.validate()?;

    let email = normalize_email(&req.email);
    match User::find_by_email(&state.pool, &email).await? {
        Some(user) if user.is_active => {
            send_link(&state, &user, &user.email, LinkPurpose::PasswordReset)?;
        }
        _ => tracing::debug!("password reset requested for unknown address"),
    }

    Ok(success_to_api_response(message(
        "Password reset email has been sent. Please check your email.",
    )))
}

#[derive(Debug, Serialize)]
pub struct LinkCheckResponse {
    pub valid: bool,
    pub email: String,
}

#[axum::debug_handler]
pub async fn password_reset_check(
    State(state): State<AppState>,
    Path((uid, token)): Path<(String, String)>,
) -> AppResult<impl IntoResponse> {
    let (user, _) = user_for_link(&state, &uid, &token, |p| *p == LinkPurpose::PasswordReset)
        .await
        .ok_or(AppError::InvalidLink("Password reset link is invalid or has expired."))?;

    Ok(success_to_api_response(LinkCheckResponse {
        valid: true,
        email: user.email,
    }))
}

#[axum::debug_handler]
pub async fn password_reset_confirm(
    State(state): State<AppState>,
    Path((uid, token)): Path<(String, String)>,
    Json(req): Json<SetPasswordRequest>,
) -> AppResult<impl IntoResponse> {
    let (user, _) = user_for_link(&state, &uid, &token, |p| *p == LinkPurpose::PasswordReset)
        .await
        .ok_or(AppError::InvalidLink("Password reset link is invalid or has expired."))?;
    req.validate()?;

    User::set_password(&state.pool, user.id, &req.new_password1).await?;
    tracing::info!(user_id = %user.id, "password reset");

    Ok(success_to_api_response(message(
        "Your password has been reset. You can now log in.",
    )))
}

#[axum::debug_handler]
pub async fn password_change(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    client: ClientMeta,
    Json(req): Json<PasswordChangeRequest>,
) -> AppResult<impl IntoResponse> {
    req.validate()?;
    if !verify_password(&req.old_password, &user.password_hash)? {
        return Err(AppError::field(
            "old_password",
            "Your old password was entered incorrectly. Please enter it again.",
        ));
    }

    let user = User::set_password(&state.pool, user.id, &req.new_password1).await?;
    state.mailer.notify(
        user.email.clone(),
        templates::password_changed(&state.config, &user.display_name(), &client.ip),
    );
    tracing::info!(user_id = %user.id, "password changed");

    Ok(success_to_api_response(message(
        "Your password was successfully updated!",
    )))
}

#[axum::debug_handler]
pub async fn profile(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> AppResult<impl IntoResponse> {
    let profile = Profile::get_or_create(&state.pool, user.id).await?;
    Ok(success_to_api_response(ProfileResponse { user, profile }))
}

#[axum::debug_handler]
pub async fn profile_edit(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(update): Json<ProfileUpdate>,
) -> AppResult<impl IntoResponse> {
    const FIX_ERRORS: &str = "Please correct the errors below.";

    let update = update.normalized();
    if let Err(errors) = update.validate() {
        return Ok((
            StatusCode::BAD_REQUEST,
            FormResponse::failed(FIX_ERRORS, Some(field_messages(&errors))),
        ));
    }

    let taken = "A user with that username already exists.";
    if let Some(username) = &update.username {
        if User::username_taken(&state.pool, username, Some(user.id)).await? {
            return Ok((
                StatusCode::BAD_REQUEST,
                FormResponse::failed(FIX_ERRORS, Some(single_field_error("username", taken))),
            ));
        }
    }

    match User::update_profile(&state.pool, user.id, &update).await {
        Ok(_) => Ok((
            StatusCode::OK,
            FormResponse::ok("Your profile has been updated.", "/accounts/profile"),
        )),
        Err(AppError::Conflict(_)) => Ok((
            StatusCode::BAD_REQUEST,
            FormResponse::failed(FIX_ERRORS, Some(single_field_error("username", taken))),
        )),
        Err(e) => Err(e),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImageSlot {
    Avatar,
    Cover,
}

impl ImageSlot {
    fn from_field(name: &str) -> Option<Self> {
        match name {
            "avatar" => Some(ImageSlot::Avatar),
            "cover_photo" => Some(ImageSlot::Cover),
            _ => None,
        }
    }

    fn dir(&self) -> &'static str {
        match self {
            ImageSlot::Avatar => "profile_avatars",
            ImageSlot::Cover => "profile_covers",
        }
    }
}

/// Extension to store an upload under, from its content type or file name.
fn image_extension(file_name: Option<&str>, content_type: Option<&str>) -> Option<&'static str> {
    let from_type = match content_type {
        Some("image/jpeg") => Some("jpg"),
        Some("image/png") => Some("png"),
        Some("image/gif") => Some("gif"),
        Some("image/webp") => Some("webp"),
        _ => None,
    };
    from_type.or_else(|| {
        let ext = FsPath::new(file_name?).extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Some("jpg"),
            "png" => Some("png"),
            "gif" => Some("gif"),
            "webp" => Some("webp"),
            _ => None,
        }
    })
}

fn images_message(avatar: bool, cover: bool) -> &'static str {
    match (avatar, cover) {
        (true, true) => "Your profile picture and cover photo have been updated.",
        (true, false) => "Your profile picture has been updated.",
        _ => "Your cover photo has been updated.",
    }
}

async fn store_image(state: &AppState, slot: ImageSlot, ext: &str, bytes: &[u8]) -> AppResult<String> {
    let relative = format!("{}/{}.{}", slot.dir(), Uuid::new_v4(), ext);
    let dir = state.config.media_root.join(slot.dir());
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| AppError::Internal(format!("creating {}: {}", dir.display(), e)))?;
    tokio::fs::write(state.config.media_root.join(&relative), bytes)
        .await
        .map_err(|e| AppError::Internal(format!("writing {}: {}", relative, e)))?;
    Ok(relative)
}

#[axum::debug_handler]
pub async fn profile_images(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    mut multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    let mut avatar = None;
    let mut cover = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Malformed upload: {}", e)))?
    {
        let Some(slot) = field.name().and_then(ImageSlot::from_field) else {
            continue;
        };
        let ext = image_extension(field.file_name(), field.content_type());
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(format!("Malformed upload: {}", e)))?;
        if bytes.is_empty() {
            continue;
        }

        let field_name = match slot {
            ImageSlot::Avatar => "avatar",
            ImageSlot::Cover => "cover_photo",
        };
        let Some(ext) = ext else {
            return Ok((
                StatusCode::BAD_REQUEST,
                FormResponse::failed(
                    "Please correct the errors below.",
                    Some(single_field_error(field_name, "Upload a valid image.")),
                ),
            ));
        };
        if bytes.len() > MAX_IMAGE_BYTES {
            return Ok((
                StatusCode::BAD_REQUEST,
                FormResponse::failed(
                    "Please correct the errors below.",
                    Some(single_field_error(field_name, "Images may be at most 5 MB.")),
                ),
            ));
        }

        let path = store_image(&state, slot, ext, &bytes).await?;
        match slot {
            ImageSlot::Avatar => avatar = Some(path),
            ImageSlot::Cover => cover = Some(path),
        }
    }

    if avatar.is_none() && cover.is_none() {
        return Ok((
            StatusCode::OK,
            FormResponse::failed("No images were selected for upload.", None),
        ));
    }

    Profile::set_images(&state.pool, user.id, avatar.as_deref(), cover.as_deref()).await?;
    Ok((
        StatusCode::OK,
        FormResponse::ok(
            images_message(avatar.is_some(), cover.is_some()),
            "/accounts/profile",
        ),
    ))
}

#[axum::debug_handler]
pub async fn email_change(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<EmailRequest>,
) -> AppResult<impl IntoResponse> {
    req.validate()?;
    let new_email = normalize_email(&req.email);

    if new_email.eq_ignore_ascii_case(&user.email) {
        return Err(AppError::field("email", "This is already your email address."));
    }
    if User::email_taken(&state.pool, &new_email).await? {
        return Err(AppError::field("email", "A user with that email already exists."));
    }

    send_link(
        &state,
        &user,
        &new_email,
        LinkPurpose::EmailChange {
            new_email: new_email.clone(),
        },
    )?;
    tracing::info!(user_id = %user.id, "email change requested");

    Ok(success_to_api_response(message(format!(
        "Email change requested. We've sent a verification link to {}. \
         Your email will not be changed until you verify the new address.",
        new_email
    ))))
}
