//! Account registration, login and password management.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use validator::Validate;

use onflix_models::{new_id, Role, User, UserPreferences, UserProfile};
use onflix_store::{Filter, Update};

use crate::auth::{
    generate_one_time_token, hash_one_time_token, hash_password, verify_password, AuthUser,
    RESET_TOKEN_TTL_HOURS, VERIFICATION_TOKEN_TTL_HOURS,
};
use crate::error::{ApiError, ApiResult};
use crate::handlers::users::UserResponse;
use crate::security::{normalize_email, sanitize_string, validate_password_strength, validate_phone};
use crate::services::Email;
use crate::state::AppState;

/// Maturity rating applied to new accounts and their first profile.
const DEFAULT_MATURITY_RATING: &str = "PG-13";

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    #[validate(custom(function = "validate_password_strength"))]
    pub password: String,
    #[validate(length(min = 2, max = 50))]
    pub first_name: String,
    #[validate(length(min = 2, max = 50))]
    pub last_name: String,
    #[serde(default)]
    #[validate(custom(function = "validate_phone"))]
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "Current password is required"))]
    pub current_password: String,
    #[validate(custom(function = "validate_password_strength"))]
    pub new_password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ForgotPasswordRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResetPasswordRequest {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,
    #[validate(custom(function = "validate_password_strength"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyEmailRequest {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResendVerificationRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
}

#[derive(Serialize)]
pub struct AuthResponse {
    pub user: UserResponse,
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            message: message.into(),
        })
    }
}

fn token_response(state: &AppState, user: &User, now: DateTime<Utc>) -> ApiResult<TokenResponse> {
    let access_token = state.jwt.issue(user, now)?;
    let expires_at = now + Duration::from_std(state.jwt.expiry()).unwrap_or_default();
    Ok(TokenResponse {
        access_token,
        token_type: "Bearer",
        expires_at,
    })
}

fn auth_response(state: &AppState, user: User, now: DateTime<Utc>) -> ApiResult<AuthResponse> {
    let token = token_response(state, &user, now)?;
    Ok(AuthResponse {
        user: user.into(),
        access_token: token.access_token,
        token_type: token.token_type,
        expires_at: token.expires_at,
    })
}

/// Create an account with one default profile.
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    request.validate()?;
    let email = normalize_email(&request.email);

    if state.repos.users.find_by_email(&email).await?.is_some() {
        return Err(ApiError::conflict("User with this email already exists"));
    }

    let now = Utc::now();
    let (verification_token, verification_digest) = generate_one_time_token();
    let first_name = sanitize_string(&request.first_name);
    let mut profile = UserProfile::new(first_name.clone(), now);
    profile.preferences.maturity_rating = DEFAULT_MATURITY_RATING.to_string();

    let user = User {
        id: new_id(),
        email,
        password_hash: hash_password(&request.password)?,
        first_name,
        last_name: sanitize_string(&request.last_name),
        phone: request.phone.unwrap_or_default(),
        avatar: String::new(),
        is_active: true,
        is_email_verified: false,
        email_verified_at: None,
        email_verification_token: Some(verification_digest),
        email_verification_expiry: Some(now + Duration::hours(VERIFICATION_TOKEN_TTL_HOURS)),
        role: Role::User,
        stripe_customer_id: None,
        subscription: None,
        profiles: vec![profile],
        preferences: UserPreferences {
            maturity_rating: DEFAULT_MATURITY_RATING.to_string(),
            ..UserPreferences::default()
        },
        last_login_at: None,
        password_reset_token: None,
        password_reset_expiry: None,
        created_at: now,
        updated_at: now,
    };

    if let Err(e) = state.repos.users.insert(&user).await {
        // Unique email index caught a concurrent registration
        if e.is_duplicate() {
            return Err(ApiError::conflict("User with this email already exists"));
        }
        return Err(e.into());
    }

    state
        .tasks
        .send_email(Email::welcome(&user.email, &user.first_name, &verification_token));
    info!(user_id = %user.id, "User registered");

    Ok((StatusCode::CREATED, Json(auth_response(&state, user, now)?)))
}

pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    request.validate()?;
    let invalid = || ApiError::unauthorized("Invalid email or password");

    let mut user = state
        .repos
        .users
        .find_by_email(&request.email)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(invalid)?;

    if !verify_password(&request.password, &user.password_hash) {
        return Err(invalid());
    }

    let now = Utc::now();
    let update = Update::new()
        .set("last_login_at", now)
        .set("updated_at", now);
    if let Err(e) = state.repos.users.update_by_id(&user.id, &update).await {
        warn!(user_id = %user.id, error = %e, "Failed to record last login");
    }
    user.last_login_at = Some(now);

    info!(user_id = %user.id, "User logged in");
    Ok(Json(auth_response(&state, user, now)?))
}

/// Tokens are stateless; the client discards its copy.
pub async fn logout(user: AuthUser) -> Json<MessageResponse> {
    info!(user_id = %user.id(), "User logged out");
    MessageResponse::new("Logout successful")
}

/// Confirm ownership of the account email with the emailed code.
pub async fn verify_email(
    State(state): State<AppState>,
    Json(request): Json<VerifyEmailRequest>,
) -> ApiResult<Json<MessageResponse>> {
    request.validate()?;
    let now = Utc::now();

    let user = state
        .repos
        .users
        .find_one(&Filter::and([
            Filter::eq("email_verification_token", hash_one_time_token(request.token.trim())),
            Filter::gt("email_verification_expiry", now),
        ]))
        .await?
        .ok_or_else(|| ApiError::bad_request("Invalid or expired verification token"))?;

    let update = Update::new()
        .set("is_email_verified", true)
        .set("email_verified_at", now)
        .unset("email_verification_token")
        .unset("email_verification_expiry")
        .set("updated_at", now);
    state.repos.users.update_by_id(&user.id, &update).await?;

    info!(user_id = %user.id, "Email verified");
    Ok(MessageResponse::new("Email verified successfully"))
}

/// Issue a new verification code. Unknown addresses get the same answer.
pub async fn resend_verification(
    State(state): State<AppState>,
    Json(request): Json<ResendVerificationRequest>,
) -> ApiResult<Json<MessageResponse>> {
    request.validate()?;

    let Some(user) = state
        .repos
        .users
        .find_by_email(&request.email)
        .await?
        .filter(|u| u.is_active)
    else {
        return Ok(MessageResponse::new(
            "If the email exists, a verification email has been sent",
        ));
    };
    if user.is_email_verified {
        return Err(ApiError::bad_request("Email is already verified"));
    }

    let now = Utc::now();
    let (token, digest) = generate_one_time_token();
    let update = Update::new()
        .set("email_verification_token", digest)
        .set(
            "email_verification_expiry",
            now + Duration::hours(VERIFICATION_TOKEN_TTL_HOURS),
        )
        .set("updated_at", now);
    state.repos.users.update_by_id(&user.id, &update).await?;

    state.tasks.send_email(Email::email_verification(&user.email, &token));
    info!(user_id = %user.id, "Verification email resent");
    Ok(MessageResponse::new("Verification email sent"))
}

/// Fresh access token for a still-valid one.
pub async fn refresh_token(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<TokenResponse>> {
    Ok(Json(token_response(&state, &user.user, Utc::now())?))
}

pub async fn change_password(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<ChangePasswordRequest>,
) -> ApiResult<Json<MessageResponse>> {
    request.validate()?;

    if !verify_password(&request.current_password, &user.user.password_hash) {
        return Err(ApiError::bad_request("Current password is incorrect"));
    }

    let update = Update::new()
        .set("password_hash", hash_password(&request.new_password)?)
        .set("updated_at", Utc::now());
    state.repos.users.update_by_id(user.id(), &update).await?;

    info!(user_id = %user.id(), "Password changed");
    Ok(MessageResponse::new("Password changed successfully"))
}

/// Always succeeds so the response does not reveal whether an account exists.
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(request): Json<ForgotPasswordRequest>,
) -> ApiResult<Json<MessageResponse>> {
    request.validate()?;
    let message = "If the email exists, password reset instructions have been sent";

    let Some(user) = state
        .repos
        .users
        .find_by_email(&request.email)
        .await?
        .filter(|u| u.is_active)
    else {
        return Ok(MessageResponse::new(message));
    };

    let now = Utc::now();
    let (token, digest) = generate_one_time_token();
    let update = Update::new()
        .set("password_reset_token", digest)
        .set("password_reset_expiry", now + Duration::hours(RESET_TOKEN_TTL_HOURS))
        .set("updated_at", now);
    state.repos.users.update_by_id(&user.id, &update).await?;

    state.tasks.send_email(Email::password_reset(&user.email, &token));
    info!(user_id = %user.id, "Password reset requested");

    Ok(MessageResponse::new(message))
}

pub async fn reset_password(
    State(state): State<AppState>,
    Json(request): Json<ResetPasswordRequest>,
) -> ApiResult<Json<MessageResponse>> {
    request.validate()?;
    let now = Utc::now();

    let user = state
        .repos
        .users
        .find_one(&Filter::and([
            Filter::eq("password_reset_token", hash_one_time_token(&request.token)),
            Filter::gt("password_reset_expiry", now),
        ]))
        .await?
        .ok_or_else(|| ApiError::bad_request("Invalid or expired reset token"))?;

    let update = Update::new()
        .set("password_hash", hash_password(&request.password)?)
        .unset("password_reset_token")
        .unset("password_reset_expiry")
        .set("updated_at", now);
    state.repos.users.update_by_id(&user.id, &update).await?;

    info!(user_id = %user.id, "Password reset");
    Ok(MessageResponse::new("Password reset successfully"))
}
