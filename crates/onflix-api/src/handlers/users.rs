//! Account, viewing profiles, watchlist, watch history and preferences.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use validator::Validate;

use onflix_models::{
    Content, ContentStatus, PageParams, Paginated, Role, User, UserPreferences, UserProfile,
    UserSubscription,
};
use onflix_store::{Filter, FindOptions, Update};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::handlers::auth::MessageResponse;
use crate::security::{sanitize_string, validate_maturity_rating, validate_phone};
use crate::services::BackgroundTask;
use crate::state::AppState;

/// Account as returned by the API. Credentials and reset state are never exposed.
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub avatar: String,
    pub is_active: bool,
    pub is_email_verified: bool,
    pub email_verified_at: Option<DateTime<Utc>>,
    pub role: Role,
    pub subscription: Option<UserSubscription>,
    pub profiles: Vec<UserProfile>,
    pub preferences: UserPreferences,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            phone: user.phone,
            avatar: user.avatar,
            is_active: user.is_active,
            is_email_verified: user.is_email_verified,
            email_verified_at: user.email_verified_at,
            role: user.role,
            subscription: user.subscription,
            profiles: user.profiles,
            preferences: user.preferences,
            last_login_at: user.last_login_at,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateAccountRequest {
    #[validate(length(min = 2, max = 50))]
    pub first_name: Option<String>,
    #[validate(length(min = 2, max = 50))]
    pub last_name: Option<String>,
    #[validate(custom(function = "validate_phone"))]
    pub phone: Option<String>,
    #[validate(url)]
    pub avatar: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProfileRequest {
    #[validate(length(min = 1, max = 50))]
    pub name: String,
    #[serde(default)]
    pub is_kids_profile: bool,
    #[validate(length(equal = 2, message = "Language must be a two-letter code"))]
    pub language: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub preferred_genres: Vec<String>,
    #[validate(length(min = 1, message = "Maturity rating is required"))]
    pub maturity_rating: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProfileRequest {
    #[validate(length(min = 1, max = 50))]
    pub name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[validate(length(equal = 2, message = "Language must be a two-letter code"))]
    pub language: String,
    #[serde(default)]
    pub preferred_genres: Vec<String>,
    #[validate(length(min = 1, message = "Maturity rating is required"))]
    pub maturity_rating: String,
    #[serde(default = "default_true")]
    pub auto_play: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdatePreferencesRequest {
    #[validate(length(equal = 2, message = "Language must be a two-letter code"))]
    pub language: String,
    #[serde(default)]
    pub auto_play: bool,
    #[serde(default)]
    pub auto_play_previews: bool,
    #[serde(default)]
    pub data_saver: bool,
    #[serde(default)]
    pub preferred_genres: Vec<String>,
    #[validate(length(min = 1, message = "Maturity rating is required"))]
    pub maturity_rating: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LanguageRequest {
    #[validate(length(equal = 2, message = "Language must be a two-letter code"))]
    pub language: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct MaturityRatingRequest {
    #[validate(custom(function = "validate_maturity_rating"))]
    pub maturity_rating: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct WatchProgressRequest {
    #[validate(length(min = 1))]
    pub content_id: String,
    #[validate(length(min = 1))]
    pub profile_id: String,
    #[validate(range(min = 0.0, max = 100.0, message = "Progress must be between 0 and 100"))]
    pub progress: f64,
    #[serde(default)]
    pub duration: u32,
}

#[derive(Debug, Deserialize)]
pub struct ProfileQuery {
    pub profile_id: Option<String>,
}

impl ProfileQuery {
    fn required(&self) -> ApiResult<&str> {
        self.profile_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ApiError::bad_request("Valid profile_id is required"))
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryEntry {
    pub content: Option<Content>,
    pub content_id: String,
    pub progress: f64,
    pub duration: u32,
    pub watched_at: DateTime<Utc>,
    pub last_watched_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

fn profile_mut<'a>(user: &'a mut User, profile_id: &str) -> ApiResult<&'a mut UserProfile> {
    user.profile_mut(profile_id)
        .ok_or_else(|| ApiError::not_found("Profile not found"))
}

/// Persist the whole profile list. Last writer wins.
async fn save_profiles(state: &AppState, user: &User, now: DateTime<Utc>) -> ApiResult<()> {
    let update = Update::new()
        .set("profiles", &user.profiles)
        .set("updated_at", now);
    if !state.repos.users.update_by_id(&user.id, &update).await? {
        return Err(ApiError::not_found("User not found"));
    }
    Ok(())
}

async fn published_by_ids(state: &AppState, ids: &[String]) -> ApiResult<Vec<Content>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let filter = Filter::and([
        Filter::is_in("id", ids),
        Filter::eq("status", ContentStatus::Published),
    ]);
    Ok(state.repos.content.find(&filter, &FindOptions::new()).await?)
}

async fn refresh_profile_usage(state: &AppState, user: &User, now: DateTime<Utc>) {
    if let Err(e) = state.usage.record_profiles(user, now).await {
        warn!(user_id = %user.id, error = %e, "Failed to update profile usage");
    }
}

// ============================================================================
// Account
// ============================================================================

pub async fn get_account(user: AuthUser) -> Json<UserResponse> {
    Json(user.user.into())
}

pub async fn update_account(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<UpdateAccountRequest>,
) -> ApiResult<Json<UserResponse>> {
    request.validate()?;
    let mut user = user.user;
    let now = Utc::now();

    let mut update = Update::new().set("updated_at", now);
    if let Some(first_name) = request.first_name {
        user.first_name = sanitize_string(&first_name);
        update = update.set("first_name", &user.first_name);
    }
    if let Some(last_name) = request.last_name {
        user.last_name = sanitize_string(&last_name);
        update = update.set("last_name", &user.last_name);
    }
    if let Some(phone) = request.phone {
        user.phone = phone;
        update = update.set("phone", &user.phone);
    }
    if let Some(avatar) = request.avatar {
        user.avatar = avatar;
        update = update.set("avatar", &user.avatar);
    }
    user.updated_at = now;

    state.repos.users.update_by_id(&user.id, &update).await?;
    Ok(Json(user.into()))
}

/// Soft delete. An entitled subscription is cancelled at the provider in the background.
pub async fn delete_account(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<MessageResponse>> {
    let user = user.user;
    let update = Update::new()
        .set("is_active", false)
        .set("updated_at", Utc::now());
    state.repos.users.update_by_id(&user.id, &update).await?;

    if let Some(sub) = user.subscription.as_ref().filter(|s| s.status.is_entitled()) {
        state.tasks.enqueue(BackgroundTask::CancelProviderSubscription {
            stripe_subscription_id: sub.stripe_subscription_id.clone(),
        });
    }

    info!(user_id = %user.id, "Account deactivated");
    Ok(MessageResponse::new("Account deleted successfully"))
}

// ============================================================================
// Profiles
// ============================================================================

pub async fn list_profiles(user: AuthUser) -> Json<Vec<UserProfile>> {
    Json(user.user.profiles)
}

pub async fn create_profile(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CreateProfileRequest>,
) -> ApiResult<(StatusCode, Json<UserProfile>)> {
    request.validate()?;
    let mut user = user.user;
    if !user.can_add_profile() {
        return Err(ApiError::bad_request("Maximum 5 profiles allowed"));
    }

    let now = Utc::now();
    let mut profile = UserProfile::new(sanitize_string(&request.name), now);
    profile.is_kids_profile = request.is_kids_profile;
    profile.language = request.language.to_lowercase();
    profile.avatar = request.avatar.unwrap_or_default();
    profile.preferences.maturity_rating = request.maturity_rating;
    profile.preferences.preferred_genres = request.preferred_genres;

    user.profiles.push(profile.clone());
    save_profiles(&state, &user, now).await?;
    refresh_profile_usage(&state, &user, now).await;

    info!(user_id = %user.id, profile_id = %profile.id, "Profile created");
    Ok((StatusCode::CREATED, Json(profile)))
}

pub async fn get_profile(
    user: AuthUser,
    Path(profile_id): Path<String>,
) -> ApiResult<Json<UserProfile>> {
    user.user
        .profile(&profile_id)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Profile not found"))
}

pub async fn update_profile(
    State(state): State<AppState>,
    user: AuthUser,
    Path(profile_id): Path<String>,
    Json(request): Json<UpdateProfileRequest>,
) -> ApiResult<Json<UserProfile>> {
    request.validate()?;
    let mut user = user.user;
    let now = Utc::now();

    let profile = profile_mut(&mut user, &profile_id)?;
    profile.name = sanitize_string(&request.name);
    profile.language = request.language.to_lowercase();
    if let Some(avatar) = request.avatar.filter(|a| !a.is_empty()) {
        profile.avatar = avatar;
    }
    profile.preferences.maturity_rating = request.maturity_rating;
    profile.preferences.preferred_genres = request.preferred_genres;
    profile.preferences.auto_play = request.auto_play;
    profile.updated_at = now;
    let updated = profile.clone();

    save_profiles(&state, &user, now).await?;
    Ok(Json(updated))
}

/// The last remaining profile cannot be deleted.
pub async fn delete_profile(
    State(state): State<AppState>,
    user: AuthUser,
    Path(profile_id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    let mut user = user.user;
    if user.profile(&profile_id).is_none() {
        return Err(ApiError::not_found("Profile not found"));
    }
    if !user.can_remove_profile() {
        return Err(ApiError::bad_request("Cannot delete the last profile"));
    }

    let now = Utc::now();
    user.profiles.retain(|p| p.id != profile_id);
    save_profiles(&state, &user, now).await?;
    refresh_profile_usage(&state, &user, now).await;

    info!(user_id = %user.id, profile_id = %profile_id, "Profile deleted");
    Ok(MessageResponse::new("Profile deleted successfully"))
}

// ============================================================================
// Watchlist
// ============================================================================

pub async fn get_watchlist(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ProfileQuery>,
) -> ApiResult<Json<Vec<Content>>> {
    let profile_id = query.required()?;
    let profile = user
        .user
        .profile(profile_id)
        .ok_or_else(|| ApiError::not_found("Profile not found"))?;

    Ok(Json(published_by_ids(&state, &profile.watchlist).await?))
}

/// Set semantics: adding an item already present is a no-op.
pub async fn add_to_watchlist(
    State(state): State<AppState>,
    user: AuthUser,
    Path(content_id): Path<String>,
    Query(query): Query<ProfileQuery>,
) -> ApiResult<Json<MessageResponse>> {
    let profile_id = query.required()?;
    let mut user = user.user;
    profile_mut(&mut user, profile_id)?;

    if state.repos.content.get_published(&content_id).await?.is_none() {
        return Err(ApiError::not_found("Content not found"));
    }

    let now = Utc::now();
    if profile_mut(&mut user, profile_id)?.add_to_watchlist(&content_id, now) {
        save_profiles(&state, &user, now).await?;
    }
    Ok(MessageResponse::new("Content added to watchlist"))
}

pub async fn remove_from_watchlist(
    State(state): State<AppState>,
    user: AuthUser,
    Path(content_id): Path<String>,
    Query(query): Query<ProfileQuery>,
) -> ApiResult<Json<MessageResponse>> {
    let profile_id = query.required()?;
    let mut user = user.user;
    let now = Utc::now();

    if profile_mut(&mut user, profile_id)?.remove_from_watchlist(&content_id, now) {
        save_profiles(&state, &user, now).await?;
    }
    Ok(MessageResponse::new("Content removed from watchlist"))
}

pub async fn clear_watchlist(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ProfileQuery>,
) -> ApiResult<Json<MessageResponse>> {
    let profile_id = query.required()?;
    let mut user = user.user;
    let now = Utc::now();

    let profile = profile_mut(&mut user, profile_id)?;
    profile.watchlist.clear();
    profile.updated_at = now;
    save_profiles(&state, &user, now).await?;
    Ok(MessageResponse::new("Watchlist cleared successfully"))
}

// ============================================================================
// Watch history
// ============================================================================

/// Most recently watched first, joined with content details.
pub async fn get_history(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ProfileQuery>,
    Query(params): Query<PageParams>,
) -> ApiResult<Json<Paginated<HistoryEntry>>> {
    let profile_id = query.required()?;
    let profile = user
        .user
        .profile(profile_id)
        .ok_or_else(|| ApiError::not_found("Profile not found"))?;

    let items: Vec<_> = profile.history_by_recency().into_iter().cloned().collect();
    let page = Paginated::from_slice(items, &params);

    let ids: Vec<String> = page.items.iter().map(|i| i.content_id.clone()).collect();
    let mut content: HashMap<String, Content> = state
        .repos
        .content
        .find(&Filter::is_in("id", &ids), &FindOptions::new())
        .await?
        .into_iter()
        .map(|c| (c.id.clone(), c))
        .collect();

    Ok(Json(page.map(|item| HistoryEntry {
        content: content.remove(&item.content_id),
        content_id: item.content_id,
        progress: item.progress,
        duration: item.duration,
        watched_at: item.watched_at,
        last_watched_at: item.last_watched_at,
    })))
}

/// Upsert progress for one content item.
pub async fn update_progress(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<WatchProgressRequest>,
) -> ApiResult<Json<MessageResponse>> {
    request.validate()?;
    let mut user = user.user;
    let now = Utc::now();

    if state.repos.content.get(&request.content_id).await?.is_none() {
        return Err(ApiError::not_found("Content not found"));
    }

    profile_mut(&mut user, &request.profile_id)?.record_progress(
        &request.content_id,
        request.progress,
        request.duration,
        now,
    );
    save_profiles(&state, &user, now).await?;
    Ok(MessageResponse::new("Watch progress updated successfully"))
}

pub async fn remove_from_history(
    State(state): State<AppState>,
    user: AuthUser,
    Path(content_id): Path<String>,
    Query(query): Query<ProfileQuery>,
) -> ApiResult<Json<MessageResponse>> {
    let profile_id = query.required()?;
    let mut user = user.user;
    let now = Utc::now();

    if profile_mut(&mut user, profile_id)?.remove_history(&content_id, now) {
        save_profiles(&state, &user, now).await?;
    }
    Ok(MessageResponse::new("Content removed from watch history"))
}

pub async fn clear_history(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ProfileQuery>,
) -> ApiResult<Json<MessageResponse>> {
    let profile_id = query.required()?;
    let mut user = user.user;
    let now = Utc::now();

    let profile = profile_mut(&mut user, profile_id)?;
    profile.watch_history.clear();
    profile.updated_at = now;
    save_profiles(&state, &user, now).await?;
    Ok(MessageResponse::new("Watch history cleared successfully"))
}

// ============================================================================
// Preferences
// ============================================================================

pub async fn get_preferences(user: AuthUser) -> Json<UserPreferences> {
    Json(user.user.preferences)
}

pub async fn update_preferences(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<UpdatePreferencesRequest>,
) -> ApiResult<Json<UserPreferences>> {
    request.validate()?;
    let preferences = UserPreferences {
        language: request.language.to_lowercase(),
        auto_play: request.auto_play,
        auto_play_previews: request.auto_play_previews,
        data_saver: request.data_saver,
        preferred_genres: request.preferred_genres,
        maturity_rating: request.maturity_rating,
    };

    let update = Update::new()
        .set("preferences", &preferences)
        .set("updated_at", Utc::now());
    state.repos.users.update_by_id(user.id(), &update).await?;
    Ok(Json(preferences))
}

pub async fn update_language(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<LanguageRequest>,
) -> ApiResult<Json<UserPreferences>> {
    request.validate()?;
    let mut preferences = user.user.preferences;
    preferences.language = request.language.to_lowercase();

    let update = Update::new()
        .set("preferences.language", &preferences.language)
        .set("updated_at", Utc::now());
    state.repos.users.update_by_id(&user.user.id, &update).await?;
    Ok(Json(preferences))
}

/// Account-wide ceiling. Profiles keep their own ratings.
pub async fn update_maturity_rating(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<MaturityRatingRequest>,
) -> ApiResult<Json<UserPreferences>> {
    request.validate()?;
    let mut preferences = user.user.preferences;
    preferences.maturity_rating = request.maturity_rating;

    let update = Update::new()
        .set("preferences.maturity_rating", &preferences.maturity_rating)
        .set("updated_at", Utc::now());
    state.repos.users.update_by_id(&user.user.id, &update).await?;
    Ok(Json(preferences))
}
