//! Admin handlers: catalog management, plans, accounts and reporting.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use validator::Validate;

use onflix_models::{
    new_id, CastMember, Content, ContentImages, ContentStatus, ContentType, ContentVideo,
    PageParams, Paginated, Payment, PaymentStatus, PlanFeatures, PlanInterval, PlanLimits, Role,
    Season, Subscription, SubscriptionPlan, SubscriptionStatus, User,
};
use onflix_store::{ContentQuery, Filter, FindOptions, SortDirection, Update};

use crate::auth::{hash_password, AdminUser};
use crate::error::{ApiError, ApiResult};
use crate::handlers::auth::MessageResponse;
use crate::handlers::content::BrowseQuery;
use crate::handlers::users::UserResponse;
use crate::security::{
    is_valid_id, normalize_email, sanitize_string, validate_password_strength, validate_phone,
};
use crate::services::{BackgroundTask, StatusOverride};
use crate::state::AppState;

/// Window for "recent" dashboard figures.
const DASHBOARD_WINDOW_DAYS: i64 = 30;

const ANALYTICS_MAX_DAYS: i64 = 365;

fn checked_id<'a>(id: &'a str, what: &str) -> ApiResult<&'a str> {
    if is_valid_id(id) {
        Ok(id)
    } else {
        Err(ApiError::bad_request(format!("Invalid {} ID", what)))
    }
}

fn newest_first() -> FindOptions {
    FindOptions::new().sort_by("created_at", SortDirection::Descending)
}

// ============================================================================
// Content
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct AdminContentFilter {
    pub status: Option<String>,
    pub search: Option<String>,
}

/// Editable catalog fields. Status and counters are managed separately.
#[derive(Debug, Deserialize, Validate)]
pub struct ContentRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[serde(default)]
    pub original_title: String,
    #[validate(length(min = 10, max = 2000))]
    pub description: String,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    #[validate(length(min = 1, message = "At least one genre is required"))]
    pub genres: Vec<String>,
    #[serde(default)]
    pub release_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub runtime: u32,
    #[serde(default)]
    #[validate(range(min = 0.0, max = 10.0))]
    pub rating: f64,
    #[validate(length(min = 1, message = "Maturity rating is required"))]
    pub maturity_rating: String,
    #[validate(length(equal = 2))]
    pub language: String,
    #[validate(length(equal = 2))]
    pub country: String,
    #[serde(default)]
    pub cast: Vec<CastMember>,
    #[serde(default)]
    pub director: Vec<String>,
    #[serde(default)]
    pub producer: Vec<String>,
    #[serde(default)]
    pub writer: Vec<String>,
    #[serde(default)]
    pub images: ContentImages,
    #[serde(default)]
    pub videos: Vec<ContentVideo>,
    #[serde(default)]
    pub seasons: Vec<Season>,
    #[serde(default)]
    pub is_featured: bool,
    #[serde(default)]
    pub is_original: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl ContentRequest {
    fn apply(self, content: &mut Content, now: DateTime<Utc>) {
        let title = sanitize_string(&self.title);
        content.original_title = if self.original_title.trim().is_empty() {
            title.clone()
        } else {
            sanitize_string(&self.original_title)
        };
        content.title = title;
        content.description = sanitize_string(&self.description);
        content.content_type = self.content_type;
        content.genres = self.genres;
        content.release_date = self.release_date;
        content.runtime = self.runtime;
        content.rating = self.rating;
        content.maturity_rating = self.maturity_rating;
        content.language = self.language.to_lowercase();
        content.country = self.country.to_uppercase();
        content.cast = self.cast;
        content.director = self.director;
        content.producer = self.producer;
        content.writer = self.writer;
        content.images = self.images;
        content.videos = self.videos;
        content.seasons = self.seasons;
        content.is_featured = self.is_featured;
        content.is_original = self.is_original;
        content.tags = self.tags;
        content.keywords = self.keywords;
        content.updated_at = now;
    }

    fn into_draft(self, now: DateTime<Utc>) -> Content {
        let mut content = Content {
            id: new_id(),
            tmdb_id: None,
            title: String::new(),
            original_title: String::new(),
            description: String::new(),
            content_type: self.content_type,
            genres: Vec::new(),
            release_date: None,
            runtime: 0,
            rating: 0.0,
            maturity_rating: String::new(),
            country: String::new(),
            language: String::new(),
            cast: Vec::new(),
            director: Vec::new(),
            producer: Vec::new(),
            writer: Vec::new(),
            images: ContentImages::default(),
            videos: Vec::new(),
            seasons: Vec::new(),
            status: ContentStatus::Draft,
            is_featured: false,
            is_original: false,
            view_count: 0,
            like_count: 0,
            tags: Vec::new(),
            keywords: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.apply(&mut content, now);
        content
    }
}

/// Every item regardless of status.
pub async fn admin_list_content(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(browse): Query<BrowseQuery>,
    Query(filter): Query<AdminContentFilter>,
    Query(params): Query<PageParams>,
) -> ApiResult<Json<Paginated<Content>>> {
    let mut query = ContentQuery::admin();
    if let Some(status) = filter.status.filter(|s| !s.is_empty()) {
        query.status = Some(ContentStatus::parse(&status)?);
    }
    if let Some(search) = filter.search.map(|s| sanitize_string(&s)).filter(|s| !s.is_empty()) {
        query = query.search(search);
    }
    let query = browse.into_query(query)?;

    let page = state
        .repos
        .content
        .page(&query.filter(), query.options(), &params)
        .await?;
    Ok(Json(page))
}

/// New items start as drafts.
pub async fn admin_create_content(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Json(request): Json<ContentRequest>,
) -> ApiResult<(StatusCode, Json<Content>)> {
    request.validate()?;
    let content = request.into_draft(Utc::now());
    state.repos.content.insert(&content).await?;

    info!(admin_id = %admin.id, content_id = %content.id, "Content created");
    Ok((StatusCode::CREATED, Json(content)))
}

pub async fn admin_get_content(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(content_id): Path<String>,
) -> ApiResult<Json<Content>> {
    let id = checked_id(&content_id, "content")?;
    state
        .repos
        .content
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Content not found"))
}

pub async fn admin_update_content(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(content_id): Path<String>,
    Json(request): Json<ContentRequest>,
) -> ApiResult<Json<Content>> {
    let id = checked_id(&content_id, "content")?;
    request.validate()?;

    let mut content = state
        .repos
        .content
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Content not found"))?;
    request.apply(&mut content, Utc::now());

    if !state.repos.content.replace(id, &content).await? {
        return Err(ApiError::not_found("Content not found"));
    }

    info!(admin_id = %admin.id, content_id = %content.id, "Content updated");
    Ok(Json(content))
}

async fn set_content_status(
    state: &AppState,
    content_id: &str,
    status: ContentStatus,
) -> ApiResult<()> {
    let id = checked_id(content_id, "content")?;
    let update = Update::new()
        .set("status", status)
        .set("updated_at", Utc::now());
    if !state.repos.content.update_by_id(id, &update).await? {
        return Err(ApiError::not_found("Content not found"));
    }
    Ok(())
}

/// Archive. Items are never removed from the store.
pub async fn admin_delete_content(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(content_id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    set_content_status(&state, &content_id, ContentStatus::Archived).await?;
    info!(admin_id = %admin.id, content_id = %content_id, "Content archived");
    Ok(MessageResponse::new("Content deleted successfully"))
}

pub async fn admin_publish_content(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(content_id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    set_content_status(&state, &content_id, ContentStatus::Published).await?;
    info!(admin_id = %admin.id, content_id = %content_id, "Content published");
    Ok(MessageResponse::new("Content published successfully"))
}

pub async fn admin_unpublish_content(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(content_id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    set_content_status(&state, &content_id, ContentStatus::Draft).await?;
    info!(admin_id = %admin.id, content_id = %content_id, "Content unpublished");
    Ok(MessageResponse::new("Content unpublished successfully"))
}

// ============================================================================
// Plans
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePlanRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[serde(default)]
    #[validate(length(max = 500))]
    pub description: String,
    #[validate(range(min = 0.0))]
    pub price: f64,
    #[validate(length(equal = 3))]
    pub currency: String,
    pub interval: PlanInterval,
    #[serde(default)]
    pub features: PlanFeatures,
    #[serde(default)]
    pub limits: PlanLimits,
    #[serde(default)]
    pub is_popular: bool,
    #[serde(default)]
    pub sort_order: i32,
}

/// Pricing is fixed once created; only presentation and limits change.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdatePlanRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    pub features: Option<PlanFeatures>,
    pub limits: Option<PlanLimits>,
    pub is_popular: Option<bool>,
    pub sort_order: Option<i32>,
}

pub async fn admin_list_plans(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> ApiResult<Json<Vec<SubscriptionPlan>>> {
    Ok(Json(state.repos.plans.all_sorted().await?))
}

/// Create the provider price first, then the local plan that references it.
pub async fn admin_create_plan(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Json(request): Json<CreatePlanRequest>,
) -> ApiResult<(StatusCode, Json<SubscriptionPlan>)> {
    request.validate()?;
    let now = Utc::now();

    let mut plan = SubscriptionPlan {
        id: new_id(),
        name: sanitize_string(&request.name),
        description: sanitize_string(&request.description),
        price: request.price,
        currency: request.currency.to_lowercase(),
        interval: request.interval,
        features: request.features,
        limits: request.limits,
        stripe_price_id: String::new(),
        is_active: true,
        is_popular: request.is_popular,
        sort_order: request.sort_order,
        created_at: now,
        updated_at: now,
    };

    plan.stripe_price_id = state
        .billing
        .create_price(
            &plan.name,
            &plan.description,
            plan.price_minor_units(),
            &plan.currency,
            Some(plan.interval.provider_interval()),
        )
        .await?;

    state.repos.plans.insert(&plan).await?;
    info!(
        admin_id = %admin.id,
        plan_id = %plan.id,
        price_id = %plan.stripe_price_id,
        "Subscription plan created"
    );
    Ok((StatusCode::CREATED, Json(plan)))
}

async fn load_plan(state: &AppState, plan_id: &str) -> ApiResult<SubscriptionPlan> {
    state
        .repos
        .plans
        .get(checked_id(plan_id, "plan")?)
        .await?
        .ok_or_else(|| ApiError::not_found("Subscription plan not found"))
}

pub async fn admin_update_plan(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(plan_id): Path<String>,
    Json(request): Json<UpdatePlanRequest>,
) -> ApiResult<Json<SubscriptionPlan>> {
    request.validate()?;
    let mut plan = load_plan(&state, &plan_id).await?;

    if let Some(name) = request.name {
        plan.name = sanitize_string(&name);
    }
    if let Some(description) = request.description {
        plan.description = sanitize_string(&description);
    }
    if let Some(features) = request.features {
        plan.features = features;
    }
    if let Some(limits) = request.limits {
        plan.limits = limits;
    }
    if let Some(is_popular) = request.is_popular {
        plan.is_popular = is_popular;
    }
    if let Some(sort_order) = request.sort_order {
        plan.sort_order = sort_order;
    }
    plan.updated_at = Utc::now();

    state.repos.plans.replace(&plan.id, &plan).await?;
    info!(admin_id = %admin.id, plan_id = %plan.id, "Subscription plan updated");
    Ok(Json(plan))
}

async fn set_plan_active(
    state: &AppState,
    plan_id: &str,
    is_active: bool,
) -> ApiResult<SubscriptionPlan> {
    let mut plan = load_plan(state, plan_id).await?;
    plan.is_active = is_active;
    plan.updated_at = Utc::now();
    state
        .repos
        .plans
        .update_by_id(
            &plan.id,
            &Update::new()
                .set("is_active", is_active)
                .set("updated_at", plan.updated_at),
        )
        .await?;
    Ok(plan)
}

pub async fn admin_activate_plan(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(plan_id): Path<String>,
) -> ApiResult<Json<SubscriptionPlan>> {
    let plan = set_plan_active(&state, &plan_id, true).await?;
    info!(admin_id = %admin.id, plan_id = %plan.id, "Subscription plan activated");
    Ok(Json(plan))
}

/// Existing subscribers keep the plan; it is only hidden from new sign-ups.
pub async fn admin_deactivate_plan(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(plan_id): Path<String>,
) -> ApiResult<Json<SubscriptionPlan>> {
    let plan = set_plan_active(&state, &plan_id, false).await?;
    info!(admin_id = %admin.id, plan_id = %plan.id, "Subscription plan deactivated");
    Ok(Json(plan))
}

// ============================================================================
// Users
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ListUsersQuery {
    pub search: Option<String>,
    /// `active` or `inactive`.
    pub status: Option<String>,
    pub role: Option<Role>,
}

impl ListUsersQuery {
    fn filter(&self) -> Filter {
        let mut parts = Vec::new();
        if let Some(search) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            parts.push(Filter::or([
                Filter::contains("email", search),
                Filter::contains("first_name", search),
                Filter::contains("last_name", search),
            ]));
        }
        match self.status.as_deref() {
            Some("active") => parts.push(Filter::eq("is_active", true)),
            Some("inactive") => parts.push(Filter::eq("is_active", false)),
            _ => {}
        }
        if let Some(role) = self.role {
            parts.push(Filter::eq("role", role));
        }
        Filter::and(parts)
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct BanRequest {
    #[validate(length(min = 10, max = 500))]
    pub reason: String,
}

pub async fn admin_list_users(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<ListUsersQuery>,
    Query(params): Query<PageParams>,
) -> ApiResult<Json<Paginated<UserResponse>>> {
    let page = state
        .repos
        .users
        .page(&query.filter(), newest_first(), &params)
        .await?;
    Ok(Json(page.map(UserResponse::from)))
}

pub async fn admin_get_user(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(user_id): Path<String>,
) -> ApiResult<Json<UserResponse>> {
    let id = checked_id(&user_id, "user")?;
    state
        .repos
        .users
        .get(id)
        .await?
        .map(|u| Json(u.into()))
        .ok_or_else(|| ApiError::not_found("User not found"))
}

async fn set_user_active(state: &AppState, user_id: &str, is_active: bool) -> ApiResult<()> {
    let id = checked_id(user_id, "user")?;
    let update = Update::new()
        .set("is_active", is_active)
        .set("updated_at", Utc::now());
    if !state.repos.users.update_by_id(id, &update).await? {
        return Err(ApiError::not_found("User not found"));
    }
    Ok(())
}

/// Deactivate an account. Live tokens stop working on the next request.
pub async fn admin_ban_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(user_id): Path<String>,
    Json(request): Json<BanRequest>,
) -> ApiResult<Json<MessageResponse>> {
    request.validate()?;
    if user_id == admin.id {
        return Err(ApiError::bad_request("Admins cannot ban themselves"));
    }
    set_user_active(&state, &user_id, false).await?;

    info!(
        admin_id = %admin.id,
        user_id = %user_id,
        reason = %sanitize_string(&request.reason),
        "User banned"
    );
    Ok(MessageResponse::new("User banned successfully"))
}

pub async fn admin_unban_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(user_id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    set_user_active(&state, &user_id, true).await?;
    info!(admin_id = %admin.id, user_id = %user_id, "User unbanned");
    Ok(MessageResponse::new("User unbanned successfully"))
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct AdminUpdateUserRequest {
    #[validate(length(min = 1, max = 50))]
    pub first_name: Option<String>,
    #[validate(length(min = 1, max = 50))]
    pub last_name: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(custom(function = "validate_phone"))]
    pub phone: Option<String>,
    pub is_active: Option<bool>,
    pub is_email_verified: Option<bool>,
    pub role: Option<Role>,
}

impl AdminUpdateUserRequest {
    /// Refuse changes that would lock the acting admin out.
    fn check_self_edit(&self, admin: &User, target_id: &str) -> ApiResult<()> {
        if admin.id != target_id {
            return Ok(());
        }
        if self.role.is_some_and(|role| role != admin.role) {
            return Err(ApiError::bad_request("Admins cannot change their own role"));
        }
        if self.is_active == Some(false) {
            return Err(ApiError::bad_request("Admins cannot deactivate themselves"));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct AdminResetPasswordRequest {
    #[validate(custom(function = "validate_password_strength"))]
    pub new_password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AdminSubscriptionRequest {
    pub status: SubscriptionStatus,
    pub current_period_end: Option<DateTime<Utc>>,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

async fn load_user(state: &AppState, user_id: &str) -> ApiResult<User> {
    state
        .repos
        .users
        .get(checked_id(user_id, "user")?)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

pub async fn admin_update_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(user_id): Path<String>,
    Json(request): Json<AdminUpdateUserRequest>,
) -> ApiResult<Json<UserResponse>> {
    request.validate()?;
    request.check_self_edit(&admin, &user_id)?;
    let mut user = load_user(&state, &user_id).await?;

    if let Some(email) = request.email.as_deref().map(normalize_email) {
        if email != user.email {
            let taken = state.repos.users.find_by_email(&email).await?;
            if taken.is_some_and(|other| other.id != user.id) {
                return Err(ApiError::conflict("Email already in use"));
            }
            user.email = email;
        }
    }
    if let Some(first_name) = &request.first_name {
        user.first_name = sanitize_string(first_name);
    }
    if let Some(last_name) = &request.last_name {
        user.last_name = sanitize_string(last_name);
    }
    if let Some(phone) = request.phone {
        user.phone = phone;
    }
    if let Some(is_active) = request.is_active {
        user.is_active = is_active;
    }
    if let Some(role) = request.role {
        user.role = role;
    }

    let now = Utc::now();
    let mut update = Update::new()
        .set("email", &user.email)
        .set("first_name", &user.first_name)
        .set("last_name", &user.last_name)
        .set("phone", &user.phone)
        .set("is_active", user.is_active)
        .set("role", user.role)
        .set("updated_at", now);
    if let Some(verified) = request.is_email_verified {
        if verified && !user.is_email_verified {
            user.email_verified_at = Some(now);
            update = update
                .set("email_verified_at", now)
                .unset("email_verification_token")
                .unset("email_verification_expiry");
        } else if !verified {
            user.email_verified_at = None;
            update = update.unset("email_verified_at");
        }
        user.is_email_verified = verified;
        update = update.set("is_email_verified", verified);
    }
    user.updated_at = now;

    if !state.repos.users.update_by_id(&user.id, &update).await? {
        return Err(ApiError::not_found("User not found"));
    }
    info!(admin_id = %admin.id, user_id = %user.id, "User updated by admin");
    Ok(Json(user.into()))
}

/// Deactivate the account and stop provider billing, as for self-service
/// deletion.
pub async fn admin_delete_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(user_id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    if user_id == admin.id {
        return Err(ApiError::bad_request("Admins cannot delete themselves"));
    }
    let user = load_user(&state, &user_id).await?;
    let update = Update::new()
        .set("is_active", false)
        .set("updated_at", Utc::now());
    state.repos.users.update_by_id(&user.id, &update).await?;

    if let Some(sub) = user.subscription.as_ref().filter(|s| s.status.is_entitled()) {
        state.tasks.enqueue(BackgroundTask::CancelProviderSubscription {
            stripe_subscription_id: sub.stripe_subscription_id.clone(),
        });
    }

    info!(admin_id = %admin.id, user_id = %user.id, "User deleted by admin");
    Ok(MessageResponse::new("User deleted successfully"))
}

pub async fn admin_reset_user_password(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(user_id): Path<String>,
    Json(request): Json<AdminResetPasswordRequest>,
) -> ApiResult<Json<MessageResponse>> {
    request.validate()?;
    let id = checked_id(&user_id, "user")?;
    let update = Update::new()
        .set("password_hash", hash_password(&request.new_password)?)
        .unset("password_reset_token")
        .unset("password_reset_expiry")
        .set("updated_at", Utc::now());
    if !state.repos.users.update_by_id(id, &update).await? {
        return Err(ApiError::not_found("User not found"));
    }

    info!(admin_id = %admin.id, user_id = %id, "Password reset by admin");
    Ok(MessageResponse::new("Password reset successfully"))
}

pub async fn admin_get_user_subscription(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(user_id): Path<String>,
) -> ApiResult<Json<Subscription>> {
    let user = load_user(&state, &user_id).await?;
    Ok(Json(state.subscriptions.current_record(&user).await?))
}

/// Local correction only. The provider is not called, so the next provider
/// event for this subscription may move it again.
pub async fn admin_update_user_subscription(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(user_id): Path<String>,
    Json(request): Json<AdminSubscriptionRequest>,
) -> ApiResult<Json<Subscription>> {
    request.validate()?;
    let user = load_user(&state, &user_id).await?;
    let change = StatusOverride {
        status: request.status,
        current_period_end: request.current_period_end,
        cancellation_reason: request.reason.as_deref().map(sanitize_string),
    };
    let sub = state
        .subscriptions
        .admin_override(&user, change, Utc::now())
        .await?;

    info!(admin_id = %admin.id, user_id = %user.id, "Subscription updated by admin");
    Ok(Json(sub))
}

// ============================================================================
// Subscriptions and reporting
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct SubscriptionListQuery {
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AnalyticsQuery {
    pub days: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct StatusCount {
    pub status: String,
    pub count: u64,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionAnalytics {
    pub period_days: i64,
    pub status_distribution: Vec<StatusCount>,
    pub new_subscriptions: u64,
    pub cancellations: u64,
}

#[derive(Debug, Serialize)]
pub struct DashboardOverview {
    pub total_users: u64,
    pub total_content: u64,
    pub active_subscriptions: u64,
    pub recent_users: u64,
    pub monthly_revenue: f64,
}

#[derive(Debug, Serialize)]
pub struct Dashboard {
    pub overview: DashboardOverview,
    pub top_content: Vec<Content>,
    pub timestamp: DateTime<Utc>,
}

pub async fn admin_list_subscriptions(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<SubscriptionListQuery>,
    Query(params): Query<PageParams>,
) -> ApiResult<Json<Paginated<Subscription>>> {
    let filter = match query.status.as_deref().filter(|s| !s.is_empty()) {
        Some(status) => Filter::eq("status", SubscriptionStatus::parse(status)?),
        None => Filter::All,
    };
    let page = state
        .repos
        .subscriptions
        .page(&filter, newest_first(), &params)
        .await?;
    Ok(Json(page))
}

fn group_key(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        Value::Null => "unknown".to_string(),
        other => other.to_string(),
    }
}

pub async fn admin_subscription_analytics(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<AnalyticsQuery>,
) -> ApiResult<Json<SubscriptionAnalytics>> {
    let (days, since) = analytics_window(&query);
    let subscriptions = &state.repos.subscriptions;

    let status_distribution = subscriptions
        .group_count(&Filter::All, "status")
        .await?
        .into_iter()
        .map(|g| StatusCount {
            status: group_key(&g.key),
            count: g.count,
        })
        .collect();

    let new_subscriptions = subscriptions.count(&Filter::gte("created_at", since)).await?;
    let cancellations = subscriptions
        .count(&Filter::and([
            Filter::eq("status", SubscriptionStatus::Cancelled),
            Filter::gte("cancelled_at", since),
        ]))
        .await?;

    Ok(Json(SubscriptionAnalytics {
        period_days: days,
        status_distribution,
        new_subscriptions,
        cancellations,
    }))
}

pub async fn admin_dashboard(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> ApiResult<Json<Dashboard>> {
    let now = Utc::now();
    let since = now - Duration::days(DASHBOARD_WINDOW_DAYS);
    let repos = &state.repos;

    let total_users = repos.users.count(&Filter::eq("is_active", true)).await?;
    let total_content = repos
        .content
        .count(&Filter::eq("status", ContentStatus::Published))
        .await?;
    let active_subscriptions = repos
        .subscriptions
        .count(&Filter::eq("status", SubscriptionStatus::Active))
        .await?;
    let recent_users = repos
        .users
        .count(&Filter::and([
            Filter::eq("is_active", true),
            Filter::gte("created_at", since),
        ]))
        .await?;

    let payments: Vec<Payment> = repos
        .payments
        .find(
            &Filter::and([
                Filter::eq("status", PaymentStatus::Succeeded),
                Filter::gte("created_at", since),
            ]),
            &FindOptions::new(),
        )
        .await?;
    let monthly_revenue = payments.iter().map(|p| p.amount).sum();

    let top_content = repos
        .content
        .find(
            &Filter::eq("status", ContentStatus::Published),
            &FindOptions::new()
                .sort_by("view_count", SortDirection::Descending)
                .limit(5),
        )
        .await?;

    Ok(Json(Dashboard {
        overview: DashboardOverview {
            total_users,
            total_content,
            active_subscriptions,
            recent_users,
            monthly_revenue,
        },
        top_content,
        timestamp: now,
    }))
}

#[derive(Debug, Serialize)]
pub struct KeyCount {
    pub key: String,
    pub count: u64,
}

fn key_counts(groups: Vec<onflix_store::GroupCount>) -> Vec<KeyCount> {
    groups
        .into_iter()
        .map(|g| KeyCount {
            key: group_key(&g.key),
            count: g.count,
        })
        .collect()
}

#[derive(Debug, Serialize)]
pub struct UserAnalytics {
    pub period_days: i64,
    pub total_users: u64,
    pub new_users: u64,
    pub verified_users: u64,
    pub by_status: Vec<KeyCount>,
    pub by_role: Vec<KeyCount>,
    /// Live subscriptions per plan name.
    pub by_plan: Vec<KeyCount>,
}

#[derive(Debug, Serialize)]
pub struct ContentAnalytics {
    pub by_status: Vec<KeyCount>,
    pub by_type: Vec<KeyCount>,
    pub top_genres: Vec<KeyCount>,
    pub most_viewed: Vec<Content>,
}

#[derive(Debug, Serialize)]
pub struct PlanRevenue {
    pub plan_id: String,
    pub plan_name: String,
    pub revenue: f64,
    pub payments: u64,
}

#[derive(Debug, Serialize)]
pub struct RevenueAnalytics {
    pub period_days: i64,
    pub total_revenue: f64,
    pub successful_payments: u64,
    pub failed_payments: u64,
    pub by_plan: Vec<PlanRevenue>,
}

const TOP_GENRES: usize = 10;
const MOST_VIEWED: u64 = 10;

fn analytics_window(query: &AnalyticsQuery) -> (i64, DateTime<Utc>) {
    let days = query.days.unwrap_or(30).clamp(1, ANALYTICS_MAX_DAYS);
    (days, Utc::now() - Duration::days(days))
}

async fn plan_names(state: &AppState) -> ApiResult<HashMap<String, String>> {
    Ok(state
        .repos
        .plans
        .all_sorted()
        .await?
        .into_iter()
        .map(|p| (p.id, p.name))
        .collect())
}

pub async fn admin_user_analytics(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<AnalyticsQuery>,
) -> ApiResult<Json<UserAnalytics>> {
    let (days, since) = analytics_window(&query);
    let users = &state.repos.users;

    let total_users = users.count(&Filter::All).await?;
    let new_users = users.count(&Filter::gte("created_at", since)).await?;
    let verified_users = users.count(&Filter::eq("is_email_verified", true)).await?;

    let by_status = users
        .group_count(&Filter::All, "is_active")
        .await?
        .into_iter()
        .map(|g| KeyCount {
            key: if g.key == Value::Bool(true) { "active" } else { "inactive" }.to_string(),
            count: g.count,
        })
        .collect();
    let by_role = key_counts(users.group_count(&Filter::All, "role").await?);

    let names = plan_names(&state).await?;
    let live = Filter::is_in(
        "status",
        [
            SubscriptionStatus::Active,
            SubscriptionStatus::Trialing,
            SubscriptionStatus::PastDue,
        ],
    );
    let by_plan = state
        .repos
        .subscriptions
        .group_count(&live, "plan_id")
        .await?
        .into_iter()
        .map(|g| {
            let plan_id = group_key(&g.key);
            KeyCount {
                key: names.get(&plan_id).cloned().unwrap_or(plan_id),
                count: g.count,
            }
        })
        .collect();

    Ok(Json(UserAnalytics {
        period_days: days,
        total_users,
        new_users,
        verified_users,
        by_status,
        by_role,
        by_plan,
    }))
}

pub async fn admin_content_analytics(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> ApiResult<Json<ContentAnalytics>> {
    let content = &state.repos.content;
    let published = Filter::eq("status", ContentStatus::Published);

    let by_status = key_counts(content.group_count(&Filter::All, "status").await?);
    let by_type = key_counts(content.group_count(&published, "type").await?);
    let mut top_genres = key_counts(content.group_count(&published, "genres").await?);
    top_genres.truncate(TOP_GENRES);

    let most_viewed = content
        .find(
            &published,
            &FindOptions::new()
                .sort_by("view_count", SortDirection::Descending)
                .limit(MOST_VIEWED),
        )
        .await?;

    Ok(Json(ContentAnalytics {
        by_status,
        by_type,
        top_genres,
        most_viewed,
    }))
}

/// Succeeded payments in the window, attributed to the plan of the
/// subscription they paid for.
pub async fn admin_revenue_analytics(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<AnalyticsQuery>,
) -> ApiResult<Json<RevenueAnalytics>> {
    let (days, since) = analytics_window(&query);
    let repos = &state.repos;

    let payments: Vec<Payment> = repos
        .payments
        .find(
            &Filter::and([
                Filter::eq("status", PaymentStatus::Succeeded),
                Filter::gte("created_at", since),
            ]),
            &FindOptions::new(),
        )
        .await?;
    let failed_payments = repos
        .payments
        .count(&Filter::and([
            Filter::eq("status", PaymentStatus::Failed),
            Filter::gte("created_at", since),
        ]))
        .await?;

    let mut by_subscription: HashMap<&str, (f64, u64)> = HashMap::new();
    for payment in &payments {
        let entry = by_subscription
            .entry(payment.subscription_id.as_str())
            .or_default();
        entry.0 += payment.amount;
        entry.1 += 1;
    }

    let subscriptions: Vec<Subscription> = repos
        .subscriptions
        .find(
            &Filter::is_in("id", by_subscription.keys().copied()),
            &FindOptions::new(),
        )
        .await?;
    let plan_of: HashMap<&str, &str> = subscriptions
        .iter()
        .map(|s| (s.id.as_str(), s.plan_id.as_str()))
        .collect();

    let names = plan_names(&state).await?;
    let mut per_plan: HashMap<String, (f64, u64)> = HashMap::new();
    for (sub_id, (revenue, count)) in by_subscription {
        let plan_id = plan_of.get(sub_id).copied().unwrap_or("unknown");
        let entry = per_plan.entry(plan_id.to_string()).or_default();
        entry.0 += revenue;
        entry.1 += count;
    }
    let mut by_plan: Vec<PlanRevenue> = per_plan
        .into_iter()
        .map(|(plan_id, (revenue, payments))| PlanRevenue {
            plan_name: names.get(&plan_id).cloned().unwrap_or_else(|| plan_id.clone()),
            plan_id,
            revenue,
            payments,
        })
        .collect();
    by_plan.sort_by(|a, b| b.revenue.total_cmp(&a.revenue).then_with(|| a.plan_id.cmp(&b.plan_id)));

    Ok(Json(RevenueAnalytics {
        period_days: days,
        total_revenue: payments.iter().map(|p| p.amount).sum(),
        successful_payments: payments.len() as u64,
        failed_payments,
        by_plan,
    }))
}
