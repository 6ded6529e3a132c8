//! Subscription, usage, invoice and payment method handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use onflix_billing::ProviderPaymentMethod;
use onflix_models::{CardDetails, Invoice, PageParams, Paginated, Subscription, SubscriptionPlan};
use onflix_store::{Filter, FindOptions, SortDirection};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::handlers::auth::MessageResponse;
use crate::security::sanitize_string;
use crate::services::{SubscribeParams, UsageReport};
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct SubscribeRequest {
    #[validate(length(min = 1, message = "Plan is required"))]
    pub plan_id: String,
    #[validate(length(min = 1, message = "Payment method is required"))]
    pub payment_method_id: String,
    #[serde(default)]
    #[validate(range(max = 30))]
    pub trial_days: Option<u32>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangePlanRequest {
    #[validate(length(min = 1, message = "Plan is required"))]
    pub plan_id: String,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct CancelRequest {
    #[serde(default)]
    pub immediate: bool,
    #[serde(default)]
    #[validate(length(max = 2000))]
    pub reason: Option<String>,
}

#[derive(Serialize)]
pub struct SubscriptionResponse {
    pub subscription: Subscription,
    pub plan: SubscriptionPlan,
}

#[derive(Serialize)]
pub struct CurrentSubscriptionResponse {
    pub subscription: Subscription,
    pub plan: Option<SubscriptionPlan>,
    pub usage: Option<UsageReport>,
}

#[derive(Serialize)]
pub struct PaymentMethodResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub method_type: String,
    pub card: Option<CardDetails>,
}

impl From<ProviderPaymentMethod> for PaymentMethodResponse {
    fn from(method: ProviderPaymentMethod) -> Self {
        Self {
            card: method.card_details(),
            id: method.id,
            method_type: method.method_type,
        }
    }
}

#[derive(Serialize)]
pub struct SetupIntentResponse {
    pub setup_intent_id: String,
    pub client_secret: String,
}

/// Active plans, cheapest tier first. Public.
pub async fn list_plans(State(state): State<AppState>) -> ApiResult<Json<Vec<SubscriptionPlan>>> {
    Ok(Json(state.repos.plans.active_sorted().await?))
}

pub async fn subscribe(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<SubscribeRequest>,
) -> ApiResult<(StatusCode, Json<SubscriptionResponse>)> {
    request.validate()?;
    let now = Utc::now();

    let (subscription, plan) = state
        .subscriptions
        .subscribe(
            &user.user,
            SubscribeParams {
                plan_id: &request.plan_id,
                payment_method_id: &request.payment_method_id,
                trial_days: request.trial_days,
            },
            now,
        )
        .await?;

    // The usage period starts with the subscription
    state.usage.current_record(&user.user, &subscription, now).await?;

    Ok((
        StatusCode::CREATED,
        Json(SubscriptionResponse { subscription, plan }),
    ))
}

/// Current subscription with its plan and this period's usage.
pub async fn current_subscription(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<CurrentSubscriptionResponse>> {
    let now = Utc::now();
    let subscription = state.subscriptions.current_record(&user.user).await?;
    let plan = state.repos.plans.get(&subscription.plan_id).await?;

    let usage = match &plan {
        Some(plan) => Some(
            state
                .usage
                .report_for_plan(&user.user, &subscription, plan, now)
                .await?,
        ),
        None => None,
    };

    Ok(Json(CurrentSubscriptionResponse {
        subscription,
        plan,
        usage,
    }))
}

pub async fn change_plan(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<ChangePlanRequest>,
) -> ApiResult<Json<SubscriptionResponse>> {
    request.validate()?;
    let (subscription, plan) = state
        .subscriptions
        .change_plan(&user.user, &request.plan_id, Utc::now())
        .await?;
    Ok(Json(SubscriptionResponse { subscription, plan }))
}

/// Cancel now or at period end. An empty body cancels at period end.
pub async fn cancel_subscription(
    State(state): State<AppState>,
    user: AuthUser,
    request: Option<Json<CancelRequest>>,
) -> ApiResult<Json<Subscription>> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    request.validate()?;

    let reason = request
        .reason
        .map(|r| sanitize_string(&r))
        .filter(|r| !r.is_empty());

    let subscription = state
        .subscriptions
        .cancel(&user.user, request.immediate, reason, Utc::now())
        .await?;
    Ok(Json(subscription))
}

pub async fn pause_subscription(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<Subscription>> {
    Ok(Json(state.subscriptions.pause(&user.user, Utc::now()).await?))
}

pub async fn resume_subscription(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<Subscription>> {
    Ok(Json(state.subscriptions.resume(&user.user, Utc::now()).await?))
}

pub async fn subscription_usage(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<UsageReport>> {
    let now = Utc::now();
    let subscription = state.subscriptions.current_record(&user.user).await?;
    Ok(Json(state.usage.report(&user.user, &subscription, now).await?))
}

/// The caller's invoices, newest first.
pub async fn list_invoices(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<PageParams>,
) -> ApiResult<Json<Paginated<Invoice>>> {
    let page = state
        .repos
        .invoices
        .page(
            &Filter::eq("user_id", user.id()),
            FindOptions::new().sort_by("created_at", SortDirection::Descending),
            &params,
        )
        .await?;
    Ok(Json(page))
}

// ============================================================================
// Payment methods
// ============================================================================

fn customer_id(user: &AuthUser) -> Option<String> {
    user.user.stripe_customer_id.clone().or_else(|| {
        user.user
            .subscription
            .as_ref()
            .map(|s| s.stripe_customer_id.clone())
            .filter(|id| !id.is_empty())
    })
}

/// The method must belong to the caller's provider customer.
async fn owned_method(
    state: &AppState,
    user: &AuthUser,
    method_id: &str,
) -> ApiResult<String> {
    let customer = customer_id(user).ok_or_else(|| ApiError::not_found("Payment method not found"))?;
    let methods = state.billing.list_payment_methods(&customer).await?;
    if !methods.iter().any(|m| m.id == method_id) {
        return Err(ApiError::not_found("Payment method not found"));
    }
    Ok(customer)
}

pub async fn list_payment_methods(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<Vec<PaymentMethodResponse>>> {
    let Some(customer) = customer_id(&user) else {
        return Ok(Json(Vec::new()));
    };
    let methods = state.billing.list_payment_methods(&customer).await?;
    Ok(Json(methods.into_iter().map(Into::into).collect()))
}

/// Start collecting a new card. The client confirms the returned setup intent.
pub async fn add_payment_method(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<(StatusCode, Json<SetupIntentResponse>)> {
    let customer = state
        .subscriptions
        .ensure_customer(&user.user, Utc::now())
        .await?;
    let intent = state.billing.create_setup_intent(&customer).await?;

    info!(user_id = %user.id(), setup_intent_id = %intent.id, "Setup intent created");
    Ok((
        StatusCode::CREATED,
        Json(SetupIntentResponse {
            setup_intent_id: intent.id,
            client_secret: intent.client_secret,
        }),
    ))
}

pub async fn delete_payment_method(
    State(state): State<AppState>,
    user: AuthUser,
    Path(method_id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    owned_method(&state, &user, &method_id).await?;
    state.billing.detach_payment_method(&method_id).await?;

    info!(user_id = %user.id(), payment_method_id = %method_id, "Payment method removed");
    Ok(MessageResponse::new("Payment method removed"))
}

pub async fn set_default_payment_method(
    State(state): State<AppState>,
    user: AuthUser,
    Path(method_id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    let customer = owned_method(&state, &user, &method_id).await?;
    state
        .billing
        .set_default_payment_method(&customer, &method_id)
        .await?;

    info!(user_id = %user.id(), payment_method_id = %method_id, "Default payment method set");
    Ok(MessageResponse::new("Default payment method updated"))
}
