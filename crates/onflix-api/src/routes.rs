//! API routes.

use std::sync::Arc;

use axum::middleware;
use axum::routing::{delete, get, post, put};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;

use crate::handlers::admin::{
    admin_activate_plan, admin_ban_user, admin_content_analytics, admin_create_content,
    admin_create_plan, admin_dashboard, admin_deactivate_plan, admin_delete_content,
    admin_delete_user, admin_get_content, admin_get_user, admin_get_user_subscription,
    admin_list_content, admin_list_plans, admin_list_subscriptions, admin_list_users,
    admin_publish_content, admin_reset_user_password, admin_revenue_analytics,
    admin_subscription_analytics, admin_unban_user, admin_unpublish_content,
    admin_update_content, admin_update_plan, admin_update_user, admin_update_user_subscription,
    admin_user_analytics,
};
use crate::handlers::auth::{
    change_password, forgot_password, login, logout, refresh_token, register,
    resend_verification, reset_password, verify_email,
};
use crate::handlers::content::{
    browse_content, categories, content_by_category, content_by_genre, content_details, episode,
    episodes, featured_content, genres, new_releases, originals, search_content,
    search_suggestions, season, seasons, similar_content, trailers, trending_content,
};
use crate::handlers::streaming::{
    stream_content, stream_content_quality, stream_episode, stream_token,
};
use crate::handlers::subscriptions::{
    add_payment_method, cancel_subscription, change_plan, current_subscription,
    delete_payment_method, list_invoices, list_payment_methods, list_plans, pause_subscription,
    resume_subscription, set_default_payment_method, subscribe, subscription_usage,
};
use crate::handlers::users::{
    add_to_watchlist, clear_history, clear_watchlist, create_profile, delete_account,
    delete_profile, get_account, get_history, get_preferences, get_profile, get_watchlist,
    list_profiles, remove_from_history, remove_from_watchlist, update_account, update_language,
    update_maturity_rating, update_preferences, update_profile, update_progress,
};
use crate::handlers::webhooks::stripe_webhook;
use crate::handlers::{health, ready};
use crate::metrics::metrics_middleware;
use crate::middleware::{
    cors_layer, rate_limit_middleware, request_id, request_logging, security_headers,
    RateLimiterCache,
};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let auth_routes = Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh_token))
        .route("/auth/change-password", post(change_password))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
        .route("/auth/logout", post(logout))
        .route("/auth/verify-email", post(verify_email))
        .route("/auth/resend-verification", post(resend_verification));

    // Public catalog
    let content_routes = Router::new()
        .route("/content", get(browse_content))
        .route("/content/featured", get(featured_content))
        .route("/content/trending", get(trending_content))
        .route("/content/new-releases", get(new_releases))
        .route("/content/originals", get(originals))
        .route("/content/search", get(search_content))
        .route("/content/search/suggestions", get(search_suggestions))
        .route("/content/genres", get(genres))
        .route("/content/genres/:genre", get(content_by_genre))
        .route("/content/categories", get(categories))
        .route("/content/categories/:category", get(content_by_category))
        .route("/content/:content_id", get(content_details))
        .route("/content/:content_id/similar", get(similar_content))
        .route("/content/:content_id/trailers", get(trailers))
        // TV shows
        .route("/content/tv-shows/:show_id/seasons", get(seasons))
        .route("/content/tv-shows/:show_id/seasons/:season", get(season))
        .route("/content/tv-shows/:show_id/seasons/:season/episodes", get(episodes))
        .route(
            "/content/tv-shows/:show_id/seasons/:season/episodes/:episode",
            get(episode),
        );

    // Entitlement-gated playback
    let streaming_routes = Router::new()
        .route("/content/:content_id/stream", get(stream_content))
        .route("/content/:content_id/stream/:quality", get(stream_content_quality))
        .route("/content/:content_id/stream/token", post(stream_token))
        .route(
            "/content/tv-shows/:show_id/seasons/:season/episodes/:episode/stream",
            get(stream_episode),
        );

    let user_routes = Router::new()
        .route("/user/profile", get(get_account))
        .route("/user/profile", put(update_account))
        .route("/user/profile", delete(delete_account))
        // Viewing profiles
        .route("/user/profiles", get(list_profiles))
        .route("/user/profiles", post(create_profile))
        .route("/user/profiles/:profile_id", get(get_profile))
        .route("/user/profiles/:profile_id", put(update_profile))
        .route("/user/profiles/:profile_id", delete(delete_profile))
        // Watchlist
        .route("/user/watchlist", get(get_watchlist))
        .route("/user/watchlist/clear", post(clear_watchlist))
        .route("/user/watchlist/:content_id", post(add_to_watchlist))
        .route("/user/watchlist/:content_id", delete(remove_from_watchlist))
        // Watch history
        .route("/user/history", get(get_history))
        .route("/user/history/progress", post(update_progress))
        .route("/user/history/clear", post(clear_history))
        .route("/user/history/:content_id", delete(remove_from_history))
        // Preferences
        .route("/user/preferences", get(get_preferences))
        .route("/user/preferences", put(update_preferences))
        .route("/user/preferences/language", put(update_language))
        .route("/user/preferences/maturity-rating", put(update_maturity_rating));

    let subscription_routes = Router::new()
        .route("/subscriptions/plans", get(list_plans))
        .route("/subscriptions/subscribe", post(subscribe))
        .route("/subscriptions/current", get(current_subscription))
        .route("/subscriptions/change-plan", put(change_plan))
        .route("/subscriptions/cancel", post(cancel_subscription))
        .route("/subscriptions/pause", post(pause_subscription))
        .route("/subscriptions/resume", post(resume_subscription))
        .route("/subscriptions/usage", get(subscription_usage))
        .route("/subscriptions/invoices", get(list_invoices))
        // Payment methods
        .route("/subscriptions/payment-methods", get(list_payment_methods))
        .route("/subscriptions/payment-methods", post(add_payment_method))
        .route(
            "/subscriptions/payment-methods/:method_id",
            delete(delete_payment_method),
        )
        .route(
            "/subscriptions/payment-methods/:method_id/default",
            put(set_default_payment_method),
        );

    // Admin routes (role checked by the AdminUser extractor)
    let admin_routes = Router::new()
        .route("/admin/dashboard", get(admin_dashboard))
        // Catalog management
        .route("/admin/content", get(admin_list_content))
        .route("/admin/content", post(admin_create_content))
        .route("/admin/content/:content_id", get(admin_get_content))
        .route("/admin/content/:content_id", put(admin_update_content))
        .route("/admin/content/:content_id", delete(admin_delete_content))
        .route("/admin/content/:content_id/publish", post(admin_publish_content))
        .route("/admin/content/:content_id/unpublish", post(admin_unpublish_content))
        // Plans
        .route("/admin/plans", get(admin_list_plans))
        .route("/admin/plans", post(admin_create_plan))
        .route("/admin/plans/:plan_id", put(admin_update_plan))
        .route("/admin/plans/:plan_id/activate", post(admin_activate_plan))
        .route("/admin/plans/:plan_id/deactivate", post(admin_deactivate_plan))
        // Accounts
        .route("/admin/users", get(admin_list_users))
        .route("/admin/users/:user_id", get(admin_get_user))
        .route("/admin/users/:user_id", put(admin_update_user))
        .route("/admin/users/:user_id", delete(admin_delete_user))
        .route("/admin/users/:user_id/ban", post(admin_ban_user))
        .route("/admin/users/:user_id/unban", post(admin_unban_user))
        .route(
            "/admin/users/:user_id/reset-password",
            post(admin_reset_user_password),
        )
        .route(
            "/admin/users/:user_id/subscription",
            get(admin_get_user_subscription),
        )
        .route(
            "/admin/users/:user_id/subscription",
            put(admin_update_user_subscription),
        )
        // Subscriptions
        .route("/admin/subscriptions", get(admin_list_subscriptions))
        .route(
            "/admin/subscriptions/analytics",
            get(admin_subscription_analytics),
        )
        // Analytics
        .route("/admin/analytics/users", get(admin_user_analytics))
        .route("/admin/analytics/content", get(admin_content_analytics))
        .route("/admin/analytics/revenue", get(admin_revenue_analytics));

    let rate_limiter = Arc::new(RateLimiterCache::new(state.config.rate_limit_rps));

    let api_routes = Router::new()
        .merge(auth_routes)
        .merge(content_routes)
        .merge(streaming_routes)
        .merge(user_routes)
        .merge(subscription_routes)
        .merge(admin_routes)
        .layer(middleware::from_fn_with_state(
            rate_limiter,
            rate_limit_middleware,
        ));

    // Provider retries must never be throttled
    let webhook_routes = Router::new().route("/webhooks/stripe", post(stripe_webhook));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready));

    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .nest("/api/v1", api_routes.merge(webhook_routes))
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
