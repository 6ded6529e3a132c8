//! Payment provider webhook endpoint.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use tracing::warn;

use onflix_billing::{verify_signature, WebhookEnvelope};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub outcome: &'static str,
}

/// Verify and apply one provider event.
///
/// The signature is checked against the raw body before anything is
/// parsed. Handler failures return 500 so the provider redelivers.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let now = Utc::now();
    let secret = state.config.stripe_webhook_secret.as_str();
    if secret.is_empty() {
        warn!("Webhook received but no signing secret is configured");
        return Err(ApiError::bad_request("Webhook signing is not configured"));
    }

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::bad_request("Missing Stripe-Signature header"))?;

    if let Err(e) = verify_signature(&body, signature, secret, now) {
        warn!(error = %e, "Rejected webhook signature");
        metrics::record_webhook_event("unknown", "rejected");
        return Err(ApiError::bad_request("Invalid signature"));
    }

    let envelope = WebhookEnvelope::parse(&body).map_err(|e| {
        warn!(error = %e, "Rejected webhook payload");
        ApiError::bad_request("Invalid webhook payload")
    })?;

    let outcome = state.webhooks.process(&envelope, now).await?;
    Ok(Json(WebhookAck {
        received: true,
        outcome: outcome.as_str(),
    }))
}
