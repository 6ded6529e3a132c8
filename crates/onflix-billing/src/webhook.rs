//! Stripe webhook verification and typed event decoding.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;

use crate::provider::{from_unix, ProviderSubscription};

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted age of a signed payload.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WebhookError {
    #[error("Missing or malformed signature header")]
    MalformedHeader,

    #[error("Signature mismatch")]
    SignatureMismatch,

    #[error("Signature timestamp outside tolerance")]
    Expired,

    #[error("Invalid webhook payload: {0}")]
    Payload(String),
}

/// `t=<unix>,v1=<hex hmac>` over `"{t}.{payload}"`.
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> Result<String, WebhookError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| WebhookError::MalformedHeader)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Verify a `Stripe-Signature` header against the raw request body.
///
/// Any one of several `v1` signatures may match, which is how the provider
/// rolls secrets.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: DateTime<Utc>,
) -> Result<(), WebhookError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        let part = part.trim();
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = t.parse::<i64>().ok();
        } else if let Some(v) = part.strip_prefix("v1=") {
            signatures.push(v);
        }
    }

    let timestamp = timestamp.ok_or(WebhookError::MalformedHeader)?;
    if signatures.is_empty() {
        return Err(WebhookError::MalformedHeader);
    }

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| WebhookError::MalformedHeader)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    let matched = signatures.iter().any(|sig| {
        hex::decode(sig)
            .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
            .unwrap_or(false)
    });
    if !matched {
        return Err(WebhookError::SignatureMismatch);
    }

    if (now.timestamp() - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(WebhookError::Expired);
    }

    Ok(())
}

// =============================================================================
// Event payloads
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusTransitions {
    #[serde(default)]
    pub paid_at: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinePeriod {
    #[serde(default)]
    pub start: Option<i64>,
    #[serde(default)]
    pub end: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceLine {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub quantity: Option<u32>,
    #[serde(default)]
    pub period: LinePeriod,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceLines {
    #[serde(default)]
    pub data: Vec<InvoiceLine>,
}

/// Payload of `invoice.payment_*` events. Amounts are in minor units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceObject {
    pub id: String,
    pub customer: String,
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub charge: Option<String>,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub amount_due: i64,
    #[serde(default)]
    pub amount_paid: i64,
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub tax: Option<i64>,
    pub currency: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub due_date: Option<i64>,
    #[serde(default)]
    pub hosted_invoice_url: Option<String>,
    #[serde(default)]
    pub status_transitions: StatusTransitions,
    #[serde(default)]
    pub lines: InvoiceLines,
}

impl InvoiceObject {
    pub fn paid_at(&self) -> Option<DateTime<Utc>> {
        self.status_transitions.paid_at.and_then(from_unix)
    }

    pub fn due_at(&self) -> Option<DateTime<Utc>> {
        self.due_date.and_then(from_unix)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentError {
    #[serde(default)]
    pub message: Option<String>,
}

/// Payload of `payment_intent.*` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntentObject {
    pub id: String,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub last_payment_error: Option<PaymentError>,
}

impl PaymentIntentObject {
    pub fn failure_message(&self) -> String {
        self.last_payment_error
            .as_ref()
            .and_then(|e| e.message.clone())
            .unwrap_or_else(|| "Payment failed".to_string())
    }
}

/// A decoded provider event.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEvent {
    SubscriptionCreated(ProviderSubscription),
    SubscriptionUpdated(ProviderSubscription),
    SubscriptionDeleted(ProviderSubscription),
    InvoicePaymentSucceeded(InvoiceObject),
    InvoicePaymentFailed(InvoiceObject),
    PaymentIntentSucceeded(PaymentIntentObject),
    PaymentIntentFailed(PaymentIntentObject),
    /// Event types this platform does not act on.
    Unhandled,
}

/// Event id, type and decoded payload.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEnvelope {
    pub id: String,
    pub event_type: String,
    pub created: i64,
    pub event: WebhookEvent,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    created: i64,
    data: RawData,
}

#[derive(Debug, Deserialize)]
struct RawData {
    object: Value,
}

fn object<T: serde::de::DeserializeOwned>(event_type: &str, value: Value) -> Result<T, WebhookError> {
    serde_json::from_value(value)
        .map_err(|e| WebhookError::Payload(format!("{}: {}", event_type, e)))
}

impl WebhookEnvelope {
    /// Decode an already-verified payload.
    pub fn parse(payload: &[u8]) -> Result<Self, WebhookError> {
        let raw: RawEvent =
            serde_json::from_slice(payload).map_err(|e| WebhookError::Payload(e.to_string()))?;
        let obj = raw.data.object;
        let t = raw.event_type.as_str();

        let event = match t {
            "customer.subscription.created" => WebhookEvent::SubscriptionCreated(object(t, obj)?),
            "customer.subscription.updated" => WebhookEvent::SubscriptionUpdated(object(t, obj)?),
            "customer.subscription.deleted" => WebhookEvent::SubscriptionDeleted(object(t, obj)?),
            "invoice.payment_succeeded" => WebhookEvent::InvoicePaymentSucceeded(object(t, obj)?),
            "invoice.payment_failed" => WebhookEvent::InvoicePaymentFailed(object(t, obj)?),
            "payment_intent.succeeded" => WebhookEvent::PaymentIntentSucceeded(object(t, obj)?),
            "payment_intent.payment_failed" => WebhookEvent::PaymentIntentFailed(object(t, obj)?),
            _ => WebhookEvent::Unhandled,
        };

        Ok(Self {
            id: raw.id,
            event_type: raw.event_type,
            created: raw.created,
            event,
        })
    }
}
