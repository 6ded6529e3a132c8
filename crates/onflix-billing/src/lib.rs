//! Payment provider integration for the Onflix backend.
//!
//! This crate provides:
//! - The `BillingProvider` trait the API depends on
//! - A Stripe implementation over the REST API (form-encoded, no SDK)
//! - Webhook signature verification and typed event decoding

pub mod client;
pub mod error;
pub mod provider;
pub mod webhook;

pub use client::{StripeClient, StripeConfig};
pub use error::{BillingError, BillingResult};
pub use provider::{
    from_unix, BillingProvider, NewSubscription, ProviderCard, ProviderPaymentMethod,
    ProviderSubscription, SetupIntent,
};
pub use webhook::{
    sign_payload, verify_signature, InvoiceObject, PaymentIntentObject, WebhookError,
    WebhookEvent, WebhookEnvelope, SIGNATURE_TOLERANCE_SECS,
};
