//! The billing provider seam and the provider objects it returns.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use onflix_models::{CardDetails, SubscriptionStatus};

use crate::error::BillingResult;

/// Convert a provider unix timestamp.
pub fn from_unix(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionItemPeriod {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub current_period_start: Option<i64>,
    #[serde(default)]
    pub current_period_end: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionItems {
    #[serde(default)]
    pub data: Vec<SubscriptionItemPeriod>,
}

/// A provider-side subscription object.
///
/// Also the payload of `customer.subscription.*` webhook events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSubscription {
    pub id: String,
    pub customer: String,
    pub status: SubscriptionStatus,
    /// Older API versions report the period on the subscription, newer
    /// ones on each item.
    #[serde(default)]
    pub current_period_start: Option<i64>,
    #[serde(default)]
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub trial_start: Option<i64>,
    #[serde(default)]
    pub trial_end: Option<i64>,
    #[serde(default)]
    pub cancel_at: Option<i64>,
    #[serde(default)]
    pub canceled_at: Option<i64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    #[serde(default)]
    pub items: SubscriptionItems,
}

impl ProviderSubscription {
    fn first_item(&self) -> Option<&SubscriptionItemPeriod> {
        self.items.data.first()
    }

    pub fn item_id(&self) -> Option<&str> {
        self.first_item()
            .map(|i| i.id.as_str())
            .filter(|id| !id.is_empty())
    }

    pub fn period_start(&self) -> Option<DateTime<Utc>> {
        self.current_period_start
            .or_else(|| self.first_item().and_then(|i| i.current_period_start))
            .and_then(from_unix)
    }

    pub fn period_end(&self) -> Option<DateTime<Utc>> {
        self.current_period_end
            .or_else(|| self.first_item().and_then(|i| i.current_period_end))
            .and_then(from_unix)
    }

    pub fn trial_start_at(&self) -> Option<DateTime<Utc>> {
        self.trial_start.and_then(from_unix)
    }

    pub fn trial_end_at(&self) -> Option<DateTime<Utc>> {
        self.trial_end.and_then(from_unix)
    }

    pub fn cancel_at_time(&self) -> Option<DateTime<Utc>> {
        self.cancel_at.and_then(from_unix)
    }

    pub fn canceled_at_time(&self) -> Option<DateTime<Utc>> {
        self.canceled_at.and_then(from_unix)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderCard {
    pub brand: String,
    pub last4: String,
    pub exp_month: u32,
    pub exp_year: u32,
}

/// A saved payment method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderPaymentMethod {
    pub id: String,
    #[serde(rename = "type", default)]
    pub method_type: String,
    #[serde(default)]
    pub card: Option<ProviderCard>,
}

impl ProviderPaymentMethod {
    pub fn card_details(&self) -> Option<CardDetails> {
        self.card.as_ref().map(|c| CardDetails {
            brand: c.brand.clone(),
            last4: c.last4.clone(),
            exp_month: c.exp_month,
            exp_year: c.exp_year,
        })
    }
}

/// Client-side handle for collecting a new payment method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupIntent {
    pub id: String,
    pub client_secret: String,
}

/// Parameters for creating a subscription.
#[derive(Debug, Clone)]
pub struct NewSubscription<'a> {
    pub customer_id: &'a str,
    pub price_id: &'a str,
    pub payment_method_id: &'a str,
    pub trial_days: Option<u32>,
}

/// Operations the platform needs from its payment provider.
#[async_trait]
pub trait BillingProvider: Send + Sync {
    /// Create a customer and return its id.
    async fn create_customer(&self, email: &str, name: &str, user_id: &str) -> BillingResult<String>;

    async fn attach_payment_method(&self, payment_method_id: &str, customer_id: &str)
        -> BillingResult<()>;

    async fn create_subscription(&self, params: NewSubscription<'_>)
        -> BillingResult<ProviderSubscription>;

    async fn get_subscription(&self, subscription_id: &str) -> BillingResult<ProviderSubscription>;

    /// Swap the subscription's price, invoicing the proration immediately.
    async fn change_price(
        &self,
        subscription_id: &str,
        new_price_id: &str,
    ) -> BillingResult<ProviderSubscription>;

    /// Cancel now, or flag the subscription to end with its current period.
    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        at_period_end: bool,
    ) -> BillingResult<ProviderSubscription>;

    /// Create a product plus a price for it and return the price id.
    ///
    /// `interval` is `month`/`year`; `None` creates a one-off price.
    async fn create_price(
        &self,
        product_name: &str,
        description: &str,
        unit_amount: i64,
        currency: &str,
        interval: Option<&str>,
    ) -> BillingResult<String>;

    async fn list_payment_methods(&self, customer_id: &str)
        -> BillingResult<Vec<ProviderPaymentMethod>>;

    async fn create_setup_intent(&self, customer_id: &str) -> BillingResult<SetupIntent>;

    async fn detach_payment_method(&self, payment_method_id: &str) -> BillingResult<()>;

    async fn set_default_payment_method(
        &self,
        customer_id: &str,
        payment_method_id: &str,
    ) -> BillingResult<()>;
}
