//! Typed repositories over the document store.

use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use onflix_models::{
    Content, Invoice, PageParams, Paginated, Payment, Subscription, SubscriptionPlan,
    SubscriptionStatus, SubscriptionUsage, User, UserSubscription,
};

use crate::error::{StoreError, StoreResult};
use crate::filter::{to_value, Filter, FindOptions, SortDirection, Update};
use crate::store::{DocumentStore, GroupCount, UniqueIndex};

/// Collection names.
pub mod collections {
    pub const USERS: &str = "users";
    pub const CONTENT: &str = "content";
    pub const PLANS: &str = "subscription_plans";
    pub const SUBSCRIPTIONS: &str = "subscriptions";
    pub const PAYMENTS: &str = "payments";
    pub const INVOICES: &str = "invoices";
    pub const USAGE: &str = "subscription_usage";
    pub const WEBHOOK_EVENTS: &str = "webhook_events";
}

/// Unique keys idempotency relies on.
pub const UNIQUE_INDEXES: &[UniqueIndex] = &[
    UniqueIndex {
        collection: collections::USERS,
        fields: &["email"],
        strings_only: false,
    },
    UniqueIndex {
        collection: collections::INVOICES,
        fields: &["stripe_invoice_id"],
        strings_only: false,
    },
    UniqueIndex {
        collection: collections::PAYMENTS,
        fields: &["stripe_payment_intent_id"],
        strings_only: true,
    },
    UniqueIndex {
        collection: collections::USAGE,
        fields: &["user_id", "subscription_id", "period.start"],
        strings_only: false,
    },
];

/// How long processed webhook event ids are kept for deduplication.
pub const WEBHOOK_EVENT_RETENTION_DAYS: u64 = 30;

/// A collection of `T` documents.
pub struct Repository<T> {
    store: Arc<dyn DocumentStore>,
    collection: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            collection: self.collection,
            _marker: PhantomData,
        }
    }
}

fn decode<T: DeserializeOwned>(doc: Value) -> StoreResult<T> {
    serde_json::from_value(doc).map_err(StoreError::from)
}

fn encode<T: Serialize>(item: &T) -> StoreResult<Value> {
    serde_json::to_value(item).map_err(StoreError::from)
}

impl<T> Repository<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    pub fn new(store: Arc<dyn DocumentStore>, collection: &'static str) -> Self {
        Self {
            store,
            collection,
            _marker: PhantomData,
        }
    }

    pub fn collection(&self) -> &'static str {
        self.collection
    }

    /// Get a document by id.
    pub async fn get(&self, id: &str) -> StoreResult<Option<T>> {
        self.find_one(&Filter::eq("id", id)).await
    }

    pub async fn find_one(&self, filter: &Filter) -> StoreResult<Option<T>> {
        self.store
            .find_one(self.collection, filter)
            .await?
            .map(decode)
            .transpose()
    }

    pub async fn find(&self, filter: &Filter, options: &FindOptions) -> StoreResult<Vec<T>> {
        self.store
            .find(self.collection, filter, options)
            .await?
            .into_iter()
            .map(decode)
            .collect()
    }

    pub async fn count(&self, filter: &Filter) -> StoreResult<u64> {
        self.store.count(self.collection, filter).await
    }

    pub async fn insert(&self, item: &T) -> StoreResult<()> {
        self.store.insert_one(self.collection, encode(item)?).await
    }

    /// Replace the document with `id`. Returns false if it does not exist.
    pub async fn replace(&self, id: &str, item: &T) -> StoreResult<bool> {
        let matched = self
            .store
            .replace_one(self.collection, &Filter::eq("id", id), encode(item)?)
            .await?;
        Ok(matched > 0)
    }

    pub async fn update(&self, filter: &Filter, update: &Update) -> StoreResult<u64> {
        self.store.update_one(self.collection, filter, update).await
    }

    pub async fn update_many(&self, filter: &Filter, update: &Update) -> StoreResult<u64> {
        self.store.update_many(self.collection, filter, update).await
    }

    /// Partial update of the document with `id`. Returns false if it does not exist.
    pub async fn update_by_id(&self, id: &str, update: &Update) -> StoreResult<bool> {
        Ok(self.update(&Filter::eq("id", id), update).await? > 0)
    }

    pub async fn delete(&self, id: &str) -> StoreResult<bool> {
        Ok(self
            .store
            .delete_one(self.collection, &Filter::eq("id", id))
            .await?
            > 0)
    }

    /// One page of matches plus the total count.
    pub async fn page(
        &self,
        filter: &Filter,
        options: FindOptions,
        params: &PageParams,
    ) -> StoreResult<Paginated<T>> {
        let (_, limit) = params.normalize();
        let total = self.count(filter).await?;
        let options = options.skip(params.skip()).limit(limit);
        let items = self.find(filter, &options).await?;
        Ok(Paginated::new(items, params, total))
    }

    pub async fn group_count(&self, filter: &Filter, field: &str) -> StoreResult<Vec<GroupCount>> {
        self.store.group_count(self.collection, filter, field).await
    }
}

// =============================================================================
// Users
// =============================================================================

impl Repository<User> {
    pub async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.find_one(&Filter::eq("email", email.trim().to_lowercase()))
            .await
    }

    /// An account that has not been deactivated.
    pub async fn find_active(&self, id: &str) -> StoreResult<Option<User>> {
        self.find_one(&Filter::and([
            Filter::eq("id", id),
            Filter::eq("is_active", true),
        ]))
        .await
    }

    pub async fn find_by_customer(&self, customer_id: &str) -> StoreResult<Option<User>> {
        self.find_one(&Filter::eq("stripe_customer_id", customer_id))
            .await
    }

    /// Overwrite the embedded subscription summary.
    pub async fn set_subscription_mirror(
        &self,
        user_id: &str,
        mirror: Option<&UserSubscription>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let update = match mirror {
            Some(m) => Update::new().set("subscription", m),
            None => Update::new().unset("subscription"),
        };
        self.update_by_id(user_id, &update.set("updated_at", now))
            .await
    }
}

// =============================================================================
// Content
// =============================================================================

impl Repository<Content> {
    /// Best-effort counter bump.
    pub async fn increment_views(&self, content_id: &str) -> StoreResult<bool> {
        self.update_by_id(content_id, &Update::new().inc("view_count", 1))
            .await
    }

    pub async fn get_published(&self, id: &str) -> StoreResult<Option<Content>> {
        self.find_one(&Filter::and([
            Filter::eq("id", id),
            Filter::eq("status", "published"),
        ]))
        .await
    }
}

// =============================================================================
// Plans
// =============================================================================

impl Repository<SubscriptionPlan> {
    /// Plans open for new subscriptions, in display order.
    pub async fn active_sorted(&self) -> StoreResult<Vec<SubscriptionPlan>> {
        let options = FindOptions::new()
            .sort_by("sort_order", SortDirection::Ascending)
            .sort_by("price", SortDirection::Ascending);
        self.find(&Filter::eq("is_active", true), &options).await
    }

    pub async fn all_sorted(&self) -> StoreResult<Vec<SubscriptionPlan>> {
        let options = FindOptions::new().sort_by("sort_order", SortDirection::Ascending);
        self.find(&Filter::All, &options).await
    }
}

// =============================================================================
// Subscriptions
// =============================================================================

impl Repository<Subscription> {
    /// Most recently created subscription of a user, whatever its status.
    pub async fn latest_for_user(&self, user_id: &str) -> StoreResult<Option<Subscription>> {
        let options = FindOptions::new()
            .sort_by("created_at", SortDirection::Descending)
            .limit(1);
        Ok(self
            .find(&Filter::eq("user_id", user_id), &options)
            .await?
            .into_iter()
            .next())
    }

    /// The user's active or trialing subscription, if any.
    pub async fn live_for_user(&self, user_id: &str) -> StoreResult<Option<Subscription>> {
        self.find_one(&Filter::and([
            Filter::eq("user_id", user_id),
            Filter::is_in("status", SubscriptionStatus::LIVE),
        ]))
        .await
    }

    pub async fn by_provider_id(&self, provider_id: &str) -> StoreResult<Option<Subscription>> {
        self.find_one(&Filter::eq("stripe_subscription_id", provider_id))
            .await
    }
}

// =============================================================================
// Usage
// =============================================================================

impl Repository<SubscriptionUsage> {
    /// Usage record whose period contains `at`.
    pub async fn covering(
        &self,
        user_id: &str,
        subscription_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<SubscriptionUsage>> {
        self.find_one(&Filter::and([
            Filter::eq("user_id", user_id),
            Filter::eq("subscription_id", subscription_id),
            Filter::lte("period.start", at),
            Filter::gte("period.end", at),
        ]))
        .await
    }
}

// =============================================================================
// Ledger
// =============================================================================

impl Repository<Payment> {
    pub async fn by_intent(&self, intent_id: &str) -> StoreResult<Option<Payment>> {
        self.find_one(&Filter::eq("stripe_payment_intent_id", intent_id))
            .await
    }

    /// The payment tracking a provider invoice. A retried charge reuses the
    /// invoice's payment intent, so either id identifies it.
    pub async fn for_invoice(
        &self,
        invoice_id: &str,
        intent_id: Option<&str>,
    ) -> StoreResult<Option<Payment>> {
        let mut clauses = vec![Filter::eq("stripe_invoice_id", invoice_id)];
        if let Some(intent_id) = intent_id {
            clauses.push(Filter::eq("stripe_payment_intent_id", intent_id));
        }
        self.find_one(&Filter::or(clauses)).await
    }
}

impl Repository<Invoice> {
    pub async fn by_provider_id(&self, invoice_id: &str) -> StoreResult<Option<Invoice>> {
        self.find_one(&Filter::eq("stripe_invoice_id", invoice_id))
            .await
    }
}

// =============================================================================
// Webhook event log
// =============================================================================

/// Processed provider event ids.
#[derive(Clone)]
pub struct WebhookEventLog {
    store: Arc<dyn DocumentStore>,
}

impl WebhookEventLog {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Claim an event id. Returns false if it was already claimed.
    pub async fn claim(
        &self,
        event_id: &str,
        event_type: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let doc = json!({
            "id": event_id,
            "event_type": event_type,
            "received_at": to_value(now),
        });
        match self.store.insert_one(collections::WEBHOOK_EVENTS, doc).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_duplicate() => {
                debug!(event_id = %event_id, "Webhook event already processed");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Release a claim so a redelivery is processed again.
    pub async fn release(&self, event_id: &str) -> StoreResult<()> {
        self.store
            .delete_one(collections::WEBHOOK_EVENTS, &Filter::eq("id", event_id))
            .await?;
        Ok(())
    }
}

// =============================================================================
// Bundle
// =============================================================================

/// Every repository over one store.
#[derive(Clone)]
pub struct Repositories {
    pub store: Arc<dyn DocumentStore>,
    pub users: Repository<User>,
    pub content: Repository<Content>,
    pub plans: Repository<SubscriptionPlan>,
    pub subscriptions: Repository<Subscription>,
    pub payments: Repository<Payment>,
    pub invoices: Repository<Invoice>,
    pub usage: Repository<SubscriptionUsage>,
    pub webhook_events: WebhookEventLog,
}

impl Repositories {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        info!(backend = store.backend(), "Initializing repositories");
        Self {
            users: Repository::new(Arc::clone(&store), collections::USERS),
            content: Repository::new(Arc::clone(&store), collections::CONTENT),
            plans: Repository::new(Arc::clone(&store), collections::PLANS),
            subscriptions: Repository::new(Arc::clone(&store), collections::SUBSCRIPTIONS),
            payments: Repository::new(Arc::clone(&store), collections::PAYMENTS),
            invoices: Repository::new(Arc::clone(&store), collections::INVOICES),
            usage: Repository::new(Arc::clone(&store), collections::USAGE),
            webhook_events: WebhookEventLog::new(Arc::clone(&store)),
            store,
        }
    }
}
