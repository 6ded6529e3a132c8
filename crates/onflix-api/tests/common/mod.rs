//! Shared fixtures for the HTTP integration tests.
//!
//! The app runs against the in-memory store and a scripted billing
//! provider, so no network or database is needed.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;

use onflix_api::services::{Email, Notifier};
use onflix_api::{create_router, ApiConfig, AppState};
use onflix_billing::{
    sign_payload, BillingError, BillingProvider, BillingResult, NewSubscription,
    ProviderCard, ProviderPaymentMethod, ProviderSubscription, SetupIntent,
};
use onflix_models::{Content, Role, SubscriptionPlan, SubscriptionStatus};
use onflix_store::{
    DocumentStore, Filter, FindOptions, GroupCount, MemoryStore, StoreError, StoreResult, Update,
};

pub const JWT_SECRET: &str = "integration-test-jwt-secret-with-enough-length";
pub const WEBHOOK_SECRET: &str = "whsec_integration_test";
pub const STREAM_SECRET: &str = "integration-test-stream-secret";
pub const PASSWORD: &str = "Str0ng!Passw0rd";
pub const TEST_CARD: &str = "pm_card_visa";

const PERIOD_DAYS: i64 = 30;

/// Billing provider that keeps subscriptions in memory.
#[derive(Default)]
pub struct FakeBilling {
    next_id: AtomicU64,
    subscriptions: Mutex<HashMap<String, ProviderSubscription>>,
    methods: Mutex<HashMap<String, Vec<ProviderPaymentMethod>>>,
    prices: Mutex<Vec<String>>,
}

impl FakeBilling {
    fn id(&self, prefix: &str) -> String {
        format!("{}_{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn missing(what: &str, id: &str) -> BillingError {
        BillingError::Rejected {
            status: 404,
            message: format!("No such {}: '{}'", what, id),
            code: Some("resource_missing".to_string()),
        }
    }

    pub fn subscription(&self, id: &str) -> Option<ProviderSubscription> {
        self.subscriptions.lock().unwrap().get(id).cloned()
    }

    pub fn created_prices(&self) -> Vec<String> {
        self.prices.lock().unwrap().clone()
    }
}

#[async_trait]
impl BillingProvider for FakeBilling {
    async fn create_customer(&self, _email: &str, _name: &str, _user_id: &str) -> BillingResult<String> {
        Ok(self.id("cus"))
    }

    async fn attach_payment_method(
        &self,
        payment_method_id: &str,
        customer_id: &str,
    ) -> BillingResult<()> {
        let mut methods = self.methods.lock().unwrap();
        let saved = methods.entry(customer_id.to_string()).or_default();
        if !saved.iter().any(|m| m.id == payment_method_id) {
            saved.push(ProviderPaymentMethod {
                id: payment_method_id.to_string(),
                method_type: "card".to_string(),
                card: Some(ProviderCard {
                    brand: "visa".to_string(),
                    last4: "4242".to_string(),
                    exp_month: 12,
                    exp_year: 2030,
                }),
            });
        }
        Ok(())
    }

    async fn create_subscription(
        &self,
        params: NewSubscription<'_>,
    ) -> BillingResult<ProviderSubscription> {
        let now = Utc::now().timestamp();
        let end = now + PERIOD_DAYS * 24 * 3600;
        let trial_end = params.trial_days.map(|d| now + i64::from(d) * 24 * 3600);

        let sub = ProviderSubscription {
            id: self.id("sub"),
            customer: params.customer_id.to_string(),
            status: if trial_end.is_some() {
                SubscriptionStatus::Trialing
            } else {
                SubscriptionStatus::Active
            },
            current_period_start: Some(now),
            current_period_end: Some(end),
            trial_start: trial_end.map(|_| now),
            trial_end,
            cancel_at: None,
            canceled_at: None,
            cancel_at_period_end: false,
            items: Default::default(),
        };
        self.subscriptions
            .lock()
            .unwrap()
            .insert(sub.id.clone(), sub.clone());
        Ok(sub)
    }

    async fn get_subscription(&self, subscription_id: &str) -> BillingResult<ProviderSubscription> {
        self.subscription(subscription_id)
            .ok_or_else(|| Self::missing("subscription", subscription_id))
    }

    async fn change_price(
        &self,
        subscription_id: &str,
        _new_price_id: &str,
    ) -> BillingResult<ProviderSubscription> {
        self.get_subscription(subscription_id).await
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        at_period_end: bool,
    ) -> BillingResult<ProviderSubscription> {
        let mut subs = self.subscriptions.lock().unwrap();
        let sub = subs
            .get_mut(subscription_id)
            .ok_or_else(|| Self::missing("subscription", subscription_id))?;
        if at_period_end {
            sub.cancel_at_period_end = true;
            sub.cancel_at = sub.current_period_end;
        } else {
            sub.status = SubscriptionStatus::Cancelled;
            sub.canceled_at = Some(Utc::now().timestamp());
        }
        Ok(sub.clone())
    }

    async fn create_price(
        &self,
        _product_name: &str,
        _description: &str,
        _unit_amount: i64,
        _currency: &str,
        _interval: Option<&str>,
    ) -> BillingResult<String> {
        let price = self.id("price");
        self.prices.lock().unwrap().push(price.clone());
        Ok(price)
    }

    async fn list_payment_methods(
        &self,
        customer_id: &str,
    ) -> BillingResult<Vec<ProviderPaymentMethod>> {
        Ok(self
            .methods
            .lock()
            .unwrap()
            .get(customer_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_setup_intent(&self, _customer_id: &str) -> BillingResult<SetupIntent> {
        let id = self.id("seti");
        Ok(SetupIntent {
            client_secret: format!("{}_secret", id),
            id,
        })
    }

    async fn detach_payment_method(&self, payment_method_id: &str) -> BillingResult<()> {
        for saved in self.methods.lock().unwrap().values_mut() {
            saved.retain(|m| m.id != payment_method_id);
        }
        Ok(())
    }

    async fn set_default_payment_method(
        &self,
        _customer_id: &str,
        _payment_method_id: &str,
    ) -> BillingResult<()> {
        Ok(())
    }
}

/// In-memory store whose writes to one collection can be made to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing: Mutex<Option<String>>,
}

impl FlakyStore {
    pub fn fail_writes_to(&self, collection: &str) {
        *self.failing.lock().unwrap() = Some(collection.to_string());
    }

    pub fn recover(&self) {
        *self.failing.lock().unwrap() = None;
    }

    fn check(&self, collection: &str) -> StoreResult<()> {
        match self.failing.lock().unwrap().as_deref() {
            Some(failing) if failing == collection => {
                Err(StoreError::connection(format!("{} is unavailable", collection)))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    fn backend(&self) -> &'static str {
        "flaky"
    }

    async fn find_one(&self, collection: &str, filter: &Filter) -> StoreResult<Option<Value>> {
        self.inner.find_one(collection, filter).await
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> StoreResult<Vec<Value>> {
        self.inner.find(collection, filter, options).await
    }

    async fn count(&self, collection: &str, filter: &Filter) -> StoreResult<u64> {
        self.inner.count(collection, filter).await
    }

    async fn insert_one(&self, collection: &str, document: Value) -> StoreResult<()> {
        self.check(collection)?;
        self.inner.insert_one(collection, document).await
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> StoreResult<u64> {
        self.check(collection)?;
        self.inner.update_one(collection, filter, update).await
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> StoreResult<u64> {
        self.check(collection)?;
        self.inner.update_many(collection, filter, update).await
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: &Filter,
        document: Value,
    ) -> StoreResult<u64> {
        self.check(collection)?;
        self.inner.replace_one(collection, filter, document).await
    }

    async fn delete_one(&self, collection: &str, filter: &Filter) -> StoreResult<u64> {
        self.check(collection)?;
        self.inner.delete_one(collection, filter).await
    }

    async fn group_count(
        &self,
        collection: &str,
        filter: &Filter,
        field: &str,
    ) -> StoreResult<Vec<GroupCount>> {
        self.inner.group_count(collection, filter, field).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }
}

/// Keeps every email instead of sending it.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Email>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, email: &Email) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub billing: Arc<FakeBilling>,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn test_config() -> ApiConfig {
    ApiConfig {
        jwt_secret: JWT_SECRET.to_string(),
        stripe_webhook_secret: WEBHOOK_SECRET.to_string(),
        stream_signing_secret: STREAM_SECRET.to_string(),
        stream_cdn_base_url: "https://cdn.test/media".to_string(),
        ..ApiConfig::default()
    }
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: ApiConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryStore::new())).await
    }

    pub async fn with_store(config: ApiConfig, store: Arc<dyn DocumentStore>) -> Self {
        let billing = Arc::new(FakeBilling::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let state = AppState::with_parts(config, store, billing.clone(), notifier.clone())
        .expect("app state");
        let router = create_router(state.clone(), None);
        Self {
            router,
            state,
            billing,
            notifier,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.expect("request")
    }

    /// Send a request and decode the JSON body (`Value::Null` when empty).
    pub async fn call(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");

        let response = self.send(request).await;
        let status = response.status();
        (status, read_json(response).await)
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.call("GET", uri, token, None).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.call("POST", uri, token, Some(body)).await
    }

    /// Register an account and return `(user_id, access_token)`.
    pub async fn register(&self, email: &str) -> (String, String) {
        let (status, body) = self
            .post(
                "/api/v1/auth/register",
                None,
                json!({
                    "email": email,
                    "password": PASSWORD,
                    "first_name": "Test",
                    "last_name": "Viewer",
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {}", body);
        (
            body["user"]["id"].as_str().unwrap().to_string(),
            body["access_token"].as_str().unwrap().to_string(),
        )
    }

    /// Register and promote to admin. Roles are read per request, so the
    /// token stays valid.
    pub async fn register_admin(&self, email: &str) -> (String, String) {
        let (id, token) = self.register(email).await;
        self.state
            .repos
            .users
            .update_by_id(&id, &Update::new().set("role", Role::Admin))
            .await
            .unwrap();
        (id, token)
    }

    /// Basic (480p), Standard (up to 1080p) and Premium (up to 4k).
    pub async fn seed_plans(&self) -> SeededPlans {
        let basic = plan("Basic", 8.99, &["480p"], 1, 1);
        let standard = plan("Standard", 13.99, &["480p", "720p", "1080p"], 2, 2);
        let premium = plan("Premium", 17.99, &["480p", "720p", "1080p", "4k"], 4, 4);
        for p in [&basic, &standard, &premium] {
            self.state.repos.plans.insert(p).await.unwrap();
        }
        SeededPlans {
            basic,
            standard,
            premium,
        }
    }

    pub async fn seed_movie(&self, title: &str) -> Content {
        let content = movie(title, "published");
        self.state.repos.content.insert(&content).await.unwrap();
        content
    }

    pub async fn seed_draft(&self, title: &str) -> Content {
        let content = movie(title, "draft");
        self.state.repos.content.insert(&content).await.unwrap();
        content
    }

    /// Subscribe with the test card and return the subscription JSON.
    pub async fn subscribe(&self, token: &str, plan_id: &str) -> Value {
        let (status, body) = self
            .post(
                "/api/v1/subscriptions/subscribe",
                Some(token),
                json!({"plan_id": plan_id, "payment_method_id": TEST_CARD}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "subscribe failed: {}", body);
        body["subscription"].clone()
    }

    /// Deliver a signed webhook event.
    pub async fn webhook(&self, event: &Value) -> (StatusCode, Value) {
        let payload = event.to_string();
        let signature =
            sign_payload(payload.as_bytes(), WEBHOOK_SECRET, Utc::now().timestamp()).unwrap();
        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/webhooks/stripe")
            .header("stripe-signature", signature)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(payload))
            .unwrap();
        let response = self.send(request).await;
        let status = response.status();
        (status, read_json(response).await)
    }
}

pub struct SeededPlans {
    pub basic: SubscriptionPlan,
    pub standard: SubscriptionPlan,
    pub premium: SubscriptionPlan,
}

pub async fn read_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
}

pub fn event(id: &str, event_type: &str, object: Value) -> Value {
    json!({
        "id": id,
        "type": event_type,
        "created": Utc::now().timestamp(),
        "data": {"object": object},
    })
}

fn plan(name: &str, price: f64, qualities: &[&str], profiles: u32, streams: u32) -> SubscriptionPlan {
    let now = Utc::now();
    serde_json::from_value(json!({
        "id": onflix_models::new_id(),
        "name": name,
        "description": format!("{} plan", name),
        "price": price,
        "currency": "usd",
        "interval": "monthly",
        "features": {
            "video_quality": qualities,
            "hd_support": qualities.contains(&"1080p"),
            "ultra_hd_support": qualities.contains(&"4k"),
            "ad_free": true,
        },
        "limits": {
            "max_profiles": profiles,
            "max_concurrent_streams": streams,
            "max_downloads": 0,
        },
        "stripe_price_id": format!("price_{}", name.to_lowercase()),
        "is_active": true,
        "sort_order": (price * 100.0) as i64,
        "created_at": now,
        "updated_at": now,
    }))
    .expect("plan fixture")
}

fn movie(title: &str, status: &str) -> Content {
    let now = Utc::now();
    let released = now - Duration::days(10);
    serde_json::from_value(json!({
        "id": onflix_models::new_id(),
        "title": title,
        "original_title": title,
        "description": format!("{} is a film used by the integration tests.", title),
        "type": "movie",
        "genres": ["drama"],
        "release_date": released,
        "runtime": 110,
        "rating": 7.5,
        "maturity_rating": "PG-13",
        "country": "US",
        "language": "en",
        "status": status,
        "videos": [
            video("trailer", "1080p", now),
            video("full", "1080p", now),
            video("full", "4k", now),
        ],
        "created_at": now,
        "updated_at": now,
    }))
    .expect("content fixture")
}

fn video(kind: &str, quality: &str, now: chrono::DateTime<Utc>) -> Value {
    json!({
        "id": onflix_models::new_id(),
        "title": format!("{} {}", kind, quality),
        "type": kind,
        "quality": quality,
        "duration": 6600,
        "file_url": format!("videos/{}/{}.m3u8", kind, quality),
        "is_default": quality == "1080p",
        "created_at": now,
    })
}
