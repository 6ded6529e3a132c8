//! Application state.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use onflix_billing::{BillingProvider, StripeClient};
use onflix_store::{DocumentStore, MemoryStore, MongoStore, Repositories};

use crate::auth::JwtKeys;
use crate::config::{ApiConfig, StoreBackend};
use crate::services::{
    CatalogService, EntitlementService, LogNotifier, Notifier, StreamSigner, SubscriptionService,
    TaskQueue, TaskWorker, UsageService, WebhookService,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub repos: Repositories,
    pub billing: Arc<dyn BillingProvider>,
    pub jwt: Arc<JwtKeys>,
    pub tasks: TaskQueue,
    pub catalog: CatalogService,
    pub entitlements: EntitlementService,
    pub subscriptions: SubscriptionService,
    pub usage: UsageService,
    pub webhooks: WebhookService,
    pub delivery: Arc<StreamSigner>,
}

impl AppState {
    /// Create new application state from the environment.
    pub async fn new(config: ApiConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn DocumentStore> = match config.store_backend {
            StoreBackend::Mongo => {
                let mongo = MongoStore::from_env()
                    .await
                    .context("Failed to connect to MongoDB")?;
                mongo
                    .ensure_indexes()
                    .await
                    .context("Failed to create MongoDB indexes")?;
                Arc::new(mongo)
            }
            StoreBackend::Memory => {
                warn!("Using the in-memory store; data is lost on restart");
                Arc::new(MemoryStore::new())
            }
        };

        let stripe = StripeClient::from_env().context("Failed to build Stripe client")?;
        if !stripe.config().is_configured() {
            warn!("STRIPE_SECRET_KEY not set; billing calls will fail");
        }

        Self::with_parts(config, store, Arc::new(stripe), Arc::new(LogNotifier))
    }

    /// Assemble state from explicit backends and start the background worker.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn with_parts(
        config: ApiConfig,
        store: Arc<dyn DocumentStore>,
        billing: Arc<dyn BillingProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> anyhow::Result<Self> {
        let repos = Repositories::new(store);

        let (tasks, rx) = TaskQueue::channel(config.task_queue_capacity);
        TaskWorker::new(rx, repos.clone(), Arc::clone(&billing), notifier).spawn();

        let delivery = StreamSigner::new(
            config.stream_signing_secret.clone(),
            &config.stream_cdn_base_url,
            config.stream_url_expiry,
            config.stream_token_expiry,
        )
        .context("Invalid STREAM_CDN_BASE_URL")?;

        let jwt = JwtKeys::new(&config.jwt_secret, config.jwt_expiry);
        let subscriptions = SubscriptionService::new(repos.clone(), Arc::clone(&billing));
        let webhooks = WebhookService::new(repos.clone(), subscriptions.clone(), tasks.clone());

        info!(
            backend = repos.store.backend(),
            queue_capacity = config.task_queue_capacity,
            "Application state initialized"
        );

        Ok(Self {
            catalog: CatalogService::new(repos.clone()),
            entitlements: EntitlementService::new(repos.clone()),
            usage: UsageService::new(repos.clone()),
            subscriptions,
            webhooks,
            delivery: Arc::new(delivery),
            jwt: Arc::new(jwt),
            tasks,
            billing,
            repos,
            config,
        })
    }
}
