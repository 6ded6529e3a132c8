//! Domain services shared by the HTTP handlers.

pub mod catalog;
pub mod delivery;
pub mod entitlement;
pub mod lifecycle;
pub mod notifier;
pub mod tasks;
pub mod usage;
pub mod webhooks;

pub use catalog::CatalogService;
pub use delivery::{SignedStream, StreamClaims, StreamSigner};
pub use entitlement::EntitlementService;
pub use lifecycle::{StatusOverride, SubscribeParams, SubscriptionService};
pub use notifier::{Email, LogNotifier, Notifier};
pub use tasks::{BackgroundTask, TaskQueue, TaskWorker};
pub use usage::{UsageReport, UsageService};
pub use webhooks::{WebhookOutcome, WebhookService};
