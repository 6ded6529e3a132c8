//! Shared domain models for the Onflix backend.
//!
//! This crate provides Serde-serializable types for:
//! - Users, profiles, watchlists and watch history
//! - The content catalog (movies, shows, seasons, episodes, videos)
//! - Subscription plans, subscriptions and the status state machine
//! - Usage periods, payments and invoices
//! - Entitlement predicates used to gate streaming

pub mod billing;
pub mod content;
pub mod entitlement;
pub mod error;
pub mod pagination;
pub mod plan;
pub mod subscription;
pub mod usage;
pub mod user;

// Re-export common types
pub use billing::{CardDetails, Invoice, InvoiceItem, InvoiceStatus, Payment, PaymentStatus};
pub use content::{
    best_full_video, full_video_at, CastMember, Content, ContentImages, ContentStatus, ContentType, ContentVideo, Episode, Season,
    Subtitle, VideoQuality, VideoType,
};
pub use entitlement::{
    check_quality, check_streaming_access, has_streaming_access, quality_allowed, AccessDenial,
};
pub use error::{ModelError, ModelResult};
pub use pagination::{PageParams, Paginated, Pagination, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
pub use plan::{PlanFeatures, PlanInterval, PlanLimits, SubscriptionPlan};
pub use subscription::{Subscription, SubscriptionStatus};
pub use usage::{SubscriptionUsage, UsagePeriod, Utilization, UtilizationEntry};
pub use user::{
    ProfilePreferences, Role, User, UserPreferences, UserProfile, UserSubscription,
    WatchHistoryItem, MAX_PROFILES_PER_USER,
};

/// Generate a new document identifier.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
