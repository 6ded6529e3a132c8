//! Subscription plans.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::content::VideoQuality;

/// Billing interval of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlanInterval {
    #[default]
    Monthly,
    Yearly,
}

impl PlanInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanInterval::Monthly => "monthly",
            PlanInterval::Yearly => "yearly",
        }
    }

    /// Interval name used by the payment provider's price API.
    pub fn provider_interval(&self) -> &'static str {
        match self {
            PlanInterval::Monthly => "month",
            PlanInterval::Yearly => "year",
        }
    }
}

impl std::fmt::Display for PlanInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Feature flags of a plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlanFeatures {
    /// Qualities a subscriber may stream at.
    #[serde(default)]
    pub video_quality: Vec<VideoQuality>,
    #[serde(default)]
    pub hd_support: bool,
    #[serde(default)]
    pub ultra_hd_support: bool,
    #[serde(default)]
    pub download_support: bool,
    #[serde(default)]
    pub ad_free: bool,
    #[serde(default)]
    pub early_access: bool,
}

/// Numeric limits of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PlanLimits {
    pub max_profiles: u32,
    pub max_concurrent_streams: u32,
    pub max_downloads: u32,
}

impl Default for PlanLimits {
    fn default() -> Self {
        Self {
            max_profiles: 1,
            max_concurrent_streams: 1,
            max_downloads: 0,
        }
    }
}

/// A purchasable subscription tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SubscriptionPlan {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: f64,
    pub currency: String,
    pub interval: PlanInterval,
    #[serde(default)]
    pub features: PlanFeatures,
    #[serde(default)]
    pub limits: PlanLimits,
    #[serde(default)]
    pub stripe_price_id: String,
    /// Inactive plans cannot be subscribed to; existing subscriptions keep them.
    pub is_active: bool,
    #[serde(default)]
    pub is_popular: bool,
    #[serde(default)]
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionPlan {
    /// Whether this plan lets subscribers stream at `quality`.
    pub fn allows_quality(&self, quality: VideoQuality) -> bool {
        self.features.video_quality.contains(&quality)
    }

    /// Highest quality this plan allows, if any.
    pub fn best_quality(&self) -> Option<VideoQuality> {
        self.features.video_quality.iter().copied().max()
    }

    /// Price in the provider's minor currency unit.
    pub fn price_minor_units(&self) -> i64 {
        (self.price * 100.0).round() as i64
    }
}
