//! Per-period usage accounting.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::plan::PlanLimits;

/// Billing window a usage record covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct UsagePeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl UsagePeriod {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}

/// Consumption counters for one user in one billing period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SubscriptionUsage {
    pub id: String,
    pub subscription_id: String,
    pub user_id: String,
    pub period: UsagePeriod,
    /// Tracked but not enforced.
    #[serde(default)]
    pub streaming_hours: f64,
    #[serde(default)]
    pub downloads: u32,
    #[serde(default)]
    pub profiles_used: u32,
    #[serde(default)]
    pub concurrent_peak: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionUsage {
    /// Zeroed counters for a fresh period.
    pub fn empty(
        user_id: impl Into<String>,
        subscription_id: impl Into<String>,
        period: UsagePeriod,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: crate::new_id(),
            subscription_id: subscription_id.into(),
            user_id: user_id.into(),
            period,
            streaming_hours: 0.0,
            downloads: 0,
            profiles_used: 0,
            concurrent_peak: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn utilization(&self, limits: &PlanLimits) -> Utilization {
        Utilization {
            profiles: UtilizationEntry::new(self.profiles_used, limits.max_profiles),
            downloads: UtilizationEntry::new(self.downloads, limits.max_downloads),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UtilizationEntry {
    pub used: u32,
    pub limit: u32,
    pub percentage: f64,
}

impl UtilizationEntry {
    pub fn new(used: u32, limit: u32) -> Self {
        Self {
            used,
            limit,
            percentage: percentage(used, limit),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Utilization {
    pub profiles: UtilizationEntry,
    pub downloads: UtilizationEntry,
}

/// `used / limit * 100`, or 0 when the limit is 0.
pub fn percentage(used: u32, limit: u32) -> f64 {
    if limit == 0 {
        return 0.0;
    }
    (used as f64 / limit as f64) * 100.0
}
