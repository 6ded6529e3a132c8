//! Streaming entitlement predicates.
//!
//! These are pure functions over the user's subscription summary and the
//! referenced plan. Loading the plan is the caller's job.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::content::VideoQuality;
use crate::plan::SubscriptionPlan;
use crate::subscription::SubscriptionStatus;
use crate::user::{User, UserSubscription};

/// Why a streaming request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AccessDenial {
    NoSubscription,
    NotEntitled { status: SubscriptionStatus },
    PeriodEnded,
    PlanNotFound,
    QualityNotInPlan { quality: VideoQuality },
}

impl AccessDenial {
    /// Stable label for metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessDenial::NoSubscription => "no_subscription",
            AccessDenial::NotEntitled { .. } => "not_entitled",
            AccessDenial::PeriodEnded => "period_ended",
            AccessDenial::PlanNotFound => "plan_not_found",
            AccessDenial::QualityNotInPlan { .. } => "quality_not_in_plan",
        }
    }

    pub fn message(&self) -> String {
        match self {
            AccessDenial::NoSubscription => "An active subscription is required".to_string(),
            AccessDenial::NotEntitled { status } => {
                format!("Subscription is {} and does not allow streaming", status)
            }
            AccessDenial::PeriodEnded => "Subscription period has ended".to_string(),
            AccessDenial::PlanNotFound => "Subscription plan could not be resolved".to_string(),
            AccessDenial::QualityNotInPlan { quality } => {
                format!("Your plan does not include {} streaming", quality)
            }
        }
    }
}

/// Check the access rule against a subscription summary.
///
/// No grace period: `now` past `current_period_end` denies.
pub fn check_streaming_access(
    subscription: Option<&UserSubscription>,
    now: DateTime<Utc>,
) -> Result<(), AccessDenial> {
    let sub = subscription.ok_or(AccessDenial::NoSubscription)?;
    if !sub.status.is_entitled() {
        return Err(AccessDenial::NotEntitled { status: sub.status });
    }
    if now > sub.current_period_end {
        return Err(AccessDenial::PeriodEnded);
    }
    Ok(())
}

pub fn has_streaming_access(user: &User, now: DateTime<Utc>) -> bool {
    check_streaming_access(user.subscription.as_ref(), now).is_ok()
}

/// Check the quality rule. A missing plan fails closed.
///
/// The plan's `is_active` flag is not consulted: deactivating a
/// plan stops new sign-ups, not existing subscribers.
pub fn check_quality(
    plan: Option<&SubscriptionPlan>,
    quality: VideoQuality,
) -> Result<(), AccessDenial> {
    let plan = plan.ok_or(AccessDenial::PlanNotFound)?;
    if plan.allows_quality(quality) {
        Ok(())
    } else {
        Err(AccessDenial::QualityNotInPlan { quality })
    }
}

pub fn quality_allowed(plan: Option<&SubscriptionPlan>, quality: VideoQuality) -> bool {
    check_quality(plan, quality).is_ok()
}
