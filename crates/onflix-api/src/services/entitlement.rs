//! Streaming entitlement checks against stored plans.

use chrono::{DateTime, Utc};
use tracing::info;

use onflix_models::{
    check_quality, check_streaming_access, AccessDenial, SubscriptionPlan, User, VideoQuality,
};
use onflix_store::Repositories;

use crate::error::{ApiError, ApiResult};
use crate::metrics;

#[derive(Clone)]
pub struct EntitlementService {
    repos: Repositories,
}

fn deny(user: &User, denial: AccessDenial) -> ApiError {
    info!(user_id = %user.id, reason = denial.as_str(), "Streaming denied");
    metrics::record_entitlement_denial(denial.as_str());
    ApiError::Denied(denial)
}

impl EntitlementService {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }

    /// Subscription status and period allow streaming right now.
    pub fn authorize(&self, user: &User, now: DateTime<Utc>) -> ApiResult<()> {
        check_streaming_access(user.subscription.as_ref(), now).map_err(|d| deny(user, d))
    }

    /// The plan behind the user's subscription, active or not.
    pub async fn plan_for(&self, user: &User) -> ApiResult<Option<SubscriptionPlan>> {
        match &user.subscription {
            Some(sub) => Ok(self.repos.plans.get(&sub.plan_id).await?),
            None => Ok(None),
        }
    }

    /// The user's plan includes `quality`. A missing plan denies.
    pub async fn authorize_quality(
        &self,
        user: &User,
        quality: VideoQuality,
    ) -> ApiResult<SubscriptionPlan> {
        let plan = self.plan_for(user).await?;
        check_quality(plan.as_ref(), quality).map_err(|d| deny(user, d))?;
        plan.ok_or_else(|| deny(user, AccessDenial::PlanNotFound))
    }
}
