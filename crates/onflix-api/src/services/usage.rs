//! Per-period usage accounting.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use onflix_models::{
    PlanLimits, Subscription, SubscriptionPlan, SubscriptionUsage, UsagePeriod, User,
    Utilization,
};
use onflix_store::{Repositories, Update};

use crate::error::{ApiError, ApiResult};

/// Usage for the current period against plan limits.
#[derive(Debug, Clone, Serialize)]
pub struct UsageReport {
    pub current_usage: SubscriptionUsage,
    pub limits: PlanLimits,
    pub utilization: Utilization,
}

#[derive(Clone)]
pub struct UsageService {
    repos: Repositories,
}

fn period_of(sub: &Subscription) -> UsagePeriod {
    UsagePeriod {
        start: sub.current_period_start,
        end: sub.current_period_end,
    }
}

impl UsageService {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }

    /// The record covering `now`, created with zeroed counters if absent.
    pub async fn current_record(
        &self,
        user: &User,
        sub: &Subscription,
        now: DateTime<Utc>,
    ) -> ApiResult<SubscriptionUsage> {
        if let Some(usage) = self.repos.usage.covering(&user.id, &sub.id, now).await? {
            return Ok(usage);
        }

        let mut usage = SubscriptionUsage::empty(&user.id, &sub.id, period_of(sub), now);
        usage.profiles_used = user.profiles.len() as u32;
        if let Err(e) = self.repos.usage.insert(&usage).await {
            // Concurrent first read created it already
            if e.is_duplicate() {
                if let Some(existing) = self.repos.usage.covering(&user.id, &sub.id, now).await? {
                    return Ok(existing);
                }
            }
            return Err(e.into());
        }
        debug!(user_id = %user.id, subscription_id = %sub.id, "Created usage record");
        Ok(usage)
    }

    /// Usage report for the subscription's plan.
    pub async fn report(
        &self,
        user: &User,
        sub: &Subscription,
        now: DateTime<Utc>,
    ) -> ApiResult<UsageReport> {
        let plan = self
            .repos
            .plans
            .get(&sub.plan_id)
            .await?
            .ok_or_else(|| ApiError::not_found("Subscription plan not found"))?;

        self.report_for_plan(user, sub, &plan, now).await
    }

    pub async fn report_for_plan(
        &self,
        user: &User,
        sub: &Subscription,
        plan: &SubscriptionPlan,
        now: DateTime<Utc>,
    ) -> ApiResult<UsageReport> {
        let usage = self.current_record(user, sub, now).await?;
        Ok(UsageReport {
            utilization: usage.utilization(&plan.limits),
            limits: plan.limits,
            current_usage: usage,
        })
    }

    /// Refresh the profile counter of an existing current-period record.
    pub async fn record_profiles(&self, user: &User, now: DateTime<Utc>) -> ApiResult<()> {
        let Some(summary) = &user.subscription else {
            return Ok(());
        };
        if let Some(usage) = self
            .repos
            .usage
            .covering(&user.id, &summary.subscription_id, now)
            .await?
        {
            let update = Update::new()
                .set("profiles_used", user.profiles.len() as u32)
                .set("updated_at", now);
            self.repos.usage.update_by_id(&usage.id, &update).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Duration;
    use onflix_models::{PlanInterval, SubscriptionStatus, UserProfile, UserSubscription};
    use onflix_store::MemoryStore;

    fn fixtures(now: DateTime<Utc>) -> (User, Subscription, SubscriptionPlan) {
        let sub = Subscription {
            id: "sub-1".to_string(),
            user_id: "user-1".to_string(),
            plan_id: "standard".to_string(),
            stripe_subscription_id: "sub_123".to_string(),
            stripe_customer_id: "cus_123".to_string(),
            status: SubscriptionStatus::Active,
            current_period_start: now - Duration::days(3),
            current_period_end: now + Duration::days(27),
            trial_start: None,
            trial_end: None,
            cancel_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            paused_at: None,
            resumed_at: None,
            auto_renew: true,
            created_at: now,
            updated_at: now,
        };
        let user = User {
            id: "user-1".to_string(),
            email: "viewer@example.com".to_string(),
            password_hash: String::new(),
            first_name: "Ada".to_string(),
            last_name: "Viewer".to_string(),
            phone: String::new(),
            avatar: String::new(),
            is_active: true,
            is_email_verified: false,
            email_verified_at: None,
            email_verification_token: None,
            email_verification_expiry: None,
            role: Default::default(),
            stripe_customer_id: Some("cus_123".to_string()),
            subscription: Some(UserSubscription::from(&sub)),
            profiles: vec![UserProfile::new("Main", now), UserProfile::new("Kids", now)],
            preferences: Default::default(),
            last_login_at: None,
            password_reset_token: None,
            password_reset_expiry: None,
            created_at: now,
            updated_at: now,
        };
        let mut plan = SubscriptionPlan {
            id: "standard".to_string(),
            name: "Standard".to_string(),
            description: String::new(),
            price: 15.49,
            currency: "usd".to_string(),
            interval: PlanInterval::Monthly,
            features: Default::default(),
            limits: Default::default(),
            stripe_price_id: "price_std".to_string(),
            is_active: true,
            is_popular: false,
            sort_order: 2,
            created_at: now,
            updated_at: now,
        };
        plan.limits.max_profiles = 4;
        plan.limits.max_downloads = 0;
        (user, sub, plan)
    }

    #[tokio::test]
    async fn test_report_creates_period_record_once() {
        let repos = Repositories::new(Arc::new(MemoryStore::new()));
        let now = Utc::now();
        let (user, sub, plan) = fixtures(now);
        repos.plans.insert(&plan).await.unwrap();
        let service = UsageService::new(repos.clone());

        let report = service.report(&user, &sub, now).await.unwrap();
        assert_eq!(report.current_usage.profiles_used, 2);
        assert_eq!(report.current_usage.period.start, sub.current_period_start);
        assert_eq!(report.utilization.profiles.percentage, 50.0);
        // Zero limit reports zero rather than dividing by it
        assert_eq!(report.utilization.downloads.percentage, 0.0);

        let again = service.report(&user, &sub, now).await.unwrap();
        assert_eq!(again.current_usage.id, report.current_usage.id);
        assert_eq!(repos.usage.count(&onflix_store::Filter::All).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_first_reads_share_one_record() {
        let repos = Repositories::new(Arc::new(MemoryStore::new()));
        let now = Utc::now();
        let (user, sub, _) = fixtures(now);
        let service = UsageService::new(repos.clone());

        let (a, b) = tokio::join!(
            service.current_record(&user, &sub, now),
            service.current_record(&user, &sub, now)
        );
        assert_eq!(a.unwrap().id, b.unwrap().id);
        assert_eq!(repos.usage.count(&onflix_store::Filter::All).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_report_requires_plan() {
        let repos = Repositories::new(Arc::new(MemoryStore::new()));
        let now = Utc::now();
        let (user, sub, _) = fixtures(now);
        let service = UsageService::new(repos);

        let err = service.report(&user, &sub, now).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
