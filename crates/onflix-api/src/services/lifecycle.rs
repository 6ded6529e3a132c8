//! Subscription lifecycle: subscribe, change plan, cancel, pause, resume.
//!
//! The `subscriptions` record is authoritative. After every write the
//! summary embedded on the user document is rebuilt from it wholesale, so
//! the two can only diverge if the second write fails. No multi-document
//! transaction is used.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use onflix_billing::{BillingProvider, NewSubscription, ProviderSubscription};
use onflix_models::{
    new_id, PlanInterval, Subscription, SubscriptionPlan, SubscriptionStatus, User,
    UserSubscription,
};
use onflix_store::{Repositories, Update};

use crate::error::{ApiError, ApiResult};
use crate::metrics;

/// Input for [`SubscriptionService::subscribe`].
#[derive(Debug, Clone)]
pub struct SubscribeParams<'a> {
    pub plan_id: &'a str,
    pub payment_method_id: &'a str,
    pub trial_days: Option<u32>,
}

/// Admin correction applied by [`SubscriptionService::admin_override`].
#[derive(Debug, Clone)]
pub struct StatusOverride {
    pub status: SubscriptionStatus,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
}

#[derive(Clone)]
pub struct SubscriptionService {
    repos: Repositories,
    billing: Arc<dyn BillingProvider>,
}

fn fallback_period_end(start: DateTime<Utc>, interval: PlanInterval) -> DateTime<Utc> {
    match interval {
        PlanInterval::Monthly => start + Duration::days(30),
        PlanInterval::Yearly => start + Duration::days(365),
    }
}

/// Copy provider-reported fields onto a local record.
///
/// The status is only taken when the lifecycle allows the move, so a late
/// or out-of-order event cannot revive a cancelled subscription. Periods and
/// cancellation timestamps are synced either way. Returns whether the
/// status changed.
pub fn sync_from_provider(
    sub: &mut Subscription,
    provider: &ProviderSubscription,
    now: DateTime<Utc>,
) -> bool {
    let previous = sub.status;
    if provider.status != sub.status {
        if let Err(e) = sub.transition_to(provider.status, now) {
            warn!(
                subscription_id = %sub.id,
                error = %e,
                "Ignoring provider status change"
            );
        }
    }

    if let Some(start) = provider.period_start() {
        sub.current_period_start = start;
    }
    if let Some(end) = provider.period_end() {
        sub.current_period_end = end;
    }
    if let Some(trial_start) = provider.trial_start_at() {
        sub.trial_start = Some(trial_start);
    }
    if let Some(trial_end) = provider.trial_end_at() {
        sub.trial_end = Some(trial_end);
    }
    if let Some(cancel_at) = provider.cancel_at_time() {
        sub.cancel_at = Some(cancel_at);
    }
    if let Some(cancelled_at) = provider.canceled_at_time() {
        sub.cancelled_at = Some(cancelled_at);
    }
    if provider.cancel_at_period_end {
        sub.auto_renew = false;
    }
    sub.updated_at = now;

    sub.status != previous
}

impl SubscriptionService {
    pub fn new(repos: Repositories, billing: Arc<dyn BillingProvider>) -> Self {
        Self { repos, billing }
    }

    /// The record behind the user's summary, or their most recent one.
    pub async fn current_record(&self, user: &User) -> ApiResult<Subscription> {
        if let Some(mirror) = &user.subscription {
            if let Some(sub) = self.repos.subscriptions.get(&mirror.subscription_id).await? {
                return Ok(sub);
            }
            warn!(
                user_id = %user.id,
                subscription_id = %mirror.subscription_id,
                "Subscription summary points at a missing record"
            );
        }
        self.repos
            .subscriptions
            .latest_for_user(&user.id)
            .await?
            .ok_or_else(|| ApiError::not_found("Subscription not found"))
    }

    async fn active_plan(&self, plan_id: &str) -> ApiResult<SubscriptionPlan> {
        self.repos
            .plans
            .get(plan_id)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| ApiError::not_found("Subscription plan not found"))
    }

    /// Reuse the account's provider customer or create one.
    pub async fn ensure_customer(&self, user: &User, now: DateTime<Utc>) -> ApiResult<String> {
        let existing = user.stripe_customer_id.clone().or_else(|| {
            user.subscription
                .as_ref()
                .map(|s| s.stripe_customer_id.clone())
                .filter(|id| !id.is_empty())
        });
        if let Some(id) = existing {
            return Ok(id);
        }

        let name = format!("{} {}", user.first_name, user.last_name);
        let customer_id = self
            .billing
            .create_customer(&user.email, name.trim(), &user.id)
            .await?;
        self.repos
            .users
            .update_by_id(
                &user.id,
                &Update::new()
                    .set("stripe_customer_id", &customer_id)
                    .set("updated_at", now),
            )
            .await?;
        info!(user_id = %user.id, customer_id = %customer_id, "Created provider customer");
        Ok(customer_id)
    }

    /// Start a new subscription.
    ///
    /// Refused with 409 while the user has an active or trialing one.
    pub async fn subscribe(
        &self,
        user: &User,
        params: SubscribeParams<'_>,
        now: DateTime<Utc>,
    ) -> ApiResult<(Subscription, SubscriptionPlan)> {
        if self.repos.subscriptions.live_for_user(&user.id).await?.is_some() {
            return Err(ApiError::conflict("User already has an active subscription"));
        }

        let plan = self.active_plan(params.plan_id).await?;
        if plan.stripe_price_id.is_empty() {
            return Err(ApiError::internal(format!(
                "Plan {} has no provider price",
                plan.id
            )));
        }

        let customer_id = self.ensure_customer(user, now).await?;

        self.billing
            .attach_payment_method(params.payment_method_id, &customer_id)
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to attach payment method: {}", e)))?;

        let provider = self
            .billing
            .create_subscription(NewSubscription {
                customer_id: &customer_id,
                price_id: &plan.stripe_price_id,
                payment_method_id: params.payment_method_id,
                trial_days: params.trial_days.filter(|d| *d > 0),
            })
            .await?;

        let period_start = provider.period_start().unwrap_or(now);
        let subscription = Subscription {
            id: new_id(),
            user_id: user.id.clone(),
            plan_id: plan.id.clone(),
            stripe_subscription_id: provider.id.clone(),
            stripe_customer_id: customer_id,
            status: provider.status,
            current_period_start: period_start,
            current_period_end: provider
                .period_end()
                .unwrap_or_else(|| fallback_period_end(period_start, plan.interval)),
            trial_start: provider.trial_start_at(),
            trial_end: provider.trial_end_at(),
            cancel_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            paused_at: None,
            resumed_at: None,
            auto_renew: true,
            created_at: now,
            updated_at: now,
        };

        self.repos.subscriptions.insert(&subscription).await?;
        self.sync_mirror(&subscription, now).await?;

        metrics::record_transition(subscription.status.as_str(), "subscribe");
        info!(
            user_id = %user.id,
            subscription_id = %subscription.id,
            plan_id = %plan.id,
            status = %subscription.status,
            "Subscription created"
        );

        Ok((subscription, plan))
    }

    /// Move the subscription to another active plan. Status is unchanged.
    pub async fn change_plan(
        &self,
        user: &User,
        plan_id: &str,
        now: DateTime<Utc>,
    ) -> ApiResult<(Subscription, SubscriptionPlan)> {
        let mut sub = self.current_record(user).await?;
        if sub.status.is_terminal() {
            return Err(ApiError::conflict(format!(
                "Cannot change plan of a {} subscription",
                sub.status
            )));
        }
        let plan = self.active_plan(plan_id).await?;

        self.billing
            .change_price(&sub.stripe_subscription_id, &plan.stripe_price_id)
            .await?;

        sub.plan_id = plan.id.clone();
        sub.updated_at = now;
        self.persist(&sub, now).await?;

        info!(
            user_id = %user.id,
            subscription_id = %sub.id,
            plan_id = %plan.id,
            "Subscription plan changed"
        );
        Ok((sub, plan))
    }

    /// Cancel now, or at the end of the paid period.
    ///
    /// A deferred cancellation keeps the current status; the provider's
    /// `customer.subscription.deleted` event ends it later.
    pub async fn cancel(
        &self,
        user: &User,
        immediate: bool,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> ApiResult<Subscription> {
        let mut sub = self.current_record(user).await?;
        if sub.status.is_terminal() {
            return Err(ApiError::conflict(format!(
                "Subscription is already {}",
                sub.status
            )));
        }

        let provider = self
            .billing
            .cancel_subscription(&sub.stripe_subscription_id, !immediate)
            .await?;

        if immediate {
            sub.cancel_now(reason, now)?;
            metrics::record_transition(sub.status.as_str(), "cancel");
        } else {
            let cancel_at = provider.cancel_at_time().unwrap_or(sub.current_period_end);
            sub.schedule_cancel(cancel_at, reason, now)?;
        }
        self.persist(&sub, now).await?;

        info!(
            user_id = %user.id,
            subscription_id = %sub.id,
            immediate,
            "Subscription cancelled"
        );
        Ok(sub)
    }

    /// Pause locally. The provider subscription is not touched.
    pub async fn pause(&self, user: &User, now: DateTime<Utc>) -> ApiResult<Subscription> {
        let mut sub = self.current_record(user).await?;
        sub.pause(now)?;
        self.persist(&sub, now).await?;
        metrics::record_transition(sub.status.as_str(), "pause");
        info!(user_id = %user.id, subscription_id = %sub.id, "Subscription paused");
        Ok(sub)
    }

    pub async fn resume(&self, user: &User, now: DateTime<Utc>) -> ApiResult<Subscription> {
        let mut sub = self.current_record(user).await?;
        sub.resume(now)?;
        self.persist(&sub, now).await?;
        metrics::record_transition(sub.status.as_str(), "resume");
        info!(user_id = %user.id, subscription_id = %sub.id, "Subscription resumed");
        Ok(sub)
    }

    /// Set status and period end on the local record only. Moves follow the
    /// same lifecycle table as user actions, so a cancelled record stays
    /// cancelled.
    pub async fn admin_override(
        &self,
        user: &User,
        change: StatusOverride,
        now: DateTime<Utc>,
    ) -> ApiResult<Subscription> {
        let mut sub = self.current_record(user).await?;
        let previous = sub.status;

        if let Some(end) = change.current_period_end {
            if end <= sub.current_period_start {
                return Err(ApiError::bad_request(
                    "current_period_end must be after the period start",
                ));
            }
            sub.current_period_end = end;
            sub.updated_at = now;
        }

        if change.status != previous {
            match change.status {
                SubscriptionStatus::Cancelled => sub.cancel_now(change.cancellation_reason, now)?,
                SubscriptionStatus::Paused => sub.pause(now)?,
                SubscriptionStatus::Active if previous == SubscriptionStatus::Paused => {
                    sub.resume(now)?
                }
                next => sub.transition_to(next, now)?,
            }
            metrics::record_transition(sub.status.as_str(), "admin");
        }
        self.persist(&sub, now).await?;

        info!(
            user_id = %user.id,
            subscription_id = %sub.id,
            from = previous.as_str(),
            to = sub.status.as_str(),
            "Subscription overridden by admin"
        );
        Ok(sub)
    }

    /// Write the record, then rebuild the user's summary from it.
    pub async fn persist(&self, sub: &Subscription, now: DateTime<Utc>) -> ApiResult<()> {
        if !self.repos.subscriptions.replace(&sub.id, sub).await? {
            return Err(ApiError::not_found("Subscription not found"));
        }
        self.sync_mirror(sub, now).await
    }

    /// Rebuild the summary unless it already tracks a newer live subscription.
    async fn sync_mirror(&self, sub: &Subscription, now: DateTime<Utc>) -> ApiResult<()> {
        let Some(user) = self.repos.users.get(&sub.user_id).await? else {
            warn!(user_id = %sub.user_id, subscription_id = %sub.id, "Subscription owner not found");
            return Ok(());
        };

        let tracked = user.subscription.as_ref().map(|m| m.subscription_id.as_str());
        let owns_summary = tracked.is_none()
            || tracked == Some(sub.id.as_str())
            || SubscriptionStatus::LIVE.contains(&sub.status);
        if !owns_summary {
            debug!(
                user_id = %user.id,
                subscription_id = %sub.id,
                "Summary tracks another subscription; left unchanged"
            );
            return Ok(());
        }

        let mirror = UserSubscription::from(sub);
        self.repos
            .users
            .set_subscription_mirror(&user.id, Some(&mirror), now)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(status: SubscriptionStatus) -> Subscription {
        let now = Utc::now();
        Subscription {
            id: "sub-1".to_string(),
            user_id: "user-1".to_string(),
            plan_id: "plan-1".to_string(),
            stripe_subscription_id: "sub_123".to_string(),
            stripe_customer_id: "cus_123".to_string(),
            status,
            current_period_start: now,
            current_period_end: now + Duration::days(30),
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
        }
    }

    fn provider(status: &str) -> ProviderSubscription {
        serde_json::from_value(json!({
            "id": "sub_123",
            "customer": "cus_123",
            "status": status,
            "current_period_start": 1_700_000_000,
            "current_period_end": 1_702_592_000,
            "cancel_at": 1_702_592_000,
        }))
        .unwrap()
    }

    #[test]
    fn test_sync_applies_allowed_status() {
        let mut sub = record(SubscriptionStatus::Active);
        assert!(sync_from_provider(&mut sub, &provider("past_due"), Utc::now()));
        assert_eq!(sub.status, SubscriptionStatus::PastDue);
        assert_eq!(sub.current_period_end.timestamp(), 1_702_592_000);
        assert_eq!(sub.cancel_at.unwrap().timestamp(), 1_702_592_000);
    }

    #[test]
    fn test_sync_never_revives_cancelled() {
        let mut sub = record(SubscriptionStatus::Cancelled);
        assert!(!sync_from_provider(&mut sub, &provider("active"), Utc::now()));
        assert_eq!(sub.status, SubscriptionStatus::Cancelled);
        // Periods still follow the provider
        assert_eq!(sub.current_period_start.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_fallback_period() {
        let start = Utc::now();
        assert_eq!(
            fallback_period_end(start, PlanInterval::Yearly) - start,
            Duration::days(365)
        );
    }
}
