//! Subscription records and the subscription status state machine.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// Billing status of a subscription.
///
/// Values mirror the payment provider's subscription status, except that
/// the provider's `canceled` spelling is stored as `cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Incomplete,
    IncompleteExpired,
    Trialing,
    Active,
    PastDue,
    Unpaid,
    Paused,
    #[serde(alias = "canceled")]
    Cancelled,
}

impl SubscriptionStatus {
    pub const ALL: [SubscriptionStatus; 8] = [
        SubscriptionStatus::Incomplete,
        SubscriptionStatus::IncompleteExpired,
        SubscriptionStatus::Trialing,
        SubscriptionStatus::Active,
        SubscriptionStatus::PastDue,
        SubscriptionStatus::Unpaid,
        SubscriptionStatus::Paused,
        SubscriptionStatus::Cancelled,
    ];

    /// Statuses that count toward the one-live-subscription-per-user rule.
    pub const LIVE: [SubscriptionStatus; 2] =
        [SubscriptionStatus::Active, SubscriptionStatus::Trialing];

    /// Parse from a stored or provider-reported string.
    pub fn parse(s: &str) -> ModelResult<Self> {
        match s.to_lowercase().as_str() {
            "incomplete" => Ok(Self::Incomplete),
            "incomplete_expired" => Ok(Self::IncompleteExpired),
            "trialing" => Ok(Self::Trialing),
            "active" => Ok(Self::Active),
            "past_due" => Ok(Self::PastDue),
            "unpaid" => Ok(Self::Unpaid),
            "paused" => Ok(Self::Paused),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => Err(ModelError::unknown("subscription status", other)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incomplete => "incomplete",
            Self::IncompleteExpired => "incomplete_expired",
            Self::Trialing => "trialing",
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Unpaid => "unpaid",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
        }
    }

    /// Active and trialing subscriptions grant streaming access.
    pub fn is_entitled(&self) -> bool {
        matches!(self, Self::Active | Self::Trialing)
    }

    /// No further transitions are possible from a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::IncompleteExpired)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// Staying in the same status is always allowed.
    pub fn can_transition_to(&self, next: SubscriptionStatus) -> bool {
        use SubscriptionStatus::*;

        if *self == next {
            return true;
        }

        match (self, next) {
            (Incomplete, Trialing | Active | IncompleteExpired | Cancelled) => true,
            (Trialing, Active | PastDue | Unpaid | Paused | Cancelled) => true,
            (Active, PastDue | Unpaid | Paused | Cancelled) => true,
            (PastDue, Active | Unpaid | Cancelled) => true,
            (Unpaid, Active | Cancelled) => true,
            (Paused, Active | Cancelled) => true,
            _ => false,
        }
    }

    /// Validate a transition, returning the target status on success.
    pub fn transition(self, next: SubscriptionStatus) -> ModelResult<SubscriptionStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(ModelError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Billing relationship between a user and a plan.
///
/// Mirrors a provider-side subscription object. This record is the source
/// of truth; the summary embedded on the user document is derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Subscription {
    pub id: String,
    pub user_id: String,
    pub plan_id: String,
    pub stripe_subscription_id: String,
    pub stripe_customer_id: String,
    pub status: SubscriptionStatus,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    #[serde(default)]
    pub trial_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub trial_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancel_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancellation_reason: Option<String>,
    #[serde(default)]
    pub paused_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resumed_at: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub auto_renew: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl Subscription {
    /// Move to `next`, enforcing the lifecycle table.
    pub fn transition_to(&mut self, next: SubscriptionStatus, now: DateTime<Utc>) -> ModelResult<()> {
        self.status = self.status.transition(next)?;
        self.updated_at = now;
        Ok(())
    }

    /// Cancel right away.
    pub fn cancel_now(&mut self, reason: Option<String>, now: DateTime<Utc>) -> ModelResult<()> {
        if self.status.is_terminal() {
            return Err(ModelError::InvalidTransition {
                from: self.status,
                to: SubscriptionStatus::Cancelled,
            });
        }
        self.transition_to(SubscriptionStatus::Cancelled, now)?;
        self.cancelled_at = Some(now);
        self.cancellation_reason = reason;
        self.auto_renew = false;
        Ok(())
    }

    /// Schedule cancellation at `cancel_at`; status is left to the provider.
    pub fn schedule_cancel(
        &mut self,
        cancel_at: DateTime<Utc>,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> ModelResult<()> {
        if self.status.is_terminal() {
            return Err(ModelError::InvalidTransition {
                from: self.status,
                to: SubscriptionStatus::Cancelled,
            });
        }
        self.cancel_at = Some(cancel_at);
        self.cancellation_reason = reason;
        self.auto_renew = false;
        self.updated_at = now;
        Ok(())
    }

    /// Pause an active or trialing subscription.
    pub fn pause(&mut self, now: DateTime<Utc>) -> ModelResult<()> {
        self.transition_to(SubscriptionStatus::Paused, now)?;
        self.paused_at = Some(now);
        Ok(())
    }

    /// Resume a paused subscription.
    pub fn resume(&mut self, now: DateTime<Utc>) -> ModelResult<()> {
        if self.status != SubscriptionStatus::Paused {
            return Err(ModelError::InvalidTransition {
                from: self.status,
                to: SubscriptionStatus::Active,
            });
        }
        self.transition_to(SubscriptionStatus::Active, now)?;
        self.resumed_at = Some(now);
        Ok(())
    }
}
