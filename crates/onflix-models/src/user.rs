//! Users, viewing profiles and the denormalized subscription summary.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::subscription::{Subscription, SubscriptionStatus};

/// Maximum number of viewing profiles per account.
pub const MAX_PROFILES_PER_USER: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

/// Subscription summary stored on the user document for fast access checks.
///
/// Always rebuilt from a [`Subscription`] record, never edited field by field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UserSubscription {
    pub subscription_id: String,
    pub plan_id: String,
    pub stripe_customer_id: String,
    pub stripe_subscription_id: String,
    pub status: SubscriptionStatus,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    #[serde(default)]
    pub cancel_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Subscription> for UserSubscription {
    fn from(sub: &Subscription) -> Self {
        Self {
            subscription_id: sub.id.clone(),
            plan_id: sub.plan_id.clone(),
            stripe_customer_id: sub.stripe_customer_id.clone(),
            stripe_subscription_id: sub.stripe_subscription_id.clone(),
            status: sub.status,
            current_period_start: sub.current_period_start,
            current_period_end: sub.current_period_end,
            cancel_at: sub.cancel_at,
            cancelled_at: sub.cancelled_at,
            created_at: sub.created_at,
            updated_at: sub.updated_at,
        }
    }
}

impl UserSubscription {
    /// Entitled status and the paid-through period has not ended.
    pub fn grants_access(&self, now: DateTime<Utc>) -> bool {
        self.status.is_entitled() && now <= self.current_period_end
    }
}

/// A watch-history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WatchHistoryItem {
    pub content_id: String,
    /// Percentage watched (0-100).
    pub progress: f64,
    /// Total duration in seconds.
    #[serde(default)]
    pub duration: u32,
    pub watched_at: DateTime<Utc>,
    pub last_watched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProfilePreferences {
    #[serde(default)]
    pub maturity_rating: String,
    #[serde(default)]
    pub preferred_genres: Vec<String>,
    #[serde(default = "default_true")]
    pub auto_play: bool,
}

impl Default for ProfilePreferences {
    fn default() -> Self {
        Self {
            maturity_rating: String::new(),
            preferred_genres: Vec::new(),
            auto_play: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// A viewing profile owned by exactly one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub is_kids_profile: bool,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub watchlist: Vec<String>,
    #[serde(default)]
    pub watch_history: Vec<WatchHistoryItem>,
    #[serde(default)]
    pub preferences: ProfilePreferences,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: crate::new_id(),
            name: name.into(),
            avatar: String::new(),
            is_kids_profile: false,
            language: "en".to_string(),
            watchlist: Vec::new(),
            watch_history: Vec::new(),
            preferences: ProfilePreferences::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Add to the watchlist. Returns false if already present.
    pub fn add_to_watchlist(&mut self, content_id: &str, now: DateTime<Utc>) -> bool {
        if self.watchlist.iter().any(|id| id == content_id) {
            return false;
        }
        self.watchlist.push(content_id.to_string());
        self.updated_at = now;
        true
    }

    /// Remove from the watchlist. Returns false if absent.
    pub fn remove_from_watchlist(&mut self, content_id: &str, now: DateTime<Utc>) -> bool {
        let before = self.watchlist.len();
        self.watchlist.retain(|id| id != content_id);
        let removed = self.watchlist.len() != before;
        if removed {
            self.updated_at = now;
        }
        removed
    }

    /// Upsert a history entry for `content_id`.
    pub fn record_progress(
        &mut self,
        content_id: &str,
        progress: f64,
        duration: u32,
        now: DateTime<Utc>,
    ) {
        let progress = progress.clamp(0.0, 100.0);
        match self
            .watch_history
            .iter_mut()
            .find(|item| item.content_id == content_id)
        {
            Some(item) => {
                item.progress = progress;
                item.duration = duration;
                item.last_watched_at = now;
            }
            None => self.watch_history.push(WatchHistoryItem {
                content_id: content_id.to_string(),
                progress,
                duration,
                watched_at: now,
                last_watched_at: now,
            }),
        }
        self.updated_at = now;
    }

    /// History sorted most recent first.
    pub fn history_by_recency(&self) -> Vec<&WatchHistoryItem> {
        let mut items: Vec<_> = self.watch_history.iter().collect();
        items.sort_by(|a, b| b.last_watched_at.cmp(&a.last_watched_at));
        items
    }

    pub fn remove_history(&mut self, content_id: &str, now: DateTime<Utc>) -> bool {
        let before = self.watch_history.len();
        self.watch_history.retain(|item| item.content_id != content_id);
        let removed = self.watch_history.len() != before;
        if removed {
            self.updated_at = now;
        }
        removed
    }
}

/// Account-level preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UserPreferences {
    #[serde(default)]
    pub language: String,
    #[serde(default = "default_true")]
    pub auto_play: bool,
    #[serde(default = "default_true")]
    pub auto_play_previews: bool,
    #[serde(default)]
    pub data_saver: bool,
    #[serde(default)]
    pub preferred_genres: Vec<String>,
    #[serde(default)]
    pub maturity_rating: String,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            auto_play: true,
            auto_play_previews: true,
            data_saver: false,
            preferred_genres: Vec::new(),
            maturity_rating: String::new(),
        }
    }
}

/// An account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct User {
    pub id: String,
    pub email: String,
    /// Argon2 PHC string. Never returned by the API.
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub avatar: String,
    pub is_active: bool,
    #[serde(default)]
    pub is_email_verified: bool,
    #[serde(default)]
    pub email_verified_at: Option<DateTime<Utc>>,
    /// SHA-256 digest of the outstanding verification token.
    #[serde(default)]
    pub email_verification_token: Option<String>,
    #[serde(default)]
    pub email_verification_expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub role: Role,
    /// Provider customer, kept across subscriptions.
    #[serde(default)]
    pub stripe_customer_id: Option<String>,
    #[serde(default)]
    pub subscription: Option<UserSubscription>,
    #[serde(default)]
    pub profiles: Vec<UserProfile>,
    #[serde(default)]
    pub preferences: UserPreferences,
    #[serde(default)]
    pub last_login_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub password_reset_token: Option<String>,
    #[serde(default)]
    pub password_reset_expiry: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn profile(&self, profile_id: &str) -> Option<&UserProfile> {
        self.profiles.iter().find(|p| p.id == profile_id)
    }

    pub fn profile_mut(&mut self, profile_id: &str) -> Option<&mut UserProfile> {
        self.profiles.iter_mut().find(|p| p.id == profile_id)
    }

    pub fn can_add_profile(&self) -> bool {
        self.profiles.len() < MAX_PROFILES_PER_USER
    }

    /// The last remaining profile cannot be removed.
    pub fn can_remove_profile(&self) -> bool {
        self.profiles.len() > 1
    }

    /// Whether the user currently has a live (active or trialing) mirror.
    pub fn has_live_subscription(&self) -> bool {
        self.subscription
            .as_ref()
            .map(|s| SubscriptionStatus::LIVE.contains(&s.status))
            .unwrap_or(false)
    }
}
