//! Maps verified provider events onto local records.
//!
//! Each event id is claimed in `webhook_events` before processing so a
//! redelivery is a no-op. A failure releases the claim and surfaces as an
//! error, letting the provider retry the delivery.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use onflix_billing::{InvoiceObject, PaymentIntentObject, ProviderSubscription, WebhookEnvelope, WebhookEvent};
use onflix_models::{
    new_id, Invoice, InvoiceItem, InvoiceStatus, Payment, PaymentStatus, Subscription,
    SubscriptionStatus, User,
};
use onflix_store::{Repositories, Update};

use crate::error::ApiResult;
use crate::metrics;
use crate::services::lifecycle::{sync_from_provider, SubscriptionService};
use crate::services::notifier::Email;
use crate::services::tasks::TaskQueue;

/// How an event was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Processed,
    /// Already processed under the same event id.
    Duplicate,
    /// Event type this platform does not act on.
    Ignored,
    /// No local record matches the provider object.
    UnknownRecord,
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Processed => "processed",
            WebhookOutcome::Duplicate => "duplicate",
            WebhookOutcome::Ignored => "ignored",
            WebhookOutcome::UnknownRecord => "unknown_record",
        }
    }
}

fn major_units(minor: i64) -> f64 {
    minor as f64 / 100.0
}

fn invoice_status(raw: Option<&str>, fallback: InvoiceStatus) -> InvoiceStatus {
    raw.and_then(|s| serde_json::from_value(Value::String(s.to_string())).ok())
        .unwrap_or(fallback)
}

#[derive(Clone)]
pub struct WebhookService {
    repos: Repositories,
    lifecycle: SubscriptionService,
    tasks: TaskQueue,
}

impl WebhookService {
    pub fn new(repos: Repositories, lifecycle: SubscriptionService, tasks: TaskQueue) -> Self {
        Self {
            repos,
            lifecycle,
            tasks,
        }
    }

    /// Process one verified event.
    pub async fn process(
        &self,
        envelope: &WebhookEnvelope,
        now: DateTime<Utc>,
    ) -> ApiResult<WebhookOutcome> {
        let event_type = envelope.event_type.as_str();

        if matches!(envelope.event, WebhookEvent::Unhandled) {
            debug!(event_id = %envelope.id, event_type, "Unhandled webhook event type");
            metrics::record_webhook_event(event_type, WebhookOutcome::Ignored.as_str());
            return Ok(WebhookOutcome::Ignored);
        }

        if !self
            .repos
            .webhook_events
            .claim(&envelope.id, event_type, now)
            .await?
        {
            metrics::record_webhook_event(event_type, WebhookOutcome::Duplicate.as_str());
            return Ok(WebhookOutcome::Duplicate);
        }

        match self.dispatch(&envelope.event, now).await {
            Ok(outcome) => {
                info!(
                    event_id = %envelope.id,
                    event_type,
                    outcome = outcome.as_str(),
                    "Webhook event handled"
                );
                metrics::record_webhook_event(event_type, outcome.as_str());
                Ok(outcome)
            }
            Err(e) => {
                error!(event_id = %envelope.id, event_type, error = %e, "Webhook handler failed");
                metrics::record_webhook_event(event_type, "failed");
                if let Err(release_err) = self.repos.webhook_events.release(&envelope.id).await {
                    error!(
                        event_id = %envelope.id,
                        error = %release_err,
                        "Failed to release webhook claim"
                    );
                }
                Err(e)
            }
        }
    }

    async fn dispatch(&self, event: &WebhookEvent, now: DateTime<Utc>) -> ApiResult<WebhookOutcome> {
        match event {
            WebhookEvent::SubscriptionCreated(p) => self.subscription_synced(p, true, now).await,
            WebhookEvent::SubscriptionUpdated(p) => self.subscription_synced(p, false, now).await,
            WebhookEvent::SubscriptionDeleted(p) => self.subscription_deleted(p, now).await,
            WebhookEvent::InvoicePaymentSucceeded(inv) => self.invoice_paid(inv, now).await,
            WebhookEvent::InvoicePaymentFailed(inv) => self.invoice_failed(inv, now).await,
            WebhookEvent::PaymentIntentSucceeded(pi) => {
                self.payment_intent(pi, PaymentStatus::Succeeded, now).await
            }
            WebhookEvent::PaymentIntentFailed(pi) => {
                self.payment_intent(pi, PaymentStatus::Failed, now).await
            }
            WebhookEvent::Unhandled => Ok(WebhookOutcome::Ignored),
        }
    }

    async fn local_subscription(&self, provider_id: &str) -> ApiResult<Option<Subscription>> {
        let sub = self.repos.subscriptions.by_provider_id(provider_id).await?;
        if sub.is_none() {
            warn!(stripe_subscription_id = %provider_id, "No local subscription for provider object");
        }
        Ok(sub)
    }

    async fn owner(&self, sub: &Subscription) -> ApiResult<Option<User>> {
        Ok(self.repos.users.get(&sub.user_id).await?)
    }

    async fn subscription_synced(
        &self,
        provider: &ProviderSubscription,
        created: bool,
        now: DateTime<Utc>,
    ) -> ApiResult<WebhookOutcome> {
        let Some(mut sub) = self.local_subscription(&provider.id).await? else {
            return Ok(WebhookOutcome::UnknownRecord);
        };

        if sync_from_provider(&mut sub, provider, now) {
            metrics::record_transition(sub.status.as_str(), "webhook");
        }
        self.lifecycle.persist(&sub, now).await?;

        if created {
            if let Some(user) = self.owner(&sub).await? {
                let plan_name = self
                    .repos
                    .plans
                    .get(&sub.plan_id)
                    .await?
                    .map(|p| p.name)
                    .unwrap_or_else(|| "Onflix".to_string());
                self.tasks
                    .send_email(Email::subscription_started(&user.email, &plan_name));
            }
        }
        Ok(WebhookOutcome::Processed)
    }

    async fn subscription_deleted(
        &self,
        provider: &ProviderSubscription,
        now: DateTime<Utc>,
    ) -> ApiResult<WebhookOutcome> {
        let Some(mut sub) = self.local_subscription(&provider.id).await? else {
            return Ok(WebhookOutcome::UnknownRecord);
        };

        if sub.status != SubscriptionStatus::Cancelled {
            match sub.transition_to(SubscriptionStatus::Cancelled, now) {
                Ok(()) => {
                    sub.cancelled_at = Some(now);
                    sub.auto_renew = false;
                    metrics::record_transition(sub.status.as_str(), "webhook");
                }
                Err(e) => warn!(subscription_id = %sub.id, error = %e, "Ignoring provider deletion"),
            }
        }
        self.lifecycle.persist(&sub, now).await?;

        if let Some(user) = self.owner(&sub).await? {
            self.tasks
                .send_email(Email::subscription_cancelled(&user.email));
        }
        Ok(WebhookOutcome::Processed)
    }

    /// Keep one payment per invoice: a failed charge that is later retried
    /// successfully moves the same record to succeeded.
    async fn record_invoice_payment(
        &self,
        sub: &Subscription,
        inv: &InvoiceObject,
        status: PaymentStatus,
        amount: f64,
        now: DateTime<Utc>,
    ) -> ApiResult<()> {
        let existing = self
            .repos
            .payments
            .for_invoice(&inv.id, inv.payment_intent.as_deref())
            .await?;

        let Some(existing) = existing else {
            let (description, failure_reason, processed_at) = match status {
                PaymentStatus::Succeeded => (
                    format!("Subscription payment for {}", sub.id),
                    None,
                    Some(now),
                ),
                _ => (
                    format!("Failed subscription payment for {}", sub.id),
                    Some("Payment failed".to_string()),
                    None,
                ),
            };
            let payment = Payment {
                id: new_id(),
                user_id: sub.user_id.clone(),
                subscription_id: sub.id.clone(),
                stripe_payment_intent_id: inv.payment_intent.clone(),
                stripe_invoice_id: Some(inv.id.clone()),
                stripe_charge_id: inv.charge.clone(),
                amount,
                currency: inv.currency.clone(),
                status,
                description,
                failure_reason,
                refunded_amount: 0.0,
                refunded_at: None,
                processed_at,
                created_at: now,
                updated_at: now,
            };
            self.repos.payments.insert(&payment).await?;
            return Ok(());
        };

        if existing.status == status
            || matches!(existing.status, PaymentStatus::Succeeded | PaymentStatus::Refunded)
        {
            debug!(
                payment_id = %existing.id,
                invoice_id = %inv.id,
                status = existing.status.as_str(),
                "Invoice payment already recorded"
            );
            return Ok(());
        }

        let mut update = Update::new()
            .set("status", status)
            .set("amount", amount)
            .set("stripe_invoice_id", &inv.id)
            .set("updated_at", now);
        if let Some(intent) = &inv.payment_intent {
            update = update.set("stripe_payment_intent_id", intent);
        }
        if let Some(charge) = &inv.charge {
            update = update.set("stripe_charge_id", charge);
        }
        update = match status {
            PaymentStatus::Succeeded => update
                .set("processed_at", now)
                .set("description", format!("Subscription payment for {}", sub.id))
                .unset("failure_reason"),
            _ => update.set("failure_reason", "Payment failed"),
        };
        self.repos.payments.update_by_id(&existing.id, &update).await?;
        info!(
            payment_id = %existing.id,
            invoice_id = %inv.id,
            status = status.as_str(),
            "Invoice payment updated"
        );
        Ok(())
    }

    async fn invoice_paid(&self, inv: &InvoiceObject, now: DateTime<Utc>) -> ApiResult<WebhookOutcome> {
        let Some(provider_sub) = inv.subscription.as_deref() else {
            debug!(invoice_id = %inv.id, "Invoice without subscription ignored");
            return Ok(WebhookOutcome::Ignored);
        };
        let Some(sub) = self.local_subscription(provider_sub).await? else {
            return Ok(WebhookOutcome::UnknownRecord);
        };

        let amount = major_units(inv.amount_paid);
        self.record_invoice_payment(&sub, inv, PaymentStatus::Succeeded, amount, now)
            .await?;

        if self.repos.invoices.by_provider_id(&inv.id).await?.is_none() {
            let invoice = Invoice {
                id: new_id(),
                user_id: sub.user_id.clone(),
                subscription_id: sub.id.clone(),
                stripe_invoice_id: inv.id.clone(),
                invoice_number: inv.number.clone().unwrap_or_default(),
                amount: major_units(inv.amount_due),
                tax: inv.tax.map(major_units).unwrap_or(0.0),
                discount: 0.0,
                total: major_units(inv.total),
                currency: inv.currency.clone(),
                status: invoice_status(inv.status.as_deref(), InvoiceStatus::Paid),
                due_date: inv.due_at(),
                paid_at: inv.paid_at().or(Some(now)),
                items: inv
                    .lines
                    .data
                    .iter()
                    .map(|line| InvoiceItem {
                        description: line.description.clone().unwrap_or_default(),
                        amount: major_units(line.amount),
                        quantity: line.quantity.unwrap_or(1),
                        period_start: line.period.start.and_then(onflix_billing::from_unix),
                        period_end: line.period.end.and_then(onflix_billing::from_unix),
                    })
                    .collect(),
                hosted_invoice_url: inv.hosted_invoice_url.clone(),
                created_at: now,
                updated_at: now,
            };
            self.repos.invoices.insert(&invoice).await?;
        }

        if let Some(user) = self.owner(&sub).await? {
            self.tasks
                .send_email(Email::payment_confirmation(&user.email, amount, &inv.currency));
        }
        Ok(WebhookOutcome::Processed)
    }

    async fn invoice_failed(&self, inv: &InvoiceObject, now: DateTime<Utc>) -> ApiResult<WebhookOutcome> {
        let Some(provider_sub) = inv.subscription.as_deref() else {
            debug!(invoice_id = %inv.id, "Invoice without subscription ignored");
            return Ok(WebhookOutcome::Ignored);
        };
        let Some(mut sub) = self.local_subscription(provider_sub).await? else {
            return Ok(WebhookOutcome::UnknownRecord);
        };

        let amount = major_units(inv.amount_due);
        self.record_invoice_payment(&sub, inv, PaymentStatus::Failed, amount, now)
            .await?;

        if sub.status != SubscriptionStatus::PastDue {
            match sub.transition_to(SubscriptionStatus::PastDue, now) {
                Ok(()) => metrics::record_transition(sub.status.as_str(), "webhook"),
                Err(e) => warn!(subscription_id = %sub.id, error = %e, "Ignoring failed payment status"),
            }
        }
        self.lifecycle.persist(&sub, now).await?;

        if let Some(user) = self.owner(&sub).await? {
            self.tasks
                .send_email(Email::payment_failed(&user.email, amount, &inv.currency));
        }
        Ok(WebhookOutcome::Processed)
    }

    async fn payment_intent(
        &self,
        pi: &PaymentIntentObject,
        status: PaymentStatus,
        now: DateTime<Utc>,
    ) -> ApiResult<WebhookOutcome> {
        let Some(payment) = self.repos.payments.by_intent(&pi.id).await? else {
            debug!(payment_intent = %pi.id, "No local payment for payment intent");
            return Ok(WebhookOutcome::UnknownRecord);
        };

        let mut update = Update::new()
            .set("status", status)
            .set("updated_at", now);
        update = match status {
            PaymentStatus::Failed => update.set("failure_reason", pi.failure_message()),
            _ => update.set("processed_at", now),
        };
        self.repos.payments.update_by_id(&payment.id, &update).await?;
        Ok(WebhookOutcome::Processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invoice_status_parsing() {
        assert_eq!(invoice_status(Some("open"), InvoiceStatus::Paid), InvoiceStatus::Open);
        assert_eq!(invoice_status(Some("bogus"), InvoiceStatus::Paid), InvoiceStatus::Paid);
        assert_eq!(invoice_status(None, InvoiceStatus::Draft), InvoiceStatus::Draft);
    }

    #[test]
    fn test_major_units() {
        assert_eq!(major_units(1399), 13.99);
        assert_eq!(major_units(0), 0.0);
    }
}
