//! Outbound account emails.

use async_trait::async_trait;
use tracing::info;

/// A rendered plain-text email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl Email {
    pub fn welcome(to: &str, first_name: &str, verification_token: &str) -> Self {
        Self {
            to: to.to_string(),
            subject: "Welcome to Onflix".to_string(),
            body: format!(
                "Hi {first_name},\n\n\
                 Your account is ready. Pick a plan to start watching.\n\n\
                 Confirm your email with this code: {verification_token}\n\
                 It is valid for 24 hours."
            ),
        }
    }

    pub fn email_verification(to: &str, token: &str) -> Self {
        Self {
            to: to.to_string(),
            subject: "Verify your email".to_string(),
            body: format!(
                "Confirm your email with this code: {token}\n\
                 It is valid for 24 hours."
            ),
        }
    }

    pub fn password_reset(to: &str, token: &str) -> Self {
        Self {
            to: to.to_string(),
            subject: "Reset your password".to_string(),
            body: format!(
                "Use this code to reset your password: {token}\n\
                 It is valid for one hour. If you did not ask for a reset, ignore this email."
            ),
        }
    }

    pub fn subscription_started(to: &str, plan_name: &str) -> Self {
        Self {
            to: to.to_string(),
            subject: "Your subscription is active".to_string(),
            body: format!("Thanks for subscribing to the {plan_name} plan. Enjoy watching!"),
        }
    }

    pub fn subscription_cancelled(to: &str) -> Self {
        Self {
            to: to.to_string(),
            subject: "Your subscription has been cancelled".to_string(),
            body: "Your subscription has ended. You can resubscribe at any time.".to_string(),
        }
    }

    pub fn payment_confirmation(to: &str, amount: f64, currency: &str) -> Self {
        Self {
            to: to.to_string(),
            subject: "Payment received".to_string(),
            body: format!(
                "We received your payment of {:.2} {}.",
                amount,
                currency.to_uppercase()
            ),
        }
    }

    pub fn payment_failed(to: &str, amount: f64, currency: &str) -> Self {
        Self {
            to: to.to_string(),
            subject: "Payment failed".to_string(),
            body: format!(
                "We could not collect your payment of {:.2} {}. \
                 Update your payment method to keep watching.",
                amount,
                currency.to_uppercase()
            ),
        }
    }
}

/// Delivery channel for [`Email`]s.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, email: &Email) -> anyhow::Result<()>;
}

/// Writes emails to the log instead of sending them.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, email: &Email) -> anyhow::Result<()> {
        info!(to = %email.to, subject = %email.subject, "Email dispatched");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_welcome_carries_verification_code() {
        let email = Email::welcome("a@example.com", "Ada", "abc123");
        assert!(email.body.starts_with("Hi Ada,"));
        assert!(email.body.contains("with this code: abc123\n"));
    }

    #[test]
    fn test_payment_email_formats_amount() {
        let email = Email::payment_failed("a@example.com", 13.99, "usd");
        assert!(email.body.contains("13.99 USD"));
        assert_eq!(email.to, "a@example.com");
    }
}
