//! Billing error types.

use thiserror::Error;

/// Result type for billing operations.
pub type BillingResult<T> = Result<T, BillingError>;

/// Errors that can occur while talking to the payment provider.
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Billing provider not configured: {0}")]
    NotConfigured(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with an error object.
    #[error("Provider rejected request ({status}): {message}")]
    Rejected {
        status: u16,
        message: String,
        code: Option<String>,
    },

    #[error("Unexpected provider response: {0}")]
    Decode(String),
}

impl BillingError {
    pub fn not_configured(msg: impl Into<String>) -> Self {
        Self::NotConfigured(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// The request itself was refused, e.g. a declined card.
    pub fn is_rejection(&self) -> bool {
        matches!(self, BillingError::Rejected { status, .. } if (400..500).contains(status) && *status != 401 && *status != 429)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_classification() {
        let card = BillingError::Rejected {
            status: 402,
            message: "Your card was declined.".into(),
            code: Some("card_declined".into()),
        };
        assert!(card.is_rejection());

        let auth = BillingError::Rejected {
            status: 401,
            message: "Invalid API Key".into(),
            code: None,
        };
        assert!(!auth.is_rejection());
        assert!(!BillingError::decode("missing id").is_rejection());
    }
}
