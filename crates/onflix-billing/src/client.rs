//! Stripe client over the REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{BillingError, BillingResult};
use crate::provider::{
    BillingProvider, NewSubscription, ProviderPaymentMethod, ProviderSubscription, SetupIntent,
};

const DEFAULT_API_BASE: &str = "https://api.stripe.com/v1";

/// Configuration for the Stripe client.
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Secret API key
    pub secret_key: String,
    /// API base URL, overridable for tests
    pub api_base: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl StripeConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            secret_key: std::env::var("STRIPE_SECRET_KEY").unwrap_or_default(),
            api_base: std::env::var("STRIPE_API_BASE")
                .unwrap_or_else(|_| DEFAULT_API_BASE.to_string()),
            timeout: Duration::from_secs(
                std::env::var("STRIPE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.secret_key.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Debug, Deserialize)]
struct List<T> {
    data: Vec<T>,
}

/// Stripe API client.
#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    config: StripeConfig,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> BillingResult<Self> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> BillingResult<Self> {
        Self::new(StripeConfig::from_env())
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }

    fn request(&self, method: Method, path: &str) -> BillingResult<RequestBuilder> {
        if !self.config.is_configured() {
            return Err(BillingError::not_configured("STRIPE_SECRET_KEY not set"));
        }
        let url = format!("{}/{}", self.config.api_base.trim_end_matches('/'), path);
        Ok(self
            .http
            .request(method, url)
            .basic_auth(&self.config.secret_key, None::<&str>))
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, form: &[(&str, String)]) -> BillingResult<T> {
        debug!(path = %path, "Stripe POST");
        let resp = self.request(Method::POST, path)?.form(form).send().await?;
        decode(resp).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> BillingResult<T> {
        debug!(path = %path, "Stripe GET");
        let resp = self.request(Method::GET, path)?.query(query).send().await?;
        decode(resp).await
    }

    async fn delete<T: DeserializeOwned>(&self, path: &str) -> BillingResult<T> {
        debug!(path = %path, "Stripe DELETE");
        let resp = self.request(Method::DELETE, path)?.send().await?;
        decode(resp).await
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> BillingResult<T> {
    let status = resp.status();
    let body = resp.text().await?;

    if status.is_success() {
        return serde_json::from_str(&body).map_err(|e| BillingError::decode(e.to_string()));
    }

    let (message, code) = match serde_json::from_str::<ErrorEnvelope>(&body) {
        Ok(env) => (
            env.error
                .message
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
            env.error.code,
        ),
        Err(_) => (format!("HTTP {}", status.as_u16()), None),
    };

    warn!(status = status.as_u16(), code = ?code, "Stripe request failed: {}", message);

    Err(BillingError::Rejected {
        status: status.as_u16(),
        message,
        code,
    })
}

#[async_trait]
impl BillingProvider for StripeClient {
    async fn create_customer(&self, email: &str, name: &str, user_id: &str) -> BillingResult<String> {
        let customer: IdOnly = self
            .post(
                "customers",
                &[
                    ("email", email.to_string()),
                    ("name", name.to_string()),
                    ("metadata[user_id]", user_id.to_string()),
                ],
            )
            .await?;
        info!(customer_id = %customer.id, user_id = %user_id, "Created Stripe customer");
        Ok(customer.id)
    }

    async fn attach_payment_method(
        &self,
        payment_method_id: &str,
        customer_id: &str,
    ) -> BillingResult<()> {
        let _: IdOnly = self
            .post(
                &format!("payment_methods/{}/attach", payment_method_id),
                &[("customer", customer_id.to_string())],
            )
            .await?;
        Ok(())
    }

    async fn create_subscription(
        &self,
        params: NewSubscription<'_>,
    ) -> BillingResult<ProviderSubscription> {
        let mut form = vec![
            ("customer", params.customer_id.to_string()),
            ("items[0][price]", params.price_id.to_string()),
            ("default_payment_method", params.payment_method_id.to_string()),
            ("expand[0]", "latest_invoice.payment_intent".to_string()),
        ];
        if let Some(days) = params.trial_days.filter(|d| *d > 0) {
            form.push(("trial_period_days", days.to_string()));
        }

        let sub: ProviderSubscription = self.post("subscriptions", &form).await?;
        info!(
            subscription_id = %sub.id,
            customer_id = %sub.customer,
            status = %sub.status,
            "Created Stripe subscription"
        );
        Ok(sub)
    }

    async fn get_subscription(&self, subscription_id: &str) -> BillingResult<ProviderSubscription> {
        self.get(&format!("subscriptions/{}", subscription_id), &[])
            .await
    }

    async fn change_price(
        &self,
        subscription_id: &str,
        new_price_id: &str,
    ) -> BillingResult<ProviderSubscription> {
        let current = self.get_subscription(subscription_id).await?;
        let item_id = current
            .item_id()
            .ok_or_else(|| BillingError::decode("subscription has no items"))?
            .to_string();

        self.post(
            &format!("subscriptions/{}", subscription_id),
            &[
                ("items[0][id]", item_id),
                ("items[0][price]", new_price_id.to_string()),
                ("proration_behavior", "always_invoice".to_string()),
            ],
        )
        .await
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        at_period_end: bool,
    ) -> BillingResult<ProviderSubscription> {
        let path = format!("subscriptions/{}", subscription_id);
        if at_period_end {
            self.post(&path, &[("cancel_at_period_end", "true".to_string())])
                .await
        } else {
            self.delete(&path).await
        }
    }

    async fn create_price(
        &self,
        product_name: &str,
        description: &str,
        unit_amount: i64,
        currency: &str,
        interval: Option<&str>,
    ) -> BillingResult<String> {
        let mut product_form = vec![("name", product_name.to_string())];
        if !description.is_empty() {
            product_form.push(("description", description.to_string()));
        }
        let product: IdOnly = self.post("products", &product_form).await?;

        let mut form = vec![
            ("currency", currency.to_lowercase()),
            ("product", product.id),
            ("unit_amount", unit_amount.to_string()),
        ];
        if let Some(interval) = interval {
            form.push(("recurring[interval]", interval.to_string()));
        }
        let price: IdOnly = self.post("prices", &form).await?;
        info!(price_id = %price.id, product = %product_name, "Created Stripe price");
        Ok(price.id)
    }

    async fn list_payment_methods(
        &self,
        customer_id: &str,
    ) -> BillingResult<Vec<ProviderPaymentMethod>> {
        let list: List<ProviderPaymentMethod> = self
            .get(
                "payment_methods",
                &[("customer", customer_id), ("type", "card")],
            )
            .await?;
        Ok(list.data)
    }

    async fn create_setup_intent(&self, customer_id: &str) -> BillingResult<SetupIntent> {
        self.post(
            "setup_intents",
            &[
                ("customer", customer_id.to_string()),
                ("payment_method_types[0]", "card".to_string()),
            ],
        )
        .await
    }

    async fn detach_payment_method(&self, payment_method_id: &str) -> BillingResult<()> {
        let _: IdOnly = self
            .post(&format!("payment_methods/{}/detach", payment_method_id), &[])
            .await?;
        Ok(())
    }

    async fn set_default_payment_method(
        &self,
        customer_id: &str,
        payment_method_id: &str,
    ) -> BillingResult<()> {
        let _: IdOnly = self
            .post(
                &format!("customers/{}", customer_id),
                &[(
                    "invoice_settings[default_payment_method]",
                    payment_method_id.to_string(),
                )],
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client(server: &MockServer) -> StripeClient {
        StripeClient::new(StripeConfig {
            secret_key: "sk_test".to_string(),
            api_base: server.uri(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_customer_uses_basic_auth_and_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/customers"))
            .and(header("authorization", "Basic c2tfdGVzdDo="))
            .and(body_string_contains("metadata%5Buser_id%5D=u1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "cus_123"})))
            .expect(1)
            .mount(&server)
            .await;

        let id = client(&server)
            .await
            .create_customer("a@b.co", "Ada B", "u1")
            .await
            .unwrap();
        assert_eq!(id, "cus_123");
    }

    #[tokio::test]
    async fn test_card_error_is_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/payment_methods/pm_bad/attach"))
            .respond_with(ResponseTemplate::new(402).set_body_json(json!({
                "error": {"message": "Your card was declined.", "code": "card_declined", "type": "card_error"}
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .attach_payment_method("pm_bad", "cus_1")
            .await
            .unwrap_err();
        assert!(err.is_rejection());
        match err {
            BillingError::Rejected { message, code, .. } => {
                assert_eq!(message, "Your card was declined.");
                assert_eq!(code.as_deref(), Some("card_declined"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_subscription_with_trial() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/subscriptions"))
            .and(body_string_contains("trial_period_days=14"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "sub_1",
                "customer": "cus_1",
                "status": "trialing",
                "current_period_start": 1700000000,
                "current_period_end": 1701209600,
                "trial_start": 1700000000,
                "trial_end": 1701209600
            })))
            .mount(&server)
            .await;

        let sub = client(&server)
            .await
            .create_subscription(NewSubscription {
                customer_id: "cus_1",
                price_id: "price_1",
                payment_method_id: "pm_1",
                trial_days: Some(14),
            })
            .await
            .unwrap();
        assert_eq!(sub.status, onflix_models::SubscriptionStatus::Trialing);
        assert!(sub.trial_end_at().is_some());
    }

    #[tokio::test]
    async fn test_cancel_immediately_uses_delete() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/subscriptions/sub_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "sub_1", "customer": "cus_1", "status": "canceled", "canceled_at": 1700000000
            })))
            .expect(1)
            .mount(&server)
            .await;

        let sub = client(&server)
            .await
            .cancel_subscription("sub_1", false)
            .await
            .unwrap();
        assert_eq!(sub.status, onflix_models::SubscriptionStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_list_payment_methods() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/payment_methods"))
            .and(query_param("customer", "cus_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "pm_1", "type": "card", "card": {"brand": "visa", "last4": "4242", "exp_month": 12, "exp_year": 2030}}]
            })))
            .mount(&server)
            .await;

        let methods = client(&server)
            .await
            .list_payment_methods("cus_1")
            .await
            .unwrap();
        assert_eq!(methods.len(), 1);
        assert_eq!(methods[0].card_details().unwrap().last4, "4242");
    }

    #[tokio::test]
    async fn test_unconfigured_client_refuses() {
        let client = StripeClient::new(StripeConfig::default()).unwrap();
        let err = client.get_subscription("sub_1").await.unwrap_err();
        assert!(matches!(err, BillingError::NotConfigured(_)));
    }
}
