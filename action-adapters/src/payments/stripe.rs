//! Stripe Checkout Sessions (form-encoded API).

use async_trait::async_trait;
use bizhub::config::StripeConfig;
use reqwest::Client;
use serde::Deserialize;

use super::{require_key, Checkout, CheckoutProvider, CheckoutSession, PaymentStatus};
use crate::adapter::{send_upstream, upstream_json, ActionError};

const SECRET_KEY_ENV: &str = "BIZHUB_STRIPE_SECRET_KEY";

#[derive(Debug, Deserialize)]
struct StripeSession {
    id: String,
    #[serde(default)]
    url: Option<String>,
    /// open | complete | expired
    #[serde(default)]
    status: Option<String>,
    /// paid | unpaid | no_payment_required
    #[serde(default)]
    payment_status: Option<String>,
}

impl StripeSession {
    fn normalized_status(&self) -> PaymentStatus {
        match (self.payment_status.as_deref(), self.status.as_deref()) {
            (Some("paid") | Some("no_payment_required"), _) => PaymentStatus::Paid,
            (_, Some("expired")) => PaymentStatus::Expired,
            _ => PaymentStatus::Pending,
        }
    }

    fn into_session(self) -> CheckoutSession {
        CheckoutSession {
            provider: "stripe".to_string(),
            status: self.normalized_status(),
            id: self.id,
            checkout_url: self.url,
        }
    }
}

pub struct StripeProvider {
    http_client: Client,
    config: StripeConfig,
}

impl StripeProvider {
    pub fn new(http_client: Client, config: StripeConfig) -> Self {
        Self {
            http_client,
            config,
        }
    }

    fn secret_key(&self) -> Result<&str, ActionError> {
        require_key("stripe", SECRET_KEY_ENV, self.config.secret_key.as_deref())
    }
}

#[async_trait]
impl CheckoutProvider for StripeProvider {
    fn name(&self) -> &str {
        "stripe"
    }

    fn missing_config(&self) -> Vec<&'static str> {
        match self.secret_key() {
            Ok(_) => Vec::new(),
            Err(_) => vec![SECRET_KEY_ENV],
        }
    }

    async fn create_checkout(&self, checkout: &Checkout) -> Result<CheckoutSession, ActionError> {
        let form = [
            ("mode", "payment".to_string()),
            ("success_url", checkout.success_url.clone()),
            ("cancel_url", checkout.cancel_url.clone()),
            ("client_reference_id", checkout.reference.clone()),
            ("line_items[0][quantity]", "1".to_string()),
            (
                "line_items[0][price_data][currency]",
                checkout.currency.to_lowercase(),
            ),
            (
                "line_items[0][price_data][unit_amount]",
                checkout.amount.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]",
                checkout.description.clone(),
            ),
        ];

        let request = self
            .http_client
            .post(format!("{}/v1/checkout/sessions", self.config.base_url))
            .bearer_auth(self.secret_key()?)
            .form(&form);

        let response = send_upstream("Stripe", request).await?;
        let session: StripeSession = upstream_json("Stripe", response).await?;
        Ok(session.into_session())
    }

    async fn checkout_status(&self, id: &str) -> Result<CheckoutSession, ActionError> {
        let request = self
            .http_client
            .get(format!(
                "{}/v1/checkout/sessions/{}",
                self.config.base_url,
                urlencoding::encode(id)
            ))
            .bearer_auth(self.secret_key()?);

        let response = send_upstream("Stripe", request).await?;
        let session: StripeSession = upstream_json("Stripe", response).await?;
        Ok(session.into_session())
    }
}
