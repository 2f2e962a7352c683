//! Coinbase Commerce fixed-price charges.

use async_trait::async_trait;
use bizhub::config::CoinbaseConfig;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{
    format_amount, require_key, Checkout, CheckoutProvider, CheckoutSession, PaymentStatus,
};
use crate::adapter::{send_upstream, upstream_json, ActionError};

const API_KEY_ENV: &str = "BIZHUB_COINBASE_API_KEY";
const API_VERSION: &str = "2018-03-22";
/// Commerce rejects longer charge names
const MAX_NAME_CHARS: usize = 100;

#[derive(Debug, Deserialize)]
struct TimelineEntry {
    status: String,
}

#[derive(Debug, Deserialize)]
struct Charge {
    id: String,
    #[serde(default)]
    hosted_url: Option<String>,
    #[serde(default)]
    timeline: Vec<TimelineEntry>,
}

#[derive(Debug, Deserialize)]
struct ChargeResponse {
    data: Charge,
}

impl Charge {
    /// The charge's state is its latest timeline entry.
    fn normalized_status(&self) -> PaymentStatus {
        match self.timeline.last().map(|e| e.status.as_str()) {
            Some("COMPLETED") | Some("RESOLVED") => PaymentStatus::Paid,
            Some("EXPIRED") => PaymentStatus::Expired,
            Some("UNRESOLVED") | Some("CANCELED") => PaymentStatus::Failed,
            _ => PaymentStatus::Pending,
        }
    }

    fn into_session(self) -> CheckoutSession {
        CheckoutSession {
            provider: "coinbase".to_string(),
            status: self.normalized_status(),
            id: self.id,
            checkout_url: self.hosted_url,
        }
    }
}

pub struct CoinbaseProvider {
    http_client: Client,
    config: CoinbaseConfig,
}

impl CoinbaseProvider {
    pub fn new(http_client: Client, config: CoinbaseConfig) -> Self {
        Self {
            http_client,
            config,
        }
    }

    fn api_key(&self) -> Result<&str, ActionError> {
        require_key("coinbase", API_KEY_ENV, self.config.api_key.as_deref())
    }
}

#[async_trait]
impl CheckoutProvider for CoinbaseProvider {
    fn name(&self) -> &str {
        "coinbase"
    }

    fn missing_config(&self) -> Vec<&'static str> {
        match self.api_key() {
            Ok(_) => Vec::new(),
            Err(_) => vec![API_KEY_ENV],
        }
    }

    async fn create_checkout(&self, checkout: &Checkout) -> Result<CheckoutSession, ActionError> {
        let name: String = checkout.description.chars().take(MAX_NAME_CHARS).collect();

        let body = json!({
            "name": name,
            "description": checkout.description,
            "pricing_type": "fixed_price",
            "local_price": {
                "amount": format_amount(checkout.amount, &checkout.currency),
                "currency": checkout.currency,
            },
            "redirect_url": checkout.success_url,
            "cancel_url": checkout.cancel_url,
            "metadata": { "reference": checkout.reference },
        });

        let request = self
            .http_client
            .post(format!("{}/charges", self.config.base_url))
            .header("X-CC-Api-Key", self.api_key()?)
            .header("X-CC-Version", API_VERSION)
            .json(&body);

        let response = send_upstream("Coinbase Commerce", request).await?;
        let created: ChargeResponse = upstream_json("Coinbase Commerce", response).await?;
        Ok(created.data.into_session())
    }

    async fn checkout_status(&self, id: &str) -> Result<CheckoutSession, ActionError> {
        let request = self
            .http_client
            .get(format!(
                "{}/charges/{}",
                self.config.base_url,
                urlencoding::encode(id)
            ))
            .header("X-CC-Api-Key", self.api_key()?)
            .header("X-CC-Version", API_VERSION);

        let response = send_upstream("Coinbase Commerce", request).await?;
        let current: ChargeResponse = upstream_json("Coinbase Commerce", response).await?;
        Ok(current.data.into_session())
    }
}
