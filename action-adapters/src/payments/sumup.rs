//! SumUp hosted checkouts.

use async_trait::async_trait;
use bizhub::config::SumupConfig;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{
    major_units, not_configured, Checkout, CheckoutProvider, CheckoutSession, PaymentStatus,
};
use crate::adapter::{send_upstream, upstream_json, ActionError};

const API_KEY_ENV: &str = "BIZHUB_SUMUP_API_KEY";
const MERCHANT_CODE_ENV: &str = "BIZHUB_SUMUP_MERCHANT_CODE";

#[derive(Debug, Deserialize)]
struct SumupCheckout {
    id: String,
    /// PENDING | PAID | FAILED | EXPIRED
    status: String,
    #[serde(default)]
    hosted_checkout_url: Option<String>,
}

impl SumupCheckout {
    fn normalized_status(&self) -> PaymentStatus {
        match self.status.as_str() {
            "PAID" => PaymentStatus::Paid,
            "FAILED" => PaymentStatus::Failed,
            "EXPIRED" => PaymentStatus::Expired,
            _ => PaymentStatus::Pending,
        }
    }

    fn into_session(self) -> CheckoutSession {
        CheckoutSession {
            provider: "sumup".to_string(),
            status: self.normalized_status(),
            id: self.id,
            checkout_url: self.hosted_checkout_url,
        }
    }
}

pub struct SumupProvider {
    http_client: Client,
    config: SumupConfig,
}

impl SumupProvider {
    pub fn new(http_client: Client, config: SumupConfig) -> Self {
        Self {
            http_client,
            config,
        }
    }

    fn api_key(&self) -> Result<&str, ActionError> {
        self.config
            .api_key
            .as_deref()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| not_configured("sumup", &self.missing_config()))
    }
}

#[async_trait]
impl CheckoutProvider for SumupProvider {
    fn name(&self) -> &str {
        "sumup"
    }

    fn missing_config(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.config.api_key.as_deref().map_or(true, str::is_empty) {
            missing.push(API_KEY_ENV);
        }
        if self.config.merchant_code.as_deref().map_or(true, str::is_empty) {
            missing.push(MERCHANT_CODE_ENV);
        }
        missing
    }

    async fn create_checkout(&self, checkout: &Checkout) -> Result<CheckoutSession, ActionError> {
        let api_key = self.api_key()?;
        let merchant_code = self
            .config
            .merchant_code
            .as_deref()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| not_configured("sumup", &[MERCHANT_CODE_ENV]))?;

        let body = json!({
            "checkout_reference": checkout.reference,
            "amount": major_units(checkout.amount, &checkout.currency),
            "currency": checkout.currency,
            "merchant_code": merchant_code,
            "description": checkout.description,
            "redirect_url": checkout.success_url,
            "hosted_checkout": { "enabled": true },
        });

        let request = self
            .http_client
            .post(format!("{}/v0.1/checkouts", self.config.base_url))
            .bearer_auth(api_key)
            .json(&body);

        let response = send_upstream("SumUp", request).await?;
        let created: SumupCheckout = upstream_json("SumUp", response).await?;
        Ok(created.into_session())
    }

    async fn checkout_status(&self, id: &str) -> Result<CheckoutSession, ActionError> {
        let request = self
            .http_client
            .get(format!(
                "{}/v0.1/checkouts/{}",
                self.config.base_url,
                urlencoding::encode(id)
            ))
            .bearer_auth(self.api_key()?);

        let response = send_upstream("SumUp", request).await?;
        let current: SumupCheckout = upstream_json("SumUp", response).await?;
        Ok(current.into_session())
    }
}
