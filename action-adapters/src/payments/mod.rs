//! Hosted checkout across payment providers.
//!
//! Every provider creates a checkout the customer completes on the
//! provider's own page, and reports the outcome through a status query
//! normalized to [`PaymentStatus`]. Keys are process-level configuration.

pub mod coinbase;
pub mod paypal;
pub mod stripe;
pub mod sumup;

use async_trait::async_trait;
use bizhub::api::app_redirect;
use bizhub::config::PaymentsConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::adapter::ActionError;

/// Currencies whose minor unit is the major unit (no decimals).
const ZERO_DECIMAL_CURRENCIES: &[&str] = &[
    "BIF", "CLP", "DJF", "GNF", "JPY", "KMF", "KRW", "MGA", "PYG", "RWF", "UGX", "VND", "VUV",
    "XAF", "XOF", "XPF",
];

/// Currencies with three decimal places.
const THREE_DECIMAL_CURRENCIES: &[&str] = &["BHD", "IQD", "JOD", "KWD", "LYD", "OMR", "TND"];

/// Normalized payment state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Expired,
}

/// Body of `POST /api/payments/:provider/checkout`
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    /// Minor units (cents)
    pub amount: i64,
    pub currency: String,
    pub description: String,
    #[serde(default)]
    pub success_url: Option<String>,
    #[serde(default)]
    pub cancel_url: Option<String>,
    /// Merchant reference; generated when absent
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// A validated checkout, ready to send to a provider
#[derive(Debug, Clone, PartialEq)]
pub struct Checkout {
    pub amount: i64,
    /// Upper-case ISO 4217 code
    pub currency: String,
    pub description: String,
    pub success_url: String,
    pub cancel_url: String,
    pub reference: String,
}

impl CheckoutRequest {
    /// Check limits and fill in default return URLs and reference.
    pub fn validate(self, provider: &str, app_redirect_url: &str) -> Result<Checkout, ActionError> {
        if self.amount <= 0 {
            return Err(ActionError::InvalidInput(
                "'amount' must be a positive number of minor units".to_string(),
            ));
        }

        let currency = self.currency.trim().to_uppercase();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ActionError::InvalidInput(format!(
                "'currency' must be a 3-letter ISO code, got '{}'",
                self.currency
            )));
        }

        let description = self.description.trim().to_string();
        if description.is_empty() {
            return Err(ActionError::InvalidInput(
                "'description' must not be empty".to_string(),
            ));
        }

        let success_url = self.success_url.unwrap_or_else(|| {
            app_redirect(app_redirect_url, &[("payment", "success"), ("provider", provider)])
        });
        let cancel_url = self.cancel_url.unwrap_or_else(|| {
            app_redirect(app_redirect_url, &[("payment", "cancelled"), ("provider", provider)])
        });
        let reference = self
            .reference
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Ok(Checkout {
            amount: self.amount,
            currency,
            description,
            success_url,
            cancel_url,
            reference,
        })
    }
}

fn decimals(currency: &str) -> u32 {
    if ZERO_DECIMAL_CURRENCIES.contains(&currency) {
        0
    } else if THREE_DECIMAL_CURRENCIES.contains(&currency) {
        3
    } else {
        2
    }
}

/// Minor units as a decimal string ("1050" USD => "10.50", "1000" BHD => "1.000").
pub fn format_amount(amount: i64, currency: &str) -> String {
    let places = decimals(currency);
    if places == 0 {
        return amount.to_string();
    }
    let scale = 10i64.pow(places);
    format!(
        "{}.{:0width$}",
        amount / scale,
        amount % scale,
        width = places as usize
    )
}

/// Minor units as a float in major units, for APIs that take numbers.
pub fn major_units(amount: i64, currency: &str) -> f64 {
    amount as f64 / 10f64.powi(decimals(currency) as i32)
}

/// Provider checkout, as returned to the client
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CheckoutSession {
    pub provider: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
    pub status: PaymentStatus,
}

/// Payment provider interface.
#[async_trait]
pub trait CheckoutProvider: Send + Sync {
    /// Route name ("stripe", "paypal", ...)
    fn name(&self) -> &str;

    /// Environment variables that still need to be set; empty when usable.
    fn missing_config(&self) -> Vec<&'static str>;

    async fn create_checkout(&self, checkout: &Checkout) -> Result<CheckoutSession, ActionError>;

    /// Query the provider for the current state of a checkout.
    async fn checkout_status(&self, id: &str) -> Result<CheckoutSession, ActionError>;
}

/// 400 naming the keys a provider lacks
pub fn not_configured(provider: &str, missing: &[&str]) -> ActionError {
    ActionError::NotConfigured(format!(
        "{} is not configured; set {}",
        provider,
        missing.join(", ")
    ))
}

/// Unwrap a configured key or fail with [`not_configured`].
fn require_key<'a>(
    provider: &str,
    env: &'static str,
    value: Option<&'a str>,
) -> Result<&'a str, ActionError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| not_configured(provider, &[env]))
}

/// Providers, plus which user created each checkout in this process.
pub struct PaymentRegistry {
    providers: Vec<Arc<dyn CheckoutProvider>>,
    owners: Mutex<HashMap<(String, String), String>>,
}

impl PaymentRegistry {
    pub fn from_config(http: reqwest::Client, config: &PaymentsConfig) -> Self {
        let providers: Vec<Arc<dyn CheckoutProvider>> = vec![
            Arc::new(stripe::StripeProvider::new(http.clone(), config.stripe.clone())),
            Arc::new(paypal::PaypalProvider::new(http.clone(), config.paypal.clone())),
            Arc::new(sumup::SumupProvider::new(http.clone(), config.sumup.clone())),
            Arc::new(coinbase::CoinbaseProvider::new(http, config.coinbase.clone())),
        ];
        Self {
            providers,
            owners: Mutex::new(HashMap::new()),
        }
    }

    fn owners(&self) -> MutexGuard<'_, HashMap<(String, String), String>> {
        self.owners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Remember `user_id` as the creator of a checkout.
    pub fn record_owner(&self, provider: &str, checkout_id: &str, user_id: &str) {
        self.owners().insert(
            (provider.to_string(), checkout_id.to_string()),
            user_id.to_string(),
        );
    }

    /// False only when the checkout is known to belong to another user.
    /// Checkouts created before a restart are not tracked.
    pub fn may_view(&self, provider: &str, checkout_id: &str, user_id: &str) -> bool {
        self.owners()
            .get(&(provider.to_string(), checkout_id.to_string()))
            .map_or(true, |owner| owner == user_id)
    }

    pub fn find(&self, name: &str) -> Option<Arc<dyn CheckoutProvider>> {
        self.providers.iter().find(|p| p.name() == name).cloned()
    }

    /// Names of providers with all keys present
    pub fn configured(&self) -> Vec<&str> {
        self.providers
            .iter()
            .filter(|p| p.missing_config().is_empty())
            .map(|p| p.name())
            .collect()
    }
}
