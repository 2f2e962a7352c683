use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Complete bizhub configuration.
///
/// Loaded from TOML (every section optional), then overlaid with
/// `BIZHUB_*` environment variables. Secrets are usually supplied via env.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BizhubConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub payments: PaymentsConfig,
    #[serde(default)]
    pub twitter: TwitterConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listen address for the integrations API
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Listen address for the action adapter API
    #[serde(default = "default_actions_bind_addr")]
    pub actions_bind_addr: String,
    /// Externally reachable base URL, used to build OAuth callback URLs
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    /// SPA page the OAuth callback redirects back to
    #[serde(default = "default_app_redirect_url")]
    pub app_redirect_url: String,
    /// Timeout applied to every outbound provider call
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_actions_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_public_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_app_redirect_url() -> String {
    "http://localhost:5173/integrations".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            actions_bind_addr: default_actions_bind_addr(),
            public_base_url: default_public_base_url(),
            app_redirect_url: default_app_redirect_url(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

/// Session verification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// When false, the user id is taken from the request (or "default")
    #[serde(default)]
    pub enabled: bool,
    /// HS256 secret shared with the backend-as-a-service
    #[serde(default)]
    pub jwt_secret: Option<String>,
    /// Expected `aud` claim
    #[serde(default = "default_audience")]
    pub audience: String,
}

fn default_audience() -> String {
    "authenticated".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            jwt_secret: None,
            audience: default_audience(),
        }
    }
}

/// Credential store configuration. The encryption key is env-only.
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    "credentials.db".to_string()
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// Client id/secret pair for one OAuth integration or provider family
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ClientCredentials {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
}

/// Endpoint overrides for one integration (sandboxes, local mocks)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndpointOverride {
    #[serde(default)]
    pub auth_url: Option<String>,
    #[serde(default)]
    pub token_url: Option<String>,
    #[serde(default)]
    pub userinfo_url: Option<String>,
}

/// OAuth flow configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    /// How long an issued `state` value stays valid
    #[serde(default = "default_state_ttl")]
    pub state_ttl_seconds: i64,
    /// How often expired states are purged
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
    /// Process-wide clients keyed by integration ("gmail") or family ("google")
    #[serde(default)]
    pub clients: HashMap<String, ClientCredentials>,
    #[serde(default)]
    pub endpoints: HashMap<String, EndpointOverride>,
}

fn default_state_ttl() -> i64 {
    600
}

fn default_cleanup_interval() -> u64 {
    60
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            state_ttl_seconds: default_state_ttl(),
            cleanup_interval_seconds: default_cleanup_interval(),
            clients: HashMap::new(),
            endpoints: HashMap::new(),
        }
    }
}

impl OAuthConfig {
    /// Configured client for `name`, if any field of it is set.
    pub fn client(&self, name: &str) -> Option<&ClientCredentials> {
        self.clients.get(name)
    }
}

/// Payment provider keys
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentsConfig {
    #[serde(default)]
    pub stripe: StripeConfig,
    #[serde(default)]
    pub paypal: PaypalConfig,
    #[serde(default)]
    pub sumup: SumupConfig,
    #[serde(default)]
    pub coinbase: CoinbaseConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeConfig {
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default = "default_stripe_base_url")]
    pub base_url: String,
}

fn default_stripe_base_url() -> String {
    "https://api.stripe.com".to_string()
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            base_url: default_stripe_base_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaypalConfig {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Sandbox by default; set to https://api-m.paypal.com for live
    #[serde(default = "default_paypal_base_url")]
    pub base_url: String,
}

fn default_paypal_base_url() -> String {
    "https://api-m.sandbox.paypal.com".to_string()
}

impl Default for PaypalConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            base_url: default_paypal_base_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SumupConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub merchant_code: Option<String>,
    #[serde(default = "default_sumup_base_url")]
    pub base_url: String,
}

fn default_sumup_base_url() -> String {
    "https://api.sumup.com".to_string()
}

impl Default for SumupConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            merchant_code: None,
            base_url: default_sumup_base_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoinbaseConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_coinbase_base_url")]
    pub base_url: String,
}

fn default_coinbase_base_url() -> String {
    "https://api.commerce.coinbase.com".to_string()
}

impl Default for CoinbaseConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_coinbase_base_url(),
        }
    }
}

/// App-level consumer key pair for OAuth 1.0a request signing
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TwitterConfig {
    #[serde(default)]
    pub consumer_key: Option<String>,
    #[serde(default)]
    pub consumer_secret: Option<String>,
}

impl BizhubConfig {
    /// Load from `BIZHUB_CONFIG` (default `bizhub.toml`), then apply env overrides.
    ///
    /// A missing config file is not an error; defaults are used.
    pub fn load() -> Result<Self> {
        let path = std::env::var("BIZHUB_CONFIG").unwrap_or_else(|_| "bizhub.toml".to_string());
        let mut config = if Path::new(&path).exists() {
            load_config(&path)?
        } else {
            Self::default()
        };
        config.apply_env(std::env::vars());
        Ok(config)
    }

    /// Overlay `BIZHUB_*` variables from `vars` onto this config.
    pub fn apply_env<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix("BIZHUB_") else {
                continue;
            };

            match name {
                "BIND_ADDR" => self.server.bind_addr = value,
                "ACTIONS_BIND_ADDR" => self.server.actions_bind_addr = value,
                "PUBLIC_BASE_URL" => self.server.public_base_url = value,
                "APP_REDIRECT_URL" => self.server.app_redirect_url = value,
                "REQUEST_TIMEOUT_SECONDS" => {
                    if let Ok(n) = value.parse::<u64>() {
                        self.server.request_timeout_seconds = n;
                    }
                }
                "AUTH_ENABLED" => {
                    if let Ok(b) = value.parse::<bool>() {
                        self.auth.enabled = b;
                    }
                }
                "JWT_SECRET" => self.auth.jwt_secret = Some(value),
                "CREDENTIALS_DB" => self.credentials.db_path = value,
                "STRIPE_SECRET_KEY" => self.payments.stripe.secret_key = Some(value),
                "PAYPAL_CLIENT_ID" => self.payments.paypal.client_id = Some(value),
                "PAYPAL_CLIENT_SECRET" => self.payments.paypal.client_secret = Some(value),
                "PAYPAL_BASE_URL" => self.payments.paypal.base_url = value,
                "SUMUP_API_KEY" => self.payments.sumup.api_key = Some(value),
                "SUMUP_MERCHANT_CODE" => self.payments.sumup.merchant_code = Some(value),
                "COINBASE_API_KEY" => self.payments.coinbase.api_key = Some(value),
                "TWITTER_CONSUMER_KEY" => self.twitter.consumer_key = Some(value),
                "TWITTER_CONSUMER_SECRET" => self.twitter.consumer_secret = Some(value),
                other => {
                    // BIZHUB_OAUTH_<NAME>_CLIENT_ID / BIZHUB_OAUTH_<NAME>_CLIENT_SECRET
                    let Some(rest) = other.strip_prefix("OAUTH_") else {
                        continue;
                    };
                    if let Some(client) = rest.strip_suffix("_CLIENT_ID") {
                        self.oauth
                            .clients
                            .entry(client.to_lowercase())
                            .or_default()
                            .client_id = Some(value);
                    } else if let Some(client) = rest.strip_suffix("_CLIENT_SECRET") {
                        self.oauth
                            .clients
                            .entry(client.to_lowercase())
                            .or_default()
                            .client_secret = Some(value);
                    }
                }
            }
        }
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &str) -> Result<BizhubConfig> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path))?;
    let config: BizhubConfig =
        toml::from_str(&contents).with_context(|| format!("Failed to parse config {}", path))?;
    Ok(config)
}
