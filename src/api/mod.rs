// HTTP APIs: integration status, OAuth connect flow, health

pub mod auth_middleware;
pub mod error;
pub mod integrations;
pub mod oauth;

pub use auth_middleware::{AuthError, Authenticator, DEFAULT_USER};
pub use error::AppError;
pub use integrations::{create_integrations_router, IntegrationsAppState};
pub use oauth::{app_redirect, create_oauth_router, run_state_cleanup, OAuthAppState, StateManager};

use crate::config::{BizhubConfig, OAuthConfig};
use crate::credentials::CredentialStore;
use axum::{response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

/// Everything the bizhub routers share
#[derive(Clone)]
pub struct ApiState {
    pub credential_store: Arc<CredentialStore>,
    pub authenticator: Authenticator,
    pub oauth: Arc<OAuthConfig>,
    pub state_manager: StateManager,
    pub http: reqwest::Client,
    pub public_base_url: String,
    pub app_redirect_url: String,
}

impl ApiState {
    pub fn from_config(
        config: &BizhubConfig,
        credential_store: Arc<CredentialStore>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            credential_store,
            authenticator: Authenticator::from_config(&config.auth)?,
            oauth: Arc::new(config.oauth.clone()),
            state_manager: StateManager::new(config.oauth.state_ttl_seconds),
            http: http_client(config.server.request_timeout_seconds)?,
            public_base_url: config.server.public_base_url.clone(),
            app_redirect_url: config.server.app_redirect_url.clone(),
        })
    }
}

/// Shared outbound client with the configured request timeout
pub fn http_client(timeout_seconds: u64) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_seconds))
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))
}

/// GET /health
pub fn create_health_router() -> Router {
    Router::new().route("/health", get(health))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Permissive CORS for the SPA
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Full bizhub router: health, integrations and OAuth
pub fn create_router(state: ApiState) -> Router {
    let integrations = create_integrations_router(IntegrationsAppState {
        credential_store: Arc::clone(&state.credential_store),
        authenticator: state.authenticator.clone(),
        oauth: Arc::clone(&state.oauth),
    });

    let oauth = create_oauth_router(OAuthAppState {
        credential_store: state.credential_store,
        state_manager: state.state_manager,
        authenticator: state.authenticator,
        oauth: state.oauth,
        http: state.http,
        callback_base_url: state.public_base_url,
        app_redirect_url: state.app_redirect_url,
    });

    create_health_router()
        .merge(integrations)
        .merge(oauth)
        .layer(cors_layer())
}
