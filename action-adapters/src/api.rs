//! Actions and payments HTTP API.

use crate::account::AccountResolver;
use crate::adapter::{parse_payload, ActionError};
use crate::payments::{
    not_configured, CheckoutProvider, CheckoutRequest, CheckoutSession, PaymentRegistry,
};
use crate::registry::{AdapterRegistry, ProviderEndpoints};
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Json,
    routing::{get, post},
    Router,
};
use bizhub::api::{cors_layer, create_health_router, http_client, Authenticator};
use bizhub::config::BizhubConfig;
use bizhub::credentials::CredentialStore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state for the actions API
#[derive(Clone)]
pub struct ActionsAppState {
    pub registry: Arc<AdapterRegistry>,
    pub accounts: AccountResolver,
    pub payments: Arc<PaymentRegistry>,
    pub authenticator: Authenticator,
    /// Base for default payment return URLs
    pub app_redirect_url: String,
}

impl ActionsAppState {
    pub fn from_config(
        config: &BizhubConfig,
        credential_store: Arc<CredentialStore>,
    ) -> anyhow::Result<Self> {
        let http = http_client(config.server.request_timeout_seconds)?;

        Ok(Self {
            registry: Arc::new(AdapterRegistry::new(
                http.clone(),
                config.twitter.clone(),
                ProviderEndpoints::default(),
            )),
            accounts: AccountResolver::new(
                credential_store,
                Arc::new(config.oauth.clone()),
                http.clone(),
            ),
            payments: Arc::new(PaymentRegistry::from_config(http, &config.payments)),
            authenticator: Authenticator::from_config(&config.auth)?,
            app_redirect_url: config.server.app_redirect_url.clone(),
        })
    }
}

#[derive(Serialize)]
pub struct ActionResponse {
    pub integration: String,
    pub action: String,
    pub result: Value,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserQuery {
    pub user_id: Option<String>,
}

/// Health, actions and payments routes with permissive CORS
pub fn create_router(state: ActionsAppState) -> Router {
    let api = Router::new()
        .route("/api/actions/:integration/:action", post(run_action))
        .route("/api/payments/:provider/checkout", post(create_checkout))
        .route("/api/payments/:provider/checkout/:id", get(checkout_status))
        .with_state(Arc::new(state));

    create_health_router().merge(api).layer(cors_layer())
}

fn body_or_empty(body: Option<Json<Value>>) -> Value {
    body.map(|Json(v)| v)
        .unwrap_or_else(|| Value::Object(Map::new()))
}

/// POST /api/actions/:integration/:action
async fn run_action(
    State(state): State<Arc<ActionsAppState>>,
    Path((integration, action)): Path<(String, String)>,
    headers: HeaderMap,
    body: Option<Json<Value>>,
) -> Result<Json<ActionResponse>, ActionError> {
    let adapter = state.registry.find(&integration, &action).ok_or_else(|| {
        ActionError::NotFound(format!(
            "Action '{}' not found for integration '{}'",
            action, integration
        ))
    })?;

    let payload = body_or_empty(body);
    adapter.validate(&payload)?;

    let requested = payload.get("user_id").and_then(Value::as_str);
    let user_id = state.authenticator.resolve_user(&headers, requested)?;

    let account = state.accounts.connected_account(&user_id, &integration).await?;

    let result = adapter.execute(&account, &payload).await.map_err(|e| {
        warn!(
            integration = %integration,
            action = %action,
            user_id = %user_id,
            error = %e,
            "Action failed"
        );
        e
    })?;

    info!(
        integration = %integration,
        action = %action,
        user_id = %user_id,
        "Action completed"
    );

    Ok(Json(ActionResponse {
        integration,
        action,
        result,
    }))
}

fn find_provider(
    state: &ActionsAppState,
    provider: &str,
) -> Result<Arc<dyn CheckoutProvider>, ActionError> {
    state.payments.find(provider).ok_or_else(|| {
        ActionError::NotFound(format!("Payment provider '{}' not found", provider))
    })
}

/// Reject before any outbound call when keys are missing.
fn require_configured(provider: &dyn CheckoutProvider) -> Result<(), ActionError> {
    let missing = provider.missing_config();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(not_configured(provider.name(), &missing))
    }
}

/// POST /api/payments/:provider/checkout
async fn create_checkout(
    State(state): State<Arc<ActionsAppState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Option<Json<Value>>,
) -> Result<Json<CheckoutSession>, ActionError> {
    let checkout_provider = find_provider(&state, &provider)?;

    let request: CheckoutRequest = parse_payload(&body_or_empty(body))?;
    let user_id = state
        .authenticator
        .resolve_user(&headers, request.user_id.as_deref())?;

    require_configured(checkout_provider.as_ref())?;
    let checkout = request.validate(&provider, &state.app_redirect_url)?;

    let session = checkout_provider.create_checkout(&checkout).await.map_err(|e| {
        warn!(provider = %provider, user_id = %user_id, error = %e, "Checkout creation failed");
        e
    })?;

    state.payments.record_owner(&provider, &session.id, &user_id);

    info!(
        provider = %provider,
        user_id = %user_id,
        checkout_id = %session.id,
        reference = %checkout.reference,
        "Checkout created"
    );

    Ok(Json(session))
}

/// GET /api/payments/:provider/checkout/:id
///
/// A checkout created here by another user answers 404.
async fn checkout_status(
    State(state): State<Arc<ActionsAppState>>,
    Path((provider, id)): Path<(String, String)>,
    headers: HeaderMap,
    Query(query): Query<UserQuery>,
) -> Result<Json<CheckoutSession>, ActionError> {
    let checkout_provider = find_provider(&state, &provider)?;

    let user_id = state
        .authenticator
        .resolve_user(&headers, query.user_id.as_deref())?;

    if !state.payments.may_view(&provider, &id, &user_id) {
        return Err(ActionError::NotFound(format!("Checkout '{}' not found", id)));
    }

    require_configured(checkout_provider.as_ref())?;
    let session = checkout_provider.checkout_status(&id).await?;

    Ok(Json(session))
}
