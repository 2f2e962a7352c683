//! Integration status and credential management endpoints.
//!
//! The SPA's connect widgets poll these for connection state. Tokens never
//! leave the store through this API; only the safe summary does.

use super::auth_middleware::Authenticator;
use super::error::AppError;
use super::oauth::{find_provider, provider::PROVIDERS, AuthFlow, OAuthProviderConfig};
use crate::config::OAuthConfig;
use crate::credentials::{
    expiry_after, CredentialStore, Credentials, IntegrationRecord, IntegrationSummary,
};
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};


/// Shared application state for integrations API
#[derive(Clone)]
pub struct IntegrationsAppState {
    pub credential_store: Arc<CredentialStore>,
    pub authenticator: Authenticator,
    pub oauth: Arc<OAuthConfig>,
}

/// Status of one integration for one user
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct IntegrationStatus {
    pub display_name: String,
    /// "oauth2" or "token"
    pub auth_flow: String,
    /// A client id resolves for this user (override or server config)
    pub client_configured: bool,
    #[serde(flatten)]
    pub summary: IntegrationSummary,
}

#[derive(Serialize)]
pub struct ListIntegrationsResponse {
    pub integrations: Vec<IntegrationStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserQuery {
    pub user_id: Option<String>,
}

/// Request body for POST /api/integrations/:name/token
#[derive(Deserialize)]
pub struct TokenRequest {
    pub token: String,
    /// OAuth 1.0a token secret (Twitter user context)
    pub token_secret: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    pub user_id: Option<String>,
}

/// Request body for POST /api/integrations/:name/client
#[derive(Deserialize)]
pub struct ClientAppRequest {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    pub user_id: Option<String>,
}

#[derive(Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Create integrations API router
pub fn create_integrations_router(state: IntegrationsAppState) -> Router {
    Router::new()
        .route("/api/integrations", get(list_integrations))
        .route("/api/integrations/:name", get(get_integration))
        .route("/api/integrations/:name", delete(delete_integration))
        .route("/api/integrations/:name/token", post(store_token))
        .route("/api/integrations/:name/client", post(store_client))
        .route("/api/integrations/:name/disconnect", post(disconnect))
        .with_state(Arc::new(state))
}

fn auth_flow_name(flow: AuthFlow) -> &'static str {
    match flow {
        AuthFlow::AuthorizationCode => "oauth2",
        AuthFlow::ImplicitToken => "token",
    }
}

fn status_for(
    state: &IntegrationsAppState,
    name: &str,
    record: Option<&IntegrationRecord>,
) -> Option<IntegrationStatus> {
    let spec = find_provider(name)?;
    let metadata = record.map(|r| &r.metadata);

    let summary = record.map(IntegrationSummary::from).unwrap_or(IntegrationSummary {
        integration: name.to_string(),
        is_connected: false,
        email: None,
        name: None,
        expires_at: None,
        has_client_override: false,
    });

    Some(IntegrationStatus {
        display_name: spec.display_name.to_string(),
        auth_flow: auth_flow_name(spec.flow).to_string(),
        client_configured: OAuthProviderConfig::resolve(spec, &state.oauth, metadata).is_some(),
        summary,
    })
}

fn require_integration(name: &str) -> Result<(), AppError> {
    if find_provider(name).is_none() {
        return Err(AppError::NotFound(format!(
            "Integration '{}' not found",
            name
        )));
    }
    Ok(())
}

/// GET /api/integrations - Status of every supported integration
async fn list_integrations(
    State(state): State<Arc<IntegrationsAppState>>,
    headers: HeaderMap,
    Query(query): Query<UserQuery>,
) -> Result<Json<ListIntegrationsResponse>, AppError> {
    let user_id = state
        .authenticator
        .resolve_user(&headers, query.user_id.as_deref())?;

    debug!(user_id = %user_id, "Listing integrations");

    let mut integrations = Vec::with_capacity(PROVIDERS.len());
    for spec in PROVIDERS {
        let record = state.credential_store.get(&user_id, spec.name).map_err(|e| {
            warn!(error = %e, integration = spec.name, "Failed to read credentials");
            AppError::InternalServerError("Failed to read credentials".to_string())
        })?;
        if let Some(status) = status_for(&state, spec.name, record.as_ref()) {
            integrations.push(status);
        }
    }

    Ok(Json(ListIntegrationsResponse { integrations }))
}

/// GET /api/integrations/:name - Status of one integration
async fn get_integration(
    State(state): State<Arc<IntegrationsAppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Query(query): Query<UserQuery>,
) -> Result<Json<IntegrationStatus>, AppError> {
    require_integration(&name)?;

    let user_id = state
        .authenticator
        .resolve_user(&headers, query.user_id.as_deref())?;

    let record = state.credential_store.get(&user_id, &name).map_err(|e| {
        warn!(error = %e, "Failed to read credentials");
        AppError::InternalServerError("Failed to read credentials".to_string())
    })?;

    status_for(&state, &name, record.as_ref())
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Integration '{}' not found", name)))
}

/// POST /api/integrations/:name/token - Store a token obtained outside the
/// redirect flow (Trello token, Twitter OAuth 1.0a access token, PATs)
async fn store_token(
    State(state): State<Arc<IntegrationsAppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Json(body): Json<TokenRequest>,
) -> Result<Json<SuccessResponse>, AppError> {
    require_integration(&name)?;

    let user_id = state
        .authenticator
        .resolve_user(&headers, body.user_id.as_deref())?;

    if body.token.trim().is_empty() {
        return Err(AppError::BadRequest("Token must not be empty".to_string()));
    }

    let expires_at = match body.expires_in {
        Some(seconds) => Some(expiry_after(seconds).ok_or_else(|| {
            AppError::BadRequest(format!("expires_in out of range: {}", seconds))
        })?),
        None => None,
    };

    debug!(integration = %name, user_id = %user_id, "Storing token for integration");

    let existing = state.credential_store.get(&user_id, &name).map_err(|e| {
        warn!(error = %e, "Failed to read credentials");
        AppError::InternalServerError("Failed to read credentials".to_string())
    })?;

    let mut metadata = existing.map(|r| r.metadata).unwrap_or_default();
    metadata.token_secret = body.token_secret.filter(|s| !s.is_empty());

    let credentials = Credentials {
        access_token: body.token.trim().to_string(),
        refresh_token: body.refresh_token,
        expires_at,
    };

    state
        .credential_store
        .store(&user_id, &name, &credentials, &metadata)
        .map_err(|e| {
            warn!(error = %e, "Failed to store credentials");
            AppError::InternalServerError("Failed to store credentials".to_string())
        })?;

    info!(integration = %name, user_id = %user_id, "Token stored successfully");

    Ok(Json(SuccessResponse { success: true }))
}

/// POST /api/integrations/:name/client - Store a per-user OAuth client
async fn store_client(
    State(state): State<Arc<IntegrationsAppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Json(body): Json<ClientAppRequest>,
) -> Result<Json<SuccessResponse>, AppError> {
    require_integration(&name)?;

    let user_id = state
        .authenticator
        .resolve_user(&headers, body.user_id.as_deref())?;

    if body.client_id.trim().is_empty() {
        return Err(AppError::BadRequest("client_id must not be empty".to_string()));
    }

    state
        .credential_store
        .store_client_app(&user_id, &name, body.client_id.trim(), body.client_secret.trim())
        .map_err(|e| {
            warn!(error = %e, "Failed to store client app");
            AppError::InternalServerError("Failed to store client app".to_string())
        })?;

    info!(integration = %name, user_id = %user_id, "Client app stored");

    Ok(Json(SuccessResponse { success: true }))
}

/// POST /api/integrations/:name/disconnect - Clear tokens, keep client override
async fn disconnect(
    State(state): State<Arc<IntegrationsAppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
    body: Option<Json<UserQuery>>,
) -> Result<Json<SuccessResponse>, AppError> {
    require_integration(&name)?;

    let requested = body.and_then(|Json(b)| b.user_id);
    let user_id = state
        .authenticator
        .resolve_user(&headers, requested.as_deref())?;

    let disconnected = state
        .credential_store
        .disconnect(&user_id, &name)
        .map_err(|e| {
            warn!(error = %e, "Failed to disconnect");
            AppError::InternalServerError("Failed to disconnect integration".to_string())
        })?;

    if !disconnected {
        return Err(AppError::NotFound(format!(
            "No credentials found for integration '{}'",
            name
        )));
    }

    info!(integration = %name, user_id = %user_id, "Integration disconnected");

    Ok(Json(SuccessResponse { success: true }))
}

/// DELETE /api/integrations/:name - Remove the credential row entirely
async fn delete_integration(
    State(state): State<Arc<IntegrationsAppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Query(query): Query<UserQuery>,
) -> Result<Json<SuccessResponse>, AppError> {
    require_integration(&name)?;

    let user_id = state
        .authenticator
        .resolve_user(&headers, query.user_id.as_deref())?;

    let deleted = state.credential_store.delete(&user_id, &name).map_err(|e| {
        warn!(error = %e, "Failed to delete credentials");
        AppError::InternalServerError("Failed to delete credentials".to_string())
    })?;

    if !deleted {
        return Err(AppError::NotFound(format!(
            "No credentials found for integration '{}'",
            name
        )));
    }

    info!(integration = %name, user_id = %user_id, "Credentials deleted");

    Ok(Json(SuccessResponse { success: true }))
}
