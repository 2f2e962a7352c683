//! OAuth 2.0 connect flow for integrations.
//!
//! 1. SPA calls `POST /api/integrations/:name/oauth/init` (or navigates to
//!    `GET .../oauth/start`) and is sent to the provider
//! 2. User authorizes on the provider's site
//! 3. Provider redirects to `GET .../oauth/callback`
//! 4. Code is exchanged for tokens, the profile is fetched, and one
//!    credential row per (user, integration) is upserted
//! 5. Browser lands back on the app with `?integration=<name>&status=...`

pub mod exchange;
pub mod profile;
pub mod provider;
mod state_manager;

pub use exchange::{exchange_code_for_token, fetch_profile, refresh_access_token, TokenEndpoint};
pub use provider::{find_provider, is_valid_integration, AuthFlow, OAuthProviderConfig};
pub use state_manager::{run_state_cleanup, StateEntry, StateManager};

use super::auth_middleware::Authenticator;
use super::error::AppError;
use crate::config::OAuthConfig;
use crate::credentials::CredentialStore;
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{Json, Redirect},
    routing::{get, post},
    Router,
};
use provider::AuthUrlParams;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Shared application state for OAuth API
#[derive(Clone)]
pub struct OAuthAppState {
    pub credential_store: Arc<CredentialStore>,
    pub state_manager: StateManager,
    pub authenticator: Authenticator,
    pub oauth: Arc<OAuthConfig>,
    pub http: reqwest::Client,
    /// Public base URL of this service; callbacks are built from it
    pub callback_base_url: String,
    /// SPA page the callback redirects back to
    pub app_redirect_url: String,
}

/// Body of `POST .../oauth/init`, query of `GET .../oauth/start`
#[derive(Debug, Default, Deserialize)]
pub struct OAuthInitRequest {
    pub user_id: Option<String>,
    pub scope: Option<String>,
    pub prompt: Option<String>,
    pub access_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OAuthInitResponse {
    pub auth_url: String,
    /// Absent for the token flow, which never reaches the callback
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// OAuth callback query parameters
#[derive(Deserialize)]
pub struct OAuthCallback {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Create OAuth API router
pub fn create_oauth_router(state: OAuthAppState) -> Router {
    Router::new()
        .route("/api/integrations/:name/oauth/init", post(oauth_init))
        .route("/api/integrations/:name/oauth/start", get(oauth_start))
        .route("/api/integrations/:name/oauth/callback", get(oauth_callback))
        .with_state(Arc::new(state))
}

fn callback_uri(base: &str, integration: &str) -> String {
    format!(
        "{}/api/integrations/{}/oauth/callback",
        base.trim_end_matches('/'),
        integration
    )
}

/// Append query parameters to an SPA URL that may already carry some.
pub fn app_redirect(base: &str, query: &[(&str, &str)]) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    let encoded: Vec<String> = query
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect();
    format!("{}{}{}", base, separator, encoded.join("&"))
}

/// POST /api/integrations/:name/oauth/init
///
/// Returns the authorize URL for the SPA to navigate to.
async fn oauth_init(
    State(state): State<Arc<OAuthAppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Option<Json<OAuthInitRequest>>,
) -> Result<Json<OAuthInitResponse>, AppError> {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let response = begin_authorization(&state, &name, &headers, &request)?;
    Ok(Json(response))
}

/// GET /api/integrations/:name/oauth/start
///
/// Same as init, answered with a 307 to the provider.
async fn oauth_start(
    State(state): State<Arc<OAuthAppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Query(request): Query<OAuthInitRequest>,
) -> Result<Redirect, AppError> {
    let response = begin_authorization(&state, &name, &headers, &request)?;
    Ok(Redirect::temporary(&response.auth_url))
}

/// Resolve user and client, mint a state, build the authorize URL.
///
/// Nothing is recorded and no URL is produced when no client id resolves.
fn begin_authorization(
    state: &OAuthAppState,
    name: &str,
    headers: &HeaderMap,
    request: &OAuthInitRequest,
) -> Result<OAuthInitResponse, AppError> {
    debug!(integration = %name, "OAuth init requested");

    let spec = find_provider(name).ok_or_else(|| {
        warn!(integration = %name, "Unknown integration");
        AppError::NotFound(format!("Integration '{}' not found", name))
    })?;

    let user_id = state
        .authenticator
        .resolve_user(headers, request.user_id.as_deref())?;

    let stored = state.credential_store.get(&user_id, name).map_err(|e| {
        error!(integration = %name, user_id = %user_id, error = %e, "Failed to read credentials");
        AppError::InternalServerError("Failed to read stored credentials".to_string())
    })?;

    let provider_config =
        OAuthProviderConfig::resolve(spec, &state.oauth, stored.as_ref().map(|r| &r.metadata))
            .ok_or_else(|| {
                warn!(integration = %name, user_id = %user_id, "No OAuth client id configured");
                AppError::BadRequest(format!(
                    "OAuth client not configured for '{}'. Set BIZHUB_OAUTH_{}_CLIENT_ID or store a client via POST /api/integrations/{}/client",
                    name,
                    name.to_uppercase(),
                    name
                ))
            })?;

    let params = AuthUrlParams {
        scope: request.scope.as_deref(),
        prompt: request.prompt.as_deref(),
        access_type: request.access_type.as_deref(),
        ..Default::default()
    };

    let response = match spec.flow {
        AuthFlow::AuthorizationCode => {
            let code_verifier = spec.pkce.then(provider::generate_code_verifier);
            let challenge = code_verifier.as_deref().map(provider::code_challenge);
            let csrf_state = state
                .state_manager
                .create_state(name, &user_id, code_verifier);
            let redirect_uri = callback_uri(&state.callback_base_url, name);

            let auth_url = provider_config.build_auth_url(&AuthUrlParams {
                state: Some(&csrf_state),
                redirect_uri: &redirect_uri,
                code_challenge: challenge.as_deref(),
                ..params
            });

            OAuthInitResponse {
                auth_url,
                state: Some(csrf_state),
            }
        }
        AuthFlow::ImplicitToken => {
            let return_url = app_redirect(&state.app_redirect_url, &[("integration", name)]);
            OAuthInitResponse {
                auth_url: provider_config.build_auth_url(&AuthUrlParams {
                    redirect_uri: &return_url,
                    ..params
                }),
                state: None,
            }
        }
    };

    info!(
        integration = %name,
        user_id = %user_id,
        client_source = ?provider_config.source,
        "Redirecting to OAuth provider"
    );

    Ok(response)
}

/// GET /api/integrations/:name/oauth/callback
///
/// Always answers with a redirect to the app; failures become
/// `status=error&reason=<code>`.
async fn oauth_callback(
    State(state): State<Arc<OAuthAppState>>,
    Path(name): Path<String>,
    Query(callback): Query<OAuthCallback>,
) -> Redirect {
    debug!(integration = %name, "OAuth callback received");

    let target = match complete_authorization(&state, &name, callback).await {
        Ok(()) => app_redirect(
            &state.app_redirect_url,
            &[("integration", name.as_str()), ("status", "connected")],
        ),
        Err(reason) => app_redirect(
            &state.app_redirect_url,
            &[
                ("integration", name.as_str()),
                ("status", "error"),
                ("reason", reason.as_str()),
            ],
        ),
    };

    Redirect::to(&target)
}

async fn complete_authorization(
    state: &OAuthAppState,
    name: &str,
    callback: OAuthCallback,
) -> Result<(), String> {
    if let Some(error) = callback.error {
        warn!(
            integration = %name,
            error = %error,
            description = callback.error_description.as_deref().unwrap_or("none"),
            "OAuth authorization failed"
        );
        return Err(error);
    }

    let spec = find_provider(name).ok_or_else(|| {
        warn!(integration = %name, "Callback for unknown integration");
        "unknown_integration".to_string()
    })?;

    let code = callback.code.ok_or_else(|| "missing_code".to_string())?;
    let csrf_state = callback.state.ok_or_else(|| "missing_state".to_string())?;

    let entry = state
        .state_manager
        .validate_and_consume(&csrf_state)
        .ok_or_else(|| {
            warn!(integration = %name, "Invalid or expired OAuth state");
            "invalid_state".to_string()
        })?;

    if entry.integration != name {
        error!(
            expected = %entry.integration,
            actual = %name,
            "Integration name mismatch"
        );
        return Err("invalid_state".to_string());
    }

    let user_id = entry.user_id;

    let stored = state.credential_store.get(&user_id, name).map_err(|e| {
        error!(integration = %name, user_id = %user_id, error = %e, "Failed to read credentials");
        "storage_failed".to_string()
    })?;

    let provider_config =
        OAuthProviderConfig::resolve(spec, &state.oauth, stored.as_ref().map(|r| &r.metadata))
            .ok_or_else(|| "missing_credentials".to_string())?;

    if spec.flow != AuthFlow::AuthorizationCode {
        return Err("unsupported_flow".to_string());
    }

    let endpoint = provider_config.token_endpoint().ok_or_else(|| {
        warn!(integration = %name, "OAuth client secret not configured");
        "missing_credentials".to_string()
    })?;

    let redirect_uri = callback_uri(&state.callback_base_url, name);

    let grant = exchange_code_for_token(
        &state.http,
        &endpoint,
        &code,
        &redirect_uri,
        entry.code_verifier.as_deref(),
    )
    .await
    .map_err(|e| {
        error!(integration = %name, user_id = %user_id, error = %e, "Token exchange failed");
        "token_exchange_failed".to_string()
    })?;

    let userinfo = match &provider_config.userinfo_url {
        Some(url) => match fetch_profile(&state.http, url, &grant.credentials.access_token).await {
            Ok(info) => Some(info),
            Err(e) => {
                warn!(
                    integration = %name,
                    error = %e,
                    "Profile fetch failed, continuing without it"
                );
                None
            }
        },
        None => None,
    };

    let profile = profile::parse_profile(name, userinfo.as_ref(), &grant.raw);
    let metadata = match &stored {
        Some(record) => record.metadata.with_profile(profile),
        None => profile,
    };

    state
        .credential_store
        .store(&user_id, name, &grant.credentials, &metadata)
        .map_err(|e| {
            error!(
                integration = %name,
                user_id = %user_id,
                error = %e,
                "Failed to store credentials"
            );
            "storage_failed".to_string()
        })?;

    info!(
        integration = %name,
        user_id = %user_id,
        has_refresh_token = grant.credentials.refresh_token.is_some(),
        "OAuth flow completed successfully"
    );

    Ok(())
}
