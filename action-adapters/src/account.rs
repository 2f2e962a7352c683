//! Connected-account lookup with token refresh.

use crate::adapter::{ActionError, ConnectedAccount};
use bizhub::api::oauth::{find_provider, refresh_access_token, OAuthProviderConfig};
use bizhub::config::OAuthConfig;
use bizhub::credentials::{CredentialStore, Credentials, IntegrationRecord};
use chrono::Duration;
use std::sync::Arc;
use tracing::{info, warn};

/// Tokens this close to expiry are refreshed before use
pub const REFRESH_MARGIN_SECONDS: i64 = 60;

/// Loads a user's connected account for an integration, refreshing the
/// access token when it is about to expire and writing the result back.
#[derive(Clone)]
pub struct AccountResolver {
    store: Arc<CredentialStore>,
    oauth: Arc<OAuthConfig>,
    http: reqwest::Client,
}

impl AccountResolver {
    pub fn new(
        store: Arc<CredentialStore>,
        oauth: Arc<OAuthConfig>,
        http: reqwest::Client,
    ) -> Self {
        Self { store, oauth, http }
    }

    pub async fn connected_account(
        &self,
        user_id: &str,
        integration: &str,
    ) -> Result<ConnectedAccount, ActionError> {
        let not_connected =
            || ActionError::NotConnected(format!("{} is not connected", integration));

        let record = self
            .store
            .get_connected(user_id, integration)
            .map_err(|e| {
                warn!(
                    integration = %integration,
                    user_id = %user_id,
                    error = %e,
                    "Failed to read credentials"
                );
                ActionError::Internal("Failed to read stored credentials".to_string())
            })?
            .ok_or_else(not_connected)?;

        let credentials = record
            .connected_credentials()
            .cloned()
            .ok_or_else(not_connected)?;

        let margin = Duration::seconds(REFRESH_MARGIN_SECONDS);
        let credentials = if credentials.expires_within(margin) {
            self.refresh(&record, credentials).await?
        } else {
            credentials
        };

        Ok(ConnectedAccount {
            user_id: record.user_id,
            integration: record.integration,
            credentials,
            metadata: record.metadata,
        })
    }

    /// Refresh `current`. A failed refresh keeps the old token while it is
    /// still valid; an expired token that cannot be refreshed means the
    /// user has to reconnect. A row disconnected while the refresh was in
    /// flight is not connected.
    async fn refresh(
        &self,
        record: &IntegrationRecord,
        current: Credentials,
    ) -> Result<Credentials, ActionError> {
        let integration = record.integration.as_str();

        match self.try_refresh(record, &current).await {
            Ok(Some(fresh)) => {
                let updated = self
                    .store
                    .update_tokens(&record.user_id, integration, &fresh)
                    .map_err(|e| {
                        warn!(
                            integration = %integration,
                            error = %e,
                            "Failed to write refreshed token"
                        );
                        ActionError::Internal("Failed to store refreshed token".to_string())
                    })?;
                if !updated {
                    warn!(
                        integration = %integration,
                        user_id = %record.user_id,
                        "Integration disconnected during token refresh"
                    );
                    return Err(ActionError::NotConnected(format!(
                        "{} is not connected",
                        integration
                    )));
                }
                info!(
                    integration = %integration,
                    user_id = %record.user_id,
                    "Access token refreshed"
                );
                Ok(fresh)
            }
            Ok(None) if !current.expires_within(Duration::zero()) => Ok(current),
            Ok(None) => Err(ActionError::NotConnected(format!(
                "{} token expired and cannot be refreshed; reconnect the integration",
                integration
            ))),
            Err(e) if !current.expires_within(Duration::zero()) => {
                warn!(
                    integration = %integration,
                    error = %e,
                    "Token refresh failed, using current token"
                );
                Ok(current)
            }
            Err(e) => Err(ActionError::Upstream(format!(
                "{} token refresh failed: {}",
                integration, e
            ))),
        }
    }

    /// `Ok(None)` when refresh is not possible (no refresh token or client).
    async fn try_refresh(
        &self,
        record: &IntegrationRecord,
        current: &Credentials,
    ) -> anyhow::Result<Option<Credentials>> {
        let Some(refresh_token) = current.refresh_token.as_deref() else {
            return Ok(None);
        };
        let Some(spec) = find_provider(&record.integration) else {
            return Ok(None);
        };
        let Some(provider) = OAuthProviderConfig::resolve(spec, &self.oauth, Some(&record.metadata))
        else {
            return Ok(None);
        };
        let Some(endpoint) = provider.token_endpoint() else {
            return Ok(None);
        };

        refresh_access_token(&self.http, &endpoint, refresh_token)
            .await
            .map(Some)
    }
}
