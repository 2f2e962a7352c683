use async_trait::async_trait;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use bizhub::api::AuthError;
use bizhub::credentials::{Credentials, IntegrationMetadata};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

/// Stored account an action runs against: fresh tokens plus profile metadata.
#[derive(Debug, Clone)]
pub struct ConnectedAccount {
    pub user_id: String,
    pub integration: String,
    pub credentials: Credentials,
    pub metadata: IntegrationMetadata,
}

/// Action adapter interface.
///
/// One adapter performs one action against one provider using a stored
/// token. Adapters are stateless apart from their HTTP client and base URL;
/// credentials are looked up (and refreshed) by the caller.
///
/// # Lifecycle
/// 1. `validate(payload)` runs before any credential lookup
/// 2. The caller resolves the user's connected account (403 if absent)
/// 3. `execute(account, payload)` performs exactly one upstream call
///
/// # Example
/// ```no_run
/// use action_adapters::{ActionAdapter, ActionError, ConnectedAccount};
/// use async_trait::async_trait;
/// use serde_json::{json, Value};
///
/// struct EchoAdapter;
///
/// #[async_trait]
/// impl ActionAdapter for EchoAdapter {
///     fn integration(&self) -> &str {
///         "echo"
///     }
///
///     fn action(&self) -> &str {
///         "say"
///     }
///
///     fn validate(&self, _payload: &Value) -> Result<(), ActionError> {
///         Ok(())
///     }
///
///     async fn execute(
///         &self,
///         _account: &ConnectedAccount,
///         payload: &Value,
///     ) -> Result<Value, ActionError> {
///         Ok(json!({ "echo": payload }))
///     }
/// }
/// ```
#[async_trait]
pub trait ActionAdapter: Send + Sync {
    /// Integration name, matching the credential store key (e.g. "twitter").
    fn integration(&self) -> &str;

    /// Action name within the integration (e.g. "post_tweet").
    fn action(&self) -> &str;

    /// Check the payload shape and limits. Must not touch the network.
    fn validate(&self, payload: &Value) -> Result<(), ActionError>;

    /// Perform the action. Returns the provider's identifiers for the
    /// created object.
    async fn execute(
        &self,
        account: &ConnectedAccount,
        payload: &Value,
    ) -> Result<Value, ActionError>;
}

/// Errors surfaced by the actions and payments API
#[derive(Debug, PartialEq)]
pub enum ActionError {
    /// Payload failed validation
    InvalidInput(String),
    /// Server-side keys missing (payment provider, Twitter consumer keys)
    NotConfigured(String),
    Unauthorized(String),
    Forbidden(String),
    /// No stored, connected token for this user and integration
    NotConnected(String),
    /// Unknown integration, action, provider or record
    NotFound(String),
    /// Provider returned non-2xx or was unreachable
    Upstream(String),
    Internal(String),
}

impl ActionError {
    pub fn status(&self) -> StatusCode {
        match self {
            ActionError::InvalidInput(_) | ActionError::NotConfigured(_) => StatusCode::BAD_REQUEST,
            ActionError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ActionError::Forbidden(_) | ActionError::NotConnected(_) => StatusCode::FORBIDDEN,
            ActionError::NotFound(_) => StatusCode::NOT_FOUND,
            ActionError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ActionError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &str {
        match self {
            ActionError::InvalidInput(msg)
            | ActionError::NotConfigured(msg)
            | ActionError::Unauthorized(msg)
            | ActionError::Forbidden(msg)
            | ActionError::NotConnected(msg)
            | ActionError::NotFound(msg)
            | ActionError::Upstream(msg)
            | ActionError::Internal(msg) => msg,
        }
    }
}

impl std::fmt::Display for ActionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for ActionError {}

#[derive(Serialize)]
struct ErrorResponse<'a> {
    error: &'a str,
}

impl IntoResponse for ActionError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.message(),
        });
        (self.status(), body).into_response()
    }
}

impl From<AuthError> for ActionError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Unauthorized(msg) => ActionError::Unauthorized(msg),
            AuthError::Forbidden(msg) => ActionError::Forbidden(msg),
        }
    }
}

/// Deserialize an action payload, mapping serde errors to 400.
pub fn parse_payload<T: DeserializeOwned>(payload: &Value) -> Result<T, ActionError> {
    serde_json::from_value(payload.clone())
        .map_err(|e| ActionError::InvalidInput(format!("Invalid payload: {}", e)))
}

/// Require a non-blank string field.
pub fn require_text<'a>(field: &str, value: &'a str) -> Result<&'a str, ActionError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ActionError::InvalidInput(format!("'{}' must not be empty", field)));
    }
    Ok(trimmed)
}

/// Send a request and map transport failures and non-2xx answers to 502.
///
/// The upstream status and body are kept in the message.
pub async fn send_upstream(
    provider: &str,
    request: reqwest::RequestBuilder,
) -> Result<reqwest::Response, ActionError> {
    let response = request.send().await.map_err(|e| {
        ActionError::Upstream(format!("{} request failed: {}", provider, e))
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(ActionError::Upstream(format!(
            "{} API error {}: {}",
            provider, status, body
        )));
    }

    Ok(response)
}

/// Parse an upstream JSON body, mapping failures to 502.
pub async fn upstream_json<T: DeserializeOwned>(
    provider: &str,
    response: reqwest::Response,
) -> Result<T, ActionError> {
    response.json::<T>().await.map_err(|e| {
        ActionError::Upstream(format!("Failed to parse {} response: {}", provider, e))
    })
}
