use crate::auth::SessionVerifier;
use crate::config::AuthConfig;
use anyhow::{anyhow, Result};
use axum::http::HeaderMap;


/// Authorization errors
#[derive(Debug, PartialEq)]
pub enum AuthError {
    /// Missing, malformed, expired or forged session token
    Unauthorized(String),
    /// Valid session acting on another user's records
    Forbidden(String),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AuthError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
        }
    }
}

/// User id used when auth is disabled and the request names none
pub const DEFAULT_USER: &str = "default";

/// Resolves which user a request acts for.
///
/// With auth enabled the session token's `sub` is authoritative; a request
/// may repeat it as `user_id` but may not name anyone else. With auth
/// disabled the request's `user_id` is trusted, falling back to
/// [`DEFAULT_USER`].
#[derive(Clone)]
pub struct Authenticator {
    verifier: Option<SessionVerifier>,
}

impl Authenticator {
    pub fn disabled() -> Self {
        Self { verifier: None }
    }

    pub fn jwt(secret: &str, audience: &str) -> Self {
        Self {
            verifier: Some(SessionVerifier::new(secret, audience)),
        }
    }

    /// Build from `[auth]`. Enabling auth without a JWT secret is a config error.
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        if !config.enabled {
            return Ok(Self::disabled());
        }

        let secret = config
            .jwt_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                anyhow!("auth.enabled is set but no JWT secret is configured (BIZHUB_JWT_SECRET)")
            })?;

        Ok(Self::jwt(secret, &config.audience))
    }

    pub fn is_enabled(&self) -> bool {
        self.verifier.is_some()
    }

    pub fn resolve_user(
        &self,
        headers: &HeaderMap,
        requested: Option<&str>,
    ) -> Result<String, AuthError> {
        let requested = requested.map(str::trim).filter(|s| !s.is_empty());

        let Some(verifier) = &self.verifier else {
            return Ok(requested.unwrap_or(DEFAULT_USER).to_string());
        };

        let user_id = verifier
            .authenticate(headers)
            .map_err(|e| AuthError::Unauthorized(e.to_string()))?;

        match requested {
            Some(other) if other != user_id => Err(AuthError::Forbidden(format!(
                "Session user does not match user_id '{}'",
                other
            ))),
            _ => Ok(user_id),
        }
    }
}
