//! OAuth provider registry.
//!
//! Static description of every supported integration plus resolution of
//! the client credentials and endpoints used for one flow.

use super::exchange::TokenEndpoint;
use crate::config::OAuthConfig;
use crate::credentials::IntegrationMetadata;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{distributions::Alphanumeric, Rng};
use sha2::{Digest, Sha256};

/// How the provider hands tokens back
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthFlow {
    /// Standard authorization code grant, exchanged server-side
    AuthorizationCode,
    /// Token delivered to the SPA in the URL fragment (Trello); the SPA
    /// posts it to `/api/integrations/:name/token`
    ImplicitToken,
}

/// Where client credentials go on the token request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientAuth {
    RequestBody,
    Basic,
}

/// Token request encoding
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenBody {
    Form,
    Json,
}

/// Static description of one integration
#[derive(Debug)]
pub struct ProviderSpec {
    pub name: &'static str,
    pub display_name: &'static str,
    /// Shared client configuration key ("google", "microsoft")
    pub family: Option<&'static str>,
    pub auth_url: &'static str,
    pub token_url: Option<&'static str>,
    pub userinfo_url: Option<&'static str>,
    pub default_scopes: &'static [&'static str],
    pub scope_separator: &'static str,
    pub flow: AuthFlow,
    pub client_auth: ClientAuth,
    pub token_body: TokenBody,
    /// Requires PKCE (S256)
    pub pkce: bool,
    /// Fixed authorize parameters; request-level `prompt`/`access_type` win
    pub extra_auth_params: &'static [(&'static str, &'static str)],
}

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";
const GOOGLE_EXTRA: &[(&str, &str)] = &[("access_type", "offline"), ("prompt", "consent")];

/// Every supported integration
pub const PROVIDERS: &[ProviderSpec] = &[
    ProviderSpec {
        name: "gmail",
        display_name: "Gmail",
        family: Some("google"),
        auth_url: GOOGLE_AUTH_URL,
        token_url: Some(GOOGLE_TOKEN_URL),
        userinfo_url: Some(GOOGLE_USERINFO_URL),
        default_scopes: &[
            "https://www.googleapis.com/auth/gmail.compose",
            "https://www.googleapis.com/auth/userinfo.email",
            "https://www.googleapis.com/auth/userinfo.profile",
        ],
        scope_separator: " ",
        flow: AuthFlow::AuthorizationCode,
        client_auth: ClientAuth::RequestBody,
        token_body: TokenBody::Form,
        pkce: false,
        extra_auth_params: GOOGLE_EXTRA,
    },
    ProviderSpec {
        name: "google_calendar",
        display_name: "Google Calendar",
        family: Some("google"),
        auth_url: GOOGLE_AUTH_URL,
        token_url: Some(GOOGLE_TOKEN_URL),
        userinfo_url: Some(GOOGLE_USERINFO_URL),
        default_scopes: &[
            "https://www.googleapis.com/auth/calendar.events",
            "https://www.googleapis.com/auth/userinfo.email",
        ],
        scope_separator: " ",
        flow: AuthFlow::AuthorizationCode,
        client_auth: ClientAuth::RequestBody,
        token_body: TokenBody::Form,
        pkce: false,
        extra_auth_params: GOOGLE_EXTRA,
    },
    ProviderSpec {
        name: "outlook",
        display_name: "Outlook",
        family: Some("microsoft"),
        auth_url: "https://login.microsoftonline.com/common/oauth2/v2.0/authorize",
        token_url: Some("https://login.microsoftonline.com/common/oauth2/v2.0/token"),
        userinfo_url: Some("https://graph.microsoft.com/v1.0/me"),
        default_scopes: &["offline_access", "User.Read", "Mail.ReadWrite"],
        scope_separator: " ",
        flow: AuthFlow::AuthorizationCode,
        client_auth: ClientAuth::RequestBody,
        token_body: TokenBody::Form,
        pkce: false,
        extra_auth_params: &[("response_mode", "query")],
    },
    ProviderSpec {
        name: "notion",
        display_name: "Notion",
        family: None,
        auth_url: "https://api.notion.com/v1/oauth/authorize",
        token_url: Some("https://api.notion.com/v1/oauth/token"),
        userinfo_url: None,
        default_scopes: &[],
        scope_separator: " ",
        flow: AuthFlow::AuthorizationCode,
        client_auth: ClientAuth::Basic,
        token_body: TokenBody::Json,
        pkce: false,
        extra_auth_params: &[("owner", "user")],
    },
    ProviderSpec {
        name: "slack",
        display_name: "Slack",
        family: None,
        auth_url: "https://slack.com/oauth/v2/authorize",
        token_url: Some("https://slack.com/api/oauth.v2.access"),
        userinfo_url: None,
        default_scopes: &["chat:write", "channels:read"],
        scope_separator: ",",
        flow: AuthFlow::AuthorizationCode,
        client_auth: ClientAuth::RequestBody,
        token_body: TokenBody::Form,
        pkce: false,
        extra_auth_params: &[],
    },
    ProviderSpec {
        name: "twitter",
        display_name: "X (Twitter)",
        family: None,
        auth_url: "https://twitter.com/i/oauth2/authorize",
        token_url: Some("https://api.twitter.com/2/oauth2/token"),
        userinfo_url: Some("https://api.twitter.com/2/users/me"),
        default_scopes: &["tweet.read", "tweet.write", "users.read", "offline.access"],
        scope_separator: " ",
        flow: AuthFlow::AuthorizationCode,
        client_auth: ClientAuth::Basic,
        token_body: TokenBody::Form,
        pkce: true,
        extra_auth_params: &[],
    },
    ProviderSpec {
        name: "linkedin",
        display_name: "LinkedIn",
        family: None,
        auth_url: "https://www.linkedin.com/oauth/v2/authorization",
        token_url: Some("https://www.linkedin.com/oauth/v2/accessToken"),
        userinfo_url: Some("https://api.linkedin.com/v2/userinfo"),
        default_scopes: &["openid", "profile", "email", "w_member_social"],
        scope_separator: " ",
        flow: AuthFlow::AuthorizationCode,
        client_auth: ClientAuth::RequestBody,
        token_body: TokenBody::Form,
        pkce: false,
        extra_auth_params: &[],
    },
    ProviderSpec {
        name: "trello",
        display_name: "Trello",
        family: None,
        auth_url: "https://trello.com/1/authorize",
        token_url: None,
        userinfo_url: None,
        default_scopes: &["read", "write"],
        scope_separator: ",",
        flow: AuthFlow::ImplicitToken,
        client_auth: ClientAuth::RequestBody,
        token_body: TokenBody::Form,
        pkce: false,
        extra_auth_params: &[
            ("expiration", "never"),
            ("name", "Bizhub"),
            ("callback_method", "fragment"),
        ],
    },
];

/// Look up an integration by name
pub fn find_provider(name: &str) -> Option<&'static ProviderSpec> {
    PROVIDERS.iter().find(|p| p.name == name)
}

/// Check if an integration name is supported
pub fn is_valid_integration(name: &str) -> bool {
    find_provider(name).is_some()
}

/// Where the resolved client credentials came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientSource {
    /// Stored on the user's credential row
    User,
    /// `[oauth.clients.<integration>]`
    Integration,
    /// `[oauth.clients.<family>]`
    Family,
}

/// Endpoints and client credentials for one OAuth flow
#[derive(Clone, Debug)]
pub struct OAuthProviderConfig {
    pub spec: &'static ProviderSpec,
    pub auth_url: String,
    pub token_url: Option<String>,
    pub userinfo_url: Option<String>,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub source: ClientSource,
}

/// Per-request authorize URL parameters
#[derive(Debug, Default)]
pub struct AuthUrlParams<'a> {
    pub state: Option<&'a str>,
    pub redirect_uri: &'a str,
    pub scope: Option<&'a str>,
    pub prompt: Option<&'a str>,
    pub access_type: Option<&'a str>,
    pub code_challenge: Option<&'a str>,
}

impl OAuthProviderConfig {
    /// Resolve client credentials: user override → integration client →
    /// family client. Returns `None` when no tier provides a client id.
    ///
    /// The secret always comes from the same tier as the id.
    pub fn resolve(
        spec: &'static ProviderSpec,
        oauth: &OAuthConfig,
        stored: Option<&IntegrationMetadata>,
    ) -> Option<Self> {
        let from_user = stored.and_then(|m| {
            m.client_id
                .clone()
                .map(|id| (id, m.client_secret.clone(), ClientSource::User))
        });

        let from_config = |key: &str, source: ClientSource| {
            oauth.client(key).and_then(|c| {
                c.client_id
                    .clone()
                    .map(|id| (id, c.client_secret.clone(), source))
            })
        };

        let (client_id, client_secret, source) = from_user
            .or_else(|| from_config(spec.name, ClientSource::Integration))
            .or_else(|| spec.family.and_then(|f| from_config(f, ClientSource::Family)))?;

        if client_id.trim().is_empty() {
            return None;
        }

        let overrides = oauth.endpoints.get(spec.name);
        let pick = |o: Option<&String>, default: Option<&str>| {
            o.cloned().or_else(|| default.map(str::to_string))
        };

        Some(Self {
            spec,
            auth_url: overrides
                .and_then(|o| o.auth_url.clone())
                .unwrap_or_else(|| spec.auth_url.to_string()),
            token_url: pick(overrides.and_then(|o| o.token_url.as_ref()), spec.token_url),
            userinfo_url: pick(
                overrides.and_then(|o| o.userinfo_url.as_ref()),
                spec.userinfo_url,
            ),
            client_id,
            client_secret: client_secret.filter(|s| !s.is_empty()),
            source,
        })
    }

    /// Token endpoint for code exchange and refresh. `None` for the token
    /// flow or when no client secret was resolved.
    pub fn token_endpoint(&self) -> Option<TokenEndpoint<'_>> {
        Some(TokenEndpoint {
            url: self.token_url.as_deref()?,
            client_id: &self.client_id,
            client_secret: self.client_secret.as_deref()?,
            client_auth: self.spec.client_auth,
            body: self.spec.token_body,
        })
    }

    /// Scope string: requested scopes if given, else the provider defaults.
    pub fn scope(&self, requested: Option<&str>) -> String {
        match requested.map(str::trim).filter(|s| !s.is_empty()) {
            Some(scope) => scope.to_string(),
            None => self.spec.default_scopes.join(self.spec.scope_separator),
        }
    }

    /// Build the authorize URL the browser is sent to.
    pub fn build_auth_url(&self, params: &AuthUrlParams<'_>) -> String {
        let mut query: Vec<(&str, String)> = Vec::new();

        match self.spec.flow {
            AuthFlow::AuthorizationCode => {
                query.push(("client_id", self.client_id.clone()));
                query.push(("redirect_uri", params.redirect_uri.to_string()));
                query.push(("response_type", "code".to_string()));
            }
            AuthFlow::ImplicitToken => {
                query.push(("key", self.client_id.clone()));
                query.push(("return_url", params.redirect_uri.to_string()));
                query.push(("response_type", "token".to_string()));
            }
        }

        let scope = self.scope(params.scope);
        if !scope.is_empty() {
            query.push(("scope", scope));
        }

        if let Some(state) = params.state {
            query.push(("state", state.to_string()));
        }

        if let Some(challenge) = params.code_challenge {
            query.push(("code_challenge", challenge.to_string()));
            query.push(("code_challenge_method", "S256".to_string()));
        }

        let overridden = [("prompt", params.prompt), ("access_type", params.access_type)];
        for &(key, value) in self.spec.extra_auth_params {
            let request_value = overridden
                .iter()
                .find(|(k, _)| *k == key)
                .and_then(|(_, v)| *v);
            query.push((key, request_value.unwrap_or(value).to_string()));
        }
        for (key, value) in overridden {
            let already = self.spec.extra_auth_params.iter().any(|(k, _)| *k == key);
            if let (false, Some(value)) = (already, value) {
                query.push((key, value.to_string()));
            }
        }

        let encoded: Vec<String> = query
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect();

        format!("{}?{}", self.auth_url, encoded.join("&"))
    }
}

/// Random PKCE code verifier (RFC 7636 §4.1, 64 characters)
pub fn generate_code_verifier() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect()
}

/// S256 code challenge for `verifier`
pub fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClientCredentials, EndpointOverride};

    fn oauth_with(clients: &[(&str, &str, &str)]) -> OAuthConfig {
        let mut oauth = OAuthConfig::default();
        for (name, id, secret) in clients {
            oauth.clients.insert(
                name.to_string(),
                ClientCredentials {
                    client_id: Some(id.to_string()),
                    client_secret: Some(secret.to_string()),
                },
            );
        }
        oauth
    }

    #[test]
    fn test_valid_integration_names() {
        for name in [
            "gmail",
            "google_calendar",
            "outlook",
            "notion",
            "slack",
            "twitter",
            "linkedin",
            "trello",
        ] {
            assert!(is_valid_integration(name), "{} should be valid", name);
        }
        assert!(!is_valid_integration("github"));
        assert!(!is_valid_integration(""));
    }

    #[test]
    fn test_resolve_without_client_is_none() {
        let spec = find_provider("gmail").unwrap();
        assert!(OAuthProviderConfig::resolve(spec, &OAuthConfig::default(), None).is_none());

        // An override row without a client id does not count
        let stored = IntegrationMetadata::default();
        assert!(
            OAuthProviderConfig::resolve(spec, &OAuthConfig::default(), Some(&stored)).is_none()
        );
    }

    #[test]
    fn test_resolution_order() {
        let spec = find_provider("gmail").unwrap();
        let oauth = oauth_with(&[("google", "family-id", "family-secret")]);

        let config = OAuthProviderConfig::resolve(spec, &oauth, None).unwrap();
        assert_eq!(config.client_id, "family-id");
        assert_eq!(config.source, ClientSource::Family);

        let oauth = oauth_with(&[
            ("google", "family-id", "family-secret"),
            ("gmail", "gmail-id", "gmail-secret"),
        ]);
        let config = OAuthProviderConfig::resolve(spec, &oauth, None).unwrap();
        assert_eq!(config.client_id, "gmail-id");
        assert_eq!(config.source, ClientSource::Integration);

        let stored = IntegrationMetadata {
            client_id: Some("user-id".to_string()),
            client_secret: Some("user-secret".to_string()),
            ..Default::default()
        };
        let config = OAuthProviderConfig::resolve(spec, &oauth, Some(&stored)).unwrap();
        assert_eq!(config.client_id, "user-id");
        assert_eq!(config.client_secret.as_deref(), Some("user-secret"));
        assert_eq!(config.source, ClientSource::User);
    }

    #[test]
    fn test_family_does_not_apply_to_other_providers() {
        let spec = find_provider("linkedin").unwrap();
        let oauth = oauth_with(&[("google", "family-id", "family-secret")]);
        assert!(OAuthProviderConfig::resolve(spec, &oauth, None).is_none());
    }

    #[test]
    fn test_endpoint_overrides() {
        let spec = find_provider("gmail").unwrap();
        let mut oauth = oauth_with(&[("gmail", "id", "secret")]);
        oauth.endpoints.insert(
            "gmail".to_string(),
            EndpointOverride {
                token_url: Some("http://127.0.0.1:1234/token".to_string()),
                ..Default::default()
            },
        );

        let config = OAuthProviderConfig::resolve(spec, &oauth, None).unwrap();
        assert_eq!(config.token_url.as_deref(), Some("http://127.0.0.1:1234/token"));
        assert_eq!(config.auth_url, GOOGLE_AUTH_URL);
        assert_eq!(config.userinfo_url.as_deref(), Some(GOOGLE_USERINFO_URL));

        let endpoint = config.token_endpoint().unwrap();
        assert_eq!(endpoint.url, "http://127.0.0.1:1234/token");
        assert_eq!(endpoint.client_secret, "secret");
        assert_eq!(endpoint.client_auth, ClientAuth::RequestBody);
    }

    #[test]
    fn test_build_google_auth_url() {
        let spec = find_provider("gmail").unwrap();
        let oauth = oauth_with(&[("gmail", "test_client_id", "secret")]);
        let config = OAuthProviderConfig::resolve(spec, &oauth, None).unwrap();

        let url = config.build_auth_url(&AuthUrlParams {
            state: Some("random_state"),
            redirect_uri: "http://localhost:3000/callback",
            ..Default::default()
        });

        assert!(url.starts_with(GOOGLE_AUTH_URL));
        assert!(url.contains("client_id=test_client_id"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A3000%2Fcallback"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("state=random_state"));
        assert!(url.contains(
            "scope=https%3A%2F%2Fwww.googleapis.com%2Fauth%2Fgmail.compose%20https%3A%2F%2F"
        ));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
    }

    #[test]
    fn test_request_params_override_defaults() {
        let spec = find_provider("gmail").unwrap();
        let oauth = oauth_with(&[("gmail", "id", "secret")]);
        let config = OAuthProviderConfig::resolve(spec, &oauth, None).unwrap();

        let url = config.build_auth_url(&AuthUrlParams {
            state: Some("s"),
            redirect_uri: "http://localhost/cb",
            scope: Some("openid email"),
            prompt: Some("select_account"),
            access_type: Some("online"),
            code_challenge: None,
        });

        assert!(url.contains("scope=openid%20email"));
        assert!(url.contains("prompt=select_account"));
        assert!(url.contains("access_type=online"));
        assert!(!url.contains("prompt=consent"));
        assert_eq!(url.matches("prompt=").count(), 1);
    }

    #[test]
    fn test_prompt_added_when_provider_has_no_default() {
        let spec = find_provider("linkedin").unwrap();
        let oauth = oauth_with(&[("linkedin", "id", "secret")]);
        let config = OAuthProviderConfig::resolve(spec, &oauth, None).unwrap();

        let url = config.build_auth_url(&AuthUrlParams {
            state: Some("s"),
            redirect_uri: "http://localhost/cb",
            prompt: Some("login"),
            ..Default::default()
        });
        assert!(url.contains("prompt=login"));
        assert!(!url.contains("access_type"));
    }

    #[test]
    fn test_slack_scopes_comma_separated() {
        let spec = find_provider("slack").unwrap();
        let oauth = oauth_with(&[("slack", "id", "secret")]);
        let config = OAuthProviderConfig::resolve(spec, &oauth, None).unwrap();

        assert_eq!(config.scope(None), "chat:write,channels:read");
    }

    #[test]
    fn test_notion_has_no_scope_param() {
        let spec = find_provider("notion").unwrap();
        let oauth = oauth_with(&[("notion", "id", "secret")]);
        let config = OAuthProviderConfig::resolve(spec, &oauth, None).unwrap();

        let url = config.build_auth_url(&AuthUrlParams {
            state: Some("s"),
            redirect_uri: "http://localhost/cb",
            ..Default::default()
        });
        assert!(!url.contains("scope="));
        assert!(url.contains("owner=user"));
    }

    #[test]
    fn test_trello_token_flow_url() {
        let spec = find_provider("trello").unwrap();
        let oauth = oauth_with(&[("trello", "api-key", "")]);
        let config = OAuthProviderConfig::resolve(spec, &oauth, None).unwrap();
        assert!(config.client_secret.is_none());

        let url = config.build_auth_url(&AuthUrlParams {
            redirect_uri: "http://localhost:5173/integrations",
            ..Default::default()
        });
        assert!(config.token_endpoint().is_none());
        assert!(url.contains("key=api-key"));
        assert!(url.contains("return_url=http%3A%2F%2Flocalhost%3A5173%2Fintegrations"));
        assert!(url.contains("response_type=token"));
        assert!(url.contains("scope=read%2Cwrite"));
        assert!(url.contains("expiration=never"));
        assert!(!url.contains("client_id="));
        assert!(!url.contains("state="));
    }

    #[test]
    fn test_pkce_challenge_known_answer() {
        // RFC 7636 Appendix B
        assert_eq!(
            code_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_code_verifier_shape() {
        let verifier = generate_code_verifier();
        assert_eq!(verifier.len(), 64);
        assert!(verifier.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(generate_code_verifier(), verifier);
    }

    #[test]
    fn test_twitter_url_carries_challenge() {
        let spec = find_provider("twitter").unwrap();
        let oauth = oauth_with(&[("twitter", "id", "secret")]);
        let config = OAuthProviderConfig::resolve(spec, &oauth, None).unwrap();

        let url = config.build_auth_url(&AuthUrlParams {
            state: Some("s"),
            redirect_uri: "http://localhost/cb",
            code_challenge: Some("abc"),
            ..Default::default()
        });
        assert!(url.contains("code_challenge=abc"));
        assert!(url.contains("code_challenge_method=S256"));
    }
}
