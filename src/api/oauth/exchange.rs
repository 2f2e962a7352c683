//! OAuth token endpoint calls.
//!
//! Authorization-code exchange, refresh-token grant and the profile fetch
//! that follows a successful exchange.

use super::provider::{ClientAuth, TokenBody};
use crate::credentials::{expiry_after, Credentials};
use anyhow::{anyhow, Context, Result};
use serde_json::{Map, Value};

/// Token endpoint plus the client credentials to present there
#[derive(Debug, Clone)]
pub struct TokenEndpoint<'a> {
    pub url: &'a str,
    pub client_id: &'a str,
    pub client_secret: &'a str,
    pub client_auth: ClientAuth,
    pub body: TokenBody,
}

/// Result of a successful token request
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub credentials: Credentials,
    /// Full token response; some providers put profile data here
    pub raw: Value,
}

/// Exchange an authorization code for tokens (`grant_type=authorization_code`).
pub async fn exchange_code_for_token(
    client: &reqwest::Client,
    endpoint: &TokenEndpoint<'_>,
    code: &str,
    redirect_uri: &str,
    code_verifier: Option<&str>,
) -> Result<TokenGrant> {
    let mut params = vec![
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", redirect_uri),
    ];
    if let Some(verifier) = code_verifier {
        params.push(("code_verifier", verifier));
    }

    tracing::debug!("Exchanging authorization code for token at {}", endpoint.url);
    request_token(client, endpoint, params).await
}

/// Obtain a new access token from a refresh token (`grant_type=refresh_token`).
///
/// Providers that do not rotate refresh tokens omit it from the response;
/// the old one is kept in that case.
pub async fn refresh_access_token(
    client: &reqwest::Client,
    endpoint: &TokenEndpoint<'_>,
    refresh_token: &str,
) -> Result<Credentials> {
    let params = vec![
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
    ];

    tracing::debug!("Refreshing access token at {}", endpoint.url);
    let grant = request_token(client, endpoint, params).await?;

    let mut credentials = grant.credentials;
    if credentials.refresh_token.is_none() {
        credentials.refresh_token = Some(refresh_token.to_string());
    }
    Ok(credentials)
}

async fn request_token(
    client: &reqwest::Client,
    endpoint: &TokenEndpoint<'_>,
    mut params: Vec<(&str, &str)>,
) -> Result<TokenGrant> {
    let mut request = client
        .post(endpoint.url)
        .header("Accept", "application/json");

    match endpoint.client_auth {
        ClientAuth::Basic => {
            request = request.basic_auth(endpoint.client_id, Some(endpoint.client_secret));
        }
        ClientAuth::RequestBody => {
            params.push(("client_id", endpoint.client_id));
            params.push(("client_secret", endpoint.client_secret));
        }
    }

    request = match endpoint.body {
        TokenBody::Form => request.form(&params),
        TokenBody::Json => {
            let body: Map<String, Value> = params
                .iter()
                .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
                .collect();
            request.json(&body)
        }
    };

    let response = request
        .send()
        .await
        .context("Failed to send token request")?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(anyhow!(
            "Token request failed with status {}: {}",
            status,
            body
        ));
    }

    let raw: Value = response
        .json()
        .await
        .context("Failed to parse token response")?;

    let credentials = parse_token_response(&raw)?;

    tracing::debug!(
        "Token request successful, has_refresh_token={}, has_expiry={}",
        credentials.refresh_token.is_some(),
        credentials.expires_at.is_some()
    );

    Ok(TokenGrant { credentials, raw })
}

/// Pull tokens out of a standard OAuth 2.0 token response.
///
/// Slack answers 200 with `"ok": false` on failure, so that flag is honoured.
fn parse_token_response(raw: &Value) -> Result<Credentials> {
    if raw.get("ok").and_then(Value::as_bool) == Some(false) {
        let error = raw
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        return Err(anyhow!("Token request rejected: {}", error));
    }

    let access_token = raw
        .get("access_token")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| anyhow!("Token response missing access_token"))?
        .to_string();

    let refresh_token = raw
        .get("refresh_token")
        .and_then(Value::as_str)
        .map(str::to_string);

    // Usually a number, occasionally a numeric string
    let expires_in = raw.get("expires_in").and_then(|v| {
        v.as_i64()
            .or_else(|| v.as_str().and_then(|s| s.parse::<i64>().ok()))
    });

    let expires_at = match expires_in {
        Some(seconds) => Some(
            expiry_after(seconds)
                .ok_or_else(|| anyhow!("Token response has invalid expires_in: {}", seconds))?,
        ),
        None => None,
    };

    Ok(Credentials {
        access_token,
        refresh_token,
        expires_at,
    })
}

/// GET a userinfo/profile resource with the fresh access token.
pub async fn fetch_profile(
    client: &reqwest::Client,
    url: &str,
    access_token: &str,
) -> Result<Value> {
    let response = client
        .get(url)
        .bearer_auth(access_token)
        .header("Accept", "application/json")
        .send()
        .await
        .context("Failed to send profile request")?;

    let status = response.status();
    if !status.is_success() {
        return Err(anyhow!("Profile request failed with status {}", status));
    }

    response
        .json()
        .await
        .context("Failed to parse profile response")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn endpoint<'a>(url: &'a str, auth: ClientAuth, body: TokenBody) -> TokenEndpoint<'a> {
        TokenEndpoint {
            url,
            client_id: "client-id",
            client_secret: "client-secret",
            client_auth: auth,
            body,
        }
    }

    #[test]
    fn test_token_response_full() {
        let raw = json!({
            "access_token": "ya29.token",
            "refresh_token": "1//refresh",
            "expires_in": 3599,
            "token_type": "Bearer"
        });

        let creds = parse_token_response(&raw).unwrap();
        assert_eq!(creds.access_token, "ya29.token");
        assert_eq!(creds.refresh_token.as_deref(), Some("1//refresh"));
        let remaining = creds.expires_at.unwrap() - Utc::now();
        assert!(remaining.num_seconds() > 3500 && remaining.num_seconds() <= 3599);
    }

    #[test]
    fn test_token_response_minimal() {
        let creds = parse_token_response(&json!({"access_token": "t"})).unwrap();
        assert_eq!(creds.access_token, "t");
        assert!(creds.refresh_token.is_none());
        assert!(creds.expires_at.is_none());
    }

    #[test]
    fn test_token_response_string_expiry() {
        let creds =
            parse_token_response(&json!({"access_token": "t", "expires_in": "60"})).unwrap();
        assert!(creds.expires_at.is_some());
    }

    #[test]
    fn test_token_response_invalid_expiry_rejected() {
        let huge = json!({"access_token": "t", "expires_in": 9_999_999_999_999i64});
        assert!(parse_token_response(&huge).is_err());
        let negative = json!({"access_token": "t", "expires_in": -1});
        assert!(parse_token_response(&negative).is_err());
    }

    #[test]
    fn test_token_response_missing_access_token() {
        assert!(parse_token_response(&json!({"token_type": "Bearer"})).is_err());
        assert!(parse_token_response(&json!({"access_token": ""})).is_err());
    }

    #[test]
    fn test_slack_ok_false_rejected() {
        let err = parse_token_response(&json!({"ok": false, "error": "invalid_code"}))
            .unwrap_err();
        assert!(err.to_string().contains("invalid_code"));
    }

    #[tokio::test]
    async fn test_exchange_form_body_credentials() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                Matcher::UrlEncoded("code".into(), "auth-code".into()),
                Matcher::UrlEncoded("redirect_uri".into(), "http://localhost/cb".into()),
                Matcher::UrlEncoded("client_id".into(), "client-id".into()),
                Matcher::UrlEncoded("client_secret".into(), "client-secret".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"tok","refresh_token":"ref","expires_in":3600}"#)
            .create_async()
            .await;

        let url = format!("{}/token", server.url());
        let grant = exchange_code_for_token(
            &reqwest::Client::new(),
            &endpoint(&url, ClientAuth::RequestBody, TokenBody::Form),
            "auth-code",
            "http://localhost/cb",
            None,
        )
        .await
        .unwrap();

        mock.assert_async().await;
        assert_eq!(grant.credentials.access_token, "tok");
        assert_eq!(grant.raw["refresh_token"], "ref");
    }

    #[tokio::test]
    async fn test_exchange_basic_auth_with_pkce() {
        let mut server = Server::new_async().await;
        // base64("client-id:client-secret")
        let mock = server
            .mock("POST", "/2/oauth2/token")
            .match_header(
                "authorization",
                "Basic Y2xpZW50LWlkOmNsaWVudC1zZWNyZXQ=",
            )
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("code_verifier".into(), "verifier-123".into()),
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"tw-token","expires_in":7200}"#)
            .create_async()
            .await;

        let url = format!("{}/2/oauth2/token", server.url());
        let grant = exchange_code_for_token(
            &reqwest::Client::new(),
            &endpoint(&url, ClientAuth::Basic, TokenBody::Form),
            "code",
            "http://localhost/cb",
            Some("verifier-123"),
        )
        .await
        .unwrap();

        mock.assert_async().await;
        assert_eq!(grant.credentials.access_token, "tw-token");
    }

    #[tokio::test]
    async fn test_exchange_json_body() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/oauth/token")
            .match_body(Matcher::PartialJson(json!({
                "grant_type": "authorization_code",
                "code": "notion-code"
            })))
            .with_status(200)
            .with_body(r#"{"access_token":"secret_abc","workspace_name":"Acme"}"#)
            .create_async()
            .await;

        let url = format!("{}/v1/oauth/token", server.url());
        let grant = exchange_code_for_token(
            &reqwest::Client::new(),
            &endpoint(&url, ClientAuth::Basic, TokenBody::Json),
            "notion-code",
            "http://localhost/cb",
            None,
        )
        .await
        .unwrap();

        mock.assert_async().await;
        assert_eq!(grant.raw["workspace_name"], "Acme");
    }

    #[tokio::test]
    async fn test_exchange_non_success_status() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let url = format!("{}/token", server.url());
        let err = exchange_code_for_token(
            &reqwest::Client::new(),
            &endpoint(&url, ClientAuth::RequestBody, TokenBody::Form),
            "bad",
            "http://localhost/cb",
            None,
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("400"));
        assert!(err.to_string().contains("invalid_grant"));
    }

    #[tokio::test]
    async fn test_refresh_keeps_old_refresh_token() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "old-refresh".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"new-access","expires_in":3600}"#)
            .create_async()
            .await;

        let url = format!("{}/token", server.url());
        let creds = refresh_access_token(
            &reqwest::Client::new(),
            &endpoint(&url, ClientAuth::RequestBody, TokenBody::Form),
            "old-refresh",
        )
        .await
        .unwrap();

        assert_eq!(creds.access_token, "new-access");
        assert_eq!(creds.refresh_token.as_deref(), Some("old-refresh"));
    }

    #[tokio::test]
    async fn test_fetch_profile() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/userinfo")
            .match_header("authorization", "Bearer tok")
            .with_status(200)
            .with_body(r#"{"email":"me@example.com","name":"Me"}"#)
            .create_async()
            .await;

        let profile = fetch_profile(
            &reqwest::Client::new(),
            &format!("{}/userinfo", server.url()),
            "tok",
        )
        .await
        .unwrap();
        assert_eq!(profile["email"], "me@example.com");

        let err = fetch_profile(
            &reqwest::Client::new(),
            &format!("{}/missing", server.url()),
            "tok",
        )
        .await;
        assert!(err.is_err());
    }
}
