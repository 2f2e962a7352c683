// Integration tests for the OAuth connect flow

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use bizhub::api::{create_router, ApiState, Authenticator, StateManager};
use bizhub::config::{ClientCredentials, EndpointOverride, OAuthConfig};
use bizhub::credentials::{generate_key, CredentialStore};
use mockito::{Matcher, Server, ServerGuard};
use std::sync::Arc;
use tower::ServiceExt;

const APP_URL: &str = "http://localhost:5173/integrations";

struct TestApp {
    router: Router,
    store: Arc<CredentialStore>,
    states: StateManager,
}

fn oauth_config(mock_url: Option<&str>, with_client: bool) -> OAuthConfig {
    let mut oauth = OAuthConfig::default();
    if with_client {
        oauth.clients.insert(
            "google".to_string(),
            ClientCredentials {
                client_id: Some("google-client".to_string()),
                client_secret: Some("google-secret".to_string()),
            },
        );
    }
    if let Some(url) = mock_url {
        oauth.endpoints.insert(
            "gmail".to_string(),
            EndpointOverride {
                auth_url: None,
                token_url: Some(format!("{}/token", url)),
                userinfo_url: Some(format!("{}/userinfo", url)),
            },
        );
    }
    oauth
}

fn create_test_app(oauth: OAuthConfig, authenticator: Authenticator) -> TestApp {
    let store = Arc::new(CredentialStore::new(":memory:", &generate_key()).unwrap());
    let states = StateManager::new(600);

    let state = ApiState {
        credential_store: Arc::clone(&store),
        authenticator,
        oauth: Arc::new(oauth),
        state_manager: states.clone(),
        http: reqwest::Client::new(),
        public_base_url: "http://localhost:3000".to_string(),
        app_redirect_url: APP_URL.to_string(),
    };

    TestApp {
        router: create_router(state),
        store,
        states,
    }
}

async fn init(app: &TestApp, integration: &str, body: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/integrations/{}/oauth/init", integration))
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

async fn callback(app: &TestApp, query: &str) -> String {
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/integrations/gmail/oauth/callback?{}", query))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

async fn mock_google(
    server: &mut ServerGuard,
    code: &str,
    access_token: &str,
) -> (mockito::Mock, mockito::Mock) {
    let userinfo = server
        .mock("GET", "/userinfo")
        .with_status(200)
        .with_body(r#"{"id":"1","email":"u1@gmail.com","name":"User One"}"#)
        .create_async()
        .await;

    let token = server
        .mock("POST", "/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
            Matcher::UrlEncoded("code".into(), code.into()),
        ]))
        .with_status(200)
        .with_body(format!(
            r#"{{"access_token":"{}","refresh_token":"refresh","expires_in":3600}}"#,
            access_token
        ))
        .create_async()
        .await;

    (token, userinfo)
}

#[tokio::test]
async fn test_init_without_client_id_fails() {
    let app = create_test_app(oauth_config(None, false), Authenticator::disabled());

    let (status, json) = init(&app, "gmail", r#"{"user_id":"u1"}"#).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("gmail"));
    assert!(json.get("auth_url").is_none());
    assert_eq!(app.states.count(), 0);
}

#[tokio::test]
async fn test_start_without_client_id_does_not_redirect() {
    let app = create_test_app(oauth_config(None, false), Authenticator::disabled());

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/integrations/gmail/oauth/start?user_id=u1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(response.headers().get(header::LOCATION).is_none());
}

#[tokio::test]
async fn test_init_unknown_integration() {
    let app = create_test_app(oauth_config(None, true), Authenticator::disabled());

    let (status, _) = init(&app, "github", "{}").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_init_returns_auth_url_and_state() {
    let app = create_test_app(oauth_config(None, true), Authenticator::disabled());

    let (status, json) = init(&app, "gmail", r#"{"user_id":"u1"}"#).await;
    assert_eq!(status, StatusCode::OK);

    let state = json["state"].as_str().unwrap();
    let auth_url = json["auth_url"].as_str().unwrap();
    assert!(auth_url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
    assert!(auth_url.contains("client_id=google-client"));
    assert!(auth_url.contains(&format!("state={}", state)));
    assert!(auth_url.contains(
        "redirect_uri=http%3A%2F%2Flocalhost%3A3000%2Fapi%2Fintegrations%2Fgmail%2Foauth%2Fcallback"
    ));
    assert_eq!(app.states.count(), 1);
}

#[tokio::test]
async fn test_start_redirects_to_provider() {
    let app = create_test_app(oauth_config(None, true), Authenticator::disabled());

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/integrations/google_calendar/oauth/start?prompt=select_account")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    let location = response.headers().get(header::LOCATION).unwrap().to_str().unwrap();
    assert!(location.contains("prompt=select_account"));
    assert!(location.contains("access_type=offline"));
}

#[tokio::test]
async fn test_init_requires_session_when_auth_enabled() {
    let app = create_test_app(
        oauth_config(None, true),
        Authenticator::jwt("jwt-secret-for-tests-0123456789abcdef", "authenticated"),
    );

    let (status, _) = init(&app, "gmail", "{}").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_callback_success_stores_credentials() {
    let mut server = Server::new_async().await;
    let (token_mock, _userinfo) = mock_google(&mut server, "abc", "access-1").await;
    let app = create_test_app(
        oauth_config(Some(&server.url()), true),
        Authenticator::disabled(),
    );

    let (_, json) = init(&app, "gmail", r#"{"user_id":"u1"}"#).await;
    let state = json["state"].as_str().unwrap().to_string();

    let location = callback(&app, &format!("code=abc&state={}", state)).await;

    token_mock.assert_async().await;
    assert_eq!(
        location,
        format!("{}?integration=gmail&status=connected", APP_URL)
    );

    let record = app.store.get_connected("u1", "gmail").unwrap().unwrap();
    let creds = record.credentials.unwrap();
    assert_eq!(creds.access_token, "access-1");
    assert_eq!(creds.refresh_token.as_deref(), Some("refresh"));
    assert!(creds.expires_at.is_some());
    assert_eq!(record.metadata.email.as_deref(), Some("u1@gmail.com"));
}

#[tokio::test]
async fn test_repeat_callback_overwrites_row() {
    let mut server = Server::new_async().await;
    let app = create_test_app(
        oauth_config(Some(&server.url()), true),
        Authenticator::disabled(),
    );

    let (first, _userinfo_a) = mock_google(&mut server, "a", "access-1").await;
    let (_, json) = init(&app, "gmail", r#"{"user_id":"u1"}"#).await;
    callback(&app, &format!("code=a&state={}", json["state"].as_str().unwrap())).await;
    first.assert_async().await;

    let (_second, _userinfo_b) = mock_google(&mut server, "b", "access-2").await;
    let (_, json) = init(&app, "gmail", r#"{"user_id":"u1"}"#).await;
    let location =
        callback(&app, &format!("code=b&state={}", json["state"].as_str().unwrap())).await;
    assert!(location.ends_with("status=connected"));

    let rows = app.store.list_by_user("u1").unwrap();
    assert_eq!(rows.len(), 1);

    let record = app.store.get("u1", "gmail").unwrap().unwrap();
    assert_eq!(record.credentials.unwrap().access_token, "access-2");
}

#[tokio::test]
async fn test_token_error_writes_no_row() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/token")
        .with_status(400)
        .with_body(r#"{"error":"invalid_grant"}"#)
        .create_async()
        .await;
    let app = create_test_app(
        oauth_config(Some(&server.url()), true),
        Authenticator::disabled(),
    );

    let (_, json) = init(&app, "gmail", r#"{"user_id":"u1"}"#).await;
    let location = callback(
        &app,
        &format!("code=abc&state={}", json["state"].as_str().unwrap()),
    )
    .await;

    assert_eq!(
        location,
        format!(
            "{}?integration=gmail&status=error&reason=token_exchange_failed",
            APP_URL
        )
    );
    assert!(app.store.get("u1", "gmail").unwrap().is_none());
}

#[tokio::test]
async fn test_bogus_expiry_in_token_response_writes_no_row() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/token")
        .with_status(200)
        .with_body(r#"{"access_token":"a","expires_in":9999999999999}"#)
        .create_async()
        .await;
    let app = create_test_app(
        oauth_config(Some(&server.url()), true),
        Authenticator::disabled(),
    );

    let (_, json) = init(&app, "gmail", r#"{"user_id":"u1"}"#).await;
    let location = callback(
        &app,
        &format!("code=abc&state={}", json["state"].as_str().unwrap()),
    )
    .await;

    assert_eq!(
        location,
        format!(
            "{}?integration=gmail&status=error&reason=token_exchange_failed",
            APP_URL
        )
    );
    assert!(app.store.get("u1", "gmail").unwrap().is_none());
}

#[tokio::test]
async fn test_profile_failure_still_connects() {
    let mut server = Server::new_async().await;
    let _token = server
        .mock("POST", "/token")
        .with_status(200)
        .with_body(r#"{"access_token":"tok"}"#)
        .create_async()
        .await;
    let _userinfo = server
        .mock("GET", "/userinfo")
        .with_status(500)
        .create_async()
        .await;
    let app = create_test_app(
        oauth_config(Some(&server.url()), true),
        Authenticator::disabled(),
    );

    let (_, json) = init(&app, "gmail", "{}").await;
    let location = callback(
        &app,
        &format!("code=abc&state={}", json["state"].as_str().unwrap()),
    )
    .await;

    assert!(location.ends_with("status=connected"));
    let record = app.store.get_connected("default", "gmail").unwrap().unwrap();
    assert!(record.metadata.email.is_none());
}

#[tokio::test]
async fn test_state_is_single_use() {
    let mut server = Server::new_async().await;
    let _mocks = mock_google(&mut server, "abc", "access-1").await;
    let app = create_test_app(
        oauth_config(Some(&server.url()), true),
        Authenticator::disabled(),
    );

    let (_, json) = init(&app, "gmail", r#"{"user_id":"u1"}"#).await;
    let query = format!("code=abc&state={}", json["state"].as_str().unwrap());

    assert!(callback(&app, &query).await.ends_with("status=connected"));
    assert!(callback(&app, &query)
        .await
        .ends_with("status=error&reason=invalid_state"));
}

#[tokio::test]
async fn test_callback_failures_redirect_with_reason() {
    let app = create_test_app(oauth_config(None, true), Authenticator::disabled());

    let location = callback(&app, "error=access_denied&error_description=User+cancelled").await;
    assert!(location.ends_with("status=error&reason=access_denied"));

    let location = callback(&app, "state=whatever").await;
    assert!(location.ends_with("reason=missing_code"));

    let location = callback(&app, "code=abc&state=forged").await;
    assert!(location.ends_with("reason=invalid_state"));
}

#[tokio::test]
async fn test_callback_state_for_other_integration_rejected() {
    let app = create_test_app(oauth_config(None, true), Authenticator::disabled());

    let (_, json) = init(&app, "google_calendar", "{}").await;
    let location = callback(
        &app,
        &format!("code=abc&state={}", json["state"].as_str().unwrap()),
    )
    .await;

    assert!(location.ends_with("reason=invalid_state"));
}
