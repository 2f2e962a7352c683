use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::signature::{authorization_header, generate_nonce, OAuth1Keys};
use crate::adapter::{send_upstream, upstream_json, ActionError};

pub const BASE_URL: &str = "https://api.twitter.com";

/// How a request is authorized against the v2 API.
pub enum TwitterAuth<'a> {
    /// OAuth 2.0 user-context access token
    Bearer(&'a str),
    /// OAuth 1.0a user-context signing
    OAuth1(OAuth1Keys<'a>),
}

#[derive(Debug, Deserialize)]
struct CreateTweetResponse {
    data: CreatedTweet,
}

/// Tweet returned by `POST /2/tweets`.
#[derive(Debug, Deserialize)]
pub struct CreatedTweet {
    pub id: String,
    #[serde(default)]
    pub text: String,
}

/// HTTP client for the Twitter v2 API.
pub struct TwitterClient {
    http_client: Client,
    base_url: String,
}

impl TwitterClient {
    pub fn with_base_url(http_client: Client, base_url: String) -> Self {
        Self {
            http_client,
            base_url,
        }
    }

    /// Publish a tweet as the authorized user.
    pub async fn post_tweet(
        &self,
        auth: &TwitterAuth<'_>,
        text: &str,
    ) -> Result<CreatedTweet, ActionError> {
        let url = format!("{}/2/tweets", self.base_url);

        let request = self.http_client.post(&url).json(&json!({ "text": text }));
        let request = match auth {
            TwitterAuth::Bearer(token) => request.bearer_auth(token),
            TwitterAuth::OAuth1(keys) => {
                // JSON bodies are not part of the signature base string
                let header = authorization_header(
                    "POST",
                    &url,
                    &[],
                    keys,
                    &generate_nonce(),
                    Utc::now().timestamp(),
                )
                .map_err(|e| ActionError::Internal(format!("Failed to sign request: {}", e)))?;
                request.header(reqwest::header::AUTHORIZATION, header)
            }
        };

        let response = send_upstream("Twitter", request).await?;
        let created: CreateTweetResponse = upstream_json("Twitter", response).await?;
        Ok(created.data)
    }
}
