//! Twitter (X) `post_tweet` action.
//!
//! Accounts connected through OAuth 2.0 carry a bearer token. Accounts
//! connected manually with an OAuth 1.0a access token also carry a
//! `token_secret` in metadata; those requests are signed with the app's
//! consumer keys instead.

pub mod api;
pub mod signature;

use async_trait::async_trait;
use bizhub::config::TwitterConfig;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::adapter::{parse_payload, require_text, ActionAdapter, ActionError, ConnectedAccount};
use api::{TwitterAuth, TwitterClient};
use signature::OAuth1Keys;

pub const MAX_TWEET_CHARS: usize = 280;

#[derive(Debug, Deserialize)]
struct TweetPayload {
    text: String,
}

pub struct PostTweetAdapter {
    client: TwitterClient,
    consumer: TwitterConfig,
}

impl PostTweetAdapter {
    pub fn new(client: TwitterClient, consumer: TwitterConfig) -> Self {
        Self { client, consumer }
    }

    fn tweet_text(payload: &Value) -> Result<String, ActionError> {
        let payload: TweetPayload = parse_payload(payload)?;
        let text = require_text("text", &payload.text)?;
        let length = text.chars().count();
        if length > MAX_TWEET_CHARS {
            return Err(ActionError::InvalidInput(format!(
                "Tweet is {} characters; the limit is {}",
                length, MAX_TWEET_CHARS
            )));
        }
        Ok(text.to_string())
    }
}

#[async_trait]
impl ActionAdapter for PostTweetAdapter {
    fn integration(&self) -> &str {
        "twitter"
    }

    fn action(&self) -> &str {
        "post_tweet"
    }

    fn validate(&self, payload: &Value) -> Result<(), ActionError> {
        Self::tweet_text(payload).map(|_| ())
    }

    async fn execute(
        &self,
        account: &ConnectedAccount,
        payload: &Value,
    ) -> Result<Value, ActionError> {
        let text = Self::tweet_text(payload)?;

        let auth = match account.metadata.token_secret.as_deref() {
            Some(token_secret) => {
                let (Some(consumer_key), Some(consumer_secret)) = (
                    self.consumer.consumer_key.as_deref(),
                    self.consumer.consumer_secret.as_deref(),
                ) else {
                    return Err(ActionError::NotConfigured(
                        "Twitter consumer keys are not configured (BIZHUB_TWITTER_CONSUMER_KEY, BIZHUB_TWITTER_CONSUMER_SECRET)".to_string(),
                    ));
                };
                TwitterAuth::OAuth1(OAuth1Keys {
                    consumer_key,
                    consumer_secret,
                    token: &account.credentials.access_token,
                    token_secret,
                })
            }
            None => TwitterAuth::Bearer(&account.credentials.access_token),
        };

        let tweet = self.client.post_tweet(&auth, &text).await?;
        info!(user_id = %account.user_id, tweet_id = %tweet.id, "Tweet posted");

        Ok(json!({
            "id": tweet.id,
            "url": format!("https://twitter.com/i/web/status/{}", tweet.id),
        }))
    }
}
