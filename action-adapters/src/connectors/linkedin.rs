//! LinkedIn `create_post` action (UGC Posts API).

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::adapter::{
    parse_payload, require_text, send_upstream, upstream_json, ActionAdapter, ActionError,
    ConnectedAccount,
};

pub const BASE_URL: &str = "https://api.linkedin.com";
pub const MAX_POST_CHARS: usize = 3000;

#[derive(Debug, Deserialize)]
struct PostPayload {
    text: String,
    #[serde(default)]
    visibility: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedPost {
    id: String,
}

pub struct CreatePostAdapter {
    http_client: Client,
    base_url: String,
}

impl CreatePostAdapter {
    pub fn with_base_url(http_client: Client, base_url: String) -> Self {
        Self {
            http_client,
            base_url,
        }
    }

    fn post(payload: &Value) -> Result<(String, &'static str), ActionError> {
        let payload: PostPayload = parse_payload(payload)?;
        let text = require_text("text", &payload.text)?;
        if text.chars().count() > MAX_POST_CHARS {
            return Err(ActionError::InvalidInput(format!(
                "Post exceeds {} characters",
                MAX_POST_CHARS
            )));
        }

        let visibility = match payload.visibility.as_deref() {
            None | Some("PUBLIC") => "PUBLIC",
            Some("CONNECTIONS") => "CONNECTIONS",
            Some(other) => {
                return Err(ActionError::InvalidInput(format!(
                    "Unsupported visibility '{}'; use PUBLIC or CONNECTIONS",
                    other
                )))
            }
        };

        Ok((text.to_string(), visibility))
    }
}

#[async_trait]
impl ActionAdapter for CreatePostAdapter {
    fn integration(&self) -> &str {
        "linkedin"
    }

    fn action(&self) -> &str {
        "create_post"
    }

    fn validate(&self, payload: &Value) -> Result<(), ActionError> {
        Self::post(payload).map(|_| ())
    }

    async fn execute(
        &self,
        account: &ConnectedAccount,
        payload: &Value,
    ) -> Result<Value, ActionError> {
        let (text, visibility) = Self::post(payload)?;

        // Person id comes from the OpenID userinfo `sub` captured at connect time
        let person_id = account.metadata.account_id.as_deref().ok_or_else(|| {
            ActionError::NotConnected(
                "LinkedIn profile id missing; reconnect the integration".to_string(),
            )
        })?;
        let author = format!("urn:li:person:{}", person_id);

        let body = json!({
            "author": author,
            "lifecycleState": "PUBLISHED",
            "specificContent": {
                "com.linkedin.ugc.ShareContent": {
                    "shareCommentary": { "text": text },
                    "shareMediaCategory": "NONE"
                }
            },
            "visibility": {
                "com.linkedin.ugc.MemberNetworkVisibility": visibility
            }
        });

        let request = self
            .http_client
            .post(format!("{}/v2/ugcPosts", self.base_url))
            .bearer_auth(&account.credentials.access_token)
            .header("X-Restli-Protocol-Version", "2.0.0")
            .json(&body);

        let response = send_upstream("LinkedIn", request).await?;
        let created: CreatedPost = upstream_json("LinkedIn", response).await?;
        info!(user_id = %account.user_id, post_id = %created.id, "LinkedIn post created");

        Ok(json!({
            "id": created.id,
            "url": format!("https://www.linkedin.com/feed/update/{}", created.id),
        }))
    }
}
