//! Outlook `create_draft` action via Microsoft Graph.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::google::DraftPayload;
use crate::adapter::{
    parse_payload, send_upstream, upstream_json, ActionAdapter, ActionError, ConnectedAccount,
};

pub const BASE_URL: &str = "https://graph.microsoft.com";

fn recipients(addresses: &[String]) -> Value {
    addresses
        .iter()
        .map(|address| json!({ "emailAddress": { "address": address } }))
        .collect()
}

#[derive(Debug, Deserialize)]
struct CreatedMessage {
    id: String,
    #[serde(rename = "webLink", default)]
    web_link: Option<String>,
}

pub struct OutlookDraftAdapter {
    http_client: Client,
    base_url: String,
}

impl OutlookDraftAdapter {
    pub fn with_base_url(http_client: Client, base_url: String) -> Self {
        Self {
            http_client,
            base_url,
        }
    }
}

#[async_trait]
impl ActionAdapter for OutlookDraftAdapter {
    fn integration(&self) -> &str {
        "outlook"
    }

    fn action(&self) -> &str {
        "create_draft"
    }

    fn validate(&self, payload: &Value) -> Result<(), ActionError> {
        parse_payload::<DraftPayload>(payload)?.check().map(|_| ())
    }

    async fn execute(
        &self,
        account: &ConnectedAccount,
        payload: &Value,
    ) -> Result<Value, ActionError> {
        let draft: DraftPayload = parse_payload(payload)?;
        let (to, cc) = draft.check()?;

        let body = json!({
            "subject": draft.subject,
            "body": { "contentType": "Text", "content": draft.body },
            "toRecipients": recipients(&to),
            "ccRecipients": recipients(&cc),
        });

        let request = self
            .http_client
            .post(format!("{}/v1.0/me/messages", self.base_url))
            .bearer_auth(&account.credentials.access_token)
            .json(&body);

        let response = send_upstream("Microsoft Graph", request).await?;
        let created: CreatedMessage = upstream_json("Microsoft Graph", response).await?;
        info!(user_id = %account.user_id, "Outlook draft created");

        Ok(json!({
            "id": created.id,
            "url": created.web_link,
        }))
    }
}
