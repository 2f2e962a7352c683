use async_trait::async_trait;
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE},
    Engine,
};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::adapter::{
    parse_payload, require_text, send_upstream, upstream_json, ActionAdapter, ActionError,
    ConnectedAccount,
};

pub const BASE_URL: &str = "https://gmail.googleapis.com";

/// Draft fields shared by the mail adapters
#[derive(Debug, Clone, Deserialize)]
pub struct DraftPayload {
    pub to: String,
    #[serde(default)]
    pub cc: Option<String>,
    pub subject: String,
    #[serde(default)]
    pub body: String,
}

impl DraftPayload {
    /// Validate and return the recipient lists.
    pub fn check(&self) -> Result<(Vec<String>, Vec<String>), ActionError> {
        for (field, value) in [
            ("to", self.to.as_str()),
            ("cc", self.cc.as_deref().unwrap_or_default()),
            ("subject", self.subject.as_str()),
        ] {
            if value.contains('\r') || value.contains('\n') {
                return Err(ActionError::InvalidInput(format!(
                    "'{}' must not contain line breaks",
                    field
                )));
            }
        }

        let to = split_addresses("to", require_text("to", &self.to)?)?;
        let cc = match self.cc.as_deref() {
            Some(cc) if !cc.trim().is_empty() => split_addresses("cc", cc)?,
            _ => Vec::new(),
        };
        Ok((to, cc))
    }
}

fn split_addresses(field: &str, value: &str) -> Result<Vec<String>, ActionError> {
    let addresses: Vec<String> = value
        .split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .collect();

    match addresses.iter().find(|a| !a.contains('@')) {
        Some(bad) => Err(ActionError::InvalidInput(format!(
            "'{}' contains an invalid address: {}",
            field, bad
        ))),
        None if addresses.is_empty() => Err(ActionError::InvalidInput(format!(
            "'{}' must name at least one address",
            field
        ))),
        None => Ok(addresses),
    }
}

/// RFC 2047 encoded-word for non-ASCII header values.
fn encode_header(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(value.as_bytes()))
    }
}

/// Build a plain-text RFC 5322 message.
pub fn build_message(to: &[String], cc: &[String], subject: &str, body: &str) -> String {
    let mut message = format!("To: {}\r\n", to.join(", "));
    if !cc.is_empty() {
        message.push_str(&format!("Cc: {}\r\n", cc.join(", ")));
    }
    message.push_str(&format!("Subject: {}\r\n", encode_header(subject)));
    message.push_str("MIME-Version: 1.0\r\n");
    message.push_str("Content-Type: text/plain; charset=\"UTF-8\"\r\n");
    message.push_str("Content-Transfer-Encoding: 8bit\r\n");
    message.push_str("\r\n");
    message.push_str(&body.replace("\r\n", "\n").replace('\n', "\r\n"));
    message
}

#[derive(Debug, Deserialize)]
struct DraftMessage {
    id: String,
    #[serde(rename = "threadId", default)]
    thread_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedDraft {
    id: String,
    message: DraftMessage,
}

pub struct CreateDraftAdapter {
    http_client: Client,
    base_url: String,
}

impl CreateDraftAdapter {
    pub fn with_base_url(http_client: Client, base_url: String) -> Self {
        Self {
            http_client,
            base_url,
        }
    }
}

#[async_trait]
impl ActionAdapter for CreateDraftAdapter {
    fn integration(&self) -> &str {
        "gmail"
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
        let raw = URL_SAFE.encode(build_message(&to, &cc, &draft.subject, &draft.body));

        let request = self
            .http_client
            .post(format!("{}/gmail/v1/users/me/drafts", self.base_url))
            .bearer_auth(&account.credentials.access_token)
            .json(&json!({ "message": { "raw": raw } }));

        let response = send_upstream("Gmail", request).await?;
        let created: CreatedDraft = upstream_json("Gmail", response).await?;
        info!(user_id = %account.user_id, draft_id = %created.id, "Gmail draft created");

        Ok(json!({
            "id": created.id,
            "message_id": created.message.id,
            "thread_id": created.message.thread_id,
        }))
    }
}
