use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::adapter::{
    parse_payload, require_text, send_upstream, upstream_json, ActionAdapter, ActionError,
    ConnectedAccount,
};

pub const BASE_URL: &str = "https://www.googleapis.com";

#[derive(Debug, Deserialize)]
struct EventPayload {
    summary: String,
    start: String,
    end: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    attendees: Vec<String>,
    #[serde(default)]
    calendar_id: Option<String>,
}

struct Event {
    calendar_id: String,
    body: Value,
}

fn parse_time(field: &str, value: &str) -> Result<DateTime<FixedOffset>, ActionError> {
    DateTime::parse_from_rfc3339(value).map_err(|e| {
        ActionError::InvalidInput(format!("'{}' must be an RFC 3339 timestamp: {}", field, e))
    })
}

fn build_event(payload: &Value) -> Result<Event, ActionError> {
    let payload: EventPayload = parse_payload(payload)?;
    let summary = require_text("summary", &payload.summary)?;
    let start = parse_time("start", &payload.start)?;
    let end = parse_time("end", &payload.end)?;
    if end <= start {
        return Err(ActionError::InvalidInput(
            "'end' must be after 'start'".to_string(),
        ));
    }
    if let Some(bad) = payload.attendees.iter().find(|a| !a.contains('@')) {
        return Err(ActionError::InvalidInput(format!(
            "Invalid attendee address: {}",
            bad
        )));
    }

    let mut body = json!({
        "summary": summary,
        "start": { "dateTime": start.to_rfc3339() },
        "end": { "dateTime": end.to_rfc3339() },
    });
    if let Some(description) = payload.description {
        body["description"] = json!(description);
    }
    if let Some(location) = payload.location {
        body["location"] = json!(location);
    }
    if !payload.attendees.is_empty() {
        body["attendees"] = payload
            .attendees
            .iter()
            .map(|email| json!({ "email": email }))
            .collect();
    }

    let calendar_id = payload
        .calendar_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| "primary".to_string());

    Ok(Event { calendar_id, body })
}

#[derive(Debug, Deserialize)]
struct CreatedEvent {
    id: String,
    #[serde(rename = "htmlLink", default)]
    html_link: Option<String>,
}

pub struct CreateEventAdapter {
    http_client: Client,
    base_url: String,
}

impl CreateEventAdapter {
    pub fn with_base_url(http_client: Client, base_url: String) -> Self {
        Self {
            http_client,
            base_url,
        }
    }
}

#[async_trait]
impl ActionAdapter for CreateEventAdapter {
    fn integration(&self) -> &str {
        "google_calendar"
    }

    fn action(&self) -> &str {
        "create_event"
    }

    fn validate(&self, payload: &Value) -> Result<(), ActionError> {
        build_event(payload).map(|_| ())
    }

    async fn execute(
        &self,
        account: &ConnectedAccount,
        payload: &Value,
    ) -> Result<Value, ActionError> {
        let event = build_event(payload)?;
        let url = format!(
            "{}/calendar/v3/calendars/{}/events",
            self.base_url,
            urlencoding::encode(&event.calendar_id)
        );

        let request = self
            .http_client
            .post(url)
            .bearer_auth(&account.credentials.access_token)
            .json(&event.body);

        let response = send_upstream("Google Calendar", request).await?;
        let created: CreatedEvent = upstream_json("Google Calendar", response).await?;
        info!(user_id = %account.user_id, event_id = %created.id, "Calendar event created");

        Ok(json!({
            "id": created.id,
            "url": created.html_link,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bizhub::credentials::{Credentials, IntegrationMetadata};
    use mockito::{Matcher, Server};

    fn account() -> ConnectedAccount {
        ConnectedAccount {
            user_id: "u1".to_string(),
            integration: "google_calendar".to_string(),
            credentials: Credentials {
                access_token: "cal-token".to_string(),
                refresh_token: None,
                expires_at: None,
            },
            metadata: IntegrationMetadata::default(),
        }
    }

    #[test]
    fn test_validate_times() {
        let adapter = CreateEventAdapter::with_base_url(Client::new(), BASE_URL.to_string());

        assert!(adapter
            .validate(&json!({
                "summary": "Standup",
                "start": "2024-05-01T09:00:00Z",
                "end": "2024-05-01T09:15:00Z"
            }))
            .is_ok());

        // End before start
        assert!(adapter
            .validate(&json!({
                "summary": "Standup",
                "start": "2024-05-01T09:00:00Z",
                "end": "2024-05-01T08:00:00Z"
            }))
            .is_err());

        // Not RFC 3339
        assert!(adapter
            .validate(&json!({
                "summary": "Standup",
                "start": "May 1st",
                "end": "2024-05-01T09:15:00Z"
            }))
            .is_err());

        assert!(adapter
            .validate(&json!({
                "summary": "Standup",
                "start": "2024-05-01T09:00:00Z",
                "end": "2024-05-01T09:15:00Z",
                "attendees": ["nobody"]
            }))
            .is_err());
    }

    #[test]
    fn test_offsets_compare_as_instants() {
        // 10:00+02:00 is 08:00Z, so this ends before it starts
        let result = build_event(&json!({
            "summary": "Call",
            "start": "2024-05-01T09:00:00Z",
            "end": "2024-05-01T10:00:00+02:00"
        }));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_create_event_default_calendar() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/calendar/v3/calendars/primary/events")
            .match_header("authorization", "Bearer cal-token")
            .match_body(Matcher::PartialJson(json!({
                "summary": "Planning",
                "attendees": [{"email": "bob@example.com"}]
            })))
            .with_status(200)
            .with_body(r#"{"id":"evt1","htmlLink":"https://calendar.google.com/event?eid=evt1"}"#)
            .create_async()
            .await;

        let adapter = CreateEventAdapter::with_base_url(Client::new(), server.url());
        let result = adapter
            .execute(
                &account(),
                &json!({
                    "summary": "Planning",
                    "start": "2024-05-01T09:00:00Z",
                    "end": "2024-05-01T10:00:00Z",
                    "attendees": ["bob@example.com"]
                }),
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(result["id"], "evt1");
        assert_eq!(result["url"], "https://calendar.google.com/event?eid=evt1");
    }

    #[tokio::test]
    async fn test_calendar_id_is_escaped() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock(
                "POST",
                Matcher::Regex(
                    r"^/calendar/v3/calendars/team%40group\.calendar\.google\.com/events$"
                        .to_string(),
                ),
            )
            .with_status(200)
            .with_body(r#"{"id":"evt2"}"#)
            .create_async()
            .await;

        let adapter = CreateEventAdapter::with_base_url(Client::new(), server.url());
        adapter
            .execute(
                &account(),
                &json!({
                    "summary": "Offsite",
                    "start": "2024-05-01T09:00:00Z",
                    "end": "2024-05-01T17:00:00Z",
                    "calendar_id": "team@group.calendar.google.com"
                }),
            )
            .await
            .unwrap();

        mock.assert_async().await;
    }
}
