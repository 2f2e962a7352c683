//! Display data extracted after a successful exchange.
//!
//! Google, Microsoft, Twitter and LinkedIn expose a profile endpoint; Notion
//! and Slack put the account details in the token response itself.

use crate::credentials::IntegrationMetadata;
use serde_json::{Map, Value};

fn string_at(value: &Value, pointer: &str) -> Option<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Build profile metadata for `integration` from the userinfo body (if one
/// was fetched) and the raw token response.
pub fn parse_profile(
    integration: &str,
    userinfo: Option<&Value>,
    token: &Value,
) -> IntegrationMetadata {
    let empty = Value::Null;
    let info = userinfo.unwrap_or(&empty);

    match integration {
        "gmail" | "google_calendar" => IntegrationMetadata {
            email: string_at(info, "/email"),
            name: string_at(info, "/name"),
            account_id: string_at(info, "/id"),
            ..Default::default()
        },
        "outlook" => IntegrationMetadata {
            email: string_at(info, "/mail").or_else(|| string_at(info, "/userPrincipalName")),
            name: string_at(info, "/displayName"),
            account_id: string_at(info, "/id"),
            ..Default::default()
        },
        "twitter" => {
            let mut extra = Map::new();
            if let Some(username) = string_at(info, "/data/username") {
                extra.insert("username".to_string(), Value::String(username));
            }
            IntegrationMetadata {
                name: string_at(info, "/data/name"),
                account_id: string_at(info, "/data/id"),
                extra,
                ..Default::default()
            }
        }
        "linkedin" => IntegrationMetadata {
            email: string_at(info, "/email"),
            name: string_at(info, "/name"),
            account_id: string_at(info, "/sub"),
            ..Default::default()
        },
        "notion" => {
            let mut extra = Map::new();
            if let Some(workspace) = string_at(token, "/workspace_name") {
                extra.insert("workspace_name".to_string(), Value::String(workspace));
            }
            IntegrationMetadata {
                email: string_at(token, "/owner/user/person/email"),
                name: string_at(token, "/owner/user/name"),
                account_id: string_at(token, "/workspace_id"),
                extra,
                ..Default::default()
            }
        }
        "slack" => IntegrationMetadata {
            name: string_at(token, "/team/name"),
            account_id: string_at(token, "/team/id"),
            ..Default::default()
        },
        _ => IntegrationMetadata::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_google_profile() {
        let info = json!({"id": "1234", "email": "me@gmail.com", "name": "Me"});
        let profile = parse_profile("gmail", Some(&info), &json!({}));

        assert_eq!(profile.email.as_deref(), Some("me@gmail.com"));
        assert_eq!(profile.name.as_deref(), Some("Me"));
        assert_eq!(profile.account_id.as_deref(), Some("1234"));
    }

    #[test]
    fn test_outlook_falls_back_to_principal_name() {
        let info = json!({"id": "abc", "mail": null, "userPrincipalName": "me@contoso.com", "displayName": "Me"});
        let profile = parse_profile("outlook", Some(&info), &json!({}));

        assert_eq!(profile.email.as_deref(), Some("me@contoso.com"));
        assert_eq!(profile.name.as_deref(), Some("Me"));
    }

    #[test]
    fn test_twitter_profile() {
        let info = json!({"data": {"id": "42", "name": "Jack", "username": "jack"}});
        let profile = parse_profile("twitter", Some(&info), &json!({}));

        assert_eq!(profile.account_id.as_deref(), Some("42"));
        assert_eq!(profile.name.as_deref(), Some("Jack"));
        assert_eq!(profile.extra["username"], "jack");
        assert!(profile.email.is_none());
    }

    #[test]
    fn test_linkedin_profile_uses_sub() {
        let info = json!({"sub": "782bbtaQ", "name": "Ada", "email": "ada@example.com"});
        let profile = parse_profile("linkedin", Some(&info), &json!({}));

        assert_eq!(profile.account_id.as_deref(), Some("782bbtaQ"));
    }

    #[test]
    fn test_notion_profile_from_token_response() {
        let token = json!({
            "access_token": "secret_x",
            "workspace_id": "ws-1",
            "workspace_name": "Acme",
            "owner": {"type": "user", "user": {"name": "Ada", "person": {"email": "ada@acme.com"}}}
        });
        let profile = parse_profile("notion", None, &token);

        assert_eq!(profile.email.as_deref(), Some("ada@acme.com"));
        assert_eq!(profile.name.as_deref(), Some("Ada"));
        assert_eq!(profile.account_id.as_deref(), Some("ws-1"));
        assert_eq!(profile.extra["workspace_name"], "Acme");
    }

    #[test]
    fn test_slack_profile_from_token_response() {
        let token = json!({"ok": true, "access_token": "xoxb", "team": {"id": "T1", "name": "Team"}});
        let profile = parse_profile("slack", None, &token);

        assert_eq!(profile.name.as_deref(), Some("Team"));
        assert_eq!(profile.account_id.as_deref(), Some("T1"));
    }

    #[test]
    fn test_missing_userinfo_is_empty() {
        assert_eq!(
            parse_profile("gmail", None, &json!({})),
            IntegrationMetadata::default()
        );
    }
}
