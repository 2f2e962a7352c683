//! Encrypted integration credential store.
//!
//! One row per (user, integration) pair holding OAuth tokens, expiry, a
//! connected flag and provider metadata (per-user client overrides,
//! profile email/name). Tokens and metadata are sealed with AES-256-GCM
//! and persisted in SQLite.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       CredentialStore                    │
//! │  - upsert / connect / disconnect         │
//! │  - safe listing (no tokens)              │
//! └─────────────────────────────────────────┘
//!          ↓ encrypt            ↑ decrypt
//! ┌─────────────────────────────────────────┐
//! │       encryption (AES-256-GCM)           │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       SQLite `integrations` table        │
//! │  UNIQUE(user_id, integration)            │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use bizhub::credentials::{CredentialStore, Credentials, IntegrationMetadata};
//! use chrono::{Duration, Utc};
//!
//! # fn main() -> anyhow::Result<()> {
//! let key = std::env::var("BIZHUB_ENCRYPTION_KEY")?;
//! let store = CredentialStore::new("credentials.db", &key)?;
//!
//! let creds = Credentials {
//!     access_token: "ya29.a0Af".to_string(),
//!     refresh_token: Some("1//0g".to_string()),
//!     expires_at: Some(Utc::now() + Duration::hours(1)),
//! };
//! let metadata = IntegrationMetadata {
//!     email: Some("me@example.com".to_string()),
//!     ..Default::default()
//! };
//! store.store("user1", "gmail", &creds, &metadata)?;
//!
//! if let Some(record) = store.get_connected("user1", "gmail")? {
//!     println!("connected as {:?}", record.metadata.email);
//! }
//!
//! store.disconnect("user1", "gmail")?;
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

mod encryption;
mod storage;

pub use encryption::{decrypt, encrypt, generate_key, validate_key, EncryptedValue};
pub use storage::CredentialStore;

/// OAuth tokens for one connected integration.
///
/// Never exposed through the HTTP API.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct Credentials {
    /// Token sent with provider API requests
    pub access_token: String,

    /// Used to obtain a new access token when the current one expires
    pub refresh_token: Option<String>,

    /// When the access token expires (UTC)
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
    /// True when the token has an expiry that falls within `margin` from now.
    pub fn expires_within(&self, margin: Duration) -> bool {
        self.expires_at
            .map(|at| at <= Utc::now() + margin)
            .unwrap_or(false)
    }
}

/// Absolute expiry for a token lifetime in seconds. `None` when the
/// lifetime is not positive or does not fit in a timestamp.
pub fn expiry_after(seconds: i64) -> Option<DateTime<Utc>> {
    if seconds <= 0 {
        return None;
    }
    Duration::try_seconds(seconds).and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Provider-specific metadata stored alongside the tokens.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct IntegrationMetadata {
    /// Per-user OAuth client override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// Profile display data from the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Provider subject id (LinkedIn person id, Slack team id, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,

    /// OAuth 1.0a token secret (Twitter user-context signing)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_secret: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl IntegrationMetadata {
    /// True when a per-user client id is stored.
    pub fn has_client_override(&self) -> bool {
        self.client_id.is_some()
    }

    /// Keep this record's client override, take everything else from `profile`.
    pub fn with_profile(&self, profile: IntegrationMetadata) -> IntegrationMetadata {
        IntegrationMetadata {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            ..profile
        }
    }
}

/// A full credential row, decrypted.
#[derive(Clone, Debug)]
pub struct IntegrationRecord {
    pub user_id: String,
    pub integration: String,
    /// `None` when only a client override has been stored, or after disconnect
    pub credentials: Option<Credentials>,
    pub is_connected: bool,
    pub metadata: IntegrationMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IntegrationRecord {
    /// Tokens usable for an action: the row is connected and holds an access token.
    pub fn connected_credentials(&self) -> Option<&Credentials> {
        if self.is_connected {
            self.credentials.as_ref()
        } else {
            None
        }
    }
}

/// Token-free view of a credential row, safe to return to the client.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct IntegrationSummary {
    pub integration: String,
    pub is_connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub has_client_override: bool,
}

impl From<&IntegrationRecord> for IntegrationSummary {
    fn from(record: &IntegrationRecord) -> Self {
        Self {
            integration: record.integration.clone(),
            is_connected: record.connected_credentials().is_some(),
            email: record.metadata.email.clone(),
            name: record.metadata.name.clone(),
            expires_at: record.credentials.as_ref().and_then(|c| c.expires_at),
            has_client_override: record.metadata.has_client_override(),
        }
    }
}
