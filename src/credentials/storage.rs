//! SQLite persistence for integration credentials.

use super::encryption::{self, EncryptedValue};
use super::{Credentials, IntegrationMetadata, IntegrationRecord, IntegrationSummary};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SELECT_COLUMNS: &str = r#"
    user_id, integration,
    access_token, access_token_nonce,
    refresh_token, refresh_token_nonce,
    expires_at, is_connected,
    metadata, metadata_nonce,
    created_at, updated_at
"#;

/// Encrypted credential storage backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE integrations (
///     id INTEGER PRIMARY KEY,
///     user_id TEXT NOT NULL,
///     integration TEXT NOT NULL,
///     access_token TEXT,           -- encrypted
///     access_token_nonce TEXT,
///     refresh_token TEXT,          -- encrypted
///     refresh_token_nonce TEXT,
///     expires_at TEXT,             -- RFC 3339
///     is_connected INTEGER NOT NULL DEFAULT 0,
///     metadata TEXT,               -- encrypted JSON
///     metadata_nonce TEXT,
///     created_at TEXT NOT NULL,
///     updated_at TEXT NOT NULL,
///     UNIQUE(user_id, integration)
/// );
/// ```
///
/// The connection sits behind a `Mutex`; every operation holds it for the
/// duration of its statements.
pub struct CredentialStore {
    conn: Mutex<Connection>,
    encryption_key: Vec<u8>,
}

impl CredentialStore {
    /// Creates or opens a credential store.
    ///
    /// `encryption_key` is the base64-encoded 32-byte master key.
    pub fn new<P: AsRef<Path>>(db_path: P, encryption_key: &str) -> Result<Self> {
        let key_bytes =
            encryption::validate_key(encryption_key).context("Invalid encryption key")?;

        let conn = Connection::open(db_path).context("Failed to open database")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS integrations (
                id INTEGER PRIMARY KEY,
                user_id TEXT NOT NULL,
                integration TEXT NOT NULL,
                access_token TEXT,
                access_token_nonce TEXT,
                refresh_token TEXT,
                refresh_token_nonce TEXT,
                expires_at TEXT,
                is_connected INTEGER NOT NULL DEFAULT 0,
                metadata TEXT,
                metadata_nonce TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(user_id, integration)
            )
            "#,
            [],
        )
        .context("Failed to create integrations table")?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_integrations_user ON integrations(user_id)",
            [],
        )
        .context("Failed to create index")?;

        Ok(Self {
            conn: Mutex::new(conn),
            encryption_key: key_bytes,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Credential store lock poisoned"))
    }

    fn seal_metadata(&self, metadata: &IntegrationMetadata) -> Result<EncryptedValue> {
        let json = serde_json::to_string(metadata).context("Failed to serialize metadata")?;
        encryption::encrypt(&json, &self.encryption_key).context("Failed to encrypt metadata")
    }

    /// Stores tokens for a user and integration and marks the row connected.
    ///
    /// Upsert: a repeat call for the same pair overwrites tokens and
    /// metadata, so callers merge metadata they want to keep.
    pub fn store(
        &self,
        user_id: &str,
        integration: &str,
        credentials: &Credentials,
        metadata: &IntegrationMetadata,
    ) -> Result<()> {
        let access = encryption::encrypt(&credentials.access_token, &self.encryption_key)
            .context("Failed to encrypt access token")?;
        let refresh =
            encryption::encrypt_optional(credentials.refresh_token.as_deref(), &self.encryption_key)
                .context("Failed to encrypt refresh token")?;
        let meta = self.seal_metadata(metadata)?;
        let expires_at = credentials.expires_at.map(|dt| dt.to_rfc3339());
        let now = Utc::now().to_rfc3339();

        self.conn()?
            .execute(
                r#"
                INSERT INTO integrations (
                    user_id, integration,
                    access_token, access_token_nonce,
                    refresh_token, refresh_token_nonce,
                    expires_at, is_connected,
                    metadata, metadata_nonce,
                    created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?9, ?10, ?10)
                ON CONFLICT(user_id, integration) DO UPDATE SET
                    access_token = excluded.access_token,
                    access_token_nonce = excluded.access_token_nonce,
                    refresh_token = excluded.refresh_token,
                    refresh_token_nonce = excluded.refresh_token_nonce,
                    expires_at = excluded.expires_at,
                    is_connected = 1,
                    metadata = excluded.metadata,
                    metadata_nonce = excluded.metadata_nonce,
                    updated_at = excluded.updated_at
                "#,
                params![
                    user_id,
                    integration,
                    access.ciphertext,
                    access.nonce,
                    refresh.as_ref().map(|r| &r.ciphertext),
                    refresh.as_ref().map(|r| &r.nonce),
                    expires_at,
                    meta.ciphertext,
                    meta.nonce,
                    now,
                ],
            )
            .context("Failed to store credentials")?;

        Ok(())
    }

    /// Stores a per-user OAuth client id/secret without touching tokens.
    ///
    /// Creates a disconnected row when none exists yet.
    pub fn store_client_app(
        &self,
        user_id: &str,
        integration: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<()> {
        let conn = self.conn()?;

        let existing = Self::query_record(&conn, user_id, integration, &self.encryption_key)?;
        let mut metadata = existing.map(|r| r.metadata).unwrap_or_default();
        metadata.client_id = Some(client_id.to_string());
        metadata.client_secret = Some(client_secret.to_string());

        let meta = self.seal_metadata(&metadata)?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            r#"
            INSERT INTO integrations (
                user_id, integration, is_connected,
                metadata, metadata_nonce, created_at, updated_at
            )
            VALUES (?1, ?2, 0, ?3, ?4, ?5, ?5)
            ON CONFLICT(user_id, integration) DO UPDATE SET
                metadata = excluded.metadata,
                metadata_nonce = excluded.metadata_nonce,
                updated_at = excluded.updated_at
            "#,
            params![user_id, integration, meta.ciphertext, meta.nonce, now],
        )
        .context("Failed to store client app")?;

        Ok(())
    }

    /// Retrieves the full record for a user and integration, connected or not.
    pub fn get(&self, user_id: &str, integration: &str) -> Result<Option<IntegrationRecord>> {
        let conn = self.conn()?;
        Self::query_record(&conn, user_id, integration, &self.encryption_key)
    }

    /// Retrieves the record only if it is connected and holds an access token.
    pub fn get_connected(
        &self,
        user_id: &str,
        integration: &str,
    ) -> Result<Option<IntegrationRecord>> {
        Ok(self
            .get(user_id, integration)?
            .filter(|r| r.connected_credentials().is_some()))
    }

    /// Replaces the tokens of a connected row (token refresh).
    ///
    /// Returns `false` when there is no connected row to update, so a
    /// refresh finishing after a disconnect never restores tokens.
    pub fn update_tokens(
        &self,
        user_id: &str,
        integration: &str,
        credentials: &Credentials,
    ) -> Result<bool> {
        let access = encryption::encrypt(&credentials.access_token, &self.encryption_key)
            .context("Failed to encrypt access token")?;
        let refresh =
            encryption::encrypt_optional(credentials.refresh_token.as_deref(), &self.encryption_key)
                .context("Failed to encrypt refresh token")?;

        let rows = self
            .conn()?
            .execute(
                r#"
                UPDATE integrations SET
                    access_token = ?3,
                    access_token_nonce = ?4,
                    refresh_token = ?5,
                    refresh_token_nonce = ?6,
                    expires_at = ?7,
                    updated_at = ?8
                WHERE user_id = ?1 AND integration = ?2 AND is_connected = 1
                "#,
                params![
                    user_id,
                    integration,
                    access.ciphertext,
                    access.nonce,
                    refresh.as_ref().map(|r| &r.ciphertext),
                    refresh.as_ref().map(|r| &r.nonce),
                    credentials.expires_at.map(|dt| dt.to_rfc3339()),
                    Utc::now().to_rfc3339(),
                ],
            )
            .context("Failed to update tokens")?;

        Ok(rows > 0)
    }

    /// Flags the row inactive and clears its tokens. Metadata (including any
    /// client override) is kept.
    ///
    /// Returns `false` when there is no row.
    pub fn disconnect(&self, user_id: &str, integration: &str) -> Result<bool> {
        let rows = self
            .conn()?
            .execute(
                r#"
                UPDATE integrations SET
                    access_token = NULL,
                    access_token_nonce = NULL,
                    refresh_token = NULL,
                    refresh_token_nonce = NULL,
                    expires_at = NULL,
                    is_connected = 0,
                    updated_at = ?3
                WHERE user_id = ?1 AND integration = ?2
                "#,
                params![user_id, integration, Utc::now().to_rfc3339()],
            )
            .context("Failed to disconnect integration")?;

        Ok(rows > 0)
    }

    /// Deletes the row for a user and integration.
    ///
    /// Returns `false` when there was nothing to delete.
    pub fn delete(&self, user_id: &str, integration: &str) -> Result<bool> {
        let rows = self
            .conn()?
            .execute(
                "DELETE FROM integrations WHERE user_id = ?1 AND integration = ?2",
                params![user_id, integration],
            )
            .context("Failed to delete credentials")?;

        Ok(rows > 0)
    }

    /// Token-free summaries of every row a user has, ordered by integration.
    pub fn list_by_user(&self, user_id: &str) -> Result<Vec<IntegrationSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM integrations WHERE user_id = ?1 ORDER BY integration",
                SELECT_COLUMNS
            ))
            .context("Failed to prepare query")?;

        let mut rows = stmt
            .query(params![user_id])
            .context("Failed to execute query")?;

        let mut summaries = Vec::new();
        while let Some(row) = rows.next().context("Failed to read row")? {
            let record = row_to_record(row, &self.encryption_key)?;
            summaries.push(IntegrationSummary::from(&record));
        }

        Ok(summaries)
    }

    fn query_record(
        conn: &Connection,
        user_id: &str,
        integration: &str,
        key: &[u8],
    ) -> Result<Option<IntegrationRecord>> {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM integrations WHERE user_id = ?1 AND integration = ?2",
                SELECT_COLUMNS
            ))
            .context("Failed to prepare query")?;

        // Decrypt outside the rusqlite closure so errors stay anyhow-typed
        let raw = stmt
            .query_row(params![user_id, integration], |row| RawRow::from_row(row))
            .optional()
            .context("Failed to execute query")?;

        raw.map(|raw| raw.decrypt(key)).transpose()
    }
}

/// Column values exactly as stored, before decryption.
struct RawRow {
    user_id: String,
    integration: String,
    access_token: Option<String>,
    access_token_nonce: Option<String>,
    refresh_token: Option<String>,
    refresh_token_nonce: Option<String>,
    expires_at: Option<String>,
    is_connected: bool,
    metadata: Option<String>,
    metadata_nonce: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: row.get(0)?,
            integration: row.get(1)?,
            access_token: row.get(2)?,
            access_token_nonce: row.get(3)?,
            refresh_token: row.get(4)?,
            refresh_token_nonce: row.get(5)?,
            expires_at: row.get(6)?,
            is_connected: row.get::<_, i64>(7)? != 0,
            metadata: row.get(8)?,
            metadata_nonce: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn decrypt(self, key: &[u8]) -> Result<IntegrationRecord> {
        let access_token =
            encryption::decrypt_optional(self.access_token, self.access_token_nonce, key)
                .context("Failed to decrypt access token")?;
        let refresh_token =
            encryption::decrypt_optional(self.refresh_token, self.refresh_token_nonce, key)
                .context("Failed to decrypt refresh token")?;
        let expires_at = self
            .expires_at
            .as_deref()
            .map(parse_timestamp)
            .transpose()
            .context("Failed to parse expires_at timestamp")?;

        let metadata = match encryption::decrypt_optional(self.metadata, self.metadata_nonce, key)
            .context("Failed to decrypt metadata")?
        {
            Some(json) => serde_json::from_str(&json).context("Failed to parse metadata")?,
            None => IntegrationMetadata::default(),
        };

        let credentials = access_token.map(|access_token| Credentials {
            access_token,
            refresh_token,
            expires_at,
        });

        Ok(IntegrationRecord {
            user_id: self.user_id,
            integration: self.integration,
            credentials,
            is_connected: self.is_connected,
            metadata,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

fn row_to_record(row: &Row<'_>, key: &[u8]) -> Result<IntegrationRecord> {
    RawRow::from_row(row)
        .context("Failed to read row")?
        .decrypt(key)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp '{}'", value))
}
