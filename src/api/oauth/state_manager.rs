//! OAuth `state` tokens.
//!
//! Each authorize redirect carries an unpredictable, single-use token that
//! binds the callback to the integration, the user and (for PKCE providers)
//! the code verifier.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Pending authorization, keyed by its state token
#[derive(Clone, Debug)]
pub struct StateEntry {
    pub integration: String,
    pub user_id: String,
    pub code_verifier: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// In-memory state store with expiry
#[derive(Clone)]
pub struct StateManager {
    states: Arc<Mutex<HashMap<String, StateEntry>>>,
    expiry_duration: Duration,
}

impl StateManager {
    /// `expiry_seconds` is how long a state stays valid (600 by default in config).
    pub fn new(expiry_seconds: i64) -> Self {
        Self {
            states: Arc::new(Mutex::new(HashMap::new())),
            expiry_duration: Duration::seconds(expiry_seconds),
        }
    }

    // A panic while holding the lock cannot leave the map half-updated
    fn states(&self) -> MutexGuard<'_, HashMap<String, StateEntry>> {
        self.states.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Generate a new state token (UUID v4) and remember what it is for.
    pub fn create_state(
        &self,
        integration: &str,
        user_id: &str,
        code_verifier: Option<String>,
    ) -> String {
        let state = Uuid::new_v4().to_string();
        let entry = StateEntry {
            integration: integration.to_string(),
            user_id: user_id.to_string(),
            code_verifier,
            created_at: Utc::now(),
        };

        self.states().insert(state.clone(), entry);

        state
    }

    /// Validate and consume a state token.
    ///
    /// The entry is removed whether or not it has expired, so a token can
    /// only ever be presented once.
    pub fn validate_and_consume(&self, state: &str) -> Option<StateEntry> {
        let entry = self.states().remove(state)?;

        if Utc::now() - entry.created_at > self.expiry_duration {
            return None;
        }

        Some(entry)
    }

    /// Drop expired states
    pub fn cleanup_expired(&self) {
        let now = Utc::now();
        let expiry = self.expiry_duration;
        self.states()
            .retain(|_, entry| now - entry.created_at <= expiry);
    }

    /// Number of pending states
    pub fn count(&self) -> usize {
        self.states().len()
    }
}

/// Background task that purges expired states every `interval_seconds`.
pub async fn run_state_cleanup(manager: StateManager, interval_seconds: u64) {
    let mut interval =
        tokio::time::interval(tokio::time::Duration::from_secs(interval_seconds.max(1)));

    loop {
        interval.tick().await;
        manager.cleanup_expired();
        tracing::debug!("OAuth state cleanup complete, {} states remaining", manager.count());
    }
}
