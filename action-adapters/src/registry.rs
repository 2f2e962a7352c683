//! Adapter registry - the fixed set of (integration, action) pairs.

use crate::connectors::google::{calendar, gmail, CreateDraftAdapter, CreateEventAdapter};
use crate::connectors::linkedin::{self, CreatePostAdapter};
use crate::connectors::microsoft::{self, OutlookDraftAdapter};
use crate::connectors::twitter::{api as twitter_api, api::TwitterClient, PostTweetAdapter};
use crate::ActionAdapter;
use bizhub::config::TwitterConfig;
use std::sync::Arc;

/// Upstream API base URLs, overridable for tests.
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub twitter: String,
    pub linkedin: String,
    pub gmail: String,
    pub calendar: String,
    pub graph: String,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            twitter: twitter_api::BASE_URL.to_string(),
            linkedin: linkedin::BASE_URL.to_string(),
            gmail: gmail::BASE_URL.to_string(),
            calendar: calendar::BASE_URL.to_string(),
            graph: microsoft::BASE_URL.to_string(),
        }
    }
}

impl ProviderEndpoints {
    /// Point every provider at one base URL (a mock server).
    pub fn all(base_url: &str) -> Self {
        Self {
            twitter: base_url.to_string(),
            linkedin: base_url.to_string(),
            gmail: base_url.to_string(),
            calendar: base_url.to_string(),
            graph: base_url.to_string(),
        }
    }
}

pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn ActionAdapter>>,
}

impl AdapterRegistry {
    pub fn new(
        http: reqwest::Client,
        twitter: TwitterConfig,
        endpoints: ProviderEndpoints,
    ) -> Self {
        let adapters: Vec<Arc<dyn ActionAdapter>> = vec![
            Arc::new(PostTweetAdapter::new(
                TwitterClient::with_base_url(http.clone(), endpoints.twitter),
                twitter,
            )),
            Arc::new(CreatePostAdapter::with_base_url(http.clone(), endpoints.linkedin)),
            Arc::new(CreateDraftAdapter::with_base_url(http.clone(), endpoints.gmail)),
            Arc::new(OutlookDraftAdapter::with_base_url(http.clone(), endpoints.graph)),
            Arc::new(CreateEventAdapter::with_base_url(http, endpoints.calendar)),
        ];
        Self { adapters }
    }

    /// Look up the adapter for an integration/action pair.
    pub fn find(&self, integration: &str, action: &str) -> Option<Arc<dyn ActionAdapter>> {
        self.adapters
            .iter()
            .find(|a| a.integration() == integration && a.action() == action)
            .cloned()
    }

    /// All registered `(integration, action)` pairs.
    pub fn actions(&self) -> Vec<(&str, &str)> {
        self.adapters
            .iter()
            .map(|a| (a.integration(), a.action()))
            .collect()
    }
}
