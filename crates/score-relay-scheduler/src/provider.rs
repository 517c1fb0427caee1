//! External score provider.

use crate::{ProviderError, ProviderResult};
use async_trait::async_trait;
use reqwest::Client;
use score_relay_core::RawScoreReading;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Returns the current score reading for an event, or fails.
#[async_trait]
pub trait ScoreProvider: Send + Sync {
    async fn fetch_score(&self, event_id: &str) -> ProviderResult<RawScoreReading>;
}

/// Reads scores from `GET {base_url}/{eventId}/score`.
pub struct HttpScoreProvider {
    client: Client,
    base_url: String,
}

impl HttpScoreProvider {
    /// Every request is bounded by `timeout`.
    pub fn new(base_url: &str, timeout: Duration) -> ProviderResult<Self> {
        Url::parse(base_url)?;
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn score_url(&self, event_id: &str) -> String {
        format!("{}/{}/score", self.base_url, urlencoding::encode(event_id))
    }
}

#[async_trait]
impl ScoreProvider for HttpScoreProvider {
    async fn fetch_score(&self, event_id: &str) -> ProviderResult<RawScoreReading> {
        let url = self.score_url(event_id);
        debug!(event_id, url = %url, "Polling score provider");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ProviderError::InvalidBody(e.to_string()))
    }
}
