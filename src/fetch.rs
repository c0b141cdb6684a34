//! Remote media download with bounded retries.

use std::time::Duration;
use tracing::{info, warn};

use crate::config::FetchConfig;
use crate::error::{PipelineError, PipelineResult};

pub struct MediaFetcher {
    client: reqwest::Client,
    max_attempts: u32,
    retry_delay: Duration,
}

impl MediaFetcher {
    pub fn new(config: &FetchConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            max_attempts: config.max_attempts.max(1),
            retry_delay: Duration::from_secs(config.retry_delay_seconds),
        }
    }

    /// Download the media at `url`, retrying transient failures with a fixed
    /// delay. Non-success HTTP statuses count as failures too.
    pub async fn fetch(&self, url: &str) -> PipelineResult<Vec<u8>> {
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            match self.try_fetch(url).await {
                Ok(bytes) => {
                    info!(
                        "Downloaded {} bytes from {} (attempt {})",
                        bytes.len(),
                        url,
                        attempt
                    );
                    return Ok(bytes);
                }
                Err(e) => {
                    warn!("Download attempt {}/{} failed: {}", attempt, self.max_attempts, e);
                    last_error = e;
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        Err(PipelineError::Fetch(format!(
            "giving up on {} after {} attempts: {}",
            url, self.max_attempts, last_error
        )))
    }

    async fn try_fetch(&self, url: &str) -> Result<Vec<u8>, String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }

        let bytes = response.bytes().await.map_err(|e| e.to_string())?;
        if bytes.is_empty() {
            return Err("empty response body".to_string());
        }
        Ok(bytes.to_vec())
    }
}
