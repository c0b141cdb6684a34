//! Webhook delivery of completed analysis results.

use serde_json::Value;
use tracing::{info, warn};

use crate::analysis::AnalysisResult;
use crate::config::CallbackConfig;

/// Posts completed results to per-platform webhook endpoints.
///
/// Delivery is fire-once and best-effort: failures are logged, never retried,
/// and never affect the stored result.
pub struct CallbackDispatcher {
    client: reqwest::Client,
    config: CallbackConfig,
}

impl CallbackDispatcher {
    pub fn new(config: CallbackConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn endpoint_for(&self, platform: Option<&str>) -> Option<(String, String)> {
        let platform = platform
            .map(|p| p.to_string())
            .or_else(|| self.config.default_platform.clone())?;
        let url = self.config.endpoints.get(&platform)?.clone();
        Some((platform, url))
    }

    /// Deliver `result` for the caller-supplied `identifier`. Tasks created
    /// without an identifier are poll-only and never produce a callback.
    pub async fn dispatch(
        &self,
        identifier: &str,
        platform: Option<&str>,
        result: &AnalysisResult,
    ) {
        let (platform, url) = match self.endpoint_for(platform) {
            Some(pair) => pair,
            None => {
                warn!(
                    "No callback endpoint configured for platform {:?}, skipping delivery",
                    platform
                );
                return;
            }
        };

        let payload = match build_payload(identifier, self.config.delivery_key.as_deref(), result) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Could not serialize callback payload: {}", e);
                return;
            }
        };

        match self.client.post(&url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                info!("Delivered result for {} to {} endpoint", identifier, platform);
            }
            Ok(response) => {
                warn!(
                    "Callback endpoint for {} returned {}, result remains available for polling",
                    platform,
                    response.status()
                );
            }
            Err(e) => {
                warn!(
                    "Callback delivery to {} failed: {}, result remains available for polling",
                    platform, e
                );
            }
        }
    }
}

/// The callback body is the flattened result object with the identifier and
/// the shared delivery key added alongside.
fn build_payload(
    identifier: &str,
    delivery_key: Option<&str>,
    result: &AnalysisResult,
) -> serde_json::Result<Value> {
    let mut payload = serde_json::to_value(result)?;
    if let Value::Object(ref mut map) = payload {
        map.insert("identifier".to_string(), Value::String(identifier.to_string()));
        if let Some(key) = delivery_key {
            map.insert("key".to_string(), Value::String(key.to_string()));
        }
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{MetadataRecord, ResultAggregator};

    fn sample_result() -> AnalysisResult {
        ResultAggregator::aggregate(
            "a cooking video".to_string(),
            Some("today we bake bread".to_string()),
            true,
            vec![],
            MetadataRecord::default(),
            None,
            false,
        )
    }

    #[test]
    fn test_payload_is_flat_with_identifier_and_key() {
        let payload = build_payload("vid-42", Some("secret"), &sample_result()).unwrap();
        let object = payload.as_object().unwrap();
        assert_eq!(object["identifier"], "vid-42");
        assert_eq!(object["key"], "secret");
        // result fields live at the top level, not nested under "result"
        assert_eq!(object["description"], "a cooking video");
        assert_eq!(object["status"], "completed");
        assert!(!object.contains_key("result"));
    }

    #[test]
    fn test_payload_without_delivery_key() {
        let payload = build_payload("vid-42", None, &sample_result()).unwrap();
        assert!(!payload.as_object().unwrap().contains_key("key"));
    }

    #[test]
    fn test_endpoint_lookup_uses_default_platform() {
        let mut endpoints = std::collections::HashMap::new();
        endpoints.insert("main".to_string(), "http://example.com/cb".to_string());
        let dispatcher = CallbackDispatcher::new(CallbackConfig {
            delivery_key: None,
            endpoints,
            default_platform: Some("main".to_string()),
        });

        let (platform, url) = dispatcher.endpoint_for(None).unwrap();
        assert_eq!(platform, "main");
        assert_eq!(url, "http://example.com/cb");
        assert!(dispatcher.endpoint_for(Some("unknown")).is_none());
    }
}
