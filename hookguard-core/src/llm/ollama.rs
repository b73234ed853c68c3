use super::provider::{LearningProvider, ProviderError, parse_learnings_tolerantly};
use async_trait::async_trait;
use std::time::Duration;

/// Local fallback provider: talks to an Ollama daemon over HTTP, no API key. Given
/// a longer default timeout than the remote providers since local inference on
/// modest hardware can be slow (§4.H.2, `local_timeout_secs`).
pub struct OllamaProvider {
    model: String,
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(model: String, base_url: String, timeout_secs: u64) -> Self {
        Self {
            model,
            base_url,
            timeout: Duration::from_secs(timeout_secs),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LearningProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn analyse(&self, prompt: &str, deadline: Duration) -> Result<Vec<super::provider::RawLearning>, ProviderError> {
        let budget = deadline.min(self.timeout);
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });

        let url = format!("{}/api/generate", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .timeout(budget)
            .json(&body)
            .send()
            .await
            .map_err(|error| ProviderError::Request {
                provider: self.name().to_string(),
                message: error.to_string(),
            })?;

        let payload: serde_json::Value = response.json().await.map_err(|error| ProviderError::Unparseable {
            provider: self.name().to_string(),
            message: error.to_string(),
        })?;

        let text = payload.get("response").and_then(|t| t.as_str()).unwrap_or_default();

        parse_learnings_tolerantly(self.name(), text)
    }
}
