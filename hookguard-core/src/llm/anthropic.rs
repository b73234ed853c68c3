use super::provider::{LearningProvider, ProviderError, parse_learnings_tolerantly};
use async_trait::async_trait;
use std::time::Duration;

pub struct AnthropicProvider {
    model: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(model: String, timeout_secs: u64) -> Self {
        Self {
            model,
            timeout: Duration::from_secs(timeout_secs),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LearningProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn analyse(&self, prompt: &str, deadline: Duration) -> Result<Vec<super::provider::RawLearning>, ProviderError> {
        let Ok(api_key) = std::env::var("ANTHROPIC_API_KEY") else {
            return Err(ProviderError::Request {
                provider: self.name().to_string(),
                message: "ANTHROPIC_API_KEY not set".to_string(),
            });
        };

        let budget = deadline.min(self.timeout);
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": 2048,
            "messages": [{"role": "user", "content": prompt}],
        });

        let response = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
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

        let text = payload
            .get("content")
            .and_then(|c| c.as_array())
            .and_then(|blocks| blocks.first())
            .and_then(|block| block.get("text"))
            .and_then(|t| t.as_str())
            .unwrap_or_default();

        parse_learnings_tolerantly(self.name(), text)
    }
}
