use super::provider::{LearningProvider, ProviderError, parse_learnings_tolerantly};
use async_trait::async_trait;
use std::time::Duration;

pub struct OpenAiProvider {
    model: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(model: String, timeout_secs: u64) -> Self {
        Self {
            model,
            timeout: Duration::from_secs(timeout_secs),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LearningProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn analyse(&self, prompt: &str, deadline: Duration) -> Result<Vec<super::provider::RawLearning>, ProviderError> {
        let Ok(api_key) = std::env::var("OPENAI_API_KEY") else {
            return Err(ProviderError::Request {
                provider: self.name().to_string(),
                message: "OPENAI_API_KEY not set".to_string(),
            });
        };

        let budget = deadline.min(self.timeout);
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0.2,
        });

        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(api_key)
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
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|t| t.as_str())
            .unwrap_or_default();

        parse_learnings_tolerantly(self.name(), text)
    }
}
