use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawLearning {
    pub tag: String,
    pub content: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub confidence: f64,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider} request timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },
    #[error("{provider} request failed: {message}")]
    Request { provider: String, message: String },
    #[error("{provider} returned unparseable output: {message}")]
    Unparseable { provider: String, message: String },
}

/// A single LLM backend capable of turning a batch of observations into a list of
/// candidate learnings. Implementations must respect `deadline` as a hard cutoff
/// and make a single attempt — no internal retries (§4.H.2).
#[async_trait]
pub trait LearningProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn analyse(&self, prompt: &str, deadline: Duration) -> Result<Vec<RawLearning>, ProviderError>;
}

/// Strips leading/trailing markdown code fences and parses a JSON array of
/// learnings tolerantly: entries missing `tag` or `content` are dropped, and
/// confidence is clamped to `[0, 1]`.
pub fn parse_learnings_tolerantly(provider_name: &str, raw_output: &str) -> Result<Vec<RawLearning>, ProviderError> {
    let trimmed = strip_markdown_fence(raw_output);
    let value: serde_json::Value = serde_json::from_str(trimmed).map_err(|error| ProviderError::Unparseable {
        provider: provider_name.to_string(),
        message: error.to_string(),
    })?;

    let Some(array) = value.as_array() else {
        return Err(ProviderError::Unparseable {
            provider: provider_name.to_string(),
            message: "response is not a JSON array".to_string(),
        });
    };

    let mut learnings = Vec::new();
    for entry in array {
        let Some(tag) = entry.get("tag").and_then(|v| v.as_str()) else { continue };
        let Some(content) = entry.get("content").and_then(|v| v.as_str()) else { continue };
        let context = entry.get("context").and_then(|v| v.as_str()).map(str::to_string);
        let confidence = entry.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.5).clamp(0.0, 1.0);
        learnings.push(RawLearning {
            tag: tag.to_string(),
            content: content.to_string(),
            context,
            confidence,
        });
    }
    Ok(learnings)
}

fn strip_markdown_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let trimmed = trimmed.strip_prefix("```json").or_else(|| trimmed.strip_prefix("```")).unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fences_and_parses_array() {
        let raw = "```json\n[{\"tag\":\"LEARNED\",\"content\":\"x\",\"confidence\":1.4}]\n```";
        let learnings = parse_learnings_tolerantly("test", raw).expect("parse");
        assert_eq!(learnings.len(), 1);
        assert_eq!(learnings[0].confidence, 1.0);
    }

    #[test]
    fn entries_missing_required_fields_are_dropped() {
        let raw = r#"[{"tag":"LEARNED"},{"tag":"PATTERN","content":"ok"}]"#;
        let learnings = parse_learnings_tolerantly("test", raw).expect("parse");
        assert_eq!(learnings.len(), 1);
        assert_eq!(learnings[0].content, "ok");
    }

    #[test]
    fn non_array_is_unparseable() {
        let result = parse_learnings_tolerantly("test", "{}");
        assert!(result.is_err());
    }
}
