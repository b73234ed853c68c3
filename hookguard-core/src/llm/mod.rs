//! Abstraction over LLM providers used for knowledge analysis (H.2) and optional
//! classifier refinement (E). The fallback chain is a property of this
//! abstraction, not duplicated at each call site (§9).

mod anthropic;
mod fallback;
mod ollama;
mod openai;
mod provider;

pub use fallback::FallbackChain;
pub use provider::{LearningProvider, ProviderError, RawLearning};

use anthropic::AnthropicProvider;
use hookguard_config::{KnowledgePipelineConfig, ProviderKind};
use ollama::OllamaProvider;
use openai::OpenAiProvider;

/// Builds the configured fallback chain from `guardrails.yaml`'s provider list.
pub fn build_fallback_chain(config: &KnowledgePipelineConfig) -> FallbackChain {
    let mut providers: Vec<Box<dyn LearningProvider>> = Vec::new();
    for provider_config in &config.providers {
        let timeout = if provider_config.kind == ProviderKind::Ollama {
            config.local_timeout_secs
        } else {
            config.remote_timeout_secs
        };
        let provider: Box<dyn LearningProvider> = match provider_config.kind {
            ProviderKind::Anthropic => Box::new(AnthropicProvider::new(provider_config.model.clone(), timeout)),
            ProviderKind::OpenAi => Box::new(OpenAiProvider::new(provider_config.model.clone(), timeout)),
            ProviderKind::Ollama => Box::new(OllamaProvider::new(
                provider_config.model.clone(),
                provider_config.base_url.clone().unwrap_or_else(|| "http://localhost:11434".to_string()),
                timeout,
            )),
        };
        providers.push(provider);
    }
    FallbackChain::new(providers)
}
