use super::provider::{LearningProvider, ProviderError, RawLearning};
use std::time::Duration;

/// Wraps an ordered list of providers and tries each in turn, moving to the next
/// on any failure. The order itself (remote-primary, remote-secondary, local) is
/// entirely config-driven; callers never special-case a provider by name.
pub struct FallbackChain {
    providers: Vec<Box<dyn LearningProvider>>,
}

impl FallbackChain {
    pub fn new(providers: Vec<Box<dyn LearningProvider>>) -> Self {
        Self { providers }
    }

    /// Tries each provider in order with its own deadline; returns the first
    /// success. If every provider fails, returns the last error encountered.
    pub async fn analyse(&self, prompt: &str, per_provider_deadline: Duration) -> Result<Vec<RawLearning>, ProviderError> {
        let mut last_error = None;
        for provider in &self.providers {
            match tokio::time::timeout(per_provider_deadline, provider.analyse(prompt, per_provider_deadline)).await {
                Ok(Ok(learnings)) => return Ok(learnings),
                Ok(Err(error)) => {
                    tracing::debug!(provider = provider.name(), %error, "provider failed, trying next");
                    last_error = Some(error);
                }
                Err(_elapsed) => {
                    tracing::debug!(provider = provider.name(), "provider timed out, trying next");
                    last_error = Some(ProviderError::Timeout {
                        provider: provider.name().to_string(),
                        timeout: per_provider_deadline,
                    });
                }
            }
        }
        Err(last_error.unwrap_or_else(|| ProviderError::Request {
            provider: "none-configured".to_string(),
            message: "no providers configured".to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct AlwaysFails;
    #[async_trait]
    impl LearningProvider for AlwaysFails {
        fn name(&self) -> &str {
            "always-fails"
        }
        async fn analyse(&self, _prompt: &str, _deadline: Duration) -> Result<Vec<RawLearning>, ProviderError> {
            Err(ProviderError::Request {
                provider: self.name().to_string(),
                message: "nope".to_string(),
            })
        }
    }

    struct AlwaysSucceeds;
    #[async_trait]
    impl LearningProvider for AlwaysSucceeds {
        fn name(&self) -> &str {
            "always-succeeds"
        }
        async fn analyse(&self, _prompt: &str, _deadline: Duration) -> Result<Vec<RawLearning>, ProviderError> {
            Ok(vec![RawLearning {
                tag: "LEARNED".into(),
                content: "ok".into(),
                context: None,
                confidence: 0.9,
            }])
        }
    }

    #[tokio::test]
    async fn falls_through_to_next_provider_on_failure() {
        let chain = FallbackChain::new(vec![Box::new(AlwaysFails), Box::new(AlwaysSucceeds)]);
        let result = chain.analyse("prompt", Duration::from_secs(1)).await.expect("success");
        assert_eq!(result[0].content, "ok");
    }

    #[tokio::test]
    async fn all_providers_failing_returns_error() {
        let chain = FallbackChain::new(vec![Box::new(AlwaysFails), Box::new(AlwaysFails)]);
        let result = chain.analyse("prompt", Duration::from_secs(1)).await;
        assert!(result.is_err());
    }
}
