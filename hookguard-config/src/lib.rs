//! Configuration model and loader for the hookguard runtime.
//!
//! Priority (highest first): environment variables with the `GUARDRAILS_` prefix,
//! then `guardrails.yaml` on disk, then built-in defaults. Partial YAML merges with
//! defaults field-by-field; missing keys keep their default value.

mod env_override;
mod handlers;
mod loader;
mod merge;
mod model;

pub use env_override::apply_env_overrides;
pub use handlers::{HandlerDescriptor, HandlerValidationError, HooksRegistry, HooksRegistryError, load_hooks_registry};
pub use loader::{ConfigError, load_config, load_config_from_str, resolve_data_root};
pub use model::{
    flatten, CircuitBreakerConfig, ClassifierConfig, CompactionConfig, GuardrailsConfig,
    KnowledgePipelineConfig, LoggingConfig, PolicyConfig, ProviderConfig, ProviderKind,
};
