use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Top-level runtime configuration, unified from `guardrails.yaml` + env overrides.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GuardrailsConfig {
    pub circuit_breaker: CircuitBreakerConfig,
    pub policy: PolicyConfig,
    pub classifier: ClassifierConfig,
    pub compaction: CompactionConfig,
    pub knowledge: KnowledgePipelineConfig,
    pub logging: LoggingConfig,
    /// Root directory for all persisted state. Defaults to `~/.claude`.
    pub data_root: Option<String>,
}

impl Default for GuardrailsConfig {
    fn default() -> Self {
        Self {
            circuit_breaker: CircuitBreakerConfig::default(),
            policy: PolicyConfig::default(),
            classifier: ClassifierConfig::default(),
            compaction: CompactionConfig::default(),
            knowledge: KnowledgePipelineConfig::default(),
            logging: LoggingConfig::default(),
            data_root: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub cooldown_seconds: u64,
    /// Handler names exempt from circuit-breaking.
    pub exclusions: Vec<String>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 2,
            cooldown_seconds: 300,
            exclusions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PolicyConfig {
    /// Handler names that always receive `allow` regardless of rule matches.
    pub always_allow_handlers: Vec<String>,
    /// Additional deny-verdict rules, appended after the built-in rule library.
    pub extra_deny_patterns: Vec<String>,
    /// Additional ask-verdict rules, appended after the built-in rule library.
    pub extra_ask_patterns: Vec<String>,
    /// Patterns excluded from evaluation entirely (neither deny nor ask apply).
    pub exclusion_patterns: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            always_allow_handlers: Vec::new(),
            extra_deny_patterns: Vec::new(),
            extra_ask_patterns: Vec::new(),
            exclusion_patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClassifierConfig {
    pub haiku_fallback_threshold: f64,
    pub min_prompt_len_for_confidence: usize,
    pub max_prompt_len_for_confidence: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            haiku_fallback_threshold: 0.65,
            min_prompt_len_for_confidence: 20,
            max_prompt_len_for_confidence: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompactionConfig {
    pub check_frequency_turns: u32,
    pub char_to_token_factor: f64,
    pub max_context_tokens: u64,
    pub compaction_threshold: f64,
    pub turns_until_cold: u32,
    pub min_messages_in_range: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            check_frequency_turns: 10,
            char_to_token_factor: 0.25,
            max_context_tokens: 200_000,
            compaction_threshold: 0.60,
            turns_until_cold: 20,
            min_messages_in_range: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KnowledgePipelineConfig {
    pub min_observations_for_analysis: usize,
    pub max_observations_for_llm: usize,
    pub min_confidence: f64,
    pub dedup_overlap_threshold: f64,
    pub max_injections: usize,
    pub lookback_days: i64,
    pub remote_timeout_secs: u64,
    pub local_timeout_secs: u64,
    pub providers: Vec<ProviderConfig>,
}

impl Default for KnowledgePipelineConfig {
    fn default() -> Self {
        Self {
            min_observations_for_analysis: 10,
            max_observations_for_llm: 200,
            min_confidence: 0.3,
            dedup_overlap_threshold: 0.70,
            max_injections: 5,
            lookback_days: 30,
            remote_timeout_secs: 60,
            local_timeout_secs: 120,
            providers: vec![
                ProviderConfig {
                    kind: ProviderKind::Anthropic,
                    model: "claude-haiku-4-5".to_string(),
                    base_url: None,
                },
                ProviderConfig {
                    kind: ProviderKind::OpenAi,
                    model: "gpt-5-mini".to_string(),
                    base_url: None,
                },
                ProviderConfig {
                    kind: ProviderKind::Ollama,
                    model: "llama3.1".to_string(),
                    base_url: Some("http://localhost:11434".to_string()),
                },
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
    Ollama,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub model: String,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

/// Flattened view of a config, used by the `config` admin subcommand and by the
/// env-override pass. Keys are dotted paths (`circuit_breaker.failure_threshold`).
pub fn flatten(value: &serde_json::Value) -> BTreeMap<String, serde_json::Value> {
    let mut out = BTreeMap::new();
    flatten_into("", value, &mut out);
    out
}

fn flatten_into(prefix: &str, value: &serde_json::Value, out: &mut BTreeMap<String, serde_json::Value>) {
    match value {
        serde_json::Value::Object(map) => {
            for (k, v) in map {
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                flatten_into(&key, v, out);
            }
        }
        other => {
            out.insert(prefix.to_string(), other.clone());
        }
    }
}
