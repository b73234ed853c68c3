use crate::env_override::apply_env_overrides;
use crate::merge::merge_json;
use crate::model::GuardrailsConfig;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML in config file {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("merged config failed validation: {0}")]
    Invalid(String),
}

/// Loads the runtime config with priority env > file > defaults. A missing config
/// file is not an error: a warning is logged and defaults are used as the base.
pub fn load_config(config_path: &Path) -> Result<GuardrailsConfig, ConfigError> {
    let file_contents = match std::fs::read_to_string(config_path) {
        Ok(contents) => Some(contents),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %config_path.display(), "guardrails.yaml not found, using defaults");
            None
        }
        Err(source) => {
            return Err(ConfigError::Io {
                path: config_path.display().to_string(),
                source,
            });
        }
    };

    load_config_from_str(file_contents.as_deref())
}

/// Same as [`load_config`] but takes the YAML source directly, for testing and for
/// the CLI `config` subcommand's `--from-string` helper.
pub fn load_config_from_str(yaml_source: Option<&str>) -> Result<GuardrailsConfig, ConfigError> {
    let defaults = GuardrailsConfig::default();
    let defaults_json = serde_json::to_value(&defaults).expect("default config always serializes");

    let merged_json = match yaml_source {
        Some(source) if !source.trim().is_empty() => {
            let file_value: serde_yaml::Value =
                serde_yaml::from_str(source).map_err(|source| ConfigError::Yaml {
                    path: "<config>".to_string(),
                    source,
                })?;
            let file_json: serde_json::Value = serde_json::to_value(file_value)
                .map_err(|source| ConfigError::Invalid(source.to_string()))?;
            warn_unknown_keys(&defaults_json, &file_json);
            merge_json(&defaults_json, &file_json)
        }
        _ => defaults_json,
    };

    let with_env = apply_env_overrides(merged_json);

    serde_json::from_value(with_env).map_err(|source| ConfigError::Invalid(source.to_string()))
}

fn warn_unknown_keys(defaults: &serde_json::Value, overlay: &serde_json::Value) {
    if let (serde_json::Value::Object(defaults_map), serde_json::Value::Object(overlay_map)) =
        (defaults, overlay)
    {
        for key in overlay_map.keys() {
            if !defaults_map.contains_key(key) {
                tracing::warn!(%key, "unknown config key ignored");
            }
        }
        for (key, value) in overlay_map {
            if let Some(nested_defaults) = defaults_map.get(key) {
                warn_unknown_keys(nested_defaults, value);
            }
        }
    }
}

/// Resolves the state-store root directory: config override, else `~/.claude`.
pub fn resolve_data_root(config: &GuardrailsConfig) -> std::path::PathBuf {
    match &config.data_root {
        Some(path) => std::path::PathBuf::from(shellexpand_tilde(path)),
        None => dirs::home_dir()
            .unwrap_or_else(|| std::path::PathBuf::from("."))
            .join(".claude"),
    }
}

fn shellexpand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).display().to_string();
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_only_round_trip() {
        let config = load_config_from_str(None).expect("defaults load");
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.circuit_breaker.cooldown_seconds, 300);
    }

    #[test]
    fn partial_yaml_keeps_sibling_defaults() {
        let yaml = "circuit_breaker:\n  failure_threshold: 10\n";
        let config = load_config_from_str(Some(yaml)).expect("partial load");
        assert_eq!(config.circuit_breaker.failure_threshold, 10);
        assert_eq!(config.circuit_breaker.success_threshold, 2);
        assert_eq!(config.circuit_breaker.cooldown_seconds, 300);
    }

    #[test]
    fn invalid_yaml_is_rejected() {
        let yaml = "circuit_breaker: [this, is, not, a, map]";
        let result = load_config_from_str(Some(yaml));
        assert!(result.is_err());
    }
}
