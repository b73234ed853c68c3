use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single registered handler program.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerDescriptor {
    /// Unique name, used in circuit-breaker state and CLI `enable`/`disable`/`reset`.
    pub name: String,
    /// Event names this handler is registered for.
    pub events: Vec<String>,
    /// Shell command string, piped the event envelope JSON on stdin.
    pub command: String,
    /// Per-invocation wall-time budget.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// If true, this handler is never gated by the circuit breaker.
    #[serde(default)]
    pub exclude_from_circuit_breaker: bool,
    /// Optional working-directory override; defaults to the event's `cwd`.
    #[serde(default)]
    pub working_directory: Option<String>,
    /// Environment variable names passed through to the handler process.
    #[serde(default)]
    pub env_passthrough: Vec<String>,
}

fn default_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Error)]
pub enum HandlerValidationError {
    #[error("handler '{0}' has an empty name")]
    EmptyName(String),
    #[error("handler '{0}' registers no events")]
    NoEvents(String),
    #[error("handler '{0}' has an empty command")]
    EmptyCommand(String),
    #[error("handler '{0}' has a non-positive timeout")]
    NonPositiveTimeout(String),
    #[error("handler '{0}' event matcher is invalid: {1}")]
    InvalidMatcher(String, regex::Error),
}

impl HandlerDescriptor {
    pub fn validate(&self) -> Result<(), HandlerValidationError> {
        if self.name.trim().is_empty() {
            return Err(HandlerValidationError::EmptyName(self.name.clone()));
        }
        if self.events.is_empty() {
            return Err(HandlerValidationError::NoEvents(self.name.clone()));
        }
        if self.command.trim().is_empty() {
            return Err(HandlerValidationError::EmptyCommand(self.name.clone()));
        }
        if self.timeout_ms == 0 {
            return Err(HandlerValidationError::NonPositiveTimeout(self.name.clone()));
        }
        for event in &self.events {
            if event.contains('^') || event.contains('$') {
                Regex::new(event)
                    .map_err(|err| HandlerValidationError::InvalidMatcher(self.name.clone(), err))?;
            }
        }
        Ok(())
    }
}

/// The full set of registered handlers, grouped by event name for dispatch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HooksRegistry {
    pub handlers: Vec<HandlerDescriptor>,
}

impl HooksRegistry {
    pub fn validate(&self) -> Result<(), HandlerValidationError> {
        for handler in &self.handlers {
            handler.validate()?;
        }
        Ok(())
    }

    /// Handlers registered for a given event name, in declaration order.
    pub fn for_event(&self, event_name: &str) -> Vec<&HandlerDescriptor> {
        self.handlers
            .iter()
            .filter(|handler| handler.events.iter().any(|e| e == event_name))
            .collect()
    }

    pub fn find(&self, name: &str) -> Option<&HandlerDescriptor> {
        self.handlers.iter().find(|handler| handler.name == name)
    }
}

#[derive(Debug, Error)]
pub enum HooksRegistryError {
    #[error("failed to read handler registry {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML in handler registry {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error(transparent)]
    Validation(#[from] HandlerValidationError),
}

/// Loads the handler registry from `hooks.yaml`. A missing file is treated as an
/// empty registry, not an error: a sidecar with no handlers registered still
/// runs, it just dispatches to nothing.
pub fn load_hooks_registry(path: &std::path::Path) -> Result<HooksRegistry, HooksRegistryError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "hooks.yaml not found, no handlers registered");
            return Ok(HooksRegistry::default());
        }
        Err(source) => {
            return Err(HooksRegistryError::Io {
                path: path.display().to_string(),
                source,
            });
        }
    };

    let registry: HooksRegistry = serde_yaml::from_str(&contents).map_err(|source| HooksRegistryError::Yaml {
        path: path.display().to_string(),
        source,
    })?;
    registry.validate()?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn for_event_preserves_declaration_order() {
        let registry = HooksRegistry {
            handlers: vec![
                HandlerDescriptor {
                    name: "a".into(),
                    events: vec!["PostToolUse".into()],
                    command: "echo a".into(),
                    timeout_ms: 1000,
                    exclude_from_circuit_breaker: false,
                    working_directory: None,
                    env_passthrough: vec![],
                },
                HandlerDescriptor {
                    name: "b".into(),
                    events: vec!["PostToolUse".into()],
                    command: "echo b".into(),
                    timeout_ms: 1000,
                    exclude_from_circuit_breaker: false,
                    working_directory: None,
                    env_passthrough: vec![],
                },
            ],
        };
        let found = registry.for_event("PostToolUse");
        assert_eq!(found[0].name, "a");
        assert_eq!(found[1].name, "b");
    }

    #[test]
    fn validate_rejects_empty_command() {
        let handler = HandlerDescriptor {
            name: "bad".into(),
            events: vec!["Stop".into()],
            command: "".into(),
            timeout_ms: 1000,
            exclude_from_circuit_breaker: false,
            working_directory: None,
            env_passthrough: vec![],
        };
        assert!(matches!(
            handler.validate(),
            Err(HandlerValidationError::EmptyCommand(_))
        ));
    }
}
