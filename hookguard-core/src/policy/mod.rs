//! Damage-control policy engine: evaluates shell commands and file edits against a
//! declarative rule set, producing an allow/ask/deny verdict plus a human reason.

mod rules;
mod shell_tokenizer;

pub use rules::{PatternKind, PolicyRule, Verdict, default_rule_library};
pub use shell_tokenizer::split_shell_chain;

use hookguard_config::PolicyConfig;
use regex::Regex;

pub struct PolicyEngine {
    deny_rules: Vec<CompiledRule>,
    ask_rules: Vec<CompiledRule>,
    exclusions: Vec<Regex>,
    always_allow_handlers: Vec<String>,
}

struct CompiledRule {
    rule: PolicyRule,
    compiled: Option<Regex>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolicyVerdict {
    pub verdict: Verdict,
    pub reason: Option<String>,
}

impl PolicyVerdict {
    fn allow() -> Self {
        Self {
            verdict: Verdict::Allow,
            reason: None,
        }
    }
}

impl PolicyEngine {
    pub fn from_config(config: &PolicyConfig) -> Self {
        let mut rules = default_rule_library();
        for pattern in &config.extra_deny_patterns {
            rules.push(PolicyRule {
                pattern: PatternKind::Regex(pattern.clone()),
                verdict: Verdict::Deny,
                reason: "matched configured deny pattern".to_string(),
            });
        }
        for pattern in &config.extra_ask_patterns {
            rules.push(PolicyRule {
                pattern: PatternKind::Regex(pattern.clone()),
                verdict: Verdict::Ask,
                reason: "matched configured ask pattern".to_string(),
            });
        }

        let mut deny_rules = Vec::new();
        let mut ask_rules = Vec::new();
        for rule in rules {
            let compiled = compile_rule(&rule);
            let bucket = CompiledRule { rule: rule.clone(), compiled };
            match rule.verdict {
                Verdict::Deny => deny_rules.push(bucket),
                Verdict::Ask => ask_rules.push(bucket),
                Verdict::Allow => {}
            }
        }

        let exclusions = config
            .exclusion_patterns
            .iter()
            .filter_map(|pattern| {
                Regex::new(pattern)
                    .map_err(|error| {
                        tracing::warn!(%pattern, %error, "ignoring invalid exclusion pattern");
                        error
                    })
                    .ok()
            })
            .collect();

        Self {
            deny_rules,
            ask_rules,
            exclusions,
            always_allow_handlers: config.always_allow_handlers.clone(),
        }
    }

    /// Evaluates a tool call. `handler_name` is the calling handler's own name, not
    /// a dispatcher handler — pass `None` when there is no surrounding handler
    /// context (the common case, called directly from PreToolUse).
    pub fn evaluate(
        &self,
        tool_name: &str,
        tool_input: &serde_json::Value,
        cwd: Option<&str>,
        handler_name: Option<&str>,
    ) -> PolicyVerdict {
        if let Some(name) = handler_name {
            if self.always_allow_handlers.iter().any(|allowed| allowed == name) {
                return PolicyVerdict::allow();
            }
        }

        match tool_name {
            "Bash" => {
                let Some(command) = tool_input.get("command").and_then(|v| v.as_str()) else {
                    return PolicyVerdict::allow();
                };
                for chunk in split_shell_chain(command) {
                    if self.is_excluded(&chunk) {
                        continue;
                    }
                    if let Some(verdict) = self.match_rules(&self.deny_rules, &chunk) {
                        return verdict;
                    }
                    if let Some(verdict) = self.match_rules(&self.ask_rules, &chunk) {
                        return verdict;
                    }
                }
                PolicyVerdict::allow()
            }
            "Edit" | "Write" => {
                let Some(path) = tool_input.get("file_path").and_then(|v| v.as_str()) else {
                    return PolicyVerdict::allow();
                };
                let resolved = resolve_path(path, cwd);
                if self.is_excluded(&resolved) {
                    return PolicyVerdict::allow();
                }
                if let Some(verdict) = self.match_rules(&self.deny_rules, &resolved) {
                    return verdict;
                }
                if let Some(verdict) = self.match_rules(&self.ask_rules, &resolved) {
                    return verdict;
                }
                PolicyVerdict::allow()
            }
            _ => PolicyVerdict::allow(),
        }
    }

    fn is_excluded(&self, text: &str) -> bool {
        self.exclusions.iter().any(|pattern| pattern.is_match(text))
    }

    fn match_rules(&self, rules: &[CompiledRule], text: &str) -> Option<PolicyVerdict> {
        for bucket in rules {
            if rule_matches(bucket, text) {
                return Some(PolicyVerdict {
                    verdict: bucket.rule.verdict,
                    reason: Some(bucket.rule.reason.clone()),
                });
            }
        }
        None
    }
}

fn compile_rule(rule: &PolicyRule) -> Option<Regex> {
    match &rule.pattern {
        PatternKind::Literal(_) => None,
        PatternKind::Regex(pattern) | PatternKind::PathGlob(pattern) => {
            let compiled = if matches!(rule.pattern, PatternKind::PathGlob(_)) {
                glob_to_regex(pattern)
            } else {
                pattern.clone()
            };
            Regex::new(&compiled)
                .map_err(|error| {
                    tracing::warn!(rule = %rule.reason, %error, "excluding invalid rule pattern");
                    error
                })
                .ok()
        }
    }
}

fn glob_to_regex(glob: &str) -> String {
    let escaped = regex::escape(glob);
    format!("^{}$", escaped.replace(r"\*", ".*").replace(r"\?", "."))
}

fn rule_matches(bucket: &CompiledRule, text: &str) -> bool {
    match &bucket.rule.pattern {
        PatternKind::Literal(literal) => text.contains(literal.as_str()),
        PatternKind::Regex(_) | PatternKind::PathGlob(_) => bucket
            .compiled
            .as_ref()
            .map(|regex| regex.is_match(text))
            .unwrap_or(false),
    }
}

fn resolve_path(path: &str, cwd: Option<&str>) -> String {
    let expanded = if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest).display().to_string())
            .unwrap_or_else(|| path.to_string())
    } else {
        path.to_string()
    };

    if std::path::Path::new(&expanded).is_absolute() {
        expanded
    } else if let Some(cwd) = cwd {
        std::path::Path::new(cwd).join(&expanded).display().to_string()
    } else {
        expanded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine() -> PolicyEngine {
        PolicyEngine::from_config(&PolicyConfig::default())
    }

    #[test]
    fn rm_rf_root_is_denied() {
        let engine = engine();
        let verdict = engine.evaluate("Bash", &json!({"command": "rm -rf /"}), None, None);
        assert_eq!(verdict.verdict, Verdict::Deny);
        assert!(verdict.reason.unwrap().to_lowercase().contains("rm -rf"));
    }

    #[test]
    fn safe_command_is_allowed() {
        let engine = engine();
        let verdict = engine.evaluate("Bash", &json!({"command": "pytest tests/ -v"}), None, None);
        assert_eq!(verdict.verdict, Verdict::Allow);
    }

    #[test]
    fn chmod_777_is_denied() {
        let engine = engine();
        let verdict = engine.evaluate("Bash", &json!({"command": "chmod 777 /etc/passwd"}), None, None);
        assert_eq!(verdict.verdict, Verdict::Deny);
    }

    #[test]
    fn force_push_is_denied() {
        let engine = engine();
        let verdict = engine.evaluate("Bash", &json!({"command": "git push --force origin main"}), None, None);
        assert_eq!(verdict.verdict, Verdict::Deny);
    }

    #[test]
    fn chained_command_is_checked_per_link() {
        let engine = engine();
        let verdict = engine.evaluate(
            "Bash",
            &json!({"command": "git status && rm -rf /"}),
            None,
            None,
        );
        assert_eq!(verdict.verdict, Verdict::Deny);
    }

    #[test]
    fn evaluate_is_deterministic() {
        let engine = engine();
        let input = json!({"command": "rm -rf /tmp/build"});
        let first = engine.evaluate("Bash", &input, None, None);
        let second = engine.evaluate("Bash", &input, None, None);
        assert_eq!(first, second);
    }

    #[test]
    fn always_allow_handler_bypasses_rules() {
        let mut config = PolicyConfig::default();
        config.always_allow_handlers.push("trusted".to_string());
        let engine = PolicyEngine::from_config(&config);
        let verdict = engine.evaluate(
            "Bash",
            &json!({"command": "rm -rf /"}),
            None,
            Some("trusted"),
        );
        assert_eq!(verdict.verdict, Verdict::Allow);
    }

    #[test]
    fn settings_json_write_is_denied() {
        let engine = engine();
        let verdict = engine.evaluate(
            "Write",
            &json!({"file_path": "~/.claude/settings.json"}),
            None,
            None,
        );
        assert_eq!(verdict.verdict, Verdict::Deny);
    }
}
