use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Allow,
    Ask,
    Deny,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PatternKind {
    Literal(String),
    Regex(String),
    PathGlob(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    pub pattern: PatternKind,
    pub verdict: Verdict,
    pub reason: String,
}

fn deny(pattern: &str, reason: &str) -> PolicyRule {
    PolicyRule {
        pattern: PatternKind::Regex(pattern.to_string()),
        verdict: Verdict::Deny,
        reason: reason.to_string(),
    }
}

fn ask(pattern: &str, reason: &str) -> PolicyRule {
    PolicyRule {
        pattern: PatternKind::Regex(pattern.to_string()),
        verdict: Verdict::Ask,
        reason: reason.to_string(),
    }
}

/// Built-in declarative rule library. Declaration order is significant: rules
/// within the same verdict bucket are tested in this order, and the first match
/// wins (stable ordering requirement, §4.D).
pub fn default_rule_library() -> Vec<PolicyRule> {
    vec![
        // Destructive file operations.
        deny(
            r"(?i)\brm\s+(-\w*r\w*f\w*|-\w*f\w*r\w*)\s+/(\s|$)",
            "destructive: rm -rf of a root path",
        ),
        deny(
            r"(?i)\brm\s+(-\w*r\w*f\w*|-\w*f\w*r\w*)\s+(~|\$HOME)(\s|/?\s*$)",
            "destructive: rm -rf of the home directory",
        ),
        deny(
            r"(?i)\bfind\s+/\s+.*-delete\b",
            "destructive: wildcard delete above a depth threshold",
        ),
        // Credential patterns: assignment of a long base64-ish literal to a
        // secret-shaped key.
        deny(
            r#"(?i)(api[_-]?key|secret|password|token)\s*[:=]\s*['\"][A-Za-z0-9+/_-]{16,}['\"]"#,
            "credential: literal secret assigned to a key/value pair",
        ),
        // eval/exec in non-test code.
        deny(
            r"(?i)\b(eval|exec)\s*\(",
            "dangerous: eval/exec invocation",
        ),
        // SQL string concatenation via f-strings / format strings.
        deny(
            r#"(?i)(select|insert|update|delete)\b.*["']\s*\+\s*\w+|f["'].*\{.*\}.*\b(select|insert|update|delete)\b"#,
            "sql-injection-shaped: string-built SQL statement",
        ),
        deny(r"(?i)\bchmod\s+777\b", "dangerous: chmod 777"),
        deny(
            r"(?i)\bgit\s+push\b.*(--force(?:$|[^-])|\s-f\b)",
            "destructive: force-push (use --force-with-lease against protected branches)",
        ),
        deny(
            r"(?i)\bgit\s+reset\s+--hard\b",
            "destructive: hard reset discards working-tree changes",
        ),
        deny(
            r"(?i)\.claude/settings\.json|claude\.json$",
            "protected: write into the host's own settings file",
        ),
        // Soft ask-verdict rules: risky but not outright denied.
        ask(r"(?i)\bsudo\b", "elevated privileges requested"),
        ask(r"(?i)\bdocker\s+system\s+prune\b", "broad cleanup of docker resources"),
        ask(r"(?i)\brm\s+-r[fi]?\b", "recursive delete"),
        ask(r"(?i)\bcurl\b.*\|\s*(sh|bash)\b", "pipe remote script directly into a shell"),
    ]
}
