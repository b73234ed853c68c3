//! Event envelope types: the JSON contract at the runtime's stdin/stdout boundary.

use serde::{Deserialize, Serialize};

/// Maximum permitted size of a single stdin envelope, per the external interface
/// contract: larger input is rejected with a warning, never read in full.
pub const MAX_ENVELOPE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum HookEventName {
    PreToolUse,
    PostToolUse,
    SessionStart,
    SessionEnd,
    UserPromptSubmit,
    PreCompact,
    Stop,
}

impl HookEventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookEventName::PreToolUse => "PreToolUse",
            HookEventName::PostToolUse => "PostToolUse",
            HookEventName::SessionStart => "SessionStart",
            HookEventName::SessionEnd => "SessionEnd",
            HookEventName::UserPromptSubmit => "UserPromptSubmit",
            HookEventName::PreCompact => "PreCompact",
            HookEventName::Stop => "Stop",
        }
    }
}

/// The raw event envelope as received on stdin. Unknown fields are tolerated by
/// `serde`'s default behaviour (extra JSON keys are simply ignored).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HookEvent {
    pub hook_event_name: HookEventName,
    pub session_id: String,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub transcript_path: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_input: Option<serde_json::Value>,
    #[serde(default)]
    pub tool_output: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub trigger: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionDecision {
    Allow,
    Ask,
    Deny,
}

impl PermissionDecision {
    /// Adopts the strictest of two decisions: deny > ask > allow.
    pub fn strictest(self, other: Self) -> Self {
        self.max(other)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookSpecificOutput {
    pub hook_event_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_decision: Option<PermissionDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_decision_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hook_specific_output: Option<HookSpecificOutput>,
}

impl HookResponse {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.hook_specific_output.is_none()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("stdin exceeded the {MAX_ENVELOPE_BYTES} byte limit")]
    TooLarge,
    #[error("malformed event JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Parses a raw stdin buffer into a [`HookEvent`]. Callers are responsible for
/// capping the read at [`MAX_ENVELOPE_BYTES`] before calling this.
pub fn parse_event(raw: &[u8]) -> Result<HookEvent, EnvelopeError> {
    if raw.len() > MAX_ENVELOPE_BYTES {
        return Err(EnvelopeError::TooLarge);
    }
    Ok(serde_json::from_slice(raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_pretooluse_event() {
        let raw = br#"{"hook_event_name":"PreToolUse","session_id":"s1","tool_name":"Bash","tool_input":{"command":"ls"}}"#;
        let event = parse_event(raw).expect("parse");
        assert_eq!(event.hook_event_name, HookEventName::PreToolUse);
        assert_eq!(event.tool_name.as_deref(), Some("Bash"));
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let raw = br#"{"hook_event_name":"Stop","session_id":"s1","totally_unknown_field":42}"#;
        assert!(parse_event(raw).is_ok());
    }

    #[test]
    fn oversized_input_is_rejected() {
        let raw = vec![b'a'; MAX_ENVELOPE_BYTES + 1];
        assert!(matches!(parse_event(&raw), Err(EnvelopeError::TooLarge)));
    }

    #[test]
    fn strictest_decision_is_deny_over_ask_over_allow() {
        assert_eq!(
            PermissionDecision::Allow.strictest(PermissionDecision::Deny),
            PermissionDecision::Deny
        );
        assert_eq!(
            PermissionDecision::Ask.strictest(PermissionDecision::Allow),
            PermissionDecision::Ask
        );
    }
}
