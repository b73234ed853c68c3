//! Circuit breaker: a handler that fails three times in a row stops being
//! spawned on the fourth invocation, gated at the dispatcher rather than the
//! policy engine.

#[path = "support/mod.rs"]
mod support;

use serde_json::json;
use tempfile::TempDir;

#[test]
fn circuit_opens_after_three_consecutive_failures() {
    let dir = TempDir::new().expect("tempdir");
    let counter = dir.path().join("invocations.log");

    support::write_hooks_yaml(
        dir.path(),
        &format!(
            r#"
handlers:
  - name: flaky
    events: ["PostToolUse"]
    command: "echo invoked >> {counter} && exit 1"
    timeout_ms: 5000
"#,
            counter = counter.display()
        ),
    );

    let event = json!({
        "hook_event_name": "PostToolUse",
        "session_id": "s1",
        "tool_name": "Bash",
        "tool_input": {"command": "ls"},
        "tool_output": "ok"
    });

    for _ in 0..3 {
        support::send_event(dir.path(), &event).success();
    }
    let invocations_after_three = std::fs::read_to_string(&counter).unwrap_or_default();
    assert_eq!(invocations_after_three.lines().count(), 3);

    support::send_event(dir.path(), &event).success();
    let invocations_after_four = std::fs::read_to_string(&counter).unwrap_or_default();
    assert_eq!(
        invocations_after_four.lines().count(),
        3,
        "fourth invocation should be skipped by the open circuit, not spawn the handler again"
    );
}
