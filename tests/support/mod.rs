//! Shared helpers for driving the compiled `hookguard` binary end to end:
//! every test gets its own `GUARDRAILS_DATA_ROOT` so circuit breaker and
//! knowledge state never leaks between tests.

use assert_cmd::Command;
use serde_json::Value;
use std::path::Path;

pub fn hookguard_cmd(data_root: &Path) -> Command {
    let mut cmd = Command::cargo_bin("hookguard").expect("hookguard binary should build");
    cmd.env("GUARDRAILS_DATA_ROOT", data_root);
    cmd
}

/// Pipes `event` to the binary's stdin with no subcommand, exercising the hot
/// stdin/stdout hook-event path.
pub fn send_event(data_root: &Path, event: &Value) -> assert_cmd::assert::Assert {
    hookguard_cmd(data_root)
        .write_stdin(event.to_string())
        .assert()
}

pub fn write_hooks_yaml(data_root: &Path, contents: &str) {
    std::fs::write(data_root.join("hooks.yaml"), contents).expect("write hooks.yaml");
}

pub fn write_guardrails_yaml(data_root: &Path, contents: &str) {
    std::fs::write(data_root.join("guardrails.yaml"), contents).expect("write guardrails.yaml");
}
