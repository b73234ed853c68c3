//! Event dispatcher (component I): looks up the handlers registered for an
//! event, gates each through the circuit breaker, runs it as a subprocess, and
//! aggregates responses into a single decision for the caller. Subprocess
//! execution is grounded in the lifecycle engine's `execute_command`, with one
//! deliberate change: on timeout this escalates SIGTERM then SIGKILL instead of
//! killing immediately, giving well-behaved handlers a chance to clean up.

use crate::breaker::{CircuitBreaker, ExecuteDecision};
use crate::envelope::{HookEvent, HookResponse, HookSpecificOutput, PermissionDecision};
use crate::state::StateStore;
use hookguard_config::{CircuitBreakerConfig, HandlerDescriptor, HooksRegistry};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

/// Grace period between SIGTERM and SIGKILL when a handler exceeds its timeout.
const KILL_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq)]
pub struct HandlerOutcome {
    pub handler_name: String,
    pub skipped_by_breaker: bool,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub response: HookResponse,
    pub stderr: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchResult {
    pub outcomes: Vec<HandlerOutcome>,
    pub aggregated: HookResponse,
}

/// Runs every handler registered for `event`'s event name, gating each
/// through the circuit breaker up front and then invoking the surviving
/// handlers concurrently (§4.I: "for remaining handlers, invoke in
/// parallel"). Responses are still aggregated in declaration order:
/// additional-context strings are concatenated in that order, and the
/// permission decision adopts the strictest one seen (§4.I, §envelope).
pub async fn dispatch(
    store: &StateStore,
    registry: &HooksRegistry,
    breaker_config: &CircuitBreakerConfig,
    event: &HookEvent,
) -> DispatchResult {
    let breaker = CircuitBreaker::new(store, breaker_config);
    let handlers = registry.for_event(event.hook_event_name.as_str());
    let payload = serde_json::to_value(event).unwrap_or(serde_json::Value::Null);

    let mut gated = Vec::with_capacity(handlers.len());
    for handler in &handlers {
        let (decision, _state) = match breaker.should_execute(&handler.name) {
            Ok(result) => result,
            Err(error) => {
                tracing::warn!(handler = %handler.name, %error, "circuit breaker state unreadable, executing anyway");
                (ExecuteDecision::Execute, crate::breaker::CircuitState::Closed)
            }
        };
        gated.push((*handler, decision == ExecuteDecision::Execute));
    }

    let runs = futures::future::join_all(gated.iter().map(|(handler, should_run)| async move {
        if *should_run {
            Some(run_handler(handler, &payload).await)
        } else {
            None
        }
    }))
    .await;

    let mut outcomes = Vec::with_capacity(handlers.len());
    let mut additional_context: Vec<String> = Vec::new();
    let mut strictest: Option<PermissionDecision> = None;
    let mut reason: Option<String> = None;

    for ((handler, _), run) in gated.iter().zip(runs.into_iter()) {
        let Some(result) = run else {
            outcomes.push(HandlerOutcome {
                handler_name: handler.name.clone(),
                skipped_by_breaker: true,
                exit_code: None,
                timed_out: false,
                response: HookResponse::empty(),
                stderr: String::new(),
            });
            continue;
        };

        match &result {
            Ok(run) if !run.timed_out && run.exit_code == Some(0) => {
                if let Err(error) = breaker.record_success(&handler.name) {
                    tracing::warn!(handler = %handler.name, %error, "failed to record circuit breaker success");
                }
            }
            Ok(run) => {
                let summary = if run.timed_out {
                    "handler timed out".to_string()
                } else {
                    format!("handler exited with code {:?}", run.exit_code)
                };
                if let Err(error) = breaker.record_failure(&handler.name, &summary) {
                    tracing::warn!(handler = %handler.name, %error, "failed to record circuit breaker failure");
                }
            }
            Err(error) => {
                if let Err(breaker_error) = breaker.record_failure(&handler.name, &error.to_string()) {
                    tracing::warn!(handler = %handler.name, %breaker_error, "failed to record circuit breaker failure");
                }
            }
        }

        let (exit_code, timed_out, response, stderr) = match result {
            Ok(run) => {
                let parsed = parse_handler_stdout(&run.stdout);
                (run.exit_code, run.timed_out, parsed, run.stderr)
            }
            Err(error) => (None, false, HookResponse::empty(), error.to_string()),
        };

        if let Some(output) = &response.hook_specific_output {
            if let Some(context) = &output.additional_context {
                additional_context.push(context.clone());
            }
            if let Some(decision) = output.permission_decision {
                strictest = Some(strictest.map(|current| current.strictest(decision)).unwrap_or(decision));
                if decision != PermissionDecision::Allow && reason.is_none() {
                    reason = output.permission_decision_reason.clone();
                }
            }
        }

        outcomes.push(HandlerOutcome {
            handler_name: handler.name.clone(),
            skipped_by_breaker: false,
            exit_code,
            timed_out,
            response,
            stderr,
        });
    }

    let aggregated = if additional_context.is_empty() && strictest.is_none() {
        HookResponse::empty()
    } else {
        HookResponse {
            hook_specific_output: Some(HookSpecificOutput {
                hook_event_name: event.hook_event_name.as_str().to_string(),
                additional_context: (!additional_context.is_empty()).then(|| additional_context.join("\n\n")),
                permission_decision: strictest,
                permission_decision_reason: reason,
            }),
        }
    };

    DispatchResult { outcomes, aggregated }
}

fn parse_handler_stdout(stdout: &str) -> HookResponse {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return HookResponse::empty();
    }
    serde_json::from_str(trimmed).unwrap_or_else(|error| {
        tracing::debug!(%error, "handler stdout was not a JSON response, ignoring");
        HookResponse::empty()
    })
}

struct HandlerRun {
    exit_code: Option<i32>,
    timed_out: bool,
    stdout: String,
    stderr: String,
}

#[derive(Debug, thiserror::Error)]
enum HandlerRunError {
    #[error("failed to spawn handler: {0}")]
    Spawn(std::io::Error),
    #[error("failed to write handler stdin: {0}")]
    Stdin(std::io::Error),
}

async fn run_handler(handler: &HandlerDescriptor, payload: &serde_json::Value) -> Result<HandlerRun, HandlerRunError> {
    let mut command = Command::new("sh");
    command.arg("-c").arg(&handler.command);
    command.stdin(Stdio::piped());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    command.kill_on_drop(true);

    if let Some(dir) = &handler.working_directory {
        command.current_dir(dir);
    }
    command.env("HOOKGUARD_HANDLER_NAME", &handler.name);
    for var in &handler.env_passthrough {
        if let Ok(value) = std::env::var(var) {
            command.env(var, value);
        }
    }

    let mut child = command.spawn().map_err(HandlerRunError::Spawn)?;

    if let Some(mut stdin) = child.stdin.take() {
        let mut bytes = serde_json::to_vec(payload).unwrap_or_default();
        bytes.push(b'\n');
        stdin.write_all(&bytes).await.map_err(HandlerRunError::Stdin)?;
        let _ = stdin.shutdown().await;
    }

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    let stdout_task = tokio::spawn(async move {
        let mut buffer = Vec::new();
        if let Some(pipe) = stdout_pipe.as_mut() {
            let _ = pipe.read_to_end(&mut buffer).await;
        }
        buffer
    });
    let stderr_task = tokio::spawn(async move {
        let mut buffer = Vec::new();
        if let Some(pipe) = stderr_pipe.as_mut() {
            let _ = pipe.read_to_end(&mut buffer).await;
        }
        buffer
    });

    let timeout = Duration::from_millis(handler.timeout_ms.max(1));
    let (exit_code, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => (status.code(), false),
        Ok(Err(_)) => (None, false),
        Err(_elapsed) => {
            send_sigterm(&child);
            let escalated = tokio::time::timeout(KILL_GRACE, child.wait()).await;
            match escalated {
                Ok(Ok(status)) => (status.code(), true),
                _ => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    (None, true)
                }
            }
        }
    };

    let stdout_bytes = stdout_task.await.unwrap_or_default();
    let stderr_bytes = stderr_task.await.unwrap_or_default();

    Ok(HandlerRun {
        exit_code,
        timed_out,
        stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
        stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
    })
}

#[cfg(unix)]
fn send_sigterm(child: &tokio::process::Child) {
    if let Some(pid) = child.id() {
        unsafe {
            libc_kill(pid as i32, 15);
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &tokio::process::Child) {}

#[cfg(unix)]
unsafe fn libc_kill(pid: i32, sig: i32) {
    extern "C" {
        fn kill(pid: i32, sig: i32) -> i32;
    }
    kill(pid, sig);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::HookEventName;
    use hookguard_config::CircuitBreakerConfig;

    fn event() -> HookEvent {
        HookEvent {
            hook_event_name: HookEventName::PostToolUse,
            session_id: "s1".to_string(),
            cwd: None,
            transcript_path: None,
            tool_name: Some("Bash".to_string()),
            tool_input: Some(serde_json::json!({"command": "ls"})),
            tool_output: None,
            prompt: None,
            trigger: None,
        }
    }

    fn breaker_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            cooldown_seconds: 300,
            exclusions: Vec::new(),
        }
    }

    #[tokio::test]
    async fn successful_handler_merges_additional_context() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(dir.path()).expect("store");
        let registry = HooksRegistry {
            handlers: vec![HandlerDescriptor {
                name: "echo-context".to_string(),
                events: vec!["PostToolUse".to_string()],
                command: r#"echo '{"hook_specific_output":{"hook_event_name":"PostToolUse","additional_context":"hello"}}'"#.to_string(),
                timeout_ms: 5_000,
                exclude_from_circuit_breaker: false,
                working_directory: None,
                env_passthrough: vec![],
            }],
        };

        let result = dispatch(&store, &registry, &breaker_config(), &event()).await;
        assert_eq!(result.outcomes.len(), 1);
        assert!(!result.outcomes[0].skipped_by_breaker);
        let context = result.aggregated.hook_specific_output.unwrap().additional_context.unwrap();
        assert_eq!(context, "hello");
    }

    #[tokio::test]
    async fn open_circuit_skips_handler_without_spawning() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(dir.path()).expect("store");
        let config = breaker_config();
        let breaker = CircuitBreaker::new(&store, &config);
        for _ in 0..3 {
            breaker.record_failure("flaky", "boom").expect("record");
        }

        let registry = HooksRegistry {
            handlers: vec![HandlerDescriptor {
                name: "flaky".to_string(),
                events: vec!["PostToolUse".to_string()],
                command: "exit 1".to_string(),
                timeout_ms: 5_000,
                exclude_from_circuit_breaker: false,
                working_directory: None,
                env_passthrough: vec![],
            }],
        };

        let result = dispatch(&store, &registry, &config, &event()).await;
        assert!(result.outcomes[0].skipped_by_breaker);
    }

    #[tokio::test]
    async fn timing_out_handler_is_marked_timed_out() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(dir.path()).expect("store");
        let registry = HooksRegistry {
            handlers: vec![HandlerDescriptor {
                name: "slow".to_string(),
                events: vec!["PostToolUse".to_string()],
                command: "sleep 5".to_string(),
                timeout_ms: 50,
                exclude_from_circuit_breaker: false,
                working_directory: None,
                env_passthrough: vec![],
            }],
        };

        let result = dispatch(&store, &registry, &breaker_config(), &event()).await;
        assert!(result.outcomes[0].timed_out);
    }

    #[tokio::test]
    async fn non_json_stdout_is_ignored_not_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(dir.path()).expect("store");
        let registry = HooksRegistry {
            handlers: vec![HandlerDescriptor {
                name: "noisy".to_string(),
                events: vec!["PostToolUse".to_string()],
                command: "echo not json".to_string(),
                timeout_ms: 5_000,
                exclude_from_circuit_breaker: false,
                working_directory: None,
                env_passthrough: vec![],
            }],
        };

        let result = dispatch(&store, &registry, &breaker_config(), &event()).await;
        assert!(result.outcomes[0].response.is_empty());
        assert_eq!(result.outcomes[0].exit_code, Some(0));
    }
}
