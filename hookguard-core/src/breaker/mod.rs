//! Per-handler circuit breaker gating handler execution.
//!
//! Each event invocation is a fresh process, so there is no in-memory cache carried
//! across invocations: every `should_execute`/`record_success`/`record_failure` call
//! goes through `state::with_locked_file`, which holds one exclusive file lock across
//! the load, the mutation, and the write-back, so the full read-mutate-write cycle is
//! atomic across concurrent processes (spec property P3). A process-local
//! `LockRegistry` mutex is taken first so two tasks in the same process never contend
//! on the same `flock` call against themselves.

mod state;

pub use state::{CircuitState, GlobalStats, HandlerState, HookStateData};

use crate::state::{AtomicFileError, StateStore};
use chrono::Utc;
use hookguard_config::CircuitBreakerConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CircuitError {
    #[error(transparent)]
    File(#[from] AtomicFileError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteDecision {
    Execute,
    ExecuteTest,
    Skip,
}

pub struct CircuitBreaker<'a> {
    store: &'a StateStore,
    config: &'a CircuitBreakerConfig,
}

impl<'a> CircuitBreaker<'a> {
    pub fn new(store: &'a StateStore, config: &'a CircuitBreakerConfig) -> Self {
        Self { store, config }
    }

    /// Locks `hook_state.json` once for the whole read-mutate-write cycle `mutate`
    /// performs, after first taking the process-local registry mutex so two tasks
    /// in this process never race each other for the same `flock`.
    fn with_state<R>(&self, mutate: impl FnOnce(&mut HookStateData) -> R) -> Result<R, CircuitError> {
        let path = self.store.hook_state_path();
        let _guard = self.store.locks().handle_for(&path).lock();
        Ok(crate::state::with_locked_file(&path, mutate)?)
    }

    /// Determines whether `handler_name` may run right now, mutating its state if a
    /// time-based transition (open → half-open) applies.
    pub fn should_execute(&self, handler_name: &str) -> Result<(ExecuteDecision, CircuitState), CircuitError> {
        if self.config.exclusions.iter().any(|excluded| excluded == handler_name) {
            return Ok((ExecuteDecision::Execute, CircuitState::Closed));
        }

        self.with_state(|data| {
            let handler = data.handlers.entry(handler_name.to_string()).or_default();

            if handler.manually_disabled {
                return (ExecuteDecision::Skip, handler.state);
            }

            let decision = match handler.state {
                CircuitState::Closed => ExecuteDecision::Execute,
                CircuitState::Open => {
                    let now = Utc::now();
                    if handler.retry_after.map(|retry_after| now >= retry_after).unwrap_or(true) {
                        handler.state = CircuitState::HalfOpen;
                        handler.consecutive_failures = 0;
                        handler.consecutive_successes = 0;
                        ExecuteDecision::ExecuteTest
                    } else {
                        ExecuteDecision::Skip
                    }
                }
                CircuitState::HalfOpen => ExecuteDecision::ExecuteTest,
            };

            (decision, handler.state)
        })
    }

    pub fn record_success(&self, handler_name: &str) -> Result<(), CircuitError> {
        self.with_state(|data| {
            let handler = data.handlers.entry(handler_name.to_string()).or_default();
            let now = Utc::now();

            handler.consecutive_failures = 0;
            handler.consecutive_successes += 1;
            handler.last_success = Some(now);

            if handler.state == CircuitState::HalfOpen
                && handler.consecutive_successes >= self.config.success_threshold
            {
                handler.state = CircuitState::Closed;
                handler.disabled_at = None;
                handler.retry_after = None;
                handler.last_error = None;
            }

            data.global.executions += 1;
        })
    }

    pub fn record_failure(&self, handler_name: &str, error: &str) -> Result<(), CircuitError> {
        self.with_state(|data| {
            let handler = data.handlers.entry(handler_name.to_string()).or_default();
            let now = Utc::now();

            handler.consecutive_successes = 0;
            handler.consecutive_failures += 1;
            handler.total_failures += 1;
            handler.last_failure = Some(now);
            handler.last_error = Some(error.to_string());
            if handler.first_failure.is_none() {
                handler.first_failure = Some(now);
            }

            let should_open = match handler.state {
                CircuitState::Closed => handler.consecutive_failures >= self.config.failure_threshold,
                CircuitState::HalfOpen => true,
                CircuitState::Open => true,
            };

            if should_open {
                handler.state = CircuitState::Open;
                handler.disabled_at = Some(now);
                // threaded from config, never hardcoded (spec §9 bug fix).
                handler.retry_after = Some(now + chrono::Duration::seconds(self.config.cooldown_seconds as i64));
            }

            data.global.executions += 1;
            data.global.failures += 1;
            data.global.open_handlers =
                data.handlers.values().filter(|h| h.state == CircuitState::Open).count() as u32;
        })
    }

    pub fn reset(&self, handler_name: &str) -> Result<(), CircuitError> {
        self.with_state(|data| {
            data.handlers.insert(handler_name.to_string(), HandlerState::default());
        })
    }

    pub fn set_manually_disabled(&self, handler_name: &str, disabled: bool) -> Result<(), CircuitError> {
        self.with_state(|data| {
            data.handlers.entry(handler_name.to_string()).or_default().manually_disabled = disabled;
        })
    }

    pub fn reset_all(&self) -> Result<(), CircuitError> {
        self.with_state(|data| {
            *data = HookStateData::default();
        })
    }

    /// Read-only snapshot for the admin CLI. Not run through `with_state`: there is
    /// nothing to mutate, so a shared lock for the read alone is enough.
    pub fn snapshot(&self) -> Result<HookStateData, CircuitError> {
        let path = self.store.hook_state_path();
        Ok(crate::state::read_json::<HookStateData>(&path)?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, StateStore, CircuitBreakerConfig) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(dir.path()).expect("store");
        let config = CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            cooldown_seconds: 300,
            exclusions: Vec::new(),
        };
        (dir, store, config)
    }

    #[test]
    fn opens_after_consecutive_failures_then_skips() {
        let (_dir, store, config) = setup();
        let breaker = CircuitBreaker::new(&store, &config);

        for _ in 0..3 {
            breaker.record_failure("h1", "boom").expect("record");
        }

        let (decision, state) = breaker.should_execute("h1").expect("should_execute");
        assert_eq!(decision, ExecuteDecision::Skip);
        assert_eq!(state, CircuitState::Open);
    }

    #[test]
    fn half_open_closes_after_success_threshold() {
        let (_dir, store, config) = setup();
        let breaker = CircuitBreaker::new(&store, &config);
        for _ in 0..3 {
            breaker.record_failure("h1", "boom").expect("record");
        }

        // Force immediate half-open by resetting retry_after to the past.
        let mut data = breaker.snapshot().expect("snapshot");
        data.handlers.get_mut("h1").unwrap().retry_after = Some(Utc::now() - chrono::Duration::seconds(1));
        let path = store.hook_state_path();
        crate::state::write_json(&path, &data).expect("write");

        let (decision, state) = breaker.should_execute("h1").expect("should_execute");
        assert_eq!(decision, ExecuteDecision::ExecuteTest);
        assert_eq!(state, CircuitState::HalfOpen);

        breaker.record_success("h1").expect("success 1");
        breaker.record_success("h1").expect("success 2");

        let (decision, state) = breaker.should_execute("h1").expect("should_execute");
        assert_eq!(decision, ExecuteDecision::Execute);
        assert_eq!(state, CircuitState::Closed);
    }

    #[test]
    fn half_open_reopens_on_single_failure() {
        let (_dir, store, config) = setup();
        let breaker = CircuitBreaker::new(&store, &config);
        for _ in 0..3 {
            breaker.record_failure("h1", "boom").expect("record");
        }
        let mut data = breaker.snapshot().expect("snapshot");
        data.handlers.get_mut("h1").unwrap().state = CircuitState::HalfOpen;
        let path = store.hook_state_path();
        crate::state::write_json(&path, &data).expect("write");

        breaker.record_failure("h1", "still broken").expect("record");
        let data = breaker.snapshot().expect("snapshot");
        assert_eq!(data.handlers["h1"].state, CircuitState::Open);
    }

    #[test]
    fn excluded_handler_always_executes() {
        let (_dir, store, mut config) = setup();
        config.exclusions.push("always-on".to_string());
        let breaker = CircuitBreaker::new(&store, &config);
        for _ in 0..10 {
            breaker.record_failure("always-on", "boom").expect("record");
        }
        let (decision, _) = breaker.should_execute("always-on").expect("should_execute");
        assert_eq!(decision, ExecuteDecision::Execute);
    }

    #[test]
    fn manually_disabled_handler_is_skipped_even_when_closed() {
        let (_dir, store, config) = setup();
        let breaker = CircuitBreaker::new(&store, &config);
        breaker.set_manually_disabled("h1", true).expect("disable");
        let (decision, _) = breaker.should_execute("h1").expect("should_execute");
        assert_eq!(decision, ExecuteDecision::Skip);

        breaker.set_manually_disabled("h1", false).expect("enable");
        let (decision, _) = breaker.should_execute("h1").expect("should_execute");
        assert_eq!(decision, ExecuteDecision::Execute);
    }

    #[test]
    fn cooldown_uses_configured_value_not_hardcoded_300() {
        let (_dir, store, mut config) = setup();
        config.cooldown_seconds = 42;
        let breaker = CircuitBreaker::new(&store, &config);
        for _ in 0..3 {
            breaker.record_failure("h1", "boom").expect("record");
        }
        let data = breaker.snapshot().expect("snapshot");
        let handler = &data.handlers["h1"];
        let delta = handler.retry_after.unwrap() - handler.disabled_at.unwrap();
        assert_eq!(delta.num_seconds(), 42);
    }
}
