use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandlerState {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub total_failures: u64,
    pub first_failure: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub disabled_at: Option<DateTime<Utc>>,
    pub retry_after: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Administrative override via the CLI `disable` subcommand, independent of
    /// the circuit breaker's own open/closed state.
    #[serde(default)]
    pub manually_disabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalStats {
    pub executions: u64,
    pub failures: u64,
    pub open_handlers: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookStateData {
    #[serde(default)]
    pub handlers: IndexMap<String, HandlerState>,
    #[serde(default)]
    pub global: GlobalStats,
}
