use serde::{Deserialize, Serialize};

/// Per-session checkpoint for the periodic, throttled cold-task detection pass
/// (§4.G.1), persisted at `StateStore::session_progress_path`. G.2's preservation
/// block assembly does not consult this — it runs on every PreCompact regardless.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionCompactionProgress {
    pub last_check_turn: Option<usize>,
}

impl SessionCompactionProgress {
    /// A check is due once `check_frequency` turns have passed since the last one,
    /// or none has run yet this session.
    pub fn due(&self, current_turn: usize, check_frequency: u32) -> bool {
        match self.last_check_turn {
            None => true,
            Some(last) => current_turn.saturating_sub(last) >= check_frequency as usize,
        }
    }
}
