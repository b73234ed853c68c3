use crate::transcript::{TaskRegistry, TaskStatus, TranscriptRecord};
use hookguard_config::CompactionConfig;
use serde::{Deserialize, Serialize};

/// Per-(session, task) evidence extracted once a completed task goes cold.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColdTaskSummary {
    pub session_id: String,
    pub task_id: String,
    pub subject: String,
    pub files_modified: Vec<String>,
    pub commands_run: Vec<String>,
    pub key_outcomes: Vec<String>,
    pub errors_resolved: Vec<String>,
}

/// Sums character counts across messages, converts to an estimated token count,
/// and divides by the configured context budget.
pub fn estimate_fill_fraction(records: &[TranscriptRecord], config: &CompactionConfig) -> f64 {
    let total_chars: usize = records
        .iter()
        .map(|record| match record {
            TranscriptRecord::AssistantText(text) | TranscriptRecord::UserText(text) => text.len(),
            TranscriptRecord::ToolResult { text, .. } => text.len(),
            TranscriptRecord::ToolUse { input, .. } => input.to_string().len(),
        })
        .sum();

    let estimated_tokens = total_chars as f64 * config.char_to_token_factor;
    estimated_tokens / config.max_context_tokens as f64
}

/// Identifies tasks eligible for cold-task summarisation: completed, old enough,
/// and with enough message volume in their turn range to be worth summarising.
/// `task_turn_index` maps a task id to the message index range it spans
/// (first-seen, last-seen) and `current_turn` is the index of the latest message.
pub fn detect_cold_tasks<'a>(
    registry: &'a TaskRegistry,
    task_turn_index: &std::collections::HashMap<String, (usize, usize)>,
    current_turn: usize,
    config: &CompactionConfig,
) -> Vec<(&'a String, &'a crate::transcript::TaskEntry)> {
    registry
        .iter()
        .filter(|(task_id, entry)| {
            if entry.status != TaskStatus::Completed {
                return false;
            }
            let Some(&(start, end)) = task_turn_index.get(task_id.as_str()) else {
                return false;
            };
            let turns_since_completion = current_turn.saturating_sub(end);
            let message_count = end.saturating_sub(start) + 1;
            turns_since_completion >= config.turns_until_cold as usize
                && message_count >= config.min_messages_in_range
        })
        .collect()
}

/// Mines evidence from the slice of records spanning a cold task's turn range.
pub fn extract_cold_task_evidence(
    session_id: &str,
    task_id: &str,
    subject: &str,
    records_in_range: &[TranscriptRecord],
) -> ColdTaskSummary {
    let mut files_modified = Vec::new();
    let mut commands_run = Vec::new();
    let mut key_outcomes = Vec::new();
    let mut errors_resolved = Vec::new();

    const TEST_VOCAB: &[&str] = &["test", "pytest", "cargo test", "npm test", "cargo build", "go test", "jest"];
    const DECISION_SIGNALS: &[&str] = &["decided to", "chose to", "switched to", "resolved by", "fixed by"];

    for record in records_in_range {
        match record {
            TranscriptRecord::ToolUse { name, input, .. } if name == "Edit" || name == "Write" => {
                if let Some(path) = input.get("file_path").and_then(|v| v.as_str()) {
                    if !files_modified.iter().any(|existing: &String| existing == path) {
                        files_modified.push(path.to_string());
                    }
                }
            }
            TranscriptRecord::ToolUse { name, input, .. } if name == "Bash" => {
                if let Some(command) = input.get("command").and_then(|v| v.as_str()) {
                    let lower = command.to_lowercase();
                    if TEST_VOCAB.iter().any(|kw| lower.contains(kw))
                        && !commands_run.iter().any(|existing: &String| existing == command)
                    {
                        commands_run.push(command.to_string());
                    }
                }
            }
            TranscriptRecord::AssistantText(text) => {
                let lower = text.to_lowercase();
                if key_outcomes.len() < 3 && DECISION_SIGNALS.iter().any(|kw| lower.contains(kw)) {
                    if let Some(first_line) = text.lines().next() {
                        key_outcomes.push(first_line.trim().to_string());
                    }
                }
            }
            TranscriptRecord::ToolResult { text, .. } => {
                if errors_resolved.len() < 2 && text.to_lowercase().contains("error") {
                    if let Some(first_line) = text.lines().next() {
                        errors_resolved.push(first_line.trim().to_string());
                    }
                }
            }
            _ => {}
        }
    }

    ColdTaskSummary {
        session_id: session_id.to_string(),
        task_id: task_id.to_string(),
        subject: subject.to_string(),
        files_modified,
        commands_run,
        key_outcomes,
        errors_resolved,
    }
}
