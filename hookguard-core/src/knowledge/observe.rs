//! H.1 Observe: derives a pattern tag from a tool call and appends one JSON line
//! to `observations.jsonl`. Must complete in under 100ms P99 — no network calls,
//! no database access, just an append under an exclusive file lock.

use crate::state::{JsonlError, StateStore, append_line, read_lines};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationKind {
    ToolUsage,
    Error,
    Pattern,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObservationRecord {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    #[serde(rename = "type")]
    pub kind: ObservationKind,
    pub tool: String,
    pub pattern: String,
    #[serde(default)]
    pub context: serde_json::Value,
    #[serde(default)]
    pub processed: bool,
}

/// Derives a short pattern tag and a minimal context object from a tool call.
/// Grounded in `analyze_session.py`'s by-pattern grouping, which expects a small,
/// closed vocabulary of tags rather than free text.
pub fn derive_observation(
    session_id: &str,
    tool_name: &str,
    tool_input: &serde_json::Value,
    tool_output: Option<&str>,
) -> ObservationRecord {
    let failed = tool_output
        .map(|out| out.to_lowercase().contains("error") || out.to_lowercase().contains("traceback"))
        .unwrap_or(false);

    let kind = if failed { ObservationKind::Error } else { ObservationKind::ToolUsage };

    let pattern = match tool_name {
        "Bash" => "bash_command".to_string(),
        "Edit" => "edit_file".to_string(),
        "Write" => "write_file".to_string(),
        "Read" => "read_file".to_string(),
        "Grep" | "Glob" => "search".to_string(),
        "Task" => "spawn_agent".to_string(),
        other => format!("tool:{}", other.to_lowercase()),
    };

    let mut context = serde_json::json!({});
    if let Some(command) = tool_input.get("command").and_then(|v| v.as_str()) {
        context["command"] = serde_json::Value::String(truncate(command, 200));
    }
    if let Some(path) = tool_input.get("file_path").and_then(|v| v.as_str()) {
        context["file_path"] = serde_json::Value::String(path.to_string());
    }
    if failed {
        if let Some(out) = tool_output {
            context["error_snippet"] = serde_json::Value::String(truncate(out, 300));
        }
    }

    ObservationRecord {
        timestamp: Utc::now(),
        session_id: session_id.to_string(),
        kind,
        tool: tool_name.to_string(),
        pattern,
        context,
        processed: false,
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect::<String>() + "..."
    }
}

/// Appends one observation to `observations.jsonl`.
pub fn observe(store: &StateStore, record: &ObservationRecord) -> Result<(), JsonlError> {
    append_line(&store.observations_path(), record)
}

/// Loads unprocessed observations for `session_id`, capped at `max_count`, most
/// recent first truncated to the cap (mirrors `observations[-max_count:]`).
pub fn load_unprocessed(
    store: &StateStore,
    session_id: &str,
    max_count: usize,
) -> Result<Vec<ObservationRecord>, JsonlError> {
    let all: Vec<ObservationRecord> = read_lines(&store.observations_path())?;
    let mut matching: Vec<ObservationRecord> = all
        .into_iter()
        .filter(|record| !record.processed && record.session_id == session_id)
        .collect();
    if matching.len() > max_count {
        matching = matching.split_off(matching.len() - max_count);
    }
    Ok(matching)
}

/// Marks every observation belonging to `session_id` with `timestamp <=
/// up_to_timestamp` as processed, rewriting the whole log under an exclusive lock.
/// Readers never assume total order across processes (§5), so this only needs to
/// be correct for the single session it consumes.
pub fn mark_processed(
    store: &StateStore,
    session_id: &str,
    up_to_timestamp: DateTime<Utc>,
) -> Result<(), JsonlError> {
    let path = store.observations_path();
    let mut all: Vec<ObservationRecord> = read_lines(&path)?;
    for record in &mut all {
        if record.session_id == session_id && !record.processed && record.timestamp <= up_to_timestamp {
            record.processed = true;
        }
    }
    rewrite_jsonl(&path, &all)
}

fn rewrite_jsonl(path: &std::path::Path, records: &[ObservationRecord]) -> Result<(), JsonlError> {
    use fs2::FileExt;
    use std::io::Write;

    let file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(|source| JsonlError::Io {
            path: path.display().to_string(),
            source,
        })?;
    file.lock_exclusive().map_err(|source| JsonlError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut writer = std::io::BufWriter::new(&file);
    for record in records {
        let line = serde_json::to_string(record).unwrap_or_else(|_| "{}".to_string());
        writeln!(writer, "{line}").map_err(|source| JsonlError::Io {
            path: path.display().to_string(),
            source,
        })?;
    }
    writer.flush().map_err(|source| JsonlError::Io {
        path: path.display().to_string(),
        source,
    })?;
    drop(writer);
    FileExt::unlock(&file).ok();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bash_command_tags_as_bash_command() {
        let record = derive_observation("s1", "Bash", &serde_json::json!({"command": "ls"}), Some("ok"));
        assert_eq!(record.pattern, "bash_command");
        assert_eq!(record.kind, ObservationKind::ToolUsage);
    }

    #[test]
    fn error_in_output_marks_error_kind() {
        let record = derive_observation("s1", "Bash", &serde_json::json!({"command": "false"}), Some("Error: boom"));
        assert_eq!(record.kind, ObservationKind::Error);
    }

    #[test]
    fn observe_then_load_unprocessed_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(dir.path()).expect("store");
        let record = derive_observation("s1", "Edit", &serde_json::json!({"file_path": "a.rs"}), None);
        observe(&store, &record).expect("observe");

        let loaded = load_unprocessed(&store, "s1", 200).expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].pattern, "edit_file");
    }

    #[test]
    fn mark_processed_excludes_from_next_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(dir.path()).expect("store");
        let record = derive_observation("s1", "Edit", &serde_json::json!({"file_path": "a.rs"}), None);
        observe(&store, &record).expect("observe");

        mark_processed(&store, "s1", Utc::now()).expect("mark processed");
        let loaded = load_unprocessed(&store, "s1", 200).expect("load");
        assert!(loaded.is_empty());
    }

    #[test]
    fn load_unprocessed_caps_to_most_recent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(dir.path()).expect("store");
        for i in 0..5 {
            let mut record = derive_observation("s1", "Bash", &serde_json::json!({"command": format!("echo {i}")}), None);
            record.timestamp = Utc::now() + chrono::Duration::seconds(i);
            observe(&store, &record).expect("observe");
        }
        let loaded = load_unprocessed(&store, "s1", 2).expect("load");
        assert_eq!(loaded.len(), 2);
    }
}
