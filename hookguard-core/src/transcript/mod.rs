//! Streams a JSON-lines transcript into typed records and builds the task registry.
//!
//! The task-registry correlation is the single most error-prone part of the
//! pipeline: an earlier design correlated active tasks by subject string and
//! completed tasks by id, which meant the two collections never actually
//! referred to the same task. This implementation builds one registry keyed by
//! task id from the start, so "active" and "completed" are just different values
//! of the same entry's `status` field.

mod registry;

pub use registry::{TaskRegistry, TaskStatus, TaskEntry};

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

#[derive(Debug, Clone)]
pub enum TranscriptRecord {
    AssistantText(String),
    UserText(String),
    ToolUse { id: String, name: String, input: Value },
    ToolResult { tool_use_id: String, text: String },
}

#[derive(Debug, Deserialize)]
struct RawLine {
    message: Option<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    role: Option<String>,
    #[serde(default)]
    content: Option<Value>,
}

/// Reads the transcript file and returns its records in order, skipping lines
/// that are not valid JSON or do not contain a `message` object.
pub fn parse_transcript(path: &Path) -> std::io::Result<Vec<TranscriptRecord>> {
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    let mut records = Vec::new();

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let Ok(raw) = serde_json::from_str::<RawLine>(&line) else {
            tracing::debug!("skipping unparseable transcript line");
            continue;
        };
        let Some(message) = raw.message else { continue };
        records.extend(records_from_message(&message));
    }

    Ok(records)
}

fn records_from_message(message: &RawMessage) -> Vec<TranscriptRecord> {
    let role = message.role.as_deref().unwrap_or("");
    let mut out = Vec::new();

    match &message.content {
        Some(Value::String(text)) => {
            out.push(text_record(role, text.clone()));
        }
        Some(Value::Array(blocks)) => {
            let mut concatenated_text = String::new();
            for block in blocks {
                match block.get("type").and_then(|t| t.as_str()) {
                    Some("text") => {
                        if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                            if !concatenated_text.is_empty() {
                                concatenated_text.push('\n');
                            }
                            concatenated_text.push_str(text);
                        }
                    }
                    Some("tool_use") => {
                        let id = block.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                        let name = block.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                        let input = block.get("input").cloned().unwrap_or(Value::Null);
                        out.push(TranscriptRecord::ToolUse { id, name, input });
                    }
                    Some("tool_result") => {
                        let tool_use_id = block
                            .get("tool_use_id")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string();
                        let text = block_text(block);
                        out.push(TranscriptRecord::ToolResult { tool_use_id, text });
                    }
                    _ => {}
                }
            }
            if !concatenated_text.is_empty() {
                out.push(text_record(role, concatenated_text));
            }
        }
        _ => {}
    }

    out
}

fn block_text(block: &Value) -> String {
    match block.get("content") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn text_record(role: &str, text: String) -> TranscriptRecord {
    if role == "assistant" {
        TranscriptRecord::AssistantText(text)
    } else {
        TranscriptRecord::UserText(text)
    }
}

/// Builds the task registry from a record stream, per §4.F's three-step algorithm.
pub fn build_task_registry(records: &[TranscriptRecord]) -> TaskRegistry {
    let mut pending: HashMap<String, String> = HashMap::new();
    let mut registry = TaskRegistry::default();

    for record in records {
        if let TranscriptRecord::ToolUse { id, name, input } = record {
            if name == "TaskCreate" {
                let subject = input
                    .get("subject")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                pending.insert(id.clone(), subject);
            }
        }
    }

    for record in records {
        if let TranscriptRecord::ToolResult { tool_use_id, text } = record {
            if let Some(subject) = pending.remove(tool_use_id) {
                let task_id = serde_json::from_str::<Value>(text)
                    .ok()
                    .and_then(|body| {
                        body.get("taskId")
                            .or_else(|| body.get("id"))
                            .and_then(|v| v.as_str().map(str::to_string))
                    })
                    .unwrap_or_else(|| tool_use_id.clone());
                registry.insert(task_id, subject);
            }
        }
    }

    for record in records {
        if let TranscriptRecord::ToolUse { name, input, .. } = record {
            if name == "TaskUpdate" {
                if let Some(task_id) = input.get("taskId").and_then(|v| v.as_str()) {
                    if let Some(status) = input.get("status").and_then(|v| v.as_str()) {
                        registry.set_status(task_id, TaskStatus::from_str(status));
                    }
                }
            }
        }
    }

    registry
}

/// Builds a task-id → (first-turn, last-turn) index over `records`' own
/// positions, where a task's "turns" span from its `TaskCreate` result to its
/// last `TaskUpdate` referencing the same id. Feeds `compaction::detect_cold_tasks`,
/// which needs message-range width and recency-since-completion per task.
pub fn build_task_turn_index(records: &[TranscriptRecord]) -> HashMap<String, (usize, usize)> {
    let mut pending_create_turn: HashMap<String, usize> = HashMap::new();
    let mut index: HashMap<String, (usize, usize)> = HashMap::new();

    for (turn, record) in records.iter().enumerate() {
        if let TranscriptRecord::ToolUse { id, name, .. } = record {
            if name == "TaskCreate" {
                pending_create_turn.insert(id.clone(), turn);
            }
        }
    }

    for (turn, record) in records.iter().enumerate() {
        if let TranscriptRecord::ToolResult { tool_use_id, text } = record {
            if let Some(created_turn) = pending_create_turn.remove(tool_use_id) {
                let task_id = serde_json::from_str::<Value>(text)
                    .ok()
                    .and_then(|body| {
                        body.get("taskId")
                            .or_else(|| body.get("id"))
                            .and_then(|v| v.as_str().map(str::to_string))
                    })
                    .unwrap_or_else(|| tool_use_id.clone());
                index.insert(task_id, (created_turn, turn));
            }
        }
    }

    for (turn, record) in records.iter().enumerate() {
        if let TranscriptRecord::ToolUse { name, input, .. } = record {
            if name == "TaskUpdate" {
                if let Some(task_id) = input.get("taskId").and_then(|v| v.as_str()) {
                    if let Some(range) = index.get_mut(task_id) {
                        range.1 = range.1.max(turn);
                    }
                }
            }
        }
    }

    index
}

/// Annotates `registry`'s entries with `created_at_turn`/`completed_at_turn` from
/// a turn index built by [`build_task_turn_index`], so both the registry and the
/// compaction pipeline agree on the same per-task turn range.
pub fn annotate_task_turns(registry: &mut TaskRegistry, turn_index: &HashMap<String, (usize, usize)>) {
    for (task_id, &(start, end)) in turn_index {
        registry.set_turns(task_id, start as u32, end as u32);
    }
}
