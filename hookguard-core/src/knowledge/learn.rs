//! H.3 Learn: stages analysed learnings to `pending_learnings.json`, then
//! dedups, tags, and commits them into the knowledge database. Grounded in
//! `store_learnings.py`'s `auto_generate_tags`/`store_learning`/`main` flow,
//! including the rename-to-`.processed.json` bookkeeping on success.

use super::db::{KnowledgeCategory, KnowledgeDb, KnowledgeError, NewKnowledgeEntry};
use crate::llm::RawLearning;
use crate::state::{AtomicFileError, StateStore, read_json, write_json};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingLearning {
    pub session_id: String,
    pub source: String,
    pub raw: RawLearning,
}

#[derive(Debug, thiserror::Error)]
pub enum LearnError {
    #[error(transparent)]
    AtomicFile(#[from] AtomicFileError),
    #[error(transparent)]
    Knowledge(#[from] KnowledgeError),
}

/// Appends freshly-analysed learnings to the pending-learnings staging file so a
/// crash between analysis and commit never loses work (§4.H.2/H.3 handoff).
pub fn stage_pending(
    store: &StateStore,
    session_id: &str,
    source: &str,
    learnings: Vec<RawLearning>,
) -> Result<(), LearnError> {
    if learnings.is_empty() {
        return Ok(());
    }
    let path = store.pending_learnings_path();
    let mut pending: Vec<PendingLearning> = read_json(&path)?.unwrap_or_default();
    pending.extend(learnings.into_iter().map(|raw| PendingLearning {
        session_id: session_id.to_string(),
        source: source.to_string(),
        raw,
    }));
    write_json(&path, &pending)?;
    Ok(())
}

/// Keyword-based tag derivation: tool mentions plus a fixed concept vocabulary.
/// Mirrors `auto_generate_tags`'s two passes over the lowercased content.
pub fn auto_generate_tags(content: &str) -> Vec<String> {
    let lower = content.to_lowercase();
    let mut tags = Vec::new();

    for (needle, tag) in [
        ("bash", "bash"),
        ("git", "git"),
        ("docker", "docker"),
        ("test", "testing"),
        ("cargo", "cargo"),
        ("python", "python"),
        ("rust", "rust"),
    ] {
        if lower.contains(needle) && !tags.contains(&tag.to_string()) {
            tags.push(tag.to_string());
        }
    }
    for (needle, tag) in [
        ("error", "error-handling"),
        ("performance", "performance"),
        ("security", "security"),
        ("refactor", "refactoring"),
        ("config", "configuration"),
        ("deploy", "deployment"),
        ("async", "concurrency"),
        ("lock", "concurrency"),
    ] {
        if lower.contains(needle) && !tags.contains(&tag.to_string()) {
            tags.push(tag.to_string());
        }
    }
    tags
}

fn category_for_tag(tag: &str) -> KnowledgeCategory {
    KnowledgeCategory::parse(tag).unwrap_or(KnowledgeCategory::Learned)
}

fn title_from_content(content: &str) -> String {
    content.chars().take(80).collect()
}

/// Commits every staged pending learning for `session_id` into the knowledge
/// database: dedup against existing entries, skip below `MIN_CONFIDENCE`, tag,
/// insert, and link every pair committed in the same batch as `same_session`.
/// On success the staging file is cleared; callers are expected to then move it
/// to the `.processed.json` path (handled here for parity with the original's
/// rename-on-success / delete-on-failure bookkeeping).
pub async fn commit_pending(
    store: &StateStore,
    db: &KnowledgeDb,
    session_id: &str,
    min_confidence: f64,
    dedup_overlap_threshold: f64,
) -> Result<usize, LearnError> {
    let path = store.pending_learnings_path();
    let all: Vec<PendingLearning> = read_json(&path)?.unwrap_or_default();
    let (mine, rest): (Vec<_>, Vec<_>) = all.into_iter().partition(|p| p.session_id == session_id);

    let mut committed_ids = Vec::new();
    for pending in &mine {
        if pending.raw.confidence < min_confidence {
            continue;
        }
        let content = match &pending.raw.context {
            Some(context) => format!("{}\n\nContext: {}", pending.raw.content, context),
            None => pending.raw.content.clone(),
        };
        if db.is_duplicate(&content, dedup_overlap_threshold).await? {
            continue;
        }
        let tags = auto_generate_tags(&content);
        let entry = NewKnowledgeEntry {
            category: category_for_tag(&pending.raw.tag),
            title: title_from_content(&content),
            content,
            tags,
            project: None,
            confidence: pending.raw.confidence,
            source: format!("{}:session:{}", pending.source, session_id),
        };
        committed_ids.push(db.insert_entry(entry).await?);
    }

    if committed_ids.len() > 1 {
        db.insert_same_session_relations(&committed_ids).await?;
    }

    write_json(&path, &rest)?;
    let processed = store.processed_learnings_path();
    let mut archived: Vec<PendingLearning> = read_json(&processed)?.unwrap_or_default();
    archived.extend(mine.clone());
    write_json(&processed, &archived)?;

    Ok(committed_ids.len())
}
