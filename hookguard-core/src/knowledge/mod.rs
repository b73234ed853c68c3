//! Knowledge pipeline (H): observe tool use, analyse sessions into candidate
//! learnings, commit deduped learnings to the embedded database, and inject
//! relevant prior learnings back at SessionStart.

mod analyse;
mod db;
mod inject;
mod learn;
mod observe;

pub use analyse::{analyse_session, build_analysis_prompt, deterministic_fallback_summary, summarize_observations, ObservationSummary};
pub use db::{validate_import_path, KnowledgeCategory, KnowledgeDb, KnowledgeEntry, KnowledgeError, NewKnowledgeEntry};
pub use inject::{format_injection, inject_relevant, rank_and_filter, RankedEntry};
pub use learn::{auto_generate_tags, commit_pending, stage_pending, LearnError, PendingLearning};
pub use observe::{derive_observation, load_unprocessed, mark_processed, observe, ObservationKind, ObservationRecord};
