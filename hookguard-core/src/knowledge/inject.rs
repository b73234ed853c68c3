//! SessionStart injection: gathers lightweight context from the cwd and recent
//! git history, searches the knowledge database, ranks by BM25 + recency +
//! confidence, and formats the top entries as markdown. Grounded in
//! `inject_relevant.py`'s `get_cwd_context`/`rank_and_filter`/`format_injection`.

use super::db::{KnowledgeCategory, KnowledgeDb, KnowledgeEntry, KnowledgeError};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_MAX_INJECTIONS: usize = 5;
pub const DEFAULT_RECENCY_BOOST: f64 = 0.2;
pub const DEFAULT_LOOKBACK_DAYS: i64 = 30;

pub const DEFAULT_CATEGORIES: &[KnowledgeCategory] = &[
    KnowledgeCategory::Learned,
    KnowledgeCategory::Pattern,
    KnowledgeCategory::Investigation,
];

/// Builds search terms from the cwd's path segments and project-marker
/// detection, mirroring `get_cwd_context`'s dirname-token heuristic.
pub fn cwd_search_terms(cwd: &Path) -> Vec<String> {
    let mut terms: Vec<String> = cwd
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .filter(|s| s.len() > 2 && !s.starts_with('.'))
        .rev()
        .take(3)
        .map(str::to_string)
        .collect();

    for (marker, tag) in [
        ("Cargo.toml", "rust"),
        ("package.json", "javascript"),
        ("pyproject.toml", "python"),
        ("go.mod", "go"),
    ] {
        if cwd.join(marker).exists() {
            terms.push(tag.to_string());
        }
    }
    terms
}

/// Extracts search terms from recently changed file stems/suffixes, using
/// `git diff --name-only` against HEAD with a short timeout so a slow or
/// absent repo never stalls SessionStart.
pub async fn recent_files_search_terms(cwd: &Path) -> Vec<String> {
    let output = tokio::time::timeout(
        Duration::from_secs(3),
        tokio::process::Command::new("git")
            .args(["diff", "--name-only", "HEAD"])
            .current_dir(cwd)
            .output(),
    )
    .await;

    let Ok(Ok(output)) = output else { return Vec::new() };
    if !output.status.success() {
        return Vec::new();
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut terms = Vec::new();
    for line in stdout.lines().take(20) {
        let path = Path::new(line.trim());
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            if stem.len() > 2 {
                terms.push(stem.to_string());
            }
        }
        if let Some(ext) = path.extension().and_then(|s| s.to_str()) {
            terms.push(ext.to_string());
        }
    }
    terms
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedEntry {
    pub entry: KnowledgeEntry,
    pub score: f64,
}

/// Combines BM25 rank (lower is better, so negated), a recency boost for
/// entries created within the last 7 days, and a confidence term, matching
/// `rank_and_filter`'s `bm25_score + recency_score + confidence * 0.1`.
pub fn rank_and_filter(entries: Vec<KnowledgeEntry>, now: DateTime<Utc>, max_injections: usize) -> Vec<RankedEntry> {
    let mut ranked: Vec<RankedEntry> = entries
        .into_iter()
        .map(|entry| {
            let bm25_score = -entry.bm25_rank;
            let recency_score = entry
                .created_at
                .parse::<DateTime<Utc>>()
                .ok()
                .map(|created| {
                    let days = (now - created).num_days();
                    if days <= 7 { DEFAULT_RECENCY_BOOST } else { 0.0 }
                })
                .unwrap_or(0.0);
            let score = bm25_score + recency_score + entry.confidence * 0.1;
            RankedEntry { entry, score }
        })
        .collect();

    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(max_injections);
    ranked
}

fn confidence_bucket(confidence: f64) -> &'static str {
    if confidence >= 0.8 {
        "high"
    } else if confidence >= 0.5 {
        "medium"
    } else {
        "low"
    }
}

/// Strips a trailing `"\n\nContext: ..."` suffix added at store time (§4.H.3),
/// so injected text reads as a clean learning rather than a raw DB row.
fn strip_context_suffix(content: &str) -> &str {
    content.split("\n\nContext:").next().unwrap_or(content).trim()
}

/// Renders the ranked entries as a markdown bullet list with a confidence
/// bucket and tags per item, matching `format_injection`'s layout.
pub fn format_injection(ranked: &[RankedEntry]) -> String {
    if ranked.is_empty() {
        return String::new();
    }
    let mut out = String::from("## Relevant prior learnings\n\n");
    for item in ranked {
        let bucket = confidence_bucket(item.entry.confidence);
        out.push_str(&format!("- [{bucket}] {}", strip_context_suffix(&item.entry.content)));
        if !item.entry.tags.is_empty() {
            out.push_str(&format!(" _(tags: {})_", item.entry.tags.join(", ")));
        }
        out.push('\n');
    }
    out
}

/// Full SessionStart flow: gather context terms, search, rank, format. Returns
/// an empty string (not an error) when nothing relevant is found, since missing
/// knowledge must never block session start.
pub async fn inject_relevant(db: &KnowledgeDb, cwd: &Path) -> Result<String, KnowledgeError> {
    let mut terms = cwd_search_terms(cwd);
    terms.extend(recent_files_search_terms(cwd).await);
    terms.sort();
    terms.dedup();

    if terms.is_empty() {
        return Ok(String::new());
    }

    let entries = db
        .search(&terms, DEFAULT_CATEGORIES, DEFAULT_LOOKBACK_DAYS, DEFAULT_MAX_INJECTIONS * 3)
        .await?;
    let ranked = rank_and_filter(entries, Utc::now(), DEFAULT_MAX_INJECTIONS);
    Ok(format_injection(&ranked))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(content: &str, confidence: f64, bm25_rank: f64) -> KnowledgeEntry {
        KnowledgeEntry {
            id: 1,
            category: "LEARNED".to_string(),
            title: content.chars().take(20).collect(),
            content: content.to_string(),
            tags: vec!["rust".to_string()],
            confidence,
            created_at: Utc::now().to_rfc3339(),
            source: "pipeline".to_string(),
            bm25_rank,
        }
    }

    #[test]
    fn cwd_terms_detect_cargo_project() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("Cargo.toml"), "[package]\n").expect("write");
        let terms = cwd_search_terms(dir.path());
        assert!(terms.contains(&"rust".to_string()));
    }

    #[test]
    fn rank_and_filter_truncates_to_max() {
        let entries = vec![entry("a", 0.9, -1.0), entry("b", 0.8, -2.0), entry("c", 0.5, -0.5)];
        let ranked = rank_and_filter(entries, Utc::now(), 2);
        assert_eq!(ranked.len(), 2);
    }

    #[test]
    fn rank_and_filter_orders_by_score_descending() {
        let entries = vec![entry("weak", 0.1, 0.1), entry("strong", 0.9, -5.0)];
        let ranked = rank_and_filter(entries, Utc::now(), 5);
        assert_eq!(ranked[0].entry.content, "strong");
    }

    #[test]
    fn format_injection_strips_context_suffix_and_buckets_confidence() {
        let ranked = vec![RankedEntry {
            entry: entry("Use structured logging\n\nContext: session abc", 0.9, -1.0),
            score: 1.0,
        }];
        let formatted = format_injection(&ranked);
        assert!(formatted.contains("[high] Use structured logging"));
        assert!(!formatted.contains("Context:"));
    }

    #[test]
    fn format_injection_empty_for_no_entries() {
        assert_eq!(format_injection(&[]), "");
    }
}
