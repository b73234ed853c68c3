//! H.2 Analyse: batches unprocessed observations, summarizes them, asks the
//! configured provider chain for candidate learnings, and falls back to a
//! deterministic frequency summary when every provider is unavailable.
//! Grounded in `analyze_session.py`'s `summarize_observations`/`build_prompt`.

use super::observe::{ObservationKind, ObservationRecord};
use crate::llm::{FallbackChain, ProviderError, RawLearning};
use std::collections::HashMap;
use std::time::Duration;

/// A deduped count of (pattern, tool) pairs, sorted by descending frequency, plus
/// the distinct error patterns seen. Mirrors `summarize_observations`'s grouping.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationSummary {
    pub total: usize,
    pub by_pattern: Vec<(String, usize)>,
    pub error_patterns: Vec<String>,
}

pub fn summarize_observations(observations: &[ObservationRecord]) -> ObservationSummary {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut error_patterns: Vec<String> = Vec::new();

    for record in observations {
        *counts.entry(record.pattern.clone()).or_insert(0) += 1;
        if record.kind == ObservationKind::Error && !error_patterns.contains(&record.pattern) {
            error_patterns.push(record.pattern.clone());
        }
    }

    let mut by_pattern: Vec<(String, usize)> = counts.into_iter().collect();
    by_pattern.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    ObservationSummary {
        total: observations.len(),
        by_pattern,
        error_patterns,
    }
}

/// Builds the prompt sent to the LLM provider chain: a compact textual summary
/// rather than raw JSON, to keep the request well within the context window the
/// `max_observations_for_llm` cap already protects against.
pub fn build_analysis_prompt(summary: &ObservationSummary) -> String {
    let mut prompt = String::new();
    prompt.push_str("Review this coding session's tool-use summary and extract reusable learnings.\n");
    prompt.push_str("Respond with a JSON array of objects: {\"tag\": \"LEARNED|PATTERN|INVESTIGATION\", \"content\": \"...\", \"context\": \"...\", \"confidence\": 0.0-1.0}.\n\n");
    prompt.push_str(&format!("Total observations: {}\n", summary.total));
    prompt.push_str("Top patterns:\n");
    for (pattern, count) in summary.by_pattern.iter().take(15) {
        prompt.push_str(&format!("- {pattern}: {count}\n"));
    }
    if !summary.error_patterns.is_empty() {
        prompt.push_str("Error patterns observed:\n");
        for pattern in &summary.error_patterns {
            prompt.push_str(&format!("- {pattern}\n"));
        }
    }
    prompt
}

/// Deterministic fallback used when every provider fails: turns the two or three
/// most frequent patterns and any error patterns into low-confidence PATTERN
/// learnings, so the pipeline never silently drops a session with zero output.
pub fn deterministic_fallback_summary(summary: &ObservationSummary) -> Vec<RawLearning> {
    let mut learnings = Vec::new();
    for (pattern, count) in summary.by_pattern.iter().take(3) {
        if *count < 3 {
            continue;
        }
        learnings.push(RawLearning {
            tag: "PATTERN".to_string(),
            content: format!("Tool pattern '{pattern}' occurred {count} times this session"),
            context: None,
            confidence: 0.3,
        });
    }
    for pattern in &summary.error_patterns {
        learnings.push(RawLearning {
            tag: "LEARNED".to_string(),
            content: format!("Errors were observed around pattern '{pattern}'"),
            context: None,
            confidence: 0.3,
        });
    }
    learnings
}

/// Full H.2 orchestration: summarize, try the provider chain, fall back to the
/// deterministic summary on total provider failure. Never returns an error —
/// a degraded but non-empty result is always preferable to blocking the hook.
pub async fn analyse_session(
    observations: &[ObservationRecord],
    chain: &FallbackChain,
    per_provider_deadline: Duration,
) -> Vec<RawLearning> {
    let summary = summarize_observations(observations);
    if summary.total == 0 {
        return Vec::new();
    }
    let prompt = build_analysis_prompt(&summary);

    match chain.analyse(&prompt, per_provider_deadline).await {
        Ok(learnings) => learnings,
        Err(error) => {
            tracing::warn!(%error, "all learning providers failed, using deterministic fallback");
            deterministic_fallback_summary(&summary)
        }
    }
}

pub type AnalyseError = ProviderError;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(pattern: &str, kind: ObservationKind) -> ObservationRecord {
        ObservationRecord {
            timestamp: Utc::now(),
            session_id: "s1".to_string(),
            kind,
            tool: "Bash".to_string(),
            pattern: pattern.to_string(),
            context: serde_json::json!({}),
            processed: false,
        }
    }

    #[test]
    fn summary_sorts_by_descending_frequency() {
        let observations = vec![
            record("bash_command", ObservationKind::ToolUsage),
            record("edit_file", ObservationKind::ToolUsage),
            record("bash_command", ObservationKind::ToolUsage),
        ];
        let summary = summarize_observations(&observations);
        assert_eq!(summary.by_pattern[0], ("bash_command".to_string(), 2));
    }

    #[test]
    fn summary_collects_distinct_error_patterns() {
        let observations = vec![
            record("bash_command", ObservationKind::Error),
            record("bash_command", ObservationKind::Error),
            record("edit_file", ObservationKind::ToolUsage),
        ];
        let summary = summarize_observations(&observations);
        assert_eq!(summary.error_patterns, vec!["bash_command".to_string()]);
    }

    #[test]
    fn deterministic_fallback_skips_low_frequency_patterns() {
        let summary = ObservationSummary {
            total: 2,
            by_pattern: vec![("edit_file".to_string(), 2)],
            error_patterns: vec![],
        };
        let learnings = deterministic_fallback_summary(&summary);
        assert!(learnings.is_empty());
    }

    #[test]
    fn deterministic_fallback_emits_for_frequent_patterns_and_errors() {
        let summary = ObservationSummary {
            total: 10,
            by_pattern: vec![("bash_command".to_string(), 5)],
            error_patterns: vec!["bash_command".to_string()],
        };
        let learnings = deterministic_fallback_summary(&summary);
        assert_eq!(learnings.len(), 2);
    }

    #[tokio::test]
    async fn empty_observations_short_circuits_to_empty() {
        let chain = FallbackChain::new(vec![]);
        let learnings = analyse_session(&[], &chain, Duration::from_secs(1)).await;
        assert!(learnings.is_empty());
    }
}
