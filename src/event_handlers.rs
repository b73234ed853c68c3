//! Per-event-name handling for the stdin/stdout hook contract: one event in,
//! one [`HookResponse`] out. Each branch wires together the component this
//! event belongs to (policy, classifier, knowledge pipeline, compaction) with
//! the handler dispatcher, then merges both into a single verdict.

use anyhow::{Context, Result};
use hookguard_config::{GuardrailsConfig, HooksRegistry};
use hookguard_core::classifier::{classify, is_confident};
use hookguard_core::compaction::{
    assemble_preservation_block, detect_cold_tasks, estimate_fill_fraction, extract_cold_task_evidence,
    git_diff_stat, ColdTaskSummary, PreservationInputs, SessionCompactionProgress,
};
use hookguard_core::dispatcher::dispatch;
use hookguard_core::envelope::{parse_event, HookEvent, HookEventName, HookResponse, HookSpecificOutput, PermissionDecision, MAX_ENVELOPE_BYTES};
use hookguard_core::knowledge::{
    analyse_session, commit_pending, derive_observation, inject_relevant, load_unprocessed, mark_processed,
    observe, stage_pending, KnowledgeDb,
};
use hookguard_core::llm::build_fallback_chain;
use hookguard_core::policy::PolicyEngine;
use hookguard_core::state::{with_locked_file, read_json, write_json, StateStore};
use hookguard_core::transcript::{annotate_task_turns, build_task_registry, build_task_turn_index, parse_transcript};
use std::io::Read;
use std::process::ExitCode;
use std::time::Duration;

pub async fn handle_stdin_event(
    store: &StateStore,
    config: &GuardrailsConfig,
    registry: &HooksRegistry,
) -> Result<ExitCode> {
    let raw = read_stdin_capped(MAX_ENVELOPE_BYTES)?;
    let event = match parse_event(&raw) {
        Ok(event) => event,
        Err(error) => {
            tracing::warn!(%error, "rejecting malformed hook event");
            println!("{}", serde_json::to_string(&HookResponse::empty())?);
            return Ok(ExitCode::SUCCESS);
        }
    };

    let response = match event.hook_event_name {
        HookEventName::PreToolUse => handle_pre_tool_use(store, config, registry, &event).await?,
        HookEventName::PostToolUse => handle_post_tool_use(store, config, registry, &event).await?,
        HookEventName::UserPromptSubmit => handle_user_prompt_submit(store, config, registry, &event).await?,
        HookEventName::SessionStart => handle_session_start(store, config, registry, &event).await?,
        HookEventName::SessionEnd => handle_session_end(store, config, registry, &event).await?,
        HookEventName::PreCompact => handle_pre_compact(store, config, registry, &event).await?,
        HookEventName::Stop => dispatch(store, registry, &config.circuit_breaker, &event).await.aggregated,
    };

    println!("{}", serde_json::to_string(&response)?);
    Ok(ExitCode::SUCCESS)
}

fn read_stdin_capped(max_bytes: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    std::io::stdin()
        .take(max_bytes as u64 + 1)
        .read_to_end(&mut buf)
        .context("failed to read stdin")?;
    Ok(buf)
}

/// Merges a policy verdict with the handlers' aggregated response, taking the
/// strictest permission decision and concatenating any additional context.
fn merge_policy_and_handlers(
    event_name: &str,
    policy: hookguard_core::policy::PolicyVerdict,
    dispatched: HookResponse,
) -> HookResponse {
    use hookguard_core::policy::Verdict;

    let policy_decision = match policy.verdict {
        Verdict::Allow => None,
        Verdict::Ask => Some(PermissionDecision::Ask),
        Verdict::Deny => Some(PermissionDecision::Deny),
    };

    let mut strictest = policy_decision;
    let mut reason = policy.reason;
    let mut contexts = Vec::new();

    if let Some(output) = dispatched.hook_specific_output {
        if let Some(context) = output.additional_context {
            contexts.push(context);
        }
        if let Some(decision) = output.permission_decision {
            strictest = Some(strictest.map(|current| current.strictest(decision)).unwrap_or(decision));
            if decision != PermissionDecision::Allow && reason.is_none() {
                reason = output.permission_decision_reason;
            }
        }
    }

    if strictest.is_none() && contexts.is_empty() {
        return HookResponse::empty();
    }

    HookResponse {
        hook_specific_output: Some(HookSpecificOutput {
            hook_event_name: event_name.to_string(),
            additional_context: (!contexts.is_empty()).then(|| contexts.join("\n\n")),
            permission_decision: strictest,
            permission_decision_reason: reason,
        }),
    }
}

async fn handle_pre_tool_use(
    store: &StateStore,
    config: &GuardrailsConfig,
    registry: &HooksRegistry,
    event: &HookEvent,
) -> Result<HookResponse> {
    let engine = PolicyEngine::from_config(&config.policy);
    let tool_name = event.tool_name.as_deref().unwrap_or("");
    let tool_input = event.tool_input.clone().unwrap_or(serde_json::Value::Null);
    let verdict = engine.evaluate(tool_name, &tool_input, event.cwd.as_deref(), None);

    let dispatched = dispatch(store, registry, &config.circuit_breaker, event).await.aggregated;
    Ok(merge_policy_and_handlers(event.hook_event_name.as_str(), verdict, dispatched))
}

async fn handle_post_tool_use(
    store: &StateStore,
    config: &GuardrailsConfig,
    registry: &HooksRegistry,
    event: &HookEvent,
) -> Result<HookResponse> {
    let tool_name = event.tool_name.as_deref().unwrap_or("");
    let tool_input = event.tool_input.clone().unwrap_or(serde_json::Value::Null);
    let record = derive_observation(&event.session_id, tool_name, &tool_input, event.tool_output.as_deref());
    if let Err(error) = observe(store, &record) {
        tracing::warn!(%error, "failed to append observation, continuing without it");
    }

    Ok(dispatch(store, registry, &config.circuit_breaker, event).await.aggregated)
}

async fn handle_user_prompt_submit(
    store: &StateStore,
    config: &GuardrailsConfig,
    registry: &HooksRegistry,
    event: &HookEvent,
) -> Result<HookResponse> {
    let prompt = event.prompt.as_deref().unwrap_or("");
    let classification = classify(prompt, &config.classifier);
    if !is_confident(&classification, &config.classifier) {
        tracing::debug!(confidence = classification.confidence, "low-confidence classification");
    }

    Ok(dispatch(store, registry, &config.circuit_breaker, event).await.aggregated)
}

async fn handle_session_start(
    store: &StateStore,
    config: &GuardrailsConfig,
    registry: &HooksRegistry,
    event: &HookEvent,
) -> Result<HookResponse> {
    let cwd = event.cwd.clone().unwrap_or_else(|| ".".to_string());
    let injected = match KnowledgeDb::open(&store.knowledge_db_path()) {
        Ok(db) => inject_relevant(&db, std::path::Path::new(&cwd)).await.unwrap_or_default(),
        Err(error) => {
            tracing::warn!(%error, "knowledge database unavailable, skipping injection");
            String::new()
        }
    };

    let dispatched = dispatch(store, registry, &config.circuit_breaker, event).await.aggregated;

    let mut contexts = Vec::new();
    if !injected.is_empty() {
        contexts.push(injected);
    }
    if let Some(output) = &dispatched.hook_specific_output {
        if let Some(context) = &output.additional_context {
            contexts.push(context.clone());
        }
    }

    if contexts.is_empty() {
        return Ok(dispatched);
    }
    Ok(HookResponse {
        hook_specific_output: Some(HookSpecificOutput {
            hook_event_name: event.hook_event_name.as_str().to_string(),
            additional_context: Some(contexts.join("\n\n")),
            permission_decision: dispatched.hook_specific_output.and_then(|o| o.permission_decision),
            permission_decision_reason: None,
        }),
    })
}

async fn handle_session_end(
    store: &StateStore,
    config: &GuardrailsConfig,
    registry: &HooksRegistry,
    event: &HookEvent,
) -> Result<HookResponse> {
    let observations = load_unprocessed(
        store,
        &event.session_id,
        config.knowledge.max_observations_for_llm,
    )
    .unwrap_or_default();

    if observations.len() >= config.knowledge.min_observations_for_analysis {
        let chain = build_fallback_chain(&config.knowledge);
        let remote_deadline = Duration::from_secs(config.knowledge.remote_timeout_secs);
        let learnings = analyse_session(&observations, &chain, remote_deadline).await;

        if let Err(error) = stage_pending(store, &event.session_id, "session_end", learnings) {
            tracing::warn!(%error, "failed to stage pending learnings");
        } else {
            match KnowledgeDb::open(&store.knowledge_db_path()) {
                Ok(db) => {
                    if let Err(error) = commit_pending(
                        store,
                        &db,
                        &event.session_id,
                        config.knowledge.min_confidence,
                        config.knowledge.dedup_overlap_threshold,
                    )
                    .await
                    {
                        tracing::warn!(%error, "failed to commit pending learnings");
                    }
                }
                Err(error) => tracing::warn!(%error, "knowledge database unavailable, learnings stay pending"),
            }
        }

        if let Some(latest) = observations.iter().map(|record| record.timestamp).max() {
            if let Err(error) = mark_processed(store, &event.session_id, latest) {
                tracing::warn!(%error, "failed to mark observations processed");
            }
        }
    }

    Ok(dispatch(store, registry, &config.circuit_breaker, event).await.aggregated)
}

async fn handle_pre_compact(
    store: &StateStore,
    config: &GuardrailsConfig,
    registry: &HooksRegistry,
    event: &HookEvent,
) -> Result<HookResponse> {
    let dispatched = dispatch(store, registry, &config.circuit_breaker, event).await.aggregated;

    let Some(transcript_path) = event.transcript_path.as_deref() else {
        return Ok(dispatched);
    };

    let records = match parse_transcript(std::path::Path::new(transcript_path)) {
        Ok(records) => records,
        Err(error) => {
            tracing::warn!(%error, "failed to parse transcript for compaction, passing through handler response");
            return Ok(dispatched);
        }
    };

    let mut registry_entries = build_task_registry(&records);
    let turn_index = build_task_turn_index(&records);
    annotate_task_turns(&mut registry_entries, &turn_index);
    let current_turn = records.len().saturating_sub(1);

    // G.1: periodic, throttled cold-task detection, gated on context fill. The
    // throttle and threshold only decide whether *new* evidence gets extracted
    // this round; summaries already persisted from an earlier PreCompact still
    // feed G.2 below regardless, so the preservation block never goes stale just
    // because this round's check was skipped.
    let progress_path = store.session_progress_path(&event.session_id);
    let check_due = with_locked_file(&progress_path, |progress: &mut SessionCompactionProgress| {
        let due = progress.due(current_turn, config.compaction.check_frequency_turns);
        if due {
            progress.last_check_turn = Some(current_turn);
        }
        due
    })
    .unwrap_or(false);

    let fill_fraction = estimate_fill_fraction(&records, &config.compaction);
    let may_extract = check_due && fill_fraction >= config.compaction.compaction_threshold;
    tracing::info!(fill_fraction, check_due, may_extract, "context fill at PreCompact");

    let cold_tasks = detect_cold_tasks(&registry_entries, &turn_index, current_turn, &config.compaction);

    let mut files_modified = Vec::new();
    let mut test_commands = Vec::new();
    let mut key_decisions = Vec::new();
    let mut error_snippets = Vec::new();
    let mut cold_task_summaries = Vec::new();

    for (task_id, entry) in &cold_tasks {
        let summary_path = store.cold_task_summary_path(&event.session_id, task_id);
        let existing = read_json::<ColdTaskSummary>(&summary_path).ok().flatten();

        // Dedup by (session-id, task-id): a summary already on disk is reused
        // verbatim, never re-extracted.
        let summary = match existing {
            Some(summary) => Some(summary),
            None if may_extract => {
                let Some(&(start, end)) = turn_index.get(task_id.as_str()) else { continue };
                let range = &records[start..=end.min(records.len().saturating_sub(1))];
                let fresh = extract_cold_task_evidence(&event.session_id, task_id, &entry.subject, range);
                if let Err(error) = write_json(&summary_path, &fresh) {
                    tracing::warn!(%error, %task_id, "failed to persist cold-task summary");
                }
                Some(fresh)
            }
            None => None,
        };

        let Some(summary) = summary else { continue };

        for file in &summary.files_modified {
            if !files_modified.contains(file) {
                files_modified.push(file.clone());
            }
        }
        for command in &summary.commands_run {
            if !test_commands.contains(command) {
                test_commands.push(command.clone());
            }
        }
        key_decisions.extend(summary.key_outcomes.clone());
        for error in &summary.errors_resolved {
            error_snippets.push((summary.subject.clone(), error.clone()));
        }
        cold_task_summaries.push(summary);
    }

    let diff_stat = match event.cwd.as_deref() {
        Some(cwd) => git_diff_stat(cwd).await,
        None => None,
    };

    let inputs = PreservationInputs {
        files_modified,
        test_commands,
        key_decisions,
        error_snippets,
        git_diff_stat: diff_stat,
        cold_task_summaries,
    };
    let block = assemble_preservation_block(&registry_entries, &inputs);

    let mut contexts = vec![block];
    if let Some(output) = &dispatched.hook_specific_output {
        if let Some(context) = &output.additional_context {
            contexts.push(context.clone());
        }
    }

    Ok(HookResponse {
        hook_specific_output: Some(HookSpecificOutput {
            hook_event_name: event.hook_event_name.as_str().to_string(),
            additional_context: Some(contexts.join("\n\n")),
            permission_decision: dispatched.hook_specific_output.and_then(|o| o.permission_decision),
            permission_decision_reason: None,
        }),
    })
}
