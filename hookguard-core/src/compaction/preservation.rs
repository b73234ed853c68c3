use super::cold_task::ColdTaskSummary;
use crate::transcript::TaskRegistry;
use std::fmt::Write as _;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct PreservationInputs {
    pub files_modified: Vec<String>,
    pub test_commands: Vec<String>,
    pub key_decisions: Vec<String>,
    pub error_snippets: Vec<(String, String)>,
    pub git_diff_stat: Option<String>,
    pub cold_task_summaries: Vec<ColdTaskSummary>,
}

/// Assembles the "COMPACTION PRESERVATION INSTRUCTIONS" block emitted as
/// `additionalContext` on PreCompact (§4.G.2).
pub fn assemble_preservation_block(registry: &TaskRegistry, inputs: &PreservationInputs) -> String {
    let mut block = String::new();
    let _ = writeln!(block, "COMPACTION PRESERVATION INSTRUCTIONS");
    let _ = writeln!(block);

    let _ = writeln!(block, "## Active tasks");
    for (_, entry) in registry.active() {
        let _ = writeln!(block, "- {}", entry.subject);
    }
    let _ = writeln!(block);

    let _ = writeln!(block, "## Files modified");
    for file in inputs.files_modified.iter().take(20) {
        let _ = writeln!(block, "- {file}");
    }
    let _ = writeln!(block);

    let _ = writeln!(block, "## Test commands run");
    for command in inputs.test_commands.iter().take(5) {
        let _ = writeln!(block, "- {command}");
    }
    let _ = writeln!(block);

    let _ = writeln!(block, "## Key decisions");
    for decision in inputs.key_decisions.iter().take(15) {
        let _ = writeln!(block, "- {decision}");
    }
    let _ = writeln!(block);

    let _ = writeln!(block, "## Recent errors");
    for (command, first_error_line) in inputs.error_snippets.iter().take(8) {
        let _ = writeln!(block, "- `{command}`: {first_error_line}");
    }
    let _ = writeln!(block);

    if let Some(stat) = &inputs.git_diff_stat {
        let _ = writeln!(block, "## git diff --stat");
        let _ = writeln!(block, "{stat}");
        let _ = writeln!(block);
    }

    let _ = writeln!(block, "## PRE-COMPUTED TASK SUMMARIES");
    let _ = writeln!(block, "(emitted verbatim; do not re-summarise)");
    for summary in &inputs.cold_task_summaries {
        let _ = writeln!(block, "### {}", summary.subject);
        if !summary.files_modified.is_empty() {
            let _ = writeln!(block, "files: {}", summary.files_modified.join(", "));
        }
        if !summary.commands_run.is_empty() {
            let _ = writeln!(block, "commands: {}", summary.commands_run.join(", "));
        }
        for outcome in &summary.key_outcomes {
            let _ = writeln!(block, "- {outcome}");
        }
    }

    block
}

/// Runs `git diff --stat`, best effort: a 5 s timeout, falling back to the staged
/// diff, and swallowing any failure entirely (returns `None`).
pub async fn git_diff_stat(cwd: &str) -> Option<String> {
    let run = |args: &'static [&'static str]| {
        tokio::process::Command::new("git")
            .args(args)
            .current_dir(cwd)
            .output()
    };

    let timeout = Duration::from_secs(5);
    if let Ok(Ok(output)) = tokio::time::timeout(timeout, run(&["diff", "--stat"])).await {
        if output.status.success() && !output.stdout.is_empty() {
            return Some(String::from_utf8_lossy(&output.stdout).to_string());
        }
    }
    if let Ok(Ok(output)) = tokio::time::timeout(timeout, run(&["diff", "--stat", "--cached"])).await {
        if output.status.success() && !output.stdout.is_empty() {
            return Some(String::from_utf8_lossy(&output.stdout).to_string());
        }
    }
    None
}
