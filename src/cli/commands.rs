//! Command implementations.
//!
//! Each command prints either a human summary or, with `--json`, one pretty
//! JSON document on stdout, and returns the exit code to use on success.

use anyhow::{Context, Result};
use patchloop_config::Config;
use patchloop_engine::Workflow;
use patchloop_store::PlanRecord;
use patchloop_utils::types::{
    CheckStatus, PlanDocument, PlanId, SandboxResult, TestOutcome, VerificationStatus,
};
use patchloop_utils::{ExitCode, PatchloopError};
use serde::Serialize;
use std::io::Read;

use super::args::{HunkSpec, hunk_selection};

/// Output mode shared by every command
pub struct Output {
    json: bool,
}

impl Output {
    #[must_use]
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    /// Print `value` as JSON, or run `human` to print it for people.
    fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce(&T)) -> Result<()> {
        if self.json {
            let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
            println!("{json}");
        } else {
            human(value);
        }
        Ok(())
    }
}

fn parse_plan_id(raw: &str) -> Result<PlanId, PatchloopError> {
    Ok(PlanId::parse(raw)?)
}

pub fn plan(workflow: &Workflow, request: &str, out: &Output) -> Result<ExitCode> {
    let request = if request == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read request from stdin")?;
        buf
    } else {
        request.to_string()
    };

    let created = workflow.create_plan(&request)?;
    out.emit(&created, |created| {
        println!("✓ Created plan {}", created.plan_id);
        print_plan(&created.plan);
        match &created.preview_patch {
            Some(patch) => {
                println!("\nPreview patch:\n{patch}");
                println!("Next steps:");
                println!("  - Try it in a sandbox: patchloop verify {}", created.plan_id);
                println!("  - Apply it directly:   patchloop apply {}", created.plan_id);
            }
            None => {
                println!("\nNo preview patch.");
                println!("Next steps:");
                println!("  - Generate one: patchloop implement {}", created.plan_id);
            }
        }
    })?;
    Ok(ExitCode::SUCCESS)
}

pub fn implement(
    workflow: &Workflow,
    id: &str,
    feedback: Option<&str>,
    out: &Output,
) -> Result<ExitCode> {
    let plan_id = parse_plan_id(id)?;
    let outcome = workflow.implement(&plan_id, feedback)?;
    out.emit(&outcome, |outcome| {
        println!(
            "✓ Attempt {} for {} touches {}",
            outcome.attempt,
            outcome.plan_id,
            outcome.files.join(", ")
        );
        println!("\n{}", outcome.patch);
    })?;
    Ok(ExitCode::SUCCESS)
}

pub fn hunks(workflow: &Workflow, id: &str, out: &Output) -> Result<ExitCode> {
    let plan_id = parse_plan_id(id)?;
    let files = workflow.get_hunks(&plan_id)?;
    out.emit(&files, |files| {
        for file in files {
            println!("{}", file.file);
            for hunk in &file.hunks {
                println!(
                    "  [{}] {} (+{} -{})",
                    hunk.index, hunk.header, hunk.added, hunk.removed
                );
            }
        }
    })?;
    Ok(ExitCode::SUCCESS)
}

pub fn apply(
    workflow: &Workflow,
    id: &str,
    files: &[String],
    hunks: &[HunkSpec],
    out: &Output,
) -> Result<ExitCode> {
    let plan_id = parse_plan_id(id)?;
    let outcome = if !hunks.is_empty() {
        workflow.apply_hunks(&plan_id, &hunk_selection(hunks))?
    } else if !files.is_empty() {
        workflow.apply_files(&plan_id, files)?
    } else {
        workflow.apply_all(&plan_id)?
    };

    out.emit(&outcome, |outcome| {
        println!("✓ Committed {} ({})", outcome.commit, outcome.scope);
        println!("  {}", test_line(&outcome.tests));
        println!("\n  Undo with: patchloop revert {}", outcome.commit);
    })?;
    Ok(ExitCode::SUCCESS)
}

pub fn sandbox(workflow: &Workflow, id: &str, out: &Output) -> Result<ExitCode> {
    let plan_id = parse_plan_id(id)?;
    let result = workflow.sandbox_test(&plan_id)?;
    out.emit(&result, print_sandbox_result)?;
    Ok(if result.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::VERIFICATION_FAILED
    })
}

pub fn verify(
    workflow: &Workflow,
    id: &str,
    auto_fix: Option<bool>,
    max_rounds: Option<u32>,
    out: &Output,
) -> Result<ExitCode> {
    let plan_id = parse_plan_id(id)?;
    let outcome = workflow.verify(&plan_id, auto_fix, max_rounds)?;
    out.emit(&outcome, |outcome| {
        for attempt in &outcome.attempts {
            let mark = if attempt.status == VerificationStatus::Passed {
                "✓"
            } else {
                "✗"
            };
            println!("{mark} Round {}: {}", attempt.round, attempt.summary);
        }
        println!("\nVerification {} for {}", outcome.status, outcome.plan_id);
        if outcome.status == VerificationStatus::Passed {
            println!("  Apply it with: patchloop apply {}", outcome.plan_id);
        }
    })?;
    Ok(if outcome.status == VerificationStatus::Passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::VERIFICATION_FAILED
    })
}

pub fn revert(workflow: &Workflow, sha: &str, out: &Output) -> Result<ExitCode> {
    let outcome = workflow.revert(sha)?;
    out.emit(&outcome, |outcome| {
        println!("✓ Reverted {} with {}", outcome.reverted, outcome.new_commit);
    })?;
    Ok(ExitCode::SUCCESS)
}

pub fn show(workflow: &Workflow, id: &str, out: &Output) -> Result<ExitCode> {
    let plan_id = parse_plan_id(id)?;
    let record = workflow.load_plan(&plan_id)?;
    out.emit(&record, print_record)?;
    Ok(ExitCode::SUCCESS)
}

pub fn list(workflow: &Workflow, out: &Output) -> Result<ExitCode> {
    let plans = workflow.list_plans()?;
    out.emit(&plans, |plans| {
        if plans.is_empty() {
            println!("No plans yet. Create one with: patchloop plan \"<request>\"");
            return;
        }
        for plan in plans {
            println!(
                "{}  {:<11}  {} attempt(s), {} round(s)  {}",
                plan.plan_id,
                plan.status.to_string(),
                plan.attempts,
                plan.rounds,
                first_line(&plan.request)
            );
        }
    })?;
    Ok(ExitCode::SUCCESS)
}

pub fn show_config(config: &Config, out: &Output) -> Result<ExitCode> {
    let effective = config.effective_config();
    out.emit(&effective, |effective| {
        println!("Repository: {}", config.repo_root);
        match &config.config_path {
            Some(path) => println!("Config file: {path}"),
            None => println!("Config file: (none, using defaults)"),
        }
        println!();
        for (key, (value, source)) in effective {
            println!("  {key} = {value}  [{source}]");
        }
    })?;
    Ok(ExitCode::SUCCESS)
}

fn print_plan(plan: &PlanDocument) {
    println!("\nObjective: {}", plan.objective);
    if !plan.rationale.is_empty() {
        println!("Rationale: {}", plan.rationale);
    }
    if !plan.files.is_empty() {
        println!("Files:");
        for file in &plan.files {
            println!("  - {}: {}", file.path, file.reason);
        }
    }
    if !plan.steps.is_empty() {
        println!("Steps:");
        for step in &plan.steps {
            println!("  {}. {}", step.id, step.description);
        }
    }
}

fn print_record(record: &PlanRecord) {
    println!("Plan {} [{}]", record.plan_id, record.status);
    println!("Request: {}", record.request);
    println!("Created: {}", record.created_at.to_rfc3339());
    print_plan(&record.plan);
    println!(
        "\nImplementation: {} attempt(s), {} rejection(s)",
        record.implementation.attempts.len(),
        record.implementation.rejections.len()
    );
    println!(
        "Verification: {} ({} round(s))",
        record.verification.status,
        record.verification.attempts.len()
    );
    for attempt in &record.verification.attempts {
        println!("  Round {}: {} {}", attempt.round, attempt.status, attempt.summary);
    }
    for commit in &record.commits {
        println!("Commit {} ({})", commit.sha, commit.scope);
    }
    if let Some(patch) = &record.implementation.final_patch {
        println!("\nCurrent patch:\n{patch}");
    }
}

fn print_sandbox_result(result: &SandboxResult) {
    println!("Sandbox mode: {}", result.mode);
    if let Some(error) = &result.error {
        println!("✗ Sandbox error: {error}");
    }
    match &result.apply {
        Some(report) if report.ok => println!(
            "✓ Patch applied ({})",
            report.strategy.as_deref().unwrap_or("unknown strategy")
        ),
        Some(report) => {
            println!("✗ Patch did not apply after {} attempt(s)", report.attempts.len());
            if let Some(stderr) = report.last_stderr() {
                println!("  {}", stderr.trim());
            }
        }
        None => {}
    }
    if let Some(tests) = &result.tests {
        println!("{}", test_line(tests));
    }
    for check in &result.extra_checks {
        let mark = if check.status == CheckStatus::Passed {
            "✓"
        } else {
            "✗"
        };
        println!("{mark} check {}: {}", check.name, check.status);
    }
}

fn test_line(tests: &TestOutcome) -> String {
    let mark = if tests.passed() { "✓" } else { "✗" };
    format!("{mark} {}", tests.summary())
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}
