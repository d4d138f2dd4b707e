//! Plan lifecycle orchestration.
//!
//! [`Workflow`] composes the planner, generator, plan store, patch applier and
//! sandbox into the operations exposed by the CLI. State moves through
//! `planned -> implemented -> verifying -> passed | failed`, and a failed
//! verification may loop back to `implemented` while the round budget lasts.

use chrono::Utc;
use patchloop_config::Config;
use patchloop_llm::{Generator, LlmPlanner, Planner, context_from_config, generator_from_config};
use patchloop_lock::PlanLock;
use patchloop_patch_model::{Patch, parse};
use patchloop_runner::{NativeRunner, ProcessRunner};
use patchloop_store::{
    CommitRecord, CommitScope, ImplementationAttempt, PlanRecord, PlanStore, PlanSummary,
    Rejection, VerificationAttempt,
};
use patchloop_utils::PatchloopError;
use patchloop_utils::logging::{
    log_operation_complete, log_operation_error, log_operation_start, operation_span,
};
use patchloop_utils::types::{
    PlanDocument, PlanId, PlanStatus, SandboxResult, TestOutcome, VerificationStatus,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::apply::PatchApplier;
use crate::git::Git;
use crate::implementer::Implementer;
use crate::sandbox::{SandboxExecutor, SandboxRequest, run_test_command};
use crate::verifier::{build_feedback, round_summary};

/// Result of [`Workflow::create_plan`].
#[derive(Debug, Clone, Serialize)]
pub struct CreatePlanOutcome {
    pub plan_id: PlanId,
    pub plan: PlanDocument,
    /// First implementation attempt, when one was generated and valid
    pub preview_patch: Option<String>,
}

/// Result of [`Workflow::implement`].
#[derive(Debug, Clone, Serialize)]
pub struct ImplementOutcome {
    pub plan_id: PlanId,
    /// 1-based attempt number
    pub attempt: usize,
    pub files: Vec<String>,
    pub patch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HunkInfo {
    pub index: usize,
    pub header: String,
    pub text: String,
    pub added: usize,
    pub removed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileHunks {
    pub file: String,
    pub hunks: Vec<HunkInfo>,
}

/// Result of the `apply_*` operations.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyOutcome {
    pub plan_id: PlanId,
    pub scope: CommitScope,
    pub commit: String,
    pub tests: TestOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyOutcome {
    pub plan_id: PlanId,
    pub status: VerificationStatus,
    /// Rounds run by this call only
    pub attempts: Vec<VerificationAttempt>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RevertOutcome {
    pub reverted: String,
    pub new_commit: String,
}

pub struct Workflow {
    config: Config,
    store: PlanStore,
    planner: Box<dyn Planner>,
    generator: Arc<dyn Generator>,
    runner: Arc<dyn ProcessRunner>,
}

impl Workflow {
    pub fn new(
        config: Config,
        planner: Box<dyn Planner>,
        generator: Arc<dyn Generator>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        let store = PlanStore::new(config.state_dir());
        Self {
            config,
            store,
            planner,
            generator,
            runner,
        }
    }

    /// Wire the configured LLM backend and the native process runner.
    pub fn from_config(config: Config) -> Result<Self, PatchloopError> {
        let generator: Arc<dyn Generator> = Arc::from(generator_from_config(&config)?);
        let planner =
            LlmPlanner::new(Arc::clone(&generator)).with_context(context_from_config(&config));
        Ok(Self::new(
            config,
            Box::new(planner),
            generator,
            Arc::new(NativeRunner::new()),
        ))
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &PlanStore {
        &self.store
    }

    // ------------------------------------------------------------------
    // Planning and implementation
    // ------------------------------------------------------------------

    /// Turn a request into a stored plan, optionally with a first patch.
    ///
    /// A preview patch that fails validation leaves the plan created with no
    /// preview. Backend failures while generating the preview are returned.
    pub fn create_plan(&self, request: &str) -> Result<CreatePlanOutcome, PatchloopError> {
        let request = request.trim();
        if request.is_empty() {
            return Err(PatchloopError::InvalidArgument {
                name: "request".to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        let output = self.planner.create_plan(request)?;
        let plan_id = PlanId::generate();
        let mut record = PlanRecord::new(plan_id.clone(), request, output.plan);
        record.context = output.context;
        record.raw_plan = output.raw_plan;

        instrumented(plan_id.as_str(), "create_plan", || {
            self.store.create(&record)?;
            info!(plan_id = %plan_id, files = record.plan.files.len(), "Plan created");

            let mut preview_patch = None;
            if self.config.workflow.implement_on_create {
                let _lock = self.lock(&plan_id)?;
                match self.implement_locked(&mut record, None) {
                    Ok(outcome) => preview_patch = Some(outcome.patch),
                    Err(PatchloopError::PatchValidation(e)) => {
                        warn!(plan_id = %plan_id, error = %e, "Preview patch rejected");
                    }
                    Err(e) => return Err(e),
                }
            }

            Ok(CreatePlanOutcome {
                plan_id: plan_id.clone(),
                plan: record.plan.clone(),
                preview_patch,
            })
        })
    }

    /// Generate, validate and store a new implementation attempt.
    pub fn implement(
        &self,
        plan_id: &PlanId,
        feedback: Option<&str>,
    ) -> Result<ImplementOutcome, PatchloopError> {
        instrumented(plan_id.as_str(), "implement", || {
            let _lock = self.lock(plan_id)?;
            let mut record = self.store.load(plan_id)?;
            self.implement_locked(&mut record, feedback)
        })
    }

    fn implement_locked(
        &self,
        record: &mut PlanRecord,
        feedback: Option<&str>,
    ) -> Result<ImplementOutcome, PatchloopError> {
        let generated = Implementer::new(self.generator.as_ref()).generate(
            &record.plan,
            &record.context,
            record.implementation.final_patch.as_deref(),
            feedback,
        )?;

        match generated.outcome {
            Ok(validated) => {
                record.implementation.attempts.push(ImplementationAttempt {
                    timestamp: Utc::now(),
                    raw_response: generated.raw_response,
                    files: validated.files.clone(),
                    patch: validated.patch.clone(),
                    feedback: feedback.map(str::to_string),
                });
                record.implementation.final_patch = Some(validated.patch.clone());
                record.status = PlanStatus::Implemented;
                self.store.save(record)?;

                let attempt = record.implementation.attempts.len();
                info!(
                    plan_id = %record.plan_id,
                    attempt,
                    files = ?validated.files,
                    "Stored implementation attempt"
                );
                Ok(ImplementOutcome {
                    plan_id: record.plan_id.clone(),
                    attempt,
                    files: validated.files,
                    patch: validated.patch,
                })
            }
            Err(error) => {
                record.implementation.rejections.push(Rejection {
                    timestamp: Utc::now(),
                    error: error.to_string(),
                    feedback: feedback.map(str::to_string),
                });
                self.store.save(record)?;
                warn!(plan_id = %record.plan_id, error = %error, "Generated patch rejected");
                Err(error.into())
            }
        }
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn load_plan(&self, plan_id: &PlanId) -> Result<PlanRecord, PatchloopError> {
        Ok(self.store.load(plan_id)?)
    }

    pub fn list_plans(&self) -> Result<Vec<PlanSummary>, PatchloopError> {
        Ok(self.store.list()?)
    }

    /// Hunks of the current patch, indexed per file from 0.
    pub fn get_hunks(&self, plan_id: &PlanId) -> Result<Vec<FileHunks>, PatchloopError> {
        let record = self.store.load(plan_id)?;
        let patch = parse(required_patch(&record)?);
        Ok(patch
            .files
            .iter()
            .map(|file| FileHunks {
                file: file.path.clone(),
                hunks: file
                    .hunks
                    .iter()
                    .enumerate()
                    .map(|(index, hunk)| HunkInfo {
                        index,
                        header: hunk.header(),
                        text: hunk.to_text(),
                        added: hunk.added(),
                        removed: hunk.removed(),
                    })
                    .collect(),
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Applying to the working tree
    // ------------------------------------------------------------------

    pub fn apply_all(&self, plan_id: &PlanId) -> Result<ApplyOutcome, PatchloopError> {
        instrumented(plan_id.as_str(), "apply_all", || {
            self.apply_selected(plan_id, CommitScope::All, |text| Ok(text.to_string()))
        })
    }

    pub fn apply_files<S: AsRef<str>>(
        &self,
        plan_id: &PlanId,
        files: &[S],
    ) -> Result<ApplyOutcome, PatchloopError> {
        instrumented(plan_id.as_str(), "apply_files", || {
            self.apply_selected(plan_id, CommitScope::Files, |text| {
                let selected = parse(text).select_files(files);
                non_empty(selected, "none of the requested files are in the patch")
            })
        })
    }

    /// Apply the chosen hunk indices (0-based, per file).
    pub fn apply_hunks(
        &self,
        plan_id: &PlanId,
        selection: &BTreeMap<String, Vec<usize>>,
    ) -> Result<ApplyOutcome, PatchloopError> {
        instrumented(plan_id.as_str(), "apply_hunks", || {
            self.apply_selected(plan_id, CommitScope::Hunks, |text| {
                let selected = parse(text).select_hunks(selection);
                non_empty(selected, "no requested hunk exists in the patch")
            })
        })
    }

    fn apply_selected(
        &self,
        plan_id: &PlanId,
        scope: CommitScope,
        select: impl FnOnce(&str) -> Result<String, PatchloopError>,
    ) -> Result<ApplyOutcome, PatchloopError> {
        let _lock = self.lock(plan_id)?;
        let mut record = self.store.load(plan_id)?;
        let patch_text = select(required_patch(&record)?)?;

        let git = self.repo_git()?;
        git.ensure_clean()?;

        let report = PatchApplier::new(self.runner.as_ref()).apply(&patch_text, git.dir())?;
        if !report.ok {
            if let Err(e) = git.discard_changes() {
                warn!(plan_id = %plan_id, error = %e, "Rollback after failed apply was incomplete");
            }
            return Err(PatchloopError::ApplyFailure {
                report: Box::new(report),
            });
        }

        let message = match scope {
            CommitScope::Files => format!("{} (partial)", self.config.git.commit_message),
            CommitScope::Hunks => format!("{} (hunks)", self.config.git.commit_message),
            CommitScope::All | CommitScope::Revert => self.config.git.commit_message.clone(),
        };
        let commit = git
            .run(&["add", "-A"])
            .and_then(|_| {
                git.commit_as(
                    &self.config.git.author_name,
                    &self.config.git.author_email,
                    &message,
                )
            });
        let commit = match commit {
            Ok(sha) => sha,
            Err(e) => {
                if let Err(rollback) = git.discard_changes() {
                    warn!(plan_id = %plan_id, error = %rollback, "Rollback after failed commit was incomplete");
                }
                return Err(e);
            }
        };
        info!(plan_id = %plan_id, scope = %scope, commit = %commit, "Committed plan changes");

        let tests = run_test_command(
            self.runner.as_ref(),
            &self.config.tests.command,
            git.dir(),
            self.config.test_timeout(),
        );
        debug!(plan_id = %plan_id, tests = %tests.summary(), "Post-apply tests finished");

        record.commits.push(CommitRecord {
            sha: commit.clone(),
            scope,
            timestamp: Utc::now(),
        });
        self.store.save(&record)?;

        Ok(ApplyOutcome {
            plan_id: plan_id.clone(),
            scope,
            commit,
            tests,
        })
    }

    /// Undo a commit with a new revert commit.
    pub fn revert(&self, commit: &str) -> Result<RevertOutcome, PatchloopError> {
        let commit = commit.trim();
        if commit.is_empty() || commit.starts_with('-') || commit.contains(char::is_whitespace) {
            return Err(PatchloopError::InvalidArgument {
                name: "commit".to_string(),
                reason: format!("'{commit}' is not a commit reference"),
            });
        }

        instrumented(commit, "revert", || {
            let git = self.repo_git()?;
            git.ensure_clean()?;
            let target = git.run(&["rev-parse", "--verify", "-q", &format!("{commit}^{{commit}}")])?;

            if let Err(e) = git.run(&["revert", "--no-commit", &target]) {
                git.run_logged(&["revert", "--abort"]);
                return Err(e);
            }
            git.run(&["add", "-A"])?;
            let new_commit = git.commit_as(
                &self.config.git.author_name,
                &self.config.git.author_email,
                &format!("revert(agent): {target}"),
            )?;
            info!(reverted = %target, new_commit = %new_commit, "Reverted commit");

            self.record_revert(&target, &new_commit);
            Ok(RevertOutcome {
                reverted: target,
                new_commit,
            })
        })
    }

    /// Attach a revert commit to the plan that created `reverted`, if any.
    fn record_revert(&self, reverted: &str, new_commit: &str) {
        let summaries = match self.store.list() {
            Ok(summaries) => summaries,
            Err(e) => {
                warn!(error = %e, "Could not list plans to record revert");
                return;
            }
        };
        for summary in summaries {
            let Ok(mut record) = self.store.load(&summary.plan_id) else {
                continue;
            };
            if !record.commits.iter().any(|c| c.sha == reverted) {
                continue;
            }
            let saved = self.lock(&record.plan_id).and_then(|_lock| {
                record.commits.push(CommitRecord {
                    sha: new_commit.to_string(),
                    scope: CommitScope::Revert,
                    timestamp: Utc::now(),
                });
                Ok(self.store.save(&record)?)
            });
            if let Err(e) = saved {
                warn!(plan_id = %record.plan_id, error = %e, "Could not record revert on plan");
            }
            return;
        }
    }

    // ------------------------------------------------------------------
    // Sandbox and verification
    // ------------------------------------------------------------------

    /// One sandbox run of the current patch. Nothing is committed or stored.
    pub fn sandbox_test(&self, plan_id: &PlanId) -> Result<SandboxResult, PatchloopError> {
        instrumented(plan_id.as_str(), "sandbox_test", || {
            let _lock = self.lock(plan_id)?;
            let record = self.store.load(plan_id)?;
            let patch = required_patch(&record)?;
            self.run_sandbox(plan_id, patch)
        })
    }

    /// Sandbox the current patch, feeding failures back to the generator.
    ///
    /// `auto_fix` and `max_rounds` fall back to the configured values.
    pub fn verify(
        &self,
        plan_id: &PlanId,
        auto_fix: Option<bool>,
        max_rounds: Option<u32>,
    ) -> Result<VerifyOutcome, PatchloopError> {
        let auto_fix = auto_fix.unwrap_or(self.config.workflow.auto_fix);
        let max_rounds = max_rounds.unwrap_or(self.config.workflow.max_rounds);
        if max_rounds == 0 {
            return Err(PatchloopError::InvalidArgument {
                name: "max_rounds".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        instrumented(plan_id.as_str(), "verify", || {
            let _lock = self.lock(plan_id)?;
            let mut record = self.store.load(plan_id)?;
            required_patch(&record)?;

            let mut attempts = Vec::new();
            let result = self.verify_rounds(&mut record, auto_fix, max_rounds, &mut attempts);

            let passed = attempts
                .last()
                .is_some_and(|a: &VerificationAttempt| a.status == VerificationStatus::Passed);
            if !attempts.is_empty() {
                let status = if passed {
                    VerificationStatus::Passed
                } else {
                    VerificationStatus::Failed
                };
                record.verification.status = status;
                record.status = if passed {
                    PlanStatus::Passed
                } else {
                    PlanStatus::Failed
                };
                self.store.save(&record)?;
            }
            result?;

            info!(
                plan_id = %plan_id,
                rounds = attempts.len(),
                passed,
                "Verification finished"
            );
            Ok(VerifyOutcome {
                plan_id: plan_id.clone(),
                status: record.verification.status,
                attempts,
            })
        })
    }

    fn verify_rounds(
        &self,
        record: &mut PlanRecord,
        auto_fix: bool,
        max_rounds: u32,
        attempts: &mut Vec<VerificationAttempt>,
    ) -> Result<(), PatchloopError> {
        let plan_id = record.plan_id.clone();

        for round_in_call in 1..=max_rounds {
            let patch = required_patch(record)?.to_string();
            let result = self.run_sandbox(&plan_id, &patch)?;

            let summary = round_summary(&result);
            let passed = result.passed();
            let attempt = VerificationAttempt {
                round: record.next_round(),
                timestamp: Utc::now(),
                status: if passed {
                    VerificationStatus::Passed
                } else {
                    VerificationStatus::Failed
                },
                summary: summary.clone(),
                details: result,
            };
            info!(plan_id = %plan_id, round = attempt.round, passed, summary = %summary, "Verification round");

            record.verification.attempts.push(attempt.clone());
            record.verification.status = attempt.status;
            record.status = PlanStatus::Verifying;
            self.store.save(record)?;
            attempts.push(attempt.clone());

            if passed || !auto_fix || round_in_call == max_rounds {
                break;
            }
            let Some(feedback) = build_feedback(&attempt.details, &summary) else {
                debug!(plan_id = %plan_id, "No feedback to act on, stopping");
                break;
            };

            match self.implement_locked(record, Some(&feedback)) {
                Ok(outcome) => {
                    debug!(plan_id = %plan_id, attempt = outcome.attempt, "Auto-fix produced a new patch");
                }
                Err(PatchloopError::PatchValidation(e)) => {
                    warn!(plan_id = %plan_id, error = %e, "Auto-fix patch rejected, stopping");
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn run_sandbox(&self, plan_id: &PlanId, patch: &str) -> Result<SandboxResult, PatchloopError> {
        let request = SandboxRequest::from_config(&self.config, plan_id.as_str(), patch);
        SandboxExecutor::new(self.runner.as_ref()).run(&request)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn lock(&self, plan_id: &PlanId) -> Result<PlanLock, PatchloopError> {
        Ok(PlanLock::acquire(
            &self.config.locks_dir(),
            plan_id.as_str(),
            Some(self.config.workflow.lock_ttl_seconds),
        )?)
    }

    fn repo_git(&self) -> Result<Git<'_>, PatchloopError> {
        let git = Git::new(self.runner.as_ref(), self.config.repo_root.as_std_path());
        if !git.is_work_tree() {
            return Err(PatchloopError::NotARepository {
                path: self.config.repo_root.to_string(),
            });
        }
        Ok(git)
    }
}

fn required_patch(record: &PlanRecord) -> Result<&str, PatchloopError> {
    record
        .implementation
        .final_patch
        .as_deref()
        .ok_or_else(|| PatchloopError::MissingPatch {
            plan_id: record.plan_id.to_string(),
        })
}

fn non_empty(patch: Patch, reason: &str) -> Result<String, PatchloopError> {
    if patch.is_empty() {
        return Err(PatchloopError::EmptySelection {
            reason: reason.to_string(),
        });
    }
    Ok(patch.to_text())
}

/// Run `f` inside an operation span with start/complete/error events.
fn instrumented<T>(
    plan_id: &str,
    operation: &str,
    f: impl FnOnce() -> Result<T, PatchloopError>,
) -> Result<T, PatchloopError> {
    let span = operation_span(plan_id, operation);
    let _entered = span.enter();
    log_operation_start(plan_id, operation);
    let started = Instant::now();

    let result = f();
    let elapsed = started.elapsed().as_millis();
    match &result {
        Ok(_) => log_operation_complete(plan_id, operation, elapsed),
        Err(e) => log_operation_error(plan_id, operation, &e.to_string(), elapsed),
    }
    result
}
