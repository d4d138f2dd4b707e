//! Layered patch application.
//!
//! A patch is applied with `git apply` through an ordered chain of named
//! strategies. Each strategy reports [`StrategyOutcome`]; the chain stops at
//! the first `Success` or at a `Fatal` outcome. Every git invocation is kept
//! in the returned [`ApplyReport`] so callers can explain a failure.

use patchloop_patch_model::{Patch, UNKNOWN_PATH, parse};
use patchloop_runner::ProcessRunner;
use patchloop_utils::PatchloopError;
use patchloop_utils::types::{ApplyAttempt, ApplyReport, RejectFragment};
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::git::Git;

pub const WHITESPACE_FIX: &str = "whitespace-fix";
pub const CREATE_MISSING: &str = "create-missing";
pub const RESERIALIZE: &str = "reserialize";
pub const REJECT: &str = "reject";

/// git diagnostics that mean a target file is absent
const MISSING_TARGET_MARKERS: &[&str] = &["No such file or directory", "does not exist"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyOutcome {
    /// The patch is applied; stop here
    Success,
    /// Not applied; the next strategy may still work
    Retryable,
    /// Not applied and nothing later can help
    Fatal,
}

/// Mutable state shared by the strategies of one application.
pub(crate) struct ApplyContext<'r> {
    git: Git<'r>,
    scratch: PathBuf,
    patch: Patch,
    attempts: Vec<ApplyAttempt>,
    rejected: Vec<RejectFragment>,
}

impl ApplyContext<'_> {
    /// Run `git apply <extra...> <scratch>` and record it.
    fn git_apply(&mut self, strategy: &str, extra: &[&str]) -> StrategyOutcome {
        let spec = self
            .git
            .command()
            .arg("apply")
            .args(extra.iter().copied())
            .arg(&self.scratch);
        let args = spec.args_lossy();

        match self.git.exec(&spec) {
            Ok(out) => {
                let ok = out.success();
                self.attempts.push(ApplyAttempt {
                    strategy: strategy.to_string(),
                    args,
                    exit_code: out.exit_code,
                    stdout: out.stdout_string(),
                    stderr: out.stderr_string(),
                });
                if ok {
                    StrategyOutcome::Success
                } else {
                    StrategyOutcome::Retryable
                }
            }
            Err(e) => {
                self.attempts.push(ApplyAttempt {
                    strategy: strategy.to_string(),
                    args,
                    exit_code: None,
                    stdout: String::new(),
                    stderr: e.to_string(),
                });
                StrategyOutcome::Fatal
            }
        }
    }

    fn last_stderr(&self) -> &str {
        self.attempts.last().map_or("", |a| a.stderr.as_str())
    }

    fn work_dir(&self) -> &Path {
        self.git.dir()
    }
}

pub(crate) trait ApplyStrategy {
    fn name(&self) -> &'static str;
    fn apply(&self, ctx: &mut ApplyContext<'_>) -> StrategyOutcome;
}

/// Plain `git apply --whitespace=fix`
struct WhitespaceFix;

impl ApplyStrategy for WhitespaceFix {
    fn name(&self) -> &'static str {
        WHITESPACE_FIX
    }

    fn apply(&self, ctx: &mut ApplyContext<'_>) -> StrategyOutcome {
        ctx.git_apply(self.name(), &["--whitespace=fix"])
    }
}

/// Create empty placeholders for modified targets git could not find
struct CreateMissing;

impl ApplyStrategy for CreateMissing {
    fn name(&self) -> &'static str {
        CREATE_MISSING
    }

    fn apply(&self, ctx: &mut ApplyContext<'_>) -> StrategyOutcome {
        let stderr = ctx.last_stderr();
        if !MISSING_TARGET_MARKERS.iter().any(|m| stderr.contains(m)) {
            return StrategyOutcome::Retryable;
        }

        let targets: Vec<String> = ctx
            .patch
            .files
            .iter()
            .filter(|f| !f.change.is_added() && f.path != UNKNOWN_PATH)
            .map(|f| f.path.clone())
            .collect();
        for target in targets {
            if !is_confined(&target) {
                warn!(path = %target, "Refusing to pre-create path outside the tree");
                continue;
            }
            let full = ctx.work_dir().join(&target);
            if full.exists() {
                continue;
            }
            let created = full
                .parent()
                .map_or(Ok(()), fs::create_dir_all)
                .and_then(|()| fs::File::create(&full).map(|_| ()));
            match created {
                Ok(()) => debug!(path = %target, "Pre-created missing patch target"),
                Err(e) => warn!(path = %target, error = %e, "Could not pre-create patch target"),
            }
        }

        ctx.git_apply(self.name(), &["--whitespace=fix"])
    }
}

/// Re-parse and re-serialize the patch, repairing hunk headers
struct Reserialize;

impl ApplyStrategy for Reserialize {
    fn name(&self) -> &'static str {
        RESERIALIZE
    }

    fn apply(&self, ctx: &mut ApplyContext<'_>) -> StrategyOutcome {
        let reparsed = fs::read_to_string(&ctx.scratch)
            .map(|text| parse(&text))
            .unwrap_or_default();
        if reparsed.is_empty() {
            ctx.attempts.push(ApplyAttempt {
                strategy: self.name().to_string(),
                args: Vec::new(),
                exit_code: None,
                stdout: String::new(),
                stderr: "re-parse produced no file blocks".to_string(),
            });
            return StrategyOutcome::Retryable;
        }

        if let Err(e) = fs::write(&ctx.scratch, reparsed.to_text()) {
            ctx.attempts.push(ApplyAttempt {
                strategy: self.name().to_string(),
                args: Vec::new(),
                exit_code: None,
                stdout: String::new(),
                stderr: format!("could not rewrite scratch patch: {e}"),
            });
            return StrategyOutcome::Retryable;
        }
        ctx.git_apply(self.name(), &["--whitespace=fix"])
    }
}

/// Apply what can be applied and collect `*.rej` fragments. Never succeeds.
struct Reject;

impl ApplyStrategy for Reject {
    fn name(&self) -> &'static str {
        REJECT
    }

    fn apply(&self, ctx: &mut ApplyContext<'_>) -> StrategyOutcome {
        ctx.git_apply(self.name(), &["--reject", "--whitespace=fix"]);
        ctx.rejected = collect_rejects(ctx.work_dir());
        StrategyOutcome::Fatal
    }
}

fn strategies() -> Vec<Box<dyn ApplyStrategy>> {
    vec![
        Box::new(WhitespaceFix),
        Box::new(CreateMissing),
        Box::new(Reserialize),
        Box::new(Reject),
    ]
}

/// Applies patches to a working tree through the strategy chain.
pub struct PatchApplier<'r> {
    runner: &'r dyn ProcessRunner,
}

impl<'r> PatchApplier<'r> {
    pub fn new(runner: &'r dyn ProcessRunner) -> Self {
        Self { runner }
    }

    /// Apply `patch_text` inside `work_dir`.
    ///
    /// Only failure to create the scratch file is an error; everything git
    /// reports ends up in the returned report.
    pub fn apply(&self, patch_text: &str, work_dir: &Path) -> Result<ApplyReport, PatchloopError> {
        let normalized = normalize_patch_text(patch_text);
        let mut scratch = tempfile::Builder::new()
            .prefix("patchloop-")
            .suffix(".patch")
            .tempfile()?;
        scratch.write_all(normalized.as_bytes())?;
        scratch.flush()?;

        let mut ctx = ApplyContext {
            git: Git::new(self.runner, work_dir),
            scratch: scratch.path().to_path_buf(),
            patch: parse(&normalized),
            attempts: Vec::new(),
            rejected: Vec::new(),
        };

        let mut succeeded = None;
        for strategy in strategies() {
            match strategy.apply(&mut ctx) {
                StrategyOutcome::Success => {
                    succeeded = Some(strategy.name());
                    break;
                }
                StrategyOutcome::Retryable => {}
                StrategyOutcome::Fatal => break,
            }
        }

        let report = ApplyReport {
            ok: succeeded.is_some(),
            strategy: succeeded.map(str::to_string),
            attempts: ctx.attempts,
            rejected: ctx.rejected,
        };
        info!(
            dir = %work_dir.display(),
            ok = report.ok,
            strategy = report.strategy.as_deref().unwrap_or("none"),
            attempts = report.attempts.len(),
            rejected = report.rejected.len(),
            "Patch application finished"
        );
        Ok(report)
    }
}

/// CRLF/CR to LF and trailing whitespace stripped from every line.
/// Leading whitespace is significant in a diff and is kept.
#[must_use]
pub fn normalize_patch_text(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = String::with_capacity(unified.len() + 1);
    for line in unified.lines() {
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

fn is_confined(path: &str) -> bool {
    let path = Path::new(path);
    !path.as_os_str().is_empty() && path.components().all(|c| matches!(c, Component::Normal(_)))
}

fn collect_rejects(work_dir: &Path) -> Vec<RejectFragment> {
    let mut fragments: Vec<RejectFragment> = WalkDir::new(work_dir)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || e.file_name() != ".git")
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rej"))
        .map(|e| {
            let rel = e
                .path()
                .strip_prefix(work_dir)
                .unwrap_or(e.path())
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            let content = fs::read(e.path())
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or_default();
            RejectFragment { path: rel, content }
        })
        .collect();
    fragments.sort_by(|a, b| a.path.cmp(&b.path));
    fragments
}
