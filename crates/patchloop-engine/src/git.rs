//! Thin wrapper over the `git` CLI.
//!
//! Every invocation goes through a [`ProcessRunner`] with `LC_ALL=C`, so
//! diagnostics are stable enough to match on.

use patchloop_runner::{CommandSpec, ProcessOutput, ProcessRunner, RunnerError};
use patchloop_utils::PatchloopError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Upper bound for any single git command
pub const GIT_TIMEOUT: Duration = Duration::from_secs(120);

pub struct Git<'a> {
    runner: &'a dyn ProcessRunner,
    dir: PathBuf,
}

impl<'a> Git<'a> {
    pub fn new(runner: &'a dyn ProcessRunner, dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            dir: dir.into(),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Base `git` command rooted at this directory
    #[must_use]
    pub fn command(&self) -> CommandSpec {
        CommandSpec::new("git")
            .cwd(&self.dir)
            .env("LC_ALL", "C")
            .env("GIT_TERMINAL_PROMPT", "0")
    }

    /// Run a prepared command, returning the raw output whatever the exit code.
    pub fn exec(&self, spec: &CommandSpec) -> Result<ProcessOutput, RunnerError> {
        debug!(command = %spec.display(), dir = %self.dir.display(), "git");
        self.runner.run(spec, GIT_TIMEOUT)
    }

    /// Run `git <args>`, returning the raw output whatever the exit code.
    pub fn output(&self, args: &[&str]) -> Result<ProcessOutput, RunnerError> {
        self.exec(&self.command().args(args.iter().copied()))
    }

    /// Run `git <args>` and require exit code 0. Returns trimmed stdout.
    pub fn run(&self, args: &[&str]) -> Result<String, PatchloopError> {
        let output = self.output(args)?;
        if output.success() {
            return Ok(output.stdout_string().trim().to_string());
        }
        Err(PatchloopError::Git {
            command: args.join(" "),
            code: output.exit_code,
            stderr: output.stderr_string().trim().to_string(),
        })
    }

    #[must_use]
    pub fn is_work_tree(&self) -> bool {
        matches!(
            self.output(&["rev-parse", "--is-inside-work-tree"]),
            Ok(out) if out.success() && out.stdout_string().trim() == "true"
        )
    }

    /// Top-level directory of the enclosing work tree
    #[must_use]
    pub fn toplevel(&self) -> Option<PathBuf> {
        self.run(&["rev-parse", "--show-toplevel"])
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
    }

    /// `git status --porcelain` lines, untracked files included
    pub fn status_porcelain(&self) -> Result<Vec<String>, PatchloopError> {
        let output = self.output(&["status", "--porcelain", "--untracked-files=all"])?;
        if !output.success() {
            return Err(PatchloopError::Git {
                command: "status --porcelain".to_string(),
                code: output.exit_code,
                stderr: output.stderr_string().trim().to_string(),
            });
        }
        Ok(output
            .stdout_string()
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Fail with `DirtyWorkingTree` unless there is nothing to commit.
    pub fn ensure_clean(&self) -> Result<(), PatchloopError> {
        let changes = self.status_porcelain()?;
        if changes.is_empty() {
            return Ok(());
        }
        Err(PatchloopError::DirtyWorkingTree {
            path: self.dir.display().to_string(),
            changes,
        })
    }

    /// Current branch name, or the commit sha when HEAD is detached
    pub fn current_ref(&self) -> Result<String, PatchloopError> {
        match self.run(&["symbolic-ref", "--short", "-q", "HEAD"]) {
            Ok(branch) if !branch.is_empty() => Ok(branch),
            _ => self.head(),
        }
    }

    pub fn head(&self) -> Result<String, PatchloopError> {
        self.run(&["rev-parse", "HEAD"])
    }

    /// Commit everything staged with an explicit identity. Returns the new sha.
    pub fn commit_as(
        &self,
        author_name: &str,
        author_email: &str,
        message: &str,
    ) -> Result<String, PatchloopError> {
        let name = format!("user.name={author_name}");
        let email = format!("user.email={author_email}");
        self.run(&["-c", &name, "-c", &email, "commit", "-q", "-m", message])?;
        self.head()
    }

    /// Throw away tracked modifications and untracked (non-ignored) files.
    pub fn discard_changes(&self) -> Result<(), PatchloopError> {
        self.run(&["reset", "--hard", "-q"])?;
        self.run(&["clean", "-fd", "-q"])?;
        Ok(())
    }

    /// Best-effort variant of [`Self::run`] for cleanup paths.
    pub fn run_logged(&self, args: &[&str]) -> bool {
        match self.run(args) {
            Ok(_) => true,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "git cleanup step failed");
                false
            }
        }
    }
}
