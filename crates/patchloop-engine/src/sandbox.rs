//! Sandboxed patch trials.
//!
//! A sandbox applies a patch somewhere disposable, runs the test command and
//! extra checks there, and leaves the caller's tree exactly as it found it.
//!
//! - **Branch mode** (inside a git work tree): a throwaway branch in the
//!   caller's repository, restored by a drop guard.
//! - **Copy mode** (anything else): a full copy of the tree in a temporary
//!   directory with its own throwaway git repository.

use globset::{Glob, GlobSet, GlobSetBuilder};
use patchloop_config::Config;
use patchloop_runner::{CommandSpec, ProcessRunner};
use patchloop_utils::PatchloopError;
use patchloop_utils::types::{CheckResult, CheckStatus, SandboxMode, SandboxResult, TestOutcome};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::apply::PatchApplier;
use crate::git::Git;

/// Everything one sandbox run needs.
#[derive(Debug, Clone)]
pub struct SandboxRequest {
    pub plan_id: String,
    pub patch: String,
    pub repo_root: PathBuf,
    pub test_command: String,
    pub timeout: Duration,
    pub checks: BTreeMap<String, String>,
    pub branch_prefix: String,
    pub copy_excludes: Vec<String>,
}

impl SandboxRequest {
    /// Request for `patch` using the configured tests, checks and sandbox settings.
    #[must_use]
    pub fn from_config(config: &Config, plan_id: &str, patch: &str) -> Self {
        Self {
            plan_id: plan_id.to_string(),
            patch: patch.to_string(),
            repo_root: config.repo_root.clone().into_std_path_buf(),
            test_command: config.tests.command.clone(),
            timeout: config.test_timeout(),
            checks: config.checks.clone(),
            branch_prefix: config.sandbox.branch_prefix.clone(),
            copy_excludes: config.sandbox.copy_excludes.clone(),
        }
    }

    fn branch_name(&self) -> String {
        format!("{}{}", self.branch_prefix, self.plan_id)
    }
}

pub struct SandboxExecutor<'r> {
    runner: &'r dyn ProcessRunner,
}

impl<'r> SandboxExecutor<'r> {
    pub fn new(runner: &'r dyn ProcessRunner) -> Self {
        Self { runner }
    }

    /// Run one sandbox trial.
    ///
    /// Only `DirtyWorkingTree` is returned as an error. Every other failure is
    /// captured in [`SandboxResult::error`].
    pub fn run(&self, request: &SandboxRequest) -> Result<SandboxResult, PatchloopError> {
        let git = Git::new(self.runner, &request.repo_root);
        let result = if git.is_work_tree() {
            self.run_branch(&git, request)?
        } else {
            self.run_copy(request)
        };
        info!(
            plan_id = %request.plan_id,
            mode = %result.mode,
            applied = result.applied,
            passed = result.passed(),
            "Sandbox run finished"
        );
        Ok(result)
    }

    fn run_branch(&self, git: &Git<'_>, request: &SandboxRequest) -> Result<SandboxResult, PatchloopError> {
        let mut result = SandboxResult::new(SandboxMode::Branch);

        match git.ensure_clean() {
            Ok(()) => {}
            Err(e @ PatchloopError::DirtyWorkingTree { .. }) => return Err(e),
            Err(e) => {
                result.error = Some(e.to_string());
                return Ok(result);
            }
        }

        let origin = match git.current_ref() {
            Ok(origin) => origin,
            Err(e) => {
                result.error = Some(e.to_string());
                return Ok(result);
            }
        };
        let branch = request.branch_name();
        if let Err(e) = git.run(&["checkout", "-q", "-B", &branch]) {
            result.error = Some(e.to_string());
            return Ok(result);
        }
        debug!(origin = %origin, branch = %branch, "Switched to sandbox branch");

        let _restore = BranchRestore {
            git,
            origin,
            branch,
        };
        self.apply_and_test(&mut result, request, git.dir());
        Ok(result)
    }

    fn run_copy(&self, request: &SandboxRequest) -> SandboxResult {
        let mut result = SandboxResult::new(SandboxMode::Copy);

        let temp = match TempDir::with_prefix("patchloop-sandbox-") {
            Ok(temp) => temp,
            Err(e) => {
                result.error = Some(format!("could not create sandbox directory: {e}"));
                return result;
            }
        };
        match copy_tree(&request.repo_root, temp.path(), &request.copy_excludes) {
            Ok(copied) => debug!(files = copied, dir = %temp.path().display(), "Copied tree into sandbox"),
            Err(e) => {
                result.error = Some(format!("could not copy tree into sandbox: {e}"));
                return result;
            }
        }

        let git = Git::new(self.runner, temp.path());
        let setup: [&[&str]; 6] = [
            &["init", "-q"],
            &["config", "user.name", "patchloop"],
            &["config", "user.email", "patchloop@local"],
            &["config", "commit.gpgsign", "false"],
            &["add", "-A"],
            &["commit", "-q", "--allow-empty", "-m", "sandbox init"],
        ];
        for args in setup {
            if let Err(e) = git.run(args) {
                result.error = Some(e.to_string());
                return result;
            }
        }

        self.apply_and_test(&mut result, request, temp.path());
        result
    }

    fn apply_and_test(&self, result: &mut SandboxResult, request: &SandboxRequest, dir: &Path) {
        match PatchApplier::new(self.runner).apply(&request.patch, dir) {
            Ok(report) => {
                result.applied = report.ok;
                result.apply = Some(report);
            }
            Err(e) => {
                result.error = Some(format!("could not prepare patch: {e}"));
                return;
            }
        }
        if !result.applied {
            return;
        }

        result.tests = Some(run_test_command(
            self.runner,
            &request.test_command,
            dir,
            request.timeout,
        ));
        result.extra_checks = request
            .checks
            .iter()
            .map(|(name, command)| run_check(self.runner, name, command, dir, request.timeout))
            .collect();
    }
}

/// Restores the caller's checkout when a branch-mode run ends, however it ends.
struct BranchRestore<'g, 'r> {
    git: &'g Git<'r>,
    origin: String,
    branch: String,
}

impl Drop for BranchRestore<'_, '_> {
    fn drop(&mut self) {
        let git = self.git;
        let restored = git.run_logged(&["reset", "--hard", "-q"])
            & git.run_logged(&["clean", "-fd", "-q"])
            & git.run_logged(&["checkout", "-q", &self.origin])
            & git.run_logged(&["branch", "-D", "-q", &self.branch]);
        if restored {
            debug!(origin = %self.origin, "Restored working tree after sandbox run");
        } else {
            warn!(
                origin = %self.origin,
                branch = %self.branch,
                "Working tree restoration was incomplete"
            );
        }
    }
}

/// Split a command line shell-style and run it argv-style in `cwd`.
pub fn run_test_command(
    runner: &dyn ProcessRunner,
    command_line: &str,
    cwd: &Path,
    timeout: Duration,
) -> TestOutcome {
    let spec = match CommandSpec::from_command_line(command_line) {
        Ok(spec) => spec.cwd(cwd),
        Err(e) => {
            return TestOutcome::SpawnFailed {
                reason: e.to_string(),
            };
        }
    };
    debug!(command = %spec.display(), cwd = %cwd.display(), "Running test command");
    match runner.run(&spec, timeout) {
        Ok(out) if out.timed_out => TestOutcome::TimedOut {
            timeout_secs: timeout.as_secs(),
            stdout: out.stdout_string(),
            stderr: out.stderr_string(),
        },
        Ok(out) => TestOutcome::Completed {
            exit_code: out.exit_code,
            stdout: out.stdout_string(),
            stderr: out.stderr_string(),
        },
        Err(e) => TestOutcome::SpawnFailed {
            reason: e.to_string(),
        },
    }
}

fn run_check(
    runner: &dyn ProcessRunner,
    name: &str,
    command: &str,
    cwd: &Path,
    timeout: Duration,
) -> CheckResult {
    let outcome = run_test_command(runner, command, cwd, timeout);
    let (status, exit_code) = match &outcome {
        TestOutcome::Completed { exit_code, .. } if outcome.passed() => (CheckStatus::Passed, *exit_code),
        TestOutcome::Completed { exit_code, .. } => (CheckStatus::Failed, *exit_code),
        TestOutcome::TimedOut { .. } => (CheckStatus::TimedOut, None),
        TestOutcome::SpawnFailed { .. } => (CheckStatus::Error, None),
    };
    CheckResult {
        name: name.to_string(),
        command: command.to_string(),
        status,
        exit_code,
        stdout: outcome.stdout().to_string(),
        stderr: outcome.stderr().to_string(),
    }
}

fn build_excludes(patterns: &[String]) -> io::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| io::Error::other(format!("invalid exclude pattern '{pattern}': {e}")))?;
        builder.add(glob);
    }
    builder.build().map_err(io::Error::other)
}

/// Copy `src` into `dst`, skipping any entry whose own name matches an
/// exclude pattern. Returns the number of files copied.
pub fn copy_tree(src: &Path, dst: &Path, excludes: &[String]) -> io::Result<usize> {
    let excludes = build_excludes(excludes)?;
    let mut copied = 0;

    let walker = WalkDir::new(src)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !excludes.is_match(Path::new(e.file_name())));
    for entry in walker {
        let entry = entry?;
        let Ok(rel) = entry.path().strip_prefix(src) else {
            continue;
        };
        if rel.as_os_str().is_empty() {
            continue;
        }
        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            copied += 1;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        }
    }
    Ok(copied)
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> io::Result<()> {
    let points_to = fs::read_link(link)?;
    std::os::unix::fs::symlink(points_to, target)
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, _target: &Path) -> io::Result<()> {
    debug!(path = %link.display(), "Skipping symlink in sandbox copy");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{git, git_available, init_repo, write_files};
    use patchloop_runner::{NativeRunner, ProcessOutput, ScriptedRunner};

    const PATCH: &str = "diff --git a/m.py b/m.py\n--- a/m.py\n+++ b/m.py\n@@ -1,2 +1,2 @@\n a = 1\n-b = 2\n+b = 3\n";

    fn request(repo: &Path, test_command: &str) -> SandboxRequest {
        SandboxRequest {
            plan_id: "plan_0000abcd".into(),
            patch: PATCH.into(),
            repo_root: repo.to_path_buf(),
            test_command: test_command.into(),
            timeout: Duration::from_secs(60),
            checks: BTreeMap::new(),
            branch_prefix: "patchloop-sandbox-".into(),
            copy_excludes: patchloop_config::default_copy_excludes(),
        }
    }

    fn snapshot(dir: &Path) -> (String, String, String) {
        (
            git(dir, &["rev-parse", "--abbrev-ref", "HEAD"]),
            git(dir, &["rev-parse", "HEAD"]),
            fs::read_to_string(dir.join("m.py")).unwrap(),
        )
    }

    fn assert_restored(dir: &Path, before: &(String, String, String)) {
        assert_eq!(&snapshot(dir), before);
        assert_eq!(git(dir, &["status", "--porcelain", "--untracked-files=all"]), "");
        assert_eq!(git(dir, &["branch", "--list", "patchloop-sandbox-*"]), "");
    }

    #[test]
    fn test_branch_mode_pass_restores_tree() {
        if !git_available() {
            return;
        }
        let repo = init_repo(&[("m.py", "a = 1\nb = 2\n")]);
        let before = snapshot(repo.path());

        let runner = NativeRunner::new();
        let result = SandboxExecutor::new(&runner)
            .run(&request(repo.path(), "git grep -q \"b = 3\""))
            .unwrap();

        assert_eq!(result.mode, SandboxMode::Branch);
        assert!(result.applied);
        assert!(result.passed(), "result: {result:?}");
        assert_restored(repo.path(), &before);
    }

    #[test]
    fn test_branch_mode_failing_tests_restore_tree() {
        if !git_available() {
            return;
        }
        let repo = init_repo(&[("m.py", "a = 1\nb = 2\n")]);
        let before = snapshot(repo.path());

        let runner = NativeRunner::new();
        let result = SandboxExecutor::new(&runner)
            .run(&request(repo.path(), "git grep -q no_such_token_anywhere"))
            .unwrap();

        assert!(result.applied);
        assert!(!result.passed());
        assert!(matches!(
            result.tests,
            Some(TestOutcome::Completed { exit_code: Some(1), .. })
        ));
        assert_restored(repo.path(), &before);
    }

    #[test]
    fn test_branch_mode_apply_failure_skips_tests() {
        if !git_available() {
            return;
        }
        let repo = init_repo(&[("m.py", "x = 0\n")]);
        let before = snapshot(repo.path());

        let runner = NativeRunner::new();
        let result = SandboxExecutor::new(&runner)
            .run(&request(repo.path(), "git grep -q x"))
            .unwrap();

        assert!(!result.applied);
        assert!(result.tests.is_none());
        let report = result.apply.unwrap();
        assert!(!report.ok);
        assert!(!report.rejected.is_empty());
        assert_restored(repo.path(), &before);
    }

    #[test]
    fn test_dirty_tree_is_refused_untouched() {
        if !git_available() {
            return;
        }
        let repo = init_repo(&[("m.py", "a = 1\nb = 2\n")]);
        fs::write(repo.path().join("m.py"), "a = 1\nb = 2\n# local edit\n").unwrap();

        let runner = NativeRunner::new();
        let err = SandboxExecutor::new(&runner)
            .run(&request(repo.path(), "git grep -q x"))
            .unwrap_err();

        assert!(matches!(err, PatchloopError::DirtyWorkingTree { .. }));
        assert_eq!(
            fs::read_to_string(repo.path().join("m.py")).unwrap(),
            "a = 1\nb = 2\n# local edit\n"
        );
        assert_eq!(git(repo.path(), &["rev-parse", "--abbrev-ref", "HEAD"]), "main");
    }

    #[test]
    fn test_copy_mode_leaves_source_untouched() {
        if !git_available() {
            return;
        }
        let source = TempDir::new().unwrap();
        let runner = NativeRunner::new();
        if Git::new(&runner, source.path()).is_work_tree() {
            eprintln!("skipping: temp dir is inside a git work tree");
            return;
        }
        write_files(
            source.path(),
            &[("m.py", "a = 1\nb = 2\n"), ("node_modules/dep.js", "x\n")],
        );

        let mut req = request(source.path(), "git grep -q \"b = 3\"");
        req.checks.insert(
            "vendored".into(),
            "git ls-files --error-unmatch node_modules/dep.js".into(),
        );
        let result = SandboxExecutor::new(&runner).run(&req).unwrap();

        assert_eq!(result.mode, SandboxMode::Copy);
        assert!(result.passed(), "result: {result:?}");
        assert_eq!(result.extra_checks.len(), 1);
        assert_eq!(result.extra_checks[0].status, CheckStatus::Failed);
        assert_eq!(
            fs::read_to_string(source.path().join("m.py")).unwrap(),
            "a = 1\nb = 2\n"
        );
        assert!(!source.path().join(".git").exists());
    }

    #[test]
    fn test_copy_tree_honours_excludes() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        write_files(
            src.path(),
            &[
                ("src/app.py", "print()\n"),
                (".venv-3.12/lib.py", "x\n"),
                ("pkg/__pycache__/m.pyc", "x\n"),
                (".patchloop/plans/p.json", "{}\n"),
            ],
        );

        let copied = copy_tree(src.path(), dst.path(), &patchloop_config::default_copy_excludes()).unwrap();

        assert_eq!(copied, 1);
        assert!(dst.path().join("src/app.py").is_file());
        assert!(!dst.path().join(".venv-3.12").exists());
        assert!(!dst.path().join("pkg/__pycache__").exists());
        assert!(!dst.path().join(".patchloop").exists());
    }

    #[test]
    fn test_outcome_mapping() {
        let runner = ScriptedRunner::new()
            .on("slow", ProcessOutput::new(b"partial".to_vec(), Vec::new(), None, true))
            .on("lint", ProcessOutput::completed(2, "", "E501"))
            .on_spawn_failure("missing-tool", "not found");
        let cwd = Path::new(".");
        let timeout = Duration::from_secs(7);

        let outcome = run_test_command(&runner, "slow --all", cwd, timeout);
        assert_eq!(
            outcome,
            TestOutcome::TimedOut {
                timeout_secs: 7,
                stdout: "partial".into(),
                stderr: String::new(),
            }
        );

        assert!(matches!(
            run_test_command(&runner, "missing-tool", cwd, timeout),
            TestOutcome::SpawnFailed { .. }
        ));
        assert!(matches!(
            run_test_command(&runner, "pytest 'unterminated", cwd, timeout),
            TestOutcome::SpawnFailed { .. }
        ));

        let check = run_check(&runner, "lint", "lint .", cwd, timeout);
        assert_eq!(check.status, CheckStatus::Failed);
        assert_eq!(check.exit_code, Some(2));
        assert_eq!(check.stderr, "E501");

        let check = run_check(&runner, "types", "missing-tool", cwd, timeout);
        assert_eq!(check.status, CheckStatus::Error);

        let check = run_check(&runner, "slow", "slow", cwd, timeout);
        assert_eq!(check.status, CheckStatus::TimedOut);

        let check = run_check(&runner, "ok", "true-ish", cwd, timeout);
        assert_eq!(check.status, CheckStatus::Passed);
    }
}
