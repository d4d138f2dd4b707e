//! Helpers shared by the integration tests.
//!
//! Everything that touches a repository needs `git` on PATH; tests call
//! [`git_available`] first and return early when it is missing.

#![allow(dead_code)]

use anyhow::{Context, Result, bail};
use camino::Utf8PathBuf;
use patchloop::{Config, Workflow};
use patchloop_llm::{Generator, ScriptedGenerator, ScriptedPlanner};
use patchloop_runner::NativeRunner;
use patchloop_utils::types::{PlanDocument, PlanFile};
use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use tempfile::TempDir;

pub(crate) fn git_available() -> bool {
    let found = which::which("git").is_ok();
    if !found {
        eprintln!("skipping: git not found on PATH");
    }
    found
}

/// Run git in `dir` and return its trimmed stdout.
pub(crate) fn git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("LC_ALL", "C")
        .output()
        .with_context(|| format!("failed to run git {args:?}"))?;
    if !output.status.success() {
        bail!(
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

pub(crate) fn write_files(dir: &Path, files: &[(&str, &str)]) -> Result<()> {
    for (path, content) in files {
        let full = dir.join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(full, content)?;
    }
    Ok(())
}

/// A committed repository on branch `main` containing `files`.
pub(crate) fn init_repo(files: &[(&str, &str)]) -> Result<TempDir> {
    let temp = TempDir::new()?;
    let dir = temp.path();
    git(dir, &["init", "-q"])?;
    git(dir, &["checkout", "-q", "-B", "main"])?;
    git(dir, &["config", "user.name", "test"])?;
    git(dir, &["config", "user.email", "test@local"])?;
    git(dir, &["config", "commit.gpgsign", "false"])?;
    write_files(dir, files)?;
    git(dir, &["add", "-A"])?;
    git(dir, &["commit", "-q", "--allow-empty", "-m", "initial"])?;
    Ok(temp)
}

pub(crate) fn utf8(dir: &Path) -> Result<Utf8PathBuf> {
    Utf8PathBuf::from_path_buf(dir.to_path_buf())
        .map_err(|p| anyhow::anyhow!("non UTF-8 path: {}", p.display()))
}

/// A plan that allows edits to `files`.
pub(crate) fn plan_for(objective: &str, files: &[&str]) -> PlanDocument {
    PlanDocument {
        objective: objective.to_string(),
        files: files
            .iter()
            .map(|path| PlanFile {
                path: (*path).to_string(),
                reason: "touched by the change".to_string(),
            })
            .collect(),
        ..PlanDocument::default()
    }
}

/// A workflow over `config` with scripted model collaborators and real processes.
pub(crate) fn scripted_workflow(
    config: Config,
    plan: PlanDocument,
    generator: &Arc<ScriptedGenerator>,
) -> Workflow {
    let generator: Arc<dyn Generator> = generator.clone();
    Workflow::new(
        config,
        Box::new(ScriptedPlanner::new(plan)),
        generator,
        Arc::new(NativeRunner::new()),
    )
}
