//! Smoke tests for the `patchloop` binary.
//!
//! Plans are seeded straight into a state directory so nothing here needs a
//! model backend. Tests that need a repository skip when git is missing.

mod test_support;

use anyhow::Result;
use assert_cmd::assert::OutputAssertExt;
use patchloop::{PlanId, PlanRecord, PlanStore};
use patchloop_utils::types::{PlanDocument, PlanFile, PlanStatus};
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};
use tempfile::TempDir;
use test_support::{git, git_available, init_repo, utf8};

const SET_B_3: &str = "diff --git a/m.py b/m.py\n--- a/m.py\n+++ b/m.py\n@@ -1,2 +1,2 @@\n a = 1\n-b = 2\n+b = 3\n";

fn patchloop(repo: &Path, state: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("patchloop"));
    cmd.arg("--repo")
        .arg(repo)
        .arg("--state-dir")
        .arg(state)
        .stdin(Stdio::null())
        .env_remove("RUST_LOG");
    cmd
}

/// Store a plan whose current patch is `patch` and return its id.
fn seed_plan(state: &Path, patch: &str) -> Result<String> {
    let plan = PlanDocument {
        objective: "set b to 3".into(),
        files: vec![PlanFile {
            path: "m.py".into(),
            reason: "holds b".into(),
        }],
        ..PlanDocument::default()
    };
    let mut record = PlanRecord::new(PlanId::generate(), "set b to 3", plan);
    record.implementation.final_patch = Some(patch.to_string());
    record.status = PlanStatus::Implemented;
    let id = PlanStore::new(utf8(state)?).create(&record)?;
    Ok(id.to_string())
}

#[test]
fn help_lists_commands() {
    Command::new(assert_cmd::cargo::cargo_bin!("patchloop"))
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("verify"))
        .stdout(predicate::str::contains("revert"));
}

#[test]
fn conflicting_selection_flags_are_usage_errors() -> Result<()> {
    let dir = TempDir::new()?;
    let state = TempDir::new()?;
    patchloop(dir.path(), state.path())
        .args(["apply", "plan_0000abcd", "--file", "m.py", "--hunk", "m.py:0"])
        .assert()
        .code(2);
    Ok(())
}

#[test]
fn config_json_reports_sources() -> Result<()> {
    let dir = TempDir::new()?;
    let state = TempDir::new()?;
    fs::create_dir_all(dir.path().join(".patchloop"))?;
    fs::write(
        dir.path().join(".patchloop/config.toml"),
        "[tests]\ncommand = \"make check\"\n",
    )?;

    let output = patchloop(dir.path(), state.path())
        .args(["--json", "--model", "tiny", "config"])
        .output()?;
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let effective: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(effective["tests.command"][0], "make check");
    let source = effective["tests.command"][1].as_str().unwrap_or_default();
    assert!(source.starts_with("config"), "source: {source}");
    assert_eq!(effective["llm.model"][0], "tiny");
    assert_eq!(effective["llm.model"][1], "cli");
    Ok(())
}

#[test]
fn list_on_empty_state_suggests_plan() -> Result<()> {
    let dir = TempDir::new()?;
    let state = TempDir::new()?;
    patchloop(dir.path(), state.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No plans yet"));
    Ok(())
}

#[test]
fn unknown_and_malformed_plan_ids() -> Result<()> {
    let dir = TempDir::new()?;
    let state = TempDir::new()?;
    patchloop(dir.path(), state.path())
        .args(["show", "plan_deadbeef"])
        .assert()
        .code(6)
        .stderr(predicate::str::contains("plan_deadbeef"));
    patchloop(dir.path(), state.path())
        .args(["show", "../../etc/passwd"])
        .assert()
        .code(2);
    Ok(())
}

#[test]
fn show_and_hunks_read_a_stored_plan() -> Result<()> {
    let dir = TempDir::new()?;
    let state = TempDir::new()?;
    let id = seed_plan(state.path(), SET_B_3)?;

    patchloop(dir.path(), state.path())
        .args(["show", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("Objective: set b to 3"))
        .stdout(predicate::str::contains("+b = 3"));

    let output = patchloop(dir.path(), state.path())
        .args(["hunks", &id, "--json"])
        .output()?;
    assert!(output.status.success());
    let files: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(files[0]["file"], "m.py");
    assert_eq!(files[0]["hunks"][0]["index"], 0);
    assert_eq!(files[0]["hunks"][0]["added"], 1);
    assert_eq!(files[0]["hunks"][0]["removed"], 1);
    Ok(())
}

#[test]
fn zero_round_budget_is_rejected() -> Result<()> {
    let dir = TempDir::new()?;
    let state = TempDir::new()?;
    let id = seed_plan(state.path(), SET_B_3)?;
    patchloop(dir.path(), state.path())
        .args(["verify", &id, "--max-rounds", "0"])
        .assert()
        .code(2);
    Ok(())
}

#[test]
fn sandbox_exit_code_follows_tests() -> Result<()> {
    if !git_available() {
        return Ok(());
    }
    let repo = init_repo(&[("m.py", "a = 1\nb = 2\n")])?;
    let state = TempDir::new()?;
    let id = seed_plan(state.path(), SET_B_3)?;

    patchloop(repo.path(), state.path())
        .args(["sandbox", &id, "--test-cmd", "git grep -q \"b = 3\""])
        .assert()
        .success();
    patchloop(repo.path(), state.path())
        .args(["sandbox", &id, "--test-cmd", "git grep -q \"b = 4\""])
        .assert()
        .code(11);

    assert_eq!(git(repo.path(), &["status", "--porcelain"])?, "");
    assert_eq!(fs::read_to_string(repo.path().join("m.py"))?, "a = 1\nb = 2\n");
    Ok(())
}

#[test]
fn apply_then_revert_through_the_cli() -> Result<()> {
    if !git_available() {
        return Ok(());
    }
    let repo = init_repo(&[("m.py", "a = 1\nb = 2\n")])?;
    let state = TempDir::new()?;
    let id = seed_plan(state.path(), SET_B_3)?;

    let output = patchloop(repo.path(), state.path())
        .args(["--json", "--test-cmd", "true", "apply", &id])
        .output()?;
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let applied: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    let commit = applied["commit"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("missing commit in {applied}"))?
        .to_string();
    assert_eq!(fs::read_to_string(repo.path().join("m.py"))?, "a = 1\nb = 3\n");

    patchloop(repo.path(), state.path())
        .args(["revert", &commit])
        .assert()
        .success()
        .stdout(predicate::str::contains("Reverted"));
    assert_eq!(fs::read_to_string(repo.path().join("m.py"))?, "a = 1\nb = 2\n");

    patchloop(repo.path(), state.path())
        .args(["revert", "--", "--hard"])
        .assert()
        .code(2);
    Ok(())
}

#[test]
fn dirty_tree_exit_code() -> Result<()> {
    if !git_available() {
        return Ok(());
    }
    let repo = init_repo(&[("m.py", "a = 1\nb = 2\n")])?;
    let state = TempDir::new()?;
    let id = seed_plan(state.path(), SET_B_3)?;
    fs::write(repo.path().join("m.py"), "a = 1\nb = 9\n")?;

    patchloop(repo.path(), state.path())
        .args(["apply", &id])
        .assert()
        .code(5);
    assert_eq!(fs::read_to_string(repo.path().join("m.py"))?, "a = 1\nb = 9\n");
    Ok(())
}
