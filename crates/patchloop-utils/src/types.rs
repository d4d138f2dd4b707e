//! Serializable records shared across crates.
//!
//! These types appear inside persisted plan documents, so field names are part
//! of the on-disk format.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::StoreError;

// ============================================================================
// Plan identity
// ============================================================================

/// Identifier of a plan record, `plan_<8 hex>` when generated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanId(String);

impl PlanId {
    /// Generate a fresh identifier from a v4 UUID.
    #[must_use]
    pub fn generate() -> Self {
        let hex = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("plan_{}", &hex[..8]))
    }

    /// Validate a caller-supplied identifier.
    ///
    /// Only ASCII alphanumerics, `_` and `-` are accepted so an id can never
    /// escape the plans directory.
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let trimmed = raw.trim();
        let valid = !trimmed.is_empty()
            && trimmed.len() <= 128
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if valid {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(StoreError::InvalidPlanId {
                plan_id: raw.to_string(),
            })
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PlanId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Plan document
// ============================================================================

/// Current plan document schema version
pub const PLAN_SCHEMA_VERSION: &str = "1.0";

/// Structured description of an intended change, as produced by a planner.
///
/// Every field defaults so a partially-formed planner response still loads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanDocument {
    pub objective: String,
    pub rationale: String,
    pub scope: PlanScope,
    pub files: Vec<PlanFile>,
    pub steps: Vec<PlanStep>,
    pub tests: PlanTests,
    pub risks: Vec<PlanRisk>,
    pub schema_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanScope {
    pub in_scope: Vec<String>,
    pub out_of_scope: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanFile {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanStep {
    pub id: String,
    pub description: String,
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanTests {
    pub strategy: String,
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanRisk {
    pub description: String,
    pub mitigation: String,
}

impl PlanDocument {
    /// Paths the plan allows a patch to touch, normalized and deduplicated.
    #[must_use]
    pub fn allowed_files(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .files
            .iter()
            .map(|f| normalize_repo_path(&f.path))
            .filter(|p| !p.is_empty())
            .collect();
        paths.sort();
        paths.dedup();
        paths
    }
}

/// Normalize a repository-relative path for comparison (`./a.py` -> `a.py`).
#[must_use]
pub fn normalize_repo_path(path: &str) -> String {
    let mut p = path.trim().replace('\\', "/");
    while let Some(rest) = p.strip_prefix("./") {
        p = rest.to_string();
    }
    p
}

// ============================================================================
// Lifecycle status
// ============================================================================

/// Orchestrator state of a plan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    #[default]
    Planned,
    Implemented,
    Verifying,
    Passed,
    Failed,
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Planned => "planned",
            Self::Implemented => "implemented",
            Self::Verifying => "verifying",
            Self::Passed => "passed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Aggregate verification status stored on the plan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    #[default]
    Pending,
    Passed,
    Failed,
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Passed => "passed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Patch application
// ============================================================================

/// One recorded `git apply` invocation (or synthetic step) of the applier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyAttempt {
    pub strategy: String,
    pub args: Vec<String>,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ApplyAttempt {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// A reject fragment left behind by reject-mode application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectFragment {
    pub path: String,
    pub content: String,
}

/// Outcome of the applier's fallback chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub ok: bool,
    /// Name of the strategy that succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    pub attempts: Vec<ApplyAttempt>,
    #[serde(default)]
    pub rejected: Vec<RejectFragment>,
}

impl ApplyReport {
    /// stderr of the most recent attempt that produced any
    #[must_use]
    pub fn last_stderr(&self) -> Option<&str> {
        self.attempts
            .iter()
            .rev()
            .map(|a| a.stderr.trim())
            .find(|s| !s.is_empty())
    }
}

// ============================================================================
// Test and check execution
// ============================================================================

/// Result of running the configured test command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TestOutcome {
    /// The command ran to completion (exit code is `None` when killed by a signal)
    Completed {
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    /// The hard timeout fired; output is whatever was produced before the kill
    TimedOut {
        timeout_secs: u64,
        stdout: String,
        stderr: String,
    },
    /// The command could not be started at all
    SpawnFailed { reason: String },
}

impl TestOutcome {
    #[must_use]
    pub fn passed(&self) -> bool {
        matches!(self, Self::Completed { exit_code: Some(0), .. })
    }

    #[must_use]
    pub fn stdout(&self) -> &str {
        match self {
            Self::Completed { stdout, .. } | Self::TimedOut { stdout, .. } => stdout,
            Self::SpawnFailed { .. } => "",
        }
    }

    #[must_use]
    pub fn stderr(&self) -> &str {
        match self {
            Self::Completed { stderr, .. } | Self::TimedOut { stderr, .. } => stderr,
            Self::SpawnFailed { reason } => reason,
        }
    }

    /// Short human summary, e.g. `tests rc=1`
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::Completed {
                exit_code: Some(code),
                ..
            } => format!("tests rc={code}"),
            Self::Completed {
                exit_code: None, ..
            } => "tests terminated by signal".to_string(),
            Self::TimedOut { timeout_secs, .. } => {
                format!("tests timed out after {timeout_secs}s")
            }
            Self::SpawnFailed { reason } => format!("tests could not start: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Passed,
    Failed,
    TimedOut,
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Result of one extra (static analysis) check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub command: String,
    pub status: CheckStatus,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

// ============================================================================
// Sandbox
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxMode {
    /// Throwaway branch in the caller's repository
    Branch,
    /// Disposable copy of the tree in a temp directory
    Copy,
}

impl fmt::Display for SandboxMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Branch => f.write_str("branch"),
            Self::Copy => f.write_str("copy"),
        }
    }
}

/// Structured outcome of one sandbox run. Never persisted on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxResult {
    pub mode: SandboxMode,
    pub applied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apply: Option<ApplyReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests: Option<TestOutcome>,
    #[serde(default)]
    pub extra_checks: Vec<CheckResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SandboxResult {
    #[must_use]
    pub fn new(mode: SandboxMode) -> Self {
        Self {
            mode,
            applied: false,
            apply: None,
            tests: None,
            extra_checks: Vec::new(),
            error: None,
        }
    }

    /// Tests ran and exited 0
    #[must_use]
    pub fn passed(&self) -> bool {
        self.applied && self.tests.as_ref().is_some_and(TestOutcome::passed)
    }
}
