use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

pub use patchloop_lock::LockError;

use crate::types::ApplyReport;

/// Library-level error type for patchloop operations.
///
/// Sub-errors keep their own enums so each crate can return a narrow type;
/// `PatchloopError` aggregates them for the workflow and CLI layers.
///
/// | Exit Code | Error Type |
/// |-----------|------------|
/// | 2 | Configuration / invalid arguments |
/// | 3 | Patch validation |
/// | 4 | Apply failure |
/// | 5 | Dirty working tree |
/// | 6 | Plan not found |
/// | 9 | Plan lock held |
/// | 70 | LLM backend failure |
/// | 1 | Other errors |
#[derive(Error, Debug)]
pub enum PatchloopError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Runner error: {0}")]
    Runner(#[from] RunnerError),

    #[error("LLM backend error: {0}")]
    Llm(#[from] LlmError),

    #[error("Plan lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Plan store error: {0}")]
    Store(#[from] StoreError),

    #[error("Patch validation failed: {0}")]
    PatchValidation(#[from] PatchValidationError),

    #[error("Patch could not be applied ({} attempt(s), {} rejected fragment(s))", report.attempts.len(), report.rejected.len())]
    ApplyFailure { report: Box<ApplyReport> },

    #[error("Working tree at {path} has uncommitted changes")]
    DirtyWorkingTree { path: String, changes: Vec<String> },

    #[error("{path} is not inside a git working tree")]
    NotARepository { path: String },

    #[error("git {command} failed (exit code {code:?}): {stderr}")]
    Git {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Plan '{plan_id}' has no generated patch")]
    MissingPatch { plan_id: String },

    #[error("Nothing to apply: {reason}")]
    EmptySelection { reason: String },

    #[error("Invalid value for {name}: {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration file: {0}")]
    InvalidFile(String),

    #[error("Invalid configuration value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found at {path}")]
    NotFound { path: String },

    #[error("Configuration discovery failed: {reason}")]
    DiscoveryFailed { reason: String },
}

/// Errors from spawning or supervising child processes.
///
/// A timeout is not an error: it is reported through
/// `ProcessOutput::timed_out` together with the partial output.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Failed to spawn '{program}': {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("Failed to wait for '{program}': {reason}")]
    WaitFailed { program: String, reason: String },

    #[error("Invalid command line: {reason}")]
    InvalidCommand { reason: String },
}

/// Errors from planner/generator backends.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Provider returned HTTP {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("Request timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Backend misconfigured: {0}")]
    Misconfiguration(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Errors from the plan store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Plan not found: {plan_id}")]
    NotFound { plan_id: String },

    #[error("Invalid plan id '{plan_id}' (use letters, digits, '_' or '-')")]
    InvalidPlanId { plan_id: String },

    #[error("Plan record at {path} is corrupted: {reason}")]
    Corrupted { path: String, reason: String },

    #[error("Failed to write plan record at {path}: {reason}")]
    WriteFailed { path: String, reason: String },

    #[error("Failed to read plan store at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Structural problems with generator output. Never auto-retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatchValidationError {
    #[error("generator returned an empty patch")]
    Empty,

    #[error("output contains no 'diff --git' file header")]
    MissingDiffHeader,

    #[error("patch could not be parsed: {reason}")]
    Unparseable { reason: String },

    #[error("patch touches a file whose path could not be determined")]
    UnresolvedPath,

    #[error("patch modifies '{path}' which is outside the approved file list")]
    OutOfScope { path: String, allowed: Vec<String> },

    #[error("patch contains no file modifications")]
    NoFiles,
}

/// User-facing rendering of errors for the CLI.
pub trait UserFriendlyError {
    fn user_message(&self) -> String;

    fn context(&self) -> Option<String>;

    fn suggestions(&self) -> Vec<String>;

    fn category(&self) -> ErrorCategory;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Validation,
    Apply,
    Repository,
    Storage,
    Concurrency,
    Execution,
    Llm,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Configuration => "Configuration",
            Self::Validation => "Validation",
            Self::Apply => "Patch Application",
            Self::Repository => "Repository",
            Self::Storage => "Plan Storage",
            Self::Concurrency => "Concurrency",
            Self::Execution => "Process Execution",
            Self::Llm => "LLM Backend",
        };
        f.write_str(s)
    }
}

impl UserFriendlyError for PatchloopError {
    fn user_message(&self) -> String {
        match self {
            Self::PatchValidation(e) => format!("The generated patch was rejected: {e}"),
            Self::ApplyFailure { report } => {
                let detail = report.last_stderr().unwrap_or("no diagnostics");
                format!("The patch could not be applied cleanly: {detail}")
            }
            Self::DirtyWorkingTree { path, changes } => format!(
                "The working tree at {path} has {} uncommitted change(s)",
                changes.len()
            ),
            Self::Store(StoreError::NotFound { plan_id }) => {
                format!("No plan named '{plan_id}' exists")
            }
            other => other.to_string(),
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::Config(_) => Some(
                "Configuration is read from CLI flags, then .patchloop/config.toml, then defaults."
                    .to_string(),
            ),
            Self::DirtyWorkingTree { changes, .. } if !changes.is_empty() => {
                Some(format!("Changed paths:\n  {}", changes.join("\n  ")))
            }
            Self::ApplyFailure { report } if !report.rejected.is_empty() => Some(format!(
                "Rejected hunks were written for: {}",
                report
                    .rejected
                    .iter()
                    .map(|r| r.path.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
            Self::PatchValidation(PatchValidationError::OutOfScope { allowed, .. }) => {
                Some(format!("Allowed files: {}", allowed.join(", ")))
            }
            Self::Lock(LockError::ConcurrentOperation { .. }) => Some(
                "Only one operation may run against a plan at a time.".to_string(),
            ),
            _ => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::DirtyWorkingTree { .. } => vec![
                "Commit or stash your changes, then retry".to_string(),
                "Run `git status` to inspect the working tree".to_string(),
            ],
            Self::MissingPatch { plan_id } => {
                vec![format!("Run `patchloop implement {plan_id}` first")]
            }
            Self::Store(StoreError::NotFound { .. }) => {
                vec!["Run `patchloop list` to see known plans".to_string()]
            }
            Self::PatchValidation(_) => vec![
                "Re-run `patchloop implement` with --feedback describing the problem".to_string(),
            ],
            Self::ApplyFailure { .. } => vec![
                "Inspect the hunks with `patchloop hunks <plan>` and apply a subset".to_string(),
                "Regenerate the patch with `patchloop implement <plan> --feedback ...`".to_string(),
            ],
            Self::Lock(_) => vec![
                "Wait for the other operation to finish".to_string(),
                "Remove a leftover lock file under .patchloop/locks if no patchloop process is running"
                    .to_string(),
            ],
            Self::Llm(LlmError::Transport(_) | LlmError::Timeout { .. }) => vec![
                "Check that the model server is running and reachable".to_string(),
                "Increase [llm].timeout_secs for slow models".to_string(),
            ],
            Self::Config(_) => vec!["Run `patchloop config` to see effective values".to_string()],
            Self::NotARepository { .. } => {
                vec!["Run the command inside a git repository or pass --repo".to_string()]
            }
            _ => Vec::new(),
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) | Self::InvalidArgument { .. } => ErrorCategory::Configuration,
            Self::PatchValidation(_) | Self::EmptySelection { .. } | Self::MissingPatch { .. } => {
                ErrorCategory::Validation
            }
            Self::ApplyFailure { .. } => ErrorCategory::Apply,
            Self::DirtyWorkingTree { .. } | Self::NotARepository { .. } | Self::Git { .. } => {
                ErrorCategory::Repository
            }
            Self::Store(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Lock(_) => ErrorCategory::Concurrency,
            Self::Runner(_) => ErrorCategory::Execution,
            Self::Llm(_) => ErrorCategory::Llm,
        }
    }
}

impl PatchloopError {
    /// Render the error with context and suggestions for terminal output.
    #[must_use]
    pub fn display_for_user(&self) -> String {
        let mut output = format!("Error: {}\n", self.user_message());
        if let Some(ctx) = self.context() {
            output.push_str(&format!("\nContext: {ctx}\n"));
        }
        let suggestions = self.suggestions();
        if !suggestions.is_empty() {
            output.push_str("\nSuggestions:\n");
            for suggestion in suggestions {
                output.push_str(&format!("  • {suggestion}\n"));
            }
        }
        output
    }

    /// Map this error to the CLI exit code table.
    #[must_use]
    pub fn to_exit_code(&self) -> crate::exit_codes::ExitCode {
        use crate::exit_codes::ExitCode;

        match self {
            Self::Config(_) | Self::InvalidArgument { .. } => ExitCode::CLI_ARGS,
            Self::PatchValidation(_) => ExitCode::PATCH_INVALID,
            Self::ApplyFailure { .. } | Self::EmptySelection { .. } => ExitCode::APPLY_FAILED,
            Self::DirtyWorkingTree { .. } => ExitCode::DIRTY_TREE,
            Self::Store(StoreError::NotFound { .. }) | Self::MissingPatch { .. } => {
                ExitCode::NOT_FOUND
            }
            Self::Store(StoreError::InvalidPlanId { .. }) => ExitCode::CLI_ARGS,
            Self::Lock(_) => ExitCode::LOCK_HELD,
            Self::Llm(_) => ExitCode::LLM_FAILURE,
            _ => ExitCode::INTERNAL,
        }
    }
}
