//! patchloop - model-proposed code changes, planned, patched, sandbox-tested
//! and self-corrected.
//!
//! A request becomes a structured plan, the plan becomes a unified diff, and
//! the diff is tried in a sandbox against the project's test command. Failing
//! rounds are fed back to the generator until a round passes or the round
//! budget runs out. Passing patches can then be committed whole, per file or
//! per hunk.
//!
//! # Quick Start (CLI)
//!
//! ```bash
//! patchloop plan "add input validation to parse_port()"
//! patchloop verify plan_1a2b3c4d --max-rounds 3
//! patchloop apply plan_1a2b3c4d
//! ```
//!
//! # Library use
//!
//! The [`Workflow`] type exposes every operation the CLI runs:
//!
//! ```rust,no_run
//! use patchloop::{Config, Workflow};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = Config::builder()
//!     .repo_root("/work/repo")
//!     .test_command("pytest -q")
//!     .build()?;
//! let workflow = Workflow::from_config(config)?;
//! let created = workflow.create_plan("rename Client.get to Client.fetch")?;
//! let outcome = workflow.verify(&created.plan_id, Some(true), Some(3))?;
//! println!("{}", outcome.status);
//! # Ok(())
//! # }
//! ```

pub mod cli;

pub use patchloop_config::{Config, ConfigBuilder};
pub use patchloop_engine::{
    ApplyOutcome, CreatePlanOutcome, FileHunks, HunkInfo, ImplementOutcome, RevertOutcome,
    VerifyOutcome, Workflow,
};
pub use patchloop_store::{PlanRecord, PlanStore, PlanSummary};
pub use patchloop_utils::types::{PlanDocument, PlanId, SandboxResult, TestOutcome};
pub use patchloop_utils::{ExitCode, PatchloopError};
