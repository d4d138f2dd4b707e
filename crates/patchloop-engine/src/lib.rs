//! Patch application, sandboxed verification and the plan workflow.
//!
//! The entry point is [`Workflow`]; the lower layers are public so they can be
//! driven on their own:
//!
//! - [`PatchApplier`] applies diff text through an ordered chain of `git apply`
//!   strategies.
//! - [`SandboxExecutor`] tries a patch on a throwaway branch or a disposable
//!   copy and runs the test command there.
//! - [`validate_patch`] checks generator output before it becomes an attempt.

pub mod apply;
pub mod git;
pub mod implementer;
pub mod sandbox;
pub mod verifier;
pub mod workflow;

#[cfg(test)]
mod test_support;

pub use apply::{PatchApplier, StrategyOutcome, normalize_patch_text};
pub use git::Git;
pub use implementer::{Implementer, ValidatedPatch, strip_code_fence, validate_patch};
pub use sandbox::{SandboxExecutor, SandboxRequest, copy_tree, run_test_command};
pub use verifier::{build_feedback, round_summary};
pub use workflow::{
    ApplyOutcome, CreatePlanOutcome, FileHunks, HunkInfo, ImplementOutcome, RevertOutcome,
    VerifyOutcome, Workflow,
};
