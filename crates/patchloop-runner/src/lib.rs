//! Process execution for patchloop.
//!
//! Every external program (git, test commands, checks, command-backed
//! generators) runs through [`ProcessRunner`] so callers get one timeout and
//! kill policy and tests can substitute a scripted runner.

pub mod command_spec;
pub mod native;
pub mod process;
#[cfg(any(test, feature = "test-utils"))]
pub mod scripted;

pub use command_spec::CommandSpec;
pub use native::NativeRunner;
pub use patchloop_utils::error::RunnerError;
pub use process::{ProcessOutput, ProcessRunner};
#[cfg(any(test, feature = "test-utils"))]
pub use scripted::ScriptedRunner;
