//! Shared building blocks for the patchloop workspace
//!
//! - `error`: error taxonomy, [`UserFriendlyError`](error::UserFriendlyError) reporting
//! - `exit_codes`: CLI exit code table
//! - `logging`: tracing subscriber setup and operation lifecycle events
//! - `atomic_write`: temp file + fsync + rename writes
//! - `types`: serializable records shared by the engine, store and CLI

pub mod atomic_write;
pub mod error;
pub mod exit_codes;
pub mod logging;
pub mod types;

pub use error::PatchloopError;
pub use exit_codes::ExitCode;
