//! Unified diff model for patchloop.
//!
//! [`parse`] is tolerant: it recovers what it can from model-written diffs and
//! records [`Diagnostic`]s for everything it skipped. [`parse_strict`] turns
//! any such diagnostic into an error. [`Patch::to_text`],
//! [`Patch::select_files`] and [`Patch::select_hunks`] rebuild minimal valid
//! diffs with line counts recomputed from the hunk bodies.

mod model;
mod parse;
mod serialize;

pub use model::{ChangeKind, Diagnostic, DiagnosticKind, FileDiff, Hunk, HunkLine, Patch};
pub use parse::{PatchParseError, UNKNOWN_PATH, parse, parse_strict};
