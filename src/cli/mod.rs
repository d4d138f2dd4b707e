//! Command-line interface for patchloop
//!
//! - `args`: clap definitions
//! - `run`: entry point, configuration and dispatch
//! - `commands`: command implementations and output rendering

pub mod args;
mod commands;
mod run;

pub use args::{Cli, Commands, HunkSpec, hunk_selection, parse_hunk_spec};
pub use run::run;
