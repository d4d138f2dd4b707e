//! CLI entry point and dispatch.
//!
//! `run()` owns all terminal output, errors included; `main` only turns the
//! returned [`ExitCode`] into a process exit.

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use patchloop_config::{CliArgs, Config};
use patchloop_engine::{Git, Workflow};
use patchloop_runner::NativeRunner;
use patchloop_utils::error::{ConfigError, UserFriendlyError};
use patchloop_utils::logging::init_tracing;
use patchloop_utils::{ExitCode, PatchloopError};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::args::{Cli, Commands};
use super::commands::{self, Output};

pub fn run() -> Result<(), ExitCode> {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.verbose) {
        eprintln!("Warning: failed to initialize logging: {e}");
    }

    let operation = cli.command.name();
    let result = execute(cli);

    match result {
        Ok(code) if code == ExitCode::SUCCESS => Ok(()),
        Ok(code) => Err(code),
        Err(error) => Err(report_error(&error, operation)),
    }
}

fn execute(cli: Cli) -> Result<ExitCode> {
    let repo_root = resolve_repo_root(cli.repo.as_deref())?;
    let cli_args = CliArgs {
        config_path: cli.config.as_deref().map(utf8).transpose()?,
        state_dir: cli.state_dir.as_deref().map(utf8).transpose()?,
        test_command: cli.test_cmd.clone(),
        model: cli.model.clone(),
    };
    let config = Config::discover_from(&repo_root, &cli_args)?;
    debug!(repo_root = %config.repo_root, config = ?config.config_path, "Configuration loaded");

    let out = Output::new(cli.json);
    match cli.command {
        Commands::Config => commands::show_config(&config, &out),
        command => {
            let workflow = Workflow::from_config(config)?;
            dispatch(&workflow, command, &out)
        }
    }
}

fn dispatch(workflow: &Workflow, command: Commands, out: &Output) -> Result<ExitCode> {
    match command {
        Commands::Plan { request } => commands::plan(workflow, &request, out),
        Commands::Implement { id, feedback } => {
            commands::implement(workflow, &id, feedback.as_deref(), out)
        }
        Commands::Hunks { id } => commands::hunks(workflow, &id, out),
        Commands::Apply { id, files, hunks } => commands::apply(workflow, &id, &files, &hunks, out),
        Commands::Sandbox { id } => commands::sandbox(workflow, &id, out),
        Commands::Verify {
            id,
            no_auto_fix,
            max_rounds,
        } => commands::verify(workflow, &id, no_auto_fix.then_some(false), max_rounds, out),
        Commands::Revert { sha } => commands::revert(workflow, &sha, out),
        Commands::Show { id } => commands::show(workflow, &id, out),
        Commands::List => commands::list(workflow, out),
        Commands::Config => commands::show_config(workflow.config(), out),
    }
}

/// `--repo`, else the current directory, widened to its git top level.
fn resolve_repo_root(repo: Option<&Path>) -> Result<Utf8PathBuf> {
    let start: PathBuf = match repo {
        Some(path) => path.to_path_buf(),
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    if !start.is_dir() {
        return Err(PatchloopError::InvalidArgument {
            name: "--repo".to_string(),
            reason: format!("{} is not a directory", start.display()),
        }
        .into());
    }

    let runner = NativeRunner::new();
    let root = Git::new(&runner, &start).toplevel().unwrap_or(start);
    utf8(&root)
}

fn utf8(path: &Path) -> Result<Utf8PathBuf> {
    Utf8Path::from_path(path)
        .map(Utf8Path::to_path_buf)
        .ok_or_else(|| anyhow::anyhow!("Path is not valid UTF-8: {}", path.display()))
}

/// Print an error report and pick the exit code.
fn report_error(error: &anyhow::Error, operation: &str) -> ExitCode {
    if let Some(err) = error.downcast_ref::<PatchloopError>() {
        eprintln!("✗ {operation} failed [{}]", err.category());
        eprintln!("{}", err.display_for_user());
        return err.to_exit_code();
    }
    if let Some(err) = error.downcast_ref::<ConfigError>() {
        eprintln!("✗ {operation} failed [Configuration]");
        eprintln!("Error: {err}");
        eprintln!("\n  Run `patchloop config` to see effective values");
        return ExitCode::CLI_ARGS;
    }

    eprintln!("✗ Unexpected error: {error:#}");
    eprintln!("\n  General troubleshooting:");
    eprintln!("    - Run with --verbose for more detailed output");
    eprintln!("    - Check that the repository and state directory are writable");
    ExitCode::INTERNAL
}
