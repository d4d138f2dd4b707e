//! CLI argument definitions (clap derive).

use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// patchloop - plan, patch, sandbox-test and self-correct model-proposed changes
#[derive(Debug, Parser)]
#[command(name = "patchloop")]
#[command(about = "Turn a change request into a verified, committed patch")]
#[command(long_about = r#"
patchloop drives a change request through a planner and a patch generator,
validates the generated unified diff, tries it in a sandbox against your test
command and feeds failures back to the generator for a bounded number of rounds.

EXAMPLES:
  # Create a plan (and a first patch) from a request
  patchloop plan "add a --dry-run flag to the exporter"

  # Read the request from stdin
  echo "fix the off-by-one in paginate()" | patchloop plan -

  # Try the patch in a sandbox, self-correcting up to 3 rounds
  patchloop verify plan_1a2b3c4d --max-rounds 3

  # Commit only some hunks to the working tree
  patchloop hunks plan_1a2b3c4d
  patchloop apply plan_1a2b3c4d --hunk src/export.py:0,2

  # Undo an applied commit
  patchloop revert 3f2c1de

CONFIGURATION:
  Precedence: CLI flags > .patchloop/config.toml > defaults.
  The config file is discovered by searching upward from the repository root.
  Run `patchloop config` to see every effective value and where it came from.
"#)]
#[command(version)]
pub struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Repository to operate on (defaults to the enclosing git work tree)
    #[arg(long, global = true)]
    pub repo: Option<PathBuf>,

    /// Directory for plan records and locks
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// Test command run in the sandbox and after applying
    #[arg(long = "test-cmd", global = true)]
    pub test_cmd: Option<String>,

    /// Model used by the LLM backend
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create a plan from a natural-language request
    ///
    /// When `workflow.implement_on_create` is enabled (the default) a first
    /// patch is generated right away and printed as a preview.
    ///
    /// EXAMPLES:
    ///   patchloop plan "rename Config.load to Config.discover"
    ///   cat request.txt | patchloop plan -
    Plan {
        /// Request text, or `-` to read it from stdin
        request: String,
    },

    /// Generate a new implementation attempt for a plan
    Implement {
        /// Plan identifier
        id: String,

        /// Feedback for the generator (test failures, review notes)
        #[arg(long)]
        feedback: Option<String>,
    },

    /// List the hunks of a plan's current patch
    Hunks {
        /// Plan identifier
        id: String,
    },

    /// Apply a plan's patch to the working tree and commit it
    ///
    /// Without --file or --hunk the whole patch is applied.
    ///
    /// EXAMPLES:
    ///   patchloop apply plan_1a2b3c4d
    ///   patchloop apply plan_1a2b3c4d --file src/a.py --file src/b.py
    ///   patchloop apply plan_1a2b3c4d --hunk src/a.py:0,1 --hunk src/b.py:2
    Apply {
        /// Plan identifier
        id: String,

        /// Apply only this file (repeatable)
        #[arg(long = "file", conflicts_with = "hunks")]
        files: Vec<String>,

        /// Apply only these hunks, as PATH:INDEX[,INDEX...] (repeatable)
        #[arg(long = "hunk", value_parser = parse_hunk_spec)]
        hunks: Vec<HunkSpec>,
    },

    /// Try the current patch in a sandbox without committing anything
    Sandbox {
        /// Plan identifier
        id: String,
    },

    /// Sandbox-test the patch, auto-fixing failures within a round budget
    Verify {
        /// Plan identifier
        id: String,

        /// Stop after the first failing round
        #[arg(long)]
        no_auto_fix: bool,

        /// Maximum sandbox rounds for this call
        #[arg(long)]
        max_rounds: Option<u32>,
    },

    /// Revert a commit created by `apply`
    Revert {
        /// Commit to revert
        sha: String,
    },

    /// Show a plan record
    Show {
        /// Plan identifier
        id: String,
    },

    /// List stored plans
    List,

    /// Show the effective configuration and where each value came from
    Config,
}

impl Commands {
    /// Operation label used in error reports
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Plan { .. } => "plan",
            Self::Implement { .. } => "implement",
            Self::Hunks { .. } => "hunks",
            Self::Apply { .. } => "apply",
            Self::Sandbox { .. } => "sandbox",
            Self::Verify { .. } => "verify",
            Self::Revert { .. } => "revert",
            Self::Show { .. } => "show",
            Self::List => "list",
            Self::Config => "config",
        }
    }
}

/// One `--hunk PATH:INDEX[,INDEX...]` argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HunkSpec {
    pub path: String,
    pub indices: Vec<usize>,
}

/// Parse `PATH:I[,I...]`. The path may itself contain `:`; the last one splits.
pub fn parse_hunk_spec(raw: &str) -> Result<HunkSpec, String> {
    let (path, indices) = raw
        .rsplit_once(':')
        .ok_or_else(|| format!("expected PATH:INDEX[,INDEX...], got '{raw}'"))?;
    let path = path.trim();
    if path.is_empty() {
        return Err(format!("missing file path in '{raw}'"));
    }
    let indices = indices
        .split(',')
        .map(|i| {
            i.trim()
                .parse::<usize>()
                .map_err(|_| format!("'{i}' is not a hunk index in '{raw}'"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(HunkSpec {
        path: path.to_string(),
        indices,
    })
}

/// Merge repeated `--hunk` arguments into one selection per file.
#[must_use]
pub fn hunk_selection(specs: &[HunkSpec]) -> BTreeMap<String, Vec<usize>> {
    let mut selection: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for spec in specs {
        let entry = selection.entry(spec.path.clone()).or_default();
        entry.extend(&spec.indices);
        entry.sort_unstable();
        entry.dedup();
    }
    selection
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_hunk_spec() {
        assert_eq!(
            parse_hunk_spec("src/a.py:0,2").unwrap(),
            HunkSpec {
                path: "src/a.py".into(),
                indices: vec![0, 2],
            }
        );
        assert_eq!(parse_hunk_spec("C:/x.py:1").unwrap().path, "C:/x.py");
        assert!(parse_hunk_spec("src/a.py").is_err());
        assert!(parse_hunk_spec(":1").is_err());
        assert!(parse_hunk_spec("a.py:x").is_err());
        assert!(parse_hunk_spec("a.py:").is_err());
    }

    #[test]
    fn test_hunk_selection_merges_repeats() {
        let specs = vec![
            parse_hunk_spec("a.py:2").unwrap(),
            parse_hunk_spec("a.py:0,2").unwrap(),
            parse_hunk_spec("b.py:1").unwrap(),
        ];
        let selection = hunk_selection(&specs);
        assert_eq!(selection["a.py"], vec![0, 2]);
        assert_eq!(selection["b.py"], vec![1]);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "patchloop",
            "verify",
            "plan_0000abcd",
            "--no-auto-fix",
            "--max-rounds",
            "2",
            "--json",
            "--test-cmd",
            "pytest -x",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.test_cmd.as_deref(), Some("pytest -x"));
        match cli.command {
            Commands::Verify {
                no_auto_fix,
                max_rounds,
                ..
            } => {
                assert!(no_auto_fix);
                assert_eq!(max_rounds, Some(2));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_file_and_hunk_selection_conflict() {
        let result = Cli::try_parse_from([
            "patchloop", "apply", "plan_x", "--file", "a.py", "--hunk", "a.py:0",
        ]);
        assert!(result.is_err());
    }
}
