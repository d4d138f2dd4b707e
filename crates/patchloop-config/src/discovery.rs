use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use patchloop_utils::error::ConfigError;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

use crate::model::{
    CONFIG_DIR_NAME, CliArgs, Config, ConfigSource, GitConfig, LlmConfig, SandboxConfig,
    TestsConfig, WorkflowConfig,
};

/// On-disk shape of `config.toml`; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlConfig {
    workflow: Option<TomlWorkflow>,
    tests: Option<TomlTests>,
    checks: Option<BTreeMap<String, String>>,
    sandbox: Option<TomlSandbox>,
    git: Option<TomlGit>,
    llm: Option<TomlLlm>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlWorkflow {
    state_dir: Option<Utf8PathBuf>,
    max_rounds: Option<u32>,
    auto_fix: Option<bool>,
    implement_on_create: Option<bool>,
    lock_ttl_seconds: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlTests {
    command: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlSandbox {
    branch_prefix: Option<String>,
    copy_excludes: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlGit {
    author_name: Option<String>,
    author_email: Option<String>,
    commit_message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlLlm {
    provider: Option<String>,
    model: Option<String>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
    command: Option<Vec<String>>,
    context_file: Option<Utf8PathBuf>,
}

/// Records which layer set each key while values are overlaid.
struct Layer<'a> {
    source: ConfigSource,
    attribution: &'a mut HashMap<String, ConfigSource>,
}

impl Layer<'_> {
    fn set<T>(&mut self, slot: &mut T, value: Option<T>, key: &str) {
        if let Some(value) = value {
            *slot = value;
            self.attribution.insert(key.to_string(), self.source.clone());
        }
    }
}

impl Config {
    /// Discover configuration starting from the current directory.
    pub fn discover(cli_args: &CliArgs) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to get current directory")?;
        let cwd = Utf8PathBuf::from_path_buf(cwd)
            .map_err(|p| anyhow::anyhow!("Current directory is not UTF-8: {}", p.display()))?;
        Self::discover_from(&cwd, cli_args)
    }

    /// Discover configuration for the repository at `repo_root`.
    ///
    /// Precedence: CLI > config file > defaults.
    pub fn discover_from(repo_root: &Utf8Path, cli_args: &CliArgs) -> Result<Self> {
        let mut workflow = WorkflowConfig::default();
        let mut tests = TestsConfig::default();
        let mut checks = BTreeMap::new();
        let mut sandbox = SandboxConfig::default();
        let mut git = GitConfig::default();
        let mut llm = LlmConfig::default();
        let mut attribution = HashMap::new();

        let config_path = match &cli_args.config_path {
            Some(explicit) => {
                if !explicit.is_file() {
                    return Err(ConfigError::NotFound {
                        path: explicit.to_string(),
                    }
                    .into());
                }
                Some(explicit.clone())
            }
            None => Self::discover_config_file_from(repo_root)?,
        };

        if let Some(path) = &config_path {
            let file = Self::load_config_file(path)?;
            tracing::debug!(path = %path, "Loaded config file");
            let mut layer = Layer {
                source: ConfigSource::File(path.clone()),
                attribution: &mut attribution,
            };

            if let Some(w) = file.workflow {
                layer.set(&mut workflow.state_dir, w.state_dir, "workflow.state_dir");
                layer.set(&mut workflow.max_rounds, w.max_rounds, "workflow.max_rounds");
                layer.set(&mut workflow.auto_fix, w.auto_fix, "workflow.auto_fix");
                layer.set(
                    &mut workflow.implement_on_create,
                    w.implement_on_create,
                    "workflow.implement_on_create",
                );
                layer.set(
                    &mut workflow.lock_ttl_seconds,
                    w.lock_ttl_seconds,
                    "workflow.lock_ttl_seconds",
                );
            }
            if let Some(t) = file.tests {
                layer.set(&mut tests.command, t.command, "tests.command");
                layer.set(&mut tests.timeout_secs, t.timeout_secs, "tests.timeout_secs");
            }
            layer.set(&mut checks, file.checks, "checks");
            if let Some(s) = file.sandbox {
                layer.set(&mut sandbox.branch_prefix, s.branch_prefix, "sandbox.branch_prefix");
                layer.set(&mut sandbox.copy_excludes, s.copy_excludes, "sandbox.copy_excludes");
            }
            if let Some(g) = file.git {
                layer.set(&mut git.author_name, g.author_name, "git.author_name");
                layer.set(&mut git.author_email, g.author_email, "git.author_email");
                layer.set(&mut git.commit_message, g.commit_message, "git.commit_message");
            }
            if let Some(l) = file.llm {
                layer.set(&mut llm.provider, l.provider, "llm.provider");
                layer.set(&mut llm.model, l.model, "llm.model");
                layer.set(&mut llm.base_url, l.base_url, "llm.base_url");
                layer.set(&mut llm.timeout_secs, l.timeout_secs, "llm.timeout_secs");
                layer.set(&mut llm.command, l.command, "llm.command");
                layer.set(&mut llm.context_file, l.context_file.map(Some), "llm.context_file");
            }
        }

        let mut cli = Layer {
            source: ConfigSource::Cli,
            attribution: &mut attribution,
        };
        cli.set(
            &mut workflow.state_dir,
            cli_args.state_dir.clone(),
            "workflow.state_dir",
        );
        cli.set(&mut tests.command, cli_args.test_command.clone(), "tests.command");
        cli.set(&mut llm.model, cli_args.model.clone(), "llm.model");

        let config = Self {
            repo_root: repo_root.to_path_buf(),
            config_path,
            workflow,
            tests,
            checks,
            sandbox,
            git,
            llm,
            source_attribution: attribution,
        };
        config.validate()?;
        Ok(config)
    }

    /// Walk upward from `start_dir` looking for `.patchloop/config.toml`,
    /// stopping at a repository root marker or the filesystem root.
    pub fn discover_config_file_from(start_dir: &Utf8Path) -> Result<Option<Utf8PathBuf>> {
        let mut current = Some(start_dir);
        while let Some(dir) = current {
            let candidate = dir.join(CONFIG_DIR_NAME).join("config.toml");
            if candidate.is_file() {
                return Ok(Some(candidate));
            }
            if [".git", ".hg", ".svn"].iter().any(|m| dir.join(m).exists()) {
                break;
            }
            current = dir.parent();
        }
        Ok(None)
    }

    fn load_config_file(path: &Utf8Path) -> Result<TomlConfig> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let parsed = toml::from_str(&content)
            .map_err(|e| ConfigError::InvalidFile(format!("{path}: {e}")))?;
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn utf8_root(temp: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap()
    }

    fn write_config(root: &Utf8Path, body: &str) -> Utf8PathBuf {
        let dir = root.join(CONFIG_DIR_NAME);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_defaults_without_config_file() {
        let temp = TempDir::new().unwrap();
        let root = utf8_root(&temp);
        std::fs::create_dir(root.join(".git")).unwrap();

        let config = Config::discover_from(&root, &CliArgs::default()).unwrap();

        assert!(config.config_path.is_none());
        assert_eq!(config.workflow.max_rounds, 3);
        assert_eq!(config.tests.command, "pytest -q");
        assert_eq!(config.state_dir(), root.join(".patchloop"));
        assert_eq!(config.source_of("tests.command"), ConfigSource::Default);
    }

    #[test]
    fn test_file_overrides_defaults_and_cli_overrides_file() {
        let temp = TempDir::new().unwrap();
        let root = utf8_root(&temp);
        let path = write_config(
            &root,
            r#"
[workflow]
max_rounds = 5
auto_fix = false

[tests]
command = "cargo test"
timeout_secs = 60

[checks]
lint = "ruff check ."

[llm]
provider = "command"
command = ["my-llm", "--json"]
"#,
        );

        let cli = CliArgs {
            test_command: Some("make test".into()),
            ..CliArgs::default()
        };
        let config = Config::discover_from(&root, &cli).unwrap();

        assert_eq!(config.config_path.as_ref(), Some(&path));
        assert_eq!(config.workflow.max_rounds, 5);
        assert!(!config.workflow.auto_fix);
        assert_eq!(config.tests.command, "make test");
        assert_eq!(config.tests.timeout_secs, 60);
        assert_eq!(config.checks.get("lint").map(String::as_str), Some("ruff check ."));
        assert_eq!(config.llm.command, vec!["my-llm", "--json"]);

        assert_eq!(config.source_of("tests.command"), ConfigSource::Cli);
        assert_eq!(config.source_of("workflow.max_rounds"), ConfigSource::File(path));
        assert_eq!(config.source_of("workflow.lock_ttl_seconds"), ConfigSource::Default);
    }

    #[test]
    fn test_discovery_walks_up_but_stops_at_repo_root() {
        let temp = TempDir::new().unwrap();
        let outer = utf8_root(&temp);
        write_config(&outer, "[tests]\ncommand = \"outer\"\n");

        let repo = outer.join("repo");
        let nested = repo.join("pkg").join("sub");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::create_dir(repo.join(".git")).unwrap();

        assert_eq!(Config::discover_config_file_from(&nested).unwrap(), None);

        let inner = write_config(&repo, "[tests]\ncommand = \"inner\"\n");
        assert_eq!(
            Config::discover_config_file_from(&nested).unwrap(),
            Some(inner)
        );
    }

    #[test]
    fn test_unknown_keys_and_bad_values_are_rejected() {
        let temp = TempDir::new().unwrap();
        let root = utf8_root(&temp);

        write_config(&root, "[workflow]\nmax_roundz = 2\n");
        let err = Config::discover_from(&root, &CliArgs::default()).unwrap_err();
        assert!(err.downcast_ref::<ConfigError>().is_some(), "{err:#}");

        write_config(&root, "[workflow]\nmax_rounds = 0\n");
        let err = Config::discover_from(&root, &CliArgs::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::InvalidValue { key, .. }) if key == "workflow.max_rounds"
        ));
    }

    #[test]
    fn test_explicit_missing_config_is_an_error() {
        let temp = TempDir::new().unwrap();
        let root = utf8_root(&temp);
        let cli = CliArgs {
            config_path: Some(root.join("nope.toml")),
            ..CliArgs::default()
        };
        let err = Config::discover_from(&root, &cli).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::NotFound { .. })
        ));
    }
}
