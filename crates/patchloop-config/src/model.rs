use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

/// Directory (under the repository root) holding config and state
pub const CONFIG_DIR_NAME: &str = ".patchloop";

/// Where a configuration value came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    /// CLI flag (highest precedence)
    Cli,
    /// Config file
    File(Utf8PathBuf),
    /// `Config::builder()`
    Programmatic,
    /// Built-in default
    Default,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cli => f.write_str("cli"),
            Self::File(path) => write!(f, "config ({path})"),
            Self::Programmatic => f.write_str("programmatic"),
            Self::Default => f.write_str("default"),
        }
    }
}

/// Overrides supplied on the command line.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config_path: Option<Utf8PathBuf>,
    pub state_dir: Option<Utf8PathBuf>,
    pub test_command: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Relative paths resolve against the repository root
    pub state_dir: Utf8PathBuf,
    pub max_rounds: u32,
    pub auto_fix: bool,
    pub implement_on_create: bool,
    pub lock_ttl_seconds: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            state_dir: Utf8PathBuf::from(CONFIG_DIR_NAME),
            max_rounds: 3,
            auto_fix: true,
            implement_on_create: true,
            lock_ttl_seconds: 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestsConfig {
    pub command: String,
    pub timeout_secs: u64,
}

impl Default for TestsConfig {
    fn default() -> Self {
        Self {
            command: "pytest -q".to_string(),
            timeout_secs: 300,
        }
    }
}

#[must_use]
pub fn default_copy_excludes() -> Vec<String> {
    [
        ".git",
        ".hg",
        ".svn",
        ".venv*",
        "venv",
        "node_modules",
        "__pycache__",
        "site-packages",
        "target",
        CONFIG_DIR_NAME,
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxConfig {
    pub branch_prefix: String,
    /// Glob patterns matched against each path component
    pub copy_excludes: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            branch_prefix: "patchloop-sandbox-".to_string(),
            copy_excludes: default_copy_excludes(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitConfig {
    pub author_name: String,
    pub author_email: String,
    pub commit_message: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            author_name: "ai-agent".to_string(),
            author_email: "ai-agent@local".to_string(),
            commit_message: "feat(agent): applied changes by agent".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmConfig {
    /// `ollama` or `command`
    pub provider: String,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
    /// argv for the `command` provider
    pub command: Vec<String>,
    /// Static context handed to the planner and implementer
    pub context_file: Option<Utf8PathBuf>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            model: "qwen2.5-coder:3b".to_string(),
            base_url: "http://localhost:11434".to_string(),
            timeout_secs: 600,
            command: Vec::new(),
            context_file: None,
        }
    }
}

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub repo_root: Utf8PathBuf,
    pub config_path: Option<Utf8PathBuf>,
    pub workflow: WorkflowConfig,
    pub tests: TestsConfig,
    /// Extra static checks, `name -> command line`
    pub checks: BTreeMap<String, String>,
    pub sandbox: SandboxConfig,
    pub git: GitConfig,
    pub llm: LlmConfig,
    pub source_attribution: HashMap<String, ConfigSource>,
}

impl Config {
    /// State directory, absolute when `repo_root` is
    #[must_use]
    pub fn state_dir(&self) -> Utf8PathBuf {
        resolve(&self.repo_root, &self.workflow.state_dir)
    }

    #[must_use]
    pub fn plans_dir(&self) -> Utf8PathBuf {
        self.state_dir().join("plans")
    }

    #[must_use]
    pub fn locks_dir(&self) -> Utf8PathBuf {
        self.state_dir().join("locks")
    }

    #[must_use]
    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.tests.timeout_secs)
    }

    #[must_use]
    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm.timeout_secs)
    }

    #[must_use]
    pub fn context_file(&self) -> Option<Utf8PathBuf> {
        self.llm
            .context_file
            .as_ref()
            .map(|p| resolve(&self.repo_root, p))
    }

    #[must_use]
    pub fn source_of(&self, key: &str) -> ConfigSource {
        self.source_attribution
            .get(key)
            .cloned()
            .unwrap_or(ConfigSource::Default)
    }
}

fn resolve(root: &Utf8Path, path: &Utf8Path) -> Utf8PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
