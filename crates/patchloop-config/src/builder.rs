use camino::Utf8PathBuf;
use patchloop_utils::error::ConfigError;
use std::collections::{BTreeMap, HashMap};

use crate::model::{
    Config, ConfigSource, GitConfig, LlmConfig, SandboxConfig, TestsConfig, WorkflowConfig,
};

impl Config {
    /// Programmatic configuration without file discovery.
    ///
    /// ```rust
    /// use patchloop_config::Config;
    ///
    /// let config = Config::builder()
    ///     .repo_root("/work/repo")
    ///     .test_command("pytest -q tests/unit")
    ///     .max_rounds(2)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.state_dir(), "/work/repo/.patchloop");
    /// ```
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

/// Fluent builder for [`Config`].
///
/// Values set here are attributed to [`ConfigSource::Programmatic`].
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    repo_root: Utf8PathBuf,
    workflow: WorkflowConfig,
    tests: TestsConfig,
    checks: BTreeMap<String, String>,
    sandbox: SandboxConfig,
    git: GitConfig,
    llm: LlmConfig,
    touched: Vec<&'static str>,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            repo_root: Utf8PathBuf::from("."),
            workflow: WorkflowConfig::default(),
            tests: TestsConfig::default(),
            checks: BTreeMap::new(),
            sandbox: SandboxConfig::default(),
            git: GitConfig::default(),
            llm: LlmConfig::default(),
            touched: Vec::new(),
        }
    }

    fn mark(mut self, key: &'static str) -> Self {
        self.touched.push(key);
        self
    }

    #[must_use]
    pub fn repo_root(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.repo_root = path.into();
        self
    }

    #[must_use]
    pub fn state_dir(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.workflow.state_dir = path.into();
        self.mark("workflow.state_dir")
    }

    #[must_use]
    pub fn max_rounds(mut self, rounds: u32) -> Self {
        self.workflow.max_rounds = rounds;
        self.mark("workflow.max_rounds")
    }

    #[must_use]
    pub fn auto_fix(mut self, enabled: bool) -> Self {
        self.workflow.auto_fix = enabled;
        self.mark("workflow.auto_fix")
    }

    #[must_use]
    pub fn implement_on_create(mut self, enabled: bool) -> Self {
        self.workflow.implement_on_create = enabled;
        self.mark("workflow.implement_on_create")
    }

    #[must_use]
    pub fn lock_ttl_seconds(mut self, seconds: u64) -> Self {
        self.workflow.lock_ttl_seconds = seconds;
        self.mark("workflow.lock_ttl_seconds")
    }

    #[must_use]
    pub fn test_command(mut self, command: impl Into<String>) -> Self {
        self.tests.command = command.into();
        self.mark("tests.command")
    }

    #[must_use]
    pub fn test_timeout_secs(mut self, seconds: u64) -> Self {
        self.tests.timeout_secs = seconds;
        self.mark("tests.timeout_secs")
    }

    /// Add a named extra check
    #[must_use]
    pub fn check(mut self, name: impl Into<String>, command: impl Into<String>) -> Self {
        self.checks.insert(name.into(), command.into());
        self.mark("checks")
    }

    #[must_use]
    pub fn branch_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.sandbox.branch_prefix = prefix.into();
        self.mark("sandbox.branch_prefix")
    }

    #[must_use]
    pub fn copy_excludes<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sandbox.copy_excludes = patterns.into_iter().map(Into::into).collect();
        self.mark("sandbox.copy_excludes")
    }

    #[must_use]
    pub fn llm_provider(mut self, provider: impl Into<String>) -> Self {
        self.llm.provider = provider.into();
        self.mark("llm.provider")
    }

    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.llm.model = model.into();
        self.mark("llm.model")
    }

    #[must_use]
    pub fn llm_command<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.llm.command = argv.into_iter().map(Into::into).collect();
        self.mark("llm.command")
    }

    #[must_use]
    pub fn context_file(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.llm.context_file = Some(path.into());
        self.mark("llm.context_file")
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        let source_attribution: HashMap<String, ConfigSource> = self
            .touched
            .iter()
            .map(|k| ((*k).to_string(), ConfigSource::Programmatic))
            .collect();
        let config = Config {
            repo_root: self.repo_root,
            config_path: None,
            workflow: self.workflow,
            tests: self.tests,
            checks: self.checks,
            sandbox: self.sandbox,
            git: self.git,
            llm: self.llm,
            source_attribution,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_sets_values_and_attribution() {
        let config = Config::builder()
            .repo_root("/repo")
            .state_dir("/var/state")
            .auto_fix(false)
            .check("types", "mypy .")
            .build()
            .unwrap();

        assert_eq!(config.state_dir(), "/var/state");
        assert!(!config.workflow.auto_fix);
        assert_eq!(config.source_of("workflow.auto_fix"), ConfigSource::Programmatic);
        assert_eq!(config.source_of("tests.command"), ConfigSource::Default);
        assert_eq!(config.checks.len(), 1);
    }
}
