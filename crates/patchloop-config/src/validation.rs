use patchloop_utils::error::ConfigError;

use crate::model::Config;

const KNOWN_PROVIDERS: &[&str] = &["ollama", "command"];

fn invalid(key: &str, value: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.into(),
    }
}

fn check_range(key: &str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(invalid(
            key,
            format!("{value} is outside the allowed range {min}..={max}"),
        ));
    }
    Ok(())
}

impl Config {
    /// Validate resolved values.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        check_range("workflow.max_rounds", u64::from(self.workflow.max_rounds), 1, 20)?;
        check_range("workflow.lock_ttl_seconds", self.workflow.lock_ttl_seconds, 60, 86_400)?;
        check_range("tests.timeout_secs", self.tests.timeout_secs, 1, 7200)?;
        check_range("llm.timeout_secs", self.llm.timeout_secs, 1, 7200)?;

        if self.workflow.state_dir.as_str().trim().is_empty() {
            return Err(invalid("workflow.state_dir", "must not be empty"));
        }

        if self.tests.command.trim().is_empty() {
            return Err(invalid("tests.command", "must not be empty"));
        }

        for (name, command) in &self.checks {
            if command.trim().is_empty() {
                return Err(invalid(&format!("checks.{name}"), "must not be empty"));
            }
        }

        if self.sandbox.branch_prefix.trim().is_empty()
            || self.sandbox.branch_prefix.contains(char::is_whitespace)
        {
            return Err(invalid(
                "sandbox.branch_prefix",
                format!("'{}' is not a usable branch prefix", self.sandbox.branch_prefix),
            ));
        }

        if self.git.author_name.trim().is_empty() || self.git.author_email.trim().is_empty() {
            return Err(invalid("git.author_name", "author name and email are required"));
        }

        if !KNOWN_PROVIDERS.contains(&self.llm.provider.as_str()) {
            return Err(invalid(
                "llm.provider",
                format!(
                    "'{}' (expected one of: {})",
                    self.llm.provider,
                    KNOWN_PROVIDERS.join(", ")
                ),
            ));
        }

        if self.llm.provider == "command" && self.llm.command.is_empty() {
            return Err(invalid(
                "llm.command",
                "required when llm.provider = \"command\"",
            ));
        }

        if self.llm.provider == "ollama" && self.llm.model.trim().is_empty() {
            return Err(invalid("llm.model", "must not be empty"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::Config;
    use patchloop_utils::error::ConfigError;

    fn key_of(err: ConfigError) -> String {
        match err {
            ConfigError::InvalidValue { key, .. } => key,
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(Config::builder().build().is_ok());
    }

    #[test]
    fn test_ranges_are_enforced() {
        let err = Config::builder().max_rounds(21).build().unwrap_err();
        assert_eq!(key_of(err), "workflow.max_rounds");

        let err = Config::builder().test_timeout_secs(0).build().unwrap_err();
        assert_eq!(key_of(err), "tests.timeout_secs");

        let err = Config::builder().lock_ttl_seconds(5).build().unwrap_err();
        assert_eq!(key_of(err), "workflow.lock_ttl_seconds");
    }

    #[test]
    fn test_command_provider_requires_argv() {
        let err = Config::builder().llm_provider("command").build().unwrap_err();
        assert_eq!(key_of(err), "llm.command");

        let ok = Config::builder()
            .llm_provider("command")
            .llm_command(["my-llm"])
            .build();
        assert!(ok.is_ok());

        let err = Config::builder().llm_provider("openai").build().unwrap_err();
        assert_eq!(key_of(err), "llm.provider");
    }

    #[test]
    fn test_blank_commands_are_rejected() {
        let err = Config::builder().test_command("  ").build().unwrap_err();
        assert_eq!(key_of(err), "tests.command");

        let err = Config::builder().check("lint", "").build().unwrap_err();
        assert_eq!(key_of(err), "checks.lint");
    }
}
