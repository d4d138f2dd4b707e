use std::collections::BTreeMap;

use crate::model::Config;

impl Config {
    /// Effective configuration as `key -> (value, source)`, for `patchloop config`.
    #[must_use]
    pub fn effective_config(&self) -> BTreeMap<String, (String, String)> {
        let mut out = BTreeMap::new();
        let mut add = |key: &str, value: String| {
            out.insert(key.to_string(), (value, self.source_of(key).to_string()));
        };

        add("workflow.state_dir", self.workflow.state_dir.to_string());
        add("workflow.max_rounds", self.workflow.max_rounds.to_string());
        add("workflow.auto_fix", self.workflow.auto_fix.to_string());
        add(
            "workflow.implement_on_create",
            self.workflow.implement_on_create.to_string(),
        );
        add(
            "workflow.lock_ttl_seconds",
            self.workflow.lock_ttl_seconds.to_string(),
        );
        add("tests.command", self.tests.command.clone());
        add("tests.timeout_secs", self.tests.timeout_secs.to_string());
        add(
            "checks",
            self.checks
                .iter()
                .map(|(name, cmd)| format!("{name}={cmd}"))
                .collect::<Vec<_>>()
                .join(", "),
        );
        add("sandbox.branch_prefix", self.sandbox.branch_prefix.clone());
        add("sandbox.copy_excludes", self.sandbox.copy_excludes.join(", "));
        add("git.author_name", self.git.author_name.clone());
        add("git.author_email", self.git.author_email.clone());
        add("git.commit_message", self.git.commit_message.clone());
        add("llm.provider", self.llm.provider.clone());
        add("llm.model", self.llm.model.clone());
        add("llm.base_url", self.llm.base_url.clone());
        add("llm.timeout_secs", self.llm.timeout_secs.to_string());
        add("llm.command", self.llm.command.join(" "));
        add(
            "llm.context_file",
            self.llm
                .context_file
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
        );

        out
    }
}

#[cfg(test)]
mod tests {
    use crate::Config;

    #[test]
    fn test_effective_config_reports_sources() {
        let config = Config::builder().max_rounds(4).build().unwrap();
        let effective = config.effective_config();

        assert_eq!(
            effective.get("workflow.max_rounds"),
            Some(&("4".to_string(), "programmatic".to_string()))
        );
        assert_eq!(
            effective.get("tests.command"),
            Some(&("pytest -q".to_string(), "default".to_string()))
        );
        assert!(effective.contains_key("llm.base_url"));
    }
}
