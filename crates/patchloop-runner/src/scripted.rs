//! Deterministic [`ProcessRunner`] for tests.

use patchloop_utils::error::RunnerError;
use std::sync::Mutex;
use std::time::Duration;

use crate::{CommandSpec, ProcessOutput, ProcessRunner};

#[derive(Debug, Clone)]
enum Response {
    Output(ProcessOutput),
    SpawnFailure(String),
}

#[derive(Debug)]
struct Rule {
    needle: String,
    response: Response,
}

/// Returns canned outputs for commands whose rendered command line contains
/// a registered substring. The first matching rule wins; unmatched commands
/// get the fallback (exit 0, empty output). Every call is recorded.
#[derive(Debug)]
pub struct ScriptedRunner {
    rules: Vec<Rule>,
    fallback: ProcessOutput,
    calls: Mutex<Vec<String>>,
}

impl Default for ScriptedRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedRunner {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            fallback: ProcessOutput::completed(0, "", ""),
            calls: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn on(mut self, needle: &str, output: ProcessOutput) -> Self {
        self.rules.push(Rule {
            needle: needle.to_string(),
            response: Response::Output(output),
        });
        self
    }

    #[must_use]
    pub fn on_spawn_failure(mut self, needle: &str, reason: &str) -> Self {
        self.rules.push(Rule {
            needle: needle.to_string(),
            response: Response::SpawnFailure(reason.to_string()),
        });
        self
    }

    #[must_use]
    pub fn with_fallback(mut self, output: ProcessOutput) -> Self {
        self.fallback = output;
        self
    }

    /// Rendered command lines of every call so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl ProcessRunner for ScriptedRunner {
    fn run(&self, cmd: &CommandSpec, _timeout: Duration) -> Result<ProcessOutput, RunnerError> {
        let line = cmd.display();
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(line.clone());
        }
        let response = self
            .rules
            .iter()
            .find(|rule| line.contains(&rule.needle))
            .map(|rule| rule.response.clone())
            .unwrap_or_else(|| Response::Output(self.fallback.clone()));
        match response {
            Response::Output(output) => Ok(output),
            Response::SpawnFailure(reason) => Err(RunnerError::SpawnFailed {
                program: cmd.program_name(),
                reason,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_matching_rule_wins_and_calls_are_recorded() {
        let runner = ScriptedRunner::new()
            .on("pytest", ProcessOutput::completed(1, "1 failed", ""))
            .on_spawn_failure("ruff", "not installed");

        let out = runner
            .run(&CommandSpec::new("pytest").arg("-q"), Duration::from_secs(1))
            .unwrap();
        assert_eq!(out.exit_code, Some(1));

        let err = runner
            .run(&CommandSpec::new("ruff").arg("check"), Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, RunnerError::SpawnFailed { .. }));

        let fallback = runner
            .run(&CommandSpec::new("true"), Duration::from_secs(1))
            .unwrap();
        assert!(fallback.success());

        assert_eq!(runner.calls(), vec!["pytest -q", "ruff check", "true"]);
    }
}
