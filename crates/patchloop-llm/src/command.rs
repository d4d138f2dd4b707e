//! Generator backed by an external command.
//!
//! The prompt is written to the command's stdin and the response is read from
//! stdout. This covers local CLIs (`llm`, `ollama run <model>`, wrappers
//! around hosted APIs) without patchloop knowing their protocols.

use camino::Utf8PathBuf;
use patchloop_runner::{CommandSpec, ProcessRunner};
use patchloop_utils::error::LlmError;
use std::time::Duration;
use tracing::debug;

use crate::types::Generator;

/// Runs a configured argv with the prompt on stdin.
#[derive(Debug)]
pub struct CommandGenerator<R> {
    argv: Vec<String>,
    runner: R,
    timeout: Duration,
    cwd: Option<Utf8PathBuf>,
}

impl<R: ProcessRunner> CommandGenerator<R> {
    /// # Errors
    ///
    /// Returns `LlmError::Misconfiguration` when `argv` is empty.
    pub fn new(argv: Vec<String>, runner: R, timeout: Duration) -> Result<Self, LlmError> {
        if argv.first().is_none_or(|p| p.trim().is_empty()) {
            return Err(LlmError::Misconfiguration(
                "llm.command must name a program".to_string(),
            ));
        }
        Ok(Self {
            argv,
            runner,
            timeout,
            cwd: None,
        })
    }

    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<Utf8PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    fn render_prompt(system: &str, user: &str) -> String {
        format!("{system}\n\n{user}\n")
    }
}

impl<R: ProcessRunner> Generator for CommandGenerator<R> {
    fn generate(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let mut spec = CommandSpec::from_argv(self.argv.as_slice())
            .map_err(|e| LlmError::Misconfiguration(e.to_string()))?
            .stdin(Self::render_prompt(system, user));
        if let Some(cwd) = &self.cwd {
            spec = spec.cwd(cwd.as_std_path());
        }

        debug!(command = %spec.display(), timeout_secs = self.timeout.as_secs(), "Invoking command generator");
        let output = self
            .runner
            .run(&spec, self.timeout)
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        if output.timed_out {
            return Err(LlmError::Timeout {
                duration: self.timeout,
            });
        }
        if !output.success() {
            let stderr = output.stderr_string();
            return Err(LlmError::Transport(format!(
                "{} exited with {}: {}",
                spec.program_name(),
                output
                    .exit_code
                    .map_or_else(|| "a signal".to_string(), |c| format!("code {c}")),
                stderr.trim()
            )));
        }
        Ok(output.stdout_string().trim().to_string())
    }

    fn name(&self) -> &'static str {
        "command"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use patchloop_runner::{NativeRunner, ProcessOutput, ScriptedRunner};

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_empty_argv_is_rejected() {
        let err = CommandGenerator::new(Vec::new(), ScriptedRunner::new(), Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, LlmError::Misconfiguration(_)));
    }

    #[test]
    fn test_stdout_is_the_response() {
        let runner = ScriptedRunner::new().on(
            "my-llm",
            ProcessOutput::completed(0, "  diff --git a/x b/x\n", ""),
        );
        let generator =
            CommandGenerator::new(argv(&["my-llm", "--raw"]), &runner, Duration::from_secs(5))
                .unwrap();
        assert_eq!(generator.generate("sys", "usr").unwrap(), "diff --git a/x b/x");
        assert_eq!(runner.calls(), vec!["my-llm --raw"]);
    }

    #[test]
    fn test_failures_map_to_llm_errors() {
        let runner = ScriptedRunner::new()
            .on("crashy", ProcessOutput::completed(3, "", "model not loaded"))
            .on("slow", ProcessOutput::new(Vec::new(), Vec::new(), None, true))
            .on_spawn_failure("absent", "No such file or directory");

        let timeout = Duration::from_secs(2);
        let err = CommandGenerator::new(argv(&["crashy"]), &runner, timeout)
            .unwrap()
            .generate("s", "u")
            .unwrap_err();
        assert!(err.to_string().contains("model not loaded"));

        let err = CommandGenerator::new(argv(&["slow"]), &runner, timeout)
            .unwrap()
            .generate("s", "u")
            .unwrap_err();
        assert!(matches!(err, LlmError::Timeout { duration } if duration == timeout));

        let err = CommandGenerator::new(argv(&["absent"]), &runner, timeout)
            .unwrap()
            .generate("s", "u")
            .unwrap_err();
        assert!(matches!(err, LlmError::Transport(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_prompt_is_written_to_stdin() {
        if which::which("cat").is_err() {
            eprintln!("skipping: cat not on PATH");
            return;
        }
        let generator =
            CommandGenerator::new(argv(&["cat"]), NativeRunner::new(), Duration::from_secs(10))
                .unwrap();
        let echoed = generator.generate("SYSTEM", "USER").unwrap();
        assert_eq!(echoed, "SYSTEM\n\nUSER");
    }
}
