use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Command;

use patchloop_utils::error::RunnerError;

/// Specification for a command to execute.
///
/// Arguments are discrete `OsString` elements; nothing is ever handed to a
/// shell. User-configured command lines (`tests.command`, `[checks]`) are
/// split with POSIX word rules by [`CommandSpec::from_command_line`].
///
/// ```rust
/// use patchloop_runner::CommandSpec;
///
/// let cmd = CommandSpec::new("git")
///     .args(["apply", "--whitespace=fix"])
///     .cwd("/tmp/repo");
/// assert_eq!(cmd.args.len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
    pub env: Option<HashMap<OsString, OsString>>,
    /// Bytes written to the child's stdin, which is closed afterwards
    pub stdin: Option<Vec<u8>>,
}

impl CommandSpec {
    #[must_use]
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Split a configured command line into program and arguments.
    ///
    /// ```rust
    /// use patchloop_runner::CommandSpec;
    ///
    /// let cmd = CommandSpec::from_command_line("pytest -q -k 'not slow'").unwrap();
    /// assert_eq!(cmd.program, "pytest");
    /// assert_eq!(cmd.args, vec!["-q", "-k", "not slow"]);
    /// ```
    pub fn from_command_line(line: &str) -> Result<Self, RunnerError> {
        let words = shell_words::split(line).map_err(|e| RunnerError::InvalidCommand {
            reason: format!("cannot split '{line}': {e}"),
        })?;
        Self::from_argv(&words)
    }

    /// Build from an already-split argv.
    pub fn from_argv<S: AsRef<str>>(argv: &[S]) -> Result<Self, RunnerError> {
        let (program, rest) = argv.split_first().ok_or_else(|| RunnerError::InvalidCommand {
            reason: "command is empty".to_string(),
        })?;
        Ok(Self::new(program.as_ref()).args(rest.iter().map(AsRef::as_ref)))
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Program name as text, for diagnostics
    #[must_use]
    pub fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    /// Arguments as lossy strings, for diagnostics and recorded attempts
    #[must_use]
    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    /// Shell-quoted rendering of the full command line, for logs
    #[must_use]
    pub fn display(&self) -> String {
        let mut words = vec![self.program_name()];
        words.extend(self.args_lossy());
        shell_words::join(words)
    }

    /// Build a `std::process::Command`. Stdio is left to the caller.
    #[must_use]
    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        if let Some(env) = &self.env {
            command.envs(env);
        }
        command
    }
}
