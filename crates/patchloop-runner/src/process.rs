use patchloop_utils::error::RunnerError;
use std::time::Duration;

use crate::CommandSpec;

/// Captured result of one process execution.
///
/// A timed-out execution is still an `Ok` value: `timed_out` is set and the
/// buffers hold whatever the process wrote before it was killed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// `None` if terminated by a signal
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl ProcessOutput {
    #[must_use]
    pub fn new(stdout: Vec<u8>, stderr: Vec<u8>, exit_code: Option<i32>, timed_out: bool) -> Self {
        Self {
            stdout,
            stderr,
            exit_code,
            timed_out,
        }
    }

    /// Convenience for scripted runners: a completed process with text output.
    #[must_use]
    pub fn completed(exit_code: i32, stdout: &str, stderr: &str) -> Self {
        Self::new(
            stdout.as_bytes().to_vec(),
            stderr.as_bytes().to_vec(),
            Some(exit_code),
            false,
        )
    }

    #[must_use]
    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    #[must_use]
    pub fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Exit code 0 and not timed out
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }
}

/// Synchronous process execution with a hard timeout.
///
/// Implementations must use argv-style APIs only (no `sh -c`). On timeout the
/// whole process tree is killed and `Ok` is returned with `timed_out = true`;
/// `Err` is reserved for failures to start or supervise the process.
pub trait ProcessRunner: Send + Sync {
    fn run(&self, cmd: &CommandSpec, timeout: Duration) -> Result<ProcessOutput, RunnerError>;
}

impl<R: ProcessRunner + ?Sized> ProcessRunner for &R {
    fn run(&self, cmd: &CommandSpec, timeout: Duration) -> Result<ProcessOutput, RunnerError> {
        (**self).run(cmd, timeout)
    }
}

impl<R: ProcessRunner + ?Sized> ProcessRunner for std::sync::Arc<R> {
    fn run(&self, cmd: &CommandSpec, timeout: Duration) -> Result<ProcessOutput, RunnerError> {
        (**self).run(cmd, timeout)
    }
}
