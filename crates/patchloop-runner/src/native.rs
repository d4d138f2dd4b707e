use patchloop_utils::error::RunnerError;
use std::io::{Read, Write};
use std::process::Stdio;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::{CommandSpec, ProcessOutput, ProcessRunner};

/// How long to wait for pipes to drain once the child has exited or been killed
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Native process runner built on `std::process::Command`.
///
/// On Unix each child becomes the leader of a new process group, so a timeout
/// kills the test command together with everything it spawned.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeRunner;

impl NativeRunner {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

/// Bytes read from one child pipe so far, filled by a background thread.
struct PipeDrain {
    buffer: Arc<Mutex<Vec<u8>>>,
    handle: Option<JoinHandle<()>>,
}

impl PipeDrain {
    fn spawn<R: Read + Send + 'static>(pipe: Option<R>) -> Self {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let handle = pipe.map(|mut pipe| {
            let sink = Arc::clone(&buffer);
            thread::spawn(move || {
                let mut chunk = [0u8; 8192];
                loop {
                    match pipe.read(&mut chunk) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => match sink.lock() {
                            Ok(mut buf) => buf.extend_from_slice(&chunk[..n]),
                            Err(poisoned) => poisoned.into_inner().extend_from_slice(&chunk[..n]),
                        },
                    }
                }
            })
        });
        Self { buffer, handle }
    }

    /// Wait until `deadline` for EOF, then return whatever has been read.
    ///
    /// A reader still blocked at the deadline is left behind; it exits once
    /// the last holder of the pipe closes it.
    fn collect(mut self, deadline: Instant) -> Vec<u8> {
        if let Some(handle) = self.handle.take() {
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
        match self.buffer.lock() {
            Ok(buf) => buf.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ProcessRunner for NativeRunner {
    fn run(&self, cmd: &CommandSpec, timeout: Duration) -> Result<ProcessOutput, RunnerError> {
        let program = cmd.program_name();
        let mut command = cmd.to_command();
        command
            .stdin(if cmd.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        tracing::debug!(command = %cmd.display(), timeout_secs = timeout.as_secs(), "Spawning process");

        let mut child = command.spawn().map_err(|e| RunnerError::SpawnFailed {
            program: program.clone(),
            reason: e.to_string(),
        })?;
        let child_id = child.id();

        // Feed stdin from its own thread so a chatty child cannot deadlock us.
        if let (Some(mut pipe), Some(input)) = (child.stdin.take(), cmd.stdin.clone()) {
            thread::spawn(move || {
                let _ = pipe.write_all(&input);
            });
        }
        let stdout = PipeDrain::spawn(child.stdout.take());
        let stderr = PipeDrain::spawn(child.stderr.take());

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(child.wait());
        });

        let (status, timed_out) = match rx.recv_timeout(timeout) {
            Ok(Ok(status)) => (status.code(), false),
            Ok(Err(e)) => {
                return Err(RunnerError::WaitFailed {
                    program,
                    reason: e.to_string(),
                });
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    program = %program,
                    timeout_secs = timeout.as_secs(),
                    "Process timed out; killing process tree"
                );
                Self::terminate_tree(child_id);
                if rx.recv_timeout(DRAIN_GRACE).is_err() {
                    tracing::debug!(program = %program, "Killed process was not reaped within grace period");
                }
                (None, true)
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return Err(RunnerError::WaitFailed {
                    program,
                    reason: "process monitoring thread terminated unexpectedly".to_string(),
                });
            }
        };

        // A grandchild that escaped the group may keep the pipes open.
        let deadline = Instant::now() + DRAIN_GRACE;
        let stdout = stdout.collect(deadline);
        let stderr = stderr.collect(deadline);

        Ok(ProcessOutput::new(stdout, stderr, status, timed_out))
    }
}

impl NativeRunner {
    #[cfg(unix)]
    fn terminate_tree(pid: u32) {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        let Ok(raw) = i32::try_from(pid) else {
            return;
        };
        if let Err(e) = killpg(Pid::from_raw(raw), Signal::SIGKILL) {
            tracing::debug!(pid, error = %e, "killpg failed");
        }
    }

    #[cfg(windows)]
    fn terminate_tree(pid: u32) {
        use windows::Win32::Foundation::CloseHandle;
        use windows::Win32::System::Threading::{OpenProcess, PROCESS_TERMINATE, TerminateProcess};

        unsafe {
            if let Ok(handle) = OpenProcess(PROCESS_TERMINATE, false, pid) {
                let _ = TerminateProcess(handle, 1);
                let _ = CloseHandle(handle);
            }
        }
    }

    #[cfg(not(any(unix, windows)))]
    fn terminate_tree(_pid: u32) {}
}
