//! Per-plan advisory locking for patchloop
//!
//! Every mutating workflow operation holds a [`PlanLock`] for the plan it
//! touches, so two processes can never interleave read-modify-write cycles on
//! the same plan record. The lock is advisory: it coordinates patchloop
//! processes and is not a security boundary.
//!
//! Lock files live at `<lock_dir>/<plan_id>.lock` and contain a small JSON
//! [`LockInfo`] document describing the owner.

use camino::{Utf8Path, Utf8PathBuf};
use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::process;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Default age after which a lock is considered abandoned (1 hour)
pub const DEFAULT_LOCK_TTL_SECS: u64 = 3600;

const MAX_ACQUIRE_ATTEMPTS: u32 = 3;

/// Owner information written into the lock file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Process that holds the lock
    pub pid: u32,
    /// Seconds since the UNIX epoch when the lock was taken
    pub created_at: u64,
    /// Plan the lock protects
    pub plan_id: String,
    /// patchloop version that created the lock
    pub version: String,
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error(
        "Another operation is already running for plan '{plan_id}' (PID {pid}, started {held_for} ago)"
    )]
    ConcurrentOperation {
        plan_id: String,
        pid: u32,
        held_for: String,
    },

    #[error("Lock file is corrupted or invalid: {reason}")]
    CorruptedLock { reason: String },

    #[error("Failed to acquire lock: {reason}")]
    AcquisitionFailed { reason: String },

    #[error("Failed to release lock: {reason}")]
    ReleaseFailed { reason: String },

    #[error("IO error during lock operation: {0}")]
    Io(#[from] io::Error),
}

/// Exclusive lock on a single plan, released on drop.
pub struct PlanLock {
    lock_path: Utf8PathBuf,
    _fd_lock: Option<Box<RwLock<fs::File>>>,
    info: LockInfo,
}

impl PlanLock {
    /// Acquire the lock for `plan_id` inside `lock_dir`.
    ///
    /// Uses `create_new` so two racing processes cannot both succeed. An
    /// existing lock is reclaimed when its owner is no longer running or when
    /// it is older than `ttl_seconds`; otherwise acquisition fails with
    /// [`LockError::ConcurrentOperation`].
    pub fn acquire(
        lock_dir: &Utf8Path,
        plan_id: &str,
        ttl_seconds: Option<u64>,
    ) -> Result<Self, LockError> {
        fs::create_dir_all(lock_dir).map_err(|e| LockError::AcquisitionFailed {
            reason: format!("Failed to create lock directory {lock_dir}: {e}"),
        })?;

        let lock_path = Self::lock_path(lock_dir, plan_id);
        let ttl = ttl_seconds.unwrap_or(DEFAULT_LOCK_TTL_SECS);

        for attempt in 0..MAX_ACQUIRE_ATTEMPTS {
            let info = LockInfo {
                pid: process::id(),
                created_at: now_secs(),
                plan_id: plan_id.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            };

            match fs::OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&lock_path)
            {
                Ok(file) => return Self::finalize(lock_path, file, info),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    Self::check_existing(&lock_path, plan_id, ttl)?;
                    Self::remove_abandoned(&lock_path)?;
                    debug!(plan_id, attempt, "reclaimed abandoned plan lock");
                    std::thread::sleep(Duration::from_millis(10 * u64::from(attempt + 1)));
                }
                Err(e) => {
                    return Err(LockError::AcquisitionFailed {
                        reason: format!("Failed to create lock file {lock_path}: {e}"),
                    });
                }
            }
        }

        Err(LockError::AcquisitionFailed {
            reason: format!(
                "Gave up after {MAX_ACQUIRE_ATTEMPTS} attempts to lock plan '{plan_id}'"
            ),
        })
    }

    /// Read the owner of an existing lock, if any.
    pub fn read_info(lock_dir: &Utf8Path, plan_id: &str) -> Result<Option<LockInfo>, LockError> {
        let lock_path = Self::lock_path(lock_dir, plan_id);
        match fs::read_to_string(&lock_path) {
            Ok(content) => serde_json::from_str(&content)
                .map(Some)
                .map_err(|e| LockError::CorruptedLock {
                    reason: format!("Failed to parse {lock_path}: {e}"),
                }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LockError::Io(e)),
        }
    }

    /// Release the lock explicitly, reporting removal failures.
    pub fn release(mut self) -> Result<(), LockError> {
        self._fd_lock.take();
        match fs::remove_file(&self.lock_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LockError::ReleaseFailed {
                reason: format!("Failed to remove {}: {e}", self.lock_path),
            }),
        }
    }

    #[must_use]
    pub fn plan_id(&self) -> &str {
        &self.info.plan_id
    }

    #[must_use]
    pub const fn lock_info(&self) -> &LockInfo {
        &self.info
    }

    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.lock_path
    }

    fn lock_path(lock_dir: &Utf8Path, plan_id: &str) -> Utf8PathBuf {
        lock_dir.join(format!("{plan_id}.lock"))
    }

    fn finalize(lock_path: Utf8PathBuf, file: fs::File, info: LockInfo) -> Result<Self, LockError> {
        let json = serde_json::to_string_pretty(&info).map_err(|e| LockError::AcquisitionFailed {
            reason: format!("Failed to serialize lock info for plan '{}': {e}", info.plan_id),
        })?;

        let mut rw_lock = Box::new(RwLock::new(file));
        {
            let guard = rw_lock
                .try_write()
                .map_err(|_| LockError::ConcurrentOperation {
                    plan_id: info.plan_id.clone(),
                    pid: 0,
                    held_for: "unknown".to_string(),
                })?;
            let mut file_ref = &*guard;
            file_ref.write_all(json.as_bytes())?;
            file_ref.flush()?;
            file_ref.sync_all()?;
        }

        Ok(Self {
            lock_path,
            _fd_lock: Some(rw_lock),
            info,
        })
    }

    /// Returns `Ok(())` when the existing lock may be reclaimed.
    fn check_existing(lock_path: &Utf8Path, plan_id: &str, ttl_seconds: u64) -> Result<(), LockError> {
        let content = match fs::read_to_string(lock_path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(LockError::Io(e)),
        };

        // The owner may have created the file and not yet written it.
        if content.trim().is_empty() {
            return Err(LockError::ConcurrentOperation {
                plan_id: plan_id.to_string(),
                pid: 0,
                held_for: "0s".to_string(),
            });
        }

        let existing: LockInfo =
            serde_json::from_str(&content).map_err(|e| LockError::CorruptedLock {
                reason: format!("Failed to parse existing lock for plan '{plan_id}': {e}"),
            })?;

        let age = now_secs().saturating_sub(existing.created_at);
        if age > ttl_seconds {
            warn!(plan_id, pid = existing.pid, age_secs = age, "reclaiming expired plan lock");
            return Ok(());
        }
        if !is_process_running(existing.pid) {
            warn!(plan_id, pid = existing.pid, "reclaiming lock left by exited process");
            return Ok(());
        }

        Err(LockError::ConcurrentOperation {
            plan_id: plan_id.to_string(),
            pid: existing.pid,
            held_for: format_age(age),
        })
    }

    /// Rename-then-delete so a racing acquirer never deletes a fresh lock.
    fn remove_abandoned(lock_path: &Utf8Path) -> Result<(), LockError> {
        let stale = lock_path.with_extension(format!(
            "stale.{}.{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or_default(),
            process::id()
        ));
        match fs::rename(lock_path, &stale) {
            Ok(()) => {
                let _ = fs::remove_file(&stale);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LockError::AcquisitionFailed {
                reason: format!("Failed to remove abandoned lock {lock_path}: {e}"),
            }),
        }
    }
}

impl std::fmt::Debug for PlanLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanLock")
            .field("lock_path", &self.lock_path)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

impl Drop for PlanLock {
    fn drop(&mut self) {
        if self._fd_lock.take().is_some() {
            let _ = fs::remove_file(&self.lock_path);
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn format_age(secs: u64) -> String {
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86400)
    }
}

#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        // Exists but belongs to someone else
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(windows)]
fn is_process_running(pid: u32) -> bool {
    use windows::Win32::Foundation::{CloseHandle, STILL_ACTIVE};
    use windows::Win32::System::Threading::{
        GetExitCodeProcess, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
    };

    unsafe {
        let Ok(handle) = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid) else {
            return false;
        };
        let mut exit_code = 0u32;
        let running = GetExitCodeProcess(handle, &mut exit_code).is_ok()
            && exit_code == STILL_ACTIVE.0 as u32;
        let _ = CloseHandle(handle);
        running
    }
}

#[cfg(not(any(unix, windows)))]
fn is_process_running(_pid: u32) -> bool {
    true
}
