// crates/quarry-core/src/lock.rs
// ============================================================================
// Module: Execution Lock
// Description: Cross-process single-flight lock with staleness recovery.
// Purpose: Ensure only one archival run touches the stores at a time.
// Dependencies: serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! The lock guards a fixed *target* file. Holding the lock means owning the
//! sibling `<target>.lock` file, created with `create_new` so exactly one
//! process wins. The lock file records the holder's pid and acquisition time;
//! its modification time is the heartbeat. A lock whose heartbeat is older
//! than the staleness timeout is reclaimed automatically.
//!
//! Reclaiming never deletes the shared path outright. The stale file is first
//! renamed to a private name, and its heartbeat is read again there. If that
//! copy turns out to be fresh (a new holder won the path in the meantime) it
//! is linked back without overwriting anything and the caller is contended.
//!
//! Acquisition never waits: a live holder yields
//! [`LockAcquisition::Contended`]. A missing target file is created once and
//! acquisition retried a single time.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default staleness timeout for an execution lock (one hour).
pub const DEFAULT_LOCK_STALE_AFTER: Duration = Duration::from_secs(60 * 60);
/// Suffix appended to the target path to form the lock file path.
const LOCK_SUFFIX: &str = ".lock";
/// Infix for a stale lock file renamed aside during reclaim.
const PARKED_INFIX: &str = ".stale.";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Execution lock errors.
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock target file does not exist.
    #[error("lock target missing: {0}")]
    TargetMissing(String),
    /// Filesystem failure while acquiring, refreshing, or releasing.
    #[error("lock io error: {0}")]
    Io(String),
}

// ============================================================================
// SECTION: Types
// ============================================================================

/// Holder metadata written into the lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockInfo {
    /// Process identifier of the holder.
    pid: u32,
    /// Acquisition time (milliseconds since epoch).
    acquired_at_ms: u64,
}

/// Outcome of a non-blocking acquisition attempt.
#[derive(Debug)]
pub enum LockAcquisition {
    /// The lock is now held by the caller.
    Acquired(ExecutionLockGuard),
    /// Another live holder owns the lock.
    Contended {
        /// Holder pid, when the lock file was readable.
        holder_pid: Option<u32>,
        /// Time since the holder's last heartbeat.
        age: Duration,
    },
}

/// File-based execution lock.
#[derive(Debug, Clone)]
pub struct ExecutionLock {
    /// File the lock protects.
    target: PathBuf,
    /// Heartbeat age after which a holder is presumed dead.
    stale_after: Duration,
}

impl ExecutionLock {
    /// Creates a lock for `target` with the given staleness timeout.
    #[must_use]
    pub fn new(target: impl Into<PathBuf>, stale_after: Duration) -> Self {
        Self {
            target: target.into(),
            stale_after,
        }
    }

    /// Returns the protected target path.
    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Returns the lock file path (`<target>.lock`).
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        let mut path = self.target.as_os_str().to_os_string();
        path.push(LOCK_SUFFIX);
        PathBuf::from(path)
    }

    /// Attempts to acquire the lock without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`LockError`] when the filesystem prevents acquisition.
    pub fn try_acquire(&self) -> Result<LockAcquisition, LockError> {
        match self.acquire_once() {
            Err(LockError::TargetMissing(_)) => {
                self.create_target()?;
                self.acquire_once()
            }
            outcome => outcome,
        }
    }

    /// Single acquisition attempt, reclaiming a stale lock at most once.
    fn acquire_once(&self) -> Result<LockAcquisition, LockError> {
        match fs::metadata(&self.target) {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(LockError::TargetMissing(self.target.display().to_string()));
            }
            Err(err) => return Err(LockError::Io(err.to_string())),
        }
        let lock_path = self.lock_path();
        match create_lock_file(&lock_path) {
            Ok(()) => return Ok(LockAcquisition::Acquired(ExecutionLockGuard::new(lock_path, false))),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
            Err(err) => return Err(LockError::Io(format!("{}: {err}", lock_path.display()))),
        }
        let age = heartbeat_age(&lock_path)?;
        if age <= self.stale_after {
            return Ok(LockAcquisition::Contended {
                holder_pid: read_holder_pid(&lock_path),
                age,
            });
        }
        reclaim_stale(&lock_path, self.stale_after)
    }

    /// Creates the target file and its parent directory.
    fn create_target(&self) -> Result<(), LockError> {
        if let Some(parent) = self.target.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|err| LockError::Io(err.to_string()))?;
        }
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.target)
            .map(drop)
            .map_err(|err| LockError::Io(format!("{}: {err}", self.target.display())))
    }
}

// ============================================================================
// SECTION: Guard
// ============================================================================

/// Held execution lock; released on [`ExecutionLockGuard::release`] or drop.
#[derive(Debug)]
pub struct ExecutionLockGuard {
    /// Lock file owned by this guard.
    path: PathBuf,
    /// Whether the lock file was already removed.
    released: bool,
    /// Whether acquisition replaced a stale holder.
    reclaimed_stale: bool,
}

impl ExecutionLockGuard {
    /// Wraps a freshly created lock file.
    const fn new(path: PathBuf, reclaimed_stale: bool) -> Self {
        Self {
            path,
            released: false,
            reclaimed_stale,
        }
    }

    /// Returns true when acquisition replaced a stale holder's lock.
    #[must_use]
    pub const fn reclaimed_stale(&self) -> bool {
        self.reclaimed_stale
    }

    /// Returns the lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bumps the heartbeat so long healthy runs are not reclaimed.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Io`] when the lock file cannot be touched.
    pub fn refresh(&self) -> Result<(), LockError> {
        let file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map_err(|err| LockError::Io(format!("{}: {err}", self.path.display())))?;
        file.set_modified(SystemTime::now())
            .map_err(|err| LockError::Io(format!("{}: {err}", self.path.display())))
    }

    /// Releases the lock.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Io`] when the lock file cannot be removed.
    pub fn release(mut self) -> Result<(), LockError> {
        self.release_inner()
    }

    /// Removes the lock file once.
    fn release_inner(&mut self) -> Result<(), LockError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(LockError::Io(format!("{}: {err}", self.path.display()))),
        }
    }
}

impl Drop for ExecutionLockGuard {
    fn drop(&mut self) {
        let _ = self.release_inner();
    }
}

// ============================================================================
// SECTION: Reclaim
// ============================================================================

/// Replaces the stale lock at `lock_path` with one held by this process.
fn reclaim_stale(lock_path: &Path, stale_after: Duration) -> Result<LockAcquisition, LockError> {
    let parked = parked_path(lock_path);
    match fs::rename(lock_path, &parked) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => return create_after_reclaim(lock_path),
        Err(err) => return Err(LockError::Io(format!("{}: {err}", lock_path.display()))),
    }
    let age = heartbeat_age(&parked)?;
    if age <= stale_after {
        let holder_pid = read_holder_pid(&parked);
        match fs::hard_link(&parked, lock_path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
            Err(err) => return Err(LockError::Io(format!("{}: {err}", lock_path.display()))),
        }
        fs::remove_file(&parked)
            .map_err(|err| LockError::Io(format!("{}: {err}", parked.display())))?;
        return Ok(LockAcquisition::Contended {
            holder_pid,
            age,
        });
    }
    fs::remove_file(&parked).map_err(|err| LockError::Io(format!("{}: {err}", parked.display())))?;
    create_after_reclaim(lock_path)
}

/// Creates the lock file once the stale holder has been moved aside.
fn create_after_reclaim(lock_path: &Path) -> Result<LockAcquisition, LockError> {
    match create_lock_file(lock_path) {
        Ok(()) => {
            Ok(LockAcquisition::Acquired(ExecutionLockGuard::new(lock_path.to_path_buf(), true)))
        }
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(LockAcquisition::Contended {
            holder_pid: read_holder_pid(lock_path),
            age: Duration::ZERO,
        }),
        Err(err) => Err(LockError::Io(format!("{}: {err}", lock_path.display()))),
    }
}

/// Returns a name no other reclaimer will pick for the parked lock file.
fn parked_path(lock_path: &Path) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    let mut path = lock_path.as_os_str().to_os_string();
    path.push(format!("{PARKED_INFIX}{}.{nanos}", std::process::id()));
    PathBuf::from(path)
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Atomically creates the lock file and writes holder metadata.
fn create_lock_file(path: &Path) -> io::Result<()> {
    let mut file: File = OpenOptions::new().write(true).create_new(true).open(path)?;
    let acquired_at_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default();
    let info = LockInfo {
        pid: std::process::id(),
        acquired_at_ms,
    };
    let payload = serde_json::to_vec(&info).map_err(io::Error::other)?;
    file.write_all(&payload)?;
    file.sync_all()
}

/// Returns the time elapsed since the lock file was last touched.
fn heartbeat_age(path: &Path) -> Result<Duration, LockError> {
    let modified = fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map_err(|err| LockError::Io(format!("{}: {err}", path.display())))?;
    Ok(SystemTime::now().duration_since(modified).unwrap_or_default())
}

/// Reads the holder pid from a lock file, if parseable.
fn read_holder_pid(path: &Path) -> Option<u32> {
    let bytes = fs::read(path).ok()?;
    serde_json::from_slice::<LockInfo>(&bytes).ok().map(|info| info.pid)
}

// ============================================================================
// SECTION: Tests
// ============================================================================
