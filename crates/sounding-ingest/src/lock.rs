//! Run-level mutual exclusion with pid-stamped lock files.
//!
//! A lock is a file created exclusively and holding the owner's pid. A lock
//! whose pid is not alive, or whose content is not a pid, is stale and is
//! removed. Contention either fails immediately (zero timeout) or polls until
//! the timeout expires.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use nix::errno::Errno;
use nix::sys::signal;
use nix::unistd::Pid;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::error::{IngestionError, Result};

/// File name prefix shared by all lock files.
pub const LOCK_PREFIX: &str = "process-radiosonde.";

/// Lock files younger than this with unreadable content are assumed to be
/// mid-creation by another process.
const CREATION_GRACE: Duration = Duration::from_secs(2);

/// Lock file for a purpose, e.g. a channel name.
pub fn lock_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{LOCK_PREFIX}{name}"))
}

/// How long to wait for a held lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Maximum wait; zero fails on first contention
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::ZERO,
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// Whether a process with this pid exists.
pub fn pid_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    match signal::kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        // exists but belongs to someone else
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Pid recorded in a lock file, if readable.
pub fn holder(path: &Path) -> Option<i32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

enum Attempt {
    Acquired(PidLock),
    Held(i32),
}

fn recently_created(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| SystemTime::now().duration_since(t).ok())
        .is_some_and(|age| age < CREATION_GRACE)
}

/// Remove a lock judged stale from its `observed` content.
///
/// Removal happens under a `.takeover` guard file and only if the lock still
/// holds the observed content, so a lock another contender has just created
/// is never removed. Returns `false` when another contender holds the guard.
fn remove_stale(path: &Path, observed: &str) -> Result<bool> {
    let mut guard = path.as_os_str().to_owned();
    guard.push(".takeover");
    let guard = PathBuf::from(guard);

    match OpenOptions::new().write(true).create_new(true).open(&guard) {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            if !recently_created(&guard) {
                warn!(path = %guard.display(), "Removing abandoned takeover guard");
                let _ = fs::remove_file(&guard);
            }
            return Ok(false);
        }
        Err(e) => return Err(e.into()),
    }

    let removed = match fs::read_to_string(path) {
        Ok(current) if current == observed => {
            let unwritten = current.trim().parse::<i32>().is_err() && recently_created(path);
            if unwritten {
                Ok(())
            } else {
                fs::remove_file(path).or_else(|e| match e.kind() {
                    ErrorKind::NotFound => Ok(()),
                    _ => Err(e),
                })
            }
        }
        Ok(_) => {
            debug!(path = %path.display(), "Lock replaced before takeover");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    };
    let _ = fs::remove_file(&guard);
    removed?;
    Ok(true)
}

fn try_once(path: &Path) -> Result<Attempt> {
    loop {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                write!(file, "{}", std::process::id())?;
                file.sync_all()?;
                return Ok(Attempt::Acquired(PidLock {
                    path: path.to_path_buf(),
                }));
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }

        let observed = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        match observed.trim().parse::<i32>().ok() {
            Some(pid) if pid_alive(pid) => return Ok(Attempt::Held(pid)),
            None if recently_created(path) => return Ok(Attempt::Held(0)),
            stale => {
                warn!(path = %path.display(), pid = ?stale, "Removing stale lock");
                if !remove_stale(path, &observed)? {
                    return Ok(Attempt::Held(0));
                }
            }
        }
    }
}

/// A held lock. The file is removed when this is dropped.
#[derive(Debug)]
pub struct PidLock {
    path: PathBuf,
}

impl PidLock {
    /// Acquire the lock at `path`, waiting up to `options.timeout`.
    pub async fn acquire(path: impl Into<PathBuf>, options: &LockOptions) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let start = Instant::now();
        loop {
            match try_once(&path)? {
                Attempt::Acquired(lock) => {
                    info!(
                        path = %path.display(),
                        waited_ms = start.elapsed().as_millis() as u64,
                        "Acquired lock"
                    );
                    return Ok(lock);
                }
                Attempt::Held(pid) => {
                    let waited = start.elapsed();
                    if waited >= options.timeout {
                        return Err(IngestionError::LockContention { path, pid, waited });
                    }
                    debug!(path = %path.display(), pid, "Lock held, waiting");
                    sleep(options.poll_interval.min(options.timeout - waited)).await;
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock now.
    pub fn release(self) {}
}

impl Drop for PidLock {
    fn drop(&mut self) {
        // only remove the file while it still carries our pid
        if holder(&self.path) != Some(std::process::id() as i32) {
            warn!(path = %self.path.display(), "Lock file changed owner, leaving it");
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Released lock"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove lock"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::{set_mtime, temp_test_dir, write_file};

    fn fast(timeout_ms: u64) -> LockOptions {
        LockOptions {
            timeout: Duration::from_millis(timeout_ms),
            poll_interval: Duration::from_millis(50),
        }
    }

    fn own_pid() -> i32 {
        std::process::id() as i32
    }

    #[test]
    fn test_lock_path() {
        assert_eq!(
            lock_path(Path::new("/run/lock"), "gisc"),
            PathBuf::from("/run/lock/process-radiosonde.gisc")
        );
    }

    #[test]
    fn test_pid_alive() {
        assert!(pid_alive(own_pid()));
        assert!(!pid_alive(0));
        assert!(!pid_alive(-1));
        assert!(!pid_alive(i32::MAX));
    }

    #[test]
    fn test_acquire_writes_pid_and_releases() {
        let dir = temp_test_dir();
        let path = lock_path(dir.path(), "test");

        let lock = tokio_test::block_on(PidLock::acquire(&path, &LockOptions::default())).unwrap();
        assert_eq!(holder(lock.path()), Some(own_pid()));
        lock.release();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_contention_fails_fast_with_zero_timeout() {
        let dir = temp_test_dir();
        let path = lock_path(dir.path(), "test");
        let _held = PidLock::acquire(&path, &LockOptions::default()).await.unwrap();

        let err = PidLock::acquire(&path, &LockOptions::default()).await.unwrap_err();
        match err {
            IngestionError::LockContention { pid, .. } => assert_eq!(pid, own_pid()),
            other => panic!("expected contention, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_live_holder_times_out_after_polling() {
        let dir = temp_test_dir();
        let path = write_file(dir.path(), "process-radiosonde.gisc", own_pid().to_string().as_bytes());

        let err = PidLock::acquire(&path, &fast(300)).await.unwrap_err();
        match err {
            IngestionError::LockContention { waited, .. } => {
                assert!(waited >= Duration::from_millis(300));
            }
            other => panic!("expected contention, got {other:?}"),
        }
        // the foreign lock is left alone
        assert_eq!(holder(&path), Some(own_pid()));
    }

    #[tokio::test]
    async fn test_stale_pid_is_replaced() {
        let dir = temp_test_dir();
        let path = write_file(dir.path(), "process-radiosonde.gisc", i32::MAX.to_string().as_bytes());

        let lock = PidLock::acquire(&path, &LockOptions::default()).await.unwrap();
        assert_eq!(holder(lock.path()), Some(own_pid()));
    }

    #[test]
    fn test_concurrent_stale_takeover_has_one_winner() {
        use std::sync::{Arc, Barrier};

        for _ in 0..20 {
            let dir = temp_test_dir();
            let path = write_file(dir.path(), "process-radiosonde.gisc", i32::MAX.to_string().as_bytes());
            let barrier = Arc::new(Barrier::new(8));

            let contenders: Vec<_> = (0..8)
                .map(|_| {
                    let path = path.clone();
                    let barrier = Arc::clone(&barrier);
                    std::thread::spawn(move || {
                        barrier.wait();
                        tokio_test::block_on(PidLock::acquire(&path, &LockOptions::default()))
                    })
                })
                .collect();
            let results: Vec<_> = contenders.into_iter().map(|h| h.join().unwrap()).collect();

            let winners = results.iter().filter(|r| r.is_ok()).count();
            assert_eq!(winners, 1);
            assert_eq!(holder(&path), Some(own_pid()));
            // no takeover guard left behind
            assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
        }
    }

    #[test]
    fn test_remove_stale_leaves_replaced_lock() {
        let dir = temp_test_dir();
        let path = write_file(dir.path(), "process-radiosonde.gisc", own_pid().to_string().as_bytes());

        // judged stale from older content, but a fresh lock is in place now
        assert!(remove_stale(&path, &i32::MAX.to_string()).unwrap());
        assert_eq!(holder(&path), Some(own_pid()));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);

        assert!(remove_stale(&path, &own_pid().to_string()).unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn test_takeover_guard_serializes_removal() {
        let dir = temp_test_dir();
        let stale = i32::MAX.to_string();
        let path = write_file(dir.path(), "process-radiosonde.gisc", stale.as_bytes());
        let guard = write_file(dir.path(), "process-radiosonde.gisc.takeover", b"");

        assert!(!remove_stale(&path, &stale).unwrap());
        assert!(path.exists());
        assert!(guard.exists());

        // a guard left behind by a dead process is cleared
        set_mtime(&guard, SystemTime::now() - Duration::from_secs(60));
        assert!(!remove_stale(&path, &stale).unwrap());
        assert!(!guard.exists());
        assert!(remove_stale(&path, &stale).unwrap());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_unparsable_lock_is_stale_once_old() {
        let dir = temp_test_dir();
        let path = write_file(dir.path(), "process-radiosonde.gisc", b"garbage");

        // freshly written: may still be in the middle of creation
        assert!(PidLock::acquire(&path, &LockOptions::default()).await.is_err());

        set_mtime(&path, SystemTime::now() - Duration::from_secs(60));
        let lock = PidLock::acquire(&path, &LockOptions::default()).await.unwrap();
        assert_eq!(holder(lock.path()), Some(own_pid()));
    }

    #[tokio::test]
    async fn test_waiter_acquires_after_release() {
        let dir = temp_test_dir();
        let path = lock_path(dir.path(), "test");
        let held = PidLock::acquire(&path, &LockOptions::default()).await.unwrap();

        let releaser = tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            drop(held);
        });

        let lock = PidLock::acquire(&path, &fast(5_000)).await.unwrap();
        releaser.await.unwrap();
        assert!(lock.path().exists());
    }

    #[tokio::test]
    async fn test_named_locks_are_independent() {
        let dir = temp_test_dir();
        let a = PidLock::acquire(lock_path(dir.path(), "gisc"), &LockOptions::default())
            .await
            .unwrap();
        let b = PidLock::acquire(lock_path(dir.path(), "noaa"), &LockOptions::default())
            .await
            .unwrap();
        assert_ne!(a.path(), b.path());
    }
}
