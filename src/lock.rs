//! Named filesystem locks with a bounded wait
//!
//! Both halves of the protocol use `flock(2)` on the same lock file, so a
//! Rust-side `shboost env ensure` and a running job exclude each other.
//! `flock` locks belong to the open file description and are dropped by the
//! kernel when the holder dies, so a crashed builder never wedges the cache.
//!
//! Acquisition never falls through to running the guarded body unlocked:
//! a wait that exceeds the bound is an error.

use crate::error::{BoostError, BoostResult};
use crate::shell;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Poll interval while waiting on a held lock
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// File descriptor the generated shell holds the lock on
const SHELL_LOCK_FD: u8 = 9;

/// A lock file plus the longest time to wait for it
#[derive(Debug, Clone)]
pub struct FileLock {
    path: PathBuf,
    timeout: Duration,
}

/// Held lock; released when dropped
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl FileLock {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until the lock is held or the timeout elapses
    pub fn acquire(&self) -> BoostResult<LockGuard> {
        let started = Instant::now();
        let mut announced = false;

        loop {
            if let Some(guard) = self.try_acquire()? {
                debug!(
                    "Acquired lock {} after {:?}",
                    self.path.display(),
                    started.elapsed()
                );
                return Ok(guard);
            }

            let elapsed = started.elapsed();
            if elapsed >= self.timeout {
                warn!("Gave up waiting for lock {}", self.path.display());
                return Err(BoostError::LockTimeout {
                    name: self.path.display().to_string(),
                    waited_secs: elapsed.as_secs(),
                });
            }
            if !announced {
                debug!("Lock {} is held, waiting", self.path.display());
                announced = true;
            }
            thread::sleep(POLL_INTERVAL.min(self.timeout - elapsed));
        }
    }

    /// Take the lock if nobody holds it
    pub fn try_acquire(&self) -> BoostResult<Option<LockGuard>> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                BoostError::io(format!("creating lock directory {}", parent.display()), e)
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| BoostError::io(format!("opening lock {}", self.path.display()), e))?;

        loop {
            // SAFETY: the descriptor is owned by `file` and stays open for the call.
            let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
            if rc == 0 {
                return Ok(Some(LockGuard {
                    file,
                    path: self.path.clone(),
                }));
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::WouldBlock => return Ok(None),
                io::ErrorKind::Interrupted => continue,
                _ => {
                    return Err(BoostError::io(
                        format!("locking {}", self.path.display()),
                        err,
                    ))
                }
            }
        }
    }

    /// Shell text running `body` while holding this lock
    ///
    /// The lock is taken on a descriptor opened for the subshell, so it is
    /// released whenever the subshell ends, including when it is killed.
    /// `key` attributes the timeout message.
    pub fn wrap(&self, key: &str, body: &str) -> String {
        let secs = self.timeout.as_secs();
        let wait = if secs == 0 {
            "-n".to_string()
        } else {
            format!("-w {secs}")
        };
        let lock_dir = self
            .path
            .parent()
            .map(|dir| format!("mkdir -p {}", shell::dquote_path(dir)))
            .unwrap_or_default();

        shell::lines([
            lock_dir,
            "(".to_string(),
            shell::if_then(
                &format!("! flock -x {wait} {SHELL_LOCK_FD}"),
                &[
                    shell::log_error(key, &format!("timed out after {secs}s waiting for lock")),
                    "exit 1".to_string(),
                ],
            ),
            body.to_string(),
            format!(") {SHELL_LOCK_FD}>{}", shell::dquote_path(&self.path)),
        ])
    }
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // SAFETY: the descriptor is still owned by `self.file`.
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
        debug!("Released lock {}", self.path.display());
    }
}
