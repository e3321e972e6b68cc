//! Content-addressed resource cache
//!
//! Entries live at `root/<key>` and are created at most once. Readiness is
//! signalled by a marker file written only after the build succeeded, so a
//! directory left behind by a crashed or failed builder never looks ready.
//!
//! # Protocol
//!
//! | Step | Lock | Action |
//! |------|------|--------|
//! | fast path | none | marker present → reuse |
//! | slow path | `root/.locks/<key>.lock` | re-check marker, clear partial state, build, write marker |
//!
//! The second check under the lock stops two racing jobs from building
//! the same entry twice; the lock-free first check keeps warm reuse from
//! serializing on the lock. Entries are never deleted by this crate.

pub mod entry;

pub use entry::{format_bytes, CacheEntry, EntryKind, EntryState};

use crate::error::{BoostError, BoostResult};
use crate::hash::HashKey;
use crate::lock::FileLock;
use crate::shell;
use chrono::{SecondsFormat, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Marker file written inside an entry once its build succeeded
pub const READY_MARKER: &str = ".ready";

/// Directory under the cache root holding per-key lock files
pub const LOCKS_DIR: &str = ".locks";

/// A root directory of content-addressed entries
#[derive(Debug, Clone)]
pub struct ResourceCache {
    root: PathBuf,
    lock_timeout: Duration,
}

impl ResourceCache {
    pub fn new(root: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        Self {
            root: root.into(),
            lock_timeout,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Directory of the entry for `key`
    pub fn entry_path(&self, key: &HashKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    /// Readiness marker of the entry for `key`
    pub fn marker_path(&self, key: &HashKey) -> PathBuf {
        self.entry_path(key).join(READY_MARKER)
    }

    /// Lock guarding the build of `key`
    pub fn lock_for(&self, key: &HashKey) -> FileLock {
        let path = self
            .root
            .join(LOCKS_DIR)
            .join(format!("{}.lock", key.as_str()));
        FileLock::new(path, self.lock_timeout)
    }

    pub fn is_ready(&self, key: &HashKey) -> bool {
        self.marker_path(key).is_file()
    }

    /// Return the entry for `key`, building it first if needed
    ///
    /// `build` receives the (empty) entry directory. If it fails, the
    /// directory is removed and the error is reported as a `BuildFailure`
    /// naming the key; the next call retries from scratch.
    pub fn ensure<F>(&self, key: &HashKey, build: F) -> BoostResult<PathBuf>
    where
        F: FnOnce(&Path) -> BoostResult<()>,
    {
        let path = self.entry_path(key);
        if self.is_ready(key) {
            debug!("Cache hit: {}", path.display());
            return Ok(path);
        }

        let _guard = self.lock_for(key).acquire()?;

        if self.is_ready(key) {
            debug!("Entry {} was built while waiting for the lock", key);
            return Ok(path);
        }

        if path.exists() {
            warn!("Removing incomplete cache entry {}", path.display());
            remove_entry(&path)?;
        }
        fs::create_dir_all(&path)
            .map_err(|e| BoostError::io(format!("creating cache entry {}", path.display()), e))?;

        info!("Building cache entry {}", key);
        if let Err(e) = build(&path) {
            if let Err(cleanup) = remove_entry(&path) {
                warn!("Failed to remove partial entry {}: {}", path.display(), cleanup);
            }
            return Err(BoostError::BuildFailure {
                key: key.to_string(),
                reason: e.to_string(),
            });
        }

        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        fs::write(self.marker_path(key), format!("{stamp}\n")).map_err(|e| {
            BoostError::io(format!("writing readiness marker for {}", key), e)
        })?;

        info!("Cache entry {} ready", key);
        Ok(path)
    }

    /// Shell text performing `ensure` at job run time
    ///
    /// `build` is template text that populates the entry directory; it runs
    /// in strict mode inside the lock. `label` names the resource in messages.
    pub fn ensure_fragment(&self, key: &HashKey, label: &str, build: &str) -> String {
        let path = shell::dquote_path(&self.entry_path(key));
        let marker = shell::dquote_path(&self.marker_path(key));
        let not_ready = format!("[[ ! -e {marker} ]]");

        let build_step = shell::Guarded::new(build).on_failure([
            shell::log_error(
                key.as_str(),
                &format!("failed to build {label}, removing partial state"),
            ),
            format!("rm -rf {path}"),
        ]);

        let locked = shell::if_then(
            &not_ready,
            &[
                format!("rm -rf {path}"),
                format!("mkdir -p {path}"),
                shell::log(&format!("building {label} {key}")),
                build_step.render(),
                format!("date -u +%Y-%m-%dT%H:%M:%SZ > {marker}"),
            ],
        );

        shell::if_then(
            &not_ready,
            &[self.lock_for(key).wrap(key.as_str(), &locked)],
        )
    }
}

fn remove_entry(path: &Path) -> BoostResult<()> {
    fs::remove_dir_all(path)
        .map_err(|e| BoostError::io(format!("removing cache entry {}", path.display()), e))
}
