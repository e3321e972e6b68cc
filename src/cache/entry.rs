//! Inventory of cache roots
//!
//! Read-only view used by `shboost cache list`. Removing entries is left to
//! operators; nothing here deletes.

use crate::cache::{ResourceCache, LOCKS_DIR, READY_MARKER};
use crate::enhance::archive::STAMP_SUFFIX;
use crate::error::{BoostError, BoostResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Format bytes as human-readable size (e.g., "1.5 GB")
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// What a cache entry holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Environment,
    Mount,
    Script,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Environment => write!(f, "env"),
            Self::Mount => write!(f, "mount"),
            Self::Script => write!(f, "script"),
        }
    }
}

/// Lifecycle state of an entry as seen on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    /// Directory exists without a readiness record (in progress or crashed)
    Building,
    /// Finalized and reusable
    Ready,
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Building => write!(f, "building"),
            Self::Ready => write!(f, "ready"),
        }
    }
}

/// One entry found under a cache root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub kind: EntryKind,
    pub key: String,
    pub path: PathBuf,
    pub state: EntryState,
    pub created_at: Option<DateTime<Utc>>,
    pub size_bytes: u64,
}

/// Environments under a resource cache root
pub fn scan_environments(cache: &ResourceCache) -> BoostResult<Vec<CacheEntry>> {
    let mut entries = Vec::new();
    for path in child_dirs(cache.root())? {
        let key = file_name(&path);
        if key == LOCKS_DIR {
            continue;
        }
        let marker = path.join(READY_MARKER);
        let (state, created_at) = if marker.is_file() {
            (EntryState::Ready, read_timestamp(&marker))
        } else {
            (EntryState::Building, None)
        };
        entries.push(CacheEntry {
            kind: EntryKind::Environment,
            key,
            size_bytes: dir_size(&path),
            path,
            state,
            created_at,
        });
    }
    Ok(entries)
}

/// Extracted archives under a mount root
pub fn scan_mounts(root: &Path) -> BoostResult<Vec<CacheEntry>> {
    let mut entries = Vec::new();
    for path in child_dirs(root)? {
        let key = file_name(&path);
        let stamp = root.join(format!("{key}{STAMP_SUFFIX}"));
        let state = if stamp.is_file() {
            EntryState::Ready
        } else {
            EntryState::Building
        };
        entries.push(CacheEntry {
            kind: EntryKind::Mount,
            created_at: modified_at(&stamp),
            size_bytes: dir_size(&path),
            key,
            path,
            state,
        });
    }
    Ok(entries)
}

/// Packaged script artifacts under a scripts root
pub fn scan_scripts(root: &Path) -> BoostResult<Vec<CacheEntry>> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }
    let mut entries = Vec::new();
    for dirent in read_dir(root)? {
        let path = dirent.path();
        if !path.is_file() {
            continue;
        }
        let key = file_name(&path);
        if key.starts_with('.') {
            continue;
        }
        entries.push(CacheEntry {
            kind: EntryKind::Script,
            state: EntryState::Ready,
            created_at: modified_at(&path),
            size_bytes: fs::metadata(&path).map(|m| m.len()).unwrap_or(0),
            key,
            path,
        });
    }
    entries.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(entries)
}

fn child_dirs(root: &Path) -> BoostResult<Vec<PathBuf>> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }
    let mut dirs: Vec<PathBuf> = read_dir(root)?
        .into_iter()
        .map(|d| d.path())
        .filter(|p| p.is_dir() && !p.is_symlink())
        .collect();
    dirs.sort();
    Ok(dirs)
}

fn read_dir(root: &Path) -> BoostResult<Vec<fs::DirEntry>> {
    fs::read_dir(root)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| BoostError::io(format!("reading {}", root.display()), e))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn read_timestamp(marker: &Path) -> Option<DateTime<Utc>> {
    let content = fs::read_to_string(marker).ok()?;
    DateTime::parse_from_rfc3339(content.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| modified_at(marker))
}

fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

/// Apparent size of a directory tree; unreadable parts count as zero
fn dir_size(path: &Path) -> u64 {
    let Ok(meta) = fs::symlink_metadata(path) else {
        return 0;
    };
    if !meta.is_dir() {
        return meta.len();
    }
    fs::read_dir(path)
        .map(|it| it.flatten().map(|d| dir_size(&d.path())).sum())
        .unwrap_or(0)
}
