//! Driving archive mounts from Rust
//!
//! The generated shell performs the stow/swap cycle inside jobs; the driver
//! performs the same cycle from the `shboost mount` commands, and repairs
//! what a killed job left behind. All filesystem and process access goes
//! through [`MountHost`] so the cycle can be tested without tar.

use super::state::{MountEvent, MountState};
use super::{
    fingerprint_script, ClearMounts, FINGERPRINT_SUFFIX, PARTIAL_PREFIX, STAMP_SUFFIX,
    STOW_SUFFIX,
};
use crate::error::{BoostError, BoostResult};
use crate::hash::{lexical_absolute, HashKey};
use crate::process;
use crate::shell;
use crate::template::escape_braces;
use serde::Serialize;
use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

/// What occupies a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PathKind {
    Missing,
    File,
    Dir,
    Symlink,
}

/// Every path involved in mounting one archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountLayout {
    pub key: HashKey,
    pub archive: PathBuf,
    pub stow: PathBuf,
    pub mount: PathBuf,
    pub stamp: PathBuf,
    pub fingerprint: PathBuf,
    pub partial: PathBuf,
}

impl MountLayout {
    pub fn new(mount_root: &Path, archive: &Path) -> BoostResult<Self> {
        let archive = lexical_absolute(archive)?;
        let name = archive
            .file_name()
            .ok_or_else(|| BoostError::spec(format!("{} is not a file path", archive.display())))?;
        let key = HashKey::for_archive(&archive)?;
        let mount = lexical_absolute(mount_root)?.join(key.as_str());

        let mut partial_name = OsString::from(PARTIAL_PREFIX);
        partial_name.push(name);
        let partial = archive.with_file_name(partial_name);

        Ok(Self {
            stow: suffixed(&archive, STOW_SUFFIX),
            stamp: suffixed(&mount, STAMP_SUFFIX),
            fingerprint: suffixed(&mount, FINGERPRINT_SUFFIX),
            partial,
            mount,
            archive,
            key,
        })
    }
}

fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// Filesystem and tool access needed by the stow/swap cycle
pub trait MountHost {
    fn kind(&self, path: &Path) -> BoostResult<PathKind>;

    /// Target of the symlink at `path`, `None` if it is not a symlink
    fn read_link(&self, path: &Path) -> BoostResult<Option<PathBuf>>;

    /// Whether `path` is a regular file once symlinks are followed
    fn is_file(&self, path: &Path) -> BoostResult<bool>;

    /// Contents of a small text file, `None` if it does not exist
    fn read_text(&self, path: &Path) -> BoostResult<Option<String>>;

    fn write_text(&self, path: &Path, text: &str) -> BoostResult<()>;

    fn rename(&self, from: &Path, to: &Path) -> BoostResult<()>;

    fn symlink(&self, target: &Path, link: &Path) -> BoostResult<()>;

    /// Give the link at `link` the modification time of `from`
    fn copy_mtime(&self, from: &Path, link: &Path) -> BoostResult<()>;

    /// Remove a file, link or directory tree; missing paths are fine
    fn remove(&self, path: &Path) -> BoostResult<()>;

    fn create_dir(&self, path: &Path) -> BoostResult<()>;

    fn extract(&self, archive: &Path, dir: &Path) -> BoostResult<()>;

    /// Pack the contents of `dir` into `archive`, compressed by suffix
    fn pack(&self, dir: &Path, archive: &Path) -> BoostResult<()>;

    /// Identity of an archive file (`size mtime`)
    fn stamp(&self, archive: &Path) -> BoostResult<String>;

    /// Metadata fingerprint of a directory's contents
    fn fingerprint(&self, dir: &Path) -> BoostResult<String>;
}

/// Runs the stow/swap cycle for one archive
#[derive(Debug)]
pub struct MountDriver<H> {
    host: H,
    layout: MountLayout,
}

impl<H: MountHost> MountDriver<H> {
    pub fn new(host: H, layout: MountLayout) -> Self {
        Self { host, layout }
    }

    pub fn layout(&self) -> &MountLayout {
        &self.layout
    }

    /// Observe where the archive stands
    ///
    /// Only a link to this archive's extraction counts as a mount; any
    /// other link at the archive path is the archive itself. A mount link
    /// with nothing stowed counts as dirty: the extraction is the only copy
    /// of the data and needs repacking.
    pub fn state(&self) -> BoostResult<MountState> {
        let stowed = self.stowed()?;
        let state = if self.linked()? {
            if !stowed || self.drifted()? {
                MountState::Dirty
            } else {
                MountState::Mounted
            }
        } else if stowed && self.host.kind(&self.layout.archive)? == PathKind::Missing {
            MountState::Stowed
        } else {
            MountState::Absent
        };
        debug!("Archive {} is {}", self.layout.archive.display(), state);
        Ok(state)
    }

    /// Whether the extraction came from the archive currently in place
    pub fn is_current(&self) -> BoostResult<bool> {
        if self.host.kind(&self.layout.mount)? != PathKind::Dir {
            return Ok(false);
        }
        let source = if self.stowed()? {
            &self.layout.stow
        } else {
            &self.layout.archive
        };
        if !self.host.is_file(source)? {
            return Ok(false);
        }
        let recorded = self.host.read_text(&self.layout.stamp)?;
        Ok(recorded.as_deref().map(str::trim) == Some(self.host.stamp(source)?.trim()))
    }

    /// Mount the archive for reading and return the extraction directory
    pub fn open(&self) -> BoostResult<PathBuf> {
        let l = &self.layout;
        let mut state = self.state()?;

        if state.is_linked() {
            info!("Archive {} is already mounted", l.archive.display());
            return Ok(l.mount.clone());
        }
        if state == MountState::Stowed {
            state = self.unstow(state)?;
        } else if self.stowed()? {
            warn!(
                "Archive {} was replaced while stowed, dropping the stow",
                l.archive.display()
            );
            self.host.remove(&l.stow)?;
            self.clear()?;
        }

        if !self.host.is_file(&l.archive)? {
            return Err(BoostError::spec(format!(
                "archive {} is missing or not a regular file",
                l.archive.display()
            )));
        }

        if self.is_current()? {
            debug!("Reusing extraction {}", l.mount.display());
        } else {
            self.extract()?;
        }
        let fingerprint = self.host.fingerprint(&l.mount)?;
        self.host.write_text(&l.fingerprint, &fingerprint)?;

        state = state.on(MountEvent::Stow)?;
        self.host.rename(&l.archive, &l.stow)?;
        state = state.on(MountEvent::Link)?;
        if let Err(e) = self.host.symlink(&l.mount, &l.archive) {
            self.host.rename(&l.stow, &l.archive)?;
            return Err(e);
        }
        self.host.copy_mtime(&l.stow, &l.archive)?;

        info!("Mounted {} at {} ({})", l.archive.display(), l.mount.display(), state);
        Ok(l.mount.clone())
    }

    /// Unmount, putting the original archive back untouched
    pub fn close(&self, policy: ClearMounts) -> BoostResult<MountState> {
        let observed = self.state()?;
        let mut state = observed;

        if state.is_linked() {
            if !self.stowed()? {
                return Err(BoostError::MountTransition {
                    from: state.to_string(),
                    event: "close without a stowed archive".to_string(),
                });
            }
            state = state.on(MountEvent::Unlink)?;
            self.host.remove(&self.layout.archive)?;
        }
        if state == MountState::Stowed {
            state = self.unstow(state)?;
        }

        let discard = match policy {
            ClearMounts::Always => true,
            ClearMounts::Auto => observed == MountState::Dirty,
            ClearMounts::Never => false,
        };
        if discard {
            info!("Discarding extraction {}", self.layout.mount.display());
            self.clear()?;
        }
        Ok(state)
    }

    /// Finish a read-modify-write mount
    ///
    /// Changed contents are packed into a new archive that replaces the
    /// original; unchanged contents leave the original archive in place.
    /// Returns whether a new archive was written.
    pub fn repack(&self) -> BoostResult<bool> {
        let l = &self.layout;
        match self.state()? {
            MountState::Mounted => {
                self.close(ClearMounts::Never)?;
                Ok(false)
            }
            state @ MountState::Dirty => {
                state.on(MountEvent::Repack)?;
                self.host.remove(&l.partial)?;
                if let Err(e) = self.host.pack(&l.mount, &l.partial) {
                    self.host.remove(&l.partial)?;
                    return Err(BoostError::BuildFailure {
                        key: l.key.to_string(),
                        reason: e.to_string(),
                    });
                }
                self.host.remove(&l.archive)?;
                self.host.rename(&l.partial, &l.archive)?;
                self.host.remove(&l.stow)?;

                let stamp = self.host.stamp(&l.archive)?;
                self.host.write_text(&l.stamp, &stamp)?;
                let fingerprint = self.host.fingerprint(&l.mount)?;
                self.host.write_text(&l.fingerprint, &fingerprint)?;

                info!("Repacked {}", l.archive.display());
                Ok(true)
            }
            state => Err(BoostError::MountTransition {
                from: state.to_string(),
                event: MountEvent::Repack.to_string(),
            }),
        }
    }

    /// Put the original archive back whatever state a job left it in
    ///
    /// The archive path is only cleared when it holds the mount link, so a
    /// user's own symlink survives.
    pub fn restore(&self) -> BoostResult<MountState> {
        let l = &self.layout;
        if self.linked()? {
            self.host.remove(&l.archive)?;
        }
        if self.stowed()? {
            if self.host.kind(&l.archive)? == PathKind::Missing {
                self.host.rename(&l.stow, &l.archive)?;
            } else {
                warn!(
                    "Archive {} is in place, leaving {} for inspection",
                    l.archive.display(),
                    l.stow.display()
                );
            }
        }
        self.host.remove(&l.partial)?;
        self.state()
    }

    /// Whether the archive path is the link to this archive's extraction
    fn linked(&self) -> BoostResult<bool> {
        let target = self.host.read_link(&self.layout.archive)?;
        Ok(target.as_deref() == Some(self.layout.mount.as_path()))
    }

    fn stowed(&self) -> BoostResult<bool> {
        Ok(self.host.kind(&self.layout.stow)? != PathKind::Missing)
    }

    fn drifted(&self) -> BoostResult<bool> {
        let Some(recorded) = self.host.read_text(&self.layout.fingerprint)? else {
            return Ok(true);
        };
        if self.host.kind(&self.layout.mount)? != PathKind::Dir {
            return Ok(true);
        }
        Ok(recorded.trim() != self.host.fingerprint(&self.layout.mount)?.trim())
    }

    fn unstow(&self, state: MountState) -> BoostResult<MountState> {
        let next = state.on(MountEvent::Unstow)?;
        self.host.rename(&self.layout.stow, &self.layout.archive)?;
        debug!("Restored {}", self.layout.archive.display());
        Ok(next)
    }

    fn extract(&self) -> BoostResult<()> {
        let l = &self.layout;
        self.clear()?;
        self.host.create_dir(&l.mount)?;
        info!("Extracting {} into {}", l.archive.display(), l.mount.display());
        if let Err(e) = self.host.extract(&l.archive, &l.mount) {
            if let Err(cleanup) = self.clear() {
                warn!("Failed to remove partial extraction: {}", cleanup);
            }
            return Err(BoostError::BuildFailure {
                key: l.key.to_string(),
                reason: e.to_string(),
            });
        }
        let stamp = self.host.stamp(&l.archive)?;
        self.host.write_text(&l.stamp, &stamp)
    }

    fn clear(&self) -> BoostResult<()> {
        let l = &self.layout;
        self.host.remove(&l.mount)?;
        self.host.remove(&l.stamp)?;
        self.host.remove(&l.fingerprint)
    }
}

/// The local filesystem with `tar` and `touch` from `PATH`
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalHost;

impl LocalHost {
    fn run(&self, command: &mut Command, what: &str) -> BoostResult<()> {
        debug!("Running {:?}", command);
        let output = command
            .output()
            .map_err(|e| BoostError::command_failed(what, e))?;
        if !output.status.success() {
            return Err(BoostError::command_exec(
                what,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }
}

impl MountHost for LocalHost {
    fn kind(&self, path: &Path) -> BoostResult<PathKind> {
        match fs::symlink_metadata(path) {
            Ok(meta) if meta.file_type().is_symlink() => Ok(PathKind::Symlink),
            Ok(meta) if meta.is_dir() => Ok(PathKind::Dir),
            Ok(_) => Ok(PathKind::File),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(PathKind::Missing),
            Err(e) => Err(BoostError::io(format!("inspecting {}", path.display()), e)),
        }
    }

    fn read_link(&self, path: &Path) -> BoostResult<Option<PathBuf>> {
        if self.kind(path)? != PathKind::Symlink {
            return Ok(None);
        }
        fs::read_link(path)
            .map(Some)
            .map_err(|e| BoostError::io(format!("reading link {}", path.display()), e))
    }

    fn is_file(&self, path: &Path) -> BoostResult<bool> {
        match fs::metadata(path) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(BoostError::io(format!("inspecting {}", path.display()), e)),
        }
    }

    fn read_text(&self, path: &Path) -> BoostResult<Option<String>> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BoostError::io(format!("reading {}", path.display()), e)),
        }
    }

    fn write_text(&self, path: &Path, text: &str) -> BoostResult<()> {
        fs::write(path, format!("{}\n", text.trim()))
            .map_err(|e| BoostError::io(format!("writing {}", path.display()), e))
    }

    fn rename(&self, from: &Path, to: &Path) -> BoostResult<()> {
        fs::rename(from, to).map_err(|e| {
            BoostError::io(
                format!("moving {} to {}", from.display(), to.display()),
                e,
            )
        })
    }

    fn symlink(&self, target: &Path, link: &Path) -> BoostResult<()> {
        std::os::unix::fs::symlink(target, link)
            .map_err(|e| BoostError::io(format!("linking {}", link.display()), e))
    }

    fn copy_mtime(&self, from: &Path, link: &Path) -> BoostResult<()> {
        self.run(
            Command::new("touch")
                .arg("-h")
                .arg("-r")
                .arg(from)
                .arg("--")
                .arg(link),
            "touch -h",
        )
    }

    fn remove(&self, path: &Path) -> BoostResult<()> {
        let result = match self.kind(path)? {
            PathKind::Missing => return Ok(()),
            PathKind::Dir => fs::remove_dir_all(path),
            PathKind::File | PathKind::Symlink => fs::remove_file(path),
        };
        result.map_err(|e| BoostError::io(format!("removing {}", path.display()), e))
    }

    fn create_dir(&self, path: &Path) -> BoostResult<()> {
        fs::create_dir_all(path)
            .map_err(|e| BoostError::io(format!("creating {}", path.display()), e))
    }

    fn extract(&self, archive: &Path, dir: &Path) -> BoostResult<()> {
        self.run(
            Command::new("tar").arg("-xf").arg(archive).arg("-C").arg(dir),
            "tar -xf",
        )
    }

    fn pack(&self, dir: &Path, archive: &Path) -> BoostResult<()> {
        self.run(
            Command::new("tar")
                .arg("-caf")
                .arg(archive)
                .arg("-C")
                .arg(dir)
                .arg("."),
            "tar -caf",
        )
    }

    fn stamp(&self, archive: &Path) -> BoostResult<String> {
        let meta = fs::metadata(archive)
            .map_err(|e| BoostError::io(format!("inspecting {}", archive.display()), e))?;
        Ok(format!("{} {}", meta.len(), meta.mtime()))
    }

    fn fingerprint(&self, dir: &Path) -> BoostResult<String> {
        let script = fingerprint_script(&escape_braces(&shell::dquote_path(dir)));
        Ok(process::run_bash_checked(&script, "fingerprinting mount")?
            .trim()
            .to_string())
    }
}
