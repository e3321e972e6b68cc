//! Tar archives used as directories
//!
//! An archive at `A` is extracted once into `mount_root/<key>`, where the
//! key is the digest of `A`'s absolute path. While a job runs, the archive
//! is stowed at `A.swp` and `A` becomes a symlink to the extraction, so the
//! job sees a directory. Afterwards the symlink is removed and the stow put
//! back, leaving the archive byte-identical.
//!
//! Sidecar files next to the extraction:
//!
//! | File | Contents |
//! |------|----------|
//! | `<key>.stamp` | `size mtime` of the archive the extraction came from |
//! | `<key>.fingerprint` | digest of the extraction's file metadata at mount time |
//!
//! A stamp mismatch means the archive was replaced and the extraction is
//! stale. A fingerprint mismatch means a job changed the mounted contents.
//!
//! The archive path only counts as mounted when it is a symlink whose
//! target is exactly its extraction directory. Any other symlink there
//! (a workflow input linking to the real tarball, say) is the user's file
//! and is never removed.
//!
//! Mounts take no lock: two jobs mounting the same archive at the same
//! time can trip over each other's stow and symlink.

pub mod driver;
pub mod state;

pub use driver::{LocalHost, MountDriver, MountHost, MountLayout, PathKind};
pub use state::{MountEvent, MountState};

use crate::enhance::Enhancer;
use crate::error::{BoostError, BoostResult};
use crate::hash::{lexical_absolute, KEY_HEX_LEN};
use crate::shell;
use crate::template;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Suffix of the stowed original archive
pub const STOW_SUFFIX: &str = ".swp";

/// Suffix of the archive identity record next to an extraction
pub const STAMP_SUFFIX: &str = ".stamp";

/// Suffix of the content fingerprint next to an extraction
pub const FINGERPRINT_SUFFIX: &str = ".fingerprint";

/// Prefix of the temporary archive written while packing
pub const PARTIAL_PREFIX: &str = ".partial.";

/// What happens to an input extraction once the job is done
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ClearMounts {
    /// Discard it only if the job changed its contents
    #[default]
    Auto,
    /// Always discard it
    Always,
    /// Keep it for the next job
    Never,
}

impl fmt::Display for ClearMounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Always => write!(f, "always"),
            Self::Never => write!(f, "never"),
        }
    }
}

/// How a job uses an archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveMode {
    /// Read an existing archive
    Input,
    /// Create the archive from scratch
    Output,
    /// Read, change and repack an existing archive
    Modify,
}

impl fmt::Display for ArchiveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Output => write!(f, "output"),
            Self::Modify => write!(f, "modify"),
        }
    }
}

/// Archive paths by mode; each entry is a template such as `{input.data}`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchivePaths {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub modify: Vec<String>,
}

impl ArchivePaths {
    fn iter(&self) -> impl Iterator<Item = (ArchiveMode, &str)> + '_ {
        [
            (ArchiveMode::Input, &self.inputs),
            (ArchiveMode::Output, &self.outputs),
            (ArchiveMode::Modify, &self.modify),
        ]
        .into_iter()
        .flat_map(|(mode, list)| list.iter().map(move |p| (mode, p.as_str())))
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty() && self.modify.is_empty()
    }
}

/// Enhancer mounting archives around a command
#[derive(Debug, Clone)]
pub struct ArchiveMount {
    mount_root: PathBuf,
    paths: ArchivePaths,
    clear_mounts: ClearMounts,
}

impl ArchiveMount {
    /// Validate `paths` and anchor `mount_root`
    ///
    /// An empty path, a malformed template, or a path listed more than once
    /// (in the same mode or across modes) is rejected.
    pub fn new(mount_root: impl AsRef<Path>, paths: ArchivePaths) -> BoostResult<Self> {
        let mut seen: Vec<(&str, ArchiveMode)> = Vec::new();
        for (mode, path) in paths.iter() {
            let trimmed = path.trim();
            if trimmed.is_empty() {
                return Err(BoostError::spec(format!("empty {mode} archive path")));
            }
            template::validate(trimmed)?;
            if let Some((_, other)) = seen.iter().find(|(p, _)| *p == trimmed) {
                return Err(BoostError::spec(format!(
                    "archive {trimmed} is listed as both {other} and {mode}"
                )));
            }
            seen.push((trimmed, mode));
        }

        let trim_all = |list: &[String]| -> Vec<String> {
            list.iter().map(|p| p.trim().to_string()).collect()
        };
        Ok(Self {
            mount_root: lexical_absolute(mount_root.as_ref())?,
            paths: ArchivePaths {
                inputs: trim_all(&paths.inputs),
                outputs: trim_all(&paths.outputs),
                modify: trim_all(&paths.modify),
            },
            clear_mounts: ClearMounts::default(),
        })
    }

    /// Same mounts with a different clearing policy
    pub fn with_clear_mounts(&self, clear_mounts: ClearMounts) -> Self {
        Self {
            clear_mounts,
            ..self.clone()
        }
    }

    pub fn mount_root(&self) -> &Path {
        &self.mount_root
    }

    pub fn paths(&self) -> &ArchivePaths {
        &self.paths
    }

    pub fn clear_mounts(&self) -> ClearMounts {
        self.clear_mounts
    }

    fn slots(&self) -> Vec<Slot> {
        self.paths
            .iter()
            .enumerate()
            .map(|(index, (mode, path))| Slot {
                index,
                mode,
                path: path.to_string(),
            })
            .collect()
    }

    fn declare(&self, slot: &Slot) -> String {
        let root = shell::dquote_path(&self.mount_root);
        shell::lines([
            format!(
                "{}=\"$(realpath -ms -- {})\"",
                slot.var('a'),
                shell::dquote(&slot.path)
            ),
            format!(
                "{}=\"$(printf '%s' {} | sha256sum | cut -c1-{KEY_HEX_LEN})\"",
                slot.var('k'),
                slot.archive()
            ),
            format!("{}={root}/\"${}\"", slot.var('m'), slot.var('k')),
            format!(
                "{}=\"$(dirname -- {a})/{PARTIAL_PREFIX}$(basename -- {a})\"",
                slot.var('t'),
                a = slot.archive()
            ),
        ])
    }

    /// Mount one slot; on failure undo `rollback` and exit
    fn open(&self, slot: &Slot, rollback: Vec<String>) -> String {
        let steps = match slot.mode {
            ArchiveMode::Input => open_existing(slot, self.clear_mounts == ClearMounts::Auto),
            ArchiveMode::Modify => open_existing(slot, true),
            ArchiveMode::Output => open_output(slot),
        };
        shell::Guarded::new(steps)
            .on_failure([shell::log_error_var(
                &slot.var('k'),
                &format!("failed to mount {} archive", slot.mode),
            )])
            .on_failure(rollback)
            .render()
    }

    fn on_failure(&self, slot: &Slot) -> String {
        match slot.mode {
            ArchiveMode::Input | ArchiveMode::Modify => unmount(slot, self.clear_mounts),
            ArchiveMode::Output => discard_output(slot),
        }
    }

    fn on_success(&self, slot: &Slot) -> String {
        match slot.mode {
            ArchiveMode::Input => unmount(slot, self.clear_mounts),
            ArchiveMode::Modify => shell::if_else(
                &changed(slot),
                &[shell::Guarded::new(shell::lines([
                    pack(slot),
                    format!("rm -f -- {}", slot.stow()),
                    self.record(slot),
                ]))
                .on_failure([
                    shell::log_error_var(
                        &slot.var('k'),
                        "failed to repack archive, restoring the original",
                    ),
                    format!("rm -f -- {}", slot.partial()),
                    unmount(slot, ClearMounts::Always),
                ])
                .render()],
                &[unmount(slot, self.unchanged_policy())],
            ),
            ArchiveMode::Output => shell::Guarded::new(shell::lines([pack(slot), self.record(slot)]))
                .on_failure([
                    shell::log_error_var(&slot.var('k'), "failed to pack output archive"),
                    format!("rm -f -- {}", slot.partial()),
                    discard_output(slot),
                ])
                .render(),
        }
    }

    /// Clearing policy for a modified archive whose contents did not change
    fn unchanged_policy(&self) -> ClearMounts {
        match self.clear_mounts {
            ClearMounts::Auto => ClearMounts::Never,
            policy => policy,
        }
    }

    /// After packing: keep the extraction as a valid mount of the new archive
    fn record(&self, slot: &Slot) -> String {
        if self.clear_mounts == ClearMounts::Always {
            return clear(slot);
        }
        shell::lines([
            format!("stat -L -c '%s %Y' -- {} > {}", slot.archive(), slot.stamp()),
            format!(
                "{} > {}",
                fingerprint_script(&slot.mount()),
                slot.fingerprint()
            ),
        ])
    }
}

impl Enhancer for ArchiveMount {
    fn wrap(&self, cmd: &str) -> String {
        let slots = self.slots();
        if slots.is_empty() {
            return cmd.to_string();
        }

        // Slots open one after another; a failing slot rolls back itself
        // and the slots opened before it, never the ones after it
        let opens = slots.iter().enumerate().map(|(i, slot)| {
            let rollback = slots[..=i].iter().rev().map(|s| self.on_failure(s)).collect();
            self.open(slot, rollback)
        });
        let failure: Vec<String> = slots.iter().rev().map(|s| self.on_failure(s)).collect();
        let success: Vec<String> = slots.iter().rev().map(|s| self.on_success(s)).collect();

        shell::lines([
            shell::lines(slots.iter().map(|s| self.declare(s))),
            shell::lines(opens),
            shell::Guarded::new(cmd)
                .on_failure(failure)
                .on_success(success)
                .render(),
        ])
    }
}

/// Shell pipeline printing the fingerprint of directory `dir`
///
/// `dir` is a shell word (quoted path or variable). The fingerprint covers
/// relative path, size, mtime and type of every entry, so a file that was
/// touched but not changed still counts as a change.
pub fn fingerprint_script(dir: &str) -> String {
    format!(
        "find {dir} -mindepth 1 -printf '%P\\t%s\\t%T@\\t%y\\n' | LC_ALL=C sort | sha256sum | cut -c1-{KEY_HEX_LEN}"
    )
}

/// Shell variables of one archive
struct Slot {
    index: usize,
    mode: ArchiveMode,
    path: String,
}

impl Slot {
    fn var(&self, tag: char) -> String {
        format!("__sb_{tag}{}", self.index)
    }

    fn archive(&self) -> String {
        format!("\"${}\"", self.var('a'))
    }

    fn stow(&self) -> String {
        format!("\"${}{STOW_SUFFIX}\"", self.var('a'))
    }

    fn mount(&self) -> String {
        format!("\"${}\"", self.var('m'))
    }

    fn stamp(&self) -> String {
        format!("\"${}{STAMP_SUFFIX}\"", self.var('m'))
    }

    fn fingerprint(&self) -> String {
        format!("\"${}{FINGERPRINT_SUFFIX}\"", self.var('m'))
    }

    fn partial(&self) -> String {
        format!("\"${}\"", self.var('t'))
    }
}

fn clear(slot: &Slot) -> String {
    format!(
        "rm -rf -- {} {} {}",
        slot.mount(),
        slot.stamp(),
        slot.fingerprint()
    )
}

/// Test that the archive path is the link to this slot's extraction
fn linked(slot: &Slot) -> String {
    format!(
        "[[ -L {a} && \"$(readlink -- {a})\" == {m} ]]",
        a = slot.archive(),
        m = slot.mount()
    )
}

/// Test that nothing, not even a dangling link, occupies `path`
fn vacant(path: &str) -> String {
    format!("[[ ! -e {path} && ! -L {path} ]]")
}

fn stow_exists(slot: &Slot) -> String {
    format!("[[ -e {s} || -L {s} ]]", s = slot.stow())
}

fn changed(slot: &Slot) -> String {
    format!(
        "[[ ! -f {fp} || \"$({script})\" != \"$(cat {fp})\" ]]",
        fp = slot.fingerprint(),
        script = fingerprint_script(&slot.mount())
    )
}

/// Put back a stow left over from a job that never unmounted
fn recover(slot: &Slot) -> String {
    let (a, s) = (slot.archive(), slot.stow());
    shell::if_then(
        &stow_exists(slot),
        &[shell::if_else(
            &format!("{} || {}", vacant(&a), linked(slot)),
            &[
                shell::log_expanding(&format!("restoring stowed archive ${}", slot.var('a'))),
                format!("rm -f -- {a}"),
                format!("mv -- {s} {a}"),
            ],
            &[
                shell::log_expanding(&format!(
                    "archive ${} was replaced, dropping its stale stow",
                    slot.var('a')
                )),
                format!("rm -f -- {s}"),
                clear(slot),
            ],
        )],
    )
}

/// Mount an existing archive: recover, extract unless current, stow, link
fn open_existing(slot: &Slot, record_fingerprint: bool) -> String {
    let (a, s, m) = (slot.archive(), slot.stow(), slot.mount());
    let identity = slot.var('s');

    shell::lines([
        recover(slot),
        shell::if_then(
            &format!("[[ ! -f {a} ]]"),
            &[
                shell::log_error_var(&slot.var('k'), "archive is missing or not a regular file"),
                "exit 1".to_string(),
            ],
        ),
        format!("{identity}=\"$(stat -L -c '%s %Y' -- {a})\""),
        shell::if_else(
            &format!(
                "[[ -d {m} && -f {st} && \"$(cat {st})\" == \"${identity}\" ]]",
                st = slot.stamp()
            ),
            &[shell::log_expanding(&format!(
                "reusing extracted archive ${}",
                slot.var('a')
            ))],
            &[
                clear(slot),
                format!("mkdir -p -- {m}"),
                shell::log_expanding(&format!("extracting archive ${}", slot.var('a'))),
                format!("tar -xf {a} -C {m}"),
                format!("printf '%s\\n' \"${identity}\" > {}", slot.stamp()),
            ],
        ),
        if record_fingerprint {
            format!("{} > {}", fingerprint_script(&m), slot.fingerprint())
        } else {
            String::new()
        },
        format!("mv -- {a} {s}"),
        format!("ln -s -- {m} {a}"),
        format!("touch -h -r {s} -- {a}"),
    ])
}

/// Link an empty directory where the output archive will go
fn open_output(slot: &Slot) -> String {
    let (a, s, m) = (slot.archive(), slot.stow(), slot.mount());
    shell::lines([
        shell::if_then(
            &format!("[[ -e {s} || -L {s} ]]"),
            &[
                shell::log_error_var(
                    &slot.var('k'),
                    "a stowed copy of the output archive exists, restore or remove it first",
                ),
                "exit 1".to_string(),
            ],
        ),
        format!("mkdir -p -- \"$(dirname -- {a})\""),
        format!("rm -rf -- {a}"),
        clear(slot),
        format!("mkdir -p -- {m}"),
        format!("ln -s -- {m} {a}"),
    ])
}

/// Remove the link, put the stowed archive back, then apply `policy`
fn unmount(slot: &Slot, policy: ClearMounts) -> String {
    let (a, s) = (slot.archive(), slot.stow());
    let clearing = match policy {
        ClearMounts::Always => clear(slot),
        ClearMounts::Auto => shell::if_then(
            &changed(slot),
            &[
                shell::log_expanding(&format!(
                    "mounted contents of ${} changed, discarding the extraction",
                    slot.var('a')
                )),
                clear(slot),
            ],
        ),
        ClearMounts::Never => String::new(),
    };
    shell::lines([
        shell::if_then(&linked(slot), &[format!("rm -f -- {a}")]),
        shell::if_then(
            &format!("{} && {}", stow_exists(slot), vacant(&a)),
            &[format!("mv -- {s} {a}")],
        ),
        clearing,
    ])
}

/// Pack the extraction into the archive path through a temporary file
fn pack(slot: &Slot) -> String {
    let (a, m, t) = (slot.archive(), slot.mount(), slot.partial());
    shell::lines([
        shell::log_expanding(&format!("packing archive ${}", slot.var('a'))),
        format!("rm -f -- {t}"),
        format!("tar -caf {t} -C {m} ."),
        format!("rm -f -- {a}"),
        format!("mv -- {t} {a}"),
    ])
}

fn discard_output(slot: &Slot) -> String {
    shell::lines([
        shell::if_then(&linked(slot), &[format!("rm -f -- {}", slot.archive())]),
        clear(slot),
    ])
}
