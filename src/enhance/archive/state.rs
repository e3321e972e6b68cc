//! Stow/swap state machine for one archive path

use crate::error::{BoostError, BoostResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where an archive stands in the stow/swap cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountState {
    /// The archive is a plain file at its path (or does not exist yet)
    Absent,
    /// The archive was moved to its stow path and nothing is linked in place
    Stowed,
    /// The archive path links to an extraction matching the archive
    Mounted,
    /// The linked extraction was changed and has to be repacked
    Dirty,
}

impl fmt::Display for MountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::Stowed => write!(f, "stowed"),
            Self::Mounted => write!(f, "mounted"),
            Self::Dirty => write!(f, "dirty"),
        }
    }
}

/// A step of the stow/swap cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountEvent {
    /// Move the archive to its stow path
    Stow,
    /// Link the archive path to the extraction
    Link,
    /// Contents were found to differ from the recorded fingerprint
    Drift,
    /// Remove the link at the archive path
    Unlink,
    /// Move the stowed archive back to its path
    Unstow,
    /// Pack the extraction into a new archive and drop the stow
    Repack,
}

impl fmt::Display for MountEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stow => write!(f, "stow"),
            Self::Link => write!(f, "link"),
            Self::Drift => write!(f, "drift"),
            Self::Unlink => write!(f, "unlink"),
            Self::Unstow => write!(f, "unstow"),
            Self::Repack => write!(f, "repack"),
        }
    }
}

impl MountState {
    /// State after `event`, or a `MountTransition` error if `event` is not
    /// allowed from here
    pub fn on(self, event: MountEvent) -> BoostResult<Self> {
        use MountEvent::*;
        use MountState::*;

        match (self, event) {
            (Absent, Stow) => Ok(Stowed),
            (Stowed, Link) => Ok(Mounted),
            (Mounted, Drift) => Ok(Dirty),
            (Mounted | Dirty, Unlink) => Ok(Stowed),
            (Stowed, Unstow) => Ok(Absent),
            (Dirty, Repack) => Ok(Absent),
            (from, event) => Err(BoostError::MountTransition {
                from: from.to_string(),
                event: event.to_string(),
            }),
        }
    }

    /// Whether the archive path currently points into the mount root
    pub fn is_linked(self) -> bool {
        matches!(self, Self::Mounted | Self::Dirty)
    }
}
