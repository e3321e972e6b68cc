//! Configuration schema for shboost
//!
//! Configuration is stored at `~/.config/shboost/config.toml`

use crate::boost::Boost;
use crate::cache::ResourceCache;
use crate::config::ConfigManager;
use crate::enhance::{ClearMounts, DisplayGuard, PipBuilder};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Cache roots
    pub paths: PathsConfig,

    /// Build lock settings
    pub lock: LockConfig,

    /// Script packaging
    pub boost: BoostConfig,

    /// Python environments
    pub env: EnvConfig,

    /// Virtual display
    pub display: DisplayConfig,

    /// Archive mounts
    pub archive: ArchiveConfig,
}

impl Config {
    /// Check values serde cannot check
    pub fn validate(&self) -> Result<(), String> {
        if !matches!(self.general.log_format.as_str(), "text" | "json") {
            return Err(format!(
                "general.log_format must be \"text\" or \"json\", not {:?}",
                self.general.log_format
            ));
        }
        if self.env.create_command.trim().is_empty() {
            return Err("env.create_command must not be empty".to_string());
        }
        if self.display.launcher.trim().is_empty() {
            return Err("display.launcher must not be empty".to_string());
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock.timeout_secs)
    }

    /// Resource cache holding environments
    pub fn env_cache(&self) -> ResourceCache {
        ResourceCache::new(self.paths.env_root(), self.lock_timeout())
    }

    pub fn pip_builder(&self) -> PipBuilder {
        PipBuilder {
            create_command: self.env.create_command.clone(),
            pip_flags: self.env.pip_flags.clone(),
            upgrade_pip: self.env.upgrade_pip,
        }
    }

    pub fn display_guard(&self) -> DisplayGuard {
        DisplayGuard::new()
            .with_launcher(self.display.launcher.clone())
            .with_server_args(self.display.server_args.clone())
    }

    pub fn boost(&self) -> Boost {
        Boost::new(self.paths.scripts_root())
            .with_debug(self.boost.debug)
            .with_color(self.boost.color)
            .with_inline(self.boost.inline)
    }
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// Cache roots; unset roots live under the user cache directory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Environments (`<root>/<key>/venv`)
    pub env_root: Option<PathBuf>,

    /// Archive extractions (`<root>/<key>`)
    pub mount_root: Option<PathBuf>,

    /// Packaged scripts (`<root>/<content hash>`)
    pub scripts_root: Option<PathBuf>,
}

impl PathsConfig {
    pub fn env_root(&self) -> PathBuf {
        self.env_root
            .clone()
            .unwrap_or_else(|| ConfigManager::cache_base().join("envs"))
    }

    pub fn mount_root(&self) -> PathBuf {
        self.mount_root
            .clone()
            .unwrap_or_else(|| ConfigManager::cache_base().join("mounts"))
    }

    pub fn scripts_root(&self) -> PathBuf {
        self.scripts_root
            .clone()
            .unwrap_or_else(|| ConfigManager::cache_base().join("scripts"))
    }
}

/// Build lock settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Seconds a job waits for another job's build (0 = do not wait)
    pub timeout_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self { timeout_secs: 900 }
    }
}

/// Script packaging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostConfig {
    /// Show the artifact call instead of hiding it
    pub debug: bool,

    /// Colour the command shown in the leading comment
    pub color: bool,

    /// Emit the composed script itself instead of an artifact call
    pub inline: bool,
}

/// Python environment settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvConfig {
    /// Command creating an environment; the venv path is appended
    pub create_command: String,

    /// Extra flags for every pip install
    pub pip_flags: String,

    /// Upgrade pip before installing packages
    pub upgrade_pip: bool,
}

impl Default for EnvConfig {
    fn default() -> Self {
        let pip = PipBuilder::default();
        Self {
            create_command: pip.create_command,
            pip_flags: pip.pip_flags,
            upgrade_pip: pip.upgrade_pip,
        }
    }
}

/// Virtual display settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Launcher used when no display is set
    pub launcher: String,

    /// Arguments for the X server
    pub server_args: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            launcher: "xvfb-run -a".to_string(),
            server_args: String::new(),
        }
    }
}

/// Archive mount settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// What happens to input extractions after the job
    pub clear_mounts: ClearMounts,
}
