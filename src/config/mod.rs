//! Configuration management for shboost
//!
//! Settings come from `config.toml`, then the cache roots can be moved per
//! process with `SHBOOST_ENV_ROOT`, `SHBOOST_MOUNT_ROOT` and
//! `SHBOOST_SCRIPTS_ROOT` (cluster jobs usually point them at node-local
//! scratch without touching the shared file).

pub mod schema;

pub use schema::Config;

use crate::error::{BoostError, BoostResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Environment variables overriding `[paths]`
pub const ENV_ROOT_VAR: &str = "SHBOOST_ENV_ROOT";
pub const MOUNT_ROOT_VAR: &str = "SHBOOST_MOUNT_ROOT";
pub const SCRIPTS_ROOT_VAR: &str = "SHBOOST_SCRIPTS_ROOT";

const DEFAULT_HEADER: &str = "\
# shboost configuration
# Unset [paths] roots live under the user cache directory.
";

/// Locates, reads and writes the configuration file
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// `~/.config/shboost/config.toml`
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("shboost")
            .join("config.toml")
    }

    /// Base directory for every cache root that is not configured explicitly
    pub fn cache_base() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("shboost")
    }

    /// Effective configuration: file (or defaults), then root overrides
    pub async fn load(&self) -> BoostResult<Config> {
        let mut config = if self.config_path.exists() {
            let content = fs::read_to_string(&self.config_path).await.map_err(|e| {
                BoostError::io(
                    format!("reading config from {}", self.config_path.display()),
                    e,
                )
            })?;
            self.parse(&content)?
        } else {
            debug!("Config file not found, using defaults");
            Config::default()
        };

        apply_root_overrides(&mut config, |name| std::env::var(name).ok());
        Ok(config)
    }

    /// Parse and validate file contents, attributing errors to this file
    pub fn parse(&self, content: &str) -> BoostResult<Config> {
        let invalid = |reason: String| BoostError::ConfigInvalid {
            path: self.config_path.clone(),
            reason,
        };
        let config: Config = toml::from_str(content).map_err(|e| invalid(e.to_string()))?;
        config.validate().map_err(invalid)?;
        Ok(config)
    }

    /// Write the default configuration; an existing file is only replaced
    /// with `force`. Returns whether the file was written.
    pub async fn write_default(&self, force: bool) -> BoostResult<bool> {
        if self.config_path.exists() && !force {
            return Ok(false);
        }
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| BoostError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        let content = format!(
            "{DEFAULT_HEADER}\n{}",
            toml::to_string_pretty(&Config::default())?
        );
        fs::write(&self.config_path, content).await.map_err(|e| {
            BoostError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration written to {}", self.config_path.display());
        Ok(true)
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Replace cache roots named by non-empty override variables
fn apply_root_overrides<F>(config: &mut Config, var: F)
where
    F: Fn(&str) -> Option<String>,
{
    let paths = &mut config.paths;
    for (name, slot) in [
        (ENV_ROOT_VAR, &mut paths.env_root),
        (MOUNT_ROOT_VAR, &mut paths.mount_root),
        (SCRIPTS_ROOT_VAR, &mut paths.scripts_root),
    ] {
        if let Some(value) = var(name).filter(|v| !v.trim().is_empty()) {
            debug!("{} overrides the configured root: {}", name, value);
            *slot = Some(PathBuf::from(value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enhance::ClearMounts;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_default_when_missing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nonexistent.toml");
        let manager = ConfigManager::with_path(path);

        let config = manager.load().await.unwrap();
        assert_eq!(config.lock.timeout_secs, 900);
    }

    #[tokio::test]
    async fn written_default_loads_back() {
        let temp = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(temp.path().join("nested/config.toml"));

        assert!(manager.write_default(false).await.unwrap());
        let text = std::fs::read_to_string(manager.path()).unwrap();
        assert!(text.starts_with("# shboost configuration"));

        let loaded = manager.parse(&text).unwrap();
        assert_eq!(loaded.archive.clear_mounts, ClearMounts::Auto);
    }

    #[tokio::test]
    async fn existing_file_needs_force() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[lock]\ntimeout_secs = 5\n").unwrap();
        let manager = ConfigManager::with_path(path.clone());

        assert!(!manager.write_default(false).await.unwrap());
        assert!(std::fs::read_to_string(&path).unwrap().contains("timeout_secs = 5"));
        assert!(manager.write_default(true).await.unwrap());
        assert!(std::fs::read_to_string(&path).unwrap().contains("timeout_secs = 900"));
    }

    #[tokio::test]
    async fn partial_file_keeps_other_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[boost]\ndebug = true\n").unwrap();

        let config = ConfigManager::with_path(path).load().await.unwrap();
        assert!(config.boost.debug);
        assert_eq!(config.env.create_command, "virtualenv --no-download");
    }

    #[tokio::test]
    async fn invalid_values_are_reported() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[general]\nlog_format = \"xml\"\n").unwrap();

        let err = ConfigManager::with_path(path.clone()).load().await.unwrap_err();
        assert!(matches!(err, BoostError::ConfigInvalid { path: ref p, .. } if *p == path));
    }

    #[test]
    fn root_overrides_replace_configured_roots() {
        let mut config = Config::default();
        config.paths.env_root = Some(PathBuf::from("/shared/envs"));
        config.paths.scripts_root = Some(PathBuf::from("/shared/scripts"));

        apply_root_overrides(&mut config, |name| match name {
            ENV_ROOT_VAR => Some("/scratch/envs".to_string()),
            MOUNT_ROOT_VAR => Some("/scratch/mounts".to_string()),
            SCRIPTS_ROOT_VAR => Some("  ".to_string()),
            _ => None,
        });

        assert_eq!(config.paths.env_root(), PathBuf::from("/scratch/envs"));
        assert_eq!(config.paths.mount_root(), PathBuf::from("/scratch/mounts"));
        // blank values are ignored
        assert_eq!(config.paths.scripts_root(), PathBuf::from("/shared/scripts"));
    }
}
