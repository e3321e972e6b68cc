//! Error types for shboost
//!
//! All modules use `BoostResult<T>` as their return type. The variants that
//! matter to a running job (`LockTimeout`, `BuildFailure`, `ArtifactWrite`,
//! `SpecValidation`) are also mirrored by the generated shell, which reports
//! them on stderr and exits non-zero.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for shboost operations
pub type BoostResult<T> = Result<T, BoostError>;

/// All errors that can occur in shboost
#[derive(Error, Debug)]
pub enum BoostError {
    // Provisioning errors
    #[error("Timed out after {waited_secs}s waiting for lock {name}")]
    LockTimeout { name: String, waited_secs: u64 },

    #[error("Build failed for resource {key}: {reason}")]
    BuildFailure { key: String, reason: String },

    #[error("Failed to write script artifact {path}: {source}")]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid resource specification: {0}")]
    SpecValidation(String),

    #[error("Invalid template {template:?}: {reason}")]
    Template { template: String, reason: String },

    #[error("Archive mount cannot go from {from} on {event}")]
    MountTransition { from: String, event: String },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command execution error: {command}, stderr: {stderr}")]
    CommandExecution { command: String, stderr: String },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BoostError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a command execution error
    pub fn command_exec(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::CommandExecution {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    /// Create a spec validation error
    pub fn spec(reason: impl Into<String>) -> Self {
        Self::SpecValidation(reason.into())
    }

    /// Create a template error
    pub fn template(template: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Template {
            template: template.into(),
            reason: reason.into(),
        }
    }

    /// Whether the failure was raised before any shell text was emitted
    pub fn is_composition_error(&self) -> bool {
        matches!(self, Self::SpecValidation(_) | Self::Template { .. })
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::LockTimeout { .. } => {
                Some("Another job may still be building; raise lock.timeout_secs or retry")
            }
            Self::BuildFailure { .. } => {
                Some("Partial state was removed; fix the package list and rerun the job")
            }
            Self::ArtifactWrite { .. } => Some("Check permissions on paths.scripts_root"),
            Self::Template { .. } => Some("Use {{ and }} for literal braces"),
            Self::MountTransition { .. } => Some("Run: shboost mount restore <archive>"),
            _ => None,
        }
    }
}
