//! CLI argument definitions using clap derive

use crate::enhance::{ClearMounts, EnvMode};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// shboost - race-free shell fragments for workflow jobs
///
/// Wraps job commands with cached environments, archive mounts and virtual
/// displays, and packages the result as a cached executable script.
#[derive(Parser, Debug)]
#[command(name = "shboost")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "SHBOOST_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the shell fragment for a command
    Render(ComposeArgs),

    /// Compose a command and run it with bash
    Run(ComposeArgs),

    /// Print the cache key of a package set or archive
    Hash(HashArgs),

    /// Manage python environments
    Env(EnvArgs),

    /// Inspect and repair archive mounts
    Mount(MountArgs),

    /// Inspect cache roots
    Cache(CacheArgs),

    /// Show or edit configuration
    Config(ConfigArgs),
}

/// Enhancers to compose around a command
#[derive(Args, Debug, Clone, Default)]
pub struct ComposeArgs {
    /// Package to install into the job's environment (repeatable)
    #[arg(short, long = "package")]
    pub packages: Vec<String>,

    /// Requirements file for the job's environment (repeatable)
    #[arg(short, long = "requirement")]
    pub requirements: Vec<PathBuf>,

    /// How the command reaches the environment
    #[arg(long, value_enum, default_value_t = EnvMode::Run)]
    pub env_mode: EnvMode,

    /// Archive to mount for reading (repeatable)
    #[arg(long = "input")]
    pub inputs: Vec<String>,

    /// Archive to create from a mounted directory (repeatable)
    #[arg(long = "output")]
    pub outputs: Vec<String>,

    /// Archive to mount, change and repack (repeatable)
    #[arg(long = "modify")]
    pub modify: Vec<String>,

    /// What happens to input extractions after the job (default: from config)
    #[arg(long, value_enum)]
    pub clear_mounts: Option<ClearMounts>,

    /// Run under a virtual display unless DISPLAY is set
    #[arg(long)]
    pub xvfb: bool,

    /// DataLad dataset whose annexed inputs are fetched and outputs unlocked
    #[arg(long, value_name = "ROOT")]
    pub datalad: Option<PathBuf>,

    /// Save outputs in the dataset with this message after the command
    #[arg(long, value_name = "MSG", requires = "datalad")]
    pub datalad_message: Option<String>,

    /// Shell variable to set before the command (NAME=EXPR, repeatable)
    #[arg(short = 'x', long = "export")]
    pub exports: Vec<String>,

    /// Package the composed script as a cached executable
    #[arg(short, long)]
    pub boost: bool,

    /// Show the packaged call instead of hiding it
    #[arg(long)]
    pub debug: bool,

    /// Command statements; each argument is one line
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

/// Arguments for the hash command
#[derive(Parser, Debug)]
pub struct HashArgs {
    /// Package (repeatable)
    #[arg(short, long = "package")]
    pub packages: Vec<String>,

    /// Requirements file (repeatable)
    #[arg(short, long = "requirement")]
    pub requirements: Vec<PathBuf>,

    /// Archive path; prints the mount key instead
    #[arg(long, conflicts_with_all = ["packages", "requirements"])]
    pub archive: Option<PathBuf>,
}

/// Arguments for the env command
#[derive(Parser, Debug)]
pub struct EnvArgs {
    /// Subcommand for env
    #[command(subcommand)]
    pub action: EnvAction,
}

/// Env subcommands
#[derive(Subcommand, Debug)]
pub enum EnvAction {
    /// Build the environment now unless it already exists
    Ensure {
        /// Package (repeatable)
        #[arg(short, long = "package")]
        packages: Vec<String>,

        /// Requirements file (repeatable)
        #[arg(short, long = "requirement")]
        requirements: Vec<PathBuf>,
    },

    /// Print the environment directory
    Path {
        /// Package (repeatable)
        #[arg(short, long = "package")]
        packages: Vec<String>,

        /// Requirements file (repeatable)
        #[arg(short, long = "requirement")]
        requirements: Vec<PathBuf>,
    },
}

/// Arguments for the mount command
#[derive(Parser, Debug)]
pub struct MountArgs {
    /// Subcommand for mount
    #[command(subcommand)]
    pub action: MountAction,
}

/// Mount subcommands
#[derive(Subcommand, Debug)]
pub enum MountAction {
    /// Show the mount state of an archive
    Status {
        archive: PathBuf,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Mount an archive as a directory
    Open { archive: PathBuf },

    /// Unmount an archive
    Close {
        archive: PathBuf,

        /// Pack changed contents into the archive
        #[arg(long)]
        repack: bool,

        /// What happens to the extraction (default: from config)
        #[arg(long, value_enum)]
        clear_mounts: Option<ClearMounts>,
    },

    /// Put the original archive back after a killed job
    Restore { archive: PathBuf },
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List environments, extractions and script artifacts
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Output format for listing commands
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}
