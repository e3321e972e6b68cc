//! Mount command - drive archive mounts from outside a job

use crate::cli::args::{MountAction, MountArgs, OutputFormat};
use crate::config::Config;
use crate::enhance::archive::{LocalHost, MountDriver, MountLayout, MountState};
use crate::error::BoostResult;
use console::style;
use std::path::Path;
use tracing::info;

/// Execute the mount command
pub async fn execute(args: MountArgs, config: &Config) -> BoostResult<()> {
    let mount_root = config.paths.mount_root();

    match args.action {
        MountAction::Status { archive, format } => {
            let driver = driver(&mount_root, &archive)?;
            let state = driver.state()?;
            let current = driver.is_current()?;
            print_status(driver.layout(), state, current, format)?;
        }
        MountAction::Open { archive } => {
            let driver = driver(&mount_root, &archive)?;
            let mount = driver.open()?;
            println!("{} {}", style("✓").green(), mount.display());
        }
        MountAction::Close {
            archive,
            repack,
            clear_mounts,
        } => {
            let driver = driver(&mount_root, &archive)?;
            if repack {
                let written = driver.repack()?;
                if written {
                    println!("{} Repacked {}", style("✓").green(), archive.display());
                } else {
                    println!("{} Unchanged {}", style("✓").green(), archive.display());
                }
            } else {
                let policy = clear_mounts.unwrap_or(config.archive.clear_mounts);
                let state = driver.close(policy)?;
                println!("{} {} ({})", style("✓").green(), archive.display(), state);
            }
        }
        MountAction::Restore { archive } => {
            let driver = driver(&mount_root, &archive)?;
            let state = driver.restore()?;
            info!("Restored {} to {}", archive.display(), state);
            println!("{} {} ({})", style("✓").green(), archive.display(), state);
        }
    }
    Ok(())
}

fn driver(mount_root: &Path, archive: &Path) -> BoostResult<MountDriver<LocalHost>> {
    let layout = MountLayout::new(mount_root, archive)?;
    Ok(MountDriver::new(LocalHost, layout))
}

fn print_status(
    layout: &MountLayout,
    state: MountState,
    current: bool,
    format: OutputFormat,
) -> BoostResult<()> {
    match format {
        OutputFormat::Table => {
            let state_display = match state {
                MountState::Absent => style("absent").dim().to_string(),
                MountState::Stowed => style("stowed").yellow().to_string(),
                MountState::Mounted => style("mounted").green().to_string(),
                MountState::Dirty => style("dirty").red().to_string(),
            };
            println!("{:<12} {}", "ARCHIVE", layout.archive.display());
            println!("{:<12} {}", "STATE", state_display);
            println!("{:<12} {}", "KEY", layout.key);
            println!("{:<12} {}", "EXTRACTION", layout.mount.display());
            println!("{:<12} {}", "CURRENT", if current { "yes" } else { "no" });
        }
        OutputFormat::Json => {
            #[derive(serde::Serialize)]
            struct StatusJson<'a> {
                state: MountState,
                current: bool,
                #[serde(flatten)]
                layout: &'a MountLayout,
            }
            let json = StatusJson {
                state,
                current,
                layout,
            };
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Plain => println!("{}", state),
    }
    Ok(())
}
