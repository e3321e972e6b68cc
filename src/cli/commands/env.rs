//! Env command - build and locate python environments

use crate::cli::args::{EnvAction, EnvArgs};
use crate::config::Config;
use crate::enhance::{EnvSpec, EnvironmentProvisioner};
use crate::error::{BoostError, BoostResult};
use console::style;
use std::path::PathBuf;

/// Execute the env command
pub async fn execute(args: EnvArgs, config: &Config) -> BoostResult<()> {
    match args.action {
        EnvAction::Ensure {
            packages,
            requirements,
        } => {
            let provisioner = provisioner(packages, requirements, config)?;
            // Waiting on the build lock blocks; keep it off the async workers
            let venv = tokio::task::spawn_blocking(move || provisioner.ensure())
                .await
                .map_err(|e| BoostError::Internal(format!("environment build panicked: {e}")))??;
            println!("{} {}", style("✓").green(), venv.display());
        }
        EnvAction::Path {
            packages,
            requirements,
        } => {
            let provisioner = provisioner(packages, requirements, config)?;
            println!("{}", provisioner.venv().display());
        }
    }
    Ok(())
}

fn provisioner(
    packages: Vec<String>,
    requirements: Vec<PathBuf>,
    config: &Config,
) -> BoostResult<EnvironmentProvisioner> {
    let spec = EnvSpec::new(packages, requirements)?;
    Ok(EnvironmentProvisioner::new(spec, config.env_cache()).with_builder(config.pip_builder()))
}
