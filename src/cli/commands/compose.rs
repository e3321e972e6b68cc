//! Render and run commands - compose enhancers around a job command

use crate::cli::args::ComposeArgs;
use crate::config::Config;
use crate::enhance::archive::ArchivePaths;
use crate::enhance::{
    compose_strict, ArchiveMount, Command, Datalad, DisplayGuard, Enhancer, EnvSpec,
    EnvironmentProvisioner, Exports,
};
use crate::error::{BoostError, BoostResult};
use crate::process;
use tracing::{debug, info};

/// Enhancers selected on the command line
///
/// Applied outermost first: dataset, archive mounts, display, exports,
/// environment. The dataset is outermost so annexed archives are fetched
/// before they are mounted; the environment is innermost so its python and
/// script modes see the job's own command first.
struct Composition {
    datalad: Option<Datalad>,
    mounts: Option<ArchiveMount>,
    display: Option<DisplayGuard>,
    exports: Option<Exports>,
    env: Option<EnvironmentProvisioner>,
}

impl Composition {
    fn from_args(args: &ComposeArgs, config: &Config) -> BoostResult<Self> {
        let paths = ArchivePaths {
            inputs: args.inputs.clone(),
            outputs: args.outputs.clone(),
            modify: args.modify.clone(),
        };
        let mounts = if paths.is_empty() {
            None
        } else {
            let clear = args.clear_mounts.unwrap_or(config.archive.clear_mounts);
            Some(ArchiveMount::new(config.paths.mount_root(), paths)?.with_clear_mounts(clear))
        };

        let env = if args.packages.is_empty() && args.requirements.is_empty() {
            None
        } else {
            let spec = EnvSpec::new(args.packages.clone(), args.requirements.clone())?;
            Some(
                EnvironmentProvisioner::new(spec, config.env_cache())
                    .with_builder(config.pip_builder())
                    .with_mode(args.env_mode),
            )
        };

        let exports = if args.exports.is_empty() {
            None
        } else {
            let vars = args
                .exports
                .iter()
                .map(|a| Exports::parse_assignment(a))
                .collect::<BoostResult<Vec<_>>>()?;
            Some(Exports::new(vars)?)
        };

        let datalad = match &args.datalad {
            Some(root) => {
                let datalad = Datalad::new(root)?;
                Some(match &args.datalad_message {
                    Some(message) => datalad.with_message(message.as_str()),
                    None => datalad,
                })
            }
            None => None,
        };

        Ok(Self {
            datalad,
            mounts,
            display: args.xvfb.then(|| config.display_guard()),
            exports,
            env,
        })
    }

    fn enhancers(&self) -> Vec<&dyn Enhancer> {
        let mut list: Vec<&dyn Enhancer> = Vec::new();
        if let Some(datalad) = &self.datalad {
            list.push(datalad);
        }
        if let Some(mounts) = &self.mounts {
            list.push(mounts);
        }
        if let Some(display) = &self.display {
            list.push(display);
        }
        if let Some(exports) = &self.exports {
            list.push(exports);
        }
        if let Some(env) = &self.env {
            list.push(env);
        }
        list
    }
}

/// Shell text for `args`, boosted if requested
pub fn compose(args: &ComposeArgs, config: &Config) -> BoostResult<String> {
    let composition = Composition::from_args(args, config)?;
    let enhancers = composition.enhancers();
    let cmd = Command::lines(args.command.iter().cloned());
    debug!("Composing {} enhancer(s)", enhancers.len());

    if args.boost {
        let boost = config.boost();
        let boost = if args.debug { boost.with_debug(true) } else { boost };
        return boost.apply(&enhancers, &cmd);
    }

    cmd.validate()?;
    if enhancers.is_empty() {
        Ok(cmd.render())
    } else {
        Ok(compose_strict(&enhancers, &cmd))
    }
}

/// Print the composed fragment
pub async fn render(args: ComposeArgs, config: &Config) -> BoostResult<()> {
    println!("{}", compose(&args, config)?);
    Ok(())
}

/// Compose and execute with bash, returning the script's exit code
pub async fn run(args: ComposeArgs, config: &Config) -> BoostResult<i32> {
    let text = compose(&args, config)?;
    let script = process::plain_shell(&text)?;
    info!("Running composed script ({} bytes)", script.len());

    let status = tokio::process::Command::new("bash")
        .arg("-c")
        .arg(&script)
        .status()
        .await
        .map_err(|e| BoostError::command_failed("bash -c <script>", e))?;

    // Killed by a signal: report the shell convention
    let code = status.code().unwrap_or(128);
    if code != 0 {
        debug!("Composed script exited with code {}", code);
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::args::{Cli, Commands};
    use clap::Parser;
    use tempfile::TempDir;

    fn compose_args(argv: &[&str]) -> ComposeArgs {
        let mut full = vec!["shboost", "render"];
        full.extend_from_slice(argv);
        match Cli::parse_from(full).command {
            Commands::Render(args) => args,
            _ => panic!("expected Render command"),
        }
    }

    fn config_in(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.paths.env_root = Some(dir.path().join("envs"));
        config.paths.mount_root = Some(dir.path().join("mounts"));
        config.paths.scripts_root = Some(dir.path().join("scripts"));
        config
    }

    #[test]
    fn bare_command_is_unchanged() {
        let dir = TempDir::new().unwrap();
        let out = compose(&compose_args(&["--", "echo {input}"]), &config_in(&dir)).unwrap();
        assert_eq!(out, "echo {input}");
    }

    #[test]
    fn enhancers_compose_in_strict_mode() {
        let dir = TempDir::new().unwrap();
        let args = compose_args(&["--xvfb", "-x", "A=1", "--", "echo $A"]);
        let out = compose(&args, &config_in(&dir)).unwrap();
        assert!(out.starts_with("set -euo pipefail\n"));
        assert!(out.contains("xvfb-run -a bash -c"));
        assert!(out.contains("A=1\necho $A"));
    }

    #[test]
    fn boost_writes_an_artifact() {
        let dir = TempDir::new().unwrap();
        let args = compose_args(&["--boost", "--debug", "--xvfb", "--", "glxinfo"]);
        let out = compose(&args, &config_in(&dir)).unwrap();
        assert!(out.starts_with("# shboost: packaged script"));
        assert_eq!(std::fs::read_dir(dir.path().join("scripts")).unwrap().count(), 1);
    }

    #[test]
    fn bad_specs_are_rejected() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let twice = compose_args(&["--input", "a.tar", "--modify", "a.tar", "--", "ls"]);
        assert!(compose(&twice, &config).unwrap_err().is_composition_error());

        let export = compose_args(&["-x", "nothing", "--", "ls"]);
        assert!(compose(&export, &config).is_err());

        let braces = compose_args(&["--", "awk '{print $1}'"]);
        assert!(compose(&braces, &config).unwrap_err().is_composition_error());
    }

    #[test]
    fn datalad_wraps_outside_the_mounts() {
        let dir = TempDir::new().unwrap();
        let args = compose_args(&[
            "--datalad", "/data/ds", "--input", "{input.db}", "--", "ls {input.db}",
        ]);
        let out = compose(&args, &config_in(&dir)).unwrap();
        let get = out.find("datalad get").unwrap();
        let mount = out.find("realpath -ms -- \"{input.db}\"").unwrap();
        assert!(get < mount);
        assert!(out.contains("for __sb_dl_p in {input.db}; do"));
    }

    #[tokio::test]
    async fn run_propagates_exit_code() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let ok = run(compose_args(&["-x", "A=0", "--", "exit $A"]), &config)
            .await
            .unwrap();
        assert_eq!(ok, 0);
        let failed = run(compose_args(&["-x", "A=3", "--", "exit $A"]), &config)
            .await
            .unwrap();
        assert_eq!(failed, 3);
    }
}
