//! Isolated package environments
//!
//! An environment is a virtualenv under `env_root/<key>/venv`, where the
//! key covers the package list and the contents of the requirement files.
//! Jobs that ask for the same packages share one environment; it is built
//! by whichever job gets the lock first and never rebuilt afterwards.
//!
//! Commands reach the environment by absolute path or through `PATH`,
//! never by sourcing an activate script.

use crate::cache::ResourceCache;
use crate::enhance::Enhancer;
use crate::error::{BoostError, BoostResult};
use crate::hash::HashKey;
use crate::process;
use crate::shell;
use crate::template::escape_braces;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Packages and requirement files making up an environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvSpec {
    packages: Vec<String>,
    requirements: Vec<PathBuf>,
    requirement_contents: Vec<String>,
}

impl EnvSpec {
    /// Read the requirement files and validate the spec
    pub fn new<P, R>(packages: P, requirements: R) -> BoostResult<Self>
    where
        P: IntoIterator,
        P::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<PathBuf>,
    {
        let packages: Vec<String> = packages
            .into_iter()
            .map(Into::into)
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        let requirements: Vec<PathBuf> = requirements.into_iter().map(Into::into).collect();

        if packages.is_empty() && requirements.is_empty() {
            return Err(BoostError::spec(
                "an environment needs at least one package or requirements file",
            ));
        }

        let requirement_contents = requirements
            .iter()
            .map(|path| {
                fs::read_to_string(path).map_err(|e| {
                    BoostError::spec(format!(
                        "cannot read requirements file {}: {}",
                        path.display(),
                        e
                    ))
                })
            })
            .collect::<BoostResult<Vec<_>>>()?;

        Ok(Self {
            packages,
            requirements,
            requirement_contents,
        })
    }

    pub fn packages(&self) -> &[String] {
        &self.packages
    }

    pub fn requirements(&self) -> &[PathBuf] {
        &self.requirements
    }

    /// Cache key; package order and requirement file order do not matter
    pub fn key(&self) -> HashKey {
        let items = self
            .packages
            .iter()
            .map(|p| format!("pkg:{p}"))
            .chain(self.requirement_contents.iter().map(|c| format!("req:{}", c.trim())));
        HashKey::from_items(items)
    }
}

/// Produces the shell text that populates a fresh environment
pub trait EnvBuilder: fmt::Debug + Send + Sync {
    /// Template text creating `venv` with everything in `spec` installed
    fn build_script(&self, venv: &Path, spec: &EnvSpec) -> String;
}

/// Builds environments with virtualenv and pip
#[derive(Debug, Clone)]
pub struct PipBuilder {
    /// Command creating the environment; the venv path is appended
    pub create_command: String,
    /// Extra flags for every `pip install` call (template text)
    pub pip_flags: String,
    /// Upgrade pip before installing anything
    pub upgrade_pip: bool,
}

impl Default for PipBuilder {
    fn default() -> Self {
        Self {
            create_command: "virtualenv --no-download".to_string(),
            pip_flags: String::new(),
            upgrade_pip: true,
        }
    }
}

impl EnvBuilder for PipBuilder {
    fn build_script(&self, venv: &Path, spec: &EnvSpec) -> String {
        let python = shell::dquote_path(&venv.join("bin").join("python"));
        let install = if self.pip_flags.trim().is_empty() {
            format!("{python} -m pip install")
        } else {
            format!("{python} -m pip install {}", self.pip_flags.trim())
        };

        let requirements: Vec<String> = spec
            .requirements()
            .iter()
            .map(|r| format!("-r {}", shell::dquote(&escape_braces(&r.to_string_lossy()))))
            .collect();
        let packages: Vec<String> = spec
            .packages()
            .iter()
            .map(|p| escape_braces(&shell::quote(p)))
            .collect();

        shell::lines([
            format!("{} {}", self.create_command, shell::dquote_path(venv)),
            if self.upgrade_pip {
                format!("{install} --upgrade pip")
            } else {
                String::new()
            },
            if requirements.is_empty() {
                String::new()
            } else {
                format!("{install} {}", requirements.join(" "))
            },
            if packages.is_empty() {
                String::new()
            } else {
                format!("{install} {}", packages.join(" "))
            },
        ])
    }
}

/// How the wrapped command reaches the environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum EnvMode {
    /// Run the command with the environment's `bin` first on `PATH`
    #[default]
    Run,
    /// Run the command as arguments to the environment's python
    Python,
    /// The command starts with an executable installed in the environment
    Script,
    /// Only make sure the environment exists before the command
    Prepare,
}

/// Enhancer providing a cached package environment
#[derive(Debug, Clone)]
pub struct EnvironmentProvisioner {
    spec: EnvSpec,
    cache: ResourceCache,
    builder: Arc<dyn EnvBuilder>,
    mode: EnvMode,
}

impl EnvironmentProvisioner {
    pub fn new(spec: EnvSpec, cache: ResourceCache) -> Self {
        Self {
            spec,
            cache,
            builder: Arc::new(PipBuilder::default()),
            mode: EnvMode::default(),
        }
    }

    /// Same environment, built by `builder`
    pub fn with_builder(&self, builder: impl EnvBuilder + 'static) -> Self {
        Self {
            builder: Arc::new(builder),
            ..self.clone()
        }
    }

    /// Same environment, wrapping commands in `mode`
    pub fn with_mode(&self, mode: EnvMode) -> Self {
        Self {
            mode,
            ..self.clone()
        }
    }

    pub fn spec(&self) -> &EnvSpec {
        &self.spec
    }

    pub fn key(&self) -> HashKey {
        self.spec.key()
    }

    /// Cache entry directory
    pub fn dir(&self) -> PathBuf {
        self.cache.entry_path(&self.key())
    }

    pub fn venv(&self) -> PathBuf {
        self.dir().join("venv")
    }

    pub fn bin(&self) -> PathBuf {
        self.venv().join("bin")
    }

    pub fn python_path(&self) -> PathBuf {
        self.bin().join("python")
    }

    /// Shell text making sure the environment exists
    pub fn ensure_fragment(&self) -> String {
        let build = self.builder.build_script(&self.venv(), &self.spec);
        self.cache
            .ensure_fragment(&self.key(), "python environment", &build)
    }

    /// Build the environment now, from this process
    pub fn ensure(&self) -> BoostResult<PathBuf> {
        let build = self.builder.build_script(&self.venv(), &self.spec);
        let dir = self.cache.ensure(&self.key(), |_| {
            process::run_bash_checked(&build, "building python environment").map(|_| ())
        })?;
        info!("Environment ready at {}", dir.display());
        Ok(dir.join("venv"))
    }

    /// Run `cmd` with the environment's executables first on `PATH`
    pub fn run(&self, cmd: &str) -> String {
        let body = shell::lines([
            format!(
                "export PATH={}:\"$PATH\"",
                shell::dquote_path(&self.bin())
            ),
            cmd.to_string(),
        ]);
        shell::lines([self.ensure_fragment(), shell::Guarded::new(body).render()])
    }

    /// Run `cmd` as arguments to the environment's python
    pub fn python(&self, cmd: &str) -> String {
        shell::lines([
            self.ensure_fragment(),
            format!("{} {}", shell::dquote_path(&self.python_path()), cmd.trim_start()),
        ])
    }

    /// Run `cmd`, whose first word names an executable in the environment
    pub fn script(&self, cmd: &str) -> String {
        let bin = format!("{}/", self.bin().display());
        shell::lines([
            self.ensure_fragment(),
            format!("{}{}", shell::dquote(&bin), cmd.trim()),
        ])
    }

    /// Make sure the environment exists, then run `cmd` unchanged
    pub fn prepare(&self, cmd: &str) -> String {
        shell::lines([self.ensure_fragment(), cmd.to_string()])
    }
}

impl Enhancer for EnvironmentProvisioner {
    fn wrap(&self, cmd: &str) -> String {
        match self.mode {
            EnvMode::Run => self.run(cmd),
            EnvMode::Python => self.python(cmd),
            EnvMode::Script => self.script(cmd),
            EnvMode::Prepare => self.prepare(cmd),
        }
    }

    fn log_format(&self, cmd: &str) -> String {
        match self.mode {
            EnvMode::Python => format!("python {}", cmd.trim_start()),
            _ => cmd.to_string(),
        }
    }
}
