//! Enhancers: composable command wrappers
//!
//! An enhancer turns a command fragment into a larger fragment that does
//! some setup and teardown around it. Enhancers are plain values; wrapping
//! never mutates them, and the text they return is a scheduler template.
//!
//! `compose(&[a, b, c], cmd)` is `a(b(c(cmd)))`: the first enhancer is the
//! outermost shell layer and runs its setup first.

pub mod archive;
pub mod datalad;
pub mod display;
pub mod env;
pub mod exports;

pub use archive::{ArchiveMount, ClearMounts};
pub use datalad::Datalad;
pub use display::DisplayGuard;
pub use env::{EnvBuilder, EnvMode, EnvSpec, EnvironmentProvisioner, PipBuilder};
pub use exports::Exports;

use crate::error::BoostResult;
use crate::shell;
use crate::template;

/// A transformation from a command fragment to a wrapping fragment
pub trait Enhancer {
    /// Wrap `cmd` with this enhancer's setup and teardown
    fn wrap(&self, cmd: &str) -> String;

    /// How `cmd` should be displayed to operators once wrapped
    fn log_format(&self, cmd: &str) -> String {
        cmd.to_string()
    }
}

impl<F> Enhancer for F
where
    F: Fn(&str) -> String,
{
    fn wrap(&self, cmd: &str) -> String {
        self(cmd)
    }
}

/// The innermost command of a composition
///
/// Multiple statements run in order; with strict mode in effect the first
/// failing statement aborts the whole script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    statements: Vec<String>,
}

impl Command {
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statements: vec![statement.into()],
        }
    }

    pub fn lines<I, S>(statements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            statements: statements.into_iter().map(Into::into).collect(),
        }
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    /// Check every statement is a well-formed template
    pub fn validate(&self) -> BoostResult<()> {
        self.statements.iter().try_for_each(|s| template::validate(s))
    }

    pub fn render(&self) -> String {
        shell::lines(&self.statements)
    }
}

impl From<&str> for Command {
    fn from(statement: &str) -> Self {
        Self::new(statement)
    }
}

impl From<String> for Command {
    fn from(statement: String) -> Self {
        Self::new(statement)
    }
}

/// Apply enhancers to `cmd`, outermost first
pub fn compose(enhancers: &[&dyn Enhancer], cmd: &Command) -> String {
    enhancers
        .iter()
        .rev()
        .fold(cmd.render(), |inner, enhancer| enhancer.wrap(&inner))
}

/// Display form of `cmd` after every enhancer's `log_format`
pub fn display_form(enhancers: &[&dyn Enhancer], cmd: &Command) -> String {
    enhancers
        .iter()
        .rev()
        .fold(cmd.render(), |inner, enhancer| enhancer.log_format(&inner))
}

/// Composed script with strict mode switched on for the whole body
pub fn compose_strict(enhancers: &[&dyn Enhancer], cmd: &Command) -> String {
    shell::lines([shell::STRICT_MODE.to_string(), compose(enhancers, cmd)])
}
