//! Shell variables computed before the command
//!
//! Each variable is assigned from a shell expression (a template, so it can
//! use job fields). The command refers to a variable as `$NAME` or as the
//! field `{exports.NAME}`, which is rewritten to `${NAME}`.

use crate::enhance::Enhancer;
use crate::error::{BoostError, BoostResult};
use crate::shell;
use crate::template::{self, Template};

/// Field prefix rewritten to variable references
pub const FIELD_PREFIX: &str = "exports.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exports {
    vars: Vec<(String, String)>,
    export: bool,
}

impl Exports {
    /// Validate names and expressions
    pub fn new<I, N, E>(vars: I) -> BoostResult<Self>
    where
        I: IntoIterator<Item = (N, E)>,
        N: Into<String>,
        E: Into<String>,
    {
        let mut checked: Vec<(String, String)> = Vec::new();
        for (name, expr) in vars {
            let (name, expr) = (name.into(), expr.into());
            if !is_identifier(&name) {
                return Err(BoostError::spec(format!("{name:?} is not a shell variable name")));
            }
            if checked.iter().any(|(n, _)| *n == name) {
                return Err(BoostError::spec(format!("variable {name} is assigned twice")));
            }
            template::validate(&expr)?;
            checked.push((name, expr));
        }
        Ok(Self {
            vars: checked,
            export: false,
        })
    }

    /// Parse `NAME=EXPR`
    pub fn parse_assignment(text: &str) -> BoostResult<(String, String)> {
        let (name, expr) = text
            .split_once('=')
            .ok_or_else(|| BoostError::spec(format!("expected NAME=EXPR, got {text:?}")))?;
        Ok((name.trim().to_string(), expr.to_string()))
    }

    /// Same variables, exported to child processes
    pub fn exported(&self) -> Self {
        Self {
            export: true,
            ..self.clone()
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.iter().map(|(n, _)| n.as_str())
    }

    fn rewrite(&self, cmd: &str) -> String {
        let Ok(parsed) = Template::parse(cmd) else {
            return cmd.to_string();
        };
        parsed.map_fields(|field| {
            let name = field.strip_prefix(FIELD_PREFIX)?;
            self.names()
                .any(|n| n == name)
                .then(|| format!("${{{{{name}}}}}"))
        })
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

impl Enhancer for Exports {
    fn wrap(&self, cmd: &str) -> String {
        let keyword = if self.export { "export " } else { "" };
        shell::lines(
            self.vars
                .iter()
                .map(|(name, expr)| format!("{keyword}{name}={expr}"))
                .chain(std::iter::once(self.rewrite(cmd))),
        )
    }

    fn log_format(&self, cmd: &str) -> String {
        self.rewrite(cmd)
    }
}
