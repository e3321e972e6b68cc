//! Packaging composed scripts as cached executables
//!
//! A composed fragment can run to hundreds of lines. `Boost` writes it once
//! to `scripts_root/<content hash>` and hands the scheduler a one-line call
//! instead. Scheduler fields are lifted out of the script into positional
//! arguments, so jobs that differ only in their inputs share one artifact:
//!
//! ```text
//! cp {input} {output}   ->   script: cp ${1} ${2}
//!                            call:   /scripts/3fa1… '{input}' '{output}'
//! ```
//!
//! The returned text starts with a comment showing the original command.
//! Outside debug mode the call itself is printed inside the terminal's
//! alternate screen, so log viewers show the intent rather than the plumbing.

use crate::enhance::{compose_strict, display_form, Command, Enhancer};
use crate::error::{BoostError, BoostResult};
use crate::hash::HashKey;
use crate::shell::{self, QuoteScanner, QuoteState};
use crate::template::{escape_braces, Segment, Template};
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// First line of every artifact
pub const SHEBANG: &str = "#!/bin/bash";

const ALT_SCREEN_ON: &str = "\x1b[?1049h";
const ALT_SCREEN_OFF: &str = "\x1b[?1049l";

/// A composed script with its fields lifted into positional arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiftedScript {
    /// Plain shell text, shebang included
    pub text: String,
    /// Fields in positional order, `${1}` first
    pub fields: Vec<String>,
}

impl LiftedScript {
    pub fn new(template: &Template) -> Self {
        let fields: Vec<String> = template.fields().into_iter().map(String::from).collect();
        let mut scanner = QuoteScanner::default();
        let mut text = format!("{SHEBANG}\n");

        for segment in template.segments() {
            match segment {
                Segment::Literal(literal) => {
                    scanner.feed(literal);
                    text.push_str(literal);
                }
                Segment::Field(name) => {
                    let position = fields.iter().position(|f| f == name).map_or(0, |i| i + 1);
                    let arg = format!("${{{position}}}");
                    if scanner.state() == QuoteState::Single {
                        text.push_str(&format!("'\"{arg}\"'"));
                    } else {
                        text.push_str(&arg);
                    }
                }
            }
        }
        if !text.ends_with('\n') {
            text.push('\n');
        }
        Self { text, fields }
    }

    pub fn key(&self) -> HashKey {
        HashKey::of_bytes(self.text.as_bytes())
    }
}

/// Collapses composed scripts into calls to cached artifacts
#[derive(Debug, Clone)]
pub struct Boost {
    scripts_root: PathBuf,
    debug: bool,
    color: bool,
    inline: bool,
}

impl Boost {
    pub fn new(scripts_root: impl Into<PathBuf>) -> Self {
        Self {
            scripts_root: scripts_root.into(),
            debug: false,
            color: false,
            inline: false,
        }
    }

    /// Show the artifact call instead of hiding it
    pub fn with_debug(&self, debug: bool) -> Self {
        Self {
            debug,
            ..self.clone()
        }
    }

    /// Colour the command shown in the comment
    pub fn with_color(&self, color: bool) -> Self {
        Self {
            color,
            ..self.clone()
        }
    }

    /// Return the composed script itself and write no artifact
    pub fn with_inline(&self, inline: bool) -> Self {
        Self {
            inline,
            ..self.clone()
        }
    }

    pub fn scripts_root(&self) -> &Path {
        &self.scripts_root
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// Compose `enhancers` around `cmd` and package the result
    ///
    /// With no enhancers the command is returned as is: there is nothing
    /// worth packaging.
    pub fn apply(&self, enhancers: &[&dyn Enhancer], cmd: &Command) -> BoostResult<String> {
        cmd.validate()?;
        if enhancers.is_empty() {
            return Ok(cmd.render());
        }
        let composed = compose_strict(enhancers, cmd);
        if self.inline {
            Template::parse(&composed)?;
            return Ok(composed);
        }
        self.package(&composed, &display_form(enhancers, cmd))
    }

    /// Write `composed` as an artifact and return the call replacing it
    ///
    /// `display` is the command shown to operators in the leading comment.
    pub fn package(&self, composed: &str, display: &str) -> BoostResult<String> {
        let template = Template::parse(composed)?;
        let script = LiftedScript::new(&template);
        let path = self.write_artifact(&script)?;

        let mut call = escape_braces(&shell::quote(&path.to_string_lossy()));
        for field in &script.fields {
            call.push_str(&format!(" '{{{field}}}'"));
        }
        Ok(self.present(display, &call))
    }

    /// Artifact path for `script`, writing the file if it does not exist
    ///
    /// The file is written under a temporary name and renamed into place,
    /// so a reader never sees it half-written and concurrent writers of the
    /// same script end up with the same bytes.
    pub fn write_artifact(&self, script: &LiftedScript) -> BoostResult<PathBuf> {
        let path = self.scripts_root.join(script.key().as_str());
        if path.is_file() {
            debug!("Reusing script artifact {}", path.display());
            return Ok(path);
        }

        let fail = |source| BoostError::ArtifactWrite {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(&self.scripts_root).map_err(fail)?;
        let mut tmp = tempfile::Builder::new()
            .prefix(".tmp")
            .tempfile_in(&self.scripts_root)
            .map_err(fail)?;
        tmp.write_all(script.text.as_bytes()).map_err(fail)?;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o755))
            .map_err(fail)?;
        tmp.persist(&path).map_err(|e| fail(e.error))?;

        info!("Wrote script artifact {}", path.display());
        Ok(path)
    }

    fn present(&self, display: &str, call: &str) -> String {
        let shown = display.trim().replace('\n', "\n#... ");
        let shown = if self.color {
            console::style(shown).cyan().force_styling(true).to_string()
        } else {
            shown
        };

        if self.debug {
            format!("# shboost: packaged script\n## > {shown}\n\n{call}")
        } else {
            format!(
                "# shboost: set boost.debug = true to see the packaged script\n\
                 ## > {shown}{ALT_SCREEN_ON}\n\n{call}\n#{ALT_SCREEN_OFF}"
            )
        }
    }
}
