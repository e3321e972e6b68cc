//! DataLad datasets around a command
//!
//! Inputs and outputs that live in a DataLad dataset are often annexed:
//! the path is a symlink into `.git/annex/objects` whose content may not be
//! present locally, and which is read-only when it is. Before the command,
//! annexed `{input*}` paths are fetched with `datalad get` and annexed
//! `{output*}` paths are unlocked with `datalad unlock`. With a message,
//! outputs inside the dataset are saved after the command succeeds.
//!
//! A field may expand to several whitespace-separated paths (`{input}` of a
//! rule with many inputs); each word is checked on its own, so paths
//! containing spaces are not supported.

use crate::enhance::Enhancer;
use crate::error::BoostResult;
use crate::hash::lexical_absolute;
use crate::shell;
use crate::template::{escape_braces, Template};
use std::path::{Path, PathBuf};

/// Which side of the job a field belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Input,
    Output,
}

/// Side of a field such as `input.db`, `output[0]` or `input!s`
fn side(field: &str) -> Option<Side> {
    let end = field
        .find(|c: char| matches!(c, '.' | '[' | '!' | ':'))
        .unwrap_or(field.len());
    match field[..end].trim() {
        "input" => Some(Side::Input),
        "output" => Some(Side::Output),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datalad {
    dataset_root: PathBuf,
    message: Option<String>,
}

impl Datalad {
    pub fn new(dataset_root: impl AsRef<Path>) -> BoostResult<Self> {
        Ok(Self {
            dataset_root: lexical_absolute(dataset_root.as_ref())?,
            message: None,
        })
    }

    /// Same enhancer for another dataset
    pub fn with_dataset_root(&self, dataset_root: impl AsRef<Path>) -> BoostResult<Self> {
        Ok(Self {
            dataset_root: lexical_absolute(dataset_root.as_ref())?,
            ..self.clone()
        })
    }

    /// Same enhancer, saving outputs with `message` after the command
    pub fn with_message(&self, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            message: (!message.trim().is_empty()).then_some(message),
            ..self.clone()
        }
    }

    pub fn dataset_root(&self) -> &Path {
        &self.dataset_root
    }

    /// Input and output fields of `cmd`, written back as `{field}`
    fn fields(cmd: &str) -> (Vec<String>, Vec<String>) {
        let Ok(parsed) = Template::parse(cmd) else {
            return (Vec::new(), Vec::new());
        };
        let (mut inputs, mut outputs) = (Vec::new(), Vec::new());
        for field in parsed.fields() {
            match side(field) {
                Some(Side::Input) => inputs.push(format!("{{{field}}}")),
                Some(Side::Output) => outputs.push(format!("{{{field}}}")),
                None => {}
            }
        }
        (inputs, outputs)
    }

    fn datalad(&self, action: &str, list: &str) -> String {
        shell::if_then(
            &format!("(( ${{{{#{list}[@]}}}} > 0 ))"),
            &[format!(
                "datalad {action} -d \"$__sb_dl_root\" -r \"${{{{{list}[@]}}}}\""
            )],
        )
    }
}

/// Loop over the words of `fields`, appending annexed ones to `annexed`
/// and, if given, the ones inside the dataset to `inside`
fn collect_paths(fields: &[String], annexed: &str, inside: Option<&str>) -> String {
    let mut body = vec![shell::if_then(
        "[[ \"$(realpath -m -- \"$__sb_dl_p\")\" =~ ^\"$__sb_dl_root\"/(.*/)?\\.git/. ]]",
        &[format!("{annexed}+=(\"$__sb_dl_p\")")],
    )];
    if let Some(inside) = inside {
        body.push(shell::if_then(
            "[[ \"$(realpath -ms -- \"$__sb_dl_p\")\" == \"$__sb_dl_root\"/* ]]",
            &[format!("{inside}+=(\"$__sb_dl_p\")")],
        ));
    }
    shell::lines(
        std::iter::once(format!("for __sb_dl_p in {}; do", fields.join(" ")))
            .chain(body)
            .chain(std::iter::once("done".to_string())),
    )
}

impl Enhancer for Datalad {
    fn wrap(&self, cmd: &str) -> String {
        let (inputs, outputs) = Self::fields(cmd);
        if inputs.is_empty() && outputs.is_empty() {
            return cmd.to_string();
        }
        let saving = self.message.is_some() && !outputs.is_empty();

        let mut setup = vec![format!(
            "__sb_dl_root=\"$(realpath -m -- {})\"",
            escape_braces(&shell::dquote_path(&self.dataset_root))
        )];
        if !inputs.is_empty() {
            setup.push("__sb_dl_get=()".to_string());
            setup.push(collect_paths(&inputs, "__sb_dl_get", None));
            setup.push(self.datalad("get", "__sb_dl_get"));
        }
        if !outputs.is_empty() {
            setup.push("__sb_dl_unlock=()".to_string());
            if saving {
                setup.push("__sb_dl_save=()".to_string());
            }
            setup.push(collect_paths(
                &outputs,
                "__sb_dl_unlock",
                saving.then_some("__sb_dl_save"),
            ));
            setup.push(self.datalad("unlock", "__sb_dl_unlock"));
        }

        let save = match &self.message {
            Some(message) if saving => shell::if_then(
                "(( ${{#__sb_dl_save[@]}} > 0 ))",
                &[format!(
                    "datalad save -d \"$__sb_dl_root\" -m {} \"${{{{__sb_dl_save[@]}}}}\"",
                    escape_braces(&shell::quote(message))
                )],
            ),
            _ => String::new(),
        };

        shell::lines([shell::lines(setup), cmd.to_string(), save])
    }
}
