//! Shell text building blocks
//!
//! Everything here returns template text (see [`crate::template`]): the
//! constructs below never emit a raw brace.

use std::path::Path;

/// Prefix for every message the generated shell prints
pub const LOG_PREFIX: &str = "[shboost]";

/// Strict mode line that opens every composed script
pub const STRICT_MODE: &str = "set -euo pipefail";

/// Single-quote `text` for the shell
pub fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}

/// Double-quote `text`, keeping template fields usable inside it
pub fn dquote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Double-quoted path
pub fn dquote_path(path: &Path) -> String {
    dquote(&path.to_string_lossy())
}

/// `echo` a message to stderr with the shboost prefix
pub fn log(message: &str) -> String {
    format!("echo {} >&2", quote(&format!("{LOG_PREFIX} {message}")))
}

/// `echo` a message that expands `$var` references
///
/// Only for messages built from fixed text and variable references.
pub fn log_expanding(message: &str) -> String {
    format!("echo \"{LOG_PREFIX} {message}\" >&2")
}

/// `echo` an attributed error to stderr
pub fn log_error(key: &str, message: &str) -> String {
    format!(
        "echo {} >&2",
        quote(&format!("{LOG_PREFIX} ERROR (key={key}): {message}"))
    )
}

/// `echo` an error whose key lives in a shell variable
pub fn log_error_var(var: &str, message: &str) -> String {
    format!(
        "echo \"{LOG_PREFIX} ERROR (key=${var}): {}\" >&2",
        message.replace('"', "\\\"").replace('$', "\\$")
    )
}

/// Join statements one per line, skipping empty ones
pub fn lines<I, S>(statements: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    statements
        .into_iter()
        .filter(|s| !s.as_ref().trim().is_empty())
        .map(|s| s.as_ref().to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// `if COND; then BODY; fi` on separate lines
pub fn if_then(condition: &str, body: &[String]) -> String {
    lines(
        std::iter::once(format!("if {condition}; then"))
            .chain(body.iter().cloned())
            .chain(std::iter::once("fi".to_string())),
    )
}

/// `if COND; then BODY; else OTHER; fi`
pub fn if_else(condition: &str, body: &[String], other: &[String]) -> String {
    lines(
        std::iter::once(format!("if {condition}; then"))
            .chain(body.iter().cloned())
            .chain(std::iter::once("else".to_string()))
            .chain(other.iter().cloned())
            .chain(std::iter::once("fi".to_string())),
    )
}

/// Run a body in a strict subshell and branch on its exit status
///
/// The body runs with `set -e` in effect even though its status is
/// inspected afterwards: bash disables errexit inside any command whose
/// status is tested (`if ! ( ... )`, `( ... ) || x`), so the status is
/// captured through `$?` with errexit briefly suspended in the parent.
/// On failure the `on_failure` steps run and the enclosing shell exits
/// with the body's status.
#[derive(Debug, Clone, Default)]
pub struct Guarded {
    body: String,
    on_failure: Vec<String>,
    on_success: Vec<String>,
}

impl Guarded {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn on_failure<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.on_failure.extend(steps.into_iter().map(Into::into));
        self
    }

    pub fn on_success<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.on_success.extend(steps.into_iter().map(Into::into));
        self
    }

    pub fn render(&self) -> String {
        let mut failure = self.on_failure.clone();
        failure.push("exit \"$__sb_rc\"".to_string());

        lines([
            "set +e".to_string(),
            "(".to_string(),
            STRICT_MODE.to_string(),
            self.body.clone(),
            ")".to_string(),
            "__sb_rc=$?".to_string(),
            "set -e".to_string(),
            if_then("[[ $__sb_rc -ne 0 ]]", &failure),
            lines(&self.on_success),
        ])
    }
}

/// Quote state while scanning shell text left to right
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuoteState {
    #[default]
    Unquoted,
    Single,
    Double,
}

/// Tracks quoting across consecutive chunks of shell text
#[derive(Debug, Clone, Copy, Default)]
pub struct QuoteScanner {
    state: QuoteState,
    escaped: bool,
}

impl QuoteScanner {
    pub fn state(&self) -> QuoteState {
        self.state
    }

    pub fn feed(&mut self, text: &str) {
        for c in text.chars() {
            if self.escaped {
                self.escaped = false;
                continue;
            }
            self.state = match (self.state, c) {
                (QuoteState::Unquoted, '\\') | (QuoteState::Double, '\\') => {
                    self.escaped = true;
                    self.state
                }
                (QuoteState::Unquoted, '\'') => QuoteState::Single,
                (QuoteState::Unquoted, '"') => QuoteState::Double,
                (QuoteState::Single, '\'') | (QuoteState::Double, '"') => QuoteState::Unquoted,
                (state, _) => state,
            };
        }
    }
}
