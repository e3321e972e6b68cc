//! Virtual display for headless jobs

use crate::enhance::Enhancer;
use crate::shell;
use crate::template::escape_braces;

/// Runs a command under a virtual X server unless `DISPLAY` is already set
///
/// The wrapped command runs in its own `bash -c` with strict mode on, so
/// quotes and special characters inside it never reach the outer shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayGuard {
    launcher: String,
    server_args: String,
}

impl Default for DisplayGuard {
    fn default() -> Self {
        Self {
            launcher: "xvfb-run -a".to_string(),
            server_args: String::new(),
        }
    }
}

impl DisplayGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same guard with another launcher command (plain shell, not a template)
    pub fn with_launcher(&self, launcher: impl Into<String>) -> Self {
        Self {
            launcher: launcher.into(),
            ..self.clone()
        }
    }

    /// Same guard passing `args` to the X server (`xvfb-run -s`)
    pub fn with_server_args(&self, args: impl Into<String>) -> Self {
        Self {
            server_args: args.into(),
            ..self.clone()
        }
    }

    pub fn launcher(&self) -> &str {
        &self.launcher
    }

    fn launch_prefix(&self) -> String {
        let mut prefix = escape_braces(self.launcher.trim());
        if !self.server_args.trim().is_empty() {
            prefix.push_str(" -s ");
            prefix.push_str(&escape_braces(&shell::quote(self.server_args.trim())));
        }
        prefix
    }
}

impl Enhancer for DisplayGuard {
    fn wrap(&self, cmd: &str) -> String {
        let script = shell::quote(&shell::lines([shell::STRICT_MODE, cmd]));
        shell::if_else(
            "[[ -n \"${{DISPLAY:-}}\" ]]",
            &[format!("bash -c {script}")],
            &[format!("{} bash -c {script}", self.launch_prefix())],
        )
    }
}
