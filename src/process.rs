//! Running generated shell text from Rust

use crate::error::{BoostError, BoostResult};
use crate::shell::STRICT_MODE;
use crate::template::Template;
use std::process::{Command, Output, Stdio};
use tracing::debug;

/// Turn template text without fields into plain shell
pub fn plain_shell(template_text: &str) -> BoostResult<String> {
    Template::parse(template_text)?.literal_text().ok_or_else(|| {
        BoostError::spec("script still contains scheduler fields and cannot run outside a job")
    })
}

/// Run template text with `bash` in strict mode, capturing output
pub fn run_bash(template_text: &str) -> BoostResult<Output> {
    let script = format!("{STRICT_MODE}\n{}", plain_shell(template_text)?);
    debug!("Executing bash script ({} bytes)", script.len());

    Command::new("bash")
        .arg("-c")
        .arg(&script)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| BoostError::command_failed("bash -c <script>", e))
}

/// Run template text with `bash`, failing on a non-zero exit
pub fn run_bash_checked(template_text: &str, what: &str) -> BoostResult<String> {
    let output = run_bash(template_text)?;
    if !output.status.success() {
        return Err(BoostError::command_exec(
            what,
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
