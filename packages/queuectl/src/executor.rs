//! Shell command execution for claimed jobs.
//!
//! The executor runs a job's command through the platform shell and captures
//! its exit code and output. It is a plain synchronous call from the worker's
//! point of view: the command runs to completion, uninterrupted.

use anyhow::{Context, Result};
use tokio::process::Command;

/// Captured result of a single command execution.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Diagnostic text for a failed execution. Falls back to a generic
    /// message when the command produced no stderr.
    pub fn failure_message(&self) -> String {
        let trimmed = self.stderr.trim_end();
        if trimmed.is_empty() {
            "Command failed".to_string()
        } else {
            trimmed.to_string()
        }
    }
}

/// Run a shell command to completion, capturing exit code, stdout and stderr.
///
/// Returns an error only when the command could not be launched at all;
/// callers treat that the same as a non-zero exit.
pub async fn run_command(command: &str) -> Result<CommandOutput> {
    let output = shell(command)
        .output()
        .await
        .with_context(|| format!("failed to launch command: {command}"))?;

    Ok(CommandOutput {
        // A None exit code means the process died to a signal; report it as
        // a generic failure code.
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

#[cfg(unix)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_message_falls_back_when_stderr_is_empty() {
        let output = CommandOutput {
            exit_code: 1,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_eq!(output.failure_message(), "Command failed");
    }

    #[test]
    fn failure_message_uses_stderr_when_present() {
        let output = CommandOutput {
            exit_code: 1,
            stdout: String::new(),
            stderr: "boom\n".to_string(),
        };
        assert_eq!(output.failure_message(), "boom");
    }
}
