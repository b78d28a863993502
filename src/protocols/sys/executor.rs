//! External process execution.

use crate::error::HandlerError;
use std::process::{Command, Stdio};
use tracing::debug;

/// Runs a command line and returns what it wrote to standard output.
pub trait Executor {
    fn run(&self, command_line: &str) -> Result<Vec<u8>, HandlerError>;
}

/// Runs command lines through `<shell> -c`.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    shell: String,
}

impl ShellExecutor {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new("/bin/sh")
    }
}

impl Executor for ShellExecutor {
    fn run(&self, command_line: &str) -> Result<Vec<u8>, HandlerError> {
        let child = Command::new(&self.shell)
            .arg("-c")
            .arg(command_line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| HandlerError::Spawn {
                command: command_line.to_string(),
                source,
            })?;

        let output = child
            .wait_with_output()
            .map_err(|source| HandlerError::Wait {
                command: command_line.to_string(),
                source,
            })?;

        debug!(
            command = command_line,
            status = %output.status,
            stdout_bytes = output.stdout.len(),
            stderr = %String::from_utf8_lossy(&output.stderr).trim_end(),
            "Command finished"
        );

        Ok(output.stdout)
    }
}
