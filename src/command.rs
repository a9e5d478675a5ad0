//! Process execution seam for the OS tools the portal shells out to
//! (`ping`, `iwlist`, `netsh`, `wpa_cli`).

use anyhow::{Context, Result, bail};
use log::debug;
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use std::{fmt, process::Stdio, time::Duration};
use tokio::process::Command;
use trait_variant::make;

/// A program invocation with its arguments
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShellCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ShellCommand {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of a finished process
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{command} did not finish within {}s", timeout.as_secs_f32())]
pub struct CommandTimeout {
    pub command: String,
    pub timeout: Duration,
}

#[make(Send)]
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait CommandRunner {
    /// Run a command to completion and capture its output
    ///
    /// Fails if the program cannot be spawned or does not finish within
    /// `timeout` (a [`CommandTimeout`] is then the root cause). A non-zero
    /// exit status is not an error, callers inspect [`CommandOutput`].
    async fn run(&self, command: &ShellCommand, timeout: Duration) -> Result<CommandOutput>;
}

/// [`CommandRunner`] backed by real child processes
#[derive(Clone, Debug, Default)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    async fn run(&self, command: &ShellCommand, timeout: Duration) -> Result<CommandOutput> {
        debug!("run: {command}");

        let child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context(format!("failed to spawn {command}"))?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => output.context(format!("failed to wait for {command}"))?,
            Err(_) => bail!(CommandTimeout {
                command: command.to_string(),
                timeout,
            }),
        };

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
        })
    }
}
