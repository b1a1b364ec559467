//! Bounded execution of external database clients.
//!
//! Every client (`pg_dump`, `psql`, `pg_restore`, the data-layer management program)
//! goes through [`ExternalCommand`], which captures the exit status and both output
//! streams and kills the child when the timeout elapses.

use log::{debug, warn};
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;

/// Captured result of a finished command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Error, Debug, Clone)]
pub enum CommandFailure {
    #[error("{program} was not found on PATH")]
    NotFound { program: String },

    #[error("{program} did not finish within {seconds}s and was killed")]
    Timeout { program: String, seconds: u64 },

    #[error("{program} exited with status {code:?}: {stderr}")]
    Exit {
        program: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("{program} could not be run: {message}")]
    Io { program: String, message: String },
}

impl CommandFailure {
    fn streams(&self) -> (&str, &str) {
        match self {
            CommandFailure::Exit { stdout, stderr, .. } => (stdout, stderr),
            _ => ("", ""),
        }
    }
}

/// An external program invocation with an explicit timeout
#[derive(Debug, Clone)]
pub struct ExternalCommand {
    program: String,
    args: Vec<OsString>,
    envs: Vec<(String, String)>,
    current_dir: Option<PathBuf>,
    timeout: Duration,
}

impl ExternalCommand {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Sets an environment variable for the child. Values never show up in [`describe`](Self::describe).
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Program and arguments, for logs and marker files
    pub fn describe(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().map(|a| a.to_string_lossy().into_owned()));
        parts.join(" ")
    }

    /// Runs the command to completion. A non-zero exit is reported as [`CommandFailure::Exit`].
    pub async fn run(&self) -> Result<CommandOutput, CommandFailure> {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }

        debug!("Running command: {}", self.describe());

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CommandFailure::NotFound {
                    program: self.program.clone(),
                }
            } else {
                CommandFailure::Io {
                    program: self.program.clone(),
                    message: e.to_string(),
                }
            }
        })?;

        // Dropping the pending future drops the child, which kills it
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(CommandFailure::Io {
                    program: self.program.clone(),
                    message: e.to_string(),
                })
            }
            Err(_) => {
                warn!(
                    "{} timed out after {}s",
                    self.program,
                    self.timeout.as_secs()
                );
                return Err(CommandFailure::Timeout {
                    program: self.program.clone(),
                    seconds: self.timeout.as_secs(),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            return Err(CommandFailure::Exit {
                program: self.program.clone(),
                code: output.status.code(),
                stdout,
                stderr,
            });
        }

        Ok(CommandOutput {
            status_code: output.status.code(),
            stdout,
            stderr,
        })
    }
}

/// Writes a diagnostic marker describing a failed command into `dir`.
pub fn write_marker(
    dir: &Path,
    file_name: &str,
    command: &ExternalCommand,
    failure: &CommandFailure,
) -> std::io::Result<PathBuf> {
    let marker = dir.join(file_name);
    let (stdout, stderr) = failure.streams();
    let mut file = fs::File::create(&marker)?;
    writeln!(file, "command: {}", command.describe())?;
    writeln!(file, "error: {failure}")?;
    writeln!(file, "--- stdout ---\n{stdout}")?;
    writeln!(file, "--- stderr ---\n{stderr}")?;
    Ok(marker)
}
