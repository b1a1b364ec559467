use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

pub const DEFAULT_PID_FILE: &str = "/tmp/archivist.pid";
pub const DEFAULT_LOG_FILE: &str = "/tmp/archivist.log";

#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "pid", rename_all = "lowercase")]
pub enum DaemonState {
    Running(i32),
    /// PID file left behind by a process that is gone
    Stale(i32),
    Stopped,
}

impl PidFile {
    /// `ARCHIVIST_PID_FILE` or `/tmp/archivist.pid`
    pub fn default_location() -> Self {
        let path = std::env::var("ARCHIVIST_PID_FILE").unwrap_or_else(|_| DEFAULT_PID_FILE.to_string());
        Self::at(path)
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_current(&self) -> Result<u32> {
        let pid = process::id();
        fs::write(&self.path, pid.to_string())
            .with_context(|| format!("Failed to create PID file at {}", self.path.display()))?;
        Ok(pid)
    }

    pub fn read(&self) -> Result<Option<i32>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let pid = contents
                    .trim()
                    .parse::<i32>()
                    .with_context(|| format!("Malformed PID file {}", self.path.display()))?;
                Ok(Some(pid))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", self.path.display())),
        }
    }

    pub fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", self.path.display())),
        }
    }

    pub fn state(&self) -> Result<DaemonState> {
        Ok(match self.read()? {
            Some(pid) if is_alive(pid) => DaemonState::Running(pid),
            Some(pid) => DaemonState::Stale(pid),
            None => DaemonState::Stopped,
        })
    }
}

/// Signal 0 probe; a process owned by another user still counts as alive
pub fn is_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    matches!(kill(Pid::from_raw(pid), None::<Signal>), Ok(()) | Err(Errno::EPERM))
}

pub fn terminate(pid: i32) -> Result<()> {
    kill(Pid::from_raw(pid), Signal::SIGTERM)
        .with_context(|| format!("Failed to send SIGTERM to {pid}"))
}
