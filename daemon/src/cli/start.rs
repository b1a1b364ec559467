use anyhow::{bail, Context, Result};
use log::info;
use std::env;
use std::fs::OpenOptions;
use std::process::{Command, Stdio};

use super::RunArgs;
use crate::pid::{DaemonState, PidFile, DEFAULT_LOG_FILE};

pub async fn execute(args: RunArgs) -> Result<()> {
    info!("Starting archivist daemon as a background service...");

    if let DaemonState::Running(pid) = PidFile::default_location().state()? {
        bail!("Daemon already running with PID {pid}");
    }

    let current_exe = env::current_exe()?;
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(DEFAULT_LOG_FILE)
        .with_context(|| format!("Failed to open {DEFAULT_LOG_FILE}"))?;

    let mut command = Command::new(current_exe);
    command.arg("run");
    if args.force {
        command.arg("--force");
    }
    let child = command
        .stdin(Stdio::null())
        .stdout(log.try_clone()?)
        .stderr(log)
        .spawn()
        .context("Failed to spawn the daemon process")?;

    info!(
        "Daemon started in the background with PID {}, logging to {DEFAULT_LOG_FILE}",
        child.id()
    );
    Ok(())
}
