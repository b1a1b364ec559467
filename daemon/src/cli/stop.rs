use anyhow::{bail, Result};
use log::info;
use std::time::Duration;
use tokio::time::Instant;

use crate::pid::{terminate, DaemonState, PidFile};

pub async fn execute() -> Result<()> {
    info!("Stopping archivist daemon...");

    let pid_file = PidFile::default_location();
    match pid_file.state()? {
        DaemonState::Running(pid) => {
            terminate(pid)?;
            // The daemon removes its own PID file once the scheduler has stopped
            info!("Sent SIGTERM to daemon with PID {pid}");
        }
        DaemonState::Stale(pid) => {
            info!("Daemon with PID {pid} is not running, removing stale PID file");
            pid_file.remove()?;
        }
        DaemonState::Stopped => info!("No PID file found, daemon may not be running"),
    }
    Ok(())
}

/// Polls the PID file until the daemon has exited
pub async fn wait_for_exit(timeout: Duration) -> Result<()> {
    let pid_file = PidFile::default_location();
    let deadline = Instant::now() + timeout;
    while let DaemonState::Running(pid) = pid_file.state()? {
        if Instant::now() >= deadline {
            bail!("Daemon with PID {pid} did not exit within {}s", timeout.as_secs());
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    Ok(())
}
