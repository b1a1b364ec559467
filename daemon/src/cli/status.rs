use anyhow::Result;
use log::info;

use crate::pid::{DaemonState, PidFile};

pub async fn execute() -> Result<DaemonState> {
    info!("Checking archivist daemon status...");

    let pid_file = PidFile::default_location();
    let state = pid_file.state()?;
    match state {
        DaemonState::Running(pid) => info!("Daemon is running with PID {pid}"),
        DaemonState::Stale(pid) => {
            info!("Daemon is not running (stale PID file for {pid} removed)");
            pid_file.remove()?;
        }
        DaemonState::Stopped => info!("Daemon is not running (no PID file found)"),
    }
    Ok(state)
}
