use anyhow::{bail, Context, Result};
use engine::Engine;
use log::{error, info};

use super::RunArgs;
use crate::pid::{DaemonState, PidFile};
use crate::Daemon;

pub async fn execute(args: RunArgs) -> Result<()> {
    info!("Running archivist daemon in the foreground...");

    let pid_file = PidFile::default_location();
    if let DaemonState::Running(pid) = pid_file.state()? {
        bail!("Daemon already running with PID {pid}");
    }
    let pid = pid_file.write_current()?;
    info!("Created PID file at {} with PID {pid}", pid_file.path().display());

    let result = serve(args).await;
    if let Err(ref e) = result {
        error!("Daemon error: {e:#}");
    }

    if let Err(e) = pid_file.remove() {
        error!("{e:#}");
    }
    info!("Daemon shutdown complete");
    result
}

async fn serve(args: RunArgs) -> Result<()> {
    let config = common::config::load_config().context("Failed to load configuration")?;
    let engine = Engine::from_config(&config)
        .await
        .context("Failed to set up the backup engine")?;

    let mut daemon = Daemon::new(engine, config.scheduler.clone());
    if daemon.start_scheduler(args.force)? {
        if let Some(job) = daemon.scheduler().and_then(|s| s.jobs().into_iter().next()) {
            info!("Backup job {} registered ({})", job.id, job.rule);
        }
    }

    daemon.wait_for_signal().await?;
    daemon.stop().await;
    Ok(())
}
