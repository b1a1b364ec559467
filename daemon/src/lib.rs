pub mod cli;
pub mod pid;

use anyhow::{Context, Result};
use common::config::SchedulerConfig;
use engine::{DbEngine, Engine, ScheduleRule, Scheduler};
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;

/// Owns the engine and the scheduler for the lifetime of the process
pub struct Daemon {
    engine: Engine,
    settings: SchedulerConfig,
    scheduler: Option<Arc<Scheduler>>,
}

impl Daemon {
    pub fn new(engine: Engine, settings: SchedulerConfig) -> Self {
        Daemon {
            engine,
            settings,
            scheduler: None,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn scheduler(&self) -> Option<&Arc<Scheduler>> {
        self.scheduler.as_ref()
    }

    /// Starts the scheduler when it is enabled in the configuration or `force`
    /// is set. Scheduled runs always snapshot the Postgres database. Returns
    /// whether a new clock was started.
    pub fn start_scheduler(&mut self, force: bool) -> Result<bool> {
        if !self.settings.enabled && !force {
            warn!("Scheduler disabled (set BACKUP_SCHEDULER_ENABLED=1 or pass --force)");
            return Ok(false);
        }

        let scheduler = match &self.scheduler {
            Some(existing) => existing.clone(),
            None => {
                let rule = ScheduleRule::from_config(&self.settings)
                    .context("Invalid backup schedule")?;
                let scheduler = Arc::new(Scheduler::new(
                    self.engine.backups().clone(),
                    rule,
                    Duration::from_secs(self.settings.tick_secs.max(1)),
                    DbEngine::Postgres,
                ));
                self.scheduler = Some(scheduler.clone());
                scheduler
            }
        };
        Ok(scheduler.start())
    }

    /// Blocks until SIGINT or SIGTERM
    pub async fn wait_for_signal(&self) -> Result<()> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut term = signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
            tokio::select! {
                res = tokio::signal::ctrl_c() => {
                    res.context("Failed to listen for Ctrl+C")?;
                    info!("Received Ctrl+C, shutting down...");
                }
                _ = term.recv() => info!("Received SIGTERM, shutting down..."),
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl+C")?;
            info!("Received Ctrl+C, shutting down...");
        }
        Ok(())
    }

    /// Stops the scheduler, letting a running backup finish
    pub async fn stop(&self) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.shutdown().await;
            if scheduler.is_running() {
                error!("Scheduler still running after shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::config::build_config;

    async fn daemon(enabled: bool) -> (tempfile::TempDir, Daemon) {
        let project = tempfile::tempdir().unwrap();
        let root = project.path().display().to_string();
        let mut config = build_config(&[], |key| match key {
            "PROJECT_ROOT" => Some(root.clone()),
            "BACKUP_REMOTE_PROVIDER" => Some("none".to_string()),
            _ => None,
        })
        .unwrap();
        config.scheduler.enabled = enabled;
        config.database.engine = "sqlite".to_string();
        let engine = Engine::from_config(&config).await.unwrap();
        (project, Daemon::new(engine, config.scheduler))
    }

    #[tokio::test]
    async fn disabled_scheduler_needs_force() {
        let (_project, mut daemon) = daemon(false).await;
        assert!(!daemon.start_scheduler(false).unwrap());
        assert!(daemon.scheduler().is_none());

        assert!(daemon.start_scheduler(true).unwrap());
        assert!(daemon.scheduler().unwrap().is_running());
        daemon.stop().await;
    }

    #[tokio::test]
    async fn scheduler_is_started_once() {
        let (_project, mut daemon) = daemon(true).await;
        assert!(daemon.start_scheduler(false).unwrap());
        assert!(!daemon.start_scheduler(false).unwrap());
        let jobs = daemon.scheduler().unwrap().jobs();
        assert_eq!(jobs.len(), 1);
        assert!(jobs[0].next_run.is_some());
        daemon.stop().await;
    }

    #[tokio::test]
    async fn scheduled_runs_use_postgres_whatever_the_default() {
        let (_project, mut daemon) = daemon(true).await;
        assert_eq!(daemon.engine().default_engine(), DbEngine::Sqlite);
        daemon.start_scheduler(false).unwrap();
        assert_eq!(daemon.scheduler().unwrap().engine(), DbEngine::Postgres);
        daemon.stop().await;
    }
}
