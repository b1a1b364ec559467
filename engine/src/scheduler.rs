//! Periodic backups on a fixed clock. One task per process; runs execute
//! inline, so scheduled runs never overlap.

use crate::backup::{BackupManager, BackupRequest};
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use common::config::SchedulerConfig;
use cron::Schedule;
use database::DbEngine;
use log::{error, info, warn};
use serde::Serialize;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub const JOB_ID: &str = "weekly_backup";

#[derive(Debug, Clone)]
pub enum ScheduleRule {
    /// Cron expression evaluated in a named timezone
    Cron {
        expression: String,
        schedule: Schedule,
        timezone: Tz,
    },
    /// Fixed interval, used by test mode
    Interval(Duration),
}

impl ScheduleRule {
    pub fn cron(expression: &str, timezone: &str) -> Result<Self> {
        // Accept classic five-field expressions by pinning seconds to zero
        let expression = if expression.split_whitespace().count() == 5 {
            format!("0 {expression}")
        } else {
            expression.trim().to_string()
        };
        let schedule = Schedule::from_str(&expression)
            .map_err(|e| EngineError::Schedule(format!("invalid cron '{expression}': {e}")))?;
        let timezone: Tz = timezone
            .parse()
            .map_err(|e| EngineError::Schedule(format!("unknown timezone '{timezone}': {e}")))?;
        Ok(ScheduleRule::Cron {
            expression,
            schedule,
            timezone,
        })
    }

    pub fn from_config(config: &SchedulerConfig) -> Result<Self> {
        if config.test_mode {
            warn!(
                "Backup test mode: running every {} seconds",
                config.test_interval_secs
            );
            return Ok(ScheduleRule::Interval(Duration::from_secs(
                config.test_interval_secs,
            )));
        }
        Self::cron(&config.cron, &config.timezone)
    }

    /// First fire time strictly after `now`
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            ScheduleRule::Cron {
                schedule, timezone, ..
            } => schedule
                .after(&now.with_timezone(timezone))
                .next()
                .map(|at| at.with_timezone(&Utc)),
            ScheduleRule::Interval(every) => chrono::Duration::from_std(*every)
                .ok()
                .map(|every| now + every),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ScheduleRule::Cron {
                expression,
                timezone,
                ..
            } => format!("cron '{expression}' in {timezone}"),
            ScheduleRule::Interval(every) => format!("every {}s", every.as_secs()),
        }
    }
}

/// Entry of the in-memory job table
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledJob {
    pub id: String,
    pub rule: String,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub last_success: Option<bool>,
}

#[derive(Default)]
struct ClockState {
    started: bool,
    shutdown: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

pub struct Scheduler {
    backups: Arc<BackupManager>,
    rule: ScheduleRule,
    tick: Duration,
    engine: DbEngine,
    state: Mutex<ClockState>,
    jobs: Arc<Mutex<Vec<ScheduledJob>>>,
}

impl Scheduler {
    pub fn new(backups: Arc<BackupManager>, rule: ScheduleRule, tick: Duration, engine: DbEngine) -> Self {
        Self {
            backups,
            rule,
            tick,
            engine,
            state: Mutex::new(ClockState::default()),
            jobs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Spawns the clock task and registers the backup job. Only the first call
    /// does anything; later calls return `false`.
    pub fn start(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.started {
            info!("Scheduler already started");
            return false;
        }
        state.started = true;

        let next_run = self.rule.next_after(Utc::now());
        match next_run {
            Some(at) => info!("Scheduler started ({}), next backup at {at}", self.rule.describe()),
            None => warn!("Schedule {} never fires", self.rule.describe()),
        }
        *self.jobs.lock().unwrap_or_else(|e| e.into_inner()) = vec![ScheduledJob {
            id: JOB_ID.to_string(),
            rule: self.rule.describe(),
            next_run,
            last_run: None,
            last_success: None,
        }];

        let (tx, rx) = watch::channel(false);
        let clock = Clock {
            backups: self.backups.clone(),
            rule: self.rule.clone(),
            tick: self.tick,
            engine: self.engine,
            jobs: self.jobs.clone(),
        };
        state.handle = Some(tokio::spawn(clock.run(rx)));
        state.shutdown = Some(tx);
        true
    }

    /// Database engine scheduled runs snapshot
    pub fn engine(&self) -> DbEngine {
        self.engine
    }

    pub fn jobs(&self) -> Vec<ScheduledJob> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_running(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops the clock. A backup already running is allowed to finish.
    pub async fn shutdown(&self) {
        let (tx, handle) = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            (state.shutdown.take(), state.handle.take())
        };
        if let Some(tx) = tx {
            let _ = tx.send(true);
        }
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Scheduler task ended abnormally: {e}");
            }
        }
        info!("Scheduler stopped");
    }
}

struct Clock {
    backups: Arc<BackupManager>,
    rule: ScheduleRule,
    tick: Duration,
    engine: DbEngine,
    jobs: Arc<Mutex<Vec<ScheduledJob>>>,
}

impl Clock {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let now = Utc::now();
            if !self.is_due(now) {
                continue;
            }

            info!("Scheduled backup due at {now}");
            let result = self
                .backups
                .run_backup(BackupRequest::scheduled(self.engine))
                .await;
            if result.success {
                info!("Scheduled backup {} completed", result.archive_name);
            } else {
                error!(
                    "Scheduled backup failed: {}",
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }

            let next_run = self.rule.next_after(Utc::now());
            let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(job) = jobs.iter_mut().find(|job| job.id == JOB_ID) {
                job.last_run = Some(now);
                job.last_success = Some(result.success);
                job.next_run = next_run;
            }
        }
    }

    fn is_due(&self, now: DateTime<Utc>) -> bool {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.iter()
            .find(|job| job.id == JOB_ID)
            .and_then(|job| job.next_run)
            .is_some_and(|at| at <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn weekly() -> ScheduleRule {
        ScheduleRule::cron("0 30 17 * * Sat", "America/La_Paz").unwrap()
    }

    #[test]
    fn weekly_rule_fires_saturday_evening_in_la_paz() {
        // Monday noon UTC
        let now = Utc.with_ymd_and_hms(2025, 1, 6, 12, 0, 0).unwrap();
        let next = weekly().next_after(now).unwrap();
        // 17:30 at UTC-4
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 1, 11, 21, 30, 0).unwrap());
    }

    #[test]
    fn weekly_rule_moves_to_the_following_week_once_passed() {
        let now = Utc.with_ymd_and_hms(2025, 1, 11, 21, 31, 0).unwrap();
        let next = weekly().next_after(now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 1, 18, 21, 30, 0).unwrap());
    }

    #[test]
    fn five_field_expressions_are_accepted() {
        let rule = ScheduleRule::cron("30 17 * * Sat", "America/La_Paz").unwrap();
        let now = Utc.with_ymd_and_hms(2025, 1, 6, 12, 0, 0).unwrap();
        assert_eq!(rule.next_after(now), weekly().next_after(now));
    }

    #[test]
    fn test_mode_uses_the_fixed_interval() {
        let config = SchedulerConfig {
            enabled: true,
            test_mode: true,
            cron: "0 30 17 * * Sat".to_string(),
            timezone: "America/La_Paz".to_string(),
            tick_secs: 30,
            test_interval_secs: 60,
            keep_local: 8,
        };
        let rule = ScheduleRule::from_config(&config).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 1, 6, 12, 0, 0).unwrap();
        assert_eq!(
            rule.next_after(now),
            Some(Utc.with_ymd_and_hms(2025, 1, 6, 12, 1, 0).unwrap())
        );
        assert_eq!(rule.describe(), "every 60s");
    }

    #[test]
    fn bad_rules_are_rejected() {
        assert!(matches!(
            ScheduleRule::cron("not a cron", "America/La_Paz"),
            Err(EngineError::Schedule(_))
        ));
        assert!(matches!(
            ScheduleRule::cron("0 30 17 * * Sat", "Mars/Olympus"),
            Err(EngineError::Schedule(_))
        ));
    }
}
