//! The host application's data layer: fixture export/import, schema migration
//! and static asset regeneration, driven through its management program.

use crate::command::ExternalCommand;
use crate::{DatabaseError, Result};
use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[async_trait]
pub trait DataLayer: Send + Sync {
    /// Writes a whole-database JSON fixture to `target`, leaving out the `excludes` models
    async fn export_fixture(&self, target: &Path, excludes: &[String]) -> Result<()>;

    async fn load_fixture(&self, fixture: &Path) -> Result<()>;

    async fn migrate(&self) -> Result<()>;

    /// Regenerates collected static assets
    async fn rebuild_static(&self) -> Result<()>;
}

/// [`DataLayer`] backed by a management program such as `python manage.py`
#[derive(Debug, Clone)]
pub struct ManagementCommand {
    program: String,
    args: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
}

impl ManagementCommand {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        workdir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            workdir: workdir.into(),
            timeout,
        }
    }

    /// Base invocation followed by the subcommand
    fn command(&self, subcommand: &str) -> ExternalCommand {
        ExternalCommand::new(self.program.clone(), self.timeout)
            .args(&self.args)
            .arg(subcommand)
            .current_dir(&self.workdir)
    }

    pub fn export_command(&self, target: &Path, excludes: &[String]) -> ExternalCommand {
        let mut cmd = self.command("dumpdata");
        for model in excludes {
            cmd = cmd.arg("--exclude").arg(model);
        }
        cmd.arg("--indent").arg("2").arg("--output").arg(target)
    }

    async fn execute(&self, cmd: ExternalCommand) -> Result<()> {
        let description = cmd.describe();
        match cmd.run().await {
            Ok(output) => {
                if !output.stderr.trim().is_empty() {
                    warn!("{description}: {}", output.stderr.trim());
                }
                Ok(())
            }
            Err(e) => Err(DatabaseError::DataLayerError(e.to_string())),
        }
    }
}

#[async_trait]
impl DataLayer for ManagementCommand {
    async fn export_fixture(&self, target: &Path, excludes: &[String]) -> Result<()> {
        info!("Exporting fixture to {}", target.display());
        self.execute(self.export_command(target, excludes)).await
    }

    async fn load_fixture(&self, fixture: &Path) -> Result<()> {
        info!("Loading fixture {}", fixture.display());
        self.execute(self.command("loaddata").arg(fixture)).await
    }

    async fn migrate(&self) -> Result<()> {
        info!("Applying migrations");
        self.execute(self.command("migrate").arg("--noinput")).await
    }

    async fn rebuild_static(&self) -> Result<()> {
        info!("Collecting static files");
        self.execute(self.command("collectstatic").arg("--noinput"))
            .await
    }
}

/// Result of loading one fixture file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureOutcome {
    pub file: String,
    pub error: Option<String>,
}

impl FixtureOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureReport {
    pub outcomes: Vec<FixtureOutcome>,
}

impl FixtureReport {
    pub fn loaded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &FixtureOutcome> {
        self.outcomes.iter().filter(|o| !o.succeeded())
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// Loads fixtures one at a time in file name order. A failing file is recorded
/// and the remaining files are still attempted.
pub async fn load_fixtures(data_layer: &dyn DataLayer, files: &[PathBuf]) -> FixtureReport {
    let mut ordered: Vec<&PathBuf> = files.iter().collect();
    ordered.sort_by_key(|path| path.file_name().map(|n| n.to_os_string()));

    let mut report = FixtureReport::default();
    for path in ordered {
        let file = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let error = match data_layer.load_fixture(path).await {
            Ok(()) => None,
            Err(e) => {
                warn!("Fixture {file} failed to load: {e}");
                Some(e.to_string())
            }
        };
        report.outcomes.push(FixtureOutcome { file, error });
    }
    info!(
        "Loaded {} of {} fixture file(s)",
        report.loaded(),
        report.outcomes.len()
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records load order and fails on names containing "broken"
    #[derive(Default)]
    struct RecordingLayer {
        loaded: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DataLayer for RecordingLayer {
        async fn export_fixture(&self, _target: &Path, _excludes: &[String]) -> Result<()> {
            Ok(())
        }

        async fn load_fixture(&self, fixture: &Path) -> Result<()> {
            let name = fixture.file_name().unwrap().to_string_lossy().into_owned();
            self.loaded.lock().unwrap().push(name.clone());
            if name.contains("broken") {
                return Err(DatabaseError::DataLayerError(format!("{name} is invalid")));
            }
            Ok(())
        }

        async fn migrate(&self) -> Result<()> {
            Ok(())
        }

        async fn rebuild_static(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn fixtures_load_in_name_order_past_failures() {
        let layer = RecordingLayer::default();
        let files = vec![
            PathBuf::from("/x/c.json"),
            PathBuf::from("/x/a_broken.json"),
            PathBuf::from("/x/b.json"),
        ];

        let report = load_fixtures(&layer, &files).await;

        assert_eq!(
            *layer.loaded.lock().unwrap(),
            vec!["a_broken.json", "b.json", "c.json"]
        );
        assert_eq!(report.loaded(), 2);
        let failed: Vec<_> = report.failures().map(|o| o.file.as_str()).collect();
        assert_eq!(failed, vec!["a_broken.json"]);
    }

    #[test]
    fn export_command_lists_excludes() {
        let layer = ManagementCommand::new(
            "python",
            vec!["manage.py".to_string()],
            "/srv/app",
            Duration::from_secs(60),
        );
        let described = layer
            .export_command(
                Path::new("/tmp/dump.json"),
                &["auth.permission".to_string(), "contenttypes".to_string()],
            )
            .describe();
        assert_eq!(
            described,
            "python manage.py dumpdata --exclude auth.permission --exclude contenttypes --indent 2 --output /tmp/dump.json"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_program_is_a_data_layer_error() {
        let dir = tempfile::tempdir().unwrap();
        let layer = ManagementCommand::new(
            "sh",
            vec!["-c".to_string(), "exit 2".to_string()],
            dir.path(),
            Duration::from_secs(5),
        );
        let err = layer.migrate().await.unwrap_err();
        assert!(matches!(err, DatabaseError::DataLayerError(_)));
    }
}
