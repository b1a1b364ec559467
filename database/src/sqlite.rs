use crate::{DatabaseError, DbArtifact, DbEngine, Result, SnapshotDriver, SnapshotOutcome};
use async_trait::async_trait;
use chrono::Local;
use log::{error, info, warn};
use std::path::{Path, PathBuf};

/// Embedded database driver: snapshots and restores are plain file copies.
///
/// The live file is not locked; the owning process must be stopped or tolerate
/// the file being replaced underneath it.
pub struct SqliteDriver {
    live_file: PathBuf,
}

impl SqliteDriver {
    pub fn new(live_file: impl Into<PathBuf>) -> Self {
        Self {
            live_file: live_file.into(),
        }
    }

    pub fn live_file(&self) -> &Path {
        &self.live_file
    }

    /// File name used for the database inside an archive
    pub fn file_name(&self) -> String {
        self.live_file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "db.sqlite3".to_string())
    }

    /// Path of the safety copy taken before the live file is overwritten
    fn safety_copy_path(&self) -> PathBuf {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let name = format!("{}.before_restore_{stamp}", self.file_name());
        self.live_file.with_file_name(name)
    }
}

#[async_trait]
impl SnapshotDriver for SqliteDriver {
    fn engine(&self) -> DbEngine {
        DbEngine::Sqlite
    }

    async fn snapshot(&self, target_dir: &Path) -> SnapshotOutcome {
        if !self.live_file.exists() {
            warn!(
                "Embedded database file not found: {}",
                self.live_file.display()
            );
            return SnapshotOutcome::Skipped(format!(
                "embedded database file not found: {}",
                self.live_file.display()
            ));
        }

        let target = target_dir.join(self.file_name());
        match tokio::fs::copy(&self.live_file, &target).await {
            Ok(bytes) => {
                info!(
                    "Embedded database copied to {} ({bytes} bytes)",
                    target.display()
                );
                SnapshotOutcome::Captured(DbArtifact::EmbeddedFile(target))
            }
            Err(e) => {
                error!("Failed to copy embedded database: {e}");
                let marker = target_dir.join("sqlite_error.txt");
                let reason = format!(
                    "failed to copy {} to {}: {e}",
                    self.live_file.display(),
                    target.display()
                );
                if let Err(marker_err) = tokio::fs::write(&marker, &reason).await {
                    error!("Failed to write marker {}: {marker_err}", marker.display());
                }
                SnapshotOutcome::Failed { marker, reason }
            }
        }
    }

    async fn restore(&self, artifact: &Path) -> Result<()> {
        if !artifact.is_file() {
            return Err(DatabaseError::RestoreError(format!(
                "Embedded database snapshot does not exist: {artifact:?}"
            )));
        }

        if self.live_file.exists() {
            let safety = self.safety_copy_path();
            tokio::fs::copy(&self.live_file, &safety)
                .await
                .map_err(|e| {
                    DatabaseError::RestoreError(format!(
                        "Failed to save current database to {}: {e}",
                        safety.display()
                    ))
                })?;
            info!("Current database saved to {}", safety.display());
        } else if let Some(parent) = self.live_file.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        tokio::fs::copy(artifact, &self.live_file)
            .await
            .map_err(|e| {
                DatabaseError::RestoreError(format!(
                    "Failed to replace {}: {e}",
                    self.live_file.display()
                ))
            })?;
        info!("Embedded database restored: {}", self.live_file.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn snapshot_copies_bytes() {
        let live_dir = tempfile::tempdir().unwrap();
        let snap_dir = tempfile::tempdir().unwrap();
        let live = live_dir.path().join("db.sqlite3");
        fs::write(&live, b"SQLite format 3\0rows").unwrap();

        let driver = SqliteDriver::new(&live);
        let outcome = driver.snapshot(snap_dir.path()).await;

        let expected = snap_dir.path().join("db.sqlite3");
        assert_eq!(
            outcome,
            SnapshotOutcome::Captured(DbArtifact::EmbeddedFile(expected.clone()))
        );
        assert_eq!(fs::read(expected).unwrap(), b"SQLite format 3\0rows");
    }

    #[tokio::test]
    async fn missing_live_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let driver = SqliteDriver::new(dir.path().join("absent.sqlite3"));
        let outcome = driver.snapshot(dir.path()).await;
        assert!(matches!(outcome, SnapshotOutcome::Skipped(_)));
    }

    #[tokio::test]
    async fn restore_keeps_a_safety_copy() {
        let live_dir = tempfile::tempdir().unwrap();
        let live = live_dir.path().join("db.sqlite3");
        fs::write(&live, b"current").unwrap();
        let snapshot = live_dir.path().join("snapshot.sqlite3");
        fs::write(&snapshot, b"from backup").unwrap();

        let driver = SqliteDriver::new(&live);
        driver.restore(&snapshot).await.unwrap();

        assert_eq!(fs::read(&live).unwrap(), b"from backup");
        let safety: Vec<_> = fs::read_dir(live_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name()
                    .to_string_lossy()
                    .starts_with("db.sqlite3.before_restore_")
            })
            .collect();
        assert_eq!(safety.len(), 1);
        assert_eq!(fs::read(safety[0].path()).unwrap(), b"current");
    }

    #[tokio::test]
    async fn restore_rejects_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let driver = SqliteDriver::new(dir.path().join("db.sqlite3"));
        let err = driver
            .restore(&dir.path().join("nope.sqlite3"))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::RestoreError(_)));
    }
}
