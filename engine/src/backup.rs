//! Backup pipeline: database snapshot, source snapshot, fixture export, zip,
//! upload, cleanup. Each step after the working directory is guarded on its own;
//! only the working directory, the archive and a required upload are fatal.

use crate::archive::build_archive;
use crate::error::{EngineError, Result};
use crate::layout::CODE_DIR;
use crate::EngineContext;
use chrono::Local;
use database::{DbEngine, SnapshotOutcome};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const ARCHIVE_PREFIX: &str = "full_backup_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupTrigger {
    Manual,
    Scheduled,
}

#[derive(Debug, Clone)]
pub struct BackupRequest {
    pub include_code: bool,
    pub include_database: bool,
    pub engine: DbEngine,
    pub trigger: BackupTrigger,
}

impl BackupRequest {
    pub fn manual(engine: DbEngine) -> Self {
        Self {
            include_code: true,
            include_database: true,
            engine,
            trigger: BackupTrigger::Manual,
        }
    }

    pub fn scheduled(engine: DbEngine) -> Self {
        Self {
            trigger: BackupTrigger::Scheduled,
            ..Self::manual(engine)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupResult {
    pub success: bool,
    pub archive_name: String,
    pub local_path: Option<PathBuf>,
    pub remote_path: Option<String>,
    pub share_link: Option<String>,
    pub share_link_error: Option<String>,
    pub warnings: Vec<String>,
    pub error: Option<String>,
}

impl BackupResult {
    fn new(archive_name: &str) -> Self {
        Self {
            success: false,
            archive_name: archive_name.to_string(),
            local_path: None,
            remote_path: None,
            share_link: None,
            share_link_error: None,
            warnings: Vec::new(),
            error: None,
        }
    }

    fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{message}");
        self.warnings.push(message);
    }
}

pub fn archive_name(timestamp: &str) -> String {
    format!("{ARCHIVE_PREFIX}{timestamp}.zip")
}

pub struct BackupManager {
    ctx: Arc<EngineContext>,
}

impl BackupManager {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Runs one backup. Waits for any running backup or restore first.
    pub async fn run_backup(&self, request: BackupRequest) -> BackupResult {
        let _guard = match self.ctx.lock.acquire().await {
            Ok(guard) => guard,
            Err(e) => {
                let mut result = BackupResult::new("");
                result.error = Some(e.to_string());
                return result;
            }
        };

        let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let mut result = BackupResult::new(&archive_name(&timestamp));
        info!(
            "Starting {:?} backup {} (code: {}, database: {} via {})",
            request.trigger,
            result.archive_name,
            request.include_code,
            request.include_database,
            request.engine
        );

        let work_dir = self.ctx.backup_root.join(format!("backup_{timestamp}"));
        if let Err(e) = tokio::fs::create_dir_all(&work_dir).await {
            let err = EngineError::io(format!("creating {}", work_dir.display()), e);
            error!("Backup aborted: {err}");
            result.error = Some(err.to_string());
            return result;
        }

        let outcome = self.run_steps(&request, &timestamp, &work_dir, &mut result).await;

        if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
            result.warn(format!("Failed to remove {}: {e}", work_dir.display()));
        }

        match outcome {
            Ok(()) => {
                result.success = true;
                if request.trigger == BackupTrigger::Scheduled && self.ctx.keep_local > 0 {
                    match prune_local_archives(&self.ctx.backup_root, self.ctx.keep_local).await {
                        Ok(removed) if !removed.is_empty() => {
                            info!("Retention removed {} old archive(s)", removed.len())
                        }
                        Ok(_) => {}
                        Err(e) => result.warn(format!("Retention failed: {e}")),
                    }
                }
                info!("Backup {} finished", result.archive_name);
            }
            Err(e) => {
                error!("Backup {} failed: {e}", result.archive_name);
                result.error = Some(e.to_string());
            }
        }
        result
    }

    async fn run_steps(
        &self,
        request: &BackupRequest,
        timestamp: &str,
        work_dir: &Path,
        result: &mut BackupResult,
    ) -> Result<()> {
        if request.include_database {
            match self.ctx.driver(request.engine).snapshot(work_dir).await {
                SnapshotOutcome::Captured(artifact) => {
                    info!("Database snapshot: {}", artifact.path().display())
                }
                SnapshotOutcome::Skipped(reason) => {
                    result.warn(format!("Database snapshot skipped: {reason}"))
                }
                SnapshotOutcome::Failed { marker, reason } => result.warn(format!(
                    "Database dump failed: {reason} (details in {})",
                    marker.file_name().unwrap_or_default().to_string_lossy()
                )),
            }
        }

        if request.include_code {
            let dir_name = match request.trigger {
                BackupTrigger::Manual => CODE_DIR.to_string(),
                BackupTrigger::Scheduled => format!("{CODE_DIR}_{timestamp}"),
            };
            let source = self.ctx.source.clone();
            let dest = work_dir.join(dir_name);
            match tokio::task::spawn_blocking(move || source.snapshot_into(&dest)).await? {
                Ok(snapshot) => {
                    for name in snapshot.missing {
                        result.warn(format!("Source entry not found: {name}"));
                    }
                }
                Err(e) => result.warn(format!("Source snapshot incomplete: {e}")),
            }
        }

        if request.include_database {
            self.export_fixture(timestamp, work_dir, result).await;
        }

        let archive = self.ctx.backup_root.join(&result.archive_name);
        let (source_dir, target) = (work_dir.to_path_buf(), archive.clone());
        tokio::task::spawn_blocking(move || build_archive(&source_dir, &target)).await??;
        result.local_path = Some(archive.clone());

        self.upload(&archive, result).await
    }

    async fn export_fixture(&self, timestamp: &str, work_dir: &Path, result: &mut BackupResult) {
        let fixture = work_dir.join(format!("dump_{timestamp}.json"));
        if let Err(e) = self
            .ctx
            .data_layer
            .export_fixture(&fixture, &self.ctx.fixture_excludes)
            .await
        {
            // A half-written fixture would be picked up on restore
            if fixture.exists() {
                let _ = tokio::fs::remove_file(&fixture).await;
            }
            let marker = work_dir.join("dumpdata_error.txt");
            if let Err(write_err) = tokio::fs::write(&marker, e.to_string()).await {
                warn!("Failed to write {}: {write_err}", marker.display());
            }
            result.warn(format!("Fixture export failed: {e}"));
        }
    }

    async fn upload(&self, archive: &Path, result: &mut BackupResult) -> Result<()> {
        let Some(provider) = &self.ctx.remote.provider else {
            let reason = self
                .ctx
                .remote
                .unavailable
                .clone()
                .unwrap_or_else(|| "remote storage is not configured".to_string());
            result.warn(format!("Archive kept locally only: {reason}"));
            return Ok(());
        };

        match provider.upload(archive).await {
            Ok(remote_path) => {
                info!("Uploaded to {} at {remote_path}", provider.name());
                result.remote_path = Some(remote_path);
            }
            Err(e) if self.ctx.remote.required => return Err(e.into()),
            Err(e) => {
                result.warn(format!("Upload to {} failed: {e}", provider.name()));
                return Ok(());
            }
        }

        match provider.share_link(&result.archive_name).await {
            Ok(link) => result.share_link = Some(link),
            Err(e) => {
                result.warn(format!("Share link unavailable: {e}"));
                result.share_link_error = Some(e.to_string());
            }
        }
        Ok(())
    }
}

/// Local `full_backup_*.zip` archives, newest first by name
pub async fn local_archives(backup_root: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(backup_root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(EngineError::io(format!("reading {}", backup_root.display()), e)),
    };
    let mut archives = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| EngineError::io(format!("reading {}", backup_root.display()), e))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(ARCHIVE_PREFIX) && name.ends_with(".zip") {
            archives.push(entry.path());
        }
    }
    archives.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
    Ok(archives)
}

/// Deletes all but the newest `keep` archives, returning what was removed
pub async fn prune_local_archives(backup_root: &Path, keep: usize) -> Result<Vec<PathBuf>> {
    let archives = local_archives(backup_root).await?;
    let mut removed = Vec::new();
    for old in archives.into_iter().skip(keep) {
        tokio::fs::remove_file(&old)
            .await
            .map_err(|e| EngineError::io(format!("removing {}", old.display()), e))?;
        info!("Removed old archive {}", old.display());
        removed.push(old);
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn retention_keeps_newest_archives() {
        let dir = tempfile::tempdir().unwrap();
        for stamp in ["20250104_173000", "20250111_173000", "20250118_173000"] {
            tokio::fs::write(dir.path().join(archive_name(stamp)), b"zip")
                .await
                .unwrap();
        }
        tokio::fs::write(dir.path().join("notes.zip"), b"keep me").await.unwrap();

        let removed = prune_local_archives(dir.path(), 2).await.unwrap();

        assert_eq!(removed, vec![dir.path().join("full_backup_20250104_173000.zip")]);
        let left = local_archives(dir.path()).await.unwrap();
        assert_eq!(left.len(), 2);
        assert!(dir.path().join("notes.zip").exists());
    }

    #[test]
    fn archive_names_are_timestamped() {
        assert_eq!(archive_name("20250104_173000"), "full_backup_20250104_173000.zip");
    }
}
