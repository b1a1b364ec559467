//! Restore pipeline: locate, unpack, detect layout, replace code, restore the
//! database, replay migrations, clean up. Phases are not transactional.

use crate::archive::extract_archive;
use crate::error::{EngineError, ErrorClass, Result};
use crate::layout::{detect, DatabaseArtifact};
use crate::EngineContext;
use database::{load_fixtures, FixtureReport};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const RESTORE_DIR: &str = "restore_temp";

#[derive(Debug, Clone)]
pub struct RestoreRequest {
    /// Archive file name under the backup root, or an explicit path
    pub archive: String,
    pub restore_code: bool,
    pub restore_database: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestorePhase {
    Locate,
    Unpack,
    Code,
    Database,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseError {
    pub phase: RestorePhase,
    pub detail: String,
    pub class: ErrorClass,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreResult {
    pub success: bool,
    pub message: Option<String>,
    pub error: Option<PhaseError>,
    pub warnings: Vec<String>,
    pub fixtures: Option<FixtureReport>,
}

impl RestoreResult {
    fn new() -> Self {
        Self {
            success: false,
            message: None,
            error: None,
            warnings: Vec::new(),
            fixtures: None,
        }
    }

    fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{message}");
        self.warnings.push(message);
    }

    fn fail(&mut self, phase: RestorePhase, err: EngineError) {
        error!("Restore failed during {phase:?}: {err}");
        self.error = Some(PhaseError {
            phase,
            detail: err.to_string(),
            class: err.class(),
        });
    }
}

pub struct RestoreManager {
    ctx: Arc<EngineContext>,
}

impl RestoreManager {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Resolves a bare file name under the backup root. Anything with a path
    /// separator or `..` is taken as an explicit path.
    pub fn resolve_archive(&self, archive: &str) -> Result<PathBuf> {
        let is_plain = !archive.is_empty()
            && !archive.contains('/')
            && !archive.contains('\\')
            && !archive.contains("..");
        let path = if is_plain {
            self.ctx.backup_root.join(archive)
        } else {
            PathBuf::from(archive)
        };
        if path.is_file() {
            Ok(path)
        } else {
            Err(EngineError::ArchiveNotFound(archive.to_string()))
        }
    }

    pub async fn run_restore(&self, request: RestoreRequest) -> RestoreResult {
        let mut result = RestoreResult::new();

        let archive = match self.resolve_archive(&request.archive) {
            Ok(path) => path,
            Err(e) => {
                result.fail(RestorePhase::Locate, e);
                return result;
            }
        };

        let _guard = match self.ctx.lock.acquire().await {
            Ok(guard) => guard,
            Err(e) => {
                result.fail(RestorePhase::Locate, e);
                return result;
            }
        };

        info!(
            "Restoring {} (code: {}, database: {})",
            archive.display(),
            request.restore_code,
            request.restore_database
        );
        let temp = self.ctx.backup_root.join(RESTORE_DIR);
        let outcome = self.run_phases(&request, &archive, &temp, &mut result).await;

        if let Err(e) = tokio::fs::remove_dir_all(&temp).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                result.warn(format!("Failed to remove {}: {e}", temp.display()));
            }
        }

        match outcome {
            Ok(()) => {
                let name = archive
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| request.archive.clone());
                info!("Backup {name} restored");
                result.success = true;
                result.message = Some(format!("Backup {name} restored successfully"));
            }
            Err((phase, e)) => result.fail(phase, e),
        }
        result
    }

    async fn run_phases(
        &self,
        request: &RestoreRequest,
        archive: &Path,
        temp: &Path,
        result: &mut RestoreResult,
    ) -> std::result::Result<(), (RestorePhase, EngineError)> {
        let unpack = |e: EngineError| (RestorePhase::Unpack, e);

        if temp.exists() {
            tokio::fs::remove_dir_all(temp)
                .await
                .map_err(|e| unpack(EngineError::io(format!("clearing {}", temp.display()), e)))?;
        }
        tokio::fs::create_dir_all(temp)
            .await
            .map_err(|e| unpack(EngineError::io(format!("creating {}", temp.display()), e)))?;

        let (zip, dest) = (archive.to_path_buf(), temp.to_path_buf());
        tokio::task::spawn_blocking(move || extract_archive(&zip, &dest))
            .await
            .map_err(|e| unpack(e.into()))?
            .map_err(unpack)?;

        let layout = detect(temp, &self.ctx.embedded_name).map_err(unpack)?;
        for marker in &layout.markers {
            result.warn(format!(
                "Archive carries a dump diagnostic: {}",
                marker.file_name().unwrap_or_default().to_string_lossy()
            ));
        }

        if request.restore_code {
            match &layout.code {
                Some(code) => {
                    let source = self.ctx.source.clone();
                    let snapshot = code.path().to_path_buf();
                    let restored = tokio::task::spawn_blocking(move || source.restore_from(&snapshot))
                        .await
                        .map_err(|e| (RestorePhase::Code, EngineError::from(e)))?
                        .map_err(|e| (RestorePhase::Code, e))?;
                    info!("Source entries restored: {}", restored.join(", "));
                }
                None => result.warn("Code restore requested but the archive has no source snapshot"),
            }
        }

        if !request.restore_database {
            return Ok(());
        }

        let db = |e: database::DatabaseError| (RestorePhase::Database, EngineError::from(e));
        let restored_db = match &layout.database {
            DatabaseArtifact::Embedded(path) => {
                self.ctx.sqlite.restore(path).await.map_err(db)?;
                true
            }
            DatabaseArtifact::SqlDump(path) => {
                self.ctx.postgres.restore(path).await.map_err(db)?;
                true
            }
            DatabaseArtifact::Fixtures(files) => {
                let report = load_fixtures(self.ctx.data_layer.as_ref(), files).await;
                for failed in report.failures() {
                    result.warn(format!(
                        "Fixture {} not loaded: {}",
                        failed.file,
                        failed.error.as_deref().unwrap_or_default()
                    ));
                }
                let loaded = report.loaded() > 0;
                result.fixtures = Some(report);
                loaded
            }
            DatabaseArtifact::None => {
                result.warn("Database restore requested but the archive has no database content");
                false
            }
        };

        if restored_db {
            if let Err(e) = self.ctx.data_layer.migrate().await {
                result.warn(format!("Migrations failed after restore: {e}"));
            }
            if let Err(e) = self.ctx.data_layer.rebuild_static().await {
                result.warn(format!("Static files not rebuilt: {e}"));
            }
        }
        Ok(())
    }
}
