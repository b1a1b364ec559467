//! Request/response contract for an HTTP control surface. The server owns
//! routing and auth; it deserialises these types, calls the matching
//! [`Engine`] operation and maps [`ControlError::status`] onto the response.

use crate::backup::{local_archives, BackupRequest, BackupTrigger};
use crate::error::{EngineError, ErrorClass};
use crate::restore::RestoreRequest;
use crate::Engine;
use database::DbEngine;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use storage::{RemoteBackup, StorageError, StorageProvider};
use thiserror::Error;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBackupRequest {
    pub include_backend: Option<bool>,
    pub include_db: Option<bool>,
    pub db_engine: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBackupResponse {
    pub backup_file: String,
    pub remote_path: Option<String>,
    pub share_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share_link_error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListLocalResponse {
    pub backups: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListRemoteResponse {
    pub backups: Vec<RemoteBackup>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreBackupRequest {
    pub backup_file: String,
    pub restore_code: Option<bool>,
    pub restore_db: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MessageResponse {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// What a remote restore brings back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteRestoreKind {
    /// Code and database
    Total,
    /// Database only
    Base,
    /// Code only
    Backend,
}

impl RemoteRestoreKind {
    /// `(restore_code, restore_database)`
    pub fn scope(self) -> (bool, bool) {
        match self {
            RemoteRestoreKind::Total => (true, true),
            RemoteRestoreKind::Base => (false, true),
            RemoteRestoreKind::Backend => (true, false),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteRestoreRequest {
    pub filename: String,
    #[serde(rename = "type")]
    pub kind: RemoteRestoreKind,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ControlError {
    pub fn status(&self) -> u16 {
        match self {
            ControlError::BadRequest(_) => 400,
            ControlError::NotFound(_) => 404,
            ControlError::Internal(_) => 500,
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.to_string(),
        }
    }

    fn from_class(class: ErrorClass, message: String) -> Self {
        match class {
            ErrorClass::CallerInput => ControlError::BadRequest(message),
            ErrorClass::NotFound => ControlError::NotFound(message),
            ErrorClass::Internal => ControlError::Internal(message),
        }
    }
}

impl From<EngineError> for ControlError {
    fn from(err: EngineError) -> Self {
        ControlError::from_class(err.class(), err.to_string())
    }
}

impl From<StorageError> for ControlError {
    fn from(err: StorageError) -> Self {
        EngineError::from(err).into()
    }
}

/// Plain `.zip` file name with no path components
pub fn validate_archive_name(name: &str) -> Result<(), ControlError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ControlError::BadRequest("File name is required".to_string()));
    }
    if name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(ControlError::BadRequest(format!("Invalid file name: {name}")));
    }
    if !name.ends_with(".zip") {
        return Err(ControlError::BadRequest(format!("Not a backup archive: {name}")));
    }
    Ok(())
}

impl Engine {
    fn remote_provider(&self) -> Result<Arc<dyn StorageProvider>, ControlError> {
        let remote = &self.ctx.remote;
        remote.provider.clone().ok_or_else(|| {
            ControlError::Internal(
                remote
                    .unavailable
                    .clone()
                    .unwrap_or_else(|| "Remote storage is not configured".to_string()),
            )
        })
    }

    pub async fn create(
        &self,
        request: CreateBackupRequest,
    ) -> Result<CreateBackupResponse, ControlError> {
        let engine = match request.db_engine.as_deref() {
            Some(name) => name
                .parse::<DbEngine>()
                .map_err(|e| ControlError::BadRequest(e.to_string()))?,
            None => self.default_engine,
        };
        let result = self
            .backups
            .run_backup(BackupRequest {
                include_code: request.include_backend.unwrap_or(true),
                include_database: request.include_db.unwrap_or(true),
                engine,
                trigger: BackupTrigger::Manual,
            })
            .await;

        if !result.success {
            return Err(ControlError::Internal(
                result
                    .error
                    .unwrap_or_else(|| "Backup failed".to_string()),
            ));
        }
        Ok(CreateBackupResponse {
            backup_file: result.archive_name,
            remote_path: result.remote_path,
            share_link: result.share_link,
            share_link_error: result.share_link_error,
            warnings: result.warnings,
        })
    }

    pub async fn list_local(&self) -> Result<ListLocalResponse, ControlError> {
        let backups = local_archives(&self.ctx.backup_root)
            .await?
            .into_iter()
            .filter_map(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        Ok(ListLocalResponse { backups })
    }

    pub async fn list_remote(&self) -> Result<ListRemoteResponse, ControlError> {
        let provider = self.remote_provider()?;
        let mut backups = provider.list().await?;
        backups.sort_by(|a, b| b.name.cmp(&a.name));
        Ok(ListRemoteResponse { backups })
    }

    pub async fn restore(
        &self,
        request: RestoreBackupRequest,
    ) -> Result<MessageResponse, ControlError> {
        validate_archive_name(&request.backup_file)?;
        self.restore_archive(
            request.backup_file.trim(),
            request.restore_code.unwrap_or(true),
            request.restore_db.unwrap_or(true),
        )
        .await
    }

    async fn restore_archive(
        &self,
        name: &str,
        restore_code: bool,
        restore_database: bool,
    ) -> Result<MessageResponse, ControlError> {
        let result = self
            .restores
            .run_restore(RestoreRequest {
                archive: name.to_string(),
                restore_code,
                restore_database,
            })
            .await;

        match (result.success, result.error) {
            (true, _) => Ok(MessageResponse {
                message: result
                    .message
                    .unwrap_or_else(|| format!("Backup {name} restored successfully")),
                warnings: result.warnings,
            }),
            (false, Some(failure)) => Err(ControlError::from_class(failure.class, failure.detail)),
            (false, None) => Err(ControlError::Internal("Restore failed".to_string())),
        }
    }

    /// Local path of an archive, for the server to stream as an attachment
    pub async fn download(&self, filename: &str) -> Result<PathBuf, ControlError> {
        validate_archive_name(filename)?;
        let path = self.ctx.backup_root.join(filename.trim());
        if !path.is_file() {
            return Err(ControlError::NotFound(format!("Backup file not found: {filename}")));
        }
        Ok(path)
    }

    pub async fn delete(&self, filename: &str) -> Result<MessageResponse, ControlError> {
        let path = self.download(filename).await?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| ControlError::Internal(format!("Failed to delete {filename}: {e}")))?;
        info!("Deleted local archive {}", path.display());
        Ok(MessageResponse {
            message: format!("Backup {filename} deleted"),
            warnings: Vec::new(),
        })
    }

    pub async fn delete_remote(&self, filename: &str) -> Result<MessageResponse, ControlError> {
        validate_archive_name(filename)?;
        let provider = self.remote_provider()?;
        provider.delete(filename.trim()).await?;
        info!("Deleted {filename} from {}", provider.name());
        Ok(MessageResponse {
            message: format!("Remote backup {filename} deleted"),
            warnings: Vec::new(),
        })
    }

    /// Downloads the archive into the backup root, then restores it
    pub async fn restore_from_remote(
        &self,
        request: RemoteRestoreRequest,
    ) -> Result<MessageResponse, ControlError> {
        validate_archive_name(&request.filename)?;
        let name = request.filename.trim();
        let provider = self.remote_provider()?;

        tokio::fs::create_dir_all(&self.ctx.backup_root)
            .await
            .map_err(|e| ControlError::Internal(format!("Cannot create backup root: {e}")))?;
        let local = provider.download(name, &self.ctx.backup_root).await?;
        info!("Fetched {name} from {} into {}", provider.name(), local.display());

        let (restore_code, restore_database) = request.kind.scope();
        self.restore_archive(name, restore_code, restore_database)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_with_path_components_are_rejected() {
        for bad in ["", "../full_backup_1.zip", "a/b.zip", "a\\b.zip", "notes.txt"] {
            let err = validate_archive_name(bad).unwrap_err();
            assert_eq!(err.status(), 400, "{bad}");
        }
        assert!(validate_archive_name("full_backup_20250104_173000.zip").is_ok());
    }

    #[test]
    fn requests_use_camel_case() {
        let request: CreateBackupRequest =
            serde_json::from_str(r#"{"includeBackend": false, "dbEngine": "sqlite"}"#).unwrap();
        assert_eq!(request.include_backend, Some(false));
        assert_eq!(request.include_db, None);
        assert_eq!(request.db_engine.as_deref(), Some("sqlite"));

        let request: RestoreBackupRequest =
            serde_json::from_str(r#"{"backupFile": "full_backup_1.zip", "restoreDb": false}"#)
                .unwrap();
        assert_eq!(request.backup_file, "full_backup_1.zip");
        assert_eq!(request.restore_db, Some(false));
    }

    #[test]
    fn remote_restore_type_maps_to_scope() {
        let request: RemoteRestoreRequest =
            serde_json::from_str(r#"{"filename": "full_backup_1.zip", "type": "base"}"#).unwrap();
        assert_eq!(request.kind.scope(), (false, true));
        assert_eq!(RemoteRestoreKind::Total.scope(), (true, true));
        assert_eq!(RemoteRestoreKind::Backend.scope(), (true, false));
    }

    #[test]
    fn response_shapes() {
        let response = CreateBackupResponse {
            backup_file: "full_backup_1.zip".to_string(),
            remote_path: Some("/backups/full_backup_1.zip".to_string()),
            share_link: None,
            share_link_error: None,
            warnings: Vec::new(),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["backupFile"], "full_backup_1.zip");
        assert_eq!(json["remotePath"], "/backups/full_backup_1.zip");
        assert!(json["shareLink"].is_null());
        assert!(json.get("warnings").is_none());

        let err = ControlError::NotFound("Backup file not found: x.zip".to_string());
        assert_eq!(err.status(), 404);
        assert_eq!(
            serde_json::to_value(err.body()).unwrap()["error"],
            "Backup file not found: x.zip"
        );
    }

    #[test]
    fn engine_errors_map_to_status_codes() {
        let err: ControlError = EngineError::ArchiveNotFound("x.zip".to_string()).into();
        assert_eq!(err.status(), 400);
        let err: ControlError = StorageError::NotFound("x.zip".to_string()).into();
        assert_eq!(err.status(), 404);
        let err: ControlError = EngineError::Archive("disk full".to_string()).into();
        assert_eq!(err.status(), 500);
    }
}
