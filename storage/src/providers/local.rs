use crate::{
    finish_download, partial_download, remote_path, validate_name, RemoteBackup, StorageError,
    StorageProvider,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use std::path::{Path, PathBuf};
use url::Url;

/// Stores archives in a plain directory, e.g. a mounted network share.
pub struct LocalProvider {
    root: PathBuf,
    folder: String,
}

impl LocalProvider {
    pub fn new(root: impl Into<PathBuf>, folder: &str) -> Self {
        Self {
            root: root.into(),
            folder: folder.to_string(),
        }
    }

    /// Directory that plays the role of the remote folder
    pub fn folder_dir(&self) -> PathBuf {
        let folder = self.folder.trim_matches('/');
        if folder.is_empty() {
            self.root.clone()
        } else {
            self.root.join(folder)
        }
    }

    fn object_path(&self, name: &str) -> Result<PathBuf, StorageError> {
        validate_name(name)?;
        Ok(self.folder_dir().join(name))
    }

    async fn existing_object(&self, name: &str) -> Result<PathBuf, StorageError> {
        let path = self.object_path(name)?;
        if !tokio::fs::try_exists(&path).await? {
            return Err(StorageError::NotFound(format!(
                "{} not found",
                remote_path(&self.folder, name)
            )));
        }
        Ok(path)
    }
}

#[async_trait]
impl StorageProvider for LocalProvider {
    fn name(&self) -> &str {
        "Local directory"
    }

    async fn upload(&self, local_path: &Path) -> Result<String, StorageError> {
        let name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| StorageError::InvalidName(local_path.display().to_string()))?;
        let target = self.object_path(&name)?;
        tokio::fs::create_dir_all(self.folder_dir()).await?;

        // Copy next to the target first so a reader never sees a half-written archive
        let partial = target.with_extension("partial");
        let bytes = tokio::fs::copy(local_path, &partial).await?;
        tokio::fs::rename(&partial, &target).await?;

        info!("Copied {} to {} ({bytes} bytes)", local_path.display(), target.display());
        Ok(remote_path(&self.folder, &name))
    }

    async fn list(&self) -> Result<Vec<RemoteBackup>, StorageError> {
        let dir = self.folder_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Storage directory {} does not exist yet", dir.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(StorageError::Io(e)),
        };

        let mut backups = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".partial") {
                continue;
            }
            let modified = metadata.modified().ok().map(DateTime::<Utc>::from);
            backups.push(RemoteBackup::new(&name, &self.folder, metadata.len(), modified));
        }
        backups.sort_by(|a, b| b.name.cmp(&a.name));
        Ok(backups)
    }

    async fn download(&self, name: &str, dest_dir: &Path) -> Result<PathBuf, StorageError> {
        let source = self.existing_object(name).await?;
        tokio::fs::create_dir_all(dest_dir).await?;
        let partial = partial_download(dest_dir, name);
        let written = tokio::fs::copy(&source, &partial)
            .await
            .map(|_| ())
            .map_err(StorageError::from);
        finish_download(&partial, dest_dir.join(name), written).await
    }

    async fn share_link(&self, name: &str) -> Result<String, StorageError> {
        let path = self.existing_object(name).await?;
        let absolute = std::path::absolute(&path)?;
        Url::from_file_path(&absolute)
            .map(|url| url.to_string())
            .map_err(|_| StorageError::Unexpected(format!("cannot build a link for {}", absolute.display())))
    }

    async fn delete(&self, name: &str) -> Result<(), StorageError> {
        let path = self.existing_object(name).await?;
        tokio::fs::remove_file(&path).await?;
        info!("Deleted {}", path.display());
        Ok(())
    }
}
