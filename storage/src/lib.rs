//! Remote storage for backup archives.
//!
//! Archives live in a single remote folder (`/backups` by default). Providers
//! implement [`StorageProvider`]; [`StorageProviderFactory`] builds one from a
//! [`StorageConfig`].

mod error;
pub mod providers;
mod reporting;
mod types;

pub use error::StorageError;
pub use providers::*;
pub use reporting::report_storage_error;
pub use types::*;

use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Core storage provider interface
#[async_trait]
pub trait StorageProvider: Send + Sync + 'static {
    /// Returns the name of the storage provider.
    fn name(&self) -> &str;

    /// Uploads a local archive into the remote folder, overwriting any object
    /// with the same name. Returns the remote path.
    async fn upload(&self, local_path: &Path) -> Result<String, StorageError>;

    /// Lists the archives in the remote folder.
    async fn list(&self) -> Result<Vec<RemoteBackup>, StorageError>;

    /// Downloads an archive into `dest_dir`, returning the local path.
    async fn download(&self, name: &str, dest_dir: &Path) -> Result<PathBuf, StorageError>;

    /// Returns a direct-download link, reusing an existing one when possible.
    async fn share_link(&self, name: &str) -> Result<String, StorageError>;

    /// Deletes an archive from the remote folder.
    async fn delete(&self, name: &str) -> Result<(), StorageError>;
}

/// Factory for creating storage providers.
pub struct StorageProviderFactory;

impl StorageProviderFactory {
    /// Builds the configured provider. `Ok(None)` means remote storage is disabled.
    pub async fn create(
        config: &StorageConfig,
    ) -> Result<Option<Box<dyn StorageProvider>>, StorageError> {
        let provider: Box<dyn StorageProvider> = match config.provider {
            StorageProviderType::None => return Ok(None),
            StorageProviderType::Dropbox => {
                let token = config
                    .access_token
                    .as_deref()
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| {
                        StorageError::Configuration("Dropbox access token is not set".to_string())
                    })?;
                Box::new(DropboxProvider::new(token, &config.folder))
            }
            StorageProviderType::S3 => {
                let bucket = config.bucket.clone().ok_or_else(|| {
                    StorageError::Configuration("S3 bucket is not set".to_string())
                })?;
                Box::new(
                    S3Provider::new(
                        config.region.clone(),
                        config.endpoint.clone(),
                        config.access_key.clone(),
                        config.secret_key.clone(),
                        bucket,
                        &config.folder,
                    )
                    .await?,
                )
            }
            StorageProviderType::Local => {
                let dir = config.local_dir.clone().ok_or_else(|| {
                    StorageError::Configuration("Local storage directory is not set".to_string())
                })?;
                Box::new(LocalProvider::new(dir, &config.folder))
            }
        };
        Ok(Some(provider))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_provider_is_none() {
        let provider = StorageProviderFactory::create(&StorageConfig::default())
            .await
            .unwrap();
        assert!(provider.is_none());
    }

    #[tokio::test]
    async fn dropbox_without_token_is_a_configuration_error() {
        let config = StorageConfig {
            provider: StorageProviderType::Dropbox,
            access_token: Some("  ".to_string()),
            ..Default::default()
        };
        let err = StorageProviderFactory::create(&config).await.err().unwrap();
        assert!(matches!(err, StorageError::Configuration(_)));
    }

    #[tokio::test]
    async fn local_provider_is_built_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            provider: StorageProviderType::Local,
            local_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let provider = StorageProviderFactory::create(&config).await.unwrap().unwrap();
        assert_eq!(provider.name(), "Local directory");
    }
}
