use crate::StorageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// An archive stored with a remote provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteBackup {
    /// File name of the archive
    pub name: String,
    /// Provider path, e.g. `/backups/full_backup_20250104_173000.zip`
    pub path: String,
    /// Size in KiB, rounded to two decimals
    #[serde(rename = "sizeKB")]
    pub size_kb: f64,
    /// Last modification time reported by the provider
    #[serde(rename = "modifiedAt")]
    pub modified_at: Option<DateTime<Utc>>,
}

impl RemoteBackup {
    pub fn new(name: &str, folder: &str, size_bytes: u64, modified_at: Option<DateTime<Utc>>) -> Self {
        Self {
            name: name.to_string(),
            path: remote_path(folder, name),
            size_kb: size_kb(size_bytes),
            modified_at,
        }
    }
}

/// Storage provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Provider type
    pub provider: StorageProviderType,
    /// Remote folder holding the archives
    pub folder: String,
    /// Dropbox access token
    pub access_token: Option<String>,
    /// Bucket for S3-compatible providers
    pub bucket: Option<String>,
    /// Region for the provider
    pub region: Option<String>,
    /// Custom endpoint URL
    pub endpoint: Option<String>,
    /// Access key ID
    pub access_key: Option<String>,
    /// Secret access key
    pub secret_key: Option<String>,
    /// Target directory for the local provider
    pub local_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: StorageProviderType::None,
            folder: DEFAULT_FOLDER.to_string(),
            access_token: None,
            bucket: None,
            region: None,
            endpoint: None,
            access_key: None,
            secret_key: None,
            local_dir: None,
        }
    }
}

/// Supported storage provider types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProviderType {
    Dropbox,
    S3,
    Local,
    /// Remote upload disabled
    None,
}

impl FromStr for StorageProviderType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dropbox" => Ok(StorageProviderType::Dropbox),
            "s3" | "aws" | "minio" => Ok(StorageProviderType::S3),
            "local" | "directory" => Ok(StorageProviderType::Local),
            "" | "none" | "disabled" => Ok(StorageProviderType::None),
            other => Err(StorageError::Configuration(format!(
                "unknown storage provider: {other}"
            ))),
        }
    }
}

impl fmt::Display for StorageProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StorageProviderType::Dropbox => "dropbox",
            StorageProviderType::S3 => "s3",
            StorageProviderType::Local => "local",
            StorageProviderType::None => "none",
        };
        write!(f, "{name}")
    }
}

pub const DEFAULT_FOLDER: &str = "/backups";

/// Joins the remote folder and an archive name into `/<folder>/<name>`
pub fn remote_path(folder: &str, name: &str) -> String {
    let folder = folder.trim_matches('/');
    if folder.is_empty() {
        format!("/{name}")
    } else {
        format!("/{folder}/{name}")
    }
}

pub fn size_kb(bytes: u64) -> f64 {
    (bytes as f64 / 1024.0 * 100.0).round() / 100.0
}

/// Rejects names that could escape the remote folder
pub fn validate_name(name: &str) -> Result<(), StorageError> {
    if name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
        || name.chars().any(char::is_control)
    {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// File a download is streamed into before it replaces `<dest_dir>/<name>`
pub fn partial_download(dest_dir: &Path, name: &str) -> PathBuf {
    dest_dir.join(format!("{name}.part"))
}

/// Moves a finished download over `destination`. A failed one is removed and
/// leaves any existing file at `destination` untouched.
pub async fn finish_download(
    partial: &Path,
    destination: PathBuf,
    written: Result<(), StorageError>,
) -> Result<PathBuf, StorageError> {
    match written {
        Ok(()) => {
            tokio::fs::rename(partial, &destination).await?;
            Ok(destination)
        }
        Err(e) => {
            if let Err(cleanup) = tokio::fs::remove_file(partial).await {
                log::debug!("Partial download {} not removed: {cleanup}", partial.display());
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_paths_are_rooted() {
        assert_eq!(remote_path("/backups", "a.zip"), "/backups/a.zip");
        assert_eq!(remote_path("backups/", "a.zip"), "/backups/a.zip");
        assert_eq!(remote_path("", "a.zip"), "/a.zip");
    }

    #[test]
    fn sizes_round_to_two_decimals() {
        assert_eq!(size_kb(2048), 2.0);
        assert_eq!(size_kb(1000), 0.98);
    }

    #[test]
    fn traversal_names_are_rejected() {
        assert!(validate_name("full_backup_20250104_173000.zip").is_ok());
        assert!(validate_name("../etc/passwd").is_err());
        assert!(validate_name("a/b.zip").is_err());
        assert!(validate_name("").is_err());
    }

    #[test]
    fn provider_names_parse() {
        assert_eq!("Dropbox".parse::<StorageProviderType>().unwrap(), StorageProviderType::Dropbox);
        assert_eq!("none".parse::<StorageProviderType>().unwrap(), StorageProviderType::None);
        assert!("ftp".parse::<StorageProviderType>().is_err());
    }

    #[test]
    fn remote_backup_uses_wire_field_names() {
        let backup = RemoteBackup::new("a.zip", "/backups", 4096, None);
        let json = serde_json::to_value(&backup).unwrap();
        assert_eq!(json["sizeKB"], 4.0);
        assert_eq!(json["path"], "/backups/a.zip");
        assert!(json["modifiedAt"].is_null());
    }

    #[tokio::test]
    async fn failed_download_leaves_the_destination_alone() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("a.zip");
        std::fs::write(&destination, "good").unwrap();
        let partial = partial_download(dir.path(), "a.zip");
        std::fs::write(&partial, "half").unwrap();

        let err = finish_download(
            &partial,
            destination.clone(),
            Err(StorageError::Request("reset".to_string())),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StorageError::Request(_)));
        assert_eq!(std::fs::read_to_string(&destination).unwrap(), "good");
        assert!(!partial.exists());

        std::fs::write(&partial, "new").unwrap();
        let path = finish_download(&partial, destination.clone(), Ok(())).await.unwrap();
        assert_eq!(path, destination);
        assert_eq!(std::fs::read_to_string(&destination).unwrap(), "new");
        assert!(!partial.exists());
    }
}
