use crate::{
    finish_download, partial_download, remote_path, report_storage_error, validate_name,
    RemoteBackup, StorageError, StorageProvider,
};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use aws_smithy_types::DateTime;
use chrono::{TimeZone, Utc};
use log::{debug, error, info};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};

/// 5MB (S3 minimum part size)
const PART_SIZE: usize = 5 * 1024 * 1024;
/// Presigned links live for the SigV4 maximum of seven days
const LINK_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// S3-compatible provider (AWS, MinIO, R2, ...)
pub struct S3Provider {
    /// S3 client
    client: Client,
    bucket: String,
    /// Key prefix standing in for the remote folder, without slashes at the ends
    prefix: String,
    folder: String,
}

impl S3Provider {
    /// Creates a new S3 provider
    pub async fn new(
        region: Option<String>,
        endpoint: Option<String>,
        access_key: Option<String>,
        secret_key: Option<String>,
        bucket: String,
        folder: &str,
    ) -> Result<Self, StorageError> {
        let region_str = region.unwrap_or("us-east-1".to_string());
        let region = Region::new(region_str.clone());

        let mut config_builder = aws_config::defaults(BehaviorVersion::v2025_01_17())
            .region(region)
            .retry_config(aws_config::retry::RetryConfig::standard().with_max_attempts(3));

        // Add credentials if provided
        if let (Some(access_key), Some(secret_key)) = (access_key, secret_key) {
            let credentials = aws_sdk_s3::config::Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "static-credentials-provider",
            );
            config_builder =
                config_builder.credentials_provider(SharedCredentialsProvider::new(credentials));
        }

        // Add custom endpoint if provided
        if let Some(ref endpoint) = endpoint {
            info!("Using custom endpoint: {endpoint}");
            config_builder = config_builder.endpoint_url(endpoint);
        } else {
            info!("Using default AWS endpoint for region: {region_str}");
        }

        // Build the base AWS config
        let sdk_config = config_builder.load().await;

        // Custom endpoints (MinIO, R2) need path-style addressing
        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if endpoint.is_some() {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }
        let client = Client::from_conf(s3_config_builder.build());

        Ok(Self {
            client,
            bucket,
            prefix: folder.trim_matches('/').to_string(),
            folder: folder.to_string(),
        })
    }

    fn key(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{name}", self.prefix)
        }
    }

    /// Maps an SDK failure, reporting it to Sentry
    fn sdk_error<E>(
        &self,
        operation: &str,
        name: Option<&str>,
        err: &SdkError<E, HttpResponse>,
    ) -> StorageError
    where
        E: ProvideErrorMetadata + std::error::Error + 'static,
    {
        let status = err.raw_response().map(|r| r.status().as_u16());
        let message = DisplayErrorContext(err).to_string();
        let err = match classify(err.code(), status) {
            Failure::Missing => StorageError::NotFound(format!(
                "{}/{} not found",
                self.bucket,
                name.unwrap_or_default()
            )),
            Failure::Denied => StorageError::PermissionDenied(message),
            Failure::Other => StorageError::Aws(message),
        };
        error!("S3 {operation} failed: {err}");
        if !err.is_not_found() {
            report_storage_error(self.name(), operation, &err, name);
        }
        err
    }

    async fn ensure_exists(&self, name: &str) -> Result<String, StorageError> {
        validate_name(name)?;
        let key = self.key(name);
        self.client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| self.sdk_error("head_object", Some(name), &e))?;
        Ok(key)
    }

    /// Helper: initiate a multipart upload and return the upload_id
    async fn initiate_multipart_upload(&self, key: &str, name: &str) -> Result<String, StorageError> {
        let resp = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/zip")
            .send()
            .await
            .map_err(|e| self.sdk_error("create_multipart_upload", Some(name), &e))?;
        resp.upload_id()
            .map(|s| s.to_string())
            .ok_or_else(|| StorageError::Unexpected("No upload_id returned from S3".to_string()))
    }

    async fn upload_multipart<R>(&self, reader: &mut R, key: &str, name: &str) -> Result<(), StorageError>
    where
        R: tokio::io::AsyncRead + Unpin + Send,
    {
        let upload_id = self.initiate_multipart_upload(key, name).await?;
        let mut parts: Vec<CompletedPart> = Vec::new();
        let mut part_number = 1;
        loop {
            let mut buf = vec![0u8; PART_SIZE];
            let mut filled = 0;
            // Fill the buffer up to PART_SIZE or until EOF
            while filled < PART_SIZE {
                let n = reader.read(&mut buf[filled..]).await?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            if filled == 0 {
                break;
            }
            let is_last_part = filled < PART_SIZE;
            debug!("Uploading part {part_number} ({filled} bytes)");
            let upload_part_resp = match self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(&upload_id)
                .part_number(part_number)
                .body(ByteStream::from(buf[..filled].to_vec()))
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    let err = self.sdk_error("upload_part", Some(name), &e);
                    if let Err(abort) = self
                        .client
                        .abort_multipart_upload()
                        .bucket(&self.bucket)
                        .key(key)
                        .upload_id(&upload_id)
                        .send()
                        .await
                    {
                        error!("Failed to abort multipart upload for {key}: {abort}");
                    }
                    return Err(err);
                }
            };
            parts.push(
                CompletedPart::builder()
                    .set_part_number(Some(part_number))
                    .set_e_tag(upload_part_resp.e_tag().map(|s| s.to_string()))
                    .build(),
            );
            part_number += 1;
            if is_last_part {
                break;
            }
        }

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();
        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(&upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .map_err(|e| self.sdk_error("complete_multipart_upload", Some(name), &e))?;
        Ok(())
    }
}

fn to_chrono(dt: &DateTime) -> Option<chrono::DateTime<Utc>> {
    Utc.timestamp_opt(dt.secs(), 0).single()
}

#[derive(Debug, PartialEq, Eq)]
enum Failure {
    Missing,
    Denied,
    Other,
}

/// Classifies by service error code, falling back to the HTTP status for
/// bodiless responses such as HEAD
fn classify(code: Option<&str>, status: Option<u16>) -> Failure {
    match code {
        Some("NoSuchKey" | "NotFound") => Failure::Missing,
        Some("AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch" | "Forbidden") => {
            Failure::Denied
        }
        _ => match status {
            Some(404) if code.is_none() => Failure::Missing,
            Some(403) => Failure::Denied,
            _ => Failure::Other,
        },
    }
}

#[async_trait]
impl StorageProvider for S3Provider {
    fn name(&self) -> &str {
        "S3"
    }

    async fn upload(&self, local_path: &Path) -> Result<String, StorageError> {
        let name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| StorageError::InvalidName(local_path.display().to_string()))?;
        validate_name(&name)?;
        let key = self.key(&name);

        let file = tokio::fs::File::open(local_path).await.map_err(|e| {
            error!("Failed to open file {}: {}", local_path.display(), e);
            StorageError::Io(e)
        })?;
        let file_size = file.metadata().await?.len();
        let mut reader = BufReader::new(file);

        // Use single put_object for small files
        if file_size <= PART_SIZE as u64 {
            let mut buffer = Vec::with_capacity(file_size as usize);
            reader.read_to_end(&mut buffer).await?;
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&key)
                .content_type("application/zip")
                .body(ByteStream::from(buffer))
                .send()
                .await
                .map_err(|e| self.sdk_error("put_object", Some(&name), &e))?;
            info!("Uploaded {} to {}/{key} ({file_size} bytes) in single part", local_path.display(), self.bucket);
        } else {
            self.upload_multipart(&mut reader, &key, &name).await?;
            info!("Multipart upload completed: {}/{key}", self.bucket);
        }
        Ok(remote_path(&self.folder, &name))
    }

    async fn list(&self) -> Result<Vec<RemoteBackup>, StorageError> {
        let prefix = if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        };
        let mut backups = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let result = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| self.sdk_error("list_objects_v2", None, &e))?;

            for obj in result.contents() {
                let Some(key) = obj.key() else { continue };
                let name = &key[prefix.len()..];
                // Skip "sub/folder" keys and the folder placeholder itself
                if name.is_empty() || name.contains('/') {
                    continue;
                }
                let size = obj.size().map(|s| s.max(0) as u64).unwrap_or(0);
                let modified = obj.last_modified().and_then(to_chrono);
                backups.push(RemoteBackup::new(name, &self.folder, size, modified));
            }

            match result.next_continuation_token() {
                Some(token) if result.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }
        backups.sort_by(|a, b| b.name.cmp(&a.name));
        Ok(backups)
    }

    async fn download(&self, name: &str, dest_dir: &Path) -> Result<PathBuf, StorageError> {
        validate_name(name)?;
        let key = self.key(name);
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| self.sdk_error("get_object", Some(name), &e))?;

        tokio::fs::create_dir_all(dest_dir).await?;
        let partial = partial_download(dest_dir, name);
        let written = async {
            let mut file = tokio::fs::File::create(&partial).await?;
            let mut stream = resp.body.into_async_read();
            tokio::io::copy(&mut stream, &mut file).await?;
            file.flush().await?;
            Ok::<(), StorageError>(())
        }
        .await;
        finish_download(&partial, dest_dir.join(name), written).await
    }

    async fn share_link(&self, name: &str) -> Result<String, StorageError> {
        let key = self.ensure_exists(name).await?;
        let presigning = PresigningConfig::expires_in(LINK_TTL)
            .map_err(|e| StorageError::Configuration(e.to_string()))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .response_content_disposition(format!("attachment; filename=\"{name}\""))
            .presigned(presigning)
            .await
            .map_err(|e| self.sdk_error("presign_get_object", Some(name), &e))?;
        Ok(request.uri().to_string())
    }

    async fn delete(&self, name: &str) -> Result<(), StorageError> {
        // S3 deletes are silent for missing keys, so look first
        let key = self.ensure_exists(name).await?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| self.sdk_error("delete_object", Some(name), &e))?;
        info!("Deleted {}/{key}", self.bucket);
        Ok(())
    }
}
