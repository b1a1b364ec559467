//! Dropbox HTTP API v2 provider.
//!
//! Archives are uploaded with `mode: overwrite`. Files above the session
//! threshold go through an upload session in fixed-size chunks.

use crate::{
    finish_download, partial_download, remote_path, report_storage_error, validate_name,
    RemoteBackup, StorageError, StorageProvider,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use log::{debug, error, info};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const API_BASE: &str = "https://api.dropboxapi.com";
const CONTENT_BASE: &str = "https://content.dropboxapi.com";

/// Files larger than this use an upload session (150 MiB)
pub const SESSION_THRESHOLD: u64 = 150 * 1024 * 1024;
/// Chunk size for upload sessions (8 MiB)
pub const SESSION_CHUNK: usize = 8 * 1024 * 1024;

pub struct DropboxProvider {
    client: Client,
    token: String,
    folder: String,
    api_base: String,
    content_base: String,
    session_threshold: u64,
    chunk_size: usize,
}

#[derive(Debug, Deserialize)]
struct ListFolderResponse {
    entries: Vec<FolderEntry>,
    cursor: String,
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct FolderEntry {
    #[serde(rename = ".tag")]
    tag: String,
    name: String,
    path_display: Option<String>,
    size: Option<u64>,
    server_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct SharedLink {
    url: String,
}

#[derive(Debug, Deserialize)]
struct SharedLinksResponse {
    links: Vec<SharedLink>,
}

#[derive(Debug, Deserialize)]
struct SessionStart {
    session_id: String,
}

impl DropboxProvider {
    pub fn new(token: &str, folder: &str) -> Self {
        Self::with_endpoints(token, folder, API_BASE, CONTENT_BASE)
    }

    /// Points the provider at other API hosts
    pub fn with_endpoints(token: &str, folder: &str, api_base: &str, content_base: &str) -> Self {
        Self {
            client: Client::new(),
            token: token.to_string(),
            folder: folder.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            content_base: content_base.trim_end_matches('/').to_string(),
            session_threshold: SESSION_THRESHOLD,
            chunk_size: SESSION_CHUNK,
        }
    }

    /// Overrides when upload sessions kick in and how large each chunk is
    pub fn with_chunking(mut self, session_threshold: u64, chunk_size: usize) -> Self {
        self.session_threshold = session_threshold;
        self.chunk_size = chunk_size.max(1);
        self
    }

    fn folder_path(&self) -> String {
        let folder = self.folder.trim_matches('/');
        if folder.is_empty() {
            // Dropbox wants "" for the root folder
            String::new()
        } else {
            format!("/{folder}")
        }
    }

    fn rpc(&self, endpoint: &str) -> RequestBuilder {
        self.client
            .post(format!("{}/2/{endpoint}", self.api_base))
            .bearer_auth(&self.token)
    }

    fn content(&self, endpoint: &str, arg: &Value) -> RequestBuilder {
        self.client
            .post(format!("{}/2/{endpoint}", self.content_base))
            .bearer_auth(&self.token)
            .header("Dropbox-API-Arg", api_arg(arg))
    }

    /// Maps non-success responses to typed errors and reports them
    async fn check(&self, operation: &str, name: Option<&str>, response: Response) -> Result<Response, StorageError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let err = classify(status, &body);
        error!("Dropbox {operation} failed ({status}): {body}");
        report_storage_error(self.name(), operation, &err, name);
        Err(err)
    }

    async fn send(&self, operation: &str, name: Option<&str>, request: RequestBuilder) -> Result<Response, StorageError> {
        match request.send().await {
            Ok(response) => self.check(operation, name, response).await,
            Err(e) => {
                let err = StorageError::from(e);
                report_storage_error(self.name(), operation, &err, name);
                Err(err)
            }
        }
    }

    async fn upload_small(&self, local_path: &Path, path: &str, name: &str) -> Result<(), StorageError> {
        let data = tokio::fs::read(local_path).await?;
        let arg = json!({ "path": path, "mode": "overwrite", "mute": true });
        let request = self
            .content("files/upload", &arg)
            .header("Content-Type", "application/octet-stream")
            .body(data);
        self.send("upload", Some(name), request).await?;
        Ok(())
    }

    async fn upload_session(&self, local_path: &Path, path: &str, name: &str, size: u64) -> Result<(), StorageError> {
        let mut file = tokio::fs::File::open(local_path).await?;
        let mut buffer = vec![0u8; self.chunk_size];

        let first = read_chunk(&mut file, &mut buffer).await?;
        let request = self
            .content("files/upload_session/start", &json!({ "close": false }))
            .header("Content-Type", "application/octet-stream")
            .body(buffer[..first].to_vec());
        let session: SessionStart = self
            .send("upload_session/start", Some(name), request)
            .await?
            .json()
            .await?;
        let mut offset = first as u64;
        debug!("Started upload session {} for {name}", session.session_id);

        loop {
            let filled = read_chunk(&mut file, &mut buffer).await?;
            if filled == 0 {
                break;
            }
            let arg = json!({
                "cursor": { "session_id": session.session_id, "offset": offset },
                "close": false,
            });
            let request = self
                .content("files/upload_session/append_v2", &arg)
                .header("Content-Type", "application/octet-stream")
                .body(buffer[..filled].to_vec());
            self.send("upload_session/append_v2", Some(name), request).await?;
            offset += filled as u64;
            info!("Uploaded {offset} of {size} bytes of {name}");
        }

        let arg = json!({
            "cursor": { "session_id": session.session_id, "offset": offset },
            "commit": { "path": path, "mode": "overwrite", "mute": true },
        });
        let request = self
            .content("files/upload_session/finish", &arg)
            .header("Content-Type", "application/octet-stream")
            .body(Vec::new());
        self.send("upload_session/finish", Some(name), request).await?;
        Ok(())
    }

    async fn existing_link(&self, path: &str, name: &str) -> Result<Option<String>, StorageError> {
        let request = self
            .rpc("sharing/list_shared_links")
            .json(&json!({ "path": path, "direct_only": true }));
        let response: SharedLinksResponse = self
            .send("sharing/list_shared_links", Some(name), request)
            .await?
            .json()
            .await?;
        Ok(response.links.into_iter().next().map(|link| link.url))
    }
}

async fn read_chunk(file: &mut tokio::fs::File, buffer: &mut [u8]) -> Result<usize, StorageError> {
    let mut filled = 0;
    while filled < buffer.len() {
        let n = file.read(&mut buffer[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// JSON for the `Dropbox-API-Arg` header, which must be plain ASCII
fn api_arg(arg: &Value) -> String {
    let mut out = String::new();
    for c in arg.to_string().chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{unit:04x}"));
            }
        }
    }
    out
}

fn classify(status: StatusCode, body: &str) -> StorageError {
    match status {
        StatusCode::UNAUTHORIZED => StorageError::Authentication(body.to_string()),
        StatusCode::FORBIDDEN => StorageError::PermissionDenied(body.to_string()),
        StatusCode::CONFLICT if body.contains("not_found") => StorageError::NotFound(body.to_string()),
        _ => StorageError::Api(format!("{status}: {body}")),
    }
}

/// Turns a preview link into a direct-download one
pub fn direct_download(url: &str) -> String {
    if url.contains("dl=0") {
        url.replace("dl=0", "dl=1")
    } else if url.contains("dl=1") {
        url.to_string()
    } else if url.contains('?') {
        format!("{url}&dl=1")
    } else {
        format!("{url}?dl=1")
    }
}

#[async_trait]
impl StorageProvider for DropboxProvider {
    fn name(&self) -> &str {
        "Dropbox"
    }

    async fn upload(&self, local_path: &Path) -> Result<String, StorageError> {
        let name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| StorageError::InvalidName(local_path.display().to_string()))?;
        validate_name(&name)?;
        let path = remote_path(&self.folder, &name);
        let size = tokio::fs::metadata(local_path).await?.len();

        if size > self.session_threshold {
            info!("Uploading {name} ({size} bytes) to Dropbox in chunks");
            self.upload_session(local_path, &path, &name, size).await?;
        } else {
            info!("Uploading {name} ({size} bytes) to Dropbox");
            self.upload_small(local_path, &path, &name).await?;
        }
        info!("Uploaded {name} to {path}");
        Ok(path)
    }

    async fn list(&self) -> Result<Vec<RemoteBackup>, StorageError> {
        let request = self
            .rpc("files/list_folder")
            .json(&json!({ "path": self.folder_path() }));
        let response = match self.send("files/list_folder", None, request).await {
            Ok(response) => response,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut page: ListFolderResponse = response.json().await?;

        let mut backups = Vec::new();
        loop {
            for entry in page.entries.into_iter().filter(|e| e.tag == "file") {
                let mut backup = RemoteBackup::new(
                    &entry.name,
                    &self.folder,
                    entry.size.unwrap_or(0),
                    entry.server_modified,
                );
                if let Some(path) = entry.path_display {
                    backup.path = path;
                }
                backups.push(backup);
            }
            if !page.has_more {
                break;
            }
            let request = self
                .rpc("files/list_folder/continue")
                .json(&json!({ "cursor": page.cursor }));
            page = self
                .send("files/list_folder/continue", None, request)
                .await?
                .json()
                .await?;
        }
        backups.sort_by(|a, b| b.name.cmp(&a.name));
        Ok(backups)
    }

    async fn download(&self, name: &str, dest_dir: &Path) -> Result<PathBuf, StorageError> {
        validate_name(name)?;
        let path = remote_path(&self.folder, name);
        let request = self.content("files/download", &json!({ "path": path }));
        let response = self.send("files/download", Some(name), request).await?;

        tokio::fs::create_dir_all(dest_dir).await?;
        let partial = partial_download(dest_dir, name);
        let written = async {
            let mut file = tokio::fs::File::create(&partial).await?;
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                file.write_all(&chunk?).await?;
            }
            file.flush().await?;
            Ok::<(), StorageError>(())
        }
        .await;
        let destination = finish_download(&partial, dest_dir.join(name), written).await?;
        info!("Downloaded {path} to {}", destination.display());
        Ok(destination)
    }

    async fn share_link(&self, name: &str) -> Result<String, StorageError> {
        validate_name(name)?;
        let path = remote_path(&self.folder, name);

        if let Some(url) = self.existing_link(&path, name).await? {
            debug!("Reusing shared link for {path}");
            return Ok(direct_download(&url));
        }

        let request = self
            .rpc("sharing/create_shared_link_with_settings")
            .json(&json!({ "path": path }));
        let link: SharedLink = self
            .send("sharing/create_shared_link_with_settings", Some(name), request)
            .await?
            .json()
            .await?;
        Ok(direct_download(&link.url))
    }

    async fn delete(&self, name: &str) -> Result<(), StorageError> {
        validate_name(name)?;
        let path = remote_path(&self.folder, name);
        let request = self.rpc("files/delete_v2").json(&json!({ "path": path }));
        self.send("files/delete_v2", Some(name), request).await?;
        info!("Deleted {path} from Dropbox");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn links_become_direct_downloads() {
        assert_eq!(
            direct_download("https://www.dropbox.com/s/abc/a.zip?dl=0"),
            "https://www.dropbox.com/s/abc/a.zip?dl=1"
        );
        assert_eq!(
            direct_download("https://www.dropbox.com/scl/fi/x/a.zip?rlkey=k"),
            "https://www.dropbox.com/scl/fi/x/a.zip?rlkey=k&dl=1"
        );
        assert_eq!(direct_download("https://d/a.zip"), "https://d/a.zip?dl=1");
    }

    #[test]
    fn api_arg_escapes_non_ascii() {
        let arg = api_arg(&json!({ "path": "/backups/año.zip" }));
        assert_eq!(arg, r#"{"path":"/backups/a\u00f1o.zip"}"#);
    }

    #[test]
    fn conflict_not_found_is_typed() {
        let err = classify(StatusCode::CONFLICT, r#"{"error_summary": "path/not_found/.."}"#);
        assert!(err.is_not_found());
        let err = classify(StatusCode::UNAUTHORIZED, "invalid_access_token");
        assert!(matches!(err, StorageError::Authentication(_)));
    }
}
