use crate::error::{EngineError, Result};
use log::debug;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

pub const LOCK_FILE: &str = ".archivist.lock";

/// Serialises backup and restore runs: an in-process mutex plus an exclusive
/// advisory lock on a file, so runs from different processes queue as well.
#[derive(Debug, Clone)]
pub struct OperationLock {
    local: Arc<Mutex<()>>,
    path: PathBuf,
}

/// Held for the duration of one run
#[derive(Debug)]
pub struct OperationGuard {
    file: File,
    _local: OwnedMutexGuard<()>,
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        let _ = fs4::fs_std::FileExt::unlock(&self.file);
    }
}

impl OperationLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            local: Arc::new(Mutex::new(())),
            path: path.into(),
        }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(LOCK_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True while a run in this process holds the lock
    pub fn is_held(&self) -> bool {
        self.local.try_lock().is_err()
    }

    /// Waits until no other run holds the lock
    pub async fn acquire(&self) -> Result<OperationGuard> {
        let local = self.local.clone().lock_owned().await;
        let path = self.path.clone();
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<File> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&path)?;
            fs4::fs_std::FileExt::lock_exclusive(&file)?;
            Ok(file)
        })
        .await?
        .map_err(|e| EngineError::io(format!("locking {}", self.path.display()), e))?;

        debug!("Operation lock acquired: {}", self.path.display());
        Ok(OperationGuard {
            file,
            _local: local,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn second_run_waits_for_the_first() {
        let dir = tempfile::tempdir().unwrap();
        let lock = OperationLock::in_dir(dir.path());

        let guard = lock.acquire().await.unwrap();
        assert!(lock.is_held());

        let contender = lock.clone();
        let waiter = tokio::spawn(async move { contender.acquire().await.map(|_| ()) });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(dir.path().join(LOCK_FILE).exists());
    }
}
