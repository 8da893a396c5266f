//! Raw byte I/O under a storage root.
//!
//! [`AttachmentStore`](crate::AttachmentStore) resolves and encrypts; the
//! backend only moves bytes. Hosts swap it out to route reads and writes
//! elsewhere, tests wrap it to count calls.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Write data to an absolute, already-resolved path, creating parents.
    async fn write(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    /// Read data from an absolute, already-resolved path.
    async fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Remove the file. `NotFound` is reported, not swallowed.
    async fn remove(&self, path: &Path) -> io::Result<()>;

    async fn exists(&self, path: &Path) -> io::Result<bool>;

    /// Every regular file below `root`, recursively.
    async fn list(&self, root: &Path) -> io::Result<Vec<PathBuf>>;
}

/// [`StorageBackend`] on the local filesystem via `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilesystemBackend;

#[async_trait]
impl StorageBackend for FilesystemBackend {
    async fn write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                warn!(parent = %parent.display(), error = %e, "create_dir_all failed");
                e
            })?;
        }
        fs::write(path, data).await?;
        debug!(path = %path.display(), size = data.len(), "wrote file");
        Ok(())
    }

    async fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path).await
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path).await?;
        debug!(path = %path.display(), "removed file");
        Ok(())
    }

    async fn exists(&self, path: &Path) -> io::Result<bool> {
        fs::try_exists(path).await
    }

    async fn list(&self, root: &Path) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                } else if file_type.is_file() {
                    files.push(entry.path());
                }
            }
        }

        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ab").join("abcd");

        FilesystemBackend.write(&path, b"bytes").await.unwrap();
        assert_eq!(FilesystemBackend.read(&path).await.unwrap(), b"bytes");
        assert!(FilesystemBackend.exists(&path).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = FilesystemBackend
            .remove(&dir.path().join("missing"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_list_recurses() {
        let dir = TempDir::new().unwrap();
        FilesystemBackend
            .write(&dir.path().join("ab/ab1"), b"1")
            .await
            .unwrap();
        FilesystemBackend
            .write(&dir.path().join("cd/cd1"), b"2")
            .await
            .unwrap();

        let mut files = FilesystemBackend.list(dir.path()).await.unwrap();
        files.sort();
        assert_eq!(files.len(), 2);

        let missing = FilesystemBackend
            .list(&dir.path().join("nope"))
            .await
            .unwrap();
        assert!(missing.is_empty());
    }
}
