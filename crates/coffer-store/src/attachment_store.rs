//! Root-relative, encrypted-at-rest file storage.
//!
//! Every read, write and delete resolves its relative path through
//! [`paths::resolve`] first. Each file gets its own random key; the key and a
//! plaintext hash come back in a [`LocalWrite`] for the caller to keep.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use coffer_shared::constants::LOCAL_FILE_VERSION;
use coffer_shared::crypto;
use coffer_shared::Disposition;
use tracing::{debug, info};

use crate::backend::{FilesystemBackend, StorageBackend};
use crate::error::{Result, StoreError};
use crate::models::{AttachmentDescriptor, AttachmentStorage, LocalWrite};
use crate::paths;

#[derive(Clone)]
pub struct AttachmentStore {
    root: PathBuf,
    disposition: Disposition,
    backend: Arc<dyn StorageBackend>,
}

impl std::fmt::Debug for AttachmentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachmentStore")
            .field("root", &self.root)
            .field("disposition", &self.disposition)
            .finish()
    }
}

impl AttachmentStore {
    /// Filesystem-backed store for `disposition` under `user_data`.
    pub fn new(user_data: &Path, disposition: Disposition) -> Self {
        Self::with_backend(
            paths::disposition_root(user_data, disposition),
            disposition,
            Arc::new(FilesystemBackend),
        )
    }

    pub fn with_backend(
        root: PathBuf,
        disposition: Disposition,
        backend: Arc<dyn StorageBackend>,
    ) -> Self {
        Self {
            root,
            disposition,
            backend,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn disposition(&self) -> Disposition {
        self.disposition
    }

    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        paths::resolve(&self.root, relative)
    }

    /// Encrypt `data` under a fresh random name.
    pub async fn write(&self, data: &[u8]) -> Result<LocalWrite> {
        self.write_at(&paths::new_relative_path(), data).await
    }

    /// Encrypt `data` at a caller-chosen relative path.
    pub async fn write_at(&self, relative: &str, data: &[u8]) -> Result<LocalWrite> {
        let absolute = self.resolve(relative)?;
        let key = crypto::generate_symmetric_key();
        let ciphertext = crypto::encrypt(&key, data)?;

        self.backend.write(&absolute, &ciphertext).await?;

        debug!(
            disposition = %self.disposition,
            path = %relative,
            size = data.len(),
            "stored encrypted file"
        );

        Ok(LocalWrite {
            path: relative.to_string(),
            local_key: hex::encode(key),
            size: data.len() as u64,
            plaintext_hash: crypto::plaintext_hash(data),
            version: LOCAL_FILE_VERSION,
        })
    }

    /// Read and decrypt an encrypted-at-rest file.
    pub async fn read(&self, relative: &str, local_key: &str) -> Result<Vec<u8>> {
        let key = crypto::key_from_hex(local_key)?;
        let ciphertext = self.read_raw(relative).await?;
        crypto::decrypt(&key, &ciphertext).map_err(|_| StoreError::DecryptionFailure {
            path: relative.to_string(),
        })
    }

    /// Read a legacy plaintext file as-is.
    pub async fn read_plaintext(&self, relative: &str) -> Result<Vec<u8>> {
        self.read_raw(relative).await
    }

    async fn read_raw(&self, relative: &str) -> Result<Vec<u8>> {
        let absolute = self.resolve(relative)?;
        self.backend.read(&absolute).await.map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                StoreError::AttachmentMissingOnDisk(relative.to_string())
            } else {
                StoreError::Io(e)
            }
        })
    }

    /// Remove a file. Already missing is fine.
    pub async fn delete(&self, relative: &str) -> Result<()> {
        let absolute = self.resolve(relative)?;
        match self.backend.remove(&absolute).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %relative, "delete: file already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn exists(&self, relative: &str) -> Result<bool> {
        let absolute = self.resolve(relative)?;
        Ok(self.backend.exists(&absolute).await?)
    }

    /// Relative paths of every file currently under the root.
    pub async fn list_relative_paths(&self) -> Result<Vec<String>> {
        let files = self.backend.list(&self.root).await?;
        Ok(files
            .iter()
            .filter_map(|f| paths::to_relative(&self.root, f))
            .collect())
    }

    /// Plaintext bytes for a descriptor, whatever form its storage is in.
    pub async fn read_attachment(&self, descriptor: &AttachmentDescriptor) -> Result<Vec<u8>> {
        match &descriptor.storage {
            AttachmentStorage::Inline { data } => Ok(data.clone()),
            AttachmentStorage::LocalV1 { path } => self.read_plaintext(path).await,
            AttachmentStorage::LocalV2 {
                path, local_key, ..
            } => self.read(path, local_key).await,
            AttachmentStorage::Remote => Err(StoreError::NoLocalData),
        }
    }

    /// Copy a file from this store into `dest` under a new name and key.
    pub async fn copy_to(
        &self,
        dest: &AttachmentStore,
        relative: &str,
        local_key: Option<&str>,
    ) -> Result<LocalWrite> {
        let plaintext = match local_key {
            Some(key) => self.read(relative, key).await?,
            None => self.read_plaintext(relative).await?,
        };
        let written = dest.write(&plaintext).await?;

        info!(
            from = %self.disposition,
            to = %dest.disposition,
            size = written.size,
            "copied file between stores"
        );
        Ok(written)
    }
}
