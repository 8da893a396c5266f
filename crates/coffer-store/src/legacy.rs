//! Lazy upgrade of plaintext-on-disk attachments to encrypted-at-rest files.
//!
//! Upgrades are single-flight per `(disposition, path)`: concurrent callers
//! share one read and one encrypted write, and later callers reuse the cached
//! result. Failures never surface; the caller gets its descriptor back as it
//! was and the next attempt retries.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::attachment_store::AttachmentStore;
use crate::error::StoreError;
use crate::flight::SingleFlight;
use crate::models::{AttachmentDescriptor, AttachmentStorage, LocalWrite};
use crate::orphans::OrphanTracker;

/// Upgrade results kept for reuse.
pub const UPGRADE_CACHE_CAPACITY: usize = 1000;

type UpgradeResult = Result<LocalWrite, Arc<StoreError>>;

pub struct LegacyAttachmentEncryptor {
    flights: SingleFlight<String, UpgradeResult>,
    orphans: Arc<OrphanTracker>,
}

impl LegacyAttachmentEncryptor {
    pub fn new(orphans: Arc<OrphanTracker>) -> Self {
        Self::with_capacity(orphans, UPGRADE_CACHE_CAPACITY)
    }

    pub fn with_capacity(orphans: Arc<OrphanTracker>, capacity: usize) -> Self {
        Self {
            flights: SingleFlight::new(capacity),
            orphans,
        }
    }

    pub fn orphans(&self) -> &Arc<OrphanTracker> {
        &self.orphans
    }

    /// Encrypt a `LocalV1` file into `store` and return the descriptor with
    /// the new location merged in. Anything else comes back unchanged.
    pub async fn upgrade(
        &self,
        descriptor: AttachmentDescriptor,
        store: &AttachmentStore,
    ) -> AttachmentDescriptor {
        let path = match &descriptor.storage {
            AttachmentStorage::LocalV1 { path } => path.clone(),
            _ => return descriptor,
        };

        let cache_key = format!("{}:{}", store.disposition(), path);
        let (flight, _) = self.flights.get_or_start(cache_key.clone(), || {
            let store = store.clone();
            let path = path.clone();
            let orphans = Arc::clone(&self.orphans);
            // Counted by whichever caller drives the flight to completion.
            async move {
                let written = encrypt_legacy_file(&store, &path).await.map_err(Arc::new)?;
                orphans.record().await;
                Ok::<_, Arc<StoreError>>(written)
            }
        });

        match flight.clone().await {
            Ok(written) => {
                let mut upgraded = descriptor;
                upgraded.apply_local_write(&written);
                upgraded
            }
            Err(e) => {
                warn!(
                    key = %cache_key,
                    error = %e,
                    "legacy attachment upgrade failed, keeping plaintext form"
                );
                self.flights.forget(&cache_key, &flight);
                descriptor
            }
        }
    }
}

async fn encrypt_legacy_file(
    store: &AttachmentStore,
    path: &str,
) -> Result<LocalWrite, StoreError> {
    let plaintext = store.read_plaintext(path).await?;
    let written = store.write(&plaintext).await?;
    debug!(
        disposition = %store.disposition(),
        old = %path,
        new = %written.path,
        "encrypted legacy file"
    );
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FilesystemBackend, StorageBackend};
    use crate::orphans::{InMemorySweepFlag, OrphanConfig, OrphanSweep};
    use crate::paths;
    use async_trait::async_trait;
    use coffer_shared::Disposition;
    use std::io;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Filesystem backend that counts calls and slows reads down so
    /// concurrent upgrades overlap.
    #[derive(Default)]
    struct CountingBackend {
        reads: AtomicUsize,
        writes: AtomicUsize,
    }

    #[async_trait]
    impl StorageBackend for CountingBackend {
        async fn write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            FilesystemBackend.write(path, data).await
        }

        async fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            FilesystemBackend.read(path).await
        }

        async fn remove(&self, path: &Path) -> io::Result<()> {
            FilesystemBackend.remove(path).await
        }

        async fn exists(&self, path: &Path) -> io::Result<bool> {
            FilesystemBackend.exists(path).await
        }

        async fn list(&self, root: &Path) -> io::Result<Vec<PathBuf>> {
            FilesystemBackend.list(root).await
        }
    }

    struct NoopSweep;

    #[async_trait]
    impl OrphanSweep for NoopSweep {
        async fn cleanup_orphaned_attachments(&self) -> crate::Result<usize> {
            Ok(0)
        }
    }

    fn encryptor() -> LegacyAttachmentEncryptor {
        let tracker = OrphanTracker::new(
            OrphanConfig::default(),
            Arc::new(InMemorySweepFlag::default()),
            Arc::new(NoopSweep),
        );
        LegacyAttachmentEncryptor::new(tracker)
    }

    async fn legacy_file(dir: &TempDir, bytes: &[u8]) -> String {
        let rel = paths::new_relative_path();
        let abs = paths::resolve(&dir.path().join("attachments.noindex"), &rel).unwrap();
        FilesystemBackend.write(&abs, bytes).await.unwrap();
        rel
    }

    fn v1(path: &str) -> AttachmentDescriptor {
        AttachmentDescriptor {
            content_type: "image/jpeg".into(),
            file_name: Some("cat.jpg".into()),
            storage: AttachmentStorage::LocalV1 {
                path: path.to_string(),
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_upgrade_encrypts_and_merges() {
        let dir = TempDir::new().unwrap();
        let store = AttachmentStore::new(dir.path(), Disposition::Attachment);
        let path = legacy_file(&dir, b"legacy bytes").await;
        let encryptor = encryptor();

        let upgraded = encryptor.upgrade(v1(&path), &store).await;

        assert_eq!(upgraded.version(), Some(2));
        assert_eq!(upgraded.file_name.as_deref(), Some("cat.jpg"));
        assert_eq!(upgraded.size, 12);
        assert_eq!(store.read_attachment(&upgraded).await.unwrap(), b"legacy bytes");
        assert_eq!(encryptor.orphans().orphan_count(), 1);
    }

    #[tokio::test]
    async fn test_no_path_or_already_v2_is_unchanged() {
        let dir = TempDir::new().unwrap();
        let store = AttachmentStore::new(dir.path(), Disposition::Attachment);
        let encryptor = encryptor();

        let remote = AttachmentDescriptor::default();
        assert_eq!(encryptor.upgrade(remote.clone(), &store).await, remote);

        let written = store.write(b"new").await.unwrap();
        let v2 = AttachmentDescriptor::from_local_write("image/png", &written);
        assert_eq!(encryptor.upgrade(v2.clone(), &store).await, v2);
        assert_eq!(encryptor.orphans().orphan_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_upgrades_are_single_flight() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(CountingBackend::default());
        let store = AttachmentStore::with_backend(
            dir.path().join("attachments.noindex"),
            Disposition::Attachment,
            backend.clone(),
        );
        let path = legacy_file(&dir, b"shared").await;
        let encryptor = Arc::new(encryptor());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let encryptor = encryptor.clone();
            let store = store.clone();
            let descriptor = v1(&path);
            handles.push(tokio::spawn(async move {
                encryptor.upgrade(descriptor, &store).await
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        assert_eq!(backend.reads.load(Ordering::SeqCst), 1);
        assert_eq!(backend.writes.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r == &results[0]));
        assert_eq!(results[0].version(), Some(2));
        assert_eq!(encryptor.orphans().orphan_count(), 1);
    }

    #[tokio::test]
    async fn test_orphan_counted_when_first_caller_goes_away() {
        let dir = TempDir::new().unwrap();
        let store = AttachmentStore::with_backend(
            dir.path().join("attachments.noindex"),
            Disposition::Attachment,
            Arc::new(CountingBackend::default()),
        );
        let path = legacy_file(&dir, b"abandoned").await;
        let encryptor = Arc::new(encryptor());

        let spawn_upgrade = |encryptor: Arc<LegacyAttachmentEncryptor>| {
            let store = store.clone();
            let descriptor = v1(&path);
            tokio::spawn(async move { encryptor.upgrade(descriptor, &store).await })
        };

        let first = spawn_upgrade(encryptor.clone());
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = spawn_upgrade(encryptor.clone());
        tokio::time::sleep(Duration::from_millis(5)).await;
        first.abort();

        let upgraded = second.await.unwrap();
        assert_eq!(upgraded.version(), Some(2));
        assert_eq!(encryptor.orphans().orphan_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_returns_original_and_retries_later() {
        let dir = TempDir::new().unwrap();
        let store = AttachmentStore::new(dir.path(), Disposition::Attachment);
        let encryptor = encryptor();
        let path = paths::new_relative_path();

        let missing = v1(&path);
        assert_eq!(encryptor.upgrade(missing.clone(), &store).await, missing);

        let abs = store.resolve(&path).unwrap();
        FilesystemBackend.write(&abs, b"arrived").await.unwrap();

        let upgraded = encryptor.upgrade(missing, &store).await;
        assert_eq!(upgraded.version(), Some(2));
    }

    #[tokio::test]
    async fn test_cache_is_keyed_by_disposition() {
        let dir = TempDir::new().unwrap();
        let attachments = AttachmentStore::new(dir.path(), Disposition::Attachment);
        let drafts = AttachmentStore::new(dir.path(), Disposition::Draft);
        let path = legacy_file(&dir, b"attachment").await;
        let encryptor = encryptor();

        let upgraded = encryptor.upgrade(v1(&path), &attachments).await;
        assert_eq!(upgraded.version(), Some(2));

        // same relative path under another root is a different file
        let draft = encryptor.upgrade(v1(&path), &drafts).await;
        assert_eq!(draft.version(), None);
    }
}
