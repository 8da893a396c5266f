//! In-memory fakes shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use coffer_shared::crypto::{self, SymmetricKey};
use coffer_shared::manifest::{StickerEntry, StickerPackManifest};
use coffer_shared::{mime, PackId};
use coffer_store::legacy::LegacyAttachmentEncryptor;
use coffer_store::media::MediaProcessor;
use coffer_store::orphans::{InMemorySweepFlag, OrphanConfig, OrphanSweep, OrphanTracker};
use coffer_store::repository::MessageRepository;
use coffer_store::{MessageRecord, MigrationContext, StoreError};
use tempfile::TempDir;

use crate::error::{NetError, Result};
use crate::remote::RemoteSource;

struct NoopSweep;

#[async_trait]
impl OrphanSweep for NoopSweep {
    async fn cleanup_orphaned_attachments(&self) -> coffer_store::Result<usize> {
        Ok(0)
    }
}

/// Reports every image as 512x512 and sniffs `RIFF` as WebP.
pub struct FakeMedia;

#[async_trait]
impl MediaProcessor for FakeMedia {
    async fn image_dimensions(&self, bytes: &[u8]) -> coffer_store::Result<(u32, u32)> {
        if bytes.is_empty() {
            return Err(StoreError::Unsupported("empty image".into()));
        }
        Ok((512, 512))
    }

    async fn make_image_thumbnail(
        &self,
        _bytes: &[u8],
        _max_side: u32,
    ) -> coffer_store::Result<Vec<u8>> {
        Err(StoreError::Unsupported("thumbnails".into()))
    }

    async fn make_video_screenshot(&self, _bytes: &[u8]) -> coffer_store::Result<Vec<u8>> {
        Err(StoreError::Unsupported("video screenshots".into()))
    }

    fn sniff_content_type(&self, bytes: &[u8]) -> Option<&'static str> {
        bytes.starts_with(b"RIFF").then_some(mime::IMAGE_WEBP)
    }
}

pub fn context(dir: &TempDir) -> MigrationContext {
    let tracker = OrphanTracker::new(
        OrphanConfig::default(),
        Arc::new(InMemorySweepFlag::default()),
        Arc::new(NoopSweep),
    );
    MigrationContext::new(
        dir.path(),
        Arc::new(LegacyAttachmentEncryptor::new(tracker)),
        Arc::new(FakeMedia),
    )
}

/// CDN double. Blobs are served as stored; `fail_next` makes the next N
/// requests answer 503.
#[derive(Default)]
pub struct FakeRemote {
    offline: AtomicBool,
    fail_next: AtomicU32,
    calls: AtomicU32,
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, key: &str, bytes: Vec<u8>) {
        self.blobs.lock().unwrap().insert(key.to_string(), bytes);
    }

    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
    }

    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Publish an encrypted manifest and every sticker in it.
    pub fn publish_pack(&self, id: &PackId, key: &SymmetricKey, manifest: &StickerPackManifest) {
        let encoded = manifest.encode().unwrap();
        self.insert(
            &manifest_key(id),
            crypto::encrypt_sticker(key, &encoded).unwrap(),
        );
        let ids = manifest
            .stickers
            .iter()
            .chain(manifest.cover.iter())
            .filter_map(|s| s.id);
        for sticker_id in ids {
            let body = format!("RIFF sticker {sticker_id}");
            self.insert(
                &sticker_key(id, sticker_id),
                crypto::encrypt_sticker(key, body.as_bytes()).unwrap(),
            );
        }
    }

    pub fn fetch(&self, key: &str) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(NetError::Offline);
        }
        let pending = self.fail_next.load(Ordering::SeqCst);
        if pending > 0 {
            self.fail_next.store(pending - 1, Ordering::SeqCst);
            return Err(NetError::Status {
                status: 503,
                url: key.to_string(),
            });
        }
        self.blobs
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| NetError::Status {
                status: 404,
                url: key.to_string(),
            })
    }
}

pub fn manifest_key(id: &PackId) -> String {
    format!("{id}/manifest")
}

pub fn sticker_key(id: &PackId, sticker_id: u32) -> String {
    format!("{id}/{sticker_id}")
}

#[async_trait]
impl RemoteSource for FakeRemote {
    fn is_online(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }

    async fn get_attachment(&self, cdn_key: &str) -> Result<Vec<u8>> {
        self.fetch(cdn_key)
    }

    async fn get_sticker_pack_manifest(&self, pack_id: &PackId) -> Result<Vec<u8>> {
        self.fetch(&manifest_key(pack_id))
    }

    async fn get_sticker(&self, pack_id: &PackId, sticker_id: u32) -> Result<Vec<u8>> {
        self.fetch(&sticker_key(pack_id, sticker_id))
    }
}

pub fn manifest(ids: &[u32], cover: Option<u32>) -> StickerPackManifest {
    StickerPackManifest {
        title: Some("Animals".into()),
        author: Some("Someone".into()),
        cover: cover.map(|id| StickerEntry {
            id: Some(id),
            emoji: None,
        }),
        stickers: ids
            .iter()
            .map(|id| StickerEntry {
                id: Some(*id),
                emoji: Some("🐱".into()),
            })
            .collect(),
    }
}

#[derive(Default)]
pub struct FakeMessages {
    pub messages: Mutex<HashMap<String, MessageRecord>>,
    pub saved: Mutex<HashSet<String>>,
}

#[async_trait]
impl MessageRepository for FakeMessages {
    async fn get_message(&self, id: &str) -> coffer_store::Result<Option<MessageRecord>> {
        Ok(self.messages.lock().unwrap().get(id).cloned())
    }

    async fn save_message(&self, message: &MessageRecord) -> coffer_store::Result<()> {
        self.saved.lock().unwrap().insert(message.id.clone());
        self.messages
            .lock()
            .unwrap()
            .insert(message.id.clone(), message.clone());
        Ok(())
    }
}
