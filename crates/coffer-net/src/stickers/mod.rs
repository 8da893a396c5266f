//! Sticker pack lifecycle.
//!
//! ```text
//! known ──► pending ──► downloaded ──► installed
//!              │            ▲              │
//!              └──► error   └── uninstall ─┘
//!
//! ephemeral ──► error        (memory only)
//! ```
//!
//! Whole packs are fetched one at a time through an [`AcquisitionQueue`];
//! stickers inside a pack download three at a time, cover first. The
//! in-memory map mirrors the database and additionally holds ephemeral
//! preview packs, which are never persisted. Packs
//! are deleted when their last message reference goes away, except for the
//! blessed packs shipped with the app.

mod blessed;
mod events;

pub use blessed::{default_blessed_packs, BlessedPack};
pub use events::{StickerEvent, EVENT_CHANNEL_CAPACITY};

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use coffer_shared::crypto;
use coffer_shared::manifest::{ResolvedManifest, StickerEntry, StickerPackManifest};
use coffer_shared::{mime, PackId};
use coffer_store::flight::Flight;
use coffer_store::repository::{MessageRepository, StickerPackRepository};
use coffer_store::schema::process_new_sticker;
use coffer_store::{
    AttachmentDescriptor, AttachmentStorage, AttachmentStore, MigrationContext, Sticker,
    StickerPack, StickerPackReference, StickerPackStatus, StoreError,
};
use futures::future::join_all;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::error::{NetError, Result};
use crate::queue::{AcquisitionQueue, JobResult, Priority, QueueConfig};
use crate::remote::RemoteSource;
use crate::retry::RetryPolicy;

/// Messages loaded and saved together when resolving references.
pub const RESOLVE_REFERENCES_BATCH_SIZE: usize = 1000;

/// Stickers fetched together within one pack.
pub const STICKER_DOWNLOAD_CONCURRENCY: usize = 3;

const FILE_DELETE_CONCURRENCY: usize = 3;
const LEGACY_STICKER_CONCURRENCY: usize = 32;

/// Message ids are UUIDs, so this never matches a real reference.
const UNUSED_MESSAGE_ID: &str = "NOT-USED";

#[derive(Debug, Clone)]
pub struct StickerConfig {
    pub blessed: Vec<BlessedPack>,
    pub retry: RetryPolicy,
    pub queue: QueueConfig,
    pub sticker_concurrency: usize,
    pub resolve_batch_size: usize,
}

impl Default for StickerConfig {
    fn default() -> Self {
        Self {
            blessed: default_blessed_packs(),
            retry: RetryPolicy::STICKER_PACK,
            queue: QueueConfig::sticker_packs(),
            sticker_concurrency: STICKER_DOWNLOAD_CONCURRENCY,
            resolve_batch_size: RESOLVE_REFERENCES_BATCH_SIZE,
        }
    }
}

/// Who asked for a download. User actions jump the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadSource {
    Ui,
    Background,
}

impl DownloadSource {
    fn priority(self) -> Priority {
        match self {
            DownloadSource::Ui => Priority::High,
            DownloadSource::Background => Priority::Normal,
        }
    }
}

pub type PackOutcome = std::result::Result<(), Arc<NetError>>;

#[derive(Debug, Clone)]
struct QueuedPack {
    id: PackId,
    key: String,
    final_status: Option<StickerPackStatus>,
}

/// Outstanding requests for one pack. Remembers the requested final status
/// so a later request without one keeps it.
#[derive(Debug, Default)]
struct PendingRequest {
    depth: u32,
    final_status: Option<StickerPackStatus>,
}

#[derive(Default)]
struct State {
    packs: HashMap<PackId, StickerPack>,
    to_download: Vec<QueuedPack>,
    requests: HashMap<PackId, PendingRequest>,
}

struct Inner {
    config: StickerConfig,
    repo: Arc<dyn StickerPackRepository>,
    messages: Arc<dyn MessageRepository>,
    remote: Arc<dyn RemoteSource>,
    ctx: MigrationContext,
    queue: AcquisitionQueue<PackOutcome>,
    state: Mutex<State>,
    events: broadcast::Sender<StickerEvent>,
}

#[derive(Clone)]
pub struct StickerPackLifecycle {
    inner: Arc<Inner>,
}

impl StickerPackLifecycle {
    pub fn new(
        config: StickerConfig,
        repo: Arc<dyn StickerPackRepository>,
        messages: Arc<dyn MessageRepository>,
        remote: Arc<dyn RemoteSource>,
        ctx: MigrationContext,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let queue = AcquisitionQueue::new(config.queue.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                repo,
                messages,
                remote,
                ctx,
                queue,
                state: Mutex::new(State::default()),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StickerEvent> {
        self.inner.events.subscribe()
    }

    pub fn get_pack(&self, id: &PackId) -> Option<StickerPack> {
        self.state().packs.get(id).cloned()
    }

    pub fn pack_status(&self, id: &PackId) -> Option<StickerPackStatus> {
        self.state().packs.get(id).map(|p| p.status)
    }

    pub fn get_sticker(&self, id: &PackId, sticker_id: u32) -> Option<Sticker> {
        self.state()
            .packs
            .get(id)
            .and_then(|p| p.stickers.get(&sticker_id))
            .cloned()
    }

    pub fn installed_packs(&self) -> Vec<StickerPack> {
        self.state()
            .packs
            .values()
            .filter(|p| p.status == StickerPackStatus::Installed)
            .cloned()
            .collect()
    }

    pub fn is_blessed(&self, id: &PackId) -> bool {
        self.inner.config.blessed.iter().any(|b| &b.id == id)
    }

    /// Packs [`load`](Self::load) decided to fetch that have not been handed
    /// to [`download_queued_packs`](Self::download_queued_packs) yet.
    pub fn packs_to_download(&self) -> Vec<PackId> {
        self.state()
            .to_download
            .iter()
            .map(|q| q.id.clone())
            .collect()
    }

    /// Hydrate from the database and work out what needs fetching: blessed
    /// packs that are not on disk yet, and failed packs still under the
    /// retry ceiling. Known packs wait for a user action. Ephemeral rows
    /// should never have been persisted and are deleted.
    pub async fn load(&self) -> Result<()> {
        let packs = self.inner.repo.list_sticker_packs().await?;

        let mut to_download: Vec<QueuedPack> = Vec::new();
        for blessed in &self.inner.config.blessed {
            let on_disk = packs.iter().any(|p| {
                p.id == blessed.id
                    && matches!(
                        p.status,
                        StickerPackStatus::Downloaded | StickerPackStatus::Installed
                    )
            });
            if !on_disk {
                to_download.push(QueuedPack {
                    id: blessed.id.clone(),
                    key: blessed.key.clone(),
                    final_status: Some(blessed.status),
                });
            }
        }

        let mut stray = Vec::new();
        for pack in &packs {
            if to_download.iter().any(|q| q.id == pack.id) {
                continue;
            }
            match pack.status {
                StickerPackStatus::Ephemeral => stray.push(pack.id.clone()),
                StickerPackStatus::Known => {}
                _ if pack.needs_download()
                    && !self.inner.config.retry.is_exhausted(pack.download_attempts) =>
                {
                    let final_status = (pack.attempted_status
                        == Some(StickerPackStatus::Installed))
                    .then_some(StickerPackStatus::Installed);
                    to_download.push(QueuedPack {
                        id: pack.id.clone(),
                        key: pack.key.clone(),
                        final_status,
                    });
                }
                _ => {}
            }
        }

        info!(
            packs = packs.len(),
            queued = to_download.len(),
            stray = stray.len(),
            "sticker packs loaded"
        );

        {
            let mut state = self.state();
            state.packs = packs
                .into_iter()
                .filter(|p| !stray.contains(&p.id))
                .map(|p| (p.id.clone(), p))
                .collect();
            state.to_download = to_download;
        }

        for id in stray {
            if let Err(e) = self.delete_pack(&id).await {
                warn!(pack = %id.redacted(), error = %e, "failed to delete stray ephemeral pack");
            }
        }
        Ok(())
    }

    /// Start every download [`load`](Self::load) queued. Returns how many
    /// were started; they finish in the background.
    pub fn download_queued_packs(&self) -> usize {
        let queued = std::mem::take(&mut self.state().to_download);
        info!(count = queued.len(), "downloading queued sticker packs");
        for pack in &queued {
            // The job runs on its own task; the handle is not needed.
            drop(self.request_download(
                &pack.id,
                &pack.key,
                pack.final_status,
                DownloadSource::Background,
            ));
        }
        queued.len()
    }

    /// Record a pack a message points at, without fetching it.
    pub async fn save_pack_metadata(
        &self,
        id: &PackId,
        key: &str,
        message_id: Option<&str>,
        sticker_id: u32,
        is_unresolved: bool,
    ) -> Result<()> {
        if self.get_pack(id).is_none() {
            let pack = StickerPack::placeholder(id.clone(), key.to_string(), StickerPackStatus::Known);
            self.put_pack(pack, true).await?;
        }

        if let Some(message_id) = message_id {
            self.inner
                .repo
                .add_sticker_pack_reference(&StickerPackReference {
                    message_id: message_id.to_string(),
                    pack_id: id.clone(),
                    sticker_id,
                    is_unresolved,
                })
                .await?;
        }
        Ok(())
    }

    /// Queue a download and return its handle without waiting.
    ///
    /// Requests for a pack that is already queued or running join that job.
    /// `final_status` defaults to whatever an earlier request for the same
    /// pack asked for, then to `downloaded`.
    pub fn request_download(
        &self,
        id: &PackId,
        key: &str,
        final_status: Option<StickerPackStatus>,
        source: DownloadSource,
    ) -> Flight<JobResult<PackOutcome>> {
        let final_status = {
            let mut state = self.state();
            let request = state.requests.entry(id.clone()).or_default();
            request.depth += 1;
            if final_status.is_some() {
                request.final_status = final_status;
            }
            debug!(pack = %id.redacted(), depth = request.depth, "sticker pack download requested");
            request.final_status
        };

        let job_key = id.to_string();
        let flight = self.inner.queue.enqueue(&job_key, source.priority(), || {
            let this = self.clone();
            let id = id.clone();
            let key = key.to_string();
            async move {
                let final_status = final_status.unwrap_or(StickerPackStatus::Downloaded);
                let result = this.do_download(&id, &key, final_status).await;
                if let Err(e) = &result {
                    error!(pack = %id.redacted(), error = %e, "sticker pack download failed");
                }
                this.state().requests.remove(&id);
                result.map_err(Arc::new)
            }
        });

        // Pack jobs are not cached: once finished, the next request re-checks.
        let this = self.clone();
        let finished = flight.clone();
        tokio::spawn(async move {
            let _ = finished.clone().await;
            this.inner.queue.forget(&job_key, &finished);
        });

        flight
    }

    /// Download a pack and wait for it.
    pub async fn download_pack(
        &self,
        id: &PackId,
        key: &str,
        final_status: Option<StickerPackStatus>,
        source: DownloadSource,
    ) -> Result<()> {
        let flight = self.request_download(id, key, final_status, source);
        flight.await?.map_err(NetError::Job)
    }

    async fn do_download(
        &self,
        id: &PackId,
        key: &str,
        final_status: StickerPackStatus,
    ) -> Result<()> {
        if !matches!(
            final_status,
            StickerPackStatus::Downloaded | StickerPackStatus::Installed
        ) {
            return Err(NetError::InvalidFinalStatus(final_status));
        }

        let existing = self.get_pack(id);
        if existing.as_ref().is_some_and(|p| !p.needs_download()) {
            debug!(pack = %id.redacted(), "sticker pack already downloaded");
            return Ok(());
        }

        let previous = existing.as_ref().map_or(0, |p| p.download_attempts);
        let attempt = self
            .inner
            .config
            .retry
            .next_attempt(previous, self.inner.remote.is_online());
        if !attempt.allowed {
            warn!(
                pack = %id.redacted(),
                attempts = attempt.attempts,
                "refusing another download for sticker pack"
            );
            if let Some(mut pack) = existing {
                pack.status = StickerPackStatus::Error;
                pack.download_attempts = attempt.attempts;
                self.put_pack(pack, true).await?;
            }
            return Err(NetError::RetryCeilingExceeded {
                attempts: attempt.attempts,
            });
        }

        let mut placeholder =
            StickerPack::placeholder(id.clone(), key.to_string(), StickerPackStatus::Pending);
        placeholder.attempted_status = Some(final_status);
        placeholder.download_attempts = attempt.attempts;
        self.put_pack(placeholder.clone(), true).await?;

        let manifest = match self.fetch_manifest(id, key).await {
            Ok(manifest) => manifest,
            Err(e) => {
                error!(pack = %id.redacted(), error = %e, "failed to fetch sticker pack manifest");
                let mut failed = placeholder;
                failed.status = StickerPackStatus::Error;
                self.put_pack(failed, true).await?;
                return Err(e);
            }
        };

        let mut pack = placeholder;
        // An install that landed during the manifest fetch survives this write.
        if let Some(current) = self.inner.repo.get_sticker_pack(id).await? {
            if current.status == StickerPackStatus::Installed {
                pack.status = StickerPackStatus::Installed;
                pack.installed_at = current.installed_at;
            }
        }
        pack.cover_sticker_id = Some(manifest.cover_sticker_id);
        pack.sticker_count = manifest.sticker_count;
        pack.title = manifest.title.clone();
        pack.author = manifest.author.clone();
        pack.created_at = Utc::now();
        self.put_pack(pack, true).await?;

        if let Err(e) = self.download_stickers(id, key, &manifest, false).await {
            self.update_status(id, StickerPackStatus::Error, Some(final_status))
                .await?;
            return Err(e);
        }

        // The user may have installed the pack while it downloaded.
        let current = self.inner.repo.get_sticker_pack(id).await?.map(|p| p.status);
        if current == Some(StickerPackStatus::Installed) {
            self.set_local_status(id, StickerPackStatus::Installed, None);
        } else {
            self.update_status(id, final_status, None).await?;
        }
        info!(pack = %id.redacted(), status = %final_status, "sticker pack downloaded");

        if let Err(e) = self.resolve_references(id).await {
            error!(pack = %id.redacted(), error = %e, "failed to resolve sticker references");
        }
        Ok(())
    }

    async fn fetch_manifest(&self, id: &PackId, key: &str) -> Result<ResolvedManifest> {
        let ciphertext = self.inner.remote.get_sticker_pack_manifest(id).await?;
        let pack_key = crypto::key_from_hex(key)?;
        let plaintext = crypto::decrypt_sticker(&pack_key, &ciphertext)?;
        Ok(StickerPackManifest::decode(&plaintext)?.resolve()?)
    }

    /// Cover first, then the rest. Fails only when every non-cover sticker
    /// failed.
    async fn download_stickers(
        &self,
        id: &PackId,
        key: &str,
        manifest: &ResolvedManifest,
        ephemeral: bool,
    ) -> Result<()> {
        let cover_only =
            (!manifest.cover_included_in_list).then_some(manifest.cover_sticker_id);

        self.download_sticker(id, key, &manifest.cover, cover_only, ephemeral)
            .await?;

        let mut succeeded = 0;
        for chunk in manifest
            .non_cover
            .chunks(self.inner.config.sticker_concurrency.max(1))
        {
            let results = join_all(
                chunk
                    .iter()
                    .map(|entry| self.download_sticker(id, key, entry, cover_only, ephemeral)),
            )
            .await;
            for result in results {
                if result? {
                    succeeded += 1;
                }
            }
        }
        if succeeded == 0 && !manifest.non_cover.is_empty() {
            return Err(NetError::AllStickersFailed);
        }
        Ok(())
    }

    /// `Ok(false)` when this sticker failed; `Err` aborts the whole pack.
    async fn download_sticker(
        &self,
        id: &PackId,
        key: &str,
        entry: &StickerEntry,
        cover_only: Option<u32>,
        ephemeral: bool,
    ) -> Result<bool> {
        let Some(sticker_id) = entry.id else {
            return Ok(false);
        };

        let sticker = match self
            .fetch_sticker(id, key, entry, sticker_id, cover_only, ephemeral)
            .await
        {
            Ok(sticker) => sticker,
            Err(e) => {
                warn!(pack = %id.redacted(), sticker_id, error = %e, "sticker download failed");
                return Ok(false);
            }
        };

        {
            let mut state = self.state();
            let Some(pack) = state.packs.get_mut(id) else {
                return Err(NetError::PackStatusChanged);
            };
            if ephemeral && pack.status != StickerPackStatus::Ephemeral {
                return Err(NetError::PackStatusChanged);
            }
            pack.stickers.insert(sticker_id, sticker.clone());
        }
        self.emit(StickerEvent::StickerAdded { sticker });
        Ok(true)
    }

    async fn fetch_sticker(
        &self,
        id: &PackId,
        key: &str,
        entry: &StickerEntry,
        sticker_id: u32,
        cover_only: Option<u32>,
        ephemeral: bool,
    ) -> Result<Sticker> {
        let ciphertext = self.inner.remote.get_sticker(id, sticker_id).await?;
        let pack_key = crypto::key_from_hex(key)?;
        let data = crypto::decrypt_sticker(&pack_key, &ciphertext)?;

        let processed = process_new_sticker(&data, ephemeral, &self.inner.ctx).await?;
        let sticker = Sticker {
            id: sticker_id,
            pack_id: id.clone(),
            emoji: entry.emoji.clone(),
            path: processed.write.path,
            local_key: Some(processed.write.local_key),
            size: processed.write.size,
            plaintext_hash: Some(processed.write.plaintext_hash),
            content_type: self
                .inner
                .ctx
                .media
                .sniff_content_type(&data)
                .map(str::to_string),
            width: processed.width,
            height: processed.height,
            is_cover_only: cover_only == Some(sticker_id),
        };

        if !ephemeral {
            self.inner.repo.upsert_sticker(&sticker).await?;
        }
        Ok(sticker)
    }

    /// Fetch a pack for preview only. Nothing is persisted; stickers go to
    /// the temporary store.
    pub async fn download_ephemeral_pack(&self, id: &PackId, key: &str) -> Result<()> {
        match self.pack_status(id) {
            Some(StickerPackStatus::Pending) => {
                info!(
                    pack = %id.redacted(),
                    "ephemeral download for pending pack, redownloading with priority"
                );
                drop(self.request_download(id, key, None, DownloadSource::Ui));
                return Ok(());
            }
            Some(StickerPackStatus::Downloaded | StickerPackStatus::Installed) => {
                warn!(pack = %id.redacted(), "ephemeral download for a known pack, skipping");
                return Ok(());
            }
            _ => {}
        }

        let result = self.fetch_ephemeral(id, key).await;
        if let Err(e) = &result {
            // Leave the status alone if the pack was installed meanwhile.
            if self.pack_status(id) == Some(StickerPackStatus::Ephemeral) {
                self.set_local_status(
                    id,
                    StickerPackStatus::Error,
                    Some(StickerPackStatus::Ephemeral),
                );
            }
            error!(pack = %id.redacted(), error = %e, "ephemeral sticker pack download failed");
        }
        result
    }

    async fn fetch_ephemeral(&self, id: &PackId, key: &str) -> Result<()> {
        let placeholder =
            StickerPack::placeholder(id.clone(), key.to_string(), StickerPackStatus::Ephemeral);
        self.put_pack(placeholder.clone(), false).await?;

        let manifest = self.fetch_manifest(id, key).await?;
        let mut pack = placeholder;
        pack.cover_sticker_id = Some(manifest.cover_sticker_id);
        pack.sticker_count = manifest.sticker_count;
        pack.title = manifest.title.clone();
        pack.author = manifest.author.clone();
        self.put_pack(pack, false).await?;

        self.download_stickers(id, key, &manifest, true).await
    }

    /// Drop a preview pack and its temporary files. Packs that became real
    /// in the meantime are left alone.
    pub async fn remove_ephemeral_pack(&self, id: &PackId) -> Result<()> {
        let existing = self.get_pack(id).ok_or(StoreError::NotFound)?;
        let removable = existing.status == StickerPackStatus::Ephemeral
            || (existing.status == StickerPackStatus::Error
                && existing.attempted_status == Some(StickerPackStatus::Ephemeral));
        if !removable {
            return Ok(());
        }

        self.forget_pack(id);
        let paths: Vec<String> = existing.stickers.values().map(|s| s.path.clone()).collect();
        delete_files(&self.inner.ctx.temp, &paths).await;

        self.inner.repo.delete_sticker_pack(id).await?;
        Ok(())
    }

    /// Mark a pack installed, downloading it first if it is unknown.
    pub async fn install_pack(&self, id: &PackId, key: &str) -> Result<()> {
        if self.inner.repo.get_sticker_pack(id).await?.is_none() {
            return self
                .download_pack(
                    id,
                    key,
                    Some(StickerPackStatus::Installed),
                    DownloadSource::Ui,
                )
                .await;
        }
        self.update_status(id, StickerPackStatus::Installed, None).await?;
        info!(pack = %id.redacted(), "sticker pack installed");
        Ok(())
    }

    /// Back to `downloaded`, then delete the pack if nothing references it.
    pub async fn uninstall_pack(&self, id: &PackId) -> Result<()> {
        self.update_status(id, StickerPackStatus::Downloaded, None)
            .await?;
        info!(pack = %id.redacted(), "sticker pack uninstalled");
        self.maybe_delete_pack(id).await?;
        Ok(())
    }

    /// Delete the pack if no message references it any more.
    pub async fn maybe_delete_pack(&self, id: &PackId) -> Result<bool> {
        self.delete_pack_reference(UNUSED_MESSAGE_ID, id).await
    }

    /// Drop one message's reference. Returns `true` when that was the last
    /// one and the pack and its files are gone.
    pub async fn delete_pack_reference(&self, message_id: &str, id: &PackId) -> Result<bool> {
        if self.is_blessed(id) {
            self.inner
                .repo
                .remove_sticker_pack_reference(message_id, id)
                .await?;
            return Ok(false);
        }

        let Some(paths) = self
            .inner
            .repo
            .delete_sticker_pack_reference(message_id, id)
            .await?
        else {
            return Ok(false);
        };

        self.forget_pack(id);
        delete_files(&self.inner.ctx.stickers, &paths).await;
        info!(pack = %id.redacted(), files = paths.len(), "sticker pack deleted");
        Ok(true)
    }

    /// Delete regardless of references.
    async fn delete_pack(&self, id: &PackId) -> Result<()> {
        if self.is_blessed(id) {
            return Ok(());
        }
        let paths = self.inner.repo.delete_sticker_pack(id).await?;
        self.forget_pack(id);
        delete_files(&self.inner.ctx.stickers, &paths).await;
        Ok(())
    }

    /// Copy a sticker into the attachment store so a message owns its own
    /// file. The content type is sniffed, falling back to WebP.
    pub async fn copy_sticker_to_attachments(
        &self,
        id: &PackId,
        sticker_id: u32,
    ) -> Result<AttachmentDescriptor> {
        let sticker = self
            .get_sticker(id, sticker_id)
            .ok_or(NetError::UnknownSticker { sticker_id })?;

        let ctx = &self.inner.ctx;
        let written = ctx
            .stickers
            .copy_to(&ctx.attachments, &sticker.path, sticker.local_key.as_deref())
            .await?;

        let mut descriptor = AttachmentDescriptor::from_local_write(mime::IMAGE_WEBP, &written);
        descriptor.width = Some(sticker.width);
        descriptor.height = Some(sticker.height);

        let data = ctx.attachments.read(&written.path, &written.local_key).await?;
        match ctx.media.sniff_content_type(&data) {
            Some(content_type) => descriptor.content_type = content_type.to_string(),
            None => warn!(
                pack = %id.redacted(),
                sticker_id,
                "unable to sniff sticker type, falling back to WebP"
            ),
        }
        Ok(descriptor)
    }

    /// Attach sticker data to messages that arrived before their pack was
    /// downloaded. Returns how many messages were updated.
    pub async fn resolve_references(&self, id: &PackId) -> Result<usize> {
        let refs = self
            .inner
            .repo
            .take_unresolved_sticker_pack_references(id)
            .await?;
        if refs.is_empty() {
            return Ok(0);
        }
        info!(pack = %id.redacted(), count = refs.len(), "resolving sticker references");

        let mut by_sticker: BTreeMap<u32, Vec<String>> = BTreeMap::new();
        for reference in refs {
            by_sticker
                .entry(reference.sticker_id)
                .or_default()
                .push(reference.message_id);
        }

        let batch_size = self.inner.config.resolve_batch_size.max(1);
        let mut resolved = 0;
        for (sticker_id, message_ids) in by_sticker {
            for batch in message_ids.chunks(batch_size) {
                match self.resolve_batch(id, sticker_id, batch).await {
                    Ok(count) => resolved += count,
                    Err(e) => error!(
                        pack = %id.redacted(),
                        sticker_id,
                        error = %e,
                        "failed to resolve sticker reference batch"
                    ),
                }
            }
        }
        Ok(resolved)
    }

    async fn resolve_batch(&self, id: &PackId, sticker_id: u32, batch: &[String]) -> Result<usize> {
        let mut saved = 0;
        for message_id in batch {
            let Some(mut message) = self.inner.messages.get_message(message_id).await? else {
                debug!(message = %message_id, "referencing message is gone");
                continue;
            };
            let Some(sticker) = message.sticker.as_mut() else {
                info!(sent_at = message.sent_at, "message has no sticker");
                continue;
            };
            if sticker.data.as_ref().is_some_and(|d| d.is_locally_saved()) {
                info!(sent_at = message.sent_at, "sticker already downloaded");
                continue;
            }
            if sticker.pack_id != id.as_str() || sticker.sticker_id != sticker_id {
                info!(sent_at = message.sent_at, "message has a different sticker");
                continue;
            }

            sticker.data = Some(self.copy_sticker_to_attachments(id, sticker_id).await?);
            self.inner.messages.save_message(&message).await?;
            saved += 1;
        }
        Ok(saved)
    }

    /// Encrypt sticker files written before at-rest encryption and remove
    /// the plaintext copies. Returns how many were upgraded.
    pub async fn encrypt_legacy_stickers(&self) -> Result<usize> {
        let legacy: Vec<Sticker> = self
            .inner
            .repo
            .list_sticker_packs()
            .await?
            .into_iter()
            .flat_map(|p| p.stickers.into_values())
            .filter(|s| s.local_key.is_none())
            .collect();
        info!(count = legacy.len(), "checking legacy stickers");

        let mut updated = 0;
        for chunk in legacy.chunks(LEGACY_STICKER_CONCURRENCY) {
            let results = join_all(
                chunk
                    .iter()
                    .map(|sticker| self.encrypt_legacy_sticker(sticker.clone())),
            )
            .await;
            for result in results {
                match result {
                    Ok(true) => updated += 1,
                    Ok(false) => {}
                    Err(e) => error!(error = %e, "legacy sticker encryption failed"),
                }
            }
        }
        info!(updated, "legacy stickers encrypted");
        Ok(updated)
    }

    async fn encrypt_legacy_sticker(&self, mut sticker: Sticker) -> Result<bool> {
        let ctx = &self.inner.ctx;
        let descriptor = AttachmentDescriptor {
            content_type: sticker
                .content_type
                .clone()
                .unwrap_or_else(|| mime::IMAGE_WEBP.to_string()),
            size: sticker.size,
            storage: AttachmentStorage::LocalV1 {
                path: sticker.path.clone(),
            },
            ..Default::default()
        };

        let upgraded = ctx.legacy.upgrade(descriptor, &ctx.stickers).await;
        let AttachmentStorage::LocalV2 {
            path,
            local_key,
            plaintext_hash,
        } = upgraded.storage
        else {
            return Ok(false);
        };

        let old_path = std::mem::replace(&mut sticker.path, path);
        sticker.local_key = Some(local_key);
        sticker.plaintext_hash = Some(plaintext_hash);
        sticker.size = upgraded.size;
        self.inner.repo.upsert_sticker(&sticker).await?;

        if let Some(pack) = self.state().packs.get_mut(&sticker.pack_id) {
            pack.stickers.insert(sticker.id, sticker.clone());
        }
        if let Err(e) = ctx.stickers.delete(&old_path).await {
            warn!(path = %old_path, error = %e, "failed to remove plaintext sticker");
        }
        Ok(true)
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: StickerEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    /// Replace the pack row (unless `persist` is off) and the in-memory
    /// copy. Stickers already held in memory are kept.
    async fn put_pack(&self, mut pack: StickerPack, persist: bool) -> Result<()> {
        if persist {
            self.inner.repo.upsert_sticker_pack(&pack).await?;
        }
        {
            let mut state = self.state();
            if pack.stickers.is_empty() {
                if let Some(existing) = state.packs.get(&pack.id) {
                    pack.stickers = existing.stickers.clone();
                }
            }
            state.packs.insert(pack.id.clone(), pack.clone());
        }
        self.emit(StickerEvent::PackAdded { pack });
        Ok(())
    }

    async fn update_status(
        &self,
        id: &PackId,
        status: StickerPackStatus,
        attempted_status: Option<StickerPackStatus>,
    ) -> Result<()> {
        self.inner
            .repo
            .update_sticker_pack_status(id, status)
            .await?;
        self.set_local_status(id, status, attempted_status);
        Ok(())
    }

    fn set_local_status(
        &self,
        id: &PackId,
        status: StickerPackStatus,
        attempted_status: Option<StickerPackStatus>,
    ) {
        let attempted = {
            let mut state = self.state();
            let Some(pack) = state.packs.get_mut(id) else {
                return;
            };
            pack.status = status;
            if attempted_status.is_some() {
                pack.attempted_status = attempted_status;
            }
            pack.installed_at = match status {
                StickerPackStatus::Installed => pack.installed_at.or_else(|| Some(Utc::now())),
                _ => None,
            };
            pack.attempted_status
        };
        self.emit(StickerEvent::StatusChanged {
            pack_id: id.clone(),
            status,
            attempted_status: attempted,
        });
    }

    fn forget_pack(&self, id: &PackId) {
        self.state().packs.remove(id);
        self.emit(StickerEvent::PackRemoved {
            pack_id: id.clone(),
        });
    }
}

async fn delete_files(store: &AttachmentStore, paths: &[String]) {
    for chunk in paths.chunks(FILE_DELETE_CONCURRENCY) {
        let results = join_all(chunk.iter().map(|path| store.delete(path))).await;
        for (path, result) in chunk.iter().zip(results) {
            if let Err(e) = result {
                warn!(path = %path, error = %e, "failed to delete sticker file");
            }
        }
    }
}
