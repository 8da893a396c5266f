use std::path::Path;
use std::sync::Arc;

use coffer_shared::Disposition;

use crate::attachment_store::AttachmentStore;
use crate::legacy::LegacyAttachmentEncryptor;
use crate::media::MediaProcessor;

/// Capabilities handed to every migration step.
#[derive(Clone)]
pub struct MigrationContext {
    pub attachments: AttachmentStore,
    pub stickers: AttachmentStore,
    pub temp: AttachmentStore,
    pub legacy: Arc<LegacyAttachmentEncryptor>,
    pub media: Arc<dyn MediaProcessor>,
}

impl MigrationContext {
    /// Filesystem stores under `user_data`.
    pub fn new(
        user_data: &Path,
        legacy: Arc<LegacyAttachmentEncryptor>,
        media: Arc<dyn MediaProcessor>,
    ) -> Self {
        Self {
            attachments: AttachmentStore::new(user_data, Disposition::Attachment),
            stickers: AttachmentStore::new(user_data, Disposition::Sticker),
            temp: AttachmentStore::new(user_data, Disposition::Temporary),
            legacy,
            media,
        }
    }
}
