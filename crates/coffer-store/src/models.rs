//! Domain model structs for attachments, messages and sticker packs.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the UI layer or stored as a JSON column by the host.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use coffer_shared::constants::LOCAL_FILE_VERSION;
use coffer_shared::mime;
use coffer_shared::PackId;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Attachment
// ---------------------------------------------------------------------------

/// Bit set in [`AttachmentDescriptor::flags`] for recorded voice notes.
pub const FLAG_VOICE_MESSAGE: u32 = 1;

/// Where an attachment's bytes currently live.
///
/// Storage only ever moves forward: `Inline`/`Remote` -> `LocalV1` -> `LocalV2`,
/// or `Remote` -> `LocalV2` directly for fresh downloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AttachmentStorage {
    /// Bytes still held in the record itself (records from before version 3).
    Inline { data: Vec<u8> },
    /// Not fetched yet; see [`AttachmentDescriptor::transit`].
    #[default]
    Remote,
    /// Plaintext file under the storage root.
    LocalV1 { path: String },
    /// Encrypted file under the storage root.
    #[serde(rename_all = "camelCase")]
    LocalV2 {
        path: String,
        local_key: String,
        plaintext_hash: String,
    },
}

/// CDN pointer and transit crypto material for a remote attachment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TransitInfo {
    pub cdn_key: String,
    /// Hex transit key.
    pub key: String,
    /// Hex digest of the transit ciphertext.
    pub digest: String,
    /// Hex nonce the sender used, recorded once the ciphertext has been seen.
    pub iv: Option<String>,
}

/// Fresh transit material, used when the original ciphertext cannot be
/// reproduced from the local plaintext.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReencryptionInfo {
    pub key: String,
    pub iv: String,
    pub digest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentDescriptor {
    pub content_type: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub flags: u32,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub thumbnail: Option<Box<AttachmentDescriptor>>,
    #[serde(default)]
    pub screenshot: Option<Box<AttachmentDescriptor>>,
    /// Download in progress.
    #[serde(default)]
    pub pending: bool,
    /// Permanently failed; the UI shows a placeholder.
    #[serde(default)]
    pub error: bool,
    /// Quote thumbnail that shares its file with the quoted message.
    #[serde(default)]
    pub copied: bool,
    /// Per-attachment version written by very old clients.
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub transit: Option<TransitInfo>,
    #[serde(default)]
    pub reencryption: Option<ReencryptionInfo>,
    #[serde(default)]
    pub storage: AttachmentStorage,
}

impl AttachmentDescriptor {
    pub fn path(&self) -> Option<&str> {
        match &self.storage {
            AttachmentStorage::LocalV1 { path } | AttachmentStorage::LocalV2 { path, .. } => {
                Some(path)
            }
            _ => None,
        }
    }

    /// `Some(2)` for encrypted-at-rest files, `None` otherwise.
    pub fn version(&self) -> Option<u8> {
        match self.storage {
            AttachmentStorage::LocalV2 { .. } => Some(LOCAL_FILE_VERSION),
            _ => None,
        }
    }

    pub fn is_locally_saved(&self) -> bool {
        self.path().is_some()
    }

    pub fn is_voice_message(&self) -> bool {
        if self.flags & FLAG_VOICE_MESSAGE == FLAG_VOICE_MESSAGE {
            return true;
        }
        mime::is_audio(&self.content_type) && self.file_name.is_none()
    }

    pub fn is_visual_media(&self) -> bool {
        (mime::is_image(&self.content_type) || mime::is_video(&self.content_type))
            && !self.is_voice_message()
    }

    pub fn is_file(&self) -> bool {
        !self.is_visual_media()
            && !self.is_voice_message()
            && !mime::is_long_message(&self.content_type)
    }

    /// Overwrite storage with the result of a local write.
    pub fn apply_local_write(&mut self, write: &LocalWrite) {
        self.size = write.size;
        self.storage = AttachmentStorage::LocalV2 {
            path: write.path.clone(),
            local_key: write.local_key.clone(),
            plaintext_hash: write.plaintext_hash.clone(),
        };
    }

    pub fn from_local_write(content_type: &str, write: &LocalWrite) -> Self {
        let mut descriptor = Self {
            content_type: content_type.to_string(),
            ..Default::default()
        };
        descriptor.apply_local_write(write);
        descriptor
    }
}

/// Result of encrypting bytes into an [`crate::AttachmentStore`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LocalWrite {
    pub path: String,
    pub local_key: String,
    pub size: u64,
    pub plaintext_hash: String,
    pub version: u8,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct QuotedAttachment {
    pub content_type: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<AttachmentDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub attachments: Vec<QuotedAttachment>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ContactAvatar {
    #[serde(default)]
    pub is_profile: bool,
    #[serde(default)]
    pub avatar: Option<AttachmentDescriptor>,
}

/// Shared contact card.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<ContactAvatar>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct LinkPreview {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub image: Option<AttachmentDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageSticker {
    pub pack_id: String,
    pub pack_key: String,
    pub sticker_id: u32,
    #[serde(default)]
    pub emoji: Option<String>,
    #[serde(default)]
    pub data: Option<AttachmentDescriptor>,
}

/// A previous revision of an edited message. Carries its own attachments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct EditHistoryEntry {
    pub timestamp: i64,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentDescriptor>,
    #[serde(default)]
    pub body_attachment: Option<AttachmentDescriptor>,
    #[serde(default)]
    pub quote: Option<Quote>,
    #[serde(default)]
    pub preview: Vec<LinkPreview>,
}

/// A stored message as seen by the migration engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: String,
    pub sent_at: i64,
    /// Never decreases.
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentDescriptor>,
    #[serde(default)]
    pub body_attachment: Option<AttachmentDescriptor>,
    #[serde(default)]
    pub quote: Option<Quote>,
    #[serde(default)]
    pub contact: Vec<Contact>,
    #[serde(default)]
    pub preview: Vec<LinkPreview>,
    #[serde(default)]
    pub sticker: Option<MessageSticker>,
    #[serde(default)]
    pub edit_history: Vec<EditHistoryEntry>,
    #[serde(default)]
    pub has_attachments: bool,
    #[serde(default)]
    pub has_visual_media_attachments: bool,
    #[serde(default)]
    pub has_file_attachments: bool,
}

// ---------------------------------------------------------------------------
// Sticker packs
// ---------------------------------------------------------------------------

/// Lifecycle status of a sticker pack.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StickerPackStatus {
    /// Referenced by a message, not fetched.
    Known,
    /// Preview only; never persisted.
    Ephemeral,
    /// Manifest fetched, stickers downloading.
    Pending,
    Downloaded,
    Installed,
    Error,
}

impl StickerPackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StickerPackStatus::Known => "known",
            StickerPackStatus::Ephemeral => "ephemeral",
            StickerPackStatus::Pending => "pending",
            StickerPackStatus::Downloaded => "downloaded",
            StickerPackStatus::Installed => "installed",
            StickerPackStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "known" => StickerPackStatus::Known,
            "ephemeral" => StickerPackStatus::Ephemeral,
            "pending" => StickerPackStatus::Pending,
            "downloaded" => StickerPackStatus::Downloaded,
            "installed" => StickerPackStatus::Installed,
            "error" => StickerPackStatus::Error,
            _ => return None,
        })
    }
}

impl std::fmt::Display for StickerPackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One downloaded sticker, encrypted at rest in the sticker store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Sticker {
    pub id: u32,
    pub pack_id: PackId,
    pub emoji: Option<String>,
    pub path: String,
    /// `None` for plaintext files written before at-rest encryption.
    pub local_key: Option<String>,
    pub size: u64,
    pub plaintext_hash: Option<String>,
    pub content_type: Option<String>,
    pub width: u32,
    pub height: u32,
    /// The pack cover when it is not also listed as a sticker.
    pub is_cover_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StickerPack {
    pub id: PackId,
    /// Hex pack key.
    pub key: String,
    pub status: StickerPackStatus,
    pub attempted_status: Option<StickerPackStatus>,
    pub download_attempts: u32,
    pub cover_sticker_id: Option<u32>,
    pub sticker_count: u32,
    pub title: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub installed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stickers: BTreeMap<u32, Sticker>,
}

impl StickerPack {
    /// A bare pack row with no manifest data yet.
    pub fn placeholder(id: PackId, key: String, status: StickerPackStatus) -> Self {
        Self {
            id,
            key,
            status,
            attempted_status: None,
            download_attempts: 0,
            cover_sticker_id: None,
            sticker_count: 0,
            title: String::new(),
            author: String::new(),
            created_at: Utc::now(),
            installed_at: None,
            stickers: BTreeMap::new(),
        }
    }

    /// Installed or downloaded packs with content do not need another fetch.
    pub fn needs_download(&self) -> bool {
        !(matches!(
            self.status,
            StickerPackStatus::Installed | StickerPackStatus::Downloaded
        ) && self.sticker_count > 0)
    }
}

/// A message's claim on a sticker pack. Packs are deleted only when the last
/// reference goes away.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StickerPackReference {
    pub message_id: String,
    pub pack_id: PackId,
    pub sticker_id: u32,
    /// Recorded before the pack finished downloading.
    pub is_unresolved: bool,
}
