use std::sync::Arc;

use coffer_shared::{CryptoError, SharedError};
use coffer_store::{StickerPackStatus, StoreError};
use thiserror::Error;

use crate::queue::QueueError;

/// Errors produced by acquisition.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A CDN key that cannot be used as a single path segment.
    #[error("Invalid CDN key")]
    InvalidCdnKey,

    #[error("Not connected")]
    Offline,

    /// The ciphertext does not match the digest the sender announced.
    #[error("Digest mismatch")]
    DigestMismatch,

    #[error("Size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// Automatic attempts are used up; the owner is in its error state.
    #[error("Retry ceiling exceeded after {attempts} attempts")]
    RetryCeilingExceeded { attempts: u32 },

    #[error("Attachment has no transit info")]
    MissingTransit,

    #[error("Sticker {sticker_id} is not part of the pack")]
    UnknownSticker { sticker_id: u32 },

    #[error("Every sticker in the pack failed to download")]
    AllStickersFailed,

    /// The pack left the ephemeral state while its preview was downloading.
    #[error("Ephemeral download interrupted by a status change")]
    PackStatusChanged,

    #[error("Invalid final status {0}")]
    InvalidFinalStatus(StickerPackStatus),

    /// Failure of a job whose result is shared between waiters.
    #[error("Download job failed: {0}")]
    Job(Arc<NetError>),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Shared(#[from] SharedError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl NetError {
    /// Errors that retrying cannot fix.
    pub fn is_permanent(&self) -> bool {
        if let NetError::Job(inner) = self {
            return inner.is_permanent();
        }
        matches!(
            self,
            NetError::DigestMismatch
                | NetError::SizeMismatch { .. }
                | NetError::RetryCeilingExceeded { .. }
                | NetError::MissingTransit
                | NetError::InvalidUrl(_)
                | NetError::InvalidCdnKey
                | NetError::UnknownSticker { .. }
                | NetError::InvalidFinalStatus(_)
                | NetError::Crypto(_)
                | NetError::Shared(_)
                | NetError::Store(StoreError::InvalidPath(_))
                | NetError::Store(StoreError::DecryptionFailure { .. })
        ) || matches!(self, NetError::Status { status, .. } if (400..500).contains(status) && *status != 429)
    }
}

pub type Result<T> = std::result::Result<T, NetError>;
