use coffer_shared::{CryptoError, SharedError};
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A relative path failed the traversal check. Never retried.
    #[error("Invalid attachment path: {0}")]
    InvalidPath(String),

    /// Ciphertext and key do not match (wrong key, truncated or tampered file).
    #[error("Failed to decrypt {path}")]
    DecryptionFailure { path: String },

    /// The descriptor points at a file that is no longer on disk.
    #[error("Attachment missing on disk: {0}")]
    AttachmentMissingOnDisk(String),

    /// The descriptor has no local bytes to operate on.
    #[error("Attachment has no local data")]
    NoLocalData,

    /// A schema migration step failed.
    #[error("Migration step {version} ({name}) failed: {reason}")]
    MigrationStepFailure {
        version: u32,
        name: &'static str,
        reason: String,
    },

    /// The media processor cannot handle this input.
    #[error("Unsupported media operation: {0}")]
    Unsupported(String),

    /// Image decoding or encoding error.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Crypto primitive error (bad key material).
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Shared type validation error.
    #[error(transparent)]
    Shared(#[from] SharedError),

    /// SQLite / SQLCipher error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// Database schema migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// JSON column encode/decode error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Chrono parsing error.
    #[error("Timestamp parse error: {0}")]
    ChronoParse(#[from] chrono::ParseError),

    /// A blocking task panicked or was cancelled.
    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
