/// Application name
pub const APP_NAME: &str = "coffer";

/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// Symmetric key size in bytes (for XChaCha20-Poly1305)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Random entropy behind every stored file name, in bytes (64 hex chars)
pub const RANDOM_NAME_BYTES: usize = 32;

/// Length of the shard directory prefix in a relative attachment path
pub const SHARD_PREFIX_LEN: usize = 2;

/// On-disk format version for encrypted-at-rest files
pub const LOCAL_FILE_VERSION: u8 = 2;

/// Bodies longer than this many bytes are moved into a body attachment
pub const MAX_INLINE_BODY_BYTES: usize = 2048;

/// Maximum manifest or sticker size accepted from the CDN (server-enforced)
pub const MAX_STICKER_BYTES: usize = 300 * 1024;

/// Sticker pack ids are 16 bytes, hex encoded
pub const PACK_ID_HEX_LEN: usize = 32;

/// Key derivation contexts (BLAKE3)
pub const KDF_CONTEXT_STICKER_PACK_KEY: &str = "coffer-sticker-pack-key-v1";
pub const KDF_CONTEXT_ATTACHMENT_DIGEST: &str = "coffer-attachment-digest-v1";
