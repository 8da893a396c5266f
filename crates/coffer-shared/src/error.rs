use thiserror::Error;

#[derive(Error, Debug)]
pub enum SharedError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Invalid sticker pack id: {0}")]
    InvalidPackId(String),

    #[error("Unknown disposition: {0}")]
    UnknownDisposition(String),

    #[error("Sticker pack manifest is malformed: {0}")]
    ManifestMalformed(String),
}

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Invalid key length")]
    InvalidKeyLength,
}
