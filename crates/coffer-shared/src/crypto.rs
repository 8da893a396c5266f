use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::constants::{
    KDF_CONTEXT_ATTACHMENT_DIGEST, KDF_CONTEXT_STICKER_PACK_KEY, NONCE_SIZE, SYMMETRIC_KEY_SIZE,
};
use crate::error::CryptoError;

pub type SymmetricKey = [u8; SYMMETRIC_KEY_SIZE];
pub type Nonce = [u8; NONCE_SIZE];

pub fn generate_symmetric_key() -> SymmetricKey {
    let mut key = [0u8; SYMMETRIC_KEY_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

pub fn generate_nonce() -> Nonce {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

// Returns nonce || ciphertext (24 bytes nonce prepended)
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    encrypt_with_nonce(key, &generate_nonce(), plaintext)
}

/// Deterministic variant of [`encrypt`]: same key, nonce and plaintext always
/// produce the same output. Used to check whether a transit ciphertext can be
/// reproduced from the plaintext held locally.
pub fn encrypt_with_nonce(
    key: &SymmetricKey,
    nonce_bytes: &Nonce,
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XNonce::from_slice(nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

pub fn decrypt(key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XNonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

// BLAKE3 KDF with domain separation
pub fn derive_sticker_pack_key(pack_key: &SymmetricKey) -> SymmetricKey {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_STICKER_PACK_KEY);
    hasher.update(pack_key);
    let hash = hasher.finalize();
    let mut key = [0u8; SYMMETRIC_KEY_SIZE];
    key.copy_from_slice(&hash.as_bytes()[..SYMMETRIC_KEY_SIZE]);
    key
}

/// Decrypt a manifest or sticker fetched from the CDN with the pack's key.
pub fn decrypt_sticker(pack_key: &SymmetricKey, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    decrypt(&derive_sticker_pack_key(pack_key), ciphertext)
}

pub fn encrypt_sticker(pack_key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    encrypt(&derive_sticker_pack_key(pack_key), plaintext)
}

/// Integrity digest of a transit ciphertext.
pub fn attachment_digest(ciphertext: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_ATTACHMENT_DIGEST);
    hasher.update(ciphertext);
    *hasher.finalize().as_bytes()
}

/// Hex BLAKE3 hash of plaintext bytes, stored alongside local files.
pub fn plaintext_hash(plaintext: &[u8]) -> String {
    blake3::hash(plaintext).to_hex().to_string()
}

pub fn key_from_hex(s: &str) -> Result<SymmetricKey, CryptoError> {
    let bytes = hex::decode(s).map_err(|_| CryptoError::InvalidKeyLength)?;
    if bytes.len() != SYMMETRIC_KEY_SIZE {
        return Err(CryptoError::InvalidKeyLength);
    }
    let mut key = [0u8; SYMMETRIC_KEY_SIZE];
    key.copy_from_slice(&bytes);
    Ok(key)
}

pub fn nonce_from_hex(s: &str) -> Result<Nonce, CryptoError> {
    let bytes = hex::decode(s).map_err(|_| CryptoError::InvalidKeyLength)?;
    if bytes.len() != NONCE_SIZE {
        return Err(CryptoError::InvalidKeyLength);
    }
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&bytes);
    Ok(nonce)
}
