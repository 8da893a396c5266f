//! # coffer-shared
//!
//! Primitives shared by every coffer crate: at-rest and transit encryption,
//! key derivation, the sticker pack manifest wire format, MIME helpers and
//! small validated identifier types.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod manifest;
pub mod mime;
pub mod types;

pub use error::{CryptoError, SharedError};
pub use types::{Disposition, PackId};
