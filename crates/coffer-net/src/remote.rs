//! Where remote bytes come from.

use async_trait::async_trait;
use coffer_shared::PackId;

use crate::error::Result;

/// Network access as seen by the downloaders. Everything returned is still
/// transit-encrypted.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    fn is_online(&self) -> bool;

    async fn get_attachment(&self, cdn_key: &str) -> Result<Vec<u8>>;

    async fn get_sticker_pack_manifest(&self, pack_id: &PackId) -> Result<Vec<u8>>;

    async fn get_sticker(&self, pack_id: &PackId, sticker_id: u32) -> Result<Vec<u8>>;
}
