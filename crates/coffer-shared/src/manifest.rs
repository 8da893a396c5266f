//! Sticker pack manifest wire format.
//!
//! The CDN serves the manifest as `encrypt_sticker(pack_key, bincode(manifest))`.

use serde::{Deserialize, Serialize};

use crate::error::SharedError;

/// One sticker entry in a pack manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StickerEntry {
    pub id: Option<u32>,
    pub emoji: Option<String>,
}

/// Decoded sticker pack manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StickerPackManifest {
    pub title: Option<String>,
    pub author: Option<String>,
    pub cover: Option<StickerEntry>,
    pub stickers: Vec<StickerEntry>,
}

/// A manifest with its cover resolved and the download plan worked out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedManifest {
    pub title: String,
    pub author: String,
    pub cover: StickerEntry,
    pub cover_sticker_id: u32,
    /// Stickers to fetch after the cover, cover excluded.
    pub non_cover: Vec<StickerEntry>,
    /// `false` when the cover only exists as the pack's cover image.
    pub cover_included_in_list: bool,
    pub sticker_count: u32,
}

impl StickerPackManifest {
    pub fn encode(&self) -> Result<Vec<u8>, SharedError> {
        bincode::serialize(self).map_err(|e| SharedError::ManifestMalformed(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, SharedError> {
        bincode::deserialize(bytes).map_err(|e| SharedError::ManifestMalformed(e.to_string()))
    }

    /// Pick the cover (explicit cover, else the first sticker) and split the
    /// remaining stickers out. A manifest with neither is malformed.
    pub fn resolve(self) -> Result<ResolvedManifest, SharedError> {
        let sticker_count = self.stickers.len() as u32;
        let mut cover = self
            .cover
            .or_else(|| self.stickers.first().cloned())
            .ok_or_else(|| SharedError::ManifestMalformed("no cover and no stickers".into()))?;
        let cover_sticker_id = cover
            .id
            .ok_or_else(|| SharedError::ManifestMalformed("cover has no id".into()))?;

        let mut non_cover = Vec::with_capacity(self.stickers.len());
        let mut listed_cover = None;
        for sticker in self.stickers {
            match sticker.id {
                Some(id) if id == cover_sticker_id => listed_cover = Some(sticker),
                Some(_) => non_cover.push(sticker),
                None => {}
            }
        }

        if cover.emoji.is_none() {
            if let Some(listed) = &listed_cover {
                cover.emoji = listed.emoji.clone();
            }
        }

        Ok(ResolvedManifest {
            title: self.title.unwrap_or_default(),
            author: self.author.unwrap_or_default(),
            cover,
            cover_sticker_id,
            cover_included_in_list: (non_cover.len() as u32) < sticker_count,
            non_cover,
            sticker_count,
        })
    }
}
