//! Image inspection used by migrations and sticker processing.

use std::io::Cursor;

use async_trait::async_trait;
use coffer_shared::mime;
use image::{ImageFormat, ImageReader};

use crate::error::{Result, StoreError};

/// Longest side of generated thumbnails, in pixels.
pub const THUMBNAIL_SIZE: u32 = 150;

#[async_trait]
pub trait MediaProcessor: Send + Sync {
    async fn image_dimensions(&self, bytes: &[u8]) -> Result<(u32, u32)>;

    /// PNG thumbnail whose longest side is at most `max_side`.
    async fn make_image_thumbnail(&self, bytes: &[u8], max_side: u32) -> Result<Vec<u8>>;

    /// PNG frame grabbed from a video.
    async fn make_video_screenshot(&self, bytes: &[u8]) -> Result<Vec<u8>>;

    /// Content type sniffed from magic bytes.
    fn sniff_content_type(&self, bytes: &[u8]) -> Option<&'static str>;
}

/// [`MediaProcessor`] backed by the `image` crate. Decoding runs on the
/// blocking pool. Video is not supported.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageMediaProcessor;

#[async_trait]
impl MediaProcessor for ImageMediaProcessor {
    async fn image_dimensions(&self, bytes: &[u8]) -> Result<(u32, u32)> {
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || -> Result<(u32, u32)> {
            let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
            Ok(reader.into_dimensions()?)
        })
        .await?
    }

    async fn make_image_thumbnail(&self, bytes: &[u8], max_side: u32) -> Result<Vec<u8>> {
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            let image = image::load_from_memory(&bytes)?;
            let thumb = image.thumbnail(max_side, max_side);
            let mut out = Cursor::new(Vec::new());
            thumb.write_to(&mut out, ImageFormat::Png)?;
            Ok(out.into_inner())
        })
        .await?
    }

    async fn make_video_screenshot(&self, _bytes: &[u8]) -> Result<Vec<u8>> {
        Err(StoreError::Unsupported("video screenshots".into()))
    }

    fn sniff_content_type(&self, bytes: &[u8]) -> Option<&'static str> {
        image::guess_format(bytes).ok().map(|f| match f {
            ImageFormat::WebP => mime::IMAGE_WEBP,
            ImageFormat::Png => mime::IMAGE_PNG,
            ImageFormat::Jpeg => mime::IMAGE_JPEG,
            other => other.to_mime_type(),
        })
    }
}
