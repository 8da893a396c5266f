//! Per-attachment transformations used by the migration steps.

use coffer_shared::{crypto, mime};
use tracing::{debug, info, warn};

use crate::attachment_store::AttachmentStore;
use crate::error::{Result, StoreError};
use crate::media::THUMBNAIL_SIZE;
use crate::models::{AttachmentDescriptor, AttachmentStorage, ReencryptionInfo};

use super::MigrationContext;

pub const REPLACEMENT_CHARACTER: char = '\u{FFFD}';

/// Drop the per-attachment version very old clients wrote.
pub fn remove_schema_version(mut attachment: AttachmentDescriptor) -> AttachmentDescriptor {
    attachment.schema_version = None;
    attachment
}

/// Replace LEFT-TO-RIGHT / RIGHT-TO-LEFT OVERRIDE in the file name.
pub fn replace_unicode_order_overrides(mut attachment: AttachmentDescriptor) -> AttachmentDescriptor {
    if let Some(name) = attachment.file_name.take() {
        attachment.file_name = Some(replace_chars(&name, |c| {
            matches!(c, '\u{202D}' | '\u{202E}')
        }));
    }
    attachment
}

/// Replace every bidi control character in the file name.
pub fn replace_unicode_v2(mut attachment: AttachmentDescriptor) -> AttachmentDescriptor {
    if let Some(name) = attachment.file_name.take() {
        attachment.file_name = Some(replace_chars(&name, is_bidi_control));
    }
    attachment
}

fn is_bidi_control(c: char) -> bool {
    matches!(
        c,
        '\u{202A}'..='\u{202E}' | '\u{2066}'..='\u{2069}' | '\u{200E}' | '\u{200F}' | '\u{061C}'
    )
}

fn replace_chars(s: &str, pred: impl Fn(char) -> bool) -> String {
    s.chars()
        .map(|c| if pred(c) { REPLACEMENT_CHARACTER } else { c })
        .collect()
}

/// Move inline bytes into `store`. Anything not inline is left alone.
pub async fn migrate_data_to_disk(
    mut attachment: AttachmentDescriptor,
    store: &AttachmentStore,
) -> Result<AttachmentDescriptor> {
    let AttachmentStorage::Inline { data } = &attachment.storage else {
        return Ok(attachment);
    };
    let written = store.write(data).await?;
    attachment.apply_local_write(&written);
    Ok(attachment)
}

/// Record width/height and write a thumbnail (plus a screenshot for video).
/// Media failures are logged and leave the attachment as it was.
pub async fn capture_dimensions_and_screenshot(
    attachment: AttachmentDescriptor,
    ctx: &MigrationContext,
) -> AttachmentDescriptor {
    let is_image = mime::is_image(&attachment.content_type);
    let is_video = mime::is_video(&attachment.content_type);
    if !(is_image || is_video) || !attachment.is_locally_saved() {
        return attachment;
    }
    if attachment
        .screenshot
        .as_ref()
        .is_some_and(|s| s.is_locally_saved())
    {
        return attachment;
    }
    if attachment
        .thumbnail
        .as_ref()
        .is_some_and(|t| t.is_locally_saved())
        && attachment.width.is_some()
    {
        return attachment;
    }

    let result = if is_image {
        capture_image(attachment.clone(), ctx).await
    } else {
        capture_video(attachment.clone(), ctx).await
    };

    match result {
        Ok(captured) => captured,
        Err(StoreError::Unsupported(what)) => {
            debug!(content_type = %attachment.content_type, %what, "skipping media capture");
            attachment
        }
        Err(e) => {
            warn!(
                content_type = %attachment.content_type,
                error = %e,
                "failed to capture dimensions"
            );
            attachment
        }
    }
}

async fn capture_image(
    mut attachment: AttachmentDescriptor,
    ctx: &MigrationContext,
) -> Result<AttachmentDescriptor> {
    let bytes = ctx.attachments.read_attachment(&attachment).await?;
    let (width, height) = ctx.media.image_dimensions(&bytes).await?;
    let thumbnail = write_thumbnail(&bytes, ctx).await?;

    attachment.width = Some(width);
    attachment.height = Some(height);
    attachment.thumbnail = Some(Box::new(thumbnail));
    Ok(attachment)
}

async fn capture_video(
    mut attachment: AttachmentDescriptor,
    ctx: &MigrationContext,
) -> Result<AttachmentDescriptor> {
    let bytes = ctx.attachments.read_attachment(&attachment).await?;
    let frame = ctx.media.make_video_screenshot(&bytes).await?;
    let (width, height) = ctx.media.image_dimensions(&frame).await?;

    let written = ctx.attachments.write(&frame).await?;
    let mut screenshot = AttachmentDescriptor::from_local_write(mime::IMAGE_PNG, &written);
    screenshot.width = Some(width);
    screenshot.height = Some(height);

    let thumbnail = write_thumbnail(&frame, ctx).await?;

    attachment.width = Some(width);
    attachment.height = Some(height);
    attachment.screenshot = Some(Box::new(screenshot));
    attachment.thumbnail = Some(Box::new(thumbnail));
    Ok(attachment)
}

async fn write_thumbnail(source: &[u8], ctx: &MigrationContext) -> Result<AttachmentDescriptor> {
    let png = ctx.media.make_image_thumbnail(source, THUMBNAIL_SIZE).await?;
    let (width, height) = ctx.media.image_dimensions(&png).await?;
    let written = ctx.attachments.write(&png).await?;

    let mut thumbnail = AttachmentDescriptor::from_local_write(mime::IMAGE_PNG, &written);
    thumbnail.width = Some(width);
    thumbnail.height = Some(height);
    Ok(thumbnail)
}

/// Encrypt a plaintext file together with its thumbnail and screenshot.
pub async fn encrypt_legacy(
    attachment: AttachmentDescriptor,
    ctx: &MigrationContext,
) -> AttachmentDescriptor {
    let mut upgraded = ctx.legacy.upgrade(attachment, &ctx.attachments).await;
    if let Some(thumbnail) = upgraded.thumbnail.take() {
        upgraded.thumbnail = Some(Box::new(
            ctx.legacy.upgrade(*thumbnail, &ctx.attachments).await,
        ));
    }
    if let Some(screenshot) = upgraded.screenshot.take() {
        upgraded.screenshot = Some(Box::new(
            ctx.legacy.upgrade(*screenshot, &ctx.attachments).await,
        ));
    }
    upgraded
}

/// Make sure a local attachment that was received over transit can be sent
/// on again with a known digest.
///
/// If the recorded transit key and iv reproduce the recorded digest from the
/// local plaintext nothing changes. Otherwise fresh re-encryption material is
/// generated and stored next to the transit info. Files without a transit
/// digest or no longer on disk are skipped; a file that fails to decrypt is
/// marked as errored.
pub async fn ensure_reencryptable(
    mut attachment: AttachmentDescriptor,
    store: &AttachmentStore,
) -> Result<AttachmentDescriptor> {
    let Some(path) = attachment.path().map(str::to_string) else {
        return Ok(attachment);
    };
    if attachment.reencryption.is_some() {
        return Ok(attachment);
    }
    let Some(transit) = attachment.transit.clone().filter(|t| !t.digest.is_empty()) else {
        return Ok(attachment);
    };
    if !store.exists(&path).await? {
        info!(path = %path, "attachment file does not exist, skipping digest check");
        return Ok(attachment);
    }

    let plaintext = match store.read_attachment(&attachment).await {
        Ok(bytes) => bytes,
        Err(StoreError::AttachmentMissingOnDisk(_)) => return Ok(attachment),
        Err(StoreError::DecryptionFailure { path }) => {
            warn!(path = %path, "local file does not decrypt, marking attachment errored");
            attachment.error = true;
            return Ok(attachment);
        }
        Err(e) => return Err(e),
    };

    if let Some(iv) = &transit.iv {
        if reproduces_digest(&transit.key, iv, &plaintext, &transit.digest) {
            return Ok(attachment);
        }
    }

    let key = crypto::generate_symmetric_key();
    let iv = crypto::generate_nonce();
    let ciphertext = crypto::encrypt_with_nonce(&key, &iv, &plaintext)?;
    attachment.reencryption = Some(ReencryptionInfo {
        key: hex::encode(key),
        iv: hex::encode(iv),
        digest: hex::encode(crypto::attachment_digest(&ciphertext)),
    });
    debug!(path = %path, "generated fresh re-encryption info");
    Ok(attachment)
}

fn reproduces_digest(key_hex: &str, iv_hex: &str, plaintext: &[u8], digest_hex: &str) -> bool {
    let (Ok(key), Ok(iv)) = (crypto::key_from_hex(key_hex), crypto::nonce_from_hex(iv_hex)) else {
        return false;
    };
    crypto::encrypt_with_nonce(&key, &iv, plaintext)
        .map(|ct| hex::encode(crypto::attachment_digest(&ct)) == digest_hex)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TransitInfo;
    use crate::schema::tests::test_context;
    use tempfile::TempDir;

    #[test]
    fn test_unicode_replacement() {
        let attachment = AttachmentDescriptor {
            file_name: Some("abc\u{202E}gpj.exe".into()),
            ..Default::default()
        };
        let v1 = replace_unicode_order_overrides(attachment.clone());
        assert_eq!(v1.file_name.as_deref(), Some("abc\u{FFFD}gpj.exe"));

        let wider = AttachmentDescriptor {
            file_name: Some("a\u{2067}b\u{200F}c\u{061C}d\u{202A}".into()),
            ..Default::default()
        };
        assert_eq!(
            replace_unicode_v2(wider.clone()).file_name.as_deref(),
            Some("a\u{FFFD}b\u{FFFD}c\u{FFFD}d\u{FFFD}")
        );
        // the older filter leaves these alone
        assert_eq!(replace_unicode_order_overrides(wider.clone()), wider);
    }

    #[tokio::test]
    async fn test_inline_data_moves_to_disk() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir);
        let inline = AttachmentDescriptor {
            content_type: "text/plain".into(),
            storage: AttachmentStorage::Inline {
                data: b"inline".to_vec(),
            },
            ..Default::default()
        };

        let moved = migrate_data_to_disk(inline, &ctx.attachments).await.unwrap();
        assert_eq!(moved.version(), Some(2));
        assert_eq!(moved.size, 6);
        assert_eq!(ctx.attachments.read_attachment(&moved).await.unwrap(), b"inline");
    }

    #[tokio::test]
    async fn test_image_capture_writes_thumbnail() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir);
        let written = ctx
            .attachments
            .write(&crate::media::tests::png(400, 200))
            .await
            .unwrap();
        let image = AttachmentDescriptor::from_local_write(mime::IMAGE_PNG, &written);

        let captured = capture_dimensions_and_screenshot(image, &ctx).await;
        assert_eq!((captured.width, captured.height), (Some(400), Some(200)));
        let thumbnail = captured.thumbnail.unwrap();
        assert!(thumbnail.width.unwrap() <= THUMBNAIL_SIZE);
        assert!(ctx.attachments.read_attachment(&thumbnail).await.is_ok());
    }

    #[tokio::test]
    async fn test_video_capture_is_skipped_without_support() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir);
        let written = ctx.attachments.write(b"not really mp4").await.unwrap();
        let video = AttachmentDescriptor::from_local_write("video/mp4", &written);

        let captured = capture_dimensions_and_screenshot(video.clone(), &ctx).await;
        assert_eq!(captured, video);
    }

    #[tokio::test]
    async fn test_reproducible_digest_is_kept() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir);
        let plaintext = b"photo bytes";
        let key = crypto::generate_symmetric_key();
        let iv = crypto::generate_nonce();
        let ciphertext = crypto::encrypt_with_nonce(&key, &iv, plaintext).unwrap();

        let written = ctx.attachments.write(plaintext).await.unwrap();
        let mut attachment = AttachmentDescriptor::from_local_write(mime::IMAGE_JPEG, &written);
        attachment.transit = Some(TransitInfo {
            cdn_key: "cdn".into(),
            key: hex::encode(key),
            digest: hex::encode(crypto::attachment_digest(&ciphertext)),
            iv: Some(hex::encode(iv)),
        });

        let checked = ensure_reencryptable(attachment.clone(), &ctx.attachments)
            .await
            .unwrap();
        assert_eq!(checked, attachment);

        // a digest that cannot be reproduced gets fresh material
        attachment.transit.as_mut().unwrap().digest = "00".repeat(32);
        let repaired = ensure_reencryptable(attachment, &ctx.attachments).await.unwrap();
        let info = repaired.reencryption.unwrap();
        assert_eq!(info.key.len(), 64);
        assert_eq!(info.iv.len(), 48);
    }

    #[tokio::test]
    async fn test_reencryption_skips_missing_files() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir);
        let written = ctx.attachments.write(b"gone").await.unwrap();
        ctx.attachments.delete(&written.path).await.unwrap();

        let mut attachment = AttachmentDescriptor::from_local_write(mime::IMAGE_JPEG, &written);
        attachment.transit = Some(TransitInfo {
            digest: "ab".into(),
            ..Default::default()
        });
        let checked = ensure_reencryptable(attachment.clone(), &ctx.attachments)
            .await
            .unwrap();
        assert_eq!(checked, attachment);
    }
}
