//! Attachment handling outside the ladder: freshly downloaded attachments
//! and stickers, hydration and deletion.

use tracing::debug;

use crate::error::Result;
use crate::models::{AttachmentDescriptor, LocalWrite, MessageRecord};

use super::attachments::{capture_dimensions_and_screenshot, ensure_reencryptable};
use super::MigrationContext;

/// Post-download processing for an attachment that arrived out of band.
pub async fn process_new_attachment(
    attachment: AttachmentDescriptor,
    ctx: &MigrationContext,
) -> Result<AttachmentDescriptor> {
    let attachment = if attachment.is_locally_saved() {
        ensure_reencryptable(attachment, &ctx.attachments).await?
    } else {
        attachment
    };
    Ok(capture_dimensions_and_screenshot(attachment, ctx).await)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedSticker {
    pub write: LocalWrite,
    pub width: u32,
    pub height: u32,
}

/// Store downloaded sticker bytes. Ephemeral (preview) stickers go to the
/// temporary store so they never mix with installed packs.
pub async fn process_new_sticker(
    data: &[u8],
    is_ephemeral: bool,
    ctx: &MigrationContext,
) -> Result<ProcessedSticker> {
    let (width, height) = ctx.media.image_dimensions(data).await?;
    let store = if is_ephemeral { &ctx.temp } else { &ctx.stickers };
    let write = store.write(data).await?;
    Ok(ProcessedSticker {
        write,
        width,
        height,
    })
}

pub async fn load_attachment_data(
    attachment: &AttachmentDescriptor,
    ctx: &MigrationContext,
) -> Result<Vec<u8>> {
    ctx.attachments.read_attachment(attachment).await
}

/// Relative paths of every file a message owns. Quote thumbnails copied from
/// another message are not owned and are left out.
pub fn external_file_paths(message: &MessageRecord) -> Vec<String> {
    let mut paths = Vec::new();

    fn with_derived(attachment: &AttachmentDescriptor, paths: &mut Vec<String>) {
        paths.extend(attachment.path().map(str::to_string));
        for derived in [&attachment.thumbnail, &attachment.screenshot]
            .into_iter()
            .flatten()
        {
            paths.extend(derived.path().map(str::to_string));
        }
    }

    for attachment in &message.attachments {
        with_derived(attachment, &mut paths);
    }
    if let Some(body) = &message.body_attachment {
        with_derived(body, &mut paths);
    }
    if let Some(quote) = &message.quote {
        for thumbnail in quote.attachments.iter().filter_map(|q| q.thumbnail.as_ref()) {
            if !thumbnail.copied {
                paths.extend(thumbnail.path().map(str::to_string));
            }
        }
    }
    for avatar in message
        .contact
        .iter()
        .filter_map(|c| c.avatar.as_ref()?.avatar.as_ref())
    {
        paths.extend(avatar.path().map(str::to_string));
    }
    for image in message.preview.iter().filter_map(|p| p.image.as_ref()) {
        with_derived(image, &mut paths);
    }
    if let Some(data) = message.sticker.as_ref().and_then(|s| s.data.as_ref()) {
        with_derived(data, &mut paths);
    }
    for edit in &message.edit_history {
        for attachment in &edit.attachments {
            with_derived(attachment, &mut paths);
        }
        if let Some(body) = &edit.body_attachment {
            with_derived(body, &mut paths);
        }
        for image in edit.preview.iter().filter_map(|p| p.image.as_ref()) {
            with_derived(image, &mut paths);
        }
    }

    paths
}

/// Remove every file [`external_file_paths`] lists.
pub async fn delete_all_external_files(
    message: &MessageRecord,
    ctx: &MigrationContext,
) -> Result<usize> {
    let paths = external_file_paths(message);
    for path in &paths {
        ctx.attachments.delete(path).await?;
    }
    debug!(id = %message.id, count = paths.len(), "deleted message files");
    Ok(paths.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::tests::png;
    use crate::models::{Quote, QuotedAttachment};
    use crate::schema::tests::test_context;
    use coffer_shared::mime;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_new_sticker_lands_in_the_right_store() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir);

        let installed = process_new_sticker(&png(512, 512), false, &ctx).await.unwrap();
        assert_eq!((installed.width, installed.height), (512, 512));
        assert!(ctx.stickers.exists(&installed.write.path).await.unwrap());

        let preview = process_new_sticker(&png(64, 64), true, &ctx).await.unwrap();
        assert!(ctx.temp.exists(&preview.write.path).await.unwrap());
        assert!(!ctx.stickers.exists(&preview.write.path).await.unwrap());
    }

    #[tokio::test]
    async fn test_new_image_attachment_gets_dimensions() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir);
        let written = ctx.attachments.write(&png(20, 10)).await.unwrap();

        let processed = process_new_attachment(
            AttachmentDescriptor::from_local_write(mime::IMAGE_PNG, &written),
            &ctx,
        )
        .await
        .unwrap();
        assert_eq!(processed.width, Some(20));
        assert!(processed.thumbnail.is_some());
    }

    #[tokio::test]
    async fn test_delete_skips_copied_quote_thumbnails() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir);
        let own = ctx.attachments.write(b"own").await.unwrap();
        let copied = ctx.attachments.write(b"copied").await.unwrap();

        let mut copied_thumb = AttachmentDescriptor::from_local_write(mime::IMAGE_PNG, &copied);
        copied_thumb.copied = true;
        let message = MessageRecord {
            id: "m".into(),
            attachments: vec![AttachmentDescriptor::from_local_write("application/pdf", &own)],
            quote: Some(Quote {
                attachments: vec![QuotedAttachment {
                    content_type: mime::IMAGE_PNG.into(),
                    file_name: None,
                    thumbnail: Some(copied_thumb),
                }],
                ..Default::default()
            }),
            ..Default::default()
        };

        assert_eq!(delete_all_external_files(&message, &ctx).await.unwrap(), 1);
        assert!(!ctx.attachments.exists(&own.path).await.unwrap());
        assert!(ctx.attachments.exists(&copied.path).await.unwrap());
    }
}
