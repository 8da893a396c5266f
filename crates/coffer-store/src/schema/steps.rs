//! The individual upgrade functions, one per schema version.

use coffer_shared::constants::MAX_INLINE_BODY_BYTES;
use coffer_shared::mime;
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::info;

use crate::error::Result;
use crate::models::{AttachmentDescriptor, MessageRecord};

use super::attachments::remove_schema_version;
use super::mapping::{self, AttachmentOp};
use super::MigrationContext;

pub(crate) type StepFuture<'a> = BoxFuture<'a, Result<MessageRecord>>;

fn unchanged<'a>(message: MessageRecord) -> StepFuture<'a> {
    async move { Ok(message) }.boxed()
}

/// Version 0. Inherits the version old clients stamped on the first
/// attachment. Runs unguarded.
pub(crate) fn initialize_schema_version<'a>(
    message: &'a MessageRecord,
    _ctx: &'a MigrationContext,
) -> StepFuture<'a> {
    let mut message = message.clone();
    if message.schema_version < 1 {
        match message.attachments.first().map(|a| a.schema_version.unwrap_or(0)) {
            None => message.schema_version = 0,
            Some(inherited) => {
                message.schema_version = inherited;
                message.attachments = std::mem::take(&mut message.attachments)
                    .into_iter()
                    .map(remove_schema_version)
                    .collect();
            }
        }
    }
    unchanged(message)
}

/// Versions 1, 5 and 11 no longer do anything.
pub(crate) fn noop<'a>(message: &'a MessageRecord, _ctx: &'a MigrationContext) -> StepFuture<'a> {
    unchanged(message.clone())
}

pub(crate) fn sanitize_order_overrides<'a>(
    message: &'a MessageRecord,
    ctx: &'a MigrationContext,
) -> StepFuture<'a> {
    mapping::map_attachments(message.clone(), AttachmentOp::SanitizeOverrides, ctx).boxed()
}

pub(crate) fn write_attachments_to_disk<'a>(
    message: &'a MessageRecord,
    ctx: &'a MigrationContext,
) -> StepFuture<'a> {
    mapping::map_attachments(message.clone(), AttachmentOp::WriteToDisk, ctx).boxed()
}

pub(crate) fn write_quote_thumbnails_to_disk<'a>(
    message: &'a MessageRecord,
    ctx: &'a MigrationContext,
) -> StepFuture<'a> {
    mapping::map_quote_thumbnails(message.clone(), AttachmentOp::WriteToDisk, ctx).boxed()
}

pub(crate) fn write_contact_avatars_to_disk<'a>(
    message: &'a MessageRecord,
    ctx: &'a MigrationContext,
) -> StepFuture<'a> {
    mapping::map_contact_avatars(message.clone(), AttachmentOp::WriteToDisk, ctx).boxed()
}

pub(crate) fn classify_attachments<'a>(
    message: &'a MessageRecord,
    _ctx: &'a MigrationContext,
) -> StepFuture<'a> {
    unchanged(initialize_attachment_metadata(message.clone()))
}

/// Media gallery flags. Voice notes are neither visual media nor files.
pub fn initialize_attachment_metadata(mut message: MessageRecord) -> MessageRecord {
    let attachments = &message.attachments;
    message.has_attachments = !attachments.is_empty();
    message.has_visual_media_attachments =
        attachments.iter().any(AttachmentDescriptor::is_visual_media);
    message.has_file_attachments = attachments.iter().any(AttachmentDescriptor::is_file);
    message
}

pub(crate) fn capture_dimensions<'a>(
    message: &'a MessageRecord,
    ctx: &'a MigrationContext,
) -> StepFuture<'a> {
    mapping::map_attachments(message.clone(), AttachmentOp::CaptureDimensions, ctx).boxed()
}

pub(crate) fn sanitize_bidi_controls<'a>(
    message: &'a MessageRecord,
    ctx: &'a MigrationContext,
) -> StepFuture<'a> {
    mapping::map_attachments(message.clone(), AttachmentOp::SanitizeBidi, ctx).boxed()
}

pub(crate) fn write_previews_and_sticker_to_disk<'a>(
    message: &'a MessageRecord,
    ctx: &'a MigrationContext,
) -> StepFuture<'a> {
    async move {
        let message =
            mapping::map_preview_images(message.clone(), AttachmentOp::WriteToDisk, ctx).await?;
        mapping::map_sticker_data(message, AttachmentOp::WriteToDisk, ctx).await
    }
    .boxed()
}

pub(crate) fn encrypt_legacy_attachments<'a>(
    message: &'a MessageRecord,
    ctx: &'a MigrationContext,
) -> StepFuture<'a> {
    mapping::map_all_attachments(message.clone(), AttachmentOp::EncryptLegacy, ctx).boxed()
}

pub(crate) fn write_long_body_to_disk<'a>(
    message: &'a MessageRecord,
    ctx: &'a MigrationContext,
) -> StepFuture<'a> {
    async move {
        let mut message = message.clone();
        if let Some(written) =
            long_body_attachment(message.body.as_deref(), &message.body_attachment, ctx).await?
        {
            info!(sent_at = message.sent_at, "writing long body to disk");
            message.body_attachment = Some(written);
        }
        for edit in &mut message.edit_history {
            if let Some(written) =
                long_body_attachment(edit.body.as_deref(), &edit.body_attachment, ctx).await?
            {
                edit.body_attachment = Some(written);
            }
        }
        Ok(message)
    }
    .boxed()
}

async fn long_body_attachment(
    body: Option<&str>,
    existing: &Option<AttachmentDescriptor>,
    ctx: &MigrationContext,
) -> Result<Option<AttachmentDescriptor>> {
    if existing.is_some() {
        return Ok(None);
    }
    let Some(body) = body.filter(|b| is_body_too_long(b)) else {
        return Ok(None);
    };
    let written = ctx.attachments.write(body.as_bytes()).await?;
    Ok(Some(AttachmentDescriptor::from_local_write(
        mime::LONG_MESSAGE,
        &written,
    )))
}

pub fn is_body_too_long(body: &str) -> bool {
    body.len() > MAX_INLINE_BODY_BYTES
}

pub(crate) fn ensure_reencryptable<'a>(
    message: &'a MessageRecord,
    ctx: &'a MigrationContext,
) -> StepFuture<'a> {
    mapping::map_all_attachments(message.clone(), AttachmentOp::EnsureReencryptable, ctx).boxed()
}
