//! Walks every attachment-bearing location of a message, edit history
//! included, applying one [`AttachmentOp`].

use std::mem;

use futures::future::try_join_all;

use crate::error::{Result, StoreError};
use crate::models::{AttachmentDescriptor, LinkPreview, MessageRecord, Quote};

use super::attachments;
use super::MigrationContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AttachmentOp {
    SanitizeOverrides,
    SanitizeBidi,
    WriteToDisk,
    CaptureDimensions,
    EncryptLegacy,
    EnsureReencryptable,
}

pub(crate) async fn apply(
    op: AttachmentOp,
    attachment: AttachmentDescriptor,
    ctx: &MigrationContext,
) -> Result<AttachmentDescriptor> {
    match op {
        AttachmentOp::SanitizeOverrides => {
            Ok(attachments::replace_unicode_order_overrides(attachment))
        }
        AttachmentOp::SanitizeBidi => Ok(attachments::replace_unicode_v2(attachment)),
        AttachmentOp::WriteToDisk => {
            attachments::migrate_data_to_disk(attachment, &ctx.attachments).await
        }
        AttachmentOp::CaptureDimensions => {
            Ok(attachments::capture_dimensions_and_screenshot(attachment, ctx).await)
        }
        AttachmentOp::EncryptLegacy => Ok(attachments::encrypt_legacy(attachment, ctx).await),
        AttachmentOp::EnsureReencryptable => {
            attachments::ensure_reencryptable(attachment, &ctx.attachments).await
        }
    }
}

async fn map_list(
    list: Vec<AttachmentDescriptor>,
    op: AttachmentOp,
    ctx: &MigrationContext,
) -> Result<Vec<AttachmentDescriptor>> {
    try_join_all(list.into_iter().map(|a| apply(op, a, ctx))).await
}

async fn map_one(
    attachment: Option<AttachmentDescriptor>,
    op: AttachmentOp,
    ctx: &MigrationContext,
) -> Result<Option<AttachmentDescriptor>> {
    match attachment {
        Some(a) => Ok(Some(apply(op, a, ctx).await?)),
        None => Ok(None),
    }
}

async fn map_quote(
    quote: Option<Quote>,
    op: AttachmentOp,
    ctx: &MigrationContext,
) -> Result<Option<Quote>> {
    let Some(mut quote) = quote else {
        return Ok(None);
    };
    let quoted = mem::take(&mut quote.attachments);
    quote.attachments = try_join_all(quoted.into_iter().map(|mut q| async move {
        q.thumbnail = map_one(q.thumbnail.take(), op, ctx).await?;
        Ok::<_, StoreError>(q)
    }))
    .await?;
    Ok(Some(quote))
}

async fn map_previews(
    previews: Vec<LinkPreview>,
    op: AttachmentOp,
    ctx: &MigrationContext,
) -> Result<Vec<LinkPreview>> {
    try_join_all(previews.into_iter().map(|mut p| async move {
        p.image = map_one(p.image.take(), op, ctx).await?;
        Ok::<_, StoreError>(p)
    }))
    .await
}

pub(crate) async fn map_attachments(
    mut message: MessageRecord,
    op: AttachmentOp,
    ctx: &MigrationContext,
) -> Result<MessageRecord> {
    message.attachments = map_list(mem::take(&mut message.attachments), op, ctx).await?;
    for edit in &mut message.edit_history {
        edit.attachments = map_list(mem::take(&mut edit.attachments), op, ctx).await?;
    }
    Ok(message)
}

pub(crate) async fn map_quote_thumbnails(
    mut message: MessageRecord,
    op: AttachmentOp,
    ctx: &MigrationContext,
) -> Result<MessageRecord> {
    message.quote = map_quote(message.quote.take(), op, ctx).await?;
    for edit in &mut message.edit_history {
        edit.quote = map_quote(edit.quote.take(), op, ctx).await?;
    }
    Ok(message)
}

pub(crate) async fn map_contact_avatars(
    mut message: MessageRecord,
    op: AttachmentOp,
    ctx: &MigrationContext,
) -> Result<MessageRecord> {
    for contact in &mut message.contact {
        if let Some(avatar) = contact.avatar.as_mut() {
            avatar.avatar = map_one(avatar.avatar.take(), op, ctx).await?;
        }
    }
    Ok(message)
}

pub(crate) async fn map_preview_images(
    mut message: MessageRecord,
    op: AttachmentOp,
    ctx: &MigrationContext,
) -> Result<MessageRecord> {
    message.preview = map_previews(mem::take(&mut message.preview), op, ctx).await?;
    for edit in &mut message.edit_history {
        edit.preview = map_previews(mem::take(&mut edit.preview), op, ctx).await?;
    }
    Ok(message)
}

pub(crate) async fn map_sticker_data(
    mut message: MessageRecord,
    op: AttachmentOp,
    ctx: &MigrationContext,
) -> Result<MessageRecord> {
    if let Some(sticker) = message.sticker.as_mut() {
        sticker.data = map_one(sticker.data.take(), op, ctx).await?;
    }
    Ok(message)
}

pub(crate) async fn map_body_attachments(
    mut message: MessageRecord,
    op: AttachmentOp,
    ctx: &MigrationContext,
) -> Result<MessageRecord> {
    message.body_attachment = map_one(message.body_attachment.take(), op, ctx).await?;
    for edit in &mut message.edit_history {
        edit.body_attachment = map_one(edit.body_attachment.take(), op, ctx).await?;
    }
    Ok(message)
}

/// Every location at once.
pub(crate) async fn map_all_attachments(
    message: MessageRecord,
    op: AttachmentOp,
    ctx: &MigrationContext,
) -> Result<MessageRecord> {
    let message = map_attachments(message, op, ctx).await?;
    let message = map_quote_thumbnails(message, op, ctx).await?;
    let message = map_preview_images(message, op, ctx).await?;
    let message = map_contact_avatars(message, op, ctx).await?;
    let message = map_sticker_data(message, op, ctx).await?;
    map_body_attachments(message, op, ctx).await
}
