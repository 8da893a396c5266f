//! Message schema migrations.
//!
//! A message record carries `schema_version`. [`STEPS`] is the ordered
//! ladder of upgrades; step `i` only runs on a record at version `i - 1` and
//! stamps `i` on success. [`upgrade_schema`] walks the ladder and keeps
//! whatever progress it made when a later step fails.
//!
//! | version | upgrade |
//! |---|---|
//! | 0  | initialize schema version |
//! | 1  | no-op |
//! | 2  | sanitize LRO/RLO in file names |
//! | 3  | inline attachment bytes to disk |
//! | 4  | quote thumbnails to disk |
//! | 5  | no-op |
//! | 6  | contact avatars to disk |
//! | 7  | attachment classification flags |
//! | 8  | dimensions, thumbnails, screenshots |
//! | 9  | sanitize all bidi controls in file names |
//! | 10 | link preview images and sticker data to disk |
//! | 11 | no-op |
//! | 12 | encrypt legacy plaintext files |
//! | 13 | long body to a body attachment |
//! | 14 | ensure attachments are re-encryptable |

mod attachments;
mod context;
mod files;
mod mapping;
mod steps;

use tracing::{error, warn};

use crate::error::{Result, StoreError};
use crate::models::MessageRecord;

pub use attachments::{
    capture_dimensions_and_screenshot, ensure_reencryptable, replace_unicode_order_overrides,
    replace_unicode_v2, REPLACEMENT_CHARACTER,
};
pub use context::MigrationContext;
pub use files::{
    delete_all_external_files, external_file_paths, load_attachment_data,
    process_new_attachment, process_new_sticker, ProcessedSticker,
};
pub use steps::{initialize_attachment_metadata, is_body_too_long};

/// One rung of the ladder.
pub type UpgradeFn =
    for<'a> fn(&'a MessageRecord, &'a MigrationContext) -> steps::StepFuture<'a>;

#[derive(Clone, Copy)]
pub struct SchemaStep {
    pub version: u32,
    pub name: &'static str,
    pub upgrade: UpgradeFn,
}

impl std::fmt::Debug for SchemaStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaStep")
            .field("version", &self.version)
            .field("name", &self.name)
            .finish()
    }
}

pub const CURRENT_SCHEMA_VERSION: u32 = 14;

/// Records below this still lack dimensions and thumbnails.
pub const VERSION_NEEDED_FOR_DISPLAY: u32 = 9;

pub static STEPS: [SchemaStep; 15] = [
    SchemaStep { version: 0, name: "initialize", upgrade: steps::initialize_schema_version },
    SchemaStep { version: 1, name: "auto-orient", upgrade: steps::noop },
    SchemaStep { version: 2, name: "sanitize-overrides", upgrade: steps::sanitize_order_overrides },
    SchemaStep { version: 3, name: "attachments-to-disk", upgrade: steps::write_attachments_to_disk },
    SchemaStep { version: 4, name: "quote-thumbnails-to-disk", upgrade: steps::write_quote_thumbnails_to_disk },
    SchemaStep { version: 5, name: "classification-v1", upgrade: steps::noop },
    SchemaStep { version: 6, name: "contact-avatars-to-disk", upgrade: steps::write_contact_avatars_to_disk },
    SchemaStep { version: 7, name: "classification", upgrade: steps::classify_attachments },
    SchemaStep { version: 8, name: "dimensions", upgrade: steps::capture_dimensions },
    SchemaStep { version: 9, name: "sanitize-bidi", upgrade: steps::sanitize_bidi_controls },
    SchemaStep { version: 10, name: "previews-and-sticker-to-disk", upgrade: steps::write_previews_and_sticker_to_disk },
    SchemaStep { version: 11, name: "plaintext-hash", upgrade: steps::noop },
    SchemaStep { version: 12, name: "encrypt-legacy", upgrade: steps::encrypt_legacy_attachments },
    SchemaStep { version: 13, name: "body-attachment", upgrade: steps::write_long_body_to_disk },
    SchemaStep { version: 14, name: "reencryptable", upgrade: steps::ensure_reencryptable },
];

pub fn is_up_to_date(message: &MessageRecord) -> bool {
    message.schema_version >= CURRENT_SCHEMA_VERSION
}

/// Run one step behind the version guard.
///
/// `Ok(None)` means the step did not apply: the record is already past it,
/// or sits at an unexpected version. Version 0 always runs.
pub async fn run_step(
    step: &SchemaStep,
    message: &MessageRecord,
    ctx: &MigrationContext,
) -> Result<Option<MessageRecord>> {
    if step.version == 0 {
        return (step.upgrade)(message, ctx).await.map(Some);
    }
    if message.schema_version >= step.version {
        return Ok(None);
    }

    let expected = step.version - 1;
    if message.schema_version != expected {
        warn!(
            id = %message.id,
            expected,
            actual = message.schema_version,
            "unexpected schema version, not upgrading"
        );
        return Ok(None);
    }

    match (step.upgrade)(message, ctx).await {
        Ok(mut upgraded) => {
            upgraded.schema_version = step.version;
            Ok(Some(upgraded))
        }
        Err(e) => {
            error!(
                id = %message.id,
                version = step.version,
                step = step.name,
                error = %e,
                "schema step failed"
            );
            Err(StoreError::MigrationStepFailure {
                version: step.version,
                name: step.name,
                reason: e.to_string(),
            })
        }
    }
}

/// Walk [`STEPS`] up to `max_version`.
pub async fn upgrade_schema(
    message: MessageRecord,
    ctx: &MigrationContext,
    max_version: u32,
) -> Result<MessageRecord> {
    upgrade_schema_with(message, ctx, &STEPS, max_version).await
}

/// Walk `steps` up to `max_version`.
///
/// A failing step stops the walk. If nothing had been gained since the call
/// started the error is returned; otherwise the record comes back at the
/// last version that succeeded and the next call resumes from there.
pub async fn upgrade_schema_with(
    mut message: MessageRecord,
    ctx: &MigrationContext,
    steps: &[SchemaStep],
    max_version: u32,
) -> Result<MessageRecord> {
    let starting_version = message.schema_version;

    for step in steps.iter().take_while(|s| s.version <= max_version) {
        match run_step(step, &message, ctx).await {
            Ok(Some(upgraded)) => message = upgraded,
            Ok(None) => {}
            Err(e) if message.schema_version == starting_version => return Err(e),
            Err(_) => {
                error!(
                    id = %message.id,
                    from = starting_version,
                    to = message.schema_version,
                    failed_at = step.version,
                    "kept partial schema upgrade"
                );
                break;
            }
        }
    }

    Ok(message)
}
