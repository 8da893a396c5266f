//! Acquisition of remote attachment and sticker bytes.
//!
//! [`AcquisitionQueue`] bounds concurrency and orders work by priority.
//! [`AttachmentDownloader`] and [`StickerPackLifecycle`] sit on top of it and
//! move what they fetch into the local stores.

pub mod attachments;
pub mod error;
pub mod http;
pub mod queue;
pub mod remote;
pub mod retry;
pub mod stickers;

#[cfg(test)]
mod testing;

pub use attachments::{AttachmentDownloader, AttachmentSlot};
pub use error::{NetError, Result};
pub use http::HttpRemoteSource;
pub use queue::{AcquisitionQueue, Priority, QueueConfig, QueueError};
pub use remote::RemoteSource;
pub use retry::RetryPolicy;
pub use stickers::{DownloadSource, StickerConfig, StickerEvent, StickerPackLifecycle};
