//! # coffer-store
//!
//! Encrypted-at-rest attachment storage and the message schema migration
//! engine.
//!
//! Files live under one root per [`coffer_shared::Disposition`], named by 32
//! random bytes and sharded by a two character prefix. Every file has its
//! own key. Plaintext files written by older versions are upgraded lazily by
//! [`LegacyAttachmentEncryptor`]. Sticker pack state and a few settings are
//! kept in a SQLite [`Database`]; message records belong to the host and are
//! reached through [`repository::MessageRepository`].

pub mod attachment_store;
pub mod backend;
pub mod database;
pub mod flight;
pub mod legacy;
pub mod local_url;
pub mod media;
pub mod migrations;
pub mod models;
pub mod orphans;
pub mod paths;
pub mod repository;
pub mod schema;
pub mod settings;
pub mod stickers;

mod error;

pub use attachment_store::AttachmentStore;
pub use database::Database;
pub use error::{Result, StoreError};
pub use legacy::LegacyAttachmentEncryptor;
pub use local_url::LocalAttachmentUrl;
pub use models::*;
pub use orphans::OrphanTracker;
pub use repository::{SettingsSweepFlag, SharedDatabase};
pub use schema::MigrationContext;
