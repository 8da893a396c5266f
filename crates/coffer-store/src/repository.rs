//! Async persistence seams.
//!
//! Message records belong to the host application and are reached through
//! [`MessageRepository`]. Sticker pack state has a concrete SQLite
//! implementation in [`SharedDatabase`], which also backs the persisted
//! per-root sweep flags and the sticker reference set used by the orphan
//! sweep.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use coffer_shared::{Disposition, PackId};
use tokio::sync::Mutex;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{MessageRecord, Sticker, StickerPack, StickerPackReference, StickerPackStatus};
use crate::orphans::{ReferenceSource, SweepFlagStore};
use crate::settings::sweep_needed_key;

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn get_message(&self, id: &str) -> Result<Option<MessageRecord>>;
    async fn save_message(&self, message: &MessageRecord) -> Result<()>;
}

#[async_trait]
pub trait StickerPackRepository: Send + Sync {
    async fn get_sticker_pack(&self, id: &PackId) -> Result<Option<StickerPack>>;
    async fn list_sticker_packs(&self) -> Result<Vec<StickerPack>>;
    async fn upsert_sticker_pack(&self, pack: &StickerPack) -> Result<()>;
    async fn update_sticker_pack_status(&self, id: &PackId, status: StickerPackStatus)
        -> Result<()>;
    async fn upsert_sticker(&self, sticker: &Sticker) -> Result<()>;
    /// Returns the sticker paths to remove from disk.
    async fn delete_sticker_pack(&self, id: &PackId) -> Result<Vec<String>>;
    async fn add_sticker_pack_reference(&self, reference: &StickerPackReference) -> Result<()>;
    /// Drops the reference row but never the pack.
    async fn remove_sticker_pack_reference(&self, message_id: &str, pack_id: &PackId)
        -> Result<()>;
    /// `Some(paths)` when the last reference went away and the pack was deleted.
    async fn delete_sticker_pack_reference(
        &self,
        message_id: &str,
        pack_id: &PackId,
    ) -> Result<Option<Vec<String>>>;
    async fn take_unresolved_sticker_pack_references(
        &self,
        pack_id: &PackId,
    ) -> Result<Vec<StickerPackReference>>;
}

/// [`Database`] shared between async tasks.
#[derive(Clone)]
pub struct SharedDatabase {
    db: Arc<Mutex<Database>>,
}

impl SharedDatabase {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    pub fn handle(&self) -> Arc<Mutex<Database>> {
        Arc::clone(&self.db)
    }
}

#[async_trait]
impl StickerPackRepository for SharedDatabase {
    async fn get_sticker_pack(&self, id: &PackId) -> Result<Option<StickerPack>> {
        match self.db.lock().await.get_sticker_pack(id) {
            Ok(pack) => Ok(Some(pack)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list_sticker_packs(&self) -> Result<Vec<StickerPack>> {
        self.db.lock().await.list_sticker_packs()
    }

    async fn upsert_sticker_pack(&self, pack: &StickerPack) -> Result<()> {
        self.db.lock().await.upsert_sticker_pack(pack)
    }

    async fn update_sticker_pack_status(
        &self,
        id: &PackId,
        status: StickerPackStatus,
    ) -> Result<()> {
        if !self.db.lock().await.update_sticker_pack_status(id, status)? {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn upsert_sticker(&self, sticker: &Sticker) -> Result<()> {
        self.db.lock().await.upsert_sticker(sticker)
    }

    async fn delete_sticker_pack(&self, id: &PackId) -> Result<Vec<String>> {
        self.db.lock().await.delete_sticker_pack(id)
    }

    async fn add_sticker_pack_reference(&self, reference: &StickerPackReference) -> Result<()> {
        self.db.lock().await.add_sticker_pack_reference(reference)
    }

    async fn remove_sticker_pack_reference(
        &self,
        message_id: &str,
        pack_id: &PackId,
    ) -> Result<()> {
        self.db
            .lock()
            .await
            .remove_sticker_pack_reference(message_id, pack_id)
    }

    async fn delete_sticker_pack_reference(
        &self,
        message_id: &str,
        pack_id: &PackId,
    ) -> Result<Option<Vec<String>>> {
        self.db
            .lock()
            .await
            .delete_sticker_pack_reference(message_id, pack_id)
    }

    async fn take_unresolved_sticker_pack_references(
        &self,
        pack_id: &PackId,
    ) -> Result<Vec<StickerPackReference>> {
        self.db
            .lock()
            .await
            .take_unresolved_sticker_pack_references(pack_id)
    }
}

/// Persisted sweep flag for one storage root.
#[derive(Clone)]
pub struct SettingsSweepFlag {
    db: SharedDatabase,
    key: String,
}

impl SharedDatabase {
    /// Each root gets its own flag so sweeping one never clears another.
    pub fn sweep_flag(&self, disposition: Disposition) -> SettingsSweepFlag {
        SettingsSweepFlag {
            db: self.clone(),
            key: sweep_needed_key(disposition),
        }
    }
}

#[async_trait]
impl SweepFlagStore for SettingsSweepFlag {
    async fn sweep_needed(&self) -> Result<bool> {
        let value = self.db.db.lock().await.get_setting(&self.key)?;
        Ok(value.as_deref() == Some("true"))
    }

    async fn set_sweep_needed(&self, needed: bool) -> Result<()> {
        let db = self.db.db.lock().await;
        if needed {
            db.set_setting(&self.key, "true")
        } else {
            db.delete_setting(&self.key)
        }
    }
}

/// Sticker files referenced by any pack row.
#[async_trait]
impl ReferenceSource for SharedDatabase {
    async fn referenced_paths(&self) -> Result<HashSet<String>> {
        let paths = self.db.lock().await.all_sticker_paths()?;
        Ok(paths.into_iter().collect())
    }
}
