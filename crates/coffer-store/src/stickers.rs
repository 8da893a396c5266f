use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use coffer_shared::PackId;
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Sticker, StickerPack, StickerPackReference, StickerPackStatus};

const PACK_COLUMNS: &str = "id, key, status, attempted_status, download_attempts, cover_sticker_id,
     sticker_count, title, author, created_at, installed_at";

const STICKER_COLUMNS: &str = "pack_id, id, emoji, path, local_key, size, plaintext_hash,
     content_type, width, height, is_cover_only";

impl Database {
    /// Insert or update the pack row. Stickers are stored separately.
    pub fn upsert_sticker_pack(&self, pack: &StickerPack) -> Result<()> {
        self.conn().execute(
            "INSERT INTO sticker_packs (id, key, status, attempted_status, download_attempts,
                 cover_sticker_id, sticker_count, title, author, created_at, installed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(id) DO UPDATE SET
                 key = excluded.key,
                 status = excluded.status,
                 attempted_status = excluded.attempted_status,
                 download_attempts = excluded.download_attempts,
                 cover_sticker_id = excluded.cover_sticker_id,
                 sticker_count = excluded.sticker_count,
                 title = excluded.title,
                 author = excluded.author,
                 installed_at = excluded.installed_at",
            params![
                pack.id.as_str(),
                pack.key,
                pack.status.as_str(),
                pack.attempted_status.map(|s| s.as_str()),
                pack.download_attempts,
                pack.cover_sticker_id,
                pack.sticker_count,
                pack.title,
                pack.author,
                pack.created_at.to_rfc3339(),
                pack.installed_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub fn get_sticker_pack(&self, id: &PackId) -> Result<StickerPack> {
        let mut pack = self
            .conn()
            .query_row(
                &format!("SELECT {PACK_COLUMNS} FROM sticker_packs WHERE id = ?1"),
                params![id.as_str()],
                row_to_pack,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })??;
        pack.stickers = self.list_stickers(id)?;
        Ok(pack)
    }

    pub fn list_sticker_packs(&self) -> Result<Vec<StickerPack>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {PACK_COLUMNS} FROM sticker_packs ORDER BY created_at ASC"
        ))?;
        let rows = stmt.query_map([], row_to_pack)?;

        let mut packs = Vec::new();
        for row in rows {
            let mut pack = row??;
            pack.stickers = self.list_stickers(&pack.id)?;
            packs.push(pack);
        }
        Ok(packs)
    }

    /// Set the status; `installed_at` follows installed/not installed.
    pub fn update_sticker_pack_status(&self, id: &PackId, status: StickerPackStatus) -> Result<bool> {
        let installed_at = (status == StickerPackStatus::Installed).then(|| Utc::now().to_rfc3339());
        let affected = self.conn().execute(
            "UPDATE sticker_packs SET status = ?2, installed_at = ?3 WHERE id = ?1",
            params![id.as_str(), status.as_str(), installed_at],
        )?;
        Ok(affected > 0)
    }

    pub fn upsert_sticker(&self, sticker: &Sticker) -> Result<()> {
        self.conn().execute(
            &format!(
                "INSERT OR REPLACE INTO stickers ({STICKER_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                sticker.pack_id.as_str(),
                sticker.id,
                sticker.emoji,
                sticker.path,
                sticker.local_key,
                sticker.size as i64,
                sticker.plaintext_hash,
                sticker.content_type,
                sticker.width,
                sticker.height,
                sticker.is_cover_only as i32,
            ],
        )?;
        Ok(())
    }

    pub fn list_stickers(&self, pack_id: &PackId) -> Result<BTreeMap<u32, Sticker>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {STICKER_COLUMNS} FROM stickers WHERE pack_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![pack_id.as_str()], row_to_sticker)?;

        let mut stickers = BTreeMap::new();
        for row in rows {
            let sticker = row??;
            stickers.insert(sticker.id, sticker);
        }
        Ok(stickers)
    }

    /// Every sticker file path, across all packs.
    pub fn all_sticker_paths(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn().prepare("SELECT path FROM stickers")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut paths = Vec::new();
        for row in rows {
            paths.push(row?);
        }
        Ok(paths)
    }

    /// Delete the pack (cascading to stickers and references) and return the
    /// sticker paths the caller should remove from disk.
    pub fn delete_sticker_pack(&self, id: &PackId) -> Result<Vec<String>> {
        let tx = self.conn().unchecked_transaction()?;
        let paths = sticker_paths(&tx, id)?;
        tx.execute("DELETE FROM sticker_packs WHERE id = ?1", params![id.as_str()])?;
        tx.commit()?;
        Ok(paths)
    }

    pub fn add_sticker_pack_reference(&self, reference: &StickerPackReference) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO sticker_references (message_id, pack_id, sticker_id, is_unresolved)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                reference.message_id,
                reference.pack_id.as_str(),
                reference.sticker_id,
                reference.is_unresolved as i32,
            ],
        )?;
        Ok(())
    }

    /// Remove one message's reference and nothing else.
    pub fn remove_sticker_pack_reference(&self, message_id: &str, pack_id: &PackId) -> Result<()> {
        self.conn().execute(
            "DELETE FROM sticker_references WHERE message_id = ?1 AND pack_id = ?2",
            params![message_id, pack_id.as_str()],
        )?;
        Ok(())
    }

    /// Remove one message's reference. When it was the last one and the pack
    /// is not installed, the pack is deleted and its sticker paths returned.
    pub fn delete_sticker_pack_reference(
        &self,
        message_id: &str,
        pack_id: &PackId,
    ) -> Result<Option<Vec<String>>> {
        let tx = self.conn().unchecked_transaction()?;

        tx.execute(
            "DELETE FROM sticker_references WHERE message_id = ?1 AND pack_id = ?2",
            params![message_id, pack_id.as_str()],
        )?;

        let remaining: i64 = tx.query_row(
            "SELECT count(1) FROM sticker_references WHERE pack_id = ?1",
            params![pack_id.as_str()],
            |row| row.get(0),
        )?;
        if remaining > 0 {
            tx.commit()?;
            return Ok(None);
        }

        let status: Option<String> = tx
            .query_row(
                "SELECT status FROM sticker_packs WHERE id = ?1",
                params![pack_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(status) = status else {
            tracing::warn!(pack = %pack_id.redacted(), "reference pointed at unknown pack");
            tx.commit()?;
            return Ok(None);
        };
        if status == StickerPackStatus::Installed.as_str() {
            tx.commit()?;
            return Ok(None);
        }

        let paths = sticker_paths(&tx, pack_id)?;
        tx.execute(
            "DELETE FROM sticker_packs WHERE id = ?1",
            params![pack_id.as_str()],
        )?;
        tx.commit()?;
        Ok(Some(paths))
    }

    /// Unresolved references for a pack, marked resolved in the same step.
    pub fn take_unresolved_sticker_pack_references(
        &self,
        pack_id: &PackId,
    ) -> Result<Vec<StickerPackReference>> {
        let tx = self.conn().unchecked_transaction()?;
        let refs = {
            let mut stmt = tx.prepare(
                "SELECT message_id, sticker_id FROM sticker_references
                 WHERE pack_id = ?1 AND is_unresolved = 1",
            )?;
            let rows = stmt.query_map(params![pack_id.as_str()], |row| {
                Ok(StickerPackReference {
                    message_id: row.get(0)?,
                    pack_id: pack_id.clone(),
                    sticker_id: row.get(1)?,
                    is_unresolved: true,
                })
            })?;
            let mut refs = Vec::new();
            for row in rows {
                refs.push(row?);
            }
            refs
        };
        tx.execute(
            "UPDATE sticker_references SET is_unresolved = 0 WHERE pack_id = ?1",
            params![pack_id.as_str()],
        )?;
        tx.commit()?;
        Ok(refs)
    }

    pub fn count_sticker_pack_references(&self, pack_id: &PackId) -> Result<u32> {
        let count: i64 = self.conn().query_row(
            "SELECT count(1) FROM sticker_references WHERE pack_id = ?1",
            params![pack_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }
}

fn sticker_paths(conn: &rusqlite::Connection, pack_id: &PackId) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT path FROM stickers WHERE pack_id = ?1")?;
    let rows = stmt.query_map(params![pack_id.as_str()], |row| row.get::<_, String>(0))?;
    let mut paths = Vec::new();
    for row in rows {
        paths.push(row?);
    }
    Ok(paths)
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

fn parse_status(s: &str) -> Result<StickerPackStatus> {
    StickerPackStatus::parse(s)
        .ok_or_else(|| StoreError::Migration(format!("unknown sticker pack status {s:?}")))
}

// Row mapping can fail on our own validation, hence the nested Result.
fn row_to_pack(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<StickerPack>> {
    let id: String = row.get(0)?;
    let key: String = row.get(1)?;
    let status: String = row.get(2)?;
    let attempted_status: Option<String> = row.get(3)?;
    let download_attempts: u32 = row.get(4)?;
    let cover_sticker_id: Option<u32> = row.get(5)?;
    let sticker_count: u32 = row.get(6)?;
    let title: String = row.get(7)?;
    let author: String = row.get(8)?;
    let created_at: String = row.get(9)?;
    let installed_at: Option<String> = row.get(10)?;

    Ok((|| -> Result<StickerPack> {
        Ok(StickerPack {
            id: PackId::parse(&id)?,
            key,
            status: parse_status(&status)?,
            attempted_status: attempted_status.as_deref().map(parse_status).transpose()?,
            download_attempts,
            cover_sticker_id,
            sticker_count,
            title,
            author,
            created_at: parse_time(&created_at)?,
            installed_at: installed_at.as_deref().map(parse_time).transpose()?,
            stickers: BTreeMap::new(),
        })
    })())
}

fn row_to_sticker(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<Sticker>> {
    let pack_id: String = row.get(0)?;
    let id: u32 = row.get(1)?;
    let emoji: Option<String> = row.get(2)?;
    let path: String = row.get(3)?;
    let local_key: Option<String> = row.get(4)?;
    let size: i64 = row.get(5)?;
    let plaintext_hash: Option<String> = row.get(6)?;
    let content_type: Option<String> = row.get(7)?;
    let width: u32 = row.get(8)?;
    let height: u32 = row.get(9)?;
    let is_cover_only: i32 = row.get(10)?;

    Ok(PackId::parse(&pack_id)
        .map_err(StoreError::from)
        .map(|pack_id| Sticker {
            id,
            pack_id,
            emoji,
            path,
            local_key,
            size: size as u64,
            plaintext_hash,
            content_type,
            width,
            height,
            is_cover_only: is_cover_only != 0,
        }))
}
