//! Small key/value settings table.

use coffer_shared::Disposition;
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::Result;

/// Set while legacy upgrades have left plaintext files behind.
pub const SWEEP_NEEDED_KEY: &str = "cleanup-orphaned-attachments";

/// Sweep flag key for one storage root. Attachments keep the bare key.
pub fn sweep_needed_key(disposition: Disposition) -> String {
    match disposition {
        Disposition::Attachment => SWEEP_NEEDED_KEY.to_string(),
        other => format!("{SWEEP_NEEDED_KEY}-{other}"),
    }
}

impl Database {
    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn()
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn delete_setting(&self, key: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM settings WHERE key = ?1", params![key])?;
        Ok(())
    }
}
