//! v002 -- Message references to sticker packs.
//!
//! A pack's files are only deleted once its last reference is gone.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS sticker_references (
    message_id    TEXT NOT NULL,
    pack_id       TEXT NOT NULL,                  -- FK -> sticker_packs(id)
    sticker_id    INTEGER NOT NULL,
    is_unresolved INTEGER NOT NULL DEFAULT 0,     -- boolean 0/1

    PRIMARY KEY (message_id, pack_id),
    FOREIGN KEY (pack_id) REFERENCES sticker_packs(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_sticker_references_pack
    ON sticker_references(pack_id);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
