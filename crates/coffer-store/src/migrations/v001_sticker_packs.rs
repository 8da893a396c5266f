//! v001 -- Sticker packs, stickers and settings.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Sticker packs
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS sticker_packs (
    id                TEXT PRIMARY KEY NOT NULL,  -- 32 hex chars
    key               TEXT NOT NULL,              -- hex pack key
    status            TEXT NOT NULL,              -- known | pending | downloaded | installed | error
    attempted_status  TEXT,
    download_attempts INTEGER NOT NULL DEFAULT 0,
    cover_sticker_id  INTEGER,
    sticker_count     INTEGER NOT NULL DEFAULT 0,
    title             TEXT NOT NULL DEFAULT '',
    author            TEXT NOT NULL DEFAULT '',
    created_at        TEXT NOT NULL,              -- RFC-3339
    installed_at      TEXT
);

-- ----------------------------------------------------------------
-- Stickers (files live under stickers.noindex)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS stickers (
    pack_id        TEXT NOT NULL,                 -- FK -> sticker_packs(id)
    id             INTEGER NOT NULL,
    emoji          TEXT,
    path           TEXT NOT NULL,                 -- relative to the sticker root
    local_key      TEXT,                          -- NULL for legacy plaintext files
    size           INTEGER NOT NULL,
    plaintext_hash TEXT,
    content_type   TEXT,
    width          INTEGER NOT NULL,
    height         INTEGER NOT NULL,
    is_cover_only  INTEGER NOT NULL DEFAULT 0,   -- boolean 0/1

    PRIMARY KEY (pack_id, id),
    FOREIGN KEY (pack_id) REFERENCES sticker_packs(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Settings (small key/value flags)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS settings (
    key   TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
