//! SQL DDL for the entry index.
//!
//! Defines the `entries` table, its paired `entries_fts` FTS5 index
//! (external content, shared rowid), and the `index_meta` key/value table.
//! All DDL uses `IF NOT EXISTS` for idempotent initialization.

use rusqlite::Connection;

const SCHEMA_SQL: &str = r#"
-- Indexed memory entries. The embedding BLOB is little-endian f32s;
-- NULL means the entry has not been embedded yet.
CREATE TABLE IF NOT EXISTS entries (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL CHECK(kind IN ('session','note','skill')),
    source_key TEXT NOT NULL UNIQUE,
    title TEXT,
    content TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '[]',
    content_hash TEXT NOT NULL,
    embedding BLOB,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    metadata TEXT
);

CREATE INDEX IF NOT EXISTS idx_entries_kind ON entries(kind);
CREATE INDEX IF NOT EXISTS idx_entries_updated ON entries(updated_at);

-- Full-text search (BM25), kept in the same transaction as every row write.
CREATE VIRTUAL TABLE IF NOT EXISTS entries_fts USING fts5(
    title,
    content,
    id UNINDEXED,
    kind UNINDEXED,
    content='entries',
    content_rowid='rowid'
);

-- Index metadata: schema version, embedding provider identity.
CREATE TABLE IF NOT EXISTS index_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO index_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;
    Ok(())
}
