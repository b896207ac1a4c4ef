use std::collections::HashMap;
use std::path::Path;

use rusqlite::Connection;
use serde::Serialize;

use crate::error::Result;

/// Snapshot of index health and size.
#[derive(Debug, Serialize)]
pub struct StoreStats {
    pub total_entries: u64,
    pub by_kind: HashMap<String, u64>,
    /// Entries that currently carry an embedding.
    pub embedded_entries: u64,
    /// `embedded_entries / total_entries`, 1.0 for an empty index.
    pub embedding_coverage: f64,
    pub db_size_bytes: u64,
}

/// Compute store statistics. `db_path` is used for on-disk size; pass `None`
/// for in-memory databases.
pub fn store_stats(conn: &Connection, db_path: Option<&Path>) -> Result<StoreStats> {
    let total: i64 = conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
    let embedded: i64 = conn.query_row(
        "SELECT COUNT(*) FROM entries WHERE embedding IS NOT NULL",
        [],
        |row| row.get(0),
    )?;

    let mut by_kind = HashMap::new();
    for kind in ["session", "note", "skill"] {
        by_kind.insert(kind.to_string(), 0);
    }
    let mut stmt = conn.prepare("SELECT kind, COUNT(*) FROM entries GROUP BY kind")?;
    let rows: Vec<(String, i64)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<_, _>>()?;
    for (kind, count) in rows {
        by_kind.insert(kind, count as u64);
    }

    let db_size_bytes = db_path
        .and_then(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .unwrap_or(0);

    let embedding_coverage = if total == 0 {
        1.0
    } else {
        embedded as f64 / total as f64
    };

    Ok(StoreStats {
        total_entries: total as u64,
        by_kind,
        embedded_entries: embedded as u64,
        embedding_coverage,
        db_size_bytes,
    })
}
