//! Write path and row access for the entry index.
//!
//! [`MemoryStore`] owns the SQLite connection and the embedding provider.
//! Every upsert writes the row and the paired FTS5 index inside one
//! transaction; the two never diverge. `source_key` is unique per origin,
//! so reindexing a source overwrites in place and the entry id is reused.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::db;
use crate::embedding::EmbeddingProvider;
use crate::error::{MemoryError, Result};
use crate::memory::types::{EntryKind, MemoryEntry, NewEntry};
use crate::memory::{bytes_to_embedding, embedding_to_bytes};

pub struct MemoryStore {
    conn: Arc<Mutex<Connection>>,
    provider: Arc<dyn EmbeddingProvider>,
    db_path: Option<PathBuf>,
}

impl MemoryStore {
    /// Open (or create) the index at `path` with the given provider.
    ///
    /// The provider identity is recorded in `index_meta`. If the index was
    /// built by a different provider, all cached embeddings are dropped and
    /// re-embedded by the next sync — cosine similarity across provider
    /// spaces is meaningless.
    pub fn open(path: impl Into<PathBuf>, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let path = path.into();
        let conn = db::open_database(&path)?;
        reconcile_provider_meta(&conn, &provider)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            provider,
            db_path: Some(path),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory(provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let conn = db::open_memory_database()?;
        reconcile_provider_meta(&conn, &provider)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            provider,
            db_path: None,
        })
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| MemoryError::LockPoisoned)
    }

    pub(crate) fn conn_handle(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    /// Insert or overwrite the entry for `source_key`.
    ///
    /// Computes an embedding when the caller did not supply one, then writes
    /// the row and updates the FTS index in a single transaction. Either
    /// failing fails the whole upsert.
    pub async fn upsert(&self, mut entry: NewEntry) -> Result<MemoryEntry> {
        let content_hash = sha256_hex(&entry.content);
        let embedding = match entry.embedding.take() {
            Some(v) => v,
            None => self.provider.embed(&entry.content).await?,
        };

        let now = Utc::now();
        let tags_json = serde_json::to_string(&entry.tags)?;
        let metadata_json = entry
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let embedding_bytes = embedding_to_bytes(&embedding);

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        // Existing row for this source? Reuse id and created_at.
        let existing: Option<(String, String, i64, Option<String>, String)> = tx
            .query_row(
                "SELECT id, created_at, rowid, title, content FROM entries WHERE source_key = ?1",
                params![entry.source_key],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                },
            )
            .optional()?;

        let (id, created_at) = if let Some((id, created_at, rowid, old_title, old_content)) =
            existing
        {
            // External-content FTS5 requires deleting the old document
            // before the row changes.
            tx.execute(
                "INSERT INTO entries_fts (entries_fts, rowid, title, content, id, kind) \
                 VALUES ('delete', ?1, ?2, ?3, ?4, ?5)",
                params![rowid, old_title, old_content, id, entry.kind.as_str()],
            )?;
            tx.execute(
                "UPDATE entries SET kind = ?1, title = ?2, content = ?3, tags = ?4, \
                 content_hash = ?5, embedding = ?6, updated_at = ?7, metadata = ?8 \
                 WHERE id = ?9",
                params![
                    entry.kind.as_str(),
                    entry.title,
                    entry.content,
                    tags_json,
                    content_hash,
                    embedding_bytes,
                    now.to_rfc3339(),
                    metadata_json,
                    id,
                ],
            )?;
            tx.execute(
                "INSERT INTO entries_fts (rowid, title, content, id, kind) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![rowid, entry.title, entry.content, id, entry.kind.as_str()],
            )?;
            debug!(source_key = %entry.source_key, %id, "entry overwritten in place");
            (id, parse_timestamp(&created_at)?)
        } else {
            let id = uuid::Uuid::now_v7().to_string();
            tx.execute(
                "INSERT INTO entries (id, kind, source_key, title, content, tags, \
                 content_hash, embedding, created_at, updated_at, metadata) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9, ?10)",
                params![
                    id,
                    entry.kind.as_str(),
                    entry.source_key,
                    entry.title,
                    entry.content,
                    tags_json,
                    content_hash,
                    embedding_bytes,
                    now.to_rfc3339(),
                    metadata_json,
                ],
            )?;
            let rowid = tx.last_insert_rowid();
            tx.execute(
                "INSERT INTO entries_fts (rowid, title, content, id, kind) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![rowid, entry.title, entry.content, id, entry.kind.as_str()],
            )?;
            debug!(source_key = %entry.source_key, %id, "entry created");
            (id, now)
        };

        tx.commit()?;

        Ok(MemoryEntry {
            id,
            kind: entry.kind,
            source_key: entry.source_key,
            title: entry.title,
            content: entry.content,
            tags: entry.tags,
            content_hash,
            embedding: Some(embedding),
            created_at,
            updated_at: now,
            metadata: entry.metadata,
        })
    }

    pub fn get(&self, id: &str) -> Result<Option<MemoryEntry>> {
        let conn = self.lock()?;
        fetch_one(&conn, "id", id)
    }

    pub fn get_by_source(&self, source_key: &str) -> Result<Option<MemoryEntry>> {
        let conn = self.lock()?;
        fetch_one(&conn, "source_key", source_key)
    }

    /// Delete by entry id. Returns `false` if the id was unknown.
    pub fn delete(&self, id: &str) -> Result<bool> {
        self.delete_where("id", id)
    }

    /// Delete the entry tied to a source. Supports reconciliation of
    /// vanished files. Returns `false` if nothing was indexed for it.
    pub fn delete_by_source(&self, source_key: &str) -> Result<bool> {
        self.delete_where("source_key", source_key)
    }

    fn delete_where(&self, column: &str, value: &str) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let sql = format!(
            "SELECT rowid, id, kind, title, content FROM entries WHERE {column} = ?1"
        );
        let row: Option<(i64, String, String, Option<String>, String)> = tx
            .query_row(&sql, params![value], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            })
            .optional()?;

        let Some((rowid, id, kind, title, content)) = row else {
            return Ok(false);
        };

        tx.execute(
            "INSERT INTO entries_fts (entries_fts, rowid, title, content, id, kind) \
             VALUES ('delete', ?1, ?2, ?3, ?4, ?5)",
            params![rowid, title, content, id, kind],
        )?;
        tx.execute("DELETE FROM entries WHERE rowid = ?1", params![rowid])?;
        tx.commit()?;
        debug!(%id, "entry deleted");
        Ok(true)
    }

    /// List entries, newest update first.
    pub fn list(
        &self,
        kind: Option<EntryKind>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MemoryEntry>> {
        let conn = self.lock()?;
        let (sql, kind_param) = match kind {
            Some(k) => (
                format!("{SELECT_COLUMNS} FROM entries WHERE kind = ?1 ORDER BY updated_at DESC LIMIT ?2 OFFSET ?3"),
                Some(k.as_str()),
            ),
            None => (
                format!("{SELECT_COLUMNS} FROM entries ORDER BY updated_at DESC LIMIT ?1 OFFSET ?2"),
                None,
            ),
        };

        let mut stmt = conn.prepare(&sql)?;
        let raws: Vec<RawRow> = if let Some(k) = kind_param {
            stmt.query_map(params![k, limit as i64, offset as i64], RawRow::from_row)?
                .collect::<std::result::Result<_, _>>()?
        } else {
            stmt.query_map(params![limit as i64, offset as i64], RawRow::from_row)?
                .collect::<std::result::Result<_, _>>()?
        };

        raws.into_iter().map(RawRow::into_entry).collect()
    }

    /// All source keys currently indexed for a kind. Used by sync to find
    /// entries whose source file has vanished.
    pub fn source_keys(&self, kind: EntryKind) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT source_key FROM entries WHERE kind = ?1")?;
        let keys: Vec<String> = stmt
            .query_map(params![kind.as_str()], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        Ok(keys)
    }

    /// Most recently updated session entries whose metadata matches the
    /// given manager or project. With neither set, plain recency.
    pub fn recent_sessions(
        &self,
        manager_id: Option<&str>,
        project_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>> {
        // Over-fetch, then filter on metadata in Rust; session counts stay
        // in the hundreds.
        let candidates = self.list(Some(EntryKind::Session), limit * 10, 0)?;
        let matches = |e: &MemoryEntry| -> bool {
            if manager_id.is_none() && project_id.is_none() {
                return true;
            }
            let meta = e.metadata.as_ref();
            let field = |key: &str| {
                meta.and_then(|m| m.get(key))
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            };
            manager_id.is_some_and(|m| field("manager_id").as_deref() == Some(m))
                || project_id.is_some_and(|p| field("project_id").as_deref() == Some(p))
        };
        Ok(candidates.into_iter().filter(matches).take(limit).collect())
    }

    /// Fully regenerate the FTS index from the primary rows. The only
    /// recovery path for a corrupted full-text index.
    pub fn rebuild_index(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("INSERT INTO entries_fts (entries_fts) VALUES ('rebuild')", [])?;
        warn!("full-text index rebuilt from primary rows");
        Ok(())
    }

    /// Counts per kind, embedding coverage, and on-disk size.
    pub fn stats(&self) -> Result<crate::memory::stats::StoreStats> {
        let conn = self.lock()?;
        crate::memory::stats::store_stats(&conn, self.db_path.as_deref())
    }

    /// Batch-fetch entries by id, keyed by id.
    pub(crate) fn fetch_by_ids(&self, ids: &[String]) -> Result<HashMap<String, MemoryEntry>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let conn = self.lock()?;
        let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "{SELECT_COLUMNS} FROM entries WHERE id IN ({})",
            placeholders.join(", ")
        );
        let mut stmt = conn.prepare(&sql)?;
        let params_vec: Vec<&dyn rusqlite::types::ToSql> = ids
            .iter()
            .map(|id| id as &dyn rusqlite::types::ToSql)
            .collect();
        let raws: Vec<RawRow> = stmt
            .query_map(params_vec.as_slice(), RawRow::from_row)?
            .collect::<std::result::Result<_, _>>()?;

        let mut map = HashMap::new();
        for raw in raws {
            let entry = raw.into_entry()?;
            map.insert(entry.id.clone(), entry);
        }
        Ok(map)
    }
}

const SELECT_COLUMNS: &str = "SELECT id, kind, source_key, title, content, tags, \
     content_hash, embedding, created_at, updated_at, metadata";

struct RawRow {
    id: String,
    kind: String,
    source_key: String,
    title: Option<String>,
    content: String,
    tags: String,
    content_hash: String,
    embedding: Option<Vec<u8>>,
    created_at: String,
    updated_at: String,
    metadata: Option<String>,
}

impl RawRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            source_key: row.get(2)?,
            title: row.get(3)?,
            content: row.get(4)?,
            tags: row.get(5)?,
            content_hash: row.get(6)?,
            embedding: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
            metadata: row.get(10)?,
        })
    }

    fn into_entry(self) -> Result<MemoryEntry> {
        let kind: EntryKind = self
            .kind
            .parse()
            .map_err(MemoryError::IndexInconsistency)?;
        let tags: Vec<String> = serde_json::from_str(&self.tags).unwrap_or_default();
        let metadata = self
            .metadata
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok());
        Ok(MemoryEntry {
            id: self.id,
            kind,
            source_key: self.source_key,
            title: self.title,
            content: self.content,
            tags,
            content_hash: self.content_hash,
            embedding: self.embedding.as_deref().and_then(bytes_to_embedding),
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            metadata,
        })
    }
}

fn fetch_one(conn: &Connection, column: &str, value: &str) -> Result<Option<MemoryEntry>> {
    let sql = format!("{SELECT_COLUMNS} FROM entries WHERE {column} = ?1");
    let raw = conn
        .query_row(&sql, params![value], RawRow::from_row)
        .optional()?;
    raw.map(RawRow::into_entry).transpose()
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| MemoryError::IndexInconsistency(format!("bad timestamp {s:?}: {e}")))
}

/// Record the embedding provider identity in `index_meta`, dropping cached
/// embeddings when a different provider built the existing index.
fn reconcile_provider_meta(conn: &Connection, provider: &Arc<dyn EmbeddingProvider>) -> Result<()> {
    let key = provider.provider_key();
    let existing: Option<String> = conn
        .query_row(
            "SELECT value FROM index_meta WHERE key = 'embedding_provider'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(ref recorded) if recorded == &key => {}
        Some(recorded) => {
            warn!(
                recorded,
                current = key,
                "embedding provider changed; dropping cached embeddings for re-embedding"
            );
            conn.execute("UPDATE entries SET embedding = NULL", [])?;
            conn.execute(
                "UPDATE index_meta SET value = ?1 WHERE key = 'embedding_provider'",
                params![key],
            )?;
        }
        None => {
            conn.execute(
                "INSERT INTO index_meta (key, value) VALUES ('embedding_provider', ?1)",
                params![key],
            )?;
        }
    }
    Ok(())
}

pub(crate) fn sha256_hex(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::local::LocalHashProvider;

    fn test_store() -> MemoryStore {
        MemoryStore::open_in_memory(Arc::new(LocalHashProvider::new(64))).unwrap()
    }

    fn note(source: &str, content: &str) -> NewEntry {
        let mut e = NewEntry::new(EntryKind::Note, source, content);
        e.title = Some("Title".into());
        e
    }

    #[tokio::test]
    async fn upsert_creates_row_and_fts_doc() {
        let store = test_store();
        let entry = store
            .upsert(note("note:a.md", "the quantum computer runs cold"))
            .await
            .unwrap();

        assert!(entry.embedding.is_some());
        let fetched = store.get(&entry.id).unwrap().unwrap();
        assert_eq!(fetched.content, "the quantum computer runs cold");
        assert_eq!(fetched.source_key, "note:a.md");

        let conn = store.lock().unwrap();
        let fts_id: String = conn
            .query_row(
                "SELECT id FROM entries_fts WHERE entries_fts MATCH 'quantum'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(fts_id, entry.id);
    }

    #[tokio::test]
    async fn upsert_same_source_reuses_id() {
        let store = test_store();
        let first = store.upsert(note("note:a.md", "version one")).await.unwrap();
        let second = store.upsert(note("note:a.md", "version two")).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);

        // only one row, and FTS reflects the new content only
        let conn = store.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
        let old_hits: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM entries_fts WHERE entries_fts MATCH 'one'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(old_hits, 0);
        let new_hits: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM entries_fts WHERE entries_fts MATCH 'two'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(new_hits, 1);
    }

    #[tokio::test]
    async fn upsert_keeps_supplied_embedding() {
        let store = test_store();
        let mut e = note("note:a.md", "content");
        e.embedding = Some(vec![1.0; 64]);
        let entry = store.upsert(e).await.unwrap();
        assert_eq!(entry.embedding.unwrap(), vec![1.0; 64]);
    }

    #[tokio::test]
    async fn delete_by_source_removes_row_and_fts() {
        let store = test_store();
        store
            .upsert(note("note:gone.md", "ephemeral content"))
            .await
            .unwrap();

        assert!(store.delete_by_source("note:gone.md").unwrap());
        assert!(!store.delete_by_source("note:gone.md").unwrap());
        assert!(store.get_by_source("note:gone.md").unwrap().is_none());

        let conn = store.lock().unwrap();
        let hits: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM entries_fts WHERE entries_fts MATCH 'ephemeral'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(hits, 0);
    }

    #[tokio::test]
    async fn list_filters_by_kind() {
        let store = test_store();
        store.upsert(note("note:a.md", "a note")).await.unwrap();
        store
            .upsert(NewEntry::new(EntryKind::Skill, "skill:b.md", "a skill"))
            .await
            .unwrap();

        let notes = store.list(Some(EntryKind::Note), 10, 0).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].kind, EntryKind::Note);

        let all = store.list(None, 10, 0).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn recent_sessions_match_manager_or_project() {
        let store = test_store();
        for (key, manager, project) in [
            ("session:s1", "m1", "p1"),
            ("session:s2", "m2", "p1"),
            ("session:s3", "m2", "p2"),
        ] {
            let mut e = NewEntry::new(EntryKind::Session, key, "transcript text");
            e.metadata = Some(serde_json::json!({
                "manager_id": manager,
                "project_id": project,
            }));
            store.upsert(e).await.unwrap();
        }

        let by_manager = store.recent_sessions(Some("m2"), None, 10).unwrap();
        assert_eq!(by_manager.len(), 2);

        let by_project = store.recent_sessions(None, Some("p1"), 10).unwrap();
        assert_eq!(by_project.len(), 2);

        let either = store.recent_sessions(Some("m1"), Some("p2"), 10).unwrap();
        assert_eq!(either.len(), 2);

        let unfiltered = store.recent_sessions(None, None, 2).unwrap();
        assert_eq!(unfiltered.len(), 2);
    }

    #[tokio::test]
    async fn provider_change_drops_cached_embeddings() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("index.db");

        let store = MemoryStore::open(&path, Arc::new(LocalHashProvider::new(64))).unwrap();
        store.upsert(note("note:a.md", "stable content")).await.unwrap();
        assert!(store.get_by_source("note:a.md").unwrap().unwrap().embedding.is_some());
        drop(store);

        // Reopen with different dimensions — a different embedding space.
        let store = MemoryStore::open(&path, Arc::new(LocalHashProvider::new(32))).unwrap();
        let entry = store.get_by_source("note:a.md").unwrap().unwrap();
        assert!(entry.embedding.is_none());
    }

    #[tokio::test]
    async fn rebuild_index_restores_fts() {
        let store = test_store();
        store
            .upsert(note("note:a.md", "searchable keyword inside"))
            .await
            .unwrap();
        store.rebuild_index().unwrap();

        let conn = store.lock().unwrap();
        let hits: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM entries_fts WHERE entries_fts MATCH 'keyword'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(hits, 1);
    }

    #[test]
    fn sha256_hex_known_value() {
        assert_eq!(
            sha256_hex("hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
