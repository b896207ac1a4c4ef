//! Reconciliation between source files and the search index.
//!
//! The filesystem is authoritative: notes and skills are markdown files,
//! sessions are JSONL transcripts, and the index is a derived cache. A sync
//! pass walks every source, skips whatever is byte-identical to what the
//! index already holds (sha256 over the stored content, and only while its
//! cached embedding is intact), upserts the rest, and removes index entries
//! whose source has vanished. A failure on one file never aborts the batch.

pub mod notes;
pub mod watch;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::MemoryConfig;
use crate::error::Result;
use crate::memory::store::{sha256_hex, MemoryStore};
use crate::memory::types::{EntryKind, NewEntry};
use crate::session::summary::{flatten_transcript, session_title};
use crate::session::SessionLog;

/// Outcome counts for one sync pass.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct SyncReport {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
    pub errors: usize,
}

impl SyncReport {
    fn absorb(&mut self, other: SyncReport) {
        self.added += other.added;
        self.updated += other.updated;
        self.removed += other.removed;
        self.unchanged += other.unchanged;
        self.errors += other.errors;
    }

    pub fn changed(&self) -> usize {
        self.added + self.updated + self.removed
    }
}

impl std::fmt::Display for SyncReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} added, {} updated, {} removed, {} unchanged, {} errors",
            self.added, self.updated, self.removed, self.unchanged, self.errors
        )
    }
}

pub struct SyncEngine {
    store: Arc<MemoryStore>,
    sessions: SessionLog,
    notes_dir: PathBuf,
    skills_dir: PathBuf,
}

impl SyncEngine {
    pub fn new(store: Arc<MemoryStore>, config: &MemoryConfig) -> Self {
        Self {
            store,
            sessions: SessionLog::new(config.sessions_dir()),
            notes_dir: config.notes_dir(),
            skills_dir: config.skills_dir(),
        }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn sessions(&self) -> &SessionLog {
        &self.sessions
    }

    pub fn notes_dir(&self) -> &Path {
        &self.notes_dir
    }

    pub fn skills_dir(&self) -> &Path {
        &self.skills_dir
    }

    /// Reconcile everything: notes, skills, then session transcripts.
    pub async fn full_sync(&self) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        report.absorb(self.sync_markdown_dir(&self.notes_dir, EntryKind::Note).await?);
        report.absorb(
            self.sync_markdown_dir(&self.skills_dir, EntryKind::Skill)
                .await?,
        );
        report.absorb(self.sync_sessions().await?);
        info!(%report, "sync complete");
        Ok(report)
    }

    async fn sync_markdown_dir(&self, dir: &Path, kind: EntryKind) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let mut seen: HashSet<String> = HashSet::new();

        if dir.is_dir() {
            for item in WalkDir::new(dir).follow_links(false) {
                let item = match item {
                    Ok(i) => i,
                    Err(e) => {
                        warn!(dir = %dir.display(), error = %e, "walk failure, skipping");
                        report.errors += 1;
                        continue;
                    }
                };
                if !item.file_type().is_file() || !is_markdown(item.path()) {
                    continue;
                }
                let Some(key) = source_key_for(kind, dir, item.path()) else {
                    continue;
                };
                seen.insert(key.clone());
                match self.sync_markdown_file(item.path(), kind, &key).await {
                    Ok(outcome) => report.absorb(outcome),
                    Err(e) => {
                        warn!(path = %item.path().display(), error = %e, "file sync failed");
                        report.errors += 1;
                    }
                }
            }
        }

        report.removed += self.remove_vanished(kind, &seen)?;
        Ok(report)
    }

    async fn sync_markdown_file(
        &self,
        path: &Path,
        kind: EntryKind,
        source_key: &str,
    ) -> Result<SyncReport> {
        let parsed = notes::read_note(path)?;
        let existing = self.store.get_by_source(source_key)?;

        if let Some(existing) = &existing {
            // A missing embedding means a provider change dropped the cached
            // vector; the entry must re-embed even though the hash matches.
            if existing.embedding.is_some() && existing.content_hash == sha256_hex(&parsed.body) {
                debug!(source_key, "unchanged");
                return Ok(SyncReport {
                    unchanged: 1,
                    ..Default::default()
                });
            }
        }

        let mut entry = NewEntry::new(kind, source_key, parsed.body);
        entry.title = parsed.title;
        entry.tags = parsed.tags;
        self.store.upsert(entry).await?;

        Ok(if existing.is_some() {
            SyncReport {
                updated: 1,
                ..Default::default()
            }
        } else {
            SyncReport {
                added: 1,
                ..Default::default()
            }
        })
    }

    /// Index one note or skill file without walking the whole directory.
    pub async fn sync_file(&self, path: &Path) -> Result<SyncReport> {
        let (dir, kind) = if path.starts_with(&self.notes_dir) {
            (self.notes_dir.as_path(), EntryKind::Note)
        } else if path.starts_with(&self.skills_dir) {
            (self.skills_dir.as_path(), EntryKind::Skill)
        } else {
            return Ok(SyncReport::default());
        };
        let Some(key) = source_key_for(kind, dir, path) else {
            return Ok(SyncReport::default());
        };
        if path.is_file() {
            self.sync_markdown_file(path, kind, &key).await
        } else {
            // file removed
            let removed = self.store.delete_by_source(&key)?;
            Ok(SyncReport {
                removed: removed as usize,
                ..Default::default()
            })
        }
    }

    /// Reconcile session transcripts only. The periodic watch timer calls
    /// this instead of a full walk.
    pub async fn sync_sessions(&self) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let mut seen: HashSet<String> = HashSet::new();

        for id in self.sessions.list_ids().await? {
            let key = format!("session:{id}");
            seen.insert(key.clone());
            match self.sync_session_inner(&id, &key).await {
                Ok(outcome) => report.absorb(outcome),
                Err(e) => {
                    warn!(session_id = %id, error = %e, "session sync failed");
                    report.errors += 1;
                }
            }
        }

        report.removed += self.remove_vanished(EntryKind::Session, &seen)?;
        Ok(report)
    }

    /// Re-index a single session transcript.
    pub async fn sync_session(&self, session_id: &str) -> Result<SyncReport> {
        let key = format!("session:{session_id}");
        self.sync_session_inner(session_id, &key).await
    }

    async fn sync_session_inner(&self, session_id: &str, source_key: &str) -> Result<SyncReport> {
        let transcript = self.sessions.load(session_id).await?;
        let content = flatten_transcript(&transcript);

        let existing = self.store.get_by_source(source_key)?;
        if let Some(existing) = &existing {
            if existing.embedding.is_some() && existing.content_hash == sha256_hex(&content) {
                return Ok(SyncReport {
                    unchanged: 1,
                    ..Default::default()
                });
            }
        }

        let existed = existing.is_some();
        let mut entry = NewEntry::new(EntryKind::Session, source_key, content);
        entry.title = Some(session_title(&transcript));
        entry.metadata = Some(serde_json::json!({
            "manager_id": transcript.manager_id,
            "project_id": transcript.project_id,
            "started_at": transcript.started_at,
            "ended_at": transcript.ended_at,
            "message_count": transcript.messages.len(),
        }));
        self.store.upsert(entry).await?;

        Ok(if existed {
            SyncReport {
                updated: 1,
                ..Default::default()
            }
        } else {
            SyncReport {
                added: 1,
                ..Default::default()
            }
        })
    }

    fn remove_vanished(&self, kind: EntryKind, seen: &HashSet<String>) -> Result<usize> {
        let mut removed = 0;
        for key in self.store.source_keys(kind)? {
            if !seen.contains(&key) {
                debug!(source_key = %key, "source vanished, removing entry");
                if self.store.delete_by_source(&key)? {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

fn is_markdown(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("md") | Some("markdown")
    )
}

fn source_key_for(kind: EntryKind, root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let rel = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    Some(format!("{}:{}", kind.as_str(), rel))
}
