//! Session lifecycle hooks — the surface an agent harness calls.
//!
//! `MemoryEngine` wires config, store, session log, and sync together.
//! `pre_session` hands the agent its relevant memory before it starts;
//! `post_session` closes out and re-indexes when it finishes. Search
//! failures here degrade to empty context rather than blocking a session
//! from starting; only storage-level errors surface.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::MemoryConfig;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::error::{MemoryError, Result};
use crate::memory::stats::StoreStats;
use crate::memory::store::MemoryStore;
use crate::memory::types::{MemoryEntry, SearchRequest, SearchResult};
use crate::session::summary::summarize;
use crate::session::SessionLog;
use crate::sync::notes::{render_note, slugify};
use crate::sync::watch::SyncWatcher;
use crate::sync::{SyncEngine, SyncReport};

const RECENT_SESSION_LIMIT: usize = 5;

#[derive(Debug, Default, Clone)]
pub struct PreSessionRequest {
    /// Free-text description of the upcoming work, used for relevance search.
    pub query: Option<String>,
    pub manager_id: Option<String>,
    pub project_id: Option<String>,
    /// A session the harness believes may still be open from a crash.
    pub prior_session_id: Option<String>,
}

/// What `pre_session` hands back to the harness.
#[derive(Debug, Serialize)]
pub struct PreSessionContext {
    /// Assembled markdown block ready to inject into the agent prompt.
    pub context: String,
    pub results: Vec<SearchResult>,
    pub recent_sessions: Vec<MemoryEntry>,
}

#[derive(Debug, Serialize)]
pub struct EngineStatus {
    pub stats: StoreStats,
    pub watching: bool,
    pub provider: String,
}

pub struct MemoryEngine {
    config: MemoryConfig,
    store: Arc<MemoryStore>,
    sync: Arc<SyncEngine>,
    watcher: SyncWatcher,
}

impl MemoryEngine {
    pub fn new(config: MemoryConfig) -> Result<Self> {
        let provider = create_provider(&config.embedding);
        Self::with_provider(config, provider)
    }

    /// Construct with an explicit provider. Tests inject counting or mock
    /// providers through this.
    pub fn with_provider(
        config: MemoryConfig,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        std::fs::create_dir_all(config.data_dir())?;
        let store = Arc::new(MemoryStore::open(config.db_path(), provider)?);
        let sync = Arc::new(SyncEngine::new(Arc::clone(&store), &config));
        let watcher = SyncWatcher::new(
            Arc::clone(&sync),
            Duration::from_secs(config.sync.session_interval_secs.max(1)),
        );
        Ok(Self {
            config,
            store,
            sync,
            watcher,
        })
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn sessions(&self) -> &SessionLog {
        self.sync.sessions()
    }

    /// Gather context for a session that is about to start.
    ///
    /// A prior session left open by a crash is closed, summarized, and
    /// re-indexed first so its content is searchable immediately.
    pub async fn pre_session(&self, request: &PreSessionRequest) -> Result<PreSessionContext> {
        if let Some(prior) = &request.prior_session_id {
            self.recover_prior_session(prior).await;
        }

        let results = match &request.query {
            Some(query) if !query.trim().is_empty() => {
                let req = SearchRequest::from_config(query.clone(), &self.config.search);
                match self.store.search(&req).await {
                    Ok(results) => results,
                    Err(e @ (MemoryError::Db(_) | MemoryError::LockPoisoned)) => return Err(e),
                    Err(e) => {
                        warn!(error = %e, "relevance search failed, continuing without");
                        Vec::new()
                    }
                }
            }
            _ => Vec::new(),
        };

        let recent = self.store.recent_sessions(
            request.manager_id.as_deref(),
            request.project_id.as_deref(),
            RECENT_SESSION_LIMIT,
        )?;

        let context = assemble_context(&results, &recent);
        Ok(PreSessionContext {
            context,
            results,
            recent_sessions: recent,
        })
    }

    /// Close a finished session and fold it into the index.
    ///
    /// Safe to call twice: an already-ended session is left as-is and only
    /// re-synced.
    pub async fn post_session(
        &self,
        session_id: &str,
        summary: Option<String>,
    ) -> Result<StoreStats> {
        let log = self.sync.sessions();
        if log.is_open(session_id).await? {
            let summary = match summary {
                Some(s) => Some(s),
                None if self.config.sync.auto_summarize => {
                    Some(summarize(&log.load(session_id).await?))
                }
                None => None,
            };
            log.end(session_id, summary).await?;
        }
        self.sync.sync_session(session_id).await?;
        self.store.stats()
    }

    /// Write a markdown note into the notes directory and index it.
    pub async fn write_note(
        &self,
        title: &str,
        content: &str,
        tags: &[String],
    ) -> Result<PathBuf> {
        let notes_dir = self.sync.notes_dir();
        std::fs::create_dir_all(notes_dir)?;

        let slug = slugify(title);
        let mut path = notes_dir.join(format!("{slug}.md"));
        let mut n = 2;
        while path.exists() {
            path = notes_dir.join(format!("{slug}-{n}.md"));
            n += 1;
        }

        std::fs::write(&path, render_note(title, content, tags))?;
        self.sync.sync_file(&path).await?;
        info!(path = %path.display(), "note written");
        Ok(path)
    }

    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        let req = SearchRequest::from_config(query, &self.config.search);
        self.store.search(&req).await
    }

    pub async fn search_with(&self, request: &SearchRequest) -> Result<Vec<SearchResult>> {
        self.store.search(request).await
    }

    pub async fn full_sync(&self) -> Result<SyncReport> {
        self.sync.full_sync().await
    }

    pub fn status(&self) -> Result<EngineStatus> {
        Ok(EngineStatus {
            stats: self.store.stats()?,
            watching: self.watcher.is_watching(),
            provider: self.store.provider().provider_key(),
        })
    }

    pub fn start_watching(&self) -> Result<()> {
        self.watcher.start()
    }

    pub fn stop_watching(&self) {
        self.watcher.stop()
    }

    async fn recover_prior_session(&self, session_id: &str) {
        let log = self.sync.sessions();
        match log.is_open(session_id).await {
            Ok(true) => {
                let summary = if self.config.sync.auto_summarize {
                    match log.load(session_id).await {
                        Ok(t) => Some(summarize(&t)),
                        Err(e) => {
                            warn!(session_id, error = %e, "prior session unreadable");
                            None
                        }
                    }
                } else {
                    None
                };
                if let Err(e) = log.end(session_id, summary).await {
                    warn!(session_id, error = %e, "failed to close prior session");
                    return;
                }
                info!(session_id, "closed prior session left open");
                if let Err(e) = self.sync.sync_session(session_id).await {
                    warn!(session_id, error = %e, "prior session resync failed");
                }
            }
            Ok(false) => {}
            Err(MemoryError::NotFound { .. }) => {}
            Err(e) => warn!(session_id, error = %e, "prior session probe failed"),
        }
    }
}

fn assemble_context(results: &[SearchResult], recent: &[MemoryEntry]) -> String {
    let mut out = String::new();

    if !results.is_empty() {
        out.push_str("## Relevant memory\n\n");
        for result in results {
            let title = result
                .entry
                .title
                .as_deref()
                .unwrap_or(&result.entry.source_key);
            out.push_str(&format!(
                "- **{title}** ({}, score {:.2})",
                result.entry.kind.as_str(),
                result.score
            ));
            if !result.highlights.is_empty() {
                out.push_str(&format!(": {}", result.highlights.join(" … ")));
            }
            out.push('\n');
        }
        out.push('\n');
    }

    if !recent.is_empty() {
        out.push_str("## Recent sessions\n\n");
        for entry in recent {
            let title = entry.title.as_deref().unwrap_or(&entry.source_key);
            out.push_str(&format!(
                "- {} ({})\n",
                title,
                entry.updated_at.format("%Y-%m-%d")
            ));
        }
    }

    out.trim_end().to_string()
}
