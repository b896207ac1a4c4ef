#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use mnemon::config::MemoryConfig;
use mnemon::embedding::local::LocalHashProvider;
use mnemon::embedding::EmbeddingProvider;
use mnemon::error::Result;
use mnemon::MemoryEngine;

/// Wraps the local provider and counts embed calls, so tests can assert
/// that unchanged content is never re-embedded.
pub struct CountingProvider {
    inner: LocalHashProvider,
    calls: AtomicUsize,
}

impl CountingProvider {
    pub fn new(dims: usize) -> Self {
        Self {
            inner: LocalHashProvider::new(dims),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn embed_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for CountingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed(text).await
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn provider_key(&self) -> String {
        self.inner.provider_key()
    }
}

/// Fresh engine rooted in a temp directory, with a permissive score
/// threshold so small test corpora still match.
pub fn test_engine() -> (MemoryEngine, Arc<CountingProvider>, tempfile::TempDir) {
    let tmp = tempfile::TempDir::new().unwrap();
    let (engine, provider) = engine_at(tmp.path(), 64);
    (engine, provider, tmp)
}

/// Engine over an existing data directory, so tests can reopen the same
/// index with a different provider.
pub fn engine_at(dir: &std::path::Path, dims: usize) -> (MemoryEngine, Arc<CountingProvider>) {
    let mut config = MemoryConfig::default();
    config.storage.data_dir = dir.to_string_lossy().into_owned();
    config.search.min_score = 0.0;
    let provider = Arc::new(CountingProvider::new(dims));
    let engine = MemoryEngine::with_provider(config, provider.clone()).unwrap();
    (engine, provider)
}

/// Write a markdown file under the engine's notes directory.
pub fn write_note_file(engine: &MemoryEngine, name: &str, content: &str) {
    let dir = engine.config().notes_dir();
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(name), content).unwrap();
}

/// Write a markdown file under the engine's skills directory.
pub fn write_skill_file(engine: &MemoryEngine, name: &str, content: &str) {
    let dir = engine.config().skills_dir();
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(name), content).unwrap();
}
