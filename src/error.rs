//! Error taxonomy for the memory engine.
//!
//! Source-level problems (an unreadable note, a garbled transcript line) are
//! recoverable and get logged where they occur. Store-level transaction
//! failures surface as hard errors.

use std::path::PathBuf;

/// All errors the library surfaces to callers.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// Unknown session or entry id.
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    /// An unparseable stored line or file. Callers usually skip and log.
    #[error("malformed data in {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    /// The embedding provider failed (auth, network, or response shape).
    #[error("embedding provider failure: {0}")]
    Provider(String),

    /// The row store and the full-text index disagree. Never auto-healed;
    /// call `MemoryStore::rebuild_index`.
    #[error("index inconsistency: {0}")]
    IndexInconsistency(String),

    /// A configuration value failed validation.
    #[error("invalid config value for {field}: {reason}")]
    ConfigInvalid { field: &'static str, reason: String },

    /// Filesystem watcher setup failed.
    #[error("watch error: {0}")]
    Watch(String),

    /// The store connection mutex was poisoned by a panicking holder.
    #[error("store lock poisoned")]
    LockPoisoned,

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, MemoryError>;

impl MemoryError {
    pub fn not_found(what: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            what,
            id: id.into(),
        }
    }

    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
