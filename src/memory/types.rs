//! Core entry and search types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of source an entry was indexed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// A flattened session transcript.
    Session,
    /// A freeform markdown note.
    Note,
    /// A skill/how-to file.
    Skill,
}

impl EntryKind {
    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Note => "note",
            Self::Skill => "skill",
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session" => Ok(Self::Session),
            "note" => Ok(Self::Note),
            "skill" => Ok(Self::Skill),
            _ => Err(format!("unknown entry kind: {s}")),
        }
    }
}

/// A persisted memory entry, matching the `entries` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// UUID v7 (time-sortable), stable across reindexing of the same source.
    pub id: String,
    pub kind: EntryKind,
    /// Stable identifier tying the entry to its originating file or session,
    /// e.g. `note:deploy-steps.md` or `session:s1`. Unique per origin.
    pub source_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub content: String,
    pub tags: Vec<String>,
    /// sha256 hex of `content`, used for skip-if-unchanged reconciliation.
    pub content_hash: String,
    /// L2-normalized vector, or `None` if not embedded yet.
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Input to [`crate::memory::store::MemoryStore::upsert`]. The store fills
/// in id, timestamps, hash, and (when absent) the embedding.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub kind: EntryKind,
    pub source_key: String,
    pub title: Option<String>,
    pub content: String,
    pub tags: Vec<String>,
    pub embedding: Option<Vec<f32>>,
    pub metadata: Option<serde_json::Value>,
}

impl NewEntry {
    pub fn new(kind: EntryKind, source_key: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind,
            source_key: source_key.into(),
            title: None,
            content: content.into(),
            tags: Vec::new(),
            embedding: None,
            metadata: None,
        }
    }
}

/// Which channel(s) produced a search hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Vector,
    Keyword,
    Hybrid,
}

/// One hybrid search hit.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub entry: MemoryEntry,
    /// Weighted fusion of the channel scores.
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword_score: Option<f64>,
    pub match_type: MatchType,
    /// Short context windows around query-term occurrences.
    pub highlights: Vec<String>,
}

/// Inclusive time window applied to `updated_at`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateRange {
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        if let Some(after) = self.after {
            if t < after {
                return false;
            }
        }
        if let Some(before) = self.before {
            if t > before {
                return false;
            }
        }
        true
    }
}

/// Parameters for one hybrid search.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub limit: usize,
    pub kind: Option<EntryKind>,
    /// Scores exactly at the threshold are kept.
    pub min_score: f64,
    pub vector_weight: f64,
    pub keyword_weight: f64,
    /// When set, an entry must carry at least one of these tags.
    pub tags: Option<Vec<String>>,
    pub date_range: Option<DateRange>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: 10,
            kind: None,
            min_score: 0.0,
            vector_weight: 0.6,
            keyword_weight: 0.4,
            tags: None,
            date_range: None,
        }
    }

    /// Build a request from the configured search defaults.
    pub fn from_config(query: impl Into<String>, config: &crate::config::SearchConfig) -> Self {
        Self {
            query: query.into(),
            limit: config.max_results,
            kind: None,
            min_score: config.min_score,
            vector_weight: config.vector_weight,
            keyword_weight: config.keyword_weight,
            tags: None,
            date_range: None,
        }
    }
}
