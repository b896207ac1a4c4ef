//! Cross-session memory for autonomous agents.
//!
//! Mnemon persists what an agent learned — conversation transcripts,
//! freeform notes, reusable skills — and hands the relevant parts back at
//! the start of the next session. Source files on disk stay authoritative;
//! the SQLite index (rows + FTS5) is a derived cache that sync rebuilds
//! from them at any time.
//!
//! # Architecture
//!
//! - **Storage**: SQLite with FTS5 for keyword search and embedding BLOBs
//!   scanned in-process for vector search
//! - **Embeddings**: deterministic local hashing provider by default, or a
//!   remote OpenAI-style `/embeddings` endpoint
//! - **Search**: hybrid vector + BM25 keyword, merged by weighted score
//!   fusion
//! - **Sync**: sha256 skip-if-unchanged reconciliation of markdown files
//!   and JSONL transcripts, with optional filesystem watching
//!
//! # Modules
//!
//! - [`config`] — configuration loading from TOML files and environment variables
//! - [`db`] — SQLite database initialization and schema
//! - [`embedding`] — text-to-vector embedding pipeline
//! - [`memory`] — the index: store, hybrid search, stats
//! - [`session`] — append-only JSONL transcript log and summarization
//! - [`sync`] — file/index reconciliation and background watching
//! - [`hooks`] — `pre_session` / `post_session` lifecycle surface

pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod hooks;
pub mod memory;
pub mod session;
pub mod sync;

pub use error::{MemoryError, Result};
pub use hooks::{MemoryEngine, PreSessionRequest};
