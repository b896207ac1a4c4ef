//! Append-only session transcript log.
//!
//! One line-delimited JSON file per session. Each record carries a `type`
//! discriminator (`session_start`, `message`, `session_end`). The log file
//! is the source of truth for conversation content; the search index only
//! holds a derived, recomputable copy. A written line is never mutated —
//! recovery always means appending, and replay tolerates whatever it finds.

pub mod summary;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::error::{MemoryError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// A tool invocation recorded inside a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl SessionMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            tool_calls: Vec::new(),
        }
    }
}

/// A fully replayed transcript.
#[derive(Debug, Clone, Serialize)]
pub struct SessionTranscript {
    pub session_id: String,
    pub manager_id: Option<String>,
    pub project_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub messages: Vec<SessionMessage>,
    pub summary: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Counts and lifecycle info derived without materializing message bodies.
#[derive(Debug, Clone, Serialize)]
pub struct SessionMeta {
    pub session_id: String,
    pub manager_id: Option<String>,
    pub project_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub message_count: usize,
    pub has_summary: bool,
}

/// On-disk record shapes, discriminated by `type`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum LogRecord {
    SessionStart {
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        manager_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        project_id: Option<String>,
        started_at: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<serde_json::Value>,
    },
    Message {
        #[serde(flatten)]
        message: SessionMessage,
    },
    SessionEnd {
        ended_at: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
}

/// Minimal per-line probe for the metadata fast path.
#[derive(Deserialize)]
struct ProbeRecord {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    summary: Option<serde_json::Value>,
}

pub struct SessionLog {
    dir: PathBuf,
}

impl SessionLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.jsonl"))
    }

    fn checked_path(&self, session_id: &str) -> Result<PathBuf> {
        if session_id.is_empty()
            || session_id.contains(['/', '\\'])
            || session_id.contains("..")
        {
            return Err(MemoryError::malformed(
                &self.dir,
                format!("invalid session id: {session_id:?}"),
            ));
        }
        Ok(self.path_for(session_id))
    }

    /// Write the open header for a new session.
    pub async fn create(
        &self,
        session_id: &str,
        manager_id: Option<&str>,
        project_id: Option<&str>,
        metadata: Option<serde_json::Value>,
    ) -> Result<()> {
        let path = self.checked_path(session_id)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        if tokio::fs::try_exists(&path).await? {
            return Err(MemoryError::malformed(
                path,
                format!("session log already exists: {session_id}"),
            ));
        }
        let record = LogRecord::SessionStart {
            session_id: session_id.to_string(),
            manager_id: manager_id.map(str::to_string),
            project_id: project_id.map(str::to_string),
            started_at: Utc::now(),
            metadata,
        };
        self.append_record(&path, &record).await
    }

    /// Append a message. Fails `NotFound` if the session was never created.
    ///
    /// A message arriving after `session_end` is still accepted — it lands
    /// after the close marker and replay keeps it. This is the tolerated
    /// crash-recovery path, not an error.
    pub async fn append_message(&self, session_id: &str, message: &SessionMessage) -> Result<()> {
        let path = self.checked_path(session_id)?;
        if !tokio::fs::try_exists(&path).await? {
            return Err(MemoryError::not_found("session", session_id));
        }
        let record = LogRecord::Message {
            message: message.clone(),
        };
        self.append_record(&path, &record).await
    }

    /// Append the terminal record. Idempotent: a second `end` is a no-op.
    pub async fn end(&self, session_id: &str, summary: Option<String>) -> Result<()> {
        let path = self.checked_path(session_id)?;
        if !tokio::fs::try_exists(&path).await? {
            return Err(MemoryError::not_found("session", session_id));
        }
        if self.metadata(session_id).await?.ended_at.is_some() {
            return Ok(());
        }
        let record = LogRecord::SessionEnd {
            ended_at: Utc::now(),
            summary,
        };
        self.append_record(&path, &record).await
    }

    /// Replay the file into a transcript, folding header → message* → end.
    /// Malformed or unknown lines are logged and skipped, never fatal —
    /// partial transcripts are acceptable.
    pub async fn load(&self, session_id: &str) -> Result<SessionTranscript> {
        let path = self.checked_path(session_id)?;
        if !tokio::fs::try_exists(&path).await? {
            return Err(MemoryError::not_found("session", session_id));
        }
        let contents = tokio::fs::read_to_string(&path).await?;

        let mut transcript: Option<SessionTranscript> = None;
        for (line_no, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: LogRecord = match serde_json::from_str(line) {
                Ok(r) => r,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        line = line_no + 1,
                        error = %e,
                        "skipping malformed transcript line"
                    );
                    continue;
                }
            };
            match record {
                LogRecord::SessionStart {
                    session_id,
                    manager_id,
                    project_id,
                    started_at,
                    metadata,
                } => {
                    // A duplicate header would mean a corrupted file; keep
                    // the first one.
                    if transcript.is_none() {
                        transcript = Some(SessionTranscript {
                            session_id,
                            manager_id,
                            project_id,
                            started_at,
                            ended_at: None,
                            messages: Vec::new(),
                            summary: None,
                            metadata,
                        });
                    }
                }
                LogRecord::Message { message } => {
                    if let Some(t) = transcript.as_mut() {
                        t.messages.push(message);
                    } else {
                        warn!(
                            path = %path.display(),
                            line = line_no + 1,
                            "message before session_start, skipping"
                        );
                    }
                }
                LogRecord::SessionEnd { ended_at, summary } => {
                    if let Some(t) = transcript.as_mut() {
                        if t.ended_at.is_none() {
                            t.ended_at = Some(ended_at);
                            if summary.is_some() {
                                t.summary = summary;
                            }
                        }
                    }
                }
            }
        }

        transcript.ok_or_else(|| {
            MemoryError::malformed(path, format!("no session_start record for {session_id}"))
        })
    }

    /// Fast path: counts and lifecycle without retaining message bodies.
    /// Listing and status calls go through here instead of full replay.
    pub async fn metadata(&self, session_id: &str) -> Result<SessionMeta> {
        let path = self.checked_path(session_id)?;
        if !tokio::fs::try_exists(&path).await? {
            return Err(MemoryError::not_found("session", session_id));
        }
        let contents = tokio::fs::read_to_string(&path).await?;

        let mut meta: Option<SessionMeta> = None;
        let mut message_count = 0usize;
        let mut ended_at = None;
        let mut has_summary = false;

        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            // Header details need the full record; every other line only
            // needs its discriminator.
            if meta.is_none() {
                if let Ok(LogRecord::SessionStart {
                    session_id,
                    manager_id,
                    project_id,
                    started_at,
                    ..
                }) = serde_json::from_str(line)
                {
                    meta = Some(SessionMeta {
                        session_id,
                        manager_id,
                        project_id,
                        started_at,
                        ended_at: None,
                        message_count: 0,
                        has_summary: false,
                    });
                    continue;
                }
            }
            let Ok(probe) = serde_json::from_str::<ProbeRecord>(line) else {
                continue;
            };
            match probe.kind.as_str() {
                "message" => message_count += 1,
                "session_end" => {
                    if ended_at.is_none() {
                        ended_at = probe.ended_at;
                        has_summary = probe.summary.is_some();
                    }
                }
                _ => {}
            }
        }

        let mut meta = meta.ok_or_else(|| {
            MemoryError::malformed(path, format!("no session_start record for {session_id}"))
        })?;
        meta.message_count = message_count;
        meta.ended_at = ended_at;
        meta.has_summary = has_summary;
        Ok(meta)
    }

    /// True when the session exists and has no terminal record yet.
    pub async fn is_open(&self, session_id: &str) -> Result<bool> {
        Ok(self.metadata(session_id).await?.ended_at.is_none())
    }

    /// All session ids with a log file, in directory order.
    pub async fn list_ids(&self) -> Result<Vec<String>> {
        if !tokio::fs::try_exists(&self.dir).await? {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.dir).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn append_record(&self, path: &Path, record: &LogRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
