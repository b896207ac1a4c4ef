//! Deterministic transcript summarization and flattening.
//!
//! No model calls here. The summary is a structural digest (what was asked,
//! what tools ran, how it ended) that is cheap to recompute and stable
//! across re-syncs, so the index never churns on identical input.

use std::collections::BTreeSet;

use super::{Role, SessionTranscript};

const PREVIEW_CHARS: usize = 200;

/// Build a short structural summary of a transcript.
pub fn summarize(transcript: &SessionTranscript) -> String {
    let user_count = transcript
        .messages
        .iter()
        .filter(|m| m.role == Role::User)
        .count();
    let assistant_count = transcript
        .messages
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .count();

    let mut lines = Vec::new();
    lines.push(format!(
        "{} messages ({user_count} user, {assistant_count} assistant).",
        transcript.messages.len()
    ));

    if let Some(first_ask) = transcript
        .messages
        .iter()
        .find(|m| m.role == Role::User && !m.content.trim().is_empty())
    {
        lines.push(format!(
            "First request: {}",
            preview(&first_ask.content, PREVIEW_CHARS)
        ));
    }

    // BTreeSet for a stable, deduplicated tool listing.
    let tools: BTreeSet<&str> = transcript
        .messages
        .iter()
        .flat_map(|m| m.tool_calls.iter())
        .map(|t| t.name.as_str())
        .collect();
    if !tools.is_empty() {
        lines.push(format!(
            "Tools used: {}.",
            tools.into_iter().collect::<Vec<_>>().join(", ")
        ));
    }

    if let Some(last_reply) = transcript
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant && !m.content.trim().is_empty())
    {
        lines.push(format!(
            "Outcome: {}",
            preview(&last_reply.content, PREVIEW_CHARS)
        ));
    }

    lines.join("\n")
}

/// Flatten a transcript into the single text blob the index stores and
/// searches. Header and summary first so they dominate early-position
/// keyword matches, then every message body tagged with its role.
pub fn flatten_transcript(transcript: &SessionTranscript) -> String {
    let mut out = String::new();
    out.push_str(&format!("Session {}", transcript.session_id));
    if let Some(manager) = &transcript.manager_id {
        out.push_str(&format!(" manager {manager}"));
    }
    if let Some(project) = &transcript.project_id {
        out.push_str(&format!(" project {project}"));
    }
    out.push('\n');

    if let Some(summary) = &transcript.summary {
        out.push_str(summary);
        out.push('\n');
    }

    for message in &transcript.messages {
        if !message.content.trim().is_empty() {
            out.push_str(&format!("[{}] {}\n", message.role.as_str(), message.content));
        }
        for call in &message.tool_calls {
            out.push_str(&format!("[tool] {}\n", call.name));
        }
    }

    out
}

/// Title used when indexing a session entry.
pub fn session_title(transcript: &SessionTranscript) -> String {
    transcript
        .messages
        .iter()
        .find(|m| m.role == Role::User && !m.content.trim().is_empty())
        .map(|m| preview(&m.content, 80))
        .unwrap_or_else(|| format!("Session {}", transcript.session_id))
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{cut}…")
}
