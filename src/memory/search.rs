//! Hybrid search: brute-force cosine scan fused with FTS5 keyword ranking.
//!
//! Both channels start concurrently and are awaited together, each capped at
//! `limit * 2` candidates (deeper when tag or date filters will discard
//! some). Scores fuse as
//! `vector_score * vector_weight + keyword_score * keyword_weight` with an
//! absent side contributing zero. Read-only and deterministic for an
//! unchanged index and query.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection};

use crate::embedding::cosine_similarity;
use crate::error::{MemoryError, Result};
use crate::memory::bytes_to_embedding;
use crate::memory::store::MemoryStore;
use crate::memory::types::{EntryKind, MatchType, SearchRequest, SearchResult};

/// Window radius around a matched term, in characters.
const HIGHLIGHT_RADIUS: usize = 50;
/// Maximum highlight windows per result.
const MAX_HIGHLIGHTS: usize = 3;
/// Floor for normalized keyword scores; a degenerate zero bm25 rank still
/// counts as a match.
const KEYWORD_SCORE_FLOOR: f64 = 1e-3;

impl MemoryStore {
    /// Run a hybrid search. Tag and date filters apply before truncation so
    /// in-range matches are never pushed out by filtered-away candidates.
    pub async fn search(&self, req: &SearchRequest) -> Result<Vec<SearchResult>> {
        // Tag and date filters discard candidates after scoring, so they
        // need a much deeper pool to pick survivors from.
        let candidate_cap = if req.tags.is_some() || req.date_range.is_some() {
            req.limit.max(1) * 20
        } else {
            req.limit.max(1) * 2
        };
        let query_embedding = self.provider().embed(&req.query).await?;
        let terms = query_terms(&req.query);

        let vec_conn = self.conn_handle();
        let kw_conn = self.conn_handle();
        let kind = req.kind;
        let kw_terms = terms.clone();

        let vector_task = tokio::task::spawn_blocking(move || {
            vector_candidates(&vec_conn, &query_embedding, kind, candidate_cap)
        });
        let keyword_task = tokio::task::spawn_blocking(move || {
            keyword_candidates(&kw_conn, &kw_terms, kind, candidate_cap)
        });
        let (vector_res, keyword_res) = tokio::join!(vector_task, keyword_task);
        let vector_hits = vector_res??;
        let keyword_hits = keyword_res??;

        // Union by id; either side may be missing.
        let mut channels: HashMap<String, (Option<f64>, Option<f64>)> = HashMap::new();
        for (id, score) in vector_hits {
            channels.entry(id).or_default().0 = Some(score);
        }
        for (id, score) in keyword_hits {
            channels.entry(id).or_default().1 = Some(score);
        }

        let mut scored: Vec<(String, f64, Option<f64>, Option<f64>)> = channels
            .into_iter()
            .map(|(id, (v, k))| {
                let combined =
                    v.unwrap_or(0.0) * req.vector_weight + k.unwrap_or(0.0) * req.keyword_weight;
                (id, combined, v, k)
            })
            // exactly-at-threshold stays in
            .filter(|(_, combined, _, _)| *combined >= req.min_score)
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        let ids: Vec<String> = scored.iter().map(|(id, ..)| id.clone()).collect();
        let mut entries = self.fetch_by_ids(&ids)?;

        let mut results = Vec::with_capacity(req.limit);
        for (id, combined, v, k) in scored {
            if results.len() >= req.limit {
                break;
            }
            let Some(entry) = entries.remove(&id) else {
                continue;
            };
            if let Some(ref wanted) = req.tags {
                if !wanted.iter().any(|t| entry.tags.contains(t)) {
                    continue;
                }
            }
            if let Some(range) = req.date_range {
                if !range.contains(entry.updated_at) {
                    continue;
                }
            }
            let match_type = match (v, k) {
                (Some(_), Some(_)) => MatchType::Hybrid,
                (Some(_), None) => MatchType::Vector,
                _ => MatchType::Keyword,
            };
            let highlights = build_highlights(&entry.content, &terms);
            results.push(SearchResult {
                entry,
                score: combined,
                vector_score: v,
                keyword_score: k,
                match_type,
                highlights,
            });
        }
        Ok(results)
    }
}

/// Brute-force cosine scan over embedded entries, descending, clamped [0,1].
fn vector_candidates(
    conn: &Arc<Mutex<Connection>>,
    query: &[f32],
    kind: Option<EntryKind>,
    limit: usize,
) -> Result<Vec<(String, f64)>> {
    let conn = conn.lock().map_err(|_| MemoryError::LockPoisoned)?;
    let (sql, kind_param) = match kind {
        Some(k) => (
            "SELECT id, embedding FROM entries WHERE embedding IS NOT NULL AND kind = ?1",
            Some(k.as_str()),
        ),
        None => (
            "SELECT id, embedding FROM entries WHERE embedding IS NOT NULL",
            None,
        ),
    };

    let mut stmt = conn.prepare(sql)?;
    let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<(String, Vec<u8>)> {
        Ok((row.get(0)?, row.get(1)?))
    };
    let rows: Vec<(String, Vec<u8>)> = if let Some(k) = kind_param {
        stmt.query_map(params![k], map_row)?
            .collect::<std::result::Result<_, _>>()?
    } else {
        stmt.query_map([], map_row)?
            .collect::<std::result::Result<_, _>>()?
    };

    let mut hits: Vec<(String, f64)> = rows
        .into_iter()
        .filter_map(|(id, blob)| {
            let embedding = bytes_to_embedding(&blob)?;
            let score = (cosine_similarity(query, &embedding) as f64).clamp(0.0, 1.0);
            Some((id, score))
        })
        .collect();

    hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    hits.truncate(limit);
    Ok(hits)
}

/// Prefix-OR FTS5 query ranked by BM25, normalized monotonically into (0,1).
fn keyword_candidates(
    conn: &Arc<Mutex<Connection>>,
    terms: &[String],
    kind: Option<EntryKind>,
    limit: usize,
) -> Result<Vec<(String, f64)>> {
    let match_expr = fts_prefix_query(terms);
    if match_expr.is_empty() {
        return Ok(Vec::new());
    }

    let conn = conn.lock().map_err(|_| MemoryError::LockPoisoned)?;
    let (sql, kind_param) = match kind {
        Some(k) => (
            "SELECT id, rank FROM entries_fts WHERE entries_fts MATCH ?1 AND kind = ?2 \
             ORDER BY rank LIMIT ?3",
            Some(k.as_str()),
        ),
        None => (
            "SELECT id, rank FROM entries_fts WHERE entries_fts MATCH ?1 \
             ORDER BY rank LIMIT ?2",
            None,
        ),
    };

    let mut stmt = conn.prepare(sql)?;
    let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<(String, f64)> {
        Ok((row.get(0)?, row.get(1)?))
    };
    let rows: Vec<(String, f64)> = if let Some(k) = kind_param {
        stmt.query_map(params![match_expr, k, limit as i64], map_row)?
            .collect::<std::result::Result<_, _>>()?
    } else {
        stmt.query_map(params![match_expr, limit as i64], map_row)?
            .collect::<std::result::Result<_, _>>()?
    };

    Ok(rows
        .into_iter()
        .map(|(id, rank)| (id, keyword_score(rank)))
        .collect())
}

/// FTS5 rank is negative bm25 (more negative is better). Negate, then map
/// through r/(1+r): order-preserving, bounded in (0,1). Floored so a
/// matching document never normalizes to zero.
fn keyword_score(rank: f64) -> f64 {
    let r = (-rank).max(0.0);
    (r / (1.0 + r)).max(KEYWORD_SCORE_FLOOR)
}

/// Split a query into lowercase alphanumeric terms.
pub(crate) fn query_terms(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Build an FTS5 MATCH expression: each term quoted with a prefix star,
/// OR-joined, so any term can hit and longer forms still match.
fn fts_prefix_query(terms: &[String]) -> String {
    terms
        .iter()
        .map(|t| format!("\"{}\"*", t.replace('"', "")))
        .filter(|t| t != "\"\"*")
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Context windows around query-term occurrences: up to [`MAX_HIGHLIGHTS`]
/// windows of ±[`HIGHLIGHT_RADIUS`] characters, clipped ends marked with an
/// ellipsis.
fn build_highlights(content: &str, terms: &[String]) -> Vec<String> {
    // Lowercasing can change byte lengths, so record the original offset of
    // the character each lowered byte came from.
    let mut lowered = String::with_capacity(content.len());
    let mut origin: Vec<usize> = Vec::with_capacity(content.len());
    for (idx, ch) in content.char_indices() {
        for lc in ch.to_lowercase() {
            lowered.push(lc);
        }
        origin.resize(lowered.len(), idx);
    }

    let mut windows: Vec<(usize, usize)> = Vec::new();
    for term in terms {
        if term.is_empty() {
            continue;
        }
        let mut from = 0;
        while let Some(pos) = lowered[from..].find(term.as_str()) {
            let start = from + pos;
            let end = start + term.len();
            let first = origin[start];
            let last = origin[end - 1];
            let after = last + content[last..].chars().next().map_or(0, char::len_utf8);
            windows.push((
                floor_char_boundary(content, first.saturating_sub(HIGHLIGHT_RADIUS)),
                ceil_char_boundary(content, (after + HIGHLIGHT_RADIUS).min(content.len())),
            ));
            from = end;
            if windows.len() >= MAX_HIGHLIGHTS * terms.len().max(1) {
                break;
            }
        }
    }

    windows.sort();
    let mut merged: Vec<(usize, usize)> = Vec::new();
    for (start, end) in windows {
        match merged.last_mut() {
            Some((_, prev_end)) if start <= *prev_end => *prev_end = (*prev_end).max(end),
            _ => merged.push((start, end)),
        }
    }

    merged
        .into_iter()
        .take(MAX_HIGHLIGHTS)
        .map(|(start, end)| {
            let prefix = if start > 0 { "…" } else { "" };
            let suffix = if end < content.len() { "…" } else { "" };
            format!("{prefix}{}{suffix}", &content[start..end])
        })
        .collect()
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}
