//! Markdown note and skill file parsing.
//!
//! Notes are plain markdown with lightweight conventions instead of strict
//! frontmatter: the first `# ` heading near the top becomes the title, and
//! tags come from either a `tags:` line or inline `#hashtag` tokens. Files
//! that match neither convention still index fine, just untitled and
//! untagged.

use std::path::Path;

use crate::error::{MemoryError, Result};

/// How far down we look for a title heading.
const TITLE_SCAN_LINES: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedNote {
    pub title: Option<String>,
    pub tags: Vec<String>,
    pub body: String,
}

/// Parse note markdown into title, tags, and body.
pub fn parse_note(content: &str) -> ParsedNote {
    let lines: Vec<&str> = content.lines().collect();

    let mut title = None;
    let mut title_line = None;
    for (i, line) in lines.iter().take(TITLE_SCAN_LINES).enumerate() {
        if let Some(rest) = line.strip_prefix("# ") {
            let heading = rest.trim();
            if !heading.is_empty() {
                title = Some(heading.to_string());
                title_line = Some(i);
                break;
            }
        }
    }

    let mut tags = Vec::new();
    let mut tag_line = None;
    for (i, line) in lines.iter().enumerate() {
        if Some(i) == title_line {
            continue;
        }
        if let Some(parsed) = parse_tags_line(line) {
            tags = parsed;
            tag_line = Some(i);
            break;
        }
    }
    if tags.is_empty() {
        for (i, line) in lines.iter().enumerate() {
            if Some(i) == title_line {
                continue;
            }
            let hashtags = parse_hashtags(line);
            if hashtags.len() >= 2 {
                tags = hashtags;
                tag_line = Some(i);
                break;
            }
        }
    }

    let body = lines
        .iter()
        .enumerate()
        .filter(|(i, _)| Some(*i) != title_line && Some(*i) != tag_line)
        .map(|(_, l)| *l)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string();

    ParsedNote { title, tags, body }
}

/// Read and parse a note file from disk.
pub fn read_note(path: &Path) -> Result<ParsedNote> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| MemoryError::malformed(path, format!("unreadable note: {e}")))?;
    Ok(parse_note(&content))
}

/// Render the markdown the engine itself writes for a new note.
pub fn render_note(title: &str, content: &str, tags: &[String]) -> String {
    let mut out = format!("# {title}\n\n");
    if !tags.is_empty() {
        out.push_str(&format!("tags: {}\n\n", tags.join(", ")));
    }
    out.push_str(content.trim_end());
    out.push('\n');
    out
}

/// Turn a title into a stable filename slug.
pub fn slugify(title: &str) -> String {
    let slug: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect();
    let slug = slug
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.is_empty() {
        "note".to_string()
    } else {
        slug
    }
}

/// `tags: a, b` or `tags: [a, b]` or `Tags: a b`.
fn parse_tags_line(line: &str) -> Option<Vec<String>> {
    let trimmed = line.trim();
    let rest = trimmed
        .strip_prefix("tags:")
        .or_else(|| trimmed.strip_prefix("Tags:"))?;
    let rest = rest.trim().trim_start_matches('[').trim_end_matches(']');
    let tags: Vec<String> = rest
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(|t| t.trim().trim_matches('"').trim_matches('\'').to_string())
        .filter(|t| !t.is_empty())
        .collect();
    if tags.is_empty() {
        None
    } else {
        Some(tags)
    }
}

fn parse_hashtags(line: &str) -> Vec<String> {
    line.split_whitespace()
        .filter_map(|word| {
            let tag = word.strip_prefix('#')?;
            // a markdown heading is "# word", hashtags have no space
            if tag.is_empty() || tag.starts_with('#') {
                return None;
            }
            if tag.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_') {
                Some(tag.to_string())
            } else {
                None
            }
        })
        .collect()
}
