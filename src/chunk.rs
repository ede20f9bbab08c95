//! Heading-aware text chunker.
//!
//! Splits document text into [`Chunk`]s using a cascade: group by Markdown
//! heading, then split each section on paragraph boundaries, then sentence
//! boundaries, then a fixed-size window as a last resort — applied top to
//! bottom only when the coarser split still leaves a piece over
//! `max_tokens`. Code documents use a brace/string-literal-aware scanner
//! instead of the sentence pass, so a split never lands inside a string
//! literal or a brace-balanced block under 1200 tokens.
//!
//! Each chunk gets a deterministic UUID v5 derived from
//! `(document_id, ordinal)` — re-chunking the same document with the same
//! policy reproduces the same chunk ids — plus a SHA-256 hash of its text
//! for staleness detection against the embeddings table.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

/// Approximate chars-per-token ratio used across the pipeline (no tokenizer
/// dependency is justified purely for chunk sizing — spec §4.3 treats this
/// as an estimate, not an exact count).
const CHARS_PER_TOKEN: usize = 4;

/// Namespace for deriving deterministic chunk UUIDs (spec §4.3).
const CHUNK_NAMESPACE: Uuid = Uuid::from_bytes([
    0x3b, 0x35, 0x6e, 0x1a, 0x9c, 0x9b, 0x4f, 0x1e, 0x8a, 0x5b, 0x21, 0x3a, 0x6f, 0x0d, 0x77, 0x02,
]);

pub struct ChunkPolicy {
    pub target_tokens: usize,
    pub max_tokens: usize,
    pub min_tokens: usize,
    pub is_code: bool,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            target_tokens: 800,
            max_tokens: 1200,
            min_tokens: 200,
            is_code: false,
        }
    }
}

struct Piece {
    text: String,
    offset_start: usize,
    offset_end: usize,
}

/// Chunks `text` into ordinal-indexed, deterministically-id'd [`Chunk`]s
/// under the given policy.
pub fn chunk_text(document_id: Uuid, text: &str, policy: &ChunkPolicy) -> Vec<Chunk> {
    if text.trim().is_empty() {
        return vec![make_chunk(document_id, 0, "", 0, text.len())];
    }

    let sections = split_by_heading(text);
    let target_chars = policy.target_tokens * CHARS_PER_TOKEN;
    let max_chars = policy.max_tokens * CHARS_PER_TOKEN;
    let min_chars = policy.min_tokens * CHARS_PER_TOKEN;

    let mut pieces: Vec<Piece> = Vec::new();
    for section in sections {
        for para in split_by_paragraph(&section) {
            if para.text.trim().is_empty() {
                continue;
            }
            if para.text.len() <= max_chars {
                pieces.push(para);
                continue;
            }
            let sub_pieces = if policy.is_code {
                split_code_aware(&para, max_chars)
            } else {
                split_by_sentence(&para, max_chars)
            };
            pieces.extend(sub_pieces);
        }
    }

    let grouped = group_to_target(pieces, target_chars, max_chars, min_chars);

    grouped
        .into_iter()
        .enumerate()
        .map(|(i, p)| make_chunk(document_id, i as i64, &p.text, p.offset_start, p.offset_end))
        .collect()
}

/// Splits on Markdown ATX headings (`# `..`###### `), keeping the heading
/// line as part of the section that follows it so downstream chunks retain
/// heading context.
fn split_by_heading(text: &str) -> Vec<String> {
    let lines: Vec<&str> = text.lines().collect();
    let mut sections = Vec::new();
    let mut current = String::new();
    let mut any_heading = false;

    for line in &lines {
        let trimmed = line.trim_start();
        let is_heading = trimmed.starts_with('#')
            && {
                let rest = trimmed.trim_start_matches('#');
                rest.is_empty() || rest.starts_with(' ')
            };
        if is_heading && !current.is_empty() {
            any_heading = true;
            sections.push(std::mem::take(&mut current));
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.is_empty() {
        sections.push(current);
    }

    if any_heading {
        sections
    } else {
        vec![text.to_string()]
    }
}

fn split_by_paragraph(section: &str) -> Vec<Piece> {
    let mut pieces = Vec::new();
    let mut offset = 0usize;
    for para in section.split("\n\n") {
        let start = offset;
        let end = offset + para.len();
        offset = end + 2; // account for the "\n\n" separator consumed by split
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }
        pieces.push(Piece {
            text: trimmed.to_string(),
            offset_start: start,
            offset_end: end,
        });
    }
    pieces
}

fn split_by_sentence(piece: &Piece, max_chars: usize) -> Vec<Piece> {
    let mut out = Vec::new();
    let mut buf = String::new();
    let mut buf_start = piece.offset_start;
    let mut pos = piece.offset_start;

    for sentence in split_sentences(&piece.text) {
        let would_be = if buf.is_empty() {
            sentence.len()
        } else {
            buf.len() + 1 + sentence.len()
        };
        if would_be > max_chars && !buf.is_empty() {
            out.push(Piece {
                text: std::mem::take(&mut buf),
                offset_start: buf_start,
                offset_end: pos,
            });
            buf_start = pos;
        }
        if sentence.len() > max_chars {
            if !buf.is_empty() {
                out.push(Piece {
                    text: std::mem::take(&mut buf),
                    offset_start: buf_start,
                    offset_end: pos,
                });
            }
            out.extend(fixed_window_split(sentence, pos, max_chars));
            buf_start = pos + sentence.len();
        } else {
            if !buf.is_empty() {
                buf.push(' ');
            }
            buf.push_str(sentence);
        }
        pos += sentence.len() + 1;
    }
    if !buf.is_empty() {
        out.push(Piece {
            text: buf,
            offset_start: buf_start,
            offset_end: piece.offset_end,
        });
    }
    if out.is_empty() {
        out.push(Piece {
            text: piece.text.clone(),
            offset_start: piece.offset_start,
            offset_end: piece.offset_end,
        });
    }
    out
}

/// Naive sentence boundary detection on `. `, `! `, `? ` followed by a
/// capital letter or end of string — adequate for chunk sizing, not a full
/// sentence tokenizer.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let bytes = text.as_bytes();
    let mut start = 0usize;
    let mut i = 0usize;
    while i < bytes.len() {
        let b = bytes[i];
        if (b == b'.' || b == b'!' || b == b'?') && i + 1 < bytes.len() && bytes[i + 1] == b' ' {
            out.push(text[start..=i].trim());
            start = i + 2;
            i += 2;
            continue;
        }
        i += 1;
    }
    if start < bytes.len() {
        out.push(text[start..].trim());
    }
    out.into_iter().filter(|s| !s.is_empty()).collect()
}

fn fixed_window_split(text: &str, base_offset: usize, max_chars: usize) -> Vec<Piece> {
    let mut out = Vec::new();
    let mut remaining = text;
    let mut offset = base_offset;
    while !remaining.is_empty() {
        let split_at = remaining.len().min(max_chars);
        let actual = if split_at < remaining.len() {
            remaining[..split_at]
                .rfind(' ')
                .map(|p| p + 1)
                .unwrap_or(split_at)
        } else {
            split_at
        };
        let piece = &remaining[..actual];
        out.push(Piece {
            text: piece.trim().to_string(),
            offset_start: offset,
            offset_end: offset + actual,
        });
        offset += actual;
        remaining = &remaining[actual..];
    }
    out
}

/// Splits code text without breaking inside a string literal or a
/// brace-balanced block under `max_chars` (spec §4.3 code-aware split).
fn split_code_aware(piece: &Piece, max_chars: usize) -> Vec<Piece> {
    let text = &piece.text;
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut depth: i32 = 0;
    let mut in_string: Option<u8> = None;
    let mut escaped = false;
    let mut chunk_start = 0usize;
    let mut last_safe_break: Option<usize> = None;

    for (i, &b) in bytes.iter().enumerate() {
        if let Some(quote) = in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == quote {
                in_string = None;
            }
            continue;
        }
        match b {
            b'"' | b'\'' => in_string = Some(b),
            b'{' | b'(' | b'[' => depth += 1,
            b'}' | b')' | b']' => depth -= 1,
            b'\n' if depth == 0 => last_safe_break = Some(i + 1),
            _ => {}
        }

        if i - chunk_start >= max_chars {
            let break_at = last_safe_break.filter(|&p| p > chunk_start).unwrap_or(i + 1);
            out.push(Piece {
                text: text[chunk_start..break_at].trim().to_string(),
                offset_start: piece.offset_start + chunk_start,
                offset_end: piece.offset_start + break_at,
            });
            chunk_start = break_at;
            last_safe_break = None;
        }
    }
    if chunk_start < bytes.len() {
        out.push(Piece {
            text: text[chunk_start..].trim().to_string(),
            offset_start: piece.offset_start + chunk_start,
            offset_end: piece.offset_end,
        });
    }
    out.retain(|p| !p.text.is_empty());
    if out.is_empty() {
        out.push(Piece {
            text: text.clone(),
            offset_start: piece.offset_start,
            offset_end: piece.offset_end,
        });
    }
    out
}

/// Packs sub-document pieces into chunks around `target_chars`, never
/// exceeding `max_chars`, and folds a trailing under-`min_chars` chunk into
/// its predecessor so no chunk falls below the soft minimum except when the
/// whole document is shorter than the minimum.
fn group_to_target(
    pieces: Vec<Piece>,
    target_chars: usize,
    max_chars: usize,
    min_chars: usize,
) -> Vec<Piece> {
    let mut grouped: Vec<Piece> = Vec::new();
    let mut buf = String::new();
    let mut buf_start = 0usize;
    let mut buf_end = 0usize;
    let mut has_buf = false;

    for p in pieces {
        let would_be = if buf.is_empty() {
            p.text.len()
        } else {
            buf.len() + 1 + p.text.len()
        };
        if has_buf && would_be > target_chars && would_be > max_chars.min(target_chars) {
            grouped.push(Piece {
                text: std::mem::take(&mut buf),
                offset_start: buf_start,
                offset_end: buf_end,
            });
            has_buf = false;
        }
        if !has_buf {
            buf_start = p.offset_start;
            has_buf = true;
        } else {
            buf.push('\n');
        }
        buf.push_str(&p.text);
        buf_end = p.offset_end;
    }
    if has_buf {
        grouped.push(Piece {
            text: buf,
            offset_start: buf_start,
            offset_end: buf_end,
        });
    }

    if grouped.len() > 1 {
        if let Some(last) = grouped.last() {
            if last.text.len() < min_chars {
                let tail = grouped.pop().unwrap();
                let prev = grouped.last_mut().unwrap();
                prev.text.push('\n');
                prev.text.push_str(&tail.text);
                prev.offset_end = tail.offset_end;
            }
        }
    }

    if grouped.is_empty() {
        grouped.push(Piece {
            text: String::new(),
            offset_start: 0,
            offset_end: 0,
        });
    }

    grouped
}

fn make_chunk(document_id: Uuid, ordinal: i64, text: &str, offset_start: usize, offset_end: usize) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    let id = Uuid::new_v5(
        &CHUNK_NAMESPACE,
        format!("{document_id}:{ordinal}").as_bytes(),
    );

    Chunk {
        id,
        document_id,
        ordinal,
        token_estimate: (text.len() / CHARS_PER_TOKEN.max(1)) as i64,
        offset_start: offset_start as i64,
        offset_end: offset_end as i64,
        text: text.to_string(),
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_id() -> Uuid {
        Uuid::new_v4()
    }

    #[test]
    fn small_text_single_chunk() {
        let chunks = chunk_text(doc_id(), "Hello, world!", &ChunkPolicy::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].ordinal, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn empty_text_yields_one_empty_chunk() {
        let chunks = chunk_text(doc_id(), "", &ChunkPolicy::default());
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn ordinals_are_contiguous() {
        let text = (0..50)
            .map(|i| format!("Paragraph number {i}. It has a bit of text in it."))
            .collect::<Vec<_>>()
            .join("\n\n");
        let policy = ChunkPolicy {
            target_tokens: 10,
            max_tokens: 20,
            min_tokens: 2,
            is_code: false,
        };
        let chunks = chunk_text(doc_id(), &text, &policy);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.ordinal, i as i64);
        }
        assert!(chunks.len() > 1);
    }

    #[test]
    fn deterministic_ids_for_same_document_and_ordinal() {
        let id = doc_id();
        let text = "Alpha.\n\nBeta.\n\nGamma.\n\nDelta.";
        let c1 = chunk_text(id, text, &ChunkPolicy::default());
        let c2 = chunk_text(id, text, &ChunkPolicy::default());
        for (a, b) in c1.iter().zip(c2.iter()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.hash, b.hash);
        }
    }

    #[test]
    fn different_documents_get_different_chunk_ids_for_same_ordinal() {
        let text = "Just one short chunk.";
        let c1 = chunk_text(doc_id(), text, &ChunkPolicy::default());
        let c2 = chunk_text(doc_id(), text, &ChunkPolicy::default());
        assert_ne!(c1[0].id, c2[0].id);
    }

    #[test]
    fn heading_sections_are_respected() {
        let text = "# Intro\nSome intro text here with enough content to matter.\n\n# Body\nSome body text here with enough content to matter too.";
        let chunks = chunk_text(
            doc_id(),
            text,
            &ChunkPolicy {
                target_tokens: 5,
                max_tokens: 8,
                min_tokens: 1,
                is_code: false,
            },
        );
        assert!(chunks.iter().any(|c| c.text.contains("Intro")));
        assert!(chunks.iter().any(|c| c.text.contains("Body")));
    }

    #[test]
    fn code_aware_split_never_breaks_inside_string_literal() {
        let code = format!(
            "fn f() {{\n    let s = \"{}\";\n}}",
            "x".repeat(50)
        );
        let policy = ChunkPolicy {
            target_tokens: 5,
            max_tokens: 10,
            min_tokens: 1,
            is_code: true,
        };
        let chunks = chunk_text(doc_id(), &code, &policy);
        for c in &chunks {
            let quote_count = c.text.matches('"').count();
            assert_eq!(quote_count % 2, 0, "chunk split inside a string literal: {:?}", c.text);
        }
    }
}
