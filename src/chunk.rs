//! Document chunking.
//!
//! Two strategies are available:
//!
//! - **Window** (default): fixed windows of `chunk_size` characters, each
//!   starting `chunk_size - overlap` characters after the previous one.
//!   The windows cover the whole input with no gaps, and the last window may
//!   be shorter.
//! - **Sections**: paragraphs (split on blank lines) grouped until a
//!   whitespace-token bound is hit. Headings start a new chunk and `---`
//!   dividers flush one.
//!
//! Every chunk records its byte span in the source text and a SHA-256 hash
//! of its content, which the assembler uses to drop duplicate hits.
//!
//! # Example
//!
//! ```rust
//! use chat_assist::chunk::Chunker;
//!
//! let chunker = Chunker::new(100, 20).unwrap();
//! let text = "x".repeat(250);
//! let chunks = chunker.chunk("notes.txt", &text);
//! let spans: Vec<_> = chunks.iter().map(|c| (c.start, c.end)).collect();
//! assert_eq!(spans, vec![(0, 100), (80, 180), (160, 250)]);
//! ```

use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

use crate::config::{ChunkStrategy, ChunkingConfig};
use crate::error::ConfigError;
use crate::models::DocumentChunk;

/// Splits document text into [`DocumentChunk`]s.
#[derive(Debug, Clone)]
pub struct Chunker {
    strategy: ChunkStrategy,
    chunk_size: usize,
    overlap: usize,
    max_tokens: usize,
}

impl Chunker {
    /// Window chunker. `overlap` must be strictly less than `chunk_size`.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, ConfigError> {
        if chunk_size == 0 || overlap >= chunk_size {
            return Err(ConfigError::InvalidChunking {
                chunk_size,
                overlap,
            });
        }
        Ok(Self {
            strategy: ChunkStrategy::Window,
            chunk_size,
            overlap,
            max_tokens: 0,
        })
    }

    /// Section chunker bounded by `max_tokens` whitespace-separated tokens.
    pub fn sections(max_tokens: usize) -> Result<Self, ConfigError> {
        if max_tokens == 0 {
            return Err(ConfigError::Invalid(
                "chunking.max_tokens must be > 0".to_string(),
            ));
        }
        Ok(Self {
            strategy: ChunkStrategy::Sections,
            chunk_size: 0,
            overlap: 0,
            max_tokens,
        })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self, ConfigError> {
        match config.strategy {
            ChunkStrategy::Window => Self::new(config.chunk_size, config.overlap),
            ChunkStrategy::Sections => Self::sections(config.max_tokens),
        }
    }

    /// Chunk `text`. Empty input yields no chunks.
    pub fn chunk(&self, source_id: &str, text: &str) -> Vec<DocumentChunk> {
        match self.strategy {
            ChunkStrategy::Window => chunk_window(source_id, text, self.chunk_size, self.overlap),
            ChunkStrategy::Sections => chunk_sections(source_id, text, self.max_tokens),
        }
    }
}

/// Fixed-size character windows with overlap.
///
/// Sizes are in characters, not bytes, so multi-byte text never splits
/// inside a code point.
fn chunk_window(source_id: &str, text: &str, chunk_size: usize, overlap: usize) -> Vec<DocumentChunk> {
    if text.is_empty() {
        return Vec::new();
    }

    // Byte offset of every char boundary, including the end of the text.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = bounds.len() - 1;
    let step = chunk_size - overlap;

    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + chunk_size).min(char_count);
        chunks.push(make_chunk(
            source_id,
            chunks.len(),
            text,
            bounds[start],
            bounds[end],
        ));
        if end == char_count {
            break;
        }
        start += step;
    }
    chunks
}

fn paragraph_break() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\r?\n\s*\r?\n").expect("valid paragraph regex"))
}

fn heading() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(###|\*\*|[A-Z][a-z]+(?:\s[A-Z][a-z]+)*)").expect("valid heading regex")
    })
}

fn divider() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^-{3,}$").expect("valid divider regex"))
}

/// Longest paragraph, in tokens, still treated as a bare title.
const MAX_TITLE_TOKENS: usize = 12;

/// A bold line, or a short line with no sentence punctuation.
fn is_title(paragraph: &str) -> bool {
    if paragraph.starts_with("###") || paragraph.contains('\n') {
        return false;
    }
    if paragraph.len() > 4 && paragraph.starts_with("**") && paragraph.ends_with("**") {
        return true;
    }
    paragraph.split_whitespace().count() <= MAX_TITLE_TOKENS
        && !paragraph.ends_with(['.', '!', '?', ',', ';', ':'])
}

/// A trimmed paragraph and its byte span in the source text.
struct Paragraph<'a> {
    text: &'a str,
    start: usize,
    end: usize,
}

fn paragraphs(text: &str) -> Vec<Paragraph<'_>> {
    let mut spans = Vec::new();
    let mut prev = 0;
    for m in paragraph_break().find_iter(text) {
        spans.push((prev, m.start()));
        prev = m.end();
    }
    spans.push((prev, text.len()));

    spans
        .into_iter()
        .filter_map(|(start, end)| {
            let raw = &text[start..end];
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return None;
            }
            let lead = raw.len() - raw.trim_start().len();
            Some(Paragraph {
                text: trimmed,
                start: start + lead,
                end: start + lead + trimmed.len(),
            })
        })
        .collect()
}

/// Paragraph and heading aware grouping.
fn chunk_sections(source_id: &str, text: &str, max_tokens: usize) -> Vec<DocumentChunk> {
    let mut groups: Vec<Vec<Paragraph<'_>>> = Vec::new();
    let mut current: Vec<Paragraph<'_>> = Vec::new();
    let mut current_tokens = 0;

    for para in paragraphs(text) {
        if divider().is_match(para.text) {
            if !current.is_empty() {
                groups.push(std::mem::take(&mut current));
                current_tokens = 0;
            }
            continue;
        }

        let tokens = para.text.split_whitespace().count();
        let starts_section = heading().is_match(para.text);
        let overflows = current_tokens + tokens > max_tokens;

        if (starts_section || overflows) && !current.is_empty() {
            groups.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        current_tokens += tokens;
        current.push(para);
    }
    if !current.is_empty() {
        groups.push(current);
    }

    // A standalone title in front of the first real section carries no content.
    if groups.len() > 1
        && groups[0].len() == 1
        && is_title(groups[0][0].text)
        && heading().is_match(groups[1][0].text)
    {
        groups.remove(0);
    }

    groups
        .iter()
        .enumerate()
        .map(|(ordinal, group)| {
            let joined = group.iter().map(|p| p.text).collect::<Vec<_>>().join(" ");
            let start = group[0].start;
            let end = group[group.len() - 1].end;
            DocumentChunk {
                source_id: source_id.to_string(),
                hash: hash_text(&joined),
                text: joined,
                ordinal,
                start,
                end,
            }
        })
        .collect()
}

/// Create a [`DocumentChunk`] for `text[start..end]`.
fn make_chunk(source_id: &str, ordinal: usize, text: &str, start: usize, end: usize) -> DocumentChunk {
    let slice = &text[start..end];
    DocumentChunk {
        source_id: source_id.to_string(),
        text: slice.to_string(),
        ordinal,
        start,
        end,
        hash: hash_text(slice),
    }
}

pub(crate) fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Rebuild the source by dropping each chunk's overlap with its predecessor.
    fn reassemble(chunks: &[DocumentChunk]) -> String {
        let mut out = String::new();
        let mut covered = 0;
        for c in chunks {
            assert!(c.start <= covered, "gap before chunk {}", c.ordinal);
            let skip = covered - c.start;
            out.push_str(&c.text[skip..]);
            covered = c.end;
        }
        out
    }

    #[test]
    fn test_example_offsets() {
        let chunker = Chunker::new(100, 20).unwrap();
        let text = "a".repeat(250);
        let chunks = chunker.chunk("doc", &text);
        let spans: Vec<_> = chunks.iter().map(|c| (c.start, c.end)).collect();
        assert_eq!(spans, vec![(0, 100), (80, 180), (160, 250)]);
        assert_eq!(chunks[2].text.len(), 90);
    }

    #[test]
    fn test_empty_text() {
        let chunker = Chunker::new(100, 20).unwrap();
        assert!(chunker.chunk("doc", "").is_empty());
    }

    #[test]
    fn test_overlap_validation() {
        assert!(matches!(
            Chunker::new(10, 10),
            Err(ConfigError::InvalidChunking { .. })
        ));
        assert!(Chunker::new(10, 11).is_err());
        assert!(Chunker::new(0, 0).is_err());
        assert!(Chunker::new(10, 0).is_ok());
    }

    #[test]
    fn test_exact_multiple_has_no_trailing_sliver() {
        let chunker = Chunker::new(10, 2).unwrap();
        let chunks = chunker.chunk("doc", &"b".repeat(10));
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_reconstructs_input() {
        let text: String = (0..200)
            .map(|i| format!("sentence {} of the document. ", i))
            .collect();
        for (size, overlap) in [(7, 0), (50, 10), (64, 63), (1000, 100), (3, 1)] {
            let chunks = Chunker::new(size, overlap).unwrap().chunk("doc", &text);
            assert_eq!(reassemble(&chunks), text, "size {} overlap {}", size, overlap);
            for pair in chunks.windows(2) {
                assert_eq!(
                    text[pair[1].start..pair[0].end].chars().count(),
                    overlap,
                    "adjacent chunks must share exactly the overlap"
                );
            }
        }
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "┌──────────────────┐\n│ Héllo wörld 日本語 │\n└──────────────────┘";
        let chunks = Chunker::new(5, 2).unwrap().chunk("doc", text);
        assert_eq!(reassemble(&chunks), text);
        for c in &chunks {
            assert!(c.text.chars().count() <= 5);
        }
    }

    #[test]
    fn test_ordinals_and_hashes() {
        let text = "abcdefghij".repeat(10);
        let chunks = Chunker::new(30, 5).unwrap().chunk("doc", &text);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.ordinal, i);
            assert_eq!(c.source_id, "doc");
            assert_eq!(c.hash, hash_text(&c.text));
        }
    }

    #[test]
    fn test_sections_split_on_headings_and_dividers() {
        let text = "### Setup\n\ninstall the tool\n\n---\n\nmore notes here\n\n### Usage\n\nrun it";
        let chunks = Chunker::sections(256).unwrap().chunk("doc", text);
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["### Setup install the tool", "more notes here", "### Usage run it"]
        );
        assert_eq!(&text[chunks[2].start..chunks[2].end], "### Usage\n\nrun it");
    }

    #[test]
    fn test_sections_respect_token_bound() {
        let text = "one two three\n\nfour five six\n\nseven eight";
        let chunks = Chunker::sections(4).unwrap().chunk("doc", text);
        assert_eq!(chunks.len(), 3);
        let chunks = Chunker::sections(6).unwrap().chunk("doc", text);
        assert_eq!(chunks[0].text, "one two three four five six");
    }

    #[test]
    fn test_sections_drop_leading_title() {
        let text = "**Field Guide**\n\n### Birds\n\nrobins and wrens";
        let chunks = Chunker::sections(100).unwrap().chunk("doc", text);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].ordinal, 0);
        assert!(chunks[0].text.starts_with("### Birds"));
    }

    #[test]
    fn test_sections_keep_leading_prose() {
        let text = "The pump must be serviced every 90 days by a certified technician.\n\n\
                    Warranty claims require the service log.";
        let chunks = Chunker::sections(256).unwrap().chunk("doc", text);
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "The pump must be serviced every 90 days by a certified technician.",
                "Warranty claims require the service log."
            ]
        );
        assert_eq!(chunks[0].start, 0);
    }

    #[test]
    fn test_sections_keep_long_leading_paragraph() {
        let text = "Operators should log every reading taken from the north sensor array \
                    including the timestamp and unit\n\nMaintenance Schedule\n\nweekly";
        let chunks = Chunker::sections(256).unwrap().chunk("doc", text);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.starts_with("Operators should log"));
        assert_eq!(chunks[1].text, "Maintenance Schedule weekly");
    }

    #[test]
    fn test_title_detection() {
        assert!(is_title("**Field Guide**"));
        assert!(is_title("Annual Report 2024"));
        assert!(!is_title("### Birds"));
        assert!(!is_title("The pump must be serviced."));
        assert!(!is_title("Contact us now:"));
    }

    #[test]
    fn test_sections_empty_text() {
        assert!(Chunker::sections(10).unwrap().chunk("doc", "\n\n  \n").is_empty());
    }
}
