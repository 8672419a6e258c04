//! Document chunking
//!
//! A tagged document is split on sentence boundaries and re-accumulated
//! into chunks. A chunk is emitted once it is at least `min_chars`
//! characters long and contains at least one complete `<LABEL>..</LABEL>`
//! pair. Sentence boundaries never fall inside a tag pair.

use serde::{Deserialize, Serialize};

/// A contiguous piece of the tagged document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Position in document order
    pub index: usize,
    pub text: String,
}

/// Chunking configuration
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Minimum chunk length in characters
    pub min_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self { min_chars: 1500 }
    }
}

/// Sentence-accumulating chunker
#[derive(Debug, Clone, Default)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub fn with_min_chars(min_chars: usize) -> Self {
        Self::new(ChunkerConfig { min_chars })
    }

    pub fn min_chars(&self) -> usize {
        self.config.min_chars
    }

    /// Split a tagged document into chunks.
    ///
    /// Text left over after the last emitted chunk is appended to that
    /// chunk. With no previous chunk, the leftover becomes a chunk only if
    /// it holds a tag pair, so an untagged document yields no chunks.
    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        let mut texts: Vec<String> = Vec::new();
        let mut current = String::new();

        for sentence in split_sentences(text) {
            current.push_str(sentence);
            if current.chars().count() >= self.config.min_chars && contains_tag_pair(&current) {
                texts.push(std::mem::take(&mut current));
            }
        }

        if !current.trim().is_empty() {
            match texts.last_mut() {
                Some(last) => last.push_str(&current),
                None if contains_tag_pair(&current) => texts.push(current),
                None => {}
            }
        }

        tracing::debug!(
            chunks = texts.len(),
            min_chars = self.config.min_chars,
            "Document chunked"
        );

        texts
            .into_iter()
            .enumerate()
            .map(|(index, text)| Chunk { index, text })
            .collect()
    }
}

/// Split text into sentences, keeping trailing whitespace with each one.
///
/// A boundary follows `.`, `!` or `?` when whitespace comes next, and
/// follows any blank line. Concatenating the result gives back `text`.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let protected = tag_pair_spans(text);
    let inside_tag = |pos: usize| protected.iter().any(|&(s, e)| pos > s && pos < e);

    let bytes = text.as_bytes();
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let next_is_space = bytes.get(i + 1).is_some_and(|c| c.is_ascii_whitespace());
        let terminal = matches!(bytes[i], b'.' | b'!' | b'?') && next_is_space;
        let blank_line = bytes[i] == b'\n' && bytes.get(i + 1) == Some(&b'\n');

        if (terminal || blank_line) && !inside_tag(i) {
            let mut end = i + 1;
            while end < bytes.len() && bytes[end].is_ascii_whitespace() {
                end += 1;
            }
            sentences.push(&text[start..end]);
            start = end;
            i = end;
            continue;
        }
        i += 1;
    }

    if start < text.len() {
        sentences.push(&text[start..]);
    }
    sentences
}

/// Whether `text` holds at least one complete `<LABEL>..</LABEL>` pair
pub fn contains_tag_pair(text: &str) -> bool {
    !tag_pair_spans(text).is_empty()
}

/// Byte spans `(open_start, close_end)` of complete tag pairs
fn tag_pair_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut search = 0;

    while let Some(offset) = text[search..].find('<') {
        let open_start = search + offset;
        search = open_start + 1;

        let Some(label) = opening_label(&text[open_start..]) else {
            continue;
        };
        let body_start = open_start + label.len() + 2;
        let closing = format!("</{label}>");
        if let Some(close) = text[body_start..].find(&closing) {
            let close_end = body_start + close + closing.len();
            spans.push((open_start, close_end));
            search = close_end;
        }
    }
    spans
}

/// Label of an opening tag at the start of `s`: `<` + `[A-Z][A-Z0-9_]*` + `>`
fn opening_label(s: &str) -> Option<&str> {
    let rest = s.strip_prefix('<')?;
    let end = rest.find('>')?;
    let label = &rest[..end];
    let mut chars = label.chars();
    let first = chars.next()?;
    if first.is_ascii_uppercase()
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
    {
        Some(label)
    } else {
        None
    }
}

// ============================================================================
// Tests
// ============================================================================
