//! Recursive character splitting for ingestion.
//!
//! Text is cut on the coarsest separator that occurs (paragraphs, then lines,
//! sentences, words, characters), and the pieces are merged back greedily up to
//! `chunk_size` characters with a tail of at most `chunk_overlap` characters
//! repeated at the head of the next chunk. All lengths are in characters.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::error::{RagError, Result};

pub const DEFAULT_SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

/// A text chunk with source information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    /// The text content
    pub text: String,
    /// Source identifier (file path)
    pub source: String,
    /// Character offset in original document
    pub start_offset: usize,
    /// Chunk index within the source
    pub chunk_index: usize,
}

/// Byte range into the document being split.
type Span = (usize, usize);

#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl RecursiveSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::InvalidInput(
                "chunk_size must be at least 1".to_string(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(RagError::InvalidInput(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Splits one document. Whitespace-only chunks are dropped; the rest are
    /// trimmed and tagged with their character offset in `text`.
    pub fn split_document(&self, text: &str, source: &str) -> Vec<TextChunk> {
        let spans = self.split_span(text, (0, text.len()), &self.separators);

        let mut chunks = Vec::with_capacity(spans.len());
        let (mut last_byte, mut last_char) = (0usize, 0usize);
        for (chunk_index, (start, end)) in spans.into_iter().enumerate() {
            let start_offset = if start >= last_byte {
                last_char + text[last_byte..start].chars().count()
            } else {
                text[..start].chars().count()
            };
            last_byte = start;
            last_char = start_offset;

            chunks.push(TextChunk {
                text: text[start..end].to_string(),
                source: source.to_string(),
                start_offset,
                chunk_index,
            });
        }
        chunks
    }

    fn split_span(&self, text: &str, span: Span, separators: &[String]) -> Vec<Span> {
        let slice = &text[span.0..span.1];
        let Some(level) = separators
            .iter()
            .position(|sep| sep.is_empty() || slice.contains(sep.as_str()))
        else {
            return self.merge(text, &[span]);
        };
        let remaining = &separators[level + 1..];
        let pieces = pieces_of(slice, span.0, &separators[level]);

        let mut out = Vec::new();
        let mut fitting: Vec<Span> = Vec::new();
        for piece in pieces {
            if char_len(text, piece) < self.chunk_size {
                fitting.push(piece);
                continue;
            }
            if !fitting.is_empty() {
                out.extend(self.merge(text, &fitting));
                fitting.clear();
            }
            if remaining.is_empty() {
                out.extend(trim_span(text, piece));
            } else {
                out.extend(self.split_span(text, piece, remaining));
            }
        }
        if !fitting.is_empty() {
            out.extend(self.merge(text, &fitting));
        }
        out
    }

    /// Greedily joins adjacent pieces into chunks of at most `chunk_size`.
    fn merge(&self, text: &str, pieces: &[Span]) -> Vec<Span> {
        let mut out = Vec::new();
        let mut window: VecDeque<(Span, usize)> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(text, piece);
            if total + len > self.chunk_size && !window.is_empty() {
                if let Some(span) = window_span(&window) {
                    out.extend(trim_span(text, span));
                }
                while total > self.chunk_overlap
                    || (total + len > self.chunk_size && total > 0)
                {
                    match window.pop_front() {
                        Some((_, dropped)) => total -= dropped,
                        None => break,
                    }
                }
            }
            window.push_back((piece, len));
            total += len;
        }
        if let Some(span) = window_span(&window) {
            out.extend(trim_span(text, span));
        }
        out
    }
}

/// Cuts `slice` before every occurrence of `sep`, keeping the separator at the
/// head of the following piece so the pieces concatenate back to `slice`.
fn pieces_of(slice: &str, base: usize, sep: &str) -> Vec<Span> {
    if sep.is_empty() {
        return slice
            .char_indices()
            .map(|(i, c)| (base + i, base + i + c.len_utf8()))
            .collect();
    }

    let mut cuts: Vec<usize> = vec![0];
    cuts.extend(slice.match_indices(sep).map(|(i, _)| i).filter(|&i| i != 0));
    cuts.push(slice.len());
    cuts.windows(2)
        .filter(|w| w[0] < w[1])
        .map(|w| (base + w[0], base + w[1]))
        .collect()
}

fn window_span(window: &VecDeque<(Span, usize)>) -> Option<Span> {
    let first = window.front()?;
    let last = window.back()?;
    Some((first.0 .0, last.0 .1))
}

fn trim_span(text: &str, (start, end): Span) -> Option<Span> {
    let slice = &text[start..end];
    let trimmed = slice.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lead = slice.len() - slice.trim_start().len();
    Some((start + lead, start + lead + trimmed.len()))
}

fn char_len(text: &str, (start, end): Span) -> usize {
    text[start..end].chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn assert_offsets(doc: &str, chunks: &[TextChunk]) {
        for chunk in chunks {
            let at: String = doc
                .chars()
                .skip(chunk.start_offset)
                .take(chunk.text.chars().count())
                .collect();
            assert_eq!(at, chunk.text);
        }
    }

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        assert!(RecursiveSplitter::new(100, 100).is_err());
        assert!(RecursiveSplitter::new(0, 0).is_err());
        assert!(RecursiveSplitter::new(800, 100).is_ok());
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let splitter = RecursiveSplitter::new(800, 100).unwrap();
        let chunks = splitter.split_document("  Hello world.  ", "a.md");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello world.");
        assert_eq!(chunks[0].start_offset, 2);
        assert_eq!(chunks[0].source, "a.md");
    }

    #[test]
    fn prefers_paragraph_boundaries() {
        let splitter = RecursiveSplitter::new(30, 0).unwrap();
        let doc = "First paragraph here.\n\nSecond paragraph here.\n\nThird one.";
        let chunks = splitter.split_document(doc, "a.md");

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["First paragraph here.", "Second paragraph here.", "Third one."]
        );
        assert_offsets(doc, &chunks);
        assert_eq!(
            chunks.iter().map(|c| c.chunk_index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn long_words_fall_back_to_characters() {
        let splitter = RecursiveSplitter::new(10, 2).unwrap();
        let doc = "x".repeat(25);
        let chunks = splitter.split_document(&doc, "a.md");
        assert!(chunks.len() >= 3);
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 10));
        assert_offsets(&doc, &chunks);
    }

    #[test]
    fn overlap_repeats_the_tail() {
        let splitter = RecursiveSplitter::new(20, 8).unwrap();
        let doc = "one two three four five six seven eight nine ten";
        let chunks = splitter.split_document(doc, "a.md");
        assert!(chunks.len() >= 2);
        for pair in chunks.windows(2) {
            let prev_end = pair[0].start_offset + pair[0].text.chars().count();
            assert!(pair[1].start_offset < prev_end);
        }
        assert_offsets(doc, &chunks);
    }

    #[test]
    fn offsets_count_characters_not_bytes() {
        let splitter = RecursiveSplitter::new(12, 0).unwrap();
        let doc = "héllo wörld ünïcode tëxt";
        let chunks = splitter.split_document(doc, "a.md");
        assert_offsets(doc, &chunks);
    }

    #[test]
    fn whitespace_only_documents_yield_nothing() {
        let splitter = RecursiveSplitter::new(10, 0).unwrap();
        assert!(splitter.split_document(" \n\n \n", "a.md").is_empty());
        assert!(splitter.split_document("", "a.md").is_empty());
    }

    proptest! {
        #[test]
        fn chunks_fit_and_point_into_source(
            doc in "[a-zé .\n]{0,400}",
            size in 5usize..60,
            overlap_pct in 0usize..90,
        ) {
            let overlap = size * overlap_pct / 100;
            let splitter = RecursiveSplitter::new(size, overlap).unwrap();
            let chunks = splitter.split_document(&doc, "p.md");
            for chunk in &chunks {
                prop_assert!(!chunk.text.trim().is_empty());
                prop_assert!(chunk.text.chars().count() <= size);
                let at: String = doc
                    .chars()
                    .skip(chunk.start_offset)
                    .take(chunk.text.chars().count())
                    .collect();
                prop_assert_eq!(&at, &chunk.text);
            }
        }
    }
}
