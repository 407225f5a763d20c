//! Context assembly.
//!
//! Turns retrieved chunks into:
//! 1. the grounding text handed to the generator
//! 2. a per-file citation list for the response

use serde::{Deserialize, Serialize};

use super::retriever::RetrievedChunk;

/// Returned by [`build_context`] when nothing was retrieved.
pub const NO_CONTEXT_SENTINEL: &str = "No relevant context found in the knowledge base.";

const BLOCK_SEPARATOR: &str = "\n\n---\n\n";
const ELLIPSIS: char = '…';

/// One cited source file in an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub filename: String,
    pub snippet: String,
    pub similarity_score: f64,
    pub start_index: Option<u64>,
}

/// Concatenates chunks into one labeled context block per chunk, in input order.
pub fn build_context(chunks: &[RetrievedChunk]) -> String {
    if chunks.is_empty() {
        return NO_CONTEXT_SENTINEL.to_string();
    }

    chunks
        .iter()
        .map(|chunk| format!("[Source: {}]\n{}", chunk.filename(), chunk.content()))
        .collect::<Vec<_>>()
        .join(BLOCK_SEPARATOR)
}

/// One citation per distinct filename.
///
/// The representative chunk of a file is its highest-scoring one (ties keep
/// the earlier chunk). Citations are ordered by each file's first appearance.
pub fn deduplicate_sources(chunks: &[RetrievedChunk], snippet_max_len: usize) -> Vec<Citation> {
    let mut best: Vec<&RetrievedChunk> = Vec::new();

    for chunk in chunks {
        match best.iter().position(|b| b.filename() == chunk.filename()) {
            Some(pos) => {
                if chunk.similarity_score() > best[pos].similarity_score() {
                    best[pos] = chunk;
                }
            }
            None => best.push(chunk),
        }
    }

    best.into_iter()
        .map(|chunk| Citation {
            filename: chunk.filename().to_string(),
            snippet: snippet(chunk.content(), snippet_max_len),
            similarity_score: chunk.similarity_score(),
            start_index: chunk.start_index(),
        })
        .collect()
}

fn snippet(content: &str, max_len: usize) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(max_len).collect();
    if chars.next().is_none() {
        return head.trim().to_string();
    }
    let mut out = head.trim().to_string();
    out.push(ELLIPSIS);
    out
}
