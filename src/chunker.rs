//! Splits text into overlapping, line-anchored chunks.
//!
//! Token budgets are approximate: like the rest of the agent's text
//! handling, a simple `chars / 4` heuristic stands in for a real tokenizer.

use sha2::{Digest, Sha256};

use crate::config::ChunkingConfig;

/// A single chunk of text with its originating line span (1-based,
/// inclusive) and a stable hash of its exact text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChunk {
    pub start_line: u32,
    pub end_line: u32,
    pub text: String,
    pub hash: String,
}

const CHARS_PER_TOKEN: usize = 4;

/// Hex-encoded SHA-256 digest of `text`, used everywhere a stable
/// cross-run-safe content hash is needed (chunk hashes, file hashes).
/// `DefaultHasher` is deliberately avoided: its output is not guaranteed
/// stable across Rust versions.
pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    hex_encode(&digest)
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Splits `text` into overlapping chunks whose boundaries fall on line
/// breaks. Deterministic: identical `(text, config)` always yields
/// byte-identical chunk texts.
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Vec<RawChunk> {
    if text.is_empty() {
        return Vec::new();
    }

    let lines: Vec<&str> = text.split('\n').collect();
    let max_chars = (config.tokens * CHARS_PER_TOKEN).max(1);
    let overlap_chars = config.overlap * CHARS_PER_TOKEN;

    let mut chunks = Vec::new();
    let mut start_idx = 0usize;
    let n = lines.len();

    while start_idx < n {
        let mut end_idx = start_idx;
        let mut size = lines[end_idx].len();
        // Always take at least one line, even if it alone exceeds the budget.
        while end_idx + 1 < n && size + 1 + lines[end_idx + 1].len() <= max_chars {
            end_idx += 1;
            size += 1 + lines[end_idx].len();
        }

        let chunk_text = lines[start_idx..=end_idx].join("\n");
        chunks.push(RawChunk {
            start_line: (start_idx + 1) as u32,
            end_line: (end_idx + 1) as u32,
            hash: content_hash(&chunk_text),
            text: chunk_text,
        });

        if end_idx + 1 >= n {
            break;
        }

        // Walk backward from end_idx to find how many trailing lines make up
        // approximately `overlap_chars`, then resume the next chunk there.
        let mut overlap_size = 0usize;
        let mut back_idx = end_idx;
        while back_idx > start_idx && overlap_size < overlap_chars {
            overlap_size += lines[back_idx].len() + 1;
            back_idx -= 1;
        }
        let next_start = (back_idx + 1).max(start_idx + 1);
        start_idx = next_start;
    }

    chunks
}
