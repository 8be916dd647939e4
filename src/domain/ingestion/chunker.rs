use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};
use tiktoken_rs::CoreBPE;

pub const CHUNK_SIZE_TOKENS: usize = 500;
pub const OVERLAP_TOKENS: usize = 100;

static ENCODING: Lazy<Option<CoreBPE>> = Lazy::new(|| tiktoken_rs::cl100k_base().ok());

/// Sliding token window with overlap, ported from
/// `original_source/worker/jobs/ingest_index.py::chunk_text`. Falls back to a
/// 4-chars-per-token character window if the `cl100k_base` vocabulary can't
/// be loaded, matching the original's own fallback.
pub fn chunk_text(text: &str) -> Vec<String> {
    chunk_text_with(text, CHUNK_SIZE_TOKENS, OVERLAP_TOKENS)
}

pub fn chunk_text_with(text: &str, chunk_size_tokens: usize, overlap_tokens: usize) -> Vec<String> {
    let normalized = text.trim();
    if normalized.is_empty() {
        return vec![];
    }

    match ENCODING.as_ref() {
        Some(encoding) => chunk_by_tokens(normalized, encoding, chunk_size_tokens, overlap_tokens),
        None => chunk_by_chars(normalized, chunk_size_tokens * 4, overlap_tokens * 4),
    }
}

fn chunk_by_tokens(text: &str, encoding: &CoreBPE, chunk_size_tokens: usize, overlap_tokens: usize) -> Vec<String> {
    let token_ids = encoding.encode_ordinary(text);
    if token_ids.is_empty() {
        return vec![];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let total = token_ids.len();

    loop {
        let end = total.min(start + chunk_size_tokens);
        let piece = encoding.decode(token_ids[start..end].to_vec()).unwrap_or_default();
        let piece = piece.trim();
        if !piece.is_empty() {
            chunks.push(piece.to_string());
        }

        if end >= total {
            break;
        }
        start = end.saturating_sub(overlap_tokens).max(start + 1);
    }

    chunks
}

fn chunk_by_chars(text: &str, chunk_size_chars: usize, overlap_chars: usize) -> Vec<String> {
    let chunk_size_chars = chunk_size_chars.max(1);
    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();

    let mut chunks = Vec::new();
    let mut start = 0usize;

    loop {
        let end = total.min(start + chunk_size_chars);
        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            chunks.push(piece.to_string());
        }

        if end >= total {
            break;
        }
        start = end.saturating_sub(overlap_chars).max(start + 1);
    }

    chunks
}

pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_text("   ").is_empty());
    }

    #[test]
    fn short_text_yields_a_single_chunk() {
        let chunks = chunk_text("hello world, this is a short page of text.");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], "hello world, this is a short page of text.");
    }

    #[test]
    fn long_text_overlaps_between_consecutive_chunks() {
        let word = "lorem ";
        let long_text = word.repeat(2000);
        let chunks = chunk_text_with(&long_text, 50, 10);
        assert!(chunks.len() > 1);
    }

    #[test]
    fn content_hash_is_stable_and_content_addressed() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
    }
}
