//! Language-aware sliding-window chunking.
//!
//! Chunk sizes are configured in tokens and converted to char budgets with the language's
//! characters-per-token ratio:
//!
//! - Window: each chunk spans `[start, start + chunk_chars)`, clamped to the text length.
//! - Overlap: adaptive. A document smaller than one chunk uses 1%, one smaller than two chunks
//!   uses half the configured overlap (at least 1%), anything larger uses the configured value.
//! - Progress: the next window always starts strictly after the current one, so an overlap of
//!   100% still terminates.
//! - End: the loop stops as soon as a window reaches the end of the text. Stepping back by the
//!   overlap from there would only yield a tail made entirely of text the last chunk already
//!   holds, so no such chunk is emitted.
//!
//! Offsets are counted in chars, never bytes, so multi-byte scripts are never split inside a
//! code point.

use crate::tokens::DEFAULT_CHARS_PER_TOKEN;

use super::types::{Chunk, ChunkingError};

/// Smallest overlap applied once the adaptive rules kick in.
const MIN_OVERLAP_PERCENT: f64 = 1.0;

/// Overlap percent to apply for a document of `total_chars` given a chunk budget.
pub fn effective_overlap_percent(total_chars: usize, chunk_chars: usize, configured: f64) -> f64 {
    if total_chars < chunk_chars {
        MIN_OVERLAP_PERCENT
    } else if total_chars < chunk_chars.saturating_mul(2) {
        (configured / 2.0).max(MIN_OVERLAP_PERCENT)
    } else {
        configured
    }
}

/// Split `text` into overlapping chunks of roughly `chunk_size_tokens` tokens.
///
/// Whitespace-only windows are dropped; emitted chunks are re-indexed contiguously from zero.
/// Returns an empty vector for empty input.
pub fn split_into_chunks(
    text: &str,
    chunk_size_tokens: usize,
    overlap_percent: f64,
    chars_per_token: f64,
) -> Result<Vec<Chunk>, ChunkingError> {
    if chunk_size_tokens == 0 {
        return Err(ChunkingError::InvalidChunkSize);
    }
    if !(0.0..=100.0).contains(&overlap_percent) {
        return Err(ChunkingError::InvalidOverlap(overlap_percent));
    }

    let ratio = if chars_per_token.is_finite() && chars_per_token > 0.0 {
        chars_per_token
    } else {
        DEFAULT_CHARS_PER_TOKEN
    };

    // Byte offset of every char boundary, including the end of the text.
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(offset, _)| offset)
        .chain(std::iter::once(text.len()))
        .collect();
    let total_chars = boundaries.len() - 1;
    if total_chars == 0 {
        return Ok(Vec::new());
    }

    let chunk_chars = ((chunk_size_tokens as f64 * ratio).floor() as usize).max(1);
    let overlap = effective_overlap_percent(total_chars, chunk_chars, overlap_percent);
    let overlap_chars = (chunk_size_tokens as f64 * overlap / 100.0 * ratio).floor() as usize;

    tracing::trace!(
        total_chars,
        chunk_chars,
        overlap_percent = overlap,
        overlap_chars,
        "Computed chunk geometry"
    );

    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < total_chars {
        let end = (start + chunk_chars).min(total_chars);
        let slice = &text[boundaries[start]..boundaries[end]];
        if !slice.trim().is_empty() {
            chunks.push(Chunk {
                index: chunks.len(),
                text: slice.to_string(),
                start_char: start,
                end_char: end,
            });
        }

        if end == total_chars {
            break;
        }

        let next = end.saturating_sub(overlap_chars);
        start = if next <= start { end } else { next };
    }

    Ok(chunks)
}
