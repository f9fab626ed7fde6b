//! Contextualized embedding text and citation headers.
//!
//! Chunks are embedded with a short header naming where they come from;
//! the stored and displayed text stays verbatim.

use crate::chunker::{Chunk, ChunkKind};

/// Generate text optimized for embedding (not for display).
#[must_use]
pub fn contextualize_for_embedding(chunk: &Chunk) -> String {
    let mut text = String::with_capacity(chunk.text.len() + 128);

    text.push_str("# ");
    text.push_str(&chunk.path);
    text.push('\n');

    if chunk.kind != ChunkKind::FallbackWindow {
        text.push_str("# Symbol: ");
        text.push_str(&chunk.symbol_name);
        text.push_str(" (");
        text.push_str(chunk.kind.as_str());
        text.push_str(")\n");
    }

    text.push_str("# Language: ");
    text.push_str(chunk.language.id());
    text.push('\n');

    text.push_str(&chunk.text);
    text
}

/// Citation line for a chunk, e.g. `src/lib.rs :: Point.new (lines 10-12)`.
#[must_use]
pub fn citation(path: &str, symbol_name: &str, start_line: usize, end_line: usize) -> String {
    format!("{path} :: {symbol_name} (lines {start_line}-{end_line})")
}
