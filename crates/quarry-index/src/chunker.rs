//! Structural chunking with nested-definition elision and windowed fallback.
//!
//! A document is parsed into a unit tree. Every unit becomes the contiguous
//! segments of its own lines that lie outside its nested units; nested units
//! become chunks of their own, and the enclosing segment records an
//! [`ElidedRef`] placeholder for each. Module-level code outside any unit is
//! emitted the same way under the file stem.
//!
//! Oversized chunks are split by [`window_spans`] and keep their kind and
//! symbol. When parsing fails the whole document is windowed with
//! [`ChunkKind::FallbackWindow`]; only fallback and split windows may overlap.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::languages::Lang;
use crate::loader::SourceDocument;
use crate::parser::{ParseFailure, SyntaxTree, SyntaxUnit, parser_for};
use crate::window::{effective_window, window_spans};

/// Namespace for deterministic chunk ids.
const CHUNK_NAMESPACE: Uuid = Uuid::from_u128(0x6b1c_52f0_3d7e_4a58_9e21_0f4c_a7d3_b915);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkKind {
    Module,
    Class,
    Function,
    Block,
    FallbackWindow,
}

impl ChunkKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Module => "module",
            Self::Class => "class",
            Self::Function => "function",
            Self::Block => "block",
            Self::FallbackWindow => "fallback-window",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        [
            Self::Module,
            Self::Class,
            Self::Function,
            Self::Block,
            Self::FallbackWindow,
        ]
        .into_iter()
        .find(|k| k.as_str() == s)
    }
}

impl std::fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Placeholder for a nested definition cut out of its enclosing chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElidedRef {
    pub symbol_name: String,
    pub start_line: usize,
    pub end_line: usize,
}

/// One structurally coherent unit of source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub path: String,
    pub language: Lang,
    pub kind: ChunkKind,
    /// Qualified symbol, e.g. `Greeter.greet`; module-level code uses the file stem.
    pub symbol_name: String,
    /// 1-based, inclusive.
    pub start_line: usize,
    /// 1-based, inclusive.
    pub end_line: usize,
    /// Source lines `[start_line, end_line]` verbatim, without the final newline.
    pub text: String,
    pub token_count: usize,
    pub content_hash: String,
    /// Produced by splitting a larger region into overlapping windows.
    pub windowed: bool,
    pub elided: Vec<ElidedRef>,
    /// Documentation of the definition, on the chunk holding its header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Chunks longer than this many lines are windowed (default: 120).
    pub max_lines: usize,
    /// Chunks estimated above this many tokens are windowed (default: 1024).
    pub max_tokens: usize,
    /// Window length in lines (default: 60).
    pub window_lines: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_lines: 120,
            max_tokens: 1024,
            window_lines: 60,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChunkOutput {
    pub chunks: Vec<Chunk>,
    /// Set when the document was indexed with fallback windows.
    pub parse_failure: Option<ParseFailure>,
}

/// Rough token estimate: one token per four characters, rounded up.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Deterministic id from path, qualified symbol and start line.
#[must_use]
pub fn chunk_id(path: &str, symbol_name: &str, start_line: usize) -> String {
    let key = format!("{path}\n{symbol_name}\n{start_line}");
    Uuid::new_v5(&CHUNK_NAMESPACE, key.as_bytes()).to_string()
}

/// Chunk one document. Never fails: parse problems are reported in
/// [`ChunkOutput::parse_failure`] and recovered by windowing.
#[must_use]
pub fn chunk_document(doc: &SourceDocument, config: &ChunkerConfig) -> ChunkOutput {
    if doc.raw_text.trim().is_empty() {
        return ChunkOutput::default();
    }

    let mut emitter = Emitter::new(doc, config);
    let parse_failure = match parser_for(doc.language) {
        // prose: fallback windows, but nothing failed
        None => {
            emitter.emit_fallback();
            None
        }
        Some(parser) => match parser.parse(&doc.raw_text) {
            Ok(tree) => {
                emitter.emit_tree(&tree);
                None
            }
            Err(reason) => {
                tracing::warn!(
                    path = %doc.path,
                    %reason,
                    "parse failed, indexing with fallback windows"
                );
                emitter.emit_fallback();
                Some(ParseFailure {
                    path: doc.path.clone(),
                    language: doc.language,
                    reason,
                })
            }
        },
    };

    ChunkOutput {
        chunks: emitter.finish(),
        parse_failure,
    }
}

/// Byte ranges of each line, excluding the `\n`.
struct LineIndex<'a> {
    source: &'a str,
    lines: Vec<(usize, usize)>,
}

impl<'a> LineIndex<'a> {
    fn new(source: &'a str) -> Self {
        let mut lines = Vec::new();
        let mut start = 0;
        for (i, b) in source.bytes().enumerate() {
            if b == b'\n' {
                lines.push((start, i));
                start = i + 1;
            }
        }
        if start < source.len() {
            lines.push((start, source.len()));
        }
        Self { source, lines }
    }

    fn len(&self) -> usize {
        self.lines.len()
    }

    fn line(&self, n: usize) -> &'a str {
        self.lines
            .get(n.wrapping_sub(1))
            .map_or("", |&(s, e)| &self.source[s..e])
    }

    fn slice(&self, start: usize, end: usize) -> &'a str {
        let from = self.lines[start - 1].0;
        let to = self.lines[end - 1].1;
        &self.source[from..to]
    }
}

struct Emitter<'a> {
    doc: &'a SourceDocument,
    config: &'a ChunkerConfig,
    lines: LineIndex<'a>,
    stem: String,
    comment_lines: BTreeSet<usize>,
    out: Vec<Chunk>,
}

impl<'a> Emitter<'a> {
    fn new(doc: &'a SourceDocument, config: &'a ChunkerConfig) -> Self {
        let stem = std::path::Path::new(&doc.path)
            .file_stem()
            .map_or_else(|| doc.path.clone(), |s| s.to_string_lossy().into_owned());
        Self {
            doc,
            config,
            lines: LineIndex::new(&doc.raw_text),
            stem,
            comment_lines: BTreeSet::new(),
            out: Vec::new(),
        }
    }

    fn emit_tree(&mut self, tree: &SyntaxTree) {
        self.comment_lines.clone_from(&tree.comment_lines);
        let units = normalize(tree.units.clone(), 1, self.lines.len());
        let stem = self.stem.clone();
        let n = self.lines.len();
        self.emit_residue(ChunkKind::Module, &stem, 1, n, &units, "");
        for unit in &units {
            self.emit_unit(unit, "");
        }
    }

    fn emit_fallback(&mut self) {
        let n = self.lines.len();
        let tokens = estimate_tokens(&self.doc.raw_text);
        let window = effective_window(self.config.window_lines, n, tokens, self.config.max_tokens);
        let stem = self.stem.clone();
        self.push_windows(ChunkKind::FallbackWindow, &stem, 1, n, window, Vec::new());
    }

    fn emit_unit(&mut self, unit: &SyntaxUnit, scope: &str) {
        let symbol = qualify(scope, &unit.name);
        let first = self.out.len();
        self.emit_residue(
            unit.kind,
            &symbol,
            unit.start_line,
            unit.end_line,
            &unit.children,
            &symbol,
        );
        if let Some(head) = self.out.get_mut(first)
            && head.symbol_name == symbol
        {
            head.docstring.clone_from(&unit.docstring);
        }
        for child in &unit.children {
            self.emit_unit(child, &symbol);
        }
    }

    /// Emit the lines of `[start, end]` not covered by `children`.
    fn emit_residue(
        &mut self,
        kind: ChunkKind,
        symbol: &str,
        start: usize,
        end: usize,
        children: &[SyntaxUnit],
        child_scope: &str,
    ) {
        let mut gaps = Vec::new();
        let mut cursor = start;
        for child in children {
            if child.start_line > cursor {
                gaps.push((cursor, child.start_line - 1));
            }
            cursor = cursor.max(child.end_line + 1);
        }
        if cursor <= end {
            gaps.push((cursor, end));
        }

        let segments: Vec<(usize, usize)> = gaps
            .into_iter()
            .filter_map(|(s, e)| self.trim_segment(s, e))
            .collect();

        for (i, &(s, e)) in segments.iter().enumerate() {
            let next = segments.get(i + 1).map(|seg| seg.0);
            let elided = children
                .iter()
                .filter(|c| {
                    let after_this = c.start_line > e && next.is_none_or(|n| c.start_line < n);
                    let before_first = i == 0 && c.start_line < s;
                    after_this || before_first
                })
                .map(|c| ElidedRef {
                    symbol_name: qualify(child_scope, &c.name),
                    start_line: c.start_line,
                    end_line: c.end_line,
                })
                .collect();
            self.push_sized(kind, symbol, s, e, elided);
        }
    }

    /// Strip blank edge lines; drop segments without code.
    fn trim_segment(&self, mut start: usize, mut end: usize) -> Option<(usize, usize)> {
        while start <= end && self.lines.line(start).trim().is_empty() {
            start += 1;
        }
        while end >= start && self.lines.line(end).trim().is_empty() {
            end -= 1;
        }
        if start > end {
            return None;
        }
        (start..=end)
            .any(|n| {
                !self.comment_lines.contains(&n)
                    && self.lines.line(n).chars().any(char::is_alphanumeric)
            })
            .then_some((start, end))
    }

    fn push_sized(
        &mut self,
        kind: ChunkKind,
        symbol: &str,
        start: usize,
        end: usize,
        elided: Vec<ElidedRef>,
    ) {
        let lines = end - start + 1;
        let tokens = estimate_tokens(self.lines.slice(start, end));
        if lines <= self.config.max_lines && tokens <= self.config.max_tokens {
            let chunk = self.make_chunk(kind, symbol, start, end, false, elided);
            self.out.push(chunk);
            return;
        }
        let window = effective_window(
            self.config.window_lines.min(self.config.max_lines),
            lines,
            tokens,
            self.config.max_tokens,
        );
        self.push_windows(kind, symbol, start, end, window, elided);
    }

    fn push_windows(
        &mut self,
        kind: ChunkKind,
        symbol: &str,
        start: usize,
        end: usize,
        window: usize,
        mut elided: Vec<ElidedRef>,
    ) {
        let spans: Vec<_> = window_spans(start, end, window)
            .into_iter()
            .filter(|&(s, e)| !self.lines.slice(s, e).trim().is_empty())
            .collect();
        let last = spans.len().saturating_sub(1);
        for (i, (s, e)) in spans.into_iter().enumerate() {
            let refs = if i == last {
                std::mem::take(&mut elided)
            } else {
                Vec::new()
            };
            let chunk = self.make_chunk(kind, symbol, s, e, true, refs);
            self.out.push(chunk);
        }
    }

    fn make_chunk(
        &self,
        kind: ChunkKind,
        symbol: &str,
        start: usize,
        end: usize,
        windowed: bool,
        elided: Vec<ElidedRef>,
    ) -> Chunk {
        let text = self.lines.slice(start, end).to_owned();
        Chunk {
            chunk_id: chunk_id(&self.doc.path, symbol, start),
            path: self.doc.path.clone(),
            language: self.doc.language,
            kind,
            symbol_name: symbol.to_owned(),
            start_line: start,
            end_line: end,
            token_count: estimate_tokens(&text),
            content_hash: content_hash(kind, &text, &elided),
            text,
            windowed,
            elided,
            docstring: None,
        }
    }

    fn finish(mut self) -> Vec<Chunk> {
        self.out.sort_by_key(|c| (c.start_line, c.end_line));
        let mut seen = HashSet::new();
        self.out.retain(|c| seen.insert(c.chunk_id.clone()));
        self.out
    }
}

fn qualify(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_owned()
    } else {
        format!("{scope}.{name}")
    }
}

/// Covers everything a stored record carries besides its id and position.
fn content_hash(kind: ChunkKind, text: &str, elided: &[ElidedRef]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(text.as_bytes());
    for r in elided {
        hasher.update(format!("\n{}:{}-{}", r.symbol_name, r.start_line, r.end_line).as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

/// Clamp units to `[lo, hi]`, order them, and fold a unit that starts on or
/// before the previous sibling's last line into that sibling.
fn normalize(mut units: Vec<SyntaxUnit>, lo: usize, hi: usize) -> Vec<SyntaxUnit> {
    units.sort_by_key(|u| (u.start_line, u.end_line));
    let mut out: Vec<SyntaxUnit> = Vec::with_capacity(units.len());
    for mut unit in units {
        unit.start_line = unit.start_line.clamp(lo, hi);
        unit.end_line = unit.end_line.clamp(unit.start_line, hi);
        if let Some(prev) = out.last_mut()
            && unit.start_line <= prev.end_line
        {
            prev.end_line = prev.end_line.max(unit.end_line);
            continue;
        }
        let children = std::mem::take(&mut unit.children);
        unit.children = normalize(children, unit.start_line, unit.end_line);
        out.push(unit);
    }
    out
}
