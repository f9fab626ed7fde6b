//! Structural parser capability and the syntax-unit tree it produces.
//!
//! A parser turns raw text into a tree of definition units (functions,
//! classes, sections) addressed by 1-based inclusive line ranges. Anything
//! that cannot be parsed is reported as a [`ParseFailureReason`] and the
//! chunker falls back to fixed-size windows.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::ast::TreeSitterParser;
use crate::chunker::ChunkKind;
use crate::languages::Lang;
use crate::markdown::MarkdownParser;

/// One definition in the parsed source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxUnit {
    pub kind: ChunkKind,
    /// Unqualified name; qualification happens in the chunker.
    pub name: String,
    pub start_line: usize,
    pub end_line: usize,
    pub children: Vec<SyntaxUnit>,
    /// Python docstring or the leading doc comment, markers stripped.
    pub docstring: Option<String>,
}

impl SyntaxUnit {
    #[must_use]
    pub fn leaf(kind: ChunkKind, name: &str, start_line: usize, end_line: usize) -> Self {
        Self {
            kind,
            name: name.to_owned(),
            start_line,
            end_line,
            children: Vec::new(),
            docstring: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyntaxTree {
    /// Top-level units in source order.
    pub units: Vec<SyntaxUnit>,
    /// Lines whose only content is comment text.
    pub comment_lines: BTreeSet<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum ParseFailureReason {
    #[error("syntax error near line {line}")]
    Syntax { line: usize },
    #[error("no structural parser available")]
    Unsupported,
    #[error("unterminated code fence opened at line {line}")]
    UnterminatedFence { line: usize },
}

/// Recorded when a document was indexed with fallback windows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{path} ({language}): {reason}")]
pub struct ParseFailure {
    pub path: String,
    pub language: Lang,
    pub reason: ParseFailureReason,
}

pub trait StructuralParser: Send + Sync {
    /// Parse `source` into a unit tree.
    ///
    /// # Errors
    ///
    /// Returns the reason the source has no trustworthy structure.
    fn parse(&self, source: &str) -> Result<SyntaxTree, ParseFailureReason>;
}

/// Select the structural parser for a language.
///
/// `None` means the language is prose without structure. It is chunked
/// with fallback windows but no [`ParseFailure`] is reported.
#[must_use]
pub fn parser_for(lang: Lang) -> Option<Box<dyn StructuralParser>> {
    match lang {
        Lang::Text => None,
        Lang::Markdown => Some(Box::new(MarkdownParser)),
        _ => Some(Box::new(TreeSitterParser::new(lang))),
    }
}
