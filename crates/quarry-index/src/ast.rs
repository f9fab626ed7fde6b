//! Tree-sitter backed [`StructuralParser`].

use std::collections::BTreeSet;

use tree_sitter::{Node, Parser};

use crate::chunker::ChunkKind;
use crate::languages::{Lang, is_comment_kind};
use crate::parser::{ParseFailureReason, StructuralParser, SyntaxTree, SyntaxUnit};

#[derive(Debug, Clone, Copy)]
pub struct TreeSitterParser {
    lang: Lang,
}

impl TreeSitterParser {
    #[must_use]
    pub fn new(lang: Lang) -> Self {
        Self { lang }
    }
}

impl StructuralParser for TreeSitterParser {
    fn parse(&self, source: &str) -> Result<SyntaxTree, ParseFailureReason> {
        let grammar = self.lang.grammar().ok_or(ParseFailureReason::Unsupported)?;

        let mut parser = Parser::new();
        parser
            .set_language(&grammar)
            .map_err(|_| ParseFailureReason::Unsupported)?;
        let tree = parser
            .parse(source, None)
            .ok_or(ParseFailureReason::Unsupported)?;

        let root = tree.root_node();
        if root.has_error() {
            return Err(ParseFailureReason::Syntax {
                line: first_error_line(root),
            });
        }

        let lines: Vec<&str> = source.split('\n').collect();
        let mut comment_lines = BTreeSet::new();
        collect_comment_lines(root, &lines, &mut comment_lines);

        let mut units = Vec::new();
        self.collect_units(source, root, &mut units);
        Ok(SyntaxTree {
            units,
            comment_lines,
        })
    }
}

impl TreeSitterParser {
    /// Collect definition units among the descendants of `parent`, stopping
    /// descent at each unit (its own children are collected recursively).
    fn collect_units(&self, source: &str, parent: Node<'_>, out: &mut Vec<SyntaxUnit>) {
        // first row of the contiguous comment/attribute run directly above the next sibling
        let mut trivia_start: Option<usize> = None;
        let mut trivia_end: usize = 0;
        let mut prev_end: Option<usize> = None;

        for child in named_children(parent) {
            let start = child.start_position().row;
            let end = last_row(child);

            if self.lang.is_leading_trivia(child.kind()) {
                let trailing = prev_end.is_some_and(|r| start <= r);
                if trailing {
                    trivia_start = None;
                } else if trivia_start.is_none() || start > trivia_end + 1 {
                    trivia_start = Some(start);
                }
                if !trailing {
                    trivia_end = end;
                }
                prev_end = Some(end);
                continue;
            }

            let leading = trivia_start.filter(|_| start <= trivia_end + 1);
            if let Some(mut unit) = self.unit_for(source, child) {
                if let Some(row) = leading {
                    attach_leading(&mut unit, source, row, start);
                }
                out.push(unit);
            } else {
                let first = out.len();
                self.collect_units(source, child, out);
                // e.g. `export function f` wraps the definition in a statement node
                if let (Some(row), Some(unit)) = (leading, out.get_mut(first))
                    && unit.start_line == start + 1
                {
                    attach_leading(unit, source, row, start);
                }
            }
            trivia_start = None;
            prev_end = Some(end);
        }
    }

    fn unit_for(&self, source: &str, node: Node<'_>) -> Option<SyntaxUnit> {
        if let Some(unit) = self.function_binding(source, node) {
            return Some(unit);
        }
        // Python decorators wrap the real definition
        let definition = if node.kind() == "decorated_definition" {
            node.child_by_field_name("definition")?
        } else {
            node
        };
        let kind = self.lang.unit_kind(definition.kind())?;
        if definition.kind() == "mod_item" && definition.child_by_field_name("body").is_none() {
            return None;
        }

        let mut children = Vec::new();
        self.collect_units(source, definition, &mut children);

        let docstring = if self.lang == Lang::Python {
            body_docstring(definition, source)
        } else {
            None
        };
        Some(SyntaxUnit {
            kind,
            name: unit_name(definition, source),
            start_line: node.start_position().row + 1,
            end_line: last_row(node) + 1,
            children,
            docstring,
        })
    }
}

impl TreeSitterParser {
    /// `const f = () => {}`: a function named by its single declarator,
    /// spanning the whole declaration.
    fn function_binding(&self, source: &str, node: Node<'_>) -> Option<SyntaxUnit> {
        let declarators = named_children(node);
        let [declarator] = declarators.as_slice() else {
            return None;
        };
        let value = declarator.child_by_field_name("value")?;
        if !self.lang.is_function_binding(node.kind(), value.kind()) {
            return None;
        }
        let name = declarator.child_by_field_name("name")?;

        let mut children = Vec::new();
        self.collect_units(source, value, &mut children);

        Some(SyntaxUnit {
            kind: ChunkKind::Function,
            name: source[name.byte_range()].to_string(),
            start_line: node.start_position().row + 1,
            end_line: last_row(node) + 1,
            children,
            docstring: None,
        })
    }
}

/// Extend `unit` up to the trivia starting at `row` (0-based); the trivia
/// ends on the row before `start`.
fn attach_leading(unit: &mut SyntaxUnit, source: &str, row: usize, start: usize) {
    unit.start_line = row + 1;
    if unit.docstring.is_none() {
        let lines = source
            .lines()
            .skip(row)
            .take(start.saturating_sub(row))
            .filter(|l| !l.trim_start().starts_with("#["))
            .map(comment_text);
        unit.docstring = clean_doc(lines);
    }
}

/// Python: the string literal opening a definition's body.
fn body_docstring(definition: Node<'_>, source: &str) -> Option<String> {
    let body = definition.child_by_field_name("body")?;
    let statement = named_children(body).into_iter().next()?;
    if statement.kind() != "expression_statement" {
        return None;
    }
    let string = named_children(statement)
        .into_iter()
        .next()
        .filter(|n| n.kind() == "string")?;
    let content: String = named_children(string)
        .into_iter()
        .filter(|c| c.kind() == "string_content")
        .map(|c| &source[c.byte_range()])
        .collect();
    clean_doc(content.lines())
}

fn comment_text(line: &str) -> &str {
    let line = line.trim();
    let line = line.strip_suffix("*/").unwrap_or(line);
    ["///", "//!", "//", "/**", "/*", "*", "#"]
        .iter()
        .find_map(|marker| line.strip_prefix(marker))
        .unwrap_or(line)
}

/// Trim each line and the whole; `None` when nothing is left.
fn clean_doc<'a>(lines: impl Iterator<Item = &'a str>) -> Option<String> {
    let joined = lines.map(str::trim).collect::<Vec<_>>().join("\n");
    let text = joined.trim();
    (!text.is_empty()).then(|| text.to_owned())
}

fn named_children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

/// Last row that holds node text. A node ending at column 0 ends on the row before.
fn last_row(node: Node<'_>) -> usize {
    let start = node.start_position().row;
    let end = node.end_position();
    if end.column == 0 && end.row > start {
        end.row - 1
    } else {
        end.row
    }
}

fn unit_name(node: Node<'_>, source: &str) -> String {
    // tree-sitter-rust: impl_item uses "type" field; Go type_declaration names its type_spec
    node.child_by_field_name("name")
        .or_else(|| node.child_by_field_name("type"))
        .or_else(|| {
            named_children(node)
                .into_iter()
                .find_map(|c| c.child_by_field_name("name"))
        })
        .map_or_else(
            || node.kind().to_string(),
            |n| source[n.byte_range()].to_string(),
        )
}

fn first_error_line(node: Node<'_>) -> usize {
    if node.is_error() || node.is_missing() {
        return node.start_position().row + 1;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.is_error() || child.is_missing() || child.has_error() {
            return first_error_line(child);
        }
    }
    node.start_position().row + 1
}

fn collect_comment_lines(node: Node<'_>, lines: &[&str], out: &mut BTreeSet<usize>) {
    if is_comment_kind(node.kind()) {
        let start = node.start_position();
        let end_row = last_row(node);
        let end = node.end_position();
        let before_blank = lines
            .get(start.row)
            .and_then(|l| l.get(..start.column))
            .is_some_and(|s| s.trim().is_empty());
        let after_blank = if end.row == end_row {
            lines
                .get(end.row)
                .and_then(|l| l.get(end.column..))
                .is_some_and(|s| s.trim().is_empty())
        } else {
            true
        };
        for row in start.row..=end_row {
            let first_ok = row != start.row || before_blank;
            let last_ok = row != end_row || after_blank;
            if first_ok && last_ok {
                out.insert(row + 1);
            }
        }
        return;
    }
    for child in named_children(node) {
        collect_comment_lines(child, lines, out);
    }
}
