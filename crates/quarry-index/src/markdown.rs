//! Markdown sectioning by ATX headings.
//!
//! Each heading opens a [`ChunkKind::Block`] unit that runs until the next
//! heading of the same or a higher level. Deeper headings nest as children.
//! Lines inside fenced code blocks are never treated as headings.

use crate::chunker::ChunkKind;
use crate::parser::{ParseFailureReason, StructuralParser, SyntaxTree, SyntaxUnit};

#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownParser;

struct Fence {
    marker: char,
    len: usize,
    line: usize,
}

impl StructuralParser for MarkdownParser {
    fn parse(&self, source: &str) -> Result<SyntaxTree, ParseFailureReason> {
        let lines: Vec<&str> = source.lines().collect();
        let mut headings = Vec::new();
        let mut fence: Option<Fence> = None;

        for (idx, line) in lines.iter().enumerate() {
            let line_no = idx + 1;
            if let Some((marker, len)) = fence_marker(line) {
                match &fence {
                    None => {
                        fence = Some(Fence {
                            marker,
                            len,
                            line: line_no,
                        });
                        continue;
                    }
                    Some(open)
                        if open.marker == marker
                            && len >= open.len
                            && line.trim_start().trim_start_matches(marker).trim().is_empty() =>
                    {
                        fence = None;
                        continue;
                    }
                    Some(_) => {}
                }
            }
            if fence.is_some() {
                continue;
            }
            if let Some((level, title)) = atx_heading(line) {
                headings.push((line_no, level, title));
            }
        }

        if let Some(open) = fence {
            return Err(ParseFailureReason::UnterminatedFence { line: open.line });
        }

        Ok(SyntaxTree {
            units: nest_sections(&headings, &lines),
            comment_lines: std::collections::BTreeSet::new(),
        })
    }
}

/// Opening or closing fence: up to three spaces, then three or more backticks or tildes.
fn fence_marker(line: &str) -> Option<(char, usize)> {
    let indent = line.len() - line.trim_start_matches(' ').len();
    if indent > 3 {
        return None;
    }
    let rest = &line[indent..];
    let marker = rest.chars().next().filter(|c| *c == '`' || *c == '~')?;
    let len = rest.chars().take_while(|c| *c == marker).count();
    (len >= 3).then_some((marker, len))
}

fn atx_heading(line: &str) -> Option<(usize, String)> {
    let indent = line.len() - line.trim_start_matches(' ').len();
    if indent > 3 {
        return None;
    }
    let rest = &line[indent..];
    let level = rest.chars().take_while(|c| *c == '#').count();
    if !(1..=6).contains(&level) {
        return None;
    }
    let after = &rest[level..];
    if !after.is_empty() && !after.starts_with([' ', '\t']) {
        return None;
    }
    let title = after.trim().trim_end_matches('#').trim_end();
    Some((level, title.to_owned()))
}

fn nest_sections(headings: &[(usize, usize, String)], lines: &[&str]) -> Vec<SyntaxUnit> {
    let last_content = |start: usize, end: usize| -> usize {
        (start..=end)
            .rev()
            .find(|n| lines.get(n - 1).is_some_and(|l| !l.trim().is_empty()))
            .unwrap_or(start)
    };

    let mut roots: Vec<SyntaxUnit> = Vec::new();
    let mut stack: Vec<(usize, SyntaxUnit)> = Vec::new();

    let close = |stack: &mut Vec<(usize, SyntaxUnit)>, roots: &mut Vec<SyntaxUnit>, end: usize| {
        if let Some((_, mut unit)) = stack.pop() {
            unit.end_line = last_content(unit.start_line, end);
            match stack.last_mut() {
                Some((_, parent)) => parent.children.push(unit),
                None => roots.push(unit),
            }
        }
    };

    for (line, level, title) in headings {
        while stack.last().is_some_and(|(l, _)| *l >= *level) {
            close(&mut stack, &mut roots, line - 1);
        }
        let name = if title.is_empty() {
            format!("section-{line}")
        } else {
            title.clone()
        };
        stack.push((*level, SyntaxUnit::leaf(ChunkKind::Block, &name, *line, *line)));
    }
    while !stack.is_empty() {
        close(&mut stack, &mut roots, lines.len());
    }
    roots
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> SyntaxTree {
        MarkdownParser.parse(source).unwrap()
    }

    #[test]
    fn headings_nest_by_level() {
        let source = "\
intro text

# Guide

overview

## Install

run it

## Usage

call it

# Appendix
notes
";
        let tree = parse(source);
        assert_eq!(tree.units.len(), 2);
        let guide = &tree.units[0];
        assert_eq!((guide.name.as_str(), guide.start_line, guide.end_line), ("Guide", 3, 13));
        let children: Vec<_> = guide
            .children
            .iter()
            .map(|c| (c.name.as_str(), c.start_line, c.end_line))
            .collect();
        assert_eq!(children, vec![("Install", 7, 9), ("Usage", 11, 13)]);
        let appendix = &tree.units[1];
        assert_eq!((appendix.start_line, appendix.end_line), (15, 16));
    }

    #[test]
    fn headings_inside_fences_are_ignored() {
        let source = "# Real\n```sh\n# not a heading\n```\n";
        let tree = parse(source);
        assert_eq!(tree.units.len(), 1);
        assert_eq!(tree.units[0].end_line, 4);
    }

    #[test]
    fn unterminated_fence_is_a_failure() {
        let err = MarkdownParser.parse("# A\n\n~~~\ncode\n").unwrap_err();
        assert_eq!(err, ParseFailureReason::UnterminatedFence { line: 3 });
    }

    #[test]
    fn longer_closing_fence_closes() {
        let tree = parse("````\n```\n````\n# After\n");
        assert_eq!(tree.units.len(), 1);
        assert_eq!(tree.units[0].name, "After");
    }

    #[test]
    fn atx_heading_rules() {
        assert_eq!(atx_heading("## Title ##"), Some((2, "Title".into())));
        assert_eq!(atx_heading("#hashtag"), None);
        assert_eq!(atx_heading("####### too deep"), None);
        assert_eq!(atx_heading("    # indented code"), None);
        assert_eq!(atx_heading("#"), Some((1, String::new())));
    }

    #[test]
    fn empty_heading_gets_positional_name() {
        let tree = parse("#\nbody\n");
        assert_eq!(tree.units[0].name, "section-1");
    }

    #[test]
    fn no_headings_no_units() {
        assert!(parse("just prose\nmore prose\n").units.is_empty());
    }
}
