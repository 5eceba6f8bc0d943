//! Blueprint scanner.
//!
//! Splits raw blueprint text into literal spans and semantic units without
//! losing a byte of literal text. Recognition, highest precedence first:
//!
//! 1. `$$ [ABSTRACT] id [(params)] [-> parents] { body }$$` (may span lines)
//! 2. `$ id ... { body }$` confined to one line
//! 3. `$$: id -> value`, `$: id -> value`, `$CONST: id -> value`
//! 4. anything else is inert text
//!
//! Structural problems (unclosed or nested blocks, unterminated inline
//! containers, duplicate ids) are errors, never repaired.

use std::collections::HashMap;

use crate::token::{ident_len, parse_header, Header};
use crate::unit::{SemanticUnit, UnitKind};

const BLOCK_CLOSER: &str = "}$$";
const CONST_PREFIX: &str = "$CONST:";

/// Scanner errors. All of them abort the run before any oracle call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScanError {
    #[error("line {line}: container \"{id}\" is never closed (expected `}}$$`)")]
    UnclosedContainer { id: String, line: usize },

    #[error("line {line}: container \"{inner}\" is nested inside \"{outer}\"; containers must not nest")]
    NestedContainer {
        outer: String,
        inner: String,
        line: usize,
    },

    #[error("line {line}: inline container must be closed on the same line (use `$$ ... $$` for multi-line logic): {context}")]
    UnterminatedInline { line: usize, context: String },

    #[error("line {line}: duplicate id \"{id}\" (first declared on line {first_line})")]
    DuplicateId {
        id: String,
        line: usize,
        first_line: usize,
    },
}

impl ScanError {
    /// 1-based line the error refers to.
    pub fn line(&self) -> usize {
        match self {
            ScanError::UnclosedContainer { line, .. }
            | ScanError::NestedContainer { line, .. }
            | ScanError::UnterminatedInline { line, .. }
            | ScanError::DuplicateId { line, .. } => *line,
        }
    }
}

/// One piece of scanned text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Text outside any unit, verbatim
    Literal(String),
    /// A recognized unit; its source text is `input[unit.span]`
    Unit(SemanticUnit),
}

/// Result of scanning one blueprint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scan {
    /// Segments in source order
    pub segments: Vec<Segment>,
    /// Anonymous `$${ ... }$$` templates were seen (kept as literal text)
    pub has_anonymous_templates: bool,
}

impl Scan {
    /// Units in source order.
    pub fn units(&self) -> impl Iterator<Item = &SemanticUnit> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Unit(u) => Some(u),
            Segment::Literal(_) => None,
        })
    }

    /// Whether anything here will be dispatched to the oracle.
    pub fn has_active_units(&self) -> bool {
        self.has_anonymous_templates || self.units().any(|u| u.kind.is_dispatched())
    }

    /// Rebuild the input from literal spans and unit source spans.
    pub fn reconstruct(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Unit(unit) => out.push_str(&input[unit.span.clone()]),
            }
        }
        out
    }
}

/// Byte offset → 1-based line lookup.
pub(crate) struct LineIndex {
    newlines: Vec<usize>,
}

impl LineIndex {
    pub(crate) fn new(text: &str) -> Self {
        Self {
            newlines: text.match_indices('\n').map(|(i, _)| i).collect(),
        }
    }

    pub(crate) fn line_of(&self, pos: usize) -> usize {
        self.newlines.partition_point(|&nl| nl < pos) + 1
    }
}

/// What was found at a `$`.
enum Recognized {
    Unit(SemanticUnit),
    /// Anonymous template; literal text continues after it
    Anonymous { end: usize },
    /// Not syntax; skip this many bytes and keep scanning
    Inert { skip: usize },
}

/// Scan blueprint text.
pub fn scan(text: &str) -> Result<Scan, ScanError> {
    let lines = LineIndex::new(text);
    let mut out = Scan::default();
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut literal_start = 0;
    let mut pos = 0;

    while let Some(offset) = text[pos..].find('$') {
        let start = pos + offset;

        match recognize(text, start, &lines)? {
            Recognized::Unit(unit) => {
                if let Some(&first_line) = seen.get(&unit.id) {
                    return Err(ScanError::DuplicateId {
                        id: unit.id,
                        line: unit.line,
                        first_line,
                    });
                }
                seen.insert(unit.id.clone(), unit.line);

                if start > literal_start {
                    out.segments
                        .push(Segment::Literal(text[literal_start..start].to_string()));
                }
                pos = unit.span.end;
                literal_start = pos;
                out.segments.push(Segment::Unit(unit));
            }
            Recognized::Anonymous { end } => {
                out.has_anonymous_templates = true;
                pos = end;
            }
            Recognized::Inert { skip } => {
                debug_assert!(skip > 0, "Scanner must make progress");
                pos = start + skip;
            }
        }
    }

    if literal_start < text.len() {
        out.segments
            .push(Segment::Literal(text[literal_start..].to_string()));
    }

    Ok(out)
}

fn recognize(text: &str, start: usize, lines: &LineIndex) -> Result<Recognized, ScanError> {
    let rest = &text[start..];

    if rest.starts_with("$$:") {
        return Ok(declaration(text, start, 3, UnitKind::PersistentVar, lines));
    }
    if rest.starts_with("$$") {
        return block(text, start, lines);
    }
    if rest.starts_with("$:") {
        return Ok(declaration(text, start, 2, UnitKind::EphemeralVar, lines));
    }
    if rest.starts_with(CONST_PREFIX) {
        return Ok(declaration(
            text,
            start,
            CONST_PREFIX.len(),
            UnitKind::Constant,
            lines,
        ));
    }
    inline(text, start, lines)
}

fn line_end(text: &str, from: usize) -> usize {
    text[from..].find('\n').map(|i| from + i).unwrap_or(text.len())
}

/// `id -> remainder-of-line` after a declaration prefix.
fn declaration(
    text: &str,
    start: usize,
    prefix_len: usize,
    kind: UnitKind,
    lines: &LineIndex,
) -> Recognized {
    let end = line_end(text, start);
    let line = &text[start + prefix_len..end];

    let after_ws = line.trim_start_matches([' ', '\t']);
    let id_len = ident_len(after_ws);

    if id_len == 0 {
        return Recognized::Inert { skip: prefix_len };
    }

    let id = &after_ws[..id_len];
    let mut value = after_ws[id_len..].trim_start_matches([' ', '\t']);
    if let Some(stripped) = value.strip_prefix("->") {
        value = stripped;
    }
    let value = value.trim();

    Recognized::Unit(SemanticUnit::new(id, kind, value).at(start..end, lines.line_of(start)))
}

fn container_unit(header: &Header<'_>, kind: UnitKind, body: &str) -> SemanticUnit {
    let id = header.id.unwrap_or_default();
    SemanticUnit::new(id, kind, body.trim())
        .with_parents(header.parents.iter().map(|p| p.to_string()).collect())
        .with_params(header.params.iter().map(|p| p.to_string()).collect())
}

fn block(text: &str, start: usize, lines: &LineIndex) -> Result<Recognized, ScanError> {
    let Some(header) = parse_header(text, start + 2, text.len()) else {
        return Ok(Recognized::Inert { skip: 2 });
    };

    let closer = text[header.body_start..]
        .find(BLOCK_CLOSER)
        .map(|i| header.body_start + i);

    let Some(id) = header.id else {
        return Ok(match closer {
            Some(c) => Recognized::Anonymous {
                end: c + BLOCK_CLOSER.len(),
            },
            None => Recognized::Inert { skip: 2 },
        });
    };

    let line = lines.line_of(start);
    let search_end = closer.unwrap_or(text.len());

    if let Some((inner, inner_pos)) = nested_block(text, header.body_start, search_end) {
        return Err(ScanError::NestedContainer {
            outer: id.to_string(),
            inner,
            line: lines.line_of(inner_pos),
        });
    }

    let Some(closer) = closer else {
        return Err(ScanError::UnclosedContainer {
            id: id.to_string(),
            line,
        });
    };

    let kind = if header.is_abstract {
        UnitKind::AbstractContainer
    } else {
        UnitKind::BlockContainer
    };
    let unit = container_unit(&header, kind, &text[header.body_start..closer])
        .at(start..closer + BLOCK_CLOSER.len(), line);
    Ok(Recognized::Unit(unit))
}

/// First named block header inside `text[from..to]`.
fn nested_block(text: &str, from: usize, to: usize) -> Option<(String, usize)> {
    let mut pos = from;
    while let Some(offset) = text[pos..to].find("$$") {
        let at = pos + offset;
        let is_declaration = text[at..].starts_with("$$:");
        if !is_declaration {
            if let Some(Header { id: Some(inner), .. }) = parse_header(text, at + 2, text.len()) {
                return Some((inner.to_string(), at));
            }
        }
        pos = at + 2;
    }
    None
}

fn inline(text: &str, start: usize, lines: &LineIndex) -> Result<Recognized, ScanError> {
    let end = line_end(text, start);
    let Some(header) = parse_header(text, start + 1, end) else {
        return Ok(Recognized::Inert { skip: 1 });
    };

    match inline_closer(text, header.body_start, end) {
        Some((close_brace, after)) => {
            let Some(_) = header.id else {
                return Ok(Recognized::Anonymous { end: after });
            };
            let kind = if header.is_abstract {
                UnitKind::AbstractContainer
            } else {
                UnitKind::InlineContainer
            };
            let unit = container_unit(&header, kind, &text[header.body_start..close_brace])
                .at(start..after, lines.line_of(start));
            Ok(Recognized::Unit(unit))
        }
        None if !text[header.body_start..end].contains('}') => {
            let context: String = text[start..end].chars().take(50).collect();
            Err(ScanError::UnterminatedInline {
                line: lines.line_of(start),
                context,
            })
        }
        None => Ok(Recognized::Inert { skip: 1 }),
    }
}

/// Find `}` followed (after optional blanks) by `$` before `end`.
///
/// Returns the brace offset and the offset just past the `$`.
pub(crate) fn inline_closer(text: &str, from: usize, end: usize) -> Option<(usize, usize)> {
    let mut search = from;
    while let Some(offset) = text[search..end].find('}') {
        let brace = search + offset;
        let after_brace = &text[brace + 1..end];
        let blanks = after_brace.len() - after_brace.trim_start_matches([' ', '\t']).len();
        let dollar = brace + 1 + blanks;
        if text[dollar..end].starts_with('$') {
            return Some((brace, dollar + 1));
        }
        search = brace + 1;
    }
    None
}
