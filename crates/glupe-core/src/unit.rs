//! Semantic units produced by one resolution pass.

use std::fmt;
use std::ops::Range;

/// Kind of a semantic unit recognized in blueprint text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitKind {
    /// `$$ id { ... }$$`, may span lines
    BlockContainer,
    /// `$ id { ... }$`, confined to one line
    InlineContainer,
    /// `$$ABSTRACT id { ... }$$`, inheritance source only
    AbstractContainer,
    /// `$: id -> value`
    EphemeralVar,
    /// `$$: id -> value`, survives across invocations
    PersistentVar,
    /// `$CONST: id -> value`
    Constant,
}

impl UnitKind {
    /// Whether this unit carries instructions for the oracle.
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            UnitKind::BlockContainer | UnitKind::InlineContainer | UnitKind::AbstractContainer
        )
    }

    /// Whether this unit is ever dispatched to the oracle.
    pub fn is_dispatched(&self) -> bool {
        matches!(self, UnitKind::BlockContainer | UnitKind::InlineContainer)
    }

    /// Whether this unit is a declaration (`$:`, `$$:`, `$CONST:`).
    pub fn is_declaration(&self) -> bool {
        !self.is_container()
    }

    /// Short label used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            UnitKind::BlockContainer => "block",
            UnitKind::InlineContainer => "inline",
            UnitKind::AbstractContainer => "abstract",
            UnitKind::EphemeralVar => "var",
            UnitKind::PersistentVar => "persistent var",
            UnitKind::Constant => "const",
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A named unit of blueprint text.
///
/// Created by the scanner with `resolved_content` and `content_hash` unset;
/// the symbol table fills both when the unit is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemanticUnit {
    /// Identifier, unique within a resolution pass
    pub id: String,
    /// What the unit is
    pub kind: UnitKind,
    /// Body text (containers) or value (declarations), trimmed
    pub raw_content: String,
    /// Parent ids in declaration order
    pub parents: Vec<String>,
    /// Parameter ids in declaration order
    pub params: Vec<String>,
    /// Content after inheritance and parameter injection
    pub resolved_content: Option<String>,
    /// Hash of `resolved_content`
    pub content_hash: Option<String>,
    /// Byte range of the whole unit (header to closer) in the scanned text
    pub span: Range<usize>,
    /// 1-based line where the unit starts
    pub line: usize,
}

impl SemanticUnit {
    /// Create an unresolved unit.
    pub fn new(id: impl Into<String>, kind: UnitKind, raw_content: impl Into<String>) -> Self {
        let id = id.into();
        debug_assert!(!id.is_empty(), "Unit id must not be empty");

        Self {
            id,
            kind,
            raw_content: raw_content.into(),
            parents: Vec::new(),
            params: Vec::new(),
            resolved_content: None,
            content_hash: None,
            span: 0..0,
            line: 1,
        }
    }

    /// Set parent ids.
    pub fn with_parents(mut self, parents: Vec<String>) -> Self {
        self.parents = parents;
        self
    }

    /// Set parameter ids.
    pub fn with_params(mut self, params: Vec<String>) -> Self {
        self.params = params;
        self
    }

    /// Set source location.
    pub fn at(mut self, span: Range<usize>, line: usize) -> Self {
        debug_assert!(span.start <= span.end);
        debug_assert!(line > 0, "Lines are 1-based");
        self.span = span;
        self.line = line;
        self
    }

    /// Content to hand to children and the oracle: resolved if available, raw otherwise.
    pub fn effective_content(&self) -> &str {
        self.resolved_content.as_deref().unwrap_or(&self.raw_content)
    }
}
