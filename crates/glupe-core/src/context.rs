//! One resolution pass over a blueprint.
//!
//! [`ResolutionContext`] carries everything a pass reads and writes: the
//! symbol table, the content cache and the pass options. No global state.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::cache::ContentCache;
use crate::markers::wrap;
use crate::scanner::{scan, ScanError, Segment};
use crate::symbols::{ResolveWarning, SymbolTable};
use crate::unit::UnitKind;

/// Placeholder emitted where an abstract container stood.
pub fn abstract_placeholder(id: &str) -> String {
    format!("// [ABSTRACT: {id}]\n")
}

/// Mutable state of a resolution pass.
#[derive(Debug)]
pub struct ResolutionContext {
    pub symbols: SymbolTable,
    pub cache: ContentCache,
    pub warnings: Vec<ResolveWarning>,
}

impl ResolutionContext {
    /// Context whose symbol table is seeded with the cache's persistent variables.
    pub fn new(cache: ContentCache) -> Self {
        Self {
            symbols: SymbolTable::with_persistent(cache.state()),
            cache,
            warnings: Vec::new(),
        }
    }
}

/// A resolved piece of blueprint text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piece {
    Literal(String),
    /// Container reused from the cache; `hash` is the one in the lock file
    Cached { id: String, hash: String, text: String },
    /// Container that needs the oracle; `prompt` is its resolved content
    Pending { id: String, hash: String, prompt: String },
    Abstract { id: String },
    /// Variable or constant declaration; emits nothing
    Declaration { id: String },
}

/// Output of a resolution pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedBlueprint {
    pub pieces: Vec<Piece>,
    pub has_anonymous_templates: bool,
}

impl ResolvedBlueprint {
    /// Text for the global oracle call, containers wrapped in boundary markers.
    pub fn render(&self) -> String {
        self.render_with(|id, body| wrap(id, body))
    }

    /// Text with cached content inlined and no markers (fill mode output).
    pub fn render_plain(&self) -> String {
        self.render_with(|_, body| body.to_string())
    }

    fn render_with(&self, container: impl Fn(&str, &str) -> String) -> String {
        let mut out = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Literal(text) => out.push_str(text),
                Piece::Cached { id, text, .. } => out.push_str(&container(id, text)),
                Piece::Pending { id, prompt, .. } => out.push_str(&container(id, prompt)),
                Piece::Abstract { id } => out.push_str(&abstract_placeholder(id)),
                Piece::Declaration { .. } => {}
            }
        }
        out
    }

    /// Pending containers in source order: `(id, hash, prompt)`.
    pub fn pending(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.pieces.iter().filter_map(|p| match p {
            Piece::Pending { id, hash, prompt } => Some((id.as_str(), hash.as_str(), prompt.as_str())),
            _ => None,
        })
    }

    pub fn pending_count(&self) -> usize {
        self.pending().count()
    }

    pub fn cached_count(&self) -> usize {
        self.pieces
            .iter()
            .filter(|p| matches!(p, Piece::Cached { .. }))
            .count()
    }

    /// Whether any oracle work remains.
    pub fn needs_oracle(&self) -> bool {
        self.has_anonymous_templates || self.pending_count() > 0
    }

    /// Ids the oracle output may store, with the hash to store them under.
    ///
    /// Only pending containers: a cache hit already has its entry, and a
    /// container kept by a selective update must keep its old lock hash.
    pub fn hashes(&self) -> BTreeMap<String, String> {
        self.pending()
            .map(|(id, hash, _)| (id.to_string(), hash.to_string()))
            .collect()
    }

    /// Replace the pending container `id` with generated text.
    ///
    /// Returns `false` if `id` is not pending.
    pub fn fill(&mut self, id: &str, generated: &str) -> bool {
        for piece in &mut self.pieces {
            if let Piece::Pending { id: pid, hash, .. } = piece {
                if pid == id {
                    *piece = Piece::Cached {
                        id: pid.clone(),
                        hash: hash.clone(),
                        text: generated.to_string(),
                    };
                    return true;
                }
            }
        }
        false
    }
}

/// Scan `text`, resolve every unit in source order and consult the cache.
///
/// Scanner errors abort the pass before anything is resolved.
pub fn resolve_blueprint(
    ctx: &mut ResolutionContext,
    text: &str,
) -> Result<ResolvedBlueprint, ScanError> {
    let scanned = scan(text)?;
    let mut resolved = ResolvedBlueprint {
        pieces: Vec::with_capacity(scanned.segments.len()),
        has_anonymous_templates: scanned.has_anonymous_templates,
    };

    for segment in scanned.segments {
        let unit = match segment {
            Segment::Literal(literal) => {
                resolved.pieces.push(Piece::Literal(literal));
                continue;
            }
            Segment::Unit(unit) => unit,
        };

        let (unit, warnings) = ctx.symbols.resolve(unit);
        ctx.warnings.extend(warnings);

        let id = unit.id.clone();
        let piece = match unit.kind {
            UnitKind::AbstractContainer => Piece::Abstract { id },
            UnitKind::PersistentVar => {
                ctx.cache.remember_variable(&id, &unit.raw_content);
                Piece::Declaration { id }
            }
            UnitKind::EphemeralVar | UnitKind::Constant => Piece::Declaration { id },
            UnitKind::BlockContainer | UnitKind::InlineContainer => {
                let hash = unit.content_hash.clone().unwrap_or_default();
                match ctx.cache.lookup(&id, &hash) {
                    Some(entry) => {
                        if entry.content_hash == hash {
                            info!(id = %id, "Cache hit");
                        } else {
                            info!(id = %id, "Outside update targets, reusing cached text");
                        }
                        Piece::Cached {
                            id,
                            hash: entry.content_hash,
                            text: entry.generated_text,
                        }
                    }
                    None => {
                        debug!(id = %id, "Cache miss");
                        Piece::Pending {
                            id,
                            hash,
                            prompt: unit.effective_content().to_string(),
                        }
                    }
                }
            }
        };
        resolved.pieces.push(piece);
    }

    debug!(
        cached_count = resolved.cached_count(),
        pending_count = resolved.pending_count(),
        "Resolution pass complete"
    );
    Ok(resolved)
}
