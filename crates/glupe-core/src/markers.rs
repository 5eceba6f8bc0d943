//! Boundary markers around per-container text.
//!
//! Cached and pending containers travel through the oracle wrapped in
//! `// GLUPE_BLOCK_START: id` / `// GLUPE_BLOCK_END: id` lines. When the
//! oracle preserves them, each block is absorbed back into the cache.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::cache::{CacheError, ContentCache};

pub const BLOCK_START: &str = "// GLUPE_BLOCK_START: ";
pub const BLOCK_END: &str = "// GLUPE_BLOCK_END: ";

/// Wrap `body` in boundary markers for `id`.
pub fn wrap(id: &str, body: &str) -> String {
    format!("\n{BLOCK_START}{id}\n{body}\n{BLOCK_END}{id}\n")
}

/// A marker-delimited block found in oracle output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedBlock {
    pub id: String,
    pub text: String,
}

/// Oracle output with markers removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    pub clean: String,
    pub blocks: Vec<GeneratedBlock>,
}

/// Split `text` into clean text and the blocks it contained.
///
/// Marker lines are dropped from the clean text; block contents stay in it.
/// A block without its end marker is kept in the clean text but not returned.
pub fn extract_blocks(text: &str) -> Extracted {
    let mut out = Extracted::default();
    let mut open: Option<(String, String)> = None;

    for line in text.split_inclusive('\n') {
        let trimmed = line.trim();

        if let Some(id) = trimmed.strip_prefix(BLOCK_START.trim_end()) {
            if let Some((abandoned, _)) = open.take() {
                warn!(id = %abandoned, "Block marker without end; not cached");
            }
            open = Some((id.trim().to_string(), String::new()));
            continue;
        }

        if let Some(id) = trimmed.strip_prefix(BLOCK_END.trim_end()) {
            match open.take() {
                Some((open_id, mut body)) if open_id == id.trim() => {
                    if body.ends_with('\n') {
                        body.pop();
                        if body.ends_with('\r') {
                            body.pop();
                        }
                    }
                    out.blocks.push(GeneratedBlock { id: open_id, text: body });
                }
                other => {
                    warn!(id = %id.trim(), "Unmatched block end marker");
                    open = other;
                }
            }
            continue;
        }

        if let Some((_, body)) = open.as_mut() {
            body.push_str(line);
        }
        out.clean.push_str(line);
    }

    if let Some((id, _)) = open {
        warn!(id = %id, "Block marker without end; not cached");
    }
    out
}

/// Result of absorbing oracle output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Absorbed {
    /// Output with markers stripped
    pub clean: String,
    /// Ids whose cache entries were written
    pub stored: Vec<String>,
}

/// Store every marked block whose id has a recorded hash, then strip markers.
///
/// `hashes` maps container id to the content hash recorded during resolution.
pub fn absorb_generated(
    text: &str,
    hashes: &BTreeMap<String, String>,
    cache: &mut ContentCache,
) -> Result<Absorbed, CacheError> {
    let extracted = extract_blocks(text);
    let mut stored = Vec::new();

    for block in &extracted.blocks {
        match hashes.get(&block.id) {
            Some(hash) => {
                cache.store(&block.id, hash, &block.text)?;
                stored.push(block.id.clone());
            }
            None => debug!(id = %block.id, "Ignoring block with no recorded hash"),
        }
    }

    Ok(Absorbed {
        clean: extracted.clean,
        stored,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_then_extract() {
        let text = format!("head\n{}tail\n", wrap("greet", "fn greet() {}"));
        let extracted = extract_blocks(&text);
        assert_eq!(
            extracted.blocks,
            vec![GeneratedBlock {
                id: "greet".into(),
                text: "fn greet() {}".into()
            }]
        );
        assert_eq!(extracted.clean, "head\n\nfn greet() {}\ntail\n");
    }

    #[test]
    fn test_unterminated_block_is_not_returned() {
        let extracted = extract_blocks("// GLUPE_BLOCK_START: a\nbody\n");
        assert!(extracted.blocks.is_empty());
        assert_eq!(extracted.clean, "body\n");
    }

    #[test]
    fn test_indented_markers() {
        let text = "    // GLUPE_BLOCK_START: a\n    x();\n    // GLUPE_BLOCK_END: a\n";
        let extracted = extract_blocks(text);
        assert_eq!(extracted.blocks[0].text, "    x();");
    }

    #[test]
    fn test_absorb_stores_known_ids_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = ContentCache::open(dir.path());
        let hashes = BTreeMap::from([("a".to_string(), "ha".to_string())]);
        let text = format!("{}{}", wrap("a", "A"), wrap("b", "B"));

        let absorbed = absorb_generated(&text, &hashes, &mut cache).unwrap();
        assert_eq!(absorbed.stored, vec!["a".to_string()]);
        assert!(cache.is_cache_hit("a", "ha"));
        assert!(!absorbed.clean.contains("GLUPE_BLOCK"));
    }
}
