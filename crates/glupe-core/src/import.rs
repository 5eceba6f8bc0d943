//! Import resolution pre-pass.
//!
//! `IMPORT: "path"` lines are replaced by the referenced file's own resolved
//! text. An optional override block follows the directive and ends at
//! `IMPORT: END`; it is appended after the imported content. The active
//! import stack is passed explicitly, so cycles are detected without any
//! shared state.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

const IMPORT_PREFIX: &str = "IMPORT:";
const IMPORT_END: &str = "IMPORT: END";

/// Import diagnostic. Inlined as a comment; the run continues.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImportError {
    #[error("cyclic import of {name}")]
    Cycle { name: String, path: PathBuf },

    #[error("import not found: {name}")]
    Missing { name: String, path: PathBuf },

    #[error("cannot read import {name}: {message}")]
    Unreadable { name: String, message: String },
}

impl ImportError {
    /// Comment line emitted in place of the import.
    pub fn as_comment(&self) -> String {
        match self {
            ImportError::Cycle { name, .. } => format!("// [ERROR] CYCLIC IMPORT DETECTED: {name}\n"),
            ImportError::Missing { name, .. } => format!("// [WARN] IMPORT NOT FOUND: {name}\n"),
            ImportError::Unreadable { name, .. } => format!("// [ERROR] IMPORT UNREADABLE: {name}\n"),
        }
    }
}

/// Resolved text plus every diagnostic raised on the way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportOutcome {
    pub text: String,
    pub diagnostics: Vec<ImportError>,
}

/// Filename argument of an `IMPORT:` directive.
///
/// The first quoted string if there is one (an unmatched quote runs to the
/// end of the line), otherwise the trimmed remainder.
fn directive_target(args: &str) -> String {
    if let Some(q1) = args.find(['"', '\'']) {
        let quote = &args[q1..q1 + 1];
        let rest = &args[q1 + 1..];
        return match rest.find(quote) {
            Some(q2) => rest[..q2].to_string(),
            None => rest.trim_end().to_string(),
        };
    }
    args.trim().to_string()
}

/// Resolve `IMPORT:` directives in `text`.
///
/// `base` is the directory relative imports are resolved against; `stack`
/// holds the canonical paths of files currently being imported, root first.
pub fn resolve_imports(text: &str, base: &Path, stack: &[PathBuf]) -> ImportOutcome {
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let mut out = ImportOutcome::default();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        let clean = line.trim();
        i += 1;

        if clean == IMPORT_END {
            continue;
        }
        let Some(args) = clean.strip_prefix(IMPORT_PREFIX) else {
            out.text.push_str(line);
            continue;
        };

        let name = directive_target(args);

        // Override block: only when an END arrives before another IMPORT
        let mut overrides = String::new();
        let end = lines[i..]
            .iter()
            .map(|l| l.trim())
            .position(|l| l == IMPORT_END || l.starts_with(IMPORT_PREFIX))
            .filter(|&off| lines[i + off].trim() == IMPORT_END);
        if let Some(off) = end {
            for l in &lines[i..i + off] {
                overrides.push_str(l);
                if !l.ends_with('\n') {
                    overrides.push('\n');
                }
            }
            i += off + 1;
        }

        match import_one(&name, base, stack) {
            Ok(nested) => {
                out.text.push_str(&format!("\n// --- IMPORTED FILE: {name} ---\n"));
                out.text.push_str(&nested.text);
                if !nested.text.is_empty() && !nested.text.ends_with('\n') {
                    out.text.push('\n');
                }
                if !overrides.is_empty() {
                    out.text.push_str("// --- LOCAL MODIFICATIONS ---\n");
                    out.text.push_str(&overrides);
                }
                out.text.push_str("// --- END IMPORT ---\n");
                out.diagnostics.extend(nested.diagnostics);
            }
            Err(diagnostic) => {
                out.text.push_str(&diagnostic.as_comment());
                if !overrides.is_empty() {
                    out.text.push_str(&overrides);
                }
                out.diagnostics.push(diagnostic);
            }
        }
    }

    out
}

fn import_one(name: &str, base: &Path, stack: &[PathBuf]) -> Result<ImportOutcome, ImportError> {
    let path = base.join(name);
    if !path.exists() {
        warn!(import = %name, "Import not found");
        return Err(ImportError::Missing {
            name: name.to_string(),
            path,
        });
    }

    let canonical = fs::canonicalize(&path).map_err(|e| ImportError::Unreadable {
        name: name.to_string(),
        message: e.to_string(),
    })?;

    if stack.contains(&canonical) {
        error!(import = %name, "Circular import");
        return Err(ImportError::Cycle {
            name: name.to_string(),
            path: canonical,
        });
    }

    let content = fs::read_to_string(&canonical).map_err(|e| ImportError::Unreadable {
        name: name.to_string(),
        message: e.to_string(),
    })?;

    let mut nested_stack = stack.to_vec();
    nested_stack.push(canonical.clone());
    let nested_base = canonical.parent().map(Path::to_path_buf).unwrap_or_default();

    info!(import = %name, "Imported module");
    Ok(resolve_imports(&content, &nested_base, &nested_stack))
}

/// Read and resolve a root file, with the root itself on the stack.
pub fn resolve_file(path: &Path) -> std::io::Result<ImportOutcome> {
    let canonical = fs::canonicalize(path)?;
    let text = fs::read_to_string(&canonical)?;
    let base = canonical.parent().map(Path::to_path_buf).unwrap_or_default();
    Ok(resolve_imports(&text, &base, &[canonical]))
}
