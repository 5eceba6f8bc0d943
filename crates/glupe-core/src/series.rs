//! Series blueprints: one generation entry per `EXPORT:` segment.

use crate::export::parse_directive;

pub const FILE_START_MARKER: &str = "// --- START FILE:";
pub const FILE_END_MARKER: &str = "// --- END FILE:";

/// Instructions for one target file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlueprintFileEntry {
    pub target_filename: String,
    pub instruction_body: String,
}

/// Concatenate several input files, each framed by start/end file markers.
pub fn aggregate_inputs<'a>(inputs: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let mut out = String::new();
    for (name, text) in inputs {
        out.push_str(&format!("{FILE_START_MARKER} {name} ---\n"));
        out.push_str(text);
        if !text.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&format!("{FILE_END_MARKER} {name} ---\n"));
    }
    out
}

/// Split resolved blueprint text into per-file entries.
///
/// Text before the first `EXPORT:` and after `EXPORT: END` is ignored, as
/// are the aggregation markers written by [`aggregate_inputs`].
pub fn parse_series_blueprint(text: &str) -> Vec<BlueprintFileEntry> {
    let mut entries = Vec::new();
    let mut current: Option<BlueprintFileEntry> = None;

    for line in text.lines() {
        if line.starts_with(FILE_START_MARKER) || line.starts_with(FILE_END_MARKER) {
            continue;
        }

        if let Some(directive) = parse_directive(line.trim()) {
            entries.extend(current.take());
            if !directive.is_close() {
                current = Some(BlueprintFileEntry {
                    target_filename: directive.name,
                    instruction_body: String::new(),
                });
            }
            continue;
        }

        if let Some(entry) = current.as_mut() {
            entry.instruction_body.push_str(line);
            entry.instruction_body.push('\n');
        }
    }

    entries.extend(current);
    entries
}
