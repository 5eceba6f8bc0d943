//! Export splitter.
//!
//! Oracle output in architect mode is one stream containing
//! `EXPORT: "path"` directives. Lines after a directive go to that file
//! (with residual container syntax stripped) until the next directive or
//! `EXPORT: END`. Everything outside an export is returned as leftover.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::{info, warn};

use crate::scanner::inline_closer;
use crate::token::parse_header;

const EXPORT_PREFIX: &str = "EXPORT:";
const BLOCK_CLOSER: &str = "}$$";

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("failed to write export {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Removes `$$ ... $$` and `$ ... $` container syntax line by line.
///
/// A block opened on one line and closed on a later one is removed across
/// lines; `inside` carries that state.
#[derive(Debug, Default, Clone)]
pub struct TemplateStripper {
    inside: bool,
}

impl TemplateStripper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_inside(&self) -> bool {
        self.inside
    }

    pub fn reset(&mut self) {
        self.inside = false;
    }

    /// Strip one line (without its newline).
    pub fn strip_line(&mut self, line: &str) -> String {
        let mut out = String::with_capacity(line.len());
        let mut pos = 0;

        if self.inside {
            match line.find(BLOCK_CLOSER) {
                Some(end) => {
                    pos = end + BLOCK_CLOSER.len();
                    self.inside = false;
                }
                None => return out,
            }
        }

        while let Some(offset) = line[pos..].find('$') {
            let start = pos + offset;
            out.push_str(&line[pos..start]);

            if line[start..].starts_with("$$") {
                match parse_header(line, start + 2, line.len()) {
                    Some(header) => match line[header.body_start..].find(BLOCK_CLOSER) {
                        Some(end) => pos = header.body_start + end + BLOCK_CLOSER.len(),
                        None => {
                            self.inside = true;
                            return out;
                        }
                    },
                    None => {
                        out.push_str("$$");
                        pos = start + 2;
                    }
                }
                continue;
            }

            let closed = parse_header(line, start + 1, line.len())
                .and_then(|h| inline_closer(line, h.body_start, line.len()));
            match closed {
                Some((_, after)) => pos = after,
                None => {
                    out.push('$');
                    pos = start + 1;
                }
            }
        }

        out.push_str(&line[pos..]);
        out
    }
}

/// Parsed `EXPORT:` arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ExportDirective {
    /// Target file; empty or `END` closes the current export
    pub name: String,
    /// Code after the filename on the same line
    pub same_line: String,
}

impl ExportDirective {
    pub(crate) fn is_close(&self) -> bool {
        self.name.is_empty() || self.name == "END"
    }
}

/// Parse a trimmed line that starts with `EXPORT:`.
pub(crate) fn parse_directive(clean: &str) -> Option<ExportDirective> {
    let args = clean.strip_prefix(EXPORT_PREFIX)?;

    let (name, same_line) = match args.find(['"', '\'']) {
        Some(q1) => {
            let quote = &args[q1..q1 + 1];
            let rest = &args[q1 + 1..];
            match rest.find(quote) {
                Some(q2) => (&rest[..q2], &rest[q2 + 1..]),
                None => (rest, ""),
            }
        }
        None => {
            let trimmed = args.trim_start();
            let end = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
            (&trimmed[..end], &trimmed[end..])
        }
    };

    Some(ExportDirective {
        name: name.trim().to_string(),
        same_line: same_line.to_string(),
    })
}

/// A path that stays under the export base directory.
fn is_safe_relative(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Outcome of splitting one stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportReport {
    /// Text outside any export
    pub leftover: String,
    /// Files written, relative to the base, in first-written order
    pub written: Vec<PathBuf>,
    /// Export targets that were refused, with the reason
    pub refused: Vec<(String, String)>,
}

impl ExportReport {
    /// Leftover text with only whitespace removed is empty.
    pub fn leftover_is_blank(&self) -> bool {
        self.leftover.trim().is_empty()
    }
}

/// Where the current line goes.
enum Sink {
    Leftover,
    File(PathBuf),
    /// A refused target swallows lines until the next directive
    Discard,
}

/// Splits export streams into files under `base`.
#[derive(Debug, Clone)]
pub struct ExportSplitter {
    base: PathBuf,
}

impl ExportSplitter {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Split `text`, writing each exported file.
    pub fn split(&self, text: &str) -> Result<ExportReport, ExportError> {
        let mut report = ExportReport::default();
        let mut files: BTreeMap<PathBuf, String> = BTreeMap::new();
        let mut sink = Sink::Leftover;
        let mut stripper = TemplateStripper::new();

        for raw in text.lines() {
            let clean = raw.trim();

            if let Some(directive) = parse_directive(clean) {
                stripper.reset();
                sink = Sink::Leftover;
                if directive.is_close() {
                    continue;
                }

                let relative = PathBuf::from(&directive.name);
                if !is_safe_relative(&relative) {
                    warn!(target_file = %directive.name, "Refusing export outside the output directory");
                    report
                        .refused
                        .push((directive.name, "path escapes the output directory".to_string()));
                    sink = Sink::Discard;
                    continue;
                }

                let path = self.base.join(&relative);
                if let Some(parent) = path.parent() {
                    if let Err(e) = fs::create_dir_all(parent) {
                        warn!(target_file = %directive.name, "Cannot create export directory: {e}");
                        report.refused.push((directive.name, e.to_string()));
                        sink = Sink::Discard;
                        continue;
                    }
                }

                info!(target_file = %directive.name, "Exporting");
                if !report.written.contains(&relative) {
                    report.written.push(relative.clone());
                }
                let buffer = files.entry(relative.clone()).or_default();
                buffer.clear();
                if !directive.same_line.trim().is_empty() {
                    buffer.push_str(&directive.same_line);
                    buffer.push('\n');
                }
                sink = Sink::File(relative);
                continue;
            }

            match &sink {
                Sink::Leftover => {
                    report.leftover.push_str(raw);
                    report.leftover.push('\n');
                }
                Sink::Discard => {}
                Sink::File(relative) => {
                    let Some(buffer) = files.get_mut(relative) else {
                        continue;
                    };
                    if clean.is_empty() {
                        buffer.push('\n');
                        continue;
                    }
                    let stripped = stripper.strip_line(raw);
                    if !stripped.is_empty() {
                        buffer.push_str(&stripped);
                        buffer.push('\n');
                    }
                }
            }
        }

        for (relative, content) in &files {
            let path = self.base.join(relative);
            fs::write(&path, content).map_err(|source| ExportError::Io { path, source })?;
        }

        Ok(report)
    }
}
