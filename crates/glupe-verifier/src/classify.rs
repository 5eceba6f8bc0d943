//! Diagnostic classification.
//!
//! Decides whether a failed verification is worth another oracle pass or
//! points at something regeneration cannot fix (missing toolchain headers,
//! absent files, no entry point).

use glupe_core::{Verdict, VerifierReport};

/// Maps a verifier report to a loop verdict.
pub trait DiagnosticClassifier: Send + Sync {
    fn classify(&self, report: &VerifierReport) -> Verdict;
}

/// Substrings that mark a failure as environmental.
///
/// Bare `fatal error` is not listed: clang's `fatal error: too many errors
/// emitted` is retryable. Missing headers match the file-not-found forms.
pub const DEFAULT_FATAL_PATTERNS: &[&str] = &[
    "no such file",
    "file not found",
    "cannot open source file",
    "module not found",
    "importerror",
    "python.h",
    "jni.h",
    "node.h",
];

/// Case-insensitive substring classifier.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    fatal_patterns: Vec<String>,
    /// Treat an unresolved `main` at link time as fatal
    missing_main_fatal: bool,
}

impl KeywordClassifier {
    pub fn new(patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            fatal_patterns: patterns
                .into_iter()
                .map(|p| p.into().to_lowercase())
                .collect(),
            missing_main_fatal: true,
        }
    }

    #[must_use]
    pub fn with_missing_main_fatal(mut self, fatal: bool) -> Self {
        self.missing_main_fatal = fatal;
        self
    }

    /// Whether `diagnostics` match a fatal pattern.
    pub fn is_fatal(&self, diagnostics: &str) -> bool {
        let lower = diagnostics.to_lowercase();
        if self.fatal_patterns.iter().any(|p| lower.contains(p.as_str())) {
            return true;
        }
        self.missing_main_fatal && lower.contains("undefined reference") && lower.contains("main")
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_FATAL_PATTERNS.iter().copied())
    }
}

impl DiagnosticClassifier for KeywordClassifier {
    fn classify(&self, report: &VerifierReport) -> Verdict {
        if report.passed {
            Verdict::Pass
        } else if self.is_fatal(&report.diagnostics) {
            Verdict::Fatal
        } else {
            Verdict::Retry
        }
    }
}

/// Corrective note for diagnostics that show the oracle drifted into
/// another language.
///
/// Python leakage is only reported when the target is not Python itself.
pub fn leakage_hint(diagnostics: &str, lang_id: &str, lang_name: &str) -> Option<String> {
    if lang_id == "py" {
        return None;
    }
    if diagnostics.to_lowercase().contains("python.h") {
        return Some(format!(
            "FATAL: You are trying to include Python.h. STOP. Rewrite the code using native {} standard libraries only.\n",
            lang_name
        ));
    }
    if diagnostics.contains("print(") || diagnostics.contains("import ") || diagnostics.contains("def ") {
        return Some(format!(
            "FATAL: It seems you wrote Python code instead of {}. STOP. Return ONLY valid {} code.\n",
            lang_name, lang_name
        ));
    }
    None
}

/// First error line of compiler output, for log summaries.
pub fn extract_first_error(diagnostics: &str) -> String {
    diagnostics
        .lines()
        .find(|l| l.to_lowercase().contains("error"))
        .or_else(|| diagnostics.lines().find(|l| !l.trim().is_empty()))
        .map(|l| l.trim().to_string())
        .unwrap_or_else(|| "Unknown error".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn failed(diag: &str) -> VerifierReport {
        VerifierReport::fail(Some(1), diag, Duration::ZERO)
    }

    #[test]
    fn test_classify_pass_retry_fatal() {
        let c = KeywordClassifier::default();
        assert_eq!(c.classify(&VerifierReport::pass(Duration::ZERO)), Verdict::Pass);
        assert_eq!(
            c.classify(&failed("main.cpp:3:5: error: expected ';' before '}'")),
            Verdict::Retry
        );
        assert_eq!(
            c.classify(&failed("main.cpp:1:10: fatal error: foo.h: No such file or directory")),
            Verdict::Fatal
        );
        assert_eq!(c.classify(&failed("File Not Found: x")), Verdict::Fatal);
    }

    #[test]
    fn test_only_missing_header_fatal_errors_are_fatal() {
        let c = KeywordClassifier::default();
        assert_eq!(
            c.classify(&failed("a.cpp:9:1: error: bad\nfatal error: too many errors emitted, stopping now [-ferror-limit=]")),
            Verdict::Retry
        );
        assert_eq!(
            c.classify(&failed("a.cpp:1:10: fatal error: 'missing.h' file not found")),
            Verdict::Fatal
        );
    }

    #[test]
    fn test_undefined_main() {
        let c = KeywordClassifier::default();
        assert!(c.is_fatal("undefined reference to `main'"));
        assert!(!c.is_fatal("undefined reference to `helper'"));
        assert!(!c.clone().with_missing_main_fatal(false).is_fatal("undefined reference to `main'"));
    }

    #[test]
    fn test_custom_patterns() {
        let c = KeywordClassifier::new(["license expired"]);
        assert!(c.is_fatal("ERROR: License Expired"));
        assert!(!c.is_fatal("fatal error: x"));
    }

    #[test]
    fn test_leakage_hint() {
        let hint = leakage_hint("#include <Python.h>", "cpp", "C++").unwrap();
        assert!(hint.contains("Python.h"));
        let hint = leakage_hint("error: 'print(' was not declared", "cpp", "C++").unwrap();
        assert!(hint.contains("instead of C++"));
        assert!(leakage_hint("import os", "py", "Python").is_none());
        assert!(leakage_hint("error: expected ';'", "cpp", "C++").is_none());
    }

    #[test]
    fn test_extract_first_error() {
        let out = "In file included from a.c:1:\na.c:3:1: error: bad thing\na.c:4:1: error: other";
        assert_eq!(extract_first_error(out), "a.c:3:1: error: bad thing");
        assert_eq!(extract_first_error("\n  warning only\n"), "warning only");
        assert_eq!(extract_first_error(""), "Unknown error");
    }
}
