//! Target language profiles.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// How to check code in one target language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LangProfile {
    pub id: String,
    pub name: String,
    /// Source extension including the dot
    pub extension: String,
    /// Prints the toolchain version; empty if there is none
    pub version_cmd: String,
    /// Compile or syntax-check command; empty means nothing to verify
    pub build_cmd: String,
    /// Build command accepts `-o <binary>`
    pub produces_binary: bool,
}

/// User overrides from the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_cmd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_cmd: Option<String>,
}

impl LangProfile {
    fn builtin(
        id: &str,
        name: &str,
        extension: &str,
        version_cmd: &str,
        build_cmd: &str,
        produces_binary: bool,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            extension: extension.to_string(),
            version_cmd: version_cmd.to_string(),
            build_cmd: build_cmd.to_string(),
            produces_binary,
        }
    }

    /// Apply user overrides.
    #[must_use]
    pub fn with_override(mut self, over: &ToolchainOverride) -> Self {
        if let Some(cmd) = &over.build_cmd {
            self.build_cmd = cmd.clone();
        }
        if let Some(cmd) = &over.version_cmd {
            self.version_cmd = cmd.clone();
        }
        self
    }

    /// Whether a verifier command exists for this language.
    pub fn is_verifiable(&self) -> bool {
        !self.build_cmd.trim().is_empty()
    }

    /// Command that runs a built output.
    ///
    /// Binaries run directly; source outputs run under the program that
    /// starts the build command (`python`, `node`, `bash`).
    pub fn run_command(&self, output: &Path) -> Option<Vec<String>> {
        let output = output.display().to_string();
        if self.produces_binary {
            return Some(vec![output]);
        }
        let interpreter = self.build_cmd.split_whitespace().next()?;
        Some(vec![interpreter.to_string(), output])
    }

    /// Whether `path` has this profile's extension.
    pub fn matches_path(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_ascii_lowercase()) == self.extension)
            .unwrap_or(false)
    }
}

/// Built-in profiles, keyed by lookup name.
pub fn builtin_profiles() -> Vec<(&'static str, LangProfile)> {
    use LangProfile as P;
    vec![
        ("cpp", P::builtin("cpp", "C++", ".cpp", "g++ --version", "g++ -std=gnu++17", true)),
        ("cc", P::builtin("cpp", "C++", ".cc", "g++ --version", "g++ -std=gnu++17", true)),
        ("cxx", P::builtin("cpp", "C++", ".cxx", "g++ --version", "g++ -std=gnu++17", true)),
        ("hpp", P::builtin("cpp", "C++", ".hpp", "g++ --version", "g++ -std=gnu++17", true)),
        ("c", P::builtin("c", "C", ".c", "gcc --version", "gcc", true)),
        ("h", P::builtin("c", "C", ".h", "gcc --version", "gcc", true)),
        ("rust", P::builtin("rust", "Rust", ".rs", "rustc --version", "rustc", true)),
        ("rs", P::builtin("rust", "Rust", ".rs", "rustc --version", "rustc", true)),
        ("go", P::builtin("go", "Go", ".go", "go version", "go build", true)),
        ("py", P::builtin("py", "Python", ".py", "python --version", "python -m py_compile", false)),
        ("js", P::builtin("js", "JavaScript", ".js", "node --version", "node -c", false)),
        ("ts", P::builtin("ts", "TypeScript", ".ts", "tsc --version", "tsc --noEmit", false)),
        ("java", P::builtin("java", "Java", ".java", "javac -version", "javac", false)),
        ("php", P::builtin("php", "PHP", ".php", "php -v", "php -l", false)),
        ("rb", P::builtin("rb", "Ruby", ".rb", "ruby -v", "ruby -c", false)),
        ("lua", P::builtin("lua", "Lua", ".lua", "lua -v", "luac -p", false)),
        ("pl", P::builtin("pl", "Perl", ".pl", "perl -v", "perl -c", false)),
        ("sh", P::builtin("sh", "Bash", ".sh", "bash --version", "bash -n", false)),
        ("swift", P::builtin("swift", "Swift", ".swift", "swift --version", "swiftc", true)),
        ("hs", P::builtin("hs", "Haskell", ".hs", "ghc --version", "ghc", true)),
        ("zig", P::builtin("zig", "Zig", ".zig", "zig version", "zig build-exe", true)),
        ("nim", P::builtin("nim", "Nim", ".nim", "nim --version", "nim c", true)),
        ("html", P::builtin("html", "HTML", ".html", "", "", false)),
        ("css", P::builtin("css", "CSS", ".css", "", "", false)),
        ("sql", P::builtin("sql", "SQL", ".sql", "", "", false)),
        ("json", P::builtin("json", "JSON", ".json", "", "", false)),
        ("yaml", P::builtin("yaml", "YAML", ".yaml", "", "", false)),
        ("md", P::builtin("md", "Markdown", ".md", "", "", false)),
        ("glp", P::builtin("glp", "glupe", ".glp", "", "", false)),
    ]
}

/// Profile for a language name or extension (`cpp`, `.cpp`, `rust`).
pub fn lookup(key: &str) -> Option<LangProfile> {
    let key = key.trim().trim_start_matches('.').to_ascii_lowercase();
    builtin_profiles()
        .into_iter()
        .find(|(name, _)| *name == key)
        .map(|(_, profile)| profile)
}

/// Profile implied by a file's extension.
pub fn profile_for_path(path: &Path) -> Option<LangProfile> {
    path.extension().and_then(|e| e.to_str()).and_then(lookup)
}
