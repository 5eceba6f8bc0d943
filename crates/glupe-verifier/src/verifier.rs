//! Command-line verifier.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use glupe_core::{Verifier, VerifierReport, VerifyTarget};
use tracing::{debug, info, warn};

use crate::command::{self, BuildScript, CommandOutcome};
use crate::toolchain::LangProfile;

/// Verifier errors outside a verification run.
#[derive(Debug, thiserror::Error)]
pub enum VerifierError {
    #[error("toolchain for {lang} not available: {message}")]
    ToolchainMissing { lang: String, message: String },

    #[error("{lang} has no version command")]
    NoVersionCommand { lang: String },
}

/// Verifier configuration.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Per-command timeout
    pub timeout: Duration,
    /// Skip verification entirely
    pub blind: bool,
    /// Build command template with `%FILE%` and `%OUT%`
    pub custom_build_cmd: Option<String>,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            blind: false,
            custom_build_cmd: None,
        }
    }
}

impl VerifierConfig {
    /// Short timeouts for syntax-check languages.
    pub fn quick() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            ..Default::default()
        }
    }

    /// Long timeouts for project builds.
    pub fn thorough() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            ..Default::default()
        }
    }

    /// No verification at all.
    pub fn blind() -> Self {
        Self {
            blind: true,
            ..Default::default()
        }
    }
}

/// Runs the profile's compiler, a custom command or a project build script.
pub struct CommandVerifier {
    profile: LangProfile,
    config: VerifierConfig,
}

impl CommandVerifier {
    pub fn new(profile: LangProfile, config: VerifierConfig) -> Self {
        Self { profile, config }
    }

    pub fn profile(&self) -> &LangProfile {
        &self.profile
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Run the profile's version command.
    pub async fn probe_toolchain(&self) -> Result<String, VerifierError> {
        let argv = command::split_command_line(&self.profile.version_cmd);
        if argv.is_empty() {
            return Err(VerifierError::NoVersionCommand {
                lang: self.profile.name.clone(),
            });
        }
        let outcome = command::run(&argv, Path::new("."), self.config.timeout).await;
        if outcome.success() {
            Ok(outcome.output.lines().next().unwrap_or_default().trim().to_string())
        } else {
            Err(VerifierError::ToolchainMissing {
                lang: self.profile.name.clone(),
                message: outcome.output,
            })
        }
    }

    /// Argument vector for compiling `sources`, or `None` if nothing to run.
    pub fn source_command(&self, sources: &[PathBuf], output: &Path) -> Option<Vec<String>> {
        if let Some(template) = &self.config.custom_build_cmd {
            let argv = command::expand_template(template, sources, output);
            return (!argv.is_empty()).then_some(argv);
        }
        if !self.profile.is_verifiable() {
            return None;
        }
        let mut argv = command::split_command_line(&self.profile.build_cmd);
        argv.extend(sources.iter().map(|s| s.display().to_string()));
        if self.profile.produces_binary {
            argv.push("-o".to_string());
            argv.push(output.display().to_string());
        }
        Some(argv)
    }

    async fn verify_sources(&self, sources: &[PathBuf], output: &Path) -> VerifierReport {
        let Some(argv) = self.source_command(sources, output) else {
            debug!(lang = %self.profile.id, "No build command, skipping verification");
            return VerifierReport::pass(Duration::ZERO);
        };
        report_from(command::run(&argv, Path::new("."), self.config.timeout).await)
    }

    async fn verify_project(&self, dir: &Path) -> VerifierReport {
        let Some(script) = BuildScript::detect(dir) else {
            warn!(dir = %dir.display(), "No build script found, skipping build step");
            return VerifierReport::pass(Duration::ZERO);
        };
        info!(script = script.name(), "Running project build");

        if script == BuildScript::CMake {
            if let Err(e) = tokio::fs::create_dir_all(dir.join("build")).await {
                return VerifierReport::fail(None, format!("Failed to create build dir: {}", e), Duration::ZERO);
            }
        }

        let start = Instant::now();
        let mut output = String::new();
        for argv in script.commands() {
            let outcome = command::run(&argv, dir, self.config.timeout).await;
            output.push_str(&outcome.output);
            if !outcome.success() {
                return VerifierReport::fail(outcome.exit_code, output, start.elapsed());
            }
        }
        VerifierReport::pass(start.elapsed())
    }
}

fn report_from(outcome: CommandOutcome) -> VerifierReport {
    if outcome.success() {
        VerifierReport::pass(outcome.duration)
    } else {
        VerifierReport::fail(outcome.exit_code, outcome.output, outcome.duration)
    }
}

#[async_trait]
impl Verifier for CommandVerifier {
    async fn verify(&self, target: &VerifyTarget) -> VerifierReport {
        if self.config.blind {
            return VerifierReport::pass(Duration::ZERO);
        }
        match target {
            VerifyTarget::Sources { sources, output } => self.verify_sources(sources, output).await,
            VerifyTarget::Project { dir } => self.verify_project(dir).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::lookup;

    #[test]
    fn test_source_command_binary() {
        let v = CommandVerifier::new(lookup("cpp").unwrap(), VerifierConfig::default());
        let argv = v
            .source_command(&[PathBuf::from("main.cpp")], Path::new("app"))
            .unwrap();
        assert_eq!(argv, vec!["g++", "-std=gnu++17", "main.cpp", "-o", "app"]);
    }

    #[test]
    fn test_source_command_syntax_check() {
        let v = CommandVerifier::new(lookup("py").unwrap(), VerifierConfig::default());
        let argv = v
            .source_command(&[PathBuf::from("a.py")], Path::new("unused"))
            .unwrap();
        assert_eq!(argv, vec!["python", "-m", "py_compile", "a.py"]);
    }

    #[test]
    fn test_custom_build_command() {
        let config = VerifierConfig {
            custom_build_cmd: Some("clang -O2 %FILE% -o %OUT%".into()),
            ..Default::default()
        };
        let v = CommandVerifier::new(lookup("c").unwrap(), config);
        let argv = v
            .source_command(&[PathBuf::from("x.c")], Path::new("x"))
            .unwrap();
        assert_eq!(argv, vec!["clang", "-O2", "x.c", "-o", "x"]);
    }

    #[test]
    fn test_markup_has_no_command() {
        let v = CommandVerifier::new(lookup("md").unwrap(), VerifierConfig::default());
        assert!(v.source_command(&[PathBuf::from("a.md")], Path::new("a")).is_none());
    }

    #[tokio::test]
    async fn test_blind_passes() {
        let v = CommandVerifier::new(lookup("cpp").unwrap(), VerifierConfig::blind());
        let target = VerifyTarget::Sources {
            sources: vec![PathBuf::from("does-not-exist.cpp")],
            output: PathBuf::from("out"),
        };
        assert!(v.verify(&target).await.passed);
    }

    #[tokio::test]
    async fn test_project_without_script_passes() {
        let dir = tempfile::tempdir().unwrap();
        let v = CommandVerifier::new(lookup("cpp").unwrap(), VerifierConfig::quick());
        let target = VerifyTarget::Project {
            dir: dir.path().to_path_buf(),
        };
        assert!(v.verify(&target).await.passed);
    }

    #[tokio::test]
    async fn test_missing_compiler_fails() {
        let config = VerifierConfig {
            custom_build_cmd: Some("no-such-compiler-glupe %FILE%".into()),
            ..VerifierConfig::quick()
        };
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.c");
        std::fs::write(&src, "int main(void) { return 0; }").unwrap();
        let v = CommandVerifier::new(lookup("c").unwrap(), config);
        let report = v
            .verify(&VerifyTarget::Sources {
                sources: vec![src],
                output: dir.path().join("a"),
            })
            .await;
        assert!(!report.passed);
        assert!(report.diagnostics.contains("no-such-compiler-glupe"));
    }

    #[tokio::test]
    async fn test_probe_without_version_command() {
        let v = CommandVerifier::new(lookup("md").unwrap(), VerifierConfig::default());
        assert!(matches!(
            v.probe_toolchain().await,
            Err(VerifierError::NoVersionCommand { .. })
        ));
    }
}
