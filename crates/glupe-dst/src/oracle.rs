//! Scripted collaborators for driver tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use glupe_core::{Oracle, OracleError, Verifier, VerifierReport, VerifyTarget};

use crate::fault::FaultInjector;

/// Oracle that replays a fixed script of responses.
///
/// Once the script is exhausted the fallback response (if any) is returned
/// forever; without a fallback every further call fails. Optional fault
/// injection runs before the script is consulted, so a faulted call does
/// not consume a scripted response.
pub struct ScriptedOracle {
    script: Mutex<VecDeque<Result<String, OracleError>>>,
    fallback: Option<String>,
    faults: Option<Mutex<FaultInjector>>,
    prompts: Mutex<Vec<String>>,
    calls_count: AtomicU64,
}

impl ScriptedOracle {
    #[must_use]
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            faults: None,
            prompts: Mutex::new(Vec::new()),
            calls_count: AtomicU64::new(0),
        }
    }

    /// Oracle that always answers `text`.
    #[must_use]
    pub fn always(text: impl Into<String>) -> Self {
        Self::new().fallback(text)
    }

    /// Queue a successful response.
    #[must_use]
    pub fn respond(self, text: impl Into<String>) -> Self {
        self.push(Ok(text.into()))
    }

    /// Queue a failure.
    #[must_use]
    pub fn fail(self, error: OracleError) -> Self {
        self.push(Err(error))
    }

    #[must_use]
    pub fn fallback(mut self, text: impl Into<String>) -> Self {
        self.fallback = Some(text.into());
        self
    }

    #[must_use]
    pub fn with_faults(mut self, faults: FaultInjector) -> Self {
        self.faults = Some(Mutex::new(faults));
        self
    }

    fn push(self, entry: Result<String, OracleError>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(entry);
        }
        self
    }

    #[must_use]
    pub fn calls_count(&self) -> u64 {
        self.calls_count.load(Ordering::Acquire)
    }

    /// Every prompt received, in order.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl Default for ScriptedOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn generate(&self, prompt: &str) -> Result<String, OracleError> {
        self.calls_count.fetch_add(1, Ordering::AcqRel);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }

        if let Some(faults) = &self.faults {
            let fault = faults.lock().ok().and_then(|mut f| f.next_fault());
            if let Some(fault) = fault {
                return Err(fault);
            }
        }

        let scripted = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match (scripted, &self.fallback) {
            (Some(entry), _) => entry,
            (None, Some(text)) => Ok(text.clone()),
            (None, None) => Err(OracleError::Other("script exhausted".to_string())),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Verifier that replays a fixed script of reports.
pub struct ScriptedVerifier {
    script: Mutex<VecDeque<VerifierReport>>,
    fallback: VerifierReport,
    targets: Mutex<Vec<VerifyTarget>>,
    /// Passing source builds write a stand-in binary to their output path
    emits_binary: bool,
}

/// Contents of the stand-in binary written by [`ScriptedVerifier::emitting_binary`].
pub const STAND_IN_BINARY: &str = "\x7fELF scripted";

impl ScriptedVerifier {
    /// Verifier that passes everything once the script is exhausted.
    #[must_use]
    pub fn passing() -> Self {
        Self::with_fallback(VerifierReport::pass(Duration::ZERO))
    }

    /// Verifier that fails everything with `diagnostics` once the script is exhausted.
    #[must_use]
    pub fn failing(diagnostics: impl Into<String>) -> Self {
        Self::with_fallback(VerifierReport::fail(Some(1), diagnostics, Duration::ZERO))
    }

    fn with_fallback(fallback: VerifierReport) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            targets: Mutex::new(Vec::new()),
            emits_binary: false,
        }
    }

    /// Like a compiler: a passing source build leaves a binary behind.
    #[must_use]
    pub fn emitting_binary(mut self) -> Self {
        self.emits_binary = true;
        self
    }

    /// Queue a failing report.
    #[must_use]
    pub fn then_fail(self, diagnostics: impl Into<String>) -> Self {
        self.push(VerifierReport::fail(Some(1), diagnostics, Duration::ZERO))
    }

    /// Queue a passing report.
    #[must_use]
    pub fn then_pass(self) -> Self {
        self.push(VerifierReport::pass(Duration::ZERO))
    }

    fn push(self, report: VerifierReport) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(report);
        }
        self
    }

    /// Targets verified so far.
    #[must_use]
    pub fn targets(&self) -> Vec<VerifyTarget> {
        self.targets.lock().map(|t| t.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn runs_count(&self) -> usize {
        self.targets.lock().map(|t| t.len()).unwrap_or_default()
    }
}

#[async_trait]
impl Verifier for ScriptedVerifier {
    async fn verify(&self, target: &VerifyTarget) -> VerifierReport {
        if let Ok(mut targets) = self.targets.lock() {
            targets.push(target.clone());
        }
        let report = self
            .script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or_else(|| self.fallback.clone());

        match target {
            VerifyTarget::Sources { output, .. } if self.emits_binary && report.passed => {
                if let Some(parent) = output.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                let _ = std::fs::write(output, STAND_IN_BINARY);
            }
            _ => {}
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::FaultConfig;
    use crate::random::DeterministicRng;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_script_then_fallback() {
        let oracle = ScriptedOracle::new()
            .respond("one")
            .fail(OracleError::Other("boom".into()))
            .fallback("again");

        assert_eq!(oracle.generate("p1").await.unwrap(), "one");
        assert!(oracle.generate("p2").await.is_err());
        assert_eq!(oracle.generate("p3").await.unwrap(), "again");
        assert_eq!(oracle.calls_count(), 3);
        assert_eq!(oracle.prompts(), vec!["p1", "p2", "p3"]);
    }

    #[tokio::test]
    async fn test_exhausted_script_fails() {
        let oracle = ScriptedOracle::new();
        assert!(matches!(oracle.generate("x").await, Err(OracleError::Other(_))));
    }

    #[tokio::test]
    async fn test_faults_do_not_consume_script() {
        let faults = FaultInjector::new(DeterministicRng::new(5), FaultConfig::always_rate_limited());
        let oracle = ScriptedOracle::new().respond("kept").with_faults(faults);
        assert!(oracle.generate("x").await.is_err());
        assert!(oracle.generate("x").await.is_err());
        assert_eq!(oracle.calls_count(), 2);
    }

    #[tokio::test]
    async fn test_scripted_verifier() {
        let verifier = ScriptedVerifier::passing().then_fail("error: nope");
        let target = VerifyTarget::Project {
            dir: PathBuf::from("."),
        };
        assert!(!verifier.verify(&target).await.passed);
        assert!(verifier.verify(&target).await.passed);
        assert_eq!(verifier.runs_count(), 2);
    }

    #[tokio::test]
    async fn test_emitting_binary_writes_output_on_pass() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("build").join("app");
        let target = VerifyTarget::Sources {
            sources: vec![dir.path().join("app.c")],
            output: output.clone(),
        };

        let verifier = ScriptedVerifier::passing().then_fail("error").emitting_binary();
        verifier.verify(&target).await;
        assert!(!output.exists());
        verifier.verify(&target).await;
        assert_eq!(std::fs::read_to_string(&output).unwrap(), STAND_IN_BINARY);
    }
}
