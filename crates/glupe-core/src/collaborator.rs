//! Traits for the engine's external collaborators.
//!
//! The generation driver talks to the oracle, the verifier and the clock
//! only through these traits, so tests can substitute deterministic doubles.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::machine::OracleOutcome;

/// Oracle call failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    #[error("rate limited: {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("oracle timed out after {0:?}")]
    Timeout(Duration),

    #[error("oracle request failed: {0}")]
    Other(String),
}

impl OracleError {
    /// Outcome class used by the state machine.
    pub fn outcome(&self) -> OracleOutcome {
        match self {
            OracleError::RateLimited { retry_after, .. } => OracleOutcome::RateLimited {
                retry_after: *retry_after,
            },
            OracleError::InvalidResponse(_) => OracleOutcome::Invalid,
            OracleError::Timeout(_) | OracleError::Other(_) => OracleOutcome::Other,
        }
    }
}

/// Text-in, text-out code generator.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Generate a response for `prompt`.
    async fn generate(&self, prompt: &str) -> Result<String, OracleError>;

    /// Short name for logs.
    fn name(&self) -> &str;
}

/// Result of running the verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierReport {
    pub passed: bool,
    /// Process exit code, `None` if killed or timed out
    pub exit_code: Option<i32>,
    /// Combined stdout and stderr
    pub diagnostics: String,
    pub duration: Duration,
}

impl VerifierReport {
    pub fn pass(duration: Duration) -> Self {
        Self {
            passed: true,
            exit_code: Some(0),
            diagnostics: String::new(),
            duration,
        }
    }

    pub fn fail(exit_code: Option<i32>, diagnostics: impl Into<String>, duration: Duration) -> Self {
        Self {
            passed: false,
            exit_code,
            diagnostics: diagnostics.into(),
            duration,
        }
    }
}

/// What to verify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyTarget {
    /// Source files compiled together into `output`
    Sources {
        sources: Vec<PathBuf>,
        output: PathBuf,
    },
    /// A project directory built by its own build script
    Project { dir: PathBuf },
}

/// Local correctness check, typically a compiler.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, target: &VerifyTarget) -> VerifierReport;
}

/// Source of delays. Real time in production, simulated in tests.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_outcomes() {
        let limited = OracleError::RateLimited {
            retry_after: Some(Duration::from_secs(7)),
            message: "slow down".into(),
        };
        assert_eq!(
            limited.outcome(),
            OracleOutcome::RateLimited {
                retry_after: Some(Duration::from_secs(7))
            }
        );
        assert_eq!(OracleError::InvalidResponse("x".into()).outcome(), OracleOutcome::Invalid);
        assert_eq!(OracleError::Timeout(Duration::from_secs(1)).outcome(), OracleOutcome::Other);
    }

    #[test]
    fn test_report_constructors() {
        assert!(VerifierReport::pass(Duration::ZERO).passed);
        let fail = VerifierReport::fail(Some(1), "error: x", Duration::ZERO);
        assert!(!fail.passed);
        assert_eq!(fail.exit_code, Some(1));
    }
}
