//! # glupe-verifier
//!
//! Local verification for generated code.
//!
//! - [`toolchain`]: per-language compile and syntax-check commands
//! - [`command`]: process execution with timeouts, build-script detection
//! - [`classify`]: retry-or-fatal decisions and language-leakage hints
//! - [`verifier`]: the [`CommandVerifier`] implementation of
//!   [`glupe_core::Verifier`]

pub mod classify;
pub mod command;
pub mod toolchain;
pub mod verifier;

pub use classify::{extract_first_error, leakage_hint, DiagnosticClassifier, KeywordClassifier};
pub use command::{mark_executable, run_attached, BuildScript, CommandOutcome};
pub use toolchain::{lookup, profile_for_path, LangProfile, ToolchainOverride};
pub use verifier::{CommandVerifier, VerifierConfig, VerifierError};
