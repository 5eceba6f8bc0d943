//! # glupe-generator
//!
//! Blueprint-driven code generation with a bounded generate/verify loop.
//!
//! A blueprint is ordinary source text annotated with `$$ id { ... }$$`
//! containers. The generator resolves it against the content cache, asks
//! an oracle for the missing pieces and keeps regenerating until the local
//! verifier accepts the result or a bound is hit.
//!
//! # Usage
//!
//! ```bash
//! # Local model through Ollama
//! cargo run -p glupe-generator -- build app.glp -o app --lang cpp
//!
//! # Cloud model, key from the environment
//! GLUPE_API_KEY=... cargo run -p glupe-generator -- build app.glp -o app.py --cloud
//!
//! # Show what would be sent, without calling the oracle
//! cargo run -p glupe-generator -- build app.glp -o app.py --dry-run
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Blueprint  │ ──> │  Resolver + │ ──> │   Oracle    │
//! │  + imports  │     │    Cache    │     │   (HTTP)    │
//! └─────────────┘     └─────────────┘     └──────┬──────┘
//!                                                │
//!                     ┌──────────────────────────┘
//!                     ▼
//!              ┌─────────────┐
//!              │  Absorb +   │
//!              │   Export    │
//!              └──────┬──────┘
//!                     ▼
//!              ┌─────────────┐   (fails)   ┌─────────────┐
//!              │  Verifier   │ ──────────> │ Error       │
//!              │ (compiler)  │             │ history     │
//!              └──────┬──────┘             └─────────────┘
//!                     │ (passes)
//!                     ▼
//!                  output
//! ```

pub mod client;
pub mod config;
pub mod generator;
pub mod prompt;

pub use client::OracleClient;
pub use config::{
    ConfigError, Endpoint, GeneratorConfig, GlupeConfig, Protocol, ProviderMode, API_KEY_ENV,
    CONFIG_FILE,
};
pub use generator::{
    validate_response, BlueprintGenerator, BuildMode, BuildOutcome, BuildRequest, BuildStatus,
    GeneratorError, TokioSleeper,
};
pub use prompt::{extract_code_block, PromptBuilder, PromptInputs};
