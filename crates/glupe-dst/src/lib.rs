//! # glupe-dst
//!
//! Deterministic simulation support for the generation loop.
//!
//! Backoff sleeps advance a simulated clock, oracle failures come from a
//! seeded fault injector, and the oracle and verifier are scripted doubles.
//! All behavior is reproducible via a seed.
//!
//! ## Reproducibility
//!
//! ```bash
//! GLUPE_DST_SEED=12345 cargo test
//! ```

pub mod clock;
pub mod env;
pub mod fault;
pub mod oracle;
pub mod random;

pub use clock::SimClock;
pub use env::DstEnv;
pub use fault::{FaultConfig, FaultInjector};
pub use oracle::{ScriptedOracle, ScriptedVerifier, STAND_IN_BINARY};
pub use random::DeterministicRng;

/// Seed from `GLUPE_DST_SEED`, or a fresh random one.
///
/// Prints the seed for reproduction. An unparseable value is ignored.
#[must_use]
pub fn get_or_generate_seed() -> u64 {
    match std::env::var("GLUPE_DST_SEED").ok().and_then(|s| s.parse().ok()) {
        Some(seed) => {
            println!("GLUPE_DST_SEED={} (from environment)", seed);
            seed
        }
        None => {
            let seed = rand::random::<u64>();
            println!("GLUPE_DST_SEED={} (randomly generated)", seed);
            seed
        }
    }
}
