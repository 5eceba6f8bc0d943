//! DST environment combining clock, RNG and oracle faults.

use std::sync::Arc;

use crate::clock::SimClock;
use crate::fault::{FaultConfig, FaultInjector};
use crate::oracle::ScriptedOracle;
use crate::random::DeterministicRng;

/// Complete DST environment.
///
/// Given the same seed, the fault sequence and every random value are the
/// same. The clock is shared so it can be handed to the driver as its
/// `Sleeper` while the test keeps a handle for assertions.
///
/// ```rust
/// use glupe_dst::{DstEnv, FaultConfig};
///
/// let mut env = DstEnv::with_fault_config(7, FaultConfig::aggressive());
/// let oracle = env.faulty_oracle(glupe_dst::ScriptedOracle::always("int main() {}"));
/// let clock = env.clock_handle();
/// assert_eq!(clock.now_ns(), 0);
/// ```
pub struct DstEnv {
    seed: u64,
    clock: Arc<SimClock>,
    rng: DeterministicRng,
    fault_config: FaultConfig,
}

impl DstEnv {
    /// Environment with default oracle faults.
    pub fn new(seed: u64) -> Self {
        Self::with_fault_config(seed, FaultConfig::default())
    }

    pub fn with_fault_config(seed: u64, fault_config: FaultConfig) -> Self {
        Self {
            seed,
            clock: Arc::new(SimClock::new()),
            rng: DeterministicRng::new(seed),
            fault_config,
        }
    }

    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    #[must_use]
    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    /// Shared clock, suitable as the driver's sleeper.
    #[must_use]
    pub fn clock_handle(&self) -> Arc<SimClock> {
        Arc::clone(&self.clock)
    }

    pub fn rng(&mut self) -> &mut DeterministicRng {
        &mut self.rng
    }

    /// Fault injector on a forked RNG.
    pub fn fault_injector(&mut self) -> FaultInjector {
        FaultInjector::new(self.rng.fork(), self.fault_config.clone())
    }

    /// Wrap `oracle` with this environment's faults.
    pub fn faulty_oracle(&mut self, oracle: ScriptedOracle) -> ScriptedOracle {
        let faults = self.fault_injector();
        oracle.with_faults(faults)
    }

    /// Format seed for failure messages.
    #[must_use]
    pub fn format_seed(&self) -> String {
        format!("GLUPE_DST_SEED={}", self.seed)
    }
}
