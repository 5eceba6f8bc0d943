//! Deterministic oracle fault injection.
//!
//! Simulates the failure modes of a remote code-generation endpoint:
//! - rate limiting (with or without a server retry hint)
//! - structurally invalid responses
//! - timeouts
//! - other transport errors

use std::time::Duration;

use glupe_core::OracleError;

use crate::random::DeterministicRng;

/// Configuration for oracle fault injection.
#[derive(Debug, Clone)]
pub struct FaultConfig {
    /// Probability of a rate-limit response
    pub rate_limit_probability: f64,
    /// Probability that a rate limit carries a retry hint
    pub retry_hint_probability: f64,
    /// Largest retry hint in seconds
    pub retry_after_secs_max: u64,
    /// Probability of an unparseable response
    pub invalid_probability: f64,
    /// Probability of a timeout
    pub timeout_probability: f64,
    /// Probability of any other transport failure
    pub other_probability: f64,
    pub enabled: bool,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            rate_limit_probability: 0.05,
            retry_hint_probability: 0.5,
            retry_after_secs_max: 30,
            invalid_probability: 0.02,
            timeout_probability: 0.01,
            other_probability: 0.01,
            enabled: true,
        }
    }
}

impl FaultConfig {
    /// No faults - baseline.
    #[must_use]
    pub fn none() -> Self {
        Self {
            rate_limit_probability: 0.0,
            retry_hint_probability: 0.0,
            retry_after_secs_max: 0,
            invalid_probability: 0.0,
            timeout_probability: 0.0,
            other_probability: 0.0,
            enabled: false,
        }
    }

    /// Aggressive faults for stress testing.
    #[must_use]
    pub fn aggressive() -> Self {
        Self {
            rate_limit_probability: 0.2,
            retry_hint_probability: 0.5,
            retry_after_secs_max: 60,
            invalid_probability: 0.1,
            timeout_probability: 0.05,
            other_probability: 0.05,
            enabled: true,
        }
    }

    /// Every call is rate limited without a hint.
    #[must_use]
    pub fn always_rate_limited() -> Self {
        Self {
            rate_limit_probability: 1.0,
            retry_hint_probability: 0.0,
            ..Self::none()
        }
        .enabled()
    }

    fn enabled(mut self) -> Self {
        self.enabled = true;
        self
    }
}

/// Deterministic oracle fault injector.
pub struct FaultInjector {
    rng: DeterministicRng,
    config: FaultConfig,
    faults_injected_count: u64,
}

impl FaultInjector {
    pub fn new(rng: DeterministicRng, config: FaultConfig) -> Self {
        for p in [
            config.rate_limit_probability,
            config.retry_hint_probability,
            config.invalid_probability,
            config.timeout_probability,
            config.other_probability,
        ] {
            debug_assert!((0.0..=1.0).contains(&p), "Probability must be in [0.0, 1.0]");
        }

        Self {
            rng,
            config,
            faults_injected_count: 0,
        }
    }

    /// Fault for the next oracle call, if any.
    pub fn next_fault(&mut self) -> Option<OracleError> {
        if !self.config.enabled {
            return None;
        }

        let fault = if self.rng.chance(self.config.rate_limit_probability) {
            let retry_after = (self.config.retry_after_secs_max > 0
                && self.rng.chance(self.config.retry_hint_probability))
            .then(|| Duration::from_secs(self.rng.secs_up_to(self.config.retry_after_secs_max)));
            Some(OracleError::RateLimited {
                retry_after,
                message: "simulated 429".to_string(),
            })
        } else if self.rng.chance(self.config.invalid_probability) {
            Some(OracleError::InvalidResponse("simulated malformed body".to_string()))
        } else if self.rng.chance(self.config.timeout_probability) {
            Some(OracleError::Timeout(Duration::from_secs(120)))
        } else if self.rng.chance(self.config.other_probability) {
            Some(OracleError::Other("simulated connection reset".to_string()))
        } else {
            None
        };

        if fault.is_some() {
            self.faults_injected_count += 1;
        }
        fault
    }

    #[must_use]
    pub fn faults_injected_count(&self) -> u64 {
        self.faults_injected_count
    }

    #[must_use]
    pub fn config(&self) -> &FaultConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_faults_when_disabled() {
        let mut injector = FaultInjector::new(DeterministicRng::new(12345), FaultConfig::none());
        for _ in 0..1000 {
            assert!(injector.next_fault().is_none());
        }
    }

    #[test]
    fn test_deterministic_faults() {
        let mut a = FaultInjector::new(DeterministicRng::new(42), FaultConfig::aggressive());
        let mut b = FaultInjector::new(DeterministicRng::new(42), FaultConfig::aggressive());
        for _ in 0..200 {
            assert_eq!(a.next_fault(), b.next_fault());
        }
    }

    #[test]
    fn test_always_rate_limited() {
        let mut injector =
            FaultInjector::new(DeterministicRng::new(1), FaultConfig::always_rate_limited());
        for _ in 0..10 {
            assert_eq!(
                injector.next_fault(),
                Some(OracleError::RateLimited {
                    retry_after: None,
                    message: "simulated 429".to_string()
                })
            );
        }
        assert_eq!(injector.faults_injected_count(), 10);
    }

    #[test]
    fn test_retry_hint_bounds() {
        let config = FaultConfig {
            rate_limit_probability: 1.0,
            retry_hint_probability: 1.0,
            retry_after_secs_max: 9,
            ..FaultConfig::none()
        }
        .enabled();
        let mut injector = FaultInjector::new(DeterministicRng::new(3), config);
        for _ in 0..100 {
            match injector.next_fault() {
                Some(OracleError::RateLimited {
                    retry_after: Some(d),
                    ..
                }) => assert!((1..=9).contains(&d.as_secs())),
                other => panic!("unexpected fault {other:?}"),
            }
        }
    }
}
