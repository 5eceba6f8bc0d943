//! Generation/verification state machine.
//!
//! A pure transition function: given a state and the event that just
//! happened, return the next state and the effect the driver must perform.
//! The driver owns all I/O; this module owns every bound.
//!
//! ```text
//! Draft --PromptAssembled--> Dispatched --Usable--> Verifying --Pass--> Success
//!                              |  ^                    |
//!                  failure     |  | Backoff            +--Retry/Fatal(early)--> Retryable
//!                              v  |                    +--Fatal(late)--------> Fatal
//!                          (attempt+1)                              Retryable --DiagnosticsRecorded--> Draft
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

/// Bounds of the generation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoopPolicy {
    /// Maximum generate/verify passes
    pub passes_max: u32,
    /// Maximum oracle calls within one pass
    pub oracle_attempts_max: u32,
    /// Heuristically fatal diagnostics only halt after this many passes
    pub passes_before_fatal_min: u32,
    /// Linear backoff unit: attempt `n` waits `n * backoff_base`
    pub backoff_base: Duration,
}

impl Default for LoopPolicy {
    fn default() -> Self {
        Self {
            passes_max: 15,
            oracle_attempts_max: 15,
            passes_before_fatal_min: 3,
            backoff_base: Duration::from_secs(5),
        }
    }
}

impl LoopPolicy {
    /// Decide what to do after oracle call number `attempt` (1-based) failed.
    pub fn dispatch_decision(&self, attempt: u32, outcome: &OracleOutcome) -> DispatchDecision {
        debug_assert!(attempt > 0, "Attempts are 1-based");
        debug_assert!(*outcome != OracleOutcome::Usable);

        if attempt >= self.oracle_attempts_max {
            return DispatchDecision::GiveUp;
        }
        let linear = self.backoff_base.saturating_mul(attempt);
        let delay = match outcome {
            OracleOutcome::RateLimited {
                retry_after: Some(hint),
            } => *hint,
            _ => linear,
        };
        DispatchDecision::Retry(delay)
    }
}

/// Result of a failed oracle call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchDecision {
    /// Sleep, then call again
    Retry(Duration),
    GiveUp,
}

/// Why the loop halted without success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FatalReason {
    /// Oracle failed on every attempt of a pass
    OracleExhausted,
    /// Pass budget used up
    PassesExhausted,
    /// Verifier diagnostics matched a fatal pattern
    FatalDiagnostics,
}

impl fmt::Display for FatalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalReason::OracleExhausted => f.write_str("oracle attempts exhausted"),
            FatalReason::PassesExhausted => f.write_str("generation passes exhausted"),
            FatalReason::FatalDiagnostics => f.write_str("unrecoverable verifier diagnostics"),
        }
    }
}

/// Loop state. `pass` is 1-based; pass 0 is the fast-path verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopState {
    Draft { pass: u32 },
    Dispatched { pass: u32, attempt: u32 },
    Verifying { pass: u32 },
    Retryable { pass: u32 },
    Success { pass: u32 },
    Fatal { pass: u32, reason: FatalReason },
}

impl LoopState {
    /// Starting state: the first draft, or verification of the raw input.
    pub fn initial(fast_path: bool) -> Self {
        if fast_path {
            LoopState::Verifying { pass: 0 }
        } else {
            LoopState::Draft { pass: 1 }
        }
    }

    pub fn pass(&self) -> u32 {
        match *self {
            LoopState::Draft { pass }
            | LoopState::Dispatched { pass, .. }
            | LoopState::Verifying { pass }
            | LoopState::Retryable { pass }
            | LoopState::Success { pass }
            | LoopState::Fatal { pass, .. } => pass,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopState::Success { .. } | LoopState::Fatal { .. })
    }
}

/// Classified oracle response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OracleOutcome {
    Usable,
    RateLimited { retry_after: Option<Duration> },
    /// Empty, or output whose container syntax cannot be repaired
    Invalid,
    /// Transport failure, timeout, non-2xx status
    Other,
}

/// Classified verifier result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Pass,
    Retry,
    /// Heuristically unrecoverable (missing file, missing module)
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    PromptAssembled,
    OracleReturned(OracleOutcome),
    VerifierReturned(Verdict),
    DiagnosticsRecorded,
}

/// What the driver must do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Effect {
    AssemblePrompt,
    CallOracle,
    /// Sleep, then call the oracle again
    Backoff(Duration),
    RunVerifier,
    RecordDiagnostics,
    Halt,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MachineError {
    #[error("event {event:?} is not valid in state {state:?}")]
    InvalidTransition { state: LoopState, event: Event },
}

/// The transition function.
pub fn transition(
    policy: &LoopPolicy,
    state: &LoopState,
    event: Event,
) -> Result<(LoopState, Effect), MachineError> {
    let next = match (*state, event) {
        (LoopState::Draft { pass }, Event::PromptAssembled) => {
            (LoopState::Dispatched { pass, attempt: 1 }, Effect::CallOracle)
        }

        (LoopState::Dispatched { pass, .. }, Event::OracleReturned(OracleOutcome::Usable)) => {
            (LoopState::Verifying { pass }, Effect::RunVerifier)
        }
        (LoopState::Dispatched { pass, attempt }, Event::OracleReturned(outcome)) => {
            match policy.dispatch_decision(attempt, &outcome) {
                DispatchDecision::Retry(delay) => (
                    LoopState::Dispatched {
                        pass,
                        attempt: attempt + 1,
                    },
                    Effect::Backoff(delay),
                ),
                DispatchDecision::GiveUp => (
                    LoopState::Fatal {
                        pass,
                        reason: FatalReason::OracleExhausted,
                    },
                    Effect::Halt,
                ),
            }
        }

        (LoopState::Verifying { pass }, Event::VerifierReturned(Verdict::Pass)) => {
            (LoopState::Success { pass }, Effect::Halt)
        }
        (LoopState::Verifying { pass }, Event::VerifierReturned(Verdict::Fatal))
            if pass > policy.passes_before_fatal_min =>
        {
            (
                LoopState::Fatal {
                    pass,
                    reason: FatalReason::FatalDiagnostics,
                },
                Effect::Halt,
            )
        }
        (LoopState::Verifying { pass }, Event::VerifierReturned(_)) => {
            (LoopState::Retryable { pass }, Effect::RecordDiagnostics)
        }

        (LoopState::Retryable { pass }, Event::DiagnosticsRecorded) => {
            if pass >= policy.passes_max {
                (
                    LoopState::Fatal {
                        pass,
                        reason: FatalReason::PassesExhausted,
                    },
                    Effect::Halt,
                )
            } else {
                (LoopState::Draft { pass: pass + 1 }, Effect::AssemblePrompt)
            }
        }

        (state, event) => return Err(MachineError::InvalidTransition { state, event }),
    };
    Ok(next)
}

/// Labeled verifier diagnostics fed back into the next prompt.
///
/// Keeps the most recent `entries_max` entries.
#[derive(Debug, Clone)]
pub struct ErrorHistory {
    entries: VecDeque<String>,
    entries_max: usize,
}

impl Default for ErrorHistory {
    fn default() -> Self {
        Self::new(3)
    }
}

impl ErrorHistory {
    pub fn new(entries_max: usize) -> Self {
        debug_assert!(entries_max > 0);
        Self {
            entries: VecDeque::with_capacity(entries_max),
            entries_max,
        }
    }

    fn push(&mut self, entry: String) {
        if self.entries.len() == self.entries_max {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Failure of the unmodified input (fast path).
    pub fn record_fast_path(&mut self, diagnostics: &str) {
        self.push(format!("PREVIOUS COMPILATION ATTEMPT FAILED:\n{diagnostics}"));
    }

    /// Failure of generation pass `pass`.
    pub fn record(&mut self, pass: u32, diagnostics: &str) {
        self.push(format!("--- Error Pass {pass} ---\n{diagnostics}"));
    }

    /// Corrective instruction that supersedes raw diagnostics.
    pub fn record_hint(&mut self, pass: u32, hint: &str) {
        self.push(format!("--- Error Pass {pass} ---\n{hint}"));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(policy: &LoopPolicy, mut state: LoopState, events: &[Event]) -> (LoopState, Effect) {
        let mut effect = Effect::AssemblePrompt;
        for event in events {
            let (s, e) = transition(policy, &state, *event).unwrap();
            state = s;
            effect = e;
        }
        (state, effect)
    }

    #[test]
    fn test_happy_path() {
        let policy = LoopPolicy::default();
        let (state, effect) = run(
            &policy,
            LoopState::initial(false),
            &[
                Event::PromptAssembled,
                Event::OracleReturned(OracleOutcome::Usable),
                Event::VerifierReturned(Verdict::Pass),
            ],
        );
        assert_eq!(state, LoopState::Success { pass: 1 });
        assert_eq!(effect, Effect::Halt);
    }

    #[test]
    fn test_linear_and_hinted_backoff() {
        let policy = LoopPolicy::default();
        let s = LoopState::Dispatched { pass: 1, attempt: 2 };
        let (next, effect) = transition(
            &policy,
            &s,
            Event::OracleReturned(OracleOutcome::RateLimited { retry_after: None }),
        )
        .unwrap();
        assert_eq!(next, LoopState::Dispatched { pass: 1, attempt: 3 });
        assert_eq!(effect, Effect::Backoff(Duration::from_secs(10)));

        let (_, effect) = transition(
            &policy,
            &s,
            Event::OracleReturned(OracleOutcome::RateLimited {
                retry_after: Some(Duration::from_secs(42)),
            }),
        )
        .unwrap();
        assert_eq!(effect, Effect::Backoff(Duration::from_secs(42)));
    }

    #[test]
    fn test_oracle_exhaustion_is_fatal() {
        let policy = LoopPolicy {
            oracle_attempts_max: 2,
            ..LoopPolicy::default()
        };
        let (state, effect) = run(
            &policy,
            LoopState::Draft { pass: 1 },
            &[
                Event::PromptAssembled,
                Event::OracleReturned(OracleOutcome::Other),
                Event::OracleReturned(OracleOutcome::Invalid),
            ],
        );
        assert_eq!(
            state,
            LoopState::Fatal {
                pass: 1,
                reason: FatalReason::OracleExhausted
            }
        );
        assert_eq!(effect, Effect::Halt);
    }

    #[test]
    fn test_fatal_diagnostics_respect_minimum_passes() {
        let policy = LoopPolicy::default();

        let (early, effect) = transition(
            &policy,
            &LoopState::Verifying { pass: 3 },
            Event::VerifierReturned(Verdict::Fatal),
        )
        .unwrap();
        assert_eq!(early, LoopState::Retryable { pass: 3 });
        assert_eq!(effect, Effect::RecordDiagnostics);

        let (late, _) = transition(
            &policy,
            &LoopState::Verifying { pass: 4 },
            Event::VerifierReturned(Verdict::Fatal),
        )
        .unwrap();
        assert_eq!(
            late,
            LoopState::Fatal {
                pass: 4,
                reason: FatalReason::FatalDiagnostics
            }
        );
    }

    #[test]
    fn test_pass_budget() {
        let policy = LoopPolicy {
            passes_max: 2,
            ..LoopPolicy::default()
        };
        let (next, _) =
            transition(&policy, &LoopState::Retryable { pass: 1 }, Event::DiagnosticsRecorded).unwrap();
        assert_eq!(next, LoopState::Draft { pass: 2 });
        let (next, _) =
            transition(&policy, &LoopState::Retryable { pass: 2 }, Event::DiagnosticsRecorded).unwrap();
        assert_eq!(
            next,
            LoopState::Fatal {
                pass: 2,
                reason: FatalReason::PassesExhausted
            }
        );
    }

    #[test]
    fn test_fast_path_falls_back_to_draft() {
        let policy = LoopPolicy::default();
        let (state, effect) = run(
            &policy,
            LoopState::initial(true),
            &[Event::VerifierReturned(Verdict::Fatal), Event::DiagnosticsRecorded],
        );
        assert_eq!(state, LoopState::Draft { pass: 1 });
        assert_eq!(effect, Effect::AssemblePrompt);
    }

    #[test]
    fn test_invalid_transition() {
        let err = transition(&LoopPolicy::default(), &LoopState::Success { pass: 1 }, Event::PromptAssembled)
            .unwrap_err();
        assert!(matches!(err, MachineError::InvalidTransition { .. }));
    }

    #[test]
    fn test_error_history_is_capped_and_labeled() {
        let mut history = ErrorHistory::new(2);
        history.record_fast_path("boom");
        history.record(1, "first");
        history.record(2, "second");
        assert_eq!(history.len(), 2);
        let text = history.render();
        assert!(!text.contains("boom"));
        assert!(text.starts_with("--- Error Pass 1 ---\nfirst"));
        assert!(text.ends_with("--- Error Pass 2 ---\nsecond"));
    }
}
