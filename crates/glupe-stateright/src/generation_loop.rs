//! Stateright model of the generate/verify state machine.
//!
//! The oracle and the verifier are modeled as nondeterministic: in every
//! state each event they could produce is an action. Checked properties:
//!
//! - the pass counter never exceeds the pass budget
//! - the attempt counter never exceeds the oracle attempt bound
//! - fatal diagnostics halt the loop only after the minimum pass count
//! - backoff is linear in the attempt or follows the server hint
//! - the driver is told to halt exactly in terminal states
//! - every path terminates

use std::time::Duration;

use glupe_core::{
    transition, Effect, Event, FatalReason, LoopPolicy, LoopState, OracleOutcome, Verdict,
};
use stateright::{Model, Property};

/// Model state: the loop state and the effect the driver was asked for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoopModelState {
    pub state: LoopState,
    pub effect: Effect,
}

/// Model of one build's generation loop under `policy`.
pub struct LoopModel {
    pub policy: LoopPolicy,
    /// Server retry hint offered on rate-limited responses
    pub retry_hint: Duration,
}

impl LoopModel {
    pub fn new(policy: LoopPolicy) -> Self {
        debug_assert!(policy.passes_max > 0);
        debug_assert!(policy.oracle_attempts_max > 0);

        Self {
            policy,
            retry_hint: Duration::from_secs(7),
        }
    }

    /// Small bounds for exhaustive checking in unit tests.
    pub fn small() -> Self {
        Self::new(LoopPolicy {
            passes_max: 4,
            oracle_attempts_max: 3,
            passes_before_fatal_min: 2,
            backoff_base: Duration::from_secs(5),
        })
    }

    /// Events the environment can deliver in `state`.
    pub fn enabled_events(&self, state: &LoopState) -> Vec<Event> {
        match state {
            LoopState::Draft { .. } => vec![Event::PromptAssembled],
            LoopState::Dispatched { .. } => vec![
                Event::OracleReturned(OracleOutcome::Usable),
                Event::OracleReturned(OracleOutcome::RateLimited { retry_after: None }),
                Event::OracleReturned(OracleOutcome::RateLimited {
                    retry_after: Some(self.retry_hint),
                }),
                Event::OracleReturned(OracleOutcome::Invalid),
                Event::OracleReturned(OracleOutcome::Other),
            ],
            LoopState::Verifying { .. } => vec![
                Event::VerifierReturned(Verdict::Pass),
                Event::VerifierReturned(Verdict::Retry),
                Event::VerifierReturned(Verdict::Fatal),
            ],
            LoopState::Retryable { .. } => vec![Event::DiagnosticsRecorded],
            LoopState::Success { .. } | LoopState::Fatal { .. } => Vec::new(),
        }
    }

    fn backoff_is_expected(&self, s: &LoopModelState) -> bool {
        match (s.state, s.effect) {
            (LoopState::Dispatched { attempt, .. }, Effect::Backoff(delay)) => {
                delay == self.retry_hint || delay == self.policy.backoff_base * (attempt - 1)
            }
            (_, Effect::Backoff(_)) => false,
            _ => true,
        }
    }
}

impl Model for LoopModel {
    type State = LoopModelState;
    type Action = Event;

    fn init_states(&self) -> Vec<Self::State> {
        vec![
            LoopModelState {
                state: LoopState::initial(false),
                effect: Effect::AssemblePrompt,
            },
            LoopModelState {
                state: LoopState::initial(true),
                effect: Effect::RunVerifier,
            },
        ]
    }

    fn actions(&self, state: &Self::State, actions: &mut Vec<Self::Action>) {
        actions.extend(self.enabled_events(&state.state));
    }

    fn next_state(&self, last: &Self::State, action: Self::Action) -> Option<Self::State> {
        transition(&self.policy, &last.state, action)
            .ok()
            .map(|(state, effect)| LoopModelState { state, effect })
    }

    fn properties(&self) -> Vec<Property<Self>> {
        vec![
            Property::always("PassWithinBudget", |model: &Self, s: &LoopModelState| {
                s.state.pass() <= model.policy.passes_max
            }),
            Property::always("AttemptWithinBound", |model: &Self, s: &LoopModelState| {
                match s.state {
                    LoopState::Dispatched { attempt, .. } => {
                        attempt >= 1 && attempt <= model.policy.oracle_attempts_max
                    }
                    _ => true,
                }
            }),
            Property::always("FatalDiagnosticsAfterMinimum", |model: &Self, s: &LoopModelState| {
                match s.state {
                    LoopState::Fatal {
                        pass,
                        reason: FatalReason::FatalDiagnostics,
                    } => pass > model.policy.passes_before_fatal_min,
                    _ => true,
                }
            }),
            Property::always("HaltExactlyWhenTerminal", |_: &Self, s: &LoopModelState| {
                (s.effect == Effect::Halt) == s.state.is_terminal()
            }),
            Property::always("ExpectedBackoff", |model: &Self, s: &LoopModelState| {
                model.backoff_is_expected(s)
            }),
            Property::always("EveryEventHandled", |model: &Self, s: &LoopModelState| {
                model
                    .enabled_events(&s.state)
                    .into_iter()
                    .all(|event| transition(&model.policy, &s.state, event).is_ok())
            }),
            Property::eventually("Terminates", |_: &Self, s: &LoopModelState| {
                s.state.is_terminal()
            }),
            Property::sometimes("CanSucceed", |_: &Self, s: &LoopModelState| {
                matches!(s.state, LoopState::Success { .. })
            }),
            Property::sometimes("CanExhaustPasses", |_: &Self, s: &LoopModelState| {
                matches!(
                    s.state,
                    LoopState::Fatal {
                        reason: FatalReason::PassesExhausted,
                        ..
                    }
                )
            }),
            Property::sometimes("CanExhaustOracle", |_: &Self, s: &LoopModelState| {
                matches!(
                    s.state,
                    LoopState::Fatal {
                        reason: FatalReason::OracleExhausted,
                        ..
                    }
                )
            }),
        ]
    }
}
