//! # glupe-stateright
//!
//! Stateright model of the generation loop.
//!
//! The model drives [`glupe_core::transition`] with every event the
//! oracle and verifier could produce, so exhaustive checking covers the
//! real transition function rather than a copy of it.

pub mod generation_loop;

pub use generation_loop::{LoopModel, LoopModelState};
