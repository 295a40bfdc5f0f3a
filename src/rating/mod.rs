//! Elo rating engine

pub mod engine;

pub use engine::{EloEngine, PairOutcome};
