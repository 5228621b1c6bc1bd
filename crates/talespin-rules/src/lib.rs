//! Talespin: Rules & Resolution.
//!
//! The mechanics resolver turns a classified player action into a dice
//! record, a time cost and a list of game events. It never calls a language
//! model and never degrades: malformed input is a typed error, because the
//! resolver is what the rest of the pipeline falls back on.

pub mod domain;

pub use domain::actions::{ActionDescriptor, ActionType, Actor, Situation};
pub use domain::resolver::{DiceRoll, MechanicOutcome, OutcomeTier, resolve};
pub use domain::tuning::MechanicsTuning;
