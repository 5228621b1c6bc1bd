//! Shared test doubles for the Talespin narrative engine.

mod clock;
mod llm;
mod repository;
mod rng;

pub use clock::FixedClock;
pub use llm::{ScriptedLlm, UnreachableLlm};
pub use repository::{FailingEventRepository, RecordingEventRepository};
pub use rng::{MockRng, ScriptedRngSource, SequenceRng};
