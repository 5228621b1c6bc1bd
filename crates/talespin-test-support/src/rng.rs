//! Test RNG: deterministic `DeterministicRng` and `RngSource` doubles.

use std::collections::HashMap;
use std::sync::Mutex;

use talespin_core::rng::{DeterministicRng, RngSource, SeededRngSource, TurnSeed};

/// A no-op RNG that always returns `min` for `next_u32_range` and `0.0` for
/// `next_f64`. Suitable for tests that do not depend on specific random values.
#[derive(Debug)]
pub struct MockRng;

impl DeterministicRng for MockRng {
    fn next_u32_range(&mut self, min: u32, _max: u32) -> u32 {
        min
    }

    fn next_f64(&mut self) -> f64 {
        0.0
    }
}

/// An RNG that returns values from a predetermined sequence. Panics if the
/// sequence is exhausted. Used in tests that need specific, repeatable random
/// outcomes (e.g., dice rolls in the mechanics resolver).
#[derive(Debug, Clone)]
pub struct SequenceRng {
    values: Vec<u32>,
    index: usize,
}

impl SequenceRng {
    /// Create a new `SequenceRng` with the given values.
    #[must_use]
    pub fn new(values: Vec<u32>) -> Self {
        Self { values, index: 0 }
    }
}

impl DeterministicRng for SequenceRng {
    fn next_u32_range(&mut self, _min: u32, _max: u32) -> u32 {
        let val = self.values[self.index];
        self.index += 1;
        val
    }

    fn next_f64(&mut self) -> f64 {
        0.0
    }
}

/// An `RngSource` that serves scripted sequences for chosen sub-keys and the
/// production seeded streams for everything else. Records every sub-key
/// requested so tests can assert which stages drew randomness.
#[derive(Debug, Default)]
pub struct ScriptedRngSource {
    scripts: HashMap<String, Vec<u32>>,
    requested: Mutex<Vec<String>>,
}

impl ScriptedRngSource {
    /// Creates a source with no scripted streams.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the stream for `sub_key` in every turn.
    #[must_use]
    pub fn with_stream(mut self, sub_key: &str, values: Vec<u32>) -> Self {
        self.scripts.insert(sub_key.to_owned(), values);
        self
    }

    /// Sub-keys requested so far, in order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

impl RngSource for ScriptedRngSource {
    fn stream(&self, seed: &TurnSeed<'_>) -> Box<dyn DeterministicRng> {
        self.requested.lock().unwrap().push(seed.sub_key.to_owned());
        match self.scripts.get(seed.sub_key) {
            Some(values) => Box::new(SequenceRng::new(values.clone())),
            None => SeededRngSource.stream(seed),
        }
    }
}
