//! The warnings side-channel.
//!
//! Stages append degradation notices here instead of failing. Warnings never
//! influence control flow; they are surfaced to the caller with the turn
//! result.

use serde::{Deserialize, Serialize};

/// Category of a non-fatal degradation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningCode {
    /// An LLM call fell back to its deterministic value.
    LlmFallback,
    /// A content-pack lookup missed and a procedural default was used.
    ContentMissing,
    /// The retrieval collaborator failed; no extra context was used.
    RetrievalUnavailable,
    /// The narrative validator rewrote or replaced generated prose.
    NarrationRewritten,
    /// Generated suggestions were padded or deduplicated.
    SuggestionsAdjusted,
    /// The rendered-turn cache write failed after the turn was committed.
    RenderCacheFailed,
    /// The projection save failed after the turn was committed.
    ProjectionDeferred,
}

/// A single non-fatal diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    /// The stage or component that raised the warning.
    pub source: String,
    /// Machine-readable category.
    pub code: WarningCode,
    /// Human-readable detail.
    pub message: String,
}

/// Ordered accumulator of warnings for one turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Warnings(Vec<Warning>);

impl Warnings {
    /// Creates an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a warning.
    pub fn push(&mut self, source: impl Into<String>, code: WarningCode, message: impl Into<String>) {
        self.0.push(Warning {
            source: source.into(),
            code,
            message: message.into(),
        });
    }

    /// Number of warnings recorded so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no warnings were recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Warning> {
        self.0.iter()
    }

    /// Counts warnings with the given code.
    #[must_use]
    pub fn count_of(&self, code: WarningCode) -> usize {
        self.0.iter().filter(|w| w.code == code).count()
    }

    /// Consumes the accumulator.
    #[must_use]
    pub fn into_vec(self) -> Vec<Warning> {
        self.0
    }
}

impl<'a> IntoIterator for &'a Warnings {
    type Item = &'a Warning;
    type IntoIter = std::slice::Iter<'a, Warning>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_preserves_order_and_counts_by_code() {
        let mut warnings = Warnings::new();
        warnings.push("narrator", WarningCode::LlmFallback, "backend unreachable");
        warnings.push("encounter", WarningCode::ContentMissing, "unknown location");
        warnings.push("director", WarningCode::LlmFallback, "malformed json");

        assert_eq!(warnings.len(), 3);
        assert_eq!(warnings.count_of(WarningCode::LlmFallback), 2);
        let sources: Vec<&str> = warnings.iter().map(|w| w.source.as_str()).collect();
        assert_eq!(sources, ["narrator", "encounter", "director"]);
    }

    #[test]
    fn test_serializes_as_plain_list() {
        let mut warnings = Warnings::new();
        warnings.push("narrator", WarningCode::LlmFallback, "timeout");

        let json = serde_json::to_value(&warnings).unwrap();

        assert_eq!(json[0]["code"], "llm_fallback");
        assert_eq!(json[0]["source"], "narrator");
    }
}
