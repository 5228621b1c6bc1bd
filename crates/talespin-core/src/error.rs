//! Domain error types.

use thiserror::Error;
use uuid::Uuid;

/// Top-level domain error type.
///
/// Every variant is fatal for the turn that produced it. Recoverable
/// degradation (LLM failures, content misses) is reported through
/// [`crate::warnings::Warnings`] instead.
#[derive(Debug, Error)]
pub enum DomainError {
    /// A campaign was not found.
    #[error("campaign not found: {0}")]
    CampaignNotFound(Uuid),

    /// A character was not found in the campaign projection.
    #[error("character not found: {0}")]
    CharacterNotFound(Uuid),

    /// An append would break the strictly increasing turn sequence.
    #[error(
        "turn order violation on campaign {campaign_id}: expected turn {expected}, got {actual}"
    )]
    TurnOrderViolation {
        /// The campaign whose log rejected the append.
        campaign_id: Uuid,
        /// The turn number the log would accept next.
        expected: i64,
        /// The turn number that was submitted.
        actual: i64,
    },

    /// A malformed action descriptor reached the mechanics resolver.
    #[error("invalid action: {0}")]
    InvalidAction(String),

    /// A validation error in domain logic.
    #[error("validation error: {0}")]
    Validation(String),

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl DomainError {
    /// Returns `true` for errors raised by the storage layer.
    #[must_use]
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Self::Infrastructure(_) | Self::TurnOrderViolation { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_order_violation_message_names_both_turns() {
        let campaign_id = Uuid::nil();
        let err = DomainError::TurnOrderViolation {
            campaign_id,
            expected: 4,
            actual: 2,
        };

        assert_eq!(
            err.to_string(),
            format!("turn order violation on campaign {campaign_id}: expected turn 4, got 2")
        );
        assert!(err.is_storage());
    }

    #[test]
    fn test_invalid_action_is_not_a_storage_error() {
        assert!(!DomainError::InvalidAction("no descriptor".into()).is_storage());
    }
}
