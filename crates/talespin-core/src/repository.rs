//! Event repository abstraction.
//!
//! The repository exposes append and read operations only. There is no
//! update or delete path for turn events: the log is append-only by
//! construction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;
use crate::event::{NewTurnEvent, TurnEvent};

/// The campaign row registered at setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignRecord {
    /// Campaign identifier.
    pub campaign_id: Uuid,
    /// Display title.
    pub title: String,
    /// Time-period (era) identifier.
    pub time_period: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Cached narrator output for one turn. A read optimization, not a source
/// of truth: the `turn_narrated` event carries the same content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedTurn {
    /// Row identifier.
    pub id: Uuid,
    /// Campaign reference.
    pub campaign_id: Uuid,
    /// Turn number the prose belongs to.
    pub turn_number: i64,
    /// Rendered narration.
    pub text: String,
    /// Lore/style citations used while generating the narration.
    pub citations: Vec<String>,
    /// Suggested follow-up actions.
    pub suggested_actions: Vec<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Repository trait for the campaign event log.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Registers a new campaign. Fails if the campaign already exists.
    async fn create_campaign(&self, campaign: &CampaignRecord) -> Result<(), DomainError>;

    /// Loads a campaign row.
    async fn load_campaign(&self, campaign_id: Uuid) -> Result<CampaignRecord, DomainError>;

    /// Returns the latest committed turn number, or `None` for an empty log.
    async fn last_turn(&self, campaign_id: Uuid) -> Result<Option<i64>, DomainError>;

    /// Load all events for a campaign, ordered by turn then sequence.
    async fn load_events(&self, campaign_id: Uuid) -> Result<Vec<TurnEvent>, DomainError>;

    /// Load the events of turns strictly after `after_turn`, in log order.
    async fn load_events_after(
        &self,
        campaign_id: Uuid,
        after_turn: i64,
    ) -> Result<Vec<TurnEvent>, DomainError>;

    /// Appends a single event and returns its identifier.
    ///
    /// `turn_number` may extend the latest turn or open the next one; any
    /// other value is a [`DomainError::TurnOrderViolation`].
    async fn append_event(
        &self,
        campaign_id: Uuid,
        turn_number: i64,
        event: NewTurnEvent,
    ) -> Result<Uuid, DomainError>;

    /// Atomically appends all events of a new turn. Either every event is
    /// persisted or none is. `turn_number` must be exactly one past the
    /// latest committed turn (or 0 for an empty log).
    async fn append_turn(
        &self,
        campaign_id: Uuid,
        turn_number: i64,
        events: Vec<NewTurnEvent>,
    ) -> Result<Vec<TurnEvent>, DomainError>;

    /// Caches rendered narration. A second write for the same turn is ignored.
    async fn cache_rendered_turn(&self, turn: &RenderedTurn) -> Result<(), DomainError>;

    /// Loads cached narration for one turn.
    async fn load_rendered_turn(
        &self,
        campaign_id: Uuid,
        turn_number: i64,
    ) -> Result<Option<RenderedTurn>, DomainError>;
}

/// The turn number an append must use to open a new turn.
#[must_use]
pub fn next_turn_number(last_turn: Option<i64>) -> i64 {
    last_turn.map_or(0, |last| last + 1)
}

/// Validates the turn number of an append against the latest committed turn.
///
/// # Errors
///
/// Returns `DomainError::TurnOrderViolation` when the append would create a
/// gap, go backwards, or (unless `extend_latest`) reuse the latest turn.
pub fn check_turn_order(
    campaign_id: Uuid,
    last_turn: Option<i64>,
    turn_number: i64,
    extend_latest: bool,
) -> Result<(), DomainError> {
    let expected = next_turn_number(last_turn);
    let extends = extend_latest && last_turn == Some(turn_number);
    if turn_number == expected || extends {
        Ok(())
    } else {
        Err(DomainError::TurnOrderViolation {
            campaign_id,
            expected,
            actual: turn_number,
        })
    }
}
