//! Turn event abstractions.
//!
//! A [`TurnEvent`] is the atomic, immutable unit of campaign history. Typed
//! events from the bounded contexts implement [`DomainEvent`] and are lowered
//! to a [`NewTurnEvent`] before being handed to the event repository, which
//! assigns identity and ordering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A persisted turn event. Never updated or deleted after insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnEvent {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Campaign this event belongs to.
    pub campaign_id: Uuid,
    /// Turn that produced the event.
    pub turn_number: i64,
    /// Position of the event within its turn, starting at 0.
    pub sequence: i32,
    /// Type tag used for payload deserialization routing.
    pub event_type: String,
    /// Serialized event payload.
    pub payload: serde_json::Value,
    /// Hidden events are folded into state but never shown to the player.
    pub hidden: bool,
    /// Public rumors may be surfaced to the player as world gossip.
    pub is_public_rumor: bool,
    /// Timestamp of event creation.
    pub occurred_at: DateTime<Utc>,
}

/// An event that has not been appended yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTurnEvent {
    /// Type tag.
    pub event_type: String,
    /// Serialized payload.
    pub payload: serde_json::Value,
    /// Whether the event is hidden from the player.
    pub hidden: bool,
    /// Whether the event is a public rumor.
    pub is_public_rumor: bool,
    /// Timestamp of event creation.
    pub occurred_at: DateTime<Utc>,
}

impl NewTurnEvent {
    /// Materializes the stored form once the repository has assigned
    /// position and identity.
    #[must_use]
    pub fn into_stored(self, campaign_id: Uuid, turn_number: i64, sequence: i32) -> TurnEvent {
        TurnEvent {
            event_id: Uuid::now_v7(),
            campaign_id,
            turn_number,
            sequence,
            event_type: self.event_type,
            payload: self.payload,
            hidden: self.hidden,
            is_public_rumor: self.is_public_rumor,
            occurred_at: self.occurred_at,
        }
    }
}

/// Trait that all typed game events implement.
pub trait DomainEvent: Send + Sync + std::fmt::Debug {
    /// Returns the event type tag (used for serialization routing).
    fn event_type(&self) -> &'static str;

    /// Serializes the event payload to JSON.
    fn to_payload(&self) -> serde_json::Value;

    /// Whether the event is hidden from the player.
    fn hidden(&self) -> bool {
        false
    }

    /// Whether the event should circulate as a public rumor.
    fn is_public_rumor(&self) -> bool {
        false
    }

    /// Lowers the typed event into its appendable form.
    fn to_new_event(&self, occurred_at: DateTime<Utc>) -> NewTurnEvent {
        NewTurnEvent {
            event_type: self.event_type().to_owned(),
            payload: self.to_payload(),
            hidden: self.hidden(),
            is_public_rumor: self.is_public_rumor(),
            occurred_at,
        }
    }
}
