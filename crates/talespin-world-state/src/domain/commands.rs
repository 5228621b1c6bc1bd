//! Commands for the World State context.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{CharacterRole, CharacterSeed, QuestStatus};

/// An item a character starts the campaign with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartingItem {
    /// The owning character.
    pub owner_id: Uuid,
    /// Item name.
    pub item_name: String,
    /// Quantity.
    pub quantity: i32,
    /// Free-form attributes.
    #[serde(default)]
    pub attributes: serde_json::Value,
}

/// A quest known at campaign start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartingQuest {
    /// Quest identifier.
    pub quest_id: String,
    /// Quest title.
    pub title: String,
    /// Initial status.
    pub status: QuestStatus,
    /// Initial stage.
    pub stage: Option<String>,
}

/// Command to set up a new campaign at turn 0.
#[derive(Debug, Clone)]
pub struct CreateCampaign {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The campaign to create.
    pub campaign_id: Uuid,
    /// Display title.
    pub title: String,
    /// Time-period (era) identifier.
    pub time_period: String,
    /// Initial world-state blob.
    pub world_state: serde_json::Value,
    /// Starting characters; exactly one must be the player.
    pub characters: Vec<CharacterSeed>,
    /// Starting inventory.
    pub items: Vec<StartingItem>,
    /// Starting quest log.
    pub quests: Vec<StartingQuest>,
}

impl CreateCampaign {
    /// The player character seed, if exactly one exists.
    #[must_use]
    pub fn player(&self) -> Option<&CharacterSeed> {
        let mut players = self
            .characters
            .iter()
            .filter(|c| c.role == CharacterRole::Player);
        match (players.next(), players.next()) {
            (Some(player), None) => Some(player),
            _ => None,
        }
    }
}
