//! Campaign projection: the fold of a campaign's event log.
//!
//! [`CampaignProjection::apply`] is deterministic and position-aware: events
//! at or before the last folded position are skipped, so folding a prefix and
//! then the remainder yields exactly the same state as folding the whole log.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use talespin_core::error::DomainError;
use talespin_core::event::{DomainEvent, TurnEvent};
use tracing::debug;
use uuid::Uuid;

use super::events::{CharacterRole, CharacterSeed, GameEvent, PsychProfile, QuestStatus};

const RELATIONSHIP_RANGE: (i32, i32) = (-100, 100);
const FACTION_RANGE: (i32, i32) = (-100, 100);
const STRESS_RANGE: (i32, i32) = (0, 100);
const RUMOR_MEMORY: usize = 10;

/// Position of an event in the campaign log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventPosition {
    /// Turn number.
    pub turn_number: i64,
    /// Sequence within the turn.
    pub sequence: i32,
}

impl EventPosition {
    /// Position of a stored event.
    #[must_use]
    pub fn of(event: &TurnEvent) -> Self {
        Self {
            turn_number: event.turn_number,
            sequence: event.sequence,
        }
    }
}

/// Campaign row as projected from the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignView {
    /// Campaign identifier.
    pub campaign_id: Uuid,
    /// Display title.
    pub title: String,
    /// Time-period (era) identifier.
    pub time_period: String,
    /// Free-form world state: `factions`, `flags`, `counters`, `rumors`.
    pub world_state: Value,
    /// In-world minutes since the campaign started.
    pub world_time_minutes: i64,
}

/// Character row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterRecord {
    /// Character identifier.
    pub character_id: Uuid,
    /// Campaign reference.
    pub campaign_id: Uuid,
    /// Display name.
    pub name: String,
    /// Campaign role.
    pub role: CharacterRole,
    /// Current location reference.
    pub location_id: Option<String>,
    /// Stat name to score.
    pub stats: BTreeMap<String, i32>,
    /// Current hit points.
    pub hit_points: i32,
    /// Hit point ceiling.
    pub max_hit_points: i32,
    /// Relationship score towards the player.
    pub relationship: i32,
    /// Hidden motive.
    pub secret_agenda: Option<String>,
    /// Money.
    pub credits: i64,
    /// Psychological profile.
    pub psych: PsychProfile,
}

impl CharacterRecord {
    fn from_seed(campaign_id: Uuid, seed: &CharacterSeed) -> Self {
        Self {
            character_id: seed.character_id,
            campaign_id,
            name: seed.name.clone(),
            role: seed.role,
            location_id: seed.location_id.clone(),
            stats: seed.stats.clone(),
            hit_points: seed.hit_points.min(seed.max_hit_points),
            max_hit_points: seed.max_hit_points,
            relationship: seed
                .relationship
                .clamp(RELATIONSHIP_RANGE.0, RELATIONSHIP_RANGE.1),
            secret_agenda: seed.secret_agenda.clone(),
            credits: seed.credits,
            psych: seed.psych.clone(),
        }
    }

    /// Whether the character is still standing.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.hit_points > 0
    }
}

/// Inventory row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    /// Item identifier.
    pub item_id: Uuid,
    /// Owning character.
    pub owner_id: Uuid,
    /// Item name.
    pub item_name: String,
    /// Quantity held, always positive.
    pub quantity: i32,
    /// Free-form attributes.
    pub attributes: Value,
}

/// Quest-log row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestEntry {
    /// Quest identifier.
    pub quest_id: String,
    /// Quest title.
    pub title: String,
    /// Lifecycle status.
    pub status: QuestStatus,
    /// Current stage description.
    pub stage: Option<String>,
}

/// The derived state of one campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignProjection {
    /// Campaign row; `None` until `campaign_created` has been folded.
    pub campaign: Option<CampaignView>,
    /// Characters keyed by id.
    pub characters: BTreeMap<Uuid, CharacterRecord>,
    /// Inventory rows keyed by item id.
    pub inventory: BTreeMap<Uuid, InventoryItem>,
    /// Quest log keyed by quest id.
    pub quests: BTreeMap<String, QuestEntry>,
    /// Position of the last folded event.
    pub last_applied: Option<EventPosition>,
    /// Campaign this projection belongs to.
    pub campaign_id: Uuid,
}

impl CampaignProjection {
    /// An empty projection for the given campaign.
    #[must_use]
    pub fn empty(campaign_id: Uuid) -> Self {
        Self {
            campaign: None,
            characters: BTreeMap::new(),
            inventory: BTreeMap::new(),
            quests: BTreeMap::new(),
            last_applied: None,
            campaign_id,
        }
    }

    /// Latest folded turn.
    #[must_use]
    pub fn last_turn(&self) -> Option<i64> {
        self.last_applied.map(|p| p.turn_number)
    }

    /// Inventory rows owned by a character, ordered by item name.
    #[must_use]
    pub fn inventory_of(&self, owner_id: Uuid) -> Vec<&InventoryItem> {
        let mut items: Vec<&InventoryItem> = self
            .inventory
            .values()
            .filter(|item| item.owner_id == owner_id)
            .collect();
        items.sort_by(|a, b| a.item_name.cmp(&b.item_name));
        items
    }

    /// Looks a character up by case-insensitive name.
    #[must_use]
    pub fn character_named(&self, name: &str) -> Option<&CharacterRecord> {
        let needle = name.trim().to_lowercase();
        self.characters
            .values()
            .find(|c| c.name.to_lowercase() == needle)
    }

    /// Living characters at a location, excluding `except`.
    #[must_use]
    pub fn characters_at(&self, location_id: &str, except: Uuid) -> Vec<&CharacterRecord> {
        self.characters
            .values()
            .filter(|c| {
                c.character_id != except
                    && c.is_alive()
                    && c.location_id.as_deref() == Some(location_id)
            })
            .collect()
    }

    /// Folds one stored event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the event belongs to another
    /// campaign or its payload cannot be decoded.
    pub fn apply(&mut self, stored: &TurnEvent) -> Result<(), DomainError> {
        if stored.campaign_id != self.campaign_id {
            return Err(DomainError::Infrastructure(format!(
                "event {} belongs to campaign {}, not {}",
                stored.event_id, stored.campaign_id, self.campaign_id
            )));
        }
        let position = EventPosition::of(stored);
        if self.last_applied.is_some_and(|last| position <= last) {
            debug!(event_id = %stored.event_id, "skipping already-folded event");
            return Ok(());
        }

        let event = decode(stored)?;
        self.fold(&event);
        self.last_applied = Some(position);
        Ok(())
    }

    /// Folds a sequence of stored events in order.
    ///
    /// # Errors
    ///
    /// Stops at and returns the first decoding error.
    pub fn apply_all<'a>(
        &mut self,
        events: impl IntoIterator<Item = &'a TurnEvent>,
    ) -> Result<(), DomainError> {
        for event in events {
            self.apply(event)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_lines)]
    fn fold(&mut self, event: &GameEvent) {
        match event {
            GameEvent::CampaignCreated(payload) => {
                self.campaign = Some(CampaignView {
                    campaign_id: payload.campaign_id,
                    title: payload.title.clone(),
                    time_period: payload.time_period.clone(),
                    world_state: normalize_world_state(payload.world_state.clone()),
                    world_time_minutes: 0,
                });
            }
            GameEvent::CharacterCreated(payload) => {
                self.insert_character(&payload.character);
            }
            GameEvent::NpcSpawned(payload) => {
                self.insert_character(&payload.character);
            }
            GameEvent::CombatHit(payload) => {
                if let Some(target) = payload.target_id {
                    self.with_character(target, |c| {
                        c.hit_points = (c.hit_points - payload.damage).max(0);
                    });
                }
            }
            GameEvent::DamageTaken(payload) => {
                self.with_character(payload.character_id, |c| {
                    c.hit_points = (c.hit_points - payload.amount).max(0);
                });
            }
            GameEvent::Healed(payload) => {
                self.with_character(payload.character_id, |c| {
                    c.hit_points = (c.hit_points + payload.amount).min(c.max_hit_points);
                });
            }
            GameEvent::ItemAcquired(payload) => {
                let existing = self.inventory.values_mut().find(|item| {
                    item.owner_id == payload.owner_id && item.item_name == payload.item_name
                });
                match existing {
                    Some(item) => item.quantity += payload.quantity,
                    None => {
                        self.inventory.insert(
                            payload.item_id,
                            InventoryItem {
                                item_id: payload.item_id,
                                owner_id: payload.owner_id,
                                item_name: payload.item_name.clone(),
                                quantity: payload.quantity,
                                attributes: payload.attributes.clone(),
                            },
                        );
                    }
                }
            }
            GameEvent::ItemConsumed(payload) => {
                let key = self
                    .inventory
                    .iter()
                    .find(|(_, item)| {
                        item.owner_id == payload.owner_id && item.item_name == payload.item_name
                    })
                    .map(|(id, _)| *id);
                if let Some(key) = key {
                    let exhausted = self.inventory.get_mut(&key).is_some_and(|item| {
                        item.quantity -= payload.quantity;
                        item.quantity <= 0
                    });
                    if exhausted {
                        self.inventory.remove(&key);
                    }
                }
            }
            GameEvent::CreditsChanged(payload) => {
                self.with_character(payload.character_id, |c| {
                    c.credits = (c.credits + payload.delta).max(0);
                });
            }
            GameEvent::RelationshipChanged(payload) => {
                self.with_character(payload.character_id, |c| {
                    c.relationship = (c.relationship + payload.delta)
                        .clamp(RELATIONSHIP_RANGE.0, RELATIONSHIP_RANGE.1);
                });
            }
            GameEvent::PsychShifted(payload) => {
                self.with_character(payload.character_id, |c| {
                    if let Some(mood) = &payload.mood {
                        c.psych.mood.clone_from(mood);
                    }
                    c.psych.stress = (c.psych.stress + payload.stress_delta)
                        .clamp(STRESS_RANGE.0, STRESS_RANGE.1);
                    if let Some(flag) = &payload.trauma_flag {
                        if !c.psych.trauma_flags.contains(flag) {
                            c.psych.trauma_flags.push(flag.clone());
                        }
                    }
                });
            }
            GameEvent::LocationChanged(payload) => {
                self.with_character(payload.character_id, |c| {
                    c.location_id = Some(payload.location_id.clone());
                });
            }
            GameEvent::FlagSet(payload) => {
                self.with_world_section("flags", |flags| {
                    flags.insert(payload.key.clone(), payload.value.clone());
                });
            }
            GameEvent::FactionStandingChanged(payload) => {
                self.with_world_section("factions", |factions| {
                    let current = factions
                        .get(&payload.faction)
                        .and_then(Value::as_i64)
                        .and_then(|v| i32::try_from(v).ok())
                        .unwrap_or(0);
                    let next = (current + payload.delta).clamp(FACTION_RANGE.0, FACTION_RANGE.1);
                    factions.insert(payload.faction.clone(), json!(next));
                });
            }
            GameEvent::RumorSpread(payload) => {
                if let Some(view) = self.campaign.as_mut() {
                    if let Some(rumors) = view
                        .world_state
                        .get_mut("rumors")
                        .and_then(Value::as_array_mut)
                    {
                        rumors.push(json!(payload.text));
                        let overflow = rumors.len().saturating_sub(RUMOR_MEMORY);
                        rumors.drain(..overflow);
                    }
                }
            }
            GameEvent::QuestUpdated(payload) => {
                self.quests.insert(
                    payload.quest_id.clone(),
                    QuestEntry {
                        quest_id: payload.quest_id.clone(),
                        title: payload.title.clone(),
                        status: payload.status,
                        stage: payload.stage.clone(),
                    },
                );
            }
            GameEvent::TimeAdvanced(payload) => {
                if let Some(view) = self.campaign.as_mut() {
                    view.world_time_minutes += i64::from(payload.minutes);
                }
            }
            GameEvent::PlayerActed(_)
            | GameEvent::MetaCommand(_)
            | GameEvent::CheckResolved(_)
            | GameEvent::CombatMiss(_)
            | GameEvent::TurnNarrated(_) => {}
        }
    }

    fn insert_character(&mut self, seed: &CharacterSeed) {
        self.characters.insert(
            seed.character_id,
            CharacterRecord::from_seed(self.campaign_id, seed),
        );
    }

    fn with_character(&mut self, character_id: Uuid, f: impl FnOnce(&mut CharacterRecord)) {
        match self.characters.get_mut(&character_id) {
            Some(character) => f(character),
            None => debug!(%character_id, "event references unknown character"),
        }
    }

    fn with_world_section(&mut self, section: &str, f: impl FnOnce(&mut Map<String, Value>)) {
        if let Some(map) = self
            .campaign
            .as_mut()
            .and_then(|view| view.world_state.get_mut(section))
            .and_then(Value::as_object_mut)
        {
            f(map);
        }
    }
}

/// Decodes a stored event into its typed form.
///
/// # Errors
///
/// Returns `DomainError::Infrastructure` if the payload does not deserialize
/// or its variant disagrees with the stored type tag.
pub fn decode(stored: &TurnEvent) -> Result<GameEvent, DomainError> {
    let event: GameEvent = serde_json::from_value(stored.payload.clone()).map_err(|e| {
        DomainError::Infrastructure(format!("event deserialization failed: {e}"))
    })?;
    if event.event_type() != stored.event_type {
        return Err(DomainError::Infrastructure(format!(
            "event {} tagged {} but payload is {}",
            stored.event_id,
            stored.event_type,
            event.event_type()
        )));
    }
    Ok(event)
}

/// Ensures the world-state blob is an object with the sections the fold
/// writes to.
fn normalize_world_state(value: Value) -> Value {
    let mut map = match value {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    for section in ["factions", "flags", "counters"] {
        map.entry(section).or_insert_with(|| json!({}));
    }
    map.entry("rumors").or_insert_with(|| json!([]));
    Value::Object(map)
}
