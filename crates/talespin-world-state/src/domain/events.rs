//! Domain events for the World State context.
//!
//! Every durable change to a campaign is one of these events. The stored
//! `event_type` tag and the externally tagged JSON payload are both derived
//! from the enum variant, so a stored event can always be routed back to its
//! typed form.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use talespin_core::event::DomainEvent;
use uuid::Uuid;

/// Event type tag for [`GameEvent::CampaignCreated`].
pub const CAMPAIGN_CREATED_EVENT_TYPE: &str = "campaign_created";
/// Event type tag for [`GameEvent::CharacterCreated`].
pub const CHARACTER_CREATED_EVENT_TYPE: &str = "character_created";
/// Event type tag for [`GameEvent::NpcSpawned`].
pub const NPC_SPAWNED_EVENT_TYPE: &str = "npc_spawned";
/// Event type tag for [`GameEvent::PlayerActed`].
pub const PLAYER_ACTED_EVENT_TYPE: &str = "player_acted";
/// Event type tag for [`GameEvent::MetaCommand`].
pub const META_COMMAND_EVENT_TYPE: &str = "meta_command";
/// Event type tag for [`GameEvent::CheckResolved`].
pub const CHECK_RESOLVED_EVENT_TYPE: &str = "check_resolved";
/// Event type tag for [`GameEvent::CombatHit`].
pub const COMBAT_HIT_EVENT_TYPE: &str = "combat_hit";
/// Event type tag for [`GameEvent::CombatMiss`].
pub const COMBAT_MISS_EVENT_TYPE: &str = "combat_miss";
/// Event type tag for [`GameEvent::DamageTaken`].
pub const DAMAGE_TAKEN_EVENT_TYPE: &str = "damage_taken";
/// Event type tag for [`GameEvent::Healed`].
pub const HEALED_EVENT_TYPE: &str = "healed";
/// Event type tag for [`GameEvent::ItemAcquired`].
pub const ITEM_ACQUIRED_EVENT_TYPE: &str = "item_acquired";
/// Event type tag for [`GameEvent::ItemConsumed`].
pub const ITEM_CONSUMED_EVENT_TYPE: &str = "item_consumed";
/// Event type tag for [`GameEvent::CreditsChanged`].
pub const CREDITS_CHANGED_EVENT_TYPE: &str = "credits_changed";
/// Event type tag for [`GameEvent::RelationshipChanged`].
pub const RELATIONSHIP_CHANGED_EVENT_TYPE: &str = "relationship_changed";
/// Event type tag for [`GameEvent::PsychShifted`].
pub const PSYCH_SHIFTED_EVENT_TYPE: &str = "psych_shifted";
/// Event type tag for [`GameEvent::LocationChanged`].
pub const LOCATION_CHANGED_EVENT_TYPE: &str = "location_changed";
/// Event type tag for [`GameEvent::FlagSet`].
pub const FLAG_SET_EVENT_TYPE: &str = "flag_set";
/// Event type tag for [`GameEvent::FactionStandingChanged`].
pub const FACTION_STANDING_CHANGED_EVENT_TYPE: &str = "faction_standing_changed";
/// Event type tag for [`GameEvent::RumorSpread`].
pub const RUMOR_SPREAD_EVENT_TYPE: &str = "rumor_spread";
/// Event type tag for [`GameEvent::QuestUpdated`].
pub const QUEST_UPDATED_EVENT_TYPE: &str = "quest_updated";
/// Event type tag for [`GameEvent::TimeAdvanced`].
pub const TIME_ADVANCED_EVENT_TYPE: &str = "time_advanced";
/// Event type tag for [`GameEvent::TurnNarrated`].
pub const TURN_NARRATED_EVENT_TYPE: &str = "turn_narrated";

/// Role a character plays in the campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CharacterRole {
    /// The player character.
    Player,
    /// A party member who reacts to the player's choices.
    Companion,
    /// Any other non-player character.
    Npc,
}

impl CharacterRole {
    /// Storage label, identical to the serialized form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CharacterRole::Player => "player",
            CharacterRole::Companion => "companion",
            CharacterRole::Npc => "npc",
        }
    }
}

/// Psychological state of a character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PsychProfile {
    /// Current mood label.
    pub mood: String,
    /// Stress level, `0..=100`.
    pub stress: i32,
    /// Trauma flags accumulated so far, without duplicates.
    pub trauma_flags: Vec<String>,
}

impl Default for PsychProfile {
    fn default() -> Self {
        Self {
            mood: "steady".to_owned(),
            stress: 0,
            trauma_flags: Vec::new(),
        }
    }
}

/// Everything needed to bring a character into existence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterSeed {
    /// Character identifier.
    pub character_id: Uuid,
    /// Display name.
    pub name: String,
    /// Campaign role.
    pub role: CharacterRole,
    /// Current location reference.
    pub location_id: Option<String>,
    /// Stat name to score.
    pub stats: BTreeMap<String, i32>,
    /// Starting hit points.
    pub hit_points: i32,
    /// Hit point ceiling.
    pub max_hit_points: i32,
    /// Relationship score towards the player.
    pub relationship: i32,
    /// Hidden motive. Never shown to the player.
    pub secret_agenda: Option<String>,
    /// Money.
    pub credits: i64,
    /// Psychological profile.
    #[serde(default)]
    pub psych: PsychProfile,
}

/// Emitted once at turn 0 when a campaign is set up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignCreated {
    /// The campaign identifier.
    pub campaign_id: Uuid,
    /// Display title.
    pub title: String,
    /// Time-period (era) identifier.
    pub time_period: String,
    /// Initial world-state blob (factions, flags, counters).
    pub world_state: serde_json::Value,
}

/// Emitted when a character joins the campaign at setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterCreated {
    /// The new character.
    pub character: CharacterSeed,
}

/// Emitted when the encounter simulation introduces an NPC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpcSpawned {
    /// The spawned character.
    pub character: CharacterSeed,
    /// Why the NPC appeared (spawn table entry or procedural fallback).
    pub reason: String,
}

/// Records the player's raw input and how it was routed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerActed {
    /// The acting player character.
    pub player_id: Uuid,
    /// Raw input text.
    pub input: String,
    /// Route class label.
    pub route: String,
    /// Classified action type, when one applied.
    pub action_type: Option<String>,
}

/// Records an out-of-character command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaCommand {
    /// The issuing player character.
    pub player_id: Uuid,
    /// Normalized command name.
    pub command: String,
}

/// The dice record of a mechanics resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResolved {
    /// The acting character.
    pub actor_id: Uuid,
    /// Action type label.
    pub action_type: String,
    /// Sides of the die rolled.
    pub die_sides: u32,
    /// Face shown by the die.
    pub natural_roll: u32,
    /// Modifier added to the roll.
    pub modifier: i32,
    /// `natural_roll + modifier`.
    pub total: i32,
    /// Difficulty class the total was compared against.
    pub difficulty_class: i32,
    /// Outcome tier label.
    pub outcome: String,
    /// In-world minutes the action consumed.
    pub time_cost_minutes: u32,
}

/// A successful attack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombatHit {
    /// The attacker.
    pub attacker_id: Uuid,
    /// The target, when it is a tracked character.
    pub target_id: Option<Uuid>,
    /// The target as named by the player.
    pub target_name: String,
    /// Damage dealt.
    pub damage: i32,
    /// Whether the hit was a critical success.
    pub critical: bool,
}

/// A failed attack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombatMiss {
    /// The attacker.
    pub attacker_id: Uuid,
    /// The target as named by the player.
    pub target_name: String,
}

/// A character lost hit points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DamageTaken {
    /// The injured character.
    pub character_id: Uuid,
    /// Hit points lost.
    pub amount: i32,
    /// Short cause description.
    pub cause: String,
}

/// A character regained hit points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Healed {
    /// The healed character.
    pub character_id: Uuid,
    /// Hit points regained.
    pub amount: i32,
}

/// An item entered a character's inventory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemAcquired {
    /// The owning character.
    pub owner_id: Uuid,
    /// Item identifier used if the owner does not hold the item yet.
    pub item_id: Uuid,
    /// Item name; stacks merge by name.
    pub item_name: String,
    /// Quantity gained.
    pub quantity: i32,
    /// Free-form attributes.
    pub attributes: serde_json::Value,
}

/// Items left a character's inventory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemConsumed {
    /// The owning character.
    pub owner_id: Uuid,
    /// Item name.
    pub item_name: String,
    /// Quantity lost.
    pub quantity: i32,
}

/// A character's credits changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditsChanged {
    /// The character.
    pub character_id: Uuid,
    /// Signed change.
    pub delta: i64,
}

/// A character's relationship score towards the player changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipChanged {
    /// The character.
    pub character_id: Uuid,
    /// Signed change.
    pub delta: i32,
    /// Short reason.
    pub reason: String,
}

/// A character's psychological profile shifted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PsychShifted {
    /// The character.
    pub character_id: Uuid,
    /// New mood, if it changed.
    pub mood: Option<String>,
    /// Signed stress change.
    pub stress_delta: i32,
    /// Trauma flag gained, if any.
    pub trauma_flag: Option<String>,
}

/// A character moved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationChanged {
    /// The character.
    pub character_id: Uuid,
    /// Destination location reference.
    pub location_id: String,
}

/// A world flag was set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagSet {
    /// Flag key.
    pub key: String,
    /// Flag value.
    pub value: serde_json::Value,
}

/// A faction's standing moved. Hidden from the player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactionStandingChanged {
    /// Faction name.
    pub faction: String,
    /// Signed change.
    pub delta: i32,
}

/// Gossip circulating in the world. Public.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RumorSpread {
    /// Rumor text.
    pub text: String,
}

/// A quest-log entry changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestUpdated {
    /// Quest identifier.
    pub quest_id: String,
    /// Quest title.
    pub title: String,
    /// New status.
    pub status: QuestStatus,
    /// Current stage description.
    pub stage: Option<String>,
}

/// Quest lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestStatus {
    /// Known but not yet accepted.
    Available,
    /// In progress.
    Active,
    /// Finished successfully.
    Completed,
    /// Failed or abandoned.
    Failed,
}

/// In-world time passed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeAdvanced {
    /// Minutes elapsed.
    pub minutes: u32,
}

/// The narration committed for a turn. Lets the rendered-turn cache be
/// rebuilt from the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnNarrated {
    /// Narrated prose.
    pub text: String,
    /// Citations used while generating the prose.
    pub citations: Vec<String>,
    /// Suggested follow-up actions.
    pub suggested_actions: Vec<String>,
}

/// Event payload variants for the World State context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GameEvent {
    /// A campaign was set up.
    CampaignCreated(CampaignCreated),
    /// A character was created at setup.
    CharacterCreated(CharacterCreated),
    /// An NPC was spawned by the encounter simulation.
    NpcSpawned(NpcSpawned),
    /// The player acted.
    PlayerActed(PlayerActed),
    /// The player issued an out-of-character command.
    MetaCommand(MetaCommand),
    /// A mechanics check was resolved.
    CheckResolved(CheckResolved),
    /// An attack hit.
    CombatHit(CombatHit),
    /// An attack missed.
    CombatMiss(CombatMiss),
    /// A character took damage.
    DamageTaken(DamageTaken),
    /// A character was healed.
    Healed(Healed),
    /// An item was acquired.
    ItemAcquired(ItemAcquired),
    /// Items were consumed.
    ItemConsumed(ItemConsumed),
    /// Credits changed.
    CreditsChanged(CreditsChanged),
    /// A relationship score changed.
    RelationshipChanged(RelationshipChanged),
    /// A psychological profile shifted.
    PsychShifted(PsychShifted),
    /// A character moved.
    LocationChanged(LocationChanged),
    /// A world flag was set.
    FlagSet(FlagSet),
    /// A faction's standing changed.
    FactionStandingChanged(FactionStandingChanged),
    /// A rumor spread.
    RumorSpread(RumorSpread),
    /// A quest changed.
    QuestUpdated(QuestUpdated),
    /// In-world time advanced.
    TimeAdvanced(TimeAdvanced),
    /// Narration was committed.
    TurnNarrated(TurnNarrated),
}

impl DomainEvent for GameEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::CampaignCreated(_) => CAMPAIGN_CREATED_EVENT_TYPE,
            Self::CharacterCreated(_) => CHARACTER_CREATED_EVENT_TYPE,
            Self::NpcSpawned(_) => NPC_SPAWNED_EVENT_TYPE,
            Self::PlayerActed(_) => PLAYER_ACTED_EVENT_TYPE,
            Self::MetaCommand(_) => META_COMMAND_EVENT_TYPE,
            Self::CheckResolved(_) => CHECK_RESOLVED_EVENT_TYPE,
            Self::CombatHit(_) => COMBAT_HIT_EVENT_TYPE,
            Self::CombatMiss(_) => COMBAT_MISS_EVENT_TYPE,
            Self::DamageTaken(_) => DAMAGE_TAKEN_EVENT_TYPE,
            Self::Healed(_) => HEALED_EVENT_TYPE,
            Self::ItemAcquired(_) => ITEM_ACQUIRED_EVENT_TYPE,
            Self::ItemConsumed(_) => ITEM_CONSUMED_EVENT_TYPE,
            Self::CreditsChanged(_) => CREDITS_CHANGED_EVENT_TYPE,
            Self::RelationshipChanged(_) => RELATIONSHIP_CHANGED_EVENT_TYPE,
            Self::PsychShifted(_) => PSYCH_SHIFTED_EVENT_TYPE,
            Self::LocationChanged(_) => LOCATION_CHANGED_EVENT_TYPE,
            Self::FlagSet(_) => FLAG_SET_EVENT_TYPE,
            Self::FactionStandingChanged(_) => FACTION_STANDING_CHANGED_EVENT_TYPE,
            Self::RumorSpread(_) => RUMOR_SPREAD_EVENT_TYPE,
            Self::QuestUpdated(_) => QUEST_UPDATED_EVENT_TYPE,
            Self::TimeAdvanced(_) => TIME_ADVANCED_EVENT_TYPE,
            Self::TurnNarrated(_) => TURN_NARRATED_EVENT_TYPE,
        }
    }

    fn to_payload(&self) -> serde_json::Value {
        // Serialization of derived Serialize types to Value is infallible.
        serde_json::to_value(self).expect("GameEvent serialization is infallible")
    }

    fn hidden(&self) -> bool {
        matches!(self, Self::FactionStandingChanged(_))
    }

    fn is_public_rumor(&self) -> bool {
        matches!(self, Self::RumorSpread(_))
    }
}
