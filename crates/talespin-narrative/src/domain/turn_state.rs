//! The working state of one turn.
//!
//! Built fresh for every turn from the last committed snapshot and threaded
//! through the stages. It carries no storage handle: the commit step takes
//! what it needs from it by value.

use serde::{Deserialize, Serialize};
use talespin_content::{ContentSource, Snippet, SpawnEntry};
use talespin_core::rng::TurnSeed;
use talespin_core::warnings::{WarningCode, Warnings};
use talespin_rules::{MechanicOutcome, OutcomeTier};
use talespin_world_state::application::query_handlers::StateSnapshot;
use talespin_world_state::domain::events::GameEvent;
use uuid::Uuid;

use super::route::{RouteClass, RouteDecision};

/// Pipeline stages, in topological order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Router,
    Mechanic,
    Encounter,
    WorldSim,
    CompanionReaction,
    ArcPlanner,
    SceneFrame,
    Director,
    Narrator,
    NarrativeValidator,
    SuggestionRefiner,
    Commit,
}

impl StageName {
    /// Stable label, used as the warning source.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StageName::Router => "router",
            StageName::Mechanic => "mechanic",
            StageName::Encounter => "encounter",
            StageName::WorldSim => "world_sim",
            StageName::CompanionReaction => "companion_reaction",
            StageName::ArcPlanner => "arc_planner",
            StageName::SceneFrame => "scene_frame",
            StageName::Director => "director",
            StageName::Narrator => "narrator",
            StageName::NarrativeValidator => "narrative_validator",
            StageName::SuggestionRefiner => "suggestion_refiner",
            StageName::Commit => "commit",
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a turn is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "phase", content = "stage")]
pub enum TurnPhase {
    Init,
    Routed,
    Running(StageName),
    CommitPending,
    Committed,
    Failed,
}

/// The player's surroundings, from content or a procedural stand-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationInfo {
    /// Location id from the projection, if the player has one.
    pub id: Option<String>,
    /// Display name.
    pub name: String,
    /// Era-pack description; empty for procedural locations.
    pub description: String,
    /// 0 (safe) to 5 (deadly); raises check difficulty.
    pub danger: u8,
    /// Percent chance per turn that someone arrives.
    pub encounter_chance: u8,
    /// Ids of reachable locations.
    pub connections: Vec<String>,
    /// Weighted NPC arrivals.
    pub spawn_table: Vec<SpawnEntry>,
    /// False when the era pack had no entry and defaults were used.
    pub from_content: bool,
}

impl LocationInfo {
    fn procedural(id: Option<String>) -> Self {
        let name = id
            .as_deref()
            .map_or_else(|| "somewhere unfamiliar".to_owned(), |id| id.replace('_', " "));
        Self {
            id,
            name,
            description: String::new(),
            danger: 0,
            encounter_chance: 0,
            connections: Vec::new(),
            spawn_table: Vec::new(),
            from_content: false,
        }
    }
}

/// A non-player character on stage this turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveNpc {
    /// Character id in the projection, or the id the spawn will commit.
    pub character_id: Uuid,
    /// Display name.
    pub name: String,
    /// Short description for prompts; may be empty.
    pub description: String,
    /// Spawned by the encounter stage this turn.
    pub newly_arrived: bool,
}

/// How a companion took the player's action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanionReaction {
    /// The reacting companion.
    pub companion_id: Uuid,
    /// Companion's name.
    pub name: String,
    /// One line of reaction for the narrator.
    pub reaction: String,
    /// Change to the companion's relationship with the player.
    pub relationship_delta: i32,
    /// Change to the companion's stress.
    pub stress_delta: i32,
}

/// Story-arc guidance for the director.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArcGuidance {
    /// The story beat to lean toward.
    pub beat: String,
    /// 1 (calm) to 10 (climax).
    pub tension: u8,
    /// Threads the narration may pick up.
    pub hooks: Vec<String>,
}

/// The framed scene the narration is set in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneFrame {
    /// Where the scene is set.
    pub location_name: String,
    /// One or two sentences establishing the place.
    pub description: String,
    /// In-world time label, e.g. "evening".
    pub time_of_day: String,
    /// Names of everyone on stage besides the player.
    pub present: Vec<String>,
    /// Emotional register of the scene.
    pub mood: String,
    /// Concrete details the narrator may use.
    pub sensory_details: Vec<String>,
}

/// The director's brief to the narrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectorNotes {
    /// What the narration should center on.
    pub focus: String,
    /// Pacing cue, e.g. "brisk".
    pub pacing: String,
    /// Facts the narration has to include.
    pub must_mention: Vec<String>,
    /// Things the narration must not say or reveal.
    pub avoid: Vec<String>,
}

/// Working state threaded through the stages of one turn.
#[derive(Debug, Clone)]
pub struct TurnState {
    /// Campaign being played.
    pub campaign_id: Uuid,
    /// The acting player character.
    pub player_id: Uuid,
    /// The turn number this turn will commit as.
    pub turn_number: i64,
    /// Raw player input.
    pub user_input: String,
    /// State as of the last committed turn.
    pub snapshot: StateSnapshot,
    /// Where the turn is in its lifecycle.
    pub phase: TurnPhase,
    /// Router.
    pub route: Option<RouteDecision>,
    /// Resolved once, by the first stage that needs it.
    pub location: Option<LocationInfo>,
    /// Mechanic; `None` on routes that skip it.
    pub mechanic: Option<MechanicOutcome>,
    /// Encounter.
    pub active_npcs: Vec<ActiveNpc>,
    /// Encounter: how an arrival was introduced.
    pub encounter_note: Option<String>,
    /// World simulation: off-screen happenings.
    pub world_notes: Vec<String>,
    /// Companion reaction.
    pub companion_reactions: Vec<CompanionReaction>,
    /// Arc planner.
    pub arc: Option<ArcGuidance>,
    /// Scene frame.
    pub scene: Option<SceneFrame>,
    /// Director.
    pub director: Option<DirectorNotes>,
    /// Retrieved lore and style snippets.
    pub context: Vec<Snippet>,
    /// Narrator prose, possibly rewritten by the validator.
    pub narration: String,
    /// Whether the narration is the deterministic template.
    pub narration_is_fallback: bool,
    /// Lore ids the narration drew on.
    pub citations: Vec<String>,
    /// Suggestion refiner; exactly the configured count once it has run.
    pub suggestions: Vec<String>,
    /// Validator findings.
    pub validation_notes: Vec<String>,
    /// Events to be written by the commit step, in order.
    pub pending_events: Vec<GameEvent>,
    /// In-world minutes the turn takes.
    pub time_cost_minutes: u32,
    /// Degradation notices.
    pub warnings: Warnings,
    /// Stages executed so far.
    pub trace: Vec<StageName>,
}

impl TurnState {
    /// Starts a turn on top of `snapshot`.
    #[must_use]
    pub fn new(snapshot: StateSnapshot, user_input: impl Into<String>) -> Self {
        Self {
            campaign_id: snapshot.projection.campaign_id,
            player_id: snapshot.player_id,
            turn_number: snapshot.last_turn() + 1,
            user_input: user_input.into(),
            snapshot,
            phase: TurnPhase::Init,
            route: None,
            location: None,
            mechanic: None,
            active_npcs: Vec::new(),
            encounter_note: None,
            world_notes: Vec::new(),
            companion_reactions: Vec::new(),
            arc: None,
            scene: None,
            director: None,
            context: Vec::new(),
            narration: String::new(),
            narration_is_fallback: false,
            citations: Vec::new(),
            suggestions: Vec::new(),
            validation_notes: Vec::new(),
            pending_events: Vec::new(),
            time_cost_minutes: 0,
            warnings: Warnings::new(),
            trace: Vec::new(),
        }
    }

    /// The seed of a named random stream for this turn.
    #[must_use]
    pub fn seed<'a>(&self, sub_key: &'a str) -> TurnSeed<'a> {
        TurnSeed::new(self.campaign_id, self.turn_number, sub_key)
    }

    /// The route class, `Talk` until the router has run.
    #[must_use]
    pub fn route_class(&self) -> RouteClass {
        self.route.as_ref().map_or(RouteClass::Talk, |r| r.class)
    }

    /// Hour of day (0-23) at the start of this turn.
    #[must_use]
    pub fn hour_of_day(&self, start_hour: u32) -> u32 {
        let minutes = self.snapshot.campaign().world_time_minutes + i64::from(start_hour) * 60;
        u32::try_from(minutes.rem_euclid(24 * 60) / 60).unwrap_or(0)
    }

    /// Whether the turn starts at night (20:00 to 05:59).
    #[must_use]
    pub fn is_night(&self, start_hour: u32) -> bool {
        let hour = self.hour_of_day(start_hour);
        !(6..20).contains(&hour)
    }

    /// Looks up the player's location once per turn; a miss is warned about
    /// by `stage` and replaced with a procedural stand-in.
    pub fn resolve_location(
        &mut self,
        content: &dyn ContentSource,
        stage: StageName,
    ) -> &LocationInfo {
        if self.location.is_none() {
            let id = self.snapshot.player().location_id.clone();
            let info = match id.as_deref().map(|id| (id, content.location(id))) {
                Some((_, Some(def))) => LocationInfo {
                    id: Some(def.id.clone()),
                    name: def.name.clone(),
                    description: def.description.clone(),
                    danger: def.danger,
                    encounter_chance: def.encounter_chance.min(100),
                    connections: def.connections.clone(),
                    spawn_table: def.spawn_table.clone(),
                    from_content: true,
                },
                Some((missing, None)) => {
                    self.warnings.push(
                        stage.as_str(),
                        WarningCode::ContentMissing,
                        format!("no era-pack entry for location {missing}"),
                    );
                    LocationInfo::procedural(id.clone())
                }
                None => LocationInfo::procedural(None),
            };
            self.location = Some(info);
        }
        self.location.get_or_insert_with(|| LocationInfo::procedural(None))
    }

    /// Short statements of what the mechanics established this turn.
    #[must_use]
    pub fn mechanical_facts(&self) -> Vec<String> {
        let Some(outcome) = &self.mechanic else {
            return Vec::new();
        };
        let roll = &outcome.roll;
        let mut facts = vec![format!(
            "{} check: {} ({} {:+} = {} against DC {})",
            outcome.action_type,
            tier_phrase(roll.tier),
            roll.natural_roll,
            roll.modifier,
            roll.total,
            roll.difficulty_class
        )];
        facts.extend(outcome.events.iter().filter_map(|event| match event {
            GameEvent::CombatHit(hit) => Some(format!(
                "{} takes {} damage{}",
                hit.target_name,
                hit.damage,
                if hit.critical { " from a critical blow" } else { "" }
            )),
            GameEvent::CombatMiss(miss) => Some(format!("the attack misses {}", miss.target_name)),
            GameEvent::DamageTaken(hurt) => {
                Some(format!("you take {} damage from {}", hurt.amount, hurt.cause))
            }
            GameEvent::ItemConsumed(used) => Some(format!("you use up one {}", used.item_name)),
            GameEvent::CreditsChanged(gain) => Some(format!("you pocket {} credits", gain.delta)),
            GameEvent::LocationChanged(moved) => Some(format!(
                "you arrive at {}",
                moved.location_id.replace('_', " ")
            )),
            GameEvent::FlagSet(flag) if flag.key.starts_with("clue:") => {
                Some(format!("you find a clue about {}", flag.key["clue:".len()..].replace('_', " ")))
            }
            GameEvent::FlagSet(flag) if flag.key == "alarm_raised" => {
                Some("someone raises the alarm".to_owned())
            }
            _ => None,
        }));
        facts
    }
}

/// Plain-language outcome tier.
#[must_use]
pub fn tier_phrase(tier: OutcomeTier) -> &'static str {
    match tier {
        OutcomeTier::CriticalFailure => "a disastrous failure",
        OutcomeTier::Failure => "a failure",
        OutcomeTier::Success => "a success",
        OutcomeTier::CriticalSuccess => "a spectacular success",
    }
}
